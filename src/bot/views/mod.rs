//! Bot UI components
//!
//! Re-exports views, callback vocabulary and keyboards.

mod transfer;

pub use transfer::*;
