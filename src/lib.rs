#![warn(missing_docs)]
//! Oxide Relay library.
//!
//! Telegram-driven file relay: downloads media sent to the bot, stages it
//! locally and publishes it to an R2/S3 bucket.

/// Telegram bot layer.
pub mod bot;
/// Configuration management.
pub mod config;
/// Storage layer (R2/S3).
pub mod storage;
/// In-memory fakes for tests.
pub mod testing;
/// Transfer pipeline.
pub mod transfer;
/// Utility functions.
pub mod utils;
