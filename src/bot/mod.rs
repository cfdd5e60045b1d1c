/// Command, media and callback handlers
pub mod handlers;
/// Media extraction from inbound messages
pub mod media;
/// Resilient messaging with retry
pub mod resilient;
/// Telegram implementation of the transfer gateway
pub mod transport;
/// UI views and keyboards
pub mod views;

pub use handlers::{Command, DownloadClient};
pub use transport::TelegramGateway;
