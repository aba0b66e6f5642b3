/// Command and message handlers
pub mod handlers;
/// Telegram adapter of the relay transport
pub mod transport;

pub use transport::TelegramRelayTransport;
