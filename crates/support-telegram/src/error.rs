//! Error types for the Telegram bot.

use thiserror::Error;

/// Errors that stop the bot from starting or running.
#[derive(Debug, Error)]
pub enum TelegramError {
    /// Bot token not provided.
    #[error("Telegram bot token not set. Set TELEGRAM_BOT_TOKEN environment variable.")]
    NoToken,

    /// Failed to start the bot.
    #[error("Failed to start bot: {0}")]
    BotStartFailed(String),

    /// Webhook setup failed.
    #[error("Failed to register webhook: {0}")]
    WebhookFailed(String),

    /// Webhook mode needs a public URL.
    #[error("Webhook mode needs a public URL (--url or TELEGRAM_WEBHOOK_URL)")]
    NoWebhookUrl,

    /// Configuration error.
    #[error(transparent)]
    Config(#[from] support_core::ConfigError),

    /// Core error.
    #[error(transparent)]
    Core(#[from] support_core::CoreError),

    /// Telegram API error.
    #[error("Telegram API error: {0}")]
    Request(#[from] teloxide::RequestError),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for Telegram operations.
pub type Result<T> = std::result::Result<T, TelegramError>;

impl From<support_core::InferenceError> for TelegramError {
    fn from(e: support_core::InferenceError) -> Self {
        TelegramError::Core(e.into())
    }
}

impl From<support_core::MailError> for TelegramError {
    fn from(e: support_core::MailError) -> Self {
        TelegramError::Core(e.into())
    }
}
