//! Error types for the core crate.

use thiserror::Error;

use crate::config::ConfigError;

/// Rejections from the verification flow. Each variant maps to guidance
/// shown to the user for the step that failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    /// The text is not shaped like an email address.
    #[error("not a valid email address")]
    InvalidFormat,

    /// The address is outside the allowed company domains.
    #[error("email domain {domain} is not allowed")]
    InvalidDomain { domain: String },

    /// The live code passed its expiry.
    #[error("verification code expired")]
    CodeExpired,

    /// Wrong code, with attempts left before lockout.
    #[error("verification code does not match ({remaining} attempts remaining)")]
    CodeMismatch { remaining: u32 },

    /// Too many wrong codes; the code was withdrawn.
    #[error("too many failed attempts")]
    TooManyAttempts,

    /// Another user already verified this address.
    #[error("email address is already registered")]
    EmailTaken,

    #[error("not waiting for an email address")]
    NotAwaitingEmail,

    #[error("not waiting for a verification code")]
    NotAwaitingCode,

    #[error("already verified")]
    AlreadyVerified,

    /// Access was revoked by an administrator.
    #[error("access revoked")]
    Revoked,
}

/// Failures of the chat-completions call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
    #[error("inference timed out after {0}s")]
    Timeout(u64),

    /// Transport failure, non-success status or missing credentials.
    #[error("inference unavailable: {0}")]
    Unavailable(String),

    /// The API answered with something we cannot use.
    #[error("malformed inference response: {0}")]
    MalformedResponse(String),
}

/// Failures delivering a verification email.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MailError {
    #[error("email delivery failed: {0}")]
    DeliveryFailed(String),
}

/// Top-level error for core operations.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Verification(#[from] VerificationError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    /// The code could not be delivered and was withdrawn.
    #[error("verification temporarily unavailable: {0}")]
    Mail(#[from] MailError),

    #[error("storage error: {0}")]
    Persistence(#[from] support_persistence::PersistenceError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A referenced record does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
