//! Core logic for the Gitinsky support bot.
//!
//! - [`verification`]: email verification state machine and its service
//! - [`retrieval`] and [`knowledge`]: keyword selection over a swappable snapshot
//! - [`assistant`]: retrieval, bounded inference with one retry, interaction log
//! - [`mail`] and [`inference`]: outbound collaborators behind traits
//! - [`config`]: environment settings and state directories
//!
//! The Telegram transport lives in `support-telegram`; nothing here knows
//! about chats or messages.

pub mod assistant;
pub mod config;
pub mod error;
pub mod inference;
pub mod knowledge;
pub mod locks;
pub mod mail;
pub mod retrieval;
pub mod sweep;
pub mod verification;

pub use assistant::{Answer, Assistant, FALLBACK_RESPONSE};
pub use config::{ConfigError, InferenceSettings, Settings, SmtpSettings};
pub use error::{CoreError, InferenceError, MailError, Result, VerificationError};
pub use inference::{Completion, ContextSnippet, InferenceClient, OpenRouterClient};
pub use knowledge::{KnowledgeBase, KnowledgeSnapshot, SeedEntry, SeedReport, UpsertOutcome};
pub use locks::UserLocks;
pub use mail::{EmailBody, LogMailer, Mailer, SmtpMailer};
pub use sweep::CodeSweeper;
pub use verification::{
    CodeDelivery, IssuedCode, VerificationMachine, VerificationPolicy, VerificationService,
};
