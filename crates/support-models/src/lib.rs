//! Core data models for the Gitinsky support bot.
//!
//! This crate provides the records shared by every other crate: users and
//! their verification progress, curated knowledge entries, and the log of
//! answered questions.

pub mod ids;
pub mod interaction;
pub mod knowledge;
pub mod user;

// Re-export main types
pub use ids::{EntryId, LogId, UserHandle};
pub use interaction::{Feedback, InteractionLog};
pub use knowledge::{KnowledgeEntry, TechnologyCategory};
pub use user::{UserRecord, VerificationState, VerificationStatus};
