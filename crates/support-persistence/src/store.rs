//! The persistence contract used by the bot core.

use async_trait::async_trait;

use support_models::{EntryId, Feedback, InteractionLog, KnowledgeEntry, LogId, UserHandle, UserRecord};

use crate::error::Result;

/// Storage for users, knowledge entries and interaction logs.
///
/// Implementations must be safe to share between tasks. They do not
/// serialize updates to a single user; callers hold a per-user lock for
/// read-modify-write sequences.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Loads a user by handle.
    async fn get_user(&self, handle: UserHandle) -> Result<Option<UserRecord>>;

    /// Inserts or replaces a user.
    async fn put_user(&self, user: &UserRecord) -> Result<()>;

    /// Finds the user whose verified email equals `email` (case-insensitive).
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>>;

    /// Lists every user, ordered by handle.
    async fn list_users(&self) -> Result<Vec<UserRecord>>;

    /// Lists every knowledge entry, ordered by technology name.
    async fn list_knowledge_entries(&self) -> Result<Vec<KnowledgeEntry>>;

    /// Loads a knowledge entry by id.
    async fn get_knowledge_entry(&self, id: &EntryId) -> Result<Option<KnowledgeEntry>>;

    /// Inserts or replaces a knowledge entry.
    async fn put_knowledge_entry(&self, entry: &KnowledgeEntry) -> Result<()>;

    /// Appends a new interaction log.
    async fn append_log(&self, log: &InteractionLog) -> Result<()>;

    /// Loads one of a user's interaction logs.
    async fn get_log(&self, user: UserHandle, id: &LogId) -> Result<Option<InteractionLog>>;

    /// The user's most recent answered log that has no feedback yet.
    async fn latest_unrated_log(&self, user: UserHandle) -> Result<Option<InteractionLog>>;

    /// Attaches feedback to a log. Fails with
    /// [`PersistenceError::FeedbackAlreadyRecorded`](crate::PersistenceError::FeedbackAlreadyRecorded)
    /// if the log was already rated and with `NotFound` if it does not exist.
    async fn set_feedback(&self, user: UserHandle, id: &LogId, feedback: Feedback) -> Result<()>;
}

/// Picks the newest answered, unrated log from `logs`.
pub(crate) fn pick_latest_unrated<'a, I>(logs: I) -> Option<InteractionLog>
where
    I: IntoIterator<Item = &'a InteractionLog>,
{
    logs.into_iter()
        .filter(|log| log.feedback.is_none() && !log.is_error())
        .max_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)))
        .cloned()
}
