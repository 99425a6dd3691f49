//! JSON file backend.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use support_models::{EntryId, Feedback, InteractionLog, KnowledgeEntry, LogId, UserHandle, UserRecord};

use crate::atomic::{read_all, read_json, write_json};
use crate::error::{PersistenceError, Result};
use crate::store::{pick_latest_unrated, Persistence};

/// Stores every record as its own JSON file:
///
/// ```text
/// base_path/
/// ├── users/
/// │   └── 123456789.json
/// ├── knowledge/
/// │   └── kb-1f0c….json
/// └── interactions/
///     └── 123456789/
///         └── log-7a2e….json
/// ```
pub struct FileStore {
    base_path: PathBuf,
}

impl FileStore {
    /// Creates a store rooted at `base_path`. Directories are created lazily.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn users_dir(&self) -> PathBuf {
        self.base_path.join("users")
    }

    fn user_path(&self, handle: UserHandle) -> PathBuf {
        self.users_dir().join(format!("{}.json", handle))
    }

    fn knowledge_dir(&self) -> PathBuf {
        self.base_path.join("knowledge")
    }

    fn entry_path(&self, id: &EntryId) -> PathBuf {
        self.knowledge_dir().join(format!("{}.json", id))
    }

    fn logs_dir(&self, user: UserHandle) -> PathBuf {
        self.base_path.join("interactions").join(user.to_string())
    }

    fn log_path(&self, user: UserHandle, id: &LogId) -> PathBuf {
        self.logs_dir(user).join(format!("{}.json", id))
    }
}

/// Runs file work on the blocking pool so async workers stay free.
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| PersistenceError::TaskFailed(e.to_string()))?
}

#[async_trait]
impl Persistence for FileStore {
    async fn get_user(&self, handle: UserHandle) -> Result<Option<UserRecord>> {
        let path = self.user_path(handle);
        blocking(move || read_json(&path)).await
    }

    async fn put_user(&self, user: &UserRecord) -> Result<()> {
        let path = self.user_path(user.handle);
        let record = user.clone();
        blocking(move || write_json(&path, &record)).await?;
        debug!(user = %user.handle, state = %user.state, "Saved user");
        Ok(())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let dir = self.users_dir();
        let users: Vec<UserRecord> = blocking(move || read_all(&dir)).await?;
        Ok(users.into_iter().find(|u| {
            u.email
                .as_deref()
                .is_some_and(|e| e.eq_ignore_ascii_case(email))
        }))
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>> {
        let dir = self.users_dir();
        let mut users: Vec<UserRecord> = blocking(move || read_all(&dir)).await?;
        users.sort_by_key(|u| u.handle);
        Ok(users)
    }

    async fn list_knowledge_entries(&self) -> Result<Vec<KnowledgeEntry>> {
        let dir = self.knowledge_dir();
        let mut entries: Vec<KnowledgeEntry> = blocking(move || read_all(&dir)).await?;
        entries.sort_by(|a, b| {
            a.technology_name
                .cmp(&b.technology_name)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(entries)
    }

    async fn get_knowledge_entry(&self, id: &EntryId) -> Result<Option<KnowledgeEntry>> {
        let path = self.entry_path(id);
        blocking(move || read_json(&path)).await
    }

    async fn put_knowledge_entry(&self, entry: &KnowledgeEntry) -> Result<()> {
        let path = self.entry_path(&entry.id);
        let record = entry.clone();
        blocking(move || write_json(&path, &record)).await?;
        debug!(id = %entry.id, technology = %entry.technology_name, version = entry.version, "Saved knowledge entry");
        Ok(())
    }

    async fn append_log(&self, log: &InteractionLog) -> Result<()> {
        let path = self.log_path(log.user, &log.id);
        let record = log.clone();
        blocking(move || write_json(&path, &record)).await
    }

    async fn get_log(&self, user: UserHandle, id: &LogId) -> Result<Option<InteractionLog>> {
        let path = self.log_path(user, id);
        blocking(move || read_json(&path)).await
    }

    async fn latest_unrated_log(&self, user: UserHandle) -> Result<Option<InteractionLog>> {
        let dir = self.logs_dir(user);
        let logs: Vec<InteractionLog> = blocking(move || read_all(&dir)).await?;
        Ok(pick_latest_unrated(&logs))
    }

    async fn set_feedback(&self, user: UserHandle, id: &LogId, feedback: Feedback) -> Result<()> {
        let path = self.log_path(user, id);
        let id = id.clone();
        blocking(move || {
            let mut log: InteractionLog = read_json(&path)?.ok_or_else(|| PersistenceError::NotFound {
                kind: "interaction".to_string(),
                id: id.to_string(),
            })?;

            if log.feedback.is_some() {
                return Err(PersistenceError::FeedbackAlreadyRecorded(id.to_string()));
            }

            log.feedback = Some(feedback);
            write_json(&path, &log)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use support_models::{TechnologyCategory, VerificationState};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_user_roundtrip() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());

        let mut user = UserRecord::new(UserHandle(42), Utc::now());
        user.state = VerificationState::AwaitingEmail;
        store.put_user(&user).await.unwrap();

        let loaded = store.get_user(UserHandle(42)).await.unwrap().unwrap();
        assert_eq!(loaded, user);
        assert!(store.get_user(UserHandle(7)).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_writes_from_spawned_tasks() {
        let dir = tempdir().unwrap();
        let store = std::sync::Arc::new(FileStore::new(dir.path()));

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store.put_user(&UserRecord::new(UserHandle(i), Utc::now())).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.list_users().await.unwrap().len(), 16);
    }

    #[tokio::test]
    async fn test_find_user_by_email_is_case_insensitive() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());

        let mut user = UserRecord::new(UserHandle(1), Utc::now());
        user.email = Some("bob@acme.com".into());
        store.put_user(&user).await.unwrap();
        store.put_user(&UserRecord::new(UserHandle(2), Utc::now())).await.unwrap();

        let found = store.find_user_by_email("BOB@acme.com").await.unwrap();
        assert_eq!(found.map(|u| u.handle), Some(UserHandle(1)));
        assert!(store.find_user_by_email("eve@acme.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_users_sorted() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());
        for id in [30, 10, 20] {
            store.put_user(&UserRecord::new(UserHandle(id), Utc::now())).await.unwrap();
        }

        let handles: Vec<i64> = store
            .list_users()
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.handle.get())
            .collect();
        assert_eq!(handles, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn test_knowledge_entries_listed_by_name() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let now = Utc::now();

        for name in ["Terraform", "Ansible"] {
            let entry = KnowledgeEntry::new(name, TechnologyCategory::Orchestration, "body", vec![], "system", now);
            store.put_knowledge_entry(&entry).await.unwrap();
        }

        let names: Vec<String> = store
            .list_knowledge_entries()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.technology_name)
            .collect();
        assert_eq!(names, vec!["Ansible", "Terraform"]);
    }

    #[tokio::test]
    async fn test_feedback_attached_once() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let log = InteractionLog::answered(UserHandle(1), "q", "a", vec![], 10, 100);
        store.append_log(&log).await.unwrap();

        store.set_feedback(UserHandle(1), &log.id, Feedback::Helpful).await.unwrap();
        let err = store
            .set_feedback(UserHandle(1), &log.id, Feedback::NotHelpful)
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::FeedbackAlreadyRecorded(_)));

        let stored = store.get_log(UserHandle(1), &log.id).await.unwrap().unwrap();
        assert_eq!(stored.feedback, Some(Feedback::Helpful));
    }

    #[tokio::test]
    async fn test_feedback_on_other_users_log_is_not_found() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let log = InteractionLog::answered(UserHandle(1), "q", "a", vec![], 10, 100);
        store.append_log(&log).await.unwrap();

        let err = store
            .set_feedback(UserHandle(2), &log.id, Feedback::Helpful)
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_latest_unrated_skips_rated_and_failed() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let user = UserHandle(1);

        let mut older = InteractionLog::answered(user, "first", "a", vec![], 1, 1);
        older.timestamp = Utc::now() - Duration::minutes(10);
        let mut rated = InteractionLog::answered(user, "second", "a", vec![], 1, 1);
        rated.timestamp = Utc::now() - Duration::minutes(5);
        rated.feedback = Some(Feedback::Helpful);
        let failed = InteractionLog::failed(user, "third", "timeout", vec![], 1);

        for log in [&older, &rated, &failed] {
            store.append_log(log).await.unwrap();
        }

        let latest = store.latest_unrated_log(user).await.unwrap().unwrap();
        assert_eq!(latest.id, older.id);
    }
}
