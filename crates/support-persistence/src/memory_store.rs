//! In-memory backend for tests and throwaway runs.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use support_models::{EntryId, Feedback, InteractionLog, KnowledgeEntry, LogId, UserHandle, UserRecord};

use crate::error::{PersistenceError, Result};
use crate::store::{pick_latest_unrated, Persistence};

/// Keeps everything in maps. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<BTreeMap<UserHandle, UserRecord>>,
    knowledge: RwLock<HashMap<EntryId, KnowledgeEntry>>,
    logs: RwLock<Vec<InteractionLog>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored log, in insertion order.
    pub async fn logs(&self) -> Vec<InteractionLog> {
        self.logs.read().await.clone()
    }
}

#[async_trait]
impl Persistence for MemoryStore {
    async fn get_user(&self, handle: UserHandle) -> Result<Option<UserRecord>> {
        Ok(self.users.read().await.get(&handle).cloned())
    }

    async fn put_user(&self, user: &UserRecord) -> Result<()> {
        self.users.write().await.insert(user.handle, user.clone());
        Ok(())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| u.email.as_deref().is_some_and(|e| e.eq_ignore_ascii_case(email)))
            .cloned())
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>> {
        Ok(self.users.read().await.values().cloned().collect())
    }

    async fn list_knowledge_entries(&self) -> Result<Vec<KnowledgeEntry>> {
        let mut entries: Vec<KnowledgeEntry> = self.knowledge.read().await.values().cloned().collect();
        entries.sort_by(|a, b| {
            a.technology_name
                .cmp(&b.technology_name)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(entries)
    }

    async fn get_knowledge_entry(&self, id: &EntryId) -> Result<Option<KnowledgeEntry>> {
        Ok(self.knowledge.read().await.get(id).cloned())
    }

    async fn put_knowledge_entry(&self, entry: &KnowledgeEntry) -> Result<()> {
        self.knowledge.write().await.insert(entry.id.clone(), entry.clone());
        Ok(())
    }

    async fn append_log(&self, log: &InteractionLog) -> Result<()> {
        self.logs.write().await.push(log.clone());
        Ok(())
    }

    async fn get_log(&self, user: UserHandle, id: &LogId) -> Result<Option<InteractionLog>> {
        let logs = self.logs.read().await;
        Ok(logs.iter().find(|l| l.user == user && &l.id == id).cloned())
    }

    async fn latest_unrated_log(&self, user: UserHandle) -> Result<Option<InteractionLog>> {
        let logs = self.logs.read().await;
        Ok(pick_latest_unrated(logs.iter().filter(|l| l.user == user)))
    }

    async fn set_feedback(&self, user: UserHandle, id: &LogId, feedback: Feedback) -> Result<()> {
        let mut logs = self.logs.write().await;
        let log = logs
            .iter_mut()
            .find(|l| l.user == user && &l.id == id)
            .ok_or_else(|| PersistenceError::NotFound {
                kind: "interaction".to_string(),
                id: id.to_string(),
            })?;

        if log.feedback.is_some() {
            return Err(PersistenceError::FeedbackAlreadyRecorded(id.to_string()));
        }
        log.feedback = Some(feedback);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_put_replaces_user() {
        let store = MemoryStore::new();
        let mut user = UserRecord::new(UserHandle(1), Utc::now());
        store.put_user(&user).await.unwrap();

        user.username = Some("alice".into());
        store.put_user(&user).await.unwrap();

        assert_eq!(store.list_users().await.unwrap().len(), 1);
        let loaded = store.get_user(UserHandle(1)).await.unwrap().unwrap();
        assert_eq!(loaded.username.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_set_feedback_missing_log() {
        let store = MemoryStore::new();
        let err = store
            .set_feedback(UserHandle(1), &LogId::new(), Feedback::Helpful)
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::NotFound { .. }));
    }
}
