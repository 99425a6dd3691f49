//! Question answering pipeline.
//!
//! retrieval → inference (bounded, one retry) → interaction log.

use std::sync::Arc;
use std::time::{Duration, Instant};

use support_models::{InteractionLog, LogId, UserHandle};
use support_persistence::Persistence;
use tracing::{info, warn};

use crate::error::InferenceError;
use crate::inference::{Completion, ContextSnippet, InferenceClient, SYSTEM_PROMPT};
use crate::knowledge::KnowledgeBase;
use crate::locks::UserLocks;

/// Sent instead of an answer when the model cannot be reached.
pub const FALLBACK_RESPONSE: &str = "\
I'm experiencing technical difficulties connecting to the AI service right now.

Please try one of the following:
1. Try your question again in a few moments
2. Rephrase your question
3. Contact your team lead or system administrator directly
4. Check our internal documentation wiki

I apologize for the inconvenience!";

/// The reply to one question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub text: String,
    /// Interaction log written for this question.
    pub log_id: LogId,
    /// Technologies whose knowledge was attached.
    pub technologies: Vec<String>,
    /// Whether `text` is the fallback message.
    pub fallback: bool,
}

/// Answers questions from verified users.
pub struct Assistant {
    knowledge: Arc<KnowledgeBase>,
    client: Arc<dyn InferenceClient>,
    store: Arc<dyn Persistence>,
    locks: Arc<UserLocks>,
    timeout: Duration,
    retry_backoff: Duration,
    max_snippets: usize,
}

impl Assistant {
    pub fn new(
        knowledge: Arc<KnowledgeBase>,
        client: Arc<dyn InferenceClient>,
        store: Arc<dyn Persistence>,
        locks: Arc<UserLocks>,
        timeout: Duration,
        max_snippets: usize,
    ) -> Self {
        Self {
            knowledge,
            client,
            store,
            locks,
            timeout,
            retry_backoff: Duration::from_secs(2),
            max_snippets,
        }
    }

    /// Sets the pause before the single retry.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Answers `query` for `user`. Never fails: inference errors turn into
    /// the fallback message and are recorded in the interaction log.
    pub async fn answer(&self, user: UserHandle, query: &str) -> Answer {
        let _guard = self.locks.lock(user).await;
        let started = Instant::now();

        let selected = self.knowledge.snapshot().select(query, self.max_snippets);
        let technologies: Vec<String> = selected.iter().map(|e| e.technology_name.clone()).collect();
        let context: Vec<ContextSnippet> = selected.iter().map(ContextSnippet::from).collect();

        let result = self.complete_with_retry(query, &context).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let (log, text, fallback) = match result {
            Ok(completion) => {
                info!(
                    user = %user,
                    tokens = completion.tokens_used,
                    elapsed_ms,
                    technologies = ?technologies,
                    "Question answered"
                );
                let log = InteractionLog::answered(
                    user,
                    query,
                    completion.text.clone(),
                    technologies.clone(),
                    completion.tokens_used,
                    elapsed_ms,
                );
                (log, completion.text, false)
            }
            Err(e) => {
                warn!(user = %user, error = %e, elapsed_ms, "Inference failed, sending fallback");
                let log = InteractionLog::failed(user, query, e.to_string(), technologies.clone(), elapsed_ms);
                (log, FALLBACK_RESPONSE.to_string(), true)
            }
        };

        if let Err(e) = self.store.append_log(&log).await {
            warn!(user = %user, error = %e, "Failed to write interaction log");
        }

        Answer {
            text,
            log_id: log.id,
            technologies,
            fallback,
        }
    }

    async fn complete_with_retry(&self, query: &str, context: &[ContextSnippet]) -> Result<Completion, InferenceError> {
        match self.complete_once(query, context).await {
            Ok(completion) => Ok(completion),
            Err(first) => {
                warn!(error = %first, "Inference attempt failed, retrying");
                tokio::time::sleep(self.retry_backoff).await;
                self.complete_once(query, context).await
            }
        }
    }

    async fn complete_once(&self, query: &str, context: &[ContextSnippet]) -> Result<Completion, InferenceError> {
        tokio::time::timeout(self.timeout, self.client.complete(SYSTEM_PROMPT, query, context))
            .await
            .map_err(|_| InferenceError::Timeout(self.timeout.as_secs()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;
    use support_models::TechnologyCategory;
    use support_persistence::MemoryStore;

    use crate::knowledge::SeedEntry;

    /// Fails the first `failures` calls, then answers.
    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
        last_context: std::sync::Mutex<Vec<ContextSnippet>>,
    }

    impl Flaky {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                calls: AtomicUsize::new(0),
                last_context: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl InferenceClient for Flaky {
        async fn complete(&self, _: &str, _: &str, context: &[ContextSnippet]) -> Result<Completion, InferenceError> {
            *self.last_context.lock().unwrap() = context.to_vec();
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(InferenceError::Unavailable("503".into()));
            }
            Ok(Completion {
                text: "Use kubectl rollout restart.".into(),
                tokens_used: 42,
            })
        }
    }

    async fn assistant(client: Arc<dyn InferenceClient>, store: Arc<MemoryStore>) -> Assistant {
        let kb = KnowledgeBase::load(store.clone()).await.unwrap();
        kb.upsert(
            SeedEntry {
                technology_name: "Kubernetes".into(),
                category: TechnologyCategory::Orchestration,
                content: "Cluster notes".into(),
                keywords: vec!["pod".into(), "kubectl".into()],
            },
            "test",
            Utc::now(),
        )
        .await
        .unwrap();

        Assistant::new(
            Arc::new(kb),
            client,
            store,
            Arc::new(UserLocks::new()),
            Duration::from_secs(5),
            3,
        )
        .with_retry_backoff(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_answer_attaches_context_and_logs() {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(Flaky::new(0));
        let assistant = assistant(client.clone(), store.clone()).await;

        let answer = assistant.answer(UserHandle(1), "how to restart a pod").await;

        assert!(!answer.fallback);
        assert_eq!(answer.technologies, vec!["Kubernetes"]);
        assert_eq!(client.last_context.lock().unwrap()[0].technology, "Kubernetes");

        let logs = store.logs().await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].id, answer.log_id);
        assert_eq!(logs[0].tokens_used, 42);
        assert!(!logs[0].is_error());
    }

    #[tokio::test]
    async fn test_single_retry_recovers() {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(Flaky::new(1));
        let assistant = assistant(client.clone(), store.clone()).await;

        let answer = assistant.answer(UserHandle(1), "hello").await;

        assert!(!answer.fallback);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_repeated_failure_falls_back() {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(Flaky::new(usize::MAX));
        let assistant = assistant(client.clone(), store.clone()).await;

        let answer = assistant.answer(UserHandle(1), "hello").await;

        assert!(answer.fallback);
        assert_eq!(answer.text, FALLBACK_RESPONSE);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);

        let logs = store.logs().await;
        assert!(logs[0].is_error());
        assert!(logs[0].response.is_none());
    }
}
