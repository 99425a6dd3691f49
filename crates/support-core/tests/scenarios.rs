//! End-to-end flows through the verification service and the assistant,
//! using the in-memory store and fake collaborators.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use support_core::{
    Assistant, CodeSweeper, Completion, ContextSnippet, CoreError, EmailBody, InferenceClient,
    InferenceError, KnowledgeBase, MailError, Mailer, UserLocks, VerificationError,
    VerificationMachine, VerificationPolicy, VerificationService, FALLBACK_RESPONSE,
};
use support_models::{UserHandle, VerificationState};
use support_persistence::{MemoryStore, Persistence};

/// Keeps every sent message; optionally fails every send.
#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<(String, EmailBody)>>,
    fail: bool,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, to: &str, _subject: &str, body: &EmailBody) -> Result<(), MailError> {
        if self.fail {
            return Err(MailError::DeliveryFailed("connection refused".into()));
        }
        self.sent.lock().unwrap().push((to.to_string(), body.clone()));
        Ok(())
    }
}

/// Never answers within any reasonable timeout.
struct Hanging;

#[async_trait]
impl InferenceClient for Hanging {
    async fn complete(&self, _: &str, _: &str, _: &[ContextSnippet]) -> Result<Completion, InferenceError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(InferenceError::Unavailable("unreachable".into()))
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    mailer: Arc<RecordingMailer>,
    service: Arc<VerificationService>,
}

fn harness_with(mailer: RecordingMailer) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let mailer = Arc::new(mailer);
    let machine = VerificationMachine::new(VerificationPolicy {
        allowed_domains: vec!["acme.com".to_string()],
        ..VerificationPolicy::default()
    });
    let service = VerificationService::new(
        machine,
        store.clone(),
        mailer.clone(),
        Arc::new(UserLocks::new()),
        Duration::from_secs(5),
    )
    .with_retry_backoff(Duration::from_millis(1));

    Harness {
        store,
        mailer,
        service: Arc::new(service),
    }
}

fn harness() -> Harness {
    harness_with(RecordingMailer::default())
}

const BOB: UserHandle = UserHandle(1001);

impl Harness {
    /// Starts verification and submits bob@acme.com.
    async fn code_sent(&self) {
        self.service.begin(BOB, Some("bob".into())).await.unwrap();
        self.service.submit_email(BOB, "bob@acme.com").await.unwrap();
    }

    /// Replaces the live code so the test knows it.
    async fn force_code(&self, code: &str) {
        let mut user = self.store.get_user(BOB).await.unwrap().unwrap();
        user.code = Some(code.to_string());
        self.store.put_user(&user).await.unwrap();
    }

    async fn state(&self, handle: UserHandle) -> VerificationState {
        self.store.get_user(handle).await.unwrap().unwrap().state
    }
}

#[tokio::test]
async fn wrong_domain_is_rejected_and_state_kept() {
    let h = harness();
    h.service.begin(BOB, None).await.unwrap();

    let err = h.service.submit_email(BOB, "bob@other.com").await.unwrap_err();

    assert!(matches!(
        err,
        CoreError::Verification(VerificationError::InvalidDomain { .. })
    ));
    assert_eq!(h.state(BOB).await, VerificationState::AwaitingEmail);
    assert!(h.mailer.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn code_within_ttl_verifies() {
    let h = harness();
    h.code_sent().await;

    let sent = h.mailer.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "bob@acme.com");
    assert!(sent[0].1.html.is_some());

    h.force_code("482913").await;
    let user = h.service.submit_code(BOB, "482913").await.unwrap();

    assert_eq!(user.state, VerificationState::Verified);
    assert_eq!(user.email.as_deref(), Some("bob@acme.com"));
    assert!(h.service.check_access(BOB, None).await.unwrap());
}

#[tokio::test]
async fn emailed_code_is_the_stored_code() {
    let h = harness();
    h.code_sent().await;

    let body = h.mailer.sent.lock().unwrap()[0].1.text.clone();
    let stored = h.store.get_user(BOB).await.unwrap().unwrap().code.unwrap();
    assert!(body.contains(&format!("Verification Code: {stored}")));
}

#[tokio::test]
async fn lockout_after_five_wrong_codes() {
    let h = harness();
    h.code_sent().await;
    h.force_code("482913").await;

    for remaining in (1..=4).rev() {
        let err = h.service.submit_code(BOB, "000000").await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::Verification(VerificationError::CodeMismatch { remaining: r }) if r == remaining
        ));
    }
    let err = h.service.submit_code(BOB, "000000").await.unwrap_err();
    assert!(matches!(err, CoreError::Verification(VerificationError::TooManyAttempts)));
    assert_eq!(h.state(BOB).await, VerificationState::AwaitingEmail);

    let err = h.service.submit_code(BOB, "482913").await.unwrap_err();
    assert!(matches!(err, CoreError::Verification(VerificationError::NotAwaitingCode)));
}

#[tokio::test]
async fn expired_code_is_rejected_even_when_correct() {
    let h = harness();
    h.code_sent().await;

    let mut user = h.store.get_user(BOB).await.unwrap().unwrap();
    user.code = Some("482913".into());
    user.code_expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
    h.store.put_user(&user).await.unwrap();

    let err = h.service.submit_code(BOB, "482913").await.unwrap_err();
    assert!(matches!(err, CoreError::Verification(VerificationError::CodeExpired)));
    assert_eq!(h.state(BOB).await, VerificationState::AwaitingEmail);
}

#[tokio::test]
async fn failed_delivery_withdraws_code() {
    let h = harness_with(RecordingMailer {
        fail: true,
        ..Default::default()
    });
    h.service.begin(BOB, None).await.unwrap();

    let err = h.service.submit_email(BOB, "bob@acme.com").await.unwrap_err();

    assert!(matches!(err, CoreError::Mail(_)));
    let user = h.store.get_user(BOB).await.unwrap().unwrap();
    assert_eq!(user.state, VerificationState::AwaitingEmail);
    assert!(user.code.is_none());
}

#[tokio::test]
async fn verified_email_cannot_be_claimed_twice() {
    let h = harness();
    h.code_sent().await;
    h.force_code("482913").await;
    h.service.submit_code(BOB, "482913").await.unwrap();

    let eve = UserHandle(2002);
    h.service.begin(eve, None).await.unwrap();
    let err = h.service.submit_email(eve, "BOB@acme.com").await.unwrap_err();
    assert!(matches!(err, CoreError::Verification(VerificationError::EmailTaken)));
}

#[tokio::test]
async fn revoked_user_needs_allowance() {
    let h = harness();
    h.code_sent().await;
    h.force_code("482913").await;
    h.service.submit_code(BOB, "482913").await.unwrap();

    h.service.revoke(BOB).await.unwrap();
    assert!(!h.service.check_access(BOB, None).await.unwrap());
    assert!(matches!(
        h.service.begin(BOB, None).await.unwrap_err(),
        CoreError::Verification(VerificationError::Revoked)
    ));

    assert!(h.service.allow_reverification(BOB).await.unwrap());
    let user = h.service.begin(BOB, None).await.unwrap();
    assert_eq!(user.state, VerificationState::AwaitingEmail);

    // Bob may reuse his own address.
    h.service.submit_email(BOB, "bob@acme.com").await.unwrap();
}

#[tokio::test]
async fn sweep_expires_stale_codes() {
    let h = harness();
    h.code_sent().await;

    let mut user = h.store.get_user(BOB).await.unwrap().unwrap();
    user.code_expires_at = Some(Utc::now() - chrono::Duration::minutes(1));
    h.store.put_user(&user).await.unwrap();

    let (_tx, rx) = tokio::sync::watch::channel(false);
    let sweeper = CodeSweeper::new(h.service.clone(), rx);
    assert_eq!(sweeper.sweep_once().await, 1);
    assert_eq!(h.state(BOB).await, VerificationState::AwaitingEmail);
    assert_eq!(sweeper.sweep_once().await, 0);
}

#[tokio::test]
async fn inference_timeout_falls_back_and_logs_error() {
    let store = Arc::new(MemoryStore::new());
    let kb = Arc::new(KnowledgeBase::load(store.clone()).await.unwrap());
    let assistant = Assistant::new(
        kb,
        Arc::new(Hanging),
        store.clone(),
        Arc::new(UserLocks::new()),
        Duration::from_millis(50),
        3,
    )
    .with_retry_backoff(Duration::from_millis(1));

    let answer = assistant.answer(BOB, "why is my deployment pending").await;

    assert!(answer.fallback);
    assert_eq!(answer.text, FALLBACK_RESPONSE);
    let logs = store.logs().await;
    assert_eq!(logs.len(), 1);
    assert!(logs[0].response.is_none());
    assert!(logs[0].error.as_deref().unwrap().contains("timed out"));
}
