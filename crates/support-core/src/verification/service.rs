use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use support_models::{UserHandle, UserRecord, VerificationState};
use support_persistence::Persistence;
use tracing::{info, warn};

use super::{IssuedCode, VerificationMachine};
use crate::error::{CoreError, MailError, Result, VerificationError};
use crate::locks::UserLocks;
use crate::mail::{verification_email, Mailer, VERIFICATION_SUBJECT};

/// Where and until when a freshly issued code is valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeDelivery {
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

/// Runs the verification machine against stored users.
///
/// Every operation holds the user's lock for its whole load-modify-save
/// sequence, including code delivery.
pub struct VerificationService {
    machine: VerificationMachine,
    store: Arc<dyn Persistence>,
    mailer: Arc<dyn Mailer>,
    locks: Arc<UserLocks>,
    email_timeout: Duration,
    retry_backoff: Duration,
}

impl VerificationService {
    pub fn new(
        machine: VerificationMachine,
        store: Arc<dyn Persistence>,
        mailer: Arc<dyn Mailer>,
        locks: Arc<UserLocks>,
        email_timeout: Duration,
    ) -> Self {
        Self {
            machine,
            store,
            mailer,
            locks,
            email_timeout,
            retry_backoff: Duration::from_secs(1),
        }
    }

    /// Sets the pause before the single delivery retry.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn machine(&self) -> &VerificationMachine {
        &self.machine
    }

    /// Loads a user, creating the record on first contact.
    ///
    /// A changed Telegram username is saved.
    pub async fn register(&self, handle: UserHandle, username: Option<String>) -> Result<UserRecord> {
        let _guard = self.locks.lock(handle).await;
        self.load_or_create(handle, username).await
    }

    /// Loads a user without creating one.
    pub async fn get(&self, handle: UserHandle) -> Result<Option<UserRecord>> {
        Ok(self.store.get_user(handle).await?)
    }

    /// Asks the user for an email address.
    pub async fn begin(&self, handle: UserHandle, username: Option<String>) -> Result<UserRecord> {
        let _guard = self.locks.lock(handle).await;
        let mut user = self.load_or_create(handle, username).await?;
        self.machine.begin_verification(&mut user)?;
        self.store.put_user(&user).await?;
        Ok(user)
    }

    /// Accepts an email address and emails a fresh code to it.
    ///
    /// If delivery fails twice the code is withdrawn and
    /// [`CoreError::Mail`] is returned.
    pub async fn submit_email(&self, handle: UserHandle, text: &str) -> Result<CodeDelivery> {
        let _guard = self.locks.lock(handle).await;
        let mut user = self
            .store
            .get_user(handle)
            .await?
            .ok_or(VerificationError::NotAwaitingEmail)?;

        let email = self.machine.check_email(&user, text)?;
        if let Some(owner) = self.store.find_user_by_email(&email).await? {
            if owner.handle != handle {
                return Err(VerificationError::EmailTaken.into());
            }
        }

        let issued = self.machine.issue_code(&mut user, &email, Utc::now());
        self.store.put_user(&user).await?;

        if let Err(e) = self.deliver(&issued).await {
            warn!(user = %handle, error = %e, "Verification code could not be delivered, withdrawing");
            self.machine.withdraw_code(&mut user);
            self.store.put_user(&user).await?;
            return Err(e.into());
        }

        info!(user = %handle, "Verification code sent");
        Ok(CodeDelivery {
            email: issued.email,
            expires_at: issued.expires_at,
        })
    }

    /// Checks a typed code. The updated record is saved whatever the outcome.
    pub async fn submit_code(&self, handle: UserHandle, text: &str) -> Result<UserRecord> {
        let _guard = self.locks.lock(handle).await;
        let mut user = self
            .store
            .get_user(handle)
            .await?
            .ok_or(VerificationError::NotAwaitingCode)?;

        let outcome = self.machine.submit_code(&mut user, text, Utc::now());
        self.store.put_user(&user).await?;
        outcome?;

        info!(user = %handle, email = user.email.as_deref().unwrap_or_default(), "User verified");
        Ok(user)
    }

    /// Whether the user may ask questions now. Refreshes the session.
    pub async fn check_access(&self, handle: UserHandle, username: Option<String>) -> Result<bool> {
        let _guard = self.locks.lock(handle).await;
        let mut user = self.load_or_create(handle, username).await?;
        let was_verified = user.is_verified();
        let granted = self.machine.check_access(&mut user, Utc::now());
        if was_verified {
            self.store.put_user(&user).await?;
        }
        Ok(granted)
    }

    /// Abandons an in-progress verification.
    pub async fn cancel(&self, handle: UserHandle) -> Result<bool> {
        let _guard = self.locks.lock(handle).await;
        let Some(mut user) = self.store.get_user(handle).await? else {
            return Ok(false);
        };
        let cancelled = self.machine.cancel(&mut user);
        if cancelled {
            self.store.put_user(&user).await?;
        }
        Ok(cancelled)
    }

    /// Withdraws a user's access.
    pub async fn revoke(&self, handle: UserHandle) -> Result<UserRecord> {
        let _guard = self.locks.lock(handle).await;
        let mut user = self.require(handle).await?;
        self.machine.revoke(&mut user);
        self.store.put_user(&user).await?;
        info!(user = %handle, "Access revoked");
        Ok(user)
    }

    /// Lets a revoked user verify again. Returns `false` if the user is not revoked.
    pub async fn allow_reverification(&self, handle: UserHandle) -> Result<bool> {
        let _guard = self.locks.lock(handle).await;
        let mut user = self.require(handle).await?;
        let allowed = self.machine.allow_reverification(&mut user);
        if allowed {
            self.store.put_user(&user).await?;
            info!(user = %handle, "Re-verification allowed");
        }
        Ok(allowed)
    }

    /// Sends expired codes back to the email step. Returns how many users changed.
    pub async fn expire_stale_codes(&self, now: DateTime<Utc>) -> Result<usize> {
        let candidates: Vec<UserHandle> = self
            .store
            .list_users()
            .await?
            .into_iter()
            .filter(|u| u.state == VerificationState::AwaitingCode && !u.has_live_code(now))
            .map(|u| u.handle)
            .collect();

        let mut expired = 0;
        for handle in candidates {
            let _guard = self.locks.lock(handle).await;
            // Reload under the lock; the user may have moved on meanwhile.
            let Some(mut user) = self.store.get_user(handle).await? else {
                continue;
            };
            if self.machine.expire_stale_code(&mut user, now) {
                self.store.put_user(&user).await?;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn require(&self, handle: UserHandle) -> Result<UserRecord> {
        self.store
            .get_user(handle)
            .await?
            .ok_or_else(|| CoreError::NotFound {
                kind: "user",
                id: handle.to_string(),
            })
    }

    async fn load_or_create(&self, handle: UserHandle, username: Option<String>) -> Result<UserRecord> {
        match self.store.get_user(handle).await? {
            Some(mut user) => {
                if username.is_some() && user.username != username {
                    user.username = username;
                    self.store.put_user(&user).await?;
                }
                Ok(user)
            }
            None => {
                let user = UserRecord::new(handle, Utc::now()).with_username(username);
                self.store.put_user(&user).await?;
                info!(user = %handle, "New user");
                Ok(user)
            }
        }
    }

    async fn deliver(&self, issued: &IssuedCode) -> std::result::Result<(), MailError> {
        let body = verification_email(&issued.code, self.machine.policy().code_ttl.num_minutes());

        let mut last_error = None;
        for attempt in 0..2 {
            if attempt > 0 {
                tokio::time::sleep(self.retry_backoff).await;
            }
            let sent = tokio::time::timeout(
                self.email_timeout,
                self.mailer.send(&issued.email, VERIFICATION_SUBJECT, &body),
            )
            .await;

            match sent {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => {
                    warn!(attempt = attempt + 1, error = %e, "Email delivery failed");
                    last_error = Some(e);
                }
                Err(_) => {
                    warn!(attempt = attempt + 1, "Email delivery timed out");
                    last_error = Some(MailError::DeliveryFailed(format!(
                        "timed out after {}s",
                        self.email_timeout.as_secs()
                    )));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| MailError::DeliveryFailed("not attempted".to_string())))
    }
}
