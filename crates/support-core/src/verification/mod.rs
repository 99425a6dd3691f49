//! Email verification state machine.
//!
//! [`VerificationMachine`] holds the transition rules. Every method works on
//! a `&mut UserRecord` and takes the current time explicitly, so the rules
//! are pure and can be tested without a clock, a store or a mailer.
//! [`VerificationService`] wraps the machine with persistence, per-user
//! locking and code delivery.
//!
//! ```text
//! Unverified ──begin──▶ AwaitingEmail ──email──▶ AwaitingCode ──code──▶ Verified
//!                            ▲                        │
//!                            └── expired / lockout ───┘
//! any state ──revoke──▶ Revoked ──(allowance) begin──▶ AwaitingEmail
//! ```
//!
//! Rejections that move the user (expiry, lockout, stale session) are
//! applied to the record before the error is returned; callers persist the
//! record either way.

mod code;
mod email;
mod service;


use chrono::{DateTime, Duration, Utc};
use support_models::{UserRecord, VerificationState};
use tracing::debug;

use crate::error::VerificationError;

pub use code::{codes_match, generate_code};
pub use email::normalize_company_email;
pub use service::{CodeDelivery, VerificationService};

/// Tunables for the verification flow.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationPolicy {
    /// Lowercase domains an address may belong to.
    pub allowed_domains: Vec<String>,
    pub code_length: usize,
    pub code_ttl: Duration,
    /// Wrong codes tolerated before the code is withdrawn.
    pub max_attempts: u32,
    /// Inactivity after which a verified user must verify again.
    pub session_ttl: Duration,
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        Self {
            allowed_domains: Vec::new(),
            code_length: 6,
            code_ttl: Duration::minutes(15),
            max_attempts: 5,
            session_ttl: Duration::days(30),
        }
    }
}

/// A code that was just issued and must be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCode {
    pub email: String,
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

/// Transition rules for the verification flow.
#[derive(Debug, Clone)]
pub struct VerificationMachine {
    policy: VerificationPolicy,
}

impl VerificationMachine {
    pub fn new(policy: VerificationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &VerificationPolicy {
        &self.policy
    }

    /// Starts (or restarts) the flow by asking for an email address.
    pub fn begin_verification(&self, user: &mut UserRecord) -> Result<(), VerificationError> {
        match user.state {
            VerificationState::AwaitingEmail => Ok(()),
            VerificationState::Unverified | VerificationState::AwaitingCode => {
                user.clear_code();
                user.pending_email = None;
                user.state = VerificationState::AwaitingEmail;
                Ok(())
            }
            VerificationState::Verified => Err(VerificationError::AlreadyVerified),
            VerificationState::Revoked if user.reverify_allowed => {
                user.reverify_allowed = false;
                user.clear_code();
                user.pending_email = None;
                user.state = VerificationState::AwaitingEmail;
                debug!(user = %user.handle, "Re-verification allowance consumed");
                Ok(())
            }
            VerificationState::Revoked => Err(VerificationError::Revoked),
        }
    }

    /// Checks that an address may be submitted now and returns it normalised.
    ///
    /// Does not change the record. A rejected domain leaves the state as it was.
    pub fn check_email(&self, user: &UserRecord, raw: &str) -> Result<String, VerificationError> {
        match user.state {
            VerificationState::AwaitingEmail | VerificationState::AwaitingCode => {
                normalize_company_email(raw, &self.policy.allowed_domains)
            }
            _ => Err(VerificationError::NotAwaitingEmail),
        }
    }

    /// Issues a fresh code for an address accepted by [`check_email`](Self::check_email).
    ///
    /// Any previous code stops being valid and the attempt counter restarts.
    pub fn issue_code(&self, user: &mut UserRecord, email: &str, now: DateTime<Utc>) -> IssuedCode {
        let issued = IssuedCode {
            email: email.to_string(),
            code: generate_code(self.policy.code_length),
            expires_at: now
                .checked_add_signed(self.policy.code_ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        };

        user.code = Some(issued.code.clone());
        user.code_expires_at = Some(issued.expires_at);
        user.failed_attempts = 0;
        user.pending_email = Some(issued.email.clone());
        user.state = VerificationState::AwaitingCode;
        issued
    }

    /// [`check_email`](Self::check_email) followed by [`issue_code`](Self::issue_code).
    ///
    /// `taken` reports whether another user already verified the address.
    pub fn submit_email<F>(
        &self,
        user: &mut UserRecord,
        raw: &str,
        now: DateTime<Utc>,
        taken: F,
    ) -> Result<IssuedCode, VerificationError>
    where
        F: FnOnce(&str) -> bool,
    {
        let email = self.check_email(user, raw)?;
        if taken(&email) {
            return Err(VerificationError::EmailTaken);
        }
        Ok(self.issue_code(user, &email, now))
    }

    /// Withdraws an issued code after delivery failed.
    pub fn withdraw_code(&self, user: &mut UserRecord) {
        if user.state == VerificationState::AwaitingCode {
            self.back_to_email(user);
        }
    }

    /// Checks a typed code against the live one.
    pub fn submit_code(
        &self,
        user: &mut UserRecord,
        submitted: &str,
        now: DateTime<Utc>,
    ) -> Result<(), VerificationError> {
        if user.state != VerificationState::AwaitingCode {
            return Err(VerificationError::NotAwaitingCode);
        }

        let (Some(expected), Some(expires_at)) = (user.code.as_deref(), user.code_expires_at) else {
            // A pending state without a code cannot make progress.
            self.back_to_email(user);
            return Err(VerificationError::CodeExpired);
        };

        if now >= expires_at {
            self.back_to_email(user);
            return Err(VerificationError::CodeExpired);
        }

        if codes_match(submitted, expected) {
            user.email = user.pending_email.take();
            user.clear_code();
            user.state = VerificationState::Verified;
            user.verified_at = Some(now);
            user.last_interaction = Some(now);
            return Ok(());
        }

        user.failed_attempts += 1;
        if user.failed_attempts >= self.policy.max_attempts {
            self.back_to_email(user);
            return Err(VerificationError::TooManyAttempts);
        }

        Err(VerificationError::CodeMismatch {
            remaining: self.policy.max_attempts - user.failed_attempts,
        })
    }

    /// Whether a verified user may ask questions at `now`.
    ///
    /// A granted check refreshes `last_interaction`. A session idle for longer
    /// than the session TTL drops back to `AwaitingEmail`.
    pub fn check_access(&self, user: &mut UserRecord, now: DateTime<Utc>) -> bool {
        if user.state != VerificationState::Verified {
            return false;
        }

        let last = user.last_interaction.or(user.verified_at).unwrap_or(user.created_at);
        if now - last > self.policy.session_ttl {
            debug!(user = %user.handle, "Verified session went stale");
            self.back_to_email(user);
            return false;
        }

        user.last_interaction = Some(now);
        true
    }

    /// Abandons an in-progress verification.
    ///
    /// Returns `false` when there was nothing to cancel.
    pub fn cancel(&self, user: &mut UserRecord) -> bool {
        match user.state {
            VerificationState::AwaitingEmail | VerificationState::AwaitingCode => {
                user.clear_code();
                user.pending_email = None;
                user.state = VerificationState::Unverified;
                true
            }
            _ => false,
        }
    }

    /// Withdraws access. The record is kept.
    pub fn revoke(&self, user: &mut UserRecord) {
        user.clear_code();
        user.pending_email = None;
        user.reverify_allowed = false;
        user.state = VerificationState::Revoked;
    }

    /// Lets a revoked user start verification once more.
    ///
    /// Returns `false` if the user is not revoked.
    pub fn allow_reverification(&self, user: &mut UserRecord) -> bool {
        if user.state != VerificationState::Revoked {
            return false;
        }
        user.reverify_allowed = true;
        true
    }

    /// Drops an expired code. Returns `true` if the record changed.
    pub fn expire_stale_code(&self, user: &mut UserRecord, now: DateTime<Utc>) -> bool {
        if user.state == VerificationState::AwaitingCode && !user.has_live_code(now) {
            self.back_to_email(user);
            return true;
        }
        false
    }

    fn back_to_email(&self, user: &mut UserRecord) {
        user.clear_code();
        user.pending_email = None;
        user.state = VerificationState::AwaitingEmail;
    }
}
