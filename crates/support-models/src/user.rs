//! User records and verification progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::UserHandle;

/// Position of a user in the email verification flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VerificationState {
    /// First contact, nothing started.
    #[default]
    Unverified,
    /// Waiting for the user to send a company email address.
    AwaitingEmail,
    /// A code was emailed and the user must type it back.
    AwaitingCode,
    /// Email ownership proven.
    Verified,
    /// Access withdrawn by an administrator.
    Revoked,
}

impl VerificationState {
    /// Coarse status as recorded for audit and shown to admins.
    pub fn status(self) -> VerificationStatus {
        match self {
            Self::Unverified => VerificationStatus::Unverified,
            Self::AwaitingEmail | Self::AwaitingCode => VerificationStatus::Pending,
            Self::Verified => VerificationStatus::Verified,
            Self::Revoked => VerificationStatus::Revoked,
        }
    }
}

impl std::fmt::Display for VerificationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unverified => write!(f, "unverified"),
            Self::AwaitingEmail => write!(f, "awaiting_email"),
            Self::AwaitingCode => write!(f, "awaiting_code"),
            Self::Verified => write!(f, "verified"),
            Self::Revoked => write!(f, "revoked"),
        }
    }
}

/// Coarse verification status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Unverified,
    Pending,
    Verified,
    Revoked,
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unverified => write!(f, "unverified"),
            Self::Pending => write!(f, "pending"),
            Self::Verified => write!(f, "verified"),
            Self::Revoked => write!(f, "revoked"),
        }
    }
}

/// A user known to the bot.
///
/// Records are never deleted; revoked users are kept for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Telegram user id.
    pub handle: UserHandle,

    /// Telegram username, if the user has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Verified company email. Set only once a code has been accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Email address the current code was sent to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_email: Option<String>,

    /// Current position in the verification flow.
    #[serde(default)]
    pub state: VerificationState,

    /// The single live verification code, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// When the live code stops being accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_expires_at: Option<DateTime<Utc>>,

    /// Consecutive wrong codes for the live code.
    #[serde(default)]
    pub failed_attempts: u32,

    /// When the user was last verified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,

    /// Last time the user interacted with the bot as a verified user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_interaction: Option<DateTime<Utc>>,

    /// Set by an administrator to let a revoked user verify again.
    #[serde(default)]
    pub reverify_allowed: bool,

    /// Administrator flag stored with the record.
    #[serde(default)]
    pub is_admin: bool,

    /// First contact.
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    /// Creates a fresh record for a first contact.
    pub fn new(handle: UserHandle, now: DateTime<Utc>) -> Self {
        Self {
            handle,
            username: None,
            email: None,
            pending_email: None,
            state: VerificationState::Unverified,
            code: None,
            code_expires_at: None,
            failed_attempts: 0,
            verified_at: None,
            last_interaction: None,
            reverify_allowed: false,
            is_admin: false,
            created_at: now,
        }
    }

    /// Sets the username.
    pub fn with_username(mut self, username: Option<String>) -> Self {
        self.username = username;
        self
    }

    /// Coarse status derived from the state.
    pub fn status(&self) -> VerificationStatus {
        self.state.status()
    }

    /// Whether the user is currently in the verified state.
    ///
    /// This does not look at session expiry.
    pub fn is_verified(&self) -> bool {
        self.state == VerificationState::Verified
    }

    /// Whether the stored code would still be accepted at `now`.
    pub fn has_live_code(&self, now: DateTime<Utc>) -> bool {
        self.state == VerificationState::AwaitingCode
            && self.code.is_some()
            && self.code_expires_at.is_some_and(|expiry| now < expiry)
    }

    /// Drops the live code and its bookkeeping.
    pub fn clear_code(&mut self) {
        self.code = None;
        self.code_expires_at = None;
        self.failed_attempts = 0;
    }
}
