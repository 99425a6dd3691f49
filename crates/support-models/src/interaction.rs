//! Interaction log records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{LogId, UserHandle};

/// User rating of an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feedback {
    Helpful,
    NotHelpful,
}

impl Feedback {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Helpful => "helpful",
            Self::NotHelpful => "not_helpful",
        }
    }
}

impl std::fmt::Display for Feedback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Feedback {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "helpful" => Ok(Self::Helpful),
            "not_helpful" => Ok(Self::NotHelpful),
            other => Err(format!("unknown feedback: {}", other)),
        }
    }
}

/// One answered (or failed) question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionLog {
    /// Unique identifier.
    pub id: LogId,

    /// Who asked.
    pub user: UserHandle,

    /// The question as sent.
    pub query: String,

    /// The model's answer. `None` when the inference call failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,

    /// Error marker recorded instead of a response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Technology names of the knowledge entries injected as context.
    #[serde(default)]
    pub technologies: Vec<String>,

    /// Tokens reported by the inference API.
    #[serde(default)]
    pub tokens_used: u32,

    /// Wall-clock time spent producing the answer.
    pub response_time_ms: u64,

    /// Rating attached after the fact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,

    pub timestamp: DateTime<Utc>,
}

impl InteractionLog {
    /// Log for a successful answer.
    pub fn answered(
        user: UserHandle,
        query: impl Into<String>,
        response: impl Into<String>,
        technologies: Vec<String>,
        tokens_used: u32,
        response_time_ms: u64,
    ) -> Self {
        Self {
            id: LogId::new(),
            user,
            query: query.into(),
            response: Some(response.into()),
            error: None,
            technologies,
            tokens_used,
            response_time_ms,
            feedback: None,
            timestamp: Utc::now(),
        }
    }

    /// Log for a query the model could not answer.
    pub fn failed(
        user: UserHandle,
        query: impl Into<String>,
        error: impl Into<String>,
        technologies: Vec<String>,
        response_time_ms: u64,
    ) -> Self {
        Self {
            id: LogId::new(),
            user,
            query: query.into(),
            response: None,
            error: Some(error.into()),
            technologies,
            tokens_used: 0,
            response_time_ms,
            feedback: None,
            timestamp: Utc::now(),
        }
    }

    /// Whether the entry records an inference failure.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_log_has_marker_and_no_response() {
        let log = InteractionLog::failed(UserHandle(1), "q", "inference timed out", vec![], 20_000);
        assert!(log.is_error());
        assert!(log.response.is_none());
        assert_eq!(log.tokens_used, 0);
    }

    #[test]
    fn test_feedback_parse() {
        assert_eq!("helpful".parse::<Feedback>().unwrap(), Feedback::Helpful);
        assert_eq!("not_helpful".parse::<Feedback>().unwrap(), Feedback::NotHelpful);
        assert!("meh".parse::<Feedback>().is_err());
    }
}
