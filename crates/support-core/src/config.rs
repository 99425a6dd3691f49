//! Runtime configuration.
//!
//! Settings come from environment variables (the binary loads `.env` files
//! into the environment first with `dotenvy`). Paths for state live under
//! `~/.gitinsky-support/` unless overridden:
//!
//! ```text
//! ~/.gitinsky-support/
//! ├── config/       # .env.local with secrets
//! ├── data/         # users, knowledge entries, interaction logs
//! └── logs/
//! ```
//!
//! # Environment Variables
//!
//! Required:
//! - `COMPANY_EMAIL_DOMAIN`: allowed domain(s), comma-separated
//!
//! Optional (defaults in parentheses):
//! - `VERIFICATION_CODE_LENGTH` (6), `VERIFICATION_CODE_TTL` minutes (15)
//! - `MAX_VERIFICATION_ATTEMPTS` (5), `SESSION_TTL_DAYS` (30)
//! - `MAX_KNOWLEDGE_SNIPPETS` (3)
//! - `API_TIMEOUT_SECONDS` (20), `EMAIL_TIMEOUT_SECONDS` (30)
//! - `OPENROUTER_API_KEY`, `INFERENCE_API_URL`, `INFERENCE_MODEL`, `MAX_RESPONSE_TOKENS` (2000)
//! - `SMTP_HOST`, `SMTP_PORT` (587), `SMTP_USER`, `SMTP_PASSWORD`, `SMTP_FROM_EMAIL`, `SMTP_FROM_NAME`
//! - `ADMIN_TELEGRAM_IDS`: comma-separated user ids
//! - `ENABLE_FEEDBACK_COLLECTION` (true), `ENABLE_ADMIN_COMMANDS` (true)
//! - `SUPPORT_STATE_DIR`: override the base state directory

use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::verification::VerificationPolicy;

/// Environment variable for a custom state directory.
pub const STATE_DIR_ENV: &str = "SUPPORT_STATE_DIR";

/// Default state directory name under home.
const DEFAULT_STATE_DIR: &str = ".gitinsky-support";

/// Default OpenAI-compatible endpoint.
pub const DEFAULT_API_URL: &str = "https://openrouter.ai/api/v1";

/// Default model.
pub const DEFAULT_MODEL: &str = "deepseek/deepseek-chat";

/// Configuration problems found while reading the environment.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("{0} is not set")]
    Missing(&'static str),

    /// A variable is set but cannot be used.
    #[error("invalid {var}={value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Get the base state directory.
///
/// 1. `SUPPORT_STATE_DIR` (with `~` expanded) if set
/// 2. `~/.gitinsky-support` if a home directory is available
/// 3. `.gitinsky-support` in the current directory
pub fn state_dir() -> PathBuf {
    std::env::var(STATE_DIR_ENV)
        .map(|dir| PathBuf::from(shellexpand::tilde(&dir).into_owned()))
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(DEFAULT_STATE_DIR))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR))
        })
}

/// Directory holding persisted records.
pub fn data_dir() -> PathBuf {
    state_dir().join("data")
}

/// Directory holding user configuration.
pub fn config_dir() -> PathBuf {
    state_dir().join("config")
}

/// Directory for log files.
pub fn logs_dir() -> PathBuf {
    state_dir().join("logs")
}

/// The `.env.local` file with secrets.
pub fn env_file() -> PathBuf {
    config_dir().join(".env.local")
}

/// Create every state subdirectory.
pub fn ensure_all_dirs() -> std::io::Result<()> {
    std::fs::create_dir_all(data_dir())?;
    std::fs::create_dir_all(config_dir())?;
    std::fs::create_dir_all(logs_dir())?;
    Ok(())
}

/// Settings for the chat-completions client.
#[derive(Debug, Clone)]
pub struct InferenceSettings {
    /// API key. Without one every answer falls back.
    pub api_key: Option<String>,
    /// Base URL of an OpenAI-compatible API.
    pub api_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Bound applied to each inference call.
    pub timeout: Duration,
}

/// SMTP delivery settings.
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from_email: String,
    pub from_name: String,
}

/// Everything the core consumes.
#[derive(Debug, Clone)]
pub struct Settings {
    pub verification: VerificationPolicy,
    /// Maximum knowledge entries injected per question.
    pub max_snippets: usize,
    pub inference: InferenceSettings,
    /// `None` means codes are only logged.
    pub smtp: Option<SmtpSettings>,
    pub email_timeout: Duration,
    pub admin_ids: Vec<i64>,
    pub enable_feedback: bool,
    pub enable_admin_commands: bool,
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let allowed_domains = parse_list(
            "COMPANY_EMAIL_DOMAIN",
            &env.required("COMPANY_EMAIL_DOMAIN")?,
        )?
        .into_iter()
        .map(|d| d.trim_start_matches('@').to_lowercase())
        .collect::<Vec<_>>();

        let code_length: usize = env.parse_in("VERIFICATION_CODE_LENGTH", 6, 4..=10)?;
        let max_attempts: u32 = env.parse_in("MAX_VERIFICATION_ATTEMPTS", 5, 1..=100)?;

        let ttl_minutes: i64 = env.parse_in("VERIFICATION_CODE_TTL", 15, 1..=1440)?;
        let ttl_days: i64 = env.parse_in("SESSION_TTL_DAYS", 30, 1..=3650)?;

        let verification = VerificationPolicy {
            allowed_domains,
            code_length,
            code_ttl: chrono::Duration::try_minutes(ttl_minutes)
                .ok_or_else(|| out_of_range("VERIFICATION_CODE_TTL", ttl_minutes))?,
            max_attempts,
            session_ttl: chrono::Duration::try_days(ttl_days)
                .ok_or_else(|| out_of_range("SESSION_TTL_DAYS", ttl_days))?,
        };

        let inference = InferenceSettings {
            api_key: env.get("OPENROUTER_API_KEY"),
            api_url: env
                .get("INFERENCE_API_URL")
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            model: env
                .get("INFERENCE_MODEL")
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_tokens: env.parse_or("MAX_RESPONSE_TOKENS", 2000)?,
            temperature: 0.7,
            timeout: Duration::from_secs(env.parse_in("API_TIMEOUT_SECONDS", 20, 1..=600)?),
        };

        let smtp = match env.get("SMTP_HOST") {
            Some(host) => {
                let from_email = env
                    .get("SMTP_FROM_EMAIL")
                    .or_else(|| env.get("SMTP_USER"))
                    .ok_or(ConfigError::Missing("SMTP_FROM_EMAIL"))?;
                Some(SmtpSettings {
                    host,
                    port: env.parse_or("SMTP_PORT", 587)?,
                    user: env.get("SMTP_USER").unwrap_or_default(),
                    password: env.get("SMTP_PASSWORD").unwrap_or_default(),
                    from_email,
                    from_name: env
                        .get("SMTP_FROM_NAME")
                        .unwrap_or_else(|| "Gitinsky Support Bot".to_string()),
                })
            }
            None => None,
        };

        let admin_ids = match env.get("ADMIN_TELEGRAM_IDS") {
            Some(raw) => parse_list("ADMIN_TELEGRAM_IDS", &raw)?
                .into_iter()
                .map(|id| {
                    id.parse::<i64>().map_err(|_| ConfigError::Invalid {
                        var: "ADMIN_TELEGRAM_IDS",
                        value: raw.clone(),
                        reason: "must be comma-separated integers".to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        Ok(Self {
            verification,
            max_snippets: env.parse_in("MAX_KNOWLEDGE_SNIPPETS", 3, 1..=20)?,
            inference,
            smtp,
            email_timeout: Duration::from_secs(env.parse_in("EMAIL_TIMEOUT_SECONDS", 30, 1..=600)?),
            admin_ids,
            enable_feedback: env.parse_or("ENABLE_FEEDBACK_COLLECTION", true)?,
            enable_admin_commands: env.parse_or("ENABLE_ADMIN_COMMANDS", true)?,
        })
    }
}

/// Small wrapper that treats empty values as unset.
struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::Missing(key))
    }

    fn parse_or<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                var: key,
                value: raw.clone(),
                reason: e.to_string(),
            }),
            None => Ok(default),
        }
    }

    /// Like `parse_or`, but the value must fall inside `range`.
    fn parse_in<T>(&self, key: &'static str, default: T, range: RangeInclusive<T>) -> Result<T, ConfigError>
    where
        T: FromStr + PartialOrd + std::fmt::Display,
        T::Err: std::fmt::Display,
    {
        let value = self.parse_or(key, default)?;
        if !range.contains(&value) {
            return Err(ConfigError::Invalid {
                var: key,
                value: value.to_string(),
                reason: format!("must be between {} and {}", range.start(), range.end()),
            });
        }
        Ok(value)
    }
}

fn out_of_range(var: &'static str, value: i64) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: "duration out of range".to_string(),
    }
}

fn parse_list(var: &'static str, raw: &str) -> Result<Vec<String>, ConfigError> {
    let items: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if items.is_empty() {
        return Err(ConfigError::Invalid {
            var,
            value: raw.to_string(),
            reason: "no values".to_string(),
        });
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let s = settings(&[("COMPANY_EMAIL_DOMAIN", "acme.com")]).unwrap();
        assert_eq!(s.verification.allowed_domains, vec!["acme.com"]);
        assert_eq!(s.verification.code_length, 6);
        assert_eq!(s.verification.code_ttl, chrono::Duration::minutes(15));
        assert_eq!(s.verification.max_attempts, 5);
        assert_eq!(s.verification.session_ttl, chrono::Duration::days(30));
        assert_eq!(s.max_snippets, 3);
        assert_eq!(s.inference.timeout, Duration::from_secs(20));
        assert_eq!(s.inference.api_url, DEFAULT_API_URL);
        assert_eq!(s.email_timeout, Duration::from_secs(30));
        assert!(s.smtp.is_none());
        assert!(s.admin_ids.is_empty());
        assert!(s.enable_feedback);
    }

    #[test]
    fn test_missing_domain() {
        assert_eq!(settings(&[]).unwrap_err(), ConfigError::Missing("COMPANY_EMAIL_DOMAIN"));
    }

    #[test]
    fn test_multiple_domains_normalized() {
        let s = settings(&[("COMPANY_EMAIL_DOMAIN", "Acme.com, @acme.io")]).unwrap();
        assert_eq!(s.verification.allowed_domains, vec!["acme.com", "acme.io"]);
    }

    #[test]
    fn test_admin_ids() {
        let s = settings(&[
            ("COMPANY_EMAIL_DOMAIN", "acme.com"),
            ("ADMIN_TELEGRAM_IDS", "1, 22,333"),
        ])
        .unwrap();
        assert_eq!(s.admin_ids, vec![1, 22, 333]);

        let err = settings(&[
            ("COMPANY_EMAIL_DOMAIN", "acme.com"),
            ("ADMIN_TELEGRAM_IDS", "1,bob"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "ADMIN_TELEGRAM_IDS", .. }));
    }

    #[test]
    fn test_invalid_number_names_variable() {
        let err = settings(&[
            ("COMPANY_EMAIL_DOMAIN", "acme.com"),
            ("API_TIMEOUT_SECONDS", "soon"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("API_TIMEOUT_SECONDS"));
    }

    #[test]
    fn test_code_length_bounds() {
        let err = settings(&[
            ("COMPANY_EMAIL_DOMAIN", "acme.com"),
            ("VERIFICATION_CODE_LENGTH", "2"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "VERIFICATION_CODE_LENGTH", .. }));
    }

    fn rejected_var(var: &'static str, value: &str) -> ConfigError {
        settings(&[("COMPANY_EMAIL_DOMAIN", "acme.com"), (var, value)]).unwrap_err()
    }

    #[test]
    fn test_ttls_must_be_positive() {
        for (var, value) in [
            ("VERIFICATION_CODE_TTL", "-5"),
            ("VERIFICATION_CODE_TTL", "0"),
            ("SESSION_TTL_DAYS", "-1"),
            ("SESSION_TTL_DAYS", "0"),
        ] {
            let err = rejected_var(var, value);
            assert!(
                matches!(err, ConfigError::Invalid { var: v, .. } if v == var),
                "{var}={value} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_huge_ttls_rejected_without_panic() {
        for (var, value) in [
            ("VERIFICATION_CODE_TTL", "1000000000000"),
            ("VERIFICATION_CODE_TTL", "1441"),
            ("SESSION_TTL_DAYS", "9223372036854775807"),
            ("SESSION_TTL_DAYS", "3651"),
        ] {
            let err = rejected_var(var, value);
            assert!(matches!(err, ConfigError::Invalid { var: v, .. } if v == var));
        }
    }

    #[test]
    fn test_ttl_upper_bounds_accepted() {
        let s = settings(&[
            ("COMPANY_EMAIL_DOMAIN", "acme.com"),
            ("VERIFICATION_CODE_TTL", "1440"),
            ("SESSION_TTL_DAYS", "3650"),
        ])
        .unwrap();
        assert_eq!(s.verification.code_ttl, chrono::Duration::minutes(1440));
        assert_eq!(s.verification.session_ttl, chrono::Duration::days(3650));
    }

    #[test]
    fn test_zero_timeouts_and_snippets_rejected() {
        for var in [
            "API_TIMEOUT_SECONDS",
            "EMAIL_TIMEOUT_SECONDS",
            "MAX_KNOWLEDGE_SNIPPETS",
            "MAX_VERIFICATION_ATTEMPTS",
        ] {
            let err = rejected_var(var, "0");
            assert!(matches!(err, ConfigError::Invalid { var: v, .. } if v == var), "{var}");
            assert!(err.to_string().contains("must be between"));
        }
    }

    #[test]
    fn test_smtp_settings() {
        let s = settings(&[
            ("COMPANY_EMAIL_DOMAIN", "acme.com"),
            ("SMTP_HOST", "smtp.acme.com"),
            ("SMTP_USER", "bot@acme.com"),
            ("SMTP_PASSWORD", "secret"),
        ])
        .unwrap();
        let smtp = s.smtp.unwrap();
        assert_eq!(smtp.port, 587);
        assert_eq!(smtp.from_email, "bot@acme.com");
        assert_eq!(smtp.from_name, "Gitinsky Support Bot");
    }
}
