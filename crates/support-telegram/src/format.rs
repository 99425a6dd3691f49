//! Message texts and small formatting helpers.
//!
//! Everything here is pure so it can be tested without a bot.

use chrono::{DateTime, Utc};
use support_core::VerificationError;
use support_models::{Feedback, KnowledgeEntry, LogId, TechnologyCategory, UserRecord, VerificationState};
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

/// Longest chunk sent in one Telegram message, in UTF-16 units.
pub const MAX_MESSAGE_CHARS: usize = 4000;

/// Prefix of feedback callback data.
const FEEDBACK_PREFIX: &str = "feedback";

/// Escape HTML special characters for Telegram HTML mode.
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Length as Telegram counts it, in UTF-16 code units.
fn utf16_len(text: &str) -> usize {
    text.chars().map(char::len_utf16).sum()
}

/// Splits `text` into non-empty chunks of at most `max` UTF-16 units,
/// preferring to break after a newline, then after a space.
///
/// Whitespace-only input yields no chunks.
pub fn split_message(text: &str, max: usize) -> Vec<String> {
    let max = max.max(2);
    let mut chunks = Vec::new();
    let mut rest = text;

    while utf16_len(rest) > max {
        // Byte offset just past the last character that fits.
        let mut units = 0;
        let mut limit = 0;
        for (i, c) in rest.char_indices() {
            units += c.len_utf16();
            if units > max {
                break;
            }
            limit = i + c.len_utf8();
        }
        let window = &rest[..limit];

        let cut = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&i| i > 0)
            .map(|i| i + 1)
            .unwrap_or(limit);

        let chunk = rest[..cut].trim_end();
        if !chunk.trim().is_empty() {
            chunks.push(chunk.to_string());
        }
        rest = &rest[cut..];
    }

    if !rest.trim().is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

/// Callback data for a feedback button.
pub fn feedback_data(feedback: Feedback, log: &LogId) -> String {
    format!("{}:{}:{}", FEEDBACK_PREFIX, feedback.as_str(), log)
}

/// Parses `feedback:<helpful|not_helpful>:<log id>`.
pub fn parse_feedback_data(data: &str) -> Option<(Feedback, LogId)> {
    let mut parts = data.splitn(3, ':');
    if parts.next()? != FEEDBACK_PREFIX {
        return None;
    }
    let feedback = parts.next()?.parse().ok()?;
    let id = parts.next().filter(|s| !s.is_empty())?;
    Some((feedback, LogId::from_string(id)))
}

/// Inline 👍/👎 buttons for one answer.
pub fn feedback_keyboard(log: &LogId) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback("👍 Helpful", feedback_data(Feedback::Helpful, log)),
        InlineKeyboardButton::callback("👎 Not helpful", feedback_data(Feedback::NotHelpful, log)),
    ]])
}

fn domains_text(domains: &[String]) -> String {
    domains
        .iter()
        .map(|d| format!("@{}", d))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Guidance shown when a verification step is rejected.
pub fn verification_error_text(err: &VerificationError, domains: &[String]) -> String {
    match err {
        VerificationError::InvalidFormat => format!(
            "❌ That doesn't look like an email address.\n\nPlease send your company email ({}).",
            domains_text(domains)
        ),
        VerificationError::InvalidDomain { domain } => format!(
            "❌ Email must be from the {} domain, <b>{}</b> is not accepted.\n\nPlease send your company email.",
            domains_text(domains),
            html_escape(domain)
        ),
        VerificationError::EmailTaken => {
            "❌ This email is already registered to another user.".to_string()
        }
        VerificationError::CodeExpired => {
            "⌛ Your verification code has expired.\n\nSend your email address again to get a new code.".to_string()
        }
        VerificationError::CodeMismatch { remaining } => format!(
            "❌ Invalid verification code. {} attempt{} remaining.",
            remaining,
            if *remaining == 1 { "" } else { "s" }
        ),
        VerificationError::TooManyAttempts => {
            "🚫 Too many failed attempts. The code has been cancelled.\n\nSend your email address again to get a new code.".to_string()
        }
        VerificationError::NotAwaitingEmail => {
            "Use /verify to start verification.".to_string()
        }
        VerificationError::NotAwaitingCode => {
            "No verification code is pending. Use /verify to get one.".to_string()
        }
        VerificationError::AlreadyVerified => "✅ You are already verified!".to_string(),
        VerificationError::Revoked => {
            "🚫 Your access has been revoked. Please contact an administrator.".to_string()
        }
    }
}

/// Shown when a code could not be emailed.
pub const DELIVERY_UNAVAILABLE: &str =
    "⚠️ Verification is temporarily unavailable: we could not send the email.\n\nPlease try again later.";

/// Shown for internal failures.
pub const INTERNAL_ERROR: &str = "⚠️ Something went wrong on our side. Please try again later.";

/// Reply after a code has been emailed.
pub fn code_sent_text(email: &str, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = (expires_at - now).num_minutes().max(1);
    format!(
        "📧 A verification code was sent to <b>{}</b>.\n\n\
         Enter the code here. It expires in {} minutes.\n\
         Use /cancel to stop.",
        html_escape(email),
        minutes
    )
}

/// Asks for the company email.
pub fn ask_email_text(domains: &[String]) -> String {
    format!(
        "📧 Please send your company email address ({}).\n\nUse /cancel to stop.",
        domains_text(domains)
    )
}

/// Hint for users who have not verified yet.
pub const VERIFY_HINT: &str =
    "🔒 You need to verify your company email before asking questions.\n\nUse /verify to start.";

/// /start text.
pub fn welcome_text(first_name: &str, verified: bool) -> String {
    let areas = TechnologyCategory::ALL
        .iter()
        .map(|c| format!("• {}", category_title(*c)))
        .collect::<Vec<_>>()
        .join("\n");

    let next = if verified {
        "✅ You are verified. Just send me your technical question!"
    } else {
        "🔒 To get started, verify your company email with /verify."
    };

    format!(
        "👋 Hello, {}!\n\n\
         I'm the Gitinsky technical support assistant. I answer questions \
         about the technology stacks used in company projects.\n\n\
         <b>Supported areas:</b>\n{}\n\n{}",
        html_escape(first_name),
        areas,
        next
    )
}

/// /help text. Admin commands are listed only for admins.
pub fn help_text(is_admin: bool, feedback_enabled: bool) -> String {
    let mut text = String::from(
        "<b>How to use this bot</b>\n\n\
         Send a technical question as a normal message and I'll answer it, \
         using the company knowledge base where it helps.\n\n\
         <b>Commands:</b>\n\
         /start - Welcome message\n\
         /help - This help\n\
         /status - Your verification status\n\
         /verify - Verify your company email\n\
         /cancel - Cancel verification\n",
    );
    if feedback_enabled {
        text.push_str("/feedback - Rate the last answer\n");
    }
    if is_admin {
        text.push_str(
            "\n<b>Admin commands:</b>\n\
             /admin_list_users - List users\n\
             /revoke &lt;id&gt; - Revoke a user's access\n\
             /allow_reverify &lt;id&gt; - Let a revoked user verify again\n\
             /kb_list - List knowledge entries\n\
             /kb_reload - Reload the knowledge base\n",
        );
    }
    text
}

/// /status text.
pub fn status_text(user: Option<&UserRecord>, now: DateTime<Utc>) -> String {
    let Some(user) = user else {
        return "❌ Not verified.\n\nUse /verify to start.".to_string();
    };

    match user.state {
        VerificationState::Unverified => "❌ Not verified.\n\nUse /verify to start.".to_string(),
        VerificationState::AwaitingEmail => {
            "⏳ Verification in progress: waiting for your company email address.".to_string()
        }
        VerificationState::AwaitingCode => {
            let left = user
                .code_expires_at
                .map(|e| (e - now).num_minutes())
                .filter(|m| *m >= 0);
            match left {
                Some(m) => format!(
                    "⏳ Verification pending: enter the code sent to <b>{}</b>. It expires in {} minutes.",
                    html_escape(user.pending_email.as_deref().unwrap_or("your email")),
                    m.max(1)
                ),
                None => "⌛ Your verification code has expired. Use /verify to get a new one.".to_string(),
            }
        }
        VerificationState::Verified => format!(
            "✅ Verified\n\nEmail: <b>{}</b>\nVerified on: {}",
            html_escape(user.email.as_deref().unwrap_or("-")),
            user.verified_at
                .map(|t| t.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "-".to_string())
        ),
        VerificationState::Revoked => {
            "🚫 Your access has been revoked. Please contact an administrator.".to_string()
        }
    }
}

/// One line per user for /admin_list_users.
pub fn user_list_text(users: &[UserRecord]) -> String {
    if users.is_empty() {
        return "No users yet.".to_string();
    }

    let mut text = format!("<b>Users ({}):</b>\n\n", users.len());
    for user in users {
        text.push_str(&format!(
            "<code>{}</code> {} {} - {}\n",
            user.handle,
            user.username
                .as_deref()
                .map(|u| format!("@{}", html_escape(u)))
                .unwrap_or_default(),
            html_escape(user.email.as_deref().unwrap_or("-")),
            user.status()
        ));
    }
    text
}

/// One line per entry for /kb_list.
pub fn knowledge_list_text(entries: &[KnowledgeEntry]) -> String {
    if entries.is_empty() {
        return "The knowledge base is empty.".to_string();
    }

    let mut text = format!("<b>Knowledge base ({} entries):</b>\n\n", entries.len());
    for entry in entries {
        text.push_str(&format!(
            "• <b>{}</b> ({}) v{} - {} keywords\n",
            html_escape(&entry.technology_name),
            entry.category,
            entry.version,
            entry.keywords.len()
        ));
    }
    text
}

fn category_title(category: TechnologyCategory) -> &'static str {
    match category {
        TechnologyCategory::Orchestration => "Orchestration: Ansible, Kubernetes, OpenShift, Puppet",
        TechnologyCategory::Containerization => "Containerization: Docker, Docker Swarm, Docker Compose",
        TechnologyCategory::InfrastructureAsCode => "Infrastructure as Code: Terraform",
        TechnologyCategory::CiCd => "CI/CD: Argo CD, GitLab CI",
        TechnologyCategory::MonitoringLogging => "Monitoring & Logging: ELK, Zabbix, Grafana, Prometheus",
        TechnologyCategory::Database => "Databases: MySQL, PostgreSQL",
        TechnologyCategory::Networking => "Networking: Cisco, Mikrotik, Keenetic",
        TechnologyCategory::OperatingSystem => "Operating Systems: Linux, Windows",
        TechnologyCategory::Programming => "Programming: Python",
        TechnologyCategory::SystemAdministration => "System Administration",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use support_models::UserHandle;

    #[test]
    fn test_short_message_is_one_chunk() {
        assert_eq!(split_message("hello", 4000), vec!["hello"]);
        assert!(split_message("", 4000).is_empty());
        assert!(split_message(" \n ", 4000).is_empty());
    }

    #[test]
    fn test_split_prefers_newlines() {
        let text = format!("{}\n{}", "a".repeat(30), "b".repeat(30));
        let chunks = split_message(&text, 40);
        assert_eq!(chunks, vec!["a".repeat(30), "b".repeat(30)]);
    }

    #[test]
    fn test_split_hard_cuts_long_words() {
        let text = "x".repeat(95);
        let chunks = split_message(&text, 40);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 40));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_split_counts_characters_not_bytes() {
        let text = "ж".repeat(50);
        let chunks = split_message(&text, 20);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 20));
    }

    #[test]
    fn test_split_skips_blank_windows() {
        let text = format!("a{}b", " ".repeat(50));
        let chunks = split_message(&text, 20);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "a");
        assert!(chunks.iter().all(|c| !c.trim().is_empty()));
        assert!(chunks[1].ends_with('b'));
    }

    #[test]
    fn test_split_counts_utf16_units() {
        // Each emoji is two UTF-16 units.
        let text = "😀".repeat(30);
        let chunks = split_message(&text, 20);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| utf16_len(c) <= 20));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_feedback_data_roundtrip() {
        let id = LogId::from_string("log-123");
        let data = feedback_data(Feedback::NotHelpful, &id);
        assert_eq!(data, "feedback:not_helpful:log-123");
        assert_eq!(parse_feedback_data(&data), Some((Feedback::NotHelpful, id)));
    }

    #[test]
    fn test_parse_feedback_rejects_garbage() {
        assert!(parse_feedback_data("connect:foo").is_none());
        assert!(parse_feedback_data("feedback:great:log-1").is_none());
        assert!(parse_feedback_data("feedback:helpful:").is_none());
        assert!(parse_feedback_data("feedback:helpful").is_none());
    }

    #[test]
    fn test_verification_error_texts() {
        let domains = vec!["acme.com".to_string()];
        let text = verification_error_text(
            &VerificationError::InvalidDomain { domain: "other.com".into() },
            &domains,
        );
        assert!(text.contains("@acme.com"));
        assert!(text.contains("other.com"));

        let text = verification_error_text(&VerificationError::CodeMismatch { remaining: 1 }, &domains);
        assert!(text.ends_with("1 attempt remaining."));
    }

    #[test]
    fn test_status_for_pending_code() {
        let now = Utc::now();
        let mut user = UserRecord::new(UserHandle(1), now);
        user.state = VerificationState::AwaitingCode;
        user.pending_email = Some("bob@acme.com".into());
        user.code_expires_at = Some(now + Duration::minutes(10) + Duration::seconds(5));

        let text = status_text(Some(&user), now);
        assert!(text.contains("bob@acme.com"));
        assert!(text.contains("10 minutes"));
    }

    #[test]
    fn test_help_hides_admin_section() {
        assert!(!help_text(false, true).contains("/revoke"));
        assert!(help_text(true, true).contains("/revoke"));
        assert!(!help_text(false, false).contains("/feedback"));
    }
}
