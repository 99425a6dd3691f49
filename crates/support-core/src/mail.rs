//! Outgoing email.
//!
//! [`SmtpMailer`] delivers through an SMTP relay with STARTTLS. When no SMTP
//! host is configured the bot uses [`LogMailer`], which writes the message
//! to the log instead so codes can still be read during development.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info};

use crate::config::SmtpSettings;
use crate::error::MailError;

/// Body of an email: plain text with an optional HTML alternative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailBody {
    pub text: String,
    pub html: Option<String>,
}

impl EmailBody {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            html: None,
        }
    }
}

/// Sends email.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &EmailBody) -> Result<(), MailError>;
}

/// SMTP delivery through a STARTTLS relay.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    /// Builds the transport. No connection is made until the first send.
    pub fn new(settings: &SmtpSettings, timeout: Duration) -> Result<Self, MailError> {
        let address = settings
            .from_email
            .parse::<lettre::Address>()
            .map_err(|e| MailError::DeliveryFailed(format!("invalid sender {}: {}", settings.from_email, e)))?;
        let from = Mailbox::new(Some(settings.from_name.clone()), address);

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
            .map_err(|e| MailError::DeliveryFailed(format!("invalid SMTP host {}: {}", settings.host, e)))?
            .port(settings.port)
            .timeout(Some(timeout));

        if !settings.user.is_empty() {
            builder = builder.credentials(Credentials::new(
                settings.user.clone(),
                settings.password.clone(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &EmailBody) -> Result<(), MailError> {
        let to = to
            .parse::<Mailbox>()
            .map_err(|e| MailError::DeliveryFailed(format!("invalid recipient {}: {}", to, e)))?;

        let builder = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject);

        let message = match &body.html {
            Some(html) => builder.multipart(MultiPart::alternative_plain_html(
                body.text.clone(),
                html.clone(),
            )),
            None => builder.singlepart(SinglePart::plain(body.text.clone())),
        }
        .map_err(|e| MailError::DeliveryFailed(format!("failed to build message: {}", e)))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| MailError::DeliveryFailed(e.to_string()))?;

        debug!(subject, "Email sent");
        Ok(())
    }
}

/// Writes emails to the log instead of sending them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, body: &EmailBody) -> Result<(), MailError> {
        info!(to, subject, body = %body.text, "SMTP not configured, email logged instead of sent");
        Ok(())
    }
}

/// Subject line of verification emails.
pub const VERIFICATION_SUBJECT: &str = "Gitinsky Support Bot - Verification Code";

/// Renders the verification email for `code`.
pub fn verification_email(code: &str, ttl_minutes: i64) -> EmailBody {
    let text = format!(
        "Gitinsky Support Bot - Email Verification\n\
         \n\
         Hello!\n\
         \n\
         You have requested access to the Gitinsky Support Bot. \
         Please use the following verification code to complete the verification process:\n\
         \n\
         Verification Code: {code}\n\
         \n\
         This code will expire in {ttl_minutes} minutes.\n\
         \n\
         To verify your account:\n\
         1. Return to the Telegram bot\n\
         2. Enter the verification code when prompted\n\
         \n\
         If you did not request this verification code, please ignore this email.\n\
         \n\
         ---\n\
         Gitinsky Support Bot\n\
         Technical Support Assistant\n"
    );

    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="UTF-8"></head>
<body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
  <div style="background-color: #4CAF50; color: white; padding: 20px; text-align: center; border-radius: 5px 5px 0 0;">
    <h1>Gitinsky Support Bot</h1>
    <p>Email Verification</p>
  </div>
  <div style="background-color: #f9f9f9; padding: 30px; border: 1px solid #ddd;">
    <p>Hello!</p>
    <p>You have requested access to the <strong>Gitinsky Support Bot</strong>. Please use the following verification code to complete the verification process:</p>
    <div style="background-color: #fff; border: 2px solid #4CAF50; border-radius: 5px; padding: 20px; text-align: center; margin: 20px 0;">
      <div style="font-size: 32px; font-weight: bold; color: #4CAF50; letter-spacing: 5px;">{code}</div>
    </div>
    <p style="text-align: center; color: #ff5722;"><strong>This code will expire in {ttl_minutes} minutes</strong></p>
    <ol>
      <li>Return to the Telegram bot</li>
      <li>Enter the verification code when prompted</li>
      <li>Start getting technical support!</li>
    </ol>
    <p style="color: #666; font-size: 14px;">If you did not request this verification code, please ignore this email.</p>
  </div>
  <div style="text-align: center; color: #666; font-size: 12px; margin-top: 20px;">
    <p><strong>Gitinsky Support Bot</strong></p>
    <p>Technical Support Assistant for IT Professionals</p>
  </div>
</body>
</html>
"#
    );

    EmailBody {
        text,
        html: Some(html),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verification_email_contains_code() {
        let body = verification_email("482913", 15);
        assert!(body.text.contains("Verification Code: 482913"));
        assert!(body.text.contains("expire in 15 minutes"));
        let html = body.html.unwrap();
        assert!(html.contains(">482913<"));
        assert!(html.starts_with("<!DOCTYPE html>"));
    }

    #[tokio::test]
    async fn test_log_mailer_always_succeeds() {
        LogMailer
            .send("bob@acme.com", VERIFICATION_SUBJECT, &EmailBody::text("hi"))
            .await
            .unwrap();
    }

    #[test]
    fn test_smtp_mailer_rejects_bad_sender() {
        let settings = SmtpSettings {
            host: "smtp.acme.com".into(),
            port: 587,
            user: String::new(),
            password: String::new(),
            from_email: "not an address".into(),
            from_name: "Bot".into(),
        };
        assert!(SmtpMailer::new(&settings, Duration::from_secs(5)).is_err());
    }
}
