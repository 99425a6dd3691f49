//! Telegram front end for the Gitinsky support bot.
//!
//! Employees verify a corporate email address with a one-time code, then
//! ask technical questions that are answered from the company knowledge
//! base through an LLM.
//!
//! # Environment Variables
//!
//! Required:
//! - `TELEGRAM_BOT_TOKEN`: Bot token from @BotFather
//! - `COMPANY_EMAIL_DOMAIN`: Accepted email domains, comma separated
//!
//! Optional:
//! - `OPENROUTER_API_KEY`, `INFERENCE_MODEL`, `INFERENCE_API_URL`: LLM access
//! - `SMTP_HOST`, `SMTP_PORT`, `SMTP_USER`, `SMTP_PASSWORD`: Code delivery
//! - `ADMIN_TELEGRAM_IDS`: Admin Telegram ids, comma separated
//! - `TELEGRAM_WEBHOOK_URL`, `TELEGRAM_WEBHOOK_PORT`: Webhook mode
//!
//! # Commands
//!
//! - `/start`, `/help`, `/status`
//! - `/verify`, `/cancel`
//! - `/feedback`
//! - Admin: `/admin_list_users`, `/revoke`, `/allow_reverify`, `/kb_list`, `/kb_reload`

pub mod bot;
pub mod error;
pub mod format;
pub mod handlers;
pub mod state;

pub use bot::{schema, SupportBot, DEFAULT_WEBHOOK_PORT};
pub use error::{Result, TelegramError};
pub use handlers::Command;
pub use state::BotState;
