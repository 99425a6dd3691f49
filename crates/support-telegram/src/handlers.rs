//! Command, message and callback handlers for the Telegram bot.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use support_core::{CoreError, VerificationError, FALLBACK_RESPONSE};
use support_models::{UserHandle, VerificationState};
use support_persistence::PersistenceError;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, ParseMode, User};
use teloxide::utils::command::BotCommands;
use tracing::{debug, error, info, warn};

use crate::format::{
    ask_email_text, code_sent_text, feedback_keyboard, help_text, html_escape, knowledge_list_text,
    parse_feedback_data, split_message, status_text, user_list_text, verification_error_text,
    welcome_text, DELIVERY_UNAVAILABLE, INTERNAL_ERROR, MAX_MESSAGE_CHARS, VERIFY_HINT,
};
use crate::state::BotState;

/// Bot commands that can be invoked with /.
#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "snake_case", description = "Available commands:")]
pub enum Command {
    #[command(description = "Welcome message")]
    Start,

    #[command(description = "Show help")]
    Help,

    #[command(description = "Show your verification status")]
    Status,

    #[command(description = "Verify your company email")]
    Verify,

    #[command(description = "Cancel verification")]
    Cancel,

    #[command(description = "Rate the last answer")]
    Feedback,

    #[command(description = "List users (admin)")]
    AdminListUsers,

    #[command(description = "Revoke a user's access (admin): /revoke <id>")]
    Revoke(String),

    #[command(description = "Let a revoked user verify again (admin): /allow_reverify <id>")]
    AllowReverify(String),

    #[command(description = "List knowledge entries (admin)")]
    KbList,

    #[command(description = "Reload the knowledge base (admin)")]
    KbReload,
}

/// Telegram user to store handle.
fn handle_of(user: &User) -> UserHandle {
    UserHandle(user.id.0 as i64)
}

async fn send_html(bot: &Bot, chat: ChatId, text: impl Into<String>) -> ResponseResult<()> {
    bot.send_message(chat, text).parse_mode(ParseMode::Html).await?;
    Ok(())
}

/// Handle the /start command.
pub async fn handle_start(bot: Bot, msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };

    let verified = match state
        .verification
        .register(handle_of(from), from.username.clone())
        .await
    {
        Ok(user) => user.is_verified(),
        Err(e) => {
            error!(chat_id = %msg.chat.id, error = %e, "Failed to register user");
            false
        }
    };

    send_html(&bot, msg.chat.id, welcome_text(&from.first_name, verified)).await?;
    info!(chat_id = %msg.chat.id, user = ?from.username, "User started bot");
    Ok(())
}

/// Handle the /help command. Only verified users get the full help.
pub async fn handle_help(bot: Bot, msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    let handle = handle_of(from);

    let is_admin = state.is_admin(handle).await;
    let verified = matches!(
        state.verification.get(handle).await,
        Ok(Some(user)) if user.is_verified()
    );

    if !verified && !is_admin {
        send_html(&bot, msg.chat.id, VERIFY_HINT).await?;
        return Ok(());
    }

    send_html(
        &bot,
        msg.chat.id,
        help_text(is_admin, state.settings.enable_feedback),
    )
    .await
}

/// Handle the /status command.
pub async fn handle_status(bot: Bot, msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };

    match state.verification.get(handle_of(from)).await {
        Ok(user) => send_html(&bot, msg.chat.id, status_text(user.as_ref(), Utc::now())).await,
        Err(e) => {
            error!(chat_id = %msg.chat.id, error = %e, "Failed to load user");
            send_html(&bot, msg.chat.id, INTERNAL_ERROR).await
        }
    }
}

/// Handle the /verify command.
pub async fn handle_verify(bot: Bot, msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };

    match state
        .verification
        .begin(handle_of(from), from.username.clone())
        .await
    {
        Ok(_) => {
            send_html(
                &bot,
                msg.chat.id,
                ask_email_text(&state.settings.verification.allowed_domains),
            )
            .await
        }
        Err(e) => reply_core_error(&bot, msg.chat.id, &state, e).await,
    }
}

/// Handle the /cancel command.
pub async fn handle_cancel(bot: Bot, msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };

    let text = match state.verification.cancel(handle_of(from)).await {
        Ok(true) => "❌ Verification cancelled. Use /verify to start again.",
        Ok(false) => "Nothing to cancel.",
        Err(e) => {
            error!(chat_id = %msg.chat.id, error = %e, "Failed to cancel verification");
            INTERNAL_ERROR
        }
    };
    send_html(&bot, msg.chat.id, text).await
}

/// Handle the /feedback command: offer buttons for the latest unrated answer.
pub async fn handle_feedback(bot: Bot, msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    let handle = handle_of(from);

    if !state.settings.enable_feedback {
        send_html(&bot, msg.chat.id, "Feedback collection is disabled.").await?;
        return Ok(());
    }

    match state.verification.check_access(handle, from.username.clone()).await {
        Ok(true) => {}
        Ok(false) => return send_html(&bot, msg.chat.id, VERIFY_HINT).await,
        Err(e) => return reply_core_error(&bot, msg.chat.id, &state, e).await,
    }

    match state.store.latest_unrated_log(handle).await {
        Ok(Some(log)) => {
            bot.send_message(msg.chat.id, "Was my last answer helpful?")
                .reply_markup(feedback_keyboard(&log.id))
                .await?;
        }
        Ok(None) => {
            send_html(&bot, msg.chat.id, "There is no recent answer to rate.").await?;
        }
        Err(e) => {
            error!(chat_id = %msg.chat.id, error = %e, "Failed to load interaction log");
            send_html(&bot, msg.chat.id, INTERNAL_ERROR).await?;
        }
    }
    Ok(())
}

/// Refuse unless the sender is an admin. Returns `true` when allowed.
async fn require_admin(bot: &Bot, msg: &Message, state: &BotState) -> ResponseResult<bool> {
    let Some(from) = msg.from.as_ref() else {
        return Ok(false);
    };
    if state.is_admin(handle_of(from)).await {
        return Ok(true);
    }
    warn!(chat_id = %msg.chat.id, "Admin command refused");
    send_html(bot, msg.chat.id, "🚫 This command is for administrators only.").await?;
    Ok(false)
}

/// Parse the target of /revoke and /allow_reverify.
fn parse_target(arg: &str) -> Option<UserHandle> {
    arg.parse().ok()
}

/// Handle the /admin_list_users command.
pub async fn handle_admin_list_users(bot: Bot, msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    if !require_admin(&bot, &msg, &state).await? {
        return Ok(());
    }

    match state.store.list_users().await {
        Ok(users) => {
            for chunk in split_message(&user_list_text(&users), MAX_MESSAGE_CHARS) {
                send_html(&bot, msg.chat.id, chunk).await?;
            }
        }
        Err(e) => {
            error!(error = %e, "Failed to list users");
            send_html(&bot, msg.chat.id, INTERNAL_ERROR).await?;
        }
    }
    Ok(())
}

/// Handle the /revoke command.
pub async fn handle_revoke(bot: Bot, msg: Message, state: Arc<BotState>, arg: String) -> ResponseResult<()> {
    if !require_admin(&bot, &msg, &state).await? {
        return Ok(());
    }
    let Some(target) = parse_target(&arg) else {
        return send_html(&bot, msg.chat.id, "<b>Usage:</b> <code>/revoke &lt;telegram id&gt;</code>").await;
    };

    let text = match state.verification.revoke(target).await {
        Ok(_) => format!("🚫 Access revoked for <code>{}</code>.", target),
        Err(CoreError::NotFound { .. }) => format!("User <code>{}</code> not found.", target),
        Err(e) => {
            error!(user = %target, error = %e, "Failed to revoke user");
            INTERNAL_ERROR.to_string()
        }
    };
    send_html(&bot, msg.chat.id, text).await
}

/// Handle the /allow_reverify command.
pub async fn handle_allow_reverify(bot: Bot, msg: Message, state: Arc<BotState>, arg: String) -> ResponseResult<()> {
    if !require_admin(&bot, &msg, &state).await? {
        return Ok(());
    }
    let Some(target) = parse_target(&arg) else {
        return send_html(&bot, msg.chat.id, "<b>Usage:</b> <code>/allow_reverify &lt;telegram id&gt;</code>").await;
    };

    let text = match state.verification.allow_reverification(target).await {
        Ok(true) => format!("✅ User <code>{}</code> may verify again with /verify.", target),
        Ok(false) => format!("User <code>{}</code> is not revoked.", target),
        Err(CoreError::NotFound { .. }) => format!("User <code>{}</code> not found.", target),
        Err(e) => {
            error!(user = %target, error = %e, "Failed to allow re-verification");
            INTERNAL_ERROR.to_string()
        }
    };
    send_html(&bot, msg.chat.id, text).await
}

/// Handle the /kb_list command.
pub async fn handle_kb_list(bot: Bot, msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    if !require_admin(&bot, &msg, &state).await? {
        return Ok(());
    }

    let snapshot = state.knowledge.snapshot();
    for chunk in split_message(&knowledge_list_text(snapshot.entries()), MAX_MESSAGE_CHARS) {
        send_html(&bot, msg.chat.id, chunk).await?;
    }
    Ok(())
}

/// Handle the /kb_reload command.
pub async fn handle_kb_reload(bot: Bot, msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    if !require_admin(&bot, &msg, &state).await? {
        return Ok(());
    }

    let text = match state.knowledge.reload().await {
        Ok(count) => format!("🔄 Knowledge base reloaded: {} entries.", count),
        Err(e) => {
            error!(error = %e, "Knowledge reload failed");
            INTERNAL_ERROR.to_string()
        }
    };
    send_html(&bot, msg.chat.id, text).await
}

/// Handle regular text messages.
///
/// Unverified users are routed into the verification flow; verified users
/// get their question answered.
pub async fn handle_message(bot: Bot, msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let (Some(text), Some(from)) = (msg.text(), msg.from.as_ref()) else {
        return Ok(());
    };
    let handle = handle_of(from);
    let text = text.trim();

    let user = match state.verification.register(handle, from.username.clone()).await {
        Ok(user) => user,
        Err(e) => {
            error!(chat_id = %msg.chat.id, error = %e, "Failed to load user");
            return send_html(&bot, msg.chat.id, INTERNAL_ERROR).await;
        }
    };

    match user.state {
        VerificationState::Verified => answer_question(&bot, &msg, &state, handle, text).await,
        VerificationState::AwaitingEmail => submit_email(&bot, msg.chat.id, &state, handle, text).await,
        // An address resends a code, anything else is treated as the code.
        VerificationState::AwaitingCode if text.contains('@') => {
            submit_email(&bot, msg.chat.id, &state, handle, text).await
        }
        VerificationState::AwaitingCode => submit_code(&bot, msg.chat.id, &state, handle, text).await,
        VerificationState::Unverified => send_html(&bot, msg.chat.id, VERIFY_HINT).await,
        VerificationState::Revoked => {
            reply_core_error(&bot, msg.chat.id, &state, VerificationError::Revoked.into()).await
        }
    }
}

async fn submit_email(
    bot: &Bot,
    chat: ChatId,
    state: &BotState,
    handle: UserHandle,
    text: &str,
) -> ResponseResult<()> {
    bot.send_chat_action(chat, ChatAction::Typing).await?;
    match state.verification.submit_email(handle, text).await {
        Ok(delivery) => {
            send_html(bot, chat, code_sent_text(&delivery.email, delivery.expires_at, Utc::now())).await
        }
        Err(e) => reply_core_error(bot, chat, state, e).await,
    }
}

async fn submit_code(
    bot: &Bot,
    chat: ChatId,
    state: &BotState,
    handle: UserHandle,
    text: &str,
) -> ResponseResult<()> {
    match state.verification.submit_code(handle, text).await {
        Ok(user) => {
            info!(chat_id = %chat, user = %handle, "Verification completed");
            send_html(
                bot,
                chat,
                format!(
                    "✅ Verified as <b>{}</b>!\n\nYou can now ask me technical questions. Type /help for more.",
                    html_escape(user.email.as_deref().unwrap_or_default())
                ),
            )
            .await
        }
        Err(e) => reply_core_error(bot, chat, state, e).await,
    }
}

async fn answer_question(
    bot: &Bot,
    msg: &Message,
    state: &BotState,
    handle: UserHandle,
    text: &str,
) -> ResponseResult<()> {
    let username = msg.from.as_ref().and_then(|u| u.username.clone());
    match state.verification.check_access(handle, username).await {
        Ok(true) => {}
        Ok(false) => {
            return send_html(
                bot,
                msg.chat.id,
                format!(
                    "⌛ Your session has expired.\n\n{}",
                    ask_email_text(&state.settings.verification.allowed_domains)
                ),
            )
            .await;
        }
        Err(e) => return reply_core_error(bot, msg.chat.id, state, e).await,
    }

    // Keep the typing indicator alive while the model works.
    let typing = {
        let bot = bot.clone();
        let chat = msg.chat.id;
        tokio::spawn(async move {
            loop {
                if bot.send_chat_action(chat, ChatAction::Typing).await.is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_secs(4)).await;
            }
        })
    };

    let answer = state.assistant.answer(handle, text).await;
    typing.abort();

    debug!(
        chat_id = %msg.chat.id,
        technologies = ?answer.technologies,
        fallback = answer.fallback,
        "Sending answer"
    );

    let mut chunks = split_message(&answer.text, MAX_MESSAGE_CHARS);
    if chunks.is_empty() {
        warn!(chat_id = %msg.chat.id, "Blank answer from the model");
        chunks.push(FALLBACK_RESPONSE.to_string());
    }
    let last = chunks.len().saturating_sub(1);
    for (i, chunk) in chunks.into_iter().enumerate() {
        let mut req = bot.send_message(msg.chat.id, chunk);
        if i == last && !answer.fallback && state.settings.enable_feedback {
            req = req.reply_markup(feedback_keyboard(&answer.log_id));
        }
        req.await?;
    }
    Ok(())
}

/// Tell the user what went wrong in a verification or storage step.
async fn reply_core_error(bot: &Bot, chat: ChatId, state: &BotState, err: CoreError) -> ResponseResult<()> {
    let text = match &err {
        CoreError::Verification(e) => {
            debug!(chat_id = %chat, error = %e, "Verification step rejected");
            verification_error_text(e, &state.settings.verification.allowed_domains)
        }
        CoreError::Mail(e) => {
            warn!(chat_id = %chat, error = %e, "Verification email failed");
            DELIVERY_UNAVAILABLE.to_string()
        }
        other => {
            error!(chat_id = %chat, error = %other, "Request failed");
            INTERNAL_ERROR.to_string()
        }
    };
    send_html(bot, chat, text).await
}

/// Handle presses on the feedback buttons.
pub async fn handle_callback(bot: Bot, q: CallbackQuery, state: Arc<BotState>) -> ResponseResult<()> {
    let Some((feedback, log_id)) = q.data.as_deref().and_then(parse_feedback_data) else {
        bot.answer_callback_query(q.id.clone()).await?;
        return Ok(());
    };
    let handle = handle_of(&q.from);

    let reply = if !state.settings.enable_feedback {
        "Feedback collection is disabled."
    } else {
        match state.store.set_feedback(handle, &log_id, feedback).await {
            Ok(()) => {
                info!(user = %handle, log = %log_id, feedback = %feedback, "Feedback recorded");
                "Thanks for your feedback!"
            }
            Err(PersistenceError::FeedbackAlreadyRecorded(_)) => "Feedback was already recorded.",
            // Logs are looked up per user, so someone else's log is not found.
            Err(PersistenceError::NotFound { .. }) => "This answer can't be rated.",
            Err(e) => {
                error!(user = %handle, error = %e, "Failed to record feedback");
                "Something went wrong, please try again later."
            }
        }
    };

    bot.answer_callback_query(q.id.clone()).text(reply).await?;
    Ok(())
}

/// Reply to a slash command that did not parse.
pub async fn handle_unknown_command(bot: Bot, msg: Message) -> ResponseResult<()> {
    if let Some(text) = msg.text() {
        let name = text.split_whitespace().next().unwrap_or(text);
        info!(cmd = %name, "Unrecognized command");
        bot.send_message(
            msg.chat.id,
            format!("Unknown command: {}\n\nUse /help to see available commands.", name),
        )
        .await?;
    }
    Ok(())
}

/// Dispatch a parsed command.
pub async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    state: Arc<BotState>,
) -> ResponseResult<()> {
    match cmd {
        Command::Start => handle_start(bot, msg, state).await,
        Command::Help => handle_help(bot, msg, state).await,
        Command::Status => handle_status(bot, msg, state).await,
        Command::Verify => handle_verify(bot, msg, state).await,
        Command::Cancel => handle_cancel(bot, msg, state).await,
        Command::Feedback => handle_feedback(bot, msg, state).await,
        Command::AdminListUsers => handle_admin_list_users(bot, msg, state).await,
        Command::Revoke(arg) => handle_revoke(bot, msg, state, arg).await,
        Command::AllowReverify(arg) => handle_allow_reverify(bot, msg, state, arg).await,
        Command::KbList => handle_kb_list(bot, msg, state).await,
        Command::KbReload => handle_kb_reload(bot, msg, state).await,
    }
}
