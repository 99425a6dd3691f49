//! Main Telegram bot implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use support_core::CodeSweeper;
use teloxide::dispatching::{UpdateFilterExt, UpdateHandler};
use teloxide::error_handlers::LoggingErrorHandler;
use teloxide::prelude::*;
use teloxide::update_listeners::webhooks;
use tokio::sync::watch;
use tracing::{info, warn};
use url::Url;

use crate::error::{Result, TelegramError};
use crate::handlers::{handle_callback, handle_command, handle_message, handle_unknown_command, Command};
use crate::state::BotState;

/// Default webhook port.
pub const DEFAULT_WEBHOOK_PORT: u16 = 8443;

/// The support bot: a teloxide bot plus the shared state.
pub struct SupportBot {
    bot: Bot,
    state: Arc<BotState>,
    webhook_port: u16,
}

impl SupportBot {
    /// Create a new bot instance.
    ///
    /// Requires `TELEGRAM_BOT_TOKEN` environment variable to be set.
    pub fn new(state: Arc<BotState>) -> Result<Self> {
        let token = std::env::var("TELEGRAM_BOT_TOKEN").map_err(|_| TelegramError::NoToken)?;
        if token.trim().is_empty() {
            return Err(TelegramError::NoToken);
        }

        let webhook_port = std::env::var("TELEGRAM_WEBHOOK_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_WEBHOOK_PORT);

        Ok(Self {
            bot: Bot::new(token),
            state,
            webhook_port,
        })
    }

    /// Override the webhook port.
    pub fn with_webhook_port(mut self, port: u16) -> Self {
        self.webhook_port = port;
        self
    }

    /// Get the bot's username.
    pub async fn get_me(&self) -> Result<String> {
        let me = self
            .bot
            .get_me()
            .await
            .map_err(|e| TelegramError::BotStartFailed(e.to_string()))?;
        Ok(me.username().to_string())
    }

    /// Start the bot in long-polling mode.
    pub async fn start_polling(&self) -> Result<()> {
        info!("Starting Telegram bot in polling mode...");

        // Drop any webhook left from a previous webhook run.
        self.bot
            .delete_webhook()
            .await
            .map_err(|e| TelegramError::BotStartFailed(e.to_string()))?;

        let shutdown = self.spawn_sweeper();

        info!("Bot is running! Send /start to begin.");
        self.dispatcher().dispatch().await;

        let _ = shutdown.send(true);
        info!("Bot stopped");
        Ok(())
    }

    /// Start the bot behind a webhook at `url`, listening on the webhook port.
    pub async fn start_webhook(&self, url: Url) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.webhook_port));
        info!(%url, port = self.webhook_port, "Starting Telegram bot with webhook...");

        let listener = webhooks::axum(self.bot.clone(), webhooks::Options::new(addr, url))
            .await
            .map_err(|e| TelegramError::WebhookFailed(e.to_string()))?;

        let shutdown = self.spawn_sweeper();

        info!("Webhook registered, waiting for updates");
        self.dispatcher()
            .dispatch_with_listener(
                listener,
                LoggingErrorHandler::with_custom_text("An error from the update listener"),
            )
            .await;

        let _ = shutdown.send(true);
        info!("Bot stopped");
        Ok(())
    }

    fn dispatcher(&self) -> Dispatcher<Bot, teloxide::RequestError, teloxide::dispatching::DefaultKey> {
        Dispatcher::builder(self.bot.clone(), schema(Arc::clone(&self.state)))
            .default_handler(|upd| async move {
                warn!("Unhandled update: {:?}", upd.kind);
            })
            .enable_ctrlc_handler()
            .build()
    }

    /// Spawn the hourly code sweeper. Sending `true` stops it.
    fn spawn_sweeper(&self) -> watch::Sender<bool> {
        let (tx, rx) = watch::channel(false);
        let sweeper = CodeSweeper::new(Arc::clone(&self.state.verification), rx);
        tokio::spawn(sweeper.run());
        tx
    }
}

/// Routing of incoming updates to handlers.
pub fn schema(state: Arc<BotState>) -> UpdateHandler<teloxide::RequestError> {
    let state_for_commands = Arc::clone(&state);
    let state_for_messages = Arc::clone(&state);
    let state_for_callbacks = state;

    dptree::entry()
        .branch(
            Update::filter_callback_query().endpoint(move |bot: Bot, q: CallbackQuery| {
                let state = Arc::clone(&state_for_callbacks);
                async move { handle_callback(bot, q, state).await }
            }),
        )
        .branch(
            Update::filter_message()
                .filter_command::<Command>()
                .endpoint(move |bot: Bot, msg: Message, cmd: Command| {
                    let state = Arc::clone(&state_for_commands);
                    info!(chat_id = %msg.chat.id, "Command matched: {:?}", cmd);
                    async move { handle_command(bot, msg, cmd, state).await }
                }),
        )
        .branch(
            Update::filter_message()
                .filter(|msg: Message| msg.text().is_some_and(|t| t.starts_with('/')))
                .endpoint(handle_unknown_command),
        )
        .branch(
            Update::filter_message()
                .filter(|msg: Message| msg.text().is_some_and(|t| !t.starts_with('/')))
                .endpoint(move |bot: Bot, msg: Message| {
                    let state = Arc::clone(&state_for_messages);
                    async move { handle_message(bot, msg, state).await }
                }),
        )
}
