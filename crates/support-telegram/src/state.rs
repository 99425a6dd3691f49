//! Shared state for the Telegram bot.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use support_core::{
    Assistant, InferenceClient, KnowledgeBase, LogMailer, Mailer, OpenRouterClient, Settings,
    SmtpMailer, UserLocks, VerificationMachine, VerificationService,
};
use support_models::UserHandle;
use support_persistence::{FileStore, Persistence};
use tracing::{info, warn};

use crate::error::Result;

/// Everything the handlers need, shared behind an `Arc`.
pub struct BotState {
    pub settings: Settings,
    pub store: Arc<dyn Persistence>,
    pub verification: Arc<VerificationService>,
    pub knowledge: Arc<KnowledgeBase>,
    pub assistant: Assistant,
    admin_ids: HashSet<i64>,
}

impl BotState {
    /// Wires the core services around the given collaborators.
    pub async fn new(
        settings: Settings,
        store: Arc<dyn Persistence>,
        mailer: Arc<dyn Mailer>,
        client: Arc<dyn InferenceClient>,
    ) -> Result<Self> {
        let locks = Arc::new(UserLocks::new());

        let verification = Arc::new(VerificationService::new(
            VerificationMachine::new(settings.verification.clone()),
            Arc::clone(&store),
            mailer,
            Arc::clone(&locks),
            settings.email_timeout,
        ));

        let knowledge = Arc::new(KnowledgeBase::load(Arc::clone(&store)).await?);

        let assistant = Assistant::new(
            Arc::clone(&knowledge),
            client,
            Arc::clone(&store),
            locks,
            settings.inference.timeout,
            settings.max_snippets,
        );

        let admin_ids = settings.admin_ids.iter().copied().collect();

        Ok(Self {
            settings,
            store,
            verification,
            knowledge,
            assistant,
            admin_ids,
        })
    }

    /// Production wiring: file store under `data_dir`, SMTP (or log) mailer
    /// and the OpenRouter client.
    pub async fn from_settings(settings: Settings, data_dir: &Path) -> Result<Self> {
        let store: Arc<dyn Persistence> = Arc::new(FileStore::new(data_dir));

        let mailer: Arc<dyn Mailer> = match &settings.smtp {
            Some(smtp) => {
                info!(host = %smtp.host, port = smtp.port, "Using SMTP mailer");
                Arc::new(SmtpMailer::new(smtp, settings.email_timeout)?)
            }
            None => {
                warn!("SMTP_HOST not set, verification codes will only be logged");
                Arc::new(LogMailer)
            }
        };

        if settings.inference.api_key.is_none() {
            warn!("OPENROUTER_API_KEY not set, every question will get the fallback answer");
        }
        let client: Arc<dyn InferenceClient> = Arc::new(OpenRouterClient::new(&settings.inference)?);

        Self::new(settings, store, mailer, client).await
    }

    /// Whether `user` may run admin commands.
    ///
    /// Admins come from `ADMIN_TELEGRAM_IDS` or the stored admin flag.
    /// Always `false` when admin commands are disabled.
    pub async fn is_admin(&self, user: UserHandle) -> bool {
        if !self.settings.enable_admin_commands {
            return false;
        }
        if self.admin_ids.contains(&user.get()) {
            return true;
        }
        match self.store.get_user(user).await {
            Ok(Some(record)) => record.is_admin,
            Ok(None) => false,
            Err(e) => {
                warn!(user = %user, error = %e, "Failed to load user for admin check");
                false
            }
        }
    }
}
