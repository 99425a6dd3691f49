//! Gitinsky support bot binary.
//!
//! Start the bot with:
//! ```bash
//! TELEGRAM_BOT_TOKEN=xxx COMPANY_EMAIL_DOMAIN=gitinsky.com cargo run -p support-telegram
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use support_core::{config, KnowledgeBase, Settings};
use support_persistence::FileStore;
use support_telegram::{BotState, SupportBot, TelegramError};
use tracing_subscriber::EnvFilter;
use url::Url;

/// Gitinsky support bot - verified employees ask technical questions from Telegram
#[derive(Parser, Debug)]
#[command(name = "support-telegram")]
#[command(about = "Telegram support bot with corporate email verification")]
struct Args {
    /// Use webhook mode (default: polling mode)
    #[arg(short, long)]
    webhook: bool,

    /// Webhook port
    #[arg(short, long, env = "TELEGRAM_WEBHOOK_PORT", default_value = "8443")]
    port: u16,

    /// Public webhook URL Telegram should post updates to
    #[arg(long, env = "TELEGRAM_WEBHOOK_URL")]
    url: Option<Url>,

    /// Verbose logging (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Import knowledge entries from a JSON seed file and exit
    Seed {
        /// Path to the seed file
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from config directory first
    let env_path = config::env_file();
    if env_path.exists() {
        let _ = dotenvy::from_path(&env_path);
    }
    // Also try local .env.local or .env
    let _ = dotenvy::from_filename(".env.local").or_else(|_| dotenvy::dotenv());

    // Parse after loading so env-backed flags see the files
    let args = Args::parse();

    let filter = match args.verbose {
        0 => "support_telegram=info,support_core=info,teloxide=warn",
        1 => "support_telegram=debug,support_core=debug,teloxide=info",
        2 => "support_telegram=trace,support_core=trace,support_persistence=debug,teloxide=debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    if let Err(e) = config::ensure_all_dirs() {
        tracing::warn!(error = %e, "Failed to create all directories");
    }
    let data_dir = config::data_dir();

    if let Some(Cmd::Seed { file }) = args.command {
        let kb = KnowledgeBase::load(Arc::new(FileStore::new(&data_dir))).await?;
        let report = kb.import_seed_file(&file, "seed").await?;
        println!(
            "Imported {}: {} created, {} updated, {} unchanged",
            file.display(),
            report.created,
            report.updated,
            report.unchanged
        );
        return Ok(());
    }

    // Refuse to start on bad configuration
    let settings = Settings::from_env().map_err(TelegramError::from)?;
    tracing::info!(
        domains = ?settings.verification.allowed_domains,
        model = %settings.inference.model,
        admins = settings.admin_ids.len(),
        "Configuration loaded"
    );

    let state = Arc::new(BotState::from_settings(settings, &data_dir).await?);
    let bot = SupportBot::new(state)?.with_webhook_port(args.port);

    match bot.get_me().await {
        Ok(username) => {
            tracing::info!(username = %username, "Bot initialized successfully");
            println!("\n[robot] Gitinsky Support Bot");
            println!("   Bot: @{}", username);
            println!("   Mode: {}", if args.webhook { "webhook" } else { "polling" });
            println!("   Data: {}", data_dir.display());
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to get bot info");
            return Err(e.into());
        }
    }

    println!("\n[phone] Open Telegram and send /start to begin");
    println!("   Press Ctrl+C to stop\n");

    if args.webhook {
        let url = args.url.ok_or(TelegramError::NoWebhookUrl)?;
        bot.start_webhook(url).await?;
    } else {
        bot.start_polling().await?;
    }

    Ok(())
}
