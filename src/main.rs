use anyhow::{bail, Context, Result};
use autoreply_core::{load_bot_configs, CredentialStore, ErrorExt};
use bot_service::{Account, RestartPolicy, Supervisor};
use clap::Parser;
use reddit_client::{RedditClient, RedditOAuth2Config};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "autoreply=info,bot_service=info,reddit_client=info,autoreply_core=info";

#[derive(Parser)]
#[command(name = "autoreply", version, about = "Answers Reddit posts and comments that mention trigger words.")]
struct Cli {
    /// JSON file with one record per bot account
    #[arg(short, long, env = "AUTOREPLY_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// TOML file with the API credentials of every account
    #[arg(long, env = "AUTOREPLY_CREDENTIALS", default_value = "credentials.toml")]
    credentials: PathBuf,

    /// Classify and log items without posting anything
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Restart a failed worker up to this many times (0 = never)
    #[arg(long, default_value_t = 0)]
    max_restarts: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    tracing::info!("Starting autoreply {}", env!("CARGO_PKG_VERSION"));

    let bots = load_bot_configs(&cli.config)
        .map_err(|e| anyhow::anyhow!(e.log_error().user_friendly_message()))
        .with_context(|| format!("loading bots from {}", cli.config.display()))?;
    let credentials = CredentialStore::load(&cli.credentials)
        .map_err(|e| anyhow::anyhow!(e.log_error().user_friendly_message()))
        .with_context(|| format!("loading credentials from {}", cli.credentials.display()))?;

    let mut accounts = Vec::with_capacity(bots.len());
    for bot in bots {
        let account_credentials = credentials
            .get(&bot.username)
            .with_context(|| format!("setting up u/{}", bot.username))?;
        let config = RedditOAuth2Config::from_credentials(&bot.username, account_credentials);
        let client = RedditClient::new(config)
            .with_context(|| format!("creating Reddit client for u/{}", bot.username))?;
        accounts.push(Account::new(bot, Arc::new(client)));
    }

    let supervisor = Supervisor::new(accounts)
        .with_restart_policy(RestartPolicy::from_max_restarts(cli.max_restarts))
        .with_dry_run(cli.dry_run);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Ctrl-C received, closing streams");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                // Dropping the sender would stop every worker.
                tracing::error!("Could not listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
                drop(shutdown_tx);
            }
        }
    });

    let report = supervisor.run(shutdown_rx).await;
    let totals = report.totals();
    tracing::info!(
        "Observed {} items, posted {} replies ({} dry run, {} rejected)",
        totals.observed,
        totals.posted,
        totals.dry_run,
        totals.rejected
    );

    for worker in report.failed() {
        tracing::error!("{} failed: {:?}", worker.id, worker.state);
    }
    if !report.workers.is_empty() && report.failed().count() == report.workers.len() {
        bail!("every worker failed");
    }
    Ok(())
}
