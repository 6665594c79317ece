//! yiba-mailer - email queue drain worker
//!
//! Shares the SQLite database with yiba-server and delivers queued mail
//! through the configured provider. Runs continuously on an interval, or
//! as a single pass with `--once` (useful from cron or in tests).

use anyhow::Result;
use clap::Parser;
use tracing::info;

use yiba_common::config::{self, MailerProvider};
use yiba_common::db;
use yiba_mailer::mailer::{HttpMailer, LogMailer, Mailer};
use yiba_mailer::queue::drain_once;

#[derive(Parser)]
#[command(name = "yiba-mailer", about = "Yiba Verified email queue worker")]
struct Cli {
    /// Data directory (overrides YIBA_DATA_DIR and the config file)
    #[arg(long)]
    data_dir: Option<String>,

    /// Run one drain pass and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Starting Yiba Verified mail worker (yiba-mailer) v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();

    let data_dir = config::resolve_data_dir(cli.data_dir.as_deref());
    std::fs::create_dir_all(&data_dir)?;
    info!("Data directory: {}", data_dir.display());

    let app_config = config::load_config(&data_dir)?;
    let mailer_config = app_config.mailer;

    let db_path = config::database_path(&data_dir);
    let pool = db::connect(&db_path).await?;

    let mailer: Box<dyn Mailer> = match &mailer_config.provider {
        MailerProvider::Log => {
            info!("Delivery provider: log (development)");
            Box::new(LogMailer)
        }
        MailerProvider::Http { endpoint, api_key } => {
            info!("Delivery provider: http ({})", endpoint);
            Box::new(HttpMailer::new(endpoint.clone(), api_key.clone()))
        }
    };

    if cli.once {
        let stats = drain_once(&pool, mailer.as_ref(), &mailer_config).await?;
        info!(
            "Single pass complete: {} claimed, {} sent, {} failed",
            stats.claimed, stats.sent, stats.failed
        );
        return Ok(());
    }

    let interval = std::time::Duration::from_secs(mailer_config.interval_seconds);
    info!("Draining every {}s", mailer_config.interval_seconds);
    loop {
        drain_once(&pool, mailer.as_ref(), &mailer_config).await?;
        tokio::time::sleep(interval).await;
    }
}
