//! yiba-server - Yiba Verified compliance API
//!
//! Multi-tenant compliance management for accredited training institutions
//! and the QCTO. Serves the JSON HTTP API; the email queue is drained by
//! the separate yiba-mailer binary.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use yiba_common::config::{self, StorageConfig};
use yiba_common::db;
use yiba_server::storage::{LocalStore, ObjectStore, S3Store};
use yiba_server::{build_router, AppState};

#[derive(Parser)]
#[command(name = "yiba-server", about = "Yiba Verified compliance API")]
struct Cli {
    /// Data directory (overrides YIBA_DATA_DIR and the config file)
    #[arg(long)]
    data_dir: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Create the initial platform administrator account
    CreateAdmin {
        email: String,
        password: String,
        #[arg(long, default_value = "Platform Administrator")]
        display_name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Starting Yiba Verified API (yiba-server) v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();

    let data_dir = config::resolve_data_dir(cli.data_dir.as_deref());
    std::fs::create_dir_all(&data_dir)?;
    info!("Data directory: {}", data_dir.display());

    let app_config = config::load_config(&data_dir)?;

    let db_path = config::database_path(&data_dir);
    let pool = db::connect(&db_path).await?;

    if let Some(Command::CreateAdmin {
        email,
        password,
        display_name,
    }) = cli.command
    {
        let id = yiba_server::api::users::create_platform_admin(&pool, &email, &password, &display_name)
            .await?;
        info!("Created platform administrator {} ({})", email, id);
        return Ok(());
    }

    if app_config.server.dev_bypass {
        info!("Development bypass header ENABLED - do not run this configuration in production");
    }

    let storage: Arc<dyn ObjectStore> = match &app_config.storage {
        StorageConfig::Local => Arc::new(LocalStore::new(data_dir.join("documents"))),
        StorageConfig::S3 {
            endpoint,
            bucket,
            region,
            access_key,
            secret_key,
        } => Arc::new(S3Store::new(
            endpoint.clone(),
            bucket.clone(),
            region.clone(),
            access_key.clone(),
            secret_key.clone(),
        )),
    };

    let bind = format!("{}:{}", app_config.server.bind, app_config.server.port);
    let state = AppState::new(pool, app_config, storage);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("yiba-server listening on http://{}", bind);
    info!("Health check: http://{}/health", bind);

    axum::serve(listener, app).await?;

    Ok(())
}
