//! the `serve` subcommand - runs the tailgrant server

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use color_eyre::eyre::{Context, Result};
use secrecy::ExposeSecret;
use tokio::net::TcpListener;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

use tailgrant_db::TailgrantDb;
use tailgrant_engine::Runtime;
use tailgrant_engine::resource::TailscaleClient;
use tailgrant_types::{Config, GrantTypeStore};

/// run the tailgrant server
#[derive(Args, Debug)]
pub struct ServeCommand {
    /// path to the config file
    #[arg(short, long, env = "TAILGRANT_CONFIG")]
    config: PathBuf,

    /// log level
    #[arg(long, default_value = "info", env = "TAILGRANT_LOG_LEVEL")]
    log_level: String,
}

impl ServeCommand {
    /// run the serve command
    pub async fn run(self) -> Result<()> {
        // initialize logging
        let log_level = match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
        tracing::subscriber::set_global_default(subscriber)?;

        info!("starting tailgrant...");

        // configuration errors refuse startup
        let config = Config::load(&self.config)
            .with_context(|| format!("failed to load config: {:?}", self.config))?;
        let grant_types =
            GrantTypeStore::new(config.grants.clone()).context("invalid grant types")?;
        info!("Loaded {} grant types", grant_types.list().len());
        if grant_types.list().is_empty() {
            warn!("no grant types configured; every request will be rejected");
        }

        // ensure parent directory exists for sqlite databases
        if config.database.db_type == "sqlite" {
            let db_path = std::path::Path::new(&config.database.connection_string);
            if let Some(parent) = db_path.parent()
                && !parent.exists()
            {
                info!("Creating database directory: {:?}", parent);
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create database directory: {:?}", parent)
                })?;
            }
        }

        // initialize database
        let db = TailgrantDb::new(&config.database)
            .await
            .context("failed to initialize database")?;
        info!("Running database migrations...");
        db.migrate()
            .await
            .context("failed to run database migrations")?;
        info!("Database initialized successfully");

        if config.tailscale.api_key.expose_secret().is_empty() {
            warn!("no tailscale api key configured (set TS_API_KEY)");
        }
        let client = TailscaleClient::new(
            config.tailscale.api_base_url.clone(),
            config.tailscale.tailnet.clone(),
            config.tailscale.api_key.clone(),
        );

        let runtime = Runtime::new(
            db.clone(),
            client,
            grant_types,
            Duration::from_secs(config.reconciler.sweep_interval_secs),
        );

        // resume everything that was mid-flight when the last worker died,
        // then make sure the reconciler singleton is up
        let resumed = runtime
            .resume_all()
            .await
            .context("failed to resume workflows")?;
        info!(resumed, "workflow resume complete");
        runtime
            .start_reconciler()
            .await
            .context("failed to start reconciler")?;

        // build router
        let app = crate::create_app(runtime.clone(), db);

        let addr: SocketAddr = config
            .server
            .listen_addr
            .parse()
            .context("invalid listen address")?;
        info!("starting http server on {}", addr);

        let listener = TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(runtime))
            .await
            .context("server error")?;

        Ok(())
    }
}

/// wait for ctrl-c, then stop the workflow drivers. Their state is
/// checkpointed; the next start resumes them.
async fn shutdown_signal<C: tailgrant_engine::resource::ResourceClient>(runtime: Runtime<C>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        return;
    }
    info!("shutting down; workflows will resume on next start");
    runtime.shutdown().await;
}
