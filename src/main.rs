mod api;
mod config;
mod cost;
mod error;
mod models;
mod providers;
mod refresh;
mod store;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use config::{load_config, AppConfig, CliOverrides, LogFormat};
use cost::CostWindow;
use error::AppError;
use providers::{build_adapter, ProviderGateway};
use refresh::{RefreshController, RefreshPolicy, RefreshScheduler};
use store::SnapshotStore;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "cost-board")]
#[command(about = "Cached cloud resource inventory and cost dashboard API")]
struct Cli {
    /// TOML config file; defaults to config.toml in the app home.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    port: Option<u16>,
    #[arg(long, global = true)]
    region: Option<String>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP API with periodic background refresh (default).
    Serve,
    /// Run one refresh cycle and print its statistics.
    Refresh,
    /// Query cost and usage for a date range, bypassing the cache.
    Cost {
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
    },
    /// Print the effective configuration.
    Config,
}

fn init_logging(cfg: &AppConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));

    // stdout carries command output
    match cfg.log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

struct Runtime {
    store: Arc<SnapshotStore>,
    gateway: Arc<ProviderGateway>,
    controller: Arc<RefreshController>,
}

async fn connect(cfg: &AppConfig) -> Result<Runtime, AppError> {
    let gateway = Arc::new(ProviderGateway::new(build_adapter(cfg).await?));
    gateway.verify().await?;
    let store = Arc::new(SnapshotStore::new());
    let controller = Arc::new(RefreshController::new(
        gateway.clone(),
        store.clone(),
        RefreshPolicy::from(cfg),
    ));
    Ok(Runtime {
        store,
        gateway,
        controller,
    })
}

async fn serve(cfg: &AppConfig) -> Result<(), AppError> {
    let cors = api::cors_layer(cfg)?;
    let runtime = connect(cfg).await?;
    let listener = api::bind(cfg).await?;

    let scheduler = RefreshScheduler::spawn(runtime.controller.clone(), cfg.refresh_interval());
    let state = Arc::new(api::AppState::new(
        runtime.store,
        runtime.controller,
        runtime.gateway,
    ));
    let served = api::serve(listener, api::router(state, cors), api::shutdown_signal()).await;
    scheduler.stop().await;
    served
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = Cli::parse();
    let cfg = load_config(
        cli.config.as_deref(),
        &CliOverrides {
            port: cli.port,
            aws_region: cli.region,
        },
    )?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            init_logging(&cfg);
            info!(
                provider = ?cfg.provider,
                region = %cfg.aws_region,
                interval_minutes = cfg.refresh_interval_minutes,
                "starting cost board"
            );
            serve(&cfg).await?;
        }
        Commands::Refresh => {
            init_logging(&cfg);
            let runtime = connect(&cfg).await?;
            let stats = runtime.controller.refresh_now().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Cost { start, end } => {
            init_logging(&cfg);
            let window =
                CostWindow::from_query(start.as_deref(), end.as_deref(), cfg.cost_window_days)?;
            let runtime = connect(&cfg).await?;
            let summary = runtime.gateway.fetch_costs(&window).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Config => {
            print!("{}", cfg.to_toml()?);
        }
    }

    Ok(())
}
