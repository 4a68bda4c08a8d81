use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use floorclaw::config::Config;
use floorclaw::notify::AnyNotifier;
use floorclaw::runner::{run_build, run_scan};
use floorclaw::server::{ApiState, serve};

#[derive(Parser)]
#[command(name = "floorclaw", about = "Laptop market-floor estimator and hot-deal scanner")]
struct Cli {
    /// Price database file (overrides PRICES_FILE)
    #[arg(long, global = true)]
    prices: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch every target in this batch and refresh the price database
    Build {
        /// Targets file (overrides TARGETS_FILE)
        #[arg(long)]
        targets: Option<PathBuf>,
        #[arg(long)]
        batch_index: Option<usize>,
        #[arg(long)]
        total_batches: Option<usize>,
    },
    /// Match the watched search page against the price database and notify deals
    Scan {
        /// Search URL (overrides SCAN_URL)
        #[arg(long)]
        url: Option<String>,
        /// Seen-set file (overrides SEEN_FILE)
        #[arg(long)]
        seen: Option<PathBuf>,
    },
    /// Serve the read-only lookup API
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let mut cfg = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&cfg.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    if let Some(p) = cli.prices {
        cfg.prices_file = p;
    }

    match cli.command {
        Command::Build {
            targets,
            batch_index,
            total_batches,
        } => {
            if let Some(t) = targets {
                cfg.targets_file = t;
            }
            cfg.batch_index = batch_index.unwrap_or(cfg.batch_index);
            cfg.total_batches = total_batches.unwrap_or(cfg.total_batches).max(1);
            anyhow::ensure!(
                cfg.batch_index < cfg.total_batches,
                "batch index {} out of range for {} batches",
                cfg.batch_index,
                cfg.total_batches
            );
            let summary = run_build(&cfg).await?;
            info!("[build] {}", serde_json::to_string(&summary)?);
        }
        Command::Scan { url, seen } => {
            if url.is_some() {
                cfg.scan_url = url;
            }
            if let Some(s) = seen {
                cfg.seen_file = s;
            }
            let notifier = AnyNotifier::from_endpoint(cfg.notify_url.as_deref())
                .context("building notifier")?;
            let summary = run_scan(&cfg, &notifier).await?;
            info!("[scan] {}", serde_json::to_string(&summary)?);
        }
        Command::Serve { port } => {
            let state = ApiState {
                prices_file: cfg.prices_file.clone(),
                policy: cfg.merge,
            };
            serve(state, port.unwrap_or(cfg.api_port))
                .await
                .context("lookup server")?;
        }
    }
    Ok(())
}
