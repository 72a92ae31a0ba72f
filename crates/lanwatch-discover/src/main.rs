//! CLI entry point for the lanwatch scan engine.

use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::{fmt, EnvFilter};

use lanwatch_core::{ScanMethod, ScanRequest, SubnetSelector};
use lanwatch_history::JsonlHistoryStore;

use lanwatch_discover::config::DiscoverConfig;
use lanwatch_discover::engine::ScanEngine;
use lanwatch_discover::jobs::JobManager;

#[derive(Parser)]
#[command(name = "lanwatch")]
#[command(about = "LAN host discovery and scan orchestration")]
struct Cli {
    /// Config file prefix (default: lanwatch).
    #[arg(short, long, default_value = "lanwatch", global = true)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan and print the merged device set.
    Devices(ScanArgs),
    /// List the locally attached ranges.
    Subnets,
    /// Run a scan as a tracked job, polling until it finishes.
    Scan(ScanArgs),
    /// Show recently finished jobs.
    History {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
    /// Show which probe backends are usable on this host, and the
    /// enrichment passes a deep scan runs.
    Backends,
}

#[derive(Args)]
struct ScanArgs {
    /// CIDR to scan, or "all" for every local range.
    #[arg(short, long, default_value = "all")]
    subnet: String,

    /// Backend: auto, arp-scan, nmap, ping.
    #[arg(short, long, default_value = "auto")]
    method: String,

    /// Report non-responding hosts (ping sweep only).
    #[arg(long)]
    include_offline: bool,

    /// Run the enrichment probes.
    #[arg(long)]
    deep: bool,
}

impl ScanArgs {
    fn request(&self) -> anyhow::Result<ScanRequest> {
        let subnet: SubnetSelector = self.subnet.parse()?;
        let method: ScanMethod = self.method.parse()?;
        Ok(ScanRequest::new(subnet, method)
            .with_offline(self.include_offline)
            .with_deep(self.deep))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let config = load_discover_config(&cli.config)?;
    let engine = Arc::new(ScanEngine::from_config(&config));

    match cli.command {
        Command::Devices(args) => {
            let devices = engine.discover(&args.request()?).await?;
            print_json(&json!({ "devices": devices }))?;
        }
        Command::Subnets => {
            let subnets: Vec<String> = engine
                .subnets()
                .await?
                .iter()
                .map(ToString::to_string)
                .collect();
            print_json(&json!({ "subnets": subnets, "supports_all": true }))?;
        }
        Command::Scan(args) => {
            let manager = job_manager(engine, &config)?;
            let id = manager.start(args.request()?);
            let mut ticker = tokio::time::interval(manager.poll_interval());

            let snapshot = loop {
                ticker.tick().await;
                let snapshot = manager.snapshot(id)?;
                tracing::info!(
                    job_id = %id,
                    status = %snapshot.job.status,
                    progress = snapshot.job.progress,
                    "Job status"
                );
                if snapshot.job.is_terminal() {
                    break snapshot;
                }
            };
            print_json(&snapshot)?;
        }
        Command::History { limit } => {
            let manager = job_manager(engine, &config)?;
            let history = manager.history(limit).await?;
            print_json(&json!({ "history": history }))?;
        }
        Command::Backends => {
            let backends: Vec<_> = engine
                .chain()
                .availability()
                .into_iter()
                .map(|(method, available)| json!({ "method": method, "available": available }))
                .collect();
            print_json(&json!({
                "backends": backends,
                "enrichment": engine.enricher().probe_sources(),
                "reverse_dns": engine.names_hosts(),
            }))?;
        }
    }

    Ok(())
}

fn job_manager(engine: Arc<ScanEngine>, config: &DiscoverConfig) -> anyhow::Result<JobManager> {
    let history = Arc::new(JsonlHistoryStore::new(&config.history_path)?);
    tracing::debug!(path = %history.path().display(), "Using history store");
    Ok(JobManager::new(engine, history, config))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_discover_config(file_prefix: &str) -> anyhow::Result<DiscoverConfig> {
    let cfg = config::Config::builder()
        .add_source(config::File::with_name(file_prefix).required(false))
        .add_source(
            config::Environment::with_prefix("LANWATCH_DISCOVER")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    match cfg.get::<DiscoverConfig>("discover") {
        Ok(c) => Ok(c),
        Err(_) => Ok(DiscoverConfig::default()),
    }
}
