use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use amqp_sampler::config::{self, SamplerKind};
use amqp_sampler::env::apply_env;
use amqp_sampler::runner::{self, RunPlan};

#[derive(Parser)]
#[command(name = "amqp-sampler")]
#[command(about = "Publish/consume load sampler for RabbitMQ")]
struct Cli {
    /// Operation each virtual user performs
    #[arg(long, value_enum, default_value = "publish")]
    mode: SamplerKind,

    /// Number of virtual users
    #[arg(long, default_value = "1")]
    threads: usize,

    /// Samples per virtual user. Loops until stopped when omitted with --duration-secs
    #[arg(long)]
    loops: Option<u64>,

    /// Stop after this many seconds
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Config file; searched for when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write a default config file to this path and exit
    #[arg(long)]
    init_config: Option<PathBuf>,
}

impl Cli {
    fn plan(&self) -> RunPlan {
        let duration = self.duration_secs.map(Duration::from_secs);
        RunPlan {
            kind: self.mode,
            threads: self.threads,
            loops: match (self.loops, duration) {
                (Some(loops), _) => Some(loops),
                (None, Some(_)) => None,
                (None, None) => Some(1),
            },
            duration,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Some(path) = &cli.init_config {
        return config::create_default_config_file(path);
    }

    let mut config = config::load_config(cli.config.as_deref())?;
    apply_env(&mut config)?;
    config.validate(cli.mode)?;

    let plan = cli.plan();
    info!(label = %config.label(plan.kind), hosts = %config.host, "Configuration loaded");

    let (stop, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, interrupting samplers");
                let _ = stop.send(true);
            }
            Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });

    let summary = runner::run(Arc::new(config), plan, shutdown).await?;
    eprintln!("{}", serde_json::to_string(&summary)?);
    Ok(())
}
