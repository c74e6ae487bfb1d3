//! Bluegate forward proxy - Entry point.
//!
//! Accepts HTTP clients, answers requests for blacklisted domains with a
//! blocked page and relays everything else upstream, recording activity in
//! a log file through a background logging pipeline.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bluegate::blacklist::{DomainBlacklist, RULE_DUMP_LIMIT};
use bluegate::config::Config;
use bluegate::pipeline::{Pipeline, PipelineSettings};
use bluegate::server::{ProxyServer, ShutdownSignal, install_signal_handler};

/// A multithreaded forward proxy with a domain blacklist.
#[derive(Parser, Debug)]
#[command(name = "bluegate")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on (overrides config)
    port: Option<u16>,

    /// Path to the configuration file
    #[arg(short, long, env = "CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

fn load_config(args: &Args) -> Result<Config> {
    let config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::default(),
    };
    Ok(match args.port {
        Some(port) => {
            info!(port, "Listen port overridden via CLI");
            config.with_port(port)
        }
        None => config,
    })
}

fn run(args: &Args) -> Result<()> {
    let config = load_config(args)?;

    bluegate::metrics::init(&config.metrics).context("Failed to initialize metrics")?;
    if config.metrics.enabled {
        info!("Metrics enabled on {}", config.metrics.listen);
    }

    let blacklist =
        DomainBlacklist::from_settings(&config.blacklist).context("Failed to load blacklist")?;
    blacklist.log_rules(RULE_DUMP_LIMIT);

    let log_file = File::create(&config.log_file)
        .with_context(|| format!("Failed to create log file {}", config.log_file.display()))?;

    let mut server = ProxyServer::from_config(&config)
        .with_context(|| format!("Failed to listen on {}", config.listen))?;
    info!("Starting Bluegate on {}", server.local_addr()?);

    let mut pipeline = Pipeline::start(
        PipelineSettings::from(&config.pool),
        Arc::new(blacklist),
        BufWriter::new(log_file),
    )
    .context("Failed to start pipeline")?;
    pipeline.write("main thread started\n");

    let signal = ShutdownSignal::new();
    install_signal_handler(signal.clone()).context("Failed to install signal handler")?;

    let accepted = server.serve(&mut pipeline, &signal);
    drop(server);

    let report = pipeline.shutdown();
    info!(
        accepted,
        abandoned = report.abandoned,
        workers = report.workers,
        bytes_written = report.bytes_written,
        "Shutdown complete."
    );
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    run(&args)
}
