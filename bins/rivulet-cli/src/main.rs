//! # Rivulet CLI
//!
//! Runs one event-forwarding pipeline described by a YAML document.
//!
//! ```bash
//! # Run a pipeline with liveness and metrics endpoints enabled
//! rivulet start -f pipeline.yml -l -m
//!
//! # Generate a skeleton configuration
//! rivulet generate \
//!   --port 8000 \
//!   --export-path ./share/pipeline.yaml \
//!   --instance.source.type kafka \
//!   --instance.source.specs.topic topic.source \
//!   --instance.source.specs.configurations "group.id=rivulet" \
//!   --instance.source.specs.configurations "bootstrap.servers=localhost:9093" \
//!   --instance.target.type s3 \
//!   --instance.target.specs.bucket events \
//!   --instance.target.specs.batchSize 100
//! ```

mod scaffold;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use rivulet_core::ConfigBuilder;
use rivulet_io::pipeline::{self, RunOptions};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const BANNER: &str = r#"
 ___ _          _     _
| _ (_)_ ___ _ | |___| |_
|   / \ V / || | / -_)  _|
|_|_\_|\_/ \_,_|_\___|\__|
"#;

#[derive(Parser, Debug)]
#[command(name = "rivulet")]
#[command(version)]
#[command(about = "Configurable event-forwarding daemon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start a pipeline from a configuration file
    #[command(long_about = "Initialize the stream described by the configuration file")]
    Start(StartArgs),
    /// Generate a scaffold configuration
    Generate(scaffold::GenerateArgs),
}

#[derive(clap::Args, Debug)]
struct StartArgs {
    /// Pipeline configuration file (.yml or .yaml)
    #[arg(short = 'f', long = "file")]
    file: String,

    /// Override the configured http server port
    #[arg(short = 'p', long = "port", default_value = "")]
    port: String,

    /// Serve the health check endpoint
    #[arg(short = 'l', long = "liveness")]
    liveness: bool,

    /// Serve the metrics endpoint
    #[arg(short = 'm', long = "metrics")]
    metrics: bool,

    /// Display verbose mode
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("failed to initialize stream: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Start(args) => start(args),
        Commands::Generate(args) => {
            initialize_logger(false);
            scaffold::run(&args)
        }
    }
}

fn start(args: StartArgs) -> Result<()> {
    initialize_logger(args.verbose);
    println!("{BANNER}\t\t\trelease: {}\n", release());

    let mut builder = ConfigBuilder::new();
    builder.set_file(&args.file);
    if !args.port.is_empty() {
        builder.set_port(&args.port);
    }
    if args.liveness {
        builder.enable_liveness();
    }
    if args.metrics {
        builder.enable_metrics();
    }

    let stream = builder.build()?;

    let prometheus = if builder.metrics_enabled() {
        Some(
            PrometheusBuilder::new()
                .install_recorder()
                .context("failed to install metrics recorder")?,
        )
    } else {
        None
    };

    let options = RunOptions {
        liveness: builder.liveness_enabled(),
        metrics: builder.metrics_enabled(),
        prometheus,
    };

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?
        .block_on(pipeline::run(stream, options))
}

fn initialize_logger(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Version shown in the startup banner; `VERSION` in the environment wins.
fn release() -> String {
    std::env::var("VERSION").unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_flags_parse() {
        let cli = Cli::parse_from(["rivulet", "start", "-f", "pipeline.yml", "-l", "-m", "-v"]);
        match cli.command {
            Commands::Start(args) => {
                assert_eq!(args.file, "pipeline.yml");
                assert!(args.liveness);
                assert!(args.metrics);
                assert!(args.verbose);
                assert!(args.port.is_empty());
            }
            _ => panic!("expected start"),
        }
    }

    #[test]
    fn release_falls_back_to_crate_version() {
        // VERSION is unset under the test harness.
        assert!(!release().is_empty());
    }
}
