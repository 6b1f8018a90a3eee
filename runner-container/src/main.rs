use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use ingest_core::config::load_config;
use ingest_core::sink::hbase::HBaseStore;
use ingest_core::source::kafka::KafkaSource;
use ingest_core::supervisor::{Outcome, Supervisor};
use ingest_core::telemetry::init_tracing;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(version, about = "Streams Kafka records into HBase in batches", long_about = None)]
struct Args {
    /// YAML config file. Without it, `INGEST_CONFIG` or the built-in defaults are used.
    #[arg(short, long, env = "INGEST_CONFIG_PATH")]
    config: Option<String>,
}

/// This is the entry point for running a long-running ingestion job on container
/// hosting services like docker-compose, AWS EKS, ECS, etc.
///
/// What it does at a high-level:
///     Load config.
///     Wait for HBase, make sure the table exists.
///     Main loop runs until a shutdown signal is received:
///         - consume from the kafka topic
///         - write full batches to HBase, then commit their offsets
///     On shutdown, flush the partial batch and commit it.
///
/// Fatal errors end the process with a non-zero status so the process
/// manager restarts it from the last committed offset.
#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();

    match run(args).await {
        Ok(outcome) => outcome.into(),
        Err(e) => {
            error!("Failed to start ingestion: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<Outcome> {
    let config = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    info!(
        topic = %config.source.topic,
        table = %config.sink.table_name,
        batch_size = config.processing.batch_size,
        "Loaded configuration"
    );

    let store = HBaseStore::new(&config.sink, config.processing.connect_timeout())
        .context("Failed to build HBase REST client")?;
    let source_options = config.source.clone();

    let outcome = Supervisor::new(config)
        .supervise(
            store,
            move || async move { KafkaSource::new(&source_options).await },
            shutdown_signal(),
        )
        .await;
    Ok(outcome)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl-c"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
