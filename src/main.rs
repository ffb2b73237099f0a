//! Flowtap daemon.
//!
//! One sniff worker per (interface, ring) feeds a single writer through a
//! bounded queue; a tokio task serves /metrics and another forwards
//! SIGINT/SIGTERM to the writer for a clean finalize.

use tikv_jemallocator::Jemalloc;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::sync::Arc;
use std::thread;

use anyhow::Context;
use clap::Parser;
use crossbeam_channel::{bounded, unbounded};
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::EnvFilter;

use flowtap::capture::{PcapSource, SniffWorker};
use flowtap::config::{self, Cli};
use flowtap::metrics::{self, Registry};
use flowtap::writer::Writer;

/// Slots in the worker-to-writer queue. Deep enough that workers only block
/// when the disk genuinely cannot keep up with sampled traffic.
const WRITER_QUEUE_SLOTS: usize = 500_000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let rings = config::ring_count()?;
    let registry = Registry::new();

    // Losing the metrics endpoint is logged and ignored; losing capture
    // would not be.
    {
        let registry = Arc::clone(&registry);
        let addr = cli.metrics_address;
        tokio::spawn(async move {
            if let Err(e) = metrics::serve(addr, registry).await {
                tracing::error!("Metrics endpoint failed: {e}");
            }
        });
    }

    let (frame_tx, frame_rx) = bounded(WRITER_QUEUE_SLOTS);

    for interface in cli.interfaces() {
        tracing::info!("Starting capture on {interface} with {rings} workers");
        for worker in 0..rings {
            let source = PcapSource::open(&interface, &cli.filter)
                .with_context(|| format!("Failed to start capture on {interface}"))?;
            let sniffer = SniffWorker::new(&cli, &interface, worker, &registry, frame_tx.clone());
            thread::Builder::new()
                .name(format!("sniff-{interface}-{worker}"))
                .spawn(move || {
                    if let Err(e) = sniffer.run(source) {
                        tracing::error!("Capture failed: {e}");
                        std::process::exit(1);
                    }
                })
                .context("Failed to spawn sniff worker")?;
        }
    }
    // The writer treats a fully disconnected queue as end of capture, so the
    // main thread must not keep a sender alive.
    drop(frame_tx);

    let (shutdown_tx, shutdown_rx) = unbounded();
    tokio::spawn(async move {
        let mut sigterm = signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, shutting down");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, shutting down");
            }
        }

        let _ = shutdown_tx.send(());
    });

    let writer = Writer::new(
        cli.current_file_name(),
        cli.write_root.clone(),
        cli.compress,
        cli.rotation_interval(),
    );
    tokio::task::spawn_blocking(move || writer.run(frame_rx, shutdown_rx))
        .await
        .context("Writer task panicked")??;

    tracing::info!("Capture stopped");
    Ok(())
}
