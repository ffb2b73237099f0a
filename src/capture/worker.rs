//! Sniff worker: one capture handle driving decode, flow tracking and
//! sampling, feeding accepted frames to the shared writer queue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use tracing::{debug, info};

use crate::config::Cli;
use crate::decode;
use crate::error::CaptureError;
use crate::flow::{FlowTable, Sampler};
use crate::metrics::{Registry, WorkerMetrics};
use crate::HOUSEKEEPING_FRAMES;

use super::{Frame, NicStats, PcapSource, Read};

use std::sync::atomic::Ordering::Relaxed;

/// Hot-path counters, kept thread-local and flushed to the registry during
/// housekeeping so the per-frame path never touches shared atomics.
#[derive(Debug, Default)]
struct LocalCounters {
    packets: u64,
    bytes: u64,
    output_packets: u64,
    output_bytes: u64,
    flows: u64,
}

impl LocalCounters {
    fn flush(&mut self, series: &WorkerMetrics) {
        series.packets.fetch_add(self.packets, Relaxed);
        series.bytes.fetch_add(self.bytes, Relaxed);
        series.packets_output.fetch_add(self.output_packets, Relaxed);
        series.bytes_output.fetch_add(self.output_bytes, Relaxed);
        series.flows.fetch_add(self.flows, Relaxed);
        *self = Self::default();
    }
}

/// One capture worker. Each worker owns its flow table outright; workers on
/// the same interface never share state, so the same flow may be sampled by
/// more than one ring.
pub struct SniffWorker {
    interface: String,
    worker: usize,
    sampler: Sampler,
    table: FlowTable,
    time_interval: Duration,
    flow_timeout: Duration,
    tx: Sender<Frame>,
    registry: Arc<Registry>,
    series: Arc<WorkerMetrics>,
    counters: LocalCounters,
    last_sweep: Instant,
}

impl SniffWorker {
    pub fn new(
        cli: &Cli,
        interface: &str,
        worker: usize,
        registry: &Arc<Registry>,
        tx: Sender<Frame>,
    ) -> Self {
        Self {
            interface: interface.to_string(),
            worker,
            sampler: Sampler::new(cli.byte_cutoff, cli.packet_cutoff),
            table: FlowTable::new(),
            time_interval: cli.time_interval(),
            flow_timeout: cli.flow_timeout(),
            tx,
            registry: Arc::clone(registry),
            series: registry.worker(interface, worker),
            counters: LocalCounters::default(),
            last_sweep: Instant::now(),
        }
    }

    /// Drive the capture until the handle reports end of capture or the
    /// writer goes away. Capture errors bubble up and are fatal to the
    /// process.
    pub fn run(mut self, mut source: PcapSource) -> Result<(), CaptureError> {
        info!(
            interface = %self.interface,
            worker = self.worker,
            "Starting sniff worker"
        );

        let mut since_housekeeping = 0u64;
        loop {
            // The borrow of the read buffer must end before the handle can
            // be asked for stats, hence the two-step shape.
            let writer_alive = match source.read_next()? {
                Read::Timeout => continue,
                Read::Eof => {
                    debug!(interface = %self.interface, worker = self.worker, "End of capture");
                    return Ok(());
                }
                Read::Frame { ts, orig_len, data } => self.process(ts, orig_len, data, Instant::now()),
            };

            if !writer_alive {
                debug!(
                    interface = %self.interface,
                    worker = self.worker,
                    "Writer queue closed, stopping"
                );
                return Ok(());
            }

            since_housekeeping += 1;
            if since_housekeeping == HOUSEKEEPING_FRAMES {
                since_housekeeping = 0;
                let stats = source.stats()?;
                self.housekeeping(stats, Instant::now());
            }
        }
    }

    /// Count, classify and sample one frame. Accepted frames are deep-copied
    /// into the writer queue, blocking when it is full - the only
    /// back-pressure in the pipeline. Returns false once the writer side has
    /// disconnected.
    fn process(&mut self, ts: Duration, orig_len: u32, data: &[u8], now: Instant) -> bool {
        self.counters.packets += 1;
        self.counters.bytes += data.len() as u64;

        let key = decode::flow_key(data);
        let (flow, created) = self.table.lookup_or_insert(key, now);
        if created {
            self.counters.flows += 1;
        }

        if self.sampler.sample(&key, flow, data.len() as u64, now) {
            self.counters.output_packets += 1;
            self.counters.output_bytes += data.len() as u64;
            let frame = Frame {
                ts,
                orig_len,
                data: data.to_vec(),
            };
            if self.tx.send(frame).is_err() {
                return false;
            }
        }
        true
    }

    /// Periodic step: NIC gauges, the expiry sweep when due, and the
    /// counter flush.
    fn housekeeping(&mut self, stats: NicStats, now: Instant) {
        self.series.nic_received.store(stats.received, Relaxed);
        self.series.nic_dropped.store(stats.dropped, Relaxed);
        self.series.nic_if_dropped.store(stats.if_dropped, Relaxed);

        if now.saturating_duration_since(self.last_sweep) > self.time_interval {
            self.last_sweep = now;

            let sweep_started = Instant::now();
            let removed = self.table.sweep(now, self.flow_timeout);
            let elapsed = sweep_started.elapsed();

            for &bytes in &removed {
                self.registry.flow_size().observe(bytes);
            }
            self.series.expired_flows.store(removed.len() as u64, Relaxed);
            self.series
                .expiry_micros
                .fetch_add(elapsed.as_micros() as u64, Relaxed);

            info!(
                interface = %self.interface,
                worker = self.worker,
                flows = self.table.len(),
                removed = removed.len(),
                packets = self.counters.packets,
                output = self.counters.output_packets,
                nic_received = stats.received,
                nic_dropped = stats.dropped,
                "Sweep complete"
            );
        }

        self.series.active_flows.store(self.table.len() as u64, Relaxed);
        self.counters.flush(&self.series);
    }
}
