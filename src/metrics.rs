//! Metrics registry and Prometheus text exposition.
//!
//! Workers batch their hot-path counters locally and flush them here every
//! few thousand frames, so the registry only sees coarse-grained atomic
//! traffic. The `/metrics` endpoint renders the whole registry in the
//! Prometheus text format.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use parking_lot::RwLock;

/// Bucket count for the flow-size histogram.
const FLOW_SIZE_BUCKETS: usize = 15;

/// Metric series for one (interface, worker) pair.
///
/// Gauges are `store`d, counters are `fetch_add`ed. All loads and stores are
/// relaxed; nothing here orders other memory.
#[derive(Default)]
pub struct WorkerMetrics {
    // Gauges.
    pub active_flows: AtomicU64,
    pub expired_flows: AtomicU64,
    pub nic_received: AtomicU64,
    pub nic_dropped: AtomicU64,
    pub nic_if_dropped: AtomicU64,
    // Counters.
    pub packets: AtomicU64,
    pub packets_output: AtomicU64,
    pub bytes: AtomicU64,
    pub bytes_output: AtomicU64,
    pub flows: AtomicU64,
    /// Cumulative time spent sweeping expired flows, in microseconds.
    pub expiry_micros: AtomicU64,
}

/// Process-wide histogram of expired-flow byte counts.
///
/// Exponential buckets, base 4, starting at 1024: 1 KiB, 4 KiB, ...,
/// 256 GiB, plus the implicit +Inf bucket.
pub struct FlowSizeHistogram {
    buckets: [AtomicU64; FLOW_SIZE_BUCKETS],
    inf: AtomicU64,
    sum: AtomicU64,
    count: AtomicU64,
}

impl FlowSizeHistogram {
    fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            inf: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    fn upper_bound(index: usize) -> u64 {
        1024u64 * 4u64.pow(index as u32)
    }

    pub fn observe(&self, value: u64) {
        match (0..FLOW_SIZE_BUCKETS).find(|&i| value <= Self::upper_bound(i)) {
            Some(i) => self.buckets[i].fetch_add(1, Ordering::Relaxed),
            None => self.inf.fetch_add(1, Ordering::Relaxed),
        };
        self.sum.fetch_add(value, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn render(&self, out: &mut String) {
        let name = "flowtap_flow_size_bytes";
        let _ = writeln!(out, "# HELP {name} Bytes per expired flow");
        let _ = writeln!(out, "# TYPE {name} histogram");
        let mut cumulative = 0u64;
        for i in 0..FLOW_SIZE_BUCKETS {
            cumulative += self.buckets[i].load(Ordering::Relaxed);
            let _ = writeln!(
                out,
                "{name}_bucket{{le=\"{}\"}} {cumulative}",
                Self::upper_bound(i)
            );
        }
        cumulative += self.inf.load(Ordering::Relaxed);
        let _ = writeln!(out, "{name}_bucket{{le=\"+Inf\"}} {cumulative}");
        let _ = writeln!(out, "{name}_sum {}", self.sum.load(Ordering::Relaxed));
        let _ = writeln!(out, "{name}_count {}", self.count.load(Ordering::Relaxed));
    }
}

/// Shared registry: one [`WorkerMetrics`] per (interface, worker) plus the
/// process-wide flow-size histogram.
pub struct Registry {
    workers: RwLock<HashMap<(String, usize), Arc<WorkerMetrics>>>,
    flow_size: FlowSizeHistogram,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            workers: RwLock::new(HashMap::new()),
            flow_size: FlowSizeHistogram::new(),
        })
    }

    /// Series handle for one worker. Registered on first use; workers hold
    /// the Arc so the hot path never touches the label map.
    pub fn worker(&self, interface: &str, worker: usize) -> Arc<WorkerMetrics> {
        if let Some(series) = self.workers.read().get(&(interface.to_string(), worker)) {
            return Arc::clone(series);
        }
        let mut workers = self.workers.write();
        Arc::clone(
            workers
                .entry((interface.to_string(), worker))
                .or_default(),
        )
    }

    pub fn flow_size(&self) -> &FlowSizeHistogram {
        &self.flow_size
    }

    /// Render the whole registry in Prometheus text format.
    pub fn render(&self) -> String {
        let workers = self.workers.read();
        let mut labels: Vec<&(String, usize)> = workers.keys().collect();
        labels.sort();

        let mut out = String::new();
        let load = |s: &WorkerMetrics, field: &str| match field {
            "active_flow_count" => s.active_flows.load(Ordering::Relaxed),
            "expired_flow_count" => s.expired_flows.load(Ordering::Relaxed),
            "packet_nic_received" => s.nic_received.load(Ordering::Relaxed),
            "packet_nic_dropped" => s.nic_dropped.load(Ordering::Relaxed),
            "packet_nic_if_dropped" => s.nic_if_dropped.load(Ordering::Relaxed),
            "packet_count" => s.packets.load(Ordering::Relaxed),
            "packet_output_count" => s.packets_output.load(Ordering::Relaxed),
            "bytes_total" => s.bytes.load(Ordering::Relaxed),
            "bytes_output_total" => s.bytes_output.load(Ordering::Relaxed),
            "flow_count" => s.flows.load(Ordering::Relaxed),
            _ => unreachable!(),
        };

        let series = [
            ("active_flow_count", "gauge", "Current number of active flows"),
            ("expired_flow_count", "gauge", "Flows expired in the last sweep"),
            ("packet_nic_received", "gauge", "Packets received by the NIC"),
            ("packet_nic_dropped", "gauge", "Packets dropped by the NIC"),
            ("packet_nic_if_dropped", "gauge", "Packets dropped at the interface"),
            ("packet_count", "counter", "Packets seen"),
            ("packet_output_count", "counter", "Packets written after sampling"),
            ("bytes_total", "counter", "Bytes seen"),
            ("bytes_output_total", "counter", "Bytes written after sampling"),
            ("flow_count", "counter", "Flows seen"),
        ];

        for (field, kind, help) in series {
            let _ = writeln!(out, "# HELP flowtap_{field} {help}");
            let _ = writeln!(out, "# TYPE flowtap_{field} {kind}");
            for key in &labels {
                let _ = writeln!(
                    out,
                    "flowtap_{field}{{interface=\"{}\",worker=\"{}\"}} {}",
                    key.0,
                    key.1,
                    load(&workers[*key], field)
                );
            }
        }

        let _ = writeln!(
            out,
            "# HELP flowtap_expired_flow_duration_seconds_sum Total time spent expiring flows"
        );
        let _ = writeln!(out, "# TYPE flowtap_expired_flow_duration_seconds_sum counter");
        for key in &labels {
            let micros = workers[*key].expiry_micros.load(Ordering::Relaxed);
            let _ = writeln!(
                out,
                "flowtap_expired_flow_duration_seconds_sum{{interface=\"{}\",worker=\"{}\"}} {}",
                key.0,
                key.1,
                micros as f64 / 1e6
            );
        }

        self.flow_size.render(&mut out);
        out
    }
}

/// Build the `/metrics` router.
pub fn router(registry: Arc<Registry>) -> Router {
    Router::new()
        .route("/metrics", get(handle_metrics))
        .with_state(registry)
}

async fn handle_metrics(State(registry): State<Arc<Registry>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        registry.render(),
    )
}

/// Serve `/metrics` until the process exits. Bind or serve errors are
/// returned to the caller, which logs and ignores them: losing the metrics
/// endpoint must not stop the capture.
pub async fn serve(addr: SocketAddr, registry: Arc<Registry>) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics listening on http://{addr}/metrics");
    axum::serve(listener, router(registry)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[test]
    fn histogram_buckets_are_exponential_base_four() {
        assert_eq!(FlowSizeHistogram::upper_bound(0), 1024);
        assert_eq!(FlowSizeHistogram::upper_bound(1), 4096);
        assert_eq!(FlowSizeHistogram::upper_bound(14), 1024 * 4u64.pow(14));
    }

    #[test]
    fn histogram_observation_is_cumulative_in_render() {
        let histogram = FlowSizeHistogram::new();
        histogram.observe(100); // le=1024
        histogram.observe(2000); // le=4096
        histogram.observe(u64::MAX / 2); // +Inf

        let mut out = String::new();
        histogram.render(&mut out);
        assert!(out.contains("flowtap_flow_size_bytes_bucket{le=\"1024\"} 1"));
        assert!(out.contains("flowtap_flow_size_bytes_bucket{le=\"4096\"} 2"));
        assert!(out.contains("flowtap_flow_size_bytes_bucket{le=\"+Inf\"} 3"));
        assert!(out.contains("flowtap_flow_size_bytes_count 3"));
    }

    #[test]
    fn boundary_value_lands_in_its_bucket() {
        let histogram = FlowSizeHistogram::new();
        histogram.observe(1024);
        assert_eq!(histogram.buckets[0].load(Ordering::Relaxed), 1);
    }

    #[test]
    fn worker_series_are_rendered_with_labels() {
        let registry = Registry::new();
        let series = registry.worker("eth0", 0);
        series.packets.fetch_add(1234, Ordering::Relaxed);
        series.active_flows.store(7, Ordering::Relaxed);

        let text = registry.render();
        assert!(text.contains("flowtap_packet_count{interface=\"eth0\",worker=\"0\"} 1234"));
        assert!(text.contains("flowtap_active_flow_count{interface=\"eth0\",worker=\"0\"} 7"));
    }

    #[test]
    fn worker_handle_is_shared() {
        let registry = Registry::new();
        registry
            .worker("eth0", 1)
            .packets
            .fetch_add(5, Ordering::Relaxed);
        registry
            .worker("eth0", 1)
            .packets
            .fetch_add(5, Ordering::Relaxed);
        assert!(registry
            .render()
            .contains("flowtap_packet_count{interface=\"eth0\",worker=\"1\"} 10"));
    }

    #[test]
    fn expiry_seconds_render_as_fractional() {
        let registry = Registry::new();
        registry
            .worker("eth0", 0)
            .expiry_micros
            .fetch_add(1_500_000, Ordering::Relaxed);
        assert!(registry.render().contains(
            "flowtap_expired_flow_duration_seconds_sum{interface=\"eth0\",worker=\"0\"} 1.5"
        ));
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_text_exposition() {
        let registry = Registry::new();
        registry.worker("eth0", 0);
        let app = router(registry);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; version=0.0.4"
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("# TYPE flowtap_packet_count counter"));
        assert!(text.contains("# TYPE flowtap_flow_size_bytes histogram"));
    }
}
