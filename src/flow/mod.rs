//! Per-worker flow tracking.
//!
//! A flow is identified by its directional five-tuple: (A→B) and (B→A) are
//! distinct flows and are sampled independently. Each sniff worker owns one
//! [`FlowTable`] exclusively, so none of this is synchronized.

mod sampler;

pub use sampler::Sampler;

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};

/// Directional five-tuple identifying a flow.
///
/// The default value (protocol 0, unspecified addresses, zero ports) is the
/// "unclassified" key that all non-IP frames collapse into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub proto: u8,
    pub src: IpAddr,
    pub dst: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
}

impl Default for FlowKey {
    fn default() -> Self {
        Self {
            proto: 0,
            src: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            dst: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            src_port: 0,
            dst_port: 0,
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "proto={} src={}:{} dst={}:{}",
            self.proto, self.src, self.src_port, self.dst, self.dst_port
        )
    }
}

/// Sampling state for one tracked flow.
#[derive(Debug, Clone)]
pub struct TrackedFlow {
    /// Frames seen for this key, including dropped ones.
    pub packets: u64,
    /// Accumulated payload-ish bytes (frame length discounted by
    /// [`crate::MIN_IP_PACKET_SIZE`] per frame).
    pub bytes: u64,
    /// Timestamp of the most recent frame; drives expiry.
    pub last_seen: Instant,
    /// One-shot flag for the large-flow diagnostic.
    pub oversized_logged: bool,
}

impl TrackedFlow {
    fn new(now: Instant) -> Self {
        Self {
            packets: 0,
            bytes: 0,
            last_seen: now,
            oversized_logged: false,
        }
    }
}

/// Owning map from five-tuple to sampling state.
#[derive(Debug, Default)]
pub struct FlowTable {
    entries: HashMap<FlowKey, TrackedFlow>,
}

impl FlowTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live flows; exported as the active-flows gauge.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return the entry for `key`, creating a zero-initialized one if absent.
    /// The bool is true when the entry was just created.
    pub fn lookup_or_insert(&mut self, key: FlowKey, now: Instant) -> (&mut TrackedFlow, bool) {
        let mut created = false;
        let flow = self.entries.entry(key).or_insert_with(|| {
            created = true;
            TrackedFlow::new(now)
        });
        (flow, created)
    }

    /// Remove every flow idle for longer than `timeout` and return the byte
    /// counts of the removed entries (observed into the flow-size histogram
    /// by the caller). Running a second sweep with no traffic in between
    /// removes nothing.
    pub fn sweep(&mut self, now: Instant, timeout: Duration) -> Vec<u64> {
        let mut removed = Vec::new();
        self.entries.retain(|_, flow| {
            if now.saturating_duration_since(flow.last_seen) > timeout {
                removed.push(flow.bytes);
                false
            } else {
                true
            }
        });
        removed
    }
}
