//! Head-truncation sampling policy.

use std::time::Instant;

use tracing::warn;

use crate::{LARGE_FLOW_BYTES, MIN_IP_PACKET_SIZE};

use super::{FlowKey, TrackedFlow};

/// Decides, per frame, whether a flow is still within its head budget.
///
/// A frame is accepted while the flow's counters - as they stood before the
/// frame arrived - are below both cutoffs. The frame that crosses a cutoff
/// is therefore itself accepted, and a first frame larger than the whole
/// byte budget is still recorded. Everything after the crossing is dropped
/// silently until the flow idles out of the table.
#[derive(Debug, Clone, Copy)]
pub struct Sampler {
    byte_cutoff: u64,
    packet_cutoff: u64,
}

impl Sampler {
    pub fn new(byte_cutoff: u64, packet_cutoff: u64) -> Self {
        Self {
            byte_cutoff,
            packet_cutoff,
        }
    }

    /// Fold one frame of `frame_len` on-wire bytes into `flow` and return
    /// whether the frame should be forwarded to the writer.
    ///
    /// Counters update on every frame, accepted or not, so `last_seen`
    /// keeps a cut-off flow alive in the table until it goes idle.
    pub fn sample(&self, key: &FlowKey, flow: &mut TrackedFlow, frame_len: u64, now: Instant) -> bool {
        let accept = flow.bytes < self.byte_cutoff && flow.packets < self.packet_cutoff;

        flow.packets += 1;
        flow.bytes += frame_len.saturating_sub(MIN_IP_PACKET_SIZE);
        flow.last_seen = now;

        if !accept && !flow.oversized_logged && flow.bytes > LARGE_FLOW_BYTES {
            warn!(flow = %key, bytes = flow.bytes, "flow crossed the 16 GiB large-flow threshold");
            flow.oversized_logged = true;
        }

        accept
    }
}
