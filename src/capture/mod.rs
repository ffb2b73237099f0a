//! Packet capture.
//!
//! [`PcapSource`] wraps a live libpcap handle (promiscuous, jumbo snap
//! length, kernel BPF filter). [`Frame`] is the record handed from a sniff
//! worker to the writer.

mod worker;

pub use worker::SniffWorker;

use std::time::Duration;

use pcap::{Active, Capture};

use crate::error::CaptureError;
use crate::MAX_ETHERNET_MTU;

/// A captured frame on its way from a sniff worker to the writer.
///
/// Owns a deep copy of the packet bytes: the capture handle reuses its read
/// buffer on the next read, so the zero-copy slice must not escape the
/// worker loop.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Capture timestamp (seconds and microseconds since the epoch),
    /// preserved from the handle byte-for-byte.
    pub ts: Duration,
    /// On-wire length; larger than `data.len()` when the snap length
    /// truncated the frame.
    pub orig_len: u32,
    pub data: Vec<u8>,
}

/// NIC counters reported by the capture handle.
#[derive(Debug, Clone, Copy, Default)]
pub struct NicStats {
    pub received: u64,
    pub dropped: u64,
    pub if_dropped: u64,
}

/// One read from the capture handle.
pub enum Read<'a> {
    /// A frame, borrowed from the handle's read buffer.
    Frame {
        ts: Duration,
        orig_len: u32,
        data: &'a [u8],
    },
    /// The libpcap read timeout elapsed with no traffic.
    Timeout,
    /// End of capture; clean termination.
    Eof,
}

/// Live capture handle on one interface.
pub struct PcapSource {
    handle: Capture<Active>,
}

impl PcapSource {
    /// Open `interface` promiscuously with the jumbo-frame snap length and
    /// install `filter`.
    pub fn open(interface: &str, filter: &str) -> Result<Self, CaptureError> {
        let inactive = Capture::from_device(interface)
            .map_err(|e| open_error(interface, e))?
            .promisc(true)
            .snaplen(MAX_ETHERNET_MTU as i32)
            .timeout(1000);

        let mut handle = inactive.open().map_err(|e| open_error(interface, e))?;
        handle
            .filter(filter, true)
            .map_err(|source| CaptureError::Filter {
                filter: filter.to_string(),
                source,
            })?;

        Ok(Self { handle })
    }

    /// Blocking read of the next frame. Timeouts are surfaced so the caller
    /// can keep looping; any error other than end-of-capture is fatal.
    pub fn read_next(&mut self) -> Result<Read<'_>, CaptureError> {
        match self.handle.next_packet() {
            Ok(packet) => Ok(Read::Frame {
                ts: Duration::new(
                    packet.header.ts.tv_sec as u64,
                    packet.header.ts.tv_usec as u32 * 1000,
                ),
                orig_len: packet.header.len,
                data: packet.data,
            }),
            Err(pcap::Error::TimeoutExpired) => Ok(Read::Timeout),
            Err(pcap::Error::NoMorePackets) => Ok(Read::Eof),
            Err(e) => Err(CaptureError::Read(e)),
        }
    }

    pub fn stats(&mut self) -> Result<NicStats, CaptureError> {
        let stats = self.handle.stats()?;
        Ok(NicStats {
            received: stats.received as u64,
            dropped: stats.dropped as u64,
            if_dropped: stats.if_dropped as u64,
        })
    }
}

fn open_error(interface: &str, source: pcap::Error) -> CaptureError {
    let msg = source.to_string();
    if msg.contains("permission") || msg.contains("Operation not permitted") {
        CaptureError::InsufficientPermissions
    } else {
        CaptureError::Open {
            interface: interface.to_string(),
            source,
        }
    }
}
