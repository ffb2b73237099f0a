//! Runtime configuration: CLI flags plus the ring-count environment variable.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::error::ConfigError;

/// Rings (capture workers) per interface.
pub const RINGS_ENV: &str = "FLOWTAP_NUM_RINGS";

#[derive(Parser, Debug, Clone)]
#[command(name = "flowtap")]
#[command(about = "Flow-sampling traffic recorder with rotating pcap output")]
pub struct Cli {
    /// Address to serve /metrics on
    #[arg(long = "metrics-address", default_value = "0.0.0.0:8080")]
    pub metrics_address: SocketAddr,

    /// Comma-separated list of interfaces to capture on
    #[arg(long, default_value = "eth0")]
    pub interface: String,

    /// BPF filter installed on every capture handle
    #[arg(long, default_value = "ip or ip6")]
    pub filter: String,

    /// Minimum seconds between flow-table sweeps
    #[arg(long = "timeinterval", default_value_t = 5)]
    pub time_interval_secs: u64,

    /// Seconds of inactivity before a flow expires
    #[arg(long = "flowtimeout", default_value_t = 5)]
    pub flow_timeout_secs: u64,

    /// Stop recording a flow after this many payload bytes
    #[arg(long = "bytecutoff", default_value_t = 8192)]
    pub byte_cutoff: u64,

    /// Stop recording a flow after this many packets
    #[arg(long = "packetcutoff", default_value_t = 100)]
    pub packet_cutoff: u64,

    /// Root of the rotated output tree (<write>/yyyy/mm/dd/ts.pcap)
    #[arg(long = "write", default_value = "out")]
    pub write_root: PathBuf,

    /// Gzip pcaps as they are written
    #[arg(long)]
    pub compress: bool,

    /// Seconds between pcap rotations
    #[arg(long = "rotationinterval", default_value_t = 300)]
    pub rotation_interval_secs: u64,
}

impl Cli {
    pub fn interfaces(&self) -> Vec<String> {
        self.interface.split(',').map(str::to_string).collect()
    }

    pub fn time_interval(&self) -> Duration {
        Duration::from_secs(self.time_interval_secs)
    }

    pub fn flow_timeout(&self) -> Duration {
        Duration::from_secs(self.flow_timeout_secs)
    }

    pub fn rotation_interval(&self) -> Duration {
        Duration::from_secs(self.rotation_interval_secs)
    }

    /// Name of the in-progress capture file, in the working directory.
    /// Uses the raw interface flag, so a multi-interface run shares one
    /// current file.
    pub fn current_file_name(&self) -> PathBuf {
        PathBuf::from(format!("{}_current.pcap.tmp", self.interface))
    }
}

/// Rings per interface from the environment, default 1. A set-but-invalid
/// value is a hard error rather than a silent fallback.
pub fn ring_count() -> Result<usize, ConfigError> {
    parse_ring_count(std::env::var(RINGS_ENV).ok().as_deref())
}

fn parse_ring_count(value: Option<&str>) -> Result<usize, ConfigError> {
    match value {
        Some(value) => value
            .parse::<usize>()
            .ok()
            .filter(|&n| n >= 1)
            .ok_or_else(|| ConfigError::InvalidEnv {
                var: RINGS_ENV,
                value: value.to_string(),
            }),
        None => Ok(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("flowtap").chain(args.iter().copied()))
    }

    #[test]
    fn defaults_match_documented_values() {
        let cli = parse(&[]);
        assert_eq!(cli.interface, "eth0");
        assert_eq!(cli.filter, "ip or ip6");
        assert_eq!(cli.byte_cutoff, 8192);
        assert_eq!(cli.packet_cutoff, 100);
        assert_eq!(cli.time_interval(), Duration::from_secs(5));
        assert_eq!(cli.flow_timeout(), Duration::from_secs(5));
        assert_eq!(cli.rotation_interval(), Duration::from_secs(300));
        assert_eq!(cli.write_root, PathBuf::from("out"));
        assert!(!cli.compress);
    }

    #[test]
    fn interface_list_splits_on_commas() {
        let cli = parse(&["--interface", "eth0,eth1"]);
        assert_eq!(cli.interfaces(), vec!["eth0", "eth1"]);
    }

    #[test]
    fn current_file_name_uses_raw_interface_flag() {
        let cli = parse(&["--interface", "eth0,eth1"]);
        assert_eq!(
            cli.current_file_name(),
            PathBuf::from("eth0,eth1_current.pcap.tmp")
        );
    }

    #[test]
    fn ring_count_defaults_to_one() {
        assert_eq!(parse_ring_count(None).unwrap(), 1);
    }

    #[test]
    fn ring_count_parses_positive_integers() {
        assert_eq!(parse_ring_count(Some("4")).unwrap(), 4);
    }

    #[test]
    fn ring_count_rejects_garbage_and_zero() {
        assert!(parse_ring_count(Some("zero")).is_err());
        assert!(parse_ring_count(Some("0")).is_err());
        assert!(parse_ring_count(Some("-2")).is_err());
    }

    #[test]
    fn flag_names_match_historical_spelling() {
        let cli = parse(&[
            "--timeinterval",
            "10",
            "--flowtimeout",
            "30",
            "--bytecutoff",
            "4096",
            "--packetcutoff",
            "50",
            "--rotationinterval",
            "60",
            "--write",
            "/tmp/captures",
            "--compress",
        ]);
        assert_eq!(cli.time_interval_secs, 10);
        assert_eq!(cli.flow_timeout_secs, 30);
        assert_eq!(cli.byte_cutoff, 4096);
        assert_eq!(cli.packet_cutoff, 50);
        assert_eq!(cli.rotation_interval_secs, 60);
        assert_eq!(cli.write_root, PathBuf::from("/tmp/captures"));
        assert!(cli.compress);
    }
}
