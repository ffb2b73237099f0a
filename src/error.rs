use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Insufficient permissions to capture packets (try running as root or with CAP_NET_RAW)")]
    InsufficientPermissions,

    #[error("Failed to open capture handle on {interface}: {source}")]
    Open {
        interface: String,
        source: pcap::Error,
    },

    #[error("Failed to install filter '{filter}': {source}")]
    Filter {
        filter: String,
        source: pcap::Error,
    },

    #[error("Capture read error: {0}")]
    Read(#[from] pcap::Error),
}

#[derive(Error, Debug)]
pub enum WriterError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Pcap encoding error on {path}: {source}")]
    Pcap {
        path: PathBuf,
        source: pcap_file::PcapError,
    },
}

impl WriterError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn pcap(path: impl Into<PathBuf>, source: pcap_file::PcapError) -> Self {
        Self::Pcap {
            path: path.into(),
            source,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {var}: '{value}' is not a positive integer")]
    InvalidEnv { var: &'static str, value: String },
}
