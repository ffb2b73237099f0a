//! Capture-file management: the in-progress file and the dated output tree.
//!
//! The writer appends to a `.tmp`-suffixed file in the working directory and
//! only moves it into `out/yyyy/mm/dd/` on rotation or shutdown, so a file
//! with a final name is always complete. A leftover `.tmp` from a crash is
//! recovered by running [`finalize`] once at startup.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use flate2::write::GzEncoder;
use flate2::Compression;
use pcap_file::pcap::{PcapHeader, PcapPacket, PcapWriter};
use pcap_file::{DataLink, Endianness, TsResolution};
use tracing::info;

use crate::capture::Frame;
use crate::error::WriterError;
use crate::FILE_SNAP_LEN;

fn file_header() -> PcapHeader {
    PcapHeader {
        version_major: 2,
        version_minor: 4,
        ts_correction: 0,
        ts_accuracy: 0,
        snaplen: FILE_SNAP_LEN,
        datalink: DataLink::ETHERNET,
        ts_resolution: TsResolution::MicroSecond,
        endianness: Endianness::native(),
    }
}

/// The open capture file, optionally wrapped in a gzip encoder.
pub enum Sink {
    Plain {
        path: PathBuf,
        writer: PcapWriter<BufWriter<File>>,
    },
    Gzip {
        path: PathBuf,
        writer: PcapWriter<GzEncoder<File>>,
    },
}

impl Sink {
    /// Append one frame at its captured length, preserving the capture
    /// timestamp.
    pub fn write_frame(&mut self, frame: &Frame) -> Result<(), WriterError> {
        let packet = PcapPacket::new(frame.ts, frame.orig_len, &frame.data);
        match self {
            Sink::Plain { path, writer } => writer
                .write_packet(&packet)
                .map_err(|e| WriterError::pcap(&*path, e)),
            Sink::Gzip { path, writer } => writer
                .write_packet(&packet)
                .map_err(|e| WriterError::pcap(&*path, e)),
        }?;
        Ok(())
    }

    /// Flush buffers (and finish the gzip stream) and close the file.
    pub fn close(self) -> Result<(), WriterError> {
        match self {
            Sink::Plain { path, writer } => writer
                .into_writer()
                .flush()
                .map_err(|e| WriterError::io(path, e)),
            Sink::Gzip { path, writer } => writer
                .into_writer()
                .finish()
                .map(drop)
                .map_err(|e| WriterError::io(path, e)),
        }
    }
}

fn sink_path(base: &Path, compress: bool) -> PathBuf {
    if compress {
        let mut name = base.as_os_str().to_os_string();
        name.push(".gz");
        PathBuf::from(name)
    } else {
        base.to_path_buf()
    }
}

/// Create the current file (suffix `.gz` when compressing), write the pcap
/// header (Ethernet link type, 65536 snap length) and return the sink.
pub fn open(base: &Path, compress: bool) -> Result<Sink, WriterError> {
    let path = sink_path(base, compress);
    info!("Opening new pcap file {}", path.display());
    let file = File::create(&path).map_err(|e| WriterError::io(&path, e))?;

    if compress {
        let encoder = GzEncoder::new(file, Compression::default());
        let writer =
            PcapWriter::with_header(encoder, file_header()).map_err(|e| WriterError::pcap(&path, e))?;
        Ok(Sink::Gzip { path, writer })
    } else {
        let writer = PcapWriter::with_header(BufWriter::new(file), file_header())
            .map_err(|e| WriterError::pcap(&path, e))?;
        Ok(Sink::Plain { path, writer })
    }
}

/// Move the current file into the dated tree as
/// `out_root/yyyy/mm/dd/yyyy-mm-ddThh-mm-ss.pcap[.gz]` (local time).
///
/// A missing source file is not an error: either nothing was ever written
/// (fresh boot) or the file was already rotated.
pub fn finalize(base: &Path, out_root: &Path, compress: bool) -> Result<(), WriterError> {
    finalize_at(base, out_root, compress, Local::now())
}

fn finalize_at(
    base: &Path,
    out_root: &Path,
    compress: bool,
    now: DateTime<Local>,
) -> Result<(), WriterError> {
    let suffix = if compress { ".pcap.gz" } else { ".pcap" };
    let dated = format!("{}{}", now.format("%Y/%m/%d/%Y-%m-%dT%H-%M-%S"), suffix);

    let source = sink_path(base, compress);
    let dest = out_root.join(dated);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| WriterError::io(parent, e))?;
    }

    match fs::rename(&source, &dest) {
        Ok(()) => {
            info!("Moved {} to {}", source.display(), dest.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(WriterError::io(source, e)),
    }
}
