//! Single consumer of every worker's frames.
//!
//! The writer owns the capture file outright. Its event loop multiplexes
//! three inputs: the frame queue, a rotation ticker, and the shutdown
//! channel fed by the signal handler. Any IO failure is fatal - recording
//! silently incomplete data would mislead whoever reads the captures.

pub mod files;

use std::path::PathBuf;
use std::time::Duration;

use crossbeam_channel::{select, tick, Receiver};
use tracing::info;

use crate::capture::Frame;
use crate::error::WriterError;

pub struct Writer {
    current: PathBuf,
    out_root: PathBuf,
    compress: bool,
    rotation_interval: Duration,
}

impl Writer {
    pub fn new(
        current: PathBuf,
        out_root: PathBuf,
        compress: bool,
        rotation_interval: Duration,
    ) -> Self {
        Self {
            current,
            out_root,
            compress,
            rotation_interval,
        }
    }

    /// Drain frames until a shutdown signal arrives or every worker has
    /// hung up. Starts by finalizing any current file a previous run left
    /// behind, so no `.tmp` survives a crash unrecovered.
    pub fn run(&self, frames: Receiver<Frame>, shutdown: Receiver<()>) -> Result<(), WriterError> {
        files::finalize(&self.current, &self.out_root, self.compress)?;

        let mut sink = files::open(&self.current, self.compress)?;
        let rotation = tick(self.rotation_interval);

        loop {
            select! {
                recv(frames) -> frame => match frame {
                    Ok(frame) => {
                        if let Err(e) = sink.write_frame(&frame) {
                            let _ = sink.close();
                            return Err(e);
                        }
                    }
                    Err(_) => {
                        info!("All capture workers stopped, finalizing");
                        sink.close()?;
                        return files::finalize(&self.current, &self.out_root, self.compress);
                    }
                },
                recv(rotation) -> _ => {
                    info!("Rotating capture file");
                    sink.close()?;
                    files::finalize(&self.current, &self.out_root, self.compress)?;
                    sink = files::open(&self.current, self.compress)?;
                },
                recv(shutdown) -> _ => {
                    info!("Shutdown signal received, finalizing");
                    sink.close()?;
                    return files::finalize(&self.current, &self.out_root, self.compress);
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::files::tests::{frame, read_tree};
    use super::*;
    use crossbeam_channel::{bounded, unbounded, Sender};
    use std::thread;
    use std::time::{SystemTime, UNIX_EPOCH};
    use tempfile::TempDir;

    struct Harness {
        dir: TempDir,
        frames: Sender<Frame>,
        shutdown: Sender<()>,
        handle: thread::JoinHandle<Result<(), WriterError>>,
    }

    /// Dated file names have one-second granularity; start runs right after
    /// a second boundary so sub-second test timelines land in predictable
    /// seconds and never collide.
    fn align_to_second_start() {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap();
        let ms = now.subsec_millis() as u64;
        if ms > 100 {
            thread::sleep(Duration::from_millis(1050 - ms));
        }
    }

    fn start_writer(rotation_interval: Duration) -> Harness {
        let dir = TempDir::new().unwrap();
        let writer = Writer::new(
            dir.path().join("eth0_current.pcap.tmp"),
            dir.path().join("out"),
            false,
            rotation_interval,
        );
        let (frame_tx, frame_rx) = bounded(10_000);
        let (shutdown_tx, shutdown_rx) = unbounded();
        let handle = thread::spawn(move || writer.run(frame_rx, shutdown_rx));
        Harness {
            dir,
            frames: frame_tx,
            shutdown: shutdown_tx,
            handle,
        }
    }

    #[test]
    fn shutdown_finalizes_the_current_file() {
        let h = start_writer(Duration::from_secs(300));

        h.frames.send(frame(b"one")).unwrap();
        h.frames.send(frame(b"two")).unwrap();
        thread::sleep(Duration::from_millis(100));
        h.shutdown.send(()).unwrap();
        h.handle.join().unwrap().unwrap();

        assert!(!h.dir.path().join("eth0_current.pcap.tmp").exists());
        let tree = read_tree(&h.dir.path().join("out"));
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].1, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[test]
    fn all_workers_gone_is_a_clean_exit() {
        let h = start_writer(Duration::from_secs(300));

        h.frames.send(frame(b"last")).unwrap();
        drop(h.frames);
        h.handle.join().unwrap().unwrap();

        let tree = read_tree(&h.dir.path().join("out"));
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].1, vec![b"last".to_vec()]);
    }

    #[test]
    fn rotation_tick_moves_frames_into_the_tree_and_keeps_accepting() {
        align_to_second_start();
        let h = start_writer(Duration::from_millis(1300));

        for _ in 0..5 {
            h.frames.send(frame(b"first-file")).unwrap();
        }
        // Tick fires at ~1.3s into second N+1; shutdown lands in second N+2.
        thread::sleep(Duration::from_millis(1500));
        for _ in 0..5 {
            h.frames.send(frame(b"second-file")).unwrap();
        }
        thread::sleep(Duration::from_millis(700));
        h.shutdown.send(()).unwrap();
        h.handle.join().unwrap().unwrap();

        let tree = read_tree(&h.dir.path().join("out"));
        assert_eq!(tree.len(), 2);
        let total: usize = tree.iter().map(|(_, frames)| frames.len()).sum();
        assert_eq!(total, 10);
        assert_eq!(tree[0].1, vec![b"first-file".to_vec(); 5]);
        assert_eq!(tree[1].1, vec![b"second-file".to_vec(); 5]);
        assert!(!h.dir.path().join("eth0_current.pcap.tmp").exists());
    }

    #[test]
    fn stale_current_file_is_recovered_before_new_frames() {
        align_to_second_start();
        let dir = TempDir::new().unwrap();
        let current = dir.path().join("eth0_current.pcap.tmp");

        // A previous run crashed mid-capture.
        let mut sink = files::open(&current, false).unwrap();
        sink.write_frame(&frame(b"stale")).unwrap();
        sink.close().unwrap();

        let writer = Writer::new(
            current.clone(),
            dir.path().join("out"),
            false,
            Duration::from_secs(300),
        );
        let (frame_tx, frame_rx) = bounded::<Frame>(16);
        let (shutdown_tx, shutdown_rx) = unbounded();
        let handle = thread::spawn(move || writer.run(frame_rx, shutdown_rx));

        frame_tx.send(frame(b"fresh")).unwrap();
        // Push the shutdown finalize into the next wall-clock second so the
        // recovered file is not overwritten.
        thread::sleep(Duration::from_millis(1200));
        shutdown_tx.send(()).unwrap();
        handle.join().unwrap().unwrap();

        let tree = read_tree(&dir.path().join("out"));
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].1, vec![b"stale".to_vec()]);
        assert_eq!(tree[1].1, vec![b"fresh".to_vec()]);
        assert!(!current.exists());
    }
}
