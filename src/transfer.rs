//! Sender side: chunked file streaming and directory transfer orchestration.
//!
//! The streamer runs on a dedicated worker thread because backpressure is a
//! blocking 1 ms sleep - it must never run on the executor that owns the
//! socket. Cancellation is cooperative and takes effect between files; a
//! file already streaming is always finished.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use walkdir::WalkDir;

use crate::connection::{PacketHandler, PacketSender};
use crate::frame::ParsedFrame;
use crate::protocol::{Packet, PROTOCOL_VERSION};

pub const CHUNK_SIZE: usize = 4096;
pub const BACKPRESSURE_DELAY: Duration = Duration::from_millis(1);

/// Stream one file as FileInfo, FileChunk* (monotonic offsets), FileDone.
///
/// An empty `remote_name` falls back to the local file name; separators are
/// normalized to `/`. A vanished file is logged and skipped. The declared
/// size is captured up front - if the file shrinks mid-stream the receiver
/// sees the mismatch and withholds its ack.
pub fn send_file(sender: &dyn PacketSender, local_path: &Path, remote_name: &str) -> Result<()> {
    if !local_path.is_file() {
        eprintln!("[transfer] file not found: {}", local_path.display());
        return Ok(());
    }

    let file_size = std::fs::metadata(local_path)
        .with_context(|| format!("stat {}", local_path.display()))?
        .len();

    let name_to_send = if remote_name.is_empty() {
        local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    } else {
        remote_name.to_string()
    };
    let name_to_send = name_to_send.replace('\\', "/");

    println!("[transfer] sending {name_to_send} ({file_size} bytes)");

    sender.send(&Packet::FileInfo {
        file_size,
        file_name: name_to_send,
    })?;

    let mut file =
        File::open(local_path).with_context(|| format!("open {}", local_path.display()))?;
    let mut buf = [0u8; CHUNK_SIZE];
    let mut offset: u64 = 0;

    loop {
        // Cooperative backpressure: wait for the outbound queue to drain
        // below the congestion threshold before producing more chunks.
        while sender.is_congested() {
            thread::sleep(BACKPRESSURE_DELAY);
        }

        let n = file
            .read(&mut buf)
            .with_context(|| format!("read {}", local_path.display()))?;
        if n == 0 {
            break;
        }

        sender.send(&Packet::FileChunk {
            offset,
            data: buf[..n].to_vec(),
        })?;
        offset += n as u64;
    }

    sender.send(&Packet::FileDone { file_size })?;
    println!("[transfer] upload complete, sent {offset} bytes");
    Ok(())
}

/// Walk `source` and stream every regular file over `sender`.
///
/// Emits one Handshake before the first FileInfo. Directory entries are
/// visited in lexicographic order so runs are reproducible. Checks the stop
/// flag before each entry; never interrupts a file mid-stream.
pub fn run_transfer(sender: &dyn PacketSender, stop: &AtomicBool, source: &Path) -> Result<()> {
    sender.send(&Packet::Handshake {
        version: PROTOCOL_VERSION,
        capabilities: 0,
    })?;

    if source.is_dir() {
        for entry in WalkDir::new(source).sort_by_file_name() {
            if stop.load(Ordering::Relaxed) {
                println!("[orchestrator] transfer cancelled");
                return Ok(());
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    eprintln!("[orchestrator] walk error: {e}");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(source)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            send_file(sender, entry.path(), &relative)?;
        }
    } else {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        send_file(sender, source, &name)?;
    }
    Ok(())
}

/// Drives transfers on a worker thread with cooperative cancellation.
pub struct TransferOrchestrator {
    sender: Arc<dyn PacketSender>,
    stop: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<Result<()>>>,
}

impl TransferOrchestrator {
    pub fn new(sender: Arc<dyn PacketSender>) -> TransferOrchestrator {
        TransferOrchestrator {
            sender,
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Start streaming `source` (file or directory tree) in the background.
    /// Any transfer still running is stopped and joined first.
    pub fn start_transfer(&mut self, source: &Path) {
        if self.worker.is_some() {
            self.request_stop();
            let _ = self.wait();
        }
        self.stop.store(false, Ordering::Relaxed);

        let sender = self.sender.clone();
        let stop = self.stop.clone();
        let source: PathBuf = source.to_path_buf();
        self.worker = Some(thread::spawn(move || {
            if !source.exists() {
                eprintln!("[orchestrator] path does not exist: {}", source.display());
                return Ok(());
            }
            run_transfer(sender.as_ref(), &stop, &source)
        }));
    }

    /// Ask the worker to stop between files.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn is_transferring(&self) -> bool {
        self.worker.is_some()
    }

    /// Join the worker and surface its result. Returns Ok if no transfer
    /// was running.
    pub fn wait(&mut self) -> Result<()> {
        match self.worker.take() {
            Some(worker) => match worker.join() {
                Ok(result) => result,
                Err(_) => anyhow::bail!("transfer worker panicked"),
            },
            None => Ok(()),
        }
    }
}

impl Drop for TransferOrchestrator {
    fn drop(&mut self) {
        self.request_stop();
        let _ = self.wait();
    }
}

/// Client-side handler: the sender's read path only observes acks and
/// errors coming back from the receiver.
#[derive(Default)]
pub struct AckObserver {
    acks: Arc<AtomicU64>,
}

impl AckObserver {
    /// Shared counter of acks seen so far.
    pub fn ack_counter(&self) -> Arc<AtomicU64> {
        self.acks.clone()
    }
}

impl PacketHandler for AckObserver {
    fn on_packet(&mut self, frame: &ParsedFrame<'_>) -> Result<()> {
        let Some(kind) = frame.packet_kind() else {
            println!("[client] unknown packet kind: {}", frame.kind);
            return Ok(());
        };
        match Packet::deserialize(kind, frame.payload)? {
            Packet::Ack { offset } => {
                println!("[client] ack (offset {offset})");
                self.acks.fetch_add(1, Ordering::SeqCst);
            }
            Packet::Error { code, message } => {
                eprintln!("[client] peer error {code}: {message}");
            }
            other => {
                println!("[client] ignoring {:?} packet", other.kind());
            }
        }
        Ok(())
    }

    fn on_disconnect(&mut self) {
        println!("[client] disconnected");
    }
}
