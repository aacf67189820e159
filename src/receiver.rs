//! Receiver-side packet handler: the file lifecycle state machine.
//!
//! One file is open per connection at a time. A FileInfo that fails path
//! validation or open marks the transfer rejected; chunks and the footer for
//! a rejected file are discarded silently and no ack is emitted. The footer
//! gates the ack on byte-count equality with the declared size.

use std::sync::Arc;

use anyhow::Result;

use crate::connection::{PacketHandler, PacketSender};
use crate::frame::ParsedFrame;
use crate::protocol::{Packet, PROTOCOL_VERSION};
use crate::writer::FileWriter;

pub struct FileReceiver<W: FileWriter> {
    writer: W,
    sender: Option<Arc<dyn PacketSender>>,
    expected_size: u64,
    rejected: bool,
}

impl<W: FileWriter> FileReceiver<W> {
    pub fn new(writer: W) -> FileReceiver<W> {
        FileReceiver {
            writer,
            sender: None,
            expected_size: 0,
            rejected: false,
        }
    }

    /// Bind the outbound seam used to emit acks. Without it the receiver
    /// still writes files but stays silent.
    pub fn with_sender(mut self, sender: Arc<dyn PacketSender>) -> FileReceiver<W> {
        self.sender = Some(sender);
        self
    }

    pub fn is_rejected(&self) -> bool {
        self.rejected
    }

    fn handle_handshake(&mut self, version: u16, capabilities: u32) {
        println!("[receiver] handshake (version {version}, capabilities {capabilities:#x})");
        if version != PROTOCOL_VERSION {
            eprintln!(
                "[receiver] protocol version mismatch: expected {PROTOCOL_VERSION}, got {version}"
            );
        }
    }

    fn handle_file_info(&mut self, file_size: u64, file_name: &str) {
        println!("[receiver] starting download: {file_name} ({file_size} bytes)");
        match self.writer.begin_file(file_name, file_size) {
            Ok(()) => {
                self.rejected = false;
                self.expected_size = file_size;
            }
            Err(e) => {
                eprintln!("[receiver] rejected {file_name}: {e}");
                self.rejected = true;
            }
        }
    }

    fn handle_file_chunk(&mut self, offset: u64, data: &[u8]) {
        if self.rejected {
            return;
        }
        if let Err(e) = self.writer.write_chunk(offset, data) {
            // The footer's size check will catch the shortfall and withhold
            // the ack.
            eprintln!("[receiver] chunk write failed at offset {offset}: {e}");
        }
    }

    fn handle_file_done(&mut self, file_size: u64) {
        if self.rejected {
            println!("[receiver] discarding footer for rejected file");
            self.rejected = false;
            return;
        }

        if file_size != self.expected_size {
            eprintln!(
                "[receiver] footer declares {file_size} bytes but header declared {}",
                self.expected_size
            );
        }
        let received = self.writer.bytes_written();
        if self.writer.finish_file(file_size) {
            println!("[receiver] integrity validated ({received} bytes)");
            if let Some(sender) = &self.sender {
                if let Err(e) = sender.send(&Packet::Ack { offset: file_size }) {
                    eprintln!("[receiver] failed to send ack: {e}");
                }
            }
        } else {
            eprintln!("[receiver] corruption detected: expected {file_size} bytes, got {received}");
        }
    }

    fn handle_error(&mut self, code: u16, message: &str) {
        eprintln!("[receiver] peer error {code}: {message}");
    }
}

impl<W: FileWriter> PacketHandler for FileReceiver<W> {
    fn on_packet(&mut self, frame: &ParsedFrame<'_>) -> Result<()> {
        let Some(kind) = frame.packet_kind() else {
            println!("[receiver] unknown packet kind: {}", frame.kind);
            return Ok(());
        };

        match Packet::deserialize(kind, frame.payload)? {
            Packet::Handshake {
                version,
                capabilities,
            } => self.handle_handshake(version, capabilities),
            Packet::FileInfo {
                file_size,
                file_name,
            } => self.handle_file_info(file_size, &file_name),
            Packet::FileChunk { offset, data } => self.handle_file_chunk(offset, &data),
            Packet::FileDone { file_size } => self.handle_file_done(file_size),
            Packet::Ack { offset } => println!("[receiver] ack (offset {offset})"),
            Packet::Error { code, message } => self.handle_error(code, &message),
        }
        Ok(())
    }

    fn on_disconnect(&mut self) {
        self.writer.close();
        println!("[receiver] connection closed, file handle released");
    }
}
