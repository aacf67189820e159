//! Packet kinds and per-packet payload codec.
//!
//! Every payload field is big-endian; variable-length fields (file names,
//! error messages, chunk data) carry a u32 length prefix. Size caps are
//! enforced on both serialize and deserialize so a malicious peer cannot
//! make the receiver allocate unbounded memory from a declared length.

use thiserror::Error;

use crate::wire;

/// Current protocol version carried in Handshake packets.
pub const PROTOCOL_VERSION: u16 = 1;

// Field size caps - prevent memory exhaustion from hostile length prefixes
pub const MAX_NAME_LEN: usize = 4096;
pub const MAX_MESSAGE_LEN: usize = 4096;
pub const MAX_CHUNK_SIZE: usize = 10 * 1024 * 1024;

/// Wire ids for each packet kind (keep numeric values stable).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum PacketKind {
    Handshake = 0,
    FileInfo = 1,
    FileChunk = 2,
    FileDone = 3,
    Error = 4,
    Ack = 5,
}

impl PacketKind {
    /// Map a wire value to a kind. Unknown values are not an error at this
    /// layer; the dispatcher logs them and consumes the frame.
    pub fn from_wire(value: u16) -> Option<PacketKind> {
        match value {
            0 => Some(PacketKind::Handshake),
            1 => Some(PacketKind::FileInfo),
            2 => Some(PacketKind::FileChunk),
            3 => Some(PacketKind::FileDone),
            4 => Some(PacketKind::Error),
            5 => Some(PacketKind::Ack),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u16 {
        self as u16
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("payload too large: {0}")]
    PayloadTooLarge(&'static str),
    #[error("malformed packet: {0}")]
    Malformed(&'static str),
}

/// Application-level messages. One frame carries exactly one packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Handshake { version: u16, capabilities: u32 },
    FileInfo { file_size: u64, file_name: String },
    FileChunk { offset: u64, data: Vec<u8> },
    FileDone { file_size: u64 },
    Error { code: u16, message: String },
    Ack { offset: u64 },
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Handshake { .. } => PacketKind::Handshake,
            Packet::FileInfo { .. } => PacketKind::FileInfo,
            Packet::FileChunk { .. } => PacketKind::FileChunk,
            Packet::FileDone { .. } => PacketKind::FileDone,
            Packet::Error { .. } => PacketKind::Error,
            Packet::Ack { .. } => PacketKind::Ack,
        }
    }

    /// Exact serialized payload size in bytes (frame header not included).
    pub fn payload_size(&self) -> usize {
        match self {
            Packet::Handshake { .. } => 2 + 4,
            Packet::FileInfo { file_name, .. } => 8 + 4 + file_name.len(),
            Packet::FileChunk { data, .. } => 8 + 4 + data.len(),
            Packet::FileDone { .. } => 8,
            Packet::Error { message, .. } => 2 + 4 + message.len(),
            Packet::Ack { .. } => 8,
        }
    }

    /// Append the payload bytes to `out`.
    pub fn serialize(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        match self {
            Packet::Handshake {
                version,
                capabilities,
            } => {
                wire::put_u16(out, *version);
                wire::put_u32(out, *capabilities);
            }
            Packet::FileInfo {
                file_size,
                file_name,
            } => {
                if file_name.is_empty() {
                    return Err(CodecError::Malformed("file name must not be empty"));
                }
                if file_name.len() > MAX_NAME_LEN {
                    return Err(CodecError::PayloadTooLarge("file name"));
                }
                wire::put_u64(out, *file_size);
                wire::put_u32(out, file_name.len() as u32);
                out.extend_from_slice(file_name.as_bytes());
            }
            Packet::FileChunk { offset, data } => {
                if data.len() > MAX_CHUNK_SIZE {
                    return Err(CodecError::PayloadTooLarge("chunk data"));
                }
                wire::put_u64(out, *offset);
                wire::put_u32(out, data.len() as u32);
                out.extend_from_slice(data);
            }
            Packet::FileDone { file_size } => {
                wire::put_u64(out, *file_size);
            }
            Packet::Error { code, message } => {
                if message.len() > MAX_MESSAGE_LEN {
                    return Err(CodecError::PayloadTooLarge("error message"));
                }
                wire::put_u16(out, *code);
                wire::put_u32(out, message.len() as u32);
                out.extend_from_slice(message.as_bytes());
            }
            Packet::Ack { offset } => {
                wire::put_u64(out, *offset);
            }
        }
        Ok(())
    }

    /// Parse one payload of the given kind. Trailing bytes beyond a declared
    /// length are tolerated; a declared length that overruns the payload is
    /// not.
    pub fn deserialize(kind: PacketKind, payload: &[u8]) -> Result<Packet, CodecError> {
        match kind {
            PacketKind::Handshake => {
                if payload.len() < 6 {
                    return Err(CodecError::Malformed("handshake payload too small"));
                }
                Ok(Packet::Handshake {
                    version: wire::get_u16(payload),
                    capabilities: wire::get_u32(&payload[2..]),
                })
            }
            PacketKind::FileInfo => {
                if payload.len() < 12 {
                    return Err(CodecError::Malformed("file info payload too small"));
                }
                let file_size = wire::get_u64(payload);
                let name_len = wire::get_u32(&payload[8..]) as usize;
                if name_len == 0 {
                    return Err(CodecError::Malformed("file name must not be empty"));
                }
                if name_len > MAX_NAME_LEN {
                    return Err(CodecError::Malformed("file name length exceeds cap"));
                }
                if 12 + name_len > payload.len() {
                    return Err(CodecError::Malformed("file name overruns payload"));
                }
                // Names are opaque bytes on the wire; the path validator is
                // the boundary that keeps them inside the destination.
                let file_name = String::from_utf8_lossy(&payload[12..12 + name_len]).into_owned();
                Ok(Packet::FileInfo {
                    file_size,
                    file_name,
                })
            }
            PacketKind::FileChunk => {
                if payload.len() < 12 {
                    return Err(CodecError::Malformed("file chunk payload too small"));
                }
                let offset = wire::get_u64(payload);
                let data_len = wire::get_u32(&payload[8..]) as usize;
                if data_len > MAX_CHUNK_SIZE {
                    return Err(CodecError::Malformed("chunk length exceeds cap"));
                }
                if 12 + data_len > payload.len() {
                    return Err(CodecError::Malformed("chunk data overruns payload"));
                }
                Ok(Packet::FileChunk {
                    offset,
                    data: payload[12..12 + data_len].to_vec(),
                })
            }
            PacketKind::FileDone => {
                if payload.len() < 8 {
                    return Err(CodecError::Malformed("file done payload too small"));
                }
                Ok(Packet::FileDone {
                    file_size: wire::get_u64(payload),
                })
            }
            PacketKind::Error => {
                if payload.len() < 6 {
                    return Err(CodecError::Malformed("error payload too small"));
                }
                let code = wire::get_u16(payload);
                let msg_len = wire::get_u32(&payload[2..]) as usize;
                if msg_len > MAX_MESSAGE_LEN {
                    return Err(CodecError::Malformed("error message length exceeds cap"));
                }
                if 6 + msg_len > payload.len() {
                    return Err(CodecError::Malformed("error message overruns payload"));
                }
                let message = String::from_utf8_lossy(&payload[6..6 + msg_len]).into_owned();
                Ok(Packet::Error { code, message })
            }
            PacketKind::Ack => {
                if payload.len() < 8 {
                    return Err(CodecError::Malformed("ack payload too small"));
                }
                Ok(Packet::Ack {
                    offset: wire::get_u64(payload),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(packet: Packet) -> Packet {
        let mut payload = Vec::new();
        packet.serialize(&mut payload).unwrap();
        assert_eq!(payload.len(), packet.payload_size());
        Packet::deserialize(packet.kind(), &payload).unwrap()
    }

    #[test]
    fn test_round_trip_all_kinds() {
        let packets = vec![
            Packet::Handshake {
                version: 1,
                capabilities: 0,
            },
            Packet::FileInfo {
                file_size: 1234,
                file_name: "subdir/nested/file.txt".to_string(),
            },
            Packet::FileChunk {
                offset: 4096,
                data: vec![1, 2, 3, 4, 5],
            },
            Packet::FileChunk {
                offset: 0,
                data: Vec::new(),
            },
            Packet::FileDone { file_size: 1234 },
            Packet::Error {
                code: 42,
                message: "disk full".to_string(),
            },
            Packet::Error {
                code: 0,
                message: String::new(),
            },
            Packet::Ack { offset: u64::MAX },
        ];
        for packet in packets {
            assert_eq!(round_trip(packet.clone()), packet);
        }
    }

    #[test]
    fn test_kind_wire_values() {
        assert_eq!(PacketKind::Handshake.to_wire(), 0);
        assert_eq!(PacketKind::FileInfo.to_wire(), 1);
        assert_eq!(PacketKind::FileChunk.to_wire(), 2);
        assert_eq!(PacketKind::FileDone.to_wire(), 3);
        assert_eq!(PacketKind::Error.to_wire(), 4);
        assert_eq!(PacketKind::Ack.to_wire(), 5);
        assert_eq!(PacketKind::from_wire(5), Some(PacketKind::Ack));
        assert_eq!(PacketKind::from_wire(6), None);
        assert_eq!(PacketKind::from_wire(u16::MAX), None);
    }

    #[test]
    fn test_file_info_layout() {
        let packet = Packet::FileInfo {
            file_size: 5,
            file_name: "ab".to_string(),
        };
        let mut payload = Vec::new();
        packet.serialize(&mut payload).unwrap();
        assert_eq!(payload, [0, 0, 0, 0, 0, 0, 0, 5, 0, 0, 0, 2, b'a', b'b']);
    }

    #[test]
    fn test_serialize_caps() {
        let long_name = Packet::FileInfo {
            file_size: 1,
            file_name: "x".repeat(MAX_NAME_LEN + 1),
        };
        assert_eq!(
            long_name.serialize(&mut Vec::new()),
            Err(CodecError::PayloadTooLarge("file name"))
        );

        let empty_name = Packet::FileInfo {
            file_size: 1,
            file_name: String::new(),
        };
        assert!(matches!(
            empty_name.serialize(&mut Vec::new()),
            Err(CodecError::Malformed(_))
        ));

        let big_chunk = Packet::FileChunk {
            offset: 0,
            data: vec![0u8; MAX_CHUNK_SIZE + 1],
        };
        assert_eq!(
            big_chunk.serialize(&mut Vec::new()),
            Err(CodecError::PayloadTooLarge("chunk data"))
        );

        let long_message = Packet::Error {
            code: 1,
            message: "y".repeat(MAX_MESSAGE_LEN + 1),
        };
        assert_eq!(
            long_message.serialize(&mut Vec::new()),
            Err(CodecError::PayloadTooLarge("error message"))
        );

        // At-cap values are fine
        let at_cap = Packet::FileInfo {
            file_size: 1,
            file_name: "x".repeat(MAX_NAME_LEN),
        };
        assert!(at_cap.serialize(&mut Vec::new()).is_ok());
    }

    #[test]
    fn test_deserialize_short_payloads() {
        for (kind, min) in [
            (PacketKind::Handshake, 6),
            (PacketKind::FileInfo, 12),
            (PacketKind::FileChunk, 12),
            (PacketKind::FileDone, 8),
            (PacketKind::Error, 6),
            (PacketKind::Ack, 8),
        ] {
            let short = vec![0u8; min - 1];
            assert!(Packet::deserialize(kind, &short).is_err(), "{kind:?}");
        }
    }

    #[test]
    fn test_deserialize_overrun_length() {
        // FileChunk declaring 100 bytes of data but carrying 3
        let mut payload = Vec::new();
        wire::put_u64(&mut payload, 0);
        wire::put_u32(&mut payload, 100);
        payload.extend_from_slice(&[1, 2, 3]);
        assert!(matches!(
            Packet::deserialize(PacketKind::FileChunk, &payload),
            Err(CodecError::Malformed(_))
        ));

        // FileInfo declaring a name longer than the payload
        let mut payload = Vec::new();
        wire::put_u64(&mut payload, 10);
        wire::put_u32(&mut payload, 50);
        payload.extend_from_slice(b"short");
        assert!(matches!(
            Packet::deserialize(PacketKind::FileInfo, &payload),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_deserialize_hostile_length_prefix() {
        // A length prefix near u32::MAX must be rejected by the cap check,
        // not attempted as an allocation.
        let mut payload = Vec::new();
        wire::put_u64(&mut payload, 0);
        wire::put_u32(&mut payload, u32::MAX);
        payload.extend_from_slice(&[0; 16]);
        assert!(matches!(
            Packet::deserialize(PacketKind::FileChunk, &payload),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_chunk_tolerates_trailing_bytes() {
        let mut payload = Vec::new();
        wire::put_u64(&mut payload, 8);
        wire::put_u32(&mut payload, 2);
        payload.extend_from_slice(&[7, 8, 0xff, 0xff]);
        let packet = Packet::deserialize(PacketKind::FileChunk, &payload).unwrap();
        assert_eq!(
            packet,
            Packet::FileChunk {
                offset: 8,
                data: vec![7, 8],
            }
        );
    }
}
