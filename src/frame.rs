//! Length-prefixed framing.
//!
//! Wire format: `[payload length: u64 BE][kind: u16 BE][payload]`. The
//! header is exactly 10 bytes. Parsing is zero-copy: a [`ParsedFrame`]
//! borrows its payload from the caller's buffer and is only valid until
//! that region is consumed.

use thiserror::Error;

use crate::protocol::{CodecError, Packet, PacketKind};
use crate::wire;

pub const FRAME_HEADER_SIZE: usize = 10;

/// Maximum accepted payload length (inclusive). Anything larger is treated
/// as a corrupt or hostile header, not a frame worth waiting for.
pub const MAX_PAYLOAD_SIZE: u64 = 1 << 30;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("incomplete frame header")]
    IncompleteHeader,
    #[error("incomplete frame body")]
    IncompleteBody,
    #[error("unreasonable payload length {0}")]
    Unreasonable(u64),
}

/// Borrowed view into one complete frame inside a receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedFrame<'a> {
    /// Raw wire value; may name a kind this build does not know.
    pub kind: u16,
    pub payload: &'a [u8],
}

impl ParsedFrame<'_> {
    pub fn packet_kind(&self) -> Option<PacketKind> {
        PacketKind::from_wire(self.kind)
    }

    /// Bytes this frame occupies in the stream, header included.
    pub fn total_size(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len()
    }
}

/// Serialize a packet into a freshly allocated frame, sized exactly.
pub fn build_frame(packet: &Packet) -> Result<Vec<u8>, CodecError> {
    let payload_size = packet.payload_size();
    let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + payload_size);
    wire::put_u64(&mut out, payload_size as u64);
    wire::put_u16(&mut out, packet.kind().to_wire());
    packet.serialize(&mut out)?;
    debug_assert_eq!(out.len(), FRAME_HEADER_SIZE + payload_size);
    Ok(out)
}

/// Incremental parse: `None` means "not enough bytes yet" - also for an
/// unreasonable declared length, which will simply never complete. Use
/// [`parse_frame`] when the distinction matters.
pub fn try_parse_frame(buf: &[u8]) -> Option<ParsedFrame<'_>> {
    if buf.len() < FRAME_HEADER_SIZE {
        return None;
    }
    let payload_len = wire::get_u64(buf);
    if payload_len > MAX_PAYLOAD_SIZE {
        return None;
    }
    let payload_len = payload_len as usize;
    if buf.len() < FRAME_HEADER_SIZE + payload_len {
        return None;
    }
    Some(ParsedFrame {
        kind: wire::get_u16(&buf[8..]),
        payload: &buf[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + payload_len],
    })
}

/// Strict parse: the buffer must hold at least one complete frame.
pub fn parse_frame(buf: &[u8]) -> Result<ParsedFrame<'_>, FrameError> {
    if buf.len() < FRAME_HEADER_SIZE {
        return Err(FrameError::IncompleteHeader);
    }
    let payload_len = wire::get_u64(buf);
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(FrameError::Unreasonable(payload_len));
    }
    try_parse_frame(buf).ok_or(FrameError::IncompleteBody)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_parse_round_trip() {
        let packet = Packet::FileChunk {
            offset: 100,
            data: vec![1, 2, 3, 4, 5],
        };
        let frame_bytes = build_frame(&packet).unwrap();
        assert_eq!(frame_bytes.len(), FRAME_HEADER_SIZE + packet.payload_size());

        let frame = parse_frame(&frame_bytes).unwrap();
        assert_eq!(frame.packet_kind(), Some(PacketKind::FileChunk));
        assert_eq!(frame.total_size(), frame_bytes.len());

        let mut expected_payload = Vec::new();
        packet.serialize(&mut expected_payload).unwrap();
        assert_eq!(frame.payload, &expected_payload[..]);

        let decoded = Packet::deserialize(frame.packet_kind().unwrap(), frame.payload).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_header_layout() {
        let frame_bytes = build_frame(&Packet::Ack { offset: 5 }).unwrap();
        // 8-byte payload, kind 5
        assert_eq!(&frame_bytes[..10], &[0, 0, 0, 0, 0, 0, 0, 8, 0, 5]);
    }

    #[test]
    fn test_incomplete_header() {
        let frame_bytes = build_frame(&Packet::FileDone { file_size: 9 }).unwrap();
        for n in 0..FRAME_HEADER_SIZE {
            assert!(try_parse_frame(&frame_bytes[..n]).is_none());
            assert_eq!(
                parse_frame(&frame_bytes[..n]),
                Err(FrameError::IncompleteHeader)
            );
        }
    }

    #[test]
    fn test_incomplete_body() {
        let frame_bytes = build_frame(&Packet::FileDone { file_size: 9 }).unwrap();
        for n in FRAME_HEADER_SIZE..frame_bytes.len() {
            assert!(try_parse_frame(&frame_bytes[..n]).is_none());
            assert_eq!(
                parse_frame(&frame_bytes[..n]),
                Err(FrameError::IncompleteBody)
            );
        }
        assert!(try_parse_frame(&frame_bytes).is_some());
    }

    #[test]
    fn test_unreasonable_length_rejected() {
        // Literal hostile header: length 0xFFFFFFFFFFFFFFFF, kind Ack
        let hostile = [
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x05,
        ];
        assert!(try_parse_frame(&hostile).is_none());
        assert_eq!(
            parse_frame(&hostile),
            Err(FrameError::Unreasonable(u64::MAX))
        );
    }

    #[test]
    fn test_max_payload_boundary() {
        // Exactly 1 GiB declared: accepted as a frame still in flight
        let mut header = Vec::new();
        wire::put_u64(&mut header, MAX_PAYLOAD_SIZE);
        wire::put_u16(&mut header, PacketKind::FileChunk.to_wire());
        assert!(try_parse_frame(&header).is_none());
        assert_eq!(parse_frame(&header), Err(FrameError::IncompleteBody));

        // One byte over: rejected outright
        let mut header = Vec::new();
        wire::put_u64(&mut header, MAX_PAYLOAD_SIZE + 1);
        wire::put_u16(&mut header, PacketKind::FileChunk.to_wire());
        assert_eq!(
            parse_frame(&header),
            Err(FrameError::Unreasonable(MAX_PAYLOAD_SIZE + 1))
        );
    }

    #[test]
    fn test_unknown_kind_still_parses() {
        let mut frame_bytes = Vec::new();
        wire::put_u64(&mut frame_bytes, 3);
        wire::put_u16(&mut frame_bytes, 999);
        frame_bytes.extend_from_slice(&[1, 2, 3]);
        let frame = try_parse_frame(&frame_bytes).unwrap();
        assert_eq!(frame.kind, 999);
        assert_eq!(frame.packet_kind(), None);
        assert_eq!(frame.total_size(), 13);
    }

    #[test]
    fn test_parse_ignores_bytes_past_first_frame() {
        let mut buf = build_frame(&Packet::Ack { offset: 1 }).unwrap();
        let second = build_frame(&Packet::Ack { offset: 2 }).unwrap();
        buf.extend_from_slice(&second);
        let frame = try_parse_frame(&buf).unwrap();
        assert_eq!(frame.total_size(), 18);
        let rest = &buf[frame.total_size()..];
        let next = try_parse_frame(rest).unwrap();
        assert_eq!(
            Packet::deserialize(next.packet_kind().unwrap(), next.payload).unwrap(),
            Packet::Ack { offset: 2 }
        );
    }
}
