//! Wire frame codec (component C1).
//!
//! Layout, big-endian throughout:
//!   bytes 0..1: `(kind << 13) | length`
//!   bytes 2..5: `pos`
//!   bytes 6..:  payload (`length` bytes)

use thiserror::Error;

/// Header size in bytes: 2 (kind+length) + 4 (pos).
pub const HEADER_SIZE: usize = 6;

/// Largest payload the wire format admits (13-bit length field).
pub const MAX_LENGTH: usize = 8191;

/// Bit shift separating `kind` from `length` in the first two header bytes.
const TYPE_SHIFT: u16 = 13;

/// Mask recovering the 13-bit length field.
const LENGTH_MASK: u16 = 0x1FFF;

/// Error code placed in an ERROR frame's 1-byte sub-code payload.
pub const INVALID_FILE_HASHING: u8 = 1;
pub const FILE_NOT_FOUND_ERROR: u8 = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame shorter than header ({len} < {HEADER_SIZE})")]
    TooShort { len: usize },
    #[error("unknown frame kind {0}")]
    UnknownKind(u16),
    #[error("declared length {declared} exceeds available payload bytes {available}")]
    TruncatedPayload { declared: usize, available: usize },
}

/// The six frame kinds that appear on the wire (§3, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Upload,
    Download,
    Ok,
    Error,
    Fin,
    Ack,
}

impl Kind {
    fn to_wire(self) -> u16 {
        match self {
            Kind::Upload => 0,
            Kind::Download => 1,
            Kind::Ok => 2,
            Kind::Error => 3,
            Kind::Fin => 4,
            Kind::Ack => 5,
        }
    }

    fn from_wire(v: u16) -> Option<Self> {
        match v {
            0 => Some(Kind::Upload),
            1 => Some(Kind::Download),
            2 => Some(Kind::Ok),
            3 => Some(Kind::Error),
            4 => Some(Kind::Fin),
            5 => Some(Kind::Ack),
            _ => None,
        }
    }
}

/// A fully decoded frame. `length` is implicit in `payload.len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: Kind,
    pub pos: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build a frame, truncating nothing — callers are expected to respect
    /// `MAX_LENGTH`; this is only ever violated by a programming error since
    /// the engine never emits payloads larger than `PAYLOAD_SIZE`.
    pub fn new(kind: Kind, pos: u32, payload: Vec<u8>) -> Self {
        debug_assert!(payload.len() <= MAX_LENGTH);
        Self { kind, pos, payload }
    }

    pub fn ack(pos: u32) -> Self {
        Self::new(Kind::Ack, pos, Vec::new())
    }

    pub fn error(pos: u32, sub_code: Option<u8>) -> Self {
        let payload = sub_code.map(|c| vec![c]).unwrap_or_default();
        Self::new(Kind::Error, pos, payload)
    }

    /// Encoding is total: every valid `Frame` produces exactly
    /// `HEADER_SIZE + payload.len()` bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        let type_plus_length = (self.kind.to_wire() << TYPE_SHIFT) | (self.payload.len() as u16);
        buf.extend_from_slice(&type_plus_length.to_be_bytes());
        buf.extend_from_slice(&self.pos.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decoding fails on short buffers, unknown kinds, or a declared length
    /// that runs past the end of `bytes` (§4.1).
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < HEADER_SIZE {
            return Err(DecodeError::TooShort { len: bytes.len() });
        }

        let type_plus_length = u16::from_be_bytes([bytes[0], bytes[1]]);
        let kind_bits = type_plus_length >> TYPE_SHIFT;
        let length = (type_plus_length & LENGTH_MASK) as usize;
        let kind = Kind::from_wire(kind_bits).ok_or(DecodeError::UnknownKind(kind_bits))?;
        let pos = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);

        let available = bytes.len() - HEADER_SIZE;
        if length > available {
            return Err(DecodeError::TruncatedPayload { declared: length, available });
        }

        let payload = bytes[HEADER_SIZE..HEADER_SIZE + length].to_vec();
        Ok(Frame { kind, pos, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(kind: Kind, pos: u32, payload: Vec<u8>) {
        let frame = Frame::new(kind, pos, payload);
        let bytes = frame.encode();
        let decoded = Frame::decode(&bytes).expect("decode");
        assert_eq!(frame, decoded);
    }

    #[test]
    fn round_trip_each_kind() {
        roundtrip(Kind::Upload, 0, b"file.bin".to_vec());
        roundtrip(Kind::Download, 42, b"other.bin".to_vec());
        roundtrip(Kind::Ok, 7, vec![1, 2, 3, 4]);
        roundtrip(Kind::Error, 0, vec![2]);
        roundtrip(Kind::Fin, u32::MAX, vec![0u8; 16]);
        roundtrip(Kind::Ack, 9001, Vec::new());
    }

    #[test]
    fn round_trip_max_pos_and_empty_payload() {
        roundtrip(Kind::Ack, u32::MAX, Vec::new());
        roundtrip(Kind::Ack, 0, Vec::new());
    }

    #[test]
    fn round_trip_max_payload() {
        roundtrip(Kind::Ok, 1, vec![0xAB; MAX_LENGTH]);
    }

    #[test]
    fn decode_rejects_short_buffer() {
        assert_eq!(
            Frame::decode(&[0, 1, 2]),
            Err(DecodeError::TooShort { len: 3 })
        );
    }

    #[test]
    fn decode_rejects_unknown_kind() {
        // kind bits = 7 (no variant maps to 7), length = 0.
        let bytes = [0xE0, 0x00, 0, 0, 0, 0];
        assert_eq!(Frame::decode(&bytes), Err(DecodeError::UnknownKind(7)));
    }

    #[test]
    fn decode_rejects_truncated_payload() {
        // Declares length=10 but only supplies 2 payload bytes.
        let mut bytes = vec![0x40, 0x0A, 0, 0, 0, 1];
        bytes.extend_from_slice(&[9, 9]);
        assert_eq!(
            Frame::decode(&bytes),
            Err(DecodeError::TruncatedPayload { declared: 10, available: 2 })
        );
    }

    #[test]
    fn decode_ignores_trailing_garbage_beyond_declared_length() {
        // Buffer can be longer than header+length; the codec only reads
        // what the length field declares (receive buffers are fixed-size).
        let mut bytes = Frame::new(Kind::Ok, 3, vec![1, 2, 3]).encode();
        bytes.extend_from_slice(&[0xFF; 50]);
        let decoded = Frame::decode(&bytes).unwrap();
        assert_eq!(decoded.payload, vec![1, 2, 3]);
    }
}
