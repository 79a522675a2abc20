//! Fixed-layout protocol segments.
//!
//! Every segment exchanged between client and server roles has a 10-byte
//! big-endian header followed by the payload region. Effects read the header
//! fields through the accessors below and only ever replace a segment
//! wholesale.

use std::fmt;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Size of the segment header in bytes.
pub const HEADER_SIZE: usize = 10;
/// Size of the payload region in bytes.
pub const PAYLOAD_SIZE: usize = 1008;
/// Total size of every well-formed segment.
pub const SEGMENT_SIZE: usize = HEADER_SIZE + PAYLOAD_SIZE;

/// Flag bit marking a handshake-start segment.
pub const SYN: u8 = 4;
/// Flag bit marking a valid acknowledgement number.
pub const ACK: u8 = 2;
/// Flag bit marking connection termination.
pub const FIN: u8 = 1;

const SEQ_OFFSET: usize = 0;
const ACK_OFFSET: usize = 2;
const FLAGS_OFFSET: usize = 4;
const WINDOW_OFFSET: usize = 5;
const LENGTH_OFFSET: usize = 6;

/// Maximum number of payload characters shown by `Display`.
const DISPLAY_SNIPPET: usize = 20;

/// Header fields used to build a segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Sequence number
    pub seq_num: u16,
    /// Acknowledgement number
    pub ack_num: u16,
    /// Combination of `SYN`, `ACK` and `FIN`
    pub flags: u8,
    /// Advertised receive window
    pub window: u8,
}

/// Immutable protocol segment compared and hashed by exact byte identity.
///
/// Accessors never panic: bytes missing from a short segment read as zero,
/// so malformed segments can still be printed and rejected by
/// [`SegmentLengthGuard`](crate::effects::SegmentLengthGuard).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Segment(Bytes);

impl Segment {
    /// Builds a full-size segment from header fields and payload.
    ///
    /// The payload is truncated to `PAYLOAD_SIZE` bytes and the remainder of
    /// the segment, including the reserved checksum bytes, is zero.
    pub fn new(header: SegmentHeader, payload: &[u8]) -> Self {
        let payload = &payload[..payload.len().min(PAYLOAD_SIZE)];
        let mut buf = BytesMut::zeroed(SEGMENT_SIZE);
        buf[SEQ_OFFSET..SEQ_OFFSET + 2].copy_from_slice(&header.seq_num.to_be_bytes());
        buf[ACK_OFFSET..ACK_OFFSET + 2].copy_from_slice(&header.ack_num.to_be_bytes());
        buf[FLAGS_OFFSET] = header.flags;
        buf[WINDOW_OFFSET] = header.window;
        // Bounded by PAYLOAD_SIZE above, so the length always fits.
        let length = payload.len() as u16;
        buf[LENGTH_OFFSET..LENGTH_OFFSET + 2].copy_from_slice(&length.to_be_bytes());
        buf[HEADER_SIZE..HEADER_SIZE + payload.len()].copy_from_slice(payload);
        Self(buf.freeze())
    }

    /// Wraps raw bytes produced by a protocol implementation.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Returns the raw segment bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the segment, returning the underlying buffer.
    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    /// Returns the segment length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the segment has no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the sequence number.
    pub fn seq_num(&self) -> u16 {
        self.read_u16(SEQ_OFFSET)
    }

    /// Returns the acknowledgement number.
    pub fn ack_num(&self) -> u16 {
        self.read_u16(ACK_OFFSET)
    }

    /// Returns the raw flags byte.
    pub fn flags(&self) -> u8 {
        self.read_u8(FLAGS_OFFSET)
    }

    /// Returns true if the SYN flag is set.
    pub fn is_syn(&self) -> bool {
        self.flags() & SYN == SYN
    }

    /// Returns true if the ACK flag is set.
    pub fn is_ack(&self) -> bool {
        self.flags() & ACK == ACK
    }

    /// Returns true if the FIN flag is set.
    pub fn is_fin(&self) -> bool {
        self.flags() & FIN == FIN
    }

    /// Returns the advertised window.
    pub fn window(&self) -> u8 {
        self.read_u8(WINDOW_OFFSET)
    }

    /// Returns the payload length announced in the header.
    pub fn data_len(&self) -> u16 {
        self.read_u16(LENGTH_OFFSET)
    }

    /// Returns true if the header announces a non-empty payload.
    pub fn has_data(&self) -> bool {
        self.data_len() > 0
    }

    /// Returns the payload bytes, clamped to the bytes actually present.
    pub fn payload(&self) -> &[u8] {
        let start = HEADER_SIZE.min(self.0.len());
        let end = (HEADER_SIZE + self.data_len() as usize).min(self.0.len());
        &self.0[start..end]
    }

    /// Returns a copy with the payload region overwritten by `pattern`.
    ///
    /// Byte `i` of the payload region receives `pattern[i % pattern.len()]`
    /// where `i` is the absolute offset within the segment. The header is
    /// left untouched. An empty pattern returns the segment unchanged.
    pub fn with_payload_pattern(&self, pattern: &[u8]) -> Self {
        if pattern.is_empty() || self.0.len() <= HEADER_SIZE {
            return self.clone();
        }
        let mut buf = BytesMut::from(&self.0[..]);
        for (i, byte) in buf.iter_mut().enumerate().skip(HEADER_SIZE) {
            *byte = pattern[i % pattern.len()];
        }
        Self(buf.freeze())
    }

    fn read_u8(&self, offset: usize) -> u8 {
        self.0.get(offset).copied().unwrap_or(0)
    }

    fn read_u16(&self, offset: usize) -> u16 {
        u16::from_be_bytes([self.read_u8(offset), self.read_u8(offset + 1)])
    }
}

fn is_properly_printable(byte: u8) -> bool {
    byte == b' ' || byte.is_ascii_graphic()
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{} #{:04x} ",
            if self.is_syn() { 'S' } else { '-' },
            if self.is_fin() { 'F' } else { '-' },
            self.seq_num()
        )?;
        if self.is_ack() {
            write!(f, "A{:04x}", self.ack_num())?;
        } else {
            f.write_str("-----")?;
        }
        write!(f, " W{:02x} ", self.window())?;

        let payload = self.payload();
        for &byte in payload.iter().take(DISPLAY_SNIPPET) {
            let shown = if is_properly_printable(byte) {
                byte as char
            } else {
                '?'
            };
            write!(f, "{shown}")?;
        }
        if self.data_len() as usize > DISPLAY_SNIPPET {
            f.write_str("...")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Segment({self}, {} bytes)", self.len())
    }
}

impl From<Vec<u8>> for Segment {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

impl Serialize for Segment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Segment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = hex::decode(encoded).map_err(serde::de::Error::custom)?;
        Ok(Self::from(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_segment(seq: u16, payload: &[u8]) -> Segment {
        Segment::new(
            SegmentHeader {
                seq_num: seq,
                ack_num: 7,
                flags: ACK,
                window: 10,
            },
            payload,
        )
    }

    #[test]
    fn test_header_fields_at_fixed_offsets() {
        let segment = Segment::new(
            SegmentHeader {
                seq_num: 0x1234,
                ack_num: 0xabcd,
                flags: SYN | ACK,
                window: 0x0a,
            },
            b"hi",
        );

        let raw = segment.as_bytes();
        assert_eq!(raw.len(), SEGMENT_SIZE);
        assert_eq!(&raw[0..2], &[0x12, 0x34]);
        assert_eq!(&raw[2..4], &[0xab, 0xcd]);
        assert_eq!(raw[4], 6);
        assert_eq!(raw[5], 0x0a);
        assert_eq!(&raw[6..8], &[0, 2]);
        assert_eq!(&raw[8..10], &[0, 0]);
        assert_eq!(&raw[10..12], b"hi");

        assert!(segment.is_syn());
        assert!(segment.is_ack());
        assert!(!segment.is_fin());
        assert_eq!(segment.payload(), b"hi");
    }

    #[test]
    fn test_short_segment_reads_as_zero() {
        let segment = Segment::from(vec![0x00, 0x05, 0x00]);
        assert_eq!(segment.seq_num(), 5);
        assert_eq!(segment.ack_num(), 0);
        assert_eq!(segment.flags(), 0);
        assert!(segment.payload().is_empty());
        assert!(!segment.has_data());
    }

    #[test]
    fn test_payload_clamped_to_available_bytes() {
        let mut raw = vec![0u8; 12];
        raw[7] = 200; // claims 200 bytes of payload
        raw[10] = b'a';
        raw[11] = b'b';
        let segment = Segment::from(raw);
        assert_eq!(segment.payload(), b"ab");
    }

    #[test]
    fn test_payload_pattern_leaves_header_intact() {
        let original = data_segment(3, b"Hello world!");
        let corrupted = original.with_payload_pattern(b"check checksum! ");

        assert_eq!(corrupted.len(), original.len());
        assert_eq!(
            &corrupted.as_bytes()[..HEADER_SIZE],
            &original.as_bytes()[..HEADER_SIZE]
        );
        // Offset 10 maps to pattern index 10 % 16.
        assert_eq!(&corrupted.as_bytes()[10..16], b"ksum! ");
        assert_eq!(corrupted.as_bytes()[16], b'c');
        assert_eq!(
            corrupted.as_bytes()[SEGMENT_SIZE - 1],
            b"check checksum! "[(SEGMENT_SIZE - 1) % 16]
        );
    }

    #[test]
    fn test_display_summary() {
        let segment = Segment::new(
            SegmentHeader {
                seq_num: 1,
                ack_num: 2,
                flags: SYN | ACK,
                window: 16,
            },
            b"Hello\nworld, this is a long message",
        );
        assert_eq!(segment.to_string(), "S- #0001 A0002 W10 Hello?world, this is...");

        let plain = data_segment(0x10, b"");
        assert_eq!(
            Segment::new(SegmentHeader { flags: FIN, ..Default::default() }, b"").to_string(),
            "-F #0000 ----- W00 "
        );
        assert!(plain.to_string().starts_with("-- #0010 A0007"));
    }

    #[test]
    fn test_identity_is_bytewise() {
        let a = data_segment(1, b"abc");
        let b = data_segment(1, b"abc");
        let c = data_segment(1, b"abd");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_serde_hex_roundtrip() {
        let segment = data_segment(9, b"persist me");
        let json = serde_json::to_string(&segment).unwrap();
        assert!(json.starts_with("\"0009"));
        let decoded: Segment = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, segment);
    }
}
