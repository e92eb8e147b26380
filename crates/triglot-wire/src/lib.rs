//! Wire framer: serializes and parses fixed-header, variable-payload frames.
//!
//! Layout (network byte order, 16-byte header):
//!
//! ```text
//! byte 0       version
//! byte 1       frame type
//! bytes 2..4   flags (u16)
//! bytes 4..8   sequence (u32)
//! bytes 8..12  payload_length (u32)
//! bytes 12..16 checksum (u32)
//! bytes 16..   payload
//! ```
//!
//! The checksum covers the header with the checksum field zeroed, followed
//! by the payload — so computing it requires no scratch buffer beyond the
//! header array.

use bitflags::bitflags;
use std::fmt;

pub const HEADER_LEN: usize = 16;
pub const PROTOCOL_VERSION: u8 = 1;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FrameFlags: u16 {
        const ENCRYPTED = 0b0001;
        const COMPRESSED = 0b0010;
        const URGENT = 0b0100;
        const RELIABLE = 0b1000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Handshake,
    Auth,
    Command,
    Response,
    Error,
    Heartbeat,
}

impl FrameType {
    pub fn as_u8(self) -> u8 {
        match self {
            FrameType::Handshake => 0x01,
            FrameType::Auth => 0x02,
            FrameType::Command => 0x03,
            FrameType::Response => 0x04,
            FrameType::Error => 0x05,
            FrameType::Heartbeat => 0x06,
        }
    }
}

impl TryFrom<u8> for FrameType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(FrameType::Handshake),
            0x02 => Ok(FrameType::Auth),
            0x03 => Ok(FrameType::Command),
            0x04 => Ok(FrameType::Response),
            0x05 => Ok(FrameType::Error),
            0x06 => Ok(FrameType::Heartbeat),
            other => Err(WireError::BadFrameType(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub frame_type: FrameType,
    pub flags: FrameFlags,
    pub sequence: u32,
    pub payload_length: u32,
    pub checksum: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: Header,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    FrameTooLarge { payload_length: u32, max: u32 },
    ChecksumMismatch { expected: u32, actual: u32 },
    VersionMismatch { local_major: u8, peer_major: u8 },
    BadFrameType(u8),
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::FrameTooLarge { payload_length, max } => write!(
                f,
                "frame payload of {payload_length} bytes exceeds configured max {max}"
            ),
            WireError::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: expected {expected:#010x}, got {actual:#010x}")
            }
            WireError::VersionMismatch { local_major, peer_major } => write!(
                f,
                "version mismatch: local major {local_major}, peer major {peer_major}"
            ),
            WireError::BadFrameType(v) => write!(f, "unrecognized frame type byte {v:#04x}"),
        }
    }
}

impl std::error::Error for WireError {}

/// Result of attempting to parse a frame out of a byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    Frame { frame: Frame, consumed: usize },
    NeedMore { needed: usize },
    Malformed(WireError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramerConfig {
    pub max_payload_len: u32,
}

impl Default for FramerConfig {
    fn default() -> Self {
        FramerConfig {
            max_payload_len: 1 << 20, // 1 MiB
        }
    }
}

fn header_bytes(frame_type: FrameType, flags: FrameFlags, sequence: u32, payload_length: u32, checksum: u32) -> [u8; HEADER_LEN] {
    let mut buf = [0u8; HEADER_LEN];
    buf[0] = PROTOCOL_VERSION;
    buf[1] = frame_type.as_u8();
    buf[2..4].copy_from_slice(&flags.bits().to_be_bytes());
    buf[4..8].copy_from_slice(&sequence.to_be_bytes());
    buf[8..12].copy_from_slice(&payload_length.to_be_bytes());
    buf[12..16].copy_from_slice(&checksum.to_be_bytes());
    buf
}

/// Serialize a frame: header (with checksum computed over the
/// zeroed-checksum header plus payload) followed by the payload.
pub fn frame(frame_type: FrameType, flags: FrameFlags, sequence: u32, payload: &[u8]) -> Vec<u8> {
    let payload_length = payload.len() as u32;
    let mut zeroed = header_bytes(frame_type, flags, sequence, payload_length, 0);
    let mut to_hash = Vec::with_capacity(HEADER_LEN + payload.len());
    to_hash.extend_from_slice(&zeroed);
    to_hash.extend_from_slice(payload);
    let checksum = triglot_hash::checksum(&to_hash);

    zeroed[12..16].copy_from_slice(&checksum.to_be_bytes());
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&zeroed);
    out.extend_from_slice(payload);
    out
}

/// Parse a single frame out of the front of `bytes`, validating payload
/// length, checksum, and version. Does not consume partial trailing data;
/// callers interested in streaming should use [`IncrementalParser`].
pub fn parse(bytes: &[u8], config: &FramerConfig) -> ParseOutcome {
    if bytes.len() < HEADER_LEN {
        return ParseOutcome::NeedMore {
            needed: HEADER_LEN - bytes.len(),
        };
    }

    let version = bytes[0];
    let frame_type = match FrameType::try_from(bytes[1]) {
        Ok(t) => t,
        Err(e) => return ParseOutcome::Malformed(e),
    };
    let flags = FrameFlags::from_bits_truncate(u16::from_be_bytes([bytes[2], bytes[3]]));
    let sequence = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let payload_length = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    let checksum = u32::from_be_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);

    if payload_length > config.max_payload_len {
        return ParseOutcome::Malformed(WireError::FrameTooLarge {
            payload_length,
            max: config.max_payload_len,
        });
    }

    let total_len = HEADER_LEN + payload_length as usize;
    if bytes.len() < total_len {
        return ParseOutcome::NeedMore {
            needed: total_len - bytes.len(),
        };
    }

    let payload = bytes[HEADER_LEN..total_len].to_vec();

    let mut zeroed_header = [0u8; HEADER_LEN];
    zeroed_header.copy_from_slice(&bytes[..HEADER_LEN]);
    zeroed_header[12..16].fill(0);
    let mut to_hash = Vec::with_capacity(total_len);
    to_hash.extend_from_slice(&zeroed_header);
    to_hash.extend_from_slice(&payload);
    let expected = triglot_hash::checksum(&to_hash);
    if expected != checksum {
        return ParseOutcome::Malformed(WireError::ChecksumMismatch {
            expected,
            actual: checksum,
        });
    }

    if version != PROTOCOL_VERSION {
        return ParseOutcome::Malformed(WireError::VersionMismatch {
            local_major: PROTOCOL_VERSION,
            peer_major: version,
        });
    }

    ParseOutcome::Frame {
        frame: Frame {
            header: Header {
                version,
                frame_type,
                flags,
                sequence,
                payload_length,
                checksum,
            },
            payload,
        },
        consumed: total_len,
    }
}

/// Accumulates bytes arriving off a stream transport and yields complete
/// frames as soon as enough data is buffered, carrying any partial tail
/// forward to the next call.
#[derive(Debug, Default)]
pub struct IncrementalParser {
    buf: Vec<u8>,
    config: FramerConfig,
}

impl IncrementalParser {
    pub fn new(config: FramerConfig) -> Self {
        IncrementalParser {
            buf: Vec::new(),
            config,
        }
    }

    /// Discard any buffered bytes. Callers that treat a `Malformed` result
    /// as recoverable (e.g. reporting `FrameTooLarge` back to the peer
    /// instead of faulting the transport) must call this before feeding
    /// more bytes, since the parser otherwise leaves its buffer untouched
    /// at the offending frame.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Feed newly-received bytes in and drain every frame that is now
    /// complete. A `Malformed` result is returned as soon as it's detected
    /// and the parser's buffer is left untouched beyond that point — callers
    /// should treat the transport as faulted and stop feeding it.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Frame>, WireError> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();
        loop {
            match parse(&self.buf, &self.config) {
                ParseOutcome::Frame { frame, consumed } => {
                    self.buf.drain(..consumed);
                    frames.push(frame);
                }
                ParseOutcome::NeedMore { .. } => break,
                ParseOutcome::Malformed(e) => return Err(e),
            }
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_then_parse_roundtrips() {
        let config = FramerConfig::default();
        let bytes = frame(FrameType::Command, FrameFlags::RELIABLE, 7, b"ping");
        match parse(&bytes, &config) {
            ParseOutcome::Frame { frame, consumed } => {
                assert_eq!(consumed, bytes.len());
                assert_eq!(frame.header.frame_type, FrameType::Command);
                assert_eq!(frame.header.sequence, 7);
                assert!(frame.header.flags.contains(FrameFlags::RELIABLE));
                assert_eq!(frame.payload, b"ping");
            }
            other => panic!("expected Frame, got {other:?}"),
        }
    }

    #[test]
    fn parse_reports_need_more_on_short_header() {
        let config = FramerConfig::default();
        let partial = vec![0u8; HEADER_LEN - 1];
        assert_eq!(parse(&partial, &config), ParseOutcome::NeedMore { needed: 1 });
    }

    #[test]
    fn parse_reports_need_more_on_short_payload() {
        let config = FramerConfig::default();
        let bytes = frame(FrameType::Command, FrameFlags::empty(), 1, b"hello world");
        let short = &bytes[..bytes.len() - 3];
        match parse(short, &config) {
            ParseOutcome::NeedMore { needed } => assert_eq!(needed, 3),
            other => panic!("expected NeedMore, got {other:?}"),
        }
    }

    #[test]
    fn tampered_payload_fails_checksum() {
        let config = FramerConfig::default();
        let mut bytes = frame(FrameType::Command, FrameFlags::empty(), 1, b"hello");
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        match parse(&bytes, &config) {
            ParseOutcome::Malformed(WireError::ChecksumMismatch { .. }) => {}
            other => panic!("expected ChecksumMismatch, got {other:?}"),
        }
    }

    #[test]
    fn tampered_header_fails_checksum() {
        let config = FramerConfig::default();
        let mut bytes = frame(FrameType::Command, FrameFlags::empty(), 1, b"hello");
        bytes[4] ^= 0x01; // sequence byte
        match parse(&bytes, &config) {
            ParseOutcome::Malformed(WireError::ChecksumMismatch { .. }) => {}
            other => panic!("expected ChecksumMismatch, got {other:?}"),
        }
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let config = FramerConfig { max_payload_len: 4 };
        let bytes = frame(FrameType::Command, FrameFlags::empty(), 1, b"too long");
        match parse(&bytes, &config) {
            ParseOutcome::Malformed(WireError::FrameTooLarge { .. }) => {}
            other => panic!("expected FrameTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn unknown_frame_type_is_rejected() {
        let config = FramerConfig::default();
        let mut bytes = frame(FrameType::Command, FrameFlags::empty(), 1, b"x");
        bytes[1] = 0xEE;
        match parse(&bytes, &config) {
            ParseOutcome::Malformed(WireError::BadFrameType(0xEE)) => {}
            other => panic!("expected BadFrameType, got {other:?}"),
        }
    }

    #[test]
    fn incremental_parser_handles_split_writes() {
        let mut parser = IncrementalParser::new(FramerConfig::default());
        let bytes = frame(FrameType::Heartbeat, FrameFlags::empty(), 3, b"beat");

        let mid = bytes.len() / 2;
        let first = parser.feed(&bytes[..mid]).unwrap();
        assert!(first.is_empty());

        let second = parser.feed(&bytes[mid..]).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].payload, b"beat");
    }

    #[test]
    fn reset_discards_a_malformed_tail_so_the_parser_can_recover() {
        let mut parser = IncrementalParser::new(FramerConfig { max_payload_len: 4 });
        let oversized = frame(FrameType::Command, FrameFlags::empty(), 1, b"too long");
        assert!(parser.feed(&oversized).is_err());

        parser.reset();
        let fine = frame(FrameType::Command, FrameFlags::empty(), 2, b"ok");
        let frames = parser.feed(&fine).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, b"ok");
    }

    #[test]
    fn incremental_parser_drains_multiple_frames_in_one_feed() {
        let mut parser = IncrementalParser::new(FramerConfig::default());
        let mut bytes = frame(FrameType::Command, FrameFlags::empty(), 1, b"one");
        bytes.extend(frame(FrameType::Command, FrameFlags::empty(), 2, b"two"));

        let frames = parser.feed(&bytes).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].payload, b"one");
        assert_eq!(frames[1].payload, b"two");
    }
}
