//! mxlink wire format — the chunk layout placed on the link.
//!
//! These constants ARE the protocol. The device firmware on the other end
//! of the link implements the same layout, so changing any value here is a
//! breaking change.
//!
//! A chunk is laid out as:
//!
//! ```text
//! ┌────────┬──────────────────────┬──────────────┐
//! │ header │ payload              │ trailer      │
//! │  (1B)  │ (0..=240 bytes)      │ (3B, folded  │
//! │        │                      │  FNV-1a hash)│
//! └────────┴──────────────────────┴──────────────┘
//! ```
//!
//! Header bits:
//!   bits 0-4: sequence number, wraps modulo 32
//!   bit    5: message is binary
//!   bit    6: first chunk of a message
//!   bit    7: last chunk of a message

use static_assertions::const_assert;

// ── Sizes ─────────────────────────────────────────────────────────────────────

/// Largest packet the link accepts.
pub const MAX_PACKET: usize = 244;

/// Chunk header size in bytes.
pub const HEADER_SIZE: usize = 1;

/// Checksum trailer size in bytes.
pub const TRAILER_SIZE: usize = 3;

/// Largest payload one chunk can carry.
pub const MAX_PAYLOAD: usize = MAX_PACKET - HEADER_SIZE - TRAILER_SIZE;

/// Maximum number of chunks a receiver will hold for one message.
pub const MAX_CHUNKS: usize = 35;

/// Largest message that can be reassembled.
pub const MAX_MESSAGE: usize = MAX_CHUNKS * MAX_PAYLOAD;

// Compile-time guards. If these fail, the wire format has silently changed.
const_assert!(MAX_PAYLOAD == 240);
const_assert!(MAX_MESSAGE == 8400);

// ── Header ────────────────────────────────────────────────────────────────────

/// Set on every chunk of a binary message.
pub const FLAG_BINARY: u8 = 1 << 5;

/// Set on the first chunk of a message.
pub const FLAG_FIRST: u8 = 1 << 6;

/// Set on the last chunk of a message. A single-chunk message has both
/// FIRST and LAST.
pub const FLAG_LAST: u8 = 1 << 7;

/// Width of the sequence field.
pub const SEQ_BITS: u32 = 5;

/// Mask selecting the sequence field of a header.
pub const SEQ_MASK: u8 = (1 << SEQ_BITS) - 1;

const_assert!(SEQ_MASK == FLAG_BINARY - 1);

/// The one-byte chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader(u8);

impl ChunkHeader {
    pub fn new(first: bool, last: bool, binary: bool, sequence: u8) -> Self {
        let mut bits = sequence & SEQ_MASK;
        if first {
            bits |= FLAG_FIRST;
        }
        if last {
            bits |= FLAG_LAST;
        }
        if binary {
            bits |= FLAG_BINARY;
        }
        Self(bits)
    }

    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    pub fn as_byte(self) -> u8 {
        self.0
    }

    pub fn is_first(self) -> bool {
        self.0 & FLAG_FIRST != 0
    }

    pub fn is_last(self) -> bool {
        self.0 & FLAG_LAST != 0
    }

    pub fn is_binary(self) -> bool {
        self.0 & FLAG_BINARY != 0
    }

    pub fn sequence(self) -> u8 {
        self.0 & SEQ_MASK
    }
}

/// Sequence number that follows `sequence`.
pub fn next_sequence(sequence: u8) -> u8 {
    sequence.wrapping_add(1) & SEQ_MASK
}

// ── Checksum ──────────────────────────────────────────────────────────────────

pub const FNV32_OFFSET: u32 = 2_166_136_261;
pub const FNV32_PRIME: u32 = 16_777_619;

/// Seed for the first chunk of every message and for text checksums.
pub const INITIAL_HASH: u32 = FNV32_OFFSET;

/// Fold one byte into a running FNV-1a hash.
#[inline]
pub fn fnv1a_byte(hash: u32, byte: u8) -> u32 {
    (hash ^ u32::from(byte)).wrapping_mul(FNV32_PRIME)
}

/// FNV-1a over `data`, continuing from `seed`.
pub fn fnv1a(seed: u32, data: &[u8]) -> u32 {
    data.iter().fold(seed, |hash, &b| fnv1a_byte(hash, b))
}

/// Encode a 32-bit hash into the 3-byte trailer.
///
/// The two low bytes are kept as-is, the two high bytes are XOR-folded
/// into the third.
pub fn fold_trailer(hash: u32) -> [u8; TRAILER_SIZE] {
    [
        hash as u8,
        (hash >> 8) as u8,
        ((hash >> 16) ^ (hash >> 24)) as u8,
    ]
}

// ── Chunk view ────────────────────────────────────────────────────────────────

/// A borrowed, length-checked view of one received packet.
#[derive(Debug, Clone, Copy)]
pub struct ChunkView<'a> {
    pub header: ChunkHeader,
    pub payload: &'a [u8],
    pub trailer: [u8; TRAILER_SIZE],
    signed: &'a [u8],
}

impl<'a> ChunkView<'a> {
    /// Split a packet into header, payload and trailer.
    ///
    /// A packet must carry at least one payload byte, with one exception:
    /// a 4-byte FIRST|LAST chunk is the encoding of the empty message.
    pub fn parse(packet: &'a [u8]) -> Result<Self, WireError> {
        let len = packet.len();
        if len < HEADER_SIZE + TRAILER_SIZE || len > MAX_PACKET {
            return Err(WireError::InvalidLength(len));
        }
        let header = ChunkHeader::from_byte(packet[0]);
        if len == HEADER_SIZE + TRAILER_SIZE && !(header.is_first() && header.is_last()) {
            return Err(WireError::InvalidLength(len));
        }

        let body_end = len - TRAILER_SIZE;
        let mut trailer = [0u8; TRAILER_SIZE];
        trailer.copy_from_slice(&packet[body_end..]);

        Ok(Self {
            header,
            payload: &packet[HEADER_SIZE..body_end],
            trailer,
            signed: &packet[..body_end],
        })
    }

    /// The bytes covered by the checksum: header followed by payload.
    pub fn signed_bytes(&self) -> &'a [u8] {
        self.signed
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("invalid chunk size: {0}")]
    InvalidLength(usize),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
