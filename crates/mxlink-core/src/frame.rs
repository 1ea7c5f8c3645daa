//! Frame codec — splits messages into chunks and puts them back together.
//!
//! Every chunk's checksum is seeded with the verified hash of the chunk
//! before it, so the trailer of chunk N commits to every byte of chunks
//! 0..=N. A lost, duplicated, reordered or corrupted chunk breaks the chain
//! at the next chunk even when its sequence number happens to line up.
//! The sequence check and the checksum chain are complementary: the FIRST
//! bit is what resynchronizes a receiver after either one fails.
//!
//! The sequence field is 5 bits wide but a message may use up to 35
//! chunks, so the counter wraps inside the largest messages. The field
//! cannot be widened without breaking existing firmware; the checksum
//! chain still covers the wrapped chunks.

use bytes::{BufMut, Bytes, BytesMut};

use crate::wire::{
    fnv1a, fold_trailer, next_sequence, ChunkHeader, ChunkView, WireError, HEADER_SIZE,
    INITIAL_HASH, MAX_CHUNKS, MAX_PAYLOAD, TRAILER_SIZE,
};

/// A fully reassembled message as delivered by the receive path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub payload: Bytes,
    pub binary: bool,
}

// ── Send path ─────────────────────────────────────────────────────────────────

/// Splits outgoing messages into chunks.
///
/// One encoder per link direction: the sequence counter runs across
/// message boundaries.
#[derive(Debug, Default)]
pub struct FrameEncoder {
    next_sequence: u8,
}

impl FrameEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number the next chunk will carry.
    pub fn next_sequence(&self) -> u8 {
        self.next_sequence
    }

    /// Encode one message into wire chunks, in transmission order.
    ///
    /// Always yields at least one chunk; an empty message becomes a single
    /// FIRST|LAST chunk with no payload. No chunk limit is enforced here;
    /// a receiver drops messages longer than [`crate::wire::MAX_MESSAGE`].
    pub fn encode(&mut self, data: &[u8], binary: bool) -> Vec<Bytes> {
        let count = data.len().div_ceil(MAX_PAYLOAD).max(1);
        let mut chunks = Vec::with_capacity(count);
        let mut hash = INITIAL_HASH;

        for index in 0..count {
            let start = index * MAX_PAYLOAD;
            let end = (start + MAX_PAYLOAD).min(data.len());
            let payload = &data[start..end];

            let header =
                ChunkHeader::new(index == 0, index + 1 == count, binary, self.next_sequence);
            self.next_sequence = next_sequence(self.next_sequence);

            let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len() + TRAILER_SIZE);
            buf.put_u8(header.as_byte());
            buf.put_slice(payload);
            hash = fnv1a(hash, &buf);
            buf.put_slice(&fold_trailer(hash));

            chunks.push(buf.freeze());
        }

        chunks
    }
}

// ── Receive path ──────────────────────────────────────────────────────────────

/// Why an inbound chunk was discarded. Every variant also abandons the
/// message being reassembled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("chunk(s) lost: no message in progress")]
    NoSession,

    #[error("chunk(s) lost: expected sequence {expected}, got {got}")]
    SequenceMismatch { expected: u8, got: u8 },

    #[error("chunk(s) lost: message exceeds {} chunks", MAX_CHUNKS)]
    TooManyChunks,

    #[error("invalid checksum")]
    InvalidChecksum,
}

/// Receiver-side state for one in-progress message.
#[derive(Debug, Default)]
struct Session {
    expected_sequence: u8,
    running_hash: u32,
    accumulated_length: usize,
    held_chunks: Vec<Bytes>,
}

impl Session {
    fn is_active(&self) -> bool {
        !self.held_chunks.is_empty()
    }

    /// Index of the last accepted chunk, if any.
    fn chunk_index(&self) -> Option<usize> {
        self.held_chunks.len().checked_sub(1)
    }

    fn reset(&mut self) {
        self.accumulated_length = 0;
        self.held_chunks.clear();
    }
}

/// Reassembles inbound chunks into frames.
///
/// Owns the session for one link; feed it packets strictly in arrival
/// order.
#[derive(Debug, Default)]
pub struct Reassembler {
    session: Session,
}

impl Reassembler {
    pub fn new() -> Self {
        Self {
            session: Session {
                held_chunks: Vec::with_capacity(MAX_CHUNKS),
                ..Session::default()
            },
        }
    }

    /// True while a multi-chunk message is partially received.
    pub fn in_progress(&self) -> bool {
        self.session.is_active()
    }

    /// Drop any partially received message.
    pub fn reset(&mut self) {
        self.session.reset();
    }

    /// Process one inbound packet.
    ///
    /// Returns `Ok(Some(frame))` when the packet completes a message,
    /// `Ok(None)` when more chunks are needed, and `Err` when the packet
    /// was discarded. On error the in-progress message is gone.
    pub fn push(&mut self, packet: &[u8]) -> Result<Option<Frame>, FrameError> {
        let result = self.accept(packet);
        if result.is_err() {
            self.session.reset();
        }
        result
    }

    fn accept(&mut self, packet: &[u8]) -> Result<Option<Frame>, FrameError> {
        let chunk = ChunkView::parse(packet)?;
        let header = chunk.header;
        let session = &mut self.session;

        if !header.is_first() {
            let index = session.chunk_index().ok_or(FrameError::NoSession)?;
            if header.sequence() != session.expected_sequence {
                return Err(FrameError::SequenceMismatch {
                    expected: session.expected_sequence,
                    got: header.sequence(),
                });
            }
            if index + 1 >= MAX_CHUNKS {
                return Err(FrameError::TooManyChunks);
            }
        }

        let seed = if header.is_first() {
            INITIAL_HASH
        } else {
            session.running_hash
        };
        let hash = fnv1a(seed, chunk.signed_bytes());
        if fold_trailer(hash) != chunk.trailer {
            return Err(FrameError::InvalidChecksum);
        }

        if header.is_first() {
            session.reset();
        }

        session.accumulated_length += chunk.payload.len();
        session.running_hash = hash;
        session.expected_sequence = next_sequence(header.sequence());
        session
            .held_chunks
            .push(Bytes::copy_from_slice(chunk.payload));

        if !header.is_last() {
            return Ok(None);
        }

        let mut payload = BytesMut::with_capacity(session.accumulated_length);
        for held in session.held_chunks.drain(..) {
            payload.put_slice(&held);
        }
        session.reset();

        Ok(Some(Frame {
            payload: payload.freeze(),
            binary: header.is_binary(),
        }))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
