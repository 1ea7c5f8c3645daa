//! Message envelope — text checksum and optional gzip around a message.
//!
//! Sealed text looks like `<text><5 checksum chars>`. The checksum is the
//! FNV-1a hash of the text bytes written as five base-85 digits, least
//! significant first, using code points 40..=124. Because every checksum
//! character is at least 40, an uncompressed sealed message never ends in
//! [`COMPRESS_TAG`] (`$`, 36), which is how a receiver tells the two apart.
//!
//! A compressed envelope is `gzip(<text><checksum>) ++ [COMPRESS_TAG]` and
//! travels as a binary frame.
//!
//! Checksums cover bytes, not characters: firmware peers compute them over
//! the raw byte stream.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::config::EnvelopeConfig;
use crate::wire::{fnv1a, INITIAL_HASH};

/// Number of checksum characters appended to every sealed message.
pub const CHECKSUM_LEN: usize = 5;

/// Radix of the checksum digits.
pub const CHECKSUM_BASE: u32 = 85;

/// Code point of checksum digit zero.
pub const CHECKSUM_FIRST_CODE: u8 = 40;

/// Trailing byte marking a gzip-compressed envelope (`$`).
pub const COMPRESS_TAG: u8 = 0x24;

// ── Checksum ──────────────────────────────────────────────────────────────────

/// Checksum characters for `data`.
pub fn text_checksum(data: &[u8]) -> [u8; CHECKSUM_LEN] {
    let mut hash = fnv1a(INITIAL_HASH, data);
    let mut out = [0u8; CHECKSUM_LEN];
    for digit in out.iter_mut() {
        *digit = CHECKSUM_FIRST_CODE + (hash % CHECKSUM_BASE) as u8;
        hash /= CHECKSUM_BASE;
    }
    out
}

/// `data` followed by its checksum.
pub fn append_checksum(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + CHECKSUM_LEN);
    out.extend_from_slice(data);
    out.extend_from_slice(&text_checksum(data));
    out
}

/// Check the trailing checksum and return the bytes it covers.
pub fn verify_checksum(sealed: &[u8]) -> Result<&[u8], EnvelopeError> {
    if sealed.len() < CHECKSUM_LEN {
        return Err(EnvelopeError::TooShort(sealed.len()));
    }
    let (body, found) = sealed.split_at(sealed.len() - CHECKSUM_LEN);
    let expected = text_checksum(body);
    if found != expected {
        return Err(EnvelopeError::ChecksumMismatch {
            expected: String::from_utf8_lossy(&expected).into_owned(),
            found: String::from_utf8_lossy(found).into_owned(),
        });
    }
    Ok(body)
}

// ── Compression ───────────────────────────────────────────────────────────────

/// gzip `data` and append [`COMPRESS_TAG`].
pub fn compress(data: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data).map_err(EnvelopeError::Compress)?;
    let mut out = encoder.finish().map_err(EnvelopeError::Compress)?;
    out.push(COMPRESS_TAG);
    Ok(out)
}

/// Inflate a gzip stream (tag already stripped), refusing to produce more
/// than `limit` bytes.
pub fn decompress(data: &[u8], limit: usize) -> Result<Vec<u8>, EnvelopeError> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .take((limit as u64).saturating_add(1))
        .read_to_end(&mut out)
        .map_err(EnvelopeError::Decompress)?;
    if out.len() > limit {
        return Err(EnvelopeError::DecompressedTooLarge(limit));
    }
    Ok(out)
}

/// True if the buffer ends with the compression tag.
pub fn is_compressed(buf: &[u8]) -> bool {
    buf.last() == Some(&COMPRESS_TAG)
}

// ── Seal / open ───────────────────────────────────────────────────────────────

/// An envelope ready for the frame codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub bytes: Vec<u8>,
    /// Send as a binary frame. Set for compressed envelopes.
    pub binary: bool,
}

impl Sealed {
    pub fn is_compressed(&self) -> bool {
        self.binary && is_compressed(&self.bytes)
    }
}

/// A verified message recovered from a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opened {
    /// Body decoded as UTF-8, invalid sequences replaced.
    pub text: String,
    /// Verified body bytes, exactly as the peer sent them.
    pub body: Vec<u8>,
    pub compressed: bool,
    /// Size of the envelope as it arrived, before inflation.
    pub wire_len: usize,
}

/// Wrap an application message for sending.
pub fn seal(text: &str, config: &EnvelopeConfig) -> Result<Sealed, EnvelopeError> {
    let plain = if config.checksum {
        append_checksum(text.as_bytes())
    } else {
        text.as_bytes().to_vec()
    };

    // Without a checksum the receiver cannot tell a tag from text.
    if config.checksum && config.compress_threshold > 0 && plain.len() >= config.compress_threshold
    {
        let packed = compress(&plain)?;
        if packed.len() < plain.len() {
            return Ok(Sealed {
                bytes: packed,
                binary: true,
            });
        }
    }

    Ok(Sealed {
        bytes: plain,
        binary: false,
    })
}

/// Unwrap a reassembled frame payload into the application text.
pub fn open(payload: &[u8], config: &EnvelopeConfig) -> Result<Opened, EnvelopeError> {
    if !config.checksum {
        return Ok(Opened {
            text: String::from_utf8_lossy(payload).into_owned(),
            body: payload.to_vec(),
            compressed: false,
            wire_len: payload.len(),
        });
    }

    let compressed = is_compressed(payload);
    let inflated;
    let plain = if compressed {
        inflated = decompress(&payload[..payload.len() - 1], config.max_decompressed)?;
        inflated.as_slice()
    } else {
        payload
    };

    let body = verify_checksum(plain)?;
    Ok(Opened {
        text: String::from_utf8_lossy(body).into_owned(),
        body: body.to_vec(),
        compressed,
        wire_len: payload.len(),
    })
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("message too short for checksum: {0} bytes")]
    TooShort(usize),

    #[error("bad checksum: expected {expected:?}, found {found:?}")]
    ChecksumMismatch { expected: String, found: String },

    #[error("failed to compress: {0}")]
    Compress(std::io::Error),

    #[error("failed to decompress: {0}")]
    Decompress(std::io::Error),

    #[error("decompressed message exceeds {0} bytes")]
    DecompressedTooLarge(usize),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
