//! Link adapters — the packet-level seam between mxlink and a radio.
//!
//! A link moves single packets of at most [`MAX_PACKET`] bytes and reports
//! what it receives as a stream of [`LinkEvent`]s. Discovery, pairing and
//! reconnect loops live in the adapter, not here.

pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;

pub use memory::MemoryLink;
pub use mxlink_core::wire::MAX_PACKET;

/// What a link reports to its owner, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The send/receive channel is up.
    Ready,
    /// One inbound notification, raw.
    Packet(Bytes),
    /// The connection dropped. The adapter may reconnect and send `Ready`
    /// again.
    Lost,
}

/// One packet-oriented connection.
///
/// Callers never have more than one `send` outstanding; an adapter may rely
/// on that.
#[async_trait]
pub trait LinkAdapter: Send + Sync {
    /// Transmit one packet of at most [`MAX_PACKET`] bytes.
    async fn send(&self, packet: Bytes) -> Result<(), LinkError>;

    /// False if the remote characteristic does not accept writes.
    fn is_writable(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// Returned only while the link is down. The adapter reports
    /// [`LinkEvent::Ready`] once it is back.
    #[error("link is not connected")]
    Disconnected,

    #[error("packet of {0} bytes exceeds link limit of {}", MAX_PACKET)]
    PacketTooLarge(usize),

    #[error("write failed: {0}")]
    WriteFailed(String),
}
