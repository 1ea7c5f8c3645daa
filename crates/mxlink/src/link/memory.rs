//! In-memory link — two adapters wired back to back.
//!
//! Used by the demo binary and by tests. Each side can be told to fail or
//! silently lose its next sends, to go read-only, or to drop the
//! connection.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::{LinkAdapter, LinkError, LinkEvent, MAX_PACKET};

/// Event stream handed to the owner of one side.
pub type LinkEvents = mpsc::UnboundedReceiver<LinkEvent>;

#[derive(Debug, Default)]
struct SideState {
    fail_next: AtomicUsize,
    drop_next: AtomicUsize,
    read_only: AtomicBool,
    in_flight: AtomicBool,
    overlapping_sends: AtomicUsize,
    failed: AtomicUsize,
    delivered: Mutex<Vec<Bytes>>,
}

/// One side of an in-memory link.
#[derive(Debug, Clone)]
pub struct MemoryLink {
    state: Arc<SideState>,
    connected: Arc<AtomicBool>,
    to_peer: mpsc::UnboundedSender<LinkEvent>,
    to_self: mpsc::UnboundedSender<LinkEvent>,
}

impl MemoryLink {
    /// Create two connected sides. Both event streams start with
    /// [`LinkEvent::Ready`].
    pub fn pair() -> ((MemoryLink, LinkEvents), (MemoryLink, LinkEvents)) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));

        let a = MemoryLink {
            state: Arc::default(),
            connected: connected.clone(),
            to_peer: b_tx.clone(),
            to_self: a_tx.clone(),
        };
        let b = MemoryLink {
            state: Arc::default(),
            connected,
            to_peer: a_tx.clone(),
            to_self: b_tx.clone(),
        };

        let _ = a_tx.send(LinkEvent::Ready);
        let _ = b_tx.send(LinkEvent::Ready);

        ((a, a_rx), (b, b_rx))
    }

    /// Fail the next `n` sends without delivering them.
    pub fn fail_next(&self, n: usize) {
        self.state.fail_next.store(n, Ordering::SeqCst);
    }

    /// Report success for the next `n` sends but never deliver them.
    pub fn drop_next(&self, n: usize) {
        self.state.drop_next.store(n, Ordering::SeqCst);
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.state.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Drop the connection. Both sides see [`LinkEvent::Lost`].
    pub fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self.to_self.send(LinkEvent::Lost);
            let _ = self.to_peer.send(LinkEvent::Lost);
        }
    }

    /// Bring a dropped connection back. Both sides see [`LinkEvent::Ready`].
    pub fn reconnect(&self) {
        if !self.connected.swap(true, Ordering::SeqCst) {
            let _ = self.to_self.send(LinkEvent::Ready);
            let _ = self.to_peer.send(LinkEvent::Ready);
        }
    }

    /// Deliver a packet to the peer as if this side had sent it, bypassing
    /// the adapter contract. For injecting hand-made chunks.
    pub fn inject(&self, packet: Bytes) {
        let _ = self.to_peer.send(LinkEvent::Packet(packet));
    }

    /// Packets delivered to the peer so far, in order.
    pub fn delivered(&self) -> Vec<Bytes> {
        self.state
            .delivered
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    /// Number of sends that failed.
    pub fn failed_sends(&self) -> usize {
        self.state.failed.load(Ordering::SeqCst)
    }

    /// Number of times `send` was entered while another send was pending.
    pub fn overlapping_sends(&self) -> usize {
        self.state.overlapping_sends.load(Ordering::SeqCst)
    }

    fn take_one(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl LinkAdapter for MemoryLink {
    async fn send(&self, packet: Bytes) -> Result<(), LinkError> {
        if self.state.in_flight.swap(true, Ordering::SeqCst) {
            self.state.overlapping_sends.fetch_add(1, Ordering::SeqCst);
        }
        // Complete asynchronously, like a radio write.
        tokio::task::yield_now().await;
        let result = self.complete(packet);
        self.state.in_flight.store(false, Ordering::SeqCst);
        if result.is_err() {
            self.state.failed.fetch_add(1, Ordering::SeqCst);
        }
        result
    }

    fn is_writable(&self) -> bool {
        !self.state.read_only.load(Ordering::SeqCst)
    }
}

impl MemoryLink {
    fn complete(&self, packet: Bytes) -> Result<(), LinkError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(LinkError::Disconnected);
        }
        if packet.len() > MAX_PACKET {
            return Err(LinkError::PacketTooLarge(packet.len()));
        }
        if Self::take_one(&self.state.fail_next) {
            return Err(LinkError::WriteFailed("injected failure".into()));
        }
        if Self::take_one(&self.state.drop_next) {
            return Ok(());
        }
        if let Ok(mut delivered) = self.state.delivered.lock() {
            delivered.push(packet.clone());
        }
        self.to_peer
            .send(LinkEvent::Packet(packet))
            .map_err(|_| LinkError::Disconnected)
    }
}
