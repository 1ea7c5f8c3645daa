//! Transmit queue — serializes outbound chunks over a link.
//!
//! The link accepts one write at a time. `TransmitQueue` is the cheap,
//! cloneable handle callers enqueue on; `TransmitWorker` is the task that
//! owns the pending chunks and keeps exactly one send in flight.
//!
//! A chunk whose send fails is retried according to [`RetryPolicy`]. With
//! the default `RequeueTail` it goes behind everything enqueued while it
//! was in flight, which reorders the stream and makes the receiver drop
//! the affected message.
//!
//! A send that fails with [`LinkError::Disconnected`] marks the link down
//! and the worker parks until the owner reports the link up again, resets
//! the queue, or shuts it down. When the worker exits, whatever it still
//! held is released so waiters on [`TransmitQueue::idle`] return.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use mxlink_core::RetryPolicy;

use crate::link::{LinkAdapter, LinkError};

enum QueueOp {
    Packet(Bytes),
    Reset,
}

/// Handle for enqueuing chunks. Clones share one queue.
#[derive(Clone)]
pub struct TransmitQueue {
    ops: mpsc::UnboundedSender<QueueOp>,
    /// Chunks enqueued and not yet sent or discarded, in-flight included.
    pending: Arc<watch::Sender<usize>>,
    link_up: Arc<watch::Sender<bool>>,
}

impl TransmitQueue {
    /// Start a worker for `link` and return its handle.
    pub fn spawn(
        link: Arc<dyn LinkAdapter>,
        policy: RetryPolicy,
        shutdown: broadcast::Receiver<()>,
    ) -> (Self, JoinHandle<()>) {
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let (pending, _) = watch::channel(0usize);
        let pending = Arc::new(pending);
        let (link_up, link_up_rx) = watch::channel(true);
        let link_up = Arc::new(link_up);

        let worker = TransmitWorker {
            link,
            policy,
            ops: ops_rx,
            queue: VecDeque::new(),
            pending: pending.clone(),
            link_up: link_up.clone(),
            link_up_rx,
            shutdown,
        };
        let task = tokio::spawn(worker.run());

        (
            Self {
                ops: ops_tx,
                pending,
                link_up,
            },
            task,
        )
    }

    /// Append a chunk. Never waits.
    pub fn enqueue(&self, packet: Bytes) -> Result<(), QueueClosed> {
        self.pending.send_modify(|n| *n += 1);
        if self.ops.send(QueueOp::Packet(packet)).is_err() {
            self.pending.send_modify(|n| *n = n.saturating_sub(1));
            return Err(QueueClosed);
        }
        Ok(())
    }

    /// Discard everything not yet sent. A send already in flight completes
    /// but is not retried.
    pub fn reset(&self) {
        let _ = self.ops.send(QueueOp::Reset);
    }

    /// Record whether the link can carry packets. A parked worker resumes
    /// when this goes back to true.
    pub fn set_link_up(&self, up: bool) {
        self.link_up.send_if_modified(|current| {
            let changed = *current != up;
            *current = up;
            changed
        });
    }

    /// False after the link was lost, until it is reported up again.
    pub fn link_up(&self) -> bool {
        *self.link_up.borrow()
    }

    /// No chunk queued and no send outstanding.
    pub fn is_idle(&self) -> bool {
        *self.pending.borrow() == 0
    }

    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    /// Wait until the queue is idle.
    pub async fn idle(&self) {
        let mut rx = self.pending.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

/// The transmit worker has exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("transmit queue is closed")]
pub struct QueueClosed;

struct TransmitWorker {
    link: Arc<dyn LinkAdapter>,
    policy: RetryPolicy,
    ops: mpsc::UnboundedReceiver<QueueOp>,
    queue: VecDeque<Bytes>,
    pending: Arc<watch::Sender<usize>>,
    link_up: Arc<watch::Sender<bool>>,
    link_up_rx: watch::Receiver<bool>,
    shutdown: broadcast::Receiver<()>,
}

impl TransmitWorker {
    async fn run(mut self) {
        self.serve().await;
        self.release_all();
    }

    async fn serve(&mut self) {
        loop {
            let link_up = *self.link_up_rx.borrow_and_update();
            if self.queue.is_empty() || !link_up {
                tokio::select! {
                    _ = self.shutdown.recv() => {
                        tracing::info!("transmit queue shutting down");
                        return;
                    }
                    op = self.ops.recv() => match op {
                        Some(op) => {
                            self.apply(op);
                        }
                        None => {
                            tracing::debug!("all queue handles dropped, transmit worker exiting");
                            return;
                        }
                    },
                    changed = self.link_up_rx.changed(), if !link_up => {
                        if changed.is_err() {
                            return;
                        }
                        tracing::debug!(
                            queued = self.queue.len(),
                            "link up, transmit queue resuming"
                        );
                    }
                }
                continue;
            }
            let Some(packet) = self.queue.pop_front() else {
                continue;
            };

            let result = tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("transmit queue shutting down");
                    return;
                }
                r = self.link.send(packet.clone()) => r,
            };

            // Everything enqueued while the send was outstanding goes in
            // first, so a requeued chunk lands behind it.
            let mut was_reset = false;
            while let Ok(op) = self.ops.try_recv() {
                was_reset |= self.apply(op);
            }

            match result {
                Ok(()) => {
                    tracing::trace!(
                        header = packet.first().copied().unwrap_or_default(),
                        trailer = hex::encode(&packet[packet.len().saturating_sub(3)..]),
                        len = packet.len(),
                        "chunk sent"
                    );
                    self.release(1);
                }
                Err(e) if was_reset => {
                    tracing::debug!(error = %e, "send failed after reset, not retrying");
                    self.release(1);
                }
                Err(LinkError::Disconnected) => {
                    tracing::debug!(
                        queued = self.queue.len() + 1,
                        "link down, transmit queue parked"
                    );
                    match self.policy {
                        RetryPolicy::RequeueTail => self.queue.push_back(packet),
                        RetryPolicy::RetryHead => self.queue.push_front(packet),
                    }
                    self.link_up.send_replace(false);
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        policy = ?self.policy,
                        queued = self.queue.len(),
                        "chunk send failed, requeueing"
                    );
                    match self.policy {
                        RetryPolicy::RequeueTail => self.queue.push_back(packet),
                        RetryPolicy::RetryHead => self.queue.push_front(packet),
                    }
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    /// Apply one queue operation. Returns true for a reset.
    fn apply(&mut self, op: QueueOp) -> bool {
        match op {
            QueueOp::Packet(packet) => {
                self.queue.push_back(packet);
                false
            }
            QueueOp::Reset => {
                let dropped = self.queue.len();
                self.queue.clear();
                self.release(dropped);
                if dropped > 0 {
                    tracing::info!(dropped, "transmit queue reset");
                }
                true
            }
        }
    }

    /// Give up everything still held, including chunks enqueued after the
    /// worker stopped reading.
    fn release_all(&mut self) {
        self.ops.close();
        while self.ops.try_recv().is_ok() {}
        self.queue.clear();
        self.pending.send_replace(0);
    }

    fn release(&self, n: usize) {
        if n > 0 {
            self.pending.send_modify(|p| *p = p.saturating_sub(n));
        }
    }
}
