//! Endpoint — one side of an mxlink connection.
//!
//! [`open`] splits a link into a [`MessageSender`] and a
//! [`MessageReceiver`]. The sender seals text, frames it and enqueues the
//! chunks; the receiver reassembles inbound packets and opens envelopes.
//! Neither half surfaces transport or envelope errors for inbound data: a
//! bad chunk or message is logged and dropped, and the next message is
//! unaffected.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use mxlink_core::envelope::{self, EnvelopeError, Opened};
use mxlink_core::{
    Command, CommandError, EnvelopeConfig, Frame, FrameEncoder, MxlinkConfig, Reassembler,
};

use crate::link::{LinkAdapter, LinkEvent};
use crate::queue::{QueueClosed, TransmitQueue};

/// Open an endpoint on `link`.
///
/// `events` is the link's inbound event stream. The transmit worker stops
/// when `shutdown` fires or its sender is dropped.
pub fn open(
    link: Arc<dyn LinkAdapter>,
    events: mpsc::UnboundedReceiver<LinkEvent>,
    config: &MxlinkConfig,
    shutdown: broadcast::Receiver<()>,
) -> (MessageSender, MessageReceiver, JoinHandle<()>) {
    let (queue, worker) =
        TransmitQueue::spawn(link.clone(), config.transmit.retry_policy, shutdown);

    let sender = MessageSender {
        link,
        queue: queue.clone(),
        encoder: FrameEncoder::new(),
        envelope: config.envelope.clone(),
    };
    let receiver = MessageReceiver {
        events,
        queue,
        reassembler: Reassembler::new(),
        envelope: config.envelope.clone(),
    };
    (sender, receiver, worker)
}

// ── Sending ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("link is read-only")]
    ReadOnly,

    #[error("link is down")]
    Disconnected,

    #[error(transparent)]
    Closed(#[from] QueueClosed),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("compression task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// What a send put on the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReport {
    pub chunks: usize,
    pub bytes: usize,
    pub compressed: bool,
}

/// Outbound half. Messages are framed one at a time, so chunks of two
/// messages never interleave.
pub struct MessageSender {
    link: Arc<dyn LinkAdapter>,
    queue: TransmitQueue,
    encoder: FrameEncoder,
    envelope: EnvelopeConfig,
}

impl MessageSender {
    /// Seal and send a text message.
    pub async fn send_text(&mut self, text: &str) -> Result<SendReport, SendError> {
        self.ensure_writable()?;

        let sealed = if self.may_compress(text.len()) {
            let text = text.to_owned();
            let config = self.envelope.clone();
            tokio::task::spawn_blocking(move || envelope::seal(&text, &config)).await??
        } else {
            envelope::seal(text, &self.envelope)?
        };

        let compressed = sealed.is_compressed();
        if compressed {
            tracing::debug!(
                plain = text.len(),
                packed = sealed.bytes.len(),
                "message compressed"
            );
        }
        let chunks = self.enqueue(&sealed.bytes, sealed.binary)?;
        Ok(SendReport {
            chunks,
            bytes: sealed.bytes.len(),
            compressed,
        })
    }

    /// Send a command request or response.
    pub async fn send_command(&mut self, command: &Command) -> Result<SendReport, SendError> {
        let text = command.to_text()?;
        self.send_text(&text).await
    }

    /// Send a raw frame, bypassing the envelope.
    pub fn send_frame(&mut self, data: &[u8], binary: bool) -> Result<SendReport, SendError> {
        self.ensure_writable()?;
        let chunks = self.enqueue(data, binary)?;
        Ok(SendReport {
            chunks,
            bytes: data.len(),
            compressed: false,
        })
    }

    /// Wait until every enqueued chunk has been handed to the link.
    pub async fn flush(&self) {
        self.queue.idle().await;
    }

    pub fn queue(&self) -> &TransmitQueue {
        &self.queue
    }

    fn ensure_writable(&self) -> Result<(), SendError> {
        if !self.link.is_writable() {
            return Err(SendError::ReadOnly);
        }
        if !self.queue.link_up() {
            return Err(SendError::Disconnected);
        }
        Ok(())
    }

    fn may_compress(&self, text_len: usize) -> bool {
        self.envelope.checksum
            && self.envelope.compress_threshold > 0
            && text_len + envelope::CHECKSUM_LEN >= self.envelope.compress_threshold
    }

    fn enqueue(&mut self, data: &[u8], binary: bool) -> Result<usize, SendError> {
        let chunks = self.encoder.encode(data, binary);
        let count = chunks.len();
        if count > mxlink_core::MAX_CHUNKS {
            tracing::warn!(
                len = data.len(),
                chunks = count,
                "message exceeds receiver chunk limit, peer will drop it"
            );
        }
        for chunk in chunks {
            self.queue.enqueue(chunk)?;
        }
        tracing::debug!(len = data.len(), chunks = count, binary, "message queued");
        Ok(count)
    }
}

// ── Receiving ─────────────────────────────────────────────────────────────────

/// A verified inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message text with the checksum stripped and compression undone.
    pub text: String,
    /// The same message as bytes, for peers that don't send UTF-8.
    pub body: Bytes,
    pub compressed: bool,
    /// The frame as it came off the link.
    pub frame: Frame,
}

impl Message {
    /// Parse as a command. `None` for ordinary text.
    pub fn command(&self) -> Option<Result<Command, CommandError>> {
        Command::parse(&self.text)
    }
}

/// What the receiver hands to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Connected,
    Message(Message),
    Disconnected,
}

/// Inbound half. Owns the reassembly session for the link.
pub struct MessageReceiver {
    events: mpsc::UnboundedReceiver<LinkEvent>,
    queue: TransmitQueue,
    reassembler: Reassembler,
    envelope: EnvelopeConfig,
}

impl MessageReceiver {
    /// Next connection change or verified message. `None` once the link's
    /// event stream has ended.
    pub async fn recv(&mut self) -> Option<Incoming> {
        loop {
            match self.events.recv().await? {
                LinkEvent::Ready => {
                    tracing::info!("link ready");
                    self.queue.set_link_up(true);
                    return Some(Incoming::Connected);
                }
                LinkEvent::Lost => {
                    tracing::info!(
                        partial = self.reassembler.in_progress(),
                        unsent = self.queue.pending(),
                        "link lost, dropping partial state"
                    );
                    self.reassembler.reset();
                    self.queue.set_link_up(false);
                    self.queue.reset();
                    return Some(Incoming::Disconnected);
                }
                LinkEvent::Packet(packet) => {
                    if let Some(message) = self.on_packet(packet).await {
                        return Some(Incoming::Message(message));
                    }
                }
            }
        }
    }

    /// Next verified message, skipping connection events.
    pub async fn recv_message(&mut self) -> Option<Message> {
        loop {
            if let Incoming::Message(message) = self.recv().await? {
                return Some(message);
            }
        }
    }

    async fn on_packet(&mut self, packet: Bytes) -> Option<Message> {
        let frame = match self.reassembler.push(&packet) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::trace!(len = packet.len(), "chunk accepted");
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, len = packet.len(), "chunk discarded");
                return None;
            }
        };

        match self.open_envelope(&frame).await {
            Ok(opened) => {
                if opened.compressed {
                    tracing::debug!(
                        packed = opened.wire_len,
                        plain = opened.text.len(),
                        "message decompressed"
                    );
                }
                tracing::debug!(
                    len = opened.text.len(),
                    binary = frame.binary,
                    "message received"
                );
                Some(Message {
                    text: opened.text,
                    body: Bytes::from(opened.body),
                    compressed: opened.compressed,
                    frame,
                })
            }
            Err(e) => {
                tracing::warn!(error = %e, len = frame.payload.len(), "message dropped");
                None
            }
        }
    }

    async fn open_envelope(&self, frame: &Frame) -> Result<Opened, EnvelopeError> {
        if !(self.envelope.checksum && envelope::is_compressed(&frame.payload)) {
            return envelope::open(&frame.payload, &self.envelope);
        }
        let payload = frame.payload.clone();
        let config = self.envelope.clone();
        match tokio::task::spawn_blocking(move || envelope::open(&payload, &config)).await {
            Ok(result) => result,
            Err(e) => Err(EnvelopeError::Decompress(std::io::Error::other(e))),
        }
    }
}
