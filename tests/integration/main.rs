//! mxlink integration test harness.
//!
//! Each test wires two endpoints back to back over a [`MemoryLink`] pair:
//! a "host" and a "device". Faults are injected through the link.
//!
//!   cargo test --test integration

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;

use mxlink::{Message, MemoryLink, MessageReceiver, MessageSender};
use mxlink_core::MxlinkConfig;

mod delivery;
mod faults;

// ── Harness ───────────────────────────────────────────────────────────────────

/// How long a test waits for a message before failing.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Node {
    pub tx: MessageSender,
    pub rx: MessageReceiver,
    pub link: MemoryLink,
}

pub struct Harness {
    pub host: Node,
    pub device: Node,
    pub shutdown: broadcast::Sender<()>,
}

/// Connect a host and a device, both using `config`.
pub fn connect(config: &MxlinkConfig) -> Harness {
    let ((host_link, host_events), (device_link, device_events)) = MemoryLink::pair();
    let (shutdown, _) = broadcast::channel(1);

    let (tx, rx, _) = mxlink::open(
        Arc::new(host_link.clone()),
        host_events,
        config,
        shutdown.subscribe(),
    );
    let host = Node {
        tx,
        rx,
        link: host_link,
    };

    let (tx, rx, _) = mxlink::open(
        Arc::new(device_link.clone()),
        device_events,
        config,
        shutdown.subscribe(),
    );
    let device = Node {
        tx,
        rx,
        link: device_link,
    };

    Harness {
        host,
        device,
        shutdown,
    }
}

/// Config with compression switched off, so message sizes are predictable.
pub fn uncompressed() -> MxlinkConfig {
    let mut config = MxlinkConfig::default();
    config.envelope.compress_threshold = 0;
    config
}

/// Wait for the next verified message.
pub async fn next_message(rx: &mut MessageReceiver) -> Result<Message> {
    tokio::time::timeout(RECV_TIMEOUT, rx.recv_message())
        .await
        .context("timed out waiting for message")?
        .context("link event stream ended")
}

/// Text that does not compress: printable ASCII from a fixed LCG.
pub fn noise(len: usize) -> String {
    let mut state: u32 = 0x2545_f491;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            char::from(b' ' + ((state >> 24) % 95) as u8)
        })
        .collect()
}

#[test]
fn noise_is_deterministic_ascii() {
    let a = noise(500);
    assert_eq!(a, noise(500));
    assert_eq!(a.len(), 500);
    assert!(a.bytes().all(|b| (b' '..=b'~').contains(&b)));
}
