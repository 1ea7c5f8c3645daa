use crate::*;

use bytes::Bytes;
use mxlink::{Incoming, SendError};
use mxlink_core::envelope::append_checksum;
use mxlink_core::{FrameEncoder, RetryPolicy};

/// Chunks for a sealed text message, built outside any endpoint.
fn handmade_chunks(text: &str) -> Vec<Bytes> {
    FrameEncoder::new().encode(&append_checksum(text.as_bytes()), false)
}

/// With the default policy a failed chunk goes to the back of the queue,
/// the receiver sees the message out of order and drops it, and the
/// message behind it still arrives.
#[tokio::test]
async fn test_requeue_tail_loses_only_the_failed_message() -> Result<()> {
    let mut h = connect(&uncompressed());
    h.host.link.fail_next(1);

    let first = noise(600);
    assert_eq!(h.host.tx.send_text(&first).await?.chunks, 3);
    h.host.tx.send_text("second").await?;
    h.host.tx.flush().await;

    assert_eq!(h.host.link.failed_sends(), 1);
    assert_eq!(next_message(&mut h.device.rx).await?.text, "second");

    // The stranded first chunk is abandoned when the next message starts.
    h.host.tx.send_text("third").await?;
    assert_eq!(next_message(&mut h.device.rx).await?.text, "third");
    Ok(())
}

/// Retrying at the head keeps the stream in order, so nothing is lost.
#[tokio::test]
async fn test_retry_head_delivers_everything() -> Result<()> {
    let mut config = uncompressed();
    config.transmit.retry_policy = RetryPolicy::RetryHead;
    let mut h = connect(&config);
    h.host.link.fail_next(3);

    let first = noise(600);
    h.host.tx.send_text(&first).await?;
    h.host.tx.send_text("second").await?;

    assert_eq!(next_message(&mut h.device.rx).await?.text, first);
    assert_eq!(next_message(&mut h.device.rx).await?.text, "second");
    assert_eq!(h.host.link.failed_sends(), 3);
    Ok(())
}

/// A chunk the link silently loses takes its message with it.
#[tokio::test]
async fn test_silent_loss_drops_message() -> Result<()> {
    let mut h = connect(&uncompressed());
    h.host.link.drop_next(1);

    h.host.tx.send_text(&noise(600)).await?;
    h.host.tx.send_text("survivor").await?;
    h.host.tx.flush().await;

    assert_eq!(h.host.link.failed_sends(), 0);
    assert_eq!(next_message(&mut h.device.rx).await?.text, "survivor");
    Ok(())
}

/// A corrupted chunk fails the running checksum.
#[tokio::test]
async fn test_corrupted_chunk_drops_message() -> Result<()> {
    let mut h = connect(&MxlinkConfig::default());
    let chunks = handmade_chunks(&noise(300));
    assert_eq!(chunks.len(), 2);

    let mut bad = chunks[1].to_vec();
    bad[10] ^= 0x01;
    h.host.link.inject(chunks[0].clone());
    h.host.link.inject(Bytes::from(bad));
    h.host.tx.send_text("clean").await?;

    assert_eq!(next_message(&mut h.device.rx).await?.text, "clean");
    Ok(())
}

/// A frame that passes the transport but fails the text checksum is
/// dropped by the envelope layer.
#[tokio::test]
async fn test_bad_text_checksum_drops_message() -> Result<()> {
    let mut h = connect(&MxlinkConfig::default());
    let mut sealed = append_checksum(b"reboot");
    let last = sealed.len() - 1;
    sealed[last] = sealed[last].wrapping_add(1);
    for chunk in FrameEncoder::new().encode(&sealed, false) {
        h.host.link.inject(chunk);
    }
    h.host.tx.send_text("status").await?;

    assert_eq!(next_message(&mut h.device.rx).await?.text, "status");
    Ok(())
}

/// Losing the link abandons a half-received message.
#[tokio::test]
async fn test_disconnect_discards_partial_message() -> Result<()> {
    let mut h = connect(&MxlinkConfig::default());
    let chunks = handmade_chunks(&noise(300));

    h.host.link.inject(chunks[0].clone());
    h.host.link.disconnect();
    assert_eq!(h.device.rx.recv().await, Some(Incoming::Connected));
    assert_eq!(h.device.rx.recv().await, Some(Incoming::Disconnected));

    h.host.link.reconnect();
    assert_eq!(h.device.rx.recv().await, Some(Incoming::Connected));

    // Without the reset this would complete the old message.
    h.host.link.inject(chunks[1].clone());
    h.host.tx.send_text("fresh").await?;
    assert_eq!(next_message(&mut h.device.rx).await?.text, "fresh");
    Ok(())
}

/// Losing the link discards unsent chunks instead of retrying forever.
#[tokio::test]
async fn test_disconnect_flushes_transmit_queue() -> Result<()> {
    let mut h = connect(&uncompressed());
    h.host.link.disconnect();
    h.host.tx.send_text(&noise(600)).await?;
    assert!(!h.host.tx.queue().is_idle());

    assert_eq!(h.host.rx.recv().await, Some(Incoming::Connected));
    assert_eq!(h.host.rx.recv().await, Some(Incoming::Disconnected));
    tokio::time::timeout(RECV_TIMEOUT, h.host.tx.flush())
        .await
        .context("queue was not reset")?;
    assert!(h.host.link.delivered().is_empty());

    h.host.link.reconnect();
    assert_eq!(h.host.rx.recv().await, Some(Incoming::Connected));
    h.host.tx.send_text("back").await?;
    assert_eq!(next_message(&mut h.device.rx).await?.text, "back");
    Ok(())
}

/// While the link is down the sender refuses new messages and the link
/// sees no send attempts; sending resumes once the link is back.
#[tokio::test]
async fn test_send_while_disconnected() -> Result<()> {
    let mut h = connect(&MxlinkConfig::default());
    assert_eq!(h.host.rx.recv().await, Some(Incoming::Connected));

    h.host.link.disconnect();
    assert_eq!(h.host.rx.recv().await, Some(Incoming::Disconnected));

    let err = h.host.tx.send_text("queued?").await.unwrap_err();
    assert!(matches!(err, SendError::Disconnected), "unexpected error: {err}");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.host.link.failed_sends(), 0);
    assert!(h.host.tx.queue().is_idle());

    h.host.link.reconnect();
    assert_eq!(h.host.rx.recv().await, Some(Incoming::Connected));
    h.host.tx.send_text("resumed").await?;
    assert_eq!(next_message(&mut h.device.rx).await?.text, "resumed");
    Ok(())
}

/// A link that drops mid-send parks the queue instead of retrying until
/// the loss is observed.
#[tokio::test]
async fn test_link_drop_parks_queue() -> Result<()> {
    let mut h = connect(&uncompressed());
    h.host.link.disconnect();
    h.host.tx.send_text(&noise(600)).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.host.link.failed_sends(), 1);
    assert!(!h.host.tx.queue().link_up());
    assert_eq!(h.host.tx.queue().pending(), 3);
    Ok(())
}
