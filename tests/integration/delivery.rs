use crate::*;

use mxlink::{Incoming, SendError};
use mxlink_core::{MAX_CHUNKS, MAX_MESSAGE};

/// A short line arrives intact, as one chunk, in text mode.
#[tokio::test]
async fn test_short_message_round_trip() -> Result<()> {
    let mut h = connect(&MxlinkConfig::default());
    assert_eq!(h.device.rx.recv().await, Some(Incoming::Connected));

    let report = h.host.tx.send_text("help\r").await?;
    assert_eq!(report.chunks, 1);

    let msg = next_message(&mut h.device.rx).await?;
    assert_eq!(msg.text, "help\r");
    assert!(!msg.compressed);
    assert!(!msg.frame.binary);
    Ok(())
}

/// Messages arrive in send order across the 5-bit sequence wrap.
#[tokio::test]
async fn test_many_messages_keep_order() -> Result<()> {
    let mut h = connect(&uncompressed());

    for i in 0..80 {
        h.host.tx.send_text(&format!("line {i}")).await?;
    }
    for i in 0..80 {
        assert_eq!(next_message(&mut h.device.rx).await?.text, format!("line {i}"));
    }
    Ok(())
}

/// A multi-chunk message is split at the payload
/// limit and reassembled.
#[tokio::test]
async fn test_multi_chunk_message() -> Result<()> {
    let mut h = connect(&uncompressed());
    let text = noise(1000);

    let report = h.host.tx.send_text(&text).await?;
    assert!(!report.compressed);
    assert_eq!(report.chunks, 5);

    assert_eq!(next_message(&mut h.device.rx).await?.text, text);
    h.host.tx.flush().await;
    let sizes: Vec<usize> = h.host.link.delivered().iter().map(|p| p.len()).collect();
    assert_eq!(sizes, vec![244, 244, 244, 244, 49]);
    Ok(())
}

/// The largest message that fits in the chunk budget gets through.
#[tokio::test]
async fn test_largest_message() -> Result<()> {
    let mut h = connect(&uncompressed());
    let text = noise(MAX_MESSAGE - 5);

    let report = h.host.tx.send_text(&text).await?;
    assert_eq!(report.chunks, MAX_CHUNKS);
    assert_eq!(next_message(&mut h.device.rx).await?.text, text);
    Ok(())
}

/// Long repetitive text is compressed on the wire and restored.
#[tokio::test]
async fn test_compressed_message() -> Result<()> {
    let mut h = connect(&MxlinkConfig::default());
    let text = "temperature=21.5 humidity=40\n".repeat(400);
    assert!(text.len() > MAX_MESSAGE);

    let report = h.host.tx.send_text(&text).await?;
    assert!(report.compressed);
    assert!(report.chunks < MAX_CHUNKS);

    let msg = next_message(&mut h.device.rx).await?;
    assert_eq!(msg.text, text);
    assert!(msg.compressed);
    assert!(msg.frame.binary);
    Ok(())
}

/// An oversized message is dropped by the receiver; the next one is not.
#[tokio::test]
async fn test_oversized_message_is_dropped() -> Result<()> {
    let mut h = connect(&uncompressed());

    let report = h.host.tx.send_text(&noise(MAX_MESSAGE + 500)).await?;
    assert!(report.chunks > MAX_CHUNKS);
    h.host.tx.send_text("after").await?;

    assert_eq!(next_message(&mut h.device.rx).await?.text, "after");
    Ok(())
}

/// With checksums off, text goes out verbatim and is never compressed.
#[tokio::test]
async fn test_raw_mode() -> Result<()> {
    let mut config = MxlinkConfig::default();
    config.envelope.checksum = false;
    let mut h = connect(&config);

    let text = "x".repeat(2000);
    let report = h.host.tx.send_text(&text).await?;
    assert!(!report.compressed);
    assert_eq!(report.bytes, 2000);

    let msg = next_message(&mut h.device.rx).await?;
    assert_eq!(msg.text, text);
    assert_eq!(&msg.frame.payload[..], text.as_bytes());
    Ok(())
}

/// A device that echoes frames back produces the same text on the host,
/// compressed or not.
#[tokio::test]
async fn test_echo_preserves_frames() -> Result<()> {
    let mut h = connect(&MxlinkConfig::default());
    let long = "echo ".repeat(400);

    for text in ["ping", long.as_str()] {
        h.host.tx.send_text(text).await?;
        let msg = next_message(&mut h.device.rx).await?;
        h.device.tx.send_frame(&msg.frame.payload, msg.frame.binary)?;

        let back = next_message(&mut h.host.rx).await?;
        assert_eq!(back.text, text);
        assert_eq!(back.compressed, msg.compressed);
    }
    Ok(())
}

/// Writes are refused on a read-only link.
#[tokio::test]
async fn test_read_only_link() -> Result<()> {
    let mut h = connect(&MxlinkConfig::default());
    h.device.link.set_read_only(true);

    let err = h.device.tx.send_text("status").await.unwrap_err();
    assert!(matches!(err, SendError::ReadOnly), "unexpected error: {err}");
    assert!(h.device.tx.queue().is_idle());

    h.device.link.set_read_only(false);
    h.device.tx.send_text("status").await?;
    assert_eq!(next_message(&mut h.host.rx).await?.text, "status");
    Ok(())
}

/// After shutdown, sends fail with a closed queue.
#[tokio::test]
async fn test_send_after_shutdown() -> Result<()> {
    let mut h = connect(&MxlinkConfig::default());
    h.shutdown.send(())?;

    // The worker exits on its next poll.
    let mut result = Ok(());
    for _ in 0..100 {
        tokio::task::yield_now().await;
        result = h.host.tx.send_text("late").await.map(|_| ());
        if result.is_err() {
            break;
        }
    }
    assert!(matches!(result, Err(SendError::Closed(_))));

    tokio::time::timeout(RECV_TIMEOUT, h.host.tx.flush())
        .await
        .context("flush hung after shutdown")?;
    assert!(h.host.tx.queue().is_idle());
    Ok(())
}
