//! mxlink — interactive demo over an in-memory link.
//!
//! Each stdin line is sent as a message (with a trailing `\r`) to a
//! simulated device on the other end of a [`MemoryLink`]. With `--echo`
//! the device sends every frame straight back; otherwise it logs what it
//! receives. `--no-checksum` runs both ends in raw mode.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use mxlink::{Incoming, MemoryLink, MessageReceiver, MessageSender};
use mxlink_core::MxlinkConfig;

#[derive(Debug, Default)]
struct Args {
    echo: bool,
    no_checksum: bool,
}

impl Args {
    fn parse() -> Result<Self> {
        let mut args = Args::default();
        for arg in std::env::args().skip(1) {
            match arg.as_str() {
                "--echo" => args.echo = true,
                "--no-checksum" => args.no_checksum = true,
                other => {
                    anyhow::bail!("unknown argument: {other} (expected --echo, --no-checksum)")
                }
            }
        }
        Ok(args)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse()?;

    // Config is read before logging is up; failures are reported after.
    let write_result = MxlinkConfig::write_default_if_missing();
    let load_result = MxlinkConfig::load();
    let mut config = load_result.as_ref().cloned().unwrap_or_default();
    if args.no_checksum {
        config.envelope.checksum = false;
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = write_result {
        tracing::warn!(error = %e, "failed to write default config");
    }
    if let Err(e) = load_result {
        tracing::warn!(error = %e, "failed to load config, using defaults");
    }
    tracing::info!(
        echo = args.echo,
        checksum = config.envelope.checksum,
        policy = ?config.transmit.retry_policy,
        "mxlink starting"
    );

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Link and endpoints ───────────────────────────────────────────────────
    let ((host_link, host_events), (device_link, device_events)) = MemoryLink::pair();
    let (mut host_tx, host_rx, host_queue_task) = mxlink::open(
        Arc::new(host_link),
        host_events,
        &config,
        shutdown_tx.subscribe(),
    );
    let (device_tx, device_rx, device_queue_task) = mxlink::open(
        Arc::new(device_link),
        device_events,
        &config,
        shutdown_tx.subscribe(),
    );

    let device_task = tokio::spawn(run_device(device_tx, device_rx, args.echo));
    let host_task = tokio::spawn(print_incoming(host_rx));

    // ── Stdin ────────────────────────────────────────────────────────────────
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut shutdown_rx = shutdown_tx.subscribe();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            line = lines.next_line() => match line? {
                Some(line) => {
                    if let Err(e) = host_tx.send_text(&format!("{line}\r")).await {
                        tracing::error!(error = %e, "send failed");
                    }
                }
                None => {
                    tracing::info!("stdin closed");
                    if tokio::time::timeout(Duration::from_secs(2), host_tx.flush())
                        .await
                        .is_err()
                    {
                        tracing::warn!(pending = host_tx.queue().pending(), "queue not drained");
                    }
                    // Give the echo a moment to come back.
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    let _ = shutdown_tx.send(());
                    break;
                }
            }
        }
    }

    let _ = host_queue_task.await;
    let _ = device_queue_task.await;
    device_task.abort();
    host_task.abort();
    tracing::info!("shut down");
    Ok(())
}

/// Simulated device: echo frames back or just log them.
async fn run_device(mut tx: MessageSender, mut rx: MessageReceiver, echo: bool) {
    while let Some(event) = rx.recv().await {
        let Incoming::Message(message) = event else {
            tracing::debug!(?event, "device link event");
            continue;
        };
        tracing::info!(
            text = message.text.trim_end(),
            compressed = message.compressed,
            "device received"
        );
        if let Some(Ok(command)) = message.command() {
            tracing::info!(cmd = %command.cmd, args = ?command.args, "device command");
        }
        if echo {
            if let Err(e) = tx.send_frame(&message.frame.payload, message.frame.binary) {
                tracing::warn!(error = %e, "echo failed");
            }
        }
    }
}

async fn print_incoming(mut rx: MessageReceiver) {
    while let Some(event) = rx.recv().await {
        match event {
            Incoming::Message(message) => println!("{}", message.text.trim_end()),
            Incoming::Connected => tracing::info!("connected"),
            Incoming::Disconnected => tracing::info!("disconnected"),
        }
    }
}
