use std::io;

use anyhow::Result;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use kubegate_exec::{TerminalBridge, TerminalConnection, TerminalSize};
use kubegate_k8s::{Cluster, PodTarget};

/// Keeps the local terminal in raw mode while a shell session runs
struct RawMode;

impl RawMode {
    fn enable() -> io::Result<Self> {
        enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        // Best effort cleanup on drop
        let _ = disable_raw_mode();
    }
}

fn current_size() -> Option<TerminalSize> {
    crossterm::terminal::size()
        .ok()
        .map(|(cols, rows)| TerminalSize::new(cols, rows))
}

/// Attach the local terminal to a shell in the container
pub async fn run(
    cluster: &Cluster,
    target: PodTarget,
    shell: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    let (resize_tx, resize_rx) = mpsc::channel(4);
    if let Some(size) = current_size() {
        let _ = resize_tx.try_send(size);
    }
    let watcher = tokio::spawn(watch_size(resize_tx));

    let connection = TerminalConnection {
        input: tokio::io::stdin(),
        output: tokio::io::stdout(),
        resize: resize_rx,
    };

    let mut bridge = TerminalBridge::new(cluster, target, shell);
    let result = {
        let _raw = RawMode::enable()?;
        bridge.run(connection, cancel).await
    };
    watcher.abort();

    tracing::debug!(state = ?bridge.state(), "shell session ended");
    Ok(result?)
}

#[cfg(unix)]
async fn watch_size(resize: mpsc::Sender<TerminalSize>) {
    use tokio::signal::unix::{SignalKind, signal};

    let Ok(mut winch) = signal(SignalKind::window_change()) else {
        tracing::warn!("terminal size changes will not be forwarded");
        return;
    };
    while winch.recv().await.is_some() {
        if let Some(size) = current_size()
            && resize.send(size).await.is_err()
        {
            break;
        }
    }
}

#[cfg(not(unix))]
async fn watch_size(_resize: mpsc::Sender<TerminalSize>) {
    futures::future::pending::<()>().await
}
