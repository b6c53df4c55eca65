//! Bridges `notify`'s synchronous callback API into an async channel.
//! Watches *directories*, not the files themselves, so an editor's
//! rename-over-write still produces an event for the watched path.

use anyhow::{Context, Result};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::mpsc as std_mpsc;
use tokio::sync::mpsc as tokio_mpsc;

/// The watcher itself must be kept alive by the caller for as long as events
/// are wanted -- dropping it tears down the underlying inotify instance.
pub fn spawn(dirs: &[&Path]) -> Result<(RecommendedWatcher, tokio_mpsc::Receiver<notify::Result<Event>>)> {
    let (std_tx, std_rx) = std_mpsc::channel();
    let mut watcher =
        notify::recommended_watcher(move |res| {
            let _ = std_tx.send(res);
        })
        .context("creating file watcher")?;

    for dir in dirs {
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("watching {}", dir.display()))?;
    }

    let (tokio_tx, tokio_rx) = tokio_mpsc::channel(16);
    std::thread::spawn(move || {
        while let Ok(event) = std_rx.recv() {
            if tokio_tx.blocking_send(event).is_err() {
                break;
            }
        }
    });

    Ok((watcher, tokio_rx))
}
