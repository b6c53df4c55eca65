//! Delete-deferral queue: decouples a hostname's loss of an IP from the
//! packet-filter deletion, so DNS round-robin or a short outage does not
//! rapidly churn table entries. Grounded on `resolver/pf_update.go`'s
//! `deleteQueue`/`deleteMU`/single-timer design.

use crate::ipc::{Frame, Writer};
use crate::iplist::IpList;
use crate::types::UpdateMessage;
use log::{debug, error};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{Duration, Instant};

/// Upper bound on how long the sweep timer is ever allowed to sleep, even
/// with nothing queued.
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Entries with `expiry - now <= GRACE` are considered due in a sweep.
const SWEEP_GRACE: Duration = Duration::from_secs(1);

pub type SharedWriter<W> = Arc<AsyncMutex<Writer<W>>>;

#[derive(Default)]
pub struct DeleteQueue {
    inner: AsyncMutex<HashMap<String, HashMap<Ipv4Addr, Instant>>>,
}

impl DeleteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `ips` for deletion from `table` at `expiry`. Overwrites any
    /// existing (earlier or later) expiry for the same ip.
    async fn schedule(&self, table: &str, ips: &IpList, expiry: Instant) {
        let mut inner = self.inner.lock().await;
        let entry = inner.entry(table.to_string()).or_default();
        for ip in ips {
            entry.insert(*ip, expiry);
        }
    }

    /// Removes `ips` from `table`'s pending deletions, if present. Called
    /// when a fresh add arrives for an ip that was scheduled for deletion
    /// -- it cancels the deletion outright.
    async fn cancel(&self, table: &str, ips: &IpList) {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.get_mut(table) {
            for ip in ips {
                entry.remove(ip);
            }
        }
    }

    /// Scans every queued entry. Entries whose expiry is within
    /// [`SWEEP_GRACE`] of `now` are removed and returned, grouped by table.
    /// Returns the next deadline to sleep until, bounded above by
    /// `now + MAX_SWEEP_INTERVAL`.
    async fn sweep(&self, now: Instant) -> (Vec<(String, IpList)>, Instant) {
        let mut inner = self.inner.lock().await;
        let mut due = Vec::new();
        let mut next_deadline = now + MAX_SWEEP_INTERVAL;

        for (table, entries) in inner.iter_mut() {
            let mut expired = IpList::new();
            entries.retain(|ip, exp| {
                if exp.saturating_duration_since(now) <= SWEEP_GRACE {
                    expired.add(*ip);
                    false
                } else {
                    if *exp < next_deadline {
                        next_deadline = *exp;
                    }
                    true
                }
            });
            if !expired.is_empty() {
                due.push((table.clone(), expired));
            }
        }

        (due, next_deadline)
    }
}

/// Consumes adds from HostJobs: cancels any matching pending deletions, then
/// forwards an `addToTable` IPC call. Exits when the channel closes.
pub async fn run_add_stream<W: AsyncWrite + Unpin + Send>(
    queue: Arc<DeleteQueue>,
    rx: flume::Receiver<UpdateMessage>,
    writer: SharedWriter<W>,
) {
    while let Ok(msg) = rx.recv_async().await {
        if msg.ips.is_empty() {
            continue;
        }

        queue.cancel(&msg.table, &msg.ips).await;

        let mut argv = vec![msg.table.clone()];
        argv.extend(msg.ips.iter().map(ToString::to_string));
        call_or_fatal(&writer, Frame::new("addToTable", argv)).await;
    }
    debug!("add-stream processor exiting, channel closed");
}

/// Consumes deletions from HostJobs (marks them for deferred removal) and
/// runs the single resettable sweep timer that actually emits `delToTable`
/// once an entry's grace period has elapsed.
pub async fn run_del_stream<W: AsyncWrite + Unpin + Send>(
    queue: Arc<DeleteQueue>,
    delete_after: Duration,
    rx: flume::Receiver<UpdateMessage>,
    writer: SharedWriter<W>,
) {
    let mut next_deadline = Instant::now() + MAX_SWEEP_INTERVAL;
    let sleep = tokio::time::sleep_until(next_deadline);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            msg = rx.recv_async() => {
                match msg {
                    Ok(msg) if !msg.ips.is_empty() => {
                        let expiry = Instant::now() + delete_after;
                        queue.schedule(&msg.table, &msg.ips, expiry).await;
                        if expiry < next_deadline {
                            next_deadline = expiry;
                            sleep.as_mut().reset(next_deadline);
                        }
                    }
                    Ok(_) => continue,
                    Err(_) => {
                        debug!("del-stream processor exiting, channel closed");
                        return;
                    }
                }
            }
            () = &mut sleep => {
                let (due, recomputed) = queue.sweep(Instant::now()).await;
                for (table, ips) in due {
                    let mut argv = vec![table];
                    argv.extend(ips.iter().map(ToString::to_string));
                    call_or_fatal(&writer, Frame::new("delToTable", argv)).await;
                }
                next_deadline = recomputed;
                sleep.as_mut().reset(next_deadline);
            }
        }
    }
}

pub(crate) async fn call_or_fatal<W: AsyncWrite + Unpin + Send>(writer: &SharedWriter<W>, frame: Frame) {
    let mut w = writer.lock().await;
    if let Err(e) = w.call(frame).await {
        error!("ipc write failed, exiting: {e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ips(addrs: &[&str]) -> IpList {
        addrs.iter().map(|a| a.parse().unwrap()).collect::<Vec<_>>().into()
    }

    #[tokio::test]
    async fn schedule_then_sweep_after_grace_elapses() {
        let q = DeleteQueue::new();
        let now = Instant::now();
        q.schedule("t", &ips(&["10.0.0.1"]), now).await;
        let (due, _) = q.sweep(now).await;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].0, "t");
        assert!(due[0].1.contains(&"10.0.0.1".parse().unwrap()));
    }

    #[tokio::test]
    async fn cancel_prevents_future_sweep_emission() {
        let q = DeleteQueue::new();
        let now = Instant::now();
        q.schedule("t", &ips(&["10.0.0.1"]), now).await;
        q.cancel("t", &ips(&["10.0.0.1"])).await;
        let (due, _) = q.sweep(now).await;
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn not_yet_expired_entries_are_retained_and_bound_next_deadline() {
        let q = DeleteQueue::new();
        let now = Instant::now();
        let future = now + Duration::from_secs(120);
        q.schedule("t", &ips(&["10.0.0.1"]), future).await;
        let (due, next) = q.sweep(now).await;
        assert!(due.is_empty());
        assert_eq!(next, future);
    }
}
