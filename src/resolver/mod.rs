//! Resolver child entrypoint. Runs after the supervisor has re-exec'd this
//! binary with `--resolver=<ppid>` and FDs 3-6 preopened. Grounded on
//! `resolver/resolveMain.go`: reopen FDs, parse, drop privileges, fan out
//! one HostJob per (table, host), then sit in a signal/parent-quit loop.

use crate::config::Config;
use crate::deletequeue::{self, call_or_fatal, DeleteQueue};
use crate::hostjob::{self, HostJobArgs};
use crate::ipc::{Frame, Writer};
use crate::resolvconf::ResolvConf;
use crate::types::UpdateMessage;
use anyhow::{Context, Result};
use log::{error, info};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use std::fs::File;
use std::os::fd::{FromRawFd, RawFd};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::unix::pipe;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{watch, Mutex as AsyncMutex};

const FD_LIVENESS: RawFd = 3;
const FD_IPC: RawFd = 4;
const FD_RESOLV: RawFd = 5;
const FD_CONFIG: RawFd = 6;

/// Privilege drop target user, matching the source's hardcoded "nobody".
const DROP_USER: &str = "nobody";
const CHROOT_DIR: &str = "/var/empty";

pub struct ResolverArgs {
    pub noflush: bool,
    pub nochroot: bool,
    pub verbose: u8,
}

pub async fn run(args: ResolverArgs) -> Result<()> {
    let mut writer = Writer::new(open_ipc_sender().context("opening ipc pipe")?);

    let resolv_file = unsafe { File::from_raw_fd(FD_RESOLV) };
    let config_file = unsafe { File::from_raw_fd(FD_CONFIG) };

    let resolv = match ResolvConf::parse(resolv_file) {
        Ok(r) => r,
        Err(e) => fatal(&mut writer, format!("parse resolv.conf: {e}")).await,
    };

    let config = match Config::parse(config_file) {
        Ok(c) => c,
        Err(e) => fatal(&mut writer, format!("{e}")).await,
    };

    if !args.nochroot {
        if let Err(e) = drop_privileges() {
            fatal::<()>(&mut writer, format!("privilege drop failed: {e:#}")).await;
        }
    }

    apply_pledge();

    let writer = Arc::new(AsyncMutex::new(writer));

    let liveness = open_liveness_receiver().context("opening liveness pipe")?;
    let (quit_tx, quit_rx) = watch::channel(false);
    spawn_parent_watcher(liveness, quit_tx.clone());

    let (add_tx, add_rx) = flume::bounded::<UpdateMessage>(100);
    let (del_tx, del_rx) = flume::bounded::<UpdateMessage>(100);

    let queue = Arc::new(DeleteQueue::new());
    tokio::spawn(deletequeue::run_add_stream(
        queue.clone(),
        add_rx,
        writer.clone(),
    ));
    tokio::spawn(deletequeue::run_del_stream(
        queue,
        config.delete_after,
        del_rx,
        writer.clone(),
    ));

    call_or_fatal(&writer, Frame::new("startup", vec![])).await;

    let verbose = if args.verbose > 0 { args.verbose } else { config.verbose };
    let (flush_tx, flush_rx) = watch::channel(0u64);

    for (table, hosts) in &config.tables {
        if !args.noflush {
            call_or_fatal(&writer, Frame::new("flushTable", vec![table.clone()])).await;
        }
        for host in hosts {
            let job = HostJobArgs {
                table: table.clone(),
                host: host.clone(),
                verbose,
                add_tx: add_tx.clone(),
                del_tx: del_tx.clone(),
                flush_rx: flush_rx.clone(),
                quit_rx: quit_rx.clone(),
                servers: resolv.nameservers.clone(),
            };
            tokio::spawn(hostjob::run(job));
        }
    }

    run_signal_loop(quit_tx, quit_rx, flush_tx, config.flush).await
}

async fn fatal<T>(writer: &mut Writer<pipe::Sender>, msg: String) -> T {
    error!("{msg}");
    writer.write_fatal(&msg).await;
    std::process::exit(1);
}

fn set_nonblocking(fd: RawFd) -> nix::Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags))?;
    Ok(())
}

fn open_ipc_sender() -> Result<pipe::Sender> {
    set_nonblocking(FD_IPC)?;
    Ok(unsafe { pipe::Sender::from_raw_fd(FD_IPC) })
}

fn open_liveness_receiver() -> Result<pipe::Receiver> {
    set_nonblocking(FD_LIVENESS)?;
    Ok(unsafe { pipe::Receiver::from_raw_fd(FD_LIVENESS) })
}

/// Reads FD 3 to EOF and signals quit once the supervisor end closes -- the
/// parent-death detector.
fn spawn_parent_watcher(mut liveness: pipe::Receiver, quit_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        let mut buf = [0u8; 1];
        loop {
            match liveness.read(&mut buf).await {
                Ok(0) => {
                    info!("parent pipe closed, exiting");
                    let _ = quit_tx.send(true);
                    return;
                }
                Ok(_) => continue,
                Err(e) => {
                    error!("liveness pipe read error: {e}");
                    let _ = quit_tx.send(true);
                    return;
                }
            }
        }
    });
}

#[cfg(not(target_os = "linux"))]
fn drop_privileges() -> Result<()> {
    let user = nix::unistd::User::from_name(DROP_USER)
        .context("lookup nobody")?
        .ok_or_else(|| anyhow::anyhow!("no such user: {DROP_USER}"))?;
    nix::unistd::chroot(CHROOT_DIR).context("chroot")?;
    std::env::set_current_dir("/").context("chdir")?;
    nix::unistd::setgid(user.gid).context("setgid")?;
    nix::unistd::setuid(user.uid).context("setuid")?;
    Ok(())
}

/// Linux skips setuid/setgid: per-thread credentials under a multi-threaded
/// runtime make a single-call setuid here unsound, matching the behavior of
/// the source this was distilled from.
#[cfg(target_os = "linux")]
fn drop_privileges() -> Result<()> {
    nix::unistd::chroot(CHROOT_DIR).context("chroot")?;
    std::env::set_current_dir("/").context("chdir")?;
    Ok(())
}

#[cfg(target_os = "openbsd")]
fn apply_pledge() {
    if let Err(e) = pledge::pledge("stdio inet", None) {
        log::warn!("pledge failed: {e}");
    }
}

#[cfg(not(target_os = "openbsd"))]
fn apply_pledge() {}

async fn run_signal_loop(
    quit_tx: watch::Sender<bool>,
    mut quit_rx: watch::Receiver<bool>,
    flush_tx: watch::Sender<u64>,
    flush_secs: u32,
) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut flush_tick = make_flush_interval(flush_secs);
    let mut counter = 0u64;

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                info!("received SIGINT, exiting");
                let _ = quit_tx.send(true);
                return Ok(());
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, exiting");
                let _ = quit_tx.send(true);
                return Ok(());
            }
            _ = tick(&mut flush_tick) => {
                counter += 1;
                let _ = flush_tx.send(counter);
            }
            _ = quit_rx.changed() => {
                info!("parent gone, exiting");
                return Ok(());
            }
        }
    }
}

fn make_flush_interval(secs: u32) -> Option<tokio::time::Interval> {
    if secs == 0 {
        None
    } else {
        Some(tokio::time::interval(Duration::from_secs(secs as u64)))
    }
}

async fn tick(interval: &mut Option<tokio::time::Interval>) {
    match interval {
        Some(i) => {
            i.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
