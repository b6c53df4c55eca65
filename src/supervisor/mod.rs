//! Supervisor control loop: the privileged side. Owns the resolver child's
//! lifecycle, executes packet-filter mutations delivered over IPC, and
//! reacts to signals and config/resolv.conf changes by restarting the
//! child. Grounded on `resolveMain.go`'s parent half and the select-loop
//! idiom of the teacher's `server/serve.rs`.

mod launch;
mod watch;

use crate::ipc::Frame;
use crate::pf::PfExecutor;
use anyhow::{Context, Result};
use launch::{spawn_resolver, ChildHandle, ResolverOpts};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::signal::unix::{signal, SignalKind};

pub struct SupervisorArgs {
    pub cfg_path: PathBuf,
    pub resolv_path: PathBuf,
    pub noflush: bool,
    pub verbose: bool,
    pub nochroot: bool,
    pub pfctl: String,
}

pub async fn run(args: SupervisorArgs) -> Result<()> {
    let pf = PfExecutor::new(args.pfctl.clone());
    let resolver_started = Arc::new(Mutex::new(false));

    let cfg_dir = parent_dir(&args.cfg_path);
    let resolv_dir = parent_dir(&args.resolv_path);
    let (_watcher, mut watch_rx) = watch::spawn(&[cfg_dir.as_path(), resolv_dir.as_path()])?;

    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let opts = ResolverOpts {
        cfg_path: &args.cfg_path,
        resolv_path: &args.resolv_path,
        noflush: args.noflush,
        verbose: args.verbose,
        nochroot: args.nochroot,
    };

    let mut handle = spawn_resolver(&opts).context("initial resolver spawn")?;

    loop {
        tokio::select! {
            frame = handle.reader.next_frame() => {
                match frame {
                    Ok(Some(f)) => dispatch(&pf, &resolver_started, f).await,
                    Ok(None) => info!("resolver ipc pipe closed"),
                    Err(e) => error!("ipc read error: {e}"),
                }
            }
            status = handle.child.wait() => {
                match status {
                    Ok(status) => info!("resolver exited: {status}"),
                    Err(e) => error!("waiting on resolver failed: {e}"),
                }
                if *resolver_started.lock().unwrap() {
                    warn!("respawning resolver");
                    handle = spawn_resolver(&opts).context("respawning resolver")?;
                } else {
                    error!("resolver died in init");
                    anyhow::bail!("resolver died before startup");
                }
            }
            event = watch_rx.recv() => {
                match event {
                    Some(Ok(ev)) => {
                        if is_relevant(&ev, &args.cfg_path, &args.resolv_path) {
                            info!("config or resolv.conf changed, restarting resolver");
                            kill_child(&mut handle).await;
                        }
                    }
                    Some(Err(e)) => error!("file watcher error: {e}"),
                    None => warn!("file watcher channel closed"),
                }
            }
            _ = sighup.recv() => {
                info!("received SIGHUP, restarting resolver");
                kill_child(&mut handle).await;
            }
            _ = sigint.recv() => {
                info!("received SIGINT, exiting");
                return Ok(());
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, exiting");
                return Ok(());
            }
        }
    }
}

async fn dispatch(pf: &PfExecutor, resolver_started: &Arc<Mutex<bool>>, frame: Frame) {
    match frame.func.as_str() {
        "startup" => {
            *resolver_started.lock().unwrap() = true;
            info!("resolver startup complete");
        }
        "error" => {
            error!("resolver reported fatal error: {}", frame.argv.join(" "));
        }
        "flushTable" => {
            if let Some(table) = frame.argv.first() {
                pf.flush_table(table).await;
            }
        }
        "addToTable" => {
            if let Some((table, ips)) = frame.argv.split_first() {
                pf.add_to_table(table, ips).await;
            }
        }
        "delToTable" => {
            if let Some((table, ips)) = frame.argv.split_first() {
                pf.del_from_table(table, ips).await;
            }
        }
        other => warn!("unknown ipc call: {other}"),
    }
}

async fn kill_child(handle: &mut ChildHandle) {
    if let Err(e) = handle.child.kill().await {
        error!("failed to kill resolver: {e}");
    }
}

fn is_relevant(event: &notify::Event, cfg: &Path, resolv: &Path) -> bool {
    use notify::EventKind;
    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) {
        return false;
    }
    event.paths.iter().any(|p| p == cfg || p == resolv)
}

fn parent_dir(p: &Path) -> PathBuf {
    p.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}
