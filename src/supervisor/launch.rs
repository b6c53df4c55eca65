//! Builds and re-execs the resolver child, handing off FDs 3-6 across the
//! privilege boundary. Grounded on `resolveMain.go`'s fork helper, translated
//! from a raw `fork()` to a self-exec (`Command::new(current_exe)` +
//! `pre_exec`) since this process runs a multi-threaded tokio runtime and a
//! bare `fork()` without an immediate `exec()` is unsound there.

use crate::ipc::Reader;
use anyhow::{Context, Result};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::unistd::dup2;
use std::fs::File;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, RawFd};
use std::path::Path;
use tokio::net::unix::pipe;
use tokio::process::{Child, Command};

pub struct ResolverOpts<'a> {
    pub cfg_path: &'a Path,
    pub resolv_path: &'a Path,
    pub noflush: bool,
    pub verbose: bool,
    pub nochroot: bool,
}

pub struct ChildHandle {
    pub child: Child,
    pub liveness_write: pipe::Sender,
    pub reader: Reader<pipe::Receiver>,
}

pub fn spawn_resolver(opts: &ResolverOpts) -> Result<ChildHandle> {
    let (liveness_read, liveness_write) = nix::unistd::pipe().context("liveness pipe")?;
    let (ipc_read, ipc_write) = nix::unistd::pipe().context("ipc pipe")?;

    let resolv_file = File::open(opts.resolv_path)
        .with_context(|| format!("opening {}", opts.resolv_path.display()))?;
    let config_file = File::open(opts.cfg_path)
        .with_context(|| format!("opening {}", opts.cfg_path.display()))?;

    let liveness_read_fd = liveness_read.as_raw_fd();
    let ipc_write_fd = ipc_write.as_raw_fd();
    let resolv_fd = resolv_file.as_raw_fd();
    let config_fd = config_file.as_raw_fd();

    let exe = std::env::current_exe().context("resolving current executable")?;
    let mut cmd = Command::new(exe);
    cmd.arg(format!("--resolver={}", std::process::id()))
        .arg("--cfg")
        .arg(opts.cfg_path)
        .arg("--resolv")
        .arg(opts.resolv_path);
    if opts.noflush {
        cmd.arg("--noflush");
    }
    if opts.verbose {
        cmd.arg("--verbose");
    }
    if opts.nochroot {
        cmd.arg("--nochroot");
    }

    unsafe {
        cmd.pre_exec(move || {
            install_fd(liveness_read_fd, 3)?;
            install_fd(ipc_write_fd, 4)?;
            install_fd(resolv_fd, 5)?;
            install_fd(config_fd, 6)?;
            Ok(())
        });
    }

    let child = cmd.spawn().context("spawning resolver")?;

    // The child's fd table is a snapshot taken at fork; these ends were
    // duplicated into 3-6 there and are no longer needed here.
    drop(resolv_file);
    drop(config_file);
    drop(liveness_read);
    drop(ipc_write);

    set_nonblocking(ipc_read.as_raw_fd())?;
    let reader = Reader::new(unsafe { pipe::Receiver::from_raw_fd(ipc_read.into_raw_fd()) });

    set_nonblocking(liveness_write.as_raw_fd())?;
    let liveness_write = unsafe { pipe::Sender::from_raw_fd(liveness_write.into_raw_fd()) };

    Ok(ChildHandle {
        child,
        liveness_write,
        reader,
    })
}

/// Duplicates `src` onto `dst` and closes `src` if it was a distinct fd
/// (dup2 is a no-op when src == dst and must not be followed by a close).
fn install_fd(src: RawFd, dst: RawFd) -> std::io::Result<()> {
    if src != dst {
        dup2(src, dst).map_err(std::io::Error::from)?;
        let _ = nix::unistd::close(src);
    }
    Ok(())
}

fn set_nonblocking(fd: RawFd) -> Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags))?;
    Ok(())
}
