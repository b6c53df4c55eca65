mod config;
mod deletequeue;
mod error;
mod hostjob;
mod ipc;
mod iplist;
mod pf;
mod resolver;
mod resolvconf;
mod supervisor;
#[cfg(test)]
mod test;
mod types;
mod version;

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "pf-dns-sync",
    about = "Privilege-separated DNS-to-packet-filter table synchronizer",
    disable_version_flag = true
)]
struct Cli {
    /// Config file path.
    #[arg(long, default_value = "./pf_dns_update.json")]
    cfg: PathBuf,

    /// resolv.conf path.
    #[arg(long, default_value = "/etc/resolv.conf")]
    resolv: PathBuf,

    /// Skip the initial flushTable call for each table.
    #[arg(long)]
    noflush: bool,

    /// Raise log verbosity to 2.
    #[arg(long)]
    verbose: bool,

    /// Suppress informational logs below warning.
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Skip chroot + setuid in the resolver child.
    #[arg(long)]
    nochroot: bool,

    /// Path to the packet-filter control utility.
    #[arg(long, default_value = "/sbin/pfctl")]
    pfctl: String,

    /// Internal: non-zero means run as the resolver child, value is the
    /// supervisor's pid.
    #[arg(long, default_value_t = 0)]
    resolver: u32,

    #[arg(short = 'V', long)]
    version: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.version {
        version::print();
        return Ok(());
    }

    let level = if cli.quiet {
        "warn"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    if cli.resolver > 0 {
        rt.block_on(resolver::run(resolver::ResolverArgs {
            noflush: cli.noflush,
            nochroot: cli.nochroot,
            verbose: if cli.verbose { 2 } else { 0 },
        }))
    } else {
        rt.block_on(supervisor::run(supervisor::SupervisorArgs {
            cfg_path: cli.cfg,
            resolv_path: cli.resolv,
            noflush: cli.noflush,
            verbose: cli.verbose,
            nochroot: cli.nochroot,
            pfctl: cli.pfctl,
        }))
    }
}
