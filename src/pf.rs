//! Packet-filter command executor, run on the supervisor side in response
//! to IPC calls from the resolver. Grounded on `pf.go`'s `flushPf`/`updatePf`,
//! generalized from a single hardcoded `/sbin/pfctl` to a configurable path.

use log::error;
use tokio::process::Command;

#[derive(Debug, Clone)]
pub struct PfExecutor {
    pfctl_path: String,
}

impl PfExecutor {
    pub fn new(pfctl_path: impl Into<String>) -> Self {
        Self {
            pfctl_path: pfctl_path.into(),
        }
    }

    pub async fn flush_table(&self, table: &str) {
        let out = Command::new(&self.pfctl_path)
            .args(["-q", "-t", table, "-T", "flush"])
            .output()
            .await;
        self.log_failure("flush", &[table.to_string()], out);
    }

    /// No-op if `ips` is empty.
    pub async fn add_to_table(&self, table: &str, ips: &[String]) {
        if ips.is_empty() {
            return;
        }
        let mut args = vec!["-t".to_string(), table.to_string(), "-T".to_string(), "add".to_string()];
        args.extend(ips.iter().cloned());
        let out = Command::new(&self.pfctl_path).args(&args).output().await;
        self.log_failure("add", &args, out);
    }

    /// No-op if `ips` is empty.
    pub async fn del_from_table(&self, table: &str, ips: &[String]) {
        if ips.is_empty() {
            return;
        }
        let mut args = vec!["-t".to_string(), table.to_string(), "-T".to_string(), "delete".to_string()];
        args.extend(ips.iter().cloned());
        let out = Command::new(&self.pfctl_path).args(&args).output().await;
        self.log_failure("delete", &args, out);
    }

    fn log_failure(&self, op: &str, args: &[String], out: std::io::Result<std::process::Output>) {
        match out {
            Ok(out) if !out.status.success() => {
                error!(
                    "{} {} {:?}: {} {}",
                    self.pfctl_path,
                    op,
                    args,
                    out.status,
                    String::from_utf8_lossy(&out.stderr)
                );
            }
            Ok(_) => {}
            Err(e) => error!("{} {} {:?}: {}", self.pfctl_path, op, args, e),
        }
    }
}
