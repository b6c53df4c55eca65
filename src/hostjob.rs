//! Per-host resolver loop: keeps one (table, host) pair's packet-filter
//! entries converged on the current A-record set for `host`, with
//! resilience to transient per-server failures. Grounded on the later
//! `resolver/resolve.go` draft (per-server `failTTL` vector, separate
//! add/del channels).

use crate::iplist::IpList;
use crate::types::UpdateMessage;
use hickory_client::client::{AsyncClient, ClientHandle};
use hickory_client::proto::op::ResponseCode;
use hickory_client::proto::rr::{DNSClass, Name, RData, RecordType};
use hickory_client::proto::udp::UdpClientStream;
use log::{debug, error, trace};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;
use tokio::sync::watch;

/// Hard ceiling on the recheck interval: recheck at least this often
/// regardless of DNS TTL.
const MAX_TTL_SECS: u64 = 600;
/// Per-server failure back-off step and ceiling.
const FAIL_STEP_SECS: u64 = 30;
const FAIL_CEILING_SECS: u64 = 600;
const DNS_PORT: u16 = 53;

pub struct HostJobArgs {
    pub table: String,
    pub host: String,
    pub verbose: u8,
    pub add_tx: flume::Sender<UpdateMessage>,
    pub del_tx: flume::Sender<UpdateMessage>,
    pub flush_rx: watch::Receiver<u64>,
    pub quit_rx: watch::Receiver<bool>,
    pub servers: Vec<IpAddr>,
}

pub async fn run(mut args: HostJobArgs) {
    if let Ok(literal) = args.host.parse::<Ipv4Addr>() {
        run_static(&mut args, literal).await;
        return;
    }
    run_dns(&mut args).await;
}

/// Fast path for a literal IPv4 host: publish once, then wait for flush or
/// quit. No DNS traffic is ever generated.
async fn run_static(args: &mut HostJobArgs, ip: Ipv4Addr) {
    loop {
        let mut add = IpList::new();
        add.add(ip);
        if args.verbose > 0 {
            debug!("add {}:{}", args.table, add);
        }
        let _ = args.add_tx.send_async(UpdateMessage {
            table: args.table.clone(),
            ips: add,
        }).await;

        tokio::select! {
            _ = args.flush_rx.changed() => {
                // republish on next loop iteration
            }
            _ = args.quit_rx.changed() => {
                if args.verbose > 0 {
                    debug!("stop {}", args.host);
                }
                return;
            }
        }
    }
}

/// DNS path: queries every configured server each cycle, reconciles the
/// returned address set against the last-published set, and reschedules
/// itself according to the minimum observed TTL (or per-server back-off).
async fn run_dns(args: &mut HostJobArgs) {
    let name = match Name::from_ascii(format!("{}.", args.host.trim_end_matches('.'))) {
        Ok(n) => n,
        Err(e) => {
            error!("invalid hostname {}: {}", args.host, e);
            return;
        }
    };

    let mut fail_ttl: Vec<u64> = vec![0; args.servers.len()];
    let mut cur_ip = IpList::new();

    loop {
        if args.verbose > 0 {
            debug!("resolve {}", args.host);
        }

        let (got_ip, mut min_ttl) = resolve_cycle(&name, &args.servers, &mut fail_ttl, args.verbose).await;

        if !got_ip.is_empty() {
            let del_ip = cur_ip.difference(&got_ip);
            let add_ip = got_ip.difference(&cur_ip);

            if !add_ip.is_empty() {
                debug!(
                    "add {}:{} ttl:{} {}, del:{}",
                    args.table, args.host, min_ttl, add_ip, del_ip
                );
                let _ = args
                    .add_tx
                    .send_async(UpdateMessage {
                        table: args.table.clone(),
                        ips: add_ip,
                    })
                    .await;
                if !del_ip.is_empty() {
                    let _ = args
                        .del_tx
                        .send_async(UpdateMessage {
                            table: args.table.clone(),
                            ips: del_ip,
                        })
                        .await;
                }
                cur_ip = got_ip;
            } else if args.verbose > 1 {
                trace!(
                    "no diff {}:{} ttl:{} cur:{}",
                    args.table, args.host, min_ttl, cur_ip
                );
            }

            // run one second after it expires
            min_ttl += 1;
        }

        let sleep = tokio::time::sleep(tokio::time::Duration::from_secs(min_ttl));
        tokio::pin!(sleep);

        tokio::select! {
            _ = args.flush_rx.changed() => {
                if args.verbose > 1 {
                    debug!("flush {}", args.host);
                }
                cur_ip = IpList::new();
            }
            () = &mut sleep => {}
            _ = args.quit_rx.changed() => {
                if args.verbose > 0 {
                    debug!("stop {}", args.host);
                }
                return;
            }
        }
    }
}

/// Queries every server once, in order, returning the union of returned
/// A addresses and the minimum TTL seen (or back-off interval on failure).
async fn resolve_cycle(
    name: &Name,
    servers: &[IpAddr],
    fail_ttl: &mut [u64],
    verbose: u8,
) -> (IpList, u64) {
    let mut got_ip = IpList::new();
    let mut min_ttl: u64 = MAX_TTL_SECS;

    for (idx, server) in servers.iter().enumerate() {
        match query_a(name, *server).await {
            Ok(records) => {
                for (ip, ttl) in records {
                    if verbose > 1 {
                        trace!("host {} -> {}, ttl {}", name, ip, ttl);
                    }
                    got_ip.add(ip);
                    if u64::from(ttl) < min_ttl {
                        min_ttl = u64::from(ttl);
                    }
                }
                fail_ttl[idx] = 0;
            }
            Err(e) => {
                error!("exchange failed {}: {}", name, e);
                fail_ttl[idx] = (fail_ttl[idx] + FAIL_STEP_SECS).min(FAIL_CEILING_SECS);
                min_ttl = fail_ttl[idx];
            }
        }
    }

    (got_ip, min_ttl)
}

async fn query_a(name: &Name, server: IpAddr) -> anyhow::Result<Vec<(Ipv4Addr, u32)>> {
    let conn = UdpClientStream::<UdpSocket>::new(SocketAddr::new(server, DNS_PORT));
    let (mut client, bg) = AsyncClient::connect(conn).await?;
    tokio::spawn(bg);

    let response = client.query(name.clone(), DNSClass::IN, RecordType::A).await?;

    if response.response_code() != ResponseCode::NoError {
        anyhow::bail!("rcode {}", response.response_code());
    }

    let mut out = Vec::new();
    for record in response.answers() {
        if record.record_type() != RecordType::A {
            continue;
        }
        if let Some(RData::A(a)) = record.data() {
            out.push((a.0, record.ttl()));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_query_resets_fail_counter() {
        // We can't hit the network in a unit test, so drive resolve_cycle
        // against a server address nothing listens on and check the
        // failure back-off path, which is the part reachable offline.
        let name = Name::from_ascii("a.example.").unwrap();
        let mut fail_ttl = vec![0u64];
        let (got, ttl) = resolve_cycle(&name, &["127.0.0.1".parse().unwrap()], &mut fail_ttl, 0).await;
        assert!(got.is_empty());
        assert_eq!(fail_ttl[0], FAIL_STEP_SECS);
        assert_eq!(ttl, FAIL_STEP_SECS);
    }

    #[tokio::test]
    async fn fail_counter_is_clamped_to_ceiling() {
        let name = Name::from_ascii("a.example.").unwrap();
        let mut fail_ttl = vec![FAIL_CEILING_SECS];
        let (_, ttl) = resolve_cycle(&name, &["127.0.0.1".parse().unwrap()], &mut fail_ttl, 0).await;
        assert_eq!(fail_ttl[0], FAIL_CEILING_SECS);
        assert_eq!(ttl, FAIL_CEILING_SECS);
    }
}
