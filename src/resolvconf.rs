use crate::error::{AppResult, AppWrap};
use std::io::Read;
use std::net::IpAddr;

/// Ordered sequence of nameserver addresses parsed from `/etc/resolv.conf`.
/// Order is preserved and significant -- servers are queried in order each
/// resolver cycle.
#[derive(Debug, Clone, Default)]
pub struct ResolvConf {
    pub nameservers: Vec<IpAddr>,
}

impl ResolvConf {
    /// Parses resolv.conf content from an already-open reader. Only lines
    /// whose first token is `nameserver` are consumed; port is always 53
    /// per the grammar this daemon targets (no `options` / `search`
    /// handling -- that surface is out of scope here).
    pub fn parse<R: Read>(mut r: R) -> AppResult<ResolvConf> {
        let mut buf = Vec::with_capacity(4096);
        r.read_to_end(&mut buf).wrap("reading resolv.conf")?;

        let parsed = resolv_conf::Config::parse(&buf)
            .map_err(|e| crate::error::AppError::msg(format!("parse resolv.conf: {e}")))?;

        let nameservers = parsed
            .nameservers
            .into_iter()
            .map(|scoped| scoped.into())
            .collect();

        Ok(ResolvConf { nameservers })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_nameserver_lines_in_order() {
        let input = "nameserver 1.1.1.1\nnameserver 8.8.8.8\nsearch example.com\n";
        let cfg = ResolvConf::parse(Cursor::new(input)).unwrap();
        assert_eq!(
            cfg.nameservers,
            vec![
                "1.1.1.1".parse::<IpAddr>().unwrap(),
                "8.8.8.8".parse::<IpAddr>().unwrap()
            ]
        );
    }

    #[test]
    fn ignores_non_nameserver_lines() {
        let input = "domain example.com\noptions ndots:1\n";
        let cfg = ResolvConf::parse(Cursor::new(input)).unwrap();
        assert!(cfg.nameservers.is_empty());
    }
}
