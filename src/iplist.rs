use std::fmt;
use std::net::Ipv4Addr;

/// An ordered, deduplicated collection of IPv4 addresses.
///
/// Insertion order is preserved but not semantically significant; it exists
/// so log output is stable and deterministic rather than hash-ordered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpList(Vec<Ipv4Addr>);

impl IpList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn contains(&self, ip: &Ipv4Addr) -> bool {
        self.0.contains(ip)
    }

    /// No-op if `ip` is already present.
    pub fn add(&mut self, ip: Ipv4Addr) {
        if !self.contains(&ip) {
            self.0.push(ip);
        }
    }

    /// Removes the first matching entry. Absence is tolerated.
    pub fn remove(&mut self, ip: &Ipv4Addr) {
        if let Some(pos) = self.0.iter().position(|cip| cip == ip) {
            self.0.remove(pos);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Ipv4Addr> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Ipv4Addr] {
        &self.0
    }

    /// `self \ other`, preserving `self`'s relative order.
    pub fn difference(&self, other: &IpList) -> IpList {
        let mut out = IpList::new();
        for ip in &self.0 {
            if !other.contains(ip) {
                out.add(*ip);
            }
        }
        out
    }
}

impl From<Vec<Ipv4Addr>> for IpList {
    fn from(v: Vec<Ipv4Addr>) -> Self {
        let mut list = IpList::new();
        for ip in v {
            list.add(ip);
        }
        list
    }
}

impl IntoIterator for IpList {
    type Item = Ipv4Addr;
    type IntoIter = std::vec::IntoIter<Ipv4Addr>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a IpList {
    type Item = &'a Ipv4Addr;
    type IntoIter = std::slice::Iter<'a, Ipv4Addr>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for IpList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .0
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        write!(f, "{joined}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_deduplicating() {
        let mut l = IpList::new();
        l.add("10.0.0.1".parse().unwrap());
        l.add("10.0.0.1".parse().unwrap());
        assert_eq!(l.len(), 1);
    }

    #[test]
    fn remove_tolerates_absence() {
        let mut l = IpList::new();
        l.remove(&"10.0.0.1".parse().unwrap());
        assert!(l.is_empty());
    }

    #[test]
    fn remove_drops_first_match_only() {
        let mut l = IpList::new();
        l.add("10.0.0.1".parse().unwrap());
        l.add("10.0.0.2".parse().unwrap());
        l.remove(&"10.0.0.1".parse().unwrap());
        assert_eq!(l.as_slice(), &["10.0.0.2".parse::<Ipv4Addr>().unwrap()]);
    }

    #[test]
    fn difference_preserves_order() {
        let a: IpList = vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]
            .into_iter()
            .map(|s| s.parse().unwrap())
            .collect::<Vec<Ipv4Addr>>()
            .into();
        let b: IpList = vec!["10.0.0.2".parse().unwrap()].into();
        let diff = a.difference(&b);
        assert_eq!(
            diff.as_slice(),
            &["10.0.0.1".parse::<Ipv4Addr>().unwrap(), "10.0.0.3".parse().unwrap()]
        );
    }
}
