//! Hand-rolled CIDR/bare-IP allowlist matching.
//!
//! `slb-config` already parses the same `ip/prefix` syntax to validate
//! `[daemon] tcp_allowed_ips`, but keeps that parser private — duplicating
//! the ~20 lines here is cheaper than threading a shared dependency
//! through two crates for something this small.

use std::net::IpAddr;

/// One parsed allowlist entry: an address and the prefix length to mask
/// against it. Bare IPs are `/32` (v4) or `/128` (v6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CidrEntry {
    addr: IpAddr,
    prefix_len: u8,
}

impl CidrEntry {
    /// Parse `"ip/prefix"` or a bare IP. Returns `None` on malformed input
    /// or an out-of-range prefix length.
    pub fn parse(entry: &str) -> Option<Self> {
        let entry = entry.trim();
        let (ip_str, prefix_len) = match entry.split_once('/') {
            Some((ip_str, prefix_str)) => (ip_str, prefix_str.parse().ok()?),
            None => (entry, None),
        };
        let addr: IpAddr = ip_str.parse().ok()?;
        let max = if addr.is_ipv4() { 32 } else { 128 };
        let prefix_len = prefix_len.unwrap_or(max);
        if prefix_len > max {
            return None;
        }
        Some(Self { addr, prefix_len })
    }

    /// Does `candidate` fall within this entry's masked range? Mismatched
    /// address families (v4 entry vs v6 candidate) never match.
    pub fn contains(&self, candidate: IpAddr) -> bool {
        match (self.addr, candidate) {
            (IpAddr::V4(entry), IpAddr::V4(candidate)) => {
                mask_matches_v4(u32::from(entry), u32::from(candidate), self.prefix_len)
            }
            (IpAddr::V6(entry), IpAddr::V6(candidate)) => {
                mask_matches_v6(u128::from(entry), u128::from(candidate), self.prefix_len)
            }
            _ => false,
        }
    }
}

/// An allowlist: the empty list denies everyone (fail closed), matching
/// `[daemon] tcp_allowed_ips = []` meaning "no TCP clients configured".
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    entries: Vec<CidrEntry>,
}

impl Allowlist {
    /// Parse every entry in `raw`, skipping (and logging) malformed ones
    /// rather than failing the whole list — `slb-config` already validates
    /// this list at load time, so a malformed entry here means config
    /// validation was bypassed, not that the daemon should refuse to start.
    pub fn parse(raw: &[String]) -> Self {
        let entries = raw
            .iter()
            .filter_map(|entry| {
                let parsed = CidrEntry::parse(entry);
                if parsed.is_none() {
                    tracing::warn!(entry, "ignoring malformed tcp_allowed_ips entry");
                }
                parsed
            })
            .collect();
        Self { entries }
    }

    /// `true` if `addr` matches any configured entry.
    pub fn allows(&self, addr: IpAddr) -> bool {
        self.entries.iter().any(|entry| entry.contains(addr))
    }
}

fn mask_matches_v4(entry: u32, candidate: u32, prefix_len: u8) -> bool {
    if prefix_len == 0 {
        return true;
    }
    let shift = 32 - prefix_len as u32;
    (entry >> shift) == (candidate >> shift)
}

fn mask_matches_v6(entry: u128, candidate: u128, prefix_len: u8) -> bool {
    if prefix_len == 0 {
        return true;
    }
    let shift = 128 - prefix_len as u32;
    (entry >> shift) == (candidate >> shift)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn bare_ip_matches_only_itself() {
        let entry = CidrEntry::parse("192.168.1.5").unwrap();
        assert!(entry.contains(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 5))));
        assert!(!entry.contains(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 6))));
    }

    #[test]
    fn prefix_matches_whole_subnet() {
        let entry = CidrEntry::parse("10.0.0.0/8").unwrap();
        assert!(entry.contains(IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3))));
        assert!(!entry.contains(IpAddr::V4(Ipv4Addr::new(11, 0, 0, 1))));
    }

    #[test]
    fn slash_zero_matches_everything() {
        let entry = CidrEntry::parse("0.0.0.0/0").unwrap();
        assert!(entry.contains(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8))));
    }

    #[test]
    fn malformed_entries_are_rejected() {
        assert!(CidrEntry::parse("not-an-ip").is_none());
        assert!(CidrEntry::parse("10.0.0.0/99").is_none());
    }

    #[test]
    fn empty_allowlist_denies_everyone() {
        let allowlist = Allowlist::parse(&[]);
        assert!(!allowlist.allows(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))));
    }

    #[test]
    fn allowlist_accepts_configured_cidr() {
        let allowlist = Allowlist::parse(&["10.0.0.0/8".to_string(), "192.168.1.5".to_string()]);
        assert!(allowlist.allows(IpAddr::V4(Ipv4Addr::new(10, 2, 3, 4))));
        assert!(allowlist.allows(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 5))));
        assert!(!allowlist.allows(IpAddr::V4(Ipv4Addr::new(172, 16, 0, 1))));
    }

    #[test]
    fn allowlist_skips_malformed_entries_instead_of_failing() {
        let allowlist = Allowlist::parse(&["garbage".to_string(), "10.0.0.0/8".to_string()]);
        assert!(allowlist.allows(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))));
    }
}
