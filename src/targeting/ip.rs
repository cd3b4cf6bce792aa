//! CIDR membership matching for `ip_address` targeting rules.

use std::collections::HashSet;
use std::net::IpAddr;

use ipnet::IpNet;

/// True if `addr` falls inside any of `cidrs`. Entries that fail to parse as
/// a CIDR are tried as a bare address instead, then otherwise ignored --
/// targeting data comes from the Durable Store, not request input, so a
/// malformed entry is a data problem, not grounds to fail evaluation.
#[must_use]
pub fn matches_any(addr: IpAddr, cidrs: &HashSet<String>) -> bool {
    cidrs.iter().any(|entry| match entry.parse::<IpNet>() {
        Ok(net) => net.contains(&addr),
        Err(_) => entry.parse::<IpAddr>().is_ok_and(|single| single == addr),
    })
}
