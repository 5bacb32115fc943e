use std::collections::HashSet;
use std::net::TcpListener;

use crate::config::PortRange;

/// A port is free if a listener can be bound to it. The listener is closed
/// again immediately.
pub fn is_port_available(port: u16) -> bool {
    TcpListener::bind(("0.0.0.0", port)).is_ok()
}

/// Lowest port in `range` that is neither already claimed nor bound.
pub fn find_available_port(
    range: PortRange,
    claimed: &HashSet<u16>,
    probe: impl Fn(u16) -> bool,
) -> Option<u16> {
    range
        .iter()
        .filter(|port| !claimed.contains(port))
        .find(|port| probe(*port))
}
