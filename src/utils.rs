//! Utility functions for executor identity and address detection

use std::net::{IpAddr, SocketAddr};

use crate::config::Config;

/// Reachability class of a local address, ordered worst to best
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum AddressScope {
    /// Loopback (127.0.0.0/8, ::1) or unspecified
    Loopback,
    /// Private, link-local, or unique-local
    Private,
    /// Anything else
    Public,
}

/// Classify an address for advertisement ranking
pub fn address_scope(ip: IpAddr) -> AddressScope {
    match ip {
        IpAddr::V4(v4) => {
            if v4.is_loopback() || v4.is_unspecified() {
                AddressScope::Loopback
            } else if v4.is_private() || v4.is_link_local() {
                AddressScope::Private
            } else {
                AddressScope::Public
            }
        }
        IpAddr::V6(v6) => {
            if v6.is_loopback() || v6.is_unspecified() {
                AddressScope::Loopback
            } else if v6.is_unique_local() || v6.is_unicast_link_local() {
                AddressScope::Private
            } else {
                AddressScope::Public
            }
        }
    }
}

/// Pick the most reachable address from a list of candidates
///
/// Public beats private beats loopback. Within a scope IPv4 wins over IPv6,
/// then the earliest candidate wins.
///
/// # Examples
///
/// ```
/// use extractor_agent::utils::best_address;
/// use std::net::IpAddr;
///
/// let candidates: Vec<IpAddr> = vec![
///     "127.0.0.1".parse().unwrap(),
///     "192.168.1.20".parse().unwrap(),
///     "203.0.113.7".parse().unwrap(),
/// ];
/// assert_eq!(best_address(candidates), Some("203.0.113.7".parse().unwrap()));
/// ```
pub fn best_address(candidates: impl IntoIterator<Item = IpAddr>) -> Option<IpAddr> {
    let mut best: Option<(AddressScope, bool, IpAddr)> = None;
    for ip in candidates {
        let key = (address_scope(ip), ip.is_ipv4());
        match best {
            Some((scope, v4, _)) if (scope, v4) >= key => {}
            _ => best = Some((key.0, key.1, ip)),
        }
    }
    best.map(|(_, _, ip)| ip)
}

/// Best address among the host's network interfaces
///
/// Falls back to 127.0.0.1 when interfaces cannot be listed.
pub fn detect_public_ip() -> IpAddr {
    match if_addrs::get_if_addrs() {
        Ok(interfaces) => best_address(interfaces.iter().map(|iface| iface.ip()))
            .unwrap_or(IpAddr::V4(std::net::Ipv4Addr::LOCALHOST)),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to list network interfaces, advertising loopback");
            IpAddr::V4(std::net::Ipv4Addr::LOCALHOST)
        }
    }
}

/// Address the coordinator should use to reach this executor
///
/// Uses `agent.advertise_addr` when configured, otherwise the detected best
/// interface address with the port the HTTP surface actually bound.
pub fn resolve_advertise_addr(config: &Config, bound_port: u16) -> String {
    match &config.agent.advertise_addr {
        Some(addr) => addr.clone(),
        None => SocketAddr::new(detect_public_ip(), bound_port).to_string(),
    }
}

/// Executor id from config, or a fresh random UUID
pub fn resolve_executor_id(config: &Config) -> String {
    config
        .agent
        .executor_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}
