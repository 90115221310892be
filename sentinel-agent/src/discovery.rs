//! Host identification for heartbeats
//!
//! This module handles:
//! - Hostname detection (overridable from the CLI)
//! - Primary IPv4 selection: first non-loopback interface, `127.0.0.1` otherwise
//! - Platform and distribution labels

use if_addrs::{get_if_addrs, IfAddr};
use std::net::Ipv4Addr;
use sysinfo::System;
use tracing::{debug, warn};

/// Returned when no usable interface exists.
pub const FALLBACK_IP: &str = "127.0.0.1";

/// Static part of the host identity, resolved once at startup.
#[derive(Debug, Clone)]
pub struct HostIdentity {
    pub hostname: String,
    pub platform: String,
    pub distro: Option<String>,
}

impl HostIdentity {
    pub fn discover(name_override: Option<&str>) -> Self {
        let hostname = match name_override.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => name.to_string(),
            None => local_hostname(),
        };
        let identity = HostIdentity {
            hostname,
            platform: std::env::consts::OS.to_string(),
            distro: System::long_os_version(),
        };
        debug!("[discovery] identity {:?}", identity);
        identity
    }
}

pub fn local_hostname() -> String {
    let name = gethostname::gethostname().to_string_lossy().to_string();
    if name.is_empty() {
        "unknown-host".to_string()
    } else {
        name
    }
}

/// Current primary IPv4. Re-read on every heartbeat so DHCP changes show up.
pub fn primary_ipv4() -> String {
    match get_if_addrs() {
        Ok(addrs) => {
            let candidates = addrs.into_iter().filter_map(|iface| match iface.addr {
                IfAddr::V4(v4) => Some(v4.ip),
                IfAddr::V6(_) => None,
            });
            first_routable(candidates)
        }
        Err(e) => {
            warn!("[discovery] cannot enumerate interfaces: {}", e);
            FALLBACK_IP.to_string()
        }
    }
}

fn first_routable(candidates: impl IntoIterator<Item = Ipv4Addr>) -> String {
    candidates
        .into_iter()
        .find(|ip| !ip.is_loopback() && !ip.is_unspecified())
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| FALLBACK_IP.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_loopback_and_keeps_interface_order() {
        let ips = [
            Ipv4Addr::LOCALHOST,
            Ipv4Addr::new(192, 168, 1, 20),
            Ipv4Addr::new(10, 0, 0, 3),
        ];
        assert_eq!(first_routable(ips), "192.168.1.20");
    }

    #[test]
    fn falls_back_to_localhost() {
        assert_eq!(first_routable([Ipv4Addr::LOCALHOST]), FALLBACK_IP);
        assert_eq!(first_routable(Vec::new()), FALLBACK_IP);
    }

    #[test]
    fn name_override_wins() {
        let identity = HostIdentity::discover(Some("edge-01"));
        assert_eq!(identity.hostname, "edge-01");
        assert!(!HostIdentity::discover(Some("  ")).hostname.trim().is_empty());
    }

    #[test]
    fn primary_ip_is_always_ipv4() {
        let ip = primary_ipv4();
        assert!(ip.parse::<Ipv4Addr>().is_ok());
    }
}
