use std::net::{IpAddr, ToSocketAddrs, UdpSocket};

use tracing::warn;

use crate::error::JoinError;

/// Resolve a hostname or IP literal to a numeric IP address.
pub fn resolve_host(host: &str) -> Result<IpAddr, JoinError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    (host, 0u16)
        .to_socket_addrs()
        .map_err(|e| JoinError::AddressLookup(format!("lookup of {:?} failed: {}", host, e)))?
        .map(|addr| addr.ip())
        .next()
        .ok_or_else(|| JoinError::AddressLookup(format!("{:?} resolved to no addresses", host)))
}

/// The IP address this node is reachable at. When the caller supplied one
/// it is resolved and used as-is; otherwise the address is discovered by
/// opening a UDP socket toward `target` (the registry for workers, a public
/// address for the head) and reading the local endpoint. No packet is sent.
pub fn node_ip_address(
    supplied: Option<&str>,
    target: Option<(&str, u16)>,
) -> Result<String, JoinError> {
    if let Some(host) = supplied {
        return Ok(resolve_host(host)?.to_string());
    }

    let (host, port) = target.unwrap_or(("8.8.8.8", 80));
    match discover_local_ip(host, port) {
        Ok(ip) => Ok(ip.to_string()),
        Err(e) => {
            // No route out of this machine; fall back to loopback so a
            // single-machine cluster still works.
            warn!("could not discover a routable IP address ({}); using 127.0.0.1", e);
            Ok("127.0.0.1".to_string())
        }
    }
}

fn discover_local_ip(host: &str, port: u16) -> std::io::Result<IpAddr> {
    let socket = UdpSocket::bind(("0.0.0.0", 0))?;
    socket.connect((host, port))?;
    Ok(socket.local_addr()?.ip())
}
