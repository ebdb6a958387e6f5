//! Local host address shown next to the mode.
//!
//! Addresses are packed into a `u32` with the first octet in the low byte,
//! and formatted low byte first.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use tracing::debug;

use crate::error::ControlError;

/// Shown until a resolution succeeds.  Formats as `1.0.0.127`.
pub const FALLBACK_ADDRESS: u32 = 0x7F00_0001;

pub trait AddressResolver {
    fn resolve(&self) -> Result<u32, ControlError>;
}

/// Asks the routing table which local address would reach `target`.  A UDP
/// `connect` sends nothing, so this is cheap and never leaves the host.
pub struct UdpRouteResolver {
    target: SocketAddr,
}

impl UdpRouteResolver {
    pub fn new(target: SocketAddr) -> Self {
        Self { target }
    }
}

impl Default for UdpRouteResolver {
    fn default() -> Self {
        Self::new(SocketAddr::from(([1, 1, 1, 1], 80)))
    }
}

impl AddressResolver for UdpRouteResolver {
    fn resolve(&self) -> Result<u32, ControlError> {
        let unavailable = |e: std::io::Error| ControlError::AddressUnavailable(e.to_string());

        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).map_err(unavailable)?;
        socket.connect(self.target).map_err(unavailable)?;
        match socket.local_addr().map_err(unavailable)?.ip() {
            IpAddr::V4(ip) if !ip.is_unspecified() => Ok(pack_ipv4(ip)),
            other => Err(ControlError::AddressUnavailable(format!(
                "no usable IPv4 route (got {other})"
            ))),
        }
    }
}

pub fn pack_ipv4(ip: Ipv4Addr) -> u32 {
    u32::from_le_bytes(ip.octets())
}

pub fn format_address(value: u32) -> String {
    format!(
        "{}.{}.{}.{}",
        value & 0xFF,
        (value >> 8) & 0xFF,
        (value >> 16) & 0xFF,
        (value >> 24) & 0xFF
    )
}

/// Last known host address.  A failed refresh keeps the previous value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostAddress {
    value: u32,
}

impl Default for HostAddress {
    fn default() -> Self {
        Self {
            value: FALLBACK_ADDRESS,
        }
    }
}

impl HostAddress {
    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn formatted(&self) -> String {
        format_address(self.value)
    }

    /// Returns whether the value was updated.
    pub fn refresh(&mut self, resolver: &dyn AddressResolver) -> bool {
        match resolver.resolve() {
            Ok(value) => {
                self.value = value;
                true
            }
            Err(e) => {
                debug!("Keeping address {}: {}", self.formatted(), e);
                false
            }
        }
    }
}
