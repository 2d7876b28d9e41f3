//! Device connection identity.
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Both ends of a transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionInfo {
    /// the device's end
    pub remote: SocketAddr,
    /// this controller's end
    pub local: SocketAddr,
}

impl ConnectionInfo {
    /// new session description
    pub fn new(remote: SocketAddr, local: SocketAddr) -> Self {
        Self { remote, local }
    }
}

/// Normalized identity of a device connection: the remote address and port.
///
/// The local side is dropped since a session to the same device may be
/// opened from either end, and IPv4-mapped IPv6 addresses are folded into
/// plain IPv4 so both spellings of an address compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceKey {
    ip: IpAddr,
    port: u16,
}

impl DeviceKey {
    /// key for a device at `ip:port`
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self {
            ip: ip.to_canonical(),
            port,
        }
    }

    /// device address
    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    /// device port
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl From<SocketAddr> for DeviceKey {
    fn from(remote: SocketAddr) -> Self {
        Self::new(remote.ip(), remote.port())
    }
}

impl From<&ConnectionInfo> for DeviceKey {
    fn from(info: &ConnectionInfo) -> Self {
        Self::from(info.remote)
    }
}

impl From<ConnectionInfo> for DeviceKey {
    fn from(info: ConnectionInfo) -> Self {
        Self::from(info.remote)
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", SocketAddr::new(self.ip, self.port))
    }
}
