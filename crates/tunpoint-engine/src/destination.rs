//! Network destinations understood by the engine dial path

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::error::EngineError;

/// Transport network of a destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Tcp,
    Udp,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Tcp => write!(f, "tcp"),
            Network::Udp => write!(f, "udp"),
        }
    }
}

/// Host part of a destination
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    Ip(IpAddr),
    Domain(String),
}

impl Address {
    /// Domain name, if this address is not a literal IP
    pub fn domain(&self) -> Option<&str> {
        match self {
            Address::Domain(d) => Some(d),
            Address::Ip(_) => None,
        }
    }
}

impl From<&str> for Address {
    fn from(host: &str) -> Self {
        let trimmed = host.trim_start_matches('[').trim_end_matches(']');
        match trimmed.parse::<IpAddr>() {
            Ok(ip) => Address::Ip(ip),
            Err(_) => Address::Domain(trimmed.to_ascii_lowercase()),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ip(IpAddr::V6(ip)) => write!(f, "[{}]", ip),
            Address::Ip(ip) => write!(f, "{}", ip),
            Address::Domain(d) => write!(f, "{}", d),
        }
    }
}

/// A network endpoint the engine can dial: `tcp:example.com:443`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    pub network: Network,
    pub address: Address,
    pub port: u16,
}

impl Destination {
    pub fn tcp(address: impl Into<Address>, port: u16) -> Self {
        Self {
            network: Network::Tcp,
            address: address.into(),
            port,
        }
    }

    pub fn udp(address: impl Into<Address>, port: u16) -> Self {
        Self {
            network: Network::Udp,
            address: address.into(),
            port,
        }
    }

    /// Socket address when the host is a literal IP
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match self.address {
            Address::Ip(ip) => Some(SocketAddr::new(ip, self.port)),
            Address::Domain(_) => None,
        }
    }

    /// Split `host:port` (IPv6 hosts in brackets) into its parts
    pub fn split_host_port(s: &str) -> Option<(&str, u16)> {
        let (host, port) = s.rsplit_once(':')?;
        let port = port.parse().ok()?;
        if host.is_empty() {
            return None;
        }
        Some((host, port))
    }
}

impl From<String> for Address {
    fn from(host: String) -> Self {
        Address::from(host.as_str())
    }
}

impl From<IpAddr> for Address {
    fn from(ip: IpAddr) -> Self {
        Address::Ip(ip)
    }
}

impl FromStr for Destination {
    type Err = EngineError;

    /// Parses `network:host:port`; the network prefix defaults to tcp when absent.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EngineError::Config(format!("invalid destination: {}", s));

        let (network, rest) = match s.split_once(':') {
            Some(("tcp", rest)) => (Network::Tcp, rest),
            Some(("udp", rest)) => (Network::Udp, rest),
            _ => (Network::Tcp, s),
        };

        let (host, port) = Destination::split_host_port(rest).ok_or_else(invalid)?;

        Ok(Self {
            network,
            address: Address::from(host),
            port,
        })
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.network, self.address, self.port)
    }
}
