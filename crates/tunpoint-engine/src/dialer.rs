//! System dialer seam
//!
//! Engines make every outbound connection of their own through a
//! [`SystemDialer`] supplied at construction time, so the host can keep those
//! sockets out of the tunnel the engine is serving.

use async_trait::async_trait;
use std::io;
use tokio::net::{TcpStream, UdpSocket};

use crate::destination::Destination;

/// A connected socket produced by a [`SystemDialer`]
#[derive(Debug)]
pub enum ProtectedConn {
    Tcp(TcpStream),
    /// UDP socket already `connect`ed to the destination
    Udp(UdpSocket),
}

impl ProtectedConn {
    pub fn into_tcp(self) -> io::Result<TcpStream> {
        match self {
            ProtectedConn::Tcp(stream) => Ok(stream),
            ProtectedConn::Udp(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "expected a TCP connection",
            )),
        }
    }

    pub fn into_udp(self) -> io::Result<UdpSocket> {
        match self {
            ProtectedConn::Udp(socket) => Ok(socket),
            ProtectedConn::Tcp(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "expected a UDP socket",
            )),
        }
    }
}

/// Outbound dial capability handed to the engine.
///
/// Called concurrently from every connection the engine opens.
#[async_trait]
pub trait SystemDialer: Send + Sync {
    async fn dial(&self, destination: &Destination) -> io::Result<ProtectedConn>;
}
