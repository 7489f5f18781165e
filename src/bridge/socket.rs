//! Datagram socket seam
//!
//! The bridge only needs two UDP operations, factored into a trait so
//! the pump loops can run against an in-memory socket in tests.

use std::io;
use std::net::{SocketAddr, UdpSocket};

/// Minimal connectionless datagram interface
pub trait DatagramSocket {
    /// Receive one datagram. Honours whatever read timeout the socket
    /// was configured with; a timeout surfaces as an `io::Error` of
    /// kind `WouldBlock` or `TimedOut`.
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    /// Send one datagram
    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize>;
}

impl DatagramSocket for UdpSocket {
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf)
    }

    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, addr)
    }
}
