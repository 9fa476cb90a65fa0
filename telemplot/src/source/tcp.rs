//! TCP Port
//!
//! Connects to a server streaming line framed text and exposes it as a
//! `FrameSource`. A zero sized read means the peer went away: the
//! stream is closed once and `LineEvent::Closed` is reported.

use super::stream::StreamSource;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

/// TCP `FrameSource`.
pub type Port = StreamSource<mio::net::TcpStream>;

/// How long a read waits for data when the caller has no deadline.
pub static WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Bound on establishing the connection.
static CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Takes ownership of a connected `std::net::TcpStream`.
pub fn from_tcp_stream(stream: std::net::TcpStream) -> io::Result<Port> {
    let peer = stream.peer_addr()?;
    stream.set_nonblocking(true)?;
    StreamSource::new(
        mio::net::TcpStream::from_std(stream),
        WAIT_TIMEOUT,
        format!("tcp {}", peer),
    )
}

/// Connects to `address`.
pub fn open(address: &SocketAddr) -> io::Result<Port> {
    log::info!("Connecting to {}", address);
    let stream = std::net::TcpStream::connect_timeout(address, CONNECT_TIMEOUT)?;
    log::info!("Connected");
    from_tcp_stream(stream)
}
