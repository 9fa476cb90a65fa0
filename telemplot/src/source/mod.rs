//! Frame sources
//!
//! A `FrameSource` turns a transport into a stream of newline terminated
//! frames. Every source provides the same guarantees:
//! - `next_line` never returns a partial line. Bytes are buffered until a
//!   terminator arrives, and the terminator (`\n` or `\r\n`) is stripped.
//! - `next_line` never blocks for longer than the timeout it is given.
//!   Nothing arriving in time is a `LineEvent::Timeout`, not an error.
//! - Bytes that are not valid UTF-8 come back as `LineEvent::Unparseable`.
//! - Transport loss is reported as `LineEvent::Closed`. After that the
//!   source must not be polled any more.
//!
//! Sources are opened from a url, see `open()`.

mod linebuf;
pub mod pipe;
pub mod serial;
mod stream;
pub mod tcp;

pub use stream::StreamSource;

use linebuf::Frame;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

/// Outcome of a single `FrameSource::next_line` call.
#[derive(Debug, Clone, PartialEq)]
pub enum LineEvent {
    /// A complete line, terminator stripped.
    Line(String),
    /// Nothing arrived within the timeout.
    Timeout,
    /// A complete frame that is not valid text.
    Unparseable(Vec<u8>),
    /// The transport is gone. Terminal.
    Closed,
}

/// Errors that end a source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The underlying connection ended.
    #[error("source closed")]
    Closed,
    /// Low level IO error.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    /// The source url could not be understood.
    #[error("invalid source url '{0}'")]
    InvalidUrl(String),
}

/// Possible errors when writing back to a source.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The transport is receive only.
    #[error("writing is not supported on this source")]
    Unsupported,
    /// The outgoing buffer is full.
    #[error("outgoing buffer full")]
    Full,
    /// The transport is closed.
    #[error("source is not connected")]
    Disconnected,
    /// Issue with the underlying IO operation.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Uniform interface over the pipe, serial and socket transports.
pub trait FrameSource {
    /// Returns the next complete line, waiting at most `timeout`.
    fn next_line(&mut self, timeout: Duration) -> LineEvent;

    /// Writes raw text to the transport. The caller provides any line
    /// terminator. Receive-only sources report `SendError::Unsupported`
    /// and discard the text.
    fn write(&mut self, text: &str) -> Result<(), SendError>;

    /// Closes the transport. Closing twice is a no-op.
    fn close(&mut self);

    /// The wait used by readers that have no particular deadline.
    fn default_timeout(&self) -> Duration;
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn next_line(&mut self, timeout: Duration) -> LineEvent {
        (**self).next_line(timeout)
    }

    fn write(&mut self, text: &str) -> Result<(), SendError> {
        (**self).write(text)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn default_timeout(&self) -> Duration {
        (**self).default_timeout()
    }
}

/// Converts a framed chunk of bytes to the event returned to callers.
fn frame_event(frame: Frame) -> LineEvent {
    match frame {
        Frame::Line(bytes) => match String::from_utf8(bytes) {
            Ok(line) => LineEvent::Line(line),
            Err(e) => LineEvent::Unparseable(e.into_bytes()),
        },
        Frame::Overflow(bytes) => LineEvent::Unparseable(bytes),
    }
}

/// In special cases where the default that gets picked when resolving an IP address
/// does not work, this allows to force using either IPv4 or IPv6.
enum AddrFamilyRestrict {
    V4,
    V6,
    Either,
}

/// TCP port used when a `tcp://` url does not name one.
pub static DEFAULT_TCP_PORT: u16 = 7855;

/// Resolve a fully specified socket address with address family restrictions.
/// This will attempt to add the default port
fn find_addr(addr: &str, family: AddrFamilyRestrict) -> Result<SocketAddr, io::Error> {
    let iter = match addr.to_socket_addrs() {
        Ok(iter) => iter,
        Err(err) => {
            let addr_port = format!("{}:{}", addr, DEFAULT_TCP_PORT);
            match addr_port.to_socket_addrs() {
                Ok(iter) => iter,
                Err(_) => {
                    // Numeric IPv6 addresses need brackets around them.
                    let addr_port = format!("[{}]:{}", addr, DEFAULT_TCP_PORT);
                    match addr_port.to_socket_addrs() {
                        Ok(iter) => iter,
                        _ => {
                            return Err(err);
                        }
                    }
                }
            }
        }
    };
    for sa in iter {
        match (&sa, &family) {
            (SocketAddr::V4(_), AddrFamilyRestrict::V6) => continue,
            (SocketAddr::V6(_), AddrFamilyRestrict::V4) => continue,
            _ => return Ok(sa),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::Other,
        "address resolution failed",
    ))
}

/// Opens the source at `url`.
///
/// A valid `url` has one of the following formats:
/// - `-` or `pipe://` reads standard input.
/// - `serial://port[:baud]`. The baud rate defaults to 57600. Note that it's
///   possible to omit `serial://` if port starts with `COM` on windows or
///   `/dev/` on unix.
/// - `tcp://address[:port]`. `tcp4` and `tcp6` force a specific version of
///   the IP protocol should the default resolution fail.
pub fn open(url: &str) -> Result<Box<dyn FrameSource + Send>, SourceError> {
    if url == "-" {
        return Ok(Box::new(pipe::Pipe::stdin()));
    }
    #[cfg(unix)]
    if url.starts_with("/dev/") {
        return Ok(Box::new(serial::open(url)?));
    }
    #[cfg(windows)]
    if url.starts_with("COM") {
        return Ok(Box::new(serial::open(url)?));
    }

    let split_url: Vec<&str> = url.splitn(2, "://").collect();
    match split_url[..] {
        ["pipe", ""] | ["stdin", ""] => Ok(Box::new(pipe::Pipe::stdin())),
        ["serial", port] => Ok(Box::new(serial::open(port)?)),
        ["tcp", addr] => Ok(Box::new(tcp::open(&find_addr(
            addr,
            AddrFamilyRestrict::Either,
        )?)?)),
        ["tcp4", addr] => Ok(Box::new(tcp::open(&find_addr(
            addr,
            AddrFamilyRestrict::V4,
        )?)?)),
        ["tcp6", addr] => Ok(Box::new(tcp::open(&find_addr(
            addr,
            AddrFamilyRestrict::V6,
        )?)?)),
        _ => Err(SourceError::InvalidUrl(url.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_utf8_is_unparseable() {
        let ev = frame_event(Frame::Line(vec![b'A', b',', 0xff, b'1']));
        assert_eq!(ev, LineEvent::Unparseable(vec![b'A', b',', 0xff, b'1']));
        let ev = frame_event(Frame::Line(b"A,1".to_vec()));
        assert_eq!(ev, LineEvent::Line("A,1".to_string()));
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(matches!(
            open("carrier-pigeon://coop"),
            Err(SourceError::InvalidUrl(_))
        ));
    }

    #[test]
    fn resolves_with_default_port() {
        let addr = find_addr("127.0.0.1", AddrFamilyRestrict::Either).unwrap();
        assert_eq!(addr.port(), DEFAULT_TCP_PORT);
        let addr = find_addr("127.0.0.1:9000", AddrFamilyRestrict::V4).unwrap();
        assert_eq!(addr.port(), 9000);
    }
}
