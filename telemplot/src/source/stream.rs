//! Byte stream source
//!
//! Shared implementation for transports that expose a non-blocking byte
//! stream and an MIO event source. The stream is read until it would
//! block before every wait, since MIO readiness is edge triggered.

use super::linebuf::{LineBuf, Refill};
use super::{frame_event, FrameSource, LineEvent, SendError, SourceError};
use std::io;
use std::time::{Duration, Instant};

const STREAM_TOKEN: mio::Token = mio::Token(0);

/// `FrameSource` over a non-blocking stream `T`.
pub struct StreamSource<T: io::Read + io::Write + mio::event::Source> {
    /// Underlying stream. `None` once closed.
    stream: Option<T>,
    poll: mio::Poll,
    events: mio::Events,
    /// Incoming buffer, used to buffer partial lines.
    rxbuf: LineBuf,
    /// Outgoing buffer, holding text the OS did not accept yet.
    txbuf: LineBuf,
    /// Wait used when the caller has no deadline.
    wait: Duration,
    /// Name used in log messages.
    name: String,
}

impl<T: io::Read + io::Write + mio::event::Source> StreamSource<T> {
    /// Takes ownership of `stream` and registers it for readability.
    pub fn new(mut stream: T, wait: Duration, name: String) -> io::Result<StreamSource<T>> {
        let poll = mio::Poll::new()?;
        poll.registry()
            .register(&mut stream, STREAM_TOKEN, mio::Interest::READABLE)?;
        Ok(StreamSource {
            stream: Some(stream),
            poll,
            events: mio::Events::with_capacity(4),
            rxbuf: LineBuf::new(),
            txbuf: LineBuf::new(),
            wait,
            name,
        })
    }

    /// Pushes out any pending outgoing text without waiting.
    fn flush_tx(&mut self) -> Result<(), SendError> {
        let stream = self.stream.as_mut().ok_or(SendError::Disconnected)?;
        self.txbuf.drain(stream)?;
        Ok(())
    }

    /// Drops the stream. Only the first call has any effect.
    fn shutdown(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            log::info!("{}: connection closed", self.name);
            let _ = self.poll.registry().deregister(&mut stream);
            self.rxbuf.flush();
            self.txbuf.flush();
        }
    }
}

impl<T: io::Read + io::Write + mio::event::Source> FrameSource for StreamSource<T> {
    fn next_line(&mut self, timeout: Duration) -> LineEvent {
        let deadline = Instant::now() + timeout;
        loop {
            if self.stream.is_none() {
                return LineEvent::Closed;
            }
            if let Some(frame) = self.rxbuf.take_line() {
                return frame_event(frame);
            }
            if !self.txbuf.empty() {
                if let Err(e) = self.flush_tx() {
                    log::warn!("{}: write failed: {}", self.name, e);
                }
            }

            let refill = match self.stream.as_mut() {
                Some(stream) => self.rxbuf.refill(stream),
                None => Err(SourceError::Closed),
            };
            match refill {
                Ok(Refill::Data) => continue,
                Ok(Refill::WouldBlock) => {}
                Err(SourceError::Closed) => {
                    self.shutdown();
                    return LineEvent::Closed;
                }
                Err(e) => {
                    log::warn!("{}: read failed: {}", self.name, e);
                    self.shutdown();
                    return LineEvent::Closed;
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return LineEvent::Timeout;
            }
            if let Err(e) = self.poll.poll(&mut self.events, Some(remaining)) {
                if e.kind() != io::ErrorKind::Interrupted {
                    log::warn!("{}: poll failed: {}", self.name, e);
                    self.shutdown();
                    return LineEvent::Closed;
                }
            }
        }
    }

    fn write(&mut self, text: &str) -> Result<(), SendError> {
        if self.stream.is_none() {
            return Err(SendError::Disconnected);
        }
        log::info!("{}: writing '{}'", self.name, text.trim_end());
        if text.len() > self.txbuf.space() {
            return Err(SendError::Full);
        }
        // Cannot fail after the space check.
        let _ = self.txbuf.add_data(text.as_bytes());
        self.flush_tx()
    }

    fn close(&mut self) {
        self.shutdown();
    }

    fn default_timeout(&self) -> Duration {
        self.wait
    }
}
