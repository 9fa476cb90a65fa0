//! Pipe
//!
//! Reads lines from a pre-opened text stream, standard input by default.
//! Blocking reads happen on a helper thread which hands complete frames
//! over a bounded channel, so `next_line` can honour its timeout.
//! The pipe is receive only, and closing it leaves the stream alone.

use super::linebuf::Frame;
use super::{frame_event, FrameSource, LineEvent, SendError};
use crossbeam::channel::{self, RecvTimeoutError};
use std::io::{self, BufRead};
use std::thread;
use std::time::Duration;

/// Frames buffered between the reader thread and `next_line`.
static PIPE_CHANNEL_SIZE: usize = 256;

/// Wait used when the caller has no deadline.
pub static DEFAULT_WAIT: Duration = Duration::from_millis(20);

/// Receive-only `FrameSource` over a text stream.
pub struct Pipe {
    rx: channel::Receiver<Frame>,
    closed: bool,
}

impl Pipe {
    /// Pipe reading standard input.
    pub fn stdin() -> Pipe {
        Pipe::new(io::BufReader::new(io::stdin()))
    }

    /// Pipe reading `reader` until end of file.
    pub fn new<R: BufRead + Send + 'static>(mut reader: R) -> Pipe {
        let (tx, rx) = channel::bounded::<Frame>(PIPE_CHANNEL_SIZE);
        let spawned = thread::Builder::new()
            .name("pipe-reader".to_string())
            .spawn(move || {
                let mut line = Vec::new();
                loop {
                    line.clear();
                    match reader.read_until(b'\n', &mut line) {
                        Ok(0) => break,
                        Ok(_) => {
                            if line.last() == Some(&b'\n') {
                                line.pop();
                                if line.last() == Some(&b'\r') {
                                    line.pop();
                                }
                            }
                            if tx.send(Frame::Line(line.clone())).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => {
                            log::warn!("pipe: read failed: {}", e);
                            break;
                        }
                    }
                }
                // Dropping `tx` tells the consumer the pipe is done.
            });
        if let Err(e) = spawned {
            log::error!("pipe: cannot start reader thread: {}", e);
        }
        Pipe { rx, closed: false }
    }
}

impl FrameSource for Pipe {
    fn next_line(&mut self, timeout: Duration) -> LineEvent {
        if self.closed {
            return LineEvent::Closed;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => frame_event(frame),
            Err(RecvTimeoutError::Timeout) => LineEvent::Timeout,
            Err(RecvTimeoutError::Disconnected) => {
                log::info!("pipe: end of input");
                self.closed = true;
                LineEvent::Closed
            }
        }
    }

    fn write(&mut self, text: &str) -> Result<(), SendError> {
        log::warn!(
            "Can not write data when using a pipe. Message '{}' has been discarded",
            text.trim_end()
        );
        Err(SendError::Unsupported)
    }

    fn close(&mut self) {}

    fn default_timeout(&self) -> Duration {
        DEFAULT_WAIT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipe_of(text: &'static [u8]) -> Pipe {
        Pipe::new(io::Cursor::new(text))
    }

    #[test]
    fn strips_terminators_and_closes_at_eof() {
        let mut pipe = pipe_of(b"A,1,2\r\nB,3\n\nlast");
        let wait = Duration::from_secs(1);
        assert_eq!(pipe.next_line(wait), LineEvent::Line("A,1,2".into()));
        assert_eq!(pipe.next_line(wait), LineEvent::Line("B,3".into()));
        assert_eq!(pipe.next_line(wait), LineEvent::Line("".into()));
        assert_eq!(pipe.next_line(wait), LineEvent::Line("last".into()));
        assert_eq!(pipe.next_line(wait), LineEvent::Closed);
        assert_eq!(pipe.next_line(wait), LineEvent::Closed);
    }

    #[test]
    fn invalid_text_is_reported() {
        let mut pipe = pipe_of(b"A,\xfe\n");
        assert_eq!(
            pipe.next_line(Duration::from_secs(1)),
            LineEvent::Unparseable(b"A,\xfe".to_vec())
        );
    }

    #[test]
    fn writes_are_refused() {
        let mut pipe = pipe_of(b"");
        assert!(matches!(pipe.write("RESET\r\n"), Err(SendError::Unsupported)));
    }

    #[cfg(unix)]
    #[test]
    fn times_out_while_writer_is_idle() {
        let (reader, _writer) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut pipe = Pipe::new(io::BufReader::new(reader));
        assert_eq!(
            pipe.next_line(Duration::from_millis(30)),
            LineEvent::Timeout
        );
    }
}
