//! Internal buffer for stream-oriented sources.

use super::{SendError, SourceError};
use std::io;

/// Size of the internal buffer. A frame longer than this can never be
/// completed and is discarded.
const LINEBUF_SIZE: usize = 4096;

/// Result of a single refill attempt.
pub enum Refill {
    /// Some bytes were appended.
    Data,
    /// The reader has nothing available right now.
    WouldBlock,
}

/// Buffer used internally by sources with an underlying byte stream
/// to split the incoming bytes into newline terminated frames, and to
/// hold outgoing text that could not be written in one go.
pub struct LineBuf {
    /// Internal buffer. Valid data (possibly none) is
    /// in a slice delimited by `start` and `end`.
    buf: [u8; LINEBUF_SIZE],
    /// Start offset of valid data in `buf`.
    start: usize,
    /// End offset of valid data in `buf`.
    end: usize,
}

/// A frame taken out of a `LineBuf`.
#[derive(Debug, PartialEq)]
pub enum Frame {
    /// Bytes of a complete line, without its terminator.
    Line(Vec<u8>),
    /// The buffer filled up without ever seeing a terminator.
    Overflow(Vec<u8>),
}

impl LineBuf {
    /// Returns an empty `LineBuf`.
    pub fn new() -> LineBuf {
        LineBuf {
            buf: [0; LINEBUF_SIZE],
            start: 0,
            end: 0,
        }
    }

    /// Returns whether or not this `LineBuf` is empty.
    pub fn empty(&self) -> bool {
        self.start == self.end
    }

    /// Returns the amount of data contained in this buffer, in bytes.
    pub fn size(&self) -> usize {
        self.end - self.start
    }

    /// Returns how many more bytes the buffer can hold.
    pub fn space(&self) -> usize {
        LINEBUF_SIZE - self.size()
    }

    /// Returns the data contained in this buffer.
    pub fn data(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    /// Discards the given amount of bytes off the beginning of the contained data.
    /// `len` must be at most the value returned by `size()`.
    pub fn consume(&mut self, len: usize) {
        if len > self.size() {
            panic!("Invalid consume for more data that is contained");
        }
        self.start += len;
    }

    /// Discard the entire content of the buffer.
    pub fn flush(&mut self) {
        self.start = 0;
        self.end = 0;
    }

    /// Moves the data internally to the start of the buffer.
    fn compact(&mut self) {
        if self.start != 0 {
            let len = self.size();
            self.buf.copy_within(self.start..self.end, 0);
            self.start = 0;
            self.end = len;
        }
    }

    /// Takes the next complete frame out of the buffer, if there is one.
    /// The `\n` terminator and a single `\r` right before it are stripped.
    pub fn take_line(&mut self) -> Option<Frame> {
        let data = self.data();
        if let Some(pos) = data.iter().position(|&b| b == b'\n') {
            let mut line = data[..pos].to_vec();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            self.consume(pos + 1);
            return Some(Frame::Line(line));
        }
        if self.size() == LINEBUF_SIZE {
            let junk = self.data().to_vec();
            self.flush();
            return Some(Frame::Overflow(junk));
        }
        None
    }

    /// Refills the buffer as much as possible from an object implementing `io::Read`.
    /// A zero sized read is reported as `SourceError::Closed`.
    pub fn refill<T: io::Read>(&mut self, reader: &mut T) -> Result<Refill, SourceError> {
        self.compact();
        if self.end == LINEBUF_SIZE {
            return Ok(Refill::Data);
        }
        match reader.read(&mut self.buf[self.end..]) {
            Ok(0) => Err(SourceError::Closed),
            Ok(size) => {
                self.end += size;
                Ok(Refill::Data)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Refill::WouldBlock),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(Refill::WouldBlock),
            Err(e) => Err(SourceError::Io(e)),
        }
    }

    /// Appends as much of the given data to the existing data. Returns `Ok` if all the data
    /// was appended, otherwise an `Err` with the number of bytes that were successfully appended.
    pub fn add_data(&mut self, data: &[u8]) -> Result<(), usize> {
        self.compact();
        let copy_size = std::cmp::min(LINEBUF_SIZE - self.end, data.len());
        self.buf[self.end..self.end + copy_size].copy_from_slice(&data[0..copy_size]);
        self.end += copy_size;
        if copy_size == data.len() {
            Ok(())
        } else {
            Err(copy_size)
        }
    }

    /// Sends as much of the contained data as possible to an object implementing `io::Write`.
    /// Returns `Ok(true)` once the buffer is fully drained.
    pub fn drain<T: io::Write>(&mut self, writer: &mut T) -> Result<bool, SendError> {
        if self.empty() {
            return Ok(true);
        }
        match writer.write(&self.buf[self.start..self.end]) {
            Ok(size) => {
                self.consume(size);
                Ok(self.empty())
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(SendError::Io(e)),
        }
    }
}
