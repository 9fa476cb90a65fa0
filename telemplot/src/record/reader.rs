use super::{DecodeError, Decoder, Record};
use crate::source::{FrameSource, LineEvent, SendError, SourceError};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Anything that yields decoded records one at a time.
///
/// `Ok(Record::Empty)` means nothing arrived in time. `Err(SourceError::Closed)`
/// is terminal: the stream must not be asked for more records afterwards.
pub trait RecordStream {
    fn next_record(&mut self) -> Result<Record, SourceError>;
}

/// Replays a fixed sequence of records, then reports closure.
impl RecordStream for VecDeque<Record> {
    fn next_record(&mut self) -> Result<Record, SourceError> {
        self.pop_front().ok_or(SourceError::Closed)
    }
}

/// Decodes lines coming out of a `FrameSource`.
pub struct RecordReader<S: FrameSource> {
    source: S,
    decoder: Decoder,
    timeout: Duration,
    closed: bool,
}

impl<S: FrameSource> RecordReader<S> {
    /// Reader using the source's default wait for each poll.
    pub fn new(source: S, decoder: Decoder) -> RecordReader<S> {
        let timeout = source.default_timeout();
        RecordReader {
            source,
            decoder,
            timeout,
            closed: false,
        }
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Returns the next line exactly as it was framed, for raw dumps.
    pub fn next_raw(&mut self) -> Result<Option<String>, SourceError> {
        if self.closed {
            return Err(SourceError::Closed);
        }
        match self.source.next_line(self.timeout) {
            LineEvent::Line(line) => Ok(Some(line)),
            LineEvent::Unparseable(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            LineEvent::Timeout => Ok(None),
            LineEvent::Closed => {
                self.closed = true;
                Err(SourceError::Closed)
            }
        }
    }

    /// Waits until a numeric record for `label` arrives or `patience` runs out.
    /// Lines for other labels are consumed and dropped.
    pub fn read_label(
        &mut self,
        label: &str,
        patience: Duration,
    ) -> Result<Option<Record>, SourceError> {
        let deadline = Instant::now() + patience;
        while Instant::now() < deadline {
            if let Some(line) = self.next_raw()? {
                if let Some(record) = self.decoder.decode(&line, Some(label)) {
                    if record.is_numeric() {
                        return Ok(Some(record));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Writes raw text back to the transport.
    pub fn write(&mut self, text: &str) -> Result<(), SendError> {
        if self.closed {
            return Err(SendError::Disconnected);
        }
        self.source.write(text)
    }

    /// Closes the underlying source.
    pub fn close(&mut self) {
        self.source.close();
        self.closed = true;
    }
}

impl<S: FrameSource> RecordStream for RecordReader<S> {
    fn next_record(&mut self) -> Result<Record, SourceError> {
        if self.closed {
            return Err(SourceError::Closed);
        }
        match self.source.next_line(self.timeout) {
            LineEvent::Line(line) => Ok(self.decoder.decode(&line, None).unwrap_or(Record::Empty)),
            LineEvent::Timeout => Ok(Record::Empty),
            LineEvent::Unparseable(bytes) => {
                log::debug!("unparseable frame of {} bytes", bytes.len());
                Ok(Record::Malformed {
                    label: String::from_utf8_lossy(&bytes).into_owned(),
                    raw_fields: vec![],
                    reason: DecodeError::InvalidUtf8,
                })
            }
            LineEvent::Closed => {
                self.closed = true;
                Err(SourceError::Closed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{append_checksum, Integrity};

    /// In-memory source replaying scripted events.
    struct Script {
        events: VecDeque<LineEvent>,
        written: Vec<String>,
    }

    impl Script {
        fn new(events: Vec<LineEvent>) -> Script {
            Script {
                events: events.into(),
                written: vec![],
            }
        }
    }

    impl FrameSource for Script {
        fn next_line(&mut self, _timeout: Duration) -> LineEvent {
            self.events.pop_front().unwrap_or(LineEvent::Closed)
        }

        fn write(&mut self, text: &str) -> Result<(), SendError> {
            self.written.push(text.to_string());
            Ok(())
        }

        fn close(&mut self) {}

        fn default_timeout(&self) -> Duration {
            Duration::from_millis(1)
        }
    }

    fn line(s: &str) -> LineEvent {
        LineEvent::Line(s.to_string())
    }

    #[test]
    fn maps_every_event_kind() {
        let mut reader = RecordReader::new(
            Script::new(vec![
                line("A,1,2"),
                LineEvent::Timeout,
                LineEvent::Unparseable(vec![0xff, b'1']),
            ]),
            Decoder::default(),
        );
        assert!(reader.next_record().unwrap().is_numeric());
        assert_eq!(reader.next_record().unwrap(), Record::Empty);
        assert!(matches!(
            reader.next_record().unwrap(),
            Record::Malformed {
                reason: DecodeError::InvalidUtf8,
                ..
            }
        ));
        assert!(matches!(reader.next_record(), Err(SourceError::Closed)));
        assert!(reader.is_closed());
        assert!(matches!(reader.next_record(), Err(SourceError::Closed)));
        assert!(matches!(reader.write("x\r\n"), Err(SendError::Disconnected)));
    }

    #[test]
    fn read_label_skips_other_channels() {
        let mut reader = RecordReader::new(
            Script::new(vec![
                line("B,1"),
                line("noise"),
                line("A,oops"),
                line("A,4,5"),
            ]),
            Decoder::default(),
        );
        let rec = reader
            .read_label("A", Duration::from_secs(5))
            .unwrap()
            .unwrap();
        assert_eq!(
            rec,
            Record::Numeric {
                label: "A".into(),
                samples: vec![4.0, 5.0]
            }
        );
    }

    #[test]
    fn checksum_applies_through_reader() {
        let good = append_checksum("A,1");
        let mut reader = RecordReader::new(
            Script::new(vec![line(&good), line("A,1")]),
            Decoder::new(Integrity::XorChecksum),
        );
        assert!(reader.next_record().unwrap().is_numeric());
        assert!(matches!(
            reader.next_record().unwrap(),
            Record::Malformed { .. }
        ));
    }

    #[test]
    fn high_bit_flips_become_malformed() {
        let line = append_checksum("gyro,0.125,-9.81,42");
        let payload_len = line.len() - 1;
        let mut input = Vec::new();
        for pos in 0..payload_len {
            let mut bytes = line.clone().into_bytes();
            bytes[pos] ^= 0x80;
            input.extend_from_slice(&bytes);
            input.push(b'\n');
        }
        let mut reader = RecordReader::new(
            crate::source::pipe::Pipe::new(std::io::Cursor::new(input)),
            Decoder::new(Integrity::XorChecksum),
        );
        let mut malformed = 0;
        loop {
            match reader.next_record() {
                Ok(Record::Empty) => {}
                Ok(Record::Malformed {
                    reason: DecodeError::InvalidUtf8,
                    ..
                }) => malformed += 1,
                Ok(other) => panic!("flip slipped through as {:?}", other),
                Err(SourceError::Closed) => break,
                Err(e) => panic!("unexpected error {:?}", e),
            }
        }
        assert_eq!(malformed, payload_len);
    }

    #[test]
    fn writes_pass_through() {
        let mut reader = RecordReader::new(Script::new(vec![]), Decoder::default());
        reader.write("SET 1\r\n").unwrap();
        assert_eq!(reader.source.written, vec!["SET 1\r\n".to_string()]);
    }
}
