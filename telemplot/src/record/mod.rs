//! Records
//!
//! A framed line is decoded into exactly one `Record`:
//! `label,v1,v2,...,vk` becomes `Record::Numeric` when every value parses
//! as a float. Anything that fails the integrity check or has a
//! non-numeric value is handed back as `Record::Malformed`, together with
//! the reason, so callers can print it. Lines carrying the reserved
//! `COMMAND` label are operator commands embedded in the data stream.

pub mod discover;
mod reader;

pub use discover::{
    discover_channels, discover_width, DiscoveryError, DiscoveryPolicy, MAX_WIDTH,
};
pub use reader::{RecordReader, RecordStream};

use std::fmt;
use std::str::FromStr;

/// Label reserved for stream-embedded operator commands.
pub const COMMAND_LABEL: &str = "COMMAND";

/// Field separator on the wire.
pub const SEPARATOR: char = ',';

/// Why a line could not be turned into numeric samples.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("checksum mismatch: expected {expected:#04x}, found {found:#04x}")]
    ChecksumMismatch { expected: u8, found: u8 },
    #[error("line too short to carry a checksum")]
    MissingChecksum,
    #[error("field {index} ('{field}') is not a number")]
    NotNumeric { index: usize, field: String },
    #[error("line is not valid text")]
    InvalidUtf8,
}

/// One decoded line.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// A label followed by numeric samples.
    Numeric { label: String, samples: Vec<f64> },
    /// A line that failed to decode. The fields are kept verbatim.
    Malformed {
        label: String,
        raw_fields: Vec<String>,
        reason: DecodeError,
    },
    /// An operator command carried by the data stream.
    Command { payload: String },
    /// A line without any separator, e.g. a status message.
    Text { line: String },
    /// Nothing arrived, or the line was blank.
    Empty,
}

impl Record {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Record::Numeric { .. })
    }

    /// Renders the record back to wire text, without checksum or terminator.
    pub fn to_line(&self) -> String {
        match self {
            Record::Numeric { label, samples } => {
                let mut line = label.clone();
                for v in samples {
                    line.push(SEPARATOR);
                    line.push_str(&v.to_string());
                }
                line
            }
            Record::Malformed {
                label, raw_fields, ..
            } => {
                let mut line = label.clone();
                for f in raw_fields {
                    line.push(SEPARATOR);
                    line.push_str(f);
                }
                line
            }
            Record::Command { payload } => format!("{}{}{}", COMMAND_LABEL, SEPARATOR, payload),
            Record::Text { line } => line.clone(),
            Record::Empty => String::new(),
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Record::Numeric { label, samples } => {
                write!(f, "{}", label)?;
                for v in samples {
                    write!(f, " {}", v)?;
                }
                Ok(())
            }
            Record::Malformed {
                label, raw_fields, ..
            } => {
                write!(f, "{}", label)?;
                for field in raw_fields {
                    write!(f, " {}", field)?;
                }
                Ok(())
            }
            Record::Command { payload } => write!(f, "{} {}", COMMAND_LABEL, payload),
            Record::Text { line } => write!(f, "{}", line),
            Record::Empty => Ok(()),
        }
    }
}

/// XOR of all bytes, the checksum used on the wire.
pub fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Appends the raw checksum byte to an ASCII line.
pub fn append_checksum(line: &str) -> String {
    let mut out = line.to_string();
    out.push(char::from(xor_checksum(line.as_bytes())));
    out
}

/// Integrity check applied to each line before it is split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Integrity {
    /// Every line passes.
    #[default]
    AlwaysPass,
    /// The last character is the XOR of all preceding bytes.
    XorChecksum,
}

impl Integrity {
    /// Checks `line` and returns the part of it carrying data.
    pub fn check<'a>(&self, line: &'a str) -> Result<&'a str, DecodeError> {
        match self {
            Integrity::AlwaysPass => Ok(line),
            Integrity::XorChecksum => {
                let bytes = line.as_bytes();
                let Some((&found, body)) = bytes.split_last() else {
                    return Err(DecodeError::MissingChecksum);
                };
                let expected = xor_checksum(body);
                if found != expected || !line.is_char_boundary(body.len()) {
                    return Err(DecodeError::ChecksumMismatch { expected, found });
                }
                Ok(&line[..body.len()])
            }
        }
    }
}

impl FromStr for Integrity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" | "always-pass" => Ok(Integrity::AlwaysPass),
            "xor" | "checksum" => Ok(Integrity::XorChecksum),
            _ => Err(format!("unknown integrity check '{}' (none, xor)", s)),
        }
    }
}

/// Splits a line into its label and the remaining fields.
fn split_fields(line: &str) -> (String, Vec<String>) {
    let mut fields = line.split(SEPARATOR);
    let label = fields.next().unwrap_or_default().to_string();
    (label, fields.map(str::to_string).collect())
}

/// Turns lines into `Record`s.
#[derive(Debug, Clone, Copy, Default)]
pub struct Decoder {
    integrity: Integrity,
}

impl Decoder {
    pub fn new(integrity: Integrity) -> Decoder {
        Decoder { integrity }
    }

    pub fn integrity(&self) -> Integrity {
        self.integrity
    }

    /// Decodes one line.
    ///
    /// If `wanted` names a label and the line carries a different one, the
    /// line is not for this caller and `None` is returned. Lines failing
    /// the integrity check are returned as `Malformed` regardless of
    /// `wanted`, since their label cannot be trusted.
    pub fn decode(&self, line: &str, wanted: Option<&str>) -> Option<Record> {
        if line.is_empty() {
            return Some(Record::Empty);
        }
        let payload = match self.integrity.check(line) {
            Ok(payload) => payload,
            Err(reason) => {
                let (label, raw_fields) = split_fields(line);
                return Some(Record::Malformed {
                    label,
                    raw_fields,
                    reason,
                });
            }
        };
        if !payload.contains(SEPARATOR) {
            if wanted.is_some() {
                return None;
            }
            if payload.trim().is_empty() {
                return Some(Record::Empty);
            }
            return Some(Record::Text {
                line: payload.to_string(),
            });
        }

        let (label, raw_fields) = split_fields(payload);
        if let Some(wanted) = wanted {
            if wanted != label {
                return None;
            }
        }
        if label == COMMAND_LABEL {
            let payload = raw_fields
                .first()
                .map(|f| f.trim().to_string())
                .unwrap_or_default();
            return Some(Record::Command { payload });
        }

        let mut samples = Vec::with_capacity(raw_fields.len());
        for (index, field) in raw_fields.iter().enumerate() {
            match field.trim().parse::<f64>() {
                Ok(v) => samples.push(v),
                Err(_) => {
                    let field = field.clone();
                    return Some(Record::Malformed {
                        label,
                        raw_fields,
                        reason: DecodeError::NotNumeric { index, field },
                    });
                }
            }
        }
        Some(Record::Numeric { label, samples })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric(label: &str, samples: &[f64]) -> Record {
        Record::Numeric {
            label: label.to_string(),
            samples: samples.to_vec(),
        }
    }

    #[test]
    fn decodes_numeric_lines() {
        let dec = Decoder::default();
        assert_eq!(
            dec.decode("A,1.0,2.5,-3e2", None),
            Some(numeric("A", &[1.0, 2.5, -300.0]))
        );
        assert_eq!(dec.decode("temp, 21.5 ", None), Some(numeric("temp", &[21.5])));
    }

    #[test]
    fn conversion_is_all_or_nothing() {
        let dec = Decoder::default();
        match dec.decode("A,1.0,oops,3", None) {
            Some(Record::Malformed {
                label,
                raw_fields,
                reason,
            }) => {
                assert_eq!(label, "A");
                assert_eq!(raw_fields, vec!["1.0", "oops", "3"]);
                assert_eq!(
                    reason,
                    DecodeError::NotNumeric {
                        index: 1,
                        field: "oops".into()
                    }
                );
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            dec.decode("A,1,,2", None),
            Some(Record::Malformed { .. })
        ));
    }

    #[test]
    fn label_filter_skips_other_labels() {
        let dec = Decoder::default();
        assert_eq!(dec.decode("B,1,2", Some("A")), None);
        assert_eq!(dec.decode("Booting", Some("A")), None);
        assert_eq!(dec.decode("A,1,2", Some("A")), Some(numeric("A", &[1.0, 2.0])));
    }

    #[test]
    fn command_and_text_lines() {
        let dec = Decoder::default();
        assert_eq!(
            dec.decode("COMMAND, x ", None),
            Some(Record::Command {
                payload: "x".into()
            })
        );
        assert_eq!(
            dec.decode("COMMAND,", None),
            Some(Record::Command {
                payload: "".into()
            })
        );
        assert_eq!(
            dec.decode("Sensor v1.2 ready", None),
            Some(Record::Text {
                line: "Sensor v1.2 ready".into()
            })
        );
        assert_eq!(dec.decode("", None), Some(Record::Empty));
    }

    #[test]
    fn checksummed_lines() {
        let dec = Decoder::new(Integrity::XorChecksum);
        let line = append_checksum("A,1.0,2.0,3.0");
        assert_eq!(dec.decode(&line, None), Some(numeric("A", &[1.0, 2.0, 3.0])));

        let unchecked = "A,1.0,2.0,3.0";
        assert!(matches!(
            dec.decode(unchecked, None),
            Some(Record::Malformed {
                reason: DecodeError::ChecksumMismatch { .. },
                ..
            })
        ));
    }

    #[test]
    fn any_single_bit_flip_is_caught() {
        let dec = Decoder::new(Integrity::XorChecksum);
        let line = append_checksum("gyro,0.125,-9.81,42");
        let payload_len = line.len() - 1;
        for pos in 0..payload_len {
            // Bits 0..7 keep the byte ASCII. Bit 7 breaks UTF-8 and is caught
            // while framing, see `reader::tests::high_bit_flips_become_malformed`.
            for bit in 0..7 {
                let mut bytes = line.clone().into_bytes();
                bytes[pos] ^= 1 << bit;
                let flipped = String::from_utf8(bytes).unwrap();
                match dec.decode(&flipped, None) {
                    Some(Record::Malformed { reason, .. }) => {
                        assert!(matches!(reason, DecodeError::ChecksumMismatch { .. }))
                    }
                    other => panic!("flip at {}:{} gave {:?}", pos, bit, other),
                }
            }
        }
    }

    #[test]
    fn checksum_guards_multibyte_tail() {
        let dec = Decoder::new(Integrity::XorChecksum);
        assert!(matches!(
            dec.decode("A,1,µ", None),
            Some(Record::Malformed { .. })
        ));
    }

    #[test]
    fn to_line_matches_wire_shape() {
        assert_eq!(numeric("A", &[1.0, 2.5]).to_line(), "A,1,2.5");
        assert_eq!(
            Record::Command {
                payload: "x".into()
            }
            .to_line(),
            "COMMAND,x"
        );
    }

    #[test]
    fn integrity_names() {
        assert_eq!("xor".parse::<Integrity>(), Ok(Integrity::XorChecksum));
        assert_eq!("none".parse::<Integrity>(), Ok(Integrity::AlwaysPass));
        assert!("crc32".parse::<Integrity>().is_err());
    }
}
