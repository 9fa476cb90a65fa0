//! Session state
//!
//! A `Session` is the frozen set of channels found by discovery plus one
//! `ChannelWindow` per channel. Channels never change during a session:
//! rediscovery builds a new `Session` from scratch.

use super::window::{ChannelWindow, ShapeMismatch};
use crate::record::{
    discover_channels, discover_width, DiscoveryError, DiscoveryPolicy, Record, RecordStream,
};
use std::collections::BTreeMap;

/// A channel label and the number of fields it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub label: String,
    pub width: usize,
}

/// What `Session::ingest` did with a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Ingest {
    /// Appended to the window of `label`.
    Appended { label: String },
    /// An operator command embedded in the stream.
    Command { payload: String },
    /// A known channel with the wrong number of fields.
    Rejected {
        record: Record,
        error: ShapeMismatch,
    },
    /// Not channel data. Handed back for the caller to print or log.
    Passthrough(Record),
    /// Nothing arrived.
    Idle,
}

pub struct Session {
    specs: Vec<ChannelSpec>,
    windows: BTreeMap<String, ChannelWindow>,
    /// Records appended per label since the last `take_rates`.
    arrivals: BTreeMap<String, u64>,
    capacity: usize,
}

impl Session {
    /// Session with a window of `capacity` rows for each spec.
    pub fn new(specs: Vec<ChannelSpec>, capacity: usize) -> Session {
        let windows = specs
            .iter()
            .map(|s| (s.label.clone(), ChannelWindow::new(capacity, s.width)))
            .collect();
        let arrivals = specs.iter().map(|s| (s.label.clone(), 0)).collect();
        Session {
            specs,
            windows,
            arrivals,
            capacity,
        }
    }

    /// Builds a session by watching `stream`. Channel discovery is skipped
    /// when `labels` is given, widths are always discovered.
    pub fn discover<R: RecordStream + ?Sized>(
        stream: &mut R,
        policy: &DiscoveryPolicy,
        capacity: usize,
        labels: Option<&[String]>,
    ) -> Result<Session, DiscoveryError> {
        let labels = match labels {
            Some(labels) if !labels.is_empty() => labels.to_vec(),
            _ => discover_channels(stream, policy)?,
        };
        let mut specs = Vec::with_capacity(labels.len());
        for label in labels {
            let width = discover_width(stream, &label, policy)?;
            specs.push(ChannelSpec { label, width });
        }
        for spec in &specs {
            log::info!("{}: {} fields", spec.label, spec.width);
        }
        Ok(Session::new(specs, capacity))
    }

    pub fn specs(&self) -> &[ChannelSpec] {
        &self.specs
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.specs.iter().map(|s| s.label.as_str())
    }

    pub fn window(&self, label: &str) -> Option<&ChannelWindow> {
        self.windows.get(label)
    }

    /// Windows in label order.
    pub fn windows_mut(&mut self) -> impl Iterator<Item = (&str, &mut ChannelWindow)> {
        self.windows.iter_mut().map(|(l, w)| (l.as_str(), w))
    }

    pub fn windows(&self) -> impl Iterator<Item = (&str, &ChannelWindow)> {
        self.windows.iter().map(|(l, w)| (l.as_str(), w))
    }

    /// Routes one record to its channel window.
    pub fn ingest(&mut self, record: Record) -> Ingest {
        match record {
            Record::Empty => Ingest::Idle,
            Record::Command { payload } => Ingest::Command { payload },
            Record::Numeric { label, samples } => match self.windows.get_mut(&label) {
                Some(window) => match window.append(&samples) {
                    Ok(()) => {
                        *self.arrivals.entry(label.clone()).or_default() += 1;
                        Ingest::Appended { label }
                    }
                    Err(error) => Ingest::Rejected {
                        record: Record::Numeric { label, samples },
                        error,
                    },
                },
                None => Ingest::Passthrough(Record::Numeric { label, samples }),
            },
            other => Ingest::Passthrough(other),
        }
    }

    /// Resets every window, see `ChannelWindow::reset`.
    pub fn reset_windows(&mut self) {
        for window in self.windows.values_mut() {
            window.reset();
        }
    }

    /// Returns the per label arrival counts and zeroes them.
    pub fn take_rates(&mut self) -> Vec<(String, u64)> {
        self.arrivals
            .iter_mut()
            .map(|(label, count)| (label.clone(), std::mem::take(count)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::DecodeError;
    use std::collections::VecDeque;

    fn numeric(label: &str, samples: &[f64]) -> Record {
        Record::Numeric {
            label: label.to_string(),
            samples: samples.to_vec(),
        }
    }

    fn session() -> Session {
        Session::new(
            vec![
                ChannelSpec {
                    label: "A".into(),
                    width: 2,
                },
                ChannelSpec {
                    label: "B".into(),
                    width: 1,
                },
            ],
            4,
        )
    }

    #[test]
    fn routes_records_to_windows() {
        let mut s = session();
        assert_eq!(
            s.ingest(numeric("A", &[1.0, 2.0])),
            Ingest::Appended { label: "A".into() }
        );
        assert_eq!(
            s.ingest(numeric("B", &[3.0])),
            Ingest::Appended { label: "B".into() }
        );
        assert_eq!(s.window("A").unwrap().sample_index(), 1);
        assert_eq!(s.window("B").unwrap().head(), Some(&[3.0][..]));
        assert_eq!(s.labels().collect::<Vec<_>>(), vec!["A", "B"]);
    }

    #[test]
    fn wrong_width_is_rejected_not_reshaped() {
        let mut s = session();
        match s.ingest(numeric("A", &[1.0])) {
            Ingest::Rejected { record, error } => {
                assert_eq!(record, numeric("A", &[1.0]));
                assert_eq!(
                    error,
                    ShapeMismatch {
                        expected: 2,
                        actual: 1
                    }
                );
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(s.window("A").unwrap().is_empty());
    }

    #[test]
    fn everything_else_is_handed_back() {
        let mut s = session();
        assert_eq!(s.ingest(Record::Empty), Ingest::Idle);
        assert_eq!(
            s.ingest(Record::Command {
                payload: "x".into()
            }),
            Ingest::Command {
                payload: "x".into()
            }
        );
        let unknown = numeric("Z", &[1.0]);
        assert_eq!(s.ingest(unknown.clone()), Ingest::Passthrough(unknown));
        let bad = Record::Malformed {
            label: "A".into(),
            raw_fields: vec!["x".into()],
            reason: DecodeError::NotNumeric {
                index: 0,
                field: "x".into(),
            },
        };
        assert_eq!(s.ingest(bad.clone()), Ingest::Passthrough(bad));
    }

    #[test]
    fn rates_are_counted_and_cleared() {
        let mut s = session();
        for _ in 0..3 {
            s.ingest(numeric("A", &[1.0, 2.0]));
        }
        s.ingest(numeric("A", &[1.0]));
        assert_eq!(
            s.take_rates(),
            vec![("A".to_string(), 3), ("B".to_string(), 0)]
        );
        assert_eq!(
            s.take_rates(),
            vec![("A".to_string(), 0), ("B".to_string(), 0)]
        );
    }

    #[test]
    fn discovery_builds_specs() {
        let mut stream: VecDeque<Record> = VecDeque::new();
        for _ in 0..60 {
            stream.push_back(numeric("mag", &[1.0, 2.0, 3.0]));
            stream.push_back(numeric("temp", &[20.0]));
        }
        let policy = DiscoveryPolicy {
            observations: 40,
            ..Default::default()
        };
        let s = Session::discover(&mut stream, &policy, 16, None).unwrap();
        assert_eq!(
            s.specs(),
            &[
                ChannelSpec {
                    label: "mag".into(),
                    width: 3
                },
                ChannelSpec {
                    label: "temp".into(),
                    width: 1
                }
            ]
        );
        assert_eq!(s.window("mag").unwrap().capacity(), 16);
    }

    #[test]
    fn explicit_labels_skip_channel_discovery() {
        let mut stream: VecDeque<Record> = vec![numeric("B", &[1.0, 1.0])].into();
        let labels = vec!["B".to_string()];
        let s = Session::discover(&mut stream, &DiscoveryPolicy::default(), 8, Some(&labels))
            .unwrap();
        assert_eq!(s.window("B").unwrap().width(), 2);
    }

    #[test]
    fn reset_clears_all_windows() {
        let mut s = session();
        s.ingest(numeric("A", &[1.0, 2.0]));
        s.ingest(numeric("B", &[3.0]));
        s.reset_windows();
        for (_, w) in s.windows() {
            assert!(w.is_empty());
            assert_eq!(w.observed_min(), f64::INFINITY);
        }
    }
}
