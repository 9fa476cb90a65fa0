//! Channel discovery
//!
//! Labels and widths are not configured up front: they are inferred by
//! watching the stream for a bounded number of records. A label counts
//! as a channel when it shows up at least `observations / max_channels`
//! times (rounded up), which drops one-off noise while tolerating channels that
//! arrive at different rates.

use super::{Record, RecordStream};
use crate::source::SourceError;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Largest number of fields a single label may carry. Anything wider is
/// most likely several lines run together.
pub const MAX_WIDTH: usize = 15;

/// Budget for a discovery run.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryPolicy {
    /// Framed records to look at. Timeouts do not count.
    pub observations: usize,
    /// Assumed upper bound on concurrent channels.
    pub max_channels: usize,
    /// Wall clock bound, for sources that go quiet.
    pub deadline: Duration,
}

impl Default for DiscoveryPolicy {
    fn default() -> Self {
        DiscoveryPolicy {
            observations: 100,
            max_channels: 10,
            deadline: Duration::from_secs(10),
        }
    }
}

impl DiscoveryPolicy {
    /// Minimum number of sightings for a label to qualify as a channel.
    pub fn threshold(&self) -> usize {
        let channels = self.max_channels.max(1);
        self.observations.div_ceil(channels).max(1)
    }
}

fn summarize(seen: &BTreeMap<String, usize>) -> String {
    if seen.is_empty() {
        return "  (none)".to_string();
    }
    seen.iter()
        .map(|(label, count)| format!("  {}: {}", label, count))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("label '{label}' not found after receiving {observed} records\nreceived labels:\n{}", summarize(.seen))]
    LabelNotFound {
        label: String,
        observed: usize,
        seen: BTreeMap<String, usize>,
    },
    #[error("no channel seen often enough in {observed} records\nreceived labels:\n{}", summarize(.seen))]
    NoChannels {
        observed: usize,
        seen: BTreeMap<String, usize>,
    },
    #[error("source closed while looking for label '{label}' after {observed} records\nreceived labels:\n{}", summarize(.seen))]
    Closed {
        label: String,
        observed: usize,
        seen: BTreeMap<String, usize>,
    },
}

/// Tally of numeric labels over one observation run.
struct Tally {
    seen: BTreeMap<String, usize>,
    observed: usize,
    budget: usize,
    deadline: Instant,
}

impl Tally {
    fn new(policy: &DiscoveryPolicy) -> Tally {
        Tally {
            seen: BTreeMap::new(),
            observed: 0,
            budget: policy.observations,
            deadline: Instant::now() + policy.deadline,
        }
    }

    /// Pulls the next framed record, or `None` once the budget is spent.
    fn next<R: RecordStream + ?Sized>(
        &mut self,
        stream: &mut R,
    ) -> Option<Result<Record, SourceError>> {
        loop {
            if self.observed >= self.budget || Instant::now() >= self.deadline {
                return None;
            }
            match stream.next_record() {
                Ok(Record::Empty) => continue,
                Ok(record) => {
                    self.observed += 1;
                    if let Record::Numeric { label, .. } = &record {
                        *self.seen.entry(label.clone()).or_default() += 1;
                    }
                    return Some(Ok(record));
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Watches `stream` and returns the sorted labels that qualify as channels.
pub fn discover_channels<R: RecordStream + ?Sized>(
    stream: &mut R,
    policy: &DiscoveryPolicy,
) -> Result<Vec<String>, DiscoveryError> {
    log::info!(
        "Discovering labels by looking at the first {} records",
        policy.observations
    );
    let mut tally = Tally::new(policy);
    while let Some(res) = tally.next(stream) {
        if let Err(e) = res {
            log::warn!("discovery ended early: {}", e);
            break;
        }
    }
    let threshold = policy.threshold();
    let labels: Vec<String> = tally
        .seen
        .iter()
        .filter(|&(_, &count)| count >= threshold)
        .map(|(label, _)| label.clone())
        .collect();
    if labels.is_empty() {
        return Err(DiscoveryError::NoChannels {
            observed: tally.observed,
            seen: tally.seen,
        });
    }
    log::info!("Found labels: {}", labels.join(", "));
    Ok(labels)
}

/// Watches `stream` until a numeric record for `label` shows its width.
pub fn discover_width<R: RecordStream + ?Sized>(
    stream: &mut R,
    label: &str,
    policy: &DiscoveryPolicy,
) -> Result<usize, DiscoveryError> {
    let mut tally = Tally::new(policy);
    while let Some(res) = tally.next(stream) {
        match res {
            Ok(Record::Numeric { label: l, samples }) => {
                if l == label && (1..=MAX_WIDTH).contains(&samples.len()) {
                    return Ok(samples.len());
                }
            }
            Ok(_) => {}
            Err(e) => {
                log::warn!("width discovery for '{}' ended early: {}", label, e);
                return Err(DiscoveryError::Closed {
                    label: label.to_string(),
                    observed: tally.observed,
                    seen: tally.seen,
                });
            }
        }
    }
    Err(DiscoveryError::LabelNotFound {
        label: label.to_string(),
        observed: tally.observed,
        seen: tally.seen,
    })
}
