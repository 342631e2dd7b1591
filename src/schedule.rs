//! Retransmission Schedule (C6): precomputes a repetition ladder from a
//! threshold/interval configuration and decides whether a given alert is
//! due for retransmission on a sink.

use chrono::{DateTime, Duration, Utc};

/// A 5-second jitter buffer absorbs clock skew against the supervisor's
/// own period.
const JITTER: Duration = Duration::seconds(5);

/// One `(threshold, interval)` bracket as configured: "retransmit every
/// `interval` until `threshold` has elapsed since first transmission".
#[derive(Debug, Clone, Copy)]
pub struct Bracket {
    pub threshold: Duration,
    pub interval: Duration,
}

/// The precomputed offsets `0, d1, d2, ..., dn` at which a sink should
/// retransmit, measured from time-of-first-transmission.
#[derive(Debug, Clone)]
pub struct Schedule {
    offsets: Vec<Duration>,
}

impl Schedule {
    /// Precompute offsets from an ordered list of brackets (ascending
    /// threshold). Within each bracket, appends further points `interval`
    /// apart until the bracket's threshold is reached.
    pub fn new(brackets: &[Bracket]) -> Self {
        let mut offsets = vec![Duration::zero()];
        for bracket in brackets {
            if bracket.interval <= Duration::zero() {
                continue;
            }
            let mut last = *offsets.last().unwrap();
            while last + bracket.interval <= bracket.threshold {
                last = last + bracket.interval;
                offsets.push(last);
            }
        }
        Schedule { offsets }
    }

    /// An empty schedule: no brackets configured, so nothing beyond the
    /// initial (mandatory) transmission ever fires.
    pub fn empty() -> Self {
        Schedule {
            offsets: vec![Duration::zero()],
        }
    }

    /// Decide whether `alert` is due for retransmission on a sink, given
    /// its `first`/`last` transmission timestamps (`None` if never sent).
    pub fn tx_required(&self, status: Option<(DateTime<Utc>, DateTime<Utc>)>, now: DateTime<Utc>) -> bool {
        let Some((first, last)) = status else {
            return true;
        };
        let elapsed = last - first;
        match self.offsets.iter().find(|&&d| d > elapsed) {
            Some(&next) => first + next <= now + JITTER,
            None => false,
        }
    }
}
