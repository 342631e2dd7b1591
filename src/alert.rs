//! Alert Record (C2): the in-memory, persisted representation of one alert
//! thread -- the last-seen CAP payload plus the bookkeeping the rest of the
//! core attaches to it (persistent radio ids, per-sink transmission
//! history).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cap::CapAlert;

/// The well-known attribute key under which persistent ids live.
pub const PIDS_ATTR: &str = "pids";

/// First/last transmission timestamps for one sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxTimestamps {
    pub first: DateTime<Utc>,
    pub last: DateTime<Utc>,
}

/// One alert thread as the cache tracks it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    /// The last-seen CAP payload for this identifier.
    pub capdata: CapAlert,

    /// Free-form attributes. The only key the core understands is `pids`;
    /// everything else is preserved opaquely across merges.
    #[serde(default)]
    pub attrs: serde_json::Map<String, Value>,

    /// `(sink kind -> sink name -> timestamps)`.
    #[serde(default)]
    pub txstate: HashMap<String, HashMap<String, TxTimestamps>>,
}

impl AlertRecord {
    /// Create a fresh record for a newly-seen alert, with no attrs or
    /// transmission history.
    pub fn new(capdata: CapAlert) -> Self {
        AlertRecord {
            capdata,
            attrs: serde_json::Map::new(),
            txstate: HashMap::new(),
        }
    }

    /// Replace the CAP payload with a newer version of the same alert.
    /// `attrs` and `txstate` are left untouched (invariant 1: merging an
    /// incoming alert with the same identifier replaces the CAP payload but
    /// preserves attrs and txstate).
    ///
    /// # Panics
    ///
    /// Panics if `newer.identifier != self.capdata.identifier`: merging
    /// alerts with different identifiers is a programmer error, not a
    /// recoverable condition (see the "integrity violations" error class).
    pub fn merge(&mut self, newer: CapAlert) {
        assert_eq!(
            self.capdata.identifier, newer.identifier,
            "merge() requires identifier equality"
        );
        self.capdata = newer;
    }

    /// Read an attribute.
    pub fn attr_get(&self, key: &str) -> Option<&Value> {
        self.attrs.get(key)
    }

    /// Write an attribute.
    pub fn attr_set(&mut self, key: &str, value: Value) {
        self.attrs.insert(key.to_owned(), value);
    }

    /// The record's persistent ids, if any have been assigned.
    pub fn pids(&self) -> Vec<u32> {
        self.attr_get(PIDS_ATTR)
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_u64).map(|n| n as u32).collect())
            .unwrap_or_default()
    }

    /// True once at least one persistent id has been assigned.
    pub fn has_pids(&self) -> bool {
        !self.pids().is_empty()
    }

    /// Assign persistent ids (always sorted, for deterministic output).
    pub fn set_pids(&mut self, mut pids: Vec<u32>) {
        pids.sort_unstable();
        pids.dedup();
        let values: Vec<Value> = pids.into_iter().map(Value::from).collect();
        self.attr_set(PIDS_ATTR, Value::Array(values));
    }

    /// First/last transmission timestamps for a given sink, or `None` if
    /// this record has never been transmitted there.
    pub fn tx_status(&self, kind: &str, name: &str) -> Option<TxTimestamps> {
        self.txstate.get(kind)?.get(name).copied()
    }

    /// Record a transmission on `(kind, name)` at time `t`. If this is the
    /// first transmission on this sink, `first` is also set to `t`;
    /// `last` is always updated.
    pub fn tx_done(&mut self, kind: &str, name: &str, t: DateTime<Utc>) {
        let by_name = self.txstate.entry(kind.to_owned()).or_default();
        match by_name.get_mut(name) {
            Some(ts) => ts.last = t,
            None => {
                by_name.insert(name.to_owned(), TxTimestamps { first: t, last: t });
            }
        }
    }
}
