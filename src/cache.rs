//! Alert Cache (C4): deduplicates, persists, ages out, resolves
//! supersessions, and allocates persistent radio ids for live alerts.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::alert::AlertRecord;
use crate::cap::CapAlert;

/// Default age horizon: alerts older than this are eligible for purging.
pub const DEFAULT_AGE: Duration = Duration::days(31);

/// The persistent, reference-aware alert store.
pub struct AlertCache {
    records: HashMap<String, AlertRecord>,
    path: PathBuf,
    age: Duration,
}

impl AlertCache {
    /// Create a new, empty cache backed by `path` (not yet written).
    pub fn new(path: impl Into<PathBuf>, age: Duration) -> Self {
        AlertCache {
            records: HashMap::new(),
            path: path.into(),
            age,
        }
    }

    /// Load a cache from disk, or start empty if the file doesn't exist yet
    /// -- a missing cache file is normal on first run, not an error.
    pub fn load(path: impl Into<PathBuf>, age: Duration) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            info!(path = %path.display(), "no existing cache file, starting empty");
            return Ok(AlertCache::new(path, age));
        }
        let data = std::fs::read_to_string(&path)
            .with_context(|| format!("could not read cache file {}", path.display()))?;
        let records: HashMap<String, AlertRecord> = serde_json::from_str(&data)
            .with_context(|| format!("could not parse cache file {}", path.display()))?;
        debug!(path = %path.display(), count = records.len(), "loaded cache");
        Ok(AlertCache { records, path, age })
    }

    /// Write the cache back to disk. Writes to a temporary file in the same
    /// directory and renames it over the real path, so a crash mid-write
    /// never corrupts the previous good cache.
    pub fn dump(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("could not create cache directory {}", parent.display())
                })?;
            }
        }
        let json = serde_json::to_string_pretty(&self.records)
            .context("could not serialize cache")?;
        let tmp_path = tmp_path_for(&self.path);
        std::fs::write(&tmp_path, json)
            .with_context(|| format!("could not write {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path).with_context(|| {
            format!(
                "could not rename {} to {}",
                tmp_path.display(),
                self.path.display()
            )
        })?;
        Ok(())
    }

    /// Ingest a freshly-fetched alert. If we already know this identifier,
    /// merge in place (replacing the CAP payload, preserving attrs and
    /// txstate). Otherwise insert it, unless it's already older than our
    /// age horizon -- we don't want a newly-added source to resurrect
    /// ancient alerts.
    pub fn update(&mut self, alert: CapAlert, now: DateTime<Utc>) {
        if let Some(record) = self.records.get_mut(&alert.identifier) {
            record.merge(alert);
            return;
        }
        if now - alert.sent <= self.age {
            let id = alert.identifier.clone();
            self.records.insert(id, AlertRecord::new(alert));
        } else {
            debug!(
                identifier = %alert.identifier,
                sent = %alert.sent,
                "dropping alert older than the age horizon on first sight"
            );
        }
    }

    /// Age out stale records, except those still referenced by a live
    /// (non-stale) record's `references`. Returns the set of identifiers
    /// still present after purging.
    pub fn purge(&mut self, now: DateTime<Utc>) -> HashSet<String> {
        let threshold = now - self.age;

        let mut fresh_ids = Vec::new();
        let mut stale_for_deletion = HashSet::new();
        for (id, record) in &self.records {
            if record.capdata.sent >= threshold {
                fresh_ids.push(id.clone());
            } else {
                stale_for_deletion.insert(id.clone());
            }
        }

        for id in &fresh_ids {
            let Some(record) = self.records.get(id) else {
                continue;
            };
            for referenced in record.capdata.reference_ids() {
                if stale_for_deletion.remove(&referenced) {
                    debug!(
                        referenced,
                        referencing = %id,
                        "keeping stale alert: still referenced by a live record"
                    );
                }
            }
        }

        for id in &stale_for_deletion {
            self.records.remove(id);
        }
        if !stale_for_deletion.is_empty() {
            info!(purged = stale_for_deletion.len(), "purged stale alerts");
        }

        self.records.keys().cloned().collect()
    }

    /// "Head" alerts: the live records that nothing else in the cache
    /// references. These are the most recent version of each thread, and
    /// the only ones considered for emission.
    pub fn head_ids(&self) -> Vec<String> {
        let referenced: HashSet<String> = self
            .records
            .values()
            .flat_map(|r| r.capdata.reference_ids())
            .collect();
        self.records
            .keys()
            .filter(|id| !referenced.contains(*id))
            .cloned()
            .collect()
    }

    /// Assign persistent radio ids to every live record that doesn't
    /// already have one: new top-of-thread alerts get a fresh id by
    /// first-fit over the positive integers; updates/cancels inherit the
    /// union of their predecessors' ids. Records on a reference cycle are
    /// logged and left un-tagged.
    pub fn assign_persistent_ids(&mut self) {
        let mut assigned: HashMap<String, Vec<u32>> = HashMap::new();
        let mut need_pids: Vec<String> = Vec::new();
        let mut used: BTreeSet<u32> = BTreeSet::new();

        for (id, record) in &self.records {
            if record.has_pids() {
                let pids = record.pids();
                used.extend(pids.iter().copied());
                assigned.insert(id.clone(), pids);
            } else {
                need_pids.push(id.clone());
            }
        }

        let mut free_ids = free_id_source(used);

        loop {
            let mut progress = false;
            let mut still_needed = Vec::with_capacity(need_pids.len());

            for id in need_pids {
                let cached_refs: Vec<String> = self.records[&id]
                    .capdata
                    .reference_ids()
                    .into_iter()
                    .filter(|rid| self.records.contains_key(rid))
                    .collect();

                if cached_refs.is_empty() {
                    let pid = free_ids.next().expect("the positive integers are infinite");
                    assigned.insert(id, vec![pid]);
                    progress = true;
                } else if cached_refs.iter().all(|r| assigned.contains_key(r)) {
                    let mut pids: Vec<u32> = cached_refs
                        .iter()
                        .flat_map(|r| assigned[r].iter().copied())
                        .collect();
                    pids.sort_unstable();
                    pids.dedup();
                    assigned.insert(id, pids);
                    progress = true;
                } else {
                    still_needed.push(id);
                }
            }

            need_pids = still_needed;
            if need_pids.is_empty() || !progress {
                break;
            }
        }

        for id in &need_pids {
            warn!(identifier = %id, "reference cycle detected during id assignment, leaving un-tagged");
        }

        for (id, pids) in assigned {
            if let Some(record) = self.records.get_mut(&id) {
                record.set_pids(pids);
            }
        }
    }

    /// Look up one record by CAP identifier.
    pub fn get(&self, id: &str) -> Option<&AlertRecord> {
        self.records.get(id)
    }

    /// Look up one record by CAP identifier, mutably (used by sinks to
    /// record a transmission via [`AlertRecord::tx_done`]).
    pub fn get_mut(&mut self, id: &str) -> Option<&mut AlertRecord> {
        self.records.get_mut(id)
    }

    /// The number of records currently held (live, pre-purge state
    /// notwithstanding -- this simply reflects what's in memory).
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// An infinite source of "next free id": the gaps in `1..=max(used)`, in
/// ascending order, followed by every integer past `max(used)`. Extends
/// past the current maximum only once every gap below it is occupied.
fn free_id_source(used: BTreeSet<u32>) -> impl Iterator<Item = u32> {
    let max_used = used.iter().next_back().copied().unwrap_or(0);
    (1..=max_used)
        .filter(move |n| !used.contains(n))
        .chain(max_used + 1..)
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "cache".into());
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn cap(identifier: &str, sent: DateTime<Utc>, msg_type: &str, references: Option<&str>) -> CapAlert {
        serde_json::from_value(serde_json::json!({
            "identifier": identifier,
            "sent": sent.to_rfc3339(),
            "msgType": msg_type,
            "references": references,
            "info": [],
        }))
        .unwrap()
    }

    #[test]
    fn update_inserts_new_alert_within_age_horizon() {
        let mut cache = AlertCache::new("/tmp/does-not-matter.json", Duration::days(31));
        let now = ts(2026, 6, 1);
        cache.update(cap("A1", now - Duration::hours(1), "Alert", None), now);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn update_drops_ancient_alert_on_first_sight() {
        let mut cache = AlertCache::new("/tmp/does-not-matter.json", Duration::days(31));
        let now = ts(2026, 6, 1);
        cache.update(cap("A1", now - Duration::days(60), "Alert", None), now);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn update_merges_existing_identifier_regardless_of_age() {
        let mut cache = AlertCache::new("/tmp/does-not-matter.json", Duration::days(31));
        let now = ts(2026, 6, 1);
        cache.update(cap("A1", now - Duration::hours(1), "Alert", None), now);
        cache.update(cap("A1", now - Duration::days(60), "Update", None), now);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("A1").unwrap().capdata.sent, now - Duration::days(60));
    }

    #[test]
    fn purge_keeps_stale_alert_referenced_by_a_live_one() {
        let mut cache = AlertCache::new("/tmp/does-not-matter.json", Duration::days(31));
        let now = ts(2026, 6, 1);
        // B is older than the horizon, but A (live) references it.
        cache
            .records
            .insert("B".into(), AlertRecord::new(cap("B", now - Duration::days(60), "Alert", None)));
        cache.records.insert(
            "A".into(),
            AlertRecord::new(cap("A", now - Duration::hours(1), "Update", Some("src,B,2026-01-01T00:00:00Z"))),
        );

        let live = cache.purge(now);
        assert!(live.contains("A"));
        assert!(live.contains("B"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn purge_deletes_unreferenced_stale_alert() {
        let mut cache = AlertCache::new("/tmp/does-not-matter.json", Duration::days(31));
        let now = ts(2026, 6, 1);
        cache
            .records
            .insert("C".into(), AlertRecord::new(cap("C", now - Duration::days(60), "Alert", None)));

        let live = cache.purge(now);
        assert!(!live.contains("C"));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn query_returns_only_head_alerts() {
        let mut cache = AlertCache::new("/tmp/does-not-matter.json", Duration::days(31));
        let now = ts(2026, 6, 1);
        cache.update(cap("A", now, "Alert", None), now);
        cache.update(cap("B", now, "Update", Some("src,A,2026-01-01T00:00:00Z")), now);

        let heads = cache.head_ids();
        assert_eq!(heads, vec!["B".to_string()]);
    }

    #[test]
    fn persistent_id_stability_picks_smallest_free_id() {
        let mut cache = AlertCache::new("/tmp/does-not-matter.json", Duration::days(31));
        let now = ts(2026, 6, 1);
        cache.update(cap("A", now, "Alert", None), now);
        cache.update(cap("B", now, "Alert", None), now);
        cache.assign_persistent_ids();
        cache.get_mut("A").unwrap().set_pids(vec![1]);
        cache.get_mut("B").unwrap().set_pids(vec![2]);

        cache.update(cap("C", now, "Alert", None), now);
        cache.assign_persistent_ids();
        assert_eq!(cache.get("C").unwrap().pids(), vec![3]);
    }

    #[test]
    fn persistent_id_inheritance_unions_predecessor_ids() {
        let mut cache = AlertCache::new("/tmp/does-not-matter.json", Duration::days(31));
        let now = ts(2026, 6, 1);
        cache.update(cap("A", now, "Alert", None), now);
        cache.update(cap("B", now, "Alert", None), now);
        cache.assign_persistent_ids();
        cache.get_mut("A").unwrap().set_pids(vec![1]);
        cache.get_mut("B").unwrap().set_pids(vec![3]);

        cache.update(
            cap(
                "C",
                now,
                "Update",
                Some("src,A,2026-01-01T00:00:00Z src,B,2026-01-01T00:00:00Z"),
            ),
            now,
        );
        cache.assign_persistent_ids();
        assert_eq!(cache.get("C").unwrap().pids(), vec![1, 3]);
    }

    #[test]
    fn persistent_id_assignment_leaves_cycles_untagged() {
        let mut cache = AlertCache::new("/tmp/does-not-matter.json", Duration::days(31));
        let now = ts(2026, 6, 1);
        cache.records.insert(
            "X".into(),
            AlertRecord::new(cap("X", now, "Update", Some("src,Y,2026-01-01T00:00:00Z"))),
        );
        cache.records.insert(
            "Y".into(),
            AlertRecord::new(cap("Y", now, "Update", Some("src,X,2026-01-01T00:00:00Z"))),
        );

        cache.assign_persistent_ids();
        assert!(cache.get("X").unwrap().pids().is_empty());
        assert!(cache.get("Y").unwrap().pids().is_empty());
    }

    #[test]
    fn round_trip_through_disk_preserves_attrs_and_txstate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let now = ts(2026, 6, 1);

        let mut cache = AlertCache::new(&path, Duration::days(31));
        cache.update(cap("A", now, "Alert", None), now);
        cache.get_mut("A").unwrap().set_pids(vec![5]);
        cache.get_mut("A").unwrap().tx_done("aprs", "vhf0", now);
        cache.dump().unwrap();

        let reloaded = AlertCache::load(&path, Duration::days(31)).unwrap();
        let original = cache.get("A").unwrap();
        let after = reloaded.get("A").unwrap();
        assert_eq!(original.attrs, after.attrs);
        assert_eq!(original.txstate, after.txstate);
        assert_eq!(original.capdata.sent, after.capdata.sent);
    }

    #[test]
    fn load_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.json");
        let cache = AlertCache::load(&path, Duration::days(31)).unwrap();
        assert!(cache.is_empty());
    }
}
