//! Geographic Filter (C5): hierarchical ARS matching against a configured
//! region of interest, with redundancy elimination.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

/// Length classes a German ARS (Amtlicher Regionalschlüssel) prefix can
/// stop at: country, state, government district, district, municipal
/// association, municipality.
const LENGTH_CLASSES: [usize; 6] = [0, 2, 3, 5, 9, 12];

/// Default minimum-age admission window: an alert never transmitted on a
/// sink must still be "sent + max_age >= now" to be admitted.
pub const DEFAULT_MAX_AGE: Duration = Duration::hours(4);

/// Normalize one configured geocode: must be all-digits, length in
/// {2,3,5,9,12}; longer values are truncated with a warning; any other
/// length is a fatal config error.
pub fn normalize_geocode(raw: &str) -> Result<String, String> {
    if !raw.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("geocode {raw:?} is not purely digits"));
    }
    let digits = if raw.len() > 12 {
        warn!(raw, "geocode longer than 12 digits, truncating");
        &raw[..12]
    } else {
        raw
    };
    if !LENGTH_CLASSES[1..].contains(&digits.len()) {
        return Err(format!(
            "geocode {raw:?} has length {} which isn't one of 2, 3, 5, 9, 12",
            digits.len()
        ));
    }
    Ok(pad12(digits))
}

fn pad12(digits: &str) -> String {
    let mut s = digits.to_owned();
    s.push_str(&"0".repeat(12 - s.len()));
    s
}

/// The superset chain of a (already 12-digit, padded) geocode: itself plus
/// every coarser prefix, down to "000000000000" (nationwide), inclusive.
pub fn superset(geocode: &str) -> Vec<String> {
    assert_eq!(geocode.len(), 12, "superset() expects a padded 12-digit code");
    LENGTH_CLASSES
        .iter()
        .map(|&len| pad12(&geocode[..len]))
        .collect()
}

/// The operator's region of interest: a reduced set of 12-digit ARS codes
/// plus the union of their superset chains, used to answer `matches()`.
#[derive(Debug, Clone, Default)]
pub struct GeoFilter {
    reduced: HashSet<String>,
    super_union: HashSet<String>,
    max_age: Duration,
}

impl GeoFilter {
    /// Build a filter from raw (unnormalized) configured geocodes.
    pub fn from_raw_codes<I, S>(codes: I, max_age: Duration) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let normalized = codes
            .into_iter()
            .map(|c| normalize_geocode(c.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_normalized_codes(normalized, max_age))
    }

    /// Build a filter from already-normalized (12-digit) geocodes, dropping
    /// any code whose superset chain intersects the rest of the set (ie,
    /// any code already covered by a coarser one present in the set).
    pub fn from_normalized_codes<I>(codes: I, max_age: Duration) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let all: Vec<String> = codes.into_iter().collect();
        let set: HashSet<String> = all.iter().cloned().collect();

        let reduced: HashSet<String> = all
            .iter()
            .filter(|g| {
                let covered = superset(g)
                    .into_iter()
                    .any(|s| s != **g && set.contains(&s));
                if covered {
                    warn!(geocode = %g, "dropping: covered by a coarser configured geocode");
                }
                !covered
            })
            .cloned()
            .collect();

        let super_union: HashSet<String> = reduced.iter().flat_map(|g| superset(g)).collect();

        GeoFilter {
            reduced,
            super_union,
            max_age,
        }
    }

    /// `match(h) = h in G_super  or  superset(h) intersects G`.
    pub fn matches(&self, geocode: &str) -> bool {
        if self.super_union.contains(geocode) {
            return true;
        }
        superset(geocode).iter().any(|s| self.reduced.contains(s))
    }

    /// The minimum-age admission rule: an alert that has never been
    /// transmitted on this sink is admitted only if `sent + max_age >= now`.
    /// Already-transmitted alerts are never age-discarded by this rule.
    pub fn admits_by_age(&self, sent: DateTime<Utc>, now: DateTime<Utc>, already_sent: bool) -> bool {
        already_sent || sent + self.max_age >= now
    }

    pub fn is_empty(&self) -> bool {
        self.reduced.is_empty()
    }

    pub fn region_of_interest(&self) -> impl Iterator<Item = &str> {
        self.reduced.iter().map(|s| s.as_str())
    }
}
