//! OASIS Common Alerting Protocol (CAP) data model, as consumed by the
//! gateway.
//!
//! CAP's wire schema lets several fields be either a single element or a
//! list (`info`, `info[].area`, `area[].geocode`). Everything in this module
//! normalizes on ingress so that downstream code always sees a `Vec`,
//! regardless of whether the adapter that produced it saw a lone XML child
//! element or a JSON array.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

/// A civil-protection alert, in the shape the core operates on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapAlert {
    /// Globally unique (within the sender's namespace) alert id.
    pub identifier: String,

    /// When this alert was issued.
    pub sent: DateTime<Utc>,

    /// What kind of message this is. A value of `Cancel` triggers the
    /// cancellation-frame path in the emission engine.
    #[serde(rename = "msgType", default)]
    pub msg_type: MsgType,

    /// Whitespace-separated `sender,id,sent` tuples naming the alerts this
    /// one supersedes. Kept as the raw string; use [`CapAlert::references`]
    /// to parse it.
    #[serde(default)]
    pub references: Option<String>,

    /// One or more info blocks, each describing one area/time/headline
    /// combination. Always non-empty for a well-formed alert, but we don't
    /// enforce that here -- an alert with zero info blocks simply produces
    /// zero frames.
    #[serde(deserialize_with = "one_or_many")]
    pub info: Vec<Info>,
}

impl CapAlert {
    /// True if this alert is a cancellation (case-insensitive `msgType`).
    pub fn is_cancel(&self) -> bool {
        self.msg_type == MsgType::Cancel
    }

    /// Parse the raw `references` string into structured tuples.
    pub fn references(&self) -> Vec<Reference> {
        match &self.references {
            Some(raw) => parse_references(raw),
            None => Vec::new(),
        }
    }

    /// The CAP identifiers referenced by this alert (ignoring sender/sent).
    pub fn reference_ids(&self) -> Vec<String> {
        self.references()
            .into_iter()
            .map(|r| r.identifier)
            .collect()
    }
}

/// One `info` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Info {
    pub effective: Option<DateTime<Utc>>,
    pub onset: Option<DateTime<Utc>>,
    pub expires: Option<DateTime<Utc>>,
    pub headline: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub area: Vec<Area>,
}

/// One `area` block: a geometric description of where an alert applies,
/// given either as polygon rings or as administrative area codes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Area {
    /// Raw `"lon,lat lon,lat ..."` ring strings, one per polygon ring.
    #[serde(default, deserialize_with = "one_or_many")]
    pub polygon: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub geocode: Vec<Geocode>,
}

/// A single `{value, valueName}` geocode entry. The core only understands
/// the German ARS geocode scheme; other `valueName`s are carried through
/// but ignored by the geographic filter and the geodata index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geocode {
    pub value: String,
    #[serde(rename = "valueName")]
    pub value_name: String,
}

/// A parsed `references` tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub sender: String,
    pub identifier: String,
    pub sent: String,
}

/// Split a CAP `references` string into its tuples. Each tuple is
/// `sender,id,sent`; a tuple that doesn't split into exactly three
/// comma-separated parts is dropped with a warning rather than failing the
/// whole alert, since references are a supersession hint, not load-bearing
/// for display.
pub fn parse_references(raw: &str) -> Vec<Reference> {
    raw.split_whitespace()
        .filter_map(|tuple| {
            let mut parts = tuple.splitn(3, ',');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(sender), Some(identifier), Some(sent))
                    if !sender.is_empty() && !identifier.is_empty() =>
                {
                    Some(Reference {
                        sender: sender.to_owned(),
                        identifier: identifier.to_owned(),
                        sent: sent.to_owned(),
                    })
                }
                _ => {
                    warn!(tuple, "malformed reference tuple, skipping");
                    None
                }
            }
        })
        .collect()
}

/// CAP message type. Unrecognized values fail open to `Alert`, because an
/// unrecognized-but-real alert should still reach the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum_macros::Display, strum_macros::AsRefStr)]
#[strum(serialize_all = "PascalCase")]
pub enum MsgType {
    #[default]
    Alert,
    Update,
    Cancel,
    Error,
    Exercise,
    System,
}

impl FromStr for MsgType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "alert" => MsgType::Alert,
            "update" => MsgType::Update,
            "cancel" => MsgType::Cancel,
            "error" => MsgType::Error,
            "exercise" => MsgType::Exercise,
            "system" => MsgType::System,
            other => {
                warn!(value = other, "unrecognized msgType, treating as Alert");
                MsgType::Alert
            }
        })
    }
}

impl Serialize for MsgType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_ref())
    }
}

impl<'de> Deserialize<'de> for MsgType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(s.parse().expect("MsgType::from_str is infallible"))
    }
}

/// Accept either a single `T` or a `Vec<T>`, and always produce a `Vec<T>`.
/// This is the normalization hook required wherever CAP allows an element to
/// repeat: `info`, `area`, `geocode`, `polygon`.
fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        Many(Vec<T>),
        One(T),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::Many(v) => v,
        OneOrMany::One(v) => vec![v],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert_json(info: &str) -> String {
        format!(
            r#"{{"identifier":"id-1","sent":"2026-08-01T10:00:00Z","msgType":"Alert","info":{info}}}"#
        )
    }

    #[test]
    fn single_info_normalizes_to_list() {
        let json = alert_json(r#"{"headline":"Test"}"#);
        let alert: CapAlert = serde_json::from_str(&json).unwrap();
        assert_eq!(alert.info.len(), 1);
        assert_eq!(alert.info[0].headline.as_deref(), Some("Test"));
    }

    #[test]
    fn list_info_stays_a_list() {
        let json = alert_json(r#"[{"headline":"A"},{"headline":"B"}]"#);
        let alert: CapAlert = serde_json::from_str(&json).unwrap();
        assert_eq!(alert.info.len(), 2);
    }

    #[test]
    fn single_area_and_geocode_normalize() {
        let json = r#"{
            "identifier":"id-2","sent":"2026-08-01T10:00:00Z","msgType":"Update",
            "info":{"area":{"geocode":{"value":"091620000000","valueName":"ARS"}}}
        }"#;
        let alert: CapAlert = serde_json::from_str(json).unwrap();
        assert_eq!(alert.info[0].area.len(), 1);
        assert_eq!(alert.info[0].area[0].geocode.len(), 1);
        assert_eq!(alert.info[0].area[0].geocode[0].value, "091620000000");
    }

    #[test]
    fn msg_type_is_case_insensitive() {
        assert_eq!("CANCEL".parse::<MsgType>().unwrap(), MsgType::Cancel);
        assert_eq!("cancel".parse::<MsgType>().unwrap(), MsgType::Cancel);
    }

    #[test]
    fn unrecognized_msg_type_falls_back_to_alert() {
        assert_eq!("frobnicate".parse::<MsgType>().unwrap(), MsgType::Alert);
    }

    #[test]
    fn references_parses_whitespace_separated_tuples() {
        let refs = parse_references("bbk.de,A1,2026-01-01T00:00:00Z bbk.de,A2,2026-01-02T00:00:00Z");
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].identifier, "A1");
        assert_eq!(refs[1].identifier, "A2");
    }

    #[test]
    fn malformed_reference_tuple_is_skipped() {
        let refs = parse_references("bbk.de,A1,2026-01-01T00:00:00Z garbage");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].identifier, "A1");
    }
}
