//! APRS Emission Engine (C7): turns a head alert into APRS object/item and
//! bulletin frames.

pub mod kiss;
pub mod transport;

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use geo::{Centroid, MultiPolygon, Polygon};
use tracing::warn;

use crate::cap::{Area, CapAlert, Info};
use crate::config::AprsConfig;
use crate::geodata::GeodataIndex;

const SYMBOL_TABLE: char = '/';
const SYMBOL_CODE: char = '&';
const COMPRESSION_TYPE: char = '=';

/// One emitted APRS payload (the AX.25 info field), not yet framed.
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedFrame {
    pub payload: String,
    pub is_bulletin: bool,
}

/// Build every APRS frame for one head alert's info blocks.
pub fn emit(
    alert: &CapAlert,
    pids: &[u32],
    aprs: &AprsConfig,
    geodata: &GeodataIndex,
    now: DateTime<Utc>,
) -> Vec<EmittedFrame> {
    let Some(&pid) = pids.first() else {
        warn!(identifier = %alert.identifier, "no persistent id assigned, skipping emission");
        return Vec::new();
    };

    let mut frames = Vec::new();
    for (info_index, info) in alert.info.iter().enumerate() {
        frames.extend(emit_info(alert, pid, info_index, info, aprs, geodata, now));
    }
    frames
}

fn emit_info(
    alert: &CapAlert,
    pid: u32,
    info_index: usize,
    info: &Info,
    aprs: &AprsConfig,
    geodata: &GeodataIndex,
    now: DateTime<Utc>,
) -> Vec<EmittedFrame> {
    let is_cancel = alert.is_cancel();
    let polygons = collect_polygons(info, geodata);
    let positions = positions_from_polygons(polygons, aprs.beacon.max_areas);

    let comment = comment_text(info.headline.as_deref(), is_cancel);
    let timestamp = chosen_timestamp(info, alert.sent, aprs.beacon.time, now);
    let info_suffix = info_index_suffix(info_index);

    let mut frames = Vec::new();

    if aprs.beacon.enabled {
        for (i, (lon, lat)) in positions.iter().enumerate() {
            let area_letter = (positions.len() > 1).then(|| area_letter(i));
            let name = coin_callsign(&aprs.beacon.prefix, pid, area_letter, &info_suffix);
            let position = encode_position(*lat, *lon, aprs.beacon.compressed);
            let text = truncate_object_comment(&comment, aprs.truncate_comment);

            let payload = match timestamp {
                Some(t) => format!(
                    ";{name:<9}{marker}{ts}{position}{text}",
                    marker = if is_cancel { '_' } else { '*' },
                    ts = encode_timestamp(t),
                ),
                None => format!(
                    "){name:<3}{marker}{position}{text}",
                    marker = if is_cancel { '_' } else { '!' },
                ),
            };
            frames.push(EmittedFrame { payload, is_bulletin: false });
        }
    }

    if should_emit_bulletin(&aprs.bulletin.mode, positions.len()) {
        let text = truncate_bulletin_comment(&comment, aprs.truncate_comment);
        let id6 = format!("{:<6}", &aprs.bulletin.id);
        frames.push(EmittedFrame {
            payload: format!(":BLN{id6}:{text}"),
            is_bulletin: true,
        });
    }

    frames
}

fn should_emit_bulletin(mode: &str, position_count: usize) -> bool {
    match mode {
        "never" => false,
        "always" => true,
        "fallback" => position_count == 0,
        other => {
            warn!(mode = other, "unknown bulletin mode, falling back to 'fallback'");
            position_count == 0
        }
    }
}

/// Collect the polygons an `info` block resolves to: its own rings if
/// `polygon` is present, else the geodata-index lookups for its geocodes.
fn collect_polygons(info: &Info, geodata: &GeodataIndex) -> Vec<Polygon<f64>> {
    let mut polygons = Vec::new();
    for area in &info.area {
        if !area.polygon.is_empty() {
            polygons.extend(polygon_from_rings(area));
        } else {
            polygons.extend(polygons_from_geocodes(area, geodata));
        }
    }
    polygons
}

fn polygon_from_rings(area: &Area) -> Option<Polygon<f64>> {
    let mut rings = area.polygon.iter().filter_map(|raw| parse_ring(raw));
    let exterior = rings.next()?;
    let interiors: Vec<_> = rings.collect();
    Some(Polygon::new(geo::LineString::from(exterior), interiors.into_iter().map(geo::LineString::from).collect()))
}

fn polygons_from_geocodes(area: &Area, geodata: &GeodataIndex) -> Vec<Polygon<f64>> {
    area.geocode
        .iter()
        .filter_map(|g| match geodata.lookup(&g.value) {
            Some(mp) => Some(mp.0.clone()),
            None => {
                warn!(geocode = %g.value, "no geodata for geocode, skipping this area");
                None
            }
        })
        .flatten()
        .collect()
}

/// Parse one `"lon,lat lon,lat ..."` ring. Repairs a known producer bug
/// (spurious leading `-1.0,-1.0` sentinel) and rejects unclosed rings.
fn parse_ring(raw: &str) -> Option<Vec<(f64, f64)>> {
    let mut points: Vec<(f64, f64)> = raw
        .split_whitespace()
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, ',');
            let lon: f64 = parts.next()?.parse().ok()?;
            let lat: f64 = parts.next()?.parse().ok()?;
            Some((lon, lat))
        })
        .collect();

    if points.len() >= 3 && points[0] == (-1.0, -1.0) && points.get(1) == points.last() {
        points.remove(0);
    }

    if points.len() < 3 {
        warn!("ring has fewer than 3 coordinates, rejecting");
        return None;
    }
    if points.first() != points.last() {
        warn!("ring is not closed, rejecting");
        return None;
    }
    Some(points)
}

fn positions_from_polygons(polygons: Vec<Polygon<f64>>, max_areas: usize) -> Vec<(f64, f64)> {
    if max_areas > 0 && polygons.len() > max_areas {
        let mp = MultiPolygon::new(polygons);
        return mp.centroid().into_iter().map(|c| (c.x(), c.y())).collect();
    }
    polygons
        .iter()
        .filter_map(|p| p.centroid())
        .map(|c| (c.x(), c.y()))
        .collect()
}

fn chosen_timestamp(info: &Info, sent: DateTime<Utc>, beacon_time: bool, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if !beacon_time {
        return None;
    }
    let t = info.onset.or(info.effective).unwrap_or(sent);
    let age = now - t;
    if age > Duration::days(21) || age < -Duration::days(7) {
        None
    } else {
        Some(t)
    }
}

fn encode_timestamp(t: DateTime<Utc>) -> String {
    format!("{:02}{:02}{:02}z", t.day(), t.hour(), t.minute())
}

fn area_letter(index: usize) -> char {
    (b'A' + index.min(25) as u8) as char
}

/// Base-26, 0-indexed, index 0 -> no suffix; digits are computed
/// least-significant-first and then laid out most-significant-first, the
/// way ordinary positional numbers are written.
fn info_index_suffix(index: usize) -> String {
    if index == 0 {
        return String::new();
    }
    let mut digits = Vec::new();
    let mut n = index;
    while n > 0 {
        digits.push((n % 26) as u8);
        n /= 26;
    }
    digits.reverse();
    digits.into_iter().map(|d| (b'A' + d) as char).collect()
}

fn coin_callsign(prefix: &str, pid: u32, area_letter: Option<char>, info_suffix: &str) -> String {
    let mut name = format!("{prefix}{pid}");
    if let Some(c) = area_letter {
        name.push(c);
    }
    name.push_str(info_suffix);
    if name.chars().count() > 9 {
        warn!(name, "callsign exceeds 9 characters, truncating");
        name = name.chars().take(9).collect();
    }
    name
}

/// Deterministic umlaut transliteration, case-aware for all-caps words.
fn transliterate(text: &str) -> String {
    text.split_inclusive(' ')
        .map(transliterate_word)
        .collect()
}

fn transliterate_word(word: &str) -> String {
    let is_all_caps = word.chars().any(|c| c.is_alphabetic()) && !word.chars().any(|c| c.is_lowercase());
    word.chars()
        .map(|c| {
            let (lower, upper) = match c {
                'ä' | 'Ä' => ("ae", "AE"),
                'ö' | 'Ö' => ("oe", "OE"),
                'ü' | 'Ü' => ("ue", "UE"),
                'ß' => ("ss", "SS"),
                other => return other.to_string(),
            };
            if is_all_caps { upper.to_string() } else { lower.to_string() }
        })
        .collect()
}

fn strip_reserved(text: &str) -> String {
    text.chars().filter(|&c| c != '|' && c != '~').collect()
}

fn comment_text(headline: Option<&str>, is_cancel: bool) -> String {
    let raw = match headline {
        Some(h) => strip_reserved(&transliterate(h)),
        None if is_cancel => return "Unspezifische MoWaS-Entwarnung".to_owned(),
        None => String::new(),
    };
    if raw.trim().is_empty() {
        "no comment".to_owned()
    } else {
        raw
    }
}

fn truncate_object_comment(text: &str, truncate: bool) -> String {
    const LIMIT: usize = 43;
    if truncate && text.chars().count() > LIMIT {
        let head: String = text.chars().take(LIMIT - 3).collect();
        format!("{head}...")
    } else {
        text.to_owned()
    }
}

fn truncate_bulletin_comment(text: &str, truncate: bool) -> String {
    const LIMIT: usize = 67;
    if truncate && text.chars().count() > LIMIT {
        text.chars().take(LIMIT).collect()
    } else {
        text.to_owned()
    }
}

/// Normalize a coordinate into the half-open interval `(upper - period, upper]`.
fn normalize(value: f64, period: f64, upper: f64) -> f64 {
    let lower = upper - period;
    let mut v = (value - lower).rem_euclid(period) + lower;
    if v <= lower {
        v += period;
    }
    v
}

fn encode_position(lat: f64, lon: f64, compressed: bool) -> String {
    let lat = normalize(lat, 180.0, 90.0);
    let lon = normalize(lon, 360.0, 180.0);
    if compressed {
        encode_position_compressed(lat, lon)
    } else {
        encode_position_uncompressed(lat, lon)
    }
}

fn encode_position_uncompressed(lat: f64, lon: f64) -> String {
    let lat_dir = if lat >= 0.0 { 'N' } else { 'S' };
    let lat_abs = lat.abs();
    let lon_dir = if lon >= 0.0 { 'E' } else { 'W' };
    let lon_abs = lon.abs();
    format!(
        "{:02}{:05.2}{}{}{:03}{:05.2}{}{}",
        lat_abs.trunc() as u32,
        lat_abs.fract() * 60.0,
        lat_dir,
        SYMBOL_TABLE,
        lon_abs.trunc() as u32,
        lon_abs.fract() * 60.0,
        lon_dir,
        SYMBOL_CODE,
    )
}

fn base91_encode(value: i64, width: usize) -> String {
    let mut v = value.max(0);
    let mut digits = vec![0u8; width];
    for i in (0..width).rev() {
        digits[i] = (v % 91) as u8;
        v /= 91;
    }
    digits.into_iter().map(|d| (d + 33) as char).collect()
}

fn encode_position_compressed(lat: f64, lon: f64) -> String {
    let y = (380926.0 * (90.0 - lat)).round() as i64;
    let x = (190463.0 * (180.0 + lon)).round() as i64;
    format!(
        "{SYMBOL_TABLE}{}{}{SYMBOL_CODE}  {COMPRESSION_TYPE}",
        base91_encode(y, 4),
        base91_encode(x, 4),
    )
}
