//! Geodata Index (C1): loads the GeoPackage built offline by the VG5000
//! tool into an in-memory `ARS -> MultiPolygon` map.
//!
//! A GeoPackage is a SQLite container; we only need one table (`region`)
//! and one BLOB column (`geom`) holding a GeoPackage binary header
//! followed by WKB. We don't attempt general GeoPackage support -- just
//! enough to read what the VG5000 tool writes.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use geo::{Coord, LineString, MultiPolygon, Polygon};
use rusqlite::Connection;
use tracing::warn;

/// The immutable, read-only-after-load region index.
#[derive(Debug, Default)]
pub struct GeodataIndex {
    regions: HashMap<String, MultiPolygon<f64>>,
}

impl GeodataIndex {
    /// An empty index: every lookup returns `None`. This is the supported
    /// degraded mode when `geodata.path` is absent from configuration.
    pub fn empty() -> Self {
        GeodataIndex {
            regions: HashMap::new(),
        }
    }

    /// Load a GeoPackage from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(path, rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY)
            .with_context(|| format!("could not open geodata file {}", path.display()))?;

        let mut stmt = conn
            .prepare("SELECT ars, geom FROM region")
            .context("geodata file has no usable `region` table")?;

        let mut regions = HashMap::new();
        let mut rows = stmt.query([])?;
        let mut total = 0usize;
        let mut rejected = 0usize;
        while let Some(row) = rows.next()? {
            total += 1;
            let ars: String = row.get(0)?;
            let blob: Vec<u8> = row.get(1)?;

            if ars.len() != 12 || !ars.chars().all(|c| c.is_ascii_digit()) {
                warn!(ars, "rejecting region row: ARS is not exactly 12 digits");
                rejected += 1;
                continue;
            }

            match parse_geometry(&blob) {
                Ok(geom) => {
                    regions.insert(ars, geom);
                }
                Err(err) => {
                    warn!(ars, error = %err, "rejecting region row: geometry failed to parse");
                    rejected += 1;
                }
            }
        }

        tracing::info!(path = %path.display(), total, rejected, loaded = regions.len(), "loaded geodata index");
        Ok(GeodataIndex { regions })
    }

    /// Point-query: look up the multipolygon for an ARS. Absent is not an
    /// error -- callers fall back to the bulletin path.
    pub fn lookup(&self, ars: &str) -> Option<&MultiPolygon<f64>> {
        self.regions.get(ars)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

/// Strip the GeoPackage binary geometry header (magic `GP`, version byte,
/// flags byte, optional SRID + envelope) and decode the remaining WKB as
/// either a `MULTIPOLYGON` or a bare `POLYGON` promoted to a singleton.
fn parse_geometry(blob: &[u8]) -> Result<MultiPolygon<f64>> {
    if blob.len() < 8 || &blob[0..2] != b"GP" {
        bail!("missing GeoPackage binary header magic");
    }
    let flags = blob[3];
    let envelope_indicator = (flags >> 1) & 0x07;
    let envelope_len = match envelope_indicator {
        0 => 0,
        1 => 4 * 8,
        2 | 3 => 6 * 8,
        4 => 8 * 8,
        other => bail!("unrecognized envelope indicator {other}"),
    };
    let wkb_start = 8 + envelope_len;
    if blob.len() < wkb_start {
        bail!("header claims an envelope longer than the blob");
    }
    decode_wkb(&blob[wkb_start..])
}

fn decode_wkb(wkb: &[u8]) -> Result<MultiPolygon<f64>> {
    let mut cursor = WkbCursor::new(wkb)?;
    let geom_type = cursor.read_u32()?;
    match geom_type {
        3 => Ok(MultiPolygon::new(vec![cursor.read_polygon()?])),
        6 => {
            let count = cursor.read_u32()?;
            let mut polys = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let _byte_order = cursor.read_u8()?;
                let inner_type = cursor.read_u32()?;
                if inner_type != 3 {
                    bail!("expected POLYGON member in MULTIPOLYGON, got type {inner_type}");
                }
                polys.push(cursor.read_polygon()?);
            }
            Ok(MultiPolygon::new(polys))
        }
        other => bail!("unsupported WKB geometry type {other}, expected POLYGON or MULTIPOLYGON"),
    }
}

/// A minimal little-endian WKB reader, just enough for (MULTI)POLYGON.
struct WkbCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WkbCursor<'a> {
    fn new(data: &'a [u8]) -> Result<Self> {
        if data.is_empty() {
            bail!("empty WKB payload");
        }
        let mut cursor = WkbCursor { data, pos: 0 };
        let byte_order = cursor.read_u8()?;
        if byte_order != 1 {
            bail!("only little-endian WKB is supported");
        }
        Ok(cursor)
    }

    fn read_u8(&mut self) -> Result<u8> {
        let b = *self.data.get(self.pos).context("unexpected end of WKB")?;
        self.pos += 1;
        Ok(b)
    }

    fn read_u32(&mut self) -> Result<u32> {
        let bytes = self
            .data
            .get(self.pos..self.pos + 4)
            .context("unexpected end of WKB")?;
        self.pos += 4;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn read_f64(&mut self) -> Result<f64> {
        let bytes = self
            .data
            .get(self.pos..self.pos + 8)
            .context("unexpected end of WKB")?;
        self.pos += 8;
        Ok(f64::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn read_ring(&mut self) -> Result<LineString<f64>> {
        let count = self.read_u32()?;
        let mut coords = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let x = self.read_f64()?;
            let y = self.read_f64()?;
            coords.push(Coord { x, y });
        }
        Ok(LineString::new(coords))
    }

    fn read_polygon(&mut self) -> Result<Polygon<f64>> {
        let ring_count = self.read_u32()?;
        if ring_count == 0 {
            bail!("polygon has no rings");
        }
        let exterior = self.read_ring()?;
        let mut interiors = Vec::with_capacity(ring_count.saturating_sub(1) as usize);
        for _ in 1..ring_count {
            interiors.push(self.read_ring()?);
        }
        Ok(Polygon::new(exterior, interiors))
    }
}
