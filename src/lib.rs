//! Core library: CAP ingestion, alert bookkeeping, geographic filtering,
//! and APRS emission. `main.rs` is a thin binary wrapper around this crate
//! so that `tests/` can drive the core types directly instead of
//! black-boxing the compiled binary.

pub mod alert;
pub mod cache;
pub mod cap;
pub mod config;
pub mod errors;
pub mod geodata;
pub mod geofilter;
pub mod schedule;
pub mod sink;
pub mod source;
pub mod supervisor;
