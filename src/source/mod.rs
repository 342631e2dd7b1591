//! Source Adapters (C3): pluggable producers of CAP alerts.

use std::sync::Arc;

use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::Client;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use std::collections::HashSet;
use std::time::Duration as StdDuration;
use tracing::warn;

use crate::cap::CapAlert;

pub mod bbk_file;
pub mod bbk_url;
pub mod darc;

/// Every HTTP-speaking adapter shares a connection-pooled client.
pub type SharedHttpClient = Arc<Client<HttpsConnector<HttpConnector>>>;

/// The per-request timeout applied to every HTTP fetch (midpoint of the
/// 10-30s guidance).
pub const HTTP_TIMEOUT: StdDuration = StdDuration::from_secs(20);

pub fn shared_http_client() -> SharedHttpClient {
    Arc::new(
        Client::builder().pool_max_idle_per_host(4).build(
            HttpsConnectorBuilder::new()
                .with_native_roots()
                .https_only()
                .enable_http2()
                .build(),
        ),
    )
}

/// Common interface for all source adapters. `fetch()` never returns an
/// error: transport and parse failures are logged and swallowed, and the
/// adapter simply yields nothing for this cycle.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// A short name for this adapter instance, used in log lines.
    fn name(&self) -> &str;

    /// Fetch whatever CAP alerts are currently available.
    async fn fetch(&self) -> Vec<CapAlert>;

    /// Delete any scratch files (downloaded CAP/audio/notify files) whose
    /// alert identifier is not in `valid_ids`. File-backed adapters that
    /// keep no scratch state may leave this as a no-op.
    async fn purge(&self, valid_ids: &HashSet<String>) {
        let _ = valid_ids;
    }
}

/// Parse a byte buffer holding a JSON array of CAP alerts (the BBK wire
/// shape), logging and returning an empty vec on any parse failure rather
/// than failing the whole fetch.
pub(crate) fn parse_bbk_json(name: &str, bytes: &[u8]) -> Vec<CapAlert> {
    match serde_json::from_slice::<Vec<CapAlert>>(bytes) {
        Ok(alerts) => alerts,
        Err(err) => {
            warn!(source = name, error = %err, "could not parse BBK JSON payload");
            Vec::new()
        }
    }
}
