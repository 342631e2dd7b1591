//! BBK-URL source: HTTP GET of a JSON array of CAP alerts.

use async_trait::async_trait;
use hyper::Uri;
use tracing::warn;

use crate::cap::CapAlert;

use super::{parse_bbk_json, SharedHttpClient, SourceAdapter, HTTP_TIMEOUT};

pub struct BbkUrlSource {
    name: String,
    url: Uri,
    client: SharedHttpClient,
}

impl BbkUrlSource {
    pub fn new(name: impl Into<String>, url: &str, client: SharedHttpClient) -> anyhow::Result<Self> {
        let url: Uri = url
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid source URL {url:?}: {e}"))?;
        Ok(BbkUrlSource {
            name: name.into(),
            url,
            client,
        })
    }
}

#[async_trait]
impl SourceAdapter for BbkUrlSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Vec<CapAlert> {
        let request = match hyper::Request::get(self.url.clone()).body(hyper::Body::empty()) {
            Ok(r) => r,
            Err(err) => {
                warn!(source = %self.name, error = %err, "could not build request");
                return Vec::new();
            }
        };

        let response = match tokio::time::timeout(HTTP_TIMEOUT, self.client.request(request)).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(err)) => {
                warn!(source = %self.name, error = %err, "HTTP request failed");
                return Vec::new();
            }
            Err(_) => {
                warn!(source = %self.name, "HTTP request timed out");
                return Vec::new();
            }
        };

        if !response.status().is_success() {
            warn!(source = %self.name, status = %response.status(), "non-2xx response");
            return Vec::new();
        }

        let body = match hyper::body::to_bytes(response.into_body()).await {
            Ok(b) => b,
            Err(err) => {
                warn!(source = %self.name, error = %err, "could not read response body");
                return Vec::new();
            }
        };

        parse_bbk_json(&self.name, &body)
    }
}
