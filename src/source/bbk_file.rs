//! BBK-File source: the same CAP JSON payload shape, read from disk
//! instead of fetched over HTTP. Useful for testing and for operators who
//! mirror the feed themselves.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::warn;

use crate::cap::CapAlert;

use super::{parse_bbk_json, SourceAdapter};

pub struct BbkFileSource {
    name: String,
    path: PathBuf,
}

impl BbkFileSource {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        BbkFileSource {
            name: name.into(),
            path: path.into(),
        }
    }
}

#[async_trait]
impl SourceAdapter for BbkFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Vec<CapAlert> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(b) => b,
            Err(err) => {
                warn!(source = %self.name, path = %self.path.display(), error = %err, "could not read source file");
                return Vec::new();
            }
        };
        parse_bbk_json(&self.name, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_yields_no_alerts() {
        let source = BbkFileSource::new("test", "/nonexistent/path.json");
        assert!(source.fetch().await.is_empty());
    }

    #[tokio::test]
    async fn malformed_json_yields_no_alerts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        tokio::fs::write(&path, b"not json").await.unwrap();
        let source = BbkFileSource::new("test", &path);
        assert!(source.fetch().await.is_empty());
    }

    #[tokio::test]
    async fn valid_json_array_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.json");
        let payload = serde_json::json!([{
            "identifier": "A1",
            "sent": "2026-08-01T10:00:00Z",
            "msgType": "Alert",
            "info": [],
        }]);
        tokio::fs::write(&path, serde_json::to_vec(&payload).unwrap())
            .await
            .unwrap();
        let source = BbkFileSource::new("test", &path);
        let alerts = source.fetch().await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].identifier, "A1");
    }
}
