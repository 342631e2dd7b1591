//! DARC source: a two-step adapter. A watch directory accumulates small
//! "notify" manifests pointing at mirror URLs for the actual CAP XML (and
//! optionally a WAV audio clip); this adapter downloads what it's missing,
//! parses the CAP XML, and keeps a scratch directory in sync with the
//! cache's notion of which identifiers are still live.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::Deserialize;
use tracing::warn;

use crate::cap::{Area, CapAlert, Geocode, Info, MsgType};

use super::{SharedHttpClient, SourceAdapter, HTTP_TIMEOUT};

#[derive(Debug, Deserialize)]
struct NotifyManifest {
    id: String,
    url: NotifyUrls,
}

#[derive(Debug, Deserialize)]
struct NotifyUrls {
    xml: MirrorSet,
    #[serde(default)]
    audio: Option<MirrorSet>,
}

#[derive(Debug, Default, Deserialize)]
struct MirrorSet {
    #[serde(default)]
    internet: Vec<String>,
    #[serde(default)]
    hamnet: Vec<String>,
}

impl MirrorSet {
    fn mirrors(&self, use_internet: bool, use_hamnet: bool) -> Vec<String> {
        let mut mirrors = Vec::new();
        if use_internet {
            mirrors.extend(self.internet.iter().cloned());
        }
        if use_hamnet {
            mirrors.extend(self.hamnet.iter().cloned());
        }
        mirrors.shuffle(&mut rand::thread_rng());
        mirrors
    }
}

pub struct DarcSource {
    name: String,
    watch_dir: PathBuf,
    scratch_dir: PathBuf,
    use_internet: bool,
    use_hamnet: bool,
    download_audio: bool,
    client: SharedHttpClient,
}

impl DarcSource {
    pub fn new(
        name: impl Into<String>,
        watch_dir: impl Into<PathBuf>,
        scratch_dir: impl Into<PathBuf>,
        use_internet: bool,
        use_hamnet: bool,
        download_audio: bool,
        client: SharedHttpClient,
    ) -> Self {
        DarcSource {
            name: name.into(),
            watch_dir: watch_dir.into(),
            scratch_dir: scratch_dir.into(),
            use_internet,
            use_hamnet,
            download_audio,
            client,
        }
    }

    fn sanitize(id: &str) -> String {
        id.replace('/', "_")
    }

    fn xml_path(&self, id: &str) -> PathBuf {
        self.scratch_dir.join(format!("{}.xml", Self::sanitize(id)))
    }

    fn audio_path(&self, id: &str) -> PathBuf {
        self.scratch_dir.join(format!("{}.wav", Self::sanitize(id)))
    }

    async fn ensure_downloaded(&self, mirrors: &[String], dest: &Path) -> bool {
        if dest.exists() {
            return true;
        }
        for mirror in mirrors {
            match self.download(mirror).await {
                Ok(bytes) => {
                    if let Err(err) = tokio::fs::write(dest, &bytes).await {
                        warn!(source = %self.name, path = %dest.display(), error = %err, "could not write downloaded file");
                        continue;
                    }
                    return true;
                }
                Err(err) => {
                    warn!(source = %self.name, mirror, error = %err, "mirror download failed, trying next");
                }
            }
        }
        false
    }

    async fn download(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        let uri: hyper::Uri = url.parse()?;
        let request = hyper::Request::get(uri).body(hyper::Body::empty())?;
        let response = tokio::time::timeout(HTTP_TIMEOUT, self.client.request(request)).await??;
        if !response.status().is_success() {
            anyhow::bail!("non-2xx response: {}", response.status());
        }
        let bytes = hyper::body::to_bytes(response.into_body()).await?;
        Ok(bytes.to_vec())
    }

    async fn list_notify_files(&self) -> Vec<PathBuf> {
        let mut entries = match tokio::fs::read_dir(&self.watch_dir).await {
            Ok(e) => e,
            Err(err) => {
                warn!(source = %self.name, dir = %self.watch_dir.display(), error = %err, "could not list watch directory");
                return Vec::new();
            }
        };
        let mut files = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) == Some("json") {
                        files.push(path);
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(source = %self.name, error = %err, "error reading watch directory entry");
                    break;
                }
            }
        }
        files
    }
}

#[async_trait]
impl SourceAdapter for DarcSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Vec<CapAlert> {
        if let Err(err) = tokio::fs::create_dir_all(&self.scratch_dir).await {
            warn!(source = %self.name, error = %err, "could not create scratch directory");
            return Vec::new();
        }

        let mut alerts = Vec::new();
        for notify_path in self.list_notify_files().await {
            let raw = match tokio::fs::read(&notify_path).await {
                Ok(r) => r,
                Err(err) => {
                    warn!(source = %self.name, path = %notify_path.display(), error = %err, "could not read notify file");
                    continue;
                }
            };
            let manifest: NotifyManifest = match serde_json::from_slice(&raw) {
                Ok(m) => m,
                Err(err) => {
                    warn!(source = %self.name, path = %notify_path.display(), error = %err, "malformed notify manifest");
                    continue;
                }
            };

            let xml_mirrors = manifest.url.xml.mirrors(self.use_internet, self.use_hamnet);
            let xml_dest = self.xml_path(&manifest.id);
            if !self.ensure_downloaded(&xml_mirrors, &xml_dest).await {
                warn!(source = %self.name, identifier = %manifest.id, "could not download CAP XML from any mirror, will retry next cycle");
                continue;
            }

            if self.download_audio {
                if let Some(audio) = &manifest.url.audio {
                    let audio_mirrors = audio.mirrors(self.use_internet, self.use_hamnet);
                    let audio_dest = self.audio_path(&manifest.id);
                    let _ = self.ensure_downloaded(&audio_mirrors, &audio_dest).await;
                }
            }

            match tokio::fs::read_to_string(&xml_dest).await {
                Ok(xml) => match parse_cap_xml(&xml) {
                    Ok(alert) => alerts.push(alert),
                    Err(err) => {
                        warn!(source = %self.name, identifier = %manifest.id, error = %err, "could not parse CAP XML");
                    }
                },
                Err(err) => {
                    warn!(source = %self.name, path = %xml_dest.display(), error = %err, "could not read downloaded CAP XML");
                }
            }
        }
        alerts
    }

    async fn purge(&self, valid_ids: &HashSet<String>) {
        for notify_path in self.list_notify_files().await {
            let raw = match tokio::fs::read(&notify_path).await {
                Ok(r) => r,
                Err(_) => continue,
            };
            let manifest: NotifyManifest = match serde_json::from_slice(&raw) {
                Ok(m) => m,
                Err(_) => continue,
            };

            let xml_dest = self.xml_path(&manifest.id);
            let downloaded = xml_dest.exists();

            if !downloaded {
                // CAP counterpart never arrived; keep the notify file so we retry.
                continue;
            }
            if valid_ids.contains(&manifest.id) {
                continue;
            }

            let _ = tokio::fs::remove_file(&notify_path).await;
            let _ = tokio::fs::remove_file(&xml_dest).await;
            let _ = tokio::fs::remove_file(self.audio_path(&manifest.id)).await;
        }
    }
}

/// Parse a CAP v1.2 XML document into our normalized `CapAlert`.
fn parse_cap_xml(xml: &str) -> anyhow::Result<CapAlert> {
    let parsed: XmlAlert = quick_xml::de::from_str(xml)?;
    Ok(parsed.into())
}

#[derive(Debug, Deserialize)]
struct XmlAlert {
    identifier: String,
    sent: DateTime<Utc>,
    #[serde(rename = "msgType", default)]
    msg_type: MsgType,
    #[serde(default)]
    references: Option<String>,
    #[serde(rename = "info", default)]
    info: Vec<XmlInfo>,
}

#[derive(Debug, Deserialize)]
struct XmlInfo {
    #[serde(default)]
    effective: Option<DateTime<Utc>>,
    #[serde(default)]
    onset: Option<DateTime<Utc>>,
    #[serde(default)]
    expires: Option<DateTime<Utc>>,
    #[serde(default)]
    headline: Option<String>,
    #[serde(rename = "area", default)]
    area: Vec<XmlArea>,
}

#[derive(Debug, Deserialize)]
struct XmlArea {
    #[serde(rename = "polygon", default)]
    polygon: Vec<String>,
    #[serde(rename = "geocode", default)]
    geocode: Vec<XmlGeocode>,
}

#[derive(Debug, Deserialize)]
struct XmlGeocode {
    value: String,
    #[serde(rename = "valueName")]
    value_name: String,
}

impl From<XmlAlert> for CapAlert {
    fn from(x: XmlAlert) -> Self {
        CapAlert {
            identifier: x.identifier,
            sent: x.sent,
            msg_type: x.msg_type,
            references: x.references,
            info: x.info.into_iter().map(Info::from).collect(),
        }
    }
}

impl From<XmlInfo> for Info {
    fn from(x: XmlInfo) -> Self {
        Info {
            effective: x.effective,
            onset: x.onset,
            expires: x.expires,
            headline: x.headline,
            area: x.area.into_iter().map(Area::from).collect(),
        }
    }
}

impl From<XmlArea> for Area {
    fn from(x: XmlArea) -> Self {
        Area {
            polygon: x.polygon,
            geocode: x.geocode.into_iter().map(Geocode::from).collect(),
        }
    }
}

impl From<XmlGeocode> for Geocode {
    fn from(x: XmlGeocode) -> Self {
        Geocode {
            value: x.value,
            value_name: x.value_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_cap_xml() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<alert xmlns="urn:oasis:names:tc:emergency:cap:1.2">
  <identifier>DE-BY-123</identifier>
  <sent>2026-08-01T10:00:00+00:00</sent>
  <msgType>Alert</msgType>
  <info>
    <headline>Test warning</headline>
    <area>
      <geocode><valueName>ARS</valueName><value>091620000000</value></geocode>
    </area>
  </info>
</alert>"#;
        let alert = parse_cap_xml(xml).unwrap();
        assert_eq!(alert.identifier, "DE-BY-123");
        assert_eq!(alert.info.len(), 1);
        assert_eq!(alert.info[0].area[0].geocode[0].value, "091620000000");
    }

    #[test]
    fn sanitize_replaces_slashes() {
        assert_eq!(DarcSource::sanitize("DE/BY/123"), "DE_BY_123");
    }
}
