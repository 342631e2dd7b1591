//! Configuration: CLI arguments merged over a single YAML document.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Duration;
use clap::Parser;
use serde::Deserialize;

/// `mowas-aprs-gw` bridges OASIS CAP civil-protection alerts to APRS/AX.25
/// packet radio, filtered by geography.
#[derive(Debug, Parser)]
#[command(name = "mowas-aprs-gw", version, about)]
pub struct Cli {
    /// Path to the YAML configuration document.
    #[arg(long = "config", default_value = "/etc/mowas.yml")]
    pub config: PathBuf,

    /// Override `logging.level`.
    #[arg(long = "log-level")]
    pub log_level: Option<String>,

    /// Override `logging.console`.
    #[arg(long = "log-console")]
    pub log_console: Option<bool>,

    /// Override `logging.file`.
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub geodata: GeodataConfig,
    pub cache: CacheConfig,
    #[serde(default)]
    pub source: SourcesConfig,
    pub target: HashMap<String, HashMap<String, TargetConfig>>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("could not read config file {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("could not parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (flavour, by_name) in &self.target {
            for (name, target) in by_name {
                for geocode in &target.filter.geocodes {
                    crate::geofilter::normalize_geocode(geocode).map_err(|msg| {
                        anyhow::anyhow!("target.{flavour}.{name}.filter.geocodes: {msg}")
                    })?;
                }
            }
        }
        Ok(())
    }

    /// Apply CLI overrides (CLI wins over the file's `logging` section).
    pub fn apply_cli_overrides(&mut self, cli: &Cli) {
        if let Some(level) = &cli.log_level {
            self.logging.level = level.clone();
        }
        if let Some(console) = cli.log_console {
            self.logging.console = console;
        }
        if let Some(file) = &cli.log_file {
            self.logging.file = Some(file.clone());
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_true")]
    pub console: bool,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            console: true,
            file: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeodataConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub path: PathBuf,
    #[serde(default = "default_cache_purge", deserialize_with = "deserialize_duration")]
    pub purge: Duration,
}

fn default_cache_purge() -> Duration {
    crate::cache::DEFAULT_AGE
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub bbk_url: HashMap<String, BbkUrlSourceConfig>,
    #[serde(default)]
    pub bbk_file: HashMap<String, BbkFileSourceConfig>,
    #[serde(default)]
    pub darc: HashMap<String, DarcSourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BbkUrlSourceConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BbkFileSourceConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DarcSourceConfig {
    pub watch_dir: PathBuf,
    pub scratch_dir: PathBuf,
    #[serde(default)]
    pub internet: bool,
    #[serde(default)]
    pub hamnet: bool,
    #[serde(default)]
    pub download_audio: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub schedule: HashMap<String, String>,
    pub aprs: AprsConfig,
    pub kiss: KissConfig,
    #[serde(default)]
    pub serial: Option<SerialConfig>,
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub geocodes: Vec<String>,
    #[serde(default = "default_max_age", deserialize_with = "deserialize_duration")]
    pub max_age: Duration,
}

fn default_max_age() -> Duration {
    Duration::hours(4)
}

#[derive(Debug, Clone, Deserialize)]
pub struct AprsConfig {
    #[serde(default = "default_dstcall")]
    pub dstcall: String,
    pub mycall: String,
    #[serde(default = "default_digipath")]
    pub digipath: Vec<String>,
    #[serde(default)]
    pub truncate_comment: bool,
    #[serde(default)]
    pub beacon: BeaconConfig,
    #[serde(default)]
    pub bulletin: BulletinConfig,
}

fn default_dstcall() -> String {
    "APMOWA".to_owned()
}

fn default_digipath() -> Vec<String> {
    vec!["WIDE1-1".to_owned()]
}

#[derive(Debug, Clone, Deserialize)]
pub struct BeaconConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_beacon_prefix")]
    pub prefix: String,
    #[serde(default = "default_true")]
    pub time: bool,
    #[serde(default)]
    pub compressed: bool,
    #[serde(default)]
    pub max_areas: usize,
}

fn default_beacon_prefix() -> String {
    "MOWA".to_owned()
}

impl Default for BeaconConfig {
    fn default() -> Self {
        BeaconConfig {
            enabled: true,
            prefix: default_beacon_prefix(),
            time: true,
            compressed: false,
            max_areas: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulletinConfig {
    #[serde(default = "default_bulletin_mode")]
    pub mode: String,
    #[serde(default = "default_bulletin_id")]
    pub id: String,
}

fn default_bulletin_mode() -> String {
    "fallback".to_owned()
}

fn default_bulletin_id() -> String {
    "0MOWAS".to_owned()
}

impl Default for BulletinConfig {
    fn default() -> Self {
        BulletinConfig {
            mode: default_bulletin_mode(),
            id: default_bulletin_id(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KissConfig {
    #[serde(default)]
    pub ports: Vec<u8>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SerialConfig {
    pub device: PathBuf,
    #[serde(default = "default_baud")]
    pub baud: u32,
    #[serde(default)]
    pub cmd_up: Option<Vec<u8>>,
    #[serde(default)]
    pub cmd_pre: Option<Vec<u8>>,
    #[serde(default)]
    pub cmd_post: Option<Vec<u8>>,
    #[serde(default)]
    pub cmd_down: Option<Vec<u8>>,
}

fn default_baud() -> u32 {
    9600
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    pub host: String,
    pub port: u16,
}

/// Parse `<N>[m|h|d|w]`, defaulting to minutes when no suffix is given.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        bail!("empty duration string");
    }
    let (digits, unit) = match raw.chars().last().unwrap() {
        c if c.is_ascii_digit() => (raw, 'm'),
        c => (&raw[..raw.len() - c.len_utf8()], c),
    };
    let n: i64 = digits
        .parse()
        .with_context(|| format!("invalid duration {raw:?}: not a number"))?;
    Ok(match unit {
        'm' => Duration::minutes(n),
        'h' => Duration::hours(n),
        'd' => Duration::days(n),
        'w' => Duration::weeks(n),
        other => bail!("invalid duration {raw:?}: unknown unit {other:?}"),
    })
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw).map_err(serde::de::Error::custom)
}

/// Initialize `tracing-subscriber` per `logging.{level,console,file}`. Console
/// and file routing are independent layers, so both, either, or neither may
/// be active.
pub fn init_logging(logging: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_new(&logging.level)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = logging
        .console
        .then(|| fmt::layer().with_writer(std::io::stderr));

    let file_layer = match &logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("could not open log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(file))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();
    Ok(())
}
