//! Entry point: loads configuration, wires up sources/sinks, and runs the
//! supervisor loop until SIGINT.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info_span};

use mowas_aprs_gw::cache::AlertCache;
use mowas_aprs_gw::config::{self, Cli, Config, TargetConfig};
use mowas_aprs_gw::errors;
use mowas_aprs_gw::geodata::GeodataIndex;
use mowas_aprs_gw::geofilter::GeoFilter;
use mowas_aprs_gw::schedule::{Bracket, Schedule};
use mowas_aprs_gw::sink::aprs::transport::{SerialSink, TcpSink};
use mowas_aprs_gw::sink::Sink;
use mowas_aprs_gw::source::bbk_file::BbkFileSource;
use mowas_aprs_gw::source::bbk_url::BbkUrlSource;
use mowas_aprs_gw::source::darc::DarcSource;
use mowas_aprs_gw::source::{shared_http_client, SourceAdapter};
use mowas_aprs_gw::supervisor::{Supervisor, Target};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        errors::display_causes_and_backtrace(&err);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)?;
    config.apply_cli_overrides(&cli);

    config::init_logging(&config.logging)?;
    let _span = info_span!("mowas-aprs-gw").entered();
    debug!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let geodata = match &config.geodata.path {
        Some(path) => GeodataIndex::load(path)
            .with_context(|| format!("could not load geodata from {}", path.display()))?,
        None => GeodataIndex::empty(),
    };

    let cache = AlertCache::load(&config.cache.path, config.cache.purge)
        .context("could not load alert cache")?;

    let sources = build_sources(&config)?;
    let targets = build_targets(&config).await?;

    let supervisor = Supervisor::new(sources, targets, cache, geodata);
    supervisor.run().await
}

fn build_sources(config: &Config) -> Result<Vec<Box<dyn SourceAdapter>>> {
    let mut sources: Vec<Box<dyn SourceAdapter>> = Vec::new();
    let client = shared_http_client();

    for (name, cfg) in &config.source.bbk_url {
        sources.push(Box::new(BbkUrlSource::new(name.clone(), &cfg.url, client.clone())?));
    }
    for (name, cfg) in &config.source.bbk_file {
        sources.push(Box::new(BbkFileSource::new(name.clone(), cfg.path.clone())));
    }
    for (name, cfg) in &config.source.darc {
        sources.push(Box::new(DarcSource::new(
            name.clone(),
            cfg.watch_dir.clone(),
            cfg.scratch_dir.clone(),
            cfg.internet,
            cfg.hamnet,
            cfg.download_audio,
            client.clone(),
        )));
    }

    Ok(sources)
}

async fn build_targets(config: &Config) -> Result<Vec<Target>> {
    let mut targets = Vec::new();
    for (flavour, by_name) in &config.target {
        for (name, target_config) in by_name {
            targets.push(build_target(flavour, name, target_config).await?);
        }
    }
    Ok(targets)
}

async fn build_target(flavour: &str, name: &str, config: &TargetConfig) -> Result<Target> {
    let filter = GeoFilter::from_raw_codes(&config.filter.geocodes, config.filter.max_age)
        .map_err(|msg| anyhow::anyhow!("target.{flavour}.{name}.filter: {msg}"))?;

    let brackets = parse_schedule(&config.schedule)
        .with_context(|| format!("target.{flavour}.{name}.schedule"))?;
    let schedule = if brackets.is_empty() { Schedule::empty() } else { Schedule::new(&brackets) };

    let sink = build_sink(flavour, name, config).await?;

    Ok(Target {
        name: name.to_owned(),
        filter,
        schedule,
        aprs: config.aprs.clone(),
        kiss_ports: config.kiss.ports.clone(),
        sink,
    })
}

fn parse_schedule(schedule: &std::collections::HashMap<String, String>) -> Result<Vec<Bracket>> {
    let mut brackets = schedule
        .iter()
        .map(|(threshold, interval)| {
            Ok(Bracket {
                threshold: config::parse_duration(threshold)?,
                interval: config::parse_duration(interval)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    brackets.sort_by_key(|b| b.threshold);
    Ok(brackets)
}

async fn build_sink(flavour: &str, name: &str, config: &TargetConfig) -> Result<Box<dyn Sink>> {
    match (&config.serial, &config.remote) {
        (Some(serial), _) => Ok(Box::new(
            SerialSink::open(name.to_owned(), serial).await.with_context(|| {
                format!("target.{flavour}.{name}.serial: could not open transport")
            })?,
        )),
        (None, Some(remote)) => Ok(Box::new(TcpSink::new(name.to_owned(), remote.host.clone(), remote.port))),
        (None, None) => anyhow::bail!("target.{flavour}.{name} has neither `serial` nor `remote` configured"),
    }
}
