//! Supervisor Loop (C8): the fixed-period driver that ties every other
//! component together.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::cache::AlertCache;
use crate::errors::log_cycle_error;
use crate::geodata::GeodataIndex;
use crate::geofilter::GeoFilter;
use crate::schedule::Schedule;
use crate::sink::aprs::{self, kiss};
use crate::sink::Sink;
use crate::source::SourceAdapter;

/// The standing period between supervisor iterations.
pub const PERIOD: Duration = Duration::seconds(60);

/// One configured retransmission target: a geography/schedule filter plus
/// the APRS identity and transport it emits through.
pub struct Target {
    pub name: String,
    pub filter: GeoFilter,
    pub schedule: Schedule,
    pub aprs: crate::config::AprsConfig,
    pub kiss_ports: Vec<u8>,
    pub sink: Box<dyn Sink>,
}

pub struct Supervisor {
    sources: Vec<Box<dyn SourceAdapter>>,
    targets: Vec<Target>,
    cache: AlertCache,
    geodata: GeodataIndex,
}

impl Supervisor {
    pub fn new(
        sources: Vec<Box<dyn SourceAdapter>>,
        targets: Vec<Target>,
        cache: AlertCache,
        geodata: GeodataIndex,
    ) -> Self {
        Supervisor {
            sources,
            targets,
            cache,
            geodata,
        }
    }

    /// Run until SIGINT. The shutdown flag is only checked at the top of
    /// each iteration, so an in-flight cycle always finishes all 8 steps.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(tokio::sync::Notify::new());
        {
            let shutdown = shutdown.clone();
            let notify = notify.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    shutdown.store(true, Ordering::SeqCst);
                    notify.notify_one();
                }
            });
        }

        loop {
            if shutdown.load(Ordering::SeqCst) {
                info!("shutdown requested, exiting cleanly");
                break;
            }

            let cycle_start = Utc::now();
            self.run_once(cycle_start).await;

            let elapsed = Utc::now() - cycle_start;
            let remaining = (PERIOD - elapsed).max(Duration::zero());
            if let Ok(remaining_std) = remaining.to_std() {
                tokio::select! {
                    _ = tokio::time::sleep(remaining_std) => {}
                    _ = notify.notified() => {}
                }
            }
        }

        for target in &mut self.targets {
            if let Err(err) = target.sink.close().await {
                log_cycle_error("sink", &target.name, &err);
            }
        }
        Ok(())
    }

    /// One supervisor iteration, steps 1-8. Exposed (not just used by
    /// `run()`'s loop) so integration tests can drive a single cycle
    /// against fake sources/sinks without waiting on SIGINT.
    pub async fn run_once(&mut self, now: DateTime<Utc>) {
        // Step 2: drain every source. Sources are independent network/file
        // fetches, so run them concurrently rather than one at a time.
        let fetches = self.sources.iter().map(|source| source.fetch());
        for alerts in futures::future::join_all(fetches).await {
            for alert in alerts {
                self.cache.update(alert, now);
            }
        }

        // Step 3: purge, ageing while preserving referenced chains.
        let valid = self.cache.purge(now);

        // Step 4: persistent id assignment, after ageing so ids never churn.
        self.cache.assign_persistent_ids();

        // Step 5: the head alerts.
        let heads = self.cache.head_ids();

        // Step 6: per-target emission.
        for target in &mut self.targets {
            run_target(target, &mut self.cache, &heads, &self.geodata, now).await;
        }

        // Step 7: persist before source scratch cleanup (crash-safety ordering).
        if let Err(err) = self.cache.dump() {
            log_cycle_error("cache", "dump", &err);
        }

        // Step 8: let every source clean up scratch state.
        let purges = self.sources.iter().map(|source| source.purge(&valid));
        futures::future::join_all(purges).await;
    }
}

async fn run_target(
    target: &mut Target,
    cache: &mut AlertCache,
    heads: &[String],
    geodata: &GeodataIndex,
    now: DateTime<Utc>,
) {
    let mut ax25_frames = Vec::new();
    let mut touched = Vec::new();

    for id in heads {
        let Some(record) = cache.get(id) else { continue };
        let sent = record.capdata.sent;

        let geocodes: Vec<&str> = record
            .capdata
            .info
            .iter()
            .flat_map(|info| info.area.iter())
            .flat_map(|area| area.geocode.iter())
            .map(|g| g.value.as_str())
            .collect();
        let matches = geocodes.is_empty() || geocodes.iter().any(|g| target.filter.matches(g));
        if !matches {
            continue;
        }

        let status = record.tx_status("aprs", &target.name).map(|t| (t.first, t.last));
        if !target.filter.admits_by_age(sent, now, status.is_some()) {
            continue;
        }
        if !target.schedule.tx_required(status, now) {
            continue;
        }

        let pids = record.pids();
        let frames = aprs::emit(&record.capdata, &pids, &target.aprs, geodata, now);
        if frames.is_empty() {
            continue;
        }

        for frame in &frames {
            ax25_frames.push(kiss::ax25_ui_frame(
                &target.aprs.dstcall,
                &target.aprs.mycall,
                &target.aprs.digipath,
                frame.payload.as_bytes(),
            ));
        }
        touched.push(id.clone());
    }

    if ax25_frames.is_empty() {
        return;
    }

    // Every configured KISS port gets the full set of this cycle's frames,
    // matching the reference gateway's "for p in ports: for f in frames"
    // fan-out (one TNC/port may multiplex several radios on one link).
    let ports: &[u8] = if target.kiss_ports.is_empty() { &[0] } else { &target.kiss_ports };
    let mut buffer = Vec::new();
    for &port in ports {
        for ax25 in &ax25_frames {
            buffer.extend(kiss::kiss_frame(port, ax25));
        }
    }

    match target.sink.send(&buffer).await {
        Ok(()) => {
            for id in touched {
                if let Some(record) = cache.get_mut(&id) {
                    record.tx_done("aprs", &target.name, now);
                }
            }
        }
        Err(err) => log_cycle_error("sink", &target.name, &err),
    }
}
