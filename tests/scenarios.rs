//! End-to-end scenarios driving the core types directly (no network, no
//! serial hardware): cache update/merge/purge/id-assignment feeding the
//! APRS emission engine, plus the KISS round-trip and a fake-sink
//! supervisor iteration.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use serde_json::json;

use mowas_aprs_gw::cache::AlertCache;
use mowas_aprs_gw::cap::CapAlert;
use mowas_aprs_gw::config;
use mowas_aprs_gw::geodata::GeodataIndex;
use mowas_aprs_gw::geofilter::{self, GeoFilter};
use mowas_aprs_gw::schedule::{self, Schedule};
use mowas_aprs_gw::sink::aprs;
use mowas_aprs_gw::sink::aprs::kiss;
use mowas_aprs_gw::sink::Sink;
use mowas_aprs_gw::source::SourceAdapter;
use mowas_aprs_gw::supervisor::{Supervisor, Target};

fn cap_from(value: serde_json::Value) -> CapAlert {
    serde_json::from_value(value).expect("valid CapAlert fixture")
}

fn munich_ring() -> String {
    // A small square around the Munich centre, closed ring, lon,lat pairs.
    "11.56,48.13 11.58,48.13 11.58,48.15 11.56,48.15 11.56,48.13".to_owned()
}

/// S1: single head alert, polygon present, schedule fresh.
#[test]
fn s1_single_head_alert_polygon_present() {
    let now = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
    let sent = now - Duration::minutes(10);

    let mut cache = AlertCache::new("/tmp/scenarios-test-cache.json", Duration::days(31));
    cache.update(
        cap_from(json!({
            "identifier": "A1",
            "sent": sent.to_rfc3339(),
            "msgType": "Alert",
            "info": [{
                "headline": "Bombenräumung Innenstadt",
                "area": [{"polygon": [munich_ring()]}],
            }],
        })),
        now,
    );
    cache.purge(now);
    cache.assign_persistent_ids();
    let heads = cache.head_ids();
    assert_eq!(heads, vec!["A1".to_string()]);

    let record = cache.get("A1").unwrap();
    let pids = record.pids();
    assert_eq!(pids, vec![1]);

    let aprs_cfg = sample_aprs_config();
    let geodata = GeodataIndex::empty();
    let frames = aprs::emit(&record.capdata, &pids, &aprs_cfg, &geodata, now);

    assert_eq!(frames.len(), 1, "one object frame, no bulletin (positions present)");
    let frame = &frames[0];
    assert!(frame.payload.starts_with(";MOWA1"), "got {:?}", frame.payload);
    assert!(frame.payload.contains("N"));
    assert!(frame.payload.contains("Bombenraeumung"), "transliterated: {:?}", frame.payload);
}

/// S2: an update chain inherits the predecessor's persistent id.
#[test]
fn s2_update_chain_inherits_id() {
    let now = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();

    let mut cache = AlertCache::new("/tmp/scenarios-test-cache.json", Duration::days(31));
    cache.update(
        cap_from(json!({
            "identifier": "A",
            "sent": now.to_rfc3339(),
            "msgType": "Alert",
            "info": [],
        })),
        now,
    );
    cache.assign_persistent_ids();
    assert_eq!(cache.get("A").unwrap().pids(), vec![1]);

    cache.update(
        cap_from(json!({
            "identifier": "B",
            "sent": now.to_rfc3339(),
            "msgType": "Update",
            "references": "source,A,2026-08-01T11:00:00Z",
            "info": [],
        })),
        now,
    );
    cache.assign_persistent_ids();

    assert_eq!(cache.get("B").unwrap().pids(), vec![1]);
}

/// S3: cancellation without a headline gets the default comment and the
/// cancel status byte.
#[test]
fn s3_cancellation_uses_default_comment_and_cancel_marker() {
    let now = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();

    let mut cache = AlertCache::new("/tmp/scenarios-test-cache.json", Duration::days(31));
    cache.update(
        cap_from(json!({
            "identifier": "B",
            "sent": now.to_rfc3339(),
            "msgType": "Alert",
            "info": [],
        })),
        now,
    );
    cache.update(
        cap_from(json!({
            "identifier": "C",
            "sent": now.to_rfc3339(),
            "msgType": "Cancel",
            "references": "source,B,2026-08-01T11:00:00Z",
            "info": [{"area": [{"polygon": [munich_ring()]}]}],
        })),
        now,
    );
    cache.purge(now);
    cache.assign_persistent_ids();

    let record = cache.get("C").unwrap();
    let pids = record.pids();
    let aprs_cfg = sample_aprs_config();
    let frames = aprs::emit(&record.capdata, &pids, &aprs_cfg, &GeodataIndex::empty(), now);

    let object = frames.iter().find(|f| !f.is_bulletin).expect("one object frame");
    assert!(object.payload.contains('_'), "cancel marker: {:?}", object.payload);
    assert!(
        object.payload.contains("Unspezifische MoWaS-Entwarnung"),
        "default cancel comment: {:?}",
        object.payload
    );
}

/// S4: a geocode-only area with no geodata coverage falls back to a
/// bulletin frame instead of an object frame.
#[test]
fn s4_bulletin_fallback_when_geodata_absent() {
    let now = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();

    let mut cache = AlertCache::new("/tmp/scenarios-test-cache.json", Duration::days(31));
    cache.update(
        cap_from(json!({
            "identifier": "D",
            "sent": now.to_rfc3339(),
            "msgType": "Alert",
            "info": [{
                "headline": "Hochwasser",
                "area": [{"geocode": [{"value": "091620000000", "valueName": "ARS"}]}],
            }],
        })),
        now,
    );
    cache.assign_persistent_ids();

    let record = cache.get("D").unwrap();
    let pids = record.pids();
    let aprs_cfg = sample_aprs_config();
    let geodata = GeodataIndex::empty(); // no ARS coverage at all
    let frames = aprs::emit(&record.capdata, &pids, &aprs_cfg, &geodata, now);

    assert_eq!(frames.len(), 1);
    assert!(frames[0].is_bulletin);
    assert_eq!(frames[0].payload, ":BLN0MOWAS:Hochwasser");
}

/// S5: after the configured schedule is exhausted, retransmission stops
/// firing even though the head alert is still live.
#[test]
fn s5_schedule_exhaustion_stops_retransmission() {
    use schedule::{Bracket, Schedule};

    let sched = Schedule::new(&[Bracket {
        threshold: Duration::minutes(10),
        interval: Duration::minutes(5),
    }]);

    let first = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
    assert!(sched.tx_required(None, first));

    let t5 = first + Duration::minutes(5);
    assert!(sched.tx_required(Some((first, first)), t5));

    let t10 = first + Duration::minutes(10);
    assert!(sched.tx_required(Some((first, t5)), t10));

    let t20 = first + Duration::minutes(20);
    assert!(!sched.tx_required(Some((first, t10)), t20));
}

/// S6: a finer geocode covered by a coarser configured one is dropped
/// during region-of-interest reduction.
#[test]
fn s6_geocode_reduction_drops_covered_finer_codes() {
    let filter = GeoFilter::from_raw_codes(
        ["09", "091620000000", "07"],
        geofilter::DEFAULT_MAX_AGE,
    )
    .unwrap();

    let mut region: Vec<&str> = filter.region_of_interest().collect();
    region.sort_unstable();
    assert_eq!(region, vec!["070000000000", "090000000000"]);
}

/// The cache's on-disk round trip, exercised at the integration level
/// (load of a missing file, dump, then reload).
#[test]
fn cache_round_trips_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.json");

    let now = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
    let mut cache = AlertCache::load(&path, Duration::days(31)).unwrap();
    assert!(cache.is_empty());

    cache.update(
        cap_from(json!({
            "identifier": "E",
            "sent": now.to_rfc3339(),
            "msgType": "Alert",
            "info": [],
        })),
        now,
    );
    cache.assign_persistent_ids();
    cache.dump().unwrap();

    let reloaded = AlertCache::load(&path, Duration::days(31)).unwrap();
    assert_eq!(reloaded.len(), 1);
    assert_eq!(reloaded.get("E").unwrap().pids(), vec![1]);
}

/// KISS invariant property 9: decoding an emitted frame's byte stream
/// yields back the original AX.25 frame, including an escaped payload.
#[test]
fn kiss_round_trip_recovers_ax25_frame() {
    let ax25 = kiss::ax25_ui_frame(
        "APMOWA",
        "DB0ABC-1",
        &["WIDE1-1".to_string(), "WIDE2-2".to_string()],
        b"test\xc0payload\xdb",
    );
    let framed = kiss::kiss_frame(0, &ax25);
    let (port, decoded) = kiss::kiss_decode(&framed).expect("valid KISS frame");
    assert_eq!(port, 0);
    assert_eq!(decoded, ax25);
}

/// A source that yields one fixed batch of alerts on its first `fetch()`
/// and nothing afterwards, so a supervisor test can assert on exactly one
/// cycle's worth of emission.
struct FakeSource {
    batch: Mutex<Option<Vec<CapAlert>>>,
}

#[async_trait]
impl SourceAdapter for FakeSource {
    fn name(&self) -> &str {
        "fake"
    }

    async fn fetch(&self) -> Vec<CapAlert> {
        self.batch.lock().unwrap().take().unwrap_or_default()
    }
}

/// A sink that records every buffer it is asked to send, for the test to
/// inspect afterwards.
#[derive(Clone, Default)]
struct FakeSink {
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
}

#[async_trait]
impl Sink for FakeSink {
    fn name(&self) -> &str {
        "fake"
    }

    async fn send(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(bytes.to_vec());
        Ok(())
    }
}

/// A full supervisor iteration against a fake source and a fake sink:
/// fetch, purge, id assignment, per-target emission, KISS framing, and the
/// resulting tx bookkeeping, with no network or serial hardware involved.
#[tokio::test]
async fn supervisor_iteration_emits_one_frame_through_fake_sink() {
    let now = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();

    let alert = cap_from(json!({
        "identifier": "F1",
        "sent": now.to_rfc3339(),
        "msgType": "Alert",
        "info": [{"headline": "Sturmwarnung", "area": [{"polygon": [munich_ring()]}]}],
    }));
    let source: Box<dyn SourceAdapter> = Box::new(FakeSource {
        batch: Mutex::new(Some(vec![alert])),
    });

    let recorded = Arc::new(Mutex::new(Vec::new()));
    let sink = FakeSink { sent: recorded.clone() };

    let filter = GeoFilter::from_raw_codes(Vec::<String>::new(), geofilter::DEFAULT_MAX_AGE).unwrap();
    let target = Target {
        name: "fake-target".to_owned(),
        filter,
        schedule: Schedule::empty(),
        aprs: sample_aprs_config(),
        kiss_ports: vec![0],
        sink: Box::new(sink),
    };

    let cache = AlertCache::new("/tmp/scenarios-supervisor-cache.json", Duration::days(31));
    let mut supervisor = Supervisor::new(vec![source], vec![target], cache, GeodataIndex::empty());

    supervisor.run_once(now).await;

    {
        let sent = recorded.lock().unwrap();
        assert_eq!(sent.len(), 1, "exactly one send() for the one cycle");
        let (port, ax25) = kiss::kiss_decode(&sent[0]).expect("valid KISS frame");
        assert_eq!(port, 0);
        let info = String::from_utf8_lossy(&ax25);
        assert!(info.contains(";MOWA1"), "object payload embedded in the AX.25 frame: {info:?}");
    }

    // A second cycle with no new alerts and an already-exhausted (empty)
    // schedule must not send again.
    supervisor.run_once(now + Duration::minutes(1)).await;
    assert_eq!(recorded.lock().unwrap().len(), 1, "empty schedule does not retransmit");
}

/// A target configured with more than one KISS port must fan each of the
/// cycle's frames out to every port, not just the first.
#[tokio::test]
async fn supervisor_iteration_fans_out_to_every_kiss_port() {
    let now = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();

    let alert = cap_from(json!({
        "identifier": "F2",
        "sent": now.to_rfc3339(),
        "msgType": "Alert",
        "info": [{"headline": "Sturmwarnung", "area": [{"polygon": [munich_ring()]}]}],
    }));
    let source: Box<dyn SourceAdapter> = Box::new(FakeSource {
        batch: Mutex::new(Some(vec![alert])),
    });

    let recorded = Arc::new(Mutex::new(Vec::new()));
    let sink = FakeSink { sent: recorded.clone() };

    let filter = GeoFilter::from_raw_codes(Vec::<String>::new(), geofilter::DEFAULT_MAX_AGE).unwrap();
    let target = Target {
        name: "fake-target".to_owned(),
        filter,
        schedule: Schedule::empty(),
        aprs: sample_aprs_config(),
        kiss_ports: vec![0, 3],
        sink: Box::new(sink),
    };

    let cache = AlertCache::new("/tmp/scenarios-supervisor-ports-cache.json", Duration::days(31));
    let mut supervisor = Supervisor::new(vec![source], vec![target], cache, GeodataIndex::empty());
    supervisor.run_once(now).await;

    let sent = recorded.lock().unwrap();
    assert_eq!(sent.len(), 1, "one send() call carrying every port's frames");
    let buffer = &sent[0];

    let ports: Vec<u8> = buffer
        .split(|&b| b == 0xC0)
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| {
            let mut framed = vec![0xC0];
            framed.extend_from_slice(chunk);
            framed.push(0xC0);
            kiss::kiss_decode(&framed).expect("valid KISS frame").0
        })
        .collect();
    assert_eq!(ports, vec![0, 3], "same frame emitted once per configured port");
}

fn sample_aprs_config() -> config::AprsConfig {
    let yaml = r#"
mycall: DB0ABC-1
truncate_comment: true
beacon:
  enabled: true
  prefix: MOWA
  time: true
  compressed: false
bulletin:
  mode: fallback
  id: "0MOWAS"
"#;
    serde_yaml::from_str(yaml).expect("valid AprsConfig fixture")
}
