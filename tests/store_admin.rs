use chrono::{DateTime, Duration as ChronoDuration, Local, TimeZone};
use std::path::Path;
use std::time::Duration;

use plate_watch::artifact::ArtifactStore;
use plate_watch::storage::ObservationRecord;
use plate_watch::{
    BoundingRegion, Frame, Observation, PersistenceGateway, PlateStore, PlateText,
    SqlitePlateStore, TimeRange,
};

fn sqlite(dir: &Path) -> SqlitePlateStore {
    let path = dir.join("plates.db");
    SqlitePlateStore::open(&path.display().to_string(), Duration::from_secs(2))
        .expect("open sqlite store")
}

fn record(source: &str, plate: &str, valid: bool, days_ago: i64) -> ObservationRecord {
    ObservationRecord {
        source_id: source.to_string(),
        plate_text: plate.to_string(),
        artifact_path: format!("valid/{}/{}_{}.jpg", plate, source, days_ago),
        detection_confidence: 0.8,
        recognition_confidence: 0.9,
        is_valid: valid,
        timestamp: Local::now() - ChronoDuration::days(days_ago),
    }
}

fn at(day: u32, hour: u32, minute: u32) -> DateTime<Local> {
    Local
        .with_ymd_and_hms(2024, 5, day, hour, minute, 0)
        .single()
        .expect("unambiguous local time")
}

fn seen_at(plate: &str, timestamp: DateTime<Local>) -> ObservationRecord {
    ObservationRecord {
        timestamp,
        ..record("gate-1", plate, true, 0)
    }
}

fn observation(raw: &str, source: &str) -> Observation {
    let text = PlateText::parse(raw);
    Observation {
        raw_text: text.raw,
        canonical_text: text.canonical,
        is_valid: text.is_valid,
        detection_confidence: 0.85,
        recognition_confidence: 0.92,
        region: BoundingRegion::new(0, 0, 120, 40),
        source_id: source.to_string(),
        timestamp: Local::now(),
        frame_index: 3,
    }
}

#[test]
fn sqlite_stats_aggregate_all_rows() {
    let dir = tempfile::tempdir().unwrap();
    let store = sqlite(dir.path());
    store.ping().unwrap();

    store.insert_observation(&record("gate-1", "30A12345", true, 0)).unwrap();
    store.insert_observation(&record("gate-1", "30A12345", true, 1)).unwrap();
    store.insert_observation(&record("gate-2", "51G67890", true, 0)).unwrap();
    store.insert_observation(&record("gate-2", "ABC", false, 2)).unwrap();

    let stats = store.stats().unwrap();
    assert_eq!(stats.total, 4);
    assert_eq!(stats.valid, 3);
    assert_eq!(stats.invalid, 1);
    assert_eq!(stats.distinct_plates, 3);
    assert_eq!(
        stats.per_source,
        vec![("gate-1".to_string(), 2), ("gate-2".to_string(), 2)]
    );
    assert!(stats.first_seen.unwrap() <= stats.last_seen.unwrap());
}

#[test]
fn empty_sqlite_store_reports_zeroes() {
    let dir = tempfile::tempdir().unwrap();
    let stats = sqlite(dir.path()).stats().unwrap();
    assert_eq!(stats.total, 0);
    assert_eq!(stats.invalid, 0);
    assert!(stats.first_seen.is_none());
    assert!(stats.per_source.is_empty());
}

#[test]
fn sqlite_deletes_return_artifact_paths() {
    let dir = tempfile::tempdir().unwrap();
    let store = sqlite(dir.path());
    store.insert_observation(&record("gate-1", "30A12345", true, 10)).unwrap();
    store.insert_observation(&record("gate-1", "29C1234", true, 0)).unwrap();
    store.insert_observation(&record("gate-1", "29C1234", true, 8)).unwrap();

    let old = store
        .delete_older_than(Duration::from_secs(7 * 24 * 60 * 60))
        .unwrap();
    assert_eq!(old.len(), 2);
    assert!(old.contains(&"valid/30A12345/gate-1_10.jpg".to_string()));

    let by_text = store.delete_by_text("29C1234").unwrap();
    assert_eq!(by_text, vec!["valid/29C1234/gate-1_0.jpg".to_string()]);
    assert_eq!(store.stats().unwrap().total, 0);
}

#[test]
fn gateway_admin_deletes_remove_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let artifacts = ArtifactStore::new(dir.path().join("out")).unwrap();
    let mut gateway = PersistenceGateway::new(Box::new(sqlite(dir.path())), artifacts);
    let crop = Frame::filled(120, 40, [200, 200, 200]);

    assert!(gateway.persist(&observation("30A-12345", "gate-1"), &crop));
    assert!(gateway.persist(&observation("30A 12345", "gate-2"), &crop));
    assert!(gateway.persist(&observation("51G67890", "gate-1"), &crop));
    assert_eq!(gateway.stats().unwrap().total, 3);

    let report = gateway.delete_by_text("30A12345").unwrap();
    assert_eq!(report.rows, 2);
    assert_eq!(report.artifacts_removed, 2);
    assert!(!dir.path().join("out/valid/30A12345").read_dir().unwrap().any(|_| true));

    let report = gateway.delete_all().unwrap();
    assert_eq!(report.rows, 1);
    assert_eq!(report.artifacts_removed, 1);
    assert_eq!(gateway.stats().unwrap().total, 0);
}

#[test]
fn cleanup_keeps_recent_rows() {
    let dir = tempfile::tempdir().unwrap();
    let artifacts = ArtifactStore::new(dir.path().join("out")).unwrap();
    let store = sqlite(dir.path());
    store.insert_observation(&record("gate-1", "30A12345", true, 40)).unwrap();
    let mut gateway = PersistenceGateway::new(Box::new(store), artifacts);
    let crop = Frame::filled(120, 40, [200, 200, 200]);
    assert!(gateway.persist(&observation("29C1234", "gate-1"), &crop));

    let report = gateway.cleanup_older_than(30).unwrap();
    assert_eq!(report.rows, 1);
    assert_eq!(gateway.stats().unwrap().total, 1);
}

#[test]
fn history_matches_fragments_newest_first() {
    let dir = tempfile::tempdir().unwrap();
    let store = sqlite(dir.path());
    store.insert_observation(&seen_at("30A12345", at(16, 9, 0))).unwrap();
    store.insert_observation(&seen_at("51G67890", at(17, 8, 30))).unwrap();
    store.insert_observation(&seen_at("30A12345", at(18, 17, 45))).unwrap();
    store.insert_observation(&seen_at("30A99999", at(17, 12, 0))).unwrap();

    let found = store
        .find_observations("30a", TimeRange::default(), 10)
        .unwrap();
    let seen: Vec<(&str, DateTime<Local>)> = found
        .iter()
        .map(|f| (f.record.plate_text.as_str(), f.record.timestamp))
        .collect();
    assert_eq!(
        seen,
        vec![
            ("30A12345", at(18, 17, 45)),
            ("30A99999", at(17, 12, 0)),
            ("30A12345", at(16, 9, 0)),
        ]
    );
    assert!(found.iter().all(|f| f.record.is_valid && f.record.source_id == "gate-1"));

    let may_17 = TimeRange::new(Some(at(17, 0, 0)), Some(at(18, 0, 0)));
    let found = store.find_observations("30A", may_17, 10).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].record.plate_text, "30A99999");

    assert_eq!(store.find_observations("", TimeRange::default(), 2).unwrap().len(), 2);
    assert!(store
        .find_observations("0A_", TimeRange::default(), 10)
        .unwrap()
        .is_empty());
}

#[test]
fn hourly_traffic_reports_the_peak_hour() {
    let dir = tempfile::tempdir().unwrap();
    let artifacts = ArtifactStore::new(dir.path().join("out")).unwrap();
    let store = sqlite(dir.path());
    for (plate, t) in [
        ("30A12345", at(17, 8, 5)),
        ("51G67890", at(17, 8, 40)),
        ("29C1234", at(17, 17, 10)),
        ("30A12345", at(18, 8, 15)),
        ("29C1234", at(18, 17, 50)),
        ("88B11111", at(20, 8, 0)),
    ] {
        store.insert_observation(&seen_at(plate, t)).unwrap();
    }
    let gateway = PersistenceGateway::new(Box::new(store), artifacts);

    let counts = gateway
        .hourly_counts(TimeRange::new(Some(at(17, 0, 0)), Some(at(19, 0, 0))))
        .unwrap();
    assert_eq!(counts.total(), 5);
    assert_eq!(counts.counts[8], 3);
    assert_eq!(counts.counts[17], 2);
    assert_eq!(counts.peak_hour(), Some((8, 3)));

    let empty = gateway
        .hourly_counts(TimeRange::new(Some(at(19, 0, 0)), Some(at(20, 0, 0))))
        .unwrap();
    assert_eq!(empty.total(), 0);
    assert_eq!(empty.peak_hour(), None);
}

#[test]
fn open_existing_refuses_to_create_a_datastore() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plates.db").display().to_string();

    assert!(SqlitePlateStore::open_existing(&path, Duration::from_secs(2)).is_err());
    assert!(!dir.path().join("plates.db").exists());

    sqlite(dir.path())
        .insert_observation(&record("gate-1", "30A12345", true, 0))
        .unwrap();
    let store = SqlitePlateStore::open_existing(&path, Duration::from_secs(2)).unwrap();
    assert_eq!(store.stats().unwrap().total, 1);
}
