//! Observation datastore.
//!
//! `PlateStore` is the contract the pipeline needs from the external
//! datastore: one hot-path insert plus administrative deletes and an
//! aggregate query, plus the two read-only lookups the admin shell offers
//! (plate history and hourly traffic). `SqlitePlateStore` opens a fresh
//! connection for every call with a bounded busy timeout;
//! `InMemoryPlateStore` backs tests.

use chrono::{DateTime, Local, TimeZone, Timelike};
use rusqlite::{params, Connection, OpenFlags, ToSql};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::StoreError;

pub const DEFAULT_DB_PATH: &str = "platewatch.db";
pub const DEFAULT_DB_TIMEOUT: Duration = Duration::from_secs(5);

/// One row handed to the datastore.
#[derive(Clone, Debug, PartialEq)]
pub struct ObservationRecord {
    pub source_id: String,
    pub plate_text: String,
    pub artifact_path: String,
    pub detection_confidence: f32,
    pub recognition_confidence: f32,
    pub is_valid: bool,
    pub timestamp: DateTime<Local>,
}

/// Aggregate counts returned by `PlateStore::stats`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StoreStats {
    pub total: u64,
    pub valid: u64,
    pub invalid: u64,
    pub distinct_plates: u64,
    pub per_source: Vec<(String, u64)>,
    pub first_seen: Option<DateTime<Local>>,
    pub last_seen: Option<DateTime<Local>>,
}

/// A stored row together with its datastore id.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredObservation {
    pub id: i64,
    pub record: ObservationRecord,
}

/// Half-open time window `[from, to)`. A missing bound is unbounded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub from: Option<DateTime<Local>>,
    pub to: Option<DateTime<Local>>,
}

impl TimeRange {
    pub fn new(from: Option<DateTime<Local>>, to: Option<DateTime<Local>>) -> Self {
        Self { from, to }
    }

    /// Bounds in whole epoch seconds, the resolution rows are filtered at.
    fn epoch_bounds(&self) -> (i64, i64) {
        (
            self.from.map_or(i64::MIN, |t| t.timestamp()),
            self.to.map_or(i64::MAX, |t| t.timestamp()),
        )
    }

    fn contains(&self, at: &DateTime<Local>) -> bool {
        let (from, to) = self.epoch_bounds();
        let secs = at.timestamp();
        secs >= from && secs < to
    }
}

/// Observation counts per local hour of day.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HourlyCounts {
    pub counts: [u64; 24],
}

impl HourlyCounts {
    fn add(&mut self, hour: u32) {
        if let Some(slot) = self.counts.get_mut(hour as usize) {
            *slot += 1;
        }
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Busiest hour and its count. Ties go to the earlier hour; `None` when empty.
    pub fn peak_hour(&self) -> Option<(u32, u64)> {
        let mut peak: Option<(u32, u64)> = None;
        for (hour, &count) in self.counts.iter().enumerate() {
            if count > 0 && peak.map_or(true, |(_, best)| count > best) {
                peak = Some((hour as u32, count));
            }
        }
        peak
    }
}

fn escape_like(pattern: &str) -> String {
    let mut escaped = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

pub trait PlateStore: Send {
    /// Reachability check used at startup.
    fn ping(&self) -> Result<(), StoreError>;

    fn insert_observation(&self, record: &ObservationRecord) -> Result<i64, StoreError>;

    /// Delete rows older than `age`. Returns the artifact paths of deleted rows.
    fn delete_older_than(&self, age: Duration) -> Result<Vec<String>, StoreError>;

    fn delete_by_text(&self, plate_text: &str) -> Result<Vec<String>, StoreError>;

    fn delete_all(&self) -> Result<Vec<String>, StoreError>;

    fn stats(&self) -> Result<StoreStats, StoreError>;

    /// Rows whose plate text contains `plate_pattern` (case-insensitive; empty
    /// matches everything) within `range`, newest first, at most `limit`.
    fn find_observations(
        &self,
        plate_pattern: &str,
        range: TimeRange,
        limit: usize,
    ) -> Result<Vec<StoredObservation>, StoreError>;

    /// Rows within `range` bucketed by the local hour they were observed at.
    fn hourly_counts(&self, range: TimeRange) -> Result<HourlyCounts, StoreError>;
}

// ----------------------------------------------------------------------------
// SQLite
// ----------------------------------------------------------------------------

pub struct SqlitePlateStore {
    db_path: String,
    timeout: Duration,
    create: bool,
}

impl SqlitePlateStore {
    /// Open (creating if needed) the database and ensure the schema.
    ///
    /// Fails when the database cannot be reached, which callers treat as fatal.
    pub fn open(db_path: &str, timeout: Duration) -> Result<Self, StoreError> {
        Self::open_with(db_path, timeout, true)
    }

    /// Open a database that must already exist. A missing file is an error
    /// and is not created.
    pub fn open_existing(db_path: &str, timeout: Duration) -> Result<Self, StoreError> {
        Self::open_with(db_path, timeout, false)
    }

    fn open_with(db_path: &str, timeout: Duration, create: bool) -> Result<Self, StoreError> {
        let store = Self {
            db_path: db_path.to_string(),
            timeout,
            create,
        };
        let conn = store.connect()?;
        ensure_schema(&conn)?;
        Ok(store)
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if self.create {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        let conn = Connection::open_with_flags(&self.db_path, flags)
            .map_err(|e| StoreError::Connect(format!("{}: {}", self.db_path, e)))?;
        conn.busy_timeout(self.timeout)
            .map_err(|e| StoreError::Connect(e.to_string()))?;
        Ok(conn)
    }

    fn delete_where(
        &self,
        clause: &str,
        args: &[&dyn ToSql],
    ) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let paths = {
            let mut stmt =
                tx.prepare(&format!("SELECT artifact_path FROM observations {}", clause))?;
            let rows = stmt.query_map(args, |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        tx.execute(&format!("DELETE FROM observations {}", clause), args)?;
        tx.commit()?;
        Ok(paths)
    }
}

fn ensure_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;

        CREATE TABLE IF NOT EXISTS observations (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          source_id TEXT NOT NULL,
          plate_text TEXT NOT NULL,
          artifact_path TEXT NOT NULL,
          detection_confidence REAL NOT NULL,
          recognition_confidence REAL NOT NULL,
          is_valid INTEGER NOT NULL,
          created_at INTEGER NOT NULL,
          observed_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_observations_created ON observations(created_at);
        CREATE INDEX IF NOT EXISTS idx_observations_plate ON observations(plate_text);
        "#,
    )
    .map_err(|e| StoreError::Connect(format!("schema setup failed: {}", e)))
}

fn parse_observed_at(column: usize, value: &str) -> rusqlite::Result<DateTime<Local>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Local))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn epoch_to_local(secs: Option<i64>) -> Option<DateTime<Local>> {
    secs.and_then(|s| Local.timestamp_opt(s, 0).single())
}

fn cutoff_epoch(age: Duration) -> i64 {
    Local::now().timestamp() - age.as_secs().min(i64::MAX as u64) as i64
}

impl PlateStore for SqlitePlateStore {
    fn ping(&self) -> Result<(), StoreError> {
        let conn = self.connect()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(|e| StoreError::Connect(e.to_string()))?;
        Ok(())
    }

    fn insert_observation(&self, record: &ObservationRecord) -> Result<i64, StoreError> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO observations(source_id, plate_text, artifact_path, detection_confidence,
                                     recognition_confidence, is_valid, created_at, observed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                record.source_id,
                record.plate_text,
                record.artifact_path,
                record.detection_confidence as f64,
                record.recognition_confidence as f64,
                record.is_valid,
                record.timestamp.timestamp(),
                record.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn delete_older_than(&self, age: Duration) -> Result<Vec<String>, StoreError> {
        let cutoff = cutoff_epoch(age);
        self.delete_where("WHERE created_at < ?1", &[&cutoff as &dyn ToSql])
    }

    fn delete_by_text(&self, plate_text: &str) -> Result<Vec<String>, StoreError> {
        self.delete_where("WHERE plate_text = ?1", &[&plate_text as &dyn ToSql])
    }

    fn delete_all(&self) -> Result<Vec<String>, StoreError> {
        self.delete_where("", &[])
    }

    fn stats(&self) -> Result<StoreStats, StoreError> {
        let conn = self.connect()?;
        let (total, valid, distinct, first, last) = conn.query_row(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(is_valid), 0),
                   COUNT(DISTINCT plate_text),
                   MIN(created_at),
                   MAX(created_at)
            FROM observations
            "#,
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                ))
            },
        )?;

        let mut stmt = conn.prepare(
            "SELECT source_id, COUNT(*) FROM observations GROUP BY source_id ORDER BY source_id",
        )?;
        let per_source = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(StoreStats {
            total: total as u64,
            valid: valid as u64,
            invalid: (total - valid) as u64,
            distinct_plates: distinct as u64,
            per_source,
            first_seen: epoch_to_local(first),
            last_seen: epoch_to_local(last),
        })
    }

    fn find_observations(
        &self,
        plate_pattern: &str,
        range: TimeRange,
        limit: usize,
    ) -> Result<Vec<StoredObservation>, StoreError> {
        let conn = self.connect()?;
        let pattern = format!("%{}%", escape_like(plate_pattern));
        let (from, to) = range.epoch_bounds();
        let limit = limit.min(i64::MAX as usize) as i64;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, source_id, plate_text, artifact_path, detection_confidence,
                   recognition_confidence, is_valid, observed_at
            FROM observations
            WHERE plate_text LIKE ?1 ESCAPE '\'
              AND created_at >= ?2 AND created_at < ?3
            ORDER BY created_at DESC, id DESC
            LIMIT ?4
            "#,
        )?;
        let rows = stmt.query_map(params![pattern, from, to, limit], |row| {
            let observed_at: String = row.get(7)?;
            Ok(StoredObservation {
                id: row.get(0)?,
                record: ObservationRecord {
                    source_id: row.get(1)?,
                    plate_text: row.get(2)?,
                    artifact_path: row.get(3)?,
                    detection_confidence: row.get::<_, f64>(4)? as f32,
                    recognition_confidence: row.get::<_, f64>(5)? as f32,
                    is_valid: row.get(6)?,
                    timestamp: parse_observed_at(7, &observed_at)?,
                },
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn hourly_counts(&self, range: TimeRange) -> Result<HourlyCounts, StoreError> {
        let conn = self.connect()?;
        let (from, to) = range.epoch_bounds();
        let mut stmt = conn.prepare(
            "SELECT observed_at FROM observations WHERE created_at >= ?1 AND created_at < ?2",
        )?;
        // observed_at keeps the writer's UTC offset, so its hour is the local
        // hour at observation time.
        let rows = stmt.query_map(params![from, to], |row| {
            let observed_at: String = row.get(0)?;
            DateTime::parse_from_rfc3339(&observed_at)
                .map(|t| t.hour())
                .map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        0,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })
        })?;
        let mut counts = HourlyCounts::default();
        for hour in rows {
            counts.add(hour?);
        }
        Ok(counts)
    }
}

// ----------------------------------------------------------------------------
// In-memory
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct InMemoryState {
    rows: Vec<(i64, ObservationRecord)>,
    next_id: i64,
    unreachable: bool,
    insert_calls: u64,
}

/// Shared in-memory store. Clones observe the same rows.
#[derive(Clone, Debug, Default)]
pub struct InMemoryPlateStore {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryPlateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail as if the datastore went away.
    pub fn set_unreachable(&self, unreachable: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.unreachable = unreachable;
        }
    }

    /// Number of insert attempts, including failed ones.
    pub fn insert_calls(&self) -> u64 {
        self.state.lock().map(|s| s.insert_calls).unwrap_or(0)
    }

    pub fn records(&self) -> Vec<ObservationRecord> {
        self.state
            .lock()
            .map(|s| s.rows.iter().map(|(_, r)| r.clone()).collect())
            .unwrap_or_default()
    }

    fn with_state<T>(
        &self,
        f: impl FnOnce(&mut InMemoryState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| StoreError::Connect("in-memory store lock poisoned".to_string()))?;
        if state.unreachable {
            return Err(StoreError::Connect("in-memory store unreachable".to_string()));
        }
        f(&mut state)
    }

    fn delete_matching(
        &self,
        pred: impl Fn(&ObservationRecord) -> bool,
    ) -> Result<Vec<String>, StoreError> {
        self.with_state(|state| {
            let mut removed = Vec::new();
            state.rows.retain(|(_, r)| {
                if pred(r) {
                    removed.push(r.artifact_path.clone());
                    false
                } else {
                    true
                }
            });
            Ok(removed)
        })
    }
}

impl PlateStore for InMemoryPlateStore {
    fn ping(&self) -> Result<(), StoreError> {
        self.with_state(|_| Ok(()))
    }

    fn insert_observation(&self, record: &ObservationRecord) -> Result<i64, StoreError> {
        if let Ok(mut state) = self.state.lock() {
            state.insert_calls += 1;
        }
        self.with_state(|state| {
            state.next_id += 1;
            let id = state.next_id;
            state.rows.push((id, record.clone()));
            Ok(id)
        })
    }

    fn delete_older_than(&self, age: Duration) -> Result<Vec<String>, StoreError> {
        let cutoff = cutoff_epoch(age);
        self.delete_matching(|r| r.timestamp.timestamp() < cutoff)
    }

    fn delete_by_text(&self, plate_text: &str) -> Result<Vec<String>, StoreError> {
        self.delete_matching(|r| r.plate_text == plate_text)
    }

    fn delete_all(&self) -> Result<Vec<String>, StoreError> {
        self.delete_matching(|_| true)
    }

    fn stats(&self) -> Result<StoreStats, StoreError> {
        self.with_state(|state| {
            let mut stats = StoreStats::default();
            let mut plates = std::collections::BTreeSet::new();
            let mut sources = std::collections::BTreeMap::<String, u64>::new();
            for (_, r) in &state.rows {
                stats.total += 1;
                if r.is_valid {
                    stats.valid += 1;
                } else {
                    stats.invalid += 1;
                }
                plates.insert(r.plate_text.clone());
                *sources.entry(r.source_id.clone()).or_default() += 1;
                stats.first_seen = Some(match stats.first_seen {
                    Some(t) if t <= r.timestamp => t,
                    _ => r.timestamp,
                });
                stats.last_seen = Some(match stats.last_seen {
                    Some(t) if t >= r.timestamp => t,
                    _ => r.timestamp,
                });
            }
            stats.distinct_plates = plates.len() as u64;
            stats.per_source = sources.into_iter().collect();
            Ok(stats)
        })
    }

    fn find_observations(
        &self,
        plate_pattern: &str,
        range: TimeRange,
        limit: usize,
    ) -> Result<Vec<StoredObservation>, StoreError> {
        let needle = plate_pattern.to_uppercase();
        self.with_state(|state| {
            let mut found: Vec<StoredObservation> = state
                .rows
                .iter()
                .filter(|(_, r)| {
                    range.contains(&r.timestamp) && r.plate_text.to_uppercase().contains(&needle)
                })
                .map(|(id, r)| StoredObservation {
                    id: *id,
                    record: r.clone(),
                })
                .collect();
            found.sort_by(|a, b| {
                b.record
                    .timestamp
                    .timestamp()
                    .cmp(&a.record.timestamp.timestamp())
                    .then(b.id.cmp(&a.id))
            });
            found.truncate(limit);
            Ok(found)
        })
    }

    fn hourly_counts(&self, range: TimeRange) -> Result<HourlyCounts, StoreError> {
        self.with_state(|state| {
            let mut counts = HourlyCounts::default();
            for (_, r) in state.rows.iter().filter(|(_, r)| range.contains(&r.timestamp)) {
                counts.add(r.timestamp.hour());
            }
            Ok(counts)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(text: &str, valid: bool, age_secs: i64) -> ObservationRecord {
        ObservationRecord {
            source_id: "cam-1".to_string(),
            plate_text: text.to_string(),
            artifact_path: format!("valid/{}/cam-1_x.jpg", text),
            detection_confidence: 0.9,
            recognition_confidence: 0.8,
            is_valid: valid,
            timestamp: Local::now() - chrono::Duration::seconds(age_secs),
        }
    }

    #[test]
    fn in_memory_store_counts_and_deletes() -> Result<(), StoreError> {
        let store = InMemoryPlateStore::new();
        store.insert_observation(&record("30A12345", true, 0))?;
        store.insert_observation(&record("30A12345", true, 10))?;
        store.insert_observation(&record("32345", false, 3 * 86_400))?;

        let stats = store.stats()?;
        assert_eq!(stats.total, 3);
        assert_eq!(stats.valid, 2);
        assert_eq!(stats.distinct_plates, 2);
        assert_eq!(stats.per_source, vec![("cam-1".to_string(), 3)]);

        let removed = store.delete_older_than(Duration::from_secs(86_400))?;
        assert_eq!(removed.len(), 1);
        let removed = store.delete_by_text("30A12345")?;
        assert_eq!(removed.len(), 2);
        assert_eq!(store.stats()?.total, 0);
        Ok(())
    }

    #[test]
    fn in_memory_lookup_filters_and_orders_newest_first() -> Result<(), StoreError> {
        let store = InMemoryPlateStore::new();
        store.insert_observation(&record("30A12345", true, 7200))?;
        store.insert_observation(&record("51G67890", true, 3600))?;
        store.insert_observation(&record("30A12845", true, 60))?;

        let found = store.find_observations("30a12", TimeRange::default(), 10)?;
        let plates: Vec<&str> = found.iter().map(|f| f.record.plate_text.as_str()).collect();
        assert_eq!(plates, vec!["30A12845", "30A12345"]);

        let recent = TimeRange::new(Some(Local::now() - chrono::Duration::seconds(5000)), None);
        assert_eq!(store.find_observations("", recent, 10)?.len(), 2);
        assert_eq!(store.find_observations("", TimeRange::default(), 1)?.len(), 1);
        assert_eq!(store.hourly_counts(TimeRange::default())?.total(), 3);
        Ok(())
    }

    #[test]
    fn peak_hour_prefers_earlier_hour_on_ties() {
        let mut counts = HourlyCounts::default();
        assert_eq!(counts.peak_hour(), None);
        counts.add(17);
        counts.add(8);
        counts.add(17);
        counts.add(8);
        counts.add(24);
        assert_eq!(counts.peak_hour(), Some((8, 2)));
        assert_eq!(counts.total(), 4);
    }

    #[test]
    fn like_metacharacters_are_escaped() {
        assert_eq!(escape_like("30A_1%"), "30A\\_1\\%");
    }

    #[test]
    fn unreachable_store_fails_every_call() {
        let store = InMemoryPlateStore::new();
        store.set_unreachable(true);
        assert!(store.ping().is_err());
        assert!(store.insert_observation(&record("30A12345", true, 0)).is_err());
        assert_eq!(store.insert_calls(), 1);
        assert!(store.records().is_empty());
    }
}
