// =============================================================================
// Record Store — ordered, timestamp-keyed ledger of indicator rows
// =============================================================================
//
// The store is a passive ledger: it never recomputes indicators. It supports
// a one-off full replace (bootstrap), single-row appends (incremental
// updates) and reads of the trailing window.
//
// On disk the rows live in a flat CSV table with a stable header, and the
// indicator carry state lives in a JSON sidecar next to it. Both files are
// written with a tmp + rename so a crash mid-write never leaves a torn file.
// A sidecar whose timestamp does not match the table's last row is ignored on
// load; the updater then falls back to replaying the stored bars.
// =============================================================================

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ForecastError, ForecastResult};
use crate::indicators::IndicatorState;
use crate::types::IndicatorRow;

/// On-disk row layout. Column names match the table the model was trained on.
#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    date: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
    #[serde(rename = "MACD")]
    macd: f64,
    #[serde(rename = "Signal")]
    signal: f64,
    #[serde(rename = "Histogram")]
    histogram: f64,
    #[serde(rename = "RSI")]
    rsi: f64,
    #[serde(rename = "EMA 30")]
    ema_30: f64,
    #[serde(rename = "EMA 120")]
    ema_120: f64,
}

impl From<&IndicatorRow> for CsvRow {
    fn from(r: &IndicatorRow) -> Self {
        Self {
            date: r.timestamp,
            open: r.open,
            high: r.high,
            low: r.low,
            close: r.close,
            volume: r.volume,
            macd: r.macd,
            signal: r.signal,
            histogram: r.histogram,
            rsi: r.rsi,
            ema_30: r.ema_30,
            ema_120: r.ema_120,
        }
    }
}

impl From<CsvRow> for IndicatorRow {
    fn from(r: CsvRow) -> Self {
        Self {
            timestamp: r.date,
            open: r.open,
            high: r.high,
            low: r.low,
            close: r.close,
            volume: r.volume,
            macd: r.macd,
            signal: r.signal,
            histogram: r.histogram,
            rsi: r.rsi,
            ema_30: r.ema_30,
            ema_120: r.ema_120,
        }
    }
}

#[derive(Debug, Default)]
pub struct RecordStore {
    path: Option<PathBuf>,
    rows: Vec<IndicatorRow>,
    carry: Option<IndicatorState>,
}

impl RecordStore {
    /// A store that lives only in memory. Used by tests and dry runs.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open the table at `path`. A missing file yields an empty store that
    /// will be created on the first write.
    pub fn open(path: impl AsRef<Path>) -> ForecastResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            info!(path = %path.display(), "record store not found, starting empty");
            return Ok(Self {
                path: Some(path),
                ..Self::default()
            });
        }

        let mut reader = csv::Reader::from_path(&path).map_err(ForecastError::store)?;
        let mut rows = Vec::new();
        for record in reader.deserialize::<CsvRow>() {
            rows.push(IndicatorRow::from(record.map_err(ForecastError::store)?));
        }
        validate_sequence(&rows)?;

        let carry = load_carry(&state_path(&path), rows.last());
        info!(
            path = %path.display(),
            rows = rows.len(),
            has_carry_state = carry.is_some(),
            "record store loaded"
        );

        Ok(Self {
            path: Some(path),
            rows,
            carry,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[IndicatorRow] {
        &self.rows
    }

    pub fn latest(&self) -> Option<&IndicatorRow> {
        self.rows.last()
    }

    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.rows.last().map(|r| r.timestamp)
    }

    /// Look up a stored row by its exact timestamp.
    pub fn get(&self, timestamp: DateTime<Utc>) -> Option<&IndicatorRow> {
        self.rows
            .binary_search_by(|r| r.timestamp.cmp(&timestamp))
            .ok()
            .map(|i| &self.rows[i])
    }

    /// The trailing `n` rows in ascending timestamp order (fewer if the store
    /// is shorter).
    pub fn last_rows(&self, n: usize) -> &[IndicatorRow] {
        let start = self.rows.len().saturating_sub(n);
        &self.rows[start..]
    }

    /// Indicator carry state after the last row, when known.
    pub fn carry(&self) -> Option<&IndicatorState> {
        self.carry.as_ref()
    }

    /// Replace the whole table. Only the bootstrapper calls this.
    pub fn replace(
        &mut self,
        rows: Vec<IndicatorRow>,
        carry: Option<IndicatorState>,
    ) -> ForecastResult<()> {
        validate_sequence(&rows)?;
        let carry = carry.filter(|c| c.last_timestamp() == rows.last().map(|r| r.timestamp));
        self.persist(&rows, carry.as_ref())?;

        info!(rows = rows.len(), "record store replaced");
        self.rows = rows;
        self.carry = carry;
        Ok(())
    }

    /// Append one row strictly after the current latest timestamp.
    ///
    /// Prior rows are never touched. On error nothing is persisted and the
    /// in-memory table is unchanged.
    pub fn append(
        &mut self,
        row: IndicatorRow,
        carry: Option<IndicatorState>,
    ) -> ForecastResult<()> {
        if let Some(latest) = self.latest_timestamp() {
            if row.timestamp <= latest {
                return Err(ForecastError::OutOfOrderTimestamp {
                    incoming: row.timestamp,
                    latest,
                });
            }
        }
        if !row.is_complete() {
            return Err(ForecastError::store(format!(
                "refusing to append incomplete row at {}",
                row.timestamp
            )));
        }

        let carry = carry.filter(|c| c.last_timestamp() == Some(row.timestamp));
        self.rows.push(row);
        if let Err(e) = self.persist(&self.rows, carry.as_ref()) {
            self.rows.pop();
            return Err(e);
        }

        debug!(timestamp = %row.timestamp, rows = self.rows.len(), "row appended");
        self.carry = carry;
        Ok(())
    }

    fn persist(&self, rows: &[IndicatorRow], carry: Option<&IndicatorState>) -> ForecastResult<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(ForecastError::store)?;
        }

        let tmp_path = path.with_extension("csv.tmp");
        let sidecar = state_path(path);
        let tmp_sidecar = sidecar.with_extension("json.tmp");

        // Both files are staged before either is swapped in. The table is
        // renamed last; a crash between the two renames leaves a sidecar
        // whose timestamp no longer matches and is ignored on load.
        let staged = write_csv(&tmp_path, rows).and_then(|()| match carry {
            Some(state) => {
                let content = serde_json::to_string(state).map_err(ForecastError::store)?;
                std::fs::write(&tmp_sidecar, content).map_err(ForecastError::store)
            }
            None => Ok(()),
        });
        if let Err(e) = staged {
            let _ = std::fs::remove_file(&tmp_path);
            let _ = std::fs::remove_file(&tmp_sidecar);
            return Err(e);
        }

        let swapped = match carry {
            Some(_) => std::fs::rename(&tmp_sidecar, &sidecar),
            None if sidecar.exists() => std::fs::remove_file(&sidecar),
            None => Ok(()),
        };
        if let Err(e) = swapped {
            let _ = std::fs::remove_file(&tmp_path);
            let _ = std::fs::remove_file(&tmp_sidecar);
            return Err(ForecastError::store(e));
        }

        std::fs::rename(&tmp_path, path).map_err(ForecastError::store)
    }
}

fn write_csv(path: &Path, rows: &[IndicatorRow]) -> ForecastResult<()> {
    let mut writer = csv::Writer::from_path(path).map_err(ForecastError::store)?;
    for row in rows {
        writer
            .serialize(CsvRow::from(row))
            .map_err(ForecastError::store)?;
    }
    writer.flush().map_err(ForecastError::store)
}

/// Sidecar path holding the indicator carry state for the table at `path`.
pub fn state_path(path: &Path) -> PathBuf {
    path.with_extension("state.json")
}

fn load_carry(path: &Path, last_row: Option<&IndicatorRow>) -> Option<IndicatorState> {
    if !path.exists() {
        return None;
    }
    let state: IndicatorState = match std::fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|s| serde_json::from_str(&s).map_err(|e| e.to_string()))
    {
        Ok(state) => state,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable indicator state");
            return None;
        }
    };

    if state.last_timestamp() != last_row.map(|r| r.timestamp) {
        warn!(
            path = %path.display(),
            state_at = ?state.last_timestamp(),
            table_at = ?last_row.map(|r| r.timestamp),
            "indicator state does not match the table, ignoring it"
        );
        return None;
    }
    Some(state)
}

fn validate_sequence(rows: &[IndicatorRow]) -> ForecastResult<()> {
    for pair in rows.windows(2) {
        if pair[1].timestamp <= pair[0].timestamp {
            return Err(ForecastError::OutOfOrderTimestamp {
                incoming: pair[1].timestamp,
                latest: pair[0].timestamp,
            });
        }
    }
    if let Some(bad) = rows.iter().find(|r| !r.is_complete()) {
        return Err(ForecastError::store(format!(
            "row at {} has undefined values",
            bad.timestamp
        )));
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::compute_with_state;
    use crate::indicators::testing::synthetic_bars;

    fn temp_table(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("fx-store-{}-{name}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("forex_data.csv")
    }

    fn rows_and_state(n: usize) -> (Vec<IndicatorRow>, IndicatorState) {
        compute_with_state(&synthetic_bars(n)).unwrap()
    }

    #[test]
    fn append_rejects_duplicate_and_older_timestamps() {
        let (rows, _) = rows_and_state(40);
        let mut store = RecordStore::in_memory();
        store.replace(rows[..20].to_vec(), None).unwrap();

        let dup = store.append(rows[19], None).unwrap_err();
        assert_eq!(dup.kind(), "OutOfOrderTimestamp");
        let older = store.append(rows[3], None).unwrap_err();
        assert_eq!(older.kind(), "OutOfOrderTimestamp");
        assert_eq!(store.len(), 20);

        store.append(rows[20], None).unwrap();
        assert_eq!(store.len(), 21);
    }

    #[test]
    fn replace_rejects_unordered_rows() {
        let (mut rows, _) = rows_and_state(30);
        rows.swap(3, 4);
        let mut store = RecordStore::in_memory();
        assert!(store.replace(rows, None).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn append_rejects_incomplete_row() {
        let (rows, _) = rows_and_state(30);
        let mut store = RecordStore::in_memory();
        store.replace(rows[..10].to_vec(), None).unwrap();
        let mut bad = rows[10];
        bad.rsi = f64::NAN;
        assert!(store.append(bad, None).is_err());
        assert_eq!(store.len(), 10);
    }

    #[test]
    fn last_rows_and_lookup() {
        let (rows, _) = rows_and_state(100);
        let mut store = RecordStore::in_memory();
        store.replace(rows.clone(), None).unwrap();

        let tail = store.last_rows(60);
        assert_eq!(tail.len(), 60);
        assert_eq!(tail.last(), rows.last());
        assert_eq!(store.last_rows(500).len(), rows.len());
        assert_eq!(store.get(rows[7].timestamp), Some(&rows[7]));
    }

    #[test]
    fn carry_state_must_match_last_row() {
        let (rows, state) = rows_and_state(50);
        let mut store = RecordStore::in_memory();
        store.replace(rows[..30].to_vec(), Some(state.clone())).unwrap();
        assert!(store.carry().is_none());

        store.replace(rows.clone(), Some(state)).unwrap();
        assert!(store.carry().is_some());
    }

    #[test]
    fn persisted_table_round_trips() {
        let path = temp_table("roundtrip");
        let (rows, state) = rows_and_state(80);
        {
            let mut store = RecordStore::open(&path).unwrap();
            assert!(store.is_empty());
            store.replace(rows.clone(), Some(state.clone())).unwrap();
        }

        let reopened = RecordStore::open(&path).unwrap();
        assert_eq!(reopened.rows(), rows.as_slice());
        assert_eq!(reopened.carry(), Some(&state));

        let header = std::fs::read_to_string(&path).unwrap();
        assert!(header.starts_with(
            "date,open,high,low,close,volume,MACD,Signal,Histogram,RSI,EMA 30,EMA 120"
        ));
    }

    #[test]
    fn stale_sidecar_is_ignored_on_load() {
        let path = temp_table("stale");
        let (rows, _) = rows_and_state(60);
        let (_, older_state) = rows_and_state(40);
        {
            let mut store = RecordStore::open(&path).unwrap();
            store.replace(rows, None).unwrap();
        }
        std::fs::write(state_path(&path), serde_json::to_string(&older_state).unwrap()).unwrap();

        let reopened = RecordStore::open(&path).unwrap();
        assert_eq!(reopened.len(), 60 - 14);
        assert!(reopened.carry().is_none());
    }

    #[test]
    fn failed_append_leaves_disk_and_memory_unchanged() {
        let path = temp_table("failed-append");
        let (prefix, prefix_state) = rows_and_state(99);
        let (rows, state) = rows_and_state(100);
        let next = rows[rows.len() - 1];

        let mut store = RecordStore::open(&path).unwrap();
        store.replace(prefix.clone(), Some(prefix_state.clone())).unwrap();

        // A directory where the staged sidecar should go makes the write fail.
        let blocker = state_path(&path).with_extension("json.tmp");
        std::fs::create_dir_all(&blocker).unwrap();

        let err = store.append(next, Some(state.clone())).unwrap_err();
        assert_eq!(err.kind(), "Store");
        assert_eq!(store.len(), prefix.len());
        assert_eq!(store.carry(), Some(&prefix_state));

        let reopened = RecordStore::open(&path).unwrap();
        assert_eq!(reopened.rows(), prefix.as_slice());
        assert_eq!(reopened.carry(), Some(&prefix_state));
        assert!(!path.with_extension("csv.tmp").exists());

        std::fs::remove_dir(&blocker).unwrap();
        store.append(next, Some(state.clone())).unwrap();
        let reopened = RecordStore::open(&path).unwrap();
        assert_eq!(reopened.len(), prefix.len() + 1);
        assert_eq!(reopened.carry(), Some(&state));
    }
}
