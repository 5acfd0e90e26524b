//! Parquet bar store with Hive-style partitioning.
//!
//! Layout: `{root}/{timeframe}_prices/instrument={SYMBOL}/bars.parquet`
//!
//! Features:
//! - Atomic writes (write to .tmp, rename into place)
//! - Upsert or append against what is already stored
//! - Schema validation on load
//! - Quarantine for corrupt files (`bars.parquet.quarantined`)
//! - Metadata sidecar per partition (hash, date range, ingestion time)

use super::{check_timeframe, merge_records, BarSink, SinkError, WriteMode};
use crate::data::frame::{days_since_epoch, epoch};
use crate::domain::{ResampledBar, Timeframe};
use crate::schema;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use polars::prelude::{Column, DataFrame, DataType, ParquetReader, ParquetWriter, PolarsError, SerReader};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const DATA_FILE: &str = "bars.parquet";
const META_FILE: &str = "meta.json";
const PARTITION_PREFIX: &str = "instrument=";

/// Metadata sidecar for one (timeframe, instrument) partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionMeta {
    pub instrument: String,
    pub timeframe: Timeframe,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub row_count: usize,
    pub data_hash: String,
    pub ingested_at: DateTime<Utc>,
}

/// One partition found on disk. `meta` is `None` when the sidecar is missing
/// or unreadable.
#[derive(Debug, Clone, Serialize)]
pub struct PartitionStatus {
    pub timeframe: Timeframe,
    pub instrument: String,
    pub meta: Option<PartitionMeta>,
}

/// The Parquet store.
#[derive(Debug, Clone)]
pub struct ParquetStore {
    root: PathBuf,
    mode: WriteMode,
}

impl ParquetStore {
    pub fn new(root: impl Into<PathBuf>, mode: WriteMode) -> Self {
        Self {
            root: root.into(),
            mode,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    /// `{root}/{timeframe}_prices/instrument={SYMBOL}/`
    fn partition_dir(&self, timeframe: Timeframe, instrument: &str) -> PathBuf {
        self.root
            .join(timeframe.destination())
            .join(format!("{PARTITION_PREFIX}{instrument}"))
    }

    fn data_path(&self, timeframe: Timeframe, instrument: &str) -> PathBuf {
        self.partition_dir(timeframe, instrument).join(DATA_FILE)
    }

    fn meta_path(&self, timeframe: Timeframe, instrument: &str) -> PathBuf {
        self.partition_dir(timeframe, instrument).join(META_FILE)
    }

    /// Load every stored record of one partition, sorted by date.
    ///
    /// A missing partition is empty. A file that cannot be read surfaces as
    /// [`SinkError::Io`] and stays in place; one that reads but fails to parse
    /// or validate is quarantined and treated as empty.
    pub fn load(&self, timeframe: Timeframe, instrument: &str) -> Result<Vec<ResampledBar>, SinkError> {
        let path = self.data_path(timeframe, instrument);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let bytes = fs::read(&path).map_err(|source| SinkError::Io {
            path: path.clone(),
            source,
        })?;

        match parse_and_validate_parquet(bytes) {
            Ok(mut records) => {
                records.sort_by_key(|r| r.date);
                Ok(records)
            }
            Err(e) => {
                let quarantine = path.with_extension("parquet.quarantined");
                warn!(
                    path = %path.display(),
                    error = %e,
                    "quarantining corrupt store file"
                );
                fs::rename(&path, &quarantine).map_err(|source| SinkError::Io {
                    path: path.clone(),
                    source,
                })?;
                Ok(Vec::new())
            }
        }
    }

    /// Read the metadata sidecar of a partition.
    pub fn get_meta(&self, timeframe: Timeframe, instrument: &str) -> Option<PartitionMeta> {
        let content = fs::read_to_string(self.meta_path(timeframe, instrument)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Every partition under the root, ordered by timeframe then instrument.
    pub fn status(&self) -> Result<Vec<PartitionStatus>, SinkError> {
        let mut out = Vec::new();
        if !self.root.exists() {
            return Ok(out);
        }

        for timeframe in Timeframe::ALL {
            let dir = self.root.join(timeframe.destination());
            if !dir.is_dir() {
                continue;
            }
            let mut instruments: Vec<String> = read_dir(&dir)?
                .into_iter()
                .filter_map(|name| name.strip_prefix(PARTITION_PREFIX).map(str::to_string))
                .collect();
            instruments.sort();

            for instrument in instruments {
                let meta = self.get_meta(timeframe, &instrument);
                out.push(PartitionStatus {
                    timeframe,
                    instrument,
                    meta,
                });
            }
        }
        Ok(out)
    }

    /// Replace one partition's contents atomically and refresh its sidecar.
    fn write_partition(
        &self,
        timeframe: Timeframe,
        instrument: &str,
        records: &[ResampledBar],
    ) -> Result<(), SinkError> {
        let (Some(first), Some(last)) = (records.first(), records.last()) else {
            return Ok(());
        };

        let dir = self.partition_dir(timeframe, instrument);
        fs::create_dir_all(&dir).map_err(|source| SinkError::Io {
            path: dir.clone(),
            source,
        })?;

        let df = records_to_frame(records)?;
        let path = dir.join(DATA_FILE);
        let tmp_path = path.with_extension("parquet.tmp");
        write_parquet(&df, &tmp_path)?;
        fs::rename(&tmp_path, &path).map_err(|source| {
            let _ = fs::remove_file(&tmp_path);
            SinkError::Io {
                path: path.clone(),
                source,
            }
        })?;

        let meta = PartitionMeta {
            instrument: instrument.to_string(),
            timeframe,
            start_date: first.date,
            end_date: last.date,
            row_count: records.len(),
            data_hash: blake3::hash(
                &serde_json::to_vec(records)
                    .map_err(|e| SinkError::Metadata(format!("hash serialization: {e}")))?,
            )
            .to_hex()
            .to_string(),
            ingested_at: records
                .iter()
                .map(|r| r.ingested_at)
                .max()
                .unwrap_or(last.ingested_at),
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| SinkError::Metadata(format!("meta serialization: {e}")))?;
        let meta_path = dir.join(META_FILE);
        fs::write(&meta_path, meta_json).map_err(|source| SinkError::Io {
            path: meta_path,
            source,
        })?;

        debug!(
            timeframe = %timeframe,
            instrument,
            rows = records.len(),
            "partition written"
        );
        Ok(())
    }
}

impl BarSink for ParquetStore {
    fn write(&self, timeframe: Timeframe, records: Vec<ResampledBar>) -> Result<usize, SinkError> {
        check_timeframe(timeframe, &records)?;
        if records.is_empty() {
            return Ok(0);
        }
        let written = records.len();

        let mut by_instrument: BTreeMap<String, Vec<ResampledBar>> = BTreeMap::new();
        for record in records {
            by_instrument
                .entry(record.instrument.clone())
                .or_default()
                .push(record);
        }

        for (instrument, incoming) in by_instrument {
            let existing = self.load(timeframe, &instrument)?;
            let mut merged = merge_records(existing, incoming, self.mode);
            merged.sort_by_key(|r| r.date);
            self.write_partition(timeframe, &instrument, &merged)?;
        }

        Ok(written)
    }
}

fn read_dir(dir: &Path) -> Result<Vec<String>, SinkError> {
    let io_err = |source: std::io::Error| SinkError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        if entry.path().is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(names)
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn parquet_err(context: &str) -> impl Fn(PolarsError) -> SinkError + '_ {
    move |e| SinkError::Parquet(format!("{context}: {e}"))
}

/// Convert records to a frame laid out per [`schema::STORE_SCHEMA`].
fn records_to_frame(records: &[ResampledBar]) -> Result<DataFrame, SinkError> {
    let instruments: Vec<&str> = records.iter().map(|r| r.instrument.as_str()).collect();
    let timeframes: Vec<&str> = records.iter().map(|r| r.timeframe.as_str()).collect();
    let dates: Vec<i32> = records.iter().map(|r| days_since_epoch(r.date)).collect();
    let opens: Vec<f64> = records.iter().map(|r| r.open).collect();
    let highs: Vec<f64> = records.iter().map(|r| r.high).collect();
    let lows: Vec<f64> = records.iter().map(|r| r.low).collect();
    let closes: Vec<f64> = records.iter().map(|r| r.close).collect();
    let volumes: Vec<u64> = records.iter().map(|r| r.volume).collect();
    let adjusted: Vec<Option<f64>> = records.iter().map(|r| r.adjusted_close).collect();
    let labels: Vec<Option<&str>> = records.iter().map(|r| r.period_label.as_deref()).collect();
    let ingested: Vec<i64> = records.iter().map(|r| r.ingested_at.timestamp_micros()).collect();

    DataFrame::new(vec![
        Column::new("instrument".into(), instruments),
        Column::new("timeframe".into(), timeframes),
        Column::new("date".into(), dates)
            .cast(&DataType::Date)
            .map_err(parquet_err("date cast"))?,
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("volume".into(), volumes),
        Column::new("adjusted_close".into(), adjusted),
        Column::new("period_label".into(), labels),
        Column::new("ingested_at".into(), ingested),
    ])
    .map_err(parquet_err("dataframe creation"))
}

fn write_parquet(df: &DataFrame, path: &Path) -> Result<(), SinkError> {
    let file = fs::File::create(path).map_err(|source| SinkError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    ParquetWriter::new(file)
        .finish(&mut df.clone())
        .map_err(parquet_err("write parquet"))?;
    Ok(())
}

fn parse_and_validate_parquet(bytes: Vec<u8>) -> Result<Vec<ResampledBar>, SinkError> {
    let df = ParquetReader::new(Cursor::new(bytes))
        .finish()
        .map_err(parquet_err("read"))?;

    let validation = schema::validate_frame(&df);
    if !validation.is_valid {
        return Err(SinkError::Parquet(format!(
            "schema validation failed: {}",
            validation.errors.join("; ")
        )));
    }

    frame_to_records(&df)
}

fn frame_to_records(df: &DataFrame) -> Result<Vec<ResampledBar>, SinkError> {
    let col = |name: &str| df.column(name).map_err(parquet_err("column read"));

    let date_phys = col("date")?.cast(&DataType::Int32).map_err(parquet_err("date cast"))?;
    let date_ca = date_phys.i32().map_err(parquet_err("date column type"))?;
    let inst_ca = col("instrument")?.str().map_err(parquet_err("instrument column type"))?;
    let tf_ca = col("timeframe")?.str().map_err(parquet_err("timeframe column type"))?;
    let open_ca = col("open")?.f64().map_err(parquet_err("open column type"))?;
    let high_ca = col("high")?.f64().map_err(parquet_err("high column type"))?;
    let low_ca = col("low")?.f64().map_err(parquet_err("low column type"))?;
    let close_ca = col("close")?.f64().map_err(parquet_err("close column type"))?;
    let vol_ca = col("volume")?.u64().map_err(parquet_err("volume column type"))?;
    let adj_ca = col("adjusted_close")?
        .f64()
        .map_err(parquet_err("adjusted_close column type"))?;
    let label_ca = col("period_label")?
        .str()
        .map_err(parquet_err("period_label column type"))?;
    let ing_ca = col("ingested_at")?.i64().map_err(parquet_err("ingested_at column type"))?;

    let epoch = epoch();
    let mut records = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let null = |column: &str| SinkError::Parquet(format!("null {column} at row {i}"));

        let days = date_ca.get(i).ok_or_else(|| null("date"))?;
        let timeframe = tf_ca
            .get(i)
            .ok_or_else(|| null("timeframe"))?
            .parse::<Timeframe>()
            .map_err(|e| SinkError::Parquet(e.to_string()))?;
        let micros = ing_ca.get(i).ok_or_else(|| null("ingested_at"))?;
        let ingested_at = DateTime::<Utc>::from_timestamp_micros(micros)
            .ok_or_else(|| SinkError::Parquet(format!("ingested_at out of range at row {i}")))?;

        records.push(ResampledBar {
            instrument: inst_ca.get(i).ok_or_else(|| null("instrument"))?.to_string(),
            timeframe,
            date: epoch + Duration::days(i64::from(days)),
            open: open_ca.get(i).unwrap_or(f64::NAN),
            high: high_ca.get(i).unwrap_or(f64::NAN),
            low: low_ca.get(i).unwrap_or(f64::NAN),
            close: close_ca.get(i).unwrap_or(f64::NAN),
            volume: vol_ca.get(i).unwrap_or(0),
            adjusted_close: adj_ca.get(i),
            period_label: label_ca.get(i).map(str::to_string),
            ingested_at,
        });
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::test_support::record;

    #[test]
    fn write_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path(), WriteMode::Upsert);

        let mut three_year = record("BBRI.JK", Timeframe::ThreeYear, 1, 5.0);
        three_year.period_label = Some("2022-2024".into());
        three_year.adjusted_close = None;

        assert_eq!(store.write(Timeframe::ThreeYear, vec![three_year.clone()]).unwrap(), 1);
        let loaded = store.load(Timeframe::ThreeYear, "BBRI.JK").unwrap();
        assert_eq!(loaded, vec![three_year]);

        assert!(dir
            .path()
            .join("3year_prices/instrument=BBRI.JK/bars.parquet")
            .exists());
    }

    #[test]
    fn upsert_rerun_does_not_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path(), WriteMode::Upsert);
        let batch = vec![
            record("TLKM.JK", Timeframe::Daily, 2, 1.0),
            record("TLKM.JK", Timeframe::Daily, 3, 2.0),
        ];

        store.write(Timeframe::Daily, batch.clone()).unwrap();
        store.write(Timeframe::Daily, batch).unwrap();

        assert_eq!(store.load(Timeframe::Daily, "TLKM.JK").unwrap().len(), 2);
        assert_eq!(store.get_meta(Timeframe::Daily, "TLKM.JK").unwrap().row_count, 2);
    }

    #[test]
    fn append_rerun_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path(), WriteMode::Append);
        let batch = vec![record("TLKM.JK", Timeframe::Daily, 2, 1.0)];

        store.write(Timeframe::Daily, batch.clone()).unwrap();
        store.write(Timeframe::Daily, batch).unwrap();

        assert_eq!(store.load(Timeframe::Daily, "TLKM.JK").unwrap().len(), 2);
    }

    #[test]
    fn meta_sidecar_describes_partition() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path(), WriteMode::Upsert);
        store
            .write(
                Timeframe::Weekly,
                vec![
                    record("ASII.JK", Timeframe::Weekly, 15, 3.0),
                    record("ASII.JK", Timeframe::Weekly, 8, 2.0),
                ],
            )
            .unwrap();

        let meta = store.get_meta(Timeframe::Weekly, "ASII.JK").unwrap();
        assert_eq!(meta.instrument, "ASII.JK");
        assert_eq!(meta.row_count, 2);
        assert_eq!(meta.start_date, NaiveDate::from_ymd_opt(2024, 1, 8).unwrap());
        assert_eq!(meta.end_date, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        assert_eq!(meta.data_hash.len(), 64);
    }

    #[test]
    fn corrupt_file_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path(), WriteMode::Upsert);
        let partition = dir.path().join("monthly_prices/instrument=BMRI.JK");
        fs::create_dir_all(&partition).unwrap();
        fs::write(partition.join("bars.parquet"), b"not parquet").unwrap();

        let written = store
            .write(Timeframe::Monthly, vec![record("BMRI.JK", Timeframe::Monthly, 1, 4.0)])
            .unwrap();

        assert_eq!(written, 1);
        assert!(partition.join("bars.parquet.quarantined").exists());
        assert_eq!(store.load(Timeframe::Monthly, "BMRI.JK").unwrap().len(), 1);
    }

    #[test]
    fn unreadable_file_is_an_error_not_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path(), WriteMode::Append);
        // A directory where the data file should be: it exists but cannot be read.
        let partition = dir.path().join("daily_prices/instrument=BBCA.JK");
        fs::create_dir_all(partition.join("bars.parquet")).unwrap();

        let err = store.load(Timeframe::Daily, "BBCA.JK").unwrap_err();
        assert!(matches!(err, SinkError::Io { .. }), "got {err:?}");

        let err = store
            .write(Timeframe::Daily, vec![record("BBCA.JK", Timeframe::Daily, 2, 1.0)])
            .unwrap_err();
        assert!(matches!(err, SinkError::Io { .. }), "got {err:?}");
        assert!(partition.join("bars.parquet").is_dir());
        assert!(!partition.join("bars.parquet.quarantined").exists());
    }

    #[test]
    fn file_with_wrong_schema_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path(), WriteMode::Append);
        let partition = dir.path().join("weekly_prices/instrument=UNVR.JK");
        fs::create_dir_all(&partition).unwrap();
        let mut df = DataFrame::new(vec![Column::new("close".into(), vec![1.0, 2.0])]).unwrap();
        ParquetWriter::new(fs::File::create(partition.join("bars.parquet")).unwrap())
            .finish(&mut df)
            .unwrap();

        assert!(store.load(Timeframe::Weekly, "UNVR.JK").unwrap().is_empty());
        assert!(partition.join("bars.parquet.quarantined").exists());
        assert!(!partition.join("bars.parquet").exists());
    }

    #[test]
    fn status_lists_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path(), WriteMode::Upsert);
        store
            .write(Timeframe::Daily, vec![record("B", Timeframe::Daily, 2, 1.0)])
            .unwrap();
        store
            .write(Timeframe::Daily, vec![record("A", Timeframe::Daily, 2, 1.0)])
            .unwrap();
        store
            .write(Timeframe::Yearly, vec![record("A", Timeframe::Yearly, 1, 1.0)])
            .unwrap();

        let status = store.status().unwrap();
        let keys: Vec<(Timeframe, &str)> = status
            .iter()
            .map(|s| (s.timeframe, s.instrument.as_str()))
            .collect();
        assert_eq!(
            keys,
            vec![
                (Timeframe::Daily, "A"),
                (Timeframe::Daily, "B"),
                (Timeframe::Yearly, "A"),
            ]
        );
        assert!(status.iter().all(|s| s.meta.is_some()));
    }

    #[test]
    fn status_of_missing_root_is_empty() {
        let store = ParquetStore::new("/nonexistent/candlefold/store", WriteMode::Upsert);
        assert!(store.status().unwrap().is_empty());
    }
}
