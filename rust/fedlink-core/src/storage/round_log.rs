use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::{Local, NaiveDateTime, SubsecRound};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, info};

use super::{StagedFile, StorageError};
use crate::common::RoundNumber;

/// The header row of the round log.
pub const LOG_HEADER: [&str; 6] = [
    "timestamp",
    "round",
    "epoch",
    "train_loss",
    "val_loss",
    "val_metric",
];

const ROUND_COLUMN: usize = 1;

/// One row of the round log: the metrics of a single local epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundLogEntry {
    #[serde(with = "timestamp")]
    pub timestamp: NaiveDateTime,
    pub round: RoundNumber,
    pub epoch: u32,
    #[serde(serialize_with = "four_decimals")]
    pub train_loss: f64,
    #[serde(serialize_with = "four_decimals")]
    pub val_loss: f64,
    #[serde(serialize_with = "four_decimals")]
    pub val_metric: f64,
}

/// The metrics of the last logged epoch of a round.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundSummary {
    pub round: RoundNumber,
    pub epochs: usize,
    pub last: RoundLogEntry,
}

mod timestamp {
    use chrono::NaiveDateTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&value.format(FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, FORMAT).map_err(de::Error::custom)
    }
}

fn four_decimals<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{:.4}", value))
}

/// An append-only CSV history of per-epoch metrics, grouped by round.
///
/// Rows of a round that did not complete are removed by [`RoundLog::rollback`], so the log only
/// ever tells the story of rounds that are either in progress or were handed to the server.
#[derive(Debug, Clone)]
pub struct RoundLog {
    path: PathBuf,
}

impl RoundLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the log with only its header row. An existing log is left untouched.
    ///
    /// Returns `true` if the log was created.
    pub fn initialize(&self) -> Result<bool, StorageError> {
        if self.path.exists() {
            return Ok(false);
        }
        self.rewrite(&[])?;
        info!("created round log {}", self.path.display());
        Ok(true)
    }

    /// Append the metrics of one epoch, timestamped with the local wall clock.
    pub fn append(
        &self,
        round: RoundNumber,
        epoch: u32,
        train_loss: f64,
        val_loss: f64,
        val_metric: f64,
    ) -> Result<RoundLogEntry, StorageError> {
        self.initialize()?;
        let entry = RoundLogEntry {
            timestamp: Local::now().naive_local().trunc_subsecs(0),
            round,
            epoch,
            train_loss,
            val_loss,
            val_metric,
        };

        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| StorageError::io(&self.path, e))?;
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        writer
            .serialize(&entry)
            .map_err(|e| StorageError::csv(&self.path, e))?;
        writer.flush().map_err(|e| StorageError::io(&self.path, e))?;
        Ok(entry)
    }

    /// Remove every row of `round` and keep all other rows in their original order.
    ///
    /// Returns the number of removed rows. Rolling back a round without rows is a no-op, and a
    /// missing log is created empty.
    pub fn rollback(&self, round: RoundNumber) -> Result<usize, StorageError> {
        if self.initialize()? {
            return Ok(0);
        }

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(&self.path)
            .map_err(|e| StorageError::csv(&self.path, e))?;
        let mut kept = Vec::new();
        let mut removed = 0;
        for record in reader.records() {
            let record = record.map_err(|e| StorageError::csv(&self.path, e))?;
            if record_round(&record) == Some(round) {
                removed += 1;
            } else {
                kept.push(record);
            }
        }

        if removed > 0 {
            self.rewrite(&kept)?;
        }
        debug!("rolled back {} rows of round {}", removed, round);
        Ok(removed)
    }

    /// All rows in file order. A missing log has no rows.
    pub fn read_all(&self) -> Result<Vec<RoundLogEntry>, StorageError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(&self.path)
            .map_err(|e| StorageError::csv(&self.path, e))?;
        reader
            .deserialize()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::csv(&self.path, e))
    }

    /// The most recently logged epoch.
    pub fn latest(&self) -> Result<Option<RoundLogEntry>, StorageError> {
        Ok(self.read_all()?.pop())
    }

    /// One summary per logged round, in order of first appearance.
    pub fn rounds(&self) -> Result<Vec<RoundSummary>, StorageError> {
        let mut summaries: Vec<RoundSummary> = Vec::new();
        for entry in self.read_all()? {
            match summaries.iter_mut().find(|s| s.round == entry.round) {
                Some(summary) => {
                    summary.epochs += 1;
                    summary.last = entry;
                }
                None => summaries.push(RoundSummary {
                    round: entry.round,
                    epochs: 1,
                    last: entry,
                }),
            }
        }
        Ok(summaries)
    }

    fn rewrite(&self, records: &[StringRecord]) -> Result<(), StorageError> {
        let mut staged = StagedFile::new(&self.path)?;
        {
            let mut writer = WriterBuilder::new().from_writer(&mut staged);
            writer
                .write_record(&LOG_HEADER)
                .map_err(|e| StorageError::csv(&self.path, e))?;
            for record in records {
                writer
                    .write_record(record)
                    .map_err(|e| StorageError::csv(&self.path, e))?;
            }
            writer.flush().map_err(|e| StorageError::io(&self.path, e))?;
        }
        staged.flush().map_err(|e| StorageError::io(&self.path, e))?;
        staged.commit().map(|_| ())
    }
}

fn record_round(record: &StringRecord) -> Option<RoundNumber> {
    record.get(ROUND_COLUMN)?.trim().parse().ok()
}
