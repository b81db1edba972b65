//! # Telemetry Module
//!
//! Handles telemetry logging to JSONL files with rotation.
//!
//! This module handles:
//! - Receiving remapped sensor records from the session
//! - Formatting as JSONL (JSON Lines)
//! - Writing to rotating log files
//! - Managing file rotation (max N records per file)
//! - Retaining only last M files

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::afhds3::telemetry::{RemapTag, TelemetrySink};
use crate::config::TelemetryConfig;
use crate::error::{Afhds3Error, Result};

const FILE_PREFIX: &str = "telemetry_";
const FILE_SUFFIX: &str = ".jsonl";

/// One sensor record as written to the log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorLogEntry {
    pub timestamp: DateTime<Utc>,
    /// Record format, `"0xAA"` or `"0xAC"`
    pub tag: String,
    pub sensor_id: u8,
    pub instance: u8,
    /// Value bytes following id and instance
    pub data: Vec<u8>,
}

impl SensorLogEntry {
    pub fn new(record: &[u8], tag: RemapTag) -> Self {
        Self {
            timestamp: Utc::now(),
            tag: format!("0x{:02X}", tag as u8),
            sensor_id: record.first().copied().unwrap_or(0),
            instance: record.get(1).copied().unwrap_or(0),
            data: record.get(2..).unwrap_or(&[]).to_vec(),
        }
    }
}

/// Sensor sink writing one JSON line per record into rotating files
pub struct JsonlTelemetryLogger {
    dir: PathBuf,
    max_records_per_file: usize,
    max_files_to_keep: usize,
    writer: Option<BufWriter<File>>,
    /// Index of the file currently written
    file_index: u64,
    records_in_file: usize,
    records_written: u64,
}

impl std::fmt::Debug for JsonlTelemetryLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlTelemetryLogger")
            .field("dir", &self.dir)
            .field("file_index", &self.file_index)
            .field("records_written", &self.records_written)
            .finish_non_exhaustive()
    }
}

impl JsonlTelemetryLogger {
    /// Create a logger from the `[telemetry]` configuration
    ///
    /// # Errors
    ///
    /// Returns error if the log directory cannot be created or scanned
    pub fn from_config(config: &TelemetryConfig) -> Result<Self> {
        Self::new(
            &config.log_dir,
            config.max_records_per_file,
            config.max_files_to_keep,
        )
    }

    /// Create a logger writing into `dir`
    ///
    /// Numbering continues after the newest file already in `dir`; the first
    /// file is opened on the first record.
    ///
    /// # Arguments
    ///
    /// * `dir` - Log directory, created if missing
    /// * `max_records_per_file` - Records before rotating to a new file
    /// * `max_files_to_keep` - Files retained, oldest deleted first
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created or scanned
    pub fn new<P: AsRef<Path>>(
        dir: P,
        max_records_per_file: usize,
        max_files_to_keep: usize,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let last_index = log_files(&dir)?.last().map(|(index, _)| *index).unwrap_or(0);
        info!("Telemetry logging to {}", dir.display());

        Ok(Self {
            dir,
            max_records_per_file: max_records_per_file.max(1),
            max_files_to_keep: max_files_to_keep.max(1),
            writer: None,
            file_index: last_index,
            records_in_file: 0,
            records_written: 0,
        })
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Path of the file currently written, if one is open
    pub fn current_file(&self) -> Option<PathBuf> {
        self.writer
            .as_ref()
            .map(|_| file_path(&self.dir, self.file_index))
    }

    /// Append one sensor record
    ///
    /// # Errors
    ///
    /// Returns error if serialization or the file write fails
    pub fn write_record(&mut self, record: &[u8], tag: RemapTag) -> Result<()> {
        if self.writer.is_none() || self.records_in_file >= self.max_records_per_file {
            self.rotate()?;
        }

        let line = serde_json::to_string(&SensorLogEntry::new(record, tag))?;
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Afhds3Error::Telemetry("No telemetry file open".to_string()))?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;

        self.records_in_file += 1;
        self.records_written += 1;
        Ok(())
    }

    fn rotate(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }

        self.file_index += 1;
        let path = file_path(&self.dir, self.file_index);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!("Opened telemetry log {}", path.display());

        self.writer = Some(BufWriter::new(file));
        self.records_in_file = 0;
        self.prune()
    }

    /// Delete the oldest files beyond the retention limit
    fn prune(&self) -> Result<()> {
        let files = log_files(&self.dir)?;
        let excess = files.len().saturating_sub(self.max_files_to_keep);
        for (_, path) in files.into_iter().take(excess) {
            debug!("Removing old telemetry log {}", path.display());
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}

impl TelemetrySink for JsonlTelemetryLogger {
    fn deliver_sensor_record(&mut self, record: &[u8], tag: RemapTag) {
        if let Err(e) = self.write_record(record, tag) {
            warn!("Failed to log telemetry record: {}", e);
        }
    }
}

/// Sink used when telemetry logging is disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTelemetrySink;

impl TelemetrySink for NullTelemetrySink {
    fn deliver_sensor_record(&mut self, record: &[u8], tag: RemapTag) {
        trace!("Sensor record {:02X?} ({:?})", record, tag);
    }
}

/// Sensor sink selected by the `[telemetry]` configuration
///
/// # Errors
///
/// Returns error if logging is enabled and the log directory is unusable
pub fn open_sink(config: &TelemetryConfig) -> Result<Box<dyn TelemetrySink + Send>> {
    if config.enabled {
        Ok(Box::new(JsonlTelemetryLogger::from_config(config)?))
    } else {
        info!("Telemetry logging disabled");
        Ok(Box::new(NullTelemetrySink))
    }
}

fn file_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("{}{}{}", FILE_PREFIX, index, FILE_SUFFIX))
}

/// Telemetry log files in `dir`, oldest first
fn log_files(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let index = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.strip_prefix(FILE_PREFIX))
            .and_then(|name| name.strip_suffix(FILE_SUFFIX))
            .and_then(|index| index.parse::<u64>().ok());
        if let Some(index) = index {
            files.push((index, path));
        }
    }
    files.sort_by_key(|(index, _)| *index);
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn read_lines(path: &Path) -> Vec<serde_json::Value> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_entry_fields() {
        let entry = SensorLogEntry::new(&[0x57, 0x01, 0x8A, 0x02], RemapTag::Short);
        assert_eq!(entry.tag, "0xAA");
        assert_eq!(entry.sensor_id, 0x57);
        assert_eq!(entry.instance, 0x01);
        assert_eq!(entry.data, vec![0x8A, 0x02]);

        let entry = SensorLogEntry::new(&[0x80, 0x00, 1, 2, 3, 4], RemapTag::Long);
        assert_eq!(entry.tag, "0xAC");
        assert_eq!(entry.data.len(), 4);
    }

    #[test]
    fn test_writes_json_lines() {
        let dir = TempDir::new().unwrap();
        let mut logger = JsonlTelemetryLogger::new(dir.path(), 100, 5).unwrap();
        assert!(logger.current_file().is_none());

        logger.deliver_sensor_record(&[0x01, 0x00, 0x10, 0x00], RemapTag::Short);
        logger.deliver_sensor_record(&[0xF8, 0x00, 0x0A, 0x00], RemapTag::Short);

        let path = logger.current_file().unwrap();
        assert!(path.ends_with("telemetry_1.jsonl"));

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["tag"], "0xAA");
        assert_eq!(lines[0]["sensor_id"], 1);
        assert_eq!(lines[1]["sensor_id"], 0xF8);
        assert_eq!(lines[1]["data"], serde_json::json!([0x0A, 0x00]));
        assert!(lines[0]["timestamp"].is_string());
        assert_eq!(logger.records_written(), 2);
    }

    #[test]
    fn test_rotates_after_max_records() {
        let dir = TempDir::new().unwrap();
        let mut logger = JsonlTelemetryLogger::new(dir.path(), 2, 10).unwrap();

        for i in 0..5u8 {
            logger.write_record(&[i, 0, 0, 0], RemapTag::Short).unwrap();
        }

        let files = log_files(dir.path()).unwrap();
        assert_eq!(files.len(), 3);
        assert_eq!(read_lines(&files[0].1).len(), 2);
        assert_eq!(read_lines(&files[1].1).len(), 2);
        assert_eq!(read_lines(&files[2].1).len(), 1);
    }

    #[test]
    fn test_keeps_newest_files() {
        let dir = TempDir::new().unwrap();
        let mut logger = JsonlTelemetryLogger::new(dir.path(), 1, 3).unwrap();

        for i in 0..6u8 {
            logger.write_record(&[i, 0, 0, 0], RemapTag::Short).unwrap();
        }

        let files = log_files(dir.path()).unwrap();
        let indices: Vec<u64> = files.iter().map(|(index, _)| *index).collect();
        assert_eq!(indices, vec![4, 5, 6]);
        assert_eq!(read_lines(&files[2].1)[0]["sensor_id"], 5);
    }

    #[test]
    fn test_numbering_continues_after_restart() {
        let dir = TempDir::new().unwrap();
        {
            let mut logger = JsonlTelemetryLogger::new(dir.path(), 10, 5).unwrap();
            logger.write_record(&[1, 0, 0, 0], RemapTag::Short).unwrap();
        }

        let mut logger = JsonlTelemetryLogger::new(dir.path(), 10, 5).unwrap();
        logger.write_record(&[2, 0, 0, 0], RemapTag::Short).unwrap();
        assert!(logger.current_file().unwrap().ends_with("telemetry_2.jsonl"));
        assert_eq!(log_files(dir.path()).unwrap().len(), 2);
    }

    #[test]
    fn test_ignores_foreign_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("notes.txt"), "keep me").unwrap();
        fs::write(dir.path().join("telemetry_x.jsonl"), "").unwrap();

        let mut logger = JsonlTelemetryLogger::new(dir.path(), 1, 1).unwrap();
        logger.write_record(&[1, 0, 0, 0], RemapTag::Short).unwrap();
        logger.write_record(&[2, 0, 0, 0], RemapTag::Short).unwrap();

        assert!(dir.path().join("notes.txt").exists());
        assert!(dir.path().join("telemetry_x.jsonl").exists());
        assert_eq!(log_files(dir.path()).unwrap().len(), 1);
    }

    #[test]
    fn test_open_sink_honours_enabled_flag() {
        let dir = TempDir::new().unwrap();
        let log_dir = dir.path().join("telemetry");
        let mut config = TelemetryConfig {
            enabled: false,
            log_dir: log_dir.to_string_lossy().into_owned(),
            max_records_per_file: 10,
            max_files_to_keep: 2,
        };

        let mut sink = open_sink(&config).unwrap();
        sink.deliver_sensor_record(&[1, 0, 0, 0], RemapTag::Short);
        assert!(!log_dir.exists());

        config.enabled = true;
        let mut sink = open_sink(&config).unwrap();
        sink.deliver_sensor_record(&[1, 0, 0, 0], RemapTag::Short);
        assert_eq!(log_files(&log_dir).unwrap().len(), 1);
    }

    #[test]
    fn test_creates_missing_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("logs").join("telemetry");
        JsonlTelemetryLogger::new(&nested, 10, 5).unwrap();
        assert!(nested.is_dir());
    }
}
