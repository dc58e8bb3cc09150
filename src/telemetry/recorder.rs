//! # Telemetry Recorder
//!
//! Writes decoded telemetry to JSON Lines files with rotation.
//!
//! Each line holds one record:
//!
//! ```text
//! {"timestamp":"2026-10-18T12:00:00.123Z","kind":"fast","record":{"seq":1,...}}
//! ```
//!
//! A new file is started after `max_records_per_file` lines; only the newest
//! `max_files_to_keep` files are kept in the directory. File names sort in
//! creation order.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::TelemetryConfig;
use crate::error::Result;
use crate::protocol::packets::TelemetryRecord;

const FILE_PREFIX: &str = "telemetry_";
const FILE_EXTENSION: &str = "jsonl";

#[derive(Serialize)]
struct LogLine<'a> {
    timestamp: String,
    #[serde(flatten)]
    record: &'a TelemetryRecord,
}

/// Rotating JSONL telemetry writer
#[derive(Debug)]
pub struct TelemetryRecorder {
    dir: PathBuf,
    max_records_per_file: usize,
    max_files_to_keep: usize,
    writer: Option<BufWriter<File>>,
    current_path: Option<PathBuf>,
    records_in_file: usize,
    files_started: u32,
}

impl TelemetryRecorder {
    /// Create a recorder writing into `dir` (created if missing)
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created
    pub fn new<P: AsRef<Path>>(dir: P, max_records_per_file: usize, max_files_to_keep: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        Ok(Self {
            dir,
            max_records_per_file: max_records_per_file.max(1),
            max_files_to_keep: max_files_to_keep.max(1),
            writer: None,
            current_path: None,
            records_in_file: 0,
            files_started: 0,
        })
    }

    /// Build a recorder from the `[telemetry]` section, or `None` when disabled
    ///
    /// # Errors
    ///
    /// Returns error if recording is enabled and the directory cannot be created
    pub fn from_config(config: &TelemetryConfig) -> Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }

        let recorder = Self::new(&config.log_dir, config.max_records_per_file, config.max_files_to_keep)?;
        info!("Recording telemetry to {}", recorder.dir.display());
        Ok(Some(recorder))
    }

    /// Append one record stamped with the current time
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be created or written
    pub fn record(&mut self, record: &TelemetryRecord) -> Result<()> {
        self.record_at(record, Utc::now())
    }

    /// Append one record with an explicit timestamp
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be created or written
    pub fn record_at(&mut self, record: &TelemetryRecord, timestamp: DateTime<Utc>) -> Result<()> {
        if self.writer.is_none() || self.records_in_file >= self.max_records_per_file {
            self.rotate(timestamp)?;
        }

        let line = LogLine {
            timestamp: timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            record,
        };

        if let Some(writer) = self.writer.as_mut() {
            serde_json::to_writer(&mut *writer, &line)?;
            writer.write_all(b"\n")?;
            self.records_in_file += 1;
        }

        Ok(())
    }

    /// Flush buffered lines to disk
    ///
    /// # Errors
    ///
    /// Returns error if the flush fails
    pub fn flush(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    /// File currently being written, if any
    pub fn current_path(&self) -> Option<&Path> {
        self.current_path.as_deref()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Close the current file and start a new one
    fn rotate(&mut self, timestamp: DateTime<Utc>) -> Result<()> {
        self.flush()?;
        self.writer = None;

        self.files_started += 1;
        let name = format!(
            "{}{}_{:04}.{}",
            FILE_PREFIX,
            timestamp.format("%Y%m%d_%H%M%S_%3f"),
            self.files_started,
            FILE_EXTENSION
        );
        let path = self.dir.join(name);

        let file = File::create(&path)?;
        debug!("Started telemetry file {}", path.display());

        self.writer = Some(BufWriter::new(file));
        self.current_path = Some(path);
        self.records_in_file = 0;

        self.prune();
        Ok(())
    }

    /// Delete the oldest telemetry files beyond the retention limit
    fn prune(&self) {
        let files = match self.telemetry_files() {
            Ok(files) => files,
            Err(e) => {
                warn!("Cannot list telemetry directory {}: {}", self.dir.display(), e);
                return;
            }
        };

        let excess = files.len().saturating_sub(self.max_files_to_keep);
        for path in files.into_iter().take(excess) {
            match fs::remove_file(&path) {
                Ok(()) => debug!("Removed old telemetry file {}", path.display()),
                Err(e) => warn!("Cannot remove {}: {}", path.display(), e),
            }
        }
    }

    /// Telemetry files in the directory, oldest first
    fn telemetry_files(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| is_telemetry_file(path))
            .collect();
        files.sort();
        Ok(files)
    }
}

impl Drop for TelemetryRecorder {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!("Failed to flush telemetry on close: {}", e);
        }
    }
}

fn is_telemetry_file(path: &Path) -> bool {
    let name_matches = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(FILE_PREFIX));
    let extension_matches = path.extension().is_some_and(|ext| ext == FILE_EXTENSION);
    name_matches && extension_matches
}
