//! On-disk persistence used by the mission loop.
//!
//! - [`write_json_atomic`] replaces a JSON document via temp file + rename
//!   so readers never observe a half-written file.
//! - [`EventLog`] is an append-only, timestamped text log with one rotated
//!   generation (`<file>.1`) once it grows past its size bound.
//! - [`RecordStore`] keeps the newest N records of a JSON array document.

use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Serializes `value` as pretty JSON into `path` atomically.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let dir = parent_dir(path);
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {:?}", dir))?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        serde_json::to_writer_pretty(&mut writer, value)
            .with_context(|| format!("Failed to encode {:?}", path))?;
        writer.flush()?;
    }
    tmp.persist(path)
        .with_context(|| format!("Failed to replace {:?}", path))?;
    Ok(())
}

/// Reads a JSON document, treating a missing or malformed file as absent.
pub fn read_json_lenient<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Failed to read {:?}: {}", path, e);
            return None;
        }
    };
    if raw.trim().is_empty() {
        return None;
    }
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring malformed JSON in {:?}: {}", path, e);
            None
        }
    }
}

pub(crate) fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
    max_bytes: u64,
}

impl EventLog {
    /// `max_bytes == 0` disables rotation.
    pub fn new(path: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            path: path.into(),
            max_bytes,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn rotated_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".1");
        PathBuf::from(name)
    }

    pub fn append(&self, message: &str) -> Result<()> {
        let line = format!(
            "[{}] {}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            message
        );
        self.rotate_if_needed(line.len() as u64)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open log {:?}", self.path))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("Failed to append to log {:?}", self.path))?;
        Ok(())
    }

    fn rotate_if_needed(&self, incoming: u64) -> Result<()> {
        if self.max_bytes == 0 {
            return Ok(());
        }
        let current = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(_) => return Ok(()),
        };
        if current > 0 && current + incoming > self.max_bytes {
            let rotated = self.rotated_path();
            debug!("Rotating {:?} to {:?}", self.path, rotated);
            fs::rename(&self.path, &rotated)
                .with_context(|| format!("Failed to rotate log {:?}", self.path))?;
        }
        Ok(())
    }

    /// Last `n` lines across the rotated and the current generation.
    pub fn tail(&self, n: usize) -> Vec<String> {
        let mut lines = VecDeque::with_capacity(n);
        for path in [self.rotated_path(), self.path.clone()] {
            let Ok(content) = fs::read_to_string(&path) else {
                continue;
            };
            for line in content.lines() {
                if lines.len() == n {
                    lines.pop_front();
                }
                if n > 0 {
                    lines.push_back(line.to_string());
                }
            }
        }
        lines.into_iter().collect()
    }
}

/// A JSON array document that retains only the newest `capacity` records.
#[derive(Debug)]
pub struct RecordStore<T> {
    path: PathBuf,
    capacity: usize,
    records: VecDeque<T>,
}

impl<T: Serialize + DeserializeOwned> RecordStore<T> {
    /// Loads previously persisted records; unreadable content starts empty.
    pub fn open(path: impl Into<PathBuf>, capacity: usize) -> Self {
        let path = path.into();
        let mut records: VecDeque<T> = read_json_lenient::<Vec<T>>(&path)
            .unwrap_or_default()
            .into();
        while records.len() > capacity {
            records.pop_front();
        }
        Self {
            path,
            capacity,
            records,
        }
    }

    pub fn push(&mut self, record: T) -> Result<()> {
        if self.capacity == 0 {
            return Ok(());
        }
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
        write_json_atomic(&self.path, &self.records)
    }

    pub fn records(&self) -> impl Iterator<Item = &T> {
        self.records.iter()
    }
}
