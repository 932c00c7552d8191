use std::fs::{self, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};

use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::{identity, Command};
use crate::error::{ChannelError, CommandError};
use crate::storage::parent_dir;

const STALE_LOCK_AGE: Duration = Duration::from_secs(5);
const LOCK_RETRY: Duration = Duration::from_millis(5);

#[derive(Debug)]
pub struct QueuedCommand {
    pub identity: String,
    pub command: Result<Command, CommandError>,
}

/// File-backed command queue shared with external producers.
///
/// Every read-modify-write of the queue file happens under the channel
/// lock: an in-process mutex plus an exclusively created `<file>.lock`, so
/// a drain and a concurrent append from another process never interleave.
#[derive(Debug)]
pub struct CommandChannel {
    path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
    local: Mutex<()>,
}

struct ChannelLock<'a> {
    path: &'a Path,
    _local: MutexGuard<'a, ()>,
}

impl Drop for ChannelLock<'_> {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(self.path) {
            warn!("Failed to release command lock {:?}: {}", self.path, e);
        }
    }
}

enum Batch {
    Missing,
    Entries(Vec<Value>),
    Corrupt,
}

impl CommandChannel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_name = path.as_os_str().to_owned();
        lock_name.push(".lock");
        Self {
            path,
            lock_path: PathBuf::from(lock_name),
            lock_timeout: Duration::from_secs(1),
            local: Mutex::new(()),
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queues a command stamped with a fresh id and returns that id.
    pub fn submit(&self, command: &Command) -> Result<String, ChannelError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.append(command.to_envelope(&id)?)?;
        Ok(id)
    }

    /// Appends a raw command object to the queue.
    pub fn append(&self, command: Value) -> Result<(), ChannelError> {
        let dir = parent_dir(&self.path);
        fs::create_dir_all(dir).map_err(|source| ChannelError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let _lock = self.lock()?;
        let mut entries = match self.read_batch() {
            Batch::Entries(entries) => entries,
            Batch::Missing | Batch::Corrupt => Vec::new(),
        };
        entries.push(command);
        self.write_batch(&entries)
    }

    /// Takes the whole batch and leaves an empty queue behind, atomically
    /// with respect to other channel users. Never fails: unreadable or
    /// locked queues yield an empty batch, and a batch that cannot be
    /// cleared stays queued for the next drain.
    pub fn drain(&self) -> Vec<QueuedCommand> {
        self.drain_with(|channel| channel.write_batch(&[]))
    }

    fn drain_with<F>(&self, clear: F) -> Vec<QueuedCommand>
    where
        F: FnOnce(&Self) -> Result<(), ChannelError>,
    {
        let _lock = match self.lock() {
            Ok(lock) => lock,
            Err(e) => {
                warn!("Skipping command drain: {}", e);
                return Vec::new();
            }
        };

        let entries = match self.read_batch() {
            Batch::Missing => return Vec::new(),
            Batch::Entries(entries) if entries.is_empty() => return Vec::new(),
            Batch::Entries(entries) => entries,
            Batch::Corrupt => Vec::new(),
        };

        if let Err(e) = clear(self) {
            warn!(
                "Failed to clear command queue, leaving {} commands for the next drain: {}",
                entries.len(),
                e
            );
            return Vec::new();
        }

        debug!("Drained {} queued commands", entries.len());
        entries
            .iter()
            .map(|value| QueuedCommand {
                identity: identity(value),
                command: Command::from_value(value),
            })
            .collect()
    }

    pub fn clear(&self) -> Result<(), ChannelError> {
        let _lock = self.lock()?;
        self.write_batch(&[])
    }

    fn read_batch(&self) -> Batch {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Batch::Missing,
            Err(e) => {
                warn!("Failed to read command queue {:?}: {}", self.path, e);
                return Batch::Corrupt;
            }
        };
        if raw.trim().is_empty() {
            return Batch::Entries(Vec::new());
        }
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Array(entries)) => Batch::Entries(entries),
            Ok(other) => {
                warn!("Command queue is not a JSON array, dropping: {}", other);
                Batch::Corrupt
            }
            Err(e) => {
                warn!("Malformed command queue {:?}, dropping: {}", self.path, e);
                Batch::Corrupt
            }
        }
    }

    fn write_batch(&self, entries: &[Value]) -> Result<(), ChannelError> {
        let dir = parent_dir(&self.path);
        let io_err = |source| ChannelError::Io {
            path: self.path.clone(),
            source,
        };

        let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer(&mut writer, entries)?;
            writer.flush().map_err(io_err)?;
        }
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        Ok(())
    }

    fn lock(&self) -> Result<ChannelLock<'_>, ChannelError> {
        let local = self.local.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let deadline = Instant::now() + self.lock_timeout;

        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.lock_path)
            {
                Ok(mut file) => {
                    let _ = writeln!(file, "{}", std::process::id());
                    return Ok(ChannelLock {
                        path: &self.lock_path,
                        _local: local,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if is_stale(&self.lock_path) && self.reclaim_stale_lock() {
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(ChannelError::Locked {
                            path: self.path.clone(),
                        });
                    }
                    std::thread::sleep(LOCK_RETRY);
                }
                Err(source) => {
                    return Err(ChannelError::Io {
                        path: self.lock_path.clone(),
                        source,
                    })
                }
            }
        }
    }

    /// Moves the lock aside with a rename, so only one contender can claim
    /// it, then deletes it if it is still stale. A lock that turns out to be
    /// fresh was just taken by someone else and is linked back in place.
    fn reclaim_stale_lock(&self) -> bool {
        let mut name = self.lock_path.as_os_str().to_owned();
        name.push(format!(".stale-{}", uuid::Uuid::new_v4()));
        let aside = PathBuf::from(name);

        if fs::rename(&self.lock_path, &aside).is_err() {
            return false;
        }
        let reclaimed = is_stale(&aside);
        if reclaimed {
            warn!("Removed stale command lock {:?}", self.lock_path);
        } else if let Err(e) = fs::hard_link(&aside, &self.lock_path) {
            warn!("Failed to restore command lock {:?}: {}", self.lock_path, e);
        }
        if let Err(e) = fs::remove_file(&aside) {
            warn!("Failed to remove {:?}: {}", aside, e);
        }
        reclaimed
    }
}

fn is_stale(lock_path: &Path) -> bool {
    fs::metadata(lock_path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > STALE_LOCK_AGE)
}
