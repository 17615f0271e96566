//! Persistent client registry
//!
//! Maps a client's MAC address - its stable identity - to the settings and
//! status the server keeps for it. Records are created on first Hello and
//! never removed during a run; across restarts they round-trip through a
//! versioned JSON file written atomically (temp file + rename).
//!
//! The registry is shared between the coordinator and the control plane;
//! callers mutate through [`ClientRegistry::update`] and persist with
//! [`ClientRegistry::save`]. A failed save is the caller's to log - the
//! in-memory state stays authoritative.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use chorus_protocol::TimeVal;

use crate::error::{ConfigError, Result};

/// Registry file format version
const FORMAT_VERSION: u32 = 1;

/// Per-client volume state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    /// Volume percent, 0..=100
    pub percent: u16,
    /// Mute flag
    pub muted: bool,
}

impl Default for Volume {
    fn default() -> Self {
        Self {
            percent: 100,
            muted: false,
        }
    }
}

/// Everything the server knows about one playback client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientInfo {
    /// Stable identity from the Hello message
    pub mac: String,
    /// Client host name
    pub host: String,
    /// Remote IP of the most recent connection
    pub ip: String,
    /// Client software version
    pub version: String,
    /// Operator-assigned display name
    pub name: String,
    /// Whether an identified session for this MAC is currently live
    pub connected: bool,
    /// Last connect or disconnect time
    pub last_seen: TimeVal,
    /// Volume state
    pub volume: Volume,
    /// Latency trim in milliseconds
    pub latency: i32,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            mac: String::new(),
            host: String::new(),
            ip: String::new(),
            version: String::new(),
            name: String::new(),
            connected: false,
            last_seen: TimeVal::default(),
            volume: Volume::default(),
            latency: 0,
        }
    }
}

impl ClientInfo {
    /// A fresh record for a MAC seen for the first time
    pub fn new(mac: impl Into<String>) -> Self {
        Self {
            mac: mac.into(),
            ..Default::default()
        }
    }
}

/// Registry file structure
#[derive(Debug, Serialize, Deserialize)]
struct RegistryFile {
    /// File format version
    version: u32,
    /// Stored client records
    clients: Vec<ClientInfo>,
}

/// Thread-safe MAC → ClientInfo store with file persistence
#[derive(Debug)]
pub struct ClientRegistry {
    /// File path, None for in-memory registries
    path: Option<PathBuf>,
    /// Client records by MAC
    clients: Mutex<HashMap<String, ClientInfo>>,
}

impl ClientRegistry {
    /// Open a registry backed by `path`, loading existing records
    ///
    /// Nothing is connected right after startup, so every loaded record is
    /// flagged disconnected regardless of what the file says.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut clients = HashMap::new();

        if path.exists() {
            let file =
                File::open(&path).map_err(|e| ConfigError::io(path.display().to_string(), e))?;
            let registry: RegistryFile = serde_json::from_reader(BufReader::new(file))?;

            if registry.version != FORMAT_VERSION {
                tracing::warn!(
                    expected = FORMAT_VERSION,
                    got = registry.version,
                    "client registry version mismatch"
                );
            }

            for mut info in registry.clients {
                info.connected = false;
                clients.insert(info.mac.clone(), info);
            }
        }

        tracing::debug!(count = clients.len(), path = %path.display(), "client registry loaded");

        Ok(Self {
            path: Some(path),
            clients: Mutex::new(clients),
        })
    }

    /// Create a registry with no backing file
    pub fn in_memory() -> Self {
        Self {
            path: None,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Look up a client by MAC
    pub fn get(&self, mac: &str) -> Option<ClientInfo> {
        self.clients.lock().get(mac).cloned()
    }

    /// Look up a client, creating a fresh record on first sight
    pub fn get_or_insert(&self, mac: &str) -> ClientInfo {
        self.clients
            .lock()
            .entry(mac.to_string())
            .or_insert_with(|| ClientInfo::new(mac))
            .clone()
    }

    /// Mutate a client record in place
    ///
    /// Returns the updated record, or None if the MAC is unknown.
    pub fn update<F>(&self, mac: &str, f: F) -> Option<ClientInfo>
    where
        F: FnOnce(&mut ClientInfo),
    {
        let mut clients = self.clients.lock();
        let info = clients.get_mut(mac)?;
        f(info);
        Some(info.clone())
    }

    /// All records, ordered by MAC for stable output
    pub fn all(&self) -> Vec<ClientInfo> {
        let mut records: Vec<ClientInfo> = self.clients.lock().values().cloned().collect();
        records.sort_by(|a, b| a.mac.cmp(&b.mac));
        records
    }

    /// Number of known clients
    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }

    /// Persist the registry
    ///
    /// Serializes under the lock, writes outside it: a temp file in the
    /// target directory, flushed, then atomically renamed over the real
    /// file so readers never observe a partial registry.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let registry = RegistryFile {
            version: FORMAT_VERSION,
            clients: self.all(),
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| ConfigError::io(path.display().to_string(), e))?;
        }

        let temp_path = path.with_extension("tmp");
        let file = File::create(&temp_path)
            .map_err(|e| ConfigError::io(temp_path.display().to_string(), e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &registry)?;
        writer
            .flush()
            .map_err(|e| ConfigError::io(temp_path.display().to_string(), e))?;

        fs::rename(&temp_path, path).map_err(|e| ConfigError::io(path.display().to_string(), e))?;

        Ok(())
    }
}

#[cfg(test)]
#[path = "clients_test.rs"]
mod tests;
