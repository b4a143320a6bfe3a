use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const ZOOM_HISTORY_LIMIT: usize = 10;

/// On-disk shape of the process-wide settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedSettings {
    #[serde(default)]
    pub zoom_history: Vec<f64>,
}

pub trait SettingsStore: Send + Sync {
    fn load_zoom_history(&self) -> Result<Vec<f64>>;
    fn save_zoom_history(&self, history: &[f64]) -> Result<()>;
}

pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    pub const FILE_NAME: &'static str = "settings.json";

    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create settings directory at {:?}", root))?;
        Ok(Self {
            path: root.join(Self::FILE_NAME),
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn read(&self) -> Result<PersistedSettings> {
        if !self.path.exists() {
            return Ok(PersistedSettings::default());
        }
        let mut file = File::open(&self.path)
            .with_context(|| format!("failed to open settings file {:?}", self.path))?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;
        let settings = serde_json::from_str(&buf)
            .with_context(|| format!("failed to decode settings file {:?}", self.path))?;
        Ok(settings)
    }
}

impl SettingsStore for FileSettingsStore {
    fn load_zoom_history(&self) -> Result<Vec<f64>> {
        Ok(self.read()?.zoom_history)
    }

    fn save_zoom_history(&self, history: &[f64]) -> Result<()> {
        let settings = PersistedSettings {
            zoom_history: history.to_vec(),
        };
        let tmp = self.path.with_extension("json.tmp");
        let payload = serde_json::to_string_pretty(&settings)?;
        let mut file = File::create(&tmp)
            .with_context(|| format!("failed to open temp settings file {:?}", tmp))?;
        file.write_all(payload.as_bytes())?;
        file.flush()?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace settings file {:?}", self.path))?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySettingsStore {
    inner: Mutex<Vec<f64>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(history: Vec<f64>) -> Self {
        Self {
            inner: Mutex::new(history),
        }
    }

    pub fn snapshot(&self) -> Vec<f64> {
        self.inner.lock().clone()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load_zoom_history(&self) -> Result<Vec<f64>> {
        Ok(self.inner.lock().clone())
    }

    fn save_zoom_history(&self, history: &[f64]) -> Result<()> {
        *self.inner.lock() = history.to_vec();
        Ok(())
    }
}

/// Custom zoom values the user typed, oldest first, without duplicates.
pub struct ZoomHistory {
    entries: Vec<f64>,
    store: Arc<dyn SettingsStore>,
}

impl ZoomHistory {
    /// Reads the persisted history. An unreadable store yields an empty
    /// history rather than an error.
    pub fn load(store: Arc<dyn SettingsStore>) -> Self {
        let stored = store.load_zoom_history().unwrap_or_else(|err| {
            warn!(?err, "failed to load zoom history; starting empty");
            Vec::new()
        });

        let mut entries: Vec<f64> = Vec::with_capacity(ZOOM_HISTORY_LIMIT);
        for value in stored {
            if value.is_finite() && !entries.contains(&value) {
                entries.push(value);
            }
        }
        let excess = entries.len().saturating_sub(ZOOM_HISTORY_LIMIT);
        entries.drain(..excess);

        Self { entries, store }
    }

    pub fn all(&self) -> &[f64] {
        &self.entries
    }

    /// Appends `value` unless already present and flushes the result.
    /// Returns whether the history changed; the in-memory history is updated
    /// even when flushing fails.
    pub fn record(&mut self, value: f64) -> Result<bool> {
        if self.entries.contains(&value) {
            return Ok(false);
        }
        self.entries.push(value);
        let excess = self.entries.len().saturating_sub(ZOOM_HISTORY_LIMIT);
        self.entries.drain(..excess);
        self.store
            .save_zoom_history(&self.entries)
            .context("failed to persist zoom history")?;
        Ok(true)
    }
}
