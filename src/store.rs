//! Key-value persistence for recordings, tests, execution state and settings
//!
//! Layout:
//! - `recordingState`: `{isRecording, currentTest}` marker
//! - `recordingSteps:<test>`: steps captured so far by an in-progress recording
//! - `tests`: finalized step sequences
//! - `executionState:<tab>`: replay progress for one tab, kept by
//!   [`FileStore`] in its own file since it changes on every replayed step
//! - `settings`: `{recordingDelay, replayDelay}`

use anyhow::{Context, Result};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::step::StepSequence;

pub const RECORDING_STATE_KEY: &str = "recordingState";
pub const TESTS_KEY: &str = "tests";
pub const SETTINGS_KEY: &str = "settings";
pub const EXECUTION_STATE_PREFIX: &str = "executionState:";

pub fn recording_steps_key(test_name: &str) -> String {
    format!("recordingSteps:{}", test_name)
}

pub fn execution_state_key(tab_id: &str) -> String {
    format!("{}{}", EXECUTION_STATE_PREFIX, tab_id)
}

/// Minimal key-value store contract
pub trait Store: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: Value) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    fn keys(&self) -> Result<Vec<String>>;
}

/// Read and deserialize a key
pub fn load<T: DeserializeOwned>(store: &dyn Store, key: &str) -> Result<Option<T>> {
    match store.get(key)? {
        Some(value) => Ok(Some(
            serde_json::from_value(value).with_context(|| format!("Corrupt value at '{}'", key))?,
        )),
        None => Ok(None),
    }
}

/// Serialize and write a key
pub fn save<T: Serialize>(store: &dyn Store, key: &str, value: &T) -> Result<()> {
    store.set(key, serde_json::to_value(value)?)
}

/// In-process store, used by tests and as a cache-only backend
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.iter().map(|e| e.key().clone()).collect())
    }
}

/// JSON on disk, rewritten atomically on every change.
///
/// Execution states live one per file under `executions/` next to the main
/// document, so a step boundary rewrites only its own small file.
pub struct FileStore {
    path: PathBuf,
    executions_dir: PathBuf,
    cache: Mutex<Map<String, Value>>,
    executions: DashMap<String, Value>,
}

/// One execution state file; the key is stored because file names are encoded
#[derive(Serialize, Deserialize)]
struct KeyedValue {
    key: String,
    value: Value,
}

fn is_execution_key(key: &str) -> bool {
    key.starts_with(EXECUTION_STATE_PREFIX)
}

impl FileStore {
    /// Open `~/.retrace/store.json`
    pub fn open_default() -> Result<Self> {
        Self::open(crate::config::data_dir()?.join("store.json"))
    }

    pub fn open(path: PathBuf) -> Result<Self> {
        let dir = path
            .parent()
            .context("Store path has no parent directory")?
            .to_path_buf();
        let executions_dir = dir.join("executions");
        std::fs::create_dir_all(&executions_dir)?;

        let mut cache: Map<String, Value> = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read store {}", path.display()))?;
            if raw.trim().is_empty() {
                Map::new()
            } else {
                serde_json::from_str(&raw)
                    .with_context(|| format!("Corrupt store {}", path.display()))?
            }
        } else {
            Map::new()
        };

        let executions = DashMap::new();
        for entry in std::fs::read_dir(&executions_dir)? {
            let file = entry?.path();
            if file.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match read_keyed(&file) {
                Ok(KeyedValue { key, value }) => {
                    executions.insert(key, value);
                }
                Err(e) => warn!("Skipping execution state {}: {:#}", file.display(), e),
            }
        }

        let store = Self {
            path,
            executions_dir,
            cache: Mutex::new(Map::new()),
            executions,
        };

        // Execution states written into the main document move to their own files
        let inline: Vec<String> = cache.keys().filter(|k| is_execution_key(k)).cloned().collect();
        for key in &inline {
            if let Some(value) = cache.remove(key) {
                store.write_execution(key, &value)?;
                store.executions.insert(key.clone(), value);
            }
        }
        if !inline.is_empty() {
            store.flush(&cache)?;
        }

        debug!(
            "Opened store {} with {} keys and {} execution states",
            store.path.display(),
            cache.len(),
            store.executions.len()
        );
        *store.lock()? = cache;
        Ok(store)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Map<String, Value>>> {
        self.cache
            .lock()
            .map_err(|_| anyhow::anyhow!("Store lock poisoned"))
    }

    fn flush(&self, entries: &Map<String, Value>) -> Result<()> {
        write_atomic(&self.path, &serde_json::to_string_pretty(entries)?)
    }

    fn execution_file(&self, key: &str) -> PathBuf {
        let name: String = url::form_urlencoded::byte_serialize(key.as_bytes()).collect();
        self.executions_dir.join(format!("{}.json", name))
    }

    fn write_execution(&self, key: &str, value: &Value) -> Result<()> {
        let keyed = KeyedValue {
            key: key.to_string(),
            value: value.clone(),
        };
        write_atomic(&self.execution_file(key), &serde_json::to_string(&keyed)?)
    }
}

fn read_keyed(file: &Path) -> Result<KeyedValue> {
    let raw = std::fs::read_to_string(file)?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = path.parent().context("Store path has no parent directory")?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.flush()?;
    tmp.persist(path)
        .with_context(|| format!("Failed to write store {}", path.display()))?;
    Ok(())
}

impl Store for FileStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        if is_execution_key(key) {
            return Ok(self.executions.get(key).map(|v| v.value().clone()));
        }
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        if is_execution_key(key) {
            // The entry guard serializes writers of the same key
            match self.executions.entry(key.to_string()) {
                Entry::Occupied(mut entry) => {
                    self.write_execution(key, &value)?;
                    entry.insert(value);
                }
                Entry::Vacant(entry) => {
                    self.write_execution(key, &value)?;
                    entry.insert(value);
                }
            }
            return Ok(());
        }

        let mut entries = self.lock()?;
        entries.insert(key.to_string(), value);
        self.flush(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        if is_execution_key(key) {
            if self.executions.remove(key).is_some() {
                let file = self.execution_file(key);
                if let Err(e) = std::fs::remove_file(&file)
                    && e.kind() != std::io::ErrorKind::NotFound
                {
                    return Err(e).with_context(|| format!("Failed to remove {}", file.display()));
                }
            }
            return Ok(());
        }

        let mut entries = self.lock()?;
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.lock()?.keys().cloned().collect();
        keys.extend(self.executions.iter().map(|e| e.key().clone()));
        Ok(keys)
    }
}

/// Marker written while a recording is in progress
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingState {
    pub is_recording: bool,
    pub current_test: Option<String>,
}

/// User settings, both in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Settle time after a page load before the recorder re-attaches
    pub recording_delay: u64,
    /// Settle time before each replayed step
    pub replay_delay: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            recording_delay: 500,
            replay_delay: 500,
        }
    }
}

impl Settings {
    pub fn load(store: &dyn Store) -> Result<Self> {
        Ok(load(store, SETTINGS_KEY)?.unwrap_or_default())
    }

    pub fn save(&self, store: &dyn Store) -> Result<()> {
        save(store, SETTINGS_KEY, self)
    }
}

/// The finalized step sequences collection
pub struct TestLibrary<'a> {
    store: &'a dyn Store,
}

impl<'a> TestLibrary<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    pub fn list(&self) -> Result<Vec<StepSequence>> {
        Ok(load(self.store, TESTS_KEY)?.unwrap_or_default())
    }

    pub fn get(&self, name: &str) -> Result<Option<StepSequence>> {
        Ok(self.list()?.into_iter().find(|t| t.name == name))
    }

    /// Insert a test, replacing any existing test with the same name
    pub fn save(&self, test: StepSequence) -> Result<()> {
        let mut tests = self.list()?;
        match tests.iter_mut().find(|t| t.name == test.name) {
            Some(existing) => *existing = test,
            None => tests.push(test),
        }
        save(self.store, TESTS_KEY, &tests)
    }

    pub fn delete(&self, name: &str) -> Result<bool> {
        let mut tests = self.list()?;
        let before = tests.len();
        tests.retain(|t| t.name != name);
        if tests.len() == before {
            return Ok(false);
        }
        save(self.store, TESTS_KEY, &tests)?;
        info!("Deleted test '{}'", name);
        Ok(true)
    }

    /// Overwrite one step's baseline image in the persisted test
    pub fn update_baseline(&self, name: &str, step_index: usize, data_url: String) -> Result<()> {
        let mut tests = self.list()?;
        let test = tests
            .iter_mut()
            .find(|t| t.name == name)
            .ok_or_else(|| anyhow::anyhow!("Test '{}' not found", name))?;
        test.replace_baseline(step_index, data_url)?;
        save(self.store, TESTS_KEY, &tests)?;
        info!("Updated baseline for '{}' step {}", name, step_index);
        Ok(())
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;
