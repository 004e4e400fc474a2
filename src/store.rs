//! Persisted session state
//!
//! `SessionStore` is the single owner of everything voxlate remembers between
//! runs: endpoint overrides, speech preferences, the translation history and
//! the diagnostic log. Values live in one JSON object; every mutation rewrites
//! the whole object through a [`StateBackend`] and is only committed in memory
//! once that write succeeded.

use crate::history::{HistoryEntry, LogEntry, LogLevel};
use crate::translate::DEFAULT_TRANSLATE_ENDPOINT;
use anyhow::anyhow;
use directories::ProjectDirs;
use log::{debug, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const HISTORY_CAP: usize = 500;
pub const LOG_CAP: usize = 1000;

const KEY_TRANSLATE_ENDPOINT: &str = "translate_endpoint";
const KEY_STT_ENDPOINT: &str = "stt_endpoint";
const KEY_VOICE: &str = "voice";
const KEY_TTS_RATE: &str = "tts_rate";
const KEY_TTS_PITCH: &str = "tts_pitch";
const KEY_TTS_VOLUME: &str = "tts_volume";
const KEY_AUTO_VOICE: &str = "auto_voice";
const KEY_HISTORY: &str = "history";
const KEY_LOGS: &str = "logs";

pub type State = Map<String, Value>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("state storage is full: need {needed} bytes, {available} available in {}", path.display())]
    Full {
        path: PathBuf,
        needed: u64,
        available: u64,
    },
    #[error("state I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("state is not valid JSON: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("no entry at index {index} (have {len})")]
    OutOfRange { index: usize, len: usize },
}

pub trait StateBackend {
    fn load(&self) -> Result<State, StoreError>;
    fn save(&self, state: &State) -> Result<(), StoreError>;
}

/// `state.json` in the platform data directory
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.local/share/voxlate/state.json`, or `<data_dir>/state.json` when overridden
    pub fn default_location(data_dir: Option<&Path>) -> anyhow::Result<Self> {
        let dir = match data_dir {
            Some(dir) => dir.to_path_buf(),
            None => ProjectDirs::from("", "", "voxlate")
                .ok_or_else(|| anyhow!("Could not determine data directory"))?
                .data_dir()
                .to_path_buf(),
        };
        Ok(Self::new(dir.join("state.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl StateBackend for FileBackend {
    fn load(&self) -> Result<State, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(State::new()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No state file at {}, starting empty", self.path.display());
                Ok(State::new())
            }
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn save(&self, state: &State) -> Result<(), StoreError> {
        let dir = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&dir).map_err(|e| self.io_error(e))?;

        let json = serde_json::to_vec(state)?;

        // Old and new copies coexist until the rename
        let needed = json.len() as u64 * 2;
        if let Ok(available) = fs2::available_space(&dir) {
            if available < needed {
                return Err(StoreError::Full {
                    path: self.path.clone(),
                    needed,
                    available,
                });
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &json).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))?;
        Ok(())
    }
}

pub struct SessionStore {
    backend: Box<dyn StateBackend>,
    state: State,
}

impl SessionStore {
    pub fn open(backend: Box<dyn StateBackend>) -> Result<Self, StoreError> {
        let state = backend.load()?;
        Ok(Self { backend, state })
    }

    fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.state.get(key)?;
        match serde_json::from_value(value.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("Ignoring unreadable state value `{}`: {}", key, e);
                None
            }
        }
    }

    fn commit(&mut self, next: State) -> Result<(), StoreError> {
        self.backend.save(&next)?;
        self.state = next;
        Ok(())
    }

    fn set<T: Serialize>(&mut self, key: &str, value: Option<T>) -> Result<(), StoreError> {
        let mut next = self.state.clone();
        match value {
            Some(value) => {
                next.insert(key.to_string(), serde_json::to_value(value)?);
            }
            None => {
                next.remove(key);
            }
        }
        self.commit(next)
    }

    /// Stored elements as written, including ones this version cannot read
    fn raw_list(&self, key: &str) -> Vec<Value> {
        match self.state.get(key) {
            Some(Value::Array(items)) => items.clone(),
            Some(other) => {
                warn!("Ignoring state value `{}`: expected a list, found {}", key, other);
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    /// Readable elements only; unreadable ones are skipped but stay stored
    fn list<T: DeserializeOwned>(&self, key: &str) -> Vec<T> {
        self.raw_list(key)
            .into_iter()
            .enumerate()
            .filter_map(|(i, value)| match serde_json::from_value(value) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!("Skipping unreadable `{}` entry {}: {}", key, i, e);
                    None
                }
            })
            .collect()
    }

    /// Read-modify-write of one capped, newest-first collection
    fn mutate_list<F>(&mut self, key: &str, cap: usize, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Vec<Value>) -> Result<(), StoreError>,
    {
        let mut items = self.raw_list(key);
        f(&mut items)?;
        items.truncate(cap);
        self.set(key, Some(items))
    }

    fn prepend<T: Serialize>(&mut self, key: &str, cap: usize, item: T) -> Result<(), StoreError> {
        let value = serde_json::to_value(item)?;
        self.mutate_list(key, cap, |items| {
            items.insert(0, value);
            Ok(())
        })
    }

    pub fn translate_endpoint(&self) -> String {
        self.get::<String>(KEY_TRANSLATE_ENDPOINT)
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_TRANSLATE_ENDPOINT.to_string())
    }

    pub fn set_translate_endpoint(&mut self, url: Option<String>) -> Result<(), StoreError> {
        self.set(KEY_TRANSLATE_ENDPOINT, normalize_url(url))
    }

    pub fn stt_endpoint(&self) -> Option<String> {
        self.get::<String>(KEY_STT_ENDPOINT)
            .filter(|url| !url.trim().is_empty())
    }

    pub fn set_stt_endpoint(&mut self, url: Option<String>) -> Result<(), StoreError> {
        self.set(KEY_STT_ENDPOINT, normalize_url(url))
    }

    pub fn voice(&self) -> Option<String> {
        self.get(KEY_VOICE)
    }

    pub fn set_voice(&mut self, voice: Option<String>) -> Result<(), StoreError> {
        self.set(KEY_VOICE, voice.filter(|v| !v.trim().is_empty()))
    }

    pub fn speech_params(&self) -> SpeechParams {
        let defaults = SpeechParams::default();
        SpeechParams {
            rate: self.get(KEY_TTS_RATE).unwrap_or(defaults.rate),
            pitch: self.get(KEY_TTS_PITCH).unwrap_or(defaults.pitch),
            volume: self.get(KEY_TTS_VOLUME).unwrap_or(defaults.volume),
        }
        .clamped()
    }

    pub fn set_speech_params(&mut self, params: SpeechParams) -> Result<(), StoreError> {
        let params = params.clamped();
        let mut next = self.state.clone();
        next.insert(KEY_TTS_RATE.to_string(), Value::from(params.rate));
        next.insert(KEY_TTS_PITCH.to_string(), Value::from(params.pitch));
        next.insert(KEY_TTS_VOLUME.to_string(), Value::from(params.volume));
        self.commit(next)
    }

    pub fn auto_voice(&self) -> bool {
        self.get(KEY_AUTO_VOICE).unwrap_or(true)
    }

    pub fn set_auto_voice(&mut self, enabled: bool) -> Result<(), StoreError> {
        self.set(KEY_AUTO_VOICE, Some(enabled))
    }

    /// Newest first, optionally filtered
    pub fn history(&self, filter: Option<&str>) -> Vec<HistoryEntry> {
        let entries: Vec<HistoryEntry> = self.list(KEY_HISTORY);
        match filter {
            Some(query) => entries.into_iter().filter(|e| e.matches(query)).collect(),
            None => entries,
        }
    }

    pub fn append_history(&mut self, entry: HistoryEntry) -> Result<(), StoreError> {
        self.prepend(KEY_HISTORY, HISTORY_CAP, entry)
    }

    /// `index` counts readable entries, as listed by [`SessionStore::history`]
    pub fn remove_history(&mut self, index: usize) -> Result<HistoryEntry, StoreError> {
        let mut removed = None;
        self.mutate_list(KEY_HISTORY, HISTORY_CAP, |items| {
            let readable: Vec<(usize, HistoryEntry)> = items
                .iter()
                .enumerate()
                .filter_map(|(at, value)| Some((at, serde_json::from_value(value.clone()).ok()?)))
                .collect();
            let len = readable.len();
            let Some((at, entry)) = readable.into_iter().nth(index) else {
                return Err(StoreError::OutOfRange { index, len });
            };
            items.remove(at);
            removed = Some(entry);
            Ok(())
        })?;
        removed.ok_or(StoreError::OutOfRange { index, len: 0 })
    }

    pub fn clear_history(&mut self) -> Result<(), StoreError> {
        self.set::<Vec<HistoryEntry>>(KEY_HISTORY, Some(Vec::new()))
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.list(KEY_LOGS)
    }

    pub fn append_log(&mut self, entry: LogEntry) -> Result<(), StoreError> {
        self.prepend(KEY_LOGS, LOG_CAP, entry)
    }

    /// Emit through `log` and keep a copy in the persisted log; a failed write is only warned about
    pub fn record(&mut self, level: LogLevel, message: impl Into<String>, meta: Option<Value>) {
        let message = message.into();
        let log_level: log::Level = level.into();
        log::log!(log_level, "{}", message);

        let mut entry = LogEntry::new(level, message);
        if let Some(meta) = meta {
            entry = entry.with_meta(meta);
        }
        if let Err(e) = self.append_log(entry) {
            warn!("Failed to persist log entry: {}", e);
        }
    }

    pub fn clear_logs(&mut self) -> Result<(), StoreError> {
        self.set::<Vec<LogEntry>>(KEY_LOGS, Some(Vec::new()))
    }

    /// Endpoint and speech settings as shown by `config show`
    pub fn settings_snapshot(&self) -> Value {
        let params = self.speech_params();
        serde_json::json!({
            "translate_endpoint": self.translate_endpoint(),
            "stt_endpoint": self.stt_endpoint(),
            "voice": self.voice(),
            "tts_rate": params.rate,
            "tts_pitch": params.pitch,
            "tts_volume": params.volume,
            "auto_voice": self.auto_voice(),
        })
    }
}

fn normalize_url(url: Option<String>) -> Option<String> {
    url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty())
}

/// Synthesis parameters: rate and pitch in 0.1..=2.0 (1.0 normal), volume in 0.0..=1.0
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeechParams {
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
}

impl Default for SpeechParams {
    fn default() -> Self {
        Self {
            rate: 1.0,
            pitch: 1.0,
            volume: 1.0,
        }
    }
}

impl SpeechParams {
    pub fn clamped(self) -> Self {
        Self {
            rate: self.rate.clamp(0.1, 2.0),
            pitch: self.pitch.clamp(0.1, 2.0),
            volume: self.volume.clamp(0.0, 1.0),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    /// In-memory backend; clones share the same state so tests can inspect writes
    #[derive(Clone, Default)]
    pub struct MemoryBackend {
        state: Rc<RefCell<State>>,
        fail_writes: Rc<Cell<bool>>,
        writes: Rc<Cell<usize>>,
    }

    impl MemoryBackend {
        pub fn fail_writes(&self, fail: bool) {
            self.fail_writes.set(fail);
        }

        pub fn writes(&self) -> usize {
            self.writes.get()
        }

        pub fn snapshot(&self) -> State {
            self.state.borrow().clone()
        }

        pub fn replace(&self, state: State) {
            *self.state.borrow_mut() = state;
        }
    }

    impl StateBackend for MemoryBackend {
        fn load(&self) -> Result<State, StoreError> {
            Ok(self.state.borrow().clone())
        }

        fn save(&self, state: &State) -> Result<(), StoreError> {
            if self.fail_writes.get() {
                return Err(StoreError::Full {
                    path: PathBuf::from("memory"),
                    needed: 1,
                    available: 0,
                });
            }
            *self.state.borrow_mut() = state.clone();
            self.writes.set(self.writes.get() + 1);
            Ok(())
        }
    }

    pub fn memory_store() -> (SessionStore, MemoryBackend) {
        let backend = MemoryBackend::default();
        let store = SessionStore::open(Box::new(backend.clone())).unwrap();
        (store, backend)
    }
}
