//! Device preference persistence
//!
//! Remembers whether the user left the microphone on and which input device
//! they picked, so the next session starts the same way. Writes are
//! last-write-wins and failures only cost the remembered choice.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Remembered audio input choice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePreference {
    /// Microphone enabled when the session starts
    pub audio_input_enabled: bool,
    /// Selected input device, `None` for the system default
    #[serde(default)]
    pub audio_input_device_id: Option<String>,
}

impl Default for DevicePreference {
    fn default() -> Self {
        Self {
            audio_input_enabled: true,
            audio_input_device_id: None,
        }
    }
}

/// On-disk record
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredPreference {
    #[serde(flatten)]
    preference: DevicePreference,
    updated_at: DateTime<Utc>,
}

/// Storage for a single preference record
pub trait PreferenceBackend: Send + Sync {
    /// Read the stored record, `None` if nothing was saved
    ///
    /// # Errors
    ///
    /// Returns error if the record exists but cannot be read
    fn read(&self) -> Result<Option<DevicePreference>>;

    /// Replace the stored record
    ///
    /// # Errors
    ///
    /// Returns error if the record cannot be written
    fn write(&self, preference: &DevicePreference) -> Result<()>;

    /// Remove the stored record
    ///
    /// # Errors
    ///
    /// Returns error if the record exists but cannot be removed
    fn clear(&self) -> Result<()>;
}

/// JSON file per user, grouped by application scope
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    /// Use an explicit file path
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File for `user_id` under `dir/<scope>/`
    #[must_use]
    pub fn for_user(dir: &Path, scope: &str, user_id: &str) -> Self {
        Self::new(
            dir.join(encode_key(scope))
                .join(format!("{}.json", encode_key(user_id))),
        )
    }

    /// Default preferences directory
    ///
    /// Returns `~/.local/share/omni/beacon-voice/preferences`
    #[must_use]
    pub fn default_dir() -> PathBuf {
        directories::BaseDirs::new().map_or_else(
            || PathBuf::from(".local/share/omni/beacon-voice/preferences"),
            |d| {
                d.data_dir()
                    .join("omni")
                    .join("beacon-voice")
                    .join("preferences")
            },
        )
    }

    /// Path of the backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PreferenceBackend for FileBackend {
    fn read(&self) -> Result<Option<DevicePreference>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path)?;
        let stored: StoredPreference = serde_json::from_str(&content)?;
        Ok(Some(stored.preference))
    }

    fn write(&self, preference: &DevicePreference) -> Result<()> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;

        let stored = StoredPreference {
            preference: preference.clone(),
            updated_at: Utc::now(),
        };
        let content = serde_json::to_vec_pretty(&stored)?;

        // Write-then-rename so readers never see a torn record
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(&content)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| Error::Persistence(e.to_string()))?;

        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-local backend, used by tests and hosts without a disk
#[derive(Debug, Default)]
pub struct MemoryBackend {
    record: Mutex<Option<DevicePreference>>,
}

impl MemoryBackend {
    /// Create an empty backend
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend pre-seeded with a record
    #[must_use]
    pub fn with_record(preference: DevicePreference) -> Self {
        Self {
            record: Mutex::new(Some(preference)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<DevicePreference>>> {
        self.record
            .lock()
            .map_err(|e| Error::Persistence(e.to_string()))
    }
}

impl PreferenceBackend for MemoryBackend {
    fn read(&self) -> Result<Option<DevicePreference>> {
        Ok(self.lock()?.clone())
    }

    fn write(&self, preference: &DevicePreference) -> Result<()> {
        *self.lock()? = Some(preference.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.lock()? = None;
        Ok(())
    }
}

/// Cached, policy-aware access to a [`PreferenceBackend`]
///
/// Cloning shares the cache, so every clone sees the latest save.
#[derive(Clone)]
pub struct PreferenceStore {
    backend: Arc<dyn PreferenceBackend>,
    prevent_save: bool,
    cache: Arc<Mutex<Option<DevicePreference>>>,
}

impl PreferenceStore {
    /// Create a store over `backend`
    ///
    /// With `prevent_save` set, saves are ignored and the stored record is
    /// left untouched.
    #[must_use]
    pub fn new(backend: Arc<dyn PreferenceBackend>, prevent_save: bool) -> Self {
        Self {
            backend,
            prevent_save,
            cache: Arc::new(Mutex::new(None)),
        }
    }

    /// In-memory store, mostly for tests
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()), false)
    }

    /// Whether saving is disabled
    #[must_use]
    pub const fn prevent_save(&self) -> bool {
        self.prevent_save
    }

    /// Last saved preference, or defaults if nothing was saved
    #[must_use]
    pub fn load(&self) -> DevicePreference {
        let mut cache = lock_cache(&self.cache);
        Self::load_locked(&mut cache, self.backend.as_ref())
    }

    /// Replace the stored preference
    ///
    /// Failures are logged and absorbed.
    pub fn save(&self, preference: DevicePreference) {
        self.update(|current| *current = preference);
    }

    /// Remember the microphone enabled state
    pub fn save_audio_input_enabled(&self, enabled: bool) {
        self.update(|current| current.audio_input_enabled = enabled);
    }

    /// Remember the selected input device
    pub fn save_audio_input_device_id(&self, device_id: Option<String>) {
        self.update(|current| current.audio_input_device_id = device_id);
    }

    /// Forget the stored preference
    ///
    /// Left to the host to call on account switch.
    pub fn clear(&self) {
        if self.prevent_save {
            return;
        }

        let mut cache = lock_cache(&self.cache);
        *cache = None;
        if let Err(e) = self.backend.clear() {
            tracing::warn!(error = %e, "failed to clear device preference");
        }
    }

    fn update(&self, apply: impl FnOnce(&mut DevicePreference)) {
        if self.prevent_save {
            tracing::trace!("preference saving disabled, skipping save");
            return;
        }

        // Read-modify-write under one lock: the newest save always wins
        let mut cache = lock_cache(&self.cache);
        let mut next = Self::load_locked(&mut cache, self.backend.as_ref());
        apply(&mut next);
        *cache = Some(next.clone());

        match self.backend.write(&next) {
            Ok(()) => tracing::debug!(
                enabled = next.audio_input_enabled,
                device = next.audio_input_device_id.as_deref().unwrap_or("default"),
                "saved device preference"
            ),
            Err(e) => tracing::warn!(error = %e, "failed to save device preference"),
        }
    }

    fn load_locked(
        cache: &mut Option<DevicePreference>,
        backend: &dyn PreferenceBackend,
    ) -> DevicePreference {
        if let Some(cached) = cache.as_ref() {
            return cached.clone();
        }

        match backend.read() {
            Ok(Some(stored)) => {
                *cache = Some(stored.clone());
                stored
            }
            Ok(None) => DevicePreference::default(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to load device preference, using defaults");
                DevicePreference::default()
            }
        }
    }
}

impl std::fmt::Debug for PreferenceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreferenceStore")
            .field("prevent_save", &self.prevent_save)
            .finish_non_exhaustive()
    }
}

fn lock_cache(
    cache: &Mutex<Option<DevicePreference>>,
) -> MutexGuard<'_, Option<DevicePreference>> {
    match cache.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Percent-encode a storage key into a file name
///
/// Distinct keys map to distinct names. Dots are encoded too so no key can
/// turn into `.` or `..`; the empty key becomes a bare `%`.
fn encode_key(key: &str) -> String {
    if key.is_empty() {
        return "%".to_string();
    }
    urlencoding::encode(key).replace('.', "%2E")
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Backend whose writes always fail
    struct FailingBackend;

    impl PreferenceBackend for FailingBackend {
        fn read(&self) -> Result<Option<DevicePreference>> {
            Ok(None)
        }

        fn write(&self, _preference: &DevicePreference) -> Result<()> {
            Err(Error::Persistence("quota exceeded".to_string()))
        }

        fn clear(&self) -> Result<()> {
            Ok(())
        }
    }

    fn muted_on(device: &str) -> DevicePreference {
        DevicePreference {
            audio_input_enabled: false,
            audio_input_device_id: Some(device.to_string()),
        }
    }

    #[test]
    fn load_defaults_when_nothing_saved() {
        let store = PreferenceStore::in_memory();
        let pref = store.load();
        assert!(pref.audio_input_enabled);
        assert!(pref.audio_input_device_id.is_none());
    }

    #[test]
    fn save_then_load_roundtrip() {
        let store = PreferenceStore::in_memory();
        store.save(muted_on("usb-mic"));
        assert_eq!(store.load(), muted_on("usb-mic"));
    }

    #[test]
    fn prevent_save_keeps_prior_record() {
        let backend = Arc::new(MemoryBackend::with_record(muted_on("built-in")));
        let store = PreferenceStore::new(backend.clone(), true);

        store.save(DevicePreference::default());
        store.save_audio_input_enabled(true);

        assert_eq!(store.load(), muted_on("built-in"));
        assert_eq!(backend.read().unwrap(), Some(muted_on("built-in")));
    }

    #[test]
    fn field_updates_merge_into_record() {
        let store = PreferenceStore::in_memory();
        store.save_audio_input_device_id(Some("headset".to_string()));
        store.save_audio_input_enabled(false);
        assert_eq!(store.load(), muted_on("headset"));
    }

    #[test]
    fn last_write_wins() {
        let store = PreferenceStore::in_memory();
        let other = store.clone();
        store.save_audio_input_enabled(false);
        other.save_audio_input_enabled(true);
        store.save_audio_input_enabled(false);
        assert!(!other.load().audio_input_enabled);
    }

    #[test]
    fn failed_write_is_absorbed() {
        let store = PreferenceStore::new(Arc::new(FailingBackend), false);
        store.save(muted_on("usb"));
        // Still usable for the rest of the process lifetime
        assert_eq!(store.load(), muted_on("usb"));
    }

    #[test]
    fn file_backend_roundtrip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::for_user(dir.path(), "voice-app", "user/123");
        assert!(backend.path().ends_with("voice-app/user%2F123.json"));

        assert!(backend.read().unwrap().is_none());
        backend.write(&muted_on("usb")).unwrap();
        assert_eq!(backend.read().unwrap(), Some(muted_on("usb")));

        let raw = fs::read_to_string(backend.path()).unwrap();
        assert!(raw.contains("audioInputEnabled"));
        assert!(raw.contains("updatedAt"));

        backend.clear().unwrap();
        assert!(backend.read().unwrap().is_none());
        backend.clear().unwrap();
    }

    #[test]
    fn store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");

        let store = PreferenceStore::new(Arc::new(FileBackend::new(&path)), false);
        store.save(muted_on("usb"));

        let reopened = PreferenceStore::new(Arc::new(FileBackend::new(&path)), false);
        assert_eq!(reopened.load(), muted_on("usb"));

        reopened.clear();
        let fresh = PreferenceStore::new(Arc::new(FileBackend::new(&path)), false);
        assert_eq!(fresh.load(), DevicePreference::default());
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        fs::write(&path, "not json").unwrap();

        let store = PreferenceStore::new(Arc::new(FileBackend::new(&path)), false);
        assert_eq!(store.load(), DevicePreference::default());
    }

    #[test]
    fn encode_keys() {
        assert_eq!(encode_key("user_1-a"), "user_1-a");
        assert_eq!(encode_key("app.scope"), "app%2Escope");
        assert_eq!(encode_key(".."), "%2E%2E");
        assert_eq!(encode_key(""), "%");
        assert_eq!(encode_key("%2E"), "%252E");
    }

    #[test]
    fn ids_differing_in_punctuation_get_their_own_files() {
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<PathBuf> = ["user/1", "user_1", "user.1", "user 1", ""]
            .iter()
            .map(|id| FileBackend::for_user(dir.path(), "voice", id).path().to_path_buf())
            .collect();

        for (i, a) in paths.iter().enumerate() {
            for b in &paths[i + 1..] {
                assert_ne!(a, b);
            }
        }

        let slash = FileBackend::for_user(dir.path(), "voice", "user/1");
        let underscore = FileBackend::for_user(dir.path(), "voice", "user_1");
        slash.write(&muted_on("usb")).unwrap();
        assert!(underscore.read().unwrap().is_none());
    }

    #[test]
    fn scopes_differing_in_punctuation_are_separate() {
        let dir = tempfile::tempdir().unwrap();
        let a = FileBackend::for_user(dir.path(), "app.voice", "u");
        let b = FileBackend::for_user(dir.path(), "app_voice", "u");
        assert_ne!(a.path(), b.path());
    }
}
