//! Configuration management for dattoham
//!
//! Settings live in ~/.config/dattoham/config.json; the cloud API key lives in
//! the system keychain (see [`crate::keyring`]). A [`ConfigStore`] is the only
//! way to read or change them at runtime: it is cloned into every component
//! that needs configuration and all writes go through [`ConfigStore::update`].

use crate::error::{AssistantError, Result};
use crate::keyring::{self, CredentialStore};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};
use url::Url;

const CONFIG_DIR_NAME: &str = "dattoham";
const CONFIG_FILE: &str = "config.json";
const LOCK_FILE: &str = "config.lock";
const LOCK_TIMEOUT_SECS: u64 = 5;
const LOCK_RETRY_MS: u64 = 25;

pub const DEFAULT_LOCAL_ENDPOINT: &str = "http://localhost:11434";
pub const DEFAULT_CLOUD_ENDPOINT: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_CLOUD_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_PRIMARY_MODEL: &str = "qwen2.5-coder:32b-instruct-q4_K_M";
pub const DEFAULT_FALLBACK_MODELS: [&str; 3] = [
    "qwen2.5:7b-instruct-q4_K_M",
    "deepseek-v2:16b-lite-instruct-q4_K_M",
    "codellama:70b-instruct-q4_K_M",
];

/// The two interchangeable text-generation backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Local,
    Cloud,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Local => "local",
            Provider::Cloud => "cloud",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" | "ollama" => Ok(Provider::Local),
            "cloud" | "gemini" => Ok(Provider::Cloud),
            other => Err(format!(
                "unknown provider '{}' (expected 'local' or 'cloud')",
                other
            )),
        }
    }
}

#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    pub active_provider: Provider,
    pub local_endpoint: Url,
    pub primary_model: String,
    /// Tried in order when the primary model is not installed
    pub fallback_models: Vec<String>,
    pub cloud_endpoint: Url,
    pub cloud_model: String,
    /// Never written to the settings file
    #[serde(skip)]
    pub cloud_api_key: Option<String>,
    pub request_timeout_secs: u64,
    pub status_timeout_secs: u64,
    pub pull_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            active_provider: Provider::Local,
            local_endpoint: parse_builtin_url(DEFAULT_LOCAL_ENDPOINT),
            primary_model: DEFAULT_PRIMARY_MODEL.to_string(),
            fallback_models: DEFAULT_FALLBACK_MODELS
                .iter()
                .map(|m| m.to_string())
                .collect(),
            cloud_endpoint: parse_builtin_url(DEFAULT_CLOUD_ENDPOINT),
            cloud_model: DEFAULT_CLOUD_MODEL.to_string(),
            cloud_api_key: None,
            request_timeout_secs: 30,
            status_timeout_secs: 5,
            pull_timeout_secs: 1200,
        }
    }
}

fn parse_builtin_url(s: &str) -> Url {
    Url::parse(s).unwrap_or_else(|e| panic!("built-in endpoint '{}' is invalid: {}", s, e))
}

impl ProviderConfig {
    pub fn has_cloud_api_key(&self) -> bool {
        self.cloud_api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    fn sanitize(&mut self) {
        self.fallback_models.retain(|m| !m.trim().is_empty());
        if self.primary_model.trim().is_empty() {
            self.primary_model = DEFAULT_PRIMARY_MODEL.to_string();
        }
        if self.cloud_model.trim().is_empty() {
            self.cloud_model = DEFAULT_CLOUD_MODEL.to_string();
        }
        self.request_timeout_secs = self.request_timeout_secs.max(1);
        self.status_timeout_secs = self.status_timeout_secs.max(1);
        self.pull_timeout_secs = self.pull_timeout_secs.max(1);
        ensure_trailing_slash(&mut self.local_endpoint);
        ensure_trailing_slash(&mut self.cloud_endpoint);
    }
}

/// Relative joins replace the last path segment unless the base ends in `/`
fn ensure_trailing_slash(url: &mut Url) {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("active_provider", &self.active_provider)
            .field("local_endpoint", &self.local_endpoint.as_str())
            .field("primary_model", &self.primary_model)
            .field("fallback_models", &self.fallback_models)
            .field("cloud_endpoint", &self.cloud_endpoint.as_str())
            .field("cloud_model", &self.cloud_model)
            .field("cloud_api_key", &mask_secret(self.cloud_api_key.as_deref()))
            .finish()
    }
}

/// Render a secret for display: the last four characters at most.
pub fn mask_secret(secret: Option<&str>) -> String {
    match secret {
        None | Some("") => "(not set)".to_string(),
        Some(s) if s.chars().count() <= 8 => "****".to_string(),
        Some(s) => {
            let tail: String = s
                .chars()
                .rev()
                .take(4)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            format!("****{}", tail)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialChange {
    Set(String),
    Clear,
    /// Clear only if the stored key is still this one
    ClearIf(String),
}

/// A partial change to [`ProviderConfig`]. Fields left `None` are untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigUpdate {
    pub active_provider: Option<Provider>,
    pub local_endpoint: Option<Url>,
    pub primary_model: Option<String>,
    pub fallback_models: Option<Vec<String>>,
    pub cloud_endpoint: Option<Url>,
    pub cloud_model: Option<String>,
    pub cloud_api_key: Option<CredentialChange>,
}

impl ConfigUpdate {
    pub fn provider(mut self, provider: Provider) -> Self {
        self.active_provider = Some(provider);
        self
    }

    pub fn local_endpoint(mut self, endpoint: Url) -> Self {
        self.local_endpoint = Some(endpoint);
        self
    }

    pub fn primary_model(mut self, model: impl Into<String>) -> Self {
        self.primary_model = Some(model.into());
        self
    }

    pub fn fallback_models(mut self, models: Vec<String>) -> Self {
        self.fallback_models = Some(models);
        self
    }

    pub fn cloud_endpoint(mut self, endpoint: Url) -> Self {
        self.cloud_endpoint = Some(endpoint);
        self
    }

    pub fn cloud_model(mut self, model: impl Into<String>) -> Self {
        self.cloud_model = Some(model.into());
        self
    }

    /// Store a cloud API key. An empty key clears it.
    pub fn cloud_api_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.cloud_api_key = Some(if key.trim().is_empty() {
            CredentialChange::Clear
        } else {
            CredentialChange::Set(key.trim().to_string())
        });
        self
    }

    pub fn clear_cloud_api_key(mut self) -> Self {
        self.cloud_api_key = Some(CredentialChange::Clear);
        self
    }

    /// Clear the key only if it still equals `rejected`, leaving a key
    /// stored in the meantime untouched
    pub fn clear_cloud_api_key_if(mut self, rejected: impl Into<String>) -> Self {
        self.cloud_api_key = Some(CredentialChange::ClearIf(rejected.into()));
        self
    }

    /// Apply to `config`, reporting whether settings and/or the credential changed
    fn apply(self, config: &mut ProviderConfig) -> (bool, bool) {
        let before = config.clone();
        if let Some(p) = self.active_provider {
            config.active_provider = p;
        }
        if let Some(url) = self.local_endpoint {
            config.local_endpoint = url;
        }
        if let Some(m) = self.primary_model {
            config.primary_model = m;
        }
        if let Some(models) = self.fallback_models {
            config.fallback_models = models;
        }
        if let Some(url) = self.cloud_endpoint {
            config.cloud_endpoint = url;
        }
        if let Some(m) = self.cloud_model {
            config.cloud_model = m;
        }
        match self.cloud_api_key {
            Some(CredentialChange::Set(key)) => config.cloud_api_key = Some(key),
            Some(CredentialChange::Clear) => config.cloud_api_key = None,
            Some(CredentialChange::ClearIf(rejected)) => {
                if config.cloud_api_key.as_deref() == Some(rejected.as_str()) {
                    config.cloud_api_key = None;
                }
            }
            None => {}
        }
        config.sanitize();

        let credential_changed = before.cloud_api_key != config.cloud_api_key;
        let mut settings_before = before;
        settings_before.cloud_api_key = config.cloud_api_key.clone();
        (settings_before != *config, credential_changed)
    }
}

struct Persistence {
    dir: PathBuf,
    credentials: CredentialStore,
    /// Serializes writers so disk order matches in-memory order
    write_order: Mutex<()>,
}

struct ConfigLock {
    file: fs::File,
}

impl Drop for ConfigLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl Persistence {
    fn settings_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    fn load_settings(&self) -> ProviderConfig {
        let path = self.settings_path();
        if let Ok(content) = fs::read_to_string(&path) {
            match serde_json::from_str::<ProviderConfig>(&content) {
                Ok(mut config) => {
                    config.sanitize();
                    return config;
                }
                Err(err) => {
                    preserve_corrupt_config(&path, &content);
                    tracing::warn!(
                        "config file was corrupted ({}); a backup was saved and defaults were loaded",
                        err
                    );
                }
            }
        }
        ProviderConfig::default()
    }

    fn lock(&self) -> Result<ConfigLock> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| AssistantError::Config(format!("Failed to create config directory: {}", e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = fs::set_permissions(&self.dir, fs::Permissions::from_mode(0o700)) {
                tracing::warn!("failed to set config directory permissions: {}", e);
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.dir.join(LOCK_FILE))
            .map_err(|e| AssistantError::Config(format!("Failed to open config lock: {}", e)))?;

        let start = Instant::now();
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => return Ok(ConfigLock { file }),
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if start.elapsed() >= Duration::from_secs(LOCK_TIMEOUT_SECS) {
                        return Err(AssistantError::Config(format!(
                            "Timed out waiting for config lock ({}s)",
                            LOCK_TIMEOUT_SECS
                        )));
                    }
                    std::thread::sleep(Duration::from_millis(LOCK_RETRY_MS));
                }
                Err(err) => {
                    return Err(AssistantError::Config(format!(
                        "Failed to lock config: {}",
                        err
                    )))
                }
            }
        }
    }

    fn write_order(&self) -> MutexGuard<'_, ()> {
        match self.write_order.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Current settings file, if it exists and parses
    fn read_settings(&self) -> Option<ProviderConfig> {
        let content = fs::read_to_string(self.settings_path()).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Apply `update` to the file as it is on disk now, under the file lock,
    /// so another process's changes to other fields survive.
    fn save_settings(&self, update: &ConfigUpdate, snapshot: &ProviderConfig) -> Result<()> {
        let _lock = self.lock()?;
        let mut on_disk = self.read_settings().unwrap_or_else(|| snapshot.clone());
        update.clone().apply(&mut on_disk);
        let content = serde_json::to_string_pretty(&on_disk)
            .map_err(|e| AssistantError::Config(format!("Failed to serialize config: {}", e)))?;
        write_config_atomic(&self.settings_path(), &content)
            .map_err(|e| AssistantError::Config(format!("Failed to write config: {}", e)))
    }

    fn save_credential(&self, key: Option<&str>) -> Result<()> {
        self.credentials.write(key).map_err(|e| {
            if self.credentials == CredentialStore::Keychain {
                keyring::warn_keychain_error_once("API key", &e);
            }
            AssistantError::Config(format!(
                "Failed to store API key in {}: {}",
                self.credentials.label(),
                e
            ))
        })
    }
}

/// Shared, persisted provider configuration.
///
/// Cloning is cheap and every clone sees the same state. Reads return a
/// snapshot; `update` applies a whole [`ConfigUpdate`] under one write lock,
/// so concurrent updates never interleave their fields.
#[derive(Clone)]
pub struct ConfigStore {
    state: Arc<RwLock<ProviderConfig>>,
    persistence: Option<Arc<Persistence>>,
}

impl ConfigStore {
    /// Default settings directory (~/.config/dattoham)
    pub fn default_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(CONFIG_DIR_NAME))
    }

    /// Settings file location for display
    pub fn config_location() -> String {
        Self::default_dir()
            .map(|p| p.join(CONFIG_FILE).display().to_string())
            .unwrap_or_else(|| "~/.config/dattoham/config.json".to_string())
    }

    /// Open the store in the default directory. `GEMINI_API_KEY` seeds the
    /// credential when none is stored; it is never written back.
    pub fn open_default() -> Result<Self> {
        let dir = Self::default_dir()
            .ok_or_else(|| AssistantError::Config("Could not determine config directory".to_string()))?;
        let store = Self::open(&dir);
        {
            let mut guard = store.write_guard();
            if !guard.has_cloud_api_key() {
                if let Ok(key) = std::env::var("GEMINI_API_KEY") {
                    if !key.trim().is_empty() {
                        guard.cloud_api_key = Some(key.trim().to_string());
                    }
                }
            }
        }
        Ok(store)
    }

    /// Open (or lazily create) a store rooted at `dir`
    pub fn open(dir: &Path) -> Self {
        let persistence = Persistence {
            dir: dir.to_path_buf(),
            credentials: CredentialStore::for_dir(dir),
            write_order: Mutex::new(()),
        };
        let mut config = persistence.load_settings();
        match persistence.credentials.read() {
            Ok(key) => config.cloud_api_key = key,
            Err(err) => {
                if persistence.credentials == CredentialStore::Keychain {
                    keyring::warn_keychain_error_once("API key", &err);
                } else {
                    tracing::warn!("failed to read stored credentials: {}", err);
                }
            }
        }
        Self {
            state: Arc::new(RwLock::new(config)),
            persistence: Some(Arc::new(persistence)),
        }
    }

    /// A store that never touches disk
    pub fn in_memory(mut config: ProviderConfig) -> Self {
        config.sanitize();
        Self {
            state: Arc::new(RwLock::new(config)),
            persistence: None,
        }
    }

    /// Label of the backing credential store, for CLI messages
    pub fn credentials_label(&self) -> &'static str {
        self.persistence
            .as_ref()
            .map(|p| p.credentials.label())
            .unwrap_or("memory")
    }

    /// Snapshot of the current configuration
    pub fn get(&self) -> ProviderConfig {
        match self.state.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn write_guard(&self) -> std::sync::RwLockWriteGuard<'_, ProviderConfig> {
        match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Apply `update` atomically and persist it.
    ///
    /// The change is applied and snapshotted under the state lock, which is
    /// released before any disk or keychain work, so readers never wait on
    /// persistence. Writers are ordered by a separate mutex. The in-memory
    /// change stays applied even if persisting it fails; the returned error
    /// reports the failed write.
    ///
    /// This blocks on file locks and the keychain; async callers use
    /// [`ConfigStore::update_async`].
    pub fn update(&self, update: ConfigUpdate) -> Result<ProviderConfig> {
        let _order = self.persistence.as_ref().map(|p| p.write_order());
        let (snapshot, settings_changed, credential_changed) = {
            let mut guard = self.write_guard();
            let (settings_changed, credential_changed) = update.clone().apply(&mut guard);
            (guard.clone(), settings_changed, credential_changed)
        };

        if let Some(persistence) = &self.persistence {
            let mut first_err = None;
            if settings_changed {
                if let Err(e) = persistence.save_settings(&update, &snapshot) {
                    tracing::warn!("{}", e);
                    first_err = Some(e);
                }
            }
            if credential_changed {
                if let Err(e) = persistence.save_credential(snapshot.cloud_api_key.as_deref()) {
                    tracing::warn!("{}", e);
                    first_err.get_or_insert(e);
                }
            }
            if let Some(err) = first_err {
                return Err(err);
            }
        }

        tracing::debug!(
            provider = %snapshot.active_provider,
            settings_changed,
            credential_changed,
            "config updated"
        );
        Ok(snapshot)
    }

    /// [`ConfigStore::update`] on the blocking pool
    pub async fn update_async(&self, update: ConfigUpdate) -> Result<ProviderConfig> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.update(update))
            .await
            .map_err(|e| AssistantError::Config(format!("config update task failed: {}", e)))?
    }
}

impl fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigStore")
            .field("config", &self.get())
            .field(
                "dir",
                &self.persistence.as_ref().map(|p| p.dir.display().to_string()),
            )
            .finish()
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

fn write_config_atomic(path: &Path, content: &str) -> std::result::Result<(), String> {
    let tmp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)
        .map_err(|e| e.to_string())?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = file.set_permissions(fs::Permissions::from_mode(0o600)) {
            tracing::warn!("failed to set temp config file permissions: {}", e);
        }
    }

    file.write_all(content.as_bytes())
        .map_err(|e| e.to_string())?;
    drop(file);

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.to_string());
    }
    Ok(())
}
