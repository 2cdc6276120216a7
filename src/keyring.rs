//! Credential storage for the cloud API key
//!
//! The key lives in a single system keychain entry, stored as JSON. When the
//! keychain is disabled (tests, `DATTOHAM_DISABLE_KEYRING=1`) a 0600 JSON
//! file next to the settings file is used instead.

use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

const KEYRING_SERVICE: &str = "dattoham-credentials";
const KEYRING_USERNAME: &str = "default";
const CREDENTIALS_FILE: &str = "credentials.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredCredentials {
    #[serde(skip_serializing_if = "Option::is_none")]
    cloud_api_key: Option<String>,
}

type KeyringResult<T> = Result<T, String>;

static KEYRING_ERROR_WARNED: AtomicBool = AtomicBool::new(false);

fn keyring_disabled() -> bool {
    if cfg!(test) {
        return true;
    }
    matches!(
        std::env::var("DATTOHAM_DISABLE_KEYRING")
            .unwrap_or_default()
            .to_lowercase()
            .as_str(),
        "1" | "true" | "yes"
    )
}

/// Where the cloud API key is kept
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialStore {
    Keychain,
    File(PathBuf),
}

impl CredentialStore {
    /// Pick the store for a settings directory
    pub fn for_dir(dir: &Path) -> Self {
        if let Ok(path) = std::env::var("DATTOHAM_CREDENTIALS_FILE") {
            let trimmed = path.trim();
            if !trimmed.is_empty() && !cfg!(test) {
                return Self::File(PathBuf::from(trimmed));
            }
        }
        if keyring_disabled() {
            Self::File(dir.join(CREDENTIALS_FILE))
        } else {
            Self::Keychain
        }
    }

    /// Human-friendly label used in CLI messages
    pub fn label(&self) -> &'static str {
        match self {
            Self::Keychain => "system keychain",
            Self::File(_) => "local credentials file",
        }
    }

    pub fn read(&self) -> KeyringResult<Option<String>> {
        let creds = match self {
            Self::Keychain => read_keychain()?,
            Self::File(path) => read_file(path)?,
        };
        Ok(creds.cloud_api_key.filter(|k| !k.is_empty()))
    }

    /// Store the key, or remove it when `key` is `None`
    pub fn write(&self, key: Option<&str>) -> KeyringResult<()> {
        let creds = StoredCredentials {
            cloud_api_key: key.filter(|k| !k.is_empty()).map(str::to_string),
        };
        match self {
            Self::Keychain => write_keychain(&creds),
            Self::File(path) => write_file(path, &creds),
        }
    }
}

/// Warn about keychain errors only once per session
pub fn warn_keychain_error_once(context: &str, err: &str) {
    if KEYRING_ERROR_WARNED.swap(true, Ordering::Relaxed) {
        return;
    }
    tracing::warn!(
        "couldn't access system keychain for {}: {} (set DATTOHAM_DISABLE_KEYRING=1 to use a local file)",
        context,
        err
    );
}

fn keyring_entry() -> Result<Entry, keyring::Error> {
    Entry::new(KEYRING_SERVICE, KEYRING_USERNAME)
}

fn read_keychain() -> KeyringResult<StoredCredentials> {
    let entry = keyring_entry().map_err(|e| e.to_string())?;
    match entry.get_password() {
        Ok(json) => {
            serde_json::from_str(&json).map_err(|e| format!("Failed to parse credentials: {}", e))
        }
        Err(keyring::Error::NoEntry) => Ok(StoredCredentials::default()),
        Err(err) => Err(err.to_string()),
    }
}

fn write_keychain(creds: &StoredCredentials) -> KeyringResult<()> {
    let entry = keyring_entry().map_err(|e| e.to_string())?;
    if creds.cloud_api_key.is_none() {
        return match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(err.to_string()),
        };
    }
    let json = serde_json::to_string(creds)
        .map_err(|e| format!("Failed to serialize credentials: {}", e))?;
    entry.set_password(&json).map_err(|e| e.to_string())
}

fn read_file(path: &Path) -> KeyringResult<StoredCredentials> {
    if !path.exists() {
        return Ok(StoredCredentials::default());
    }
    let json = fs::read_to_string(path).map_err(|e| {
        format!(
            "Failed to read credentials file '{}': {}",
            path.display(),
            e
        )
    })?;
    serde_json::from_str(&json).map_err(|e| {
        format!(
            "Failed to parse credentials file '{}': {}",
            path.display(),
            e
        )
    })
}

fn write_file(path: &Path, creds: &StoredCredentials) -> KeyringResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            format!(
                "Failed to create credentials directory '{}': {}",
                parent.display(),
                e
            )
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(parent, fs::Permissions::from_mode(0o700));
        }
    }

    let content = serde_json::to_string(creds)
        .map_err(|e| format!("Failed to serialize credentials: {}", e))?;
    let tmp_path = path.with_extension("json.tmp");
    let mut tmp_file = fs::File::create(&tmp_path).map_err(|e| {
        format!(
            "Failed to create temp credentials file '{}': {}",
            tmp_path.display(),
            e
        )
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = tmp_file.set_permissions(fs::Permissions::from_mode(0o600));
    }

    tmp_file.write_all(content.as_bytes()).map_err(|e| {
        format!(
            "Failed to write credentials file '{}': {}",
            tmp_path.display(),
            e
        )
    })?;
    drop(tmp_file);
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        format!(
            "Failed to finalize credentials file '{}': {}",
            path.display(),
            e
        )
    })
}
