use std::{
    env, fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

const STORAGE_DIR_NAME: &str = ".sandbox-dashboard";
const SETTINGS_FILE: &str = "settings.json";
pub const API_URL_ENV: &str = "SANDBOX_DASHBOARD_API_URL";
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
const DEFAULT_NOTICE_TTL_SECS: u64 = 8;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_base_url: String,
    pub session_cookie: Option<String>,
    pub notice_ttl_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_owned(),
            session_cookie: None,
            notice_ttl_secs: DEFAULT_NOTICE_TTL_SECS,
        }
    }
}

impl Settings {
    pub fn notice_ttl(&self) -> Duration {
        Duration::from_secs(self.notice_ttl_secs.max(1))
    }

    /// Applies `SANDBOX_DASHBOARD_API_URL` on top of the stored value.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = env::var(API_URL_ENV)
            && !url.trim().is_empty()
        {
            info!(url = %url, "backend URL overridden from environment");
            self.api_base_url = url.trim().to_owned();
        }
        self
    }

    pub fn signed_out(&self) -> Self {
        Self {
            session_cookie: None,
            ..self.clone()
        }
    }
}

pub struct SettingsStore {
    settings_path: PathBuf,
}

impl SettingsStore {
    pub fn initialize() -> Result<Self, SettingsError> {
        let home = env::var("HOME").map_err(|_| SettingsError::HomeDirMissing)?;
        Self::in_dir(&PathBuf::from(home).join(STORAGE_DIR_NAME))
    }

    pub fn in_dir(dir: &Path) -> Result<Self, SettingsError> {
        if !dir.exists() {
            fs::create_dir_all(dir)?;
        }
        Ok(Self {
            settings_path: dir.join(SETTINGS_FILE),
        })
    }

    pub fn load(&self) -> Result<Settings, SettingsError> {
        match fs::read_to_string(&self.settings_path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Settings::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn persist(&self, settings: &Settings) -> Result<(), SettingsError> {
        let data = serde_json::to_string_pretty(settings)?;
        fs::write(&self.settings_path, data)?;
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("HOME environment variable is not set; cannot store settings under ~/.sandbox-dashboard")]
    HomeDirMissing,
    #[error("I/O error while handling stored settings: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to (de)serialize stored settings: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SettingsStore::in_dir(dir.path()).expect("store");
        assert_eq!(store.load().expect("load"), Settings::default());
    }

    #[test]
    fn persisted_settings_round_trip_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SettingsStore::in_dir(&dir.path().join("nested")).expect("store");
        let settings = Settings {
            api_base_url: "https://dash.example.com".into(),
            session_cookie: Some("session=abc".into()),
            notice_ttl_secs: 3,
        };
        store.persist(&settings).expect("persist");
        assert_eq!(store.load().expect("load"), settings);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join(SETTINGS_FILE),
            r#"{"session_cookie": "session=xyz"}"#,
        )
        .expect("write");
        let store = SettingsStore::in_dir(dir.path()).expect("store");
        let settings = store.load().expect("load");
        assert_eq!(settings.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(settings.session_cookie.as_deref(), Some("session=xyz"));
        assert_eq!(settings.notice_ttl(), Duration::from_secs(8));
    }

    #[test]
    fn signing_out_drops_only_the_session() {
        let settings = Settings {
            session_cookie: Some("session=abc".into()),
            notice_ttl_secs: 5,
            ..Settings::default()
        };
        let signed_out = settings.signed_out();
        assert!(signed_out.session_cookie.is_none());
        assert_eq!(signed_out.notice_ttl_secs, 5);
    }

    #[test]
    fn corrupt_file_is_a_serialization_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join(SETTINGS_FILE), "not json").expect("write");
        let store = SettingsStore::in_dir(dir.path()).expect("store");
        assert!(matches!(store.load(), Err(SettingsError::Serialization(_))));
    }
}
