//! Settings persistence for the formflow CLI.
//!
//! Settings live in a small JSON file in the standard configuration directory
//! (`~/.config/formflow/settings.json` on most platforms). A missing file yields the
//! defaults; a file that fails to parse is logged and also yields the defaults. The API
//! base URL and the access token can be overridden from the environment.

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dirs_next::config_dir;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::expand_tilde;

/// Environment variable allowing callers to override the settings file path.
pub const SETTINGS_PATH_ENV: &str = "FORMFLOW_SETTINGS_PATH";
/// Environment variable overriding [`Settings::api_base_url`].
pub const API_BASE_ENV: &str = "FORMFLOW_API_BASE";
/// Environment variable overriding [`Settings::access_token`].
pub const ACCESS_TOKEN_ENV: &str = "FORMFLOW_ACCESS_TOKEN";

/// Default filename for the JSON payload.
pub const SETTINGS_FILE_NAME: &str = "settings.json";

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Error surfaced when reading or writing settings fails.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// I/O failure (for example, permissions or missing directory).
    #[error("settings I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Serialization failure while saving.
    #[error("settings serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persisted settings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub api_base_url: String,
    /// User the engine saves drafts for.
    pub user_id: String,
    pub request_timeout_secs: u64,
    /// Tracing filter used when `RUST_LOG` is unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_filter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            user_id: String::new(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            log_filter: None,
            access_token: None,
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("api_base_url", &self.api_base_url)
            .field("user_id", &self.user_id)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("log_filter", &self.log_filter)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Settings {
    /// Load settings from the default path and apply environment overrides.
    pub fn load() -> Result<Self, SettingsError> {
        let mut settings = Self::load_from(&default_settings_path())?;
        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Load settings from `path` without environment overrides.
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        match fs::read_to_string(path) {
            Ok(data) => match serde_json::from_str(&data) {
                Ok(settings) => {
                    debug!(path = %path.display(), "settings loaded");
                    Ok(settings)
                }
                Err(error) => {
                    warn!(
                        path = %path.display(),
                        error = %error,
                        "Failed to parse settings file; using defaults"
                    );
                    Ok(Self::default())
                }
            },
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(SettingsError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Write the settings to `path`, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        let io_error = |source: std::io::Error| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data).map_err(io_error)?;
        Ok(())
    }

    /// Replace file values with `FORMFLOW_API_BASE` and `FORMFLOW_ACCESS_TOKEN` when set.
    pub fn apply_env_overrides(&mut self) {
        if let Some(base_url) = non_empty_env(API_BASE_ENV) {
            self.api_base_url = base_url;
        }
        if let Some(token) = non_empty_env(ACCESS_TOKEN_ENV) {
            self.access_token = Some(token);
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Resolved location of the settings file.
pub fn default_settings_path() -> PathBuf {
    if let Some(path) = non_empty_env(SETTINGS_PATH_ENV) {
        return expand_tilde(&path);
    }

    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("formflow")
        .join(SETTINGS_FILE_NAME)
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let settings = Settings::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn saved_settings_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILE_NAME);
        let settings = Settings {
            api_base_url: "https://api.example.com".into(),
            user_id: "citizen-1".into(),
            request_timeout_secs: 10,
            log_filter: Some("formflow_engine=debug".into()),
            access_token: None,
        };

        settings.save_to(&path).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("\"apiBaseUrl\""));
        assert!(!written.contains("accessToken"));
        assert_eq!(Settings::load_from(&path).unwrap(), settings);
    }

    #[test]
    fn partial_and_invalid_files_fall_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);

        fs::write(&path, r#"{"userId": "citizen-2"}"#).unwrap();
        let partial = Settings::load_from(&path).unwrap();
        assert_eq!(partial.user_id, "citizen-2");
        assert_eq!(partial.api_base_url, DEFAULT_API_BASE_URL);

        fs::write(&path, "not json").unwrap();
        assert_eq!(Settings::load_from(&path).unwrap(), Settings::default());
    }

    #[test]
    fn environment_overrides_file_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        Settings {
            api_base_url: "https://file.example.com".into(),
            ..Settings::default()
        }
        .save_to(&path)
        .unwrap();

        temp_env::with_vars(
            [
                (SETTINGS_PATH_ENV, Some(path.to_str().unwrap())),
                (API_BASE_ENV, Some("https://env.example.com")),
                (ACCESS_TOKEN_ENV, Some("secret-token")),
            ],
            || {
                let settings = Settings::load().unwrap();
                assert_eq!(settings.api_base_url, "https://env.example.com");
                assert_eq!(settings.access_token.as_deref(), Some("secret-token"));
                assert!(!format!("{:?}", settings).contains("secret-token"));
            },
        );
    }

    #[test]
    fn default_path_honors_env_override() {
        let override_path = "~/custom/settings.json";
        temp_env::with_var(SETTINGS_PATH_ENV, Some(override_path), || {
            assert_eq!(default_settings_path(), expand_tilde(override_path));
        });
        temp_env::with_var(SETTINGS_PATH_ENV, Some("   "), || {
            assert!(default_settings_path().ends_with("formflow/settings.json"));
        });
    }
}
