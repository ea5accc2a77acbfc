use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use formflow_util::{Settings, settings::ACCESS_TOKEN_ENV};
use tracing::debug;

use crate::TokenRefresher;

/// Re-reads the access token from the settings file, with `FORMFLOW_ACCESS_TOKEN` taking
/// precedence, whenever the backend rejects the current one.
#[derive(Debug, Clone)]
pub struct SettingsTokenRefresher {
    path: PathBuf,
}

impl SettingsTokenRefresher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TokenRefresher for SettingsTokenRefresher {
    async fn refresh(&self) -> Result<String> {
        let mut settings = Settings::load_from(&self.path).with_context(|| format!("reload settings from {}", self.path.display()))?;
        settings.apply_env_overrides();
        let token = settings
            .access_token
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| anyhow!("no access token in {} or ${}", self.path.display(), ACCESS_TOKEN_ENV))?;
        debug!(path = %self.path.display(), "access token reloaded");
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn refresh_blocking(refresher: &SettingsTokenRefresher) -> Result<String> {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        runtime.block_on(refresher.refresh())
    }

    #[test]
    fn token_is_reloaded_from_settings_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"accessToken": "rotated-token"}"#).unwrap();
        let refresher = SettingsTokenRefresher::new(path.clone());

        temp_env::with_var_unset(ACCESS_TOKEN_ENV, || {
            assert_eq!(refresh_blocking(&refresher).unwrap(), "rotated-token");
        });
        temp_env::with_var(ACCESS_TOKEN_ENV, Some("env-token"), || {
            assert_eq!(refresh_blocking(&refresher).unwrap(), "env-token");
        });
    }

    #[test]
    fn missing_token_fails_the_refresh() {
        let dir = tempdir().unwrap();
        let refresher = SettingsTokenRefresher::new(dir.path().join("absent.json"));

        temp_env::with_var_unset(ACCESS_TOKEN_ENV, || {
            let error = refresh_blocking(&refresher).unwrap_err();
            assert!(error.to_string().contains("no access token"));
        });
    }
}
