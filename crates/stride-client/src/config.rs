use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ClientError;

const DEFAULT_GATEWAY_URL: &str = "ws://127.0.0.1:3000/gateway";
const DEFAULT_TYPING_TTL: Duration = Duration::from_secs(8);

/// Client settings. Built explicitly and handed to [`crate::ChatClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint of the gateway, e.g. `ws://host:3000/gateway`.
    pub gateway_url: String,
    /// How long a typing indicator survives without a fresh `typing` event.
    pub typing_ttl: Duration,
    pub preferences_path: PathBuf,
}

impl ClientConfig {
    pub fn new(gateway_url: impl Into<String>) -> Self {
        Self {
            gateway_url: gateway_url.into(),
            typing_ttl: DEFAULT_TYPING_TTL,
            preferences_path: PathBuf::from("stride-preferences.json"),
        }
    }

    /// `STRIDE_GATEWAY_URL`, `STRIDE_TYPING_TTL_SECS` and
    /// `STRIDE_PREFERENCES_PATH`, falling back to local defaults.
    pub fn from_env() -> Self {
        let mut config =
            Self::new(std::env::var("STRIDE_GATEWAY_URL").unwrap_or_else(|_| DEFAULT_GATEWAY_URL.into()));
        if let Some(secs) = std::env::var("STRIDE_TYPING_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.typing_ttl = Duration::from_secs(secs);
        }
        if let Ok(path) = std::env::var("STRIDE_PREFERENCES_PATH") {
            config.preferences_path = path.into();
        }
        config
    }

    pub fn with_typing_ttl(mut self, ttl: Duration) -> Self {
        self.typing_ttl = ttl;
        self
    }

    pub fn with_preferences_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.preferences_path = path.into();
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_GATEWAY_URL)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    #[default]
    Light,
    Dark,
}

/// UI preferences that outlive a session. The credential is deliberately
/// not part of this.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub theme: ThemeMode,
    pub seen_onboarding: bool,
}

/// Preferences backed by a JSON file.
#[derive(Debug)]
pub struct PreferenceStore {
    path: PathBuf,
    current: Preferences,
}

impl PreferenceStore {
    /// Loads the file at `path`. A missing file yields defaults.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref().to_path_buf();
        let current = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No preferences at {}, using defaults", path.display());
                Preferences::default()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, current })
    }

    /// Loads the file named by [`ClientConfig::preferences_path`].
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        Self::open(&config.preferences_path)
    }

    pub fn get(&self) -> &Preferences {
        &self.current
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Applies `f` and writes the result. The in-memory copy only changes if
    /// the write succeeds.
    pub fn update(&mut self, f: impl FnOnce(&mut Preferences)) -> Result<&Preferences, ClientError> {
        let mut next = self.current.clone();
        f(&mut next);
        if next != self.current {
            write_atomic(&self.path, &serde_json::to_vec_pretty(&next)?)?;
            self.current = next;
        }
        Ok(&self.current)
    }

    pub fn set_theme(&mut self, theme: ThemeMode) -> Result<&Preferences, ClientError> {
        self.update(|p| p.theme = theme)
    }

    pub fn toggle_theme(&mut self) -> Result<&Preferences, ClientError> {
        self.update(|p| {
            p.theme = match p.theme {
                ThemeMode::Light => ThemeMode::Dark,
                ThemeMode::Dark => ThemeMode::Light,
            }
        })
    }

    pub fn mark_onboarding_seen(&mut self) -> Result<&Preferences, ClientError> {
        self.update(|p| p.seen_onboarding = true)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        warn!("Failed to replace {}: {}", path.display(), e);
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("stride-prefs-{}", uuid::Uuid::new_v4()))
            .join(name)
    }

    #[test]
    fn missing_file_yields_defaults() {
        let store = PreferenceStore::open(temp_path("prefs.json")).unwrap();
        assert_eq!(store.get(), &Preferences::default());
        assert_eq!(store.get().theme, ThemeMode::Light);
    }

    #[test]
    fn updates_persist_across_reopen() {
        let path = temp_path("prefs.json");
        let mut store = PreferenceStore::open(&path).unwrap();
        store.toggle_theme().unwrap();
        store.mark_onboarding_seen().unwrap();

        let reopened = PreferenceStore::open(&path).unwrap();
        assert_eq!(reopened.get().theme, ThemeMode::Dark);
        assert!(reopened.get().seen_onboarding);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("token"));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn store_follows_the_configured_path() {
        let path = temp_path("prefs.json");
        let config = ClientConfig::new("ws://x").with_preferences_path(&path);
        let mut store = PreferenceStore::from_config(&config).unwrap();
        assert_eq!(store.path(), path.as_path());
        store.set_theme(ThemeMode::Dark).unwrap();

        let reopened = PreferenceStore::from_config(&config).unwrap();
        assert_eq!(reopened.get().theme, ThemeMode::Dark);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let path = temp_path("prefs.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(PreferenceStore::open(&path), Err(ClientError::Json(_))));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn typing_ttl_defaults_to_eight_seconds() {
        assert_eq!(ClientConfig::new("ws://x").typing_ttl, Duration::from_secs(8));
    }
}
