//! Application configuration for tbunny.
//!
//! Settings live in `config.yaml` inside the config directory. A missing
//! file yields defaults; a malformed one is an error the caller decides how
//! to report.

#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// File name of the application settings inside the config directory.
pub const CONFIG_FILE: &str = "config.yaml";

/// Directory name used under the platform config home.
pub const APP_DIR: &str = "tbunny";

/// Errors raised while resolving or loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No config directory was given and the platform has no config home.
    #[error("unable to determine a configuration directory")]
    NoConfigDir,

    /// Reading the file failed.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that could not be read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid YAML for [`AppConfig`].
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// File that could not be parsed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_yaml::Error,
    },
}

/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Terminal UI settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UiConfig {
    /// Capture mouse events.
    pub enable_mouse: bool,
    /// How long the splash screen is shown, in milliseconds.
    pub splash_duration_ms: u64,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            enable_mouse: true,
            splash_duration_ms: 1000,
        }
    }
}

impl UiConfig {
    /// Splash screen duration.
    #[must_use]
    pub fn splash_duration(&self) -> Duration {
        Duration::from_millis(self.splash_duration_ms)
    }
}

/// Contents of `config.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    /// UI settings.
    pub ui: UiConfig,
    /// Upper bound on establishing a cluster connection, in seconds.
    pub connection_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ui: UiConfig::default(),
            connection_timeout_secs: 15,
        }
    }
}

impl AppConfig {
    /// Load `config.yaml` from `config_dir`, falling back to defaults when
    /// the file does not exist.
    pub fn load(config_dir: &Path) -> Result<Self> {
        let path = config_dir.join(CONFIG_FILE);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => return Err(ConfigError::Io { path, source }),
        };

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config = serde_yaml::from_str(&content)
            .map_err(|source| ConfigError::Parse { path: path.clone(), source })?;
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Connection timeout as a [`Duration`]; zero is treated as one second.
    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs.max(1))
    }
}

/// Resolve the configuration directory.
///
/// An explicit directory wins (a leading `~` is expanded to the home
/// directory); otherwise `tbunny` under the platform config home is used.
pub fn resolve_config_dir(explicit: Option<&str>) -> Result<PathBuf> {
    match explicit {
        Some(dir) if !dir.is_empty() => Ok(expand_home(dir, dirs::home_dir().as_deref())),
        _ => dirs::config_dir()
            .map(|base| base.join(APP_DIR))
            .ok_or(ConfigError::NoConfigDir),
    }
}

fn expand_home(path: &str, home: Option<&Path>) -> PathBuf {
    let Some(home) = home else {
        return PathBuf::from(path);
    };
    if path == "~" {
        return home.to_path_buf();
    }
    match path.strip_prefix("~/") {
        Some(rest) => home.join(rest),
        None => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = AppConfig::load(dir.path()).expect("load");
        assert_eq!(config, AppConfig::default());
        assert!(config.ui.enable_mouse);
        assert_eq!(config.ui.splash_duration(), Duration::from_secs(1));
        assert_eq!(config.connection_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(CONFIG_FILE), "ui:\n  enableMouse: false\n")
            .expect("write");

        let config = AppConfig::load(dir.path()).expect("load");
        assert!(!config.ui.enable_mouse);
        assert_eq!(config.ui.splash_duration_ms, 1000);
        assert_eq!(config.connection_timeout_secs, 15);
    }

    #[test]
    fn test_full_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "ui:\n  enableMouse: true\n  splashDurationMs: 0\nconnectionTimeoutSecs: 30\n",
        )
        .expect("write");

        let config = AppConfig::load(dir.path()).expect("load");
        assert_eq!(config.ui.splash_duration(), Duration::ZERO);
        assert_eq!(config.connection_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(CONFIG_FILE), "connectionTimeoutSecs: soon\n").expect("write");

        let err = AppConfig::load(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.yaml"));
    }

    #[test]
    fn test_zero_timeout_is_clamped() {
        let config = AppConfig {
            connection_timeout_secs: 0,
            ..AppConfig::default()
        };
        assert_eq!(config.connection_timeout(), Duration::from_secs(1));
    }

    #[test_case("~", "/home/ops" ; "bare tilde")]
    #[test_case("~/cfg/tbunny", "/home/ops/cfg/tbunny" ; "tilde prefix")]
    #[test_case("/etc/tbunny", "/etc/tbunny" ; "absolute")]
    #[test_case("~other/x", "~other/x" ; "other user untouched")]
    fn test_expand_home(input: &str, expected: &str) {
        let home = PathBuf::from("/home/ops");
        assert_eq!(expand_home(input, Some(&home)), PathBuf::from(expected));
    }

    #[test]
    fn test_expand_home_without_home() {
        assert_eq!(expand_home("~/x", None), PathBuf::from("~/x"));
    }

    #[test]
    fn test_explicit_dir_wins() {
        let dir = resolve_config_dir(Some("/tmp/tbunny-test")).expect("resolve");
        assert_eq!(dir, PathBuf::from("/tmp/tbunny-test"));
    }
}
