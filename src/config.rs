use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;

use crate::error::ConfigError;

pub const DEFAULT_CACHE_DURATION_HOURS: u64 = 168;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_PROBE_URL: &str = "https://www.google.com/";
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 3_000;
pub const DEFAULT_CONNECTIVITY_RECHECK_SECS: u64 = 300;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 3_000;
pub const DEFAULT_USER_AGENT: &str = "LyricGlow/1.0";

const ENV_CACHE_HOURS: &str = "LYRICGLOW_CACHE_DURATION_HOURS";
const ENV_CACHE_DIR: &str = "LYRICGLOW_CACHE_DIR";
const ENV_SPOTIFY_TOKEN: &str = "LYRICGLOW_SPOTIFY_TOKEN";

/// Settings read once at startup. Every field is optional in the file;
/// the accessors below supply the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_duration_hours: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe_timeout_ms: Option<u64>,

    /// Seconds before a known connectivity state is probed again.
    /// `0` keeps the first answer for the life of the process.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connectivity_recheck_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub spotify_access_token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    fn project_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from("", "", "lyricglow")
    }

    /// Location of the config file (`<config dir>/lyricglow/config.toml`).
    pub fn get_config_path() -> Result<PathBuf, ConfigError> {
        Self::project_dirs()
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load the config file, falling back to an empty config when it does
    /// not exist, then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::get_config_path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_env()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Config::new());
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let toml_string = toml::to_string_pretty(self)?;
        fs::write(path, toml_string).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `LYRICGLOW_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_CACHE_HOURS) {
            let hours = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                name: ENV_CACHE_HOURS,
                value: value.clone(),
            })?;
            self.cache_duration_hours = Some(hours);
        }
        if let Some(dir) = lookup(ENV_CACHE_DIR).filter(|v| !v.is_empty()) {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(token) = lookup(ENV_SPOTIFY_TOKEN).filter(|v| !v.is_empty()) {
            self.spotify_access_token = Some(token);
        }
        Ok(())
    }

    /// Merge this config with another, preferring values from other
    pub fn merge(&mut self, other: &Config) {
        if other.cache_duration_hours.is_some() {
            self.cache_duration_hours = other.cache_duration_hours;
        }
        if other.cache_dir.is_some() {
            self.cache_dir = other.cache_dir.clone();
        }
        if other.request_timeout_ms.is_some() {
            self.request_timeout_ms = other.request_timeout_ms;
        }
        if other.probe_url.is_some() {
            self.probe_url = other.probe_url.clone();
        }
        if other.probe_timeout_ms.is_some() {
            self.probe_timeout_ms = other.probe_timeout_ms;
        }
        if other.connectivity_recheck_secs.is_some() {
            self.connectivity_recheck_secs = other.connectivity_recheck_secs;
        }
        if other.poll_interval_ms.is_some() {
            self.poll_interval_ms = other.poll_interval_ms;
        }
        if other.spotify_access_token.is_some() {
            self.spotify_access_token = other.spotify_access_token.clone();
        }
        if other.user_agent.is_some() {
            self.user_agent = other.user_agent.clone();
        }
    }

    pub fn cache_expiry(&self) -> Duration {
        let hours = self
            .cache_duration_hours
            .unwrap_or(DEFAULT_CACHE_DURATION_HOURS);
        Duration::from_secs(hours * 60 * 60)
    }

    /// Cache root: the configured directory, else the platform cache dir.
    pub fn cache_root(&self) -> PathBuf {
        if let Some(dir) = &self.cache_dir {
            return dir.clone();
        }
        Self::project_dirs()
            .map(|dirs| dirs.cache_dir().to_path_buf())
            .unwrap_or_else(|| std::env::temp_dir().join("lyricglow"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS))
    }

    pub fn probe_url(&self) -> &str {
        self.probe_url.as_deref().unwrap_or(DEFAULT_PROBE_URL)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms.unwrap_or(DEFAULT_PROBE_TIMEOUT_MS))
    }

    /// `None` means the connectivity answer is never re-probed.
    pub fn connectivity_recheck(&self) -> Option<Duration> {
        match self
            .connectivity_recheck_secs
            .unwrap_or(DEFAULT_CONNECTIVITY_RECHECK_SECS)
        {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS))
    }

    pub fn user_agent(&self) -> &str {
        self.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT)
    }

    /// Print the effective settings in a human-readable format
    pub fn print(&self, title: &str) {
        println!("{}:", title);
        println!("  Cache directory:    {}", self.cache_root().display());
        println!("  Cache expiry:       {} hours", self.cache_expiry().as_secs() / 3600);
        println!("  Request timeout:    {} ms", self.request_timeout().as_millis());
        println!("  Probe URL:          {}", self.probe_url());
        println!("  Probe timeout:      {} ms", self.probe_timeout().as_millis());
        match self.connectivity_recheck() {
            Some(every) => println!("  Connectivity check: every {} s", every.as_secs()),
            None => println!("  Connectivity check: once per process"),
        }
        println!("  Poll interval:      {} ms", self.poll_interval().as_millis());
        println!(
            "  Spotify token:      {}",
            if self.spotify_access_token.is_some() { "configured" } else { "not set" }
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::new();
        assert_eq!(config.cache_expiry(), Duration::from_secs(168 * 3600));
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.probe_timeout(), Duration::from_secs(3));
        assert_eq!(config.connectivity_recheck(), Some(Duration::from_secs(300)));
        assert_eq!(config.user_agent(), "LyricGlow/1.0");
    }

    #[test]
    fn test_zero_recheck_means_memoize() {
        let config = Config {
            connectivity_recheck_secs: Some(0),
            ..Config::default()
        };
        assert_eq!(config.connectivity_recheck(), None);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config {
            cache_duration_hours: Some(24),
            cache_dir: Some(PathBuf::from("/tmp/lyricglow-test")),
            ..Config::default()
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.cache_expiry(), Duration::from_secs(24 * 3600));
    }

    #[test]
    fn test_missing_file_is_empty_config() {
        let dir = TempDir::new().unwrap();
        let loaded = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded, Config::new());
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "cache_duration_hours = \"soon\"").unwrap();
        assert!(matches!(Config::load_from(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_merge_prefers_other() {
        let mut base = Config {
            cache_duration_hours: Some(1),
            poll_interval_ms: Some(500),
            ..Config::default()
        };
        let overlay = Config {
            cache_duration_hours: Some(2),
            ..Config::default()
        };
        base.merge(&overlay);
        assert_eq!(base.cache_duration_hours, Some(2));
        assert_eq!(base.poll_interval_ms, Some(500));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::new();
        config
            .apply_overrides(|name| match name {
                ENV_CACHE_HOURS => Some("12".to_string()),
                ENV_SPOTIFY_TOKEN => Some("abc".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.cache_duration_hours, Some(12));
        assert_eq!(config.spotify_access_token.as_deref(), Some("abc"));
        assert_eq!(config.cache_dir, None);

        let mut config = Config::new();
        let result = config.apply_overrides(|name| {
            (name == ENV_CACHE_HOURS).then(|| "a week".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidEnv { .. })));
    }

    #[test]
    fn test_cache_dir_env_override() {
        let mut config = Config::new();
        config
            .apply_overrides(|name| (name == ENV_CACHE_DIR).then(|| "/var/cache/glow".to_string()))
            .unwrap();
        assert_eq!(config.cache_dir, Some(PathBuf::from("/var/cache/glow")));

        // An empty value leaves the configured directory alone.
        let mut config = Config::new();
        config.cache_dir = Some(PathBuf::from("/srv/glow"));
        config
            .apply_overrides(|name| (name == ENV_CACHE_DIR).then(String::new))
            .unwrap();
        assert_eq!(config.cache_dir, Some(PathBuf::from("/srv/glow")));
    }
}
