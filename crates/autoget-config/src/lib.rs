#![forbid(unsafe_code)]

//! Configuration model, loading, and validation.
//!
//! The daemon is configured through a single TOML file. Validation runs once
//! at startup; any failure is fatal and the process exits non-zero.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// Upload-history retention window; a seeding policy cannot look back
/// further than the store keeps samples.
const MAX_POLICY_INTERVAL_DAYS: u64 = 30;

/// Result alias for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {path}")]
    Read {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The configuration file is not valid TOML.
    #[error("failed to parse config file {path}")]
    Parse {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },
    /// A configuration value failed validation.
    #[error("invalid configuration: {field}: {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: String,
        /// Why the value was rejected.
        reason: &'static str,
    },
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// TCP port the HTTP façade listens on.
    pub port: u16,
    /// Path of the SQLite status database.
    pub database_path: PathBuf,
    /// Base URL of the organizer service.
    pub organizer_url: String,
    /// Downloader name → downloader binding.
    #[serde(default)]
    pub downloaders: BTreeMap<String, DownloaderConfig>,
}

/// A named binding of a torrent daemon plus its working directories.
#[derive(Debug, Clone, Deserialize)]
pub struct DownloaderConfig {
    /// Transmission RPC endpoint and directory set.
    pub transmission: TransmissionConfig,
    /// Optional daily seeding policy; absent means torrents seed forever.
    #[serde(default)]
    pub seeding_policy: Option<SeedingPolicy>,
}

/// Connection and directory settings for one Transmission daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct TransmissionConfig {
    /// RPC endpoint URL.
    pub url: String,
    /// Optional basic-auth username.
    #[serde(default)]
    pub username: Option<String>,
    /// Optional basic-auth password.
    #[serde(default)]
    pub password: Option<String>,
    /// Directory watched by the daemon for new `.torrent` files.
    pub torrents_dir: PathBuf,
    /// Directory the daemon downloads payloads into.
    pub download_dir: PathBuf,
    /// Directory finished payloads are copied into, keyed by info-hash.
    pub finished_dir: PathBuf,
}

/// Stop any seeding torrent whose upload over the last `interval_in_days`
/// days fell below `upload_at_least_in_mb` MiB.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SeedingPolicy {
    /// Look-back window in days.
    pub interval_in_days: u64,
    /// Minimum upload over the window, in MiB.
    pub upload_at_least_in_mb: i64,
}

impl SeedingPolicy {
    /// The minimum-upload threshold in bytes.
    #[must_use]
    pub const fn threshold_bytes(&self) -> i64 {
        self.upload_at_least_in_mb * 1024 * 1024
    }
}

impl Config {
    /// Load and validate the configuration file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if any
    /// value fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate an already-parsed configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure encountered.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(invalid("port", "must be non-zero"));
        }
        if self.database_path.as_os_str().is_empty() {
            return Err(invalid("database_path", "is required"));
        }
        if self.organizer_url.parse::<Url>().is_err() {
            return Err(invalid("organizer_url", "must be a valid URL"));
        }
        if self.downloaders.is_empty() {
            return Err(invalid("downloaders", "at least one is required"));
        }
        for (name, downloader) in &self.downloaders {
            downloader.validate(name)?;
        }
        Ok(())
    }
}

impl DownloaderConfig {
    fn validate(&self, name: &str) -> Result<()> {
        let prefix = format!("downloaders.{name}");
        if self.transmission.url.parse::<Url>().is_err() {
            return Err(invalid_owned(
                format!("{prefix}.transmission.url"),
                "must be a valid URL",
            ));
        }
        for (field, dir) in [
            ("torrents_dir", &self.transmission.torrents_dir),
            ("download_dir", &self.transmission.download_dir),
            ("finished_dir", &self.transmission.finished_dir),
        ] {
            if dir.as_os_str().is_empty() {
                return Err(invalid_owned(
                    format!("{prefix}.transmission.{field}"),
                    "is required",
                ));
            }
        }
        if let Some(policy) = &self.seeding_policy {
            if policy.interval_in_days == 0 {
                return Err(invalid_owned(
                    format!("{prefix}.seeding_policy.interval_in_days"),
                    "must be non-zero",
                ));
            }
            if policy.interval_in_days > MAX_POLICY_INTERVAL_DAYS {
                return Err(invalid_owned(
                    format!("{prefix}.seeding_policy.interval_in_days"),
                    "cannot exceed the 30-day history retention",
                ));
            }
            if policy.upload_at_least_in_mb <= 0 {
                return Err(invalid_owned(
                    format!("{prefix}.seeding_policy.upload_at_least_in_mb"),
                    "must be positive",
                ));
            }
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &'static str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason,
    }
}

fn invalid_owned(field: String, reason: &'static str) -> ConfigError {
    ConfigError::Invalid { field, reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    const VALID: &str = r#"
        port = 8080
        database_path = "autoget.db"
        organizer_url = "http://organizer:9090"

        [downloaders.tr-main.transmission]
        url = "http://transmission:9091/transmission/rpc"
        username = "user"
        password = "pass"
        torrents_dir = "/watch"
        download_dir = "/downloads"
        finished_dir = "/finished"

        [downloaders.tr-main.seeding_policy]
        interval_in_days = 7
        upload_at_least_in_mb = 10
    "#;

    fn parse(raw: &str) -> Config {
        toml::from_str(raw).expect("config parses")
    }

    #[test]
    fn valid_config_passes_validation() {
        let config = parse(VALID);
        config.validate().expect("valid config");

        let downloader = &config.downloaders["tr-main"];
        assert_eq!(downloader.transmission.username.as_deref(), Some("user"));
        let policy = downloader.seeding_policy.expect("policy configured");
        assert_eq!(policy.interval_in_days, 7);
        assert_eq!(policy.threshold_bytes(), 10 * 1024 * 1024);
    }

    #[test]
    fn load_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(VALID.as_bytes()).expect("write config");

        let config = Config::load(file.path()).expect("load config");
        assert_eq!(config.port, 8080);
        assert!(config.downloaders.contains_key("tr-main"));
    }

    #[test]
    fn load_missing_file_is_a_read_error() {
        let err = Config::load(Path::new("/definitely/missing.toml"))
            .expect_err("expected read failure");
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = parse(VALID);
        config.port = 0;
        assert!(config.validate().is_err());

        let mut config = parse(VALID);
        config.organizer_url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = parse(VALID);
        config.downloaders.clear();
        assert!(config.validate().is_err());

        let mut config = parse(VALID);
        config
            .downloaders
            .get_mut("tr-main")
            .expect("downloader exists")
            .transmission
            .finished_dir = PathBuf::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn seeding_policy_bounds_are_enforced() {
        for (days, mb) in [(0_u64, 10_i64), (31, 10), (7, 0)] {
            let mut config = parse(VALID);
            config
                .downloaders
                .get_mut("tr-main")
                .expect("downloader exists")
                .seeding_policy = Some(SeedingPolicy {
                interval_in_days: days,
                upload_at_least_in_mb: mb,
            });
            assert!(
                config.validate().is_err(),
                "interval {days} / {mb} MB should be rejected"
            );
        }
    }

    #[test]
    fn seeding_policy_is_optional() {
        let mut config = parse(VALID);
        config
            .downloaders
            .get_mut("tr-main")
            .expect("downloader exists")
            .seeding_policy = None;
        config.validate().expect("policy-free downloader is valid");
    }
}
