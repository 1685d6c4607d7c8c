//! Application-level errors for bootstrap and shutdown.

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
///
/// Any of these is fatal at startup; the process exits non-zero.
#[derive(Debug, Error)]
pub enum AppError {
    /// Neither `AUTOGET_CONFIG` nor a CLI argument named the config file.
    #[error("config path is required (set AUTOGET_CONFIG or pass it as the first argument)")]
    MissingConfigPath,
    /// Configuration loading or validation failed.
    #[error("configuration failed")]
    Config {
        /// Source configuration error.
        #[source]
        source: autoget_config::ConfigError,
    },
    /// The status store could not be opened.
    #[error("status store initialisation failed")]
    Store {
        /// Source store error.
        #[source]
        source: autoget_store::StoreError,
    },
    /// A downloader client could not be constructed.
    #[error("downloader '{downloader}' initialisation failed")]
    Downloader {
        /// Downloader name from the configuration.
        downloader: String,
        /// Source client error.
        #[source]
        source: anyhow::Error,
    },
    /// The organizer client could not be constructed.
    #[error("organizer client initialisation failed")]
    Organizer {
        /// Source client error.
        #[source]
        source: anyhow::Error,
    },
    /// Logging could not be initialised.
    #[error("telemetry initialisation failed")]
    Telemetry {
        /// Source telemetry error.
        #[source]
        source: anyhow::Error,
    },
    /// The API server failed to bind or crashed.
    #[error("api server failed")]
    ApiServer {
        /// Source server error.
        #[source]
        source: anyhow::Error,
    },
}
