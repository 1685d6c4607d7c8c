//! Response shapes for the HTTP façade.

use autoget_store::{DownloadRecord, StateCounters};
use serde::Serialize;

/// One row of the downloader listing consumed by the navbar.
#[derive(Debug, Clone, Serialize)]
pub struct DownloaderSummary {
    /// Downloader name.
    pub name: String,
    /// Aggregate counts, flattened alongside the name.
    #[serde(flatten)]
    pub counts: StateCounters,
}

/// Filtered status view for one downloader.
#[derive(Debug, Clone, Serialize)]
pub struct DownloaderStatuses {
    /// Aggregate counts for the downloader.
    pub state: StateCounters,
    /// Records matching the requested state filter.
    pub resources: Vec<DownloadRecord>,
}
