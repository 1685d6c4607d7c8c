//! Indexer seam.
//!
//! Indexer adapters (site scrapers, RSS fetchers) live outside the core;
//! their only coupling to it is registering a new download. The handlers
//! work against this trait so any adapter that can describe a resource and
//! hand the daemon a `.torrent` file plugs in.

use async_trait::async_trait;
use serde_json::Value;

/// Descriptive payload for a resource, captured at registration time.
#[derive(Debug, Clone, Default)]
pub struct ResourceDetail {
    /// Primary title.
    pub title: String,
    /// Secondary title.
    pub title2: String,
    /// Indexer category.
    pub category: String,
    /// Expected relative file paths. The daemon's view supersedes these
    /// once the payload is copied.
    pub files: Vec<String>,
    /// Arbitrary metadata forwarded to the organizer.
    pub metadata: Value,
}

/// Outcome of handing a torrent to the daemon's watch directory.
#[derive(Debug, Clone)]
pub struct RegisteredDownload {
    /// Info-hash of the fetched torrent, lowercase hex.
    pub info_hash: String,
}

/// An external torrent site adapter.
#[async_trait]
pub trait Indexer: Send + Sync {
    /// Indexer name, unique within the registry.
    fn name(&self) -> &str;

    /// Name of the downloader that receives this indexer's torrents.
    fn downloader(&self) -> &str;

    /// Describe a resource.
    async fn resource_detail(&self, resource_id: &str) -> anyhow::Result<ResourceDetail>;

    /// Fetch the resource's `.torrent` into the daemon's watch directory
    /// and report its info-hash.
    async fn download(&self, resource_id: &str) -> anyhow::Result<RegisteredDownload>;
}
