#![forbid(unsafe_code)]

//! Daemon-agnostic torrent interfaces plus the Transmission RPC adapter.
//!
//! The lifecycle engine only ever sees the [`TorrentClient`] trait: a narrow,
//! uncached façade over whatever daemon actually drives the downloads. Any
//! backend that can enumerate torrents by info-hash, report session-wide
//! transfer rates, and stop or remove torrents in bulk is a drop-in
//! replacement.

use async_trait::async_trait;

pub mod transmission;

pub use transmission::TransmissionClient;

/// Daemon-reported lifecycle state of a torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TorrentState {
    /// Fetching payload data.
    Downloading,
    /// Payload complete, uploading to peers.
    Seeding,
    /// Not transferring.
    Stopped,
    /// Any state this adapter does not track (queued, checking, ...).
    Unknown,
}

/// A torrent as reported by the daemon.
#[derive(Debug, Clone)]
pub struct Torrent {
    /// Daemon-local numeric identifier, used for stop/remove RPCs.
    pub id: i64,
    /// Info-hash in lowercase hex; the identity shared with the status store.
    pub hash: String,
    /// Display name.
    pub name: String,
    /// Completion in `0.0..=1.0`.
    pub percent_done: f64,
    /// Total payload size in bytes.
    pub total_size: u64,
    /// Current daemon state.
    pub state: TorrentState,
    /// Cumulative bytes uploaded over the torrent's lifetime.
    pub uploaded_ever: i64,
    /// Directory the daemon writes the payload into.
    pub download_dir: String,
    /// Files within the payload, paths relative to `download_dir`.
    pub files: Vec<TorrentFileEntry>,
}

/// A single file within a torrent payload.
#[derive(Debug, Clone)]
pub struct TorrentFileEntry {
    /// Path relative to the torrent's download directory.
    pub name: String,
}

/// Session-wide transfer statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionStats {
    /// Aggregate download speed in bytes per second.
    pub download_speed_bps: u64,
}

/// Narrow RPC façade over a torrent daemon.
///
/// Implementations do not cache: every call reflects live daemon state.
#[async_trait]
pub trait TorrentClient: Send + Sync {
    /// Fetch every torrent known to the daemon.
    async fn list_all(&self) -> anyhow::Result<Vec<Torrent>>;

    /// Fetch session-wide transfer statistics.
    async fn session_stats(&self) -> anyhow::Result<SessionStats>;

    /// Stop the given torrents without removing them.
    async fn stop(&self, ids: &[i64]) -> anyhow::Result<()>;

    /// Remove the given torrents, optionally deleting their payload data.
    async fn remove(&self, ids: &[i64], delete_local_data: bool) -> anyhow::Result<()>;
}
