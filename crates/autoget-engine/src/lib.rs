#![forbid(unsafe_code)]

//! Per-downloader download lifecycle engine.
//!
//! One [`LifecycleEngine`] instance supervises every download owned by a
//! single configured downloader. It coordinates three loosely-coupled
//! collaborators (the torrent daemon, the organizer service, and the status
//! store) through two periodic passes and a synchronous operator command
//! handler. All coordination is predicate-driven on the store: every
//! transition is guarded by a source-state predicate that becomes false once
//! the transition commits, so repeated or concurrent execution converges
//! without locks.

use std::path::PathBuf;
use std::sync::Arc;

use autoget_config::SeedingPolicy;
use autoget_organizer::OrganizerClient;
use autoget_store::DownloadStore;
use autoget_torrent::TorrentClient;

mod copy;
pub mod organize;
mod progress;
pub mod scheduler;
mod seeding;

pub use organize::{OrganizeCommand, OrganizeError, OrganizeOutcome};

/// Lifecycle engine for one configured downloader.
pub struct LifecycleEngine {
    pub(crate) name: String,
    pub(crate) store: DownloadStore,
    pub(crate) torrent: Arc<dyn TorrentClient>,
    pub(crate) organizer: OrganizerClient,
    pub(crate) finished_dir: PathBuf,
    pub(crate) seeding_policy: Option<SeedingPolicy>,
}

impl LifecycleEngine {
    /// Assemble an engine from its collaborators.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        store: DownloadStore,
        torrent: Arc<dyn TorrentClient>,
        organizer: OrganizerClient,
        finished_dir: impl Into<PathBuf>,
        seeding_policy: Option<SeedingPolicy>,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            torrent,
            organizer,
            finished_dir: finished_dir.into(),
            seeding_policy,
        }
    }

    /// Name of the downloader this engine owns.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The configured seeding policy, if any.
    #[must_use]
    pub const fn seeding_policy(&self) -> Option<&SeedingPolicy> {
        self.seeding_policy.as_ref()
    }
}
