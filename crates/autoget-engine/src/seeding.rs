//! Daily seeding-policy pass.
//!
//! Records today's cumulative upload per seeding torrent, stops torrents
//! whose upload over the policy window fell below the threshold, and
//! hard-removes stopped torrents whose payload has already been copied.
//! Stop precedes remove within one pass so a torrent can be stopped and
//! retired on the same day once its plan has been handled.

use autoget_config::SeedingPolicy;
use autoget_store::{DownloadRecord, DownloadState, StoreError, model::local_today};
use autoget_torrent::{Torrent, TorrentState};
use tracing::{info, warn};

use crate::LifecycleEngine;
use crate::progress::index_by_hash;

impl LifecycleEngine {
    /// Run one seeding-policy cycle. A no-op when no policy is configured.
    pub async fn run_seeding_pass(&self) {
        let Some(policy) = self.seeding_policy else {
            return;
        };

        let torrents = match self.torrent.list_all().await {
            Ok(torrents) => torrents,
            Err(err) => {
                warn!(downloader = %self.name, error = %err, "failed to list torrents");
                return;
            }
        };

        self.stop_under_seeders(&torrents, &policy).await;
        self.retire_stopped_and_moved(&torrents).await;
    }

    async fn stop_under_seeders(&self, torrents: &[Torrent], policy: &SeedingPolicy) {
        let today = local_today();
        let mut stop_ids = Vec::new();
        let mut stop_hashes = Vec::new();

        for torrent in torrents {
            if torrent.state != TorrentState::Seeding {
                continue;
            }

            let mut record = match self.store.get(&torrent.hash).await {
                Ok(record) => record,
                Err(StoreError::NotFound { .. }) => {
                    // The daemon has a torrent the store never recorded.
                    // Adopt it and defer any policy decision to a later day.
                    let mut record = DownloadRecord::new(torrent.hash.clone(), self.name.clone());
                    record.state = DownloadState::Seeding;
                    record.res_title = torrent.name.clone();
                    record.record_upload_on(today, torrent.uploaded_ever);
                    if let Err(err) = self.store.save(&record).await {
                        warn!(
                            downloader = %self.name,
                            hash = %torrent.hash,
                            error = %err,
                            "failed to adopt unrecorded torrent"
                        );
                    }
                    continue;
                }
                Err(err) => {
                    warn!(
                        downloader = %self.name,
                        hash = %torrent.hash,
                        error = %err,
                        "failed to load record for seeding check"
                    );
                    continue;
                }
            };

            record.cleanup_history_on(today);
            record.record_upload_on(today, torrent.uploaded_ever);
            if let Err(err) = self.store.save(&record).await {
                warn!(
                    downloader = %self.name,
                    hash = %record.id,
                    error = %err,
                    "failed to save upload history"
                );
                continue;
            }

            // No sample from N days ago: no decision yet.
            let Some(before) = record.upload_days_before_on(today, policy.interval_in_days) else {
                continue;
            };

            let delta = torrent.uploaded_ever - before;
            if delta < policy.threshold_bytes() {
                stop_ids.push(torrent.id);
                stop_hashes.push(torrent.hash.clone());
            }
        }

        if stop_ids.is_empty() {
            return;
        }

        if let Err(err) = self.torrent.stop(&stop_ids).await {
            warn!(downloader = %self.name, error = %err, "failed to stop torrents");
            return;
        }
        info!(
            downloader = %self.name,
            count = stop_hashes.len(),
            "stopped under-seeded torrents"
        );
        if let Err(err) = self
            .store
            .bulk_update_state(&stop_hashes, DownloadState::Stopped)
            .await
        {
            warn!(downloader = %self.name, error = %err, "failed to record stopped torrents");
        }
    }

    async fn retire_stopped_and_moved(&self, torrents: &[Torrent]) {
        let records = match self.store.get_stopped_and_moved(&self.name).await {
            Ok(records) => records,
            Err(err) => {
                warn!(downloader = %self.name, error = %err, "failed to get stopped records");
                return;
            }
        };

        let by_hash = index_by_hash(torrents);
        let mut remove_ids = Vec::new();
        let mut remove_hashes = Vec::new();
        for record in records {
            if let Some(torrent) = by_hash.get(record.id.as_str()) {
                remove_ids.push(torrent.id);
                remove_hashes.push(record.id);
            }
        }

        if remove_ids.is_empty() {
            return;
        }

        if let Err(err) = self.torrent.remove(&remove_ids, true).await {
            warn!(downloader = %self.name, error = %err, "failed to remove torrents");
            return;
        }
        info!(
            downloader = %self.name,
            count = remove_hashes.len(),
            "retired stopped torrents"
        );
        if let Err(err) = self
            .store
            .bulk_update_state(&remove_hashes, DownloadState::Deleted)
            .await
        {
            warn!(downloader = %self.name, error = %err, "failed to record retired torrents");
        }
    }
}
