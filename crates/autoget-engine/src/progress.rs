//! Minute-cadence progress pass.
//!
//! Refreshes in-flight progress, promotes finished torrents, copies their
//! payloads, and requests organizer plans. Every step is driven by a store
//! predicate, so a pass interrupted by any failure simply re-attempts the
//! remaining work on the next cycle.

use std::collections::HashMap;

use autoget_organizer::PlanRequest;
use autoget_store::{DownloadState, MoveState, OrganizeState};
use autoget_torrent::{Torrent, TorrentState};
use tracing::{debug, warn};

use crate::LifecycleEngine;
use crate::copy::copy_torrent_files;

/// Aggregate download speed above which the daemon is considered busy and
/// disk-heavy work is deferred to the next cycle.
pub(crate) const BUSY_DOWNLOAD_SPEED_BPS: u64 = 2_000_000;

pub(crate) fn index_by_hash(torrents: &[Torrent]) -> HashMap<&str, &Torrent> {
    torrents
        .iter()
        .map(|torrent| (torrent.hash.as_str(), torrent))
        .collect()
}

fn progress_thousandths(percent_done: f64) -> u16 {
    // the clamp keeps the cast lossless: the value is an integer in 0..=1000
    let scaled = (percent_done * 1000.0).round().clamp(0.0, 1000.0);
    scaled as u16
}

impl LifecycleEngine {
    /// Run one progress cycle. Never fails: RPC or store errors abort the
    /// cycle and the unchanged predicates retry the work next minute.
    pub async fn run_progress_pass(&self) {
        let torrents = match self.torrent.list_all().await {
            Ok(torrents) => torrents,
            Err(err) => {
                warn!(downloader = %self.name, error = %err, "failed to list torrents");
                return;
            }
        };
        let by_hash = index_by_hash(&torrents);

        self.update_download_progress(&by_hash).await;

        let stats = match self.torrent.session_stats().await {
            Ok(stats) => stats,
            Err(err) => {
                warn!(downloader = %self.name, error = %err, "failed to get session stats");
                return;
            }
        };
        // Cooperative admission control, not a lock: defer disk-heavy work
        // while the daemon is saturated.
        if stats.download_speed_bps > BUSY_DOWNLOAD_SPEED_BPS {
            debug!(
                downloader = %self.name,
                download_speed_bps = stats.download_speed_bps,
                "daemon busy; deferring copy and plan steps"
            );
            return;
        }

        self.copy_finished_downloads(&by_hash).await;
        self.create_organize_plans().await;
    }

    async fn update_download_progress(&self, by_hash: &HashMap<&str, &Torrent>) {
        let records = match self.store.get_unfinished(&self.name).await {
            Ok(records) => records,
            Err(err) => {
                warn!(downloader = %self.name, error = %err, "failed to get unfinished records");
                return;
            }
        };

        for mut record in records {
            // Absent from the daemon: removed externally. Left untouched;
            // the seeding-policy pass handles eventual retirement.
            let Some(torrent) = by_hash.get(record.id.as_str()) else {
                continue;
            };

            record.download_progress = progress_thousandths(torrent.percent_done);
            record.size = torrent.total_size;
            if torrent.state == TorrentState::Seeding {
                record.state = DownloadState::Seeding;
            }
            if let Err(err) = self.store.save(&record).await {
                warn!(
                    downloader = %self.name,
                    hash = %record.id,
                    error = %err,
                    "failed to save progress update"
                );
            }
        }
    }

    async fn copy_finished_downloads(&self, by_hash: &HashMap<&str, &Torrent>) {
        let records = match self.store.get_finished_unmoved(&self.name).await {
            Ok(records) => records,
            Err(err) => {
                warn!(downloader = %self.name, error = %err, "failed to get finished records");
                return;
            }
        };

        for mut record in records {
            let Some(torrent) = by_hash.get(record.id.as_str()) else {
                continue;
            };

            let torrent = (*torrent).clone();
            let hash = record.id.clone();
            let finished_dir = self.finished_dir.clone();
            let copied = tokio::task::spawn_blocking(move || {
                copy_torrent_files(&torrent, &hash, &finished_dir)
            })
            .await;

            match copied {
                Ok(Ok(files)) => {
                    // The daemon is the source of truth for actually-present
                    // files; this corrects drift from registration time.
                    record.file_list = files;
                    record.move_state = MoveState::Moved;
                    if let Err(err) = self.store.save(&record).await {
                        warn!(
                            downloader = %self.name,
                            hash = %record.id,
                            error = %err,
                            "failed to save moved record"
                        );
                    }
                }
                Ok(Err(err)) => {
                    warn!(
                        downloader = %self.name,
                        hash = %record.id,
                        error = %err,
                        "failed to copy finished download"
                    );
                }
                Err(err) => {
                    warn!(
                        downloader = %self.name,
                        hash = %record.id,
                        error = %err,
                        "copy task panicked"
                    );
                }
            }
        }
    }

    async fn create_organize_plans(&self) {
        let records = match self
            .store
            .get_moved_in_organize_state(&self.name, OrganizeState::Unplanned)
            .await
        {
            Ok(records) => records,
            Err(err) => {
                warn!(downloader = %self.name, error = %err, "failed to get unplanned records");
                return;
            }
        };

        for mut record in records {
            let request = PlanRequest {
                dir: record.id.clone(),
                files: record.file_list.clone(),
                metadata: record.metadata.clone(),
            };
            match self.organizer.plan(&request).await {
                Ok(response) => {
                    record.organize_plans = Some(response);
                    record.organize_state = OrganizeState::Planned;
                }
                Err(err) => {
                    warn!(
                        downloader = %self.name,
                        hash = %record.id,
                        error = %err,
                        "failed to create organizer plan"
                    );
                    record.organize_state = OrganizeState::CreatePlanFailed;
                }
            }
            if let Err(err) = self.store.save(&record).await {
                warn!(
                    downloader = %self.name,
                    hash = %record.id,
                    error = %err,
                    "failed to save plan outcome"
                );
            }
        }
    }
}
