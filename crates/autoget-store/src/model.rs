//! Download record model and upload-history bookkeeping.

use std::collections::BTreeMap;

use autoget_organizer::PlanResponse;
use chrono::{DateTime, Days, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Upload-history retention window in days.
pub const HISTORY_MAX_DAYS: u64 = 30;

const HISTORY_KEY_FORMAT: &str = "%Y-%m-%d";

/// Lifecycle state of the torrent inside the daemon.
///
/// Transitions are monotone: Started → Seeding → Stopped → Deleted, never
/// backwards. `Deleted` is terminal; the store refuses further writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    /// Admitted to the daemon, payload incomplete.
    Started,
    /// Payload complete, uploading to peers.
    Seeding,
    /// Stopped by the seeding policy.
    Stopped,
    /// Removed from the daemon; kept for historical views.
    Deleted,
}

/// Whether the finished payload has been copied into the finished directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveState {
    /// Not yet copied.
    UnMoved,
    /// Copied; `file_list` reflects what was actually copied.
    Moved,
}

/// Progress of the organizer workflow for a moved payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrganizeState {
    /// No plan requested yet.
    Unplanned,
    /// A plan (possibly carrying an organizer-side error) is stored.
    Planned,
    /// The plan was executed, or the operator declared the files placed.
    Organized,
    /// The plan RPC failed at the transport level.
    CreatePlanFailed,
    /// Plan execution failed for some files.
    ExecutePlanFailed,
}

macro_rules! int_coded_state {
    ($name:ident { $($variant:ident = $value:literal),+ $(,)? }) => {
        impl $name {
            /// Integer code used in the database.
            #[must_use]
            pub const fn as_i64(self) -> i64 {
                match self {
                    $(Self::$variant => $value,)+
                }
            }

            /// Decode the database integer code.
            #[must_use]
            pub const fn from_i64(value: i64) -> Option<Self> {
                match value {
                    $($value => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

int_coded_state!(DownloadState {
    Started = 0,
    Seeding = 1,
    Stopped = 2,
    Deleted = 3,
});

int_coded_state!(MoveState {
    UnMoved = 0,
    Moved = 1,
});

int_coded_state!(OrganizeState {
    Unplanned = 0,
    Planned = 1,
    Organized = 2,
    CreatePlanFailed = 3,
    ExecutePlanFailed = 4,
});

/// Durable record of one supervised download, keyed by info-hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRecord {
    /// Info-hash in lowercase hex; the primary key.
    pub id: String,
    /// Insertion timestamp, managed by the store.
    pub created_at: DateTime<Utc>,
    /// Last-write timestamp, managed by the store.
    pub updated_at: DateTime<Utc>,
    /// Name of the lifecycle engine that owns this record.
    pub downloader: String,
    /// Download completion in thousandths (0..=1000).
    pub download_progress: u16,
    /// Payload size in bytes as last reported by the daemon.
    pub size: u64,
    /// Daemon lifecycle state.
    pub state: DownloadState,
    /// Copy progress.
    pub move_state: MoveState,
    /// Organizer workflow progress.
    pub organize_state: OrganizeState,
    /// Local date (`YYYY-MM-DD`) → cumulative uploaded bytes observed that
    /// day. Bounded to [`HISTORY_MAX_DAYS`].
    pub upload_histories: BTreeMap<String, i64>,
    /// Indexer that initiated the download.
    pub res_indexer: String,
    /// Primary resource title.
    pub res_title: String,
    /// Secondary resource title.
    pub res_title2: String,
    /// Indexer category.
    pub category: String,
    /// Relative file paths; overwritten from the daemon at copy time.
    pub file_list: Vec<String>,
    /// Indexer-provided metadata forwarded to the organizer.
    pub metadata: Value,
    /// Last plan response received from the organizer, if any.
    pub organize_plans: Option<PlanResponse>,
}

impl DownloadRecord {
    /// Create a fresh record in the Started/UnMoved/Unplanned birth state.
    #[must_use]
    pub fn new(id: impl Into<String>, downloader: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created_at: now,
            updated_at: now,
            downloader: downloader.into(),
            download_progress: 0,
            size: 0,
            state: DownloadState::Started,
            move_state: MoveState::UnMoved,
            organize_state: OrganizeState::Unplanned,
            upload_histories: BTreeMap::new(),
            res_indexer: String::new(),
            res_title: String::new(),
            res_title2: String::new(),
            category: String::new(),
            file_list: Vec::new(),
            metadata: Value::Null,
            organize_plans: None,
        }
    }

    /// Record today's cumulative upload sample.
    pub fn record_upload(&mut self, bytes: i64) {
        self.record_upload_on(local_today(), bytes);
    }

    /// Record a cumulative upload sample for the given date.
    pub fn record_upload_on(&mut self, date: NaiveDate, bytes: i64) {
        self.upload_histories.insert(history_key(date), bytes);
    }

    /// Sample recorded exactly `days` days before today, if any.
    #[must_use]
    pub fn upload_days_before(&self, days: u64) -> Option<i64> {
        self.upload_days_before_on(local_today(), days)
    }

    /// Sample recorded exactly `days` days before `today`, if any.
    ///
    /// A gap returns `None`; the seeding-policy decision for that torrent is
    /// deferred rather than guessed.
    #[must_use]
    pub fn upload_days_before_on(&self, today: NaiveDate, days: u64) -> Option<i64> {
        let date = today.checked_sub_days(Days::new(days))?;
        self.upload_histories.get(&history_key(date)).copied()
    }

    /// Drop history entries older than [`HISTORY_MAX_DAYS`].
    pub fn cleanup_history(&mut self) {
        self.cleanup_history_on(local_today());
    }

    /// Drop history entries older than [`HISTORY_MAX_DAYS`] relative to
    /// `today`. Keys that fail to parse as dates are dropped as well.
    pub fn cleanup_history_on(&mut self, today: NaiveDate) {
        self.upload_histories.retain(|key, _| {
            NaiveDate::parse_from_str(key, HISTORY_KEY_FORMAT).is_ok_and(|date| {
                today.signed_duration_since(date).num_days() <= HISTORY_MAX_DAYS as i64
            })
        });
    }
}

/// Per-downloader aggregate counts consumed by the UI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounters {
    /// Records with `state = Started` that have not been moved.
    pub count_of_downloading: i64,
    /// Moved records whose plan is awaiting operator review.
    pub count_of_planned: i64,
    /// Moved records in either failed organize state.
    pub count_of_failed: i64,
}

fn history_key(date: NaiveDate) -> String {
    date.format(HISTORY_KEY_FORMAT).to_string()
}

/// Today's date in local time; history keys are local-calendar days.
#[must_use]
pub fn local_today() -> NaiveDate {
    Local::now().date_naive()
}
