#![forbid(unsafe_code)]

//! Durable status store for download lifecycle records.
//!
//! Every download the system supervises has exactly one record here, keyed
//! by its info-hash. The periodic passes and the operator-facing command
//! handlers coordinate exclusively through this store: each lifecycle
//! transition is guarded by a source-state predicate, so concurrent writers
//! either converge or leave each other's rows alone.

pub mod error;
pub mod model;
pub mod store;

pub use error::{Result, StoreError};
pub use model::{
    DownloadRecord, DownloadState, HISTORY_MAX_DAYS, MoveState, OrganizeState, StateCounters,
};
pub use store::DownloadStore;
