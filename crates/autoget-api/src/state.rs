//! Shared application state for the HTTP handlers.

use std::collections::BTreeMap;
use std::sync::Arc;

use autoget_engine::LifecycleEngine;
use autoget_store::DownloadStore;

use crate::indexer::Indexer;

/// Dependencies shared by every request handler.
pub struct ApiState {
    /// The status store, read by the projection endpoints.
    pub store: DownloadStore,
    /// Lifecycle engines keyed by downloader name; iteration order doubles
    /// as the sorted listing order.
    pub engines: BTreeMap<String, Arc<LifecycleEngine>>,
    /// Registered indexers keyed by name.
    pub indexers: BTreeMap<String, Arc<dyn Indexer>>,
}

impl ApiState {
    /// Assemble the handler state.
    #[must_use]
    pub fn new(
        store: DownloadStore,
        engines: BTreeMap<String, Arc<LifecycleEngine>>,
        indexers: BTreeMap<String, Arc<dyn Indexer>>,
    ) -> Self {
        Self {
            store,
            engines,
            indexers,
        }
    }
}
