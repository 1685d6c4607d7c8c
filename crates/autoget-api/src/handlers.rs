//! Request handlers.

use std::sync::Arc;

use autoget_engine::{OrganizeCommand, OrganizeError, OrganizeOutcome};
use autoget_store::{DownloadRecord, DownloadState, OrganizeState, StoreError};
use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, info};

use crate::errors::ApiError;
use crate::models::{DownloaderStatuses, DownloaderSummary};
use crate::state::ApiState;

const VALID_STATES: &str = "downloading, seeding, stopped, planned, failed";
const VALID_ACTIONS: &str = "accept_plan, manual_organized, re_plan";

/// `GET /api/v1/indexers`
pub async fn list_indexers(State(state): State<Arc<ApiState>>) -> Json<Vec<String>> {
    Json(state.indexers.keys().cloned().collect())
}

/// `GET /api/v1/indexers/{indexer}/resources/{resource}/download`
///
/// The sole writer that creates new download records.
pub async fn register_download(
    State(state): State<Arc<ApiState>>,
    Path((indexer_name, resource_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let indexer = state
        .indexers
        .get(&indexer_name)
        .ok_or_else(|| ApiError::not_found("Indexer not found"))?;

    let detail = indexer.resource_detail(&resource_id).await.map_err(|err| {
        error!(indexer = %indexer_name, resource = %resource_id, error = %err,
            "failed to fetch resource detail");
        ApiError::internal("failed to fetch resource detail")
    })?;
    let download = indexer.download(&resource_id).await.map_err(|err| {
        error!(indexer = %indexer_name, resource = %resource_id, error = %err,
            "failed to start download");
        ApiError::internal("failed to start download")
    })?;

    let mut record = DownloadRecord::new(download.info_hash, indexer.downloader());
    record.res_indexer = indexer_name.clone();
    record.res_title = detail.title;
    record.res_title2 = detail.title2;
    record.category = detail.category;
    record.file_list = detail.files;
    record.metadata = detail.metadata;

    match state.store.insert(&record).await {
        Ok(()) => {
            info!(indexer = %indexer_name, hash = %record.id, "download registered");
            Ok(Json(json!({ "status": "started" })))
        }
        Err(StoreError::Duplicate { .. }) => {
            Err(ApiError::conflict("download already registered"))
        }
        Err(err) => {
            error!(hash = %record.id, error = %err, "failed to register download");
            Err(ApiError::internal("failed to register download"))
        }
    }
}

/// `GET /api/v1/downloaders`
pub async fn list_downloaders(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Vec<DownloaderSummary>>, ApiError> {
    let mut summaries = Vec::with_capacity(state.engines.len());
    for name in state.engines.keys() {
        let counts = state.store.counters(name).await.map_err(|err| {
            error!(downloader = %name, error = %err, "failed to count download states");
            ApiError::internal("failed to count download states")
        })?;
        summaries.push(DownloaderSummary {
            name: name.clone(),
            counts,
        });
    }
    Ok(Json(summaries))
}

/// Query string for the downloader status view.
#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    state: Option<String>,
}

/// `GET /api/v1/downloaders/{downloader}?state=...`
pub async fn downloader_statuses(
    State(state): State<Arc<ApiState>>,
    Path(downloader): Path<String>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<DownloaderStatuses>, ApiError> {
    if !state.engines.contains_key(&downloader) {
        return Err(ApiError::not_found("Downloader not found"));
    }

    let Some(state_filter) = query.state.as_deref().filter(|value| !value.is_empty()) else {
        return Err(ApiError::bad_request(format!(
            "State parameter is required. Valid states: {VALID_STATES}"
        )));
    };

    let resources = fetch_resources(&state, &downloader, state_filter).await?;
    let counts = state.store.counters(&downloader).await.map_err(|err| {
        error!(downloader = %downloader, error = %err, "failed to count download states");
        ApiError::internal("failed to count download states")
    })?;

    Ok(Json(DownloaderStatuses {
        state: counts,
        resources,
    }))
}

async fn fetch_resources(
    state: &ApiState,
    downloader: &str,
    state_filter: &str,
) -> Result<Vec<DownloadRecord>, ApiError> {
    let store = &state.store;
    let result = match state_filter {
        "downloading" => store.get_unfinished(downloader).await,
        "seeding" => store.get_by_state(downloader, DownloadState::Seeding).await,
        "stopped" => store.get_by_state(downloader, DownloadState::Stopped).await,
        "planned" => {
            store
                .get_moved_in_organize_state(downloader, OrganizeState::Planned)
                .await
        }
        "failed" => {
            // the failed bucket is the union of both failed organize states
            match store
                .get_moved_in_organize_state(downloader, OrganizeState::CreatePlanFailed)
                .await
            {
                Ok(mut create_failed) => store
                    .get_moved_in_organize_state(downloader, OrganizeState::ExecutePlanFailed)
                    .await
                    .map(|execute_failed| {
                        create_failed.extend(execute_failed);
                        create_failed
                    }),
                Err(err) => Err(err),
            }
        }
        _ => {
            return Err(ApiError::bad_request(format!(
                "Invalid state. Valid states: {VALID_STATES}"
            )));
        }
    };

    result.map_err(|err| {
        error!(downloader = %downloader, error = %err, "failed to query download records");
        ApiError::internal("failed to query download records")
    })
}

/// Query string for the organize command endpoint.
#[derive(Debug, Deserialize)]
pub struct OrganizeQuery {
    action: Option<String>,
    user_hint: Option<String>,
}

/// `POST /api/v1/download/{id}/organize?action=...&user_hint=...`
pub async fn organize_download(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Query(query): Query<OrganizeQuery>,
) -> Result<Json<Value>, ApiError> {
    let command = match query.action.as_deref() {
        Some("accept_plan") => OrganizeCommand::AcceptPlan,
        Some("manual_organized") => OrganizeCommand::ManualOrganized,
        Some("re_plan") => OrganizeCommand::RePlan {
            user_hint: query.user_hint,
        },
        Some(_) | None => {
            return Err(ApiError::bad_request(format!(
                "Invalid action. Valid actions: {VALID_ACTIONS}"
            )));
        }
    };

    let record = match state.store.get(&id).await {
        Ok(record) => record,
        Err(StoreError::NotFound { .. }) => {
            return Err(ApiError::not_found("Download not found"));
        }
        Err(err) => {
            error!(hash = %id, error = %err, "failed to load download record");
            return Err(ApiError::internal("failed to load download record"));
        }
    };
    let engine = state.engines.get(&record.downloader).ok_or_else(|| {
        error!(hash = %id, downloader = %record.downloader, "record owned by unconfigured downloader");
        ApiError::internal("downloader not configured")
    })?;

    match engine.handle_organize(&id, command).await {
        Ok(OrganizeOutcome::Executed) => Ok(Json(json!({
            "status": "organization completed successfully"
        }))),
        Ok(OrganizeOutcome::PartiallyExecuted(failures)) => Ok(Json(json!({
            "status": "organization partially completed",
            "failed": failures
        }))),
        Ok(OrganizeOutcome::ManuallyOrganized) => Ok(Json(json!({
            "status": "marked as manually organized"
        }))),
        Ok(OrganizeOutcome::Replanned(plan)) => Ok(Json(json!({
            "status": "plan created",
            "plan": plan
        }))),
        Err(OrganizeError::NotFound { .. }) => Err(ApiError::not_found("Download not found")),
        Err(OrganizeError::NoPlan) => Err(ApiError::bad_request("No organize plan available")),
        Err(OrganizeError::Transport { source }) => {
            error!(hash = %id, error = %source, "organizer request failed");
            Err(ApiError::internal("organizer request failed"))
        }
        Err(OrganizeError::Store { source }) => {
            error!(hash = %id, error = %source, "store operation failed");
            Err(ApiError::internal("store operation failed"))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use async_trait::async_trait;
    use autoget_engine::LifecycleEngine;
    use autoget_organizer::{ACTION_MOVE, OrganizerClient, PlanAction, PlanResponse};
    use autoget_store::{DownloadStore, MoveState};
    use autoget_torrent::{SessionStats, Torrent, TorrentClient};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use httpmock::MockServer;
    use httpmock::prelude::*;
    use tower::ServiceExt;

    use super::*;
    use crate::ApiServer;
    use crate::indexer::{Indexer, RegisteredDownload, ResourceDetail};

    struct NullTorrentClient;

    #[async_trait]
    impl TorrentClient for NullTorrentClient {
        async fn list_all(&self) -> anyhow::Result<Vec<Torrent>> {
            Ok(Vec::new())
        }

        async fn session_stats(&self) -> anyhow::Result<SessionStats> {
            Ok(SessionStats::default())
        }

        async fn stop(&self, _ids: &[i64]) -> anyhow::Result<()> {
            Ok(())
        }

        async fn remove(&self, _ids: &[i64], _delete_local_data: bool) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct StubIndexer {
        name: &'static str,
        downloader: &'static str,
        info_hash: &'static str,
    }

    #[async_trait]
    impl Indexer for StubIndexer {
        fn name(&self) -> &str {
            self.name
        }

        fn downloader(&self) -> &str {
            self.downloader
        }

        async fn resource_detail(&self, resource_id: &str) -> anyhow::Result<ResourceDetail> {
            Ok(ResourceDetail {
                title: format!("resource {resource_id}"),
                title2: String::new(),
                category: "tv".to_string(),
                files: vec!["a.mkv".to_string()],
                metadata: json!({"resource": resource_id}),
            })
        }

        async fn download(&self, _resource_id: &str) -> anyhow::Result<RegisteredDownload> {
            Ok(RegisteredDownload {
                info_hash: self.info_hash.to_string(),
            })
        }
    }

    async fn harness(organizer_url: &str) -> (ApiServer, DownloadStore) {
        let store = DownloadStore::in_memory().await.expect("store");
        let engine = Arc::new(LifecycleEngine::new(
            "tr-main",
            store.clone(),
            Arc::new(NullTorrentClient),
            OrganizerClient::new(organizer_url).expect("organizer client"),
            "/tmp/finished",
            None,
        ));

        let mut engines = BTreeMap::new();
        engines.insert("tr-main".to_string(), engine);

        let mut indexers: BTreeMap<String, Arc<dyn Indexer>> = BTreeMap::new();
        indexers.insert(
            "mteam".to_string(),
            Arc::new(StubIndexer {
                name: "mteam",
                downloader: "tr-main",
                info_hash: "feedbeef01",
            }),
        );
        indexers.insert(
            "nyaa".to_string(),
            Arc::new(StubIndexer {
                name: "nyaa",
                downloader: "tr-main",
                info_hash: "0ddba11c0c",
            }),
        );

        let state = Arc::new(ApiState::new(store.clone(), engines, indexers));
        (ApiServer::new(state), store)
    }

    async fn call(server: &ApiServer, method: &str, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .expect("request");
        let response = server
            .router()
            .clone()
            .oneshot(request)
            .await
            .expect("response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, body)
    }

    #[tokio::test]
    async fn indexers_are_listed_sorted() {
        let server = MockServer::start_async().await;
        let (api, _store) = harness(&server.base_url()).await;

        let (status, body) = call(&api, "GET", "/api/v1/indexers").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!(["mteam", "nyaa"]));
    }

    #[tokio::test]
    async fn download_registration_creates_a_record_once() {
        let server = MockServer::start_async().await;
        let (api, store) = harness(&server.base_url()).await;

        let uri = "/api/v1/indexers/mteam/resources/42/download";
        let (status, body) = call(&api, "GET", uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "started"}));

        let record = store.get("feedbeef01").await.expect("record");
        assert_eq!(record.downloader, "tr-main");
        assert_eq!(record.res_indexer, "mteam");
        assert_eq!(record.res_title, "resource 42");
        assert_eq!(record.state, DownloadState::Started);
        assert_eq!(record.move_state, MoveState::UnMoved);
        assert_eq!(record.organize_state, OrganizeState::Unplanned);

        // same info-hash again: conflict, no second record
        let (status, body) = call(&api, "GET", uri).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "download already registered");
    }

    #[tokio::test]
    async fn unknown_indexer_is_not_found() {
        let server = MockServer::start_async().await;
        let (api, _store) = harness(&server.base_url()).await;

        let (status, body) =
            call(&api, "GET", "/api/v1/indexers/none/resources/1/download").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Indexer not found");
    }

    #[tokio::test]
    async fn downloaders_listing_carries_counters() {
        let server = MockServer::start_async().await;
        let (api, store) = harness(&server.base_url()).await;

        store
            .insert(&DownloadRecord::new("aaa", "tr-main"))
            .await
            .expect("insert");
        let mut planned = DownloadRecord::new("bbb", "tr-main");
        planned.move_state = MoveState::Moved;
        planned.organize_state = OrganizeState::Planned;
        store.insert(&planned).await.expect("insert");

        let (status, body) = call(&api, "GET", "/api/v1/downloaders").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!([{
                "name": "tr-main",
                "count_of_downloading": 1,
                "count_of_planned": 1,
                "count_of_failed": 0
            }])
        );
    }

    #[tokio::test]
    async fn status_view_validates_downloader_and_state() {
        let server = MockServer::start_async().await;
        let (api, _store) = harness(&server.base_url()).await;

        let (status, _) = call(&api, "GET", "/api/v1/downloaders/nope?state=downloading").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(&api, "GET", "/api/v1/downloaders/tr-main").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["error"],
            format!("State parameter is required. Valid states: {VALID_STATES}")
        );

        let (status, body) = call(&api, "GET", "/api/v1/downloaders/tr-main?state=bogus").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["error"],
            format!("Invalid state. Valid states: {VALID_STATES}")
        );
    }

    #[tokio::test]
    async fn failed_view_unions_both_failure_states() {
        let server = MockServer::start_async().await;
        let (api, store) = harness(&server.base_url()).await;

        let mut create_failed = DownloadRecord::new("cf", "tr-main");
        create_failed.state = DownloadState::Seeding;
        create_failed.move_state = MoveState::Moved;
        create_failed.organize_state = OrganizeState::CreatePlanFailed;
        store.insert(&create_failed).await.expect("insert");

        let mut execute_failed = DownloadRecord::new("ef", "tr-main");
        execute_failed.state = DownloadState::Seeding;
        execute_failed.move_state = MoveState::Moved;
        execute_failed.organize_state = OrganizeState::ExecutePlanFailed;
        store.insert(&execute_failed).await.expect("insert");

        // planned record stays out of the failed bucket
        let mut planned = DownloadRecord::new("ok", "tr-main");
        planned.state = DownloadState::Seeding;
        planned.move_state = MoveState::Moved;
        planned.organize_state = OrganizeState::Planned;
        store.insert(&planned).await.expect("insert");

        let (status, body) = call(&api, "GET", "/api/v1/downloaders/tr-main?state=failed").await;
        assert_eq!(status, StatusCode::OK);
        let mut ids: Vec<&str> = body["resources"]
            .as_array()
            .expect("resources array")
            .iter()
            .map(|record| record["id"].as_str().expect("id"))
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["cf", "ef"]);
        assert_eq!(body["state"]["count_of_failed"], 2);
        assert_eq!(body["state"]["count_of_planned"], 1);
    }

    #[tokio::test]
    async fn organize_validates_action_and_id() {
        let server = MockServer::start_async().await;
        let (api, store) = harness(&server.base_url()).await;

        let (status, body) = call(&api, "POST", "/api/v1/download/x/organize?action=explode").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["error"],
            format!("Invalid action. Valid actions: {VALID_ACTIONS}")
        );

        let (status, body) =
            call(&api, "POST", "/api/v1/download/x/organize?action=manual_organized").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Download not found");

        let mut record = DownloadRecord::new("bare", "tr-main");
        record.state = DownloadState::Seeding;
        record.move_state = MoveState::Moved;
        store.insert(&record).await.expect("insert");
        let (status, body) =
            call(&api, "POST", "/api/v1/download/bare/organize?action=accept_plan").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No organize plan available");
    }

    #[tokio::test]
    async fn organize_manual_and_partial_outcomes_render_their_bodies() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/v1/execute");
            then.status(400).json_body(json!({
                "failed_move": [{
                    "file": "x.srt",
                    "action": "move",
                    "target": "/t/x.srt",
                    "reason": "EACCES"
                }]
            }));
        });
        let (api, store) = harness(&server.base_url()).await;

        let mut record = DownloadRecord::new("abc", "tr-main");
        record.state = DownloadState::Seeding;
        record.move_state = MoveState::Moved;
        record.organize_state = OrganizeState::Planned;
        record.organize_plans = Some(PlanResponse {
            plan: vec![PlanAction {
                file: "x.srt".to_string(),
                action: ACTION_MOVE.to_string(),
                target: Some("/t/x.srt".to_string()),
            }],
            error: None,
        });
        store.insert(&record).await.expect("insert");

        let (status, body) =
            call(&api, "POST", "/api/v1/download/abc/organize?action=accept_plan").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "organization partially completed");
        assert_eq!(body["failed"]["failed_move"][0]["reason"], "EACCES");
        assert_eq!(
            store.get("abc").await.expect("record").organize_state,
            OrganizeState::ExecutePlanFailed
        );

        let (status, body) = call(
            &api,
            "POST",
            "/api/v1/download/abc/organize?action=manual_organized",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "marked as manually organized");
        assert_eq!(
            store.get("abc").await.expect("record").organize_state,
            OrganizeState::Organized
        );
    }

    #[tokio::test]
    async fn organize_re_plan_with_hint_uses_the_stored_response() {
        let server = MockServer::start_async().await;
        let replan = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/replan-with-hint")
                .json_body_partial(r#"{"user_hint":"prefer TV"}"#);
            then.status(200).json_body(json!({
                "plan": [{"file": "a.mkv", "action": "move", "target": "/tv/a.mkv"}]
            }));
        });
        let (api, store) = harness(&server.base_url()).await;

        let mut record = DownloadRecord::new("abc", "tr-main");
        record.state = DownloadState::Seeding;
        record.move_state = MoveState::Moved;
        record.organize_state = OrganizeState::Planned;
        record.organize_plans = Some(PlanResponse {
            plan: vec![],
            error: Some("ambiguous".to_string()),
        });
        store.insert(&record).await.expect("insert");

        let (status, body) = call(
            &api,
            "POST",
            "/api/v1/download/abc/organize?action=re_plan&user_hint=prefer%20TV",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "plan created");
        assert_eq!(body["plan"]["plan"][0]["target"], "/tv/a.mkv");
        replan.assert();
    }
}
