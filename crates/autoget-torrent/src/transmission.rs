//! Transmission RPC adapter.
//!
//! Speaks the Transmission 2.x JSON-RPC dialect: every call is a POST with a
//! `{method, arguments}` envelope, the daemon answers `{result, arguments}`,
//! and CSRF protection is negotiated through the
//! `X-Transmission-Session-Id` header on a 409 response.

use std::sync::Mutex;

use anyhow::{Context, Result, bail};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

use crate::{SessionStats, Torrent, TorrentClient, TorrentFileEntry, TorrentState};

const SESSION_ID_HEADER: &str = "X-Transmission-Session-Id";

const TORRENT_GET_FIELDS: [&str; 9] = [
    "id",
    "hashString",
    "name",
    "percentDone",
    "totalSize",
    "status",
    "uploadedEver",
    "downloadDir",
    "files",
];

// Transmission status codes; only the ones the engine reacts to are named.
const STATUS_STOPPED: i64 = 0;
const STATUS_DOWNLOADING: i64 = 4;
const STATUS_SEEDING: i64 = 6;

/// [`TorrentClient`] implementation backed by a Transmission daemon.
pub struct TransmissionClient {
    url: String,
    auth: Option<(String, String)>,
    http: Client,
    session_id: Mutex<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    result: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTorrent {
    id: i64,
    hash_string: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    percent_done: f64,
    #[serde(default)]
    total_size: u64,
    #[serde(default)]
    status: i64,
    #[serde(default)]
    uploaded_ever: i64,
    #[serde(default)]
    download_dir: String,
    #[serde(default)]
    files: Vec<RawFile>,
}

#[derive(Debug, Deserialize)]
struct RawFile {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawTorrentList {
    #[serde(default)]
    torrents: Vec<RawTorrent>,
}

#[derive(Debug, Deserialize)]
struct RawSessionStats {
    #[serde(rename = "downloadSpeed", default)]
    download_speed: u64,
}

impl TransmissionClient {
    /// Build a client for the daemon at `url`, with optional basic auth.
    ///
    /// # Errors
    ///
    /// Returns an error if the RPC URL does not parse.
    pub fn new(url: &str, username: Option<&str>, password: Option<&str>) -> Result<Self> {
        url.parse::<Url>()
            .with_context(|| format!("invalid transmission RPC URL '{url}'"))?;
        let auth = match (username, password) {
            (Some(user), Some(pass)) if !user.is_empty() => {
                Some((user.to_string(), pass.to_string()))
            }
            _ => None,
        };
        Ok(Self {
            url: url.to_string(),
            auth,
            http: Client::new(),
            session_id: Mutex::new(None),
        })
    }

    fn current_session_id(&self) -> Option<String> {
        match self.session_id.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn store_session_id(&self, value: String) {
        match self.session_id.lock() {
            Ok(mut guard) => *guard = Some(value),
            Err(poisoned) => *poisoned.into_inner() = Some(value),
        }
    }

    async fn send(&self, body: &Value) -> Result<Response> {
        let mut request = self.http.post(&self.url).json(body);
        if let Some(session) = self.current_session_id() {
            request = request.header(SESSION_ID_HEADER, session);
        }
        if let Some((user, pass)) = &self.auth {
            request = request.basic_auth(user, Some(pass));
        }
        request
            .send()
            .await
            .context("failed to reach transmission RPC endpoint")
    }

    async fn call(&self, method: &str, arguments: Value) -> Result<Value> {
        let body = json!({ "method": method, "arguments": arguments });

        let mut response = self.send(&body).await?;
        if response.status() == StatusCode::CONFLICT {
            let session = response
                .headers()
                .get(SESSION_ID_HEADER)
                .and_then(|value| value.to_str().ok())
                .with_context(|| {
                    format!("transmission returned 409 without a session id for '{method}'")
                })?
                .to_string();
            self.store_session_id(session);
            response = self.send(&body).await?;
        }

        let status = response.status();
        if !status.is_success() {
            bail!("transmission rpc '{method}' failed with status {status}");
        }

        let envelope: RpcEnvelope = response
            .json()
            .await
            .with_context(|| format!("failed to decode transmission rpc '{method}' response"))?;
        if envelope.result != "success" {
            bail!(
                "transmission rpc '{method}' returned result '{}'",
                envelope.result
            );
        }
        Ok(envelope.arguments)
    }
}

const fn map_state(status: i64) -> TorrentState {
    match status {
        STATUS_STOPPED => TorrentState::Stopped,
        STATUS_DOWNLOADING => TorrentState::Downloading,
        STATUS_SEEDING => TorrentState::Seeding,
        _ => TorrentState::Unknown,
    }
}

impl From<RawTorrent> for Torrent {
    fn from(raw: RawTorrent) -> Self {
        Self {
            id: raw.id,
            hash: raw.hash_string.to_lowercase(),
            name: raw.name,
            percent_done: raw.percent_done,
            total_size: raw.total_size,
            state: map_state(raw.status),
            uploaded_ever: raw.uploaded_ever,
            download_dir: raw.download_dir,
            files: raw
                .files
                .into_iter()
                .map(|file| TorrentFileEntry { name: file.name })
                .collect(),
        }
    }
}

#[async_trait::async_trait]
impl TorrentClient for TransmissionClient {
    async fn list_all(&self) -> Result<Vec<Torrent>> {
        let arguments = self
            .call("torrent-get", json!({ "fields": TORRENT_GET_FIELDS }))
            .await?;
        let list: RawTorrentList =
            serde_json::from_value(arguments).context("failed to decode torrent list")?;
        Ok(list.torrents.into_iter().map(Torrent::from).collect())
    }

    async fn session_stats(&self) -> Result<SessionStats> {
        let arguments = self.call("session-stats", json!({})).await?;
        let stats: RawSessionStats =
            serde_json::from_value(arguments).context("failed to decode session stats")?;
        Ok(SessionStats {
            download_speed_bps: stats.download_speed,
        })
    }

    async fn stop(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.call("torrent-stop", json!({ "ids": ids })).await?;
        Ok(())
    }

    async fn remove(&self, ids: &[i64], delete_local_data: bool) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.call(
            "torrent-remove",
            json!({ "ids": ids, "delete-local-data": delete_local_data }),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::MockServer;
    use httpmock::prelude::*;

    fn torrent_list_body() -> Value {
        json!({
            "result": "success",
            "arguments": {
                "torrents": [
                    {
                        "id": 1,
                        "hashString": "ABCDEF0123",
                        "name": "show.s01e01",
                        "percentDone": 0.5,
                        "totalSize": 1_000_000,
                        "status": 4,
                        "uploadedEver": 42,
                        "downloadDir": "/downloads",
                        "files": [{"name": "show/ep1.mkv", "length": 1_000_000}]
                    },
                    {
                        "id": 2,
                        "hashString": "cafebabe99",
                        "name": "movie",
                        "percentDone": 1.0,
                        "totalSize": 2_000_000,
                        "status": 6,
                        "uploadedEver": 9001,
                        "downloadDir": "/downloads",
                        "files": []
                    }
                ]
            }
        })
    }

    #[tokio::test]
    async fn list_all_parses_torrents_and_states() -> Result<()> {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/rpc")
                .json_body_partial(r#"{"method":"torrent-get"}"#);
            then.status(200).json_body(torrent_list_body());
        });

        let client = TransmissionClient::new(&server.url("/rpc"), None, None)?;
        let torrents = client.list_all().await?;

        mock.assert();
        assert_eq!(torrents.len(), 2);
        assert_eq!(torrents[0].hash, "abcdef0123");
        assert_eq!(torrents[0].state, TorrentState::Downloading);
        assert_eq!(torrents[0].files[0].name, "show/ep1.mkv");
        assert_eq!(torrents[1].state, TorrentState::Seeding);
        assert_eq!(torrents[1].uploaded_ever, 9001);
        Ok(())
    }

    #[tokio::test]
    async fn session_id_handshake_retries_once_and_is_remembered() -> Result<()> {
        let server = MockServer::start_async().await;
        let mut challenged = server.mock(|when, then| {
            when.method(POST).path("/rpc");
            then.status(409).header(SESSION_ID_HEADER, "sess-1");
        });

        let client = TransmissionClient::new(&server.url("/rpc"), None, None)?;

        // A daemon that keeps answering 409 gets exactly one retry.
        let err = client
            .list_all()
            .await
            .expect_err("expected handshake failure");
        assert!(err.to_string().contains("409"));
        assert_eq!(challenged.hits(), 2);
        challenged.delete();

        // The captured session id is replayed on subsequent calls.
        let accepted = server.mock(|when, then| {
            when.method(POST)
                .path("/rpc")
                .header("x-transmission-session-id", "sess-1");
            then.status(200).json_body(json!({
                "result": "success",
                "arguments": {"torrents": []}
            }));
        });

        let torrents = client.list_all().await?;
        assert!(torrents.is_empty());
        accepted.assert();
        Ok(())
    }

    #[tokio::test]
    async fn session_stats_reads_download_speed() -> Result<()> {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST)
                .path("/rpc")
                .json_body_partial(r#"{"method":"session-stats"}"#);
            then.status(200).json_body(json!({
                "result": "success",
                "arguments": {"downloadSpeed": 5_000_000, "uploadSpeed": 10}
            }));
        });

        let client = TransmissionClient::new(&server.url("/rpc"), None, None)?;
        let stats = client.session_stats().await?;
        assert_eq!(stats.download_speed_bps, 5_000_000);
        Ok(())
    }

    #[tokio::test]
    async fn stop_and_remove_send_expected_arguments() -> Result<()> {
        let server = MockServer::start_async().await;
        let stop = server.mock(|when, then| {
            when.method(POST)
                .path("/rpc")
                .json_body_partial(r#"{"method":"torrent-stop","arguments":{"ids":[3,4]}}"#);
            then.status(200).json_body(json!({"result": "success"}));
        });
        let remove = server.mock(|when, then| {
            when.method(POST).path("/rpc").json_body_partial(
                r#"{"method":"torrent-remove","arguments":{"ids":[5],"delete-local-data":true}}"#,
            );
            then.status(200).json_body(json!({"result": "success"}));
        });

        let client = TransmissionClient::new(&server.url("/rpc"), None, None)?;
        client.stop(&[3, 4]).await?;
        client.remove(&[5], true).await?;

        stop.assert();
        remove.assert();
        Ok(())
    }

    #[tokio::test]
    async fn empty_id_lists_skip_the_rpc() -> Result<()> {
        let server = MockServer::start_async().await;
        let any = server.mock(|when, then| {
            when.method(POST).path("/rpc");
            then.status(200).json_body(json!({"result": "success"}));
        });

        let client = TransmissionClient::new(&server.url("/rpc"), None, None)?;
        client.stop(&[]).await?;
        client.remove(&[], true).await?;
        any.assert_hits(0);
        Ok(())
    }

    #[tokio::test]
    async fn non_success_result_is_an_error() -> Result<()> {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/rpc");
            then.status(200)
                .json_body(json!({"result": "invalid argument"}));
        });

        let client = TransmissionClient::new(&server.url("/rpc"), None, None)?;
        let err = client
            .session_stats()
            .await
            .expect_err("expected rpc failure");
        assert!(err.to_string().contains("invalid argument"));
        Ok(())
    }

    #[test]
    fn invalid_url_is_rejected() {
        assert!(TransmissionClient::new("::nope::", None, None).is_err());
    }
}
