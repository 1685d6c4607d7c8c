#![forbid(unsafe_code)]

//! HTTP+JSON client for the external file-organizer service.
//!
//! The organizer decides where finished content goes. It exposes three
//! endpoints: `plan` proposes per-file actions for a finished download,
//! `execute` applies a previously returned plan, and `replan-with-hint`
//! regenerates a plan using operator guidance plus the prior response.

use anyhow::{Context, Result, bail};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

/// Plan action that moves a file to a target path.
pub const ACTION_MOVE: &str = "move";
/// Plan action that leaves a file where it is.
pub const ACTION_SKIP: &str = "skip";

/// Request body for the `plan` endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct PlanRequest {
    /// Directory the finished payload lives under, keyed by info-hash.
    pub dir: String,
    /// Relative file paths present in the payload.
    pub files: Vec<String>,
    /// Indexer-provided metadata forwarded verbatim.
    #[serde(skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

/// A single per-file decision within a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanAction {
    /// Exact original path of the file.
    pub file: String,
    /// Either [`ACTION_MOVE`] or [`ACTION_SKIP`].
    pub action: String,
    /// Target path; required for `move`, ignored for `skip`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// Response from the `plan` and `replan-with-hint` endpoints.
///
/// A `200` response may still carry a non-empty `error`; that is a domain
/// outcome surfaced to the operator, not a transport failure, so it is
/// returned as a success from this client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanResponse {
    /// Ordered per-file actions; empty when the organizer could not decide.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plan: Vec<PlanAction>,
    /// Organizer-side failure description, shown to the operator verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Request body for the `execute` endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteRequest {
    /// Directory the plan applies to, keyed by info-hash.
    pub dir: String,
    /// Actions to apply, as previously returned by `plan`.
    pub plan: Vec<PlanAction>,
}

/// Request body for the `replan-with-hint` endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ReplanRequest {
    /// Relative file paths present in the payload.
    pub files: Vec<String>,
    /// Indexer-provided metadata forwarded verbatim.
    #[serde(skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
    /// The plan response the operator is reacting to.
    pub previous_response: PlanResponse,
    /// Free-form operator guidance.
    pub user_hint: String,
}

/// A plan action that failed during execution, with the failure reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedAction {
    /// The action that could not be applied.
    #[serde(flatten)]
    pub action: PlanAction,
    /// Why the organizer could not apply it.
    pub reason: String,
}

/// Body returned by `execute` when some actions could not be applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteFailures {
    /// The subset of actions that failed.
    #[serde(default)]
    pub failed_move: Vec<FailedAction>,
}

/// Outcome of an `execute` call that reached the organizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecuteOutcome {
    /// Every action was applied.
    Completed,
    /// Some actions failed; the payload lists them for the operator.
    PartiallyFailed(ExecuteFailures),
}

/// Client for the organizer service.
#[derive(Debug, Clone)]
pub struct OrganizerClient {
    base_url: String,
    http: Client,
}

impl OrganizerClient {
    /// Build a client against the given base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL does not parse.
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_client(base_url, Client::new())
    }

    /// Build a client reusing an existing HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL does not parse.
    pub fn with_client(base_url: &str, http: Client) -> Result<Self> {
        base_url
            .parse::<Url>()
            .with_context(|| format!("invalid organizer base URL '{base_url}'"))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Request an organization plan for a finished download.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, a non-200 status, or an
    /// undecodable body. A 200 response with a populated `error` field is
    /// returned as `Ok`.
    pub async fn plan(&self, request: &PlanRequest) -> Result<PlanResponse> {
        let response = self
            .http
            .post(self.endpoint("/v1/plan"))
            .json(request)
            .send()
            .await
            .context("failed to send plan request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("plan request failed with status {status}: {body}");
        }

        response
            .json::<PlanResponse>()
            .await
            .context("failed to decode plan response")
    }

    /// Apply a previously returned plan.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or when a non-200 body cannot
    /// be decoded into the partial-failure shape. Partial failures are a
    /// successful call carrying [`ExecuteOutcome::PartiallyFailed`].
    pub async fn execute(&self, request: &ExecuteRequest) -> Result<ExecuteOutcome> {
        let response = self
            .http
            .post(self.endpoint("/v1/execute"))
            .json(request)
            .send()
            .await
            .context("failed to send execute request")?;

        if response.status().is_success() {
            return Ok(ExecuteOutcome::Completed);
        }

        let status = response.status();
        let body = response
            .bytes()
            .await
            .context("failed to read execute response body")?;
        let failures: ExecuteFailures = serde_json::from_slice(&body).with_context(|| {
            format!("failed to decode execute failure response (status {status})")
        })?;
        Ok(ExecuteOutcome::PartiallyFailed(failures))
    }

    /// Regenerate a plan using operator guidance and the prior response.
    ///
    /// # Errors
    ///
    /// Same contract as [`OrganizerClient::plan`].
    pub async fn replan_with_hint(&self, request: &ReplanRequest) -> Result<PlanResponse> {
        let response = self
            .http
            .post(self.endpoint("/v1/replan-with-hint"))
            .json(request)
            .send()
            .await
            .context("failed to send replan request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("replan request failed with status {status}: {body}");
        }

        response
            .json::<PlanResponse>()
            .await
            .context("failed to decode replan response")
    }
}
