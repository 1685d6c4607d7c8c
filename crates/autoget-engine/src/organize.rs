//! Synchronous operator-driven organize commands.
//!
//! Unlike the periodic passes, these surface their failures to the caller:
//! the HTTP layer maps [`OrganizeError`] variants onto status codes while
//! the state transitions stay predicate-guarded in the store.

use autoget_organizer::{
    ExecuteOutcome, ExecuteRequest, ExecuteFailures, PlanRequest, PlanResponse, ReplanRequest,
};
use autoget_store::{DownloadRecord, OrganizeState, StoreError};
use thiserror::Error;
use tracing::{info, warn};

use crate::LifecycleEngine;

/// Operator action on a download's organize workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrganizeCommand {
    /// Execute the stored plan.
    AcceptPlan,
    /// Declare the files placed by hand, regardless of current state.
    ManualOrganized,
    /// Regenerate the plan, optionally guided by an operator hint.
    RePlan {
        /// Free-form hint; `None` or empty requests a plain re-plan.
        user_hint: Option<String>,
    },
}

/// Successful outcome of an organize command.
#[derive(Debug, Clone, PartialEq)]
pub enum OrganizeOutcome {
    /// The plan executed completely; the record is now Organized.
    Executed,
    /// Some actions failed; the record is now ExecutePlanFailed.
    PartiallyExecuted(ExecuteFailures),
    /// The operator declared the files placed.
    ManuallyOrganized,
    /// A fresh plan replaced the stored one; the record is now Planned.
    Replanned(PlanResponse),
}

/// Failure of an organize command.
#[derive(Debug, Error)]
pub enum OrganizeError {
    /// No record exists for the requested id.
    #[error("download record '{id}' not found")]
    NotFound {
        /// Info-hash that was looked up.
        id: String,
    },
    /// `accept_plan` was issued without a stored, non-empty plan.
    #[error("no organize plan available")]
    NoPlan,
    /// The organizer could not be reached or answered garbage.
    #[error("organizer request failed")]
    Transport {
        /// Underlying client error.
        #[source]
        source: anyhow::Error,
    },
    /// The status store failed.
    #[error("store operation failed")]
    Store {
        /// Underlying store error.
        #[source]
        source: StoreError,
    },
}

impl From<StoreError> for OrganizeError {
    fn from(source: StoreError) -> Self {
        match source {
            StoreError::NotFound { id } => Self::NotFound { id },
            other => Self::Store { source: other },
        }
    }
}

impl LifecycleEngine {
    /// Apply an operator organize command to the given download.
    ///
    /// Commands are idempotent under retry: repeating a command on a record
    /// already in the target state re-runs the same side effect and lands in
    /// the same state.
    ///
    /// # Errors
    ///
    /// Returns [`OrganizeError::NotFound`] for unknown ids,
    /// [`OrganizeError::NoPlan`] when `accept_plan` has nothing to execute,
    /// [`OrganizeError::Transport`] on organizer failures, and
    /// [`OrganizeError::Store`] on store failures.
    pub async fn handle_organize(
        &self,
        id: &str,
        command: OrganizeCommand,
    ) -> Result<OrganizeOutcome, OrganizeError> {
        let record = self.store.get(id).await?;
        match command {
            OrganizeCommand::AcceptPlan => self.accept_plan(record).await,
            OrganizeCommand::ManualOrganized => self.manual_organized(record).await,
            OrganizeCommand::RePlan { user_hint } => self.re_plan(record, user_hint).await,
        }
    }

    async fn accept_plan(&self, mut record: DownloadRecord) -> Result<OrganizeOutcome, OrganizeError> {
        let plan = record
            .organize_plans
            .as_ref()
            .map(|plans| plans.plan.clone())
            .filter(|plan| !plan.is_empty())
            .ok_or(OrganizeError::NoPlan)?;

        let request = ExecuteRequest {
            dir: record.id.clone(),
            plan,
        };
        match self.organizer.execute(&request).await {
            Ok(ExecuteOutcome::Completed) => {
                record.organize_state = OrganizeState::Organized;
                self.store.save(&record).await?;
                info!(downloader = %self.name, hash = %record.id, "plan executed");
                Ok(OrganizeOutcome::Executed)
            }
            Ok(ExecuteOutcome::PartiallyFailed(failures)) => {
                record.organize_state = OrganizeState::ExecutePlanFailed;
                self.store.save(&record).await?;
                warn!(
                    downloader = %self.name,
                    hash = %record.id,
                    failed = failures.failed_move.len(),
                    "plan executed partially"
                );
                Ok(OrganizeOutcome::PartiallyExecuted(failures))
            }
            // Transport failure: surface it and leave the record untouched.
            Err(source) => Err(OrganizeError::Transport { source }),
        }
    }

    async fn manual_organized(
        &self,
        mut record: DownloadRecord,
    ) -> Result<OrganizeOutcome, OrganizeError> {
        record.organize_state = OrganizeState::Organized;
        self.store.save(&record).await?;
        info!(downloader = %self.name, hash = %record.id, "marked manually organized");
        Ok(OrganizeOutcome::ManuallyOrganized)
    }

    async fn re_plan(
        &self,
        mut record: DownloadRecord,
        user_hint: Option<String>,
    ) -> Result<OrganizeOutcome, OrganizeError> {
        let hint = user_hint.unwrap_or_default();
        let result = if hint.is_empty() {
            self.organizer
                .plan(&PlanRequest {
                    dir: record.id.clone(),
                    files: record.file_list.clone(),
                    metadata: record.metadata.clone(),
                })
                .await
        } else {
            self.organizer
                .replan_with_hint(&ReplanRequest {
                    files: record.file_list.clone(),
                    metadata: record.metadata.clone(),
                    previous_response: record.organize_plans.clone().unwrap_or_default(),
                    user_hint: hint,
                })
                .await
        };

        match result {
            Ok(response) => {
                record.organize_plans = Some(response.clone());
                record.organize_state = OrganizeState::Planned;
                self.store.save(&record).await?;
                info!(downloader = %self.name, hash = %record.id, "plan regenerated");
                Ok(OrganizeOutcome::Replanned(response))
            }
            Err(source) => {
                record.organize_state = OrganizeState::CreatePlanFailed;
                if let Err(err) = self.store.save(&record).await {
                    warn!(
                        downloader = %self.name,
                        hash = %record.id,
                        error = %err,
                        "failed to record re-plan failure"
                    );
                }
                Err(OrganizeError::Transport { source })
            }
        }
    }
}
