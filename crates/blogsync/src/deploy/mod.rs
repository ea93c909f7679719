//! Hosting platform deployments: API boundary, REST client and status tracker.

pub mod pages;
pub mod tracker;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use pages::PagesClient;
pub use tracker::{progress_percent, DeploymentTracker, WaitOptions};

/// Stage names reported by the hosting platform, in pipeline order.
pub const STAGE_QUEUED: &str = "queued";
pub const STAGE_INITIALIZE: &str = "initialize";
pub const STAGE_CLONE: &str = "clone_repo";
pub const STAGE_BUILD: &str = "build";
pub const STAGE_DEPLOY: &str = "deploy";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Idle,
    Active,
    Success,
    Failure,
    Canceled,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageStatus::Idle => "idle",
            StageStatus::Active => "active",
            StageStatus::Success => "success",
            StageStatus::Failure => "failure",
            StageStatus::Canceled => "canceled",
            StageStatus::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    pub status: StageStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerMetadata {
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub commit_hash: Option<String>,
    #[serde(default)]
    pub commit_message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentTrigger {
    #[serde(default)]
    pub metadata: TriggerMetadata,
}

/// A deployment as returned by the hosting platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub created_on: Option<String>,
    pub latest_stage: Stage,
    #[serde(default)]
    pub deployment_trigger: DeploymentTrigger,
}

impl Deployment {
    pub fn commit_hash(&self) -> Option<&str> {
        self.deployment_trigger.metadata.commit_hash.as_deref()
    }

    pub fn record(&self) -> DeploymentRecord {
        DeploymentRecord {
            id: self.id.clone(),
            stage_name: self.latest_stage.name.clone(),
            stage_status: self.latest_stage.status,
            commit_hash: self.commit_hash().map(str::to_string),
        }
    }

    pub fn outcome(&self) -> DeploymentOutcome {
        let stage = &self.latest_stage;
        match stage.status {
            StageStatus::Failure => DeploymentOutcome::Failed,
            StageStatus::Canceled => DeploymentOutcome::Canceled,
            StageStatus::Success if stage.name == STAGE_DEPLOY => DeploymentOutcome::Succeeded,
            _ => DeploymentOutcome::Pending,
        }
    }
}

/// Transient view of a deployment while it is being tracked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub id: String,
    pub stage_name: String,
    pub stage_status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentOutcome {
    Pending,
    Succeeded,
    Failed,
    Canceled,
}

impl DeploymentOutcome {
    pub fn is_terminal(self) -> bool {
        !matches!(self, DeploymentOutcome::Pending)
    }
}

/// Read-only access to a hosting platform's deployments.
#[async_trait]
pub trait HostingApi: Send + Sync {
    /// Most recent deployments first.
    async fn list_deployments(&self, project: &str, limit: usize) -> Result<Vec<Deployment>>;

    async fn get_deployment(&self, project: &str, id: &str) -> Result<Deployment>;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn deployment(id: &str, stage: &str, status: StageStatus, commit: &str) -> Deployment {
        Deployment {
            id: id.to_string(),
            project_name: Some("site".to_string()),
            url: None,
            created_on: None,
            latest_stage: Stage {
                name: stage.to_string(),
                status,
            },
            deployment_trigger: DeploymentTrigger {
                metadata: TriggerMetadata {
                    branch: Some("main".to_string()),
                    commit_hash: Some(commit.to_string()),
                    commit_message: None,
                },
            },
        }
    }

    #[test]
    fn test_outcome_classification() {
        let d = deployment("1", STAGE_DEPLOY, StageStatus::Success, "c");
        assert_eq!(d.outcome(), DeploymentOutcome::Succeeded);

        let d = deployment("1", STAGE_BUILD, StageStatus::Success, "c");
        assert_eq!(d.outcome(), DeploymentOutcome::Pending);

        let d = deployment("1", STAGE_BUILD, StageStatus::Failure, "c");
        assert_eq!(d.outcome(), DeploymentOutcome::Failed);
        assert!(d.outcome().is_terminal());

        let d = deployment("1", STAGE_QUEUED, StageStatus::Canceled, "c");
        assert_eq!(d.outcome(), DeploymentOutcome::Canceled);
    }

    #[test]
    fn test_deserialize_platform_shape() {
        let json = r#"{
            "id": "abc",
            "url": "https://abc.site.pages.dev",
            "latest_stage": {"name": "build", "status": "active", "started_on": null},
            "deployment_trigger": {"type": "github:push", "metadata": {"branch": "main", "commit_hash": "deadbeef"}}
        }"#;
        let d: Deployment = serde_json::from_str(json).unwrap();
        assert_eq!(d.commit_hash(), Some("deadbeef"));
        assert_eq!(d.latest_stage.status, StageStatus::Active);

        let record = d.record();
        assert_eq!(record.stage_name, "build");
    }

    #[test]
    fn test_unknown_status_tolerated() {
        let stage: Stage = serde_json::from_str(r#"{"name": "build", "status": "skipped"}"#).unwrap();
        assert_eq!(stage.status, StageStatus::Unknown);
    }
}
