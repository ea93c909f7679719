//! Polls a hosting platform until a deployment reaches a terminal stage.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use super::{
    Deployment, DeploymentOutcome, HostingApi, StageStatus, STAGE_BUILD, STAGE_CLONE,
    STAGE_DEPLOY, STAGE_INITIALIZE, STAGE_QUEUED,
};
use crate::error::{Result, SyncError};
use crate::listeners::deliver;

/// Number of recent deployments scanned when correlating a commit.
pub const COMMIT_SEARCH_WINDOW: usize = 20;

pub type DeploymentCallback = Arc<dyn Fn(&Deployment) + Send + Sync>;

#[derive(Clone)]
pub struct WaitOptions {
    pub poll_interval: Duration,
    /// Measured from the start of [`DeploymentTracker::wait_for_deployment`].
    pub timeout: Duration,
    pub on_progress: Option<DeploymentCallback>,
}

impl WaitOptions {
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            poll_interval,
            timeout,
            on_progress: None,
        }
    }

    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Deployment) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self::new(Duration::from_secs(3), Duration::from_secs(600))
    }
}

#[derive(Clone)]
pub struct DeploymentTracker {
    api: Arc<dyn HostingApi>,
}

impl DeploymentTracker {
    pub fn new(api: Arc<dyn HostingApi>) -> Self {
        Self { api }
    }

    pub async fn list_deployments(&self, project: &str, limit: usize) -> Result<Vec<Deployment>> {
        self.api.list_deployments(project, limit).await
    }

    pub async fn get_deployment(&self, project: &str, id: &str) -> Result<Deployment> {
        self.api.get_deployment(project, id).await
    }

    /// Best-effort lookup of the deployment triggered by `commit_hash`.
    ///
    /// Only the most recent [`COMMIT_SEARCH_WINDOW`] deployments are scanned.
    pub async fn find_by_commit(&self, project: &str, commit_hash: &str) -> Result<Option<Deployment>> {
        let deployments = self.list_deployments(project, COMMIT_SEARCH_WINDOW).await?;
        let found = deployments
            .into_iter()
            .take(COMMIT_SEARCH_WINDOW)
            .find(|d| d.commit_hash() == Some(commit_hash));

        match &found {
            Some(d) => debug!("Commit {} maps to deployment {}", commit_hash, d.id),
            None => debug!(
                "No deployment for commit {} in the last {} deployments",
                commit_hash, COMMIT_SEARCH_WINDOW
            ),
        }
        Ok(found)
    }

    /// Polls until the deployment succeeds, fails, is canceled or `timeout` elapses.
    ///
    /// Timing out stops local tracking only; the deployment keeps running on the platform.
    pub async fn wait_for_deployment(
        &self,
        project: &str,
        id: &str,
        options: WaitOptions,
    ) -> Result<Deployment> {
        let started = Instant::now();
        let poll = self.poll_until_terminal(project, id, &options);

        match tokio::time::timeout(options.timeout, poll).await {
            Ok(Ok(deployment)) => {
                info!(
                    "Deployment {} finished in {:.1}s",
                    id,
                    started.elapsed().as_secs_f32()
                );
                Ok(deployment)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(
                    "Stopped tracking deployment {} after {}s",
                    id,
                    options.timeout.as_secs()
                );
                Err(SyncError::Timeout(options.timeout))
            }
        }
    }

    async fn poll_until_terminal(
        &self,
        project: &str,
        id: &str,
        options: &WaitOptions,
    ) -> Result<Deployment> {
        loop {
            let deployment = self.api.get_deployment(project, id).await?;

            if let Some(callback) = &options.on_progress {
                if !deliver(callback.as_ref(), &deployment) {
                    warn!("Deployment progress callback panicked for {}", id);
                }
            }

            match deployment.outcome() {
                DeploymentOutcome::Succeeded => return Ok(deployment),
                DeploymentOutcome::Failed => {
                    return Err(SyncError::DeploymentFailed {
                        id: deployment.id.clone(),
                        stage: deployment.latest_stage.name.clone(),
                    })
                }
                DeploymentOutcome::Canceled => {
                    return Err(SyncError::DeploymentCanceled(deployment.id.clone()))
                }
                DeploymentOutcome::Pending => {
                    debug!(
                        "Deployment {} at {}/{}",
                        id, deployment.latest_stage.name, deployment.latest_stage.status
                    );
                    tokio::time::sleep(options.poll_interval).await;
                }
            }
        }
    }
}

/// Rough 0-100 estimate of a deployment's progress, for display only.
pub fn progress_percent(deployment: &Deployment) -> u8 {
    let stage = &deployment.latest_stage;
    match stage.status {
        StageStatus::Failure | StageStatus::Canceled => return 0,
        _ => {}
    }
    let done = stage.status == StageStatus::Success;

    match stage.name.as_str() {
        STAGE_QUEUED => 10,
        STAGE_INITIALIZE => 20,
        STAGE_CLONE => 30,
        STAGE_BUILD if done => 60,
        STAGE_BUILD => 50,
        STAGE_DEPLOY if done => 100,
        STAGE_DEPLOY => 85,
        _ => 0,
    }
}
