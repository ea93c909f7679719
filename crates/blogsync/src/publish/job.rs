//! Publish job state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::deploy::DeploymentRecord;
use crate::error::{ErrorKind, SyncError};

/// Overall status of a job.
///
/// Jobs only move forward through this list; `Failed` can be entered from any
/// non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Preparing,
    Pushing,
    Building,
    Deploying,
    Completed,
    Failed,
}

impl JobStatus {
    fn rank(self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Preparing => 1,
            JobStatus::Pushing => 2,
            JobStatus::Building => 3,
            JobStatus::Deploying => 4,
            JobStatus::Completed => 5,
            JobStatus::Failed => 6,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Progress reached when the status is entered.
    pub fn progress(self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Preparing => 10,
            JobStatus::Pushing => 40,
            JobStatus::Building => 60,
            JobStatus::Deploying => 85,
            JobStatus::Completed => 100,
            JobStatus::Failed => 0,
        }
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == JobStatus::Failed || next.rank() > self.rank()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "Pending"),
            JobStatus::Preparing => write!(f, "Preparing"),
            JobStatus::Pushing => write!(f, "Pushing"),
            JobStatus::Building => write!(f, "Building"),
            JobStatus::Deploying => write!(f, "Deploying"),
            JobStatus::Completed => write!(f, "Completed"),
            JobStatus::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl StepStatus {
    fn rank(self) -> u8 {
        match self {
            StepStatus::Pending => 0,
            StepStatus::InProgress => 1,
            StepStatus::Completed | StepStatus::Failed => 2,
        }
    }

    pub fn is_done(self) -> bool {
        self.rank() == 2
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    Prepare,
    Push,
    Build,
    Deploy,
}

impl StepId {
    pub fn label(self) -> &'static str {
        match self {
            StepId::Prepare => "Prepare content",
            StepId::Push => "Push to repository",
            StepId::Build => "Build site",
            StepId::Deploy => "Deploy site",
        }
    }

    /// Job status while this step runs.
    pub fn status(self) -> JobStatus {
        match self {
            StepId::Prepare => JobStatus::Preparing,
            StepId::Push => JobStatus::Pushing,
            StepId::Build => JobStatus::Building,
            StepId::Deploy => JobStatus::Deploying,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStep {
    pub id: StepId,
    pub label: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl JobStep {
    fn new(id: StepId) -> Self {
        Self {
            id,
            label: id.label().to_string(),
            status: StepStatus::Pending,
            message: None,
        }
    }
}

/// Result of publishing a new post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPostResult {
    pub slug: String,
    pub post_url: String,
    pub path: String,
    pub content_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUpdateResult {
    pub content_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRenameResult {
    pub new_path: String,
    pub content_hash: String,
}

/// What a job does, with the result fields that only exist for that kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PublishJobKind {
    #[serde(rename_all = "camelCase")]
    TagPost {
        tag: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<NewPostResult>,
    },
    #[serde(rename_all = "camelCase")]
    DirectPost {
        title: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<NewPostResult>,
    },
    #[serde(rename_all = "camelCase")]
    FileUpdate {
        path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<FileUpdateResult>,
    },
    #[serde(rename_all = "camelCase")]
    FileRename {
        old_path: String,
        new_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<FileRenameResult>,
    },
}

impl PublishJobKind {
    pub fn tag_post(tag: &str) -> Self {
        PublishJobKind::TagPost {
            tag: tag.to_string(),
            result: None,
        }
    }

    pub fn direct_post(title: &str) -> Self {
        PublishJobKind::DirectPost {
            title: title.to_string(),
            result: None,
        }
    }

    pub fn file_update(path: &str) -> Self {
        PublishJobKind::FileUpdate {
            path: path.to_string(),
            result: None,
        }
    }

    pub fn file_rename(old_path: &str, new_name: &str) -> Self {
        PublishJobKind::FileRename {
            old_path: old_path.to_string(),
            new_name: new_name.to_string(),
            result: None,
        }
    }

    pub fn new_post_result(&self) -> Option<&NewPostResult> {
        match self {
            PublishJobKind::TagPost { result, .. } | PublishJobKind::DirectPost { result, .. } => {
                result.as_ref()
            }
            _ => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            PublishJobKind::TagPost { tag, .. } => format!("publish tag '{}'", tag),
            PublishJobKind::DirectPost { title, .. } => format!("publish '{}'", title),
            PublishJobKind::FileUpdate { path, .. } => format!("update {}", path),
            PublishJobKind::FileRename {
                old_path, new_name, ..
            } => format!("rename {} to {}", old_path, new_name),
        }
    }
}

/// Snapshot of a publish job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishJob {
    pub id: String,
    pub blog_id: String,
    #[serde(flatten)]
    pub kind: PublishJobKind,
    pub status: JobStatus,
    pub steps: Vec<JobStep>,
    /// 0-100, never decreasing.
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentRecord>,
    /// Incremented on every change.
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl PublishJob {
    /// Creates a pending job. Build and deploy steps exist only with deployment tracking.
    pub fn new(blog_id: &str, kind: PublishJobKind, track_deployment: bool) -> Self {
        let mut steps = vec![JobStep::new(StepId::Prepare), JobStep::new(StepId::Push)];
        if track_deployment {
            steps.push(JobStep::new(StepId::Build));
            steps.push(JobStep::new(StepId::Deploy));
        }

        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            blog_id: blog_id.to_string(),
            kind,
            status: JobStatus::Pending,
            steps,
            progress: 0,
            error: None,
            error_kind: None,
            deployment: None,
            revision: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn step(&self, id: StepId) -> Option<&JobStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn has_step(&self, id: StepId) -> bool {
        self.step(id).is_some()
    }

    fn step_mut(&mut self, id: StepId) -> Option<&mut JobStep> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    fn set_step_status(&mut self, id: StepId, status: StepStatus, message: Option<String>) -> bool {
        let Some(step) = self.step_mut(id) else {
            return false;
        };
        if step.status.is_done() || status.rank() < step.status.rank() {
            return false;
        }
        step.status = status;
        if message.is_some() {
            step.message = message;
        }
        true
    }

    /// Raises progress; lower values are ignored.
    pub(crate) fn raise_progress(&mut self, value: u8) {
        self.progress = self.progress.max(value.min(100));
    }

    /// Moves to `status` if allowed. Returns false for backwards or post-terminal moves.
    pub(crate) fn advance(&mut self, status: JobStatus) -> bool {
        if !self.status.can_transition_to(status) {
            return false;
        }
        self.status = status;
        self.raise_progress(status.progress());
        if status.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        true
    }

    /// Enters a step and the job status that goes with it.
    pub(crate) fn start_step(&mut self, id: StepId) -> bool {
        if !self.advance(id.status()) {
            return false;
        }
        self.set_step_status(id, StepStatus::InProgress, None)
    }

    pub(crate) fn complete_step(&mut self, id: StepId, message: Option<String>) -> bool {
        self.set_step_status(id, StepStatus::Completed, message)
    }

    pub(crate) fn complete(&mut self) -> bool {
        self.advance(JobStatus::Completed)
    }

    /// Fails the running step and the job. Progress stays where it was.
    pub(crate) fn fail(&mut self, error: &SyncError) -> bool {
        if self.is_terminal() {
            return false;
        }
        let message = error.to_string();
        let running: Vec<StepId> = self
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::InProgress)
            .map(|s| s.id)
            .collect();
        for id in running {
            self.set_step_status(id, StepStatus::Failed, Some(message.clone()));
        }

        self.status = JobStatus::Failed;
        self.error = Some(message);
        self.error_kind = Some(error.kind());
        self.completed_at = Some(Utc::now());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_only_moves_forward() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Preparing));
        assert!(JobStatus::Pushing.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Pushing.can_transition_to(JobStatus::Preparing));
        assert!(JobStatus::Building.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn test_steps_without_deployment() {
        let job = PublishJob::new("b", PublishJobKind::tag_post("launch"), false);
        let ids: Vec<StepId> = job.steps.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![StepId::Prepare, StepId::Push]);
        assert_eq!(job.status, JobStatus::Pending);

        let job = PublishJob::new("b", PublishJobKind::tag_post("launch"), true);
        assert!(job.has_step(StepId::Deploy));
    }

    #[test]
    fn test_happy_path_progress() {
        let mut job = PublishJob::new("b", PublishJobKind::file_update("p.md"), false);
        assert!(job.start_step(StepId::Prepare));
        assert_eq!(job.progress, 10);
        assert!(job.complete_step(StepId::Prepare, None));
        assert!(job.start_step(StepId::Push));
        assert_eq!(job.status, JobStatus::Pushing);
        assert!(job.complete_step(StepId::Push, Some("abc".into())));
        assert!(job.complete());
        assert_eq!(job.progress, 100);
        assert!(job.completed_at.is_some());

        // Nothing moves after a terminal state.
        assert!(!job.start_step(StepId::Prepare));
        assert!(!job.fail(&SyncError::Network("late".into())));
    }

    #[test]
    fn test_failure_freezes_progress() {
        let mut job = PublishJob::new("b", PublishJobKind::file_update("p.md"), false);
        job.start_step(StepId::Prepare);
        job.complete_step(StepId::Prepare, None);
        job.start_step(StepId::Push);

        let err = SyncError::Conflict {
            path: "p.md".into(),
            message: "stale".into(),
        };
        assert!(job.fail(&err));
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.progress, 40);
        assert_eq!(job.error_kind, Some(ErrorKind::Conflict));
        assert_eq!(job.step(StepId::Push).unwrap().status, StepStatus::Failed);
        assert_eq!(job.step(StepId::Prepare).unwrap().status, StepStatus::Completed);
    }

    #[test]
    fn test_step_status_cannot_regress() {
        let mut job = PublishJob::new("b", PublishJobKind::file_update("p.md"), false);
        job.start_step(StepId::Prepare);
        job.complete_step(StepId::Prepare, None);
        assert!(!job.set_step_status(StepId::Prepare, StepStatus::InProgress, None));
        assert!(!job.set_step_status(StepId::Build, StepStatus::InProgress, None));
    }

    #[test]
    fn test_serializes_kind_inline() {
        let job = PublishJob::new("b", PublishJobKind::file_rename("a.md", "b"), false);
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["kind"], "file_rename");
        assert_eq!(json["oldPath"], "a.md");
        assert_eq!(json["status"], "pending");
        assert!(json.get("result").is_none());
    }
}
