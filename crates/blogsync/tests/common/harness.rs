//! Test harness for running publish jobs against simulated remotes.
//!
//! The `TestHarness` wires a `SyncContext` to:
//! - an `InMemoryRepository` standing in for the content repository
//! - a `StaticTagIndex` holding tagged note content
//! - optionally a `ScriptedHosting` that plays back deployment stages

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use blogsync::config::BlogConfig;
use blogsync::deploy::{Deployment, HostingApi, StageStatus};
use blogsync::publish::{JobStore, PublishJob};
use blogsync::repository::{InMemoryRepository, RepositoryClient};
use blogsync::{Result, StaticTagIndex, SyncContext, SyncError};

use super::builders::{deployment, fast_settings, BlogConfigBuilder};

pub const BLOG_ID: &str = "blog";

/// Hosting platform double that reports one deployment for the repository's head commit.
///
/// Each `get_deployment` call advances to the next scripted stage; the last stage repeats.
pub struct ScriptedHosting {
    repo: Arc<InMemoryRepository>,
    stages: Mutex<VecDeque<(String, StageStatus)>>,
    visible: bool,
    pub polls: AtomicUsize,
}

impl ScriptedHosting {
    pub fn new(repo: Arc<InMemoryRepository>, stages: &[(&str, StageStatus)]) -> Self {
        Self {
            repo,
            stages: Mutex::new(
                stages
                    .iter()
                    .map(|(name, status)| (name.to_string(), *status))
                    .collect(),
            ),
            visible: true,
            polls: AtomicUsize::new(0),
        }
    }

    /// A platform that never registers a deployment.
    pub fn empty(repo: Arc<InMemoryRepository>) -> Self {
        Self {
            visible: false,
            ..Self::new(repo, &[("queued", StageStatus::Active)])
        }
    }

    fn current(&self, advance: bool) -> Deployment {
        let mut stages = self.stages.lock().unwrap();
        let (name, status) = if advance && stages.len() > 1 {
            stages.pop_front().unwrap()
        } else {
            stages.front().cloned().unwrap()
        };
        deployment("dep-1", &name, status, &self.repo.head())
    }
}

#[async_trait]
impl HostingApi for ScriptedHosting {
    async fn list_deployments(&self, _project: &str, limit: usize) -> Result<Vec<Deployment>> {
        if !self.visible || limit == 0 {
            return Ok(Vec::new());
        }
        Ok(vec![self.current(false)])
    }

    async fn get_deployment(&self, _project: &str, id: &str) -> Result<Deployment> {
        if !self.visible {
            return Err(SyncError::from_status(404, "", "get deployment", id));
        }
        self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(self.current(true))
    }
}

/// Isolated sync context with simulated collaborators.
pub struct TestHarness {
    pub context: SyncContext,
    pub repo: Arc<InMemoryRepository>,
    pub tags: Arc<StaticTagIndex>,
    pub hosting: Option<Arc<ScriptedHosting>>,
}

impl TestHarness {
    /// A blog without deployment tracking.
    pub fn new() -> Self {
        Self::build(BlogConfigBuilder::new(BLOG_ID).build(), None)
    }

    /// A blog with deployment tracking that plays back `stages`.
    pub fn with_deployment(stages: &[(&str, StageStatus)]) -> Self {
        let repo = Arc::new(InMemoryRepository::new());
        let hosting = Arc::new(ScriptedHosting::new(Arc::clone(&repo), stages));
        Self::build_with(
            BlogConfigBuilder::new(BLOG_ID).deployment("site").build(),
            repo,
            Some(hosting),
        )
    }

    /// A blog whose hosting platform never shows a deployment.
    pub fn with_missing_deployment() -> Self {
        let repo = Arc::new(InMemoryRepository::new());
        let hosting = Arc::new(ScriptedHosting::empty(Arc::clone(&repo)));
        Self::build_with(
            BlogConfigBuilder::new(BLOG_ID).deployment("site").build(),
            repo,
            Some(hosting),
        )
    }

    pub fn build(config: BlogConfig, hosting: Option<Arc<ScriptedHosting>>) -> Self {
        Self::build_with(config, Arc::new(InMemoryRepository::new()), hosting)
    }

    fn build_with(
        config: BlogConfig,
        repo: Arc<InMemoryRepository>,
        hosting: Option<Arc<ScriptedHosting>>,
    ) -> Self {
        let context = SyncContext::new(fast_settings());
        let tags = Arc::new(StaticTagIndex::new());
        context.initialize(tags.clone());

        let client: Arc<dyn RepositoryClient> = repo.clone();
        let api = hosting.clone().map(|h| h as Arc<dyn HostingApi>);
        let added = context.add_blog_with(config, client, api);
        assert!(added.is_ok(), "blog registration failed: {:?}", added.error);

        Self {
            context,
            repo,
            tags,
            hosting,
        }
    }

    /// Path of a post file in the default content directory.
    pub fn post_path(name: &str) -> String {
        format!("src/content/blog/{}", name)
    }

    /// Puts a file on the remote and refreshes the cache.
    pub async fn seed(&self, name: &str, content: &str) -> String {
        let path = Self::post_path(name);
        let hash = self.repo.put_external(&path, content);
        self.refresh().await;
        hash
    }

    pub async fn refresh(&self) {
        let response = self.context.refresh_blog(BLOG_ID).await;
        assert!(response.is_ok(), "refresh failed: {:?}", response.error);
    }

    pub async fn wait(&self, job_id: &str) -> PublishJob {
        wait_for_terminal(self.context.jobs(), job_id).await
    }
}

/// Polls the store until the job completes or fails.
pub async fn wait_for_terminal(jobs: &JobStore, job_id: &str) -> PublishJob {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let job = jobs
            .get(job_id)
            .unwrap_or_else(|| panic!("job {} disappeared", job_id));
        if job.is_terminal() {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {} did not finish: {:?}",
            job_id,
            job.status
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
