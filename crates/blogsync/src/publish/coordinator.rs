//! Runs publish jobs against the remote repository and hosting platform.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use tracing::Instrument;

use super::job::{
    FileRenameResult, FileUpdateResult, NewPostResult, PublishJob, PublishJobKind, StepId,
    StepStatus,
};
use super::render::{render_post, PostSource, RenderedPost};
use super::store::JobStore;
use crate::cache::ContentCache;
use crate::config::template::{file_name, post_url, sibling_path};
use crate::config::{BlogConfig, SyncSettings};
use crate::deploy::{progress_percent, Deployment, DeploymentTracker, WaitOptions, STAGE_DEPLOY};
use crate::drafts::DraftOverlay;
use crate::error::{Result, SyncError};
use crate::repository::RepositoryClient;
use crate::tags::{collect_tag_body, TagIndex};

/// Timing of deployment tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorSettings {
    pub deploy_poll_interval: Duration,
    pub deploy_timeout: Duration,
    /// Lookups of the deployment for a pushed commit before giving up.
    pub discovery_attempts: u32,
    pub discovery_delay: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from(&SyncSettings::default())
    }
}

impl From<&SyncSettings> for CoordinatorSettings {
    fn from(settings: &SyncSettings) -> Self {
        let poll = Duration::from_millis(settings.deploy_poll_interval_ms);
        Self {
            deploy_poll_interval: poll,
            deploy_timeout: Duration::from_secs(settings.deploy_timeout_secs),
            discovery_attempts: 10,
            discovery_delay: poll,
        }
    }
}

/// Hosting project tracked for one blog.
#[derive(Clone)]
pub struct DeploymentTarget {
    pub tracker: DeploymentTracker,
    pub project: String,
    pub poll_interval: Option<Duration>,
    pub timeout: Option<Duration>,
}

/// Deployment targets by blog id, shared between the context and the coordinator.
#[derive(Default)]
pub struct DeploymentTargets {
    targets: RwLock<HashMap<String, DeploymentTarget>>,
}

impl DeploymentTargets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, blog_id: &str, target: DeploymentTarget) {
        let mut targets = match self.targets.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        targets.insert(blog_id.to_string(), target);
    }

    pub fn remove(&self, blog_id: &str) -> bool {
        let mut targets = match self.targets.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        targets.remove(blog_id).is_some()
    }

    pub fn get(&self, blog_id: &str) -> Option<DeploymentTarget> {
        let targets = match self.targets.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        targets.get(blog_id).cloned()
    }

    pub fn contains(&self, blog_id: &str) -> bool {
        self.get(blog_id).is_some()
    }
}

/// Work carried by a job, resolved before it is spawned.
enum JobWork {
    TagPost { tag: String },
    DirectPost { source: PostSource },
    FileUpdate { path: String, content: String, sha: String },
    FileRename { old_path: String, new_path: String, sha: String },
}

/// Outcome of the push step.
struct Pushed {
    commit_hash: Option<String>,
}

/// Accepts publish requests and drives each one as a background job.
#[derive(Clone)]
pub struct PublishCoordinator {
    cache: Arc<ContentCache>,
    drafts: Arc<DraftOverlay>,
    jobs: Arc<JobStore>,
    tag_index: Arc<dyn TagIndex>,
    targets: Arc<DeploymentTargets>,
    settings: CoordinatorSettings,
}

impl PublishCoordinator {
    pub fn new(
        cache: Arc<ContentCache>,
        drafts: Arc<DraftOverlay>,
        jobs: Arc<JobStore>,
        tag_index: Arc<dyn TagIndex>,
        targets: Arc<DeploymentTargets>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            cache,
            drafts,
            jobs,
            tag_index,
            targets,
            settings,
        }
    }

    pub fn jobs(&self) -> &Arc<JobStore> {
        &self.jobs
    }

    /// Publishes the content tagged `tag` as a new post, or updates the post at the derived path.
    pub fn publish(&self, blog_id: &str, tag: &str) -> Result<String> {
        let tag = tag.trim().trim_start_matches('#');
        if tag.is_empty() {
            return Err(SyncError::InvalidRequest("Tag must not be empty".to_string()));
        }
        self.start(
            blog_id,
            PublishJobKind::tag_post(tag),
            JobWork::TagPost {
                tag: tag.to_string(),
            },
        )
    }

    /// Publishes already prepared content as a post.
    pub fn publish_direct(&self, blog_id: &str, source: PostSource) -> Result<String> {
        self.start(
            blog_id,
            PublishJobKind::direct_post(&source.title),
            JobWork::DirectPost { source },
        )
    }

    /// Updates an existing file, provided the remote still has version `sha`.
    pub fn publish_cms_file(
        &self,
        blog_id: &str,
        path: &str,
        content: &str,
        sha: &str,
    ) -> Result<String> {
        if path.trim_matches('/').is_empty() || sha.is_empty() {
            return Err(SyncError::InvalidRequest(
                "A file update needs a path and the version it is based on".to_string(),
            ));
        }
        self.start(
            blog_id,
            PublishJobKind::file_update(path),
            JobWork::FileUpdate {
                path: path.to_string(),
                content: content.to_string(),
                sha: sha.to_string(),
            },
        )
    }

    /// Renames a file within its directory, provided the remote still has version `sha`.
    pub fn rename_cms_file(
        &self,
        blog_id: &str,
        old_path: &str,
        new_name: &str,
        sha: &str,
    ) -> Result<String> {
        let new_path = sibling_path(old_path, new_name).ok_or_else(|| {
            SyncError::InvalidRequest(format!("'{}' is not a valid file name", new_name))
        })?;
        if new_path == old_path {
            return Err(SyncError::InvalidRequest(
                "The new name is the same as the current one".to_string(),
            ));
        }
        self.start(
            blog_id,
            PublishJobKind::file_rename(old_path, new_name),
            JobWork::FileRename {
                old_path: old_path.to_string(),
                new_path,
                sha: sha.to_string(),
            },
        )
    }

    fn start(&self, blog_id: &str, kind: PublishJobKind, work: JobWork) -> Result<String> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| SyncError::NotInitialized("Tokio runtime"))?;
        let config = self
            .cache
            .config(blog_id)
            .ok_or_else(|| SyncError::BlogNotFound(blog_id.to_string()))?;
        let client = self
            .cache
            .client(blog_id)
            .ok_or_else(|| SyncError::BlogNotFound(blog_id.to_string()))?;
        let target = self.targets.get(blog_id);

        let job = self
            .jobs
            .insert(PublishJob::new(blog_id, kind, target.is_some()));
        let job_id = job.id.clone();
        info!("Accepted job {}: {} on {}", job_id, job.kind.describe(), blog_id);

        let span = tracing::info_span!("publish_job", job_id = %job_id, blog_id = %blog_id);
        let coordinator = self.clone();
        let id = job_id.clone();
        runtime.spawn(
            async move {
                let result = coordinator
                    .execute(&id, &config, client.as_ref(), target, work)
                    .await;
                match result {
                    Ok(()) => info!("Job {} completed", id),
                    Err(e) => {
                        warn!("Job {} failed: {}", id, e);
                        if let Err(store_err) = coordinator.jobs.update(&id, |job| job.fail(&e)) {
                            warn!("Could not record failure of job {}: {}", id, store_err);
                        }
                    }
                }
            }
            .instrument(span),
        );

        Ok(job_id)
    }

    fn begin(&self, job_id: &str, step: StepId) -> Result<()> {
        self.jobs.update(job_id, |job| job.start_step(step))?;
        Ok(())
    }

    fn finish(&self, job_id: &str, step: StepId, message: Option<String>) -> Result<()> {
        self.jobs
            .update(job_id, |job| job.complete_step(step, message))?;
        Ok(())
    }

    async fn execute(
        &self,
        job_id: &str,
        config: &BlogConfig,
        client: &dyn RepositoryClient,
        target: Option<DeploymentTarget>,
        work: JobWork,
    ) -> Result<()> {
        self.begin(job_id, StepId::Prepare)?;
        let prepared = match &work {
            JobWork::TagPost { tag } => {
                let body = collect_tag_body(self.tag_index.as_ref(), tag).await?;
                let source = PostSource::from_tag(tag, &body);
                Some(render_post(config, &source, Utc::now())?)
            }
            JobWork::DirectPost { source } => Some(render_post(config, source, Utc::now())?),
            JobWork::FileUpdate { .. } | JobWork::FileRename { .. } => None,
        };
        self.finish(
            job_id,
            StepId::Prepare,
            prepared.as_ref().map(|p| p.path.clone()),
        )?;

        self.begin(job_id, StepId::Push)?;
        let pushed = match (work, prepared) {
            (_, Some(post)) => self.push_new_post(job_id, config, client, post).await?,
            (JobWork::FileUpdate { path, content, sha }, None) => {
                self.push_update(job_id, config, client, &path, &content, &sha)
                    .await?
            }
            (
                JobWork::FileRename {
                    old_path,
                    new_path,
                    sha,
                },
                None,
            ) => {
                self.push_rename(job_id, config, client, &old_path, &new_path, &sha)
                    .await?
            }
            (_, None) => {
                return Err(SyncError::InvalidRequest(
                    "Post content was not prepared".to_string(),
                ))
            }
        };

        if let Some(target) = target {
            let commit = match pushed.commit_hash {
                Some(hash) => hash,
                None => client.latest_commit_hash(&config.repository, &config.branch).await?,
            };
            self.finish(job_id, StepId::Push, Some(short_hash(&commit)))?;
            self.track_deployment(job_id, &target, &commit).await?;
        } else {
            let message = pushed.commit_hash.as_deref().map(short_hash);
            self.finish(job_id, StepId::Push, message)?;
        }

        self.jobs.update(job_id, |job| job.complete())?;
        Ok(())
    }

    async fn push_new_post(
        &self,
        job_id: &str,
        config: &BlogConfig,
        client: &dyn RepositoryClient,
        post: RenderedPost,
    ) -> Result<Pushed> {
        let existing = client
            .get_file_content(&config.repository, &post.path, &config.branch)
            .await?;
        let (message, expected) = match &existing {
            Some(file) => (
                format!("Update post {}", post.slug),
                Some(file.content_hash.as_str()),
            ),
            None => (format!("Publish post {}", post.slug), None),
        };
        debug!(
            "Writing {} ({})",
            post.path,
            if expected.is_some() { "update" } else { "create" }
        );

        let outcome = client
            .create_or_update_file(
                &config.repository,
                &post.path,
                &post.content,
                &message,
                &config.branch,
                expected,
            )
            .await?;

        self.cache.update_after_write(
            &config.id,
            &post.path,
            &outcome.content_hash,
            Some(&post.content),
        )?;
        self.drafts.discard(&config.id, &post.path);

        let result = NewPostResult {
            post_url: post_url(config.site_url.as_deref(), &config.live_post_path, &post.slug),
            slug: post.slug,
            path: post.path,
            content_hash: outcome.content_hash,
        };
        self.jobs.update(job_id, move |job| match &mut job.kind {
            PublishJobKind::TagPost { result: slot, .. }
            | PublishJobKind::DirectPost { result: slot, .. } => {
                *slot = Some(result);
                true
            }
            _ => false,
        })?;

        Ok(Pushed {
            commit_hash: outcome.commit_hash,
        })
    }

    async fn push_update(
        &self,
        job_id: &str,
        config: &BlogConfig,
        client: &dyn RepositoryClient,
        path: &str,
        content: &str,
        sha: &str,
    ) -> Result<Pushed> {
        let message = format!("Update {}", file_name(path));
        let outcome = client
            .create_or_update_file(
                &config.repository,
                path,
                content,
                &message,
                &config.branch,
                Some(sha),
            )
            .await?;

        self.cache
            .update_after_write(&config.id, path, &outcome.content_hash, Some(content))?;
        self.drafts.discard(&config.id, path);

        let content_hash = outcome.content_hash.clone();
        self.jobs.update(job_id, move |job| match &mut job.kind {
            PublishJobKind::FileUpdate { result, .. } => {
                *result = Some(FileUpdateResult { content_hash });
                true
            }
            _ => false,
        })?;

        Ok(Pushed {
            commit_hash: outcome.commit_hash,
        })
    }

    async fn push_rename(
        &self,
        job_id: &str,
        config: &BlogConfig,
        client: &dyn RepositoryClient,
        old_path: &str,
        new_path: &str,
        sha: &str,
    ) -> Result<Pushed> {
        let outcome = client
            .rename_file(&config.repository, old_path, new_path, &config.branch, sha)
            .await?;

        self.cache
            .rename_post(&config.id, old_path, new_path, &outcome.content_hash)?;
        self.drafts.rename(&config.id, old_path, new_path);

        let result = FileRenameResult {
            new_path: new_path.to_string(),
            content_hash: outcome.content_hash.clone(),
        };
        self.jobs.update(job_id, move |job| match &mut job.kind {
            PublishJobKind::FileRename { result: slot, .. } => {
                *slot = Some(result);
                true
            }
            _ => false,
        })?;

        Ok(Pushed {
            commit_hash: outcome.commit_hash,
        })
    }

    async fn track_deployment(
        &self,
        job_id: &str,
        target: &DeploymentTarget,
        commit: &str,
    ) -> Result<()> {
        self.begin(job_id, StepId::Build)?;

        let deployment = self.discover_deployment(target, commit).await?;
        info!("Tracking deployment {} for commit {}", deployment.id, short_hash(commit));
        self.jobs
            .update(job_id, |job| apply_deployment(job, &deployment))?;

        let jobs = Arc::clone(&self.jobs);
        let id = job_id.to_string();
        let options = WaitOptions::new(
            target.poll_interval.unwrap_or(self.settings.deploy_poll_interval),
            target.timeout.unwrap_or(self.settings.deploy_timeout),
        )
        .on_progress(move |d| {
            if let Err(e) = jobs.update(&id, |job| apply_deployment(job, d)) {
                debug!("Dropping deployment progress for job {}: {}", id, e);
            }
        });

        let done = target
            .tracker
            .wait_for_deployment(&target.project, &deployment.id, options)
            .await?;

        self.jobs.update(job_id, |job| {
            let mut changed = apply_deployment(job, &done);
            if job.step(StepId::Build).map(|s| s.status) == Some(StepStatus::InProgress) {
                changed |= job.complete_step(StepId::Build, None);
                changed |= job.start_step(StepId::Deploy);
            }
            changed |= job.complete_step(StepId::Deploy, done.url.clone());
            changed
        })?;
        Ok(())
    }

    /// The platform registers builds asynchronously, so the lookup is retried.
    async fn discover_deployment(&self, target: &DeploymentTarget, commit: &str) -> Result<Deployment> {
        let attempts = self.settings.discovery_attempts.max(1);
        for attempt in 1..=attempts {
            if let Some(deployment) = target.tracker.find_by_commit(&target.project, commit).await? {
                return Ok(deployment);
            }
            if attempt < attempts {
                debug!(
                    "Deployment for {} not visible yet (attempt {}/{})",
                    short_hash(commit),
                    attempt,
                    attempts
                );
                tokio::time::sleep(self.settings.discovery_delay).await;
            }
        }
        Err(SyncError::DeploymentNotFound(commit.to_string()))
    }
}

/// Mirrors a deployment snapshot onto the job's steps and progress.
fn apply_deployment(job: &mut PublishJob, deployment: &Deployment) -> bool {
    let mut changed = false;

    let record = deployment.record();
    if job.deployment.as_ref() != Some(&record) {
        job.deployment = Some(record);
        changed = true;
    }

    if deployment.latest_stage.name == STAGE_DEPLOY
        && job.step(StepId::Build).map(|s| s.status) == Some(StepStatus::InProgress)
    {
        changed |= job.complete_step(StepId::Build, None);
        changed |= job.start_step(StepId::Deploy);
    }

    let before = job.progress;
    job.raise_progress(progress_percent(deployment).min(99));
    changed || job.progress != before
}

fn short_hash(hash: &str) -> String {
    hash.chars().take(7).collect()
}
