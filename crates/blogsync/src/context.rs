//! Wires the cache, drafts, job store and coordinator together and exposes the
//! operations the UI layer calls.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::api::ApiResponse;
use crate::cache::{CacheEvent, ContentCache, RefreshAllReport, RefreshSummary, RemoteTreeNode};
use crate::config::loader::{validate_blog, validate_config};
use crate::config::{AppConfig, BlogConfig, SyncSettings};
use crate::deploy::{DeploymentTracker, HostingApi, PagesClient};
use crate::drafts::{Draft, DraftOverlay};
use crate::error::{ConfigError, Result, SyncError};
use crate::listeners::ListenerId;
use crate::publish::{
    CoordinatorSettings, DeploymentTarget, DeploymentTargets, JobStore, PostSource, PublishCoordinator,
    PublishJob,
};
use crate::repository::{GitHubClient, RepositoryClient};
use crate::tags::TagIndex;

/// Content of a post as shown in the editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostContent {
    pub content: String,
    /// Remote version the content is based on.
    pub sha: String,
    pub is_draft: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_content: Option<String>,
}

/// Shared state of the sync pipeline, constructed once at startup.
pub struct SyncContext {
    settings: SyncSettings,
    cache: Arc<ContentCache>,
    drafts: Arc<DraftOverlay>,
    jobs: Arc<JobStore>,
    targets: Arc<DeploymentTargets>,
    coordinator: RwLock<Option<PublishCoordinator>>,
}

impl SyncContext {
    pub fn new(settings: SyncSettings) -> Self {
        let jobs = JobStore::new(Duration::from_secs(settings.job_retention_secs));
        Self {
            settings,
            cache: Arc::new(ContentCache::new()),
            drafts: Arc::new(DraftOverlay::new()),
            jobs: Arc::new(jobs),
            targets: Arc::new(DeploymentTargets::new()),
            coordinator: RwLock::new(None),
        }
    }

    /// Builds a context and registers every configured blog.
    ///
    /// Tokens are resolved here; a blog whose token cannot be resolved fails the whole load.
    pub fn from_config(config: &AppConfig) -> std::result::Result<Self, ConfigError> {
        validate_config(config)?;

        let context = Self::new(config.sync.clone());
        for blog in &config.blogs {
            let (client, hosting) = context.build_clients(blog)?;
            context.register(blog.clone(), client, hosting);
        }
        info!("Loaded {} blog(s)", config.blogs.len());
        Ok(context)
    }

    /// Enables publishing. Tagged content is looked up through `tag_index`.
    pub fn initialize(&self, tag_index: Arc<dyn TagIndex>) {
        let coordinator = PublishCoordinator::new(
            Arc::clone(&self.cache),
            Arc::clone(&self.drafts),
            Arc::clone(&self.jobs),
            tag_index,
            Arc::clone(&self.targets),
            CoordinatorSettings::from(&self.settings),
        );

        let mut slot = match self.coordinator.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Coordinator lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        *slot = Some(coordinator);
    }

    pub fn is_initialized(&self) -> bool {
        self.coordinator().is_ok()
    }

    fn coordinator(&self) -> Result<PublishCoordinator> {
        let slot = match self.coordinator.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.clone()
            .ok_or(SyncError::NotInitialized("Publish coordinator"))
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    pub fn drafts(&self) -> &Arc<DraftOverlay> {
        &self.drafts
    }

    pub fn jobs(&self) -> &Arc<JobStore> {
        &self.jobs
    }

    // Blogs

    fn build_clients(
        &self,
        blog: &BlogConfig,
    ) -> std::result::Result<(Arc<dyn RepositoryClient>, Option<Arc<dyn HostingApi>>), ConfigError>
    {
        let token = blog.token.resolve_optional()?;
        if token.is_none() {
            info!("Blog '{}' has no token, using anonymous access", blog.id);
        }
        let client: Arc<dyn RepositoryClient> =
            Arc::new(GitHubClient::new(&self.settings.github_api_url, token)?);

        let hosting = match &blog.deployment {
            Some(deployment) => {
                let token = deployment.token.resolve()?;
                let pages = PagesClient::new(
                    &self.settings.pages_api_url,
                    &deployment.account_id,
                    token,
                )?;
                Some(Arc::new(pages) as Arc<dyn HostingApi>)
            }
            None => None,
        };

        Ok((client, hosting))
    }

    fn register(
        &self,
        config: BlogConfig,
        client: Arc<dyn RepositoryClient>,
        hosting: Option<Arc<dyn HostingApi>>,
    ) {
        let blog_id = config.id.clone();
        self.targets.remove(&blog_id);
        if let (Some(api), Some(deployment)) = (hosting, config.deployment.as_ref()) {
            self.targets.insert(
                &blog_id,
                DeploymentTarget {
                    tracker: DeploymentTracker::new(api),
                    project: deployment.project.clone(),
                    poll_interval: deployment.poll_interval_ms.map(Duration::from_millis),
                    timeout: deployment.timeout_secs.map(Duration::from_secs),
                },
            );
        }
        self.cache.register(config, client);
    }

    /// Adds a blog backed by the GitHub and hosting APIs configured in the settings.
    ///
    /// An existing blog with the same id is replaced and its drafts are dropped.
    pub fn add_blog(&self, config: BlogConfig) -> ApiResponse<()> {
        let clients = validate_blog(&config).and_then(|_| self.build_clients(&config));
        match clients {
            Ok((client, hosting)) => self.add_blog_with(config, client, hosting),
            Err(e) => ApiResponse::err(&SyncError::Config(e)),
        }
    }

    /// Adds a blog with the given clients.
    pub fn add_blog_with(
        &self,
        config: BlogConfig,
        client: Arc<dyn RepositoryClient>,
        hosting: Option<Arc<dyn HostingApi>>,
    ) -> ApiResponse<()> {
        if let Err(e) = validate_blog(&config) {
            return ApiResponse::err(&SyncError::Config(e));
        }

        if self.cache.contains(&config.id) {
            info!("Reconfiguring blog '{}'", config.id);
            self.drafts.clear_blog(&config.id);
        }
        self.register(config, client, hosting);
        ApiResponse::ok(())
    }

    /// Removes a blog with its cached posts, drafts and deployment target.
    pub fn remove_blog(&self, blog_id: &str) -> ApiResponse<bool> {
        let removed = self.cache.deregister(blog_id);
        let drafts = self.drafts.clear_blog(blog_id);
        self.targets.remove(blog_id);
        if removed {
            info!("Removed blog '{}' ({} draft(s) discarded)", blog_id, drafts);
        }
        ApiResponse::ok(removed)
    }

    pub fn blog_ids(&self) -> Vec<String> {
        self.cache.blog_ids()
    }

    fn require_blog(&self, blog_id: &str) -> Result<()> {
        if self.cache.contains(blog_id) {
            Ok(())
        } else {
            Err(SyncError::BlogNotFound(blog_id.to_string()))
        }
    }

    // Queries

    pub fn get_remote_tree(&self) -> ApiResponse<Vec<RemoteTreeNode>> {
        ApiResponse::ok(self.cache.tree(Some(&self.drafts)))
    }

    /// Post content for the editor. A draft is returned without contacting the remote.
    pub async fn get_post_content(&self, blog_id: &str, path: &str) -> ApiResponse<PostContent> {
        self.post_content(blog_id, path).await.into()
    }

    async fn post_content(&self, blog_id: &str, path: &str) -> Result<PostContent> {
        self.require_blog(blog_id)?;

        if let Some(draft) = self.drafts.get(blog_id, path) {
            return Ok(PostContent {
                content: draft.content,
                sha: draft.original_hash,
                is_draft: true,
                original_content: Some(draft.original_content),
            });
        }

        let file = self.cache.get_content(blog_id, path).await?;
        Ok(PostContent {
            content: file.content,
            sha: file.content_hash,
            is_draft: false,
            original_content: None,
        })
    }

    // Drafts

    /// Stores an edit. Returns `None` when the content equals the original and no draft is kept.
    pub fn save_draft(
        &self,
        blog_id: &str,
        path: &str,
        content: &str,
        original_hash: &str,
        original_content: &str,
    ) -> ApiResponse<Option<Draft>> {
        self.require_blog(blog_id)
            .map(|_| {
                self.drafts
                    .save(blog_id, path, content, original_hash, original_content)
            })
            .into()
    }

    pub fn get_draft(&self, blog_id: &str, path: &str) -> ApiResponse<Option<Draft>> {
        ApiResponse::ok(self.drafts.get(blog_id, path))
    }

    pub fn has_draft(&self, blog_id: &str, path: &str) -> ApiResponse<bool> {
        ApiResponse::ok(self.drafts.has(blog_id, path))
    }

    pub fn discard_draft(&self, blog_id: &str, path: &str) -> ApiResponse<bool> {
        ApiResponse::ok(self.drafts.discard(blog_id, path))
    }

    pub fn get_modified_paths(&self, blog_id: &str) -> ApiResponse<Vec<String>> {
        ApiResponse::ok(self.drafts.modified_paths(blog_id))
    }

    // Refresh

    pub async fn refresh_blog(&self, blog_id: &str) -> ApiResponse<RefreshSummary> {
        self.cache.refresh(blog_id).await.into()
    }

    pub async fn refresh_all(&self) -> ApiResponse<RefreshAllReport> {
        ApiResponse::ok(self.cache.refresh_all().await)
    }

    // Publishing

    pub fn publish(&self, blog_id: &str, tag: &str) -> ApiResponse<String> {
        self.coordinator()
            .and_then(|c| c.publish(blog_id, tag))
            .into()
    }

    pub fn publish_direct(&self, blog_id: &str, source: PostSource) -> ApiResponse<String> {
        self.coordinator()
            .and_then(|c| c.publish_direct(blog_id, source))
            .into()
    }

    pub fn publish_cms_file(
        &self,
        blog_id: &str,
        path: &str,
        content: &str,
        sha: &str,
    ) -> ApiResponse<String> {
        self.coordinator()
            .and_then(|c| c.publish_cms_file(blog_id, path, content, sha))
            .into()
    }

    pub fn rename_cms_file(
        &self,
        blog_id: &str,
        old_path: &str,
        new_name: &str,
        sha: &str,
    ) -> ApiResponse<String> {
        self.coordinator()
            .and_then(|c| c.rename_cms_file(blog_id, old_path, new_name, sha))
            .into()
    }

    // Jobs

    pub fn get_job(&self, job_id: &str) -> ApiResponse<PublishJob> {
        self.jobs
            .get(job_id)
            .ok_or_else(|| SyncError::JobNotFound(job_id.to_string()))
            .into()
    }

    /// Streams snapshots of a job, starting with the current one.
    pub fn subscribe_job<F>(&self, job_id: &str, callback: F) -> ApiResponse<ListenerId>
    where
        F: Fn(&PublishJob) + Send + Sync + 'static,
    {
        self.jobs.subscribe(job_id, callback).into()
    }

    /// Removes every subscriber of a job; returns how many there were.
    pub fn unsubscribe_job(&self, job_id: &str) -> ApiResponse<usize> {
        ApiResponse::ok(self.jobs.unsubscribe(job_id))
    }

    /// Removes one subscriber returned by [`subscribe_job`](Self::subscribe_job).
    pub fn unsubscribe_job_listener(&self, job_id: &str, id: ListenerId) -> ApiResponse<bool> {
        ApiResponse::ok(self.jobs.unsubscribe_one(job_id, id))
    }

    pub fn job_updates(&self) -> broadcast::Receiver<PublishJob> {
        self.jobs.subscribe_all()
    }

    // Change notifications

    pub fn on_cache_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.cache.on_change(listener)
    }

    pub fn off_cache_change(&self, id: ListenerId) -> bool {
        self.cache.off_change(id)
    }

    pub fn cache_events(&self) -> broadcast::Receiver<CacheEvent> {
        self.cache.subscribe()
    }

    // Polling

    /// Refreshes all blogs every `pollIntervalSecs`.
    pub fn start_polling(&self) -> ApiResponse<bool> {
        self.start_polling_every(Duration::from_secs(self.settings.poll_interval_secs))
    }

    pub fn start_polling_every(&self, interval: Duration) -> ApiResponse<bool> {
        self.cache.start_polling(interval).into()
    }

    pub fn stop_polling(&self) -> bool {
        self.cache.stop_polling()
    }
}

impl Drop for SyncContext {
    fn drop(&mut self) {
        self.cache.stop_polling();
    }
}
