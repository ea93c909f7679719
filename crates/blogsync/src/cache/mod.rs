//! Local mirror of each blog's remote post list with lazily loaded bodies.

pub mod tree;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::config::template::file_name;
use crate::config::BlogConfig;
use crate::drafts::DraftOverlay;
use crate::error::{Result, SyncError};
use crate::listeners::{ListenerId, ListenerRegistry};
use crate::repository::{EntryKind, FileContent, RepoEntry, RepositoryClient};

pub use tree::{build_tree, NodeKind, RemoteTreeNode};

/// Sub-directory depth scanned below a blog's content directory.
const MAX_LISTING_DEPTH: usize = 4;

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedPost {
    pub path: String,
    pub name: String,
    /// Empty until loaded.
    pub body: String,
    pub content_hash: String,
    /// Unix milliseconds of the last body fetch; 0 when not loaded.
    pub last_fetched: i64,
    pub blog_id: String,
}

impl CachedPost {
    pub(crate) fn unloaded(blog_id: &str, path: &str, content_hash: &str) -> Self {
        Self {
            path: path.to_string(),
            name: file_name(path).to_string(),
            body: String::new(),
            content_hash: content_hash.to_string(),
            last_fetched: 0,
            blog_id: blog_id.to_string(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.last_fetched > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlogCacheEntry {
    pub blog_id: String,
    pub name: String,
    pub repository: String,
    pub branch: String,
    pub content_dir: String,
    pub posts: HashMap<String, CachedPost>,
    /// Unix milliseconds of the last successful refresh; 0 when never refreshed.
    pub last_refreshed: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl BlogCacheEntry {
    fn new(config: &BlogConfig) -> Self {
        Self {
            blog_id: config.id.clone(),
            name: config.name.clone(),
            repository: config.repository.clone(),
            branch: config.branch.clone(),
            content_dir: config.content_root().to_string(),
            posts: HashMap::new(),
            last_refreshed: 0,
            last_error: None,
        }
    }

    /// Posts sorted by path.
    pub fn sorted_posts(&self) -> Vec<&CachedPost> {
        let mut posts: Vec<&CachedPost> = self.posts.values().collect();
        posts.sort_by(|a, b| a.path.cmp(&b.path));
        posts
    }
}

/// Changes between two listings of a blog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSummary {
    pub added: usize,
    pub removed: usize,
    pub changed: usize,
    pub unchanged: usize,
}

impl RefreshSummary {
    pub fn has_changes(&self) -> bool {
        self.added + self.removed + self.changed > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlogRefreshFailure {
    pub blog_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshAllReport {
    pub refreshed: Vec<String>,
    pub failed: Vec<BlogRefreshFailure>,
}

/// Structural change to the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CacheEvent {
    #[serde(rename_all = "camelCase")]
    Registered { blog_id: String },
    #[serde(rename_all = "camelCase")]
    Deregistered { blog_id: String },
    #[serde(rename_all = "camelCase")]
    Refreshed {
        blog_id: String,
        summary: RefreshSummary,
    },
    #[serde(rename_all = "camelCase")]
    PostUpdated { blog_id: String, path: String },
    #[serde(rename_all = "camelCase")]
    PostRemoved { blog_id: String, path: String },
    #[serde(rename_all = "camelCase")]
    PostRenamed {
        blog_id: String,
        old_path: String,
        new_path: String,
    },
}

impl CacheEvent {
    pub fn blog_id(&self) -> &str {
        match self {
            CacheEvent::Registered { blog_id }
            | CacheEvent::Deregistered { blog_id }
            | CacheEvent::Refreshed { blog_id, .. }
            | CacheEvent::PostUpdated { blog_id, .. }
            | CacheEvent::PostRemoved { blog_id, .. }
            | CacheEvent::PostRenamed { blog_id, .. } => blog_id,
        }
    }
}

struct BlogState {
    entry: BlogCacheEntry,
    config: Arc<BlogConfig>,
    client: Arc<dyn RepositoryClient>,
    /// Serializes refreshes of this blog.
    refresh_lock: Arc<tokio::sync::Mutex<()>>,
    /// Changes on every register, so work started against an older registration is dropped.
    generation: u64,
}

/// Per-blog cache of remote posts.
///
/// Refreshes of the same blog run one at a time; refreshes of different blogs
/// run concurrently. Locks are never held across a network call.
pub struct ContentCache {
    blogs: RwLock<HashMap<String, BlogState>>,
    next_generation: AtomicU64,
    listeners: ListenerRegistry<CacheEvent>,
    sender: broadcast::Sender<CacheEvent>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl Default for ContentCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentCache {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            blogs: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            listeners: ListenerRegistry::new(),
            sender,
            poller: Mutex::new(None),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, BlogState>> {
        match self.blogs.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Content cache lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, BlogState>> {
        match self.blogs.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Content cache lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn poller(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        match self.poller.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn emit(&self, event: CacheEvent) {
        self.listeners.emit(&event);
        // No receivers is fine.
        let _ = self.sender.send(event);
    }

    /// Adds a blog, replacing any existing entry with the same id.
    pub fn register(&self, config: BlogConfig, client: Arc<dyn RepositoryClient>) {
        let blog_id = config.id.clone();
        let state = BlogState {
            entry: BlogCacheEntry::new(&config),
            config: Arc::new(config),
            client,
            refresh_lock: Arc::new(tokio::sync::Mutex::new(())),
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
        };

        if self.write().insert(blog_id.clone(), state).is_some() {
            info!("Replaced cache entry for blog {}", blog_id);
        } else {
            info!("Registered blog {}", blog_id);
        }
        self.emit(CacheEvent::Registered { blog_id });
    }

    pub fn deregister(&self, blog_id: &str) -> bool {
        let removed = self.write().remove(blog_id).is_some();
        if removed {
            info!("Deregistered blog {}", blog_id);
            self.emit(CacheEvent::Deregistered {
                blog_id: blog_id.to_string(),
            });
        }
        removed
    }

    pub fn contains(&self, blog_id: &str) -> bool {
        self.read().contains_key(blog_id)
    }

    /// Registered blog ids, sorted.
    pub fn blog_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn config(&self, blog_id: &str) -> Option<Arc<BlogConfig>> {
        self.read().get(blog_id).map(|s| Arc::clone(&s.config))
    }

    pub fn client(&self, blog_id: &str) -> Option<Arc<dyn RepositoryClient>> {
        self.read().get(blog_id).map(|s| Arc::clone(&s.client))
    }

    pub fn snapshot(&self, blog_id: &str) -> Option<BlogCacheEntry> {
        self.read().get(blog_id).map(|s| s.entry.clone())
    }

    /// Entries of all blogs, sorted by blog id.
    pub fn snapshots(&self) -> Vec<BlogCacheEntry> {
        let mut entries: Vec<BlogCacheEntry> =
            self.read().values().map(|s| s.entry.clone()).collect();
        entries.sort_by(|a, b| a.blog_id.cmp(&b.blog_id));
        entries
    }

    /// Folder view of every blog's cached posts, flagging drafts when an overlay is given.
    pub fn tree(&self, drafts: Option<&DraftOverlay>) -> Vec<RemoteTreeNode> {
        build_tree(&self.snapshots(), drafts)
    }

    pub fn post(&self, blog_id: &str, path: &str) -> Option<CachedPost> {
        self.read()
            .get(blog_id)
            .and_then(|s| s.entry.posts.get(path).cloned())
    }

    /// Reloads a blog's post list from the remote.
    ///
    /// Posts whose hash is unchanged keep their loaded body; new or changed posts
    /// are stored unloaded. On failure the error is recorded on the entry, the
    /// existing posts stay in place and the error is returned.
    pub async fn refresh(&self, blog_id: &str) -> Result<RefreshSummary> {
        let span = tracing::info_span!("refresh", blog_id = %blog_id);
        self.refresh_inner(blog_id).instrument(span).await
    }

    async fn refresh_inner(&self, blog_id: &str) -> Result<RefreshSummary> {
        let (config, client, refresh_lock, generation) = {
            let blogs = self.read();
            let state = blogs
                .get(blog_id)
                .ok_or_else(|| SyncError::BlogNotFound(blog_id.to_string()))?;
            (
                Arc::clone(&state.config),
                Arc::clone(&state.client),
                Arc::clone(&state.refresh_lock),
                state.generation,
            )
        };

        let _serialized = refresh_lock.lock().await;
        let listing = list_posts(client.as_ref(), &config).await;

        let summary = {
            let mut blogs = self.write();
            let state = match blogs.get_mut(blog_id) {
                Some(state) if state.generation == generation => state,
                _ => {
                    debug!("Blog {} was re-registered during refresh, dropping result", blog_id);
                    return Err(listing
                        .err()
                        .unwrap_or_else(|| SyncError::BlogNotFound(blog_id.to_string())));
                }
            };

            let files = match listing {
                Ok(files) => files,
                Err(e) => {
                    warn!("Refresh of blog {} failed: {}", blog_id, e);
                    state.entry.last_error = Some(e.to_string());
                    return Err(e);
                }
            };

            let summary = reconcile(&mut state.entry, files);
            state.entry.last_refreshed = Utc::now().timestamp_millis();
            state.entry.last_error = None;
            summary
        };

        debug!(
            "Refreshed blog {}: {} added, {} removed, {} changed, {} unchanged",
            blog_id, summary.added, summary.removed, summary.changed, summary.unchanged
        );
        self.emit(CacheEvent::Refreshed {
            blog_id: blog_id.to_string(),
            summary,
        });
        Ok(summary)
    }

    /// Refreshes every blog concurrently. Failures are logged and reported, never raised.
    pub async fn refresh_all(&self) -> RefreshAllReport {
        let ids = self.blog_ids();
        let results = join_all(ids.iter().map(|id| self.refresh(id))).await;

        let mut report = RefreshAllReport::default();
        for (blog_id, result) in ids.into_iter().zip(results) {
            match result {
                Ok(_) => report.refreshed.push(blog_id),
                Err(e) => {
                    warn!("Background refresh of blog {} failed: {}", blog_id, e);
                    report.failed.push(BlogRefreshFailure {
                        blog_id,
                        error: e.to_string(),
                    });
                }
            }
        }
        report
    }

    /// Body and hash of a post, fetched from the remote on first access.
    ///
    /// Unknown blogs and paths fail without a remote call. A fetch that raced a
    /// local write is not stored; the newer cached body is returned instead.
    pub async fn get_content(&self, blog_id: &str, path: &str) -> Result<FileContent> {
        let (config, client, generation, listed_hash) = {
            let blogs = self.read();
            let state = blogs
                .get(blog_id)
                .ok_or_else(|| SyncError::BlogNotFound(blog_id.to_string()))?;
            let post = state.entry.posts.get(path).ok_or_else(|| SyncError::PostNotFound {
                blog_id: blog_id.to_string(),
                path: path.to_string(),
            })?;
            if post.is_loaded() {
                return Ok(FileContent {
                    content: post.body.clone(),
                    content_hash: post.content_hash.clone(),
                });
            }
            (
                Arc::clone(&state.config),
                Arc::clone(&state.client),
                state.generation,
                post.content_hash.clone(),
            )
        };

        let fetched = client
            .get_file_content(&config.repository, path, &config.branch)
            .await?
            .ok_or_else(|| SyncError::PostNotFound {
                blog_id: blog_id.to_string(),
                path: path.to_string(),
            })?;

        let mut blogs = self.write();
        let Some(post) = blogs
            .get_mut(blog_id)
            .filter(|state| state.generation == generation)
            .and_then(|state| state.entry.posts.get_mut(path))
        else {
            return Ok(fetched);
        };

        if post.is_loaded() && post.content_hash != listed_hash {
            debug!("Post {} was written during fetch, keeping cached body", path);
            return Ok(FileContent {
                content: post.body.clone(),
                content_hash: post.content_hash.clone(),
            });
        }
        if post.content_hash == listed_hash || post.content_hash == fetched.content_hash {
            post.body = fetched.content.clone();
            post.content_hash = fetched.content_hash.clone();
            post.last_fetched = Utc::now().timestamp_millis();
        }
        Ok(fetched)
    }

    /// Records a successful remote write.
    ///
    /// Without `new_body` the post is marked unloaded so the next read fetches it.
    pub fn update_after_write(
        &self,
        blog_id: &str,
        path: &str,
        new_hash: &str,
        new_body: Option<&str>,
    ) -> Result<()> {
        {
            let mut blogs = self.write();
            let state = blogs
                .get_mut(blog_id)
                .ok_or_else(|| SyncError::BlogNotFound(blog_id.to_string()))?;
            let post = state
                .entry
                .posts
                .entry(path.to_string())
                .or_insert_with(|| CachedPost::unloaded(blog_id, path, new_hash));

            post.content_hash = new_hash.to_string();
            match new_body {
                Some(body) => {
                    post.body = body.to_string();
                    post.last_fetched = Utc::now().timestamp_millis();
                }
                None => {
                    post.body.clear();
                    post.last_fetched = 0;
                }
            }
        }

        self.emit(CacheEvent::PostUpdated {
            blog_id: blog_id.to_string(),
            path: path.to_string(),
        });
        Ok(())
    }

    pub fn remove_post(&self, blog_id: &str, path: &str) -> bool {
        let removed = self
            .write()
            .get_mut(blog_id)
            .map(|s| s.entry.posts.remove(path).is_some())
            .unwrap_or(false);

        if removed {
            self.emit(CacheEvent::PostRemoved {
                blog_id: blog_id.to_string(),
                path: path.to_string(),
            });
        }
        removed
    }

    /// Moves a post to `new_path`, keeping a loaded body.
    pub fn rename_post(
        &self,
        blog_id: &str,
        old_path: &str,
        new_path: &str,
        new_hash: &str,
    ) -> Result<()> {
        {
            let mut blogs = self.write();
            let state = blogs
                .get_mut(blog_id)
                .ok_or_else(|| SyncError::BlogNotFound(blog_id.to_string()))?;

            let mut post = state
                .entry
                .posts
                .remove(old_path)
                .unwrap_or_else(|| CachedPost::unloaded(blog_id, new_path, new_hash));
            if post.content_hash != new_hash {
                post.body.clear();
                post.last_fetched = 0;
            }
            post.path = new_path.to_string();
            post.name = file_name(new_path).to_string();
            post.content_hash = new_hash.to_string();
            state.entry.posts.insert(new_path.to_string(), post);
        }

        self.emit(CacheEvent::PostRenamed {
            blog_id: blog_id.to_string(),
            old_path: old_path.to_string(),
            new_path: new_path.to_string(),
        });
        Ok(())
    }

    /// Registers a change listener. A panicking listener is logged and skipped.
    pub fn on_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.listeners.add(listener)
    }

    pub fn off_change(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Channel receiving every change event emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.sender.subscribe()
    }

    /// Starts refreshing all blogs every `interval`.
    ///
    /// Returns `Ok(false)` if polling is already running. Must be called from
    /// within a Tokio runtime.
    pub fn start_polling(self: &Arc<Self>, interval: Duration) -> Result<bool> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| SyncError::NotInitialized("Tokio runtime"))?;
        if interval.is_zero() {
            return Err(SyncError::InvalidRequest(
                "Polling interval must be greater than zero".to_string(),
            ));
        }

        let mut poller = self.poller();
        if poller.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(false);
        }

        let cache = Arc::downgrade(self);
        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // skip immediate first tick

            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let report = cache.refresh_all().await;
                if !report.failed.is_empty() {
                    warn!(
                        "Background refresh: {} of {} blogs failed",
                        report.failed.len(),
                        report.failed.len() + report.refreshed.len()
                    );
                }
            }
            debug!("Content cache dropped, polling stopped");
        });

        info!("Started background refresh every {}s", interval.as_secs());
        *poller = Some(handle);
        Ok(true)
    }

    /// Stops background polling. Returns false if it was not running.
    pub fn stop_polling(&self) -> bool {
        match self.poller().take() {
            Some(handle) => {
                handle.abort();
                info!("Stopped background refresh");
                true
            }
            None => false,
        }
    }

    pub fn is_polling(&self) -> bool {
        self.poller().as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for ContentCache {
    fn drop(&mut self) {
        if let Some(handle) = self.poller().take() {
            handle.abort();
        }
    }
}

/// Lists post files below the blog's content directory.
async fn list_posts(client: &dyn RepositoryClient, config: &BlogConfig) -> Result<Vec<RepoEntry>> {
    let mut posts = Vec::new();
    let mut pending = VecDeque::from([(config.content_root().to_string(), 0usize)]);

    while let Some((dir, depth)) = pending.pop_front() {
        let entries = client
            .list_directory(&config.repository, &dir, &config.branch)
            .await?;
        for entry in entries {
            match entry.kind {
                EntryKind::File if config.is_post_file(&entry.path) => posts.push(entry),
                EntryKind::File => {}
                EntryKind::Dir if depth < MAX_LISTING_DEPTH => {
                    pending.push_back((entry.path, depth + 1))
                }
                EntryKind::Dir => debug!("Skipping {} below listing depth", entry.path),
            }
        }
    }
    Ok(posts)
}

fn reconcile(entry: &mut BlogCacheEntry, files: Vec<RepoEntry>) -> RefreshSummary {
    let mut summary = RefreshSummary::default();
    let mut previous = std::mem::take(&mut entry.posts);

    for file in files {
        let post = match previous.remove(&file.path) {
            Some(mut existing) if existing.content_hash == file.content_hash => {
                summary.unchanged += 1;
                existing.name = file.name;
                existing
            }
            Some(_) => {
                summary.changed += 1;
                CachedPost::unloaded(&entry.blog_id, &file.path, &file.content_hash)
            }
            None => {
                summary.added += 1;
                CachedPost::unloaded(&entry.blog_id, &file.path, &file.content_hash)
            }
        };
        entry.posts.insert(file.path, post);
    }

    summary.removed = previous.len();
    summary
}
