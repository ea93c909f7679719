pub mod api;
pub mod cache;
pub mod config;
pub mod context;
pub mod deploy;
pub mod drafts;
pub mod error;
pub mod listeners;
pub mod publish;
pub mod repository;
pub mod sanitize;
pub mod secrets;
pub mod tags;
pub mod telemetry;

pub use api::ApiResponse;
pub use cache::{CacheEvent, ContentCache, RefreshAllReport, RefreshSummary, RemoteTreeNode};
pub use config::{load_config, AppConfig, BlogConfig, DeploymentConfig, SyncSettings};
pub use context::{PostContent, SyncContext};
pub use deploy::{Deployment, DeploymentOutcome, DeploymentTracker, HostingApi, PagesClient, WaitOptions};
pub use drafts::{Draft, DraftOverlay};
pub use error::{ConfigError, ErrorKind, Result, SyncError};
pub use publish::{JobStatus, JobStore, PostSource, PublishCoordinator, PublishJob, PublishJobKind};
pub use repository::{GitHubClient, InMemoryRepository, RepositoryClient};
pub use secrets::{resolve_secret, SecretError, TokenSource};
pub use tags::{StaticTagIndex, TagIndex};
pub use telemetry::init_tracing;
