//! Builders for test configurations and hosting platform data.

#![allow(dead_code)]

use blogsync::config::{BlogConfig, DeploymentConfig, SyncSettings};
use blogsync::deploy::{Deployment, DeploymentTrigger, Stage, StageStatus, TriggerMetadata};

/// Builder for `BlogConfig` instances.
pub struct BlogConfigBuilder {
    config: BlogConfig,
}

impl BlogConfigBuilder {
    /// A blog at `me/site` with the default content layout.
    pub fn new(id: &str) -> Self {
        let mut config = BlogConfig::new(id, "Test Blog", "me/site");
        config.site_url = Some("https://blog.test".to_string());
        Self { config }
    }

    pub fn repository(mut self, repository: &str) -> Self {
        self.config.repository = repository.to_string();
        self
    }

    pub fn content_dir(mut self, dir: &str) -> Self {
        self.config.content_dir = dir.to_string();
        self
    }

    pub fn filename_template(mut self, template: &str) -> Self {
        self.config.filename_template = template.to_string();
        self
    }

    pub fn live_post_path(mut self, path: &str) -> Self {
        self.config.live_post_path = path.to_string();
        self
    }

    /// Enables deployment tracking with fast polling.
    pub fn deployment(mut self, project: &str) -> Self {
        self.config.deployment = Some(DeploymentConfig {
            account_id: "account".to_string(),
            project: project.to_string(),
            token: Default::default(),
            poll_interval_ms: Some(10),
            timeout_secs: Some(5),
        });
        self
    }

    pub fn build(self) -> BlogConfig {
        self.config
    }
}

/// Shorthand for a blog config with defaults.
pub fn blog_config(id: &str) -> BlogConfig {
    BlogConfigBuilder::new(id).build()
}

/// Settings with timings short enough for tests.
pub fn fast_settings() -> SyncSettings {
    SyncSettings {
        deploy_poll_interval_ms: 10,
        deploy_timeout_secs: 5,
        ..SyncSettings::default()
    }
}

pub fn deployment(id: &str, stage: &str, status: StageStatus, commit: &str) -> Deployment {
    Deployment {
        id: id.to_string(),
        project_name: Some("site".to_string()),
        url: Some(format!("https://{}.site.pages.dev", id)),
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
