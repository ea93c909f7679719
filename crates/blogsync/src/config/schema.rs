use serde::{Deserialize, Serialize};

use crate::secrets::TokenSource;

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_PAGES_API_URL: &str = "https://api.cloudflare.com/client/v4";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub blogs: Vec<BlogConfig>,
    #[serde(default)]
    pub sync: SyncSettings,
}

/// One configured blog backed by a remote content repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlogConfig {
    pub id: String,
    pub name: String,
    /// Repository identifier in `owner/name` form.
    pub repository: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Directory inside the repository that holds the posts.
    #[serde(default = "default_content_dir")]
    pub content_dir: String,
    /// Template for new post filenames. Supports `$slug`, `$y`, `$m` and `$d`.
    #[serde(default = "default_filename_template")]
    pub filename_template: String,
    /// Public base URL of the deployed site, e.g. `https://example.com`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_url: Option<String>,
    /// URL path under which published posts are served.
    #[serde(default = "default_live_post_path")]
    pub live_post_path: String,
    /// File extensions (without the dot) recognized as posts.
    #[serde(default = "default_post_extensions")]
    pub post_extensions: Vec<String>,
    #[serde(default)]
    pub token: TokenSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentConfig>,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_content_dir() -> String {
    "src/content/blog".to_string()
}

fn default_filename_template() -> String {
    "$slug.md".to_string()
}

fn default_live_post_path() -> String {
    "/blog/".to_string()
}

fn default_post_extensions() -> Vec<String> {
    vec!["md".to_string(), "mdx".to_string()]
}

impl BlogConfig {
    /// Creates a blog config with defaults for everything but the identity fields.
    pub fn new(id: &str, name: &str, repository: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            repository: repository.to_string(),
            branch: default_branch(),
            content_dir: default_content_dir(),
            filename_template: default_filename_template(),
            site_url: None,
            live_post_path: default_live_post_path(),
            post_extensions: default_post_extensions(),
            token: TokenSource::default(),
            deployment: None,
        }
    }

    /// Content directory without leading or trailing slashes.
    pub fn content_root(&self) -> &str {
        self.content_dir.trim_matches('/')
    }

    /// Returns true if `path` has one of the recognized post extensions.
    pub fn is_post_file(&self, path: &str) -> bool {
        let Some((_, ext)) = path.rsplit_once('.') else {
            return false;
        };
        self.post_extensions
            .iter()
            .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }

    pub fn has_deployment(&self) -> bool {
        self.deployment.is_some()
    }
}

/// Hosting platform project that builds and deploys the blog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfig {
    pub account_id: String,
    pub project: String,
    #[serde(default)]
    pub token: TokenSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    /// Background refresh interval for all blogs.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_deploy_poll_interval_ms")]
    pub deploy_poll_interval_ms: u64,
    #[serde(default = "default_deploy_timeout_secs")]
    pub deploy_timeout_secs: u64,
    /// How long finished jobs without subscribers are kept before eviction.
    #[serde(default = "default_job_retention_secs")]
    pub job_retention_secs: u64,
    #[serde(default = "default_github_api_url")]
    pub github_api_url: String,
    #[serde(default = "default_pages_api_url")]
    pub pages_api_url: String,
}

fn default_poll_interval_secs() -> u64 {
    300
}

fn default_deploy_poll_interval_ms() -> u64 {
    3000
}

fn default_deploy_timeout_secs() -> u64 {
    600
}

fn default_job_retention_secs() -> u64 {
    600
}

fn default_github_api_url() -> String {
    DEFAULT_GITHUB_API_URL.to_string()
}

fn default_pages_api_url() -> String {
    DEFAULT_PAGES_API_URL.to_string()
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            deploy_poll_interval_ms: default_deploy_poll_interval_ms(),
            deploy_timeout_secs: default_deploy_timeout_secs(),
            job_retention_secs: default_job_retention_secs(),
            github_api_url: default_github_api_url(),
            pages_api_url: default_pages_api_url(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blog_defaults() {
        let blog: BlogConfig = serde_json::from_str(
            r#"{"id": "main", "name": "Main", "repository": "me/site"}"#,
        )
        .unwrap();
        assert_eq!(blog.branch, "main");
        assert_eq!(blog.content_dir, "src/content/blog");
        assert_eq!(blog.filename_template, "$slug.md");
        assert_eq!(blog.live_post_path, "/blog/");
        assert!(blog.deployment.is_none());
    }

    #[test]
    fn test_is_post_file() {
        let blog = BlogConfig::new("b", "B", "o/r");
        assert!(blog.is_post_file("src/content/blog/hello.md"));
        assert!(blog.is_post_file("src/content/blog/hello.MDX"));
        assert!(!blog.is_post_file("src/content/blog/image.png"));
        assert!(!blog.is_post_file("README"));
    }

    #[test]
    fn test_content_root_trims_slashes() {
        let mut blog = BlogConfig::new("b", "B", "o/r");
        blog.content_dir = "/posts/".to_string();
        assert_eq!(blog.content_root(), "posts");
    }

    #[test]
    fn test_sync_settings_defaults() {
        let settings = SyncSettings::default();
        assert_eq!(settings.poll_interval_secs, 300);
        assert_eq!(settings.github_api_url, DEFAULT_GITHUB_API_URL);
    }
}
