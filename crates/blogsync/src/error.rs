use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sanitize::truncate_body;
use crate::secrets::SecretError;

/// Errors raised by the sync and publish pipeline.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Blog not found: {0}")]
    BlogNotFound(String),

    #[error("Post not found: {blog_id}/{path}")]
    PostNotFound { blog_id: String, path: String },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("No content tagged '{0}'")]
    TagNotFound(String),

    #[error("Someone else changed '{path}' since it was loaded: {message}")]
    Conflict { path: String, message: String },

    #[error("{message}")]
    Http {
        status: u16,
        message: String,
        body: String,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Deployment tracking timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Deployment {id} failed at stage '{stage}'")]
    DeploymentFailed { id: String, stage: String },

    #[error("Deployment {0} was canceled")]
    DeploymentCanceled(String),

    #[error("No deployment found for commit {0}")]
    DeploymentNotFound(String),

    #[error("{0} is not initialized")]
    NotInitialized(&'static str),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to parse response: {0}")]
    Parse(String),
}

/// Coarse category of a [`SyncError`], used by the UI to pick a message style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Transport,
    Timeout,
    NotInitialized,
    Deployment,
    Invalid,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::BlogNotFound(_)
            | SyncError::PostNotFound { .. }
            | SyncError::JobNotFound(_)
            | SyncError::TagNotFound(_) => ErrorKind::NotFound,
            SyncError::Conflict { .. } => ErrorKind::Conflict,
            SyncError::Http { .. } | SyncError::Network(_) | SyncError::Parse(_) => {
                ErrorKind::Transport
            }
            SyncError::Timeout(_) => ErrorKind::Timeout,
            SyncError::DeploymentFailed { .. }
            | SyncError::DeploymentCanceled(_)
            | SyncError::DeploymentNotFound(_) => ErrorKind::Deployment,
            SyncError::NotInitialized(_) => ErrorKind::NotInitialized,
            SyncError::InvalidRequest(_) | SyncError::Config(_) => ErrorKind::Invalid,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, SyncError::Conflict { .. })
    }

    /// HTTP status code, when the error came from a non-success response.
    pub fn status(&self) -> Option<u16> {
        match self {
            SyncError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Builds an error from a non-success HTTP response.
    ///
    /// `context` names what was being attempted ("list posts", "update file") and
    /// `path` is the repository path involved, used for conflict reporting.
    pub fn from_status(status: u16, body: &str, context: &str, path: &str) -> Self {
        let body = truncate_body(body);

        if status == 409 || (status == 422 && body.to_lowercase().contains("sha")) {
            return SyncError::Conflict {
                path: path.to_string(),
                message: format!("{} rejected with status {}", context, status),
            };
        }

        let message = match status {
            401 => format!(
                "Failed to {}: invalid or expired access token (401). Update the token for this blog.",
                context
            ),
            403 => format!(
                "Failed to {}: access denied (403). The token lacks permission for this repository or the rate limit was hit.",
                context
            ),
            404 => format!(
                "Failed to {}: repository or branch not found (404). Check the repository name, branch and content directory.",
                context
            ),
            _ => format!("Failed to {} ({}): {}", context, status, body),
        };

        SyncError::Http {
            status,
            message,
            body,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SyncError::Parse(err.to_string())
        } else {
            SyncError::Network(err.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid blog '{id}': {reason}")]
    InvalidBlog { id: String, reason: String },

    #[error("Failed to resolve token: {0}")]
    Secret(#[from] SecretError),

    #[error("Failed to create HTTP client: {0}")]
    HttpClient(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_is_rewritten() {
        let err = SyncError::from_status(401, "Bad credentials", "list posts", "src/a.md");
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(err.status(), Some(401));
        assert!(err.to_string().contains("invalid or expired access token"));
    }

    #[test]
    fn test_not_found_is_rewritten() {
        let err = SyncError::from_status(404, "Not Found", "list posts", "src");
        assert!(err
            .to_string()
            .contains("repository or branch not found"));
    }

    #[test]
    fn test_conflict_statuses() {
        let err = SyncError::from_status(409, "", "update file", "posts/a.md");
        assert!(err.is_conflict());

        let err = SyncError::from_status(
            422,
            r#"{"message":"posts/a.md does not match sha"}"#,
            "update file",
            "posts/a.md",
        );
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err = SyncError::from_status(422, "Invalid request", "update file", "posts/a.md");
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[test]
    fn test_generic_status_keeps_body() {
        let err = SyncError::from_status(500, "boom", "get deployment", "");
        assert!(err.to_string().contains("500"));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_kinds() {
        assert_eq!(
            SyncError::BlogNotFound("x".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            SyncError::Timeout(Duration::from_secs(1)).kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            SyncError::NotInitialized("Publish coordinator").kind(),
            ErrorKind::NotInitialized
        );
    }
}
