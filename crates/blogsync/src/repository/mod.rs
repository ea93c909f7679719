//! Remote content repository boundary.
//!
//! Every write takes an optional expected content hash; a mismatch against the
//! remote's current hash fails with [`SyncError::Conflict`](crate::SyncError::Conflict)
//! instead of overwriting.

pub mod github;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use github::GitHubClient;
pub use memory::InMemoryRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoEntry {
    pub name: String,
    pub path: String,
    pub content_hash: String,
    pub kind: EntryKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileContent {
    pub content: String,
    pub content_hash: String,
}

/// Result of an acknowledged remote write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteOutcome {
    pub content_hash: String,
    /// Commit created by the write, when the backend reports it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
}

#[async_trait]
pub trait RepositoryClient: Send + Sync {
    /// Lists the direct children of `path`.
    async fn list_directory(&self, repo: &str, path: &str, branch: &str) -> Result<Vec<RepoEntry>>;

    /// Fetches a file. Returns `None` if it does not exist.
    async fn get_file_content(
        &self,
        repo: &str,
        path: &str,
        branch: &str,
    ) -> Result<Option<FileContent>>;

    /// Creates a file (`expected_hash == None`) or updates it when the remote hash matches.
    async fn create_or_update_file(
        &self,
        repo: &str,
        path: &str,
        content: &str,
        commit_message: &str,
        branch: &str,
        expected_hash: Option<&str>,
    ) -> Result<WriteOutcome>;

    async fn delete_file(
        &self,
        repo: &str,
        path: &str,
        commit_message: &str,
        branch: &str,
        expected_hash: &str,
    ) -> Result<()>;

    /// Moves a file in a single commit. Either the old path is gone and the new path
    /// exists, or nothing changed.
    async fn rename_file(
        &self,
        repo: &str,
        old_path: &str,
        new_path: &str,
        branch: &str,
        expected_hash: &str,
    ) -> Result<WriteOutcome>;

    async fn latest_commit_hash(&self, repo: &str, branch: &str) -> Result<String>;
}
