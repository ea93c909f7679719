//! GitHub REST API implementation of [`RepositoryClient`].
//!
//! File reads and SHA-guarded writes use the contents API. Renames go through
//! the Git Data API (tree → commit → non-forced ref update) so the move lands
//! as a single commit or not at all.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::{debug, info};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{EntryKind, FileContent, RepoEntry, RepositoryClient, WriteOutcome};
use crate::error::{ConfigError, Result, SyncError};
use crate::sanitize::redact_url;

/// Default connect timeout for HTTP requests (10 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default request timeout for HTTP requests (30 seconds).
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!("blogsync/", env!("CARGO_PKG_VERSION"));

const API_VERSION: &str = "2022-11-28";

/// Creates an HTTP client with appropriate timeouts.
pub(crate) fn create_http_client() -> std::result::Result<Client, ConfigError> {
    Client::builder()
        .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
        .timeout(DEFAULT_REQUEST_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| ConfigError::HttpClient(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct ContentsEntry {
    name: String,
    path: String,
    sha: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct ContentsFile {
    sha: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Serialize)]
struct PutContentsRequest<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct DeleteContentsRequest<'a> {
    message: &'a str,
    sha: &'a str,
    branch: &'a str,
}

#[derive(Debug, Deserialize)]
struct ShaRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PutContentsResponse {
    content: ShaRef,
    commit: ShaRef,
}

#[derive(Debug, Deserialize)]
struct GitRefResponse {
    object: ShaRef,
}

#[derive(Debug, Deserialize)]
struct GitCommitResponse {
    tree: ShaRef,
}

#[derive(Debug, Serialize)]
struct TreeEntry<'a> {
    path: &'a str,
    mode: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    sha: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct CreateTreeRequest<'a> {
    base_tree: &'a str,
    tree: Vec<TreeEntry<'a>>,
}

#[derive(Debug, Serialize)]
struct CreateCommitRequest<'a> {
    message: &'a str,
    tree: &'a str,
    parents: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
struct UpdateRefRequest<'a> {
    sha: &'a str,
    force: bool,
}

/// Thin, stateless client for one GitHub account's token.
pub struct GitHubClient {
    client: Client,
    api_url: String,
    token: Option<SecretString>,
}

impl GitHubClient {
    pub fn new(
        api_url: &str,
        token: Option<SecretString>,
    ) -> std::result::Result<Self, ConfigError> {
        Url::parse(api_url).map_err(|e| ConfigError::Validation {
            message: format!("Invalid GitHub API URL '{}': {}", redact_url(api_url), e),
        })?;
        debug!(
            "GitHub client for {} ({})",
            redact_url(api_url),
            if token.is_some() { "authenticated" } else { "anonymous" }
        );

        Ok(Self {
            client: create_http_client()?,
            api_url: api_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Builds `{api}/repos/{owner}/{name}/{segments...}` with each segment percent-encoded.
    fn repo_url<'a>(
        &self,
        repo: &str,
        segments: impl IntoIterator<Item = &'a str>,
    ) -> Result<Url> {
        let mut url = Url::parse(&self.api_url)
            .map_err(|e| SyncError::InvalidRequest(format!("Invalid API URL: {}", e)))?;
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| SyncError::InvalidRequest("API URL cannot be a base".to_string()))?;
            path.pop_if_empty().push("repos");
            path.extend(repo.split('/').filter(|s| !s.is_empty()));
            path.extend(segments.into_iter().filter(|s| !s.is_empty()));
        }
        Ok(url)
    }

    fn contents_url(&self, repo: &str, path: &str) -> Result<Url> {
        self.repo_url(repo, std::iter::once("contents").chain(path.split('/')))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION);
        match &self.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    async fn check(response: Response, context: &str, path: &str) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(SyncError::from_status(status, &body, context, path))
    }

    async fn head_commit(&self, repo: &str, branch: &str) -> Result<String> {
        let url = self.repo_url(
            repo,
            ["git", "ref", "heads"].into_iter().chain(branch.split('/')),
        )?;
        let response = self.authorize(self.client.get(url)).send().await?;
        let response = Self::check(response, "read branch head", "").await?;
        let reference: GitRefResponse = response.json().await?;
        Ok(reference.object.sha)
    }
}

fn decode_content(file: &ContentsFile, path: &str) -> Result<String> {
    if let Some(encoding) = &file.encoding {
        if encoding != "base64" {
            return Err(SyncError::Parse(format!(
                "Unsupported encoding '{}' for {}",
                encoding, path
            )));
        }
    }

    let compact: String = file.content.split_whitespace().collect();
    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| SyncError::Parse(format!("Invalid base64 content for {}: {}", path, e)))?;
    String::from_utf8(bytes)
        .map_err(|e| SyncError::Parse(format!("Content of {} is not UTF-8: {}", path, e)))
}

#[async_trait]
impl RepositoryClient for GitHubClient {
    async fn list_directory(&self, repo: &str, path: &str, branch: &str) -> Result<Vec<RepoEntry>> {
        let mut url = self.contents_url(repo, path)?;
        url.query_pairs_mut().append_pair("ref", branch);

        debug!("Listing {}:{} on {}", repo, path, branch);
        let response = self.authorize(self.client.get(url)).send().await?;
        let response = Self::check(response, "list posts", path).await?;

        let value: serde_json::Value = response.json().await?;
        if !value.is_array() {
            return Err(SyncError::InvalidRequest(format!(
                "'{}' is a file, not a directory",
                path
            )));
        }
        let entries: Vec<ContentsEntry> =
            serde_json::from_value(value).map_err(|e| SyncError::Parse(e.to_string()))?;

        Ok(entries
            .into_iter()
            .filter_map(|entry| {
                let kind = match entry.kind.as_str() {
                    "file" => EntryKind::File,
                    "dir" => EntryKind::Dir,
                    _ => return None,
                };
                Some(RepoEntry {
                    name: entry.name,
                    path: entry.path,
                    content_hash: entry.sha,
                    kind,
                })
            })
            .collect())
    }

    async fn get_file_content(
        &self,
        repo: &str,
        path: &str,
        branch: &str,
    ) -> Result<Option<FileContent>> {
        let mut url = self.contents_url(repo, path)?;
        url.query_pairs_mut().append_pair("ref", branch);

        let response = self.authorize(self.client.get(url)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check(response, "fetch post", path).await?;

        let value: serde_json::Value = response.json().await?;
        if value.is_array() {
            return Err(SyncError::InvalidRequest(format!(
                "'{}' is a directory, not a file",
                path
            )));
        }
        let file: ContentsFile =
            serde_json::from_value(value).map_err(|e| SyncError::Parse(e.to_string()))?;

        Ok(Some(FileContent {
            content: decode_content(&file, path)?,
            content_hash: file.sha,
        }))
    }

    async fn create_or_update_file(
        &self,
        repo: &str,
        path: &str,
        content: &str,
        commit_message: &str,
        branch: &str,
        expected_hash: Option<&str>,
    ) -> Result<WriteOutcome> {
        let url = self.contents_url(repo, path)?;
        let body = PutContentsRequest {
            message: commit_message,
            content: STANDARD.encode(content.as_bytes()),
            branch,
            sha: expected_hash,
        };

        let context = if expected_hash.is_some() {
            "update file"
        } else {
            "create file"
        };
        let response = self
            .authorize(self.client.put(url))
            .json(&body)
            .send()
            .await?;

        // Creating over an existing file without a sha is a conflict, not a bad request.
        if expected_hash.is_none() && response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Conflict {
                path: path.to_string(),
                message: format!("file already exists: {}", crate::sanitize::truncate_body(&body)),
            });
        }
        let response = Self::check(response, context, path).await?;
        let written: PutContentsResponse = response.json().await?;

        info!("Wrote {} on {}@{}", path, repo, branch);
        Ok(WriteOutcome {
            content_hash: written.content.sha,
            commit_hash: Some(written.commit.sha),
        })
    }

    async fn delete_file(
        &self,
        repo: &str,
        path: &str,
        commit_message: &str,
        branch: &str,
        expected_hash: &str,
    ) -> Result<()> {
        let url = self.contents_url(repo, path)?;
        let body = DeleteContentsRequest {
            message: commit_message,
            sha: expected_hash,
            branch,
        };

        let response = self
            .authorize(self.client.delete(url))
            .json(&body)
            .send()
            .await?;
        Self::check(response, "delete file", path).await?;

        info!("Deleted {} on {}@{}", path, repo, branch);
        Ok(())
    }

    async fn rename_file(
        &self,
        repo: &str,
        old_path: &str,
        new_path: &str,
        branch: &str,
        expected_hash: &str,
    ) -> Result<WriteOutcome> {
        // Hash check, collision check and base tree all read the same commit.
        let head = self.head_commit(repo, branch).await?;

        let current = self
            .get_file_content(repo, old_path, &head)
            .await?
            .ok_or_else(|| SyncError::Conflict {
                path: old_path.to_string(),
                message: "file no longer exists on the remote".to_string(),
            })?;
        if current.content_hash != expected_hash {
            return Err(SyncError::Conflict {
                path: old_path.to_string(),
                message: format!(
                    "expected version {}, remote has {}",
                    expected_hash, current.content_hash
                ),
            });
        }
        if self.get_file_content(repo, new_path, &head).await?.is_some() {
            return Err(SyncError::InvalidRequest(format!(
                "A file already exists at '{}'",
                new_path
            )));
        }

        let commit_url = self.repo_url(repo, ["git", "commits", head.as_str()])?;
        let response = self.authorize(self.client.get(commit_url)).send().await?;
        let response = Self::check(response, "read head commit", old_path).await?;
        let head_commit: GitCommitResponse = response.json().await?;

        let tree_request = CreateTreeRequest {
            base_tree: &head_commit.tree.sha,
            tree: vec![
                TreeEntry {
                    path: old_path,
                    mode: "100644",
                    kind: "blob",
                    sha: None,
                },
                TreeEntry {
                    path: new_path,
                    mode: "100644",
                    kind: "blob",
                    sha: Some(&current.content_hash),
                },
            ],
        };
        let response = self
            .authorize(self.client.post(self.repo_url(repo, ["git", "trees"])?))
            .json(&tree_request)
            .send()
            .await?;
        let response = Self::check(response, "create rename tree", old_path).await?;
        let tree: ShaRef = response.json().await?;

        let message = format!(
            "Rename {} to {}",
            crate::config::template::file_name(old_path),
            crate::config::template::file_name(new_path)
        );
        let commit_request = CreateCommitRequest {
            message: &message,
            tree: &tree.sha,
            parents: vec![head.as_str()],
        };
        let response = self
            .authorize(self.client.post(self.repo_url(repo, ["git", "commits"])?))
            .json(&commit_request)
            .send()
            .await?;
        let response = Self::check(response, "create rename commit", old_path).await?;
        let commit: ShaRef = response.json().await?;

        let ref_url = self.repo_url(
            repo,
            ["git", "refs", "heads"].into_iter().chain(branch.split('/')),
        )?;
        let response = self
            .authorize(self.client.patch(ref_url))
            .json(&UpdateRefRequest {
                sha: &commit.sha,
                force: false,
            })
            .send()
            .await?;
        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            // Branch moved since we read the head; the dangling commit is unreachable.
            return Err(SyncError::Conflict {
                path: old_path.to_string(),
                message: "branch changed while renaming".to_string(),
            });
        }
        Self::check(response, "move branch", old_path).await?;

        info!("Renamed {} -> {} on {}@{}", old_path, new_path, repo, branch);
        Ok(WriteOutcome {
            content_hash: current.content_hash,
            commit_hash: Some(commit.sha),
        })
    }

    async fn latest_commit_hash(&self, repo: &str, branch: &str) -> Result<String> {
        self.head_commit(repo, branch).await
    }
}
