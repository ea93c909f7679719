//! In-memory [`RepositoryClient`] that behaves like a single-branch remote.
//!
//! Used for offline development and as the simulated remote in tests. Content
//! hashes are derived from file contents, so rewriting identical content keeps
//! the hash, like git blob ids.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{EntryKind, FileContent, RepoEntry, RepositoryClient, WriteOutcome};
use crate::config::template::file_name;
use crate::error::{Result, SyncError};

#[derive(Debug, Default)]
struct RemoteState {
    files: BTreeMap<String, FileContent>,
    head: String,
    commits: u64,
    requests: usize,
    offline: bool,
}

impl RemoteState {
    fn commit(&mut self, message: &str) -> String {
        self.commits += 1;
        self.head = hex_hash(&(self.commits, message));
        self.head.clone()
    }

    fn check_online(&mut self) -> Result<()> {
        self.requests += 1;
        if self.offline {
            return Err(SyncError::Network("simulated remote is offline".to_string()));
        }
        Ok(())
    }
}

fn hex_hash<T: Hash>(value: &T) -> String {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Content hash the simulated remote assigns to `content`.
pub fn content_hash(content: &str) -> String {
    hex_hash(&content)
}

#[derive(Debug, Default)]
pub struct InMemoryRepository {
    state: Mutex<RemoteState>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files<I, P, C>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<String>,
    {
        let repo = Self::new();
        for (path, content) in files {
            repo.put_external(&path.into(), &content.into());
        }
        repo
    }

    fn lock(&self) -> MutexGuard<'_, RemoteState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Writes a file as another client would, bypassing hash checks. Returns the new hash.
    pub fn put_external(&self, path: &str, content: &str) -> String {
        let mut state = self.lock();
        let hash = content_hash(content);
        state.files.insert(
            path.trim_matches('/').to_string(),
            FileContent {
                content: content.to_string(),
                content_hash: hash.clone(),
            },
        );
        state.commit(path);
        hash
    }

    pub fn remove_external(&self, path: &str) -> bool {
        let mut state = self.lock();
        let removed = state.files.remove(path.trim_matches('/')).is_some();
        if removed {
            state.commit(path);
        }
        removed
    }

    /// Current remote state of a file, without counting as a request.
    pub fn file(&self, path: &str) -> Option<FileContent> {
        self.lock().files.get(path.trim_matches('/')).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        self.lock().files.keys().cloned().collect()
    }

    /// Number of client calls served so far.
    pub fn request_count(&self) -> usize {
        self.lock().requests
    }

    /// Makes every client call fail with a network error until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn head(&self) -> String {
        self.lock().head.clone()
    }
}

#[async_trait]
impl RepositoryClient for InMemoryRepository {
    async fn list_directory(&self, _repo: &str, path: &str, _branch: &str) -> Result<Vec<RepoEntry>> {
        let mut state = self.lock();
        state.check_online()?;

        let dir = path.trim_matches('/');
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{}/", dir)
        };

        let mut entries = Vec::new();
        let mut dirs = BTreeSet::new();
        for (file_path, file) in state.files.iter() {
            let Some(rest) = file_path.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((child_dir, _)) => {
                    dirs.insert(child_dir.to_string());
                }
                None => entries.push(RepoEntry {
                    name: rest.to_string(),
                    path: file_path.clone(),
                    content_hash: file.content_hash.clone(),
                    kind: EntryKind::File,
                }),
            }
        }

        if entries.is_empty() && dirs.is_empty() && !dir.is_empty() {
            return Err(SyncError::from_status(404, "Not Found", "list posts", dir));
        }

        for child in dirs {
            let child_path = format!("{}{}", prefix, child);
            entries.push(RepoEntry {
                content_hash: hex_hash(&child_path),
                name: child,
                path: child_path,
                kind: EntryKind::Dir,
            });
        }

        Ok(entries)
    }

    async fn get_file_content(
        &self,
        _repo: &str,
        path: &str,
        _branch: &str,
    ) -> Result<Option<FileContent>> {
        let mut state = self.lock();
        state.check_online()?;
        Ok(state.files.get(path.trim_matches('/')).cloned())
    }

    async fn create_or_update_file(
        &self,
        _repo: &str,
        path: &str,
        content: &str,
        commit_message: &str,
        _branch: &str,
        expected_hash: Option<&str>,
    ) -> Result<WriteOutcome> {
        let mut state = self.lock();
        state.check_online()?;

        let key = path.trim_matches('/').to_string();
        let current = state.files.get(&key).map(|f| f.content_hash.clone());
        match (expected_hash, current) {
            (None, Some(_)) => {
                return Err(SyncError::Conflict {
                    path: key,
                    message: "file already exists".to_string(),
                })
            }
            (Some(_), None) => {
                return Err(SyncError::Conflict {
                    path: key,
                    message: "file no longer exists on the remote".to_string(),
                })
            }
            (Some(expected), Some(actual)) if expected != actual => {
                return Err(SyncError::Conflict {
                    path: key,
                    message: format!("expected version {}, remote has {}", expected, actual),
                })
            }
            _ => {}
        }

        let hash = content_hash(content);
        state.files.insert(
            key,
            FileContent {
                content: content.to_string(),
                content_hash: hash.clone(),
            },
        );
        let commit = state.commit(commit_message);

        Ok(WriteOutcome {
            content_hash: hash,
            commit_hash: Some(commit),
        })
    }

    async fn delete_file(
        &self,
        _repo: &str,
        path: &str,
        commit_message: &str,
        _branch: &str,
        expected_hash: &str,
    ) -> Result<()> {
        let mut state = self.lock();
        state.check_online()?;

        let key = path.trim_matches('/').to_string();
        match state.files.get(&key) {
            Some(file) if file.content_hash == expected_hash => {}
            Some(file) => {
                return Err(SyncError::Conflict {
                    message: format!(
                        "expected version {}, remote has {}",
                        expected_hash, file.content_hash
                    ),
                    path: key,
                })
            }
            None => {
                return Err(SyncError::Conflict {
                    path: key,
                    message: "file no longer exists on the remote".to_string(),
                })
            }
        }

        state.files.remove(&key);
        state.commit(commit_message);
        Ok(())
    }

    async fn rename_file(
        &self,
        _repo: &str,
        old_path: &str,
        new_path: &str,
        _branch: &str,
        expected_hash: &str,
    ) -> Result<WriteOutcome> {
        let mut state = self.lock();
        state.check_online()?;

        let old_key = old_path.trim_matches('/').to_string();
        let new_key = new_path.trim_matches('/').to_string();

        let current = match state.files.get(&old_key) {
            Some(file) if file.content_hash == expected_hash => file.clone(),
            Some(file) => {
                return Err(SyncError::Conflict {
                    message: format!(
                        "expected version {}, remote has {}",
                        expected_hash, file.content_hash
                    ),
                    path: old_key,
                })
            }
            None => {
                return Err(SyncError::Conflict {
                    path: old_key,
                    message: "file no longer exists on the remote".to_string(),
                })
            }
        };
        if state.files.contains_key(&new_key) {
            return Err(SyncError::InvalidRequest(format!(
                "A file already exists at '{}'",
                new_key
            )));
        }

        state.files.remove(&old_key);
        let hash = current.content_hash.clone();
        state.files.insert(new_key.clone(), current);
        let commit = state.commit(&format!(
            "Rename {} to {}",
            file_name(&old_key),
            file_name(&new_key)
        ));

        Ok(WriteOutcome {
            content_hash: hash,
            commit_hash: Some(commit),
        })
    }

    async fn latest_commit_hash(&self, _repo: &str, _branch: &str) -> Result<String> {
        let mut state = self.lock();
        state.check_online()?;
        Ok(state.head.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> InMemoryRepository {
        InMemoryRepository::with_files([
            ("posts/a.md", "A"),
            ("posts/b.md", "B"),
            ("posts/2025/c.md", "C"),
        ])
    }

    #[tokio::test]
    async fn test_list_directory_children() {
        let repo = repo();
        let entries = repo.list_directory("o/r", "posts", "main").await.unwrap();

        let files: Vec<_> = entries
            .iter()
            .filter(|e| e.kind == EntryKind::File)
            .map(|e| e.path.as_str())
            .collect();
        assert_eq!(files, vec!["posts/a.md", "posts/b.md"]);

        let dirs: Vec<_> = entries
            .iter()
            .filter(|e| e.kind == EntryKind::Dir)
            .map(|e| e.path.as_str())
            .collect();
        assert_eq!(dirs, vec!["posts/2025"]);
    }

    #[tokio::test]
    async fn test_list_missing_directory_is_404() {
        let repo = repo();
        let err = repo
            .list_directory("o/r", "missing", "main")
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn test_update_requires_matching_hash() {
        let repo = repo();
        let current = repo.file("posts/a.md").unwrap();

        let err = repo
            .create_or_update_file("o/r", "posts/a.md", "A2", "edit", "main", Some("stale"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(repo.file("posts/a.md").unwrap().content, "A");

        let outcome = repo
            .create_or_update_file(
                "o/r",
                "posts/a.md",
                "A2",
                "edit",
                "main",
                Some(&current.content_hash),
            )
            .await
            .unwrap();
        assert_ne!(outcome.content_hash, current.content_hash);
        assert_eq!(repo.file("posts/a.md").unwrap().content, "A2");
    }

    #[tokio::test]
    async fn test_create_over_existing_is_conflict() {
        let repo = repo();
        let err = repo
            .create_or_update_file("o/r", "posts/a.md", "X", "new", "main", None)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_delete_with_stale_hash_is_conflict() {
        let repo = repo();
        let err = repo
            .delete_file("o/r", "posts/a.md", "rm", "main", "stale")
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(repo.file("posts/a.md").is_some());
    }

    #[tokio::test]
    async fn test_rename_is_all_or_nothing() {
        let repo = repo();
        let hash = repo.file("posts/a.md").unwrap().content_hash;

        let err = repo
            .rename_file("o/r", "posts/a.md", "posts/b.md", "main", &hash)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidRequest(_)));
        assert!(repo.file("posts/a.md").is_some());

        let outcome = repo
            .rename_file("o/r", "posts/a.md", "posts/z.md", "main", &hash)
            .await
            .unwrap();
        assert!(repo.file("posts/a.md").is_none());
        assert_eq!(repo.file("posts/z.md").unwrap().content_hash, outcome.content_hash);
    }

    #[tokio::test]
    async fn test_offline_counts_requests() {
        let repo = repo();
        repo.set_offline(true);
        let err = repo.latest_commit_hash("o/r", "main").await.unwrap_err();
        assert!(matches!(err, SyncError::Network(_)));
        assert_eq!(repo.request_count(), 1);
    }
}
