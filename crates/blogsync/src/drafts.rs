//! In-memory overlay of unpublished edits.
//!
//! Drafts are never persisted; a restart starts with an empty overlay.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    pub blog_id: String,
    pub path: String,
    pub content: String,
    /// Content hash of the remote version the edit is based on.
    pub original_hash: String,
    pub original_content: String,
    /// Unix milliseconds of the last save.
    pub modified_at: i64,
}

type DraftKey = (String, String);

/// Unpublished edits keyed by (blog, path).
///
/// A draft exists only while its content differs from the content it was based on.
#[derive(Debug, Default)]
pub struct DraftOverlay {
    drafts: RwLock<HashMap<DraftKey, Draft>>,
}

impl DraftOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(blog_id: &str, path: &str) -> DraftKey {
        (blog_id.to_string(), path.to_string())
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<DraftKey, Draft>> {
        match self.drafts.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Draft overlay lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<DraftKey, Draft>> {
        match self.drafts.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Draft overlay lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Stores an edit, or drops the existing draft when `content` equals the original.
    ///
    /// Returns the stored draft, or `None` if the edit was a no-op.
    pub fn save(
        &self,
        blog_id: &str,
        path: &str,
        content: &str,
        original_hash: &str,
        original_content: &str,
    ) -> Option<Draft> {
        let key = Self::key(blog_id, path);
        let mut drafts = self.write();

        if content == original_content {
            if drafts.remove(&key).is_some() {
                log::debug!("Draft for {}/{} matches the original, removed", blog_id, path);
            }
            return None;
        }

        let draft = Draft {
            blog_id: blog_id.to_string(),
            path: path.to_string(),
            content: content.to_string(),
            original_hash: original_hash.to_string(),
            original_content: original_content.to_string(),
            modified_at: Utc::now().timestamp_millis(),
        };
        drafts.insert(key, draft.clone());
        Some(draft)
    }

    pub fn get(&self, blog_id: &str, path: &str) -> Option<Draft> {
        self.read().get(&Self::key(blog_id, path)).cloned()
    }

    pub fn has(&self, blog_id: &str, path: &str) -> bool {
        self.read().contains_key(&Self::key(blog_id, path))
    }

    /// Removes a draft. Returns whether one existed.
    pub fn discard(&self, blog_id: &str, path: &str) -> bool {
        self.write().remove(&Self::key(blog_id, path)).is_some()
    }

    /// The draft's content if one exists, otherwise `original_content`.
    pub fn display_content(&self, blog_id: &str, path: &str, original_content: &str) -> String {
        match self.read().get(&Self::key(blog_id, path)) {
            Some(draft) => draft.content.clone(),
            None => original_content.to_string(),
        }
    }

    /// Paths of one blog that have a draft, sorted.
    pub fn modified_paths(&self, blog_id: &str) -> Vec<String> {
        let mut paths: Vec<String> = self
            .read()
            .keys()
            .filter(|(blog, _)| blog == blog_id)
            .map(|(_, path)| path.clone())
            .collect();
        paths.sort();
        paths
    }

    /// Moves a draft to a new path, keeping its content and base version.
    pub fn rename(&self, blog_id: &str, old_path: &str, new_path: &str) -> bool {
        let mut drafts = self.write();
        match drafts.remove(&Self::key(blog_id, old_path)) {
            Some(mut draft) => {
                draft.path = new_path.to_string();
                drafts.insert(Self::key(blog_id, new_path), draft);
                true
            }
            None => false,
        }
    }

    pub fn clear_all(&self) {
        self.write().clear();
    }

    /// Removes every draft of one blog. Returns how many were removed.
    pub fn clear_blog(&self, blog_id: &str) -> usize {
        let mut drafts = self.write();
        let before = drafts.len();
        drafts.retain(|(blog, _), _| blog != blog_id);
        before - drafts.len()
    }

    pub fn count(&self) -> usize {
        self.read().len()
    }

    pub fn count_for_blog(&self, blog_id: &str) -> usize {
        self.read().keys().filter(|(blog, _)| blog == blog_id).count()
    }
}
