//! Folder view of cached posts across all blogs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::BlogCacheEntry;
use crate::drafts::DraftOverlay;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Blog,
    Folder,
    File,
}

/// A node in the remote tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTreeNode {
    pub name: String,
    /// Repository path; empty for blog roots.
    pub path: String,
    pub blog_id: String,
    pub kind: NodeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub has_draft: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<RemoteTreeNode>,
}

impl RemoteTreeNode {
    fn folder(name: &str, path: String, blog_id: &str) -> Self {
        Self {
            name: name.to_string(),
            path,
            blog_id: blog_id.to_string(),
            kind: NodeKind::Folder,
            content_hash: None,
            has_draft: false,
            children: Vec::new(),
        }
    }

    pub fn is_directory(&self) -> bool {
        self.kind != NodeKind::File
    }

    /// Number of file nodes below this one.
    pub fn file_count(&self) -> usize {
        match self.kind {
            NodeKind::File => 1,
            _ => self.children.iter().map(RemoteTreeNode::file_count).sum(),
        }
    }
}

#[derive(Default)]
struct Dir {
    dirs: BTreeMap<String, Dir>,
    files: Vec<RemoteTreeNode>,
}

impl Dir {
    fn into_children(self, parent: &str, blog_id: &str) -> Vec<RemoteTreeNode> {
        let mut children = Vec::with_capacity(self.dirs.len() + self.files.len());
        for (name, dir) in self.dirs {
            let path = if parent.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", parent, name)
            };
            let mut node = RemoteTreeNode::folder(&name, path.clone(), blog_id);
            node.has_draft = dir.has_draft();
            node.children = dir.into_children(&path, blog_id);
            children.push(node);
        }

        let mut files = self.files;
        files.sort_by(|a, b| a.name.cmp(&b.name));
        children.extend(files);
        children
    }

    fn has_draft(&self) -> bool {
        self.files.iter().any(|f| f.has_draft) || self.dirs.values().any(Dir::has_draft)
    }
}

/// Builds one root per blog with posts nested under their folders, directories
/// first and then by name. Draft flags are set when `drafts` is given.
pub fn build_tree(entries: &[BlogCacheEntry], drafts: Option<&DraftOverlay>) -> Vec<RemoteTreeNode> {
    let mut roots = Vec::with_capacity(entries.len());

    for entry in entries {
        let base = entry.content_dir.trim_matches('/');
        let mut root_dir = Dir::default();

        for post in entry.posts.values() {
            let relative = post
                .path
                .strip_prefix(base)
                .unwrap_or(&post.path)
                .trim_start_matches('/');
            let mut segments: Vec<&str> = relative.split('/').collect();
            let Some(file_name) = segments.pop() else {
                continue;
            };

            let mut dir = &mut root_dir;
            for segment in segments.into_iter().filter(|s| !s.is_empty()) {
                dir = dir.dirs.entry(segment.to_string()).or_default();
            }
            dir.files.push(RemoteTreeNode {
                name: file_name.to_string(),
                path: post.path.clone(),
                blog_id: entry.blog_id.clone(),
                kind: NodeKind::File,
                content_hash: Some(post.content_hash.clone()),
                has_draft: drafts.is_some_and(|d| d.has(&entry.blog_id, &post.path)),
                children: Vec::new(),
            });
        }

        roots.push(RemoteTreeNode {
            name: entry.name.clone(),
            path: String::new(),
            blog_id: entry.blog_id.clone(),
            kind: NodeKind::Blog,
            content_hash: None,
            has_draft: root_dir.has_draft(),
            children: root_dir.into_children(base, &entry.blog_id),
        });
    }

    roots.sort_by(|a, b| a.name.cmp(&b.name));
    roots
}
