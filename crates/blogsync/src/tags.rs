//! Boundary to the note tag index that supplies content for tag-based posts.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// A block of note content carrying a tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaggedSection {
    /// Note file the section was extracted from.
    pub source_path: String,
    pub content: String,
}

#[async_trait]
pub trait TagIndex: Send + Sync {
    /// All sections tagged with `tag`, in note order. Empty if the tag is unknown.
    async fn tagged_content(&self, tag: &str) -> Result<Vec<TaggedSection>>;
}

/// Joins the sections of a tag into one post body.
pub async fn collect_tag_body(index: &dyn TagIndex, tag: &str) -> Result<String> {
    let sections = index.tagged_content(tag).await?;
    let body = sections
        .iter()
        .map(|s| s.content.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    if body.is_empty() {
        return Err(SyncError::TagNotFound(tag.to_string()));
    }
    Ok(body)
}

/// Tag index backed by a fixed map, for embedding and tests.
#[derive(Debug, Default)]
pub struct StaticTagIndex {
    sections: RwLock<HashMap<String, Vec<TaggedSection>>>,
}

impl StaticTagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, tag: &str, source_path: &str, content: &str) {
        let mut sections = match self.sections.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sections
            .entry(tag.to_string())
            .or_default()
            .push(TaggedSection {
                source_path: source_path.to_string(),
                content: content.to_string(),
            });
    }

    pub fn with(self, tag: &str, source_path: &str, content: &str) -> Self {
        self.insert(tag, source_path, content);
        self
    }
}

#[async_trait]
impl TagIndex for StaticTagIndex {
    async fn tagged_content(&self, tag: &str) -> Result<Vec<TaggedSection>> {
        let sections = match self.sections.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(sections.get(tag).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collect_joins_sections() {
        let index = StaticTagIndex::new()
            .with("launch", "notes/a.md", "First part\n")
            .with("launch", "notes/b.md", "  Second part");

        let body = collect_tag_body(&index, "launch").await.unwrap();
        assert_eq!(body, "First part\n\nSecond part");
    }

    #[tokio::test]
    async fn test_unknown_tag_is_not_found() {
        let index = StaticTagIndex::new().with("empty", "notes/a.md", "   ");

        let err = collect_tag_body(&index, "missing").await.unwrap_err();
        assert!(matches!(err, SyncError::TagNotFound(_)));
        assert!(collect_tag_body(&index, "empty").await.is_err());
    }
}
