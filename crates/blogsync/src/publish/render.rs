//! Turns note content into a post file with YAML frontmatter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::template::{join_path, render_filename, slugify};
use crate::config::BlogConfig;
use crate::error::{Result, SyncError};

/// Content for a new post.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostSource {
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Publication date; defaults to the time of publishing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
}

impl PostSource {
    pub fn new(title: &str, body: &str) -> Self {
        Self {
            title: title.to_string(),
            body: body.to_string(),
            ..Self::default()
        }
    }

    /// Builds a post from tagged note content.
    ///
    /// A leading `# Heading` becomes the title; otherwise the tag is turned into one.
    pub fn from_tag(tag: &str, body: &str) -> Self {
        let trimmed = body.trim_start();
        let (title, body) = match trimmed.strip_prefix("# ") {
            Some(rest) => {
                let (heading, remainder) = rest.split_once('\n').unwrap_or((rest, ""));
                (heading.trim().to_string(), remainder.trim_start().to_string())
            }
            None => (title_from_tag(tag), body.to_string()),
        };

        Self {
            title,
            body,
            tags: vec![tag.to_string()],
            ..Self::default()
        }
    }
}

/// "release-notes" -> "Release Notes"
pub fn title_from_tag(tag: &str) -> String {
    tag.trim_start_matches('#')
        .split(|c: char| c == '-' || c == '_' || c == '/' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Serialize)]
struct Frontmatter<'a> {
    title: &'a str,
    date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tags: Option<&'a [String]>,
}

/// A post ready to be written to the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPost {
    pub slug: String,
    /// Repository path, including the content directory.
    pub path: String,
    pub content: String,
}

pub fn render_post(blog: &BlogConfig, source: &PostSource, now: DateTime<Utc>) -> Result<RenderedPost> {
    let slug = slugify(&source.title);
    if slug.is_empty() {
        return Err(SyncError::InvalidRequest(format!(
            "Cannot derive a slug from title '{}'",
            source.title
        )));
    }

    let date = source.date.unwrap_or(now);
    let filename = render_filename(&blog.filename_template, &slug, &date);
    let path = join_path(blog.content_root(), &filename);

    let content = if has_frontmatter(&source.body) {
        source.body.clone()
    } else {
        let frontmatter = Frontmatter {
            title: source.title.trim(),
            date: date.format("%Y-%m-%d").to_string(),
            description: source.description.as_deref(),
            tags: (!source.tags.is_empty()).then_some(source.tags.as_slice()),
        };
        let yaml = serde_yaml::to_string(&frontmatter)
            .map_err(|e| SyncError::InvalidRequest(format!("Failed to render frontmatter: {}", e)))?;
        format!("---\n{}---\n\n{}\n", yaml, source.body.trim())
    };

    Ok(RenderedPost {
        slug,
        path,
        content,
    })
}

fn has_frontmatter(body: &str) -> bool {
    body.trim_start().starts_with("---\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_render_from_tag() {
        let blog = BlogConfig::new("b", "Blog", "me/site");
        let source = PostSource::from_tag("launch", "Hello world");
        let post = render_post(&blog, &source, now()).unwrap();

        assert_eq!(post.slug, "launch");
        assert_eq!(post.path, "src/content/blog/launch.md");
        assert!(post.content.starts_with("---\ntitle: Launch\n"));
        assert!(post.content.contains("2026-05-04"));
        assert!(post.content.contains("tags:\n- launch\n"));
        assert!(post.content.ends_with("---\n\nHello world\n"));
    }

    #[test]
    fn test_heading_becomes_title() {
        let source = PostSource::from_tag("notes", "# Shipping v2\n\nIt is out.");
        assert_eq!(source.title, "Shipping v2");
        assert_eq!(source.body, "It is out.");
    }

    #[test]
    fn test_dated_template() {
        let mut blog = BlogConfig::new("b", "Blog", "me/site");
        blog.content_dir = "posts/".to_string();
        blog.filename_template = "$y/$m-$d-$slug.md".to_string();

        let post = render_post(&blog, &PostSource::new("Big News!", "x"), now()).unwrap();
        assert_eq!(post.path, "posts/2026/05-04-big-news.md");
    }

    #[test]
    fn test_existing_frontmatter_is_kept() {
        let blog = BlogConfig::new("b", "Blog", "me/site");
        let body = "---\ntitle: Custom\n---\n\nBody\n";
        let post = render_post(&blog, &PostSource::new("Custom", body), now()).unwrap();
        assert_eq!(post.content, body);
    }

    #[test]
    fn test_empty_title_rejected() {
        let blog = BlogConfig::new("b", "Blog", "me/site");
        let err = render_post(&blog, &PostSource::new("!!!", "x"), now()).unwrap_err();
        assert!(matches!(err, SyncError::InvalidRequest(_)));
    }

    #[test]
    fn test_title_from_tag() {
        assert_eq!(title_from_tag("release-notes"), "Release Notes");
        assert_eq!(title_from_tag("#blog_post"), "Blog Post");
    }
}
