//! Filename templates, slugs and repository path helpers.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Utc};
use regex::{Captures, Regex};

static RE_VARIABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([a-z]+)").expect("static regex"));

/// Expands `$slug`, `$y`, `$m` and `$d` in a filename template.
///
/// Unknown variables are left untouched. Every path segment of the result is
/// sanitized so the template can place posts in sub-directories.
pub fn render_filename(template: &str, slug: &str, now: &DateTime<Utc>) -> String {
    let mut vars = HashMap::new();
    vars.insert("slug", slug.to_string());
    vars.insert("y", format!("{:04}", now.year()));
    vars.insert("m", format!("{:02}", now.month()));
    vars.insert("d", format!("{:02}", now.day()));

    let expanded = RE_VARIABLE.replace_all(template, |caps: &Captures| {
        vars.get(&caps[1])
            .cloned()
            .unwrap_or_else(|| caps[0].to_string())
    });

    expanded
        .split('/')
        .map(sanitize_segment)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Lowercases and joins alphanumeric runs with dashes.
pub fn slugify(value: &str) -> String {
    value
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

fn sanitize_segment(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_matches(|c| c == '_' || c == '.')
        .to_string()
}

/// Joins repository path segments with single slashes.
pub fn join_path(base: &str, relative: &str) -> String {
    let base = base.trim_matches('/');
    let relative = relative.trim_matches('/');
    match (base.is_empty(), relative.is_empty()) {
        (true, _) => relative.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{}/{}", base, relative),
    }
}

/// Last path segment of a repository path.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Computes the path of a renamed file in the same directory.
///
/// When `new_name` has no extension the original file's extension is kept.
/// Returns `None` for names that would escape the directory or are empty.
pub fn sibling_path(old_path: &str, new_name: &str) -> Option<String> {
    let new_name = new_name.trim();
    if new_name.is_empty()
        || new_name.contains('/')
        || new_name.contains('\\')
        || new_name == "."
        || new_name == ".."
    {
        return None;
    }

    let name = if new_name.contains('.') {
        new_name.to_string()
    } else {
        match file_name(old_path).rsplit_once('.') {
            Some((_, ext)) => format!("{}.{}", new_name, ext),
            None => new_name.to_string(),
        }
    };

    match old_path.rsplit_once('/') {
        Some((dir, _)) => Some(join_path(dir, &name)),
        None => Some(name),
    }
}

/// Public URL of a post: `site_url` + `live_post_path` + slug, with a trailing slash.
pub fn post_url(site_url: Option<&str>, live_post_path: &str, slug: &str) -> String {
    let prefix = live_post_path.trim_matches('/');
    let path = if prefix.is_empty() {
        format!("/{}/", slug)
    } else {
        format!("/{}/{}/", prefix, slug)
    };

    match site_url {
        Some(base) if !base.trim().is_empty() => format!("{}{}", base.trim_end_matches('/'), path),
        _ => path,
    }
}
