//! Cache, draft overlay and optimistic concurrency behavior through the context.

mod common;

use std::sync::Arc;

use blogsync::publish::JobStatus;
use blogsync::repository::RepositoryClient;
use blogsync::{ErrorKind, SyncContext};

use common::{blog_config, fast_settings, TestHarness, BLOG_ID};

#[tokio::test]
async fn test_stale_write_is_rejected() {
    let harness = TestHarness::new();
    let h1 = harness.seed("a.md", "A").await;
    let path = TestHarness::post_path("a.md");

    let loaded = harness
        .context
        .get_post_content(BLOG_ID, &path)
        .await
        .into_data()
        .unwrap();
    assert_eq!(loaded.content, "A");
    assert_eq!(loaded.sha, h1);
    assert!(!loaded.is_draft);

    let h2 = harness.repo.put_external(&path, "External");
    assert_ne!(h1, h2);

    let job_id = harness
        .context
        .publish_cms_file(BLOG_ID, &path, "B", &h1)
        .into_data()
        .unwrap();
    let job = harness.wait(&job_id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_kind, Some(ErrorKind::Conflict));

    harness.refresh().await;
    let after = harness
        .context
        .get_post_content(BLOG_ID, &path)
        .await
        .into_data()
        .unwrap();
    assert_eq!(after.content, "External");
    assert_eq!(after.sha, h2);
}

#[tokio::test]
async fn test_draft_read_makes_no_remote_call() {
    let harness = TestHarness::new();
    harness.seed("a.md", "orig").await;
    let path = TestHarness::post_path("a.md");

    let loaded = harness
        .context
        .get_post_content(BLOG_ID, &path)
        .await
        .into_data()
        .unwrap();

    let saved = harness
        .context
        .save_draft(BLOG_ID, &path, "draft text", &loaded.sha, "orig")
        .into_data()
        .unwrap();
    assert!(saved.is_some());

    let requests = harness.repo.request_count();
    let content = harness
        .context
        .get_post_content(BLOG_ID, &path)
        .await
        .into_data()
        .unwrap();
    assert_eq!(content.content, "draft text");
    assert!(content.is_draft);
    assert_eq!(content.original_content.as_deref(), Some("orig"));
    assert_eq!(harness.repo.request_count(), requests);

    let cached = harness.context.cache().post(BLOG_ID, &path).unwrap();
    assert_eq!(cached.body, "orig");
}

#[tokio::test]
async fn test_draft_equal_to_original_is_dropped() {
    let harness = TestHarness::new();
    let path = TestHarness::post_path("a.md");

    harness
        .context
        .save_draft(BLOG_ID, &path, "edited", "h1", "orig");
    assert_eq!(harness.context.has_draft(BLOG_ID, &path).into_data(), Some(true));
    assert_eq!(
        harness.context.get_modified_paths(BLOG_ID).into_data(),
        Some(vec![path.clone()])
    );

    let saved = harness
        .context
        .save_draft(BLOG_ID, &path, "orig", "h1", "orig")
        .into_data()
        .unwrap();
    assert!(saved.is_none());
    assert_eq!(harness.context.has_draft(BLOG_ID, &path).into_data(), Some(false));
    assert_eq!(harness.context.get_draft(BLOG_ID, &path).into_data(), Some(None));
}

#[tokio::test]
async fn test_publish_update_clears_draft() {
    let harness = TestHarness::new();
    let h1 = harness.seed("a.md", "A").await;
    let path = TestHarness::post_path("a.md");
    harness.context.save_draft(BLOG_ID, &path, "B", &h1, "A");

    let job_id = harness
        .context
        .publish_cms_file(BLOG_ID, &path, "B", &h1)
        .into_data()
        .unwrap();
    let job = harness.wait(&job_id).await;
    assert_eq!(job.status, JobStatus::Completed);

    assert_eq!(harness.context.has_draft(BLOG_ID, &path).into_data(), Some(false));
    let requests = harness.repo.request_count();
    let content = harness
        .context
        .get_post_content(BLOG_ID, &path)
        .await
        .into_data()
        .unwrap();
    assert_eq!(content.content, "B");
    assert_eq!(content.sha, harness.repo.file(&path).unwrap().content_hash);
    assert_eq!(harness.repo.request_count(), requests);
}

#[tokio::test]
async fn test_refresh_preserves_unchanged_bodies() {
    let harness = TestHarness::new();
    harness.seed("a.md", "A").await;
    harness.seed("b.md", "B").await;
    let a = TestHarness::post_path("a.md");
    let b = TestHarness::post_path("b.md");

    harness.context.get_post_content(BLOG_ID, &a).await;
    harness.context.get_post_content(BLOG_ID, &b).await;

    harness.repo.put_external(&b, "B2");
    let summary = harness
        .context
        .refresh_blog(BLOG_ID)
        .await
        .into_data()
        .unwrap();
    assert_eq!(summary.changed, 1);
    assert_eq!(summary.unchanged, 1);

    let cache = harness.context.cache();
    let kept = cache.post(BLOG_ID, &a).unwrap();
    assert!(kept.is_loaded());
    assert_eq!(kept.body, "A");

    let cleared = cache.post(BLOG_ID, &b).unwrap();
    assert!(!cleared.is_loaded());
    assert!(cleared.body.is_empty());

    let fresh = harness
        .context
        .get_post_content(BLOG_ID, &b)
        .await
        .into_data()
        .unwrap();
    assert_eq!(fresh.content, "B2");
}

#[tokio::test]
async fn test_refresh_picks_up_removed_posts() {
    let harness = TestHarness::new();
    harness.seed("a.md", "A").await;
    let path = TestHarness::post_path("a.md");

    harness.repo.remove_external(&path);
    let summary = harness
        .context
        .refresh_blog(BLOG_ID)
        .await
        .into_data()
        .unwrap();
    assert_eq!(summary.removed, 1);
    assert!(harness.context.cache().post(BLOG_ID, &path).is_none());

    let response = harness.context.get_post_content(BLOG_ID, &path).await;
    assert_eq!(response.error_kind, Some(ErrorKind::NotFound));
}

#[tokio::test]
async fn test_update_with_wrong_hash_changes_nothing() {
    let harness = TestHarness::new();
    let h1 = harness.seed("a.md", "A").await;
    let path = TestHarness::post_path("a.md");

    let job_id = harness
        .context
        .publish_cms_file(BLOG_ID, &path, "B", "not-the-hash")
        .into_data()
        .unwrap();
    let job = harness.wait(&job_id).await;
    assert_eq!(job.error_kind, Some(ErrorKind::Conflict));

    assert_eq!(harness.repo.file(&path).unwrap().content, "A");
    assert_eq!(
        harness.context.cache().post(BLOG_ID, &path).unwrap().content_hash,
        h1
    );
}

#[tokio::test]
async fn test_delete_with_wrong_hash_changes_nothing() {
    let harness = TestHarness::new();
    let h1 = harness.seed("a.md", "A").await;
    let path = TestHarness::post_path("a.md");

    let err = harness
        .repo
        .delete_file("me/site", &path, "Delete a.md", "main", "stale")
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    assert_eq!(harness.repo.file(&path).unwrap().content_hash, h1);
    assert!(harness.context.cache().post(BLOG_ID, &path).is_some());
}

#[tokio::test]
async fn test_rename_with_wrong_hash_changes_nothing() {
    let harness = TestHarness::new();
    let h1 = harness.seed("a.md", "A").await;
    let path = TestHarness::post_path("a.md");

    let job_id = harness
        .context
        .rename_cms_file(BLOG_ID, &path, "renamed.md", "stale")
        .into_data()
        .unwrap();
    let job = harness.wait(&job_id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_kind, Some(ErrorKind::Conflict));

    assert_eq!(harness.repo.paths(), vec![path.clone()]);
    let cached = harness.context.cache().post(BLOG_ID, &path).unwrap();
    assert_eq!(cached.content_hash, h1);
    assert!(harness
        .context
        .cache()
        .post(BLOG_ID, &TestHarness::post_path("renamed.md"))
        .is_none());
}

#[tokio::test]
async fn test_rename_moves_post_and_draft() {
    let harness = TestHarness::new();
    let h1 = harness.seed("a.md", "A").await;
    let old = TestHarness::post_path("a.md");
    let new = TestHarness::post_path("renamed.md");
    harness.context.save_draft(BLOG_ID, &old, "edited", &h1, "A");

    let job_id = harness
        .context
        .rename_cms_file(BLOG_ID, &old, "renamed.md", &h1)
        .into_data()
        .unwrap();
    let job = harness.wait(&job_id).await;
    assert_eq!(job.status, JobStatus::Completed, "error: {:?}", job.error);

    assert_eq!(harness.repo.paths(), vec![new.clone()]);
    assert!(harness.context.cache().post(BLOG_ID, &old).is_none());
    assert!(harness.context.cache().post(BLOG_ID, &new).is_some());
    assert_eq!(harness.context.has_draft(BLOG_ID, &new).into_data(), Some(true));
    assert_eq!(harness.context.has_draft(BLOG_ID, &old).into_data(), Some(false));
}

#[tokio::test]
async fn test_rename_rejects_path_separators() {
    let harness = TestHarness::new();
    let h1 = harness.seed("a.md", "A").await;

    let response =
        harness
            .context
            .rename_cms_file(BLOG_ID, &TestHarness::post_path("a.md"), "../b.md", &h1);
    assert_eq!(response.error_kind, Some(ErrorKind::Invalid));
}

#[tokio::test]
async fn test_remote_tree_flags_drafts() {
    let harness = TestHarness::new();
    harness.seed("a.md", "A").await;
    harness.seed("2026/b.md", "B").await;
    harness
        .context
        .save_draft(BLOG_ID, &TestHarness::post_path("2026/b.md"), "B2", "h", "B");

    let tree = harness.context.get_remote_tree().into_data().unwrap();
    assert_eq!(tree.len(), 1);
    let blog = &tree[0];
    assert_eq!(blog.file_count(), 2);
    assert!(blog.has_draft);

    let first = &blog.children[0];
    assert!(first.is_directory());
    assert!(first.has_draft);
}

#[tokio::test]
async fn test_refresh_all_isolates_failures() {
    let context = SyncContext::new(fast_settings());
    let healthy = Arc::new(blogsync::InMemoryRepository::with_files([(
        "src/content/blog/a.md",
        "A",
    )]));
    let broken = Arc::new(blogsync::InMemoryRepository::new());
    broken.set_offline(true);

    context.add_blog_with(blog_config("up"), healthy, None);
    context.add_blog_with(blog_config("down"), broken.clone(), None);

    let report = context.refresh_all().await.into_data().unwrap();
    assert_eq!(report.refreshed, vec!["up".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].blog_id, "down");

    let snapshot = context.cache().snapshot("down").unwrap();
    assert!(snapshot.last_error.is_some());
    assert_eq!(context.cache().snapshot("up").unwrap().posts.len(), 1);
}

#[tokio::test]
async fn test_polling_refreshes_in_background() {
    let harness = TestHarness::new();
    let mut events = harness.context.cache_events();

    let started = harness
        .context
        .start_polling_every(std::time::Duration::from_millis(20))
        .into_data();
    assert_eq!(started, Some(true));
    assert_eq!(
        harness
            .context
            .start_polling_every(std::time::Duration::from_millis(20))
            .into_data(),
        Some(false)
    );

    harness
        .repo
        .put_external(&TestHarness::post_path("a.md"), "A");
    let event = tokio::time::timeout(std::time::Duration::from_secs(5), events.recv())
        .await
        .expect("no refresh within timeout")
        .unwrap();
    assert_eq!(event.blog_id(), BLOG_ID);

    assert!(harness.context.stop_polling());
    assert!(!harness.context.stop_polling());
}

#[test]
fn test_polling_requires_runtime() {
    let context = SyncContext::new(fast_settings());
    let response = context.start_polling();
    assert_eq!(response.error_kind, Some(ErrorKind::NotInitialized));
}
