//! End-to-end runs of the engine against in-process installations and a
//! Remote Agent served over HTTP.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use envsync_agent::{AgentConfig, AgentServer, AgentService, Role, Site, TokenStore};
use envsync_core::{
    ComponentKind, ComponentSelection, ConflictKind, ConflictState, Environment, OperationStatus,
    Outcome, Resolution, ShellAuth, ShellCredential, SyncOperation, TransportKind,
};
use envsync_db::{Database, DbConfig};
use envsync_engine::{
    DefaultTransportFactory, LocalSites, ResolutionRequest, StartSyncRequest, SyncEngine,
    SyncError, SyncEvent, TransportSettings,
};

const SOURCE_URL: &str = "http://dev.test";
const TARGET_URL: &str = "http://live.test";

// =============================================================================
// Fixtures
// =============================================================================

struct Fixture {
    _dirs: (TempDir, TempDir),
    source: Site,
    target: Site,
    engine: SyncEngine,
}

fn settings() -> TransportSettings {
    TransportSettings {
        control_timeout_secs: 1,
        initial_backoff_ms: 20,
        ssh_program: "envsync-test-no-such-ssh".into(),
        ..Default::default()
    }
}

async fn engine_with(sites: LocalSites) -> SyncEngine {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let settings = settings();
    let factory = DefaultTransportFactory::new(settings.clone()).with_local(sites);
    SyncEngine::new(db, Arc::new(factory), settings)
}

async fn fixture() -> Fixture {
    let source_dir = tempfile::tempdir().unwrap();
    let target_dir = tempfile::tempdir().unwrap();
    let source = Site::open(source_dir.path()).await.unwrap();
    let target = Site::open(target_dir.path()).await.unwrap();

    let sites = LocalSites::new()
        .with_site(SOURCE_URL, AgentService::offline(source.clone()))
        .with_site(TARGET_URL, AgentService::offline(target.clone()));

    Fixture {
        _dirs: (source_dir, target_dir),
        source,
        target,
        engine: engine_with(sites).await,
    }
}

fn env(name: &str, url: &str) -> Environment {
    Environment::new(name, url, "admin", "tok")
}

fn push(selection: ComponentSelection) -> StartSyncRequest {
    StartSyncRequest {
        source: env("dev", SOURCE_URL),
        target: env("live", TARGET_URL),
        direction: "push".into(),
        selection,
    }
}

/// Polls until the operation finishes or waits for the operator.
async fn settle(engine: &SyncEngine, id: &str) -> SyncOperation {
    for _ in 0..500 {
        let op = engine.get_status(id).await.unwrap();
        if op.is_terminal() || op.conflict_state == ConflictState::AwaitingResolution {
            return op;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("operation {} did not settle", id);
}

async fn create_posts(site: &Site, rows: &[(i64, &str)]) {
    sqlx::query("CREATE TABLE posts (id INTEGER PRIMARY KEY, title TEXT)")
        .execute(site.pool())
        .await
        .unwrap();
    for (id, title) in rows {
        sqlx::query("INSERT INTO posts (id, title) VALUES (?1, ?2)")
            .bind(id)
            .bind(title)
            .execute(site.pool())
            .await
            .unwrap();
    }
}

async fn posts(site: &Site) -> Vec<(i64, String)> {
    sqlx::query_as("SELECT id, title FROM posts ORDER BY id")
        .fetch_all(site.pool())
        .await
        .unwrap()
}

fn install(site: &Site, kind_dir: &str, name: &str, file: &str) {
    let dir = site.root().join(kind_dir).join(name);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(file), "<?php").unwrap();
}

// =============================================================================
// Components
// =============================================================================

#[tokio::test]
async fn test_extension_push_with_activation_and_settings() {
    let f = fixture().await;
    install(&f.source, "extensions", "seo", "seo.php");
    f.source.activate(ComponentKind::Extension, "seo").await.unwrap();
    f.source.set_option("seo_title", "Shop").await.unwrap();

    let id = f
        .engine
        .start_sync(push(ComponentSelection::default().with_extension("seo")))
        .await
        .unwrap();
    let op = settle(&f.engine, &id).await;

    assert_eq!(op.status, OperationStatus::Completed);
    assert_eq!(op.outcome, Some(Outcome::Succeeded));
    assert_eq!(op.progress, 100);
    assert_eq!(op.items.len(), 1);
    assert_eq!(op.items[0].transport, Some(TransportKind::Local));

    assert!(f.target.root().join("extensions/seo/seo.php").exists());
    assert!(f.target.is_active(ComponentKind::Extension, "seo").await.unwrap());
    assert_eq!(
        f.target.get_option("seo_title").await.unwrap().as_deref(),
        Some("Shop")
    );
}

#[tokio::test]
async fn test_missing_item_gives_partial_success() {
    let f = fixture().await;
    install(&f.source, "themes", "dark", "style.css");

    let mut selection = ComponentSelection::default();
    selection.themes.insert("dark".into());
    selection.themes.insert("ghost".into());

    let id = f.engine.start_sync(push(selection)).await.unwrap();
    let op = settle(&f.engine, &id).await;

    assert_eq!(op.status, OperationStatus::Completed);
    assert_eq!(op.outcome, Some(Outcome::PartiallySucceeded));
    assert_eq!(op.failed_items().count(), 1);
    let ghost = op.failed_items().next().unwrap();
    assert_eq!(ghost.name, "ghost");
    assert_eq!(ghost.transport, None);
    let dark = op.items.iter().find(|item| item.name == "dark").unwrap();
    assert_eq!(dark.transport, Some(TransportKind::Local));
    assert!(f.target.root().join("themes/dark/style.css").exists());
}

#[tokio::test]
async fn test_media_push_is_idempotent() {
    let f = fixture().await;
    std::fs::create_dir_all(f.source.uploads_dir().join("2024")).unwrap();
    std::fs::write(f.source.uploads_dir().join("2024/cat.jpg"), b"jpeg").unwrap();
    sqlx::query("INSERT INTO media (id, path, title, mime_type) VALUES (1, '2024/cat.jpg', 'Cat', 'image/jpeg')")
        .execute(f.source.pool())
        .await
        .unwrap();

    let selection = ComponentSelection {
        media: true,
        ..Default::default()
    };

    let first = f.engine.start_sync(push(selection.clone())).await.unwrap();
    let first = settle(&f.engine, &first).await;
    assert_eq!(first.outcome, Some(Outcome::Succeeded));
    assert!(first.items[0].message.contains("1 record(s) imported"));

    let second = f.engine.start_sync(push(selection)).await.unwrap();
    let second = settle(&f.engine, &second).await;
    assert_eq!(second.outcome, Some(Outcome::Succeeded));
    assert!(second.items[0].message.contains("0 record(s) imported"));
    assert!(second.items[0].message.contains("1 already present"));

    assert_eq!(f.target.media_count().await.unwrap(), 1);
    assert!(f.target.uploads_dir().join("2024/cat.jpg").exists());
}

// =============================================================================
// Progress
// =============================================================================

async fn progress_values(engine: &SyncEngine, request: StartSyncRequest) -> Vec<u8> {
    let mut events = engine.subscribe();
    let id = engine.start_sync(request).await.unwrap();

    let mut values = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .unwrap()
            .unwrap();
        if event.operation_id() != id {
            continue;
        }
        match event {
            SyncEvent::Progress { progress, .. } => values.push(progress),
            SyncEvent::Completed { .. } => break,
            SyncEvent::Failed { error, .. } => panic!("operation failed: {}", error),
            _ => {}
        }
    }
    values
}

#[tokio::test]
async fn test_phase_boundaries_do_not_depend_on_item_count() {
    let f = fixture().await;
    install(&f.source, "extensions", "a", "a.php");
    install(&f.source, "extensions", "b", "b.php");
    install(&f.source, "extensions", "c", "c.php");

    let one = progress_values(&f.engine, push(ComponentSelection::default().with_extension("a"))).await;
    let three = progress_values(
        &f.engine,
        push(
            ComponentSelection::default()
                .with_extension("a")
                .with_extension("b")
                .with_extension("c"),
        ),
    )
    .await;

    for values in [&one, &three] {
        assert!(values.windows(2).all(|w| w[0] <= w[1]), "{:?}", values);
        for boundary in [10, 40, 55, 70, 80] {
            assert!(values.contains(&boundary), "{} missing from {:?}", boundary, values);
        }
    }
    assert!(three.len() > one.len());
}

// =============================================================================
// Conflicts
// =============================================================================

#[tokio::test]
async fn test_push_conflicts_resolved_with_push_and_pull() {
    let f = fixture().await;
    create_posts(&f.source, &[(1, "Edited"), (2, "Draft")]).await;
    create_posts(&f.target, &[(1, "Original")]).await;

    let id = f
        .engine
        .start_sync(push(ComponentSelection::default().with_table("posts")))
        .await
        .unwrap();
    let held = settle(&f.engine, &id).await;
    assert_eq!(held.status, OperationStatus::Running);
    assert_eq!(held.conflict_state, ConflictState::AwaitingResolution);
    assert_eq!(posts(&f.target).await, [(1, "Original".to_string())]);

    let conflicts = f.engine.list_conflicts(&id).await.unwrap();
    assert_eq!(conflicts.len(), 2);
    let updated = conflicts
        .iter()
        .find(|c| c.kind == ConflictKind::UpdatedRowGroup)
        .unwrap();
    let new_rows = conflicts
        .iter()
        .find(|c| c.kind == ConflictKind::NewRowGroup)
        .unwrap();

    let remaining = f
        .engine
        .submit_conflict_resolutions(
            &id,
            vec![ResolutionRequest {
                conflict_id: new_rows.id.clone(),
                resolution: Resolution::Push,
            }],
        )
        .await
        .unwrap();
    assert_eq!(remaining, 1);

    let remaining = f
        .engine
        .submit_conflict_resolutions(
            &id,
            vec![ResolutionRequest {
                conflict_id: updated.id.clone(),
                resolution: Resolution::Pull,
            }],
        )
        .await
        .unwrap();
    assert_eq!(remaining, 0);

    let done = settle(&f.engine, &id).await;
    assert_eq!(done.status, OperationStatus::Completed);
    assert_eq!(done.conflict_state, ConflictState::Resolved);
    assert_eq!(done.outcome, Some(Outcome::Succeeded));

    let expected = [(1, "Original".to_string()), (2, "Draft".to_string())];
    assert_eq!(posts(&f.target).await, expected);
    assert_eq!(posts(&f.source).await, expected);
}

/// Holds a push of `posts` on conflicts and answers both groups at once.
async fn resolve_posts_push(f: &Fixture, new_rows: Resolution, updated: Resolution) -> SyncOperation {
    let id = f
        .engine
        .start_sync(push(ComponentSelection::default().with_table("posts")))
        .await
        .unwrap();
    settle(&f.engine, &id).await;

    let resolutions = f
        .engine
        .list_conflicts(&id)
        .await
        .unwrap()
        .into_iter()
        .map(|c| ResolutionRequest {
            resolution: match c.kind {
                ConflictKind::NewRowGroup => new_rows,
                ConflictKind::UpdatedRowGroup => updated,
            },
            conflict_id: c.id,
        })
        .collect::<Vec<_>>();
    assert_eq!(resolutions.len(), 2);

    let remaining = f
        .engine
        .submit_conflict_resolutions(&id, resolutions)
        .await
        .unwrap();
    assert_eq!(remaining, 0);
    settle(&f.engine, &id).await
}

#[tokio::test]
async fn test_skip_leaves_both_sides_unchanged() {
    let f = fixture().await;
    create_posts(&f.source, &[(1, "Edited"), (2, "Draft")]).await;
    create_posts(&f.target, &[(1, "Original")]).await;

    let done = resolve_posts_push(&f, Resolution::Skip, Resolution::Skip).await;

    assert_eq!(done.status, OperationStatus::Completed);
    assert_eq!(done.conflict_state, ConflictState::Resolved);
    assert!(done.items[0].message.contains("skipped"));
    assert_eq!(
        posts(&f.source).await,
        [(1, "Edited".to_string()), (2, "Draft".to_string())]
    );
    assert_eq!(posts(&f.target).await, [(1, "Original".to_string())]);
}

#[tokio::test]
async fn test_pull_on_new_rows_removes_them_from_source() {
    let f = fixture().await;
    create_posts(&f.source, &[(1, "Edited"), (2, "Draft")]).await;
    create_posts(&f.target, &[(1, "Original")]).await;

    let done = resolve_posts_push(&f, Resolution::Pull, Resolution::Skip).await;

    assert_eq!(done.status, OperationStatus::Completed);
    assert_eq!(done.outcome, Some(Outcome::Succeeded));
    assert!(done.items[0].message.contains("removed 1 row(s) from source"));
    assert_eq!(posts(&f.source).await, [(1, "Edited".to_string())]);
    assert_eq!(posts(&f.target).await, [(1, "Original".to_string())]);
}

#[tokio::test]
async fn test_discard_pending_push_leaves_target_untouched() {
    let f = fixture().await;
    create_posts(&f.source, &[(1, "Edited")]).await;
    create_posts(&f.target, &[(1, "Original")]).await;

    let id = f
        .engine
        .start_sync(push(ComponentSelection::default().with_table("posts")))
        .await
        .unwrap();
    settle(&f.engine, &id).await;

    f.engine.discard_pending_push(&id).await.unwrap();
    let done = settle(&f.engine, &id).await;

    assert_eq!(done.status, OperationStatus::Completed);
    assert_eq!(done.conflict_state, ConflictState::Discarded);
    assert_eq!(done.outcome, Some(Outcome::PartiallySucceeded));
    assert_eq!(posts(&f.target).await, [(1, "Original".to_string())]);

    let err = f.engine.discard_pending_push(&id).await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_zero_diff_push_completes_without_waiting() {
    let f = fixture().await;
    create_posts(&f.source, &[(1, "Same")]).await;
    create_posts(&f.target, &[(1, "Same")]).await;

    let id = f
        .engine
        .start_sync(push(ComponentSelection::default().with_table("posts")))
        .await
        .unwrap();
    let op = settle(&f.engine, &id).await;

    assert_eq!(op.status, OperationStatus::Completed);
    assert_eq!(op.conflict_state, ConflictState::None);
    assert!(op.items[0].message.contains("no divergence"));
    assert!(f.engine.list_conflicts(&id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_resolutions_rejected_when_not_awaiting() {
    let f = fixture().await;
    install(&f.source, "themes", "dark", "style.css");

    let mut selection = ComponentSelection::default();
    selection.themes.insert("dark".into());
    let id = f.engine.start_sync(push(selection)).await.unwrap();
    settle(&f.engine, &id).await;

    let err = f
        .engine
        .submit_conflict_resolutions(
            &id,
            vec![ResolutionRequest {
                conflict_id: "c-1".into(),
                resolution: Resolution::Skip,
            }],
        )
        .await
        .unwrap_err();
    assert!(err.is_client_error());
}

// =============================================================================
// Validation & Reachability
// =============================================================================

#[tokio::test]
async fn test_empty_urls_rejected_without_a_record() {
    let f = fixture().await;
    let request = StartSyncRequest {
        source: env("dev", ""),
        target: env("live", ""),
        direction: "push".into(),
        selection: ComponentSelection::default().with_extension("seo"),
    };

    let err = f.engine.start_sync(request).await.unwrap_err();
    assert!(err.is_client_error());
    assert!(f.engine.list_operations(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unreachable_target_fails_operation() {
    let f = fixture().await;
    install(&f.source, "extensions", "seo", "seo.php");

    let request = StartSyncRequest {
        source: env("dev", SOURCE_URL),
        target: env("down", "http://127.0.0.1:1"),
        direction: "push".into(),
        selection: ComponentSelection::default().with_extension("seo"),
    };
    let id = f.engine.start_sync(request).await.unwrap();
    let op = settle(&f.engine, &id).await;

    assert_eq!(op.status, OperationStatus::Failed);
    assert_eq!(op.outcome, Some(Outcome::Failed));
    assert!(op.error_message.is_some());
    assert!(op.items.is_empty());
}

// =============================================================================
// Object Transport against a served agent
// =============================================================================

#[tokio::test]
async fn test_shell_fallback_pushes_over_object_transport() {
    let source_dir = tempfile::tempdir().unwrap();
    let target_dir = tempfile::tempdir().unwrap();
    let source = Site::open(source_dir.path()).await.unwrap();
    let target = Site::open(target_dir.path()).await.unwrap();

    let mut config = AgentConfig::new(target_dir.path());
    config.bind_addr = "127.0.0.1:0".into();
    let agent = AgentServer::new(&config, AgentService::offline(target.clone()))
        .start()
        .await
        .unwrap();
    let token = TokenStore::new(target.pool().clone())
        .issue("owner", Role::Owner)
        .await
        .unwrap();

    install(&source, "themes", "dark", "style.css");
    source.activate(ComponentKind::Theme, "dark").await.unwrap();
    create_posts(&source, &[(1, "Hello")]).await;

    let engine =
        engine_with(LocalSites::new().with_site(SOURCE_URL, AgentService::offline(source.clone())))
            .await;

    let target_env = Environment::new("live", &agent.base_url(), "owner", &token).with_shell(
        ShellCredential {
            host: "127.0.0.1".into(),
            port: 1,
            user: "deploy".into(),
            auth: ShellAuth::KeyFile {
                path: PathBuf::from("/nonexistent/key"),
            },
            root_path: "/srv/site".into(),
        },
    );

    let mut selection = ComponentSelection::default().with_table("posts");
    selection.themes.insert("dark".into());
    let id = engine
        .start_sync(StartSyncRequest {
            source: env("dev", SOURCE_URL),
            target: target_env,
            direction: "push".into(),
            selection,
        })
        .await
        .unwrap();
    let op = settle(&engine, &id).await;

    assert_eq!(op.status, OperationStatus::Completed, "{:?}", op.error_message);
    assert_eq!(op.outcome, Some(Outcome::Succeeded));
    assert_eq!(op.items.len(), 2);
    assert!(op
        .items
        .iter()
        .all(|item| item.transport == Some(TransportKind::Object)));

    assert!(target.root().join("themes/dark/style.css").exists());
    assert!(target.is_active(ComponentKind::Theme, "dark").await.unwrap());
    assert_eq!(posts(&target).await, [(1, "Hello".to_string())]);

    agent.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_rejected_token_fails_operation() {
    let source_dir = tempfile::tempdir().unwrap();
    let target_dir = tempfile::tempdir().unwrap();
    let source = Site::open(source_dir.path()).await.unwrap();
    let target = Site::open(target_dir.path()).await.unwrap();

    let mut config = AgentConfig::new(target_dir.path());
    config.bind_addr = "127.0.0.1:0".into();
    let agent = AgentServer::new(&config, AgentService::offline(target))
        .start()
        .await
        .unwrap();

    install(&source, "themes", "dark", "style.css");
    let engine =
        engine_with(LocalSites::new().with_site(SOURCE_URL, AgentService::offline(source))).await;

    let mut selection = ComponentSelection::default();
    selection.themes.insert("dark".into());
    let id = engine
        .start_sync(StartSyncRequest {
            source: env("dev", SOURCE_URL),
            target: Environment::new("live", &agent.base_url(), "owner", "wrong"),
            direction: "push".into(),
            selection,
        })
        .await
        .unwrap();
    let op = settle(&engine, &id).await;

    assert_eq!(op.status, OperationStatus::Failed);
    assert!(op
        .error_message
        .as_deref()
        .unwrap_or_default()
        .contains("Authentication failed"));

    agent.shutdown().await.unwrap();
}
