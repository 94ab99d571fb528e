//! SyncEngine behaviour against the in-memory Notion fake

use async_trait::async_trait;
use chrono::NaiveDate;
use nudge::core::FixedClock;
use nudge::login_item::LoginItemRegistrar;
use nudge::storage::{MemoryConfigStore, MemoryTokenStore};
use nudge::{dispatch, RpcRequest, SnapshotEvent, SyncEngine};
use nudge_api::{
    AuthError, Config, ConfigStateError, DatabaseConfig, DatabaseKind, Result, SyncError,
};
use nudge_notion::FakeNotionApi;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 2025-01-08 was a Wednesday, so the default habit column is 水.
fn wednesday() -> Arc<FixedClock> {
    Arc::new(FixedClock(NaiveDate::from_ymd_opt(2025, 1, 8).unwrap()))
}

fn work_db() -> DatabaseConfig {
    DatabaseConfig {
        data_source_id: "ds-work".to_string(),
        title_property_name: "Name".to_string(),
        status_property_name: "Status".to_string(),
        status_in_progress: "Doing".to_string(),
        status_done: "Done".to_string(),
        status_paused: "Paused".to_string(),
        ..DatabaseConfig::new("work", DatabaseKind::Task)
    }
}

fn test_config() -> Config {
    Config {
        databases: vec![
            work_db(),
            DatabaseConfig {
                database_id: "db-habits".to_string(),
                ..DatabaseConfig::new("habits", DatabaseKind::Habit)
            },
            DatabaseConfig {
                enabled: false,
                ..DatabaseConfig {
                    data_source_id: "ds-archive".to_string(),
                    ..work_db()
                }
            },
        ],
        ..Config::default()
    }
}

struct Harness {
    engine: Arc<SyncEngine>,
    notion: Arc<FakeNotionApi>,
    store: Arc<MemoryConfigStore>,
}

async fn harness(config: Config) -> Harness {
    let notion = Arc::new(FakeNotionApi::new());
    notion.add_database("db-habits", &["ds-habits"], Some("名前"));
    let store = Arc::new(MemoryConfigStore::with_config(config));
    let engine = SyncEngine::new(
        store.clone(),
        Arc::new(MemoryTokenStore::with_token("secret")),
        notion.clone(),
    )
    .with_clock(wednesday());
    engine.load_config().await.unwrap();
    Harness {
        engine: Arc::new(engine),
        notion,
        store,
    }
}

#[tokio::test]
async fn test_get_tasks_reads_through_cache() {
    let h = harness(test_config()).await;
    h.notion.add_task("ds-work", "Write report", "Doing");
    h.notion.add_task("ds-work", "Old", "Done");

    let first = h.engine.get_tasks("work", false).await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].title, "Write report");
    assert_eq!(h.notion.call_count("query_by_status"), 1);

    h.notion.add_task("ds-work", "New one", "Doing");
    let cached = h.engine.get_tasks("work", false).await.unwrap();
    assert_eq!(cached, first);
    assert_eq!(h.notion.call_count("query_by_status"), 1);

    let forced = h.engine.get_tasks("work", true).await.unwrap();
    assert_eq!(forced.len(), 2);
    assert_eq!(h.notion.call_count("query_by_status"), 2);
}

#[tokio::test]
async fn test_empty_key_shares_cache_with_resolved_key() {
    let h = harness(test_config()).await;
    h.notion.add_task("ds-work", "Write report", "Doing");

    h.engine.get_tasks("", false).await.unwrap();
    h.engine.get_tasks("work", false).await.unwrap();
    assert_eq!(h.notion.call_count("query_by_status"), 1);
}

#[tokio::test]
async fn test_query_tasks_never_uses_cache() {
    let h = harness(test_config()).await;
    h.engine.query_tasks("work").await.unwrap();
    h.engine.query_tasks("work").await.unwrap();
    assert_eq!(h.notion.call_count("query_by_status"), 2);
}

#[tokio::test]
async fn test_disabled_database_is_rejected_without_remote_call() {
    let h = harness(test_config()).await;

    let err = h.engine.get_tasks("work-3", false).await.unwrap_err();
    assert_eq!(
        err,
        SyncError::ConfigState(ConfigStateError::Disabled {
            key: "work-3".to_string()
        })
    );
    assert!(h.notion.calls().is_empty());
}

#[tokio::test]
async fn test_only_disabled_task_database_reports_disabled() {
    let config = Config {
        databases: vec![DatabaseConfig {
            enabled: false,
            ..work_db()
        }],
        ..Config::default()
    };
    let h = harness(config).await;

    let err = h.engine.query_tasks("").await.unwrap_err();
    assert!(
        matches!(
            err,
            SyncError::ConfigState(ConfigStateError::Disabled { .. })
        ),
        "{:?}",
        err
    );
}

#[tokio::test]
async fn test_habits_resolve_schema_lazily_and_filter_today() {
    let h = harness(test_config()).await;
    h.notion.add_habit("ds-habits", "Stretch", &["水"]);
    h.notion.add_habit("ds-habits", "Read", &["火"]);
    h.notion.add_habit("ds-habits", "Read", &[]);
    h.notion.add_habit("ds-habits", "Walk", &[]);

    let habits = h.engine.get_habits("habits", false).await.unwrap();
    let titles: Vec<_> = habits.iter().map(|r| r.title.as_str()).collect();
    // newest first, duplicates by title dropped, 水 already ticked
    assert_eq!(titles, vec!["Walk", "Read"]);
    assert!(habits.iter().all(|r| !r.checked));

    assert_eq!(h.notion.call_count("resolve_data_source_id"), 1);
    assert_eq!(h.notion.call_count("resolve_title_property_name"), 0);

    // discovery is not written back
    let installed = h.engine.config().await;
    assert_eq!(installed.database_by_key("habits").unwrap().data_source_id, "");
    assert_eq!(
        h.store.saved().await.unwrap().databases[1].data_source_id,
        ""
    );
}

#[tokio::test]
async fn test_single_checkbox_column_ignores_weekday() {
    let mut config = test_config();
    config.databases[1].checkbox_property_name = "Done".to_string();
    let h = harness(config).await;
    let done = h.notion.add_habit("ds-habits", "Stretch", &["Done"]);
    let todo = h.notion.add_habit("ds-habits", "Walk", &["水"]);

    let habits = h.engine.query_habits("").await.unwrap();
    let ids: Vec<_> = habits.iter().map(|r| r.id.clone()).collect();
    assert_eq!(ids, vec![todo]);
    assert_ne!(ids[0], done);
}

#[tokio::test]
async fn test_update_task_status_maps_actions() {
    let h = harness(test_config()).await;
    let id = h.notion.add_task("ds-work", "Write report", "Doing");

    h.engine.update_task_status("work", &id, "done").await.unwrap();
    assert_eq!(h.notion.status_of(&id).as_deref(), Some("Done"));

    h.engine.update_task_status("", &id, "pause").await.unwrap();
    assert_eq!(h.notion.status_of(&id).as_deref(), Some("Paused"));

    h.engine.update_task_status("work", &id, "resume").await.unwrap();
    assert_eq!(h.notion.status_of(&id).as_deref(), Some("Doing"));

    let err = h
        .engine
        .update_task_status("work", &id, "archive")
        .await
        .unwrap_err();
    assert_eq!(
        err,
        SyncError::ConfigState(ConfigStateError::StatusNotConfigured {
            action: "archive".to_string()
        })
    );

    let err = h.engine.update_task_status("work", " ", "done").await.unwrap_err();
    assert_eq!(err, SyncError::missing("task_id"));
}

#[tokio::test]
async fn test_wrong_kind_is_config_error() {
    let h = harness(test_config()).await;

    let err = h.engine.get_tasks("habits", false).await.unwrap_err();
    assert_eq!(
        err,
        SyncError::ConfigState(ConfigStateError::WrongKind {
            key: "habits".to_string(),
            expected: DatabaseKind::Task
        })
    );

    let err = h
        .engine
        .update_habit_check("work", "page", true)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::ConfigState(ConfigStateError::WrongKind { .. })
    ));
    assert!(h.notion.calls().is_empty());
}

#[tokio::test]
async fn test_update_habit_check_uses_todays_column() {
    let h = harness(test_config()).await;
    let id = h.notion.add_habit("ds-habits", "Stretch", &[]);

    h.engine.update_habit_check("habits", &id, true).await.unwrap();
    assert_eq!(h.notion.checkbox_of(&id, "水"), Some(true));
    assert_eq!(h.notion.checkbox_of(&id, "木"), Some(false));

    h.engine.update_habit_check("habits", &id, false).await.unwrap();
    assert_eq!(h.notion.checkbox_of(&id, "水"), Some(false));
}

#[tokio::test]
async fn test_mutation_invalidates_cached_list() {
    let h = harness(test_config()).await;
    let id = h.notion.add_task("ds-work", "Write report", "Doing");

    assert_eq!(h.engine.get_tasks("work", false).await.unwrap().len(), 1);
    h.engine.update_task_status("work", &id, "done").await.unwrap();
    assert!(h.engine.get_tasks("work", false).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_refresh_all_continues_past_failures() {
    let mut config = test_config();
    config.databases.insert(
        0,
        DatabaseConfig {
            status_in_progress: String::new(),
            ..DatabaseConfig {
                data_source_id: "ds-broken".to_string(),
                ..DatabaseConfig::new("broken", DatabaseKind::Task)
            }
        },
    );
    let h = harness(config).await;
    h.notion.add_task("ds-work", "Write report", "Doing");
    h.notion.add_habit("ds-habits", "Walk", &[]);
    let mut events = h.engine.subscribe();

    let err = h.engine.refresh_all().await.unwrap_err();
    assert_eq!(err, SyncError::missing("title_property_name"));

    let mut refreshed: Vec<SnapshotEvent> = Vec::new();
    while let Ok(event) = events.try_recv() {
        refreshed.push(event);
    }
    let keys: Vec<_> = refreshed.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["work", "habits"]);

    // both healthy databases are now served from cache
    h.engine.get_tasks("work", false).await.unwrap();
    h.engine.get_habits("habits", false).await.unwrap();
    assert_eq!(h.notion.call_count("query_by_status"), 1);
    assert_eq!(h.notion.call_count("query_habits_today"), 1);
}

#[tokio::test]
async fn test_refresh_all_surfaces_remote_failure() {
    let h = harness(test_config()).await;
    h.notion.fail_next(SyncError::Permanent {
        status: 401,
        body: "unauthorized".to_string(),
    });

    let err = h.engine.refresh_all().await.unwrap_err();
    assert_eq!(err.kind(), "permanent_remote");
    // the habit database was still refreshed
    assert_eq!(h.notion.call_count("query_habits_today"), 1);
}

#[derive(Default)]
struct RecordingLoginItem {
    calls: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl LoginItemRegistrar for RecordingLoginItem {
    async fn set_enabled(&self, _enabled: bool) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(SyncError::LoginItem {
                message: "not permitted".to_string(),
            });
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_save_config_toggles_login_item_only_on_change() {
    let login = Arc::new(RecordingLoginItem::default());
    let store = Arc::new(MemoryConfigStore::new());
    let engine = SyncEngine::new(
        store.clone(),
        Arc::new(MemoryTokenStore::new()),
        Arc::new(FakeNotionApi::new()),
    )
    .with_login_item_registrar(login.clone());

    let saved = engine
        .save_config(Config {
            launch_at_login: true,
            ..Config::default()
        })
        .await
        .unwrap();
    assert_eq!(saved.databases.len(), 2);
    assert_eq!(login.calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.saved().await, Some(saved.clone()));

    engine.save_config(saved.clone()).await.unwrap();
    assert_eq!(login.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_login_item_aborts_save() {
    let login = Arc::new(RecordingLoginItem {
        fail: true,
        ..Default::default()
    });
    let store = Arc::new(MemoryConfigStore::new());
    let engine = SyncEngine::new(
        store.clone(),
        Arc::new(MemoryTokenStore::new()),
        Arc::new(FakeNotionApi::new()),
    )
    .with_login_item_registrar(login);

    let err = engine
        .save_config(Config {
            launch_at_login: true,
            ..Config::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "login_item");
    assert_eq!(store.saved().await, None);
    assert!(!engine.config().await.launch_at_login);
}

#[tokio::test]
async fn test_token_lifecycle() {
    let engine = SyncEngine::new(
        Arc::new(MemoryConfigStore::new()),
        Arc::new(MemoryTokenStore::new()),
        Arc::new(FakeNotionApi::new()),
    );

    assert!(!engine.token_status().await.unwrap());
    assert_eq!(
        engine.get_token().await.unwrap_err(),
        SyncError::Auth(AuthError::TokenNotFound)
    );
    assert_eq!(
        engine.set_token("").await.unwrap_err(),
        SyncError::invalid("token is empty")
    );

    engine.set_token("secret_abc").await.unwrap();
    assert!(engine.token_status().await.unwrap());

    engine.clear_token().await.unwrap();
    assert!(!engine.token_status().await.unwrap());
}

#[tokio::test]
async fn test_resolve_schema_passthrough() {
    let h = harness(test_config()).await;
    assert_eq!(
        h.engine.resolve_data_source_id(" db-habits ").await.unwrap(),
        "ds-habits"
    );
    assert_eq!(
        h.engine.resolve_title_property_name("db-habits").await.unwrap(),
        "名前"
    );
    assert_eq!(
        h.engine.resolve_data_source_id("").await.unwrap_err(),
        SyncError::missing("database_id")
    );
}

#[tokio::test(start_paused = true)]
async fn test_polling_refreshes_immediately_then_on_interval() {
    let mut config = test_config();
    config.poll_interval_seconds = 30;
    let h = harness(config).await;

    h.engine.start_polling().await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(h.engine.is_polling());
    assert_eq!(h.notion.call_count("query_by_status"), 1);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.notion.call_count("query_by_status"), 2);

    h.engine.stop_polling();
    h.engine.stop_polling();
    assert!(!h.engine.is_polling());

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.notion.call_count("query_by_status"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_restarting_polling_keeps_one_loop() {
    let mut config = test_config();
    config.poll_interval_seconds = 10;
    let h = harness(config).await;

    h.engine.start_polling().await;
    h.engine.start_polling().await;
    tokio::time::sleep(Duration::from_secs(15)).await;

    // two immediate refreshes plus one tick of the surviving loop
    assert_eq!(h.notion.call_count("query_by_status"), 3);
    h.engine.shutdown();
    assert!(!h.engine.is_polling());
}

#[tokio::test]
async fn test_rpc_dispatch() {
    let h = harness(test_config()).await;
    h.notion.add_task("ds-work", "Write report", "Doing");

    let response = dispatch(
        &h.engine,
        RpcRequest {
            id: "1".to_string(),
            action: "getTasks".to_string(),
            payload: json!({ "database_key": "work" }),
        },
    )
    .await
    .unwrap();
    assert!(response.ok);
    assert_eq!(response.data.unwrap()[0]["title"], "Write report");

    let response = dispatch(
        &h.engine,
        RpcRequest {
            id: "2".to_string(),
            action: "getTokenStatus".to_string(),
            payload: serde_json::Value::Null,
        },
    )
    .await
    .unwrap();
    assert_eq!(response.data, Some(json!(true)));

    let response = dispatch(
        &h.engine,
        RpcRequest {
            id: "3".to_string(),
            action: "updateStatus".to_string(),
            payload: json!({ "database_key": "work", "task_id": "", "action": "done" }),
        },
    )
    .await
    .unwrap();
    assert!(!response.ok);
    assert_eq!(response.error.as_deref(), Some("task_id is required"));
    assert_eq!(response.error_kind.as_deref(), Some("validation"));

    let response = dispatch(
        &h.engine,
        RpcRequest {
            id: "4".to_string(),
            action: "openWindow".to_string(),
            payload: json!({}),
        },
    )
    .await
    .unwrap();
    assert_eq!(response.error.as_deref(), Some("unknown action"));

    let response = dispatch(
        &h.engine,
        RpcRequest {
            id: "5".to_string(),
            action: "updateHabitCheck".to_string(),
            payload: json!({ "checked": "yes" }),
        },
    )
    .await
    .unwrap();
    assert!(!response.ok);

    let ignored = dispatch(
        &h.engine,
        RpcRequest {
            id: String::new(),
            action: "getConfig".to_string(),
            payload: json!({}),
        },
    )
    .await;
    assert!(ignored.is_none());
}
