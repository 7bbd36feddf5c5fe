use std::time::Duration as StdDuration;

use time::{Duration, OffsetDateTime};

use cswitch_provider_core::{BlacklistRecord, RequestLogEntry, TokenUsage};
use cswitch_storage::settings::{KEY_DURATION_MINUTES, KEY_FAILURE_THRESHOLD};
use cswitch_storage::{
    BlacklistSettings, RelayStorage, SettingsError, StorageBus, StorageBusConfig, StorageError,
};

async fn temp_storage() -> RelayStorage {
    let path = std::env::temp_dir().join(format!("cswitch-storage-{}.db", uuid::Uuid::new_v4()));
    let dsn = format!("sqlite://{}?mode=rwc", path.display());
    let storage = RelayStorage::connect(&dsn).await.unwrap();
    storage.sync().await.unwrap();
    storage.ensure_default_settings().await.unwrap();
    storage
}

fn t0() -> OffsetDateTime {
    OffsetDateTime::UNIX_EPOCH + Duration::days(20_000)
}

fn log_entry(model: &str, created_at: OffsetDateTime) -> RequestLogEntry {
    RequestLogEntry {
        platform: "claude".to_string(),
        model: model.to_string(),
        provider: "alpha".to_string(),
        http_code: 200,
        usage: TokenUsage {
            input_tokens: 10,
            output_tokens: 20,
            cache_create_tokens: 1,
            cache_read_tokens: 2,
            reasoning_tokens: 3,
        },
        is_stream: true,
        duration_sec: 1.25,
        created_at,
    }
}

#[tokio::test]
async fn defaults_are_seeded_once() {
    let storage = temp_storage().await;
    assert_eq!(
        storage.load_blacklist_settings().await.unwrap(),
        BlacklistSettings::default()
    );

    storage.set_setting(KEY_FAILURE_THRESHOLD, "5").await.unwrap();
    storage.ensure_default_settings().await.unwrap();
    assert_eq!(
        storage.get_setting(KEY_FAILURE_THRESHOLD).await.unwrap().as_deref(),
        Some("5")
    );
    assert!(storage.health().await.is_ok());
}

#[tokio::test]
async fn fixed_settings_are_validated() {
    let storage = temp_storage().await;
    let err = storage.save_fixed_blacklist_settings(10, 30).await.unwrap_err();
    assert!(matches!(err, StorageError::Setting(SettingsError::Threshold(10))));
    let err = storage.save_fixed_blacklist_settings(3, 7).await.unwrap_err();
    assert!(matches!(err, StorageError::Setting(SettingsError::Duration(7))));

    storage.save_fixed_blacklist_settings(2, 60).await.unwrap();
    storage.set_blacklist_enabled(false).await.unwrap();
    let policy = storage.load_blacklist_policy().await.unwrap();
    assert!(!policy.enabled);
    assert_eq!(policy.fixed_failure_threshold, 2);
    assert_eq!(policy.fixed_duration_minutes, 60);
    assert_eq!(
        storage.get_setting(KEY_DURATION_MINUTES).await.unwrap().as_deref(),
        Some("60")
    );
}

#[tokio::test]
async fn level_config_round_trips() {
    let storage = temp_storage().await;
    let mut config = storage.load_level_config().await.unwrap();
    config.failure_threshold = 5;
    config.l2_duration_minutes = 20;
    storage.save_level_config(&config).await.unwrap();
    assert_eq!(storage.load_level_config().await.unwrap(), config);
}

#[tokio::test]
async fn blacklist_upsert_keeps_one_row_per_pair() {
    let storage = temp_storage().await;
    assert!(storage.get_blacklist("claude", "alpha").await.unwrap().is_none());

    let mut record = BlacklistRecord::new("claude", "alpha");
    record.failure_count = 1;
    record.last_failure_at = Some(t0());
    storage.upsert_blacklist(&record).await.unwrap();

    record.failure_count = 0;
    record.blacklist_level = 2;
    record.blacklisted_at = Some(t0());
    record.blacklisted_until = Some(t0() + Duration::minutes(15));
    storage.upsert_blacklist(&record).await.unwrap();
    storage
        .upsert_blacklist(&BlacklistRecord::new("codex", "alpha"))
        .await
        .unwrap();

    let stored = storage.get_blacklist("claude", "alpha").await.unwrap().unwrap();
    assert_eq!(stored.blacklist_level, 2);
    assert_eq!(stored.failure_count, 0);
    assert_eq!(stored.blacklisted_until, Some(t0() + Duration::minutes(15)));
    assert_eq!(storage.list_blacklist("claude").await.unwrap().len(), 1);
    assert_eq!(storage.list_blacklist("codex").await.unwrap().len(), 1);
}

#[tokio::test]
async fn recover_expired_marks_only_expired_rows() {
    let storage = temp_storage().await;

    let mut expired = BlacklistRecord::new("claude", "expired");
    expired.blacklist_level = 1;
    expired.failure_count = 2;
    expired.blacklisted_until = Some(t0() - Duration::minutes(1));
    storage.upsert_blacklist(&expired).await.unwrap();

    let mut active = BlacklistRecord::new("claude", "active");
    active.blacklist_level = 1;
    active.blacklisted_until = Some(t0() + Duration::minutes(10));
    storage.upsert_blacklist(&active).await.unwrap();

    let recovered = storage.recover_expired(t0()).await.unwrap();
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].provider_name, "expired");

    let stored = storage.get_blacklist("claude", "expired").await.unwrap().unwrap();
    assert!(stored.auto_recovered);
    assert_eq!(stored.failure_count, 0);
    assert_eq!(stored.blacklist_level, 1);

    let stored = storage.get_blacklist("claude", "active").await.unwrap().unwrap();
    assert!(!stored.auto_recovered);

    assert!(storage.recover_expired(t0()).await.unwrap().is_empty());
}

#[tokio::test]
async fn recent_logs_are_newest_first() {
    let storage = temp_storage().await;
    storage
        .insert_request_log(log_entry("old", t0()))
        .await
        .unwrap();
    storage
        .insert_request_log(log_entry("new", t0() + Duration::seconds(5)))
        .await
        .unwrap();

    let logs = storage.recent_request_logs(10).await.unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].model, "new");
    assert_eq!(logs[0].usage.reasoning_tokens, 3);
    assert_eq!(logs[1].model, "old");
    assert_eq!(storage.recent_request_logs(1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn bus_flushes_pending_rows_on_shutdown() {
    let storage = temp_storage().await;
    let bus = StorageBus::spawn(
        storage.clone(),
        StorageBusConfig {
            flush_interval: StdDuration::from_secs(60),
            ..Default::default()
        },
    );
    for i in 0..3 {
        bus.request_log_tx
            .send(log_entry(&format!("m{i}"), t0() + Duration::seconds(i)))
            .await
            .unwrap();
    }
    bus.shutdown().await;

    let logs = storage.recent_request_logs(10).await.unwrap();
    assert_eq!(logs.len(), 3);
    assert_eq!(logs[0].model, "m2");
}
