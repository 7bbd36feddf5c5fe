#![allow(clippy::needless_update)]

use std::collections::{HashMap, HashSet};

use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveValue, ColumnTrait, Database, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Schema, TransactionTrait,
};
use time::OffsetDateTime;

use cswitch_provider_core::{
    BlacklistLevelConfig, BlacklistPolicy, BlacklistRecord, MAX_BLACKLIST_LEVEL, RequestLogEntry,
    TokenUsage,
};

use crate::entities;
use crate::settings::{
    BlacklistSettings, KEY_DURATION_MINUTES, KEY_ENABLE_BLACKLIST, KEY_FAILURE_THRESHOLD,
    KEY_LEVEL_CONFIG, SettingsError, validate_duration, validate_threshold,
};

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("db error: {0}")]
    Db(#[from] DbErr),
    #[error("serde json error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid setting: {0}")]
    Setting(#[from] SettingsError),
}

/// Durable store shared by the blacklist tracker, the request log and the
/// settings accessors. Cheap to clone.
#[derive(Clone)]
pub struct RelayStorage {
    db: DatabaseConnection,
}

impl RelayStorage {
    pub async fn connect(database_url: &str) -> Result<Self, DbErr> {
        let db = Database::connect(database_url).await?;
        Ok(Self { db })
    }

    pub async fn sync(&self) -> Result<(), DbErr> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::AppSettings)
            .register(entities::ProviderBlacklist)
            .register(entities::RequestLog)
            .sync(&self.db)
            .await
    }

    pub async fn health(&self) -> Result<(), DbErr> {
        entities::AppSettings::find()
            .order_by_asc(entities::app_settings::Column::Id)
            .one(&self.db)
            .await?;
        Ok(())
    }

    // Settings

    /// Inserts every default setting whose key is absent. Existing values are left alone.
    pub async fn ensure_default_settings(&self) -> StorageResult<()> {
        let existing: HashSet<String> = entities::AppSettings::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(|row| row.key)
            .collect();

        let now = OffsetDateTime::now_utc();
        let missing: Vec<_> = BlacklistSettings::default_rows()?
            .into_iter()
            .filter(|(key, _)| !existing.contains(*key))
            .map(|(key, value)| entities::app_settings::ActiveModel {
                id: ActiveValue::NotSet,
                key: ActiveValue::Set(key.to_string()),
                value: ActiveValue::Set(value),
                updated_at: ActiveValue::Set(now),
                ..Default::default()
            })
            .collect();

        if !missing.is_empty() {
            entities::AppSettings::insert_many(missing)
                .exec(&self.db)
                .await?;
        }
        Ok(())
    }

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>, DbErr> {
        let row = entities::AppSettings::find()
            .filter(entities::app_settings::Column::Key.eq(key))
            .one(&self.db)
            .await?;
        Ok(row.map(|row| row.value))
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<(), DbErr> {
        upsert_setting(&self.db, key, value).await
    }

    pub async fn load_blacklist_settings(&self) -> Result<BlacklistSettings, DbErr> {
        let rows: HashMap<String, String> = entities::AppSettings::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(|row| (row.key, row.value))
            .collect();
        let (settings, invalid) = BlacklistSettings::from_rows(&rows);
        for key in invalid {
            tracing::warn!(event = "settings.invalid", key, "falling back to default value");
        }
        Ok(settings)
    }

    pub async fn load_blacklist_policy(&self) -> Result<BlacklistPolicy, DbErr> {
        Ok(self.load_blacklist_settings().await?.into_policy())
    }

    /// Replaces every blacklist knob in one transaction after validating it.
    pub async fn save_blacklist_settings(&self, settings: &BlacklistSettings) -> StorageResult<()> {
        settings.validate()?;
        let rows = settings.to_rows()?;
        run_in_transaction(&self.db, move |txn| {
            Box::pin(async move {
                for (key, value) in rows {
                    upsert_setting(txn, key, &value).await?;
                }
                Ok(())
            })
        })
        .await?;
        Ok(())
    }

    /// Fixed-mode threshold and duration.
    pub async fn save_fixed_blacklist_settings(
        &self,
        failure_threshold: u32,
        duration_minutes: i64,
    ) -> StorageResult<()> {
        validate_threshold(failure_threshold)?;
        validate_duration(duration_minutes)?;
        let threshold = failure_threshold.to_string();
        let duration = duration_minutes.to_string();
        run_in_transaction(&self.db, move |txn| {
            Box::pin(async move {
                upsert_setting(txn, KEY_FAILURE_THRESHOLD, &threshold).await?;
                upsert_setting(txn, KEY_DURATION_MINUTES, &duration).await?;
                Ok(())
            })
        })
        .await?;
        Ok(())
    }

    pub async fn set_blacklist_enabled(&self, enabled: bool) -> Result<(), DbErr> {
        upsert_setting(&self.db, KEY_ENABLE_BLACKLIST, &enabled.to_string()).await
    }

    pub async fn load_level_config(&self) -> Result<BlacklistLevelConfig, DbErr> {
        Ok(self.load_blacklist_settings().await?.level_config)
    }

    pub async fn save_level_config(&self, config: &BlacklistLevelConfig) -> StorageResult<()> {
        let raw = serde_json::to_string(config)?;
        upsert_setting(&self.db, KEY_LEVEL_CONFIG, &raw).await?;
        Ok(())
    }

    // Blacklist rows

    pub async fn get_blacklist(
        &self,
        platform: &str,
        provider_name: &str,
    ) -> Result<Option<BlacklistRecord>, DbErr> {
        use entities::provider_blacklist::Column;

        let row = entities::ProviderBlacklist::find()
            .filter(Column::Platform.eq(platform))
            .filter(Column::ProviderName.eq(provider_name))
            .one(&self.db)
            .await?;
        Ok(row.map(BlacklistRecord::from))
    }

    pub async fn list_blacklist(&self, platform: &str) -> Result<Vec<BlacklistRecord>, DbErr> {
        use entities::provider_blacklist::Column;

        let rows = entities::ProviderBlacklist::find()
            .filter(Column::Platform.eq(platform))
            .order_by_asc(Column::ProviderName)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(BlacklistRecord::from).collect())
    }

    /// Writes the full record, keyed by (platform, provider_name).
    pub async fn upsert_blacklist(&self, record: &BlacklistRecord) -> Result<(), DbErr> {
        use entities::provider_blacklist::Column;

        let active = blacklist_active_model(record, OffsetDateTime::now_utc());
        entities::ProviderBlacklist::insert(active)
            .on_conflict(
                OnConflict::columns([Column::Platform, Column::ProviderName])
                    .update_columns([
                        Column::FailureCount,
                        Column::BlacklistLevel,
                        Column::BlacklistedAt,
                        Column::BlacklistedUntil,
                        Column::LastFailureAt,
                        Column::LastRecoveredAt,
                        Column::LastDegradeHour,
                        Column::LastFailureWindowStart,
                        Column::AutoRecovered,
                        Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Marks every expired, not yet swept block as recovered and zeroes its
    /// failure count. Expiry is compared here, not in SQL. Rows re-blacklisted
    /// after they were read are left alone.
    pub async fn recover_expired(&self, now: OffsetDateTime) -> Result<Vec<BlacklistRecord>, DbErr> {
        use entities::provider_blacklist::Column;

        let txn = self.db.begin().await?;
        let candidates = entities::ProviderBlacklist::find()
            .filter(Column::BlacklistedUntil.is_not_null())
            .filter(Column::AutoRecovered.eq(false))
            .all(&txn)
            .await?;

        let mut recovered = Vec::new();
        for row in candidates {
            let Some(until) = row.blacklisted_until.filter(|until| *until <= now) else {
                continue;
            };
            if !mark_recovered_if_unchanged(&txn, row.id, until, now).await? {
                continue;
            }
            let mut record = BlacklistRecord::from(row);
            record.auto_recovered = true;
            record.failure_count = 0;
            recovered.push(record);
        }
        txn.commit().await?;
        Ok(recovered)
    }

    // Request log

    pub async fn insert_request_log(&self, entry: RequestLogEntry) -> Result<(), DbErr> {
        entities::RequestLog::insert(entities::request_log::ActiveModel::from(entry))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn insert_request_logs(&self, entries: Vec<RequestLogEntry>) -> Result<(), DbErr> {
        if entries.is_empty() {
            return Ok(());
        }
        let models = entries
            .into_iter()
            .map(entities::request_log::ActiveModel::from);
        entities::RequestLog::insert_many(models)
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Newest first.
    pub async fn recent_request_logs(&self, limit: u64) -> Result<Vec<RequestLogEntry>, DbErr> {
        use entities::request_log::Column;

        let rows = entities::RequestLog::find()
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id)
            .limit(limit)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(RequestLogEntry::from).collect())
    }
}

/// Flags one expired row as recovered, provided its block is still the one
/// that was read and no sweep has claimed it.
async fn mark_recovered_if_unchanged<C>(
    db: &C,
    id: i64,
    expected_until: OffsetDateTime,
    now: OffsetDateTime,
) -> Result<bool, DbErr>
where
    C: sea_orm::ConnectionTrait,
{
    use entities::provider_blacklist::Column;

    let result = entities::ProviderBlacklist::update_many()
        .col_expr(Column::AutoRecovered, Expr::value(true))
        .col_expr(Column::FailureCount, Expr::value(0))
        .col_expr(Column::UpdatedAt, Expr::value(now))
        .filter(Column::Id.eq(id))
        .filter(Column::AutoRecovered.eq(false))
        .filter(Column::BlacklistedUntil.eq(expected_until))
        .exec(db)
        .await?;
    Ok(result.rows_affected == 1)
}

async fn upsert_setting<C>(db: &C, key: &str, value: &str) -> Result<(), DbErr>
where
    C: sea_orm::ConnectionTrait,
{
    use entities::app_settings::Column;

    let active = entities::app_settings::ActiveModel {
        id: ActiveValue::NotSet,
        key: ActiveValue::Set(key.to_string()),
        value: ActiveValue::Set(value.to_string()),
        updated_at: ActiveValue::Set(OffsetDateTime::now_utc()),
        ..Default::default()
    };
    entities::AppSettings::insert(active)
        .on_conflict(
            OnConflict::column(Column::Key)
                .update_columns([Column::Value, Column::UpdatedAt])
                .to_owned(),
        )
        .exec(db)
        .await?;
    Ok(())
}

async fn run_in_transaction<F>(db: &DatabaseConnection, f: F) -> Result<(), DbErr>
where
    F: for<'c> FnOnce(
            &'c sea_orm::DatabaseTransaction,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<(), DbErr>> + Send + 'c>,
        > + Send,
{
    match db.transaction(f).await {
        Ok(()) => Ok(()),
        Err(sea_orm::TransactionError::Connection(err)) => Err(err),
        Err(sea_orm::TransactionError::Transaction(err)) => Err(err),
    }
}

fn blacklist_active_model(
    record: &BlacklistRecord,
    updated_at: OffsetDateTime,
) -> entities::provider_blacklist::ActiveModel {
    entities::provider_blacklist::ActiveModel {
        id: ActiveValue::NotSet,
        platform: ActiveValue::Set(record.platform.clone()),
        provider_name: ActiveValue::Set(record.provider_name.clone()),
        failure_count: ActiveValue::Set(i32::try_from(record.failure_count).unwrap_or(i32::MAX)),
        blacklist_level: ActiveValue::Set(i32::from(record.blacklist_level)),
        blacklisted_at: ActiveValue::Set(record.blacklisted_at),
        blacklisted_until: ActiveValue::Set(record.blacklisted_until),
        last_failure_at: ActiveValue::Set(record.last_failure_at),
        last_recovered_at: ActiveValue::Set(record.last_recovered_at),
        last_degrade_hour: ActiveValue::Set(record.last_degrade_hour),
        last_failure_window_start: ActiveValue::Set(record.last_failure_window_start),
        auto_recovered: ActiveValue::Set(record.auto_recovered),
        updated_at: ActiveValue::Set(updated_at),
        ..Default::default()
    }
}

impl From<entities::provider_blacklist::Model> for BlacklistRecord {
    fn from(row: entities::provider_blacklist::Model) -> Self {
        let level = row.blacklist_level.clamp(0, i32::from(MAX_BLACKLIST_LEVEL));
        BlacklistRecord {
            platform: row.platform,
            provider_name: row.provider_name,
            failure_count: u32::try_from(row.failure_count).unwrap_or(0),
            blacklist_level: u8::try_from(level).unwrap_or(0),
            blacklisted_at: row.blacklisted_at,
            blacklisted_until: row.blacklisted_until,
            last_failure_at: row.last_failure_at,
            last_recovered_at: row.last_recovered_at,
            last_degrade_hour: row.last_degrade_hour,
            last_failure_window_start: row.last_failure_window_start,
            auto_recovered: row.auto_recovered,
        }
    }
}

impl From<RequestLogEntry> for entities::request_log::ActiveModel {
    fn from(entry: RequestLogEntry) -> Self {
        entities::request_log::ActiveModel {
            id: ActiveValue::NotSet,
            platform: ActiveValue::Set(entry.platform),
            model: ActiveValue::Set(entry.model),
            provider: ActiveValue::Set(entry.provider),
            http_code: ActiveValue::Set(entry.http_code),
            input_tokens: ActiveValue::Set(entry.usage.input_tokens),
            output_tokens: ActiveValue::Set(entry.usage.output_tokens),
            cache_create_tokens: ActiveValue::Set(entry.usage.cache_create_tokens),
            cache_read_tokens: ActiveValue::Set(entry.usage.cache_read_tokens),
            reasoning_tokens: ActiveValue::Set(entry.usage.reasoning_tokens),
            is_stream: ActiveValue::Set(entry.is_stream),
            duration_sec: ActiveValue::Set(entry.duration_sec),
            created_at: ActiveValue::Set(entry.created_at),
        }
    }
}

impl From<entities::request_log::Model> for RequestLogEntry {
    fn from(row: entities::request_log::Model) -> Self {
        RequestLogEntry {
            platform: row.platform,
            model: row.model,
            provider: row.provider,
            http_code: row.http_code,
            usage: TokenUsage {
                input_tokens: row.input_tokens,
                output_tokens: row.output_tokens,
                cache_create_tokens: row.cache_create_tokens,
                cache_read_tokens: row.cache_read_tokens,
                reasoning_tokens: row.reasoning_tokens,
            },
            is_stream: row.is_stream,
            duration_sec: row.duration_sec,
            created_at: row.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    async fn temp_storage() -> RelayStorage {
        let path = std::env::temp_dir().join(format!(
            "cswitch-storage-unit-{}-{:?}.db",
            std::process::id(),
            std::thread::current().id()
        ));
        let _ = std::fs::remove_file(&path);
        let storage = RelayStorage::connect(&format!("sqlite://{}?mode=rwc", path.display()))
            .await
            .unwrap();
        storage.sync().await.unwrap();
        storage
    }

    #[tokio::test]
    async fn reblacklisted_row_is_not_marked_recovered() {
        let storage = temp_storage().await;
        let now = OffsetDateTime::UNIX_EPOCH + Duration::days(20_000);

        let mut record = BlacklistRecord::new("claude", "alpha");
        record.blacklist_level = 1;
        record.blacklisted_until = Some(now - Duration::minutes(1));
        storage.upsert_blacklist(&record).await.unwrap();
        let read = entities::ProviderBlacklist::find()
            .one(&storage.db)
            .await
            .unwrap()
            .unwrap();

        record.blacklist_level = 2;
        record.blacklisted_until = Some(now + Duration::minutes(15));
        storage.upsert_blacklist(&record).await.unwrap();

        let stale_until = read.blacklisted_until.unwrap();
        assert!(
            !mark_recovered_if_unchanged(&storage.db, read.id, stale_until, now)
                .await
                .unwrap()
        );
        let stored = storage.get_blacklist("claude", "alpha").await.unwrap().unwrap();
        assert!(!stored.auto_recovered);
        assert_eq!(stored.blacklist_level, 2);

        let current = stored.blacklisted_until.unwrap();
        let later = current + Duration::seconds(1);
        assert!(
            mark_recovered_if_unchanged(&storage.db, read.id, current, later)
                .await
                .unwrap()
        );
        assert!(
            !mark_recovered_if_unchanged(&storage.db, read.id, current, later)
                .await
                .unwrap()
        );
    }
}
