//! Persisted reliability tracking per (platform, provider).
//!
//! Transitions are the pure functions of `cswitch_provider_core::reliability`;
//! this module loads the row, applies one transition and writes it back while
//! holding a lock keyed by the pair, so concurrent outcomes for the same
//! provider never lose an update. Unrelated providers do not contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use time::OffsetDateTime;
use tokio::sync::Mutex as AsyncMutex;

use cswitch_common::Clock;
use cswitch_provider_core::{
    BlacklistPolicy, BlacklistRecord, BlacklistStatus, FailureOutcome, IgnoreReason,
    SuccessOutcome, apply_failure, apply_level_reset, apply_manual_reset, apply_success,
};
use cswitch_storage::{DbErr, RelayStorage};

type PairKey = (String, String);

pub struct BlacklistTracker {
    storage: RelayStorage,
    clock: Arc<dyn Clock>,
    locks: Mutex<HashMap<PairKey, Arc<AsyncMutex<()>>>>,
}

impl BlacklistTracker {
    pub fn new(storage: RelayStorage, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            clock,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn storage(&self) -> &RelayStorage {
        &self.storage
    }

    pub fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    pub async fn policy(&self) -> Result<BlacklistPolicy, DbErr> {
        self.storage.load_blacklist_policy().await
    }

    fn lock_for(&self, platform: &str, provider: &str) -> Arc<AsyncMutex<()>> {
        let key = (platform.to_string(), provider.to_string());
        let mut guard = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.entry(key).or_default().clone()
    }

    pub async fn record_failure(
        &self,
        platform: &str,
        provider: &str,
    ) -> Result<FailureOutcome, DbErr> {
        let policy = self.policy().await?;
        if !policy.enabled {
            return Ok(FailureOutcome::Ignored(IgnoreReason::Disabled));
        }

        let lock = self.lock_for(platform, provider);
        let _guard = lock.lock().await;

        let mut record = self
            .storage
            .get_blacklist(platform, provider)
            .await?
            .unwrap_or_else(|| BlacklistRecord::new(platform, provider));
        let now = self.clock.now();
        let outcome = apply_failure(&mut record, &policy, now);
        if outcome.is_mutation() {
            self.storage.upsert_blacklist(&record).await?;
        }

        match outcome {
            FailureOutcome::Blacklisted {
                level,
                until,
                jump_penalty,
            } => tracing::warn!(
                event = "blacklist.blocked",
                platform,
                provider,
                blacklist_level = level,
                until = %until,
                jump_penalty,
            ),
            FailureOutcome::Counted { failure_count } => tracing::info!(
                event = "blacklist.failure_counted",
                platform,
                provider,
                failure_count,
            ),
            FailureOutcome::Ignored(reason) => tracing::debug!(
                event = "blacklist.failure_ignored",
                platform,
                provider,
                reason = ?reason,
            ),
        }
        Ok(outcome)
    }

    /// Returns `None` when the pair has no record yet.
    pub async fn record_success(
        &self,
        platform: &str,
        provider: &str,
    ) -> Result<Option<SuccessOutcome>, DbErr> {
        let lock = self.lock_for(platform, provider);
        let _guard = lock.lock().await;

        let Some(mut record) = self.storage.get_blacklist(platform, provider).await? else {
            return Ok(None);
        };
        let policy = self.policy().await?;
        let before = record.clone();
        let outcome = apply_success(&mut record, &policy, self.clock.now());
        if record != before {
            self.storage.upsert_blacklist(&record).await?;
        }

        if outcome.forgiven {
            tracing::info!(
                event = "blacklist.forgiven",
                platform,
                provider,
                level_before = outcome.level_before,
            );
        } else if outcome.level_after < outcome.level_before {
            tracing::info!(
                event = "blacklist.degraded",
                platform,
                provider,
                level_before = outcome.level_before,
                level_after = outcome.level_after,
            );
        }
        Ok(Some(outcome))
    }

    /// End of the active block, if any. Always `None` while the feature is off.
    pub async fn is_blacklisted(
        &self,
        platform: &str,
        provider: &str,
    ) -> Result<Option<OffsetDateTime>, DbErr> {
        if !self.policy().await?.enabled {
            return Ok(None);
        }
        let now = self.clock.now();
        Ok(self
            .storage
            .get_blacklist(platform, provider)
            .await?
            .filter(|record| record.is_blacklisted_at(now))
            .and_then(|record| record.blacklisted_until))
    }

    /// Active blocks of one platform, keyed by provider name.
    pub async fn blacklisted_providers(
        &self,
        platform: &str,
    ) -> Result<HashMap<String, OffsetDateTime>, DbErr> {
        if !self.policy().await?.enabled {
            return Ok(HashMap::new());
        }
        let now = self.clock.now();
        Ok(self
            .storage
            .list_blacklist(platform)
            .await?
            .into_iter()
            .filter(|record| record.is_blacklisted_at(now))
            .filter_map(|record| {
                record
                    .blacklisted_until
                    .map(|until| (record.provider_name, until))
            })
            .collect())
    }

    /// Bookkeeping sweep; returns how many rows were marked recovered.
    pub async fn auto_recover_expired(&self) -> Result<usize, DbErr> {
        let recovered = self.storage.recover_expired(self.clock.now()).await?;
        for record in &recovered {
            tracing::info!(
                event = "blacklist.auto_recovered",
                platform = %record.platform,
                provider = %record.provider_name,
                blacklist_level = record.blacklist_level,
            );
        }
        Ok(recovered.len())
    }

    /// Clears the block, the counters and the level. `false` when no row exists.
    pub async fn manual_unblock_and_reset(
        &self,
        platform: &str,
        provider: &str,
    ) -> Result<bool, DbErr> {
        let lock = self.lock_for(platform, provider);
        let _guard = lock.lock().await;

        let Some(mut record) = self.storage.get_blacklist(platform, provider).await? else {
            return Ok(false);
        };
        apply_manual_reset(&mut record, self.clock.now());
        self.storage.upsert_blacklist(&record).await?;
        tracing::info!(event = "blacklist.manual_reset", platform, provider);
        Ok(true)
    }

    /// Resets the level only. `false` when no row exists.
    pub async fn manual_reset_level(&self, platform: &str, provider: &str) -> Result<bool, DbErr> {
        let lock = self.lock_for(platform, provider);
        let _guard = lock.lock().await;

        let Some(mut record) = self.storage.get_blacklist(platform, provider).await? else {
            return Ok(false);
        };
        apply_level_reset(&mut record);
        self.storage.upsert_blacklist(&record).await?;
        tracing::info!(event = "blacklist.level_reset", platform, provider);
        Ok(true)
    }

    pub async fn status(&self, platform: &str) -> Result<Vec<BlacklistStatus>, DbErr> {
        let policy = self.policy().await?;
        let now = self.clock.now();
        Ok(self
            .storage
            .list_blacklist(platform)
            .await?
            .iter()
            .map(|record| BlacklistStatus::from_record(record, &policy.levels, now))
            .collect())
    }
}
