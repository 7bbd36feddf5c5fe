//! Per-(platform, provider) reliability state machine.
//!
//! Everything here is pure: callers load a [`BlacklistRecord`], apply a
//! transition with an explicit `now`, and persist the result.

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

pub const MAX_BLACKLIST_LEVEL: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FallbackMode {
    /// N strikes, then block for a fixed duration.
    #[default]
    Fixed,
    /// Never blacklist while the level system is off.
    None,
}

/// Tunables of the level-based blacklist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlacklistLevelConfig {
    pub enable_level_blacklist: bool,
    pub failure_threshold: u32,
    pub dedupe_window_seconds: i64,
    pub normal_degrade_interval_hours: f64,
    pub forgiveness_hours: f64,
    pub jump_penalty_window_hours: f64,
    pub l1_duration_minutes: i64,
    pub l2_duration_minutes: i64,
    pub l3_duration_minutes: i64,
    pub l4_duration_minutes: i64,
    pub l5_duration_minutes: i64,
    pub fallback_mode: FallbackMode,
}

impl Default for BlacklistLevelConfig {
    fn default() -> Self {
        Self {
            enable_level_blacklist: true,
            failure_threshold: 3,
            dedupe_window_seconds: 30,
            normal_degrade_interval_hours: 1.0,
            forgiveness_hours: 3.0,
            jump_penalty_window_hours: 2.5,
            l1_duration_minutes: 5,
            l2_duration_minutes: 15,
            l3_duration_minutes: 60,
            l4_duration_minutes: 360,
            l5_duration_minutes: 1440,
            fallback_mode: FallbackMode::Fixed,
        }
    }
}

impl BlacklistLevelConfig {
    pub fn duration_for_level(&self, level: u8) -> Duration {
        let minutes = match level {
            0 | 1 => self.l1_duration_minutes,
            2 => self.l2_duration_minutes,
            3 => self.l3_duration_minutes,
            4 => self.l4_duration_minutes,
            _ => self.l5_duration_minutes,
        };
        Duration::minutes(minutes.max(0))
    }

    fn degrade_interval(&self) -> Duration {
        hours(self.normal_degrade_interval_hours)
    }
}

/// Complete policy consulted by every transition, assembled from settings.
#[derive(Debug, Clone, PartialEq)]
pub struct BlacklistPolicy {
    /// Global switch; when off nothing is ever blacklisted.
    pub enabled: bool,
    pub levels: BlacklistLevelConfig,
    pub fixed_failure_threshold: u32,
    pub fixed_duration_minutes: i64,
}

impl Default for BlacklistPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            levels: BlacklistLevelConfig::default(),
            fixed_failure_threshold: 3,
            fixed_duration_minutes: 30,
        }
    }
}

/// Durable reliability state of one (platform, provider) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlacklistRecord {
    pub platform: String,
    pub provider_name: String,
    pub failure_count: u32,
    pub blacklist_level: u8,
    #[serde(with = "time::serde::rfc3339::option")]
    pub blacklisted_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub blacklisted_until: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_failure_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_recovered_at: Option<OffsetDateTime>,
    pub last_degrade_hour: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_failure_window_start: Option<OffsetDateTime>,
    pub auto_recovered: bool,
}

impl BlacklistRecord {
    pub fn new(platform: impl Into<String>, provider_name: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            provider_name: provider_name.into(),
            failure_count: 0,
            blacklist_level: 0,
            blacklisted_at: None,
            blacklisted_until: None,
            last_failure_at: None,
            last_recovered_at: None,
            last_degrade_hour: 0,
            last_failure_window_start: None,
            auto_recovered: false,
        }
    }

    /// Active block ends strictly after `now`.
    pub fn is_blacklisted_at(&self, now: OffsetDateTime) -> bool {
        self.blacklisted_until.is_some_and(|until| until > now)
    }

    /// A block period has ended and no success has been observed since.
    fn pending_recovery(&self, now: OffsetDateTime) -> bool {
        match self.blacklisted_until {
            Some(until) if until <= now => self.last_recovered_at.is_none_or(|at| at < until),
            _ => false,
        }
    }

    /// Most recent moment the provider came back from a block, counting an
    /// expired block that no success has observed yet.
    fn observed_recovery(&self, now: OffsetDateTime) -> Option<OffsetDateTime> {
        if self.pending_recovery(now) {
            return self.blacklisted_until;
        }
        self.last_recovered_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    Disabled,
    AlreadyBlacklisted,
    Deduplicated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    Ignored(IgnoreReason),
    Counted {
        failure_count: u32,
    },
    Blacklisted {
        level: u8,
        until: OffsetDateTime,
        jump_penalty: bool,
    },
}

impl FailureOutcome {
    /// Whether the record changed and must be persisted.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, FailureOutcome::Ignored(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SuccessOutcome {
    pub recovered: bool,
    pub forgiven: bool,
    pub level_before: u8,
    pub level_after: u8,
}

pub fn apply_failure(
    record: &mut BlacklistRecord,
    policy: &BlacklistPolicy,
    now: OffsetDateTime,
) -> FailureOutcome {
    if !policy.enabled {
        return FailureOutcome::Ignored(IgnoreReason::Disabled);
    }
    if !policy.levels.enable_level_blacklist {
        return apply_fixed_failure(record, policy, now);
    }
    if record.is_blacklisted_at(now) {
        return FailureOutcome::Ignored(IgnoreReason::AlreadyBlacklisted);
    }
    let dedupe = Duration::seconds(policy.levels.dedupe_window_seconds.max(0));
    if let Some(anchor) = record.last_failure_window_start
        && now - anchor < dedupe
    {
        return FailureOutcome::Ignored(IgnoreReason::Deduplicated);
    }

    record.failure_count += 1;
    record.last_failure_at = Some(now);
    record.last_failure_window_start = Some(now);

    if record.failure_count < policy.levels.failure_threshold.max(1) {
        return FailureOutcome::Counted {
            failure_count: record.failure_count,
        };
    }

    let jump_window = hours(policy.levels.jump_penalty_window_hours);
    let jump_penalty = record
        .last_recovered_at
        .is_some_and(|recovered| now - recovered <= jump_window);
    let step = if jump_penalty { 2 } else { 1 };
    let level = record.blacklist_level.saturating_add(step).min(MAX_BLACKLIST_LEVEL);
    let until = now + policy.levels.duration_for_level(level);

    record.blacklist_level = level;
    record.blacklisted_at = Some(now);
    record.blacklisted_until = Some(until);
    record.failure_count = 0;
    record.auto_recovered = false;

    FailureOutcome::Blacklisted {
        level,
        until,
        jump_penalty,
    }
}

fn apply_fixed_failure(
    record: &mut BlacklistRecord,
    policy: &BlacklistPolicy,
    now: OffsetDateTime,
) -> FailureOutcome {
    if policy.levels.fallback_mode == FallbackMode::None {
        return FailureOutcome::Ignored(IgnoreReason::Disabled);
    }
    if record.is_blacklisted_at(now) {
        return FailureOutcome::Ignored(IgnoreReason::AlreadyBlacklisted);
    }

    record.failure_count += 1;
    record.last_failure_at = Some(now);

    if record.failure_count < policy.fixed_failure_threshold.max(1) {
        return FailureOutcome::Counted {
            failure_count: record.failure_count,
        };
    }

    let until = now + Duration::minutes(policy.fixed_duration_minutes.max(0));
    record.blacklisted_at = Some(now);
    record.blacklisted_until = Some(until);
    record.auto_recovered = false;

    FailureOutcome::Blacklisted {
        level: record.blacklist_level,
        until,
        jump_penalty: false,
    }
}

pub fn apply_success(
    record: &mut BlacklistRecord,
    policy: &BlacklistPolicy,
    now: OffsetDateTime,
) -> SuccessOutcome {
    let mut outcome = SuccessOutcome {
        level_before: record.blacklist_level,
        level_after: record.blacklist_level,
        ..Default::default()
    };

    if !policy.levels.enable_level_blacklist {
        record.failure_count = 0;
        return outcome;
    }

    if record.pending_recovery(now) {
        record.last_recovered_at = Some(now);
        record.last_degrade_hour = 0;
        outcome.recovered = true;
    }

    if let Some(recovered_at) = record.last_recovered_at
        && record.blacklist_level > 0
        && !record.is_blacklisted_at(now)
    {
        let elapsed = now - recovered_at;
        if elapsed >= hours(policy.levels.forgiveness_hours) && record.blacklist_level >= 3 {
            record.blacklist_level = 0;
            record.last_degrade_hour = 0;
            outcome.forgiven = true;
        } else {
            let interval = policy.levels.degrade_interval();
            if interval > Duration::ZERO {
                let elapsed_units =
                    (elapsed.whole_seconds() / interval.whole_seconds().max(1)).max(0);
                if elapsed_units > record.last_degrade_hour {
                    let steps = (elapsed_units - record.last_degrade_hour).min(i64::from(u8::MAX));
                    record.blacklist_level = record.blacklist_level.saturating_sub(steps as u8);
                    record.last_degrade_hour = elapsed_units;
                }
            }
        }
    }

    record.failure_count = 0;
    outcome.level_after = record.blacklist_level;
    outcome
}

/// Manual full reset: unblock, zero counters and level, stamp recovery.
pub fn apply_manual_reset(record: &mut BlacklistRecord, now: OffsetDateTime) {
    record.blacklisted_at = None;
    record.blacklisted_until = None;
    record.failure_count = 0;
    record.blacklist_level = 0;
    record.last_recovered_at = Some(now);
    record.last_degrade_hour = 0;
    record.auto_recovered = false;
}

/// Manual level-only reset. An active block stays in place.
pub fn apply_level_reset(record: &mut BlacklistRecord) {
    record.blacklist_level = 0;
    record.last_degrade_hour = 0;
}

fn hours(value: f64) -> Duration {
    if !value.is_finite() || value <= 0.0 {
        return Duration::ZERO;
    }
    Duration::seconds_f64(value * 3600.0)
}

/// Operator-facing view of one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlacklistStatus {
    pub platform: String,
    pub provider_name: String,
    pub blacklist_level: u8,
    pub failure_count: u32,
    pub is_blacklisted: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub blacklisted_until: Option<OffsetDateTime>,
    pub remaining_seconds: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_recovered_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_failure_at: Option<OffsetDateTime>,
    /// Seconds until a success would trigger forgiveness, when it applies.
    pub forgiveness_remaining_seconds: Option<i64>,
}

impl BlacklistStatus {
    pub fn from_record(
        record: &BlacklistRecord,
        levels: &BlacklistLevelConfig,
        now: OffsetDateTime,
    ) -> Self {
        let is_blacklisted = record.is_blacklisted_at(now);
        let remaining_seconds = match record.blacklisted_until {
            Some(until) if is_blacklisted => (until - now).whole_seconds(),
            _ => 0,
        };
        let forgiveness_remaining_seconds = match record.observed_recovery(now) {
            Some(recovered) if record.blacklist_level >= 3 && !is_blacklisted => {
                let left = hours(levels.forgiveness_hours) - (now - recovered);
                Some(left.whole_seconds().max(0))
            }
            _ => None,
        };
        Self {
            platform: record.platform.clone(),
            provider_name: record.provider_name.clone(),
            blacklist_level: record.blacklist_level,
            failure_count: record.failure_count,
            is_blacklisted,
            blacklisted_until: record.blacklisted_until,
            remaining_seconds,
            last_recovered_at: record.last_recovered_at,
            last_failure_at: record.last_failure_at,
            forgiveness_remaining_seconds,
        }
    }
}
