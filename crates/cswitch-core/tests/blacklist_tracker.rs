use std::sync::Arc;
use std::time::Duration as StdDuration;

use time::{Duration, OffsetDateTime};

use cswitch_common::{Clock, ManualClock};
use cswitch_core::{BlacklistTracker, RecoverySweeper};
use cswitch_provider_core::{FailureOutcome, FallbackMode, IgnoreReason};
use cswitch_storage::RelayStorage;

const PLATFORM: &str = "claude";

async fn temp_storage() -> RelayStorage {
    let path = std::env::temp_dir().join(format!("cswitch-core-{}.db", uuid::Uuid::new_v4()));
    let dsn = format!("sqlite://{}?mode=rwc", path.display());
    let storage = RelayStorage::connect(&dsn).await.unwrap();
    storage.sync().await.unwrap();
    storage.ensure_default_settings().await.unwrap();
    storage
}

fn t0() -> OffsetDateTime {
    OffsetDateTime::UNIX_EPOCH + Duration::days(20_000)
}

async fn setup() -> (Arc<BlacklistTracker>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(t0()));
    let tracker = BlacklistTracker::new(temp_storage().await, clock.clone() as Arc<dyn Clock>);
    (Arc::new(tracker), clock)
}

/// Records `n` failures spaced just outside the default 30s dedupe window.
async fn fail_n(tracker: &BlacklistTracker, clock: &ManualClock, provider: &str, n: usize) -> FailureOutcome {
    let mut last = FailureOutcome::Ignored(IgnoreReason::Disabled);
    for _ in 0..n {
        last = tracker.record_failure(PLATFORM, provider).await.unwrap();
        clock.advance(Duration::seconds(31));
    }
    last
}

#[tokio::test]
async fn third_failure_blacklists() {
    let (tracker, clock) = setup().await;

    assert_eq!(
        fail_n(&tracker, &clock, "alpha", 2).await,
        FailureOutcome::Counted { failure_count: 2 }
    );
    assert!(tracker.is_blacklisted(PLATFORM, "alpha").await.unwrap().is_none());

    let outcome = tracker.record_failure(PLATFORM, "alpha").await.unwrap();
    let FailureOutcome::Blacklisted { level, until, jump_penalty } = outcome else {
        panic!("expected a block, got {outcome:?}");
    };
    assert_eq!(level, 1);
    assert!(!jump_penalty);
    assert_eq!(until, clock.now() + Duration::minutes(5));
    assert_eq!(tracker.is_blacklisted(PLATFORM, "alpha").await.unwrap(), Some(until));

    let record = tracker.storage().get_blacklist(PLATFORM, "alpha").await.unwrap().unwrap();
    assert_eq!(record.failure_count, 0);
    assert_eq!(record.blacklist_level, 1);

    assert_eq!(
        tracker.record_failure(PLATFORM, "alpha").await.unwrap(),
        FailureOutcome::Ignored(IgnoreReason::AlreadyBlacklisted)
    );

    clock.set(until);
    assert!(tracker.is_blacklisted(PLATFORM, "alpha").await.unwrap().is_none());
}

#[tokio::test]
async fn failures_inside_dedupe_window_count_once() {
    let (tracker, clock) = setup().await;
    tracker.record_failure(PLATFORM, "alpha").await.unwrap();
    clock.advance(Duration::seconds(10));
    assert_eq!(
        tracker.record_failure(PLATFORM, "alpha").await.unwrap(),
        FailureOutcome::Ignored(IgnoreReason::Deduplicated)
    );
    let record = tracker.storage().get_blacklist(PLATFORM, "alpha").await.unwrap().unwrap();
    assert_eq!(record.failure_count, 1);
}

#[tokio::test]
async fn relapse_after_recovery_jumps_two_levels() {
    let (tracker, clock) = setup().await;
    fail_n(&tracker, &clock, "alpha", 3).await;
    clock.advance(Duration::minutes(6));
    tracker.record_success(PLATFORM, "alpha").await.unwrap();

    let outcome = fail_n(&tracker, &clock, "alpha", 3).await;
    assert!(matches!(
        outcome,
        FailureOutcome::Blacklisted { level: 3, jump_penalty: true, .. }
    ));
}

#[tokio::test]
async fn failing_again_after_expiry_without_success_escalates_by_one() {
    let (tracker, clock) = setup().await;
    let FailureOutcome::Blacklisted { until, .. } = fail_n(&tracker, &clock, "alpha", 3).await else {
        panic!("expected a block");
    };
    clock.set(until + Duration::minutes(1));

    let outcome = fail_n(&tracker, &clock, "alpha", 3).await;
    assert!(matches!(
        outcome,
        FailureOutcome::Blacklisted { level: 2, jump_penalty: false, .. }
    ));
    let record = tracker.storage().get_blacklist(PLATFORM, "alpha").await.unwrap().unwrap();
    assert_eq!(record.last_recovered_at, None);
    assert_eq!(record.blacklist_level, 2);
}

#[tokio::test]
async fn long_stable_period_forgives_high_levels() {
    let (tracker, clock) = setup().await;
    fail_n(&tracker, &clock, "alpha", 3).await;
    clock.advance(Duration::minutes(6));
    tracker.record_success(PLATFORM, "alpha").await.unwrap();
    fail_n(&tracker, &clock, "alpha", 3).await;

    clock.advance(Duration::minutes(61));
    let recovered = tracker.record_success(PLATFORM, "alpha").await.unwrap().unwrap();
    assert!(recovered.recovered);
    assert_eq!(recovered.level_after, 3);

    clock.advance(Duration::hours(3) + Duration::seconds(1));
    let forgiven = tracker.record_success(PLATFORM, "alpha").await.unwrap().unwrap();
    assert!(forgiven.forgiven);
    let record = tracker.storage().get_blacklist(PLATFORM, "alpha").await.unwrap().unwrap();
    assert_eq!(record.blacklist_level, 0);
}

#[tokio::test]
async fn degrade_applies_once_per_elapsed_hour() {
    let (tracker, clock) = setup().await;
    fail_n(&tracker, &clock, "alpha", 3).await;
    clock.advance(Duration::minutes(6));
    tracker.record_success(PLATFORM, "alpha").await.unwrap();
    fail_n(&tracker, &clock, "alpha", 3).await;
    clock.advance(Duration::minutes(61));
    tracker.record_success(PLATFORM, "alpha").await.unwrap();

    clock.advance(Duration::hours(1) + Duration::seconds(1));
    let first = tracker.record_success(PLATFORM, "alpha").await.unwrap().unwrap();
    assert_eq!(first.level_after, 2);

    clock.advance(Duration::minutes(20));
    let again = tracker.record_success(PLATFORM, "alpha").await.unwrap().unwrap();
    assert_eq!(again.level_after, 2);

    clock.advance(Duration::minutes(40));
    let next_hour = tracker.record_success(PLATFORM, "alpha").await.unwrap().unwrap();
    assert_eq!(next_hour.level_after, 1);
}

#[tokio::test]
async fn success_without_record_is_a_noop() {
    let (tracker, _clock) = setup().await;
    assert!(tracker.record_success(PLATFORM, "ghost").await.unwrap().is_none());
    assert!(tracker.storage().get_blacklist(PLATFORM, "ghost").await.unwrap().is_none());
}

#[tokio::test]
async fn disabled_feature_ignores_failures_and_blocks() {
    let (tracker, clock) = setup().await;
    fail_n(&tracker, &clock, "alpha", 3).await;
    assert!(tracker.is_blacklisted(PLATFORM, "alpha").await.unwrap().is_some());

    tracker.storage().set_blacklist_enabled(false).await.unwrap();
    assert!(tracker.is_blacklisted(PLATFORM, "alpha").await.unwrap().is_none());
    assert!(tracker.blacklisted_providers(PLATFORM).await.unwrap().is_empty());
    assert_eq!(
        tracker.record_failure(PLATFORM, "beta").await.unwrap(),
        FailureOutcome::Ignored(IgnoreReason::Disabled)
    );
    assert!(tracker.storage().get_blacklist(PLATFORM, "beta").await.unwrap().is_none());
}

#[tokio::test]
async fn fixed_mode_uses_settings_threshold_and_duration() {
    let (tracker, clock) = setup().await;
    let storage = tracker.storage();
    let mut levels = storage.load_level_config().await.unwrap();
    levels.enable_level_blacklist = false;
    storage.save_level_config(&levels).await.unwrap();
    storage.save_fixed_blacklist_settings(2, 15).await.unwrap();

    tracker.record_failure(PLATFORM, "alpha").await.unwrap();
    let outcome = tracker.record_failure(PLATFORM, "alpha").await.unwrap();
    assert_eq!(
        outcome,
        FailureOutcome::Blacklisted {
            level: 0,
            until: clock.now() + Duration::minutes(15),
            jump_penalty: false
        }
    );

    levels.fallback_mode = FallbackMode::None;
    storage.save_level_config(&levels).await.unwrap();
    assert_eq!(
        tracker.record_failure(PLATFORM, "beta").await.unwrap(),
        FailureOutcome::Ignored(IgnoreReason::Disabled)
    );
}

#[tokio::test]
async fn manual_operations() {
    let (tracker, clock) = setup().await;
    assert!(!tracker.manual_unblock_and_reset(PLATFORM, "ghost").await.unwrap());
    assert!(!tracker.manual_reset_level(PLATFORM, "ghost").await.unwrap());

    fail_n(&tracker, &clock, "alpha", 3).await;
    assert!(tracker.manual_reset_level(PLATFORM, "alpha").await.unwrap());
    let record = tracker.storage().get_blacklist(PLATFORM, "alpha").await.unwrap().unwrap();
    assert_eq!(record.blacklist_level, 0);
    assert!(tracker.is_blacklisted(PLATFORM, "alpha").await.unwrap().is_some());

    assert!(tracker.manual_unblock_and_reset(PLATFORM, "alpha").await.unwrap());
    assert!(tracker.is_blacklisted(PLATFORM, "alpha").await.unwrap().is_none());

    let status = tracker.status(PLATFORM).await.unwrap();
    assert_eq!(status.len(), 1);
    assert!(!status[0].is_blacklisted);
    assert_eq!(status[0].failure_count, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_failures_are_not_lost() {
    let (tracker, _clock) = setup().await;
    let storage = tracker.storage();
    let mut levels = storage.load_level_config().await.unwrap();
    levels.dedupe_window_seconds = 0;
    levels.failure_threshold = 50;
    storage.save_level_config(&levels).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let tracker = tracker.clone();
        handles.push(tokio::spawn(async move {
            tracker.record_failure(PLATFORM, "alpha").await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let record = storage.get_blacklist(PLATFORM, "alpha").await.unwrap().unwrap();
    assert_eq!(record.failure_count, 8);
}

#[tokio::test]
async fn sweeper_marks_expired_blocks_and_stops() {
    let (tracker, clock) = setup().await;
    fail_n(&tracker, &clock, "alpha", 3).await;
    clock.advance(Duration::minutes(10));

    let sweeper = RecoverySweeper::spawn(tracker.clone(), StdDuration::from_millis(10));
    let mut recovered = false;
    for _ in 0..200 {
        let record = tracker.storage().get_blacklist(PLATFORM, "alpha").await.unwrap().unwrap();
        if record.auto_recovered {
            recovered = true;
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
    sweeper.stop().await;
    assert!(recovered);
}
