use chrono::{TimeDelta, TimeZone};

use super::*;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
}

fn hourly(capacity: u64) -> SourcePolicy {
    SourcePolicy {
        capacity,
        reset_window: Duration::from_secs(3_600),
    }
}

fn coordinator(capacity: u64, credentials: Vec<Credential>) -> AccessCoordinator {
    let coord = AccessCoordinator::new(AccessPolicy::default());
    coord.register_source(SourcePlatform::Video, &hourly(capacity), credentials, t0());
    coord
}

fn granted(acq: Acquisition) -> Grant {
    match acq {
        Acquisition::Granted(g) => g,
        Acquisition::Wait { retry_after, reason } => {
            panic!("expected grant, got wait {retry_after:?} ({reason})")
        }
    }
}

#[test]
fn safety_margin_caps_grants_per_window() {
    let coord = coordinator(100, vec![Credential::api_key("key-one")]);
    for i in 0..19 {
        let acq = coord.acquire_at(SourcePlatform::Video, 5, t0()).unwrap();
        assert!(
            matches!(acq, Acquisition::Granted(_)),
            "grant {} should succeed",
            i + 1
        );
    }
    let twentieth = coord.acquire_at(SourcePlatform::Video, 5, t0()).unwrap();
    assert_eq!(
        twentieth,
        Acquisition::Wait {
            retry_after: Duration::from_secs(3_600),
            reason: WaitReason::QuotaExhausted,
        }
    );
    assert_eq!(
        coord.remaining_quota_at(SourcePlatform::Video, t0()).unwrap(),
        0
    );
}

#[test]
fn budget_returns_after_window_reset() {
    let coord = coordinator(100, vec![Credential::api_key("key-one")]);
    for _ in 0..19 {
        granted(coord.acquire_at(SourcePlatform::Video, 5, t0()).unwrap());
    }
    let later = t0() + TimeDelta::minutes(61);
    let grant = granted(coord.acquire_at(SourcePlatform::Video, 5, later).unwrap());
    assert_eq!(grant.window_start, t0() + TimeDelta::hours(1));
    assert_eq!(
        coord.remaining_quota_at(SourcePlatform::Video, later).unwrap(),
        90
    );
}

#[test]
fn unknown_source_is_rejected() {
    let coord = coordinator(100, vec![]);
    let err = coord
        .acquire_at(SourcePlatform::Marketplace, 1, t0())
        .unwrap_err();
    assert!(matches!(
        err,
        AccessError::UnknownSource(SourcePlatform::Marketplace)
    ));
}

#[test]
fn cost_above_effective_capacity_is_rejected() {
    let coord = coordinator(100, vec![]);
    let err = coord.acquire_at(SourcePlatform::Video, 96, t0()).unwrap_err();
    assert!(matches!(
        err,
        AccessError::CostExceedsCapacity {
            cost: 96,
            max_capacity: 95,
            ..
        }
    ));
}

#[test]
fn empty_credential_list_registers_direct_connection() {
    let coord = coordinator(10, vec![]);
    let budgets = coord.budgets_at(SourcePlatform::Video, t0()).unwrap();
    assert_eq!(budgets.len(), 1);
    assert_eq!(budgets[0].kind, CredentialKind::Direct);
    assert_eq!(budgets[0].capacity, 9);
}

#[test]
fn least_recently_used_credential_is_chosen() {
    let coord = coordinator(
        100,
        vec![Credential::api_key("key-aaaa"), Credential::api_key("key-bbbb")],
    );
    let first = granted(coord.acquire_at(SourcePlatform::Video, 1, t0()).unwrap());
    let second = granted(coord.acquire_at(SourcePlatform::Video, 1, t0()).unwrap());
    let third = granted(coord.acquire_at(SourcePlatform::Video, 1, t0()).unwrap());
    assert_eq!(first.credential.identifier, "key-aaaa");
    assert_eq!(second.credential.identifier, "key-bbbb");
    assert_eq!(third.credential.identifier, "key-aaaa");
    assert_eq!(first.attempt, 1);
}

#[test]
fn cancelled_grant_is_refunded_within_its_window() {
    let coord = coordinator(100, vec![Credential::api_key("key-one")]);
    let grant = granted(coord.acquire_at(SourcePlatform::Video, 10, t0()).unwrap());
    assert_eq!(
        coord.remaining_quota_at(SourcePlatform::Video, t0()).unwrap(),
        85
    );
    let action = coord
        .report_outcome_at(&grant, Outcome::Cancelled, t0())
        .unwrap();
    assert_eq!(action, OutcomeAction::Done);
    assert_eq!(
        coord.remaining_quota_at(SourcePlatform::Video, t0()).unwrap(),
        95
    );
}

#[test]
fn cancelled_grant_from_previous_window_is_not_refunded() {
    let coord = coordinator(100, vec![Credential::api_key("key-one")]);
    let grant = granted(coord.acquire_at(SourcePlatform::Video, 10, t0()).unwrap());
    let later = t0() + TimeDelta::minutes(65);
    granted(coord.acquire_at(SourcePlatform::Video, 10, later).unwrap());
    coord
        .report_outcome_at(&grant, Outcome::Cancelled, later)
        .unwrap();
    assert_eq!(
        coord.remaining_quota_at(SourcePlatform::Video, later).unwrap(),
        85
    );
}

#[test]
fn rate_limited_credential_is_exhausted_and_others_still_serve() {
    let coord = coordinator(
        100,
        vec![Credential::api_key("key-aaaa"), Credential::api_key("key-bbbb")],
    );
    let grant = granted(coord.acquire_at(SourcePlatform::Video, 1, t0()).unwrap());
    let action = coord
        .report_outcome_at(&grant, Outcome::RateLimited, t0())
        .unwrap();
    assert_eq!(action, OutcomeAction::Reacquire);

    let retry = granted(coord.retry_at(&grant, t0()).unwrap());
    assert_eq!(retry.credential.identifier, "key-bbbb");
    assert_eq!(retry.attempt, 2);

    let budgets = coord.budgets_at(SourcePlatform::Video, t0()).unwrap();
    assert_eq!(budgets[0].status, CredentialStatus::Exhausted);
    assert_eq!(budgets[1].status, CredentialStatus::Active);

    let after_reset = t0() + TimeDelta::hours(1);
    let budgets = coord.budgets_at(SourcePlatform::Video, after_reset).unwrap();
    assert_eq!(budgets[0].status, CredentialStatus::Active);
}

#[test]
fn blocked_call_is_retried_through_a_different_proxy() {
    let coord = AccessCoordinator::new(AccessPolicy::default());
    coord.register_source(
        SourcePlatform::Marketplace,
        &hourly(60),
        vec![
            Credential::proxy("http://proxy-a:8080"),
            Credential::proxy("http://proxy-b:8080"),
        ],
        t0(),
    );
    let grant = granted(coord.acquire_at(SourcePlatform::Marketplace, 1, t0()).unwrap());
    let action = coord
        .report_outcome_at(&grant, Outcome::Blocked, t0())
        .unwrap();
    let OutcomeAction::RetryWith(fresh) = action else {
        panic!("expected a fresh grant, got {action:?}");
    };
    assert_ne!(fresh.credential, grant.credential);
    assert_eq!(fresh.credential.identifier, "http://proxy-b:8080");
}

#[test]
fn blocked_with_no_alternative_inside_budget_fails() {
    let coord = AccessCoordinator::new(AccessPolicy::default());
    coord.register_source(
        SourcePlatform::Marketplace,
        &hourly(60),
        vec![Credential::proxy("http://proxy-a:8080")],
        t0(),
    );
    let grant = granted(coord.acquire_at(SourcePlatform::Marketplace, 1, t0()).unwrap());
    let err = coord
        .report_outcome_at(&grant, Outcome::Blocked, t0())
        .unwrap_err();
    assert!(matches!(
        err,
        AccessError::Blocked {
            platform: SourcePlatform::Marketplace
        }
    ));
}

#[test]
fn blocked_with_short_cooldown_returns_bounded_wait() {
    let policy = AccessPolicy {
        block_cooldown: Duration::from_secs(3),
        ..AccessPolicy::default()
    };
    let coord = AccessCoordinator::new(policy);
    coord.register_source(
        SourcePlatform::ShortVideo,
        &hourly(60),
        vec![Credential::proxy("http://proxy-a:8080")],
        t0(),
    );
    let grant = granted(coord.acquire_at(SourcePlatform::ShortVideo, 1, t0()).unwrap());
    let action = coord
        .report_outcome_at(&grant, Outcome::Blocked, t0())
        .unwrap();
    assert_eq!(action, OutcomeAction::RetryAfter(Duration::from_secs(3)));

    let still_blocked = coord
        .acquire_at(SourcePlatform::ShortVideo, 1, t0() + TimeDelta::seconds(2))
        .unwrap();
    assert!(matches!(
        still_blocked,
        Acquisition::Wait {
            reason: WaitReason::Blocked,
            ..
        }
    ));
    granted(
        coord
            .acquire_at(SourcePlatform::ShortVideo, 1, t0() + TimeDelta::seconds(3))
            .unwrap(),
    );
}

#[test]
fn network_error_backs_off_with_jitter() {
    let coord = coordinator(100, vec![Credential::api_key("key-one")]);
    let grant = granted(coord.acquire_at(SourcePlatform::Video, 1, t0()).unwrap());
    let action = coord
        .report_outcome_at(&grant, Outcome::NetworkError, t0())
        .unwrap();
    let OutcomeAction::RetryAfter(delay) = action else {
        panic!("expected back-off, got {action:?}");
    };
    assert!(delay >= Duration::from_millis(375) && delay < Duration::from_millis(625));

    let budgets = coord.budgets_at(SourcePlatform::Video, t0()).unwrap();
    assert_eq!(budgets[0].status, CredentialStatus::CoolingDown);

    let wait = coord.retry_at(&grant, t0()).unwrap();
    assert!(matches!(
        wait,
        Acquisition::Wait {
            reason: WaitReason::CoolingDown,
            ..
        }
    ));
    let after = t0() + TimeDelta::seconds(1);
    let retry = granted(coord.retry_at(&grant, after).unwrap());
    assert_eq!(retry.attempt, 2);
}

#[test]
fn network_error_on_final_attempt_is_source_unavailable() {
    let coord = coordinator(100, vec![Credential::api_key("key-one")]);
    let mut grant = granted(coord.acquire_at(SourcePlatform::Video, 1, t0()).unwrap());
    grant.network_failures = 2;
    let err = coord
        .report_outcome_at(&grant, Outcome::NetworkError, t0())
        .unwrap_err();
    assert!(matches!(
        err,
        AccessError::SourceUnavailable {
            platform: SourcePlatform::Video,
            attempts: 3
        }
    ));
}

#[test]
fn proxy_rotations_do_not_spend_network_attempts() {
    let coord = AccessCoordinator::new(AccessPolicy::default());
    coord.register_source(
        SourcePlatform::Marketplace,
        &hourly(60),
        vec![
            Credential::proxy("http://proxy-a:8080"),
            Credential::proxy("http://proxy-b:8080"),
            Credential::proxy("http://proxy-c:8080"),
        ],
        t0(),
    );
    let first = granted(coord.acquire_at(SourcePlatform::Marketplace, 1, t0()).unwrap());
    let OutcomeAction::RetryWith(second) = coord
        .report_outcome_at(&first, Outcome::Blocked, t0())
        .unwrap()
    else {
        panic!("expected rotation after first block");
    };
    let OutcomeAction::RetryWith(third) = coord
        .report_outcome_at(&second, Outcome::Blocked, t0())
        .unwrap()
    else {
        panic!("expected rotation after second block");
    };
    assert_eq!(third.attempt, 3);
    assert_eq!(third.network_failures, 0);

    let action = coord
        .report_outcome_at(&third, Outcome::NetworkError, t0())
        .unwrap();
    assert!(matches!(action, OutcomeAction::RetryAfter(_)));

    let later = t0() + TimeDelta::seconds(5);
    let retry = granted(coord.retry_at(&third.with_network_failure(), later).unwrap());
    assert_eq!(retry.attempt, 4);
    assert_eq!(retry.network_failures, 1);
}

#[test]
fn success_leaves_credential_active() {
    let coord = coordinator(100, vec![Credential::api_key("key-one")]);
    let grant = granted(coord.acquire_at(SourcePlatform::Video, 1, t0()).unwrap());
    coord
        .report_outcome_at(&grant, Outcome::NetworkError, t0())
        .unwrap();
    let later = t0() + TimeDelta::seconds(5);
    let retry = granted(coord.retry_at(&grant.with_network_failure(), later).unwrap());
    let action = coord
        .report_outcome_at(&retry, Outcome::Success, later)
        .unwrap();
    assert_eq!(action, OutcomeAction::Done);
    let budgets = coord.budgets_at(SourcePlatform::Video, later).unwrap();
    assert_eq!(budgets[0].status, CredentialStatus::Active);
}

#[test]
fn foreign_grant_is_rejected() {
    let coord = coordinator(100, vec![Credential::api_key("key-one")]);
    let other = coordinator(100, vec![Credential::api_key("key-two")]);
    let grant = granted(other.acquire_at(SourcePlatform::Video, 1, t0()).unwrap());
    let err = coord
        .report_outcome_at(&grant, Outcome::Success, t0())
        .unwrap_err();
    assert!(matches!(err, AccessError::UnknownCredential { .. }));
}

#[test]
fn rotate_pushes_next_credential_to_the_back() {
    let coord = coordinator(
        100,
        vec![Credential::api_key("key-aaaa"), Credential::api_key("key-bbbb")],
    );
    let rotated = coord
        .rotate_credential_at(SourcePlatform::Video, t0())
        .unwrap();
    assert_eq!(rotated.as_deref(), Some("key-***"));
    let grant = granted(coord.acquire_at(SourcePlatform::Video, 1, t0()).unwrap());
    assert_eq!(grant.credential.identifier, "key-bbbb");
    assert_eq!(
        coord.remaining_quota_at(SourcePlatform::Video, t0()).unwrap(),
        189
    );
}

#[test]
fn remaining_quota_ignores_inactive_credentials() {
    let coord = coordinator(
        100,
        vec![Credential::api_key("key-aaaa"), Credential::api_key("key-bbbb")],
    );
    let grant = granted(coord.acquire_at(SourcePlatform::Video, 5, t0()).unwrap());
    coord
        .report_outcome_at(&grant, Outcome::RateLimited, t0())
        .unwrap();
    assert_eq!(
        coord.remaining_quota_at(SourcePlatform::Video, t0()).unwrap(),
        95
    );
}

#[test]
fn concurrent_acquires_never_overdraw() {
    use std::sync::Arc;

    let coord = Arc::new(coordinator(100, vec![Credential::api_key("key-one")]));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let coord = Arc::clone(&coord);
            std::thread::spawn(move || {
                (0..10)
                    .filter(|_| {
                        matches!(
                            coord.acquire_at(SourcePlatform::Video, 1, t0()),
                            Ok(Acquisition::Granted(_))
                        )
                    })
                    .count()
            })
        })
        .collect();
    let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(total, 80);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let coord = Arc::clone(&coord);
            std::thread::spawn(move || {
                (0..10)
                    .filter(|_| {
                        matches!(
                            coord.acquire_at(SourcePlatform::Video, 1, t0()),
                            Ok(Acquisition::Granted(_))
                        )
                    })
                    .count()
            })
        })
        .collect();
    let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(total, 15, "only 95 units exist per window");
}

#[test]
fn reported_grants_leave_the_outstanding_registry() {
    let coord = coordinator(100, vec![Credential::api_key("a"), Credential::api_key("b")]);
    let first = granted(coord.acquire_at(SourcePlatform::Video, 5, t0()).unwrap());
    let second = granted(coord.acquire_at(SourcePlatform::Video, 5, t0()).unwrap());
    assert_eq!(coord.outstanding_count(), 2);
    assert_eq!(coord.outstanding_grant(first.id), Some(first.clone()));
    assert_eq!(coord.credential_index(&first), Some(0));
    assert_eq!(coord.credential_index(&second), Some(1));

    coord.report_outcome_at(&first, Outcome::Success, t0()).unwrap();
    assert_eq!(coord.outstanding_grant(first.id), None);
    assert_eq!(coord.outstanding_count(), 1);
}

#[test]
fn grants_from_a_rolled_over_window_are_dropped() {
    let coord = coordinator(100, vec![Credential::api_key("a")]);
    let stale = granted(coord.acquire_at(SourcePlatform::Video, 5, t0()).unwrap());

    let later = t0() + TimeDelta::hours(2);
    let fresh = granted(coord.acquire_at(SourcePlatform::Video, 5, later).unwrap());
    assert_eq!(coord.outstanding_grant(stale.id), None);
    assert_eq!(coord.outstanding_grant(fresh.id), Some(fresh));
    assert_eq!(coord.outstanding_count(), 1);
}
