//! Quota-aware access coordinator.
//!
//! All budget records live in one mutex-guarded arena keyed by source. Every
//! public operation is a single critical section, so two callers can never
//! draw the same unit, and no operation blocks: callers get a grant or a wait
//! hint and do any sleeping themselves (see [`crate::run_guarded`]).

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;
use viralwatch_core::{AppConfig, SourcePlatform, WatchConfig};

use crate::backoff::backoff_delay;
use crate::budget::{AccessBudget, BudgetRecord, Credential, CredentialKind, CredentialStatus};
use crate::policy::{to_delta, to_std, AccessPolicy, SourcePolicy};
use crate::AccessError;

/// Permission to spend `cost` units of one credential's current window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub id: Uuid,
    pub source: SourcePlatform,
    pub credential: Credential,
    pub cost: u64,
    /// Start of the reset window the units were drawn from.
    pub window_start: DateTime<Utc>,
    /// 1 for a first call; incremented by every retry.
    pub attempt: u32,
    /// Network errors already reported earlier in this call chain. Block
    /// rotations and rate-limit re-acquires leave it unchanged.
    pub network_failures: u32,
}

impl Grant {
    /// The chain state to retry from after this grant's call failed on the
    /// network. Pass the result to [`AccessCoordinator::retry`].
    #[must_use]
    pub fn with_network_failure(&self) -> Grant {
        Grant {
            network_failures: self.network_failures.saturating_add(1),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    /// Every active credential is out of budget until its window resets.
    QuotaExhausted,
    /// The soonest credential to recover is serving a block cooldown.
    Blocked,
    /// The soonest credential to recover is in network back-off.
    CoolingDown,
}

impl std::fmt::Display for WaitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitReason::QuotaExhausted => write!(f, "quota_exhausted"),
            WaitReason::Blocked => write!(f, "blocked"),
            WaitReason::CoolingDown => write!(f, "cooling_down"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquisition {
    Granted(Grant),
    Wait {
        retry_after: Duration,
        reason: WaitReason,
    },
}

/// Result of a call made with a grant, as classified by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    RateLimited,
    Blocked,
    NetworkError,
    Cancelled,
}

/// What the caller should do after reporting an outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeAction {
    /// Nothing further.
    Done,
    /// Call [`AccessCoordinator::retry`]; another credential may have budget.
    Reacquire,
    /// A replacement grant on a different credential, ready to use.
    RetryWith(Grant),
    /// Sleep, then call [`AccessCoordinator::retry`].
    RetryAfter(Duration),
}

struct SourceArena {
    records: Vec<BudgetRecord>,
}

struct Arena {
    sources: BTreeMap<SourcePlatform, SourceArena>,
    /// Grants handed out and not yet reported, so remote callers can refer to
    /// them by id.
    outstanding: HashMap<Uuid, Grant>,
    next_seq: u64,
}

impl Arena {
    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Register `grant`, dropping unreported grants of its source whose
    /// window has already rolled over.
    fn track(&mut self, grant: &Grant) {
        if let Some(source) = self.sources.get(&grant.source) {
            self.outstanding.retain(|_, held| {
                held.source != grant.source
                    || source.records.iter().any(|r| {
                        r.credential == held.credential && r.window_start == held.window_start
                    })
            });
        }
        self.outstanding.insert(grant.id, grant.clone());
    }
}

pub struct AccessCoordinator {
    policy: AccessPolicy,
    arena: Mutex<Arena>,
}

impl AccessCoordinator {
    #[must_use]
    pub fn new(policy: AccessPolicy) -> Self {
        Self {
            policy,
            arena: Mutex::new(Arena {
                sources: BTreeMap::new(),
                outstanding: HashMap::new(),
                next_seq: 0,
            }),
        }
    }

    /// Build a coordinator for every source in the watchlist, registering the
    /// credentials configured in the environment. Sources without credentials
    /// get a single direct connection so their quota is still tracked.
    #[must_use]
    pub fn from_config(watch: &WatchConfig, app: &AppConfig, now: DateTime<Utc>) -> Self {
        let coordinator = Self::new(AccessPolicy::from_watchlist(watch));
        for platform in SourcePlatform::ALL {
            let credentials: Vec<Credential> = match platform {
                SourcePlatform::Video => app
                    .credentials_for(platform)
                    .iter()
                    .map(Credential::api_key)
                    .collect(),
                SourcePlatform::Marketplace | SourcePlatform::ShortVideo => app
                    .credentials_for(platform)
                    .iter()
                    .map(Credential::proxy)
                    .collect(),
            };
            coordinator.register_source(
                platform,
                &SourcePolicy::from(watch.sources.get(platform)),
                credentials,
                now,
            );
        }
        coordinator
    }

    #[must_use]
    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    fn lock(&self) -> MutexGuard<'_, Arena> {
        self.arena.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register (or replace) the credentials of `source`. An empty list
    /// registers a single direct connection.
    pub fn register_source(
        &self,
        source: SourcePlatform,
        policy: &SourcePolicy,
        credentials: Vec<Credential>,
        now: DateTime<Utc>,
    ) {
        let credentials = if credentials.is_empty() {
            vec![Credential::direct()]
        } else {
            credentials
        };
        let capacity = self.policy.effective_capacity(policy.capacity);
        let window_len = to_delta(policy.reset_window);

        let mut arena = self.lock();
        let records = credentials
            .into_iter()
            .map(|credential| {
                let seq = arena.bump_seq();
                BudgetRecord::new(credential, capacity, window_len, now, seq)
            })
            .collect::<Vec<_>>();
        tracing::info!(
            source = %source,
            credentials = records.len(),
            capacity,
            "registered source budget"
        );
        arena.sources.insert(source, SourceArena { records });
    }

    /// Reserve `cost` units of `source` at the current time.
    ///
    /// # Errors
    ///
    /// See [`AccessCoordinator::acquire_at`].
    pub fn acquire(&self, source: SourcePlatform, cost: u64) -> Result<Acquisition, AccessError> {
        self.acquire_at(source, cost, Utc::now())
    }

    /// Reserve `cost` units from the least-recently-used active credential.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::UnknownSource`] for an unregistered source and
    /// [`AccessError::CostExceedsCapacity`] when no credential could ever
    /// serve `cost` inside one window.
    pub fn acquire_at(
        &self,
        source: SourcePlatform,
        cost: u64,
        now: DateTime<Utc>,
    ) -> Result<Acquisition, AccessError> {
        let mut arena = self.lock();
        acquire_locked(&mut arena, source, cost, (1, 0), now)
    }

    /// Re-acquire for the same source and cost, carrying `attempt + 1` and the
    /// grant's network failure count.
    ///
    /// # Errors
    ///
    /// See [`AccessCoordinator::acquire_at`].
    pub fn retry(&self, grant: &Grant) -> Result<Acquisition, AccessError> {
        self.retry_at(grant, Utc::now())
    }

    /// # Errors
    ///
    /// See [`AccessCoordinator::acquire_at`].
    pub fn retry_at(&self, grant: &Grant, now: DateTime<Utc>) -> Result<Acquisition, AccessError> {
        let mut arena = self.lock();
        acquire_locked(
            &mut arena,
            grant.source,
            grant.cost,
            (grant.attempt.saturating_add(1), grant.network_failures),
            now,
        )
    }

    /// # Errors
    ///
    /// See [`AccessCoordinator::report_outcome_at`].
    pub fn report_outcome(
        &self,
        grant: &Grant,
        outcome: Outcome,
    ) -> Result<OutcomeAction, AccessError> {
        self.report_outcome_at(grant, outcome, Utc::now())
    }

    /// Apply the result of a call made with `grant`.
    ///
    /// # Errors
    ///
    /// - [`AccessError::Blocked`] when a blocked call has no credential
    ///   recovering inside the proxy retry budget.
    /// - [`AccessError::SourceUnavailable`] when the call chain reaches
    ///   `max_network_attempts` network failures. Only network errors count;
    ///   proxy rotations after blocks do not.
    /// - [`AccessError::UnknownCredential`] when the grant did not come from
    ///   this coordinator.
    pub fn report_outcome_at(
        &self,
        grant: &Grant,
        outcome: Outcome,
        now: DateTime<Utc>,
    ) -> Result<OutcomeAction, AccessError> {
        let mut arena = self.lock();
        arena.outstanding.remove(&grant.id);
        let record = find_record(&mut arena, grant)?;
        record.refresh(now);

        match outcome {
            Outcome::Success => Ok(OutcomeAction::Done),
            Outcome::Cancelled => {
                if record.window_start == grant.window_start {
                    record.used = record.used.saturating_sub(grant.cost);
                    tracing::debug!(
                        source = %grant.source,
                        credential = %grant.credential.label(),
                        cost = grant.cost,
                        "cancelled grant refunded"
                    );
                }
                Ok(OutcomeAction::Done)
            }
            Outcome::RateLimited => {
                let reset_at = record.reset_at();
                record.set_status(CredentialStatus::Exhausted, Some(reset_at));
                tracing::warn!(
                    source = %grant.source,
                    credential = %grant.credential.label(),
                    reset_at = %reset_at,
                    "credential rate limited, exhausted until window reset"
                );
                Ok(OutcomeAction::Reacquire)
            }
            Outcome::Blocked => {
                let until = now + to_delta(self.policy.block_cooldown);
                record.set_status(CredentialStatus::Blocked, Some(until));
                tracing::warn!(
                    source = %grant.source,
                    credential = %grant.credential.label(),
                    blocked_until = %until,
                    "credential blocked, rotating"
                );
                let chain = (grant.attempt.saturating_add(1), grant.network_failures);
                match acquire_locked(&mut arena, grant.source, grant.cost, chain, now)? {
                    Acquisition::Granted(fresh) => Ok(OutcomeAction::RetryWith(fresh)),
                    Acquisition::Wait { retry_after, .. }
                        if retry_after <= self.policy.proxy_retry_budget =>
                    {
                        Ok(OutcomeAction::RetryAfter(retry_after))
                    }
                    Acquisition::Wait { .. } => Err(AccessError::Blocked {
                        platform: grant.source,
                    }),
                }
            }
            Outcome::NetworkError => {
                let failures = grant.network_failures.saturating_add(1);
                let delay = backoff_delay(
                    failures,
                    self.policy.backoff_base,
                    self.policy.backoff_cap,
                );
                record.set_status(CredentialStatus::CoolingDown, Some(now + to_delta(delay)));
                if failures >= self.policy.max_network_attempts {
                    tracing::warn!(
                        source = %grant.source,
                        credential = %grant.credential.label(),
                        attempts = failures,
                        "source unavailable after repeated network errors"
                    );
                    return Err(AccessError::SourceUnavailable {
                        platform: grant.source,
                        attempts: failures,
                    });
                }
                tracing::warn!(
                    source = %grant.source,
                    credential = %grant.credential.label(),
                    attempt = grant.attempt,
                    network_failures = failures,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "network error, cooling down"
                );
                Ok(OutcomeAction::RetryAfter(delay))
            }
        }
    }

    /// A grant handed out by this coordinator that has not been reported yet.
    #[must_use]
    pub fn outstanding_grant(&self, id: Uuid) -> Option<Grant> {
        self.lock().outstanding.get(&id).cloned()
    }

    /// Number of grants awaiting an outcome.
    #[must_use]
    pub fn outstanding_count(&self) -> usize {
        self.lock().outstanding.len()
    }

    /// Registration position of the grant's credential within its source.
    #[must_use]
    pub fn credential_index(&self, grant: &Grant) -> Option<usize> {
        self.lock()
            .sources
            .get(&grant.source)?
            .records
            .iter()
            .position(|r| r.credential == grant.credential)
    }

    /// Push the credential that would be chosen next to the back of the LRU
    /// order. Returns its label, or `None` when no credential is active.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::UnknownSource`] for an unregistered source.
    pub fn rotate_credential(&self, source: SourcePlatform) -> Result<Option<String>, AccessError> {
        self.rotate_credential_at(source, Utc::now())
    }

    /// # Errors
    ///
    /// Returns [`AccessError::UnknownSource`] for an unregistered source.
    pub fn rotate_credential_at(
        &self,
        source: SourcePlatform,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, AccessError> {
        let mut arena = self.lock();
        let seq = arena.bump_seq();
        let records = records_mut(&mut arena, source)?;
        let next = records
            .iter_mut()
            .filter_map(|r| {
                r.refresh(now);
                (r.status == CredentialStatus::Active).then_some(r)
            })
            .min_by_key(|r| r.lru_seq);
        Ok(next.map(|record| {
            record.lru_seq = seq;
            let label = record.credential.label();
            tracing::info!(source = %source, credential = %label, "credential rotated");
            label
        }))
    }

    /// # Errors
    ///
    /// Returns [`AccessError::UnknownSource`] for an unregistered source.
    pub fn remaining_quota(&self, source: SourcePlatform) -> Result<u64, AccessError> {
        self.remaining_quota_at(source, Utc::now())
    }

    /// Remaining units summed across active credentials.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::UnknownSource`] for an unregistered source.
    pub fn remaining_quota_at(
        &self,
        source: SourcePlatform,
        now: DateTime<Utc>,
    ) -> Result<u64, AccessError> {
        let mut arena = self.lock();
        let records = records_mut(&mut arena, source)?;
        Ok(records
            .iter_mut()
            .map(|r| {
                r.refresh(now);
                if r.status == CredentialStatus::Active {
                    r.remaining()
                } else {
                    0
                }
            })
            .sum())
    }

    /// # Errors
    ///
    /// Returns [`AccessError::UnknownSource`] for an unregistered source.
    pub fn budgets(&self, source: SourcePlatform) -> Result<Vec<AccessBudget>, AccessError> {
        self.budgets_at(source, Utc::now())
    }

    /// Snapshot every credential budget of `source`, in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::UnknownSource`] for an unregistered source.
    pub fn budgets_at(
        &self,
        source: SourcePlatform,
        now: DateTime<Utc>,
    ) -> Result<Vec<AccessBudget>, AccessError> {
        let mut arena = self.lock();
        let records = records_mut(&mut arena, source)?;
        Ok(records
            .iter_mut()
            .map(|r| {
                r.refresh(now);
                r.snapshot()
            })
            .collect())
    }

    /// Sources with a registered budget.
    #[must_use]
    pub fn sources(&self) -> Vec<SourcePlatform> {
        self.lock().sources.keys().copied().collect()
    }

    /// Kinds of credential registered for `source`.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::UnknownSource`] for an unregistered source.
    pub fn credential_kinds(
        &self,
        source: SourcePlatform,
    ) -> Result<Vec<CredentialKind>, AccessError> {
        let mut arena = self.lock();
        Ok(records_mut(&mut arena, source)?
            .iter()
            .map(|r| r.credential.kind)
            .collect())
    }
}

fn records_mut(
    arena: &mut Arena,
    source: SourcePlatform,
) -> Result<&mut Vec<BudgetRecord>, AccessError> {
    arena
        .sources
        .get_mut(&source)
        .map(|s| &mut s.records)
        .ok_or(AccessError::UnknownSource(source))
}

fn find_record<'a>(
    arena: &'a mut Arena,
    grant: &Grant,
) -> Result<&'a mut BudgetRecord, AccessError> {
    records_mut(arena, grant.source)?
        .iter_mut()
        .find(|r| r.credential == grant.credential)
        .ok_or_else(|| AccessError::UnknownCredential {
            platform: grant.source,
            credential: grant.credential.label(),
        })
}

fn acquire_locked(
    arena: &mut Arena,
    source: SourcePlatform,
    cost: u64,
    chain: (u32, u32),
    now: DateTime<Utc>,
) -> Result<Acquisition, AccessError> {
    let acquisition = select_credential(arena, source, cost, chain, now)?;
    if let Acquisition::Granted(grant) = &acquisition {
        arena.track(grant);
    }
    Ok(acquisition)
}

fn select_credential(
    arena: &mut Arena,
    source: SourcePlatform,
    cost: u64,
    (attempt, network_failures): (u32, u32),
    now: DateTime<Utc>,
) -> Result<Acquisition, AccessError> {
    let seq = arena.bump_seq();
    let records = records_mut(arena, source)?;

    let max_capacity = records.iter().map(|r| r.capacity).max().unwrap_or(0);
    if cost > max_capacity {
        return Err(AccessError::CostExceedsCapacity {
            platform: source,
            cost,
            max_capacity,
        });
    }

    for record in records.iter_mut() {
        record.refresh(now);
    }

    let chosen = records
        .iter_mut()
        .filter(|r| r.status == CredentialStatus::Active && r.remaining() >= cost)
        .min_by_key(|r| r.lru_seq);

    if let Some(record) = chosen {
        record.used += cost;
        record.lru_seq = seq;
        let grant = Grant {
            id: Uuid::new_v4(),
            source,
            credential: record.credential.clone(),
            cost,
            window_start: record.window_start,
            attempt,
            network_failures,
        };
        tracing::debug!(
            source = %source,
            credential = %grant.credential.label(),
            cost,
            remaining = record.remaining(),
            attempt,
            "access granted"
        );
        return Ok(Acquisition::Granted(grant));
    }

    // Cost fits the largest capacity, so at least one credential yields a time.
    let (ready_at, reason) = records
        .iter()
        .filter(|r| r.capacity >= cost)
        .map(|r| {
            let reason = match r.status {
                CredentialStatus::Blocked => WaitReason::Blocked,
                CredentialStatus::CoolingDown => WaitReason::CoolingDown,
                CredentialStatus::Active | CredentialStatus::Exhausted => {
                    WaitReason::QuotaExhausted
                }
            };
            (r.available_at(cost, now), reason)
        })
        .min_by_key(|(at, _)| *at)
        .unwrap_or((now, WaitReason::QuotaExhausted));

    let retry_after = to_std(ready_at - now);
    tracing::warn!(
        source = %source,
        cost,
        retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
        reason = %reason,
        "access refused, wait hint issued"
    );
    Ok(Acquisition::Wait {
        retry_after,
        reason,
    })
}

#[cfg(test)]
#[path = "coordinator_test.rs"]
mod tests;
