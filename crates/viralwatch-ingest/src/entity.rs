//! In-memory entity store with natural-key deduplication.
//!
//! The outer map is only write-locked to insert a new entity; every other
//! operation takes a read lock for the lookup and then the entity's own
//! mutex, so writes to different entities do not contend.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use viralwatch_core::{CanonicalRecord, EntityKey, VelocitySample, ViralScore};

use crate::error::IngestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    /// First observation of the entity.
    New,
    /// Appended to an existing entity's series.
    Merged,
    /// Same `(platform, natural_key, observed_at)` already stored.
    Duplicate,
}

/// One stored observation and its noise verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPoint {
    pub record: CanonicalRecord,
    pub noise: bool,
}

#[derive(Debug, Default)]
struct EntityState {
    series: VecDeque<SeriesPoint>,
    last_score: Option<ViralScore>,
}

impl EntityState {
    fn latest(&self) -> Option<&SeriesPoint> {
        self.series.back()
    }
}

pub struct EntityStore {
    max_points: usize,
    entities: RwLock<HashMap<EntityKey, Arc<Mutex<EntityState>>>>,
}

fn lock(state: &Mutex<EntityState>) -> MutexGuard<'_, EntityState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl EntityStore {
    /// `max_points` bounds each entity's in-memory series; the oldest point is
    /// dropped first.
    #[must_use]
    pub fn new(max_points: usize) -> Self {
        Self {
            max_points: max_points.max(2),
            entities: RwLock::new(HashMap::new()),
        }
    }

    fn entity(&self, key: &EntityKey) -> Option<Arc<Mutex<EntityState>>> {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn entity_or_insert(&self, key: &EntityKey) -> Arc<Mutex<EntityState>> {
        if let Some(existing) = self.entity(key) {
            return existing;
        }
        let mut map = self.entities.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(map.entry(key.clone()).or_default())
    }

    /// Store one observation.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::StaleObservation`] when `record.observed_at` is
    /// older than the entity's latest point and not an exact duplicate.
    pub fn ingest(
        &self,
        record: CanonicalRecord,
        noise: bool,
    ) -> Result<IngestOutcome, IngestError> {
        let key = record.entity_key();
        let state = self.entity_or_insert(&key);
        let mut state = lock(&state);

        if state
            .series
            .iter()
            .any(|p| p.record.observed_at == record.observed_at)
        {
            return Ok(IngestOutcome::Duplicate);
        }

        if let Some(latest) = state.latest() {
            if record.observed_at < latest.record.observed_at {
                return Err(IngestError::StaleObservation {
                    key,
                    observed_at: record.observed_at,
                    latest: latest.record.observed_at,
                });
            }
        }

        state.series.push_back(SeriesPoint { record, noise });
        while state.series.len() > self.max_points {
            if let Some(dropped) = state.series.pop_front() {
                tracing::trace!(
                    natural_key = %key.natural_key,
                    observed_at = %dropped.record.observed_at,
                    "series full; dropped oldest point"
                );
            }
        }

        if state.series.len() == 1 {
            Ok(IngestOutcome::New)
        } else {
            Ok(IngestOutcome::Merged)
        }
    }

    #[must_use]
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.entity(key).is_some()
    }

    /// Merge persisted points into the entity's series, creating the entity
    /// if needed. Points already present (same `observed_at`) or belonging to
    /// another entity are skipped; the series stays ordered and bounded.
    /// Returns how many points were added.
    pub fn hydrate<I>(&self, key: &EntityKey, points: I) -> usize
    where
        I: IntoIterator<Item = SeriesPoint>,
    {
        let state = self.entity_or_insert(key);
        let mut state = lock(&state);
        let mut added = 0;
        for point in points {
            if point.record.entity_key() != *key
                || state
                    .series
                    .iter()
                    .any(|p| p.record.observed_at == point.record.observed_at)
            {
                continue;
            }
            let at = state
                .series
                .partition_point(|p| p.record.observed_at < point.record.observed_at);
            state.series.insert(at, point);
            added += 1;
        }
        while state.series.len() > self.max_points {
            state.series.pop_front();
        }
        added
    }

    /// Drop every entity whose latest point was observed before `cutoff`.
    /// Returns how many entities were dropped.
    pub fn evict_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut map = self.entities.write().unwrap_or_else(PoisonError::into_inner);
        let before = map.len();
        map.retain(|_, state| {
            lock(state)
                .latest()
                .is_some_and(|p| p.record.observed_at >= cutoff)
        });
        let evicted = before - map.len();
        if evicted > 0 {
            tracing::debug!(evicted, cutoff = %cutoff, "evicted idle entities");
        }
        evicted
    }

    /// Latest stored observation (latest-write-wins snapshot).
    #[must_use]
    pub fn snapshot(&self, key: &EntityKey) -> Option<CanonicalRecord> {
        let state = self.entity(key)?;
        let state = lock(&state);
        state.latest().map(|p| p.record.clone())
    }

    /// Clean (non-noise) points of the entity, oldest first.
    #[must_use]
    pub fn clean_series(&self, key: &EntityKey) -> Vec<CanonicalRecord> {
        let Some(state) = self.entity(key) else {
            return Vec::new();
        };
        let state = lock(&state);
        state
            .series
            .iter()
            .filter(|p| !p.noise)
            .map(|p| p.record.clone())
            .collect()
    }

    /// Clean values of `metric` observed before `before`, oldest first.
    #[must_use]
    pub fn prior_metric(&self, key: &EntityKey, metric: &str, before: DateTime<Utc>) -> Vec<f64> {
        let Some(state) = self.entity(key) else {
            return Vec::new();
        };
        let state = lock(&state);
        state
            .series
            .iter()
            .filter(|p| !p.noise && p.record.observed_at < before)
            .filter_map(|p| p.record.metric(metric))
            .collect()
    }

    /// Remember the most recent score of an entity; older scores are ignored.
    pub fn record_score(&self, score: &ViralScore) {
        let Some(state) = self.entity(&score.entity_key()) else {
            return;
        };
        let mut state = lock(&state);
        let newer = state
            .last_score
            .as_ref()
            .is_none_or(|prev| score.observed_at >= prev.observed_at);
        if newer {
            state.last_score = Some(score.clone());
        }
    }

    /// Most recent score of the entity, if any.
    #[must_use]
    pub fn last_score(&self, key: &EntityKey) -> Option<ViralScore> {
        let state = self.entity(key)?;
        let state = lock(&state);
        state.last_score.clone()
    }

    /// Latest clean scored observation of every entity scored within
    /// `[window_start, window_end]`.
    #[must_use]
    pub fn recent_samples(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Vec<VelocitySample> {
        let entities: Vec<Arc<Mutex<EntityState>>> = self
            .entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut samples: Vec<VelocitySample> = entities
            .iter()
            .filter_map(|state| {
                let state = lock(state);
                let score = state.last_score.as_ref()?;
                if score.observed_at < window_start || score.observed_at > window_end {
                    return None;
                }
                let point = state
                    .series
                    .iter()
                    .rev()
                    .find(|p| p.record.observed_at == score.observed_at && !p.noise)?;
                let mut terms = point.record.detected_keywords.clone();
                terms.extend(point.record.detected_brands.iter().cloned());
                Some(VelocitySample {
                    platform: score.source_platform,
                    natural_key: score.natural_key.clone(),
                    terms,
                    velocity: score.velocity,
                    observed_at: score.observed_at,
                })
            })
            .collect();
        samples.sort_by(|a, b| {
            (a.platform, &a.natural_key).cmp(&(b.platform, &b.natural_key))
        });
        samples
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[path = "entity_test.rs"]
mod tests;
