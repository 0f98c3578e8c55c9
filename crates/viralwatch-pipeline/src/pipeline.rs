use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use serde_json::Value;
use viralwatch_access::{run_guarded, AccessCoordinator, Grant, Outcome};
use viralwatch_alert::{AlertEvaluator, Dispatch, Notifier};
use viralwatch_core::{
    Alert, EntityKey, RecordStore, RunStats, SourcePlatform, SourcesConfig, StoredRecord,
    SurgeEvent, ViralScore, WatchConfig,
};
use viralwatch_ingest::{
    normalize, EntityStore, IngestError, IngestOutcome, KeywordMatcher, SeriesPoint,
};
use viralwatch_signal::{
    HistoricalBaseline, NoiseVerdict, QualitySnapshot, ReferencePriceSource, SignalProcessor,
    StaticPriceTable,
};

use crate::collector::Collector;
use crate::error::PipelineError;

/// What happened to one submitted payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitStatus {
    Accepted { noise: bool },
    Duplicate,
    Rejected { reason: String },
    Stale { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitReport {
    pub entity: Option<EntityKey>,
    #[serde(flatten)]
    pub status: SubmitStatus,
    pub score: Option<ViralScore>,
    /// Ids of alerts dispatched because of this payload.
    pub alerts: Vec<String>,
}

impl SubmitReport {
    fn without_entity(status: SubmitStatus) -> Self {
        Self {
            entity: None,
            status,
            score: None,
            alerts: Vec::new(),
        }
    }

    /// Add this payload to a run's counters.
    pub fn tally(&self, stats: &mut RunStats) {
        match &self.status {
            SubmitStatus::Accepted { noise } => {
                stats.accepted += 1;
                if *noise {
                    stats.noise += 1;
                }
            }
            SubmitStatus::Duplicate => stats.duplicates += 1,
            SubmitStatus::Rejected { .. } | SubmitStatus::Stale { .. } => stats.rejected += 1,
        }
        stats.alerts += self.alerts.len() as u64;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SurgeCycleReport {
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub surges: Vec<SurgeEvent>,
    pub alerts: Vec<String>,
}

/// The processing chain shared by every lane: normalize, annotate, classify
/// noise, ingest, persist, score, evaluate, dispatch.
pub struct Pipeline<S, N> {
    matcher: KeywordMatcher,
    entities: EntityStore,
    signals: SignalProcessor,
    evaluator: AlertEvaluator,
    price_table: StaticPriceTable,
    tracked_terms: BTreeSet<String>,
    sources: SourcesConfig,
    /// In-memory state idle longer than this is evicted by the surge cycle.
    retention: TimeDelta,
    /// Set once the surge window has been rebuilt from the store.
    warmed: AtomicBool,
    coordinator: Arc<AccessCoordinator>,
    store: S,
    notifier: N,
}

impl<S: RecordStore, N: Notifier> Pipeline<S, N> {
    /// # Errors
    ///
    /// Returns [`PipelineError::Signal`] when a watchlist spam pattern does
    /// not compile.
    pub fn new(
        watch: &WatchConfig,
        coordinator: Arc<AccessCoordinator>,
        store: S,
        notifier: N,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            matcher: KeywordMatcher::from_watchlist(watch),
            entities: EntityStore::new(watch.series_max_points),
            signals: SignalProcessor::from_watchlist(watch)?,
            evaluator: AlertEvaluator::from_watchlist(watch),
            price_table: StaticPriceTable::from_watchlist(watch),
            tracked_terms: watch.tracked_terms(),
            sources: watch.sources.clone(),
            retention: retention(watch),
            warmed: AtomicBool::new(false),
            coordinator,
            store,
            notifier,
        })
    }

    #[must_use]
    pub fn coordinator(&self) -> &AccessCoordinator {
        &self.coordinator
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Hand back the storage collaborator, dropping in-memory state.
    pub fn into_store(self) -> S {
        self.store
    }

    #[must_use]
    pub fn entities(&self) -> &EntityStore {
        &self.entities
    }

    #[must_use]
    pub fn quality(&self) -> QualitySnapshot {
        self.signals.quality()
    }

    #[must_use]
    pub fn request_cost(&self, platform: SourcePlatform) -> u64 {
        self.sources.get(platform).request_cost.max(1)
    }

    /// Process one raw payload.
    ///
    /// When `grant` is given, the call that produced the payload is reported
    /// as successful before normalization; data-shape failures never count
    /// against the credential. Rejected, stale, and duplicate payloads are
    /// reported, not returned as errors, so one bad record never aborts a
    /// batch. Storage failures are logged and processing continues.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Access`] when `grant` did not come from this
    /// pipeline's coordinator.
    pub async fn submit_raw_payload(
        &self,
        platform: SourcePlatform,
        raw: &Value,
        grant: Option<&Grant>,
    ) -> Result<SubmitReport, PipelineError> {
        if let Some(grant) = grant {
            self.coordinator.report_outcome(grant, Outcome::Success)?;
        }

        let mut record = match normalize(raw, platform, Utc::now()) {
            Ok(record) => record,
            Err(rejected) => {
                tracing::warn!(platform = %platform, reason = %rejected, "payload rejected");
                return Ok(SubmitReport::without_entity(SubmitStatus::Rejected {
                    reason: rejected.to_string(),
                }));
            }
        };
        let key = record.entity_key();
        self.hydrate_entity(&key).await;
        let scoring_eligible = self.matcher.annotate(&mut record);
        let verdict = self.signals.classify_noise(&record);
        let noise = verdict.is_noise();

        match self.entities.ingest(record.clone(), noise) {
            Ok(IngestOutcome::Duplicate) => {
                tracing::debug!(
                    entity = %key,
                    observed_at = %record.observed_at,
                    "duplicate observation"
                );
                return Ok(SubmitReport {
                    entity: Some(key),
                    ..SubmitReport::without_entity(SubmitStatus::Duplicate)
                });
            }
            Ok(IngestOutcome::New | IngestOutcome::Merged) => {}
            Err(err @ IngestError::StaleObservation { .. }) => {
                tracing::warn!(
                    platform = %platform,
                    natural_key = %key.natural_key,
                    error = %err,
                    "stale observation dropped"
                );
                return Ok(SubmitReport {
                    entity: Some(key),
                    ..SubmitReport::without_entity(SubmitStatus::Stale {
                        reason: err.to_string(),
                    })
                });
            }
        }
        self.signals.count_verdict(&verdict);
        if let NoiseVerdict::Noise(reason) = &verdict {
            tracing::debug!(entity = %key, reason = %reason, "observation marked as noise");
        }

        let stored = StoredRecord {
            record,
            noise,
            scoring_eligible,
        };
        if let Err(e) = self.store.append_record(&stored).await {
            tracing::warn!(entity = %key, error = %e, "failed to persist observation");
        }

        let mut report = SubmitReport {
            entity: Some(key.clone()),
            status: SubmitStatus::Accepted { noise },
            score: None,
            alerts: Vec::new(),
        };
        if noise {
            return Ok(report);
        }

        match self.signals.compute_viral_score(&self.entities.clean_series(&key)) {
            Ok(score) => {
                self.entities.record_score(&score);
                if let Err(e) = self.store.append_score(&score).await {
                    tracing::warn!(entity = %key, error = %e, "failed to persist score");
                }
                if let Some(alert) = self.evaluator.evaluate(&score) {
                    report.alerts.extend(self.raise(alert).await);
                }
                report.score = Some(score);
            }
            Err(e) => {
                tracing::warn!(entity = %key, error = %e, "scoring skipped");
            }
        }

        if platform == SourcePlatform::Marketplace {
            for alert in self.arbitrage_alerts(&stored.record) {
                report.alerts.extend(self.raise(alert).await);
            }
        }

        Ok(report)
    }

    /// Load an entity's persisted series the first time this process sees it,
    /// including after an eviction. The score rebuilt from that history primes
    /// the alert trigger.
    async fn hydrate_entity(&self, key: &EntityKey) {
        if self.entities.contains(key) {
            return;
        }
        let history = match self.store.entity_series(key).await {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(entity = %key, error = %e, "failed to load entity history");
                return;
            }
        };
        let added = self.entities.hydrate(
            key,
            history.into_iter().map(|stored| SeriesPoint {
                record: stored.record,
                noise: stored.noise,
            }),
        );
        if added == 0 {
            return;
        }
        tracing::debug!(entity = %key, points = added, "entity hydrated from store");
        if let Ok(score) = self
            .signals
            .compute_viral_score(&self.entities.clean_series(key))
        {
            self.entities.record_score(&score);
            self.evaluator.prime(&score);
        }
    }

    /// Rebuild every entity observed inside the window from the store. Runs
    /// once, on the first surge cycle after startup.
    async fn warm_window(&self, window_start: DateTime<Utc>, now: DateTime<Utc>) {
        if self.warmed.swap(true, Ordering::AcqRel) {
            return;
        }
        let recent = match self.store.recent_records(window_start, now).await {
            Ok(recent) => recent,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load surge window from store");
                self.warmed.store(false, Ordering::Release);
                return;
            }
        };
        let keys: BTreeSet<EntityKey> = recent
            .into_iter()
            .map(|stored| stored.record.entity_key())
            .collect();
        for key in &keys {
            self.hydrate_entity(key).await;
        }
        tracing::info!(entities = keys.len(), "surge window warmed from store");
    }

    /// Evict entity and trigger state idle since before the retention horizon.
    fn evict_idle(&self, now: DateTime<Utc>) {
        let cutoff = now - self.retention;
        let entities = self.entities.evict_before(cutoff);
        let triggers = self.evaluator.forget_before(cutoff);
        if entities > 0 || triggers > 0 {
            tracing::info!(entities, triggers, cutoff = %cutoff, "evicted idle state");
        }
    }

    fn arbitrage_alerts(&self, record: &viralwatch_core::CanonicalRecord) -> Vec<Alert> {
        let baseline = HistoricalBaseline::new(&self.entities);
        let mut references: Vec<&dyn ReferencePriceSource> = vec![&baseline];
        if !self.price_table.is_empty() {
            references.push(&self.price_table);
        }
        references
            .into_iter()
            .filter_map(|reference| self.signals.detect_arbitrage(record, reference))
            .map(|signal| {
                tracing::info!(
                    natural_key = %signal.natural_key,
                    direction = %signal.direction,
                    margin = signal.relative_margin,
                    reference = %signal.reference_source,
                    "price arbitrage detected"
                );
                self.evaluator.evaluate_arbitrage(&signal)
            })
            .collect()
    }

    /// Persist then dispatch. Returns the id when the alert was handed to the
    /// notifier.
    async fn raise(&self, mut alert: Alert) -> Option<String> {
        if self.evaluator.is_dispatched(&alert.alert_id) {
            return None;
        }
        alert.sent_at = Some(Utc::now());
        match self.store.record_alert(&alert).await {
            Ok(false) => {
                tracing::debug!(alert_id = %alert.alert_id, "alert already recorded");
                return None;
            }
            Ok(true) => {}
            Err(e) => {
                tracing::warn!(alert_id = %alert.alert_id, error = %e, "failed to persist alert");
            }
        }
        match self.evaluator.dispatch(alert, &self.notifier).await {
            Dispatch::Delivered { alert, report } => {
                tracing::info!(
                    alert_id = %alert.alert_id,
                    kind = %alert.kind,
                    delivered = report.delivered_count(),
                    channels = report.channels.len(),
                    "alert dispatched"
                );
                Some(alert.alert_id)
            }
            Dispatch::Suppressed => None,
        }
    }

    /// Correlate the window ending at `now` across platforms and raise a
    /// critical alert for every surging term.
    pub async fn run_surge_cycle(&self, now: DateTime<Utc>) -> SurgeCycleReport {
        let window = self.signals.surge_params().window;
        let window_start = now - window.max(TimeDelta::seconds(1));
        self.warm_window(window_start, now).await;
        self.evict_idle(now);
        let samples = self.entities.recent_samples(window_start, now);

        let mut report = SurgeCycleReport {
            window_start: Some(window_start),
            window_end: Some(now),
            ..SurgeCycleReport::default()
        };
        for term in &self.tracked_terms {
            let Some(surge) = self.signals.detect_surge(term, window_start, now, &samples) else {
                continue;
            };
            tracing::info!(
                term = %surge.brand_or_keyword,
                platforms = surge.platforms_involved.len(),
                severity = surge.severity,
                "cross-platform surge"
            );
            let alert = self.evaluator.evaluate_surge(&surge);
            report.alerts.extend(self.raise(alert).await);
            report.surges.push(surge);
        }
        report
    }

    /// Fetch once from `collector` under the access budget and submit every
    /// payload.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Access`] when no budget frees up within
    /// `max_wait` or the source stays unavailable, and
    /// [`PipelineError::Collector`] for non-retryable fetch failures.
    pub async fn collect<C: Collector>(
        &self,
        collector: &C,
        max_wait: Duration,
    ) -> Result<RunStats, PipelineError> {
        let platform = collector.platform();
        let spent = AtomicU64::new(0);
        let payloads = run_guarded(
            &self.coordinator,
            platform,
            collector.request_cost(),
            max_wait,
            |grant| {
                spent.fetch_add(grant.cost, Ordering::Relaxed);
                async move { collector.fetch(&grant).await }
            },
        )
        .await?;

        let mut stats = RunStats {
            collected: payloads.len() as u64,
            quota_used: spent.load(Ordering::Relaxed),
            ..RunStats::default()
        };
        for raw in &payloads {
            let report = self.submit_raw_payload(platform, raw, None).await?;
            report.tally(&mut stats);
        }
        tracing::info!(
            source = %platform,
            collected = stats.collected,
            accepted = stats.accepted,
            duplicates = stats.duplicates,
            rejected = stats.rejected,
            noise = stats.noise,
            alerts = stats.alerts,
            quota_used = stats.quota_used,
            "collection finished"
        );
        Ok(stats)
    }
}

/// How long idle entities stay in memory: the surge window or the longest
/// source reset window, whichever is longer.
fn retention(watch: &WatchConfig) -> TimeDelta {
    let longest_reset = SourcePlatform::ALL
        .iter()
        .map(|platform| watch.sources.get(*platform).reset_window_secs)
        .max()
        .unwrap_or(0);
    let secs = watch.surge_window_secs.max(longest_reset);
    TimeDelta::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod tests;
