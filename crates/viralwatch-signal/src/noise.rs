use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use regex::{Regex, RegexBuilder};
use serde::Serialize;
use viralwatch_core::{CanonicalRecord, WatchConfig};

use crate::error::SignalError;
use crate::score::keyword_relevance;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoiseReason {
    /// Source of the spam pattern that matched.
    Spam(String),
    /// Mentions no priority keyword, so its keyword relevance is zero.
    Irrelevant,
}

impl fmt::Display for NoiseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoiseReason::Spam(pattern) => write!(f, "spam pattern '{pattern}'"),
            NoiseReason::Irrelevant => write!(f, "no priority keyword"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoiseVerdict {
    Clean,
    Noise(NoiseReason),
}

impl NoiseVerdict {
    #[must_use]
    pub fn is_noise(&self) -> bool {
        matches!(self, NoiseVerdict::Noise(_))
    }
}

/// Spam and relevance filter applied to annotated records.
#[derive(Debug, Clone)]
pub struct NoiseFilter {
    patterns: Vec<Regex>,
    priority_keywords: BTreeSet<String>,
}

impl NoiseFilter {
    /// Patterns are compiled case-insensitively. `priority_keywords` must be
    /// lowercased, as [`WatchConfig::priority_set`] returns them.
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::InvalidPattern`] for the first pattern that is
    /// not a valid regex.
    pub fn new<I, S>(patterns: I, priority_keywords: BTreeSet<String>) -> Result<Self, SignalError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                let p = p.as_ref();
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map_err(|source| SignalError::InvalidPattern {
                        pattern: p.to_string(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            patterns,
            priority_keywords,
        })
    }

    /// # Errors
    ///
    /// See [`NoiseFilter::new`].
    pub fn from_watchlist(config: &WatchConfig) -> Result<Self, SignalError> {
        Self::new(&config.spam_patterns, config.priority_set())
    }

    /// Classify a record whose keywords and brands are already detected.
    ///
    /// Spam patterns run over every text field, comments included; a record
    /// that passes them is still noise when its keyword relevance is zero.
    /// Brands and non-priority keywords alone do not make a record relevant.
    #[must_use]
    pub fn classify(&self, record: &CanonicalRecord) -> NoiseVerdict {
        for pattern in &self.patterns {
            if record.text_fields.values().any(|v| pattern.is_match(v)) {
                return NoiseVerdict::Noise(NoiseReason::Spam(pattern.as_str().to_string()));
            }
        }
        if keyword_relevance(record, &self.priority_keywords) <= 0.0 {
            return NoiseVerdict::Noise(NoiseReason::Irrelevant);
        }
        NoiseVerdict::Clean
    }
}

/// Data-quality counters shared by every ingestion lane.
#[derive(Debug, Default)]
pub struct QualityCounters {
    clean: AtomicU64,
    noise: AtomicU64,
    spam: AtomicU64,
    irrelevant: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct QualitySnapshot {
    pub clean: u64,
    pub noise: u64,
    pub spam: u64,
    pub irrelevant: u64,
}

impl QualityCounters {
    pub fn record(&self, verdict: &NoiseVerdict) {
        match verdict {
            NoiseVerdict::Clean => {
                self.clean.fetch_add(1, Ordering::Relaxed);
            }
            NoiseVerdict::Noise(reason) => {
                self.noise.fetch_add(1, Ordering::Relaxed);
                let bucket = match reason {
                    NoiseReason::Spam(_) => &self.spam,
                    NoiseReason::Irrelevant => &self.irrelevant,
                };
                bucket.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> QualitySnapshot {
        QualitySnapshot {
            clean: self.clean.load(Ordering::Relaxed),
            noise: self.noise.load(Ordering::Relaxed),
            spam: self.spam.load(Ordering::Relaxed),
            irrelevant: self.irrelevant.load(Ordering::Relaxed),
        }
    }
}
