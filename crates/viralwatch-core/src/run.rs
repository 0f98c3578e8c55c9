use serde::{Deserialize, Serialize};

/// Counters for one collection, replay, or surge run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunStats {
    /// Raw payloads received from a collector or an input file.
    pub collected: u64,
    /// Normalized and stored as new observations.
    pub accepted: u64,
    pub duplicates: u64,
    /// Dropped as malformed, incomplete, or stale.
    pub rejected: u64,
    /// Accepted observations marked as noise.
    pub noise: u64,
    pub alerts: u64,
    /// Access budget units spent by the run.
    pub quota_used: u64,
}

impl RunStats {
    pub fn merge(&mut self, other: &RunStats) {
        self.collected += other.collected;
        self.accepted += other.accepted;
        self.duplicates += other.duplicates;
        self.rejected += other.rejected;
        self.noise += other.noise;
        self.alerts += other.alerts;
        self.quota_used += other.quota_used;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_adds_every_counter() {
        let mut total = RunStats {
            collected: 3,
            accepted: 2,
            rejected: 1,
            ..RunStats::default()
        };
        total.merge(&RunStats {
            collected: 1,
            duplicates: 1,
            alerts: 2,
            quota_used: 5,
            ..RunStats::default()
        });
        assert_eq!(total.collected, 4);
        assert_eq!(total.duplicates, 1);
        assert_eq!(total.alerts, 2);
        assert_eq!(total.quota_used, 5);
        assert_eq!(total.accepted, 2);
    }
}
