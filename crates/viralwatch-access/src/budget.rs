use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    /// Sent as a query parameter to the source API.
    ApiKey,
    /// Outbound HTTP proxy URL.
    Proxy,
    /// Direct connection with no key or proxy.
    Direct,
}

/// One API key or proxy endpoint. `identifier` holds the secret itself.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub identifier: String,
    pub kind: CredentialKind,
}

impl Credential {
    #[must_use]
    pub fn api_key(key: impl Into<String>) -> Self {
        Self {
            identifier: key.into(),
            kind: CredentialKind::ApiKey,
        }
    }

    #[must_use]
    pub fn proxy(url: impl Into<String>) -> Self {
        Self {
            identifier: url.into(),
            kind: CredentialKind::Proxy,
        }
    }

    #[must_use]
    pub fn direct() -> Self {
        Self {
            identifier: "direct".to_string(),
            kind: CredentialKind::Direct,
        }
    }

    /// Log-safe name: the first four characters followed by a mask.
    #[must_use]
    pub fn label(&self) -> String {
        match self.kind {
            CredentialKind::Direct => self.identifier.clone(),
            CredentialKind::ApiKey | CredentialKind::Proxy => {
                let prefix: String = self.identifier.chars().take(4).collect();
                format!("{prefix}***")
            }
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("identifier", &self.label())
            .field("kind", &self.kind)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    Active,
    Exhausted,
    Blocked,
    CoolingDown,
}

impl std::fmt::Display for CredentialStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialStatus::Active => write!(f, "active"),
            CredentialStatus::Exhausted => write!(f, "exhausted"),
            CredentialStatus::Blocked => write!(f, "blocked"),
            CredentialStatus::CoolingDown => write!(f, "cooling_down"),
        }
    }
}

/// Read-only snapshot of one credential's budget.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessBudget {
    /// Masked credential label.
    pub identifier: String,
    pub kind: CredentialKind,
    /// Effective capacity after the safety margin.
    pub capacity: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
    pub status: CredentialStatus,
    pub status_until: Option<DateTime<Utc>>,
}

/// Mutable budget state, owned by the coordinator arena.
#[derive(Debug, Clone)]
pub(crate) struct BudgetRecord {
    pub credential: Credential,
    pub capacity: u64,
    pub used: u64,
    pub window_start: DateTime<Utc>,
    pub window_len: TimeDelta,
    pub status: CredentialStatus,
    pub status_until: Option<DateTime<Utc>>,
    /// Position in the LRU order; lower is picked first.
    pub lru_seq: u64,
}

impl BudgetRecord {
    pub fn new(
        credential: Credential,
        capacity: u64,
        window_len: TimeDelta,
        now: DateTime<Utc>,
        lru_seq: u64,
    ) -> Self {
        Self {
            credential,
            capacity,
            used: 0,
            window_start: now,
            window_len,
            status: CredentialStatus::Active,
            status_until: None,
            lru_seq,
        }
    }

    pub fn reset_at(&self) -> DateTime<Utc> {
        self.window_start + self.window_len
    }

    pub fn remaining(&self) -> u64 {
        self.capacity.saturating_sub(self.used)
    }

    /// Apply every transition that has come due by `now`.
    ///
    /// Windows advance in whole multiples of their length. A window reset
    /// clears `Exhausted` but never shortens a block or cooldown.
    pub fn refresh(&mut self, now: DateTime<Utc>) {
        let window_ms = self.window_len.num_milliseconds().max(1);
        let elapsed_ms = (now - self.window_start).num_milliseconds();
        if elapsed_ms >= window_ms {
            let windows = elapsed_ms / window_ms;
            self.window_start += TimeDelta::milliseconds(windows.saturating_mul(window_ms));
            self.used = 0;
            if self.status == CredentialStatus::Exhausted {
                self.set_status(CredentialStatus::Active, None);
            }
        }

        if matches!(
            self.status,
            CredentialStatus::Blocked | CredentialStatus::CoolingDown
        ) && self.status_until.is_some_and(|until| now >= until)
        {
            self.set_status(CredentialStatus::Active, None);
        }
    }

    pub fn set_status(&mut self, status: CredentialStatus, until: Option<DateTime<Utc>>) {
        if self.status != status {
            tracing::debug!(
                credential = %self.credential.label(),
                from = %self.status,
                to = %status,
                "credential status change"
            );
        }
        self.status = status;
        self.status_until = until;
    }

    /// Earliest instant this credential could serve `cost` units, assuming no
    /// other caller draws from it first.
    pub fn available_at(&self, cost: u64, now: DateTime<Utc>) -> DateTime<Utc> {
        let ready = match self.status {
            CredentialStatus::Active => now,
            CredentialStatus::Exhausted => self.reset_at(),
            CredentialStatus::Blocked | CredentialStatus::CoolingDown => {
                self.status_until.unwrap_or_else(|| self.reset_at())
            }
        };
        let budget_at_ready = if ready >= self.reset_at() {
            self.capacity
        } else {
            self.remaining()
        };
        if budget_at_ready >= cost {
            ready
        } else {
            ready.max(self.reset_at())
        }
    }

    pub fn snapshot(&self) -> AccessBudget {
        AccessBudget {
            identifier: self.credential.label(),
            kind: self.credential.kind,
            capacity: self.capacity,
            remaining: self.remaining(),
            reset_at: self.reset_at(),
            status: self.status,
            status_until: self.status_until,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap()
    }

    fn record() -> BudgetRecord {
        BudgetRecord::new(
            Credential::api_key("AIzaSecretKey"),
            95,
            TimeDelta::hours(1),
            t0(),
            0,
        )
    }

    #[test]
    fn label_masks_secrets() {
        assert_eq!(Credential::api_key("AIzaSecretKey").label(), "AIza***");
        assert_eq!(Credential::direct().label(), "direct");
        let rendered = format!("{:?}", Credential::proxy("http://user:pw@proxy:8080"));
        assert!(!rendered.contains("pw@proxy"));
    }

    #[test]
    fn refresh_rolls_window_in_whole_multiples() {
        let mut rec = record();
        rec.used = 50;
        rec.refresh(t0() + TimeDelta::minutes(150));
        assert_eq!(rec.used, 0);
        assert_eq!(rec.window_start, t0() + TimeDelta::hours(2));
        assert_eq!(rec.reset_at(), t0() + TimeDelta::hours(3));
    }

    #[test]
    fn refresh_keeps_block_past_window_reset() {
        let mut rec = record();
        rec.set_status(
            CredentialStatus::Blocked,
            Some(t0() + TimeDelta::minutes(90)),
        );
        rec.refresh(t0() + TimeDelta::minutes(61));
        assert_eq!(rec.status, CredentialStatus::Blocked);
        rec.refresh(t0() + TimeDelta::minutes(90));
        assert_eq!(rec.status, CredentialStatus::Active);
    }

    #[test]
    fn refresh_clears_exhausted_at_reset() {
        let mut rec = record();
        rec.set_status(CredentialStatus::Exhausted, Some(rec.reset_at()));
        rec.refresh(t0() + TimeDelta::minutes(59));
        assert_eq!(rec.status, CredentialStatus::Exhausted);
        rec.refresh(t0() + TimeDelta::minutes(60));
        assert_eq!(rec.status, CredentialStatus::Active);
    }

    #[test]
    fn available_at_accounts_for_remaining_budget() {
        let mut rec = record();
        rec.used = 93;
        assert_eq!(rec.available_at(2, t0()), t0());
        assert_eq!(rec.available_at(5, t0()), rec.reset_at());
    }
}
