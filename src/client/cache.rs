use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::models::{ForecastPayload, JobStatus};

/// Freshness window of a finished forecast
pub fn default_ttl() -> Duration {
    Duration::minutes(5)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    Running,
    Done,
    Error,
}

/// Latest known state of the forecast for one ticker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
    pub ticker: String,
    pub job_id: Option<String>,
    pub status: CacheStatus,
    pub pct: u8,
    pub eta_seconds: Option<u32>,
    pub result: Option<ForecastPayload>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn running(ticker: &str, job_id: Option<String>, ttl: Duration, now: DateTime<Utc>) -> Self {
        Self {
            ticker: ticker.to_string(),
            job_id,
            status: CacheStatus::Running,
            pct: 0,
            eta_seconds: None,
            result: None,
            error: None,
            started_at: now,
            finished_at: None,
            ttl,
        }
    }

    pub fn with_progress(mut self, status: &JobStatus) -> Self {
        self.pct = status.pct;
        self.eta_seconds = Some(status.eta_seconds);
        self
    }

    pub fn into_done(mut self, payload: ForecastPayload, now: DateTime<Utc>) -> Self {
        self.status = CacheStatus::Done;
        self.pct = 100;
        self.eta_seconds = Some(0);
        self.result = Some(payload);
        self.error = None;
        self.finished_at = Some(now);
        self
    }

    pub fn into_error(mut self, message: impl Into<String>, now: DateTime<Utc>) -> Self {
        self.status = CacheStatus::Error;
        self.eta_seconds = None;
        self.error = Some(message.into());
        self.finished_at = Some(now);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status != CacheStatus::Running
    }
}

/// Decides when a cached entry stops being visible
pub trait ExpiryPolicy: Send + Sync {
    fn is_expired(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool;
}

/// Expire `entry.ttl` after the entry finished. Running entries never expire.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntryTtl;

impl ExpiryPolicy for EntryTtl {
    fn is_expired(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        match entry.finished_at {
            Some(finished_at) => now >= finished_at + entry.ttl,
            None => false,
        }
    }
}

/// One ttl for every entry, whatever the entry says
#[derive(Debug, Clone, Copy)]
pub struct FixedTtl(pub Duration);

impl ExpiryPolicy for FixedTtl {
    fn is_expired(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        match entry.finished_at {
            Some(finished_at) => now >= finished_at + self.0,
            None => false,
        }
    }
}

/// Per-ticker cache of forecast snapshots.
///
/// `set` overwrites whatever was there for the ticker. Expired entries are
/// invisible to readers and dropped lazily.
#[derive(Clone)]
pub struct ResultCache {
    entries: Arc<DashMap<String, CacheEntry>>,
    policy: Arc<dyn ExpiryPolicy>,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultCache {
    pub fn new() -> Self {
        Self::with_policy(EntryTtl)
    }

    pub fn with_policy(policy: impl ExpiryPolicy + 'static) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            policy: Arc::new(policy),
        }
    }

    pub fn get(&self, ticker: &str) -> Option<CacheEntry> {
        self.get_at(ticker, Utc::now())
    }

    pub fn get_at(&self, ticker: &str, now: DateTime<Utc>) -> Option<CacheEntry> {
        let entry = self.entries.get(ticker)?.value().clone();
        if !self.policy.is_expired(&entry, now) {
            return Some(entry);
        }
        // Only drop it if nobody replaced it in the meantime
        self.entries
            .remove_if(ticker, |_, current| self.policy.is_expired(current, now));
        None
    }

    pub fn set(&self, entry: CacheEntry) {
        self.entries.insert(entry.ticker.clone(), entry);
    }

    pub fn invalidate(&self, ticker: &str) -> Option<CacheEntry> {
        self.entries.remove(ticker).map(|(_, entry)| entry)
    }

    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !self.policy.is_expired(entry, now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ForecastMetrics, JobState};

    fn payload() -> ForecastPayload {
        ForecastPayload {
            ticker: "AAPL".into(),
            look_back: 60,
            horizon: 0,
            forecast: Vec::new(),
            metrics: ForecastMetrics { rmse: 1.0, mape: 1.0, coverage: 1.0 },
        }
    }

    fn finished(ticker: &str, ttl: Duration, finished_at: DateTime<Utc>) -> CacheEntry {
        CacheEntry::running(ticker, Some("job".into()), ttl, finished_at).into_done(payload(), finished_at)
    }

    #[test]
    fn test_ttl_boundary_is_exclusive() {
        let cache = ResultCache::new();
        let t0 = Utc::now();
        let ttl = Duration::milliseconds(300_000);
        cache.set(finished("AAPL", ttl, t0));

        assert!(cache.get_at("AAPL", t0).is_some());
        assert!(cache.get_at("AAPL", t0 + ttl - Duration::milliseconds(1)).is_some());
        assert!(cache.get_at("AAPL", t0 + ttl).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_running_entries_never_expire() {
        let cache = ResultCache::new();
        let t0 = Utc::now();
        cache.set(CacheEntry::running("AAPL", None, Duration::seconds(1), t0));

        assert!(cache.get_at("AAPL", t0 + Duration::days(7)).is_some());
    }

    #[test]
    fn test_set_overwrites_previous_entry() {
        let cache = ResultCache::new();
        let t0 = Utc::now();
        cache.set(finished("AAPL", default_ttl(), t0));
        cache.set(CacheEntry::running("AAPL", Some("second".into()), default_ttl(), t0));

        let entry = cache.get("AAPL").unwrap();
        assert_eq!(entry.status, CacheStatus::Running);
        assert_eq!(entry.job_id.as_deref(), Some("second"));
        assert!(entry.result.is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_fixed_ttl_policy_ignores_entry_ttl() {
        let cache = ResultCache::with_policy(FixedTtl(Duration::seconds(10)));
        let t0 = Utc::now();
        cache.set(finished("AAPL", Duration::days(1), t0));

        assert!(cache.get_at("AAPL", t0 + Duration::seconds(9)).is_some());
        assert!(cache.get_at("AAPL", t0 + Duration::seconds(10)).is_none());
    }

    #[test]
    fn test_invalidate_and_purge() {
        let cache = ResultCache::new();
        let long_ago = Utc::now() - Duration::hours(1);
        cache.set(finished("OLD", default_ttl(), long_ago));
        cache.set(finished("NEW", default_ttl(), Utc::now()));
        cache.set(CacheEntry::running("RUN", None, default_ttl(), long_ago));

        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.invalidate("NEW").is_some());
        assert!(cache.get("NEW").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_progress_and_error_transitions() {
        let now = Utc::now();
        let entry = CacheEntry::running("AAPL", Some("j".into()), default_ttl(), now).with_progress(&JobStatus {
            state: JobState::Running,
            pct: 40,
            eta_seconds: 3,
            message: None,
        });
        assert_eq!(entry.pct, 40);
        assert_eq!(entry.eta_seconds, Some(3));

        let failed = entry.into_error("boom", now);
        assert!(failed.is_terminal());
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert_eq!(failed.finished_at, Some(now));
    }
}
