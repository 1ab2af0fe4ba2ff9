use std::sync::Arc;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::external::price_provider::PriceProviderError;

/// A recent failed price-history fetch for a ticker
#[derive(Debug, Clone)]
pub struct FailureInfo {
    pub failed_at: DateTime<Utc>,
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    NotFound,       // Provider has no history for the ticker
    RateLimited,    // Temporary quota exhaustion
    ApiError,       // Anything else the provider said no to
}

impl FailureKind {
    pub fn from_error(err: &PriceProviderError) -> Option<Self> {
        match err {
            PriceProviderError::NotFound(_) => Some(FailureKind::NotFound),
            PriceProviderError::RateLimited => Some(FailureKind::RateLimited),
            PriceProviderError::BadResponse(_) => Some(FailureKind::ApiError),
            // Network and parse failures are worth retrying on the next job
            PriceProviderError::Network(_) | PriceProviderError::Parse(_) => None,
        }
    }

    pub fn ttl(&self) -> Duration {
        match self {
            FailureKind::NotFound => Duration::hours(24),
            FailureKind::RateLimited => Duration::minutes(1),
            FailureKind::ApiError => Duration::minutes(15),
        }
    }
}

/// Remembers tickers whose price history recently failed to load, so new
/// forecast jobs for them fail fast instead of hitting the provider again.
#[derive(Clone, Default)]
pub struct FailureCache {
    cache: Arc<DashMap<String, FailureInfo>>,
}

impl FailureCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Still-valid failure for `ticker`, if any. Expired entries are dropped.
    pub fn check(&self, ticker: &str) -> Option<FailureInfo> {
        self.check_at(ticker, Utc::now())
    }

    pub fn check_at(&self, ticker: &str, now: DateTime<Utc>) -> Option<FailureInfo> {
        let info = self.cache.get(ticker)?.value().clone();
        if now < info.failed_at + info.kind.ttl() {
            return Some(info);
        }
        self.cache.remove(ticker);
        None
    }

    /// Record a provider failure. Transient failures are not remembered.
    pub fn record(&self, ticker: &str, err: &PriceProviderError) {
        if let Some(kind) = FailureKind::from_error(err) {
            self.cache.insert(
                ticker.to_string(),
                FailureInfo {
                    failed_at: Utc::now(),
                    kind,
                    message: err.to_string(),
                },
            );
        }
    }

    pub fn clear(&self, ticker: &str) {
        self.cache.remove(ticker);
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_and_expires_failures() {
        let cache = FailureCache::new();
        cache.record("NOPE", &PriceProviderError::NotFound("NOPE".into()));

        let info = cache.check("NOPE").unwrap();
        assert_eq!(info.kind, FailureKind::NotFound);

        let later = info.failed_at + Duration::hours(24);
        assert!(cache.check_at("NOPE", later).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_transient_errors_are_not_cached() {
        let cache = FailureCache::new();
        cache.record("AAPL", &PriceProviderError::Network("reset".into()));
        assert!(cache.check("AAPL").is_none());
    }

    #[test]
    fn test_clear() {
        let cache = FailureCache::new();
        cache.record("AAPL", &PriceProviderError::RateLimited);
        assert!(cache.check("AAPL").is_some());

        cache.clear("AAPL");
        assert!(cache.check("AAPL").is_none());
    }
}
