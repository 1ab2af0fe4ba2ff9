use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use tracing::{info, warn};

use crate::errors::AppError;
use crate::external::price_provider::{ExternalPricePoint, PriceProvider};
use crate::models::{ForecastMetrics, ForecastPayload, ForecastPoint, ForecastRequest};
use crate::services::failure_cache::FailureCache;

/// Produces the forecast payload once a job has run to completion
#[async_trait]
pub trait ForecastEngine: Send + Sync {
    async fn forecast(&self, request: &ForecastRequest) -> Result<ForecastPayload, AppError>;
}

/// Log-drift extrapolation of recent closes.
///
/// Without a price provider it emits a flat synthetic series starting at
/// 100, which keeps the job API usable with no market-data credentials.
pub struct DriftForecastEngine {
    prices: Option<Arc<dyn PriceProvider>>,
    failure_cache: FailureCache,
}

impl DriftForecastEngine {
    pub fn new(prices: Option<Arc<dyn PriceProvider>>, failure_cache: FailureCache) -> Self {
        Self { prices, failure_cache }
    }

    pub fn synthetic() -> Self {
        Self::new(None, FailureCache::new())
    }

    async fn fetch_history(
        &self,
        provider: &dyn PriceProvider,
        request: &ForecastRequest,
    ) -> Result<Vec<ExternalPricePoint>, AppError> {
        if let Some(failure) = self.failure_cache.check(&request.ticker) {
            warn!(
                "Skipping price fetch for {}: failed {} ago ({})",
                request.ticker,
                Utc::now() - failure.failed_at,
                failure.message
            );
            return Err(AppError::Upstream(format!(
                "price history for {} unavailable: {}",
                request.ticker, failure.message
            )));
        }

        // One extra close so look_back returns are available
        match provider.fetch_daily_history(&request.ticker, request.look_back + 1).await {
            Ok(points) => {
                self.failure_cache.clear(&request.ticker);
                // Log returns need strictly positive closes
                if let Some(bad) = points.iter().find(|p| !(p.close.is_finite() && p.close > 0.0)) {
                    return Err(AppError::Upstream(format!(
                        "invalid close {} for {} on {}",
                        bad.close, request.ticker, bad.date
                    )));
                }
                Ok(points)
            }
            Err(e) => {
                self.failure_cache.record(&request.ticker, &e);
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl ForecastEngine for DriftForecastEngine {
    async fn forecast(&self, request: &ForecastRequest) -> Result<ForecastPayload, AppError> {
        let Some(provider) = self.prices.as_deref() else {
            return Ok(synthetic_forecast(request, Utc::now().date_naive()));
        };

        let history = self.fetch_history(provider, request).await?;
        if history.len() < 2 {
            return Err(AppError::Upstream(format!(
                "insufficient price history for {}: got {} closes",
                request.ticker,
                history.len()
            )));
        }

        info!(
            "Forecasting {} over {} steps from {} closes",
            request.ticker,
            request.horizon,
            history.len()
        );
        Ok(drift_forecast(request, &history))
    }
}

fn step_date(start: NaiveDate, step: u32) -> NaiveDate {
    start.checked_add_days(Days::new(step.into())).unwrap_or(start)
}

/// Flat placeholder series used when no price provider is configured
pub fn synthetic_forecast(request: &ForecastRequest, today: NaiveDate) -> ForecastPayload {
    let forecast = (1..=request.horizon)
        .map(|step| ForecastPoint {
            step,
            date: step_date(today, step),
            pred_price: 100.0 + f64::from(step - 1),
            pred_return: 0.01,
        })
        .collect();

    ForecastPayload {
        ticker: request.ticker.clone(),
        look_back: request.look_back,
        horizon: request.horizon,
        forecast,
        metrics: ForecastMetrics { rmse: 1.82, mape: 2.1, coverage: 0.78 },
    }
}

/// Extrapolate the mean daily log return of `history` (oldest first, at
/// least two points) `horizon` steps past the last close.
pub fn drift_forecast(request: &ForecastRequest, history: &[ExternalPricePoint]) -> ForecastPayload {
    let log_returns: Vec<f64> = history
        .windows(2)
        .map(|w| (w[1].close / w[0].close).ln())
        .collect();
    let n = log_returns.len() as f64;
    let mu = log_returns.iter().sum::<f64>() / n;
    let sigma = (log_returns.iter().map(|r| (r - mu).powi(2)).sum::<f64>() / n).sqrt();

    // In-sample one-step-ahead fit of the same drift model
    let mut sq_err = 0.0;
    let mut abs_pct_err = 0.0;
    for w in history.windows(2) {
        let predicted = w[0].close * mu.exp();
        let err = w[1].close - predicted;
        sq_err += err * err;
        abs_pct_err += (err / w[1].close).abs();
    }
    let covered = log_returns
        .iter()
        .filter(|r| (*r - mu).abs() <= 1.96 * sigma)
        .count() as f64;

    let last = &history[history.len() - 1];
    let step_return = mu.exp() - 1.0;
    let forecast = (1..=request.horizon)
        .map(|step| ForecastPoint {
            step,
            date: step_date(last.date, step),
            pred_price: last.close * (mu * f64::from(step)).exp(),
            pred_return: step_return,
        })
        .collect();

    ForecastPayload {
        ticker: request.ticker.clone(),
        look_back: request.look_back,
        horizon: request.horizon,
        forecast,
        metrics: ForecastMetrics {
            rmse: (sq_err / n).sqrt(),
            mape: abs_pct_err / n * 100.0,
            coverage: covered / n,
        },
    }
}
