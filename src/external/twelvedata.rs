use crate::external::http_client::{RetryPolicy, RetryingHttpClient};
use crate::external::price_provider::{ExternalPricePoint, PriceProvider, PriceProviderError};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;

const DEFAULT_BASE_URL: &str = "https://api.twelvedata.com";

pub struct TwelveDataProvider {
    client: RetryingHttpClient,
    base_url: String,
    api_key: String,
}

impl TwelveDataProvider {
    pub fn new(api_key: String, base_url: Option<String>, policy: RetryPolicy) -> Result<Self, PriceProviderError> {
        let client = RetryingHttpClient::new(policy)
            .map_err(|e| PriceProviderError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
        })
    }

    pub fn from_env(policy: RetryPolicy) -> Result<Self, PriceProviderError> {
        let api_key = std::env::var("TWELVEDATA_API_KEY")
            .map_err(|_| PriceProviderError::BadResponse("TWELVEDATA_API_KEY not set".into()))?;

        Self::new(api_key, std::env::var("TWELVEDATA_BASE_URL").ok(), policy)
    }
}

#[derive(Debug, Deserialize)]
struct TwelveDataTimeSeriesResponse {
    values: Option<Vec<TwelveDataValue>>,
    status: String,

    // Error handling
    message: Option<String>,
    code: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct TwelveDataValue {
    datetime: String,
    close: String,
}

fn parse_value(v: TwelveDataValue) -> Result<ExternalPricePoint, PriceProviderError> {
    // Twelve Data returns "YYYY-MM-DD HH:MM:SS" or "YYYY-MM-DD"
    let date_part = v.datetime.split(' ').next().unwrap_or(&v.datetime);
    let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map_err(|e| PriceProviderError::Parse(e.to_string()))?;

    let close = v.close.parse::<f64>()
        .map_err(|e| PriceProviderError::Parse(e.to_string()))?;

    Ok(ExternalPricePoint { date, close })
}

#[async_trait]
impl PriceProvider for TwelveDataProvider {
    async fn fetch_daily_history(
        &self,
        ticker: &str,
        days: u32,
    ) -> Result<Vec<ExternalPricePoint>, PriceProviderError> {
        let url = format!("{}/time_series", self.base_url);

        // outputsize determines how many data points (default 30, max 5000)
        let outputsize = std::cmp::min(days, 5000);

        let resp = self
            .client
            .get(&url, &[
                ("symbol", ticker.to_string()),
                ("interval", "1day".to_string()),
                ("outputsize", outputsize.to_string()),
                ("apikey", self.api_key.clone()),
            ])
            .await
            .map_err(|e| PriceProviderError::Network(e.to_string()))?;

        if resp.status().is_server_error() {
            return Err(PriceProviderError::Network(format!("upstream returned {}", resp.status())));
        }

        let body: TwelveDataTimeSeriesResponse = resp
            .json()
            .await
            .map_err(|e| PriceProviderError::Parse(e.to_string()))?;

        // Check for rate limiting or errors
        if body.status != "ok" {
            if let Some(msg) = body.message {
                if msg.contains("API rate limit") || msg.contains("credits") || body.code == Some(429) {
                    return Err(PriceProviderError::RateLimited);
                }
                if body.code == Some(400) || body.code == Some(404) {
                    return Err(PriceProviderError::NotFound(ticker.to_string()));
                }
                return Err(PriceProviderError::BadResponse(msg));
            }
            return Err(PriceProviderError::BadResponse(
                format!("API returned status: {}", body.status)
            ));
        }

        let values = body.values
            .ok_or_else(|| PriceProviderError::BadResponse("missing values in response".into()))?;

        let mut points = values
            .into_iter()
            .map(parse_value)
            .collect::<Result<Vec<_>, _>>()?;

        // Twelve Data returns newest first, we need oldest first
        points.reverse();

        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn serve(body: serde_json::Value) -> String {
        let app = Router::new().route(
            "/time_series",
            get(move || {
                let body = body.clone();
                async move { Json(body) }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn provider(base_url: String) -> TwelveDataProvider {
        let policy = RetryPolicy {
            timeout: Duration::from_secs(2),
            retries: 0,
            backoff: Duration::from_millis(1),
        };
        TwelveDataProvider::new("test-key".into(), Some(base_url), policy).unwrap()
    }

    #[tokio::test]
    async fn test_history_is_returned_oldest_first() {
        let base = serve(json!({
            "status": "ok",
            "values": [
                { "datetime": "2026-01-03", "close": "103.5" },
                { "datetime": "2026-01-02 00:00:00", "close": "102.0" }
            ]
        }))
        .await;

        let points = provider(base).fetch_daily_history("AAPL", 2).await.unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].date, NaiveDate::from_ymd_opt(2026, 1, 2).unwrap());
        assert_eq!(points[1].close, 103.5);
    }

    #[tokio::test]
    async fn test_rate_limit_message_maps_to_rate_limited() {
        let base = serve(json!({
            "status": "error",
            "code": 429,
            "message": "You have run out of API credits for the current minute."
        }))
        .await;

        let err = provider(base).fetch_daily_history("AAPL", 2).await.unwrap_err();
        assert!(matches!(err, PriceProviderError::RateLimited));
    }

    #[tokio::test]
    async fn test_unknown_symbol_maps_to_not_found() {
        let base = serve(json!({
            "status": "error",
            "code": 404,
            "message": "symbol not found"
        }))
        .await;

        let err = provider(base).fetch_daily_history("NOPE", 2).await.unwrap_err();
        assert!(matches!(err, PriceProviderError::NotFound(t) if t == "NOPE"));
    }
}
