use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Single step of a ticker price forecast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub step: u32,
    pub date: NaiveDate,
    pub pred_price: f64,
    pub pred_return: f64,
}

/// Fit quality of the model that produced a forecast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastMetrics {
    pub rmse: f64,
    pub mape: f64,
    pub coverage: f64,
}

/// Complete forecast for a ticker, attached to a job once it is done.
///
/// `forecast` always holds exactly `horizon` points with steps `1..=horizon`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPayload {
    pub ticker: String,
    pub look_back: u32,
    pub horizon: u32,
    pub forecast: Vec<ForecastPoint>,
    pub metrics: ForecastMetrics,
}

/// Raw forecast request as it arrives over HTTP (query string or JSON body).
///
/// Numeric fields are signed so that non-positive values reach validation
/// instead of failing deserialization.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ForecastParams {
    pub ticker: Option<String>,
    pub look_back: Option<i64>,
    pub horizon: Option<i64>,
    pub sync: Option<bool>,
}

impl ForecastParams {
    /// Fields present in `other` win over the ones in `self`.
    pub fn merge(self, other: ForecastParams) -> ForecastParams {
        ForecastParams {
            ticker: other.ticker.or(self.ticker),
            look_back: other.look_back.or(self.look_back),
            horizon: other.horizon.or(self.horizon),
            sync: other.sync.or(self.sync),
        }
    }
}

/// Validated forecast request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastRequest {
    pub ticker: String,
    pub look_back: u32,
    pub horizon: u32,
}

/// What the initiator handed back: a job to poll, or a finished forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Initiated {
    Job {
        #[serde(rename = "jobId")]
        job_id: String,
    },
    Immediate(ForecastPayload),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_fields_override_query() {
        let query = ForecastParams {
            ticker: Some("MSFT".into()),
            look_back: Some(30),
            horizon: None,
            sync: None,
        };
        let body = ForecastParams {
            ticker: Some("AAPL".into()),
            look_back: None,
            horizon: Some(5),
            sync: None,
        };

        let merged = query.merge(body);
        assert_eq!(merged.ticker.as_deref(), Some("AAPL"));
        assert_eq!(merged.look_back, Some(30));
        assert_eq!(merged.horizon, Some(5));
    }

    #[test]
    fn test_initiated_accepts_job_id_or_payload() {
        let job: Initiated = serde_json::from_str(r#"{"jobId":"abc"}"#).unwrap();
        assert_eq!(job, Initiated::Job { job_id: "abc".into() });

        let immediate: Initiated = serde_json::from_str(
            r#"{"ticker":"AAPL","look_back":60,"horizon":1,
                "forecast":[{"step":1,"date":"2026-01-02","pred_price":101.0,"pred_return":0.01}],
                "metrics":{"rmse":1.0,"mape":2.0,"coverage":0.8}}"#,
        )
        .unwrap();
        match immediate {
            Initiated::Immediate(payload) => assert_eq!(payload.forecast.len(), 1),
            other => panic!("expected immediate payload, got {:?}", other),
        }
    }
}
