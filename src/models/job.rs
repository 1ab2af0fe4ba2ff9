use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::forecast::{ForecastPayload, ForecastRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Done,
    Error,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Done => "done",
            JobState::Error => "error",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal job transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: JobState,
    pub to: JobState,
}

/// Result of applying one progress step to a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Progress moved but the job is still running
    Advanced,
    /// Progress hit 100; the caller must attach a payload or an error
    NeedsResult,
    /// Another stepper is already computing the result, nothing changed
    Computing,
    /// Job was already done or failed, nothing changed
    Terminal,
}

/// One forecast computation and its progress.
///
/// Transitions only move forward: `queued -> running -> done` or
/// `running -> error`. `result` is set iff the job is done, `error_message`
/// iff it failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub ticker: String,
    pub look_back: u32,
    pub horizon: u32,
    pub state: JobState,
    pub pct: u8,
    pub eta_seconds: u32,
    pub result: Option<ForecastPayload>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Set while the forecast for a job at 100% is being computed
    #[serde(skip)]
    pub computing: bool,
}

/// Everything the registry needs to create a job
#[derive(Debug, Clone)]
pub struct NewJob {
    pub request: ForecastRequest,
    pub eta_seconds: u32,
}

impl Job {
    pub fn new(id: String, new_job: NewJob) -> Self {
        Self {
            id,
            ticker: new_job.request.ticker,
            look_back: new_job.request.look_back,
            horizon: new_job.request.horizon,
            state: JobState::Queued,
            pct: 0,
            eta_seconds: new_job.eta_seconds,
            result: None,
            error_message: None,
            created_at: Utc::now(),
            finished_at: None,
            computing: false,
        }
    }

    pub fn request(&self) -> ForecastRequest {
        ForecastRequest {
            ticker: self.ticker.clone(),
            look_back: self.look_back,
            horizon: self.horizon,
        }
    }

    /// Apply one progress step of `step_pct` percent.
    ///
    /// The first step out of `queued` enters `running` and applies the
    /// increment in the same call. Returning `NeedsResult` claims the
    /// computation: later steps see `Computing` until `complete` or `fail`.
    pub fn advance(&mut self, step_pct: u8) -> StepOutcome {
        match self.state {
            JobState::Done | JobState::Error => return StepOutcome::Terminal,
            JobState::Running if self.computing => return StepOutcome::Computing,
            JobState::Queued => {
                self.state = JobState::Running;
                self.pct = step_pct.min(100);
            }
            JobState::Running => {
                self.pct = self.pct.saturating_add(step_pct).min(100);
            }
        }
        self.eta_seconds = self.eta_seconds.saturating_sub(1);

        if self.pct >= 100 {
            self.computing = true;
            StepOutcome::NeedsResult
        } else {
            StepOutcome::Advanced
        }
    }

    pub fn complete(&mut self, payload: ForecastPayload) -> Result<(), InvalidTransition> {
        self.ensure_running(JobState::Done)?;
        self.state = JobState::Done;
        self.computing = false;
        self.pct = 100;
        self.eta_seconds = 0;
        self.result = Some(payload);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), InvalidTransition> {
        self.ensure_running(JobState::Error)?;
        self.state = JobState::Error;
        self.computing = false;
        self.eta_seconds = 0;
        self.error_message = Some(message.into());
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    fn ensure_running(&self, to: JobState) -> Result<(), InvalidTransition> {
        if self.state != JobState::Running {
            return Err(InvalidTransition { from: self.state, to });
        }
        Ok(())
    }

    pub fn status(&self) -> JobStatus {
        JobStatus {
            state: self.state,
            pct: self.pct,
            eta_seconds: self.eta_seconds,
            message: self.error_message.clone(),
        }
    }
}

/// Wire shape of `GET /forecast/status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub state: JobState,
    pub pct: u8,
    pub eta_seconds: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::forecast::ForecastMetrics;

    fn new_job(horizon: u32) -> Job {
        Job::new(
            "job-1".into(),
            NewJob {
                request: ForecastRequest {
                    ticker: "AAPL".into(),
                    look_back: 60,
                    horizon,
                },
                eta_seconds: 5,
            },
        )
    }

    fn payload() -> ForecastPayload {
        ForecastPayload {
            ticker: "AAPL".into(),
            look_back: 60,
            horizon: 0,
            forecast: Vec::new(),
            metrics: ForecastMetrics { rmse: 0.0, mape: 0.0, coverage: 0.0 },
        }
    }

    #[test]
    fn test_first_step_enters_running_with_increment() {
        let mut job = new_job(10);
        assert_eq!(job.advance(20), StepOutcome::Advanced);
        assert_eq!(job.state, JobState::Running);
        assert_eq!(job.pct, 20);
        assert_eq!(job.eta_seconds, 4);
    }

    #[test]
    fn test_progress_clamps_at_100() {
        let mut job = new_job(10);
        job.advance(30);
        job.advance(30);
        job.advance(30);
        assert_eq!(job.advance(30), StepOutcome::NeedsResult);
        assert_eq!(job.pct, 100);
    }

    #[test]
    fn test_claimed_computation_blocks_further_steps() {
        let mut job = new_job(10);
        assert_eq!(job.advance(100), StepOutcome::NeedsResult);
        let eta = job.eta_seconds;

        assert_eq!(job.advance(20), StepOutcome::Computing);
        assert_eq!(job.eta_seconds, eta);
        assert_eq!(job.status().state, JobState::Running);

        job.complete(payload()).unwrap();
        assert!(!job.computing);
        assert_eq!(job.advance(20), StepOutcome::Terminal);
    }

    #[test]
    fn test_complete_only_from_running() {
        let mut job = new_job(10);
        let err = job.complete(payload()).unwrap_err();
        assert_eq!(err, InvalidTransition { from: JobState::Queued, to: JobState::Done });

        job.advance(100);
        job.complete(payload()).unwrap();
        assert_eq!(job.state, JobState::Done);
        assert!(job.result.is_some());
        assert!(job.error_message.is_none());
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn test_terminal_jobs_do_not_move() {
        let mut job = new_job(10);
        job.advance(20);
        job.fail("engine exploded").unwrap();

        let before = job.clone();
        assert_eq!(job.advance(20), StepOutcome::Terminal);
        assert_eq!(job, before);
        assert!(job.complete(payload()).is_err());
        assert!(job.fail("again").is_err());
    }

    #[test]
    fn test_status_carries_error_message() {
        let mut job = new_job(10);
        job.advance(20);
        job.fail("no prices").unwrap();

        let status = job.status();
        assert_eq!(status.state, JobState::Error);
        assert_eq!(status.message.as_deref(), Some("no prices"));

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "error");
        assert!(json.get("etaSeconds").is_some());
    }
}
