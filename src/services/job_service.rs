use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{JobConfig, ProgressMode};
use crate::errors::AppError;
use crate::external::compute_backend::ComputeBackendClient;
use crate::models::{
    ForecastParams, ForecastPayload, ForecastRequest, Initiated, JobState, JobStatus, NewJob, StepOutcome,
};
use crate::services::forecast_engine::ForecastEngine;
use crate::store::JobStore;

static TICKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Z0-9^][A-Z0-9.=^-]{0,14}$").expect("ticker pattern compiles")
});

const LOOK_BACK_RANGE: (i64, i64) = (10, 365);
const HORIZON_RANGE: (i64, i64) = (1, 60);

/// Where forecast jobs actually live
pub enum Backend {
    /// Jobs held in this process
    Local {
        store: Arc<dyn JobStore>,
        engine: Arc<dyn ForecastEngine>,
    },
    /// Everything forwarded to an external compute service
    Remote(ComputeBackendClient),
}

/// Job lifecycle: initiate, step, read, cancel, sweep.
pub struct JobService {
    backend: Backend,
    config: JobConfig,
    workers: Arc<DashMap<String, CancellationToken>>,
}

impl JobService {
    pub fn new(backend: Backend, config: JobConfig) -> Self {
        Self {
            backend,
            config,
            workers: Arc::new(DashMap::new()),
        }
    }

    pub fn local(store: Arc<dyn JobStore>, engine: Arc<dyn ForecastEngine>, config: JobConfig) -> Self {
        Self::new(Backend::Local { store, engine }, config)
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            Backend::Local { .. } => "local",
            Backend::Remote(_) => "remote",
        }
    }

    /// Number of background workers still stepping jobs
    pub fn active_workers(&self) -> usize {
        self.workers.len()
    }

    /// Validate the request, then create a job (or answer right away when
    /// `sync` is set or the compute backend replied with a finished result).
    pub async fn initiate(&self, params: ForecastParams) -> Result<Initiated, AppError> {
        let sync = params.sync.unwrap_or(false);
        let request = validate_request(params, &self.config)?;
        self.initiate_request(&request, sync).await
    }

    pub async fn initiate_request(&self, request: &ForecastRequest, sync: bool) -> Result<Initiated, AppError> {
        match &self.backend {
            Backend::Remote(client) => {
                info!("Forwarding forecast for {} to {}", request.ticker, client.base_url());
                client.initiate(request, sync).await
            }
            Backend::Local { engine, .. } if sync => {
                info!("Running synchronous forecast for {} (horizon {})", request.ticker, request.horizon);
                let payload = engine.forecast(request).await?;
                check_payload(request.horizon, &payload).map_err(AppError::Upstream)?;
                Ok(Initiated::Immediate(payload))
            }
            Backend::Local { store, engine } => {
                let job = store
                    .create(NewJob {
                        request: request.clone(),
                        eta_seconds: self.config.initial_eta_seconds,
                    })
                    .await;
                info!(
                    "Created forecast job {} for {} (look_back {}, horizon {})",
                    job.id, job.ticker, job.look_back, job.horizon
                );

                if self.config.mode == ProgressMode::Background {
                    self.spawn_worker(job.id.clone(), store.clone(), engine.clone());
                }
                Ok(Initiated::Job { job_id: job.id })
            }
        }
    }

    /// Report a job's progress.
    ///
    /// In poll-driven mode this applies exactly one step per call, so only
    /// one poller per job should be calling it. In background mode it is a
    /// plain snapshot read.
    pub async fn status(&self, job_id: &str) -> Result<JobStatus, AppError> {
        match &self.backend {
            Backend::Remote(client) => client.status(job_id).await,
            Backend::Local { store, engine } => match self.config.mode {
                ProgressMode::PollDriven => {
                    step_job(store.clone(), engine.clone(), job_id, self.config.step_pct).await
                }
                ProgressMode::Background => store
                    .get(job_id)
                    .await
                    .map(|job| job.status())
                    .ok_or(AppError::NotFound),
            },
        }
    }

    /// Payload of a finished job; `NotFound` while it is unknown, running or failed
    pub async fn result(&self, job_id: &str) -> Result<ForecastPayload, AppError> {
        match &self.backend {
            Backend::Remote(client) => client.result(job_id).await,
            Backend::Local { store, .. } => {
                let job = store.get(job_id).await.ok_or(AppError::NotFound)?;
                match (job.state, job.result) {
                    (JobState::Done, Some(payload)) => Ok(payload),
                    _ => Err(AppError::NotFound),
                }
            }
        }
    }

    /// Abandon a job: stop its worker and drop it from the registry
    pub async fn cancel(&self, job_id: &str) -> Result<(), AppError> {
        match &self.backend {
            Backend::Remote(client) => client.cancel(job_id).await,
            Backend::Local { store, .. } => {
                if let Some((_, token)) = self.workers.remove(job_id) {
                    token.cancel();
                }
                let job = store.remove(job_id).await.ok_or(AppError::NotFound)?;
                info!("Cancelled forecast job {} for {} in state {}", job.id, job.ticker, job.state);
                Ok(())
            }
        }
    }

    /// Remove terminal jobs that finished more than the retention window before `now`
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        match &self.backend {
            Backend::Remote(_) => 0,
            Backend::Local { store, .. } => {
                let removed = store.sweep(now - self.config.retention);
                if removed > 0 {
                    info!("Swept {} finished forecast jobs ({} remain)", removed, store.len());
                } else {
                    debug!("Job sweep: nothing to remove");
                }
                removed
            }
        }
    }

    /// Stop every background worker, leaving jobs where they are
    pub fn shutdown(&self) {
        for entry in self.workers.iter() {
            entry.value().cancel();
        }
        self.workers.clear();
    }

    fn spawn_worker(&self, job_id: String, store: Arc<dyn JobStore>, engine: Arc<dyn ForecastEngine>) {
        let token = CancellationToken::new();
        self.workers.insert(job_id.clone(), token.clone());

        let workers = self.workers.clone();
        let tick = self.config.tick;
        let step_pct = self.config.step_pct;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            // The first tick completes immediately; a fresh job starts queued
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Worker for job {} cancelled", job_id);
                        break;
                    }
                    _ = interval.tick() => {
                        match step_job(store.clone(), engine.clone(), &job_id, step_pct).await {
                            Ok(status) if status.state.is_terminal() => {
                                debug!("Worker for job {} finished in state {}", job_id, status.state);
                                break;
                            }
                            Ok(_) => {}
                            Err(e) => {
                                debug!("Worker for job {} stopping: {}", job_id, e);
                                break;
                            }
                        }
                    }
                }
            }

            workers.remove(&job_id);
        });
    }
}

/// Apply one progress step to a job under its lock.
///
/// Terminal jobs are returned unchanged. When progress reaches 100 the lock
/// is released and the engine runs on its own task, so readers keep seeing
/// the `running` snapshot and a dropped caller cannot abandon the job
/// half-way. The job ends `done` or `error` once the engine returns.
pub async fn step_job(
    store: Arc<dyn JobStore>,
    engine: Arc<dyn ForecastEngine>,
    job_id: &str,
    step_pct: u8,
) -> Result<JobStatus, AppError> {
    let request = {
        let mut job = store.lock(job_id).await.ok_or(AppError::NotFound)?;
        if job.advance(step_pct) != StepOutcome::NeedsResult {
            return Ok(job.status());
        }
        job.request()
    };

    let id = job_id.to_string();
    tokio::spawn(finish_job(store, engine, id, request))
        .await
        .map_err(|e| AppError::Upstream(format!("forecast task for job {} aborted: {}", job_id, e)))?
}

/// Run the engine with no lock held, then record its outcome on the job
async fn finish_job(
    store: Arc<dyn JobStore>,
    engine: Arc<dyn ForecastEngine>,
    job_id: String,
    request: ForecastRequest,
) -> Result<JobStatus, AppError> {
    let computed = engine.forecast(&request).await;

    // Cancelled while the engine ran
    let mut job = store.lock(&job_id).await.ok_or(AppError::NotFound)?;
    let outcome = match computed {
        Ok(payload) => match check_payload(job.horizon, &payload) {
            Ok(()) => job.complete(payload),
            Err(msg) => job.fail(msg),
        },
        Err(e) => {
            warn!("Forecast job {} for {} failed: {}", job.id, job.ticker, e);
            job.fail(e.to_string())
        }
    };
    if let Err(e) = outcome {
        error!("Forecast job {}: {}", job.id, e);
    } else {
        info!("Forecast job {} for {} finished: {}", job.id, job.ticker, job.state);
    }

    Ok(job.status())
}

fn check_payload(horizon: u32, payload: &ForecastPayload) -> Result<(), String> {
    let steps_match = payload
        .forecast
        .iter()
        .zip(1..)
        .all(|(point, step)| point.step == step);
    if payload.forecast.len() != horizon as usize || !steps_match {
        return Err(format!(
            "engine returned {} forecast points for horizon {}",
            payload.forecast.len(),
            horizon
        ));
    }
    Ok(())
}

fn bounded(name: &str, value: i64, (min, max): (i64, i64)) -> Result<u32, AppError> {
    if value <= 0 {
        return Err(AppError::Validation(format!("{} must be a positive integer, got {}", name, value)));
    }
    if value < min || value > max {
        return Err(AppError::Validation(format!(
            "{} must be between {} and {}, got {}",
            name, min, max, value
        )));
    }
    // Range-checked above
    Ok(value as u32)
}

/// Turn raw parameters into a forecast request, applying configured defaults
pub fn validate_request(params: ForecastParams, config: &JobConfig) -> Result<ForecastRequest, AppError> {
    let ticker = params
        .ticker
        .map(|t| t.trim().to_uppercase())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Validation("ticker is required".to_string()))?;
    if !TICKER_RE.is_match(&ticker) {
        return Err(AppError::Validation(format!("invalid ticker: {}", ticker)));
    }

    let look_back = bounded(
        "look_back",
        params.look_back.unwrap_or(config.default_look_back.into()),
        LOOK_BACK_RANGE,
    )?;
    let horizon = bounded(
        "horizon",
        params.horizon.unwrap_or(config.default_horizon.into()),
        HORIZON_RANGE,
    )?;

    Ok(ForecastRequest { ticker, look_back, horizon })
}
