use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::api::ForecastApi;
use crate::client::cache::{default_ttl, CacheEntry, ResultCache};
use crate::errors::AppError;
use crate::models::{ForecastRequest, Initiated, JobState};

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub poll_interval: Duration,
    pub ttl: chrono::Duration,
    pub look_back: u32,
    pub horizon: u32,
    /// Ask the server to drop the job when its ticker is switched away from
    pub cancel_on_switch: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            ttl: default_ttl(),
            look_back: 60,
            horizon: 10,
            cancel_on_switch: true,
        }
    }
}

/// What `activate` did
#[derive(Debug, Clone, PartialEq)]
pub enum Activation {
    /// A loop for this ticker is already running
    AlreadyPolling,
    /// A fresh finished (or failed) entry exists; nothing was started
    Cached(CacheEntry),
    /// A new loop was spawned for the ticker
    Started { generation: u64 },
}

struct ActivePoll {
    ticker: String,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Tracks the forecast of the currently active ticker.
///
/// At most one poll loop runs at a time. Switching tickers cancels the
/// running loop and bumps the old ticker's generation, so a response that
/// lands after the switch is dropped instead of written to the cache.
pub struct ForecastTracker {
    api: Arc<dyn ForecastApi>,
    cache: ResultCache,
    config: PollerConfig,
    generations: Arc<DashMap<String, u64>>,
    active: Mutex<Option<ActivePoll>>,
}

impl ForecastTracker {
    pub fn new(api: Arc<dyn ForecastApi>, cache: ResultCache, config: PollerConfig) -> Self {
        Self {
            api,
            cache,
            config,
            generations: Arc::new(DashMap::new()),
            active: Mutex::new(None),
        }
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn active_ticker(&self) -> Option<String> {
        self.active.lock().as_ref().map(|a| a.ticker.clone())
    }

    pub fn is_polling(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|a| !a.handle.is_finished())
    }

    pub fn generation(&self, ticker: &str) -> u64 {
        self.generations.get(ticker).map(|g| *g).unwrap_or(0)
    }

    /// Make `ticker` the active one. Must be called inside a tokio runtime.
    pub fn activate(&self, ticker: &str) -> Activation {
        let ticker = ticker.trim().to_uppercase();
        let mut active = self.active.lock();

        if let Some(current) = active.take() {
            if current.ticker == ticker && !current.handle.is_finished() {
                *active = Some(current);
                return Activation::AlreadyPolling;
            }
            if current.ticker != ticker {
                self.stop(current);
            }
        }
        self.forget_idle(Some(&ticker));

        let cached = self.cache.get(&ticker);
        let resume = match cached {
            Some(entry) if entry.is_terminal() => {
                debug!("Forecast for {} still fresh, not polling", ticker);
                return Activation::Cached(entry);
            }
            Some(entry) => entry.job_id.clone().map(|id| (id, entry)),
            None => None,
        };

        let generation = self.bump(&ticker);
        let token = CancellationToken::new();
        let task = PollTask {
            ticker: ticker.clone(),
            generation,
            token: token.clone(),
            api: self.api.clone(),
            cache: self.cache.clone(),
            generations: self.generations.clone(),
            config: self.config.clone(),
        };

        match &resume {
            Some((job_id, _)) => info!("Resuming forecast job {} for {}", job_id, ticker),
            None => info!("Starting forecast tracking for {}", ticker),
        }
        let handle = tokio::spawn(task.run(resume));
        *active = Some(ActivePoll { ticker, token, handle });

        Activation::Started { generation }
    }

    /// Stop tracking whatever ticker is active
    pub fn deactivate(&self) {
        if let Some(current) = self.active.lock().take() {
            self.stop(current);
        }
    }

    /// User-initiated retry: forget the cached outcome and start over
    pub fn restart(&self, ticker: &str) -> Activation {
        let ticker = ticker.trim().to_uppercase();
        if !self.is_polling() || self.active_ticker().as_deref() != Some(ticker.as_str()) {
            self.cache.invalidate(&ticker);
        }
        self.activate(&ticker)
    }

    /// Drop expired cache entries and forget the generation of every ticker
    /// that has neither a running loop nor a cache entry. Returns how many
    /// tickers were forgotten.
    pub fn prune(&self) -> usize {
        self.cache.purge_expired();
        let active = self.active.lock().as_ref().map(|a| a.ticker.clone());
        self.forget_idle(active.as_deref())
    }

    // Stopped loops also check their cancelled token, so a forgotten
    // generation restarting at 1 cannot revive them
    fn forget_idle(&self, keep: Option<&str>) -> usize {
        let before = self.generations.len();
        self.generations
            .retain(|ticker, _| keep == Some(ticker.as_str()) || self.cache.get(ticker).is_some());
        before.saturating_sub(self.generations.len())
    }

    fn bump(&self, ticker: &str) -> u64 {
        let mut generation = self.generations.entry(ticker.to_string()).or_insert(0);
        *generation += 1;
        *generation
    }

    fn stop(&self, poll: ActivePoll) {
        // Bump first: a loop holding the generation guard finishes its write,
        // any later write sees the new generation
        self.bump(&poll.ticker);
        poll.token.cancel();
        debug!("Stopped polling {}", poll.ticker);
    }
}

impl Drop for ForecastTracker {
    fn drop(&mut self) {
        if let Some(current) = self.active.get_mut().take() {
            current.token.cancel();
        }
    }
}

struct PollTask {
    ticker: String,
    generation: u64,
    token: CancellationToken,
    api: Arc<dyn ForecastApi>,
    cache: ResultCache,
    generations: Arc<DashMap<String, u64>>,
    config: PollerConfig,
}

impl PollTask {
    /// Write `entry` unless this loop was superseded. Returns false once stale.
    fn publish(&self, entry: CacheEntry) -> bool {
        let Some(current) = self.generations.get(&self.ticker) else {
            return false;
        };
        if self.token.is_cancelled() || *current != self.generation {
            debug!(
                "Discarding stale update for {} (generation {} vs {})",
                self.ticker, self.generation, *current
            );
            return false;
        }
        // Written while the generation guard is held so a switch cannot interleave
        self.cache.set(entry);
        true
    }

    async fn abandon(&self, job_id: &str) {
        if !self.config.cancel_on_switch {
            return;
        }
        match self.api.cancel(job_id).await {
            Ok(()) => info!("Cancelled abandoned forecast job {} for {}", job_id, self.ticker),
            Err(AppError::NotFound) => debug!("Abandoned job {} already gone", job_id),
            Err(e) => warn!("Failed to cancel abandoned job {}: {}", job_id, e),
        }
    }

    /// Kick off a new job. `None` when the loop has nothing left to poll.
    async fn start_job(&self) -> Option<(String, CacheEntry)> {
        let request = ForecastRequest {
            ticker: self.ticker.clone(),
            look_back: self.config.look_back,
            horizon: self.config.horizon,
        };
        let running = CacheEntry::running(&self.ticker, None, self.config.ttl, Utc::now());
        if !self.publish(running.clone()) {
            return None;
        }

        match self.api.initiate(&request).await {
            Ok(Initiated::Immediate(payload)) => {
                self.publish(running.into_done(payload, Utc::now()));
                None
            }
            Ok(Initiated::Job { job_id }) => {
                let entry = CacheEntry {
                    job_id: Some(job_id.clone()),
                    ..running
                };
                if !self.publish(entry.clone()) {
                    self.abandon(&job_id).await;
                    return None;
                }
                Some((job_id, entry))
            }
            Err(e) => {
                warn!("Failed to start forecast for {}: {}", self.ticker, e);
                self.publish(running.into_error(e.to_string(), Utc::now()));
                None
            }
        }
    }

    async fn run(self, resume: Option<(String, CacheEntry)>) {
        let mut resumed = resume.is_some();
        let (mut job_id, mut entry) = match resume {
            Some(found) => found,
            None => match self.start_job().await {
                Some(started) => started,
                None => return,
            },
        };

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires immediately; the first poll waits one interval
        interval.tick().await;

        loop {
            tokio::select! {
                _ = self.token.cancelled() => {
                    self.abandon(&job_id).await;
                    return;
                }
                _ = interval.tick() => {}
            }

            let status = match self.api.status(&job_id).await {
                Ok(status) => status,
                Err(AppError::NotFound) if resumed => {
                    // Job was cancelled or swept while nobody watched it
                    debug!("Resumed job {} for {} is gone, starting over", job_id, self.ticker);
                    resumed = false;
                    match self.start_job().await {
                        Some((id, started)) => {
                            job_id = id;
                            entry = started;
                            continue;
                        }
                        None => return,
                    }
                }
                Err(e) => {
                    warn!("Status poll for job {} ({}) failed: {}", job_id, self.ticker, e);
                    self.publish(entry.into_error(e.to_string(), Utc::now()));
                    return;
                }
            };
            resumed = false;

            match status.state {
                JobState::Done => {
                    let finished = match self.api.result(&job_id).await {
                        Ok(payload) => {
                            info!("Forecast for {} ready (job {})", self.ticker, job_id);
                            entry.with_progress(&status).into_done(payload, Utc::now())
                        }
                        Err(e) => entry.into_error(e.to_string(), Utc::now()),
                    };
                    self.publish(finished);
                    return;
                }
                JobState::Error => {
                    let message = status
                        .message
                        .unwrap_or_else(|| "forecast job failed".to_string());
                    self.publish(entry.into_error(message, Utc::now()));
                    return;
                }
                JobState::Queued | JobState::Running => {
                    entry = entry.with_progress(&status);
                    if !self.publish(entry.clone()) {
                        self.abandon(&job_id).await;
                        return;
                    }
                }
            }
        }
    }
}
