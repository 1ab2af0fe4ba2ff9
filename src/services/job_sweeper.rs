use std::sync::Arc;

use chrono::Utc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;

use crate::errors::AppError;
use crate::services::job_service::JobService;

/// Cron-driven removal of finished jobs past their retention window
pub struct JobSweeper {
    scheduler: JobScheduler,
    jobs: Arc<JobService>,
}

impl JobSweeper {
    pub async fn new(jobs: Arc<JobService>) -> Result<Self, AppError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::Upstream(format!("Failed to create scheduler: {}", e)))?;

        Ok(Self { scheduler, jobs })
    }

    pub async fn start(&mut self) -> Result<(), AppError> {
        let schedule = self.jobs.config().sweep_schedule.clone();
        let retention = self.jobs.config().retention;
        let jobs = self.jobs.clone();

        let job = Job::new_async(schedule.as_str(), move |_uuid, _l| {
            let jobs = jobs.clone();
            Box::pin(async move {
                jobs.sweep(Utc::now());
            })
        })
        .map_err(|e| AppError::Validation(format!("Invalid JOB_SWEEP_SCHEDULE {}: {}", schedule, e)))?;

        self.scheduler.add(job)
            .await
            .map_err(|e| AppError::Upstream(format!("Failed to add sweep job: {}", e)))?;

        self.scheduler.start()
            .await
            .map_err(|e| AppError::Upstream(format!("Failed to start scheduler: {}", e)))?;

        info!(
            "📅 Job sweeper scheduled [cron: {}], retention {}s",
            schedule,
            retention.num_seconds()
        );
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<(), AppError> {
        info!("🛑 Stopping job sweeper...");
        self.scheduler.shutdown()
            .await
            .map_err(|e| AppError::Upstream(format!("Failed to stop scheduler: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobConfig;
    use crate::services::forecast_engine::DriftForecastEngine;
    use crate::store::InMemoryJobStore;

    #[tokio::test]
    async fn test_rejects_invalid_schedule() {
        let config = JobConfig {
            sweep_schedule: "61 61 61 * * *".to_string(),
            ..JobConfig::default()
        };
        let jobs = Arc::new(JobService::local(
            Arc::new(InMemoryJobStore::new()),
            Arc::new(DriftForecastEngine::synthetic()),
            config,
        ));

        let mut sweeper = JobSweeper::new(jobs).await.unwrap();
        assert!(matches!(sweeper.start().await, Err(AppError::Validation(_))));
    }
}
