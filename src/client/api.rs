use async_trait::async_trait;

use crate::errors::AppError;
use crate::external::compute_backend::ComputeBackendClient;
use crate::models::{ForecastPayload, ForecastRequest, Initiated, JobStatus};
use crate::services::job_service::JobService;

/// The job API as seen by a poller, whether over HTTP or in-process
#[async_trait]
pub trait ForecastApi: Send + Sync + 'static {
    async fn initiate(&self, request: &ForecastRequest) -> Result<Initiated, AppError>;

    async fn status(&self, job_id: &str) -> Result<JobStatus, AppError>;

    async fn result(&self, job_id: &str) -> Result<ForecastPayload, AppError>;

    async fn cancel(&self, job_id: &str) -> Result<(), AppError>;
}

#[async_trait]
impl ForecastApi for ComputeBackendClient {
    async fn initiate(&self, request: &ForecastRequest) -> Result<Initiated, AppError> {
        ComputeBackendClient::initiate(self, request, false).await
    }

    async fn status(&self, job_id: &str) -> Result<JobStatus, AppError> {
        ComputeBackendClient::status(self, job_id).await
    }

    async fn result(&self, job_id: &str) -> Result<ForecastPayload, AppError> {
        ComputeBackendClient::result(self, job_id).await
    }

    async fn cancel(&self, job_id: &str) -> Result<(), AppError> {
        ComputeBackendClient::cancel(self, job_id).await
    }
}

#[async_trait]
impl ForecastApi for JobService {
    async fn initiate(&self, request: &ForecastRequest) -> Result<Initiated, AppError> {
        self.initiate_request(request, false).await
    }

    async fn status(&self, job_id: &str) -> Result<JobStatus, AppError> {
        JobService::status(self, job_id).await
    }

    async fn result(&self, job_id: &str) -> Result<ForecastPayload, AppError> {
        JobService::result(self, job_id).await
    }

    async fn cancel(&self, job_id: &str) -> Result<(), AppError> {
        JobService::cancel(self, job_id).await
    }
}
