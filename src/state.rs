use std::sync::Arc;
use crate::services::job_service::JobService;

#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<JobService>,
}
