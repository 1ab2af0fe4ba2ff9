pub mod failure_cache;
pub mod forecast_engine;
pub mod job_service;
pub mod job_sweeper;
