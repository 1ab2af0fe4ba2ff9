mod forecast;
mod job;

pub use forecast::{ForecastMetrics, ForecastParams, ForecastPayload, ForecastPoint, ForecastRequest, Initiated};
pub use job::{InvalidTransition, Job, JobState, JobStatus, NewJob, StepOutcome};
