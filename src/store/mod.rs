pub mod jobs;

pub use jobs::{InMemoryJobStore, JobStore};
