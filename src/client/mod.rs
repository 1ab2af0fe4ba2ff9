//! Client side of the forecast job API: the per-ticker result cache and the
//! poll loop that fills it.

pub mod api;
pub mod cache;
pub mod poller;

pub use api::ForecastApi;
pub use cache::{CacheEntry, CacheStatus, EntryTtl, ExpiryPolicy, FixedTtl, ResultCache};
pub use poller::{Activation, ForecastTracker, PollerConfig};
