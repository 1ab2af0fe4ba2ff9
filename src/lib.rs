pub mod app;
pub mod client;
pub mod config;
pub mod errors;
pub mod external;
pub mod logging;
pub mod models;
mod routes;
pub mod services;
pub mod state;
pub mod store;
