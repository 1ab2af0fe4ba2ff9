pub mod compute_backend;
pub mod http_client;
pub mod price_provider;
pub mod twelvedata;
