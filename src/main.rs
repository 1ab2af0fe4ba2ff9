use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use tickercast::app::create_app;
use tickercast::config::{AppConfig, PriceProviderKind};
use tickercast::external::compute_backend::ComputeBackendClient;
use tickercast::external::price_provider::PriceProvider;
use tickercast::external::twelvedata::TwelveDataProvider;
use tickercast::logging::{init_logging, LoggingConfig};
use tickercast::services::failure_cache::FailureCache;
use tickercast::services::forecast_engine::DriftForecastEngine;
use tickercast::services::job_service::{Backend, JobService};
use tickercast::services::job_sweeper::JobSweeper;
use tickercast::state::AppState;
use tickercast::store::InMemoryJobStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Initialize logging FIRST
    init_logging(LoggingConfig::from_env())?;

    let config = AppConfig::from_env()?;

    let backend = match &config.compute_backend_url {
        Some(url) => {
            tracing::info!("🔗 Forwarding forecast jobs to compute backend at {}", url);
            Backend::Remote(ComputeBackendClient::new(url, config.compute_timeout)?)
        }
        None => {
            let prices: Option<Arc<dyn PriceProvider>> = match config.price_provider {
                PriceProviderKind::TwelveData => {
                    tracing::info!("📊 Using price provider: Twelve Data");
                    Some(Arc::new(TwelveDataProvider::from_env(config.market_data.clone())?))
                }
                PriceProviderKind::None => {
                    tracing::info!("📊 No price provider configured, serving synthetic forecasts");
                    None
                }
            };
            Backend::Local {
                store: Arc::new(InMemoryJobStore::new()),
                engine: Arc::new(DriftForecastEngine::new(prices, FailureCache::new())),
            }
        }
    };
    let is_local = matches!(backend, Backend::Local { .. });

    let jobs = Arc::new(JobService::new(backend, config.jobs.clone()));
    tracing::info!(
        "⚙️ Progress mode {:?}, step {}%, tick {}ms",
        config.jobs.mode,
        config.jobs.step_pct,
        config.jobs.tick.as_millis()
    );

    let mut sweeper = if is_local {
        let mut sweeper = JobSweeper::new(jobs.clone()).await?;
        sweeper.start().await?;
        Some(sweeper)
    } else {
        None
    };

    let app = create_app(AppState { jobs: jobs.clone() });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("🚀 Tickercast backend running at http://{}/", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    jobs.shutdown();
    if let Some(sweeper) = sweeper.as_mut() {
        if let Err(e) = sweeper.stop().await {
            tracing::warn!("Job sweeper did not stop cleanly: {}", e);
        }
    }
    tracing::info!("👋 Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl-C, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
