use log::info;
use std::sync::Arc;
use surge::JobRegistry;
use surge_executor::{HyperClient, RunConfig};
use surge_metrics::MetricsFactory;
use tracing_subscriber::EnvFilter;

mod filters;
mod filters_common;

#[tokio::main]
async fn main() {
    //init logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = RunConfig::default();
    info!(
        "control interval: {:?}, request timeout: {:?}, pacing: {:?}, max virtual users: {}",
        config.control_interval, config.request_timeout, config.pacing, config.max_vus
    );
    info!("application under test: {}", common_env::app_url());

    let registry = Arc::new(JobRegistry::new(
        Arc::new(MetricsFactory::default()),
        Arc::new(HyperClient::default()),
        config,
    ));

    let routes = filters::get_routes(registry);
    let port = common_env::http_port();
    info!("staring server on port {}...", port);
    warp::serve(routes).run(([0, 0, 0, 0], port)).await;
}
