use http::header::CONTENT_TYPE;
use http::{Response, StatusCode};
use hyper::Body;
use log::error;
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use surge::JobRegistry;
use surge_http::{GenericError, GenericResponse};
use warp::{reply, Filter};

pub fn with_registry(
    registry: Arc<JobRegistry>,
) -> impl Filter<Extract = (Arc<JobRegistry>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || registry.clone())
}

pub fn prometheus_metric(
    registry: Arc<JobRegistry>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::get()
        .and(warp::path("metrics"))
        .and(warp::path::end())
        .map(move || {
            let encoder = TextEncoder::new();
            let metrics = registry.metrics_factory().registry().gather();
            let mut resp_buffer = vec![];
            match encoder.encode(&metrics, &mut resp_buffer) {
                Ok(_) => {
                    let mut resp = Response::new(Body::from(resp_buffer));
                    if let Ok(content_type) = encoder.format_type().parse() {
                        resp.headers_mut().insert(CONTENT_TYPE, content_type);
                    }
                    resp
                }
                Err(e) => {
                    error!("[prometheus_metric] - error exporting metrics: {}", e);
                    let mut resp = Response::new(Body::from("Error exporting metrics"));
                    *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                    resp
                }
            }
        })
}

pub fn generic_result_to_reply_with_status<T: Serialize>(
    status: Result<GenericResponse<T>, GenericError>,
) -> reply::WithStatus<reply::Json> {
    result_to_reply_with_status(status)
}

pub fn result_to_reply_with_status<T: Serialize>(
    result: Result<T, GenericError>,
) -> reply::WithStatus<reply::Json> {
    match result {
        Ok(resp) => reply::with_status(reply::json(&resp), StatusCode::OK),
        Err(err) => generic_error_to_reply_with_status(err),
    }
}

pub fn generic_error_to_reply_with_status(err: GenericError) -> reply::WithStatus<reply::Json> {
    let status_code =
        StatusCode::from_u16(err.error_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    reply::with_status(reply::json(&err), status_code)
}

#[cfg(test)]
pub(crate) mod test_common {
    use crate::filters::get_routes;
    use hyper::{Body, Request};
    use std::net::SocketAddr;
    use std::sync::{Arc, Once};
    use std::time::Duration;
    use surge::JobRegistry;
    use surge_executor::{HyperClient, RunConfig};
    use surge_metrics::MetricsFactory;

    static ONCE: Once = Once::new();

    pub fn setup() {
        ONCE.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter("surge=trace,surge_executor=debug,surge_thresholds=debug")
                .try_init();
        });
    }

    pub fn test_config() -> RunConfig {
        RunConfig {
            control_interval: Duration::from_millis(100),
            request_timeout: Duration::from_secs(2),
            pacing: Duration::from_millis(50),
            max_vus: 50,
        }
    }

    /// Start the job service on an ephemeral port
    pub fn start_server() -> (SocketAddr, Arc<JobRegistry>) {
        let registry = Arc::new(JobRegistry::new(
            Arc::new(MetricsFactory::default()),
            Arc::new(HyperClient::default()),
            test_config(),
        ));
        let (addr, server) =
            warp::serve(get_routes(registry.clone())).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);
        (addr, registry)
    }

    pub fn send_request(body: String, addr: SocketAddr, path: &str) -> hyper::client::ResponseFuture {
        let client = hyper::Client::new();
        let req = Request::builder()
            .method("POST")
            .uri(format!("http://{}/{}", addr, path))
            .body(Body::from(body))
            .expect("request builder");
        client.request(req)
    }

    pub async fn get_json(addr: SocketAddr, path: &str) -> (u16, serde_json::Value) {
        let client = hyper::Client::new();
        let uri = format!("http://{}/{}", addr, path).parse().unwrap();
        let resp = client.get(uri).await.unwrap();
        let status = resp.status().as_u16();
        let body = hyper::body::to_bytes(resp).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    pub async fn get_text(addr: SocketAddr, path: &str) -> String {
        let client = hyper::Client::new();
        let uri = format!("http://{}/{}", addr, path).parse().unwrap();
        let resp = client.get(uri).await.unwrap();
        let body = hyper::body::to_bytes(resp).await.unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    pub fn get_value_for_metrics(metrics_name: &str, metrics: &str) -> Option<f64> {
        metrics
            .lines()
            .filter(|line| !line.starts_with('#'))
            .find(|line| line.starts_with(metrics_name))
            .and_then(|line| line.rsplit_once(' '))
            .and_then(|(_, value)| value.parse::<f64>().ok())
    }
}
