use crate::filters_common;
use crate::filters_common::with_registry;
use log::trace;
use std::collections::HashMap;
use std::convert::{Infallible, TryFrom};
use std::sync::Arc;
use surge::{http_util, JobRegistry};
use surge_http::{GenericError, JobStatusQueryParams, Profile};
use warp::hyper::body::Bytes;
use warp::{Filter, Reply};

pub fn get_routes(
    registry: Arc<JobRegistry>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let prometheus_metric = filters_common::prometheus_metric(registry.clone());
    let preset_req = preset_req(registry.clone());
    let stop_req = stop_req(registry.clone());
    let history = history(registry.clone());
    let verdict_req = verdict_req(registry.clone());
    let surge_req = surge_req(registry);
    prometheus_metric
        .or(surge_req)
        .or(preset_req)
        .or(stop_req)
        .or(history)
        .or(verdict_req)
}

pub fn surge_req(
    registry: Arc<JobRegistry>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::post()
        .and(warp::path("test").and(warp::path::end()))
        .and(warp::body::content_length_limit(1024 * 1024))
        .and(warp::body::bytes())
        .and(with_registry(registry))
        .and_then(execute)
}

pub fn preset_req(
    registry: Arc<JobRegistry>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::post()
        .and(warp::path!("test" / "preset" / String))
        .and(with_registry(registry))
        .and_then(|name: String, registry: Arc<JobRegistry>| async move {
            trace!("req: preset: {}", &name);
            let base_url = common_env::app_url();
            let resp = http_util::handle_preset(&name, &base_url, &registry).await;
            trace!("resp: preset: {:?}", &resp);
            Ok::<_, Infallible>(filters_common::result_to_reply_with_status(resp))
        })
}

pub fn stop_req(
    registry: Arc<JobRegistry>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::get()
        .and(warp::path!("test" / "stop" / String))
        .and(with_registry(registry))
        .and_then(stop)
}

pub fn history(
    registry: Arc<JobRegistry>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::get()
        .and(warp::path!("test" / "status"))
        // untagged JobStatusQueryParams can't be read by serde_urlencoded directly
        .and(warp::query::<HashMap<String, String>>())
        .and(with_registry(registry))
        .and_then(
            |pager_option: HashMap<String, String>, registry: Arc<JobRegistry>| async move {
                let reply = match JobStatusQueryParams::try_from(pager_option) {
                    Ok(option) => {
                        trace!("req: all_job: {}", &option);
                        let status = http_util::handle_history_all(option, &registry).await;
                        trace!("resp: all_job: {:?}", &status);
                        filters_common::generic_result_to_reply_with_status(status)
                    }
                    Err(e) => filters_common::generic_error_to_reply_with_status(e),
                };
                Ok::<_, Infallible>(reply)
            },
        )
}

pub fn verdict_req(
    registry: Arc<JobRegistry>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::get()
        .and(warp::path!("test" / "verdict" / String))
        .and(with_registry(registry))
        .and_then(|job_id: String, registry: Arc<JobRegistry>| async move {
            let report = http_util::verdict(job_id, &registry).await;
            trace!("resp: verdict: {:?}", &report);
            Ok::<_, Infallible>(filters_common::result_to_reply_with_status(report))
        })
}

async fn stop(job_id: String, registry: Arc<JobRegistry>) -> Result<impl Reply, Infallible> {
    let resp = http_util::stop(job_id, &registry).await;
    trace!("resp: stop: {:?}", &resp);
    Ok(filters_common::generic_result_to_reply_with_status(resp))
}

pub async fn execute(body: Bytes, registry: Arc<JobRegistry>) -> Result<impl Reply, Infallible> {
    let response = match serde_json::from_slice::<Profile>(&body) {
        Ok(profile) => http_util::handle_request(profile, &registry).await,
        Err(e) => Err(GenericError::from_error(400, e)),
    };
    trace!("resp: execute: {:?}", &response);
    Ok(filters_common::result_to_reply_with_status(response))
}
