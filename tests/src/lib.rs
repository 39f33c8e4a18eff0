#[cfg(test)]
mod tests {
    use common_types::JobStatus;
    use env_logger::Env;
    use httpmock::prelude::*;
    use log::info;
    use more_asserts::assert_ge;
    use rstest::rstest;
    use serde_json::Value;
    use std::fs::File;
    use std::path::PathBuf;
    use std::sync::{Arc, Once};
    use std::time::Duration;
    use surge::JobRegistry;
    use surge_executor::{HyperClient, RunConfig};
    use surge_http::Profile;
    use surge_metrics::MetricsFactory;
    use tokio::time::sleep;

    pub static TEST_PATH: &str = "/test";
    pub static STATUS_PATH: &str = "/test/status";
    pub static VERDICT_PATH: &str = "/test/verdict";
    pub static METRICS_PATH: &str = "/metrics";

    static ONCE: Once = Once::new();
    fn init_logger() {
        ONCE.call_once(|| {
            env_logger::Builder::from_env(Env::default().default_filter_or("info"))
                .format_timestamp_millis()
                .init();
        });
    }

    /// Job service started separately, used by the ignored tests
    pub fn address() -> String {
        std::env::var("SURGE_ADDRESS").unwrap_or_else(|_| "http://localhost:3030".to_string())
    }

    pub fn resource_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src/resources")
    }

    fn read_scenario(path: &str) -> Value {
        let path = resource_dir().join(path);
        serde_json::from_reader::<_, Value>(File::open(path).unwrap()).unwrap()
    }

    fn registry() -> JobRegistry {
        JobRegistry::new(
            Arc::new(MetricsFactory::default()),
            Arc::new(HyperClient::default()),
            RunConfig {
                control_interval: Duration::from_millis(100),
                request_timeout: Duration::from_secs(2),
                pacing: Duration::from_millis(100),
                max_vus: 20,
            },
        )
    }

    fn set_target(profile: &mut Value, host: &str, port: u16) {
        let target = profile.get_mut("target").unwrap();
        target["host"] = Value::String(host.to_string());
        target["port"] = Value::Number(port.into());
    }

    fn mock_status(scenario: &Value) -> u16 {
        scenario["mock"]["status"].as_u64().unwrap() as u16
    }

    fn expected_status(scenario: &Value) -> JobStatus {
        serde_json::from_value(scenario["expectation"]["status"].clone()).unwrap()
    }

    async fn wait_for_finish(registry: &JobRegistry, job_id: &str) -> JobStatus {
        for _ in 0..200 {
            let status = registry.job_status(job_id).await;
            let status = *status.get(job_id).unwrap();
            if status.is_finished() {
                return status;
            }
            sleep(Duration::from_millis(100)).await;
        }
        panic!("job {} is still running", job_id);
    }

    #[rstest]
    #[case("scenario-steady.json")]
    #[case("scenario-ramp.json")]
    #[case("scenario-failing.json")]
    #[case("scenario-abort.json")]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_scenarios(#[case] path: &str) {
        init_logger();
        let mut scenario = read_scenario(path);
        let mock_server = MockServer::start_async().await;
        let status = mock_status(&scenario);
        let mock = mock_server
            .mock_async(|when, then| {
                when.method(GET);
                then.status(status).body("{}");
            })
            .await;

        let profile = scenario.get_mut("profile").unwrap();
        set_target(profile, "127.0.0.1", mock_server.port());
        let profile: Profile = serde_json::from_value(profile.clone()).unwrap();

        let registry = registry();
        let job_id = registry.submit(profile).await.unwrap();
        info!("started {} for {}", &job_id, path);

        let finished = wait_for_finish(&registry, &job_id).await;
        assert_eq!(finished, expected_status(&scenario));

        let report = registry.report(&job_id).await.unwrap();
        let report = serde_json::to_value(&report).unwrap();
        info!("report: {}", &report);
        let expectation = &scenario["expectation"];
        assert_eq!(report["verdict"]["overallPass"], expectation["overallPass"]);
        assert_eq!(
            report["verdict"]["perThreshold"]
                .as_object()
                .unwrap()
                .values()
                .all(|r| r["passed"] == Value::Bool(true)),
            expectation["overallPass"].as_bool().unwrap()
        );

        let min_requests = expectation["minRequests"].as_u64().unwrap();
        let sent = report["metrics"]["http_reqs"]["count"].as_u64().unwrap();
        assert_ge!(sent, min_requests);
        assert_ge!(mock.hits_async().await as u64, sent);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stop_keeps_partial_metrics() {
        init_logger();
        let mut scenario = read_scenario("scenario-abort.json");
        let mock_server = MockServer::start_async().await;
        mock_server
            .mock_async(|when, then| {
                when.method(GET);
                then.status(200);
            })
            .await;
        let profile = scenario.get_mut("profile").unwrap();
        set_target(profile, "127.0.0.1", mock_server.port());
        let profile: Profile = serde_json::from_value(profile.clone()).unwrap();

        let registry = registry();
        let job_id = registry.submit(profile).await.unwrap();
        sleep(Duration::from_millis(500)).await;
        assert_eq!(registry.stop(&job_id).await, Some(JobStatus::InProgress));
        assert_eq!(wait_for_finish(&registry, &job_id).await, JobStatus::Stopped);

        let report = registry.report(&job_id).await.unwrap();
        assert!(report.verdict.overall_pass);
        let report = serde_json::to_value(&report).unwrap();
        assert_ge!(report["metrics"]["http_reqs"]["count"].as_u64().unwrap(), 1);
    }

    #[rstest]
    #[case("scenario-steady.json")]
    #[case("scenario-failing.json")]
    #[tokio::test]
    #[ignore]
    async fn test_scenarios_against_service(#[case] path: &str) {
        init_logger();
        let scenario = read_scenario(path);
        let mut profile = scenario["profile"].clone();
        // application under test, as seen from the job service
        let host = std::env::var("TARGET_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = std::env::var("TARGET_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(8080);
        set_target(&mut profile, &host, port);

        let job_id = send_test_req_with_json(&profile).await;
        let mut status = Value::Null;
        for _ in 0..100 {
            status = get_json(&format!("{}?job_id={}", STATUS_PATH, &job_id)).await[&job_id].clone();
            if status != "Starting" && status != "InProgress" {
                break;
            }
            sleep(Duration::from_secs(1)).await;
        }
        assert_eq!(status, scenario["expectation"]["status"]);

        let report = get_json(&format!("{}/{}", VERDICT_PATH, &job_id)).await;
        assert_eq!(
            report["verdict"]["overallPass"],
            scenario["expectation"]["overallPass"]
        );
        let metrics = get_all_metrics().await;
        assert!(metrics.contains(&job_id));
    }

    async fn send_test_req_with_json(request: &Value) -> String {
        let client = reqwest::Client::new();
        let res = client
            .post(format!("{}{}", address(), TEST_PATH))
            .json(request)
            .send()
            .await
            .unwrap();
        let resp = res.text().await.unwrap();
        info!("text resp: {}", &resp);

        let test_resp: Value = serde_json::from_str(&resp).unwrap();
        let job_id = test_resp.get("job_id").and_then(|v| v.as_str()).unwrap();
        job_id.to_string()
    }

    async fn get_json(path: &str) -> Value {
        reqwest::get(format!("{}{}", address(), path))
            .await
            .unwrap()
            .json::<Value>()
            .await
            .unwrap()
    }

    async fn get_all_metrics() -> String {
        reqwest::get(format!("{}{}", address(), METRICS_PATH))
            .await
            .unwrap()
            .text()
            .await
            .unwrap()
    }
}
