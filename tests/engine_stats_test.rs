//! Engine stats scraping against mock metrics endpoints

use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use llm_router::discovery::{ServiceDiscovery, StaticServiceDiscovery};
use llm_router::stats::EngineStatsScraper;

const EXPOSITION: &str = "\
# HELP vllm:num_requests_running Number of requests currently running on GPU.
# TYPE vllm:num_requests_running gauge
vllm:num_requests_running{model_name=\"m1\"} 3.0
vllm:num_requests_waiting{model_name=\"m1\"} 5.0
vllm:gpu_prefix_cache_hit_rate{model_name=\"m1\"} 0.75
vllm:gpu_cache_usage_perc{model_name=\"m1\"} 0.25
vllm:unrelated_metric 9000.0
";

async fn metrics_backend(body: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/metrics"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body.to_string()))
        .mount(&server)
        .await;
    server
}

fn discovery_for(urls: Vec<String>) -> Arc<dyn ServiceDiscovery> {
    let models = vec!["m1".to_string(); urls.len()];
    Arc::new(
        StaticServiceDiscovery::new(urls, models, None, None, None, false, reqwest::Client::new())
            .unwrap(),
    )
}

async fn wait_for_scrape(scraper: &EngineStatsScraper, url: &str) -> bool {
    for _ in 0..50 {
        if scraper.get_stats().contains_key(url) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

#[tokio::test]
async fn scrapes_metrics_from_live_engines() {
    let backend = metrics_backend(EXPOSITION).await;
    let discovery = discovery_for(vec![backend.uri()]);
    let scraper = EngineStatsScraper::new(
        Arc::clone(&discovery),
        reqwest::Client::new(),
        Duration::from_secs(30),
    );

    assert!(wait_for_scrape(&scraper, &backend.uri()).await);

    let stats = scraper.get_stats();
    let engine = &stats[&backend.uri()];
    assert_eq!(engine.num_running_requests, 3);
    assert_eq!(engine.num_queuing_requests, 5);
    assert_eq!(engine.gpu_prefix_cache_hit_rate, 0.75);
    assert_eq!(engine.gpu_cache_usage_perc, 0.25);

    assert!(scraper.get_health());
    scraper.close().await;
    assert!(!scraper.get_health());
}

#[tokio::test]
async fn failed_scrapes_leave_engine_out_of_the_snapshot() {
    let healthy = metrics_backend(EXPOSITION).await;
    // This backend has no /metrics route; wiremock answers 404
    let broken = MockServer::start().await;

    let discovery = discovery_for(vec![healthy.uri(), broken.uri()]);
    let scraper = EngineStatsScraper::new(
        Arc::clone(&discovery),
        reqwest::Client::new(),
        Duration::from_secs(30),
    );

    assert!(wait_for_scrape(&scraper, &healthy.uri()).await);

    let stats = scraper.get_stats();
    assert!(stats.contains_key(&healthy.uri()));
    assert!(!stats.contains_key(&broken.uri()));

    scraper.close().await;
}
