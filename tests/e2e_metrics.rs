// tests/e2e_metrics.rs
mod helpers;

use helpers::{
    can_bind_loopback, free_port, poll_until, reset_events, spawn_mock_collector,
    wait_for_events, wait_for_health,
};
use reqwest::Client;
use std::time::Duration;
use viewsdk::metrics::{MetricsConfig, MetricsEngine, Payload, SessionData};
use viewsdk::native::CollectorLog;

fn props(pairs: &[(&str, &str)]) -> Payload {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn test_events_reach_collector_with_session_data() {
    if !can_bind_loopback().await {
        eprintln!("skipping e2e metrics test: cannot bind to loopback in this environment");
        return;
    }

    let client = Client::new();

    // 1. Start the development collector
    let port = free_port().await;
    let log = CollectorLog::new();
    let app = viewsdk::build_router(log.clone());
    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port))
        .await
        .unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let base_url = format!("http://127.0.0.1:{}", port);
    wait_for_health(&client, &base_url).await;

    // 2. Track a fixed event and a live event
    let engine = MetricsEngine::http().unwrap();
    let config = MetricsConfig::default()
        .with_uri(base_url.clone())
        .with_interval_ms(200)
        .with_domain("example.com");
    let session = SessionData::new()
        .with("account", "acct-1")
        .with("view", "home");
    engine.init(config, session).unwrap();

    engine.track("open", props(&[("section", "news & sport")]));
    let handle = engine.live("view", Payload::new());

    // 3. Fixed events first, then at least one live report
    let events = wait_for_events(&client, &base_url, 3).await;
    let names: Vec<&str> = events.iter().map(|e| e["event"].as_str()).collect();
    assert_eq!(&names[..3], &["open", "view_view", "view_usage"]);

    let open = &events[0];
    assert_eq!(open["section"], "news & sport");
    assert_eq!(open["account"], "acct-1");
    assert_eq!(open["view"], "home");
    assert_eq!(open["domain"], "example.com");
    assert!(open["time"].parse::<i64>().unwrap() > 0);

    let usage = &events[2];
    assert!(usage["units"].parse::<u64>().unwrap() >= 200);

    // 4. Cancelling sends one final snapshot
    let before = log.events().len();
    handle.cancel();
    let events = wait_for_events(&client, &base_url, before + 1).await;
    assert_eq!(events.last().unwrap()["event"], "view_usage");

    let idle = poll_until(|| async {
        let stats = engine.stats();
        (stats.pending == 0 && !stats.in_transit).then_some(())
    })
    .await;
    assert!(idle.is_some(), "engine never went idle: {:?}", engine.stats());

    let drained = engine.unload();
    assert!(drained.is_empty(), "unexpected leftovers: {:?}", drained);
}

#[tokio::test]
async fn test_failed_sends_are_retried() {
    if !can_bind_loopback().await {
        eprintln!("skipping e2e metrics test: cannot bind to loopback in this environment");
        return;
    }

    let client = Client::new();
    let port = free_port().await;
    let (collector, base_url) = spawn_mock_collector(port).await;
    wait_for_health(&client, &base_url).await;
    reset_events(&client, &base_url).await;
    collector.fail_next(2);

    let engine = MetricsEngine::http().unwrap();
    let config = MetricsConfig::default()
        .with_uri(format!("{}/tracker", base_url))
        .with_interval_ms(0)
        .with_min_backoff(Duration::from_millis(50));
    engine.init(config, SessionData::new()).unwrap();

    engine.track("a", Payload::new());
    engine.track("b", Payload::new());

    // a fails and goes behind b, b fails and goes behind a
    let events = wait_for_events(&client, &base_url, 2).await;
    let names: Vec<&str> = events.iter().map(|e| e["event"].as_str()).collect();
    assert_eq!(names, vec!["a", "b"]);
    assert_eq!(collector.attempts(), 4);

    let idle = poll_until(|| async {
        let stats = engine.stats();
        (stats.errors == 0 && !stats.in_transit).then_some(())
    })
    .await;
    assert!(idle.is_some(), "engine never went idle: {:?}", engine.stats());

    assert!(engine.unload().is_empty());
    collector.stop().await;
}

#[tokio::test]
async fn test_unreachable_collector_keeps_events_for_unload() {
    let port = free_port().await;

    let engine = MetricsEngine::http().unwrap();
    let config = MetricsConfig::default()
        .with_uri(format!("http://127.0.0.1:{}", port))
        .with_interval_ms(0)
        .with_min_backoff(Duration::from_millis(50));
    engine.init(config, SessionData::new()).unwrap();
    engine.track("lost", props(&[("k", "v")]));

    let failed = poll_until(|| async { (engine.stats().errors >= 1).then_some(()) }).await;
    assert!(failed.is_some(), "expected a delivery failure");

    let drained = engine.unload();
    assert_eq!(drained.len(), 1);
    assert_eq!(drained[0]["event"], "lost");
    assert_eq!(drained[0]["k"], "v");
    // Session data is merged at send time, not stored on the event
    assert!(!drained[0].contains_key("domain"));
}
