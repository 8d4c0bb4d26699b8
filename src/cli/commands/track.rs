use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::cli::TrackArgs;
use crate::config::SdkConfig;
use crate::metrics::{MetricsEngine, Payload};

const POLL_DELAY: Duration = Duration::from_millis(50);

/// Parse a `key=value` property. The value may itself contain `=`.
pub fn parse_prop(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", raw)),
    }
}

/// Queue one event, push it to the collector, then unload and print whatever
/// could not be delivered as JSON.
pub async fn execute_track(args: TrackArgs, config: &SdkConfig) -> Result<()> {
    let mut metrics = config.metrics_config();
    if let Some(uri) = args.uri {
        metrics = metrics.with_uri(uri);
    }

    let engine = MetricsEngine::http().context("Failed to create HTTP client")?;
    let properties: Payload = args.props.into_iter().collect();
    engine.track(&args.event, properties);
    engine
        .init(metrics, config.session_ids().session_data())
        .context("Failed to start metrics")?;
    engine.flush(true);

    let delivered = wait_until_drained(&engine, Duration::from_millis(args.wait_ms)).await;
    let undelivered = engine.unload();
    info!(event = %args.event, delivered, undelivered = undelivered.len(), "track finished");

    println!("{}", serde_json::to_string_pretty(&undelivered)?);
    if !delivered {
        anyhow::bail!("{} event(s) were not delivered", undelivered.len());
    }
    Ok(())
}

async fn wait_until_drained(engine: &MetricsEngine, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let stats = engine.stats();
        if stats.pending == 0 && !stats.in_transit {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_DELAY).await;
    }
}
