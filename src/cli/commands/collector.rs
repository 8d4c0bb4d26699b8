use anyhow::{Context, Result};
use tracing::info;

use crate::cli::CollectorArgs;
use crate::native::{build_router, CollectorLog};

pub async fn execute_collector(args: CollectorArgs) -> Result<()> {
    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!(addr = %addr, "collector listening on http://{}/tracker", addr);
    axum::serve(listener, build_router(CollectorLog::new()))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("Collector server failed")?;

    Ok(())
}
