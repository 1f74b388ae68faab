use flow_sentinel::{
    SentinelConfig,
    alert::{AlertSink, FanoutSink, LogSink, WebhookSink},
    runtime::{self, Collaborators, SentinelHandle},
};
use std::{process::ExitCode, sync::Arc, time::Duration};
use tokio::time::interval;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    init_logging();

    info!("Starting flow-sentinel");

    let settings = match SentinelConfig::from_env() {
        Ok(settings) => settings,
        Err(error) => {
            error!(%error, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    // Failing to build the outbound channel is the only fatal startup error
    let sink = match build_sink(&settings) {
        Ok(sink) => sink,
        Err(error) => {
            error!(%error, "failed to initialise alert sink");
            return ExitCode::FAILURE;
        }
    };

    let handle = match runtime::run(&settings, Collaborators::binance(&settings, sink)) {
        Ok(handle) => handle,
        Err(error) => {
            error!(%error, "failed to start sentinel");
            return ExitCode::FAILURE;
        }
    };

    // Periodic status report
    // Configurable via STATUS_INTERVAL_SECS env var (default: 300, 0 disables)
    let status_interval = std::env::var("STATUS_INTERVAL_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(300);

    tokio::select! {
        _ = report_status(&handle, status_interval) => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(error) = result {
                warn!(%error, "failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
        }
    }

    handle.shutdown().await;
    ExitCode::SUCCESS
}

/// Log line sink plus an optional JSON webhook.
fn build_sink(settings: &SentinelConfig) -> Result<Arc<dyn AlertSink>, flow_sentinel::error::SinkError> {
    let mut sink = FanoutSink::default().with(Arc::new(LogSink));

    if let Some(url) = settings.dispatch.webhook_url.as_deref() {
        let webhook = WebhookSink::new(url)?;
        info!(url = %webhook.url(), "delivering notifications to webhook");
        sink = sink.with(Arc::new(webhook));
    }

    Ok(Arc::new(sink))
}

/// Logs a JSON status snapshot every `interval_secs`. Never resolves.
async fn report_status(handle: &SentinelHandle, interval_secs: u64) {
    if interval_secs == 0 {
        return std::future::pending::<()>().await;
    }

    let mut ticker = interval(Duration::from_secs(interval_secs));
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match serde_json::to_string(&handle.status()) {
            Ok(status) => info!(%status, "sentinel status"),
            Err(error) => warn!(%error, "failed to serialise status"),
        }
    }
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("info,tungstenite=warn,tokio_tungstenite=warn,reqwest=warn")
    });

    // Configurable via LOG_FORMAT env var ("json" for structured output)
    match std::env::var("LOG_FORMAT").as_deref() {
        Ok("json") => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .flatten_event(true)
            .init(),
        _ => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}
