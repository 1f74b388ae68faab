use crate::{
    alert::AlertSink,
    config::{ConfigStore, ParamChange, SentinelConfig},
    error::ConfigError,
    feed::{BinanceConnector, FeedConnector},
    filter::StopClusterTrigger,
    types::symbol,
    reference::{BinanceRestPriceSource, ReferencePriceSource},
    sentinel::Sentinel,
    status::SentinelStatus,
    supervisor::{ConnectionSupervisor, MessageHandler, shutdown_requested, sleep_unless_shutdown},
};
use chrono::Utc;
use std::sync::Arc;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{info, warn};

/// External collaborators of a running sentinel.
#[derive(Debug, Clone)]
pub struct Collaborators {
    pub sink: Arc<dyn AlertSink>,
    pub connector: Arc<dyn FeedConnector>,
    pub reference: Arc<dyn ReferencePriceSource>,
}

impl Collaborators {
    /// Binance trade streams and REST reference prices.
    pub fn binance(settings: &SentinelConfig, sink: Arc<dyn AlertSink>) -> Self {
        Self {
            sink,
            connector: Arc::new(BinanceConnector::new(&settings.feed)),
            reference: Arc::new(BinanceRestPriceSource::new(settings.feed.rest_base_url.as_str())),
        }
    }
}

/// Handle to a running sentinel: one stream task per enabled instrument plus the reference
/// price poller, all stopped by [`SentinelHandle::shutdown`].
#[derive(Debug)]
pub struct SentinelHandle {
    sentinel: Arc<Sentinel>,
    supervisor: ConnectionSupervisor,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

/// Build the shared store from `settings` and start every task.
pub fn run(settings: &SentinelConfig, collaborators: Collaborators) -> Result<SentinelHandle, ConfigError> {
    let store = Arc::new(settings.store()?);
    Ok(run_with_store(store, settings, collaborators))
}

/// Start every task against an existing store.
pub fn run_with_store(
    store: Arc<ConfigStore>,
    settings: &SentinelConfig,
    collaborators: Collaborators,
) -> SentinelHandle {
    let sentinel = Arc::new(Sentinel::new(Arc::clone(&store), settings, collaborators.sink));
    let supervisor = ConnectionSupervisor::new(
        collaborators.connector,
        Arc::clone(&sentinel) as Arc<dyn MessageHandler>,
        settings.supervisor.clone(),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let symbols = store.enabled_symbols();
    info!(instruments = symbols.len(), "starting trade streams");
    let mut tasks = supervisor.spawn(symbols, shutdown_rx.clone());

    tasks.push(tokio::spawn(poll_reference_prices(
        Arc::clone(&sentinel),
        collaborators.reference,
        shutdown_rx,
    )));

    SentinelHandle {
        sentinel,
        supervisor,
        shutdown_tx,
        tasks,
    }
}

impl SentinelHandle {
    pub fn sentinel(&self) -> &Arc<Sentinel> {
        &self.sentinel
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        self.sentinel.config()
    }

    pub fn status(&self) -> SentinelStatus {
        self.sentinel
            .status(Utc::now())
            .with_connections(self.supervisor.statuses())
    }

    /// Toggle an instrument. Enabling one that has never streamed starts its trade stream;
    /// disabling leaves the stream open and denies its signals.
    pub fn set_enabled(&mut self, raw_symbol: &str, enabled: bool) -> Result<ParamChange, ConfigError> {
        let change = self.config().set_enabled(raw_symbol, enabled)?;

        let key = symbol(raw_symbol);
        if enabled && self.supervisor.status(&key).is_none() {
            info!(symbol = %key, "starting trade stream for newly enabled instrument");
            let tasks = self.supervisor.spawn(vec![key], self.shutdown_tx.subscribe());
            self.tasks.extend(tasks);
        }

        Ok(change)
    }

    pub async fn record_stop(&self) -> Option<StopClusterTrigger> {
        self.sentinel.record_stop(Utc::now()).await
    }

    /// Close every stream, stop the poller and abort pending deliveries.
    pub async fn shutdown(self) {
        info!("shutting down sentinel");
        let _ = self.shutdown_tx.send(true);
        self.sentinel.shutdown();

        for result in futures::future::join_all(self.tasks).await {
            if let Err(error) = result {
                warn!(%error, "task failed during shutdown");
            }
        }
        info!("sentinel stopped");
    }
}

/// Independent poll loop feeding the volatility kill-switch. Failed polls skip the cycle and
/// leave the pause state untouched.
async fn poll_reference_prices(
    sentinel: Arc<Sentinel>,
    source: Arc<dyn ReferencePriceSource>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let config = sentinel.config().volatility();

        if config.enabled {
            let fetched = tokio::select! {
                fetched = source.fetch_price(&config.reference_symbol) => fetched,
                _ = shutdown_requested(&mut shutdown) => break,
            };

            match fetched {
                Ok(price) => {
                    sentinel.observe_reference_price(price, Utc::now()).await;
                }
                Err(error) => warn!(%error, "reference price poll failed, skipping cycle"),
            }
        }

        if !sleep_unless_shutdown(config.poll_interval(), &mut shutdown).await {
            break;
        }
    }
}
