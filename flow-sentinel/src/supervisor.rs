use crate::{
    config::SupervisorConfig,
    error::FeedError,
    feed::FeedConnector,
    types::Symbol,
};
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use futures::StreamExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, error, info, warn};

/// Lifecycle of one instrument's subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    ReconnectScheduled { attempt: u32 },
    /// Terminal: the retry budget is spent.
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ConnectionStatus {
    pub symbol: Symbol,
    pub state: ConnectionState,
    pub attempt_count: u32,
    pub last_open: Option<DateTime<Utc>>,
    pub connections: u64,
    pub messages: u64,
    pub dropped: u64,
}

impl ConnectionStatus {
    fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            state: ConnectionState::Disconnected,
            attempt_count: 0,
            last_open: None,
            connections: 0,
            messages: 0,
            dropped: 0,
        }
    }
}

/// Consumer of raw inbound messages.
pub trait MessageHandler: Send + Sync {
    /// Called on every successful open. `reconnect` is false for the first one.
    fn on_connected(&self, symbol: &Symbol, reconnect: bool);

    /// Decode and process one message. Errors drop the message; terminal ones also drop the
    /// connection.
    fn on_message(&self, symbol: &Symbol, text: &str) -> Result<(), FeedError>;
}

/// Keeps one live subscription per instrument, each with independent backoff state.
#[derive(Clone)]
pub struct ConnectionSupervisor {
    connector: Arc<dyn FeedConnector>,
    handler: Arc<dyn MessageHandler>,
    config: SupervisorConfig,
    statuses: Arc<RwLock<FnvHashMap<Symbol, ConnectionStatus>>>,
}

impl std::fmt::Debug for ConnectionSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSupervisor")
            .field("connector", &self.connector)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ConnectionSupervisor {
    pub fn new(
        connector: Arc<dyn FeedConnector>,
        handler: Arc<dyn MessageHandler>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            connector,
            handler,
            config,
            statuses: Arc::new(RwLock::new(FnvHashMap::default())),
        }
    }

    pub fn status(&self, symbol: &Symbol) -> Option<ConnectionStatus> {
        self.statuses.read().get(symbol).cloned()
    }

    pub fn statuses(&self) -> Vec<ConnectionStatus> {
        let mut statuses = self.statuses.read().values().cloned().collect::<Vec<_>>();
        statuses.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        statuses
    }

    /// Start one task per instrument, staggered by `stagger_ms`. Tasks exit when `shutdown`
    /// flips to true (or its sender is dropped) or when their instrument is abandoned.
    pub fn spawn(&self, symbols: Vec<Symbol>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        symbols
            .into_iter()
            .enumerate()
            .map(|(index, symbol)| {
                self.statuses
                    .write()
                    .insert(symbol.clone(), ConnectionStatus::new(symbol.clone()));

                let supervisor = self.clone();
                let start_delay = self.config.stagger().saturating_mul(index as u32);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    supervisor.run_instrument(symbol, start_delay, shutdown).await
                })
            })
            .collect()
    }

    fn update(&self, symbol: &Symbol, f: impl FnOnce(&mut ConnectionStatus)) {
        if let Some(status) = self.statuses.write().get_mut(symbol) {
            f(status);
        }
    }

    async fn run_instrument(
        self,
        symbol: Symbol,
        start_delay: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        if !sleep_unless_shutdown(start_delay, &mut shutdown).await {
            return;
        }

        let mut attempt: u32 = 0;
        let mut opened_before = false;

        loop {
            self.update(&symbol, |status| status.state = ConnectionState::Connecting);

            let connection = tokio::select! {
                connection = self.connector.connect(&symbol) => connection,
                _ = shutdown_requested(&mut shutdown) => break,
            };

            match connection {
                Ok(mut stream) => {
                    attempt = 0;
                    self.update(&symbol, |status| {
                        status.state = ConnectionState::Connected;
                        status.attempt_count = 0;
                        status.last_open = Some(Utc::now());
                        status.connections += 1;
                    });
                    info!(%symbol, reconnect = opened_before, "trade stream connected");
                    self.handler.on_connected(&symbol, opened_before);
                    opened_before = true;

                    loop {
                        let next = tokio::select! {
                            next = stream.next() => next,
                            _ = shutdown_requested(&mut shutdown) => {
                                self.update(&symbol, |status| status.state = ConnectionState::Disconnected);
                                return;
                            }
                        };

                        let result = match next {
                            Some(Ok(text)) => self.handler.on_message(&symbol, &text),
                            Some(Err(error)) => Err(error),
                            None => Err(FeedError::Closed),
                        };

                        match result {
                            Ok(()) => self.update(&symbol, |status| status.messages += 1),
                            Err(error) if error.is_terminal() => {
                                warn!(%symbol, %error, "trade stream disconnected");
                                break;
                            }
                            Err(error) => {
                                debug!(%symbol, %error, "dropped malformed message");
                                self.update(&symbol, |status| status.dropped += 1);
                            }
                        }
                    }
                }
                Err(error) => warn!(%symbol, %error, attempt, "failed to connect trade stream"),
            }

            attempt += 1;
            if attempt > self.config.max_reconnect_attempts {
                error!(
                    %symbol,
                    max_attempts = self.config.max_reconnect_attempts,
                    "reconnect attempts exhausted, abandoning instrument"
                );
                self.update(&symbol, |status| {
                    status.state = ConnectionState::Abandoned;
                    status.attempt_count = attempt;
                });
                return;
            }

            let delay = self.config.reconnect_delay(attempt);
            self.update(&symbol, |status| {
                status.state = ConnectionState::ReconnectScheduled { attempt };
                status.attempt_count = attempt;
            });
            info!(%symbol, attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");

            if !sleep_unless_shutdown(delay, &mut shutdown).await {
                break;
            }
        }

        self.update(&symbol, |status| status.state = ConnectionState::Disconnected);
    }
}

/// Resolves once shutdown is requested or the sender is gone.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Returns false if shutdown was requested before the delay elapsed.
pub(crate) async fn sleep_unless_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = shutdown_requested(shutdown) => false,
    }
}
