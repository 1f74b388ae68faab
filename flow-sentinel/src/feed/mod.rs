use crate::{config::FeedConfig, error::FeedError, types::Symbol};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures_util::{SinkExt, StreamExt};
use std::{fmt::Debug, time::Duration};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;
use url::Url;

/// Read-idle timeout wrapper detecting silent socket death.
pub mod timeout;

pub use timeout::with_read_timeout;

/// Raw text frames of one instrument's trade subscription. A terminal [`FeedError`] ends the
/// connection; the supervisor drops the stream and reconnects.
pub type TradeStream = BoxStream<'static, Result<String, FeedError>>;

/// Opens trade subscriptions.
#[async_trait]
pub trait FeedConnector: Debug + Send + Sync {
    async fn connect(&self, symbol: &Symbol) -> Result<TradeStream, FeedError>;
}

/// Binance USD-M futures `aggTrade` subscriptions over WebSocket.
#[derive(Debug, Clone)]
pub struct BinanceConnector {
    base_url: String,
    ping_interval: Duration,
    read_timeout: Duration,
}

impl BinanceConnector {
    pub fn new(config: &FeedConfig) -> Self {
        Self {
            base_url: config.ws_base_url.trim_end_matches('/').to_string(),
            ping_interval: Duration::from_secs(config.ping_interval_secs.max(1)),
            read_timeout: Duration::from_secs(config.read_timeout_secs.max(1)),
        }
    }

    /// eg/ `wss://fstream.binance.com/ws/btcusdt@aggTrade`
    pub fn stream_url(&self, symbol: &Symbol) -> Result<Url, FeedError> {
        let raw = format!("{}/{}@aggTrade", self.base_url, symbol.to_lowercase());
        Url::parse(&raw).map_err(|error| FeedError::Connect {
            url: raw,
            reason: error.to_string(),
        })
    }
}

#[async_trait]
impl FeedConnector for BinanceConnector {
    async fn connect(&self, symbol: &Symbol) -> Result<TradeStream, FeedError> {
        let url = self.stream_url(symbol)?;
        let (websocket, _) =
            connect_async(url.as_str())
                .await
                .map_err(|error| FeedError::Connect {
                    url: url.to_string(),
                    reason: error.to_string(),
                })?;

        let (mut write, read) = websocket.split();

        // Ping task lives until the read half is dropped, which closes the shutdown channel
        let ping_interval = self.ping_interval;
        let (ping_shutdown_tx, mut ping_shutdown_rx) = mpsc::channel::<()>(1);
        let ping_symbol = symbol.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(ping_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if write.send(Message::Ping(vec![].into())).await.is_err() {
                            debug!(symbol = %ping_symbol, "failed to send ping, connection likely dead");
                            break;
                        }
                    }
                    _ = ping_shutdown_rx.recv() => {
                        debug!(symbol = %ping_symbol, "ping task shutting down");
                        break;
                    }
                }
            }
        });

        let messages = read
            .filter_map(move |message| {
                let _ping_guard = &ping_shutdown_tx;
                futures::future::ready(match message {
                    Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "server closed trade stream");
                        Some(Err(FeedError::Closed))
                    }
                    // Heartbeats are answered by tungstenite
                    Ok(_) => None,
                    Err(error) => Some(Err(FeedError::from(error))),
                })
            })
            .boxed();

        Ok(with_read_timeout(messages, self.read_timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::symbol;

    #[test]
    fn test_stream_url() {
        struct TestCase {
            base_url: &'static str,
            symbol: &'static str,
            expected: Result<&'static str, ()>,
        }

        let tests = vec![
            TestCase {
                // TC0: default endpoint
                base_url: "wss://fstream.binance.com/ws",
                symbol: "BTCUSDT",
                expected: Ok("wss://fstream.binance.com/ws/btcusdt@aggTrade"),
            },
            TestCase {
                // TC1: trailing slash is tolerated
                base_url: "ws://127.0.0.1:9001/ws/",
                symbol: "xrpusdt",
                expected: Ok("ws://127.0.0.1:9001/ws/xrpusdt@aggTrade"),
            },
            TestCase {
                // TC2: malformed base
                base_url: "not a url",
                symbol: "BTCUSDT",
                expected: Err(()),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let connector = BinanceConnector::new(&FeedConfig {
                ws_base_url: test.base_url.to_string(),
                ..Default::default()
            });
            let actual = connector.stream_url(&symbol(test.symbol));
            match (actual, test.expected) {
                (Ok(actual), Ok(expected)) => assert_eq!(actual.as_str(), expected, "TC{} failed", index),
                (Err(FeedError::Connect { .. }), Err(())) => {}
                (actual, expected) => {
                    panic!("TC{index} failed because actual != expected. \nActual: {actual:?}\nExpected: {expected:?}\n");
                }
            }
        }
    }
}
