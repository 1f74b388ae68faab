use crate::{
    error::SinkError,
    filter::{StopClusterTrigger, VolatilityTrigger},
    signal::{Signal, SignalLabel},
    types::{Side, Symbol},
    window::WindowSnapshot,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, sync::Arc};
use tokio::sync::mpsc;
use tracing::{info, warn};
use url::Url;

/// Order flow alert handed to an [`AlertSink`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Alert {
    pub symbol: Symbol,
    pub direction: Side,
    pub label: SignalLabel,
    pub volume_usd: f64,
    pub buy_volume_usd: f64,
    pub sell_volume_usd: f64,
    pub dominance_pct: f64,
    pub price_change_pct: f64,
    pub last_price: f64,
    pub trade_count: usize,
    /// Time the decision fired.
    pub time: DateTime<Utc>,
}

impl Alert {
    pub fn new(snapshot: &WindowSnapshot, signal: Signal, time: DateTime<Utc>) -> Self {
        Self {
            symbol: snapshot.symbol.clone(),
            direction: signal.side,
            label: signal.label,
            volume_usd: snapshot.total_volume(),
            buy_volume_usd: snapshot.buy_volume_usd,
            sell_volume_usd: snapshot.sell_volume_usd,
            dominance_pct: snapshot.dominance_pct,
            price_change_pct: snapshot.price_change_pct,
            last_price: snapshot.last_price,
            trade_count: snapshot.trade_count,
            time,
        }
    }
}

/// Everything the sentinel reports to the outside world.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    FlowAlert(Alert),
    VolatilityPause(VolatilityTrigger),
    StopClusterPause(StopClusterTrigger),
}

/// Outbound notification channel.
///
/// Delivery is attempted at most once. Failures are reported to the caller, which logs them and
/// never rolls back decision state.
#[async_trait]
pub trait AlertSink: Debug + Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), SinkError>;
}

/// Writes every notification to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    async fn send(&self, notification: &Notification) -> Result<(), SinkError> {
        match notification {
            Notification::FlowAlert(alert) => info!(
                symbol = %alert.symbol,
                direction = %alert.direction,
                label = %alert.label,
                volume_usd = alert.volume_usd,
                dominance_pct = alert.dominance_pct,
                price_change_pct = alert.price_change_pct,
                last_price = alert.last_price,
                "order flow alert"
            ),
            Notification::VolatilityPause(trigger) => warn!(
                reference = %trigger.reference_symbol,
                move_pct = trigger.move_pct,
                paused_until = %trigger.paused_until,
                "volatility kill-switch activated"
            ),
            Notification::StopClusterPause(trigger) => warn!(
                stops = trigger.stops,
                paused_until = %trigger.paused_until,
                "stop cluster pause activated"
            ),
        }
        Ok(())
    }
}

/// POSTs each notification as JSON to a fixed endpoint.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: Url,
}

impl WebhookSink {
    /// Fails when the endpoint is not an absolute http(s) URL.
    pub fn new(endpoint: &str) -> Result<Self, SinkError> {
        let url = Url::parse(endpoint).map_err(|error| SinkError::InvalidEndpoint {
            url: endpoint.to_string(),
            reason: error.to_string(),
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(SinkError::InvalidEndpoint {
                url: endpoint.to_string(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }

        Ok(Self {
            client: reqwest::Client::new(),
            url,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    async fn send(&self, notification: &Notification) -> Result<(), SinkError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(notification)
            .send()
            .await
            .map_err(|error| SinkError::Transport(error.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SinkError::Rejected(status.as_u16()))
        }
    }
}

/// Forwards notifications into an in-process channel, eg/ for a chat front-end.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl AlertSink for ChannelSink {
    async fn send(&self, notification: &Notification) -> Result<(), SinkError> {
        self.tx
            .send(notification.clone())
            .map_err(|_| SinkError::Transport("notification receiver dropped".to_string()))
    }
}

/// Delivers to every inner sink, reporting the first failure after all attempts.
#[derive(Debug, Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        Self { sinks }
    }

    pub fn with(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl AlertSink for FanoutSink {
    async fn send(&self, notification: &Notification) -> Result<(), SinkError> {
        let results =
            futures::future::join_all(self.sinks.iter().map(|sink| sink.send(notification))).await;

        results.into_iter().fold(Ok(()), |first, result| match (first, result) {
            (Ok(()), Err(error)) => Err(error),
            (first, _) => first,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::symbol;

    fn alert() -> Alert {
        Alert {
            symbol: symbol("XRPUSDT"),
            direction: Side::Buy,
            label: SignalLabel::ShortSqueeze,
            volume_usd: 1_400_000.0,
            buy_volume_usd: 1_200_000.0,
            sell_volume_usd: 200_000.0,
            dominance_pct: 85.7,
            price_change_pct: 0.8,
            last_price: 0.504,
            trade_count: 12,
            time: crate::filter::test_util::noon(),
        }
    }

    #[derive(Debug)]
    struct FailingSink;

    #[async_trait]
    impl AlertSink for FailingSink {
        async fn send(&self, _: &Notification) -> Result<(), SinkError> {
            Err(SinkError::Rejected(500))
        }
    }

    #[test]
    fn test_webhook_sink_validates_endpoint() {
        struct TestCase {
            input: &'static str,
            expected: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: https endpoint
                input: "https://hooks.example.com/flow",
                expected: true,
            },
            TestCase {
                // TC1: http endpoint with port
                input: "http://127.0.0.1:8080/alerts",
                expected: true,
            },
            TestCase {
                // TC2: not a URL
                input: "hooks.example.com",
                expected: false,
            },
            TestCase {
                // TC3: unsupported scheme
                input: "ftp://example.com/alerts",
                expected: false,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = WebhookSink::new(test.input).is_ok();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_notification_serialises_with_kind_tag() {
        let json = serde_json::to_value(Notification::FlowAlert(alert())).unwrap();
        assert_eq!(json["kind"], "flow_alert");
        assert_eq!(json["direction"], "BUY");
        assert_eq!(json["label"], "short_squeeze");
        assert_eq!(json["symbol"], "XRPUSDT");
    }

    #[tokio::test]
    async fn test_fanout_attempts_every_sink() {
        let (channel, mut rx) = ChannelSink::new();
        let fanout = FanoutSink::default()
            .with(Arc::new(FailingSink))
            .with(Arc::new(channel))
            .with(Arc::new(LogSink));

        let notification = Notification::FlowAlert(alert());
        let result = fanout.send(&notification).await;

        assert_eq!(result, Err(SinkError::Rejected(500)));
        assert_eq!(rx.recv().await, Some(notification));
        assert_eq!(fanout.len(), 3);
    }
}
