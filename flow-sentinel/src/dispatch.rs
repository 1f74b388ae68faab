use crate::{
    alert::{Alert, AlertSink, Notification},
    types::{Side, Symbol},
};
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use fnv::FnvHashMap;
use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

#[derive(Debug, Default)]
struct Pending {
    tasks: FnvHashMap<(Symbol, Side), JoinHandle<()>>,
    closed: bool,
}

/// Deferred, deduplicated delivery of alerts to an [`AlertSink`].
///
/// At most one delivery per `(instrument, side)` is pending at a time. A second alert for the same
/// key while one is scheduled is dropped, not queued.
#[derive(Debug, Clone)]
pub struct AlertDispatcher {
    sink: Arc<dyn AlertSink>,
    defer_to_next_minute: bool,
    pending: Arc<Mutex<Pending>>,
}

impl AlertDispatcher {
    pub fn new(sink: Arc<dyn AlertSink>, defer_to_next_minute: bool) -> Self {
        Self {
            sink,
            defer_to_next_minute,
            pending: Arc::new(Mutex::new(Pending::default())),
        }
    }

    /// Time at which an alert decided at `now` is delivered.
    pub fn delivery_time(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        if self.defer_to_next_minute {
            next_minute(now)
        } else {
            now
        }
    }

    pub fn is_pending(&self, symbol: &Symbol, side: Side) -> bool {
        self.pending
            .lock()
            .tasks
            .get(&(symbol.clone(), side))
            .is_some_and(|task| !task.is_finished())
    }

    /// Schedule delivery of an alert. Returns false when a delivery for the same key is already
    /// pending or the dispatcher has shut down.
    pub fn try_schedule(&self, alert: Alert, now: DateTime<Utc>) -> bool {
        let key = (alert.symbol.clone(), alert.direction);
        let delay = (self.delivery_time(now) - now)
            .to_std()
            .unwrap_or(Duration::ZERO);

        let mut pending = self.pending.lock();
        if pending.closed {
            return false;
        }
        if pending.tasks.get(&key).is_some_and(|task| !task.is_finished()) {
            debug!(symbol = %key.0, side = %key.1, "delivery already pending");
            return false;
        }

        let sink = Arc::clone(&self.sink);
        let registry = Arc::clone(&self.pending);
        let task_key = key.clone();

        // Spawned while holding the lock, so the task's own removal always observes its entry
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(error) = sink.send(&Notification::FlowAlert(alert)).await {
                error!(symbol = %task_key.0, side = %task_key.1, %error, "failed to deliver alert");
            }
            registry.lock().tasks.remove(&task_key);
        });
        pending.tasks.insert(key, task);

        true
    }

    /// Deliver a notification immediately, bypassing the pending gate.
    pub async fn notify(&self, notification: Notification) {
        if self.pending.lock().closed {
            return;
        }
        if let Err(error) = self.sink.send(&notification).await {
            warn!(%error, "failed to deliver notification");
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .tasks
            .values()
            .filter(|task| !task.is_finished())
            .count()
    }

    /// Stop accepting deliveries and abort every pending one.
    pub fn shutdown(&self) -> usize {
        let mut pending = self.pending.lock();
        pending.closed = true;
        let aborted = pending.tasks.len();
        for (_, task) in pending.tasks.drain() {
            task.abort();
        }
        aborted
    }
}

/// Start of the next whole UTC minute strictly after `now`.
pub fn next_minute(now: DateTime<Utc>) -> DateTime<Utc> {
    now.duration_trunc(TimeDelta::minutes(1))
        .map(|minute| minute + TimeDelta::minutes(1))
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        alert::ChannelSink,
        signal::SignalLabel,
        types::symbol,
    };
    use chrono::TimeZone;

    fn alert(side: Side) -> Alert {
        Alert {
            symbol: symbol("XRPUSDT"),
            direction: side,
            label: SignalLabel::for_side(side),
            volume_usd: 1_400_000.0,
            buy_volume_usd: 1_200_000.0,
            sell_volume_usd: 200_000.0,
            dominance_pct: 85.7,
            price_change_pct: 0.8,
            last_price: 0.504,
            trade_count: 12,
            time: Utc.with_ymd_and_hms(2024, 1, 3, 12, 0, 30).unwrap(),
        }
    }

    #[test]
    fn test_next_minute() {
        struct TestCase {
            input: DateTime<Utc>,
            expected: DateTime<Utc>,
        }

        let tests = vec![
            TestCase {
                // TC0: mid-minute rounds up
                input: Utc.with_ymd_and_hms(2024, 1, 3, 12, 0, 30).unwrap(),
                expected: Utc.with_ymd_and_hms(2024, 1, 3, 12, 1, 0).unwrap(),
            },
            TestCase {
                // TC1: exact minute boundary moves to the following minute
                input: Utc.with_ymd_and_hms(2024, 1, 3, 12, 1, 0).unwrap(),
                expected: Utc.with_ymd_and_hms(2024, 1, 3, 12, 2, 0).unwrap(),
            },
            TestCase {
                // TC2: crosses the day boundary
                input: Utc.with_ymd_and_hms(2024, 1, 3, 23, 59, 59).unwrap(),
                expected: Utc.with_ymd_and_hms(2024, 1, 4, 0, 0, 0).unwrap(),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(next_minute(test.input), test.expected, "TC{} failed", index);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_deferred_to_next_minute() {
        let (sink, mut rx) = ChannelSink::new();
        let dispatcher = AlertDispatcher::new(Arc::new(sink), true);
        let buy = alert(Side::Buy);

        assert!(dispatcher.try_schedule(buy.clone(), buy.time));
        assert_eq!(dispatcher.pending_count(), 1);

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rx.recv().await, Some(Notification::FlowAlert(buy)));
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_gate_suppresses_duplicates() {
        let (sink, mut rx) = ChannelSink::new();
        let dispatcher = AlertDispatcher::new(Arc::new(sink), true);
        let buy = alert(Side::Buy);

        assert!(dispatcher.try_schedule(buy.clone(), buy.time));
        assert!(!dispatcher.try_schedule(buy.clone(), buy.time));
        assert!(dispatcher.is_pending(&buy.symbol, Side::Buy));

        // Opposite side has its own gate
        assert!(dispatcher.try_schedule(alert(Side::Sell), buy.time));
        assert_eq!(dispatcher.pending_count(), 2);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());

        // Gate reopens after delivery
        assert!(dispatcher.try_schedule(buy.clone(), buy.time));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_pending_deliveries() {
        let (sink, mut rx) = ChannelSink::new();
        let dispatcher = AlertDispatcher::new(Arc::new(sink), true);
        let buy = alert(Side::Buy);

        assert!(dispatcher.try_schedule(buy.clone(), buy.time));
        assert_eq!(dispatcher.shutdown(), 1);
        assert!(!dispatcher.try_schedule(buy.clone(), buy.time));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(dispatcher.pending_count(), 0);
    }
}
