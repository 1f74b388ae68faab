use crate::{
    alert::{Alert, AlertSink, Notification},
    config::{ConfigStore, SentinelConfig},
    cooldown::CooldownManager,
    dispatch::AlertDispatcher,
    error::FeedError,
    filter::{FilterStack, StopClusterTrigger, VolatilityTrigger},
    signal::{Decision, DenyReason, SignalEngine},
    status::{InstrumentStatus, SentinelStatus},
    supervisor::MessageHandler,
    types::{Side, Symbol, Trade, decode_trade},
    window::WindowAggregator,
};
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

/// Outcome of one pass through the decision pipeline.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum Evaluation {
    /// The window is empty or holds no volume.
    NoData,
    Denied(DenyReason),
    CoolingDown { side: Side, until: DateTime<Utc> },
    /// A delivery for the same key is already scheduled.
    Pending { side: Side },
    Fired(Alert),
}

/// The per-trade pipeline: window aggregation, gated decisions, cooldowns and dispatch.
#[derive(Debug)]
pub struct Sentinel {
    config: Arc<ConfigStore>,
    windows: WindowAggregator,
    filters: Arc<FilterStack>,
    engine: SignalEngine,
    cooldowns: CooldownManager,
    dispatcher: AlertDispatcher,
    reset_window_on_reconnect: bool,
    last_gate_minute: Mutex<FnvHashMap<Symbol, i64>>,
}

impl Sentinel {
    pub fn new(config: Arc<ConfigStore>, settings: &SentinelConfig, sink: Arc<dyn AlertSink>) -> Self {
        let filters = Arc::new(FilterStack::new(Arc::clone(&config)));
        Self {
            windows: WindowAggregator::new(Duration::from_secs(settings.window.window_secs)),
            engine: SignalEngine::new(Arc::clone(&config), Arc::clone(&filters)),
            cooldowns: CooldownManager::new(Arc::clone(&config)),
            dispatcher: AlertDispatcher::new(sink, settings.dispatch.defer_to_next_minute),
            reset_window_on_reconnect: settings.supervisor.reset_window_on_reconnect,
            last_gate_minute: Mutex::new(FnvHashMap::default()),
            filters,
            config,
        }
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    pub fn windows(&self) -> &WindowAggregator {
        &self.windows
    }

    pub fn filters(&self) -> &FilterStack {
        &self.filters
    }

    pub fn cooldowns(&self) -> &CooldownManager {
        &self.cooldowns
    }

    pub fn dispatcher(&self) -> &AlertDispatcher {
        &self.dispatcher
    }

    /// Record a trade, then run the decision pipeline if this is the first trade of a new
    /// wall-clock minute for the instrument.
    pub fn on_trade(&self, trade: &Trade, now: DateTime<Utc>) -> Option<Evaluation> {
        self.windows.record(trade);

        let minute = now.timestamp().div_euclid(60);
        {
            let mut gates = self.last_gate_minute.lock();
            match gates.get(&trade.symbol) {
                Some(last) if *last == minute => return None,
                _ => {
                    gates.insert(trade.symbol.clone(), minute);
                }
            }
        }

        Some(self.evaluate(&trade.symbol, now))
    }

    /// Decide on the instrument's current window. Cooldown, decay history and window reset are
    /// committed here when the decision fires; delivery happens later via the dispatcher.
    pub fn evaluate(&self, symbol: &Symbol, now: DateTime<Utc>) -> Evaluation {
        let Some(snapshot) = self.windows.snapshot(symbol) else {
            return Evaluation::NoData;
        };

        let signal = match self.engine.decide(symbol, &snapshot, now) {
            Decision::Allow(signal) => signal,
            Decision::Deny(reason) => {
                debug!(%symbol, %reason, "signal denied");
                return Evaluation::Denied(reason);
            }
        };

        let side = signal.side;
        if !self.cooldowns.is_eligible(symbol, side, now) {
            let until = self.cooldowns.next_eligible(symbol, side).unwrap_or(now);
            debug!(%symbol, %side, %until, "signal cooling down");
            return Evaluation::CoolingDown { side, until };
        }

        let alert = Alert::new(&snapshot, signal, now);
        if !self.dispatcher.try_schedule(alert.clone(), now) {
            return Evaluation::Pending { side };
        }

        self.cooldowns.record_alert(symbol, side, now);
        self.filters.decay.record(symbol, snapshot.aggression(), now);
        self.windows.reset(symbol);

        info!(
            %symbol,
            %side,
            label = %alert.label,
            volume_usd = alert.volume_usd,
            dominance_pct = alert.dominance_pct,
            price_change_pct = alert.price_change_pct,
            deliver_at = %self.dispatcher.delivery_time(now),
            "signal fired"
        );
        Evaluation::Fired(alert)
    }

    /// Report an externally observed stop-loss. Notifies the sink when it starts a pause.
    pub async fn record_stop(&self, now: DateTime<Utc>) -> Option<StopClusterTrigger> {
        let trigger = self.filters.stop_cluster.record_stop(now)?;
        warn!(
            stops = trigger.stops,
            paused_until = %trigger.paused_until,
            "stop cluster detected, pausing signals"
        );
        self.dispatcher
            .notify(Notification::StopClusterPause(trigger.clone()))
            .await;
        Some(trigger)
    }

    /// Feed one reference price sample. Notifies the sink once when the kill-switch engages.
    pub async fn observe_reference_price(&self, price: f64, now: DateTime<Utc>) -> Option<VolatilityTrigger> {
        let trigger = self.filters.volatility.observe(price, now)?;
        warn!(
            reference = %trigger.reference_symbol,
            move_pct = trigger.move_pct,
            paused_until = %trigger.paused_until,
            "volatility kill-switch engaged"
        );
        self.dispatcher
            .notify(Notification::VolatilityPause(trigger.clone()))
            .await;
        Some(trigger)
    }

    pub fn status(&self, now: DateTime<Utc>) -> SentinelStatus {
        let instruments = self
            .config
            .instruments()
            .into_iter()
            .map(|instrument| InstrumentStatus {
                window_trades: self.windows.trade_count(&instrument.symbol),
                buy_cooldown_until: self
                    .cooldowns
                    .next_eligible(&instrument.symbol, Side::Buy)
                    .filter(|until| now < *until),
                sell_cooldown_until: self
                    .cooldowns
                    .next_eligible(&instrument.symbol, Side::Sell)
                    .filter(|until| now < *until),
                symbol: instrument.symbol,
                enabled: instrument.enabled,
                connection: None,
            })
            .collect();

        SentinelStatus {
            time: now,
            instruments,
            filters: self.filters.status(now),
            pending_dispatches: self.dispatcher.pending_count(),
        }
    }

    /// Stop dispatching and abort pending deliveries.
    pub fn shutdown(&self) {
        let aborted = self.dispatcher.shutdown();
        info!(aborted, "alert dispatch stopped");
    }
}

impl MessageHandler for Sentinel {
    fn on_connected(&self, symbol: &Symbol, reconnect: bool) {
        if reconnect && self.reset_window_on_reconnect {
            info!(%symbol, "resetting window after reconnect");
            self.windows.reset(symbol);
        }
    }

    fn on_message(&self, symbol: &Symbol, text: &str) -> Result<(), FeedError> {
        let trade = decode_trade(text)?;
        if trade.symbol != *symbol {
            return Err(FeedError::InvalidTrade(format!(
                "{} trade on {symbol} stream",
                trade.symbol
            )));
        }
        self.on_trade(&trade, Utc::now());
        Ok(())
    }
}
