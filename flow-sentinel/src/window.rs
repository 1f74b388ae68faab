use crate::types::{Side, Symbol, Trade};
use fnv::FnvHashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{collections::VecDeque, time::Duration};

#[derive(Debug, Clone, Copy, PartialEq)]
struct WindowTrade {
    time_ms: i64,
    price: f64,
    notional: f64,
    side: Side,
}

/// Exact set of trades inside a trailing window for one instrument.
///
/// Trades are kept ordered by exchange time. The window clock is the largest timestamp seen, not
/// wall-clock time, so bursts replayed after a reconnect are absorbed without correction.
#[derive(Debug, Clone)]
pub struct TradeWindow {
    window_ms: i64,
    trades: VecDeque<WindowTrade>,
    buy_volume: f64,
    sell_volume: f64,
    high: f64,
    low: f64,
    latest_time_ms: i64,
}

impl TradeWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window_ms: i64::try_from(window.as_millis()).unwrap_or(i64::MAX),
            trades: VecDeque::new(),
            buy_volume: 0.0,
            sell_volume: 0.0,
            high: f64::MIN,
            low: f64::MAX,
            latest_time_ms: i64::MIN,
        }
    }

    /// Classify and append a trade, then evict everything older than the window.
    pub fn record(&mut self, trade: &Trade) {
        let latest = self.latest_time_ms.max(trade.time_ms);
        let cutoff = latest.saturating_sub(self.window_ms);
        if trade.time_ms < cutoff {
            // Late print already outside the window
            return;
        }
        self.latest_time_ms = latest;

        let entry = WindowTrade {
            time_ms: trade.time_ms,
            price: trade.price,
            notional: trade.notional(),
            side: trade.aggressor(),
        };

        match entry.side {
            Side::Buy => self.buy_volume += entry.notional,
            Side::Sell => self.sell_volume += entry.notional,
        }
        self.high = self.high.max(entry.price);
        self.low = self.low.min(entry.price);

        match self.trades.back() {
            Some(back) if back.time_ms > entry.time_ms => {
                let index = self.trades.partition_point(|t| t.time_ms <= entry.time_ms);
                self.trades.insert(index, entry);
            }
            _ => self.trades.push_back(entry),
        }

        self.evict(cutoff);
    }

    fn evict(&mut self, cutoff: i64) {
        let mut evicted_any = false;
        let mut extremes_stale = false;
        while let Some(front) = self.trades.front() {
            if front.time_ms >= cutoff {
                break;
            }
            if let Some(evicted) = self.trades.pop_front() {
                evicted_any = true;
                extremes_stale |= evicted.price >= self.high || evicted.price <= self.low;
            }
        }

        if self.trades.is_empty() {
            self.clear_totals();
            return;
        }

        // Sums are rebuilt from the survivors after any eviction
        if evicted_any {
            let (buy, sell) = self
                .trades
                .iter()
                .fold((0.0, 0.0), |(buy, sell), t| match t.side {
                    Side::Buy => (buy + t.notional, sell),
                    Side::Sell => (buy, sell + t.notional),
                });
            self.buy_volume = buy;
            self.sell_volume = sell;
        }
        if extremes_stale {
            self.high = self.trades.iter().map(|t| t.price).fold(f64::MIN, f64::max);
            self.low = self.trades.iter().map(|t| t.price).fold(f64::MAX, f64::min);
        }
    }

    fn clear_totals(&mut self) {
        self.buy_volume = 0.0;
        self.sell_volume = 0.0;
        self.high = f64::MIN;
        self.low = f64::MAX;
    }

    /// Derive statistics from the surviving trades. `None` when empty or when total volume is
    /// zero.
    pub fn snapshot(&self, symbol: &Symbol) -> Option<WindowSnapshot> {
        let first = self.trades.front()?;
        let last = self.trades.back()?;

        let buy_volume = self.buy_volume.max(0.0);
        let sell_volume = self.sell_volume.max(0.0);
        let total = buy_volume + sell_volume;
        if total <= 0.0 {
            return None;
        }

        let dominant_side = if buy_volume >= sell_volume {
            Side::Buy
        } else {
            Side::Sell
        };
        let dominant = buy_volume.max(sell_volume);

        Some(WindowSnapshot {
            symbol: symbol.clone(),
            buy_volume_usd: buy_volume,
            sell_volume_usd: sell_volume,
            dominant_side,
            dominance_pct: dominant / total * 100.0,
            price_change_pct: (last.price - first.price) / first.price * 100.0,
            price_range: (self.high - self.low).max(0.0),
            trade_count: self.trades.len(),
            duration_secs: (last.time_ms - first.time_ms) as f64 / 1000.0,
            first_price: first.price,
            last_price: last.price,
        })
    }

    pub fn reset(&mut self) {
        self.trades.clear();
        self.clear_totals();
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }
}

/// Statistics derived from one instrument's rolling window.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WindowSnapshot {
    pub symbol: Symbol,
    pub buy_volume_usd: f64,
    pub sell_volume_usd: f64,
    pub dominant_side: Side,
    pub dominance_pct: f64,
    pub price_change_pct: f64,
    pub price_range: f64,
    pub trade_count: usize,
    pub duration_secs: f64,
    pub first_price: f64,
    pub last_price: f64,
}

impl WindowSnapshot {
    pub fn total_volume(&self) -> f64 {
        self.buy_volume_usd + self.sell_volume_usd
    }

    pub fn dominant_volume(&self) -> f64 {
        match self.dominant_side {
            Side::Buy => self.buy_volume_usd,
            Side::Sell => self.sell_volume_usd,
        }
    }

    /// Dominant volume per unit of price range, or the raw dominant volume when the price did
    /// not move.
    pub fn aggression(&self) -> f64 {
        if self.price_range > 0.0 {
            self.dominant_volume() / self.price_range
        } else {
            self.dominant_volume()
        }
    }
}

/// One [`TradeWindow`] per instrument, created lazily on first trade.
#[derive(Debug)]
pub struct WindowAggregator {
    window: Duration,
    windows: Mutex<FnvHashMap<Symbol, TradeWindow>>,
}

impl WindowAggregator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            windows: Mutex::new(FnvHashMap::default()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn record(&self, trade: &Trade) {
        self.windows
            .lock()
            .entry(trade.symbol.clone())
            .or_insert_with(|| TradeWindow::new(self.window))
            .record(trade);
    }

    pub fn snapshot(&self, symbol: &Symbol) -> Option<WindowSnapshot> {
        self.windows
            .lock()
            .get(symbol)
            .and_then(|window| window.snapshot(symbol))
    }

    pub fn reset(&self, symbol: &Symbol) {
        if let Some(window) = self.windows.lock().get_mut(symbol) {
            window.reset();
        }
    }

    pub fn trade_count(&self, symbol: &Symbol) -> usize {
        self.windows.lock().get(symbol).map_or(0, TradeWindow::len)
    }
}
