use super::{FilterVerdict, fmt_deadline};
use crate::{
    config::{ConfigStore, VolatilityConfig, minutes},
    types::Symbol,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{collections::VecDeque, sync::Arc};
use tracing::debug;

/// Emitted once when a reference price move starts a global pause.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct VolatilityTrigger {
    pub reference_symbol: Symbol,
    pub move_pct: f64,
    pub from_price: f64,
    pub to_price: f64,
    pub timeframe_minutes: f64,
    pub paused_until: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Sample {
    time: DateTime<Utc>,
    price: f64,
}

/// Trailing reference price history and the global pause deadline.
#[derive(Debug, Clone, Default)]
pub struct VolatilityState {
    samples: VecDeque<Sample>,
    paused_until: Option<DateTime<Utc>>,
    last_move_pct: Option<f64>,
    triggers: u64,
}

impl VolatilityState {
    /// Add a sample and check the oldest-to-newest move. Returns a trigger only on the poll that
    /// starts a pause.
    pub fn observe(
        &mut self,
        price: f64,
        now: DateTime<Utc>,
        config: &VolatilityConfig,
    ) -> Option<VolatilityTrigger> {
        self.samples.push_back(Sample { time: now, price });
        let cutoff = now - minutes(config.timeframe_minutes);
        while self.samples.front().is_some_and(|sample| sample.time < cutoff) {
            self.samples.pop_front();
        }

        let (oldest, newest) = (self.samples.front()?, self.samples.back()?);
        if oldest.price <= 0.0 {
            return None;
        }
        let move_pct = (newest.price - oldest.price).abs() / oldest.price * 100.0;
        let (from_price, to_price) = (oldest.price, newest.price);
        self.last_move_pct = Some(move_pct);

        if self.paused_until(now).is_some() {
            debug!(move_pct, "volatility kill-switch already active");
            return None;
        }
        if move_pct < config.threshold_pct {
            return None;
        }

        let paused_until = now + minutes(config.pause_minutes);
        self.paused_until = Some(paused_until);
        self.samples.clear();
        self.triggers += 1;

        Some(VolatilityTrigger {
            reference_symbol: config.reference_symbol.clone(),
            move_pct,
            from_price,
            to_price,
            timeframe_minutes: config.timeframe_minutes,
            paused_until,
        })
    }

    pub fn paused_until(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.paused_until.filter(|deadline| now < *deadline)
    }

    pub fn evaluate(&self, now: DateTime<Utc>) -> FilterVerdict {
        match self.paused_until(now) {
            Some(deadline) => FilterVerdict::deny(format!(
                "volatility kill-switch active until {}",
                fmt_deadline(deadline)
            )),
            None => FilterVerdict::allow("market volatility normal"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct VolatilityStatus {
    pub enabled: bool,
    pub reference_symbol: Symbol,
    pub samples: usize,
    pub last_move_pct: Option<f64>,
    pub triggers: u64,
    pub paused_until: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct VolatilityFilter {
    config: Arc<ConfigStore>,
    state: Mutex<VolatilityState>,
}

impl VolatilityFilter {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self {
            config,
            state: Mutex::new(VolatilityState::default()),
        }
    }

    pub fn observe(&self, price: f64, now: DateTime<Utc>) -> Option<VolatilityTrigger> {
        let config = self.config.volatility();
        self.state.lock().observe(price, now, &config)
    }

    pub fn evaluate(&self, now: DateTime<Utc>) -> FilterVerdict {
        if !self.config.volatility().enabled {
            return FilterVerdict::disabled();
        }
        self.state.lock().evaluate(now)
    }

    pub fn status(&self, now: DateTime<Utc>) -> VolatilityStatus {
        let config = self.config.volatility();
        let state = self.state.lock();
        VolatilityStatus {
            enabled: config.enabled,
            reference_symbol: config.reference_symbol,
            samples: state.samples.len(),
            last_move_pct: state.last_move_pct,
            triggers: state.triggers,
            paused_until: state.paused_until(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::test_util::noon;
    use chrono::TimeDelta;

    #[test]
    fn test_breach_pauses_once() {
        let config = VolatilityConfig::default();
        let mut state = VolatilityState::default();
        let minute = |n: i64| noon() + TimeDelta::minutes(n);

        assert_eq!(state.observe(100.0, minute(0), &config), None);
        assert_eq!(state.observe(100.0, minute(1), &config), None);

        let trigger = state.observe(103.0, minute(2), &config).unwrap();
        assert!((trigger.move_pct - 3.0).abs() < 1e-9);
        assert_eq!(trigger.paused_until, minute(62));
        assert!(!state.evaluate(minute(3)).allowed);

        // Next polls while paused never re-notify, even on a fresh breach
        assert_eq!(state.observe(103.0, minute(3), &config), None);
        assert_eq!(state.observe(110.0, minute(4), &config), None);
        assert!(!state.evaluate(minute(4)).allowed);
        assert_eq!(state.triggers, 1);

        // Re-arms after the pause expires and a new breach occurs
        assert!(state.evaluate(minute(62)).allowed);
        assert_eq!(state.observe(100.0, minute(70), &config), None);
        assert!(state.observe(97.5, minute(71), &config).is_some());
        assert_eq!(state.triggers, 2);
    }

    #[test]
    fn test_move_measured_within_timeframe() {
        struct TestCase {
            prices: Vec<(i64, f64)>,
            expected: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: move below threshold
                prices: vec![(0, 100.0), (5, 101.0), (10, 101.9)],
                expected: false,
            },
            TestCase {
                // TC1: move exactly at threshold triggers
                prices: vec![(0, 100.0), (10, 98.0)],
                expected: true,
            },
            TestCase {
                // TC2: oldest sample fell outside the timeframe
                prices: vec![(0, 100.0), (16, 102.5), (20, 103.0)],
                expected: false,
            },
            TestCase {
                // TC3: single sample never triggers
                prices: vec![(0, 100.0)],
                expected: false,
            },
        ];

        let config = VolatilityConfig::default();
        for (index, test) in tests.into_iter().enumerate() {
            let mut state = VolatilityState::default();
            let triggered = test
                .prices
                .into_iter()
                .map(|(offset, price)| state.observe(price, noon() + TimeDelta::minutes(offset), &config))
                .any(|trigger| trigger.is_some());
            assert_eq!(triggered, test.expected, "TC{} failed", index);
        }
    }
}
