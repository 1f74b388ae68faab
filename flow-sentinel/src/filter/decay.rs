use super::{FilterContext, FilterVerdict};
use crate::{
    config::{ConfigStore, DecayConfig, minutes},
    types::Symbol,
};
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{collections::VecDeque, sync::Arc};

#[derive(Debug, Clone, Copy, PartialEq)]
struct Reading {
    time: DateTime<Utc>,
    aggression: f64,
}

/// Per-instrument history of aggression readings taken when alerts fired.
#[derive(Debug, Clone, Default)]
pub struct DecayHistory {
    readings: FnvHashMap<Symbol, VecDeque<Reading>>,
}

impl DecayHistory {
    pub fn record(&mut self, symbol: &Symbol, aggression: f64, now: DateTime<Utc>, config: &DecayConfig) {
        let cutoff = now - minutes(config.history_minutes);
        let history = self.readings.entry(symbol.clone()).or_default();
        history.push_back(Reading {
            time: now,
            aggression,
        });

        while history.front().is_some_and(|reading| reading.time < cutoff) {
            history.pop_front();
        }
        while history.len() > config.max_history {
            history.pop_front();
        }
    }

    /// Average of readings still inside the history window, with their count.
    fn average(&self, symbol: &Symbol, now: DateTime<Utc>, config: &DecayConfig) -> (usize, f64) {
        let cutoff = now - minutes(config.history_minutes);
        let (count, sum) = self
            .readings
            .get(symbol)
            .into_iter()
            .flatten()
            .filter(|reading| reading.time >= cutoff)
            .fold((0usize, 0.0), |(count, sum), reading| {
                (count + 1, sum + reading.aggression)
            });

        if count == 0 {
            (0, 0.0)
        } else {
            (count, sum / count as f64)
        }
    }

    pub fn evaluate(
        &self,
        symbol: &Symbol,
        current: f64,
        now: DateTime<Utc>,
        config: &DecayConfig,
    ) -> FilterVerdict {
        let (count, average) = self.average(symbol, now, config);
        if count < config.min_history {
            return FilterVerdict::allow(format!(
                "insufficient history ({count}/{})",
                config.min_history
            ));
        }
        if average <= 0.0 {
            return FilterVerdict::allow("no baseline aggression");
        }

        let ratio = current / average;
        if ratio < config.decay_threshold {
            FilterVerdict::allow(format!(
                "aggression decaying ({ratio:.2} < {:.2})",
                config.decay_threshold
            ))
        } else {
            FilterVerdict::deny(format!(
                "aggression not decaying ({ratio:.2} >= {:.2})",
                config.decay_threshold
            ))
        }
    }

    fn instruments(&self) -> usize {
        self.readings.values().filter(|history| !history.is_empty()).count()
    }

    fn len(&self) -> usize {
        self.readings.values().map(VecDeque::len).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DecayStatus {
    pub enabled: bool,
    pub instruments: usize,
    pub readings: usize,
}

#[derive(Debug)]
pub struct AggressionDecayFilter {
    config: Arc<ConfigStore>,
    history: Mutex<DecayHistory>,
}

impl AggressionDecayFilter {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self {
            config,
            history: Mutex::new(DecayHistory::default()),
        }
    }

    /// Store the aggression of an alert that just fired.
    pub fn record(&self, symbol: &Symbol, aggression: f64, now: DateTime<Utc>) {
        let config = self.config.decay();
        self.history.lock().record(symbol, aggression, now, &config);
    }

    pub fn evaluate(&self, context: &FilterContext<'_>) -> FilterVerdict {
        let config = self.config.decay();
        if !config.enabled {
            return FilterVerdict::disabled();
        }
        self.history.lock().evaluate(
            context.symbol,
            context.snapshot.aggression(),
            context.now,
            &config,
        )
    }

    pub fn status(&self) -> DecayStatus {
        let history = self.history.lock();
        DecayStatus {
            enabled: self.config.decay().enabled,
            instruments: history.instruments(),
            readings: history.len(),
        }
    }
}
