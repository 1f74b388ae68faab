use super::{FilterVerdict, fmt_deadline};
use crate::config::{ConfigStore, StopClusterConfig, minutes};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{collections::VecDeque, sync::Arc};

/// Emitted once when a burst of stops starts a global pause.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StopClusterTrigger {
    pub stops: usize,
    pub window_minutes: f64,
    pub paused_until: DateTime<Utc>,
}

/// Global log of reported stop-loss events.
#[derive(Debug, Clone, Default)]
pub struct StopLog {
    stops: VecDeque<DateTime<Utc>>,
    paused_until: Option<DateTime<Utc>>,
    total_stops: u64,
    pauses: u64,
}

impl StopLog {
    /// Log a stop and start a pause when the surviving count reaches `max_stops`. Stops that
    /// started a pause are consumed, so they never count towards a second one.
    pub fn record(&mut self, now: DateTime<Utc>, config: &StopClusterConfig) -> Option<StopClusterTrigger> {
        self.total_stops += 1;
        self.stops.push_back(now);

        let cutoff = now - minutes(config.window_minutes);
        self.stops.retain(|time| *time >= cutoff);

        if self.stops.len() < config.max_stops {
            return None;
        }

        let stops = self.stops.len();
        let paused_until = now + minutes(config.pause_minutes);
        self.stops.clear();
        self.paused_until = Some(paused_until);
        self.pauses += 1;

        Some(StopClusterTrigger {
            stops,
            window_minutes: config.window_minutes,
            paused_until,
        })
    }

    pub fn paused_until(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.paused_until.filter(|deadline| now < *deadline)
    }

    pub fn evaluate(&self, now: DateTime<Utc>) -> FilterVerdict {
        match self.paused_until(now) {
            Some(deadline) => FilterVerdict::deny(format!(
                "stop cluster pause until {}",
                fmt_deadline(deadline)
            )),
            None => FilterVerdict::allow(format!("{} recent stops", self.stops.len())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StopClusterStatus {
    pub enabled: bool,
    pub recent_stops: usize,
    pub total_stops: u64,
    pub pauses: u64,
    pub paused_until: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct StopClusterFilter {
    config: Arc<ConfigStore>,
    log: Mutex<StopLog>,
}

impl StopClusterFilter {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self {
            config,
            log: Mutex::new(StopLog::default()),
        }
    }

    pub fn record_stop(&self, now: DateTime<Utc>) -> Option<StopClusterTrigger> {
        let config = self.config.stop_cluster();
        self.log.lock().record(now, &config)
    }

    pub fn evaluate(&self, now: DateTime<Utc>) -> FilterVerdict {
        if !self.config.stop_cluster().enabled {
            return FilterVerdict::disabled();
        }
        self.log.lock().evaluate(now)
    }

    pub fn status(&self, now: DateTime<Utc>) -> StopClusterStatus {
        let log = self.log.lock();
        StopClusterStatus {
            enabled: self.config.stop_cluster().enabled,
            recent_stops: log.stops.len(),
            total_stops: log.total_stops,
            pauses: log.pauses,
            paused_until: log.paused_until(now),
        }
    }
}
