use super::FilterVerdict;
use crate::config::{ConfigStore, TimeFilterConfig};
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Pure function of wall-clock time and configuration.
pub fn evaluate_time(now: DateTime<Utc>, config: &TimeFilterConfig) -> FilterVerdict {
    let weekday = now.weekday();
    if config.blocked_weekdays.contains(&weekday) {
        return FilterVerdict::deny(format!("blocked weekday {weekday}"));
    }

    let hour = now.hour();
    if config.blocked_hours.contains(&hour) {
        return FilterVerdict::deny(format!("blocked hour {hour:02}:00 UTC"));
    }

    let (start, end) = (config.allowed_start_hour, config.allowed_end_hour);
    let inside = match start.cmp(&end) {
        std::cmp::Ordering::Equal => true,
        std::cmp::Ordering::Less => (start..end).contains(&hour),
        // Band wraps midnight, eg/ 22..6
        std::cmp::Ordering::Greater => hour >= start || hour < end,
    };

    if inside {
        FilterVerdict::allow("within trading hours")
    } else {
        FilterVerdict::deny(format!(
            "outside trading hours ({start:02}:00-{end:02}:00 UTC)"
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TimeFilterStatus {
    pub enabled: bool,
    pub allowed_now: bool,
}

#[derive(Debug)]
pub struct TimeOfDayFilter {
    config: Arc<ConfigStore>,
}

impl TimeOfDayFilter {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self { config }
    }

    pub fn evaluate(&self, now: DateTime<Utc>) -> FilterVerdict {
        let config = self.config.time_filter();
        if !config.enabled {
            return FilterVerdict::disabled();
        }
        evaluate_time(now, &config)
    }

    pub fn status(&self, now: DateTime<Utc>) -> TimeFilterStatus {
        let config = self.config.time_filter();
        TimeFilterStatus {
            enabled: config.enabled,
            allowed_now: evaluate_time(now, &config).allowed,
        }
    }
}
