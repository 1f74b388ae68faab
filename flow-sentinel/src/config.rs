//! Runtime configuration.
//!
//! Static settings are loaded once into a [`SentinelConfig`]. Values that operators may tune at
//! runtime (instrument thresholds and filter knobs) live in a [`ConfigStore`] shared via `Arc` by
//! every consumer. Setters validate on a copy and only commit on success, so a rejected change
//! leaves state untouched.

use crate::{
    error::ConfigError,
    types::{Symbol, symbol},
};
use chrono::Weekday;
use derive_more::Display;
use fnv::FnvHashMap;
use itertools::Itertools;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, time::Duration};

/// Default rolling window length.
pub const DEFAULT_WINDOW_SECS: u64 = 180;

/// Default instruments monitored when none are configured.
pub const DEFAULT_SYMBOLS: &[&str] = &["BTCUSDT", "ETHUSDT", "SOLUSDT"];

// ============================================================================
// Instrument configuration
// ============================================================================

/// Per-instrument alert thresholds.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InstrumentConfig {
    pub symbol: Symbol,
    #[serde(default = "InstrumentConfig::default_min_volume")]
    pub min_volume_usd: f64,
    #[serde(default = "InstrumentConfig::default_min_dominance")]
    pub min_dominance_pct: f64,
    #[serde(default = "InstrumentConfig::default_min_price_change")]
    pub min_price_change_pct: f64,
    #[serde(default = "InstrumentConfig::default_cooldown")]
    pub cooldown_minutes: f64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl InstrumentConfig {
    fn default_min_volume() -> f64 {
        500_000.0
    }

    fn default_min_dominance() -> f64 {
        65.0
    }

    fn default_min_price_change() -> f64 {
        0.5
    }

    fn default_cooldown() -> f64 {
        15.0
    }

    /// Create a configuration with default thresholds.
    pub fn new(raw_symbol: &str) -> Self {
        Self {
            symbol: symbol(raw_symbol),
            min_volume_usd: Self::default_min_volume(),
            min_dominance_pct: Self::default_min_dominance(),
            min_price_change_pct: Self::default_min_price_change(),
            cooldown_minutes: Self::default_cooldown(),
            enabled: true,
        }
    }

    pub fn with_min_volume(mut self, value: f64) -> Self {
        self.min_volume_usd = value;
        self
    }

    pub fn with_min_dominance(mut self, value: f64) -> Self {
        self.min_dominance_pct = value;
        self
    }

    pub fn with_min_price_change(mut self, value: f64) -> Self {
        self.min_price_change_pct = value;
        self
    }

    pub fn with_cooldown_minutes(mut self, value: f64) -> Self {
        self.cooldown_minutes = value;
        self
    }

    /// Current cooldown as a chrono duration.
    pub fn cooldown(&self) -> chrono::TimeDelta {
        minutes(self.cooldown_minutes)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for param in InstrumentParam::ALL {
            param.check(self.get(param))?;
        }
        Ok(())
    }

    pub fn get(&self, param: InstrumentParam) -> f64 {
        match param {
            InstrumentParam::MinVolume => self.min_volume_usd,
            InstrumentParam::MinDominance => self.min_dominance_pct,
            InstrumentParam::MinPriceChange => self.min_price_change_pct,
            InstrumentParam::CooldownMinutes => self.cooldown_minutes,
        }
    }

    fn set(&mut self, param: InstrumentParam, value: f64) {
        match param {
            InstrumentParam::MinVolume => self.min_volume_usd = value,
            InstrumentParam::MinDominance => self.min_dominance_pct = value,
            InstrumentParam::MinPriceChange => self.min_price_change_pct = value,
            InstrumentParam::CooldownMinutes => self.cooldown_minutes = value,
        }
    }
}

/// Numeric instrument parameters settable at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentParam {
    #[display("min_volume")]
    MinVolume,
    #[display("min_dominance")]
    MinDominance,
    #[display("min_price_change")]
    MinPriceChange,
    #[display("cooldown_minutes")]
    CooldownMinutes,
}

impl InstrumentParam {
    pub const ALL: [InstrumentParam; 4] = [
        InstrumentParam::MinVolume,
        InstrumentParam::MinDominance,
        InstrumentParam::MinPriceChange,
        InstrumentParam::CooldownMinutes,
    ];

    fn check(self, value: f64) -> Result<(), ConfigError> {
        let name = self.to_string();
        match self {
            InstrumentParam::MinDominance if !(50.0..=100.0).contains(&value) => {
                Err(ConfigError::out_of_range(&name, value, "50..=100"))
            }
            InstrumentParam::CooldownMinutes => check_minutes(&name, value),
            _ => check_non_negative(&name, value),
        }
    }
}

impl FromStr for InstrumentParam {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalise_key(s).as_str() {
            "min_volume" | "min_volume_usd" | "volume" => Ok(Self::MinVolume),
            "min_dominance" | "min_dominance_pct" | "dominance" => Ok(Self::MinDominance),
            "min_price_change" | "min_price_change_pct" | "price_change" => {
                Ok(Self::MinPriceChange)
            }
            "cooldown_minutes" | "cooldown" => Ok(Self::CooldownMinutes),
            _ => Err(ConfigError::unknown_param("instrument", s)),
        }
    }
}

// ============================================================================
// Filter configuration
// ============================================================================

/// The closed set of acceptance filters, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    #[display("aggression_decay")]
    AggressionDecay,
    #[display("stop_cluster")]
    StopCluster,
    #[display("time_of_day")]
    TimeOfDay,
    #[display("volatility")]
    Volatility,
}

impl FilterKind {
    pub const ORDER: [FilterKind; 4] = [
        FilterKind::AggressionDecay,
        FilterKind::StopCluster,
        FilterKind::TimeOfDay,
        FilterKind::Volatility,
    ];
}

impl FromStr for FilterKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalise_key(s).as_str() {
            "aggression_decay" | "decay" | "aggression" => Ok(Self::AggressionDecay),
            "stop_cluster" | "stops" | "stop" => Ok(Self::StopCluster),
            "time_of_day" | "time" => Ok(Self::TimeOfDay),
            "volatility" | "vol" | "kill_switch" => Ok(Self::Volatility),
            _ => Err(ConfigError::UnknownFilter(s.to_string())),
        }
    }
}

/// Aggression-decay filter knobs.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DecayConfig {
    pub enabled: bool,
    /// Allow only when `current / average` aggression is below this ratio.
    pub decay_threshold: f64,
    /// Readings required before the filter activates.
    pub min_history: usize,
    /// Readings older than this are ignored.
    pub history_minutes: f64,
    pub max_history: usize,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            decay_threshold: 0.85,
            min_history: 3,
            history_minutes: 60.0,
            max_history: 50,
        }
    }
}

impl DecayConfig {
    fn set_param(&mut self, param: &str, value: &str) -> Result<ParamChange, ConfigError> {
        match normalise_key(param).as_str() {
            "enabled" => set_flag(&mut self.enabled, value),
            "decay_threshold" | "threshold" => {
                set_number(&mut self.decay_threshold, "decay_threshold", value)
            }
            "min_history" => set_count(&mut self.min_history, "min_history", value),
            "history_minutes" => set_number(&mut self.history_minutes, "history_minutes", value),
            "max_history" => set_count(&mut self.max_history, "max_history", value),
            _ => Err(ConfigError::unknown_param(
                &FilterKind::AggressionDecay.to_string(),
                param,
            )),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        check_non_negative("decay_threshold", self.decay_threshold)?;
        check_minutes("history_minutes", self.history_minutes)?;
        if self.max_history == 0 {
            return Err(ConfigError::out_of_range("max_history", 0.0, ">= 1"));
        }
        Ok(())
    }
}

/// Stop-cluster protection knobs.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StopClusterConfig {
    pub enabled: bool,
    /// Stops within the window that trigger a pause.
    pub max_stops: usize,
    pub window_minutes: f64,
    pub pause_minutes: f64,
}

impl Default for StopClusterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_stops: 2,
            window_minutes: 30.0,
            pause_minutes: 60.0,
        }
    }
}

impl StopClusterConfig {
    fn set_param(&mut self, param: &str, value: &str) -> Result<ParamChange, ConfigError> {
        match normalise_key(param).as_str() {
            "enabled" => set_flag(&mut self.enabled, value),
            "max_stops" => set_count(&mut self.max_stops, "max_stops", value),
            "window_minutes" | "time_window_minutes" => {
                set_number(&mut self.window_minutes, "window_minutes", value)
            }
            "pause_minutes" => set_number(&mut self.pause_minutes, "pause_minutes", value),
            _ => Err(ConfigError::unknown_param(
                &FilterKind::StopCluster.to_string(),
                param,
            )),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_stops == 0 {
            return Err(ConfigError::out_of_range("max_stops", 0.0, ">= 1"));
        }
        check_minutes("window_minutes", self.window_minutes)?;
        check_minutes("pause_minutes", self.pause_minutes)
    }
}

/// Time-of-day filter knobs. All hours are UTC.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeFilterConfig {
    pub enabled: bool,
    pub blocked_weekdays: Vec<Weekday>,
    pub blocked_hours: Vec<u32>,
    /// Inclusive start of the allowed band.
    pub allowed_start_hour: u32,
    /// Exclusive end of the allowed band. Equal bounds allow the whole day.
    pub allowed_end_hour: u32,
}

impl Default for TimeFilterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            blocked_weekdays: Vec::new(),
            blocked_hours: Vec::new(),
            allowed_start_hour: 0,
            allowed_end_hour: 0,
        }
    }
}

impl TimeFilterConfig {
    fn set_param(&mut self, param: &str, value: &str) -> Result<ParamChange, ConfigError> {
        match normalise_key(param).as_str() {
            "enabled" => set_flag(&mut self.enabled, value),
            "blocked_weekdays" | "blocked_days" => {
                let new = parse_weekdays("blocked_weekdays", value)?;
                let old = std::mem::replace(&mut self.blocked_weekdays, new.clone());
                Ok(ParamChange::new(
                    ParamValue::Weekdays(old),
                    ParamValue::Weekdays(new),
                ))
            }
            "blocked_hours" => {
                let new = parse_hours("blocked_hours", value)?;
                let old = std::mem::replace(&mut self.blocked_hours, new.clone());
                Ok(ParamChange::new(ParamValue::Hours(old), ParamValue::Hours(new)))
            }
            "allowed_start_hour" | "start_hour" => {
                set_hour(&mut self.allowed_start_hour, "allowed_start_hour", value)
            }
            "allowed_end_hour" | "end_hour" => {
                set_hour(&mut self.allowed_end_hour, "allowed_end_hour", value)
            }
            _ => Err(ConfigError::unknown_param(
                &FilterKind::TimeOfDay.to_string(),
                param,
            )),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.blocked_hours
            .iter()
            .chain([&self.allowed_start_hour, &self.allowed_end_hour])
            .try_for_each(|hour| check_hour("hour", *hour))
    }
}

/// Market-wide volatility kill-switch knobs.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct VolatilityConfig {
    pub enabled: bool,
    pub reference_symbol: Symbol,
    pub poll_interval_secs: u64,
    /// Trailing timeframe the move is measured over.
    pub timeframe_minutes: f64,
    pub threshold_pct: f64,
    pub pause_minutes: f64,
}

impl Default for VolatilityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reference_symbol: symbol("BTCUSDT"),
            poll_interval_secs: 60,
            timeframe_minutes: 15.0,
            threshold_pct: 2.0,
            pause_minutes: 60.0,
        }
    }
}

impl VolatilityConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    fn set_param(&mut self, param: &str, value: &str) -> Result<ParamChange, ConfigError> {
        match normalise_key(param).as_str() {
            "enabled" => set_flag(&mut self.enabled, value),
            "poll_interval_secs" | "poll_interval" => {
                let mut secs = self.poll_interval_secs as usize;
                let change = set_count(&mut secs, "poll_interval_secs", value)?;
                if secs == 0 {
                    return Err(ConfigError::out_of_range("poll_interval_secs", 0.0, ">= 1"));
                }
                self.poll_interval_secs = secs as u64;
                Ok(change)
            }
            "timeframe_minutes" | "timeframe" => {
                set_number(&mut self.timeframe_minutes, "timeframe_minutes", value)
            }
            "threshold_pct" | "threshold" => {
                set_number(&mut self.threshold_pct, "threshold_pct", value)
            }
            "pause_minutes" => set_number(&mut self.pause_minutes, "pause_minutes", value),
            _ => Err(ConfigError::unknown_param(
                &FilterKind::Volatility.to_string(),
                param,
            )),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::out_of_range("poll_interval_secs", 0.0, ">= 1"));
        }
        check_minutes("timeframe_minutes", self.timeframe_minutes)?;
        check_non_negative("threshold_pct", self.threshold_pct)?;
        check_minutes("pause_minutes", self.pause_minutes)
    }
}

/// Configuration of every acceptance filter.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FilterConfig {
    pub decay: DecayConfig,
    pub stop_cluster: StopClusterConfig,
    pub time: TimeFilterConfig,
    pub volatility: VolatilityConfig,
}

impl FilterConfig {
    /// Every filter switched off, leaving only the instrument thresholds.
    pub fn disabled() -> Self {
        let mut config = Self::default();
        config.decay.enabled = false;
        config.stop_cluster.enabled = false;
        config.time.enabled = false;
        config.volatility.enabled = false;
        config
    }

    pub fn is_enabled(&self, kind: FilterKind) -> bool {
        match kind {
            FilterKind::AggressionDecay => self.decay.enabled,
            FilterKind::StopCluster => self.stop_cluster.enabled,
            FilterKind::TimeOfDay => self.time.enabled,
            FilterKind::Volatility => self.volatility.enabled,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.decay.validate()?;
        self.stop_cluster.validate()?;
        self.time.validate()?;
        self.volatility.validate()
    }

    fn set_param(
        &mut self,
        kind: FilterKind,
        param: &str,
        value: &str,
    ) -> Result<ParamChange, ConfigError> {
        match kind {
            FilterKind::AggressionDecay => self.decay.set_param(param, value),
            FilterKind::StopCluster => self.stop_cluster.set_param(param, value),
            FilterKind::TimeOfDay => self.time.set_param(param, value),
            FilterKind::Volatility => self.volatility.set_param(param, value),
        }
    }
}

// ============================================================================
// Parameter values
// ============================================================================

/// A configuration value before or after a change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Number(f64),
    Count(usize),
    Flag(bool),
    Hours(Vec<u32>),
    Weekdays(Vec<Weekday>),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Number(value) => write!(f, "{value}"),
            ParamValue::Count(value) => write!(f, "{value}"),
            ParamValue::Flag(value) => write!(f, "{}", if *value { "on" } else { "off" }),
            ParamValue::Hours(hours) if hours.is_empty() => write!(f, "none"),
            ParamValue::Hours(hours) => write!(f, "{}", hours.iter().join(",")),
            ParamValue::Weekdays(days) if days.is_empty() => write!(f, "none"),
            ParamValue::Weekdays(days) => write!(f, "{}", days.iter().join(",")),
        }
    }
}

/// Result of a successful setter call.
#[derive(Debug, Clone, PartialEq, Serialize, derive_more::Constructor)]
pub struct ParamChange {
    pub old: ParamValue,
    pub new: ParamValue,
}

impl fmt::Display for ParamChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.old, self.new)
    }
}

fn default_true() -> bool {
    true
}

/// Accept "minVolume", "min-volume" and "min_volume" alike.
fn normalise_key(raw: &str) -> String {
    let mut key = String::with_capacity(raw.len() + 4);
    for ch in raw.trim().chars() {
        if ch.is_ascii_uppercase() {
            if !key.is_empty() && !key.ends_with('_') {
                key.push('_');
            }
            key.push(ch.to_ascii_lowercase());
        } else if ch == '-' || ch == ' ' {
            key.push('_');
        } else {
            key.push(ch);
        }
    }
    key
}

/// Upper bound for every minute-valued knob (365 days).
pub const MAX_MINUTES: f64 = 525_600.0;

/// Minutes as a chrono duration, clamped to `0..=MAX_MINUTES` so deadline arithmetic on
/// `DateTime<Utc>` cannot overflow.
pub(crate) fn minutes(value: f64) -> chrono::TimeDelta {
    let value = if value.is_nan() { 0.0 } else { value.clamp(0.0, MAX_MINUTES) };
    chrono::TimeDelta::milliseconds((value * 60_000.0).round() as i64)
}

fn check_non_negative(param: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::out_of_range(param, value, ">= 0"))
    }
}

fn check_minutes(param: &str, value: f64) -> Result<(), ConfigError> {
    check_non_negative(param, value)?;
    if value <= MAX_MINUTES {
        Ok(())
    } else {
        Err(ConfigError::out_of_range(param, value, "<= 525600"))
    }
}

fn check_hour(param: &str, hour: u32) -> Result<(), ConfigError> {
    if hour < 24 {
        Ok(())
    } else {
        Err(ConfigError::out_of_range(param, hour as f64, "0..=23"))
    }
}

fn parse_number(param: &str, value: &str) -> Result<f64, ConfigError> {
    let number = value
        .trim()
        .parse::<f64>()
        .map_err(|_| ConfigError::invalid(param, value, "a number"))?;
    check_non_negative(param, number)?;
    Ok(number)
}

fn parse_flag(value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "1" | "yes" | "enable" | "enabled" => Ok(true),
        "off" | "false" | "0" | "no" | "disable" | "disabled" => Ok(false),
        _ => Err(ConfigError::invalid("enabled", value, "on/off")),
    }
}

fn parse_list<T>(
    param: &str,
    value: &str,
    parse: impl Fn(&str) -> Option<T>,
    expected: &str,
) -> Result<Vec<T>, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
        return Ok(Vec::new());
    }
    trimmed
        .split(',')
        .map(|item| parse(item.trim()).ok_or_else(|| ConfigError::invalid(param, value, expected)))
        .collect()
}

fn parse_hours(param: &str, value: &str) -> Result<Vec<u32>, ConfigError> {
    let hours = parse_list(param, value, |item| item.parse::<u32>().ok(), "a list of hours")?;
    hours.iter().try_for_each(|hour| check_hour(param, *hour))?;
    Ok(hours.into_iter().sorted().dedup().collect())
}

fn parse_weekdays(param: &str, value: &str) -> Result<Vec<Weekday>, ConfigError> {
    let days = parse_list(
        param,
        value,
        |item| item.parse::<Weekday>().ok(),
        "a list of weekdays",
    )?;
    Ok(days
        .into_iter()
        .sorted_by_key(|day| day.num_days_from_monday())
        .dedup()
        .collect())
}

fn set_number(field: &mut f64, param: &str, value: &str) -> Result<ParamChange, ConfigError> {
    let new = parse_number(param, value)?;
    let old = std::mem::replace(field, new);
    Ok(ParamChange::new(ParamValue::Number(old), ParamValue::Number(new)))
}

fn set_count(field: &mut usize, param: &str, value: &str) -> Result<ParamChange, ConfigError> {
    let new = value
        .trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::invalid(param, value, "a whole number"))?;
    let old = std::mem::replace(field, new);
    Ok(ParamChange::new(ParamValue::Count(old), ParamValue::Count(new)))
}

fn set_hour(field: &mut u32, param: &str, value: &str) -> Result<ParamChange, ConfigError> {
    let new = value
        .trim()
        .parse::<u32>()
        .map_err(|_| ConfigError::invalid(param, value, "an hour"))?;
    check_hour(param, new)?;
    let old = std::mem::replace(field, new);
    Ok(ParamChange::new(
        ParamValue::Count(old as usize),
        ParamValue::Count(new as usize),
    ))
}

fn set_flag(field: &mut bool, value: &str) -> Result<ParamChange, ConfigError> {
    let new = parse_flag(value)?;
    let old = std::mem::replace(field, new);
    Ok(ParamChange::new(ParamValue::Flag(old), ParamValue::Flag(new)))
}

// ============================================================================
// Shared store
// ============================================================================

/// Owned configuration service shared by every component.
///
/// Each family of values sits behind its own lock, so an update to one entry is atomic with
/// respect to readers of that entry without serialising unrelated readers.
#[derive(Debug, Default)]
pub struct ConfigStore {
    instruments: RwLock<FnvHashMap<Symbol, InstrumentConfig>>,
    filters: RwLock<FilterConfig>,
}

impl ConfigStore {
    pub fn new(
        instruments: impl IntoIterator<Item = InstrumentConfig>,
        filters: FilterConfig,
    ) -> Result<Self, ConfigError> {
        filters.validate()?;
        let mut map = FnvHashMap::default();
        for mut instrument in instruments {
            instrument.symbol = symbol(&instrument.symbol);
            instrument.validate()?;
            if map.contains_key(&instrument.symbol) {
                return Err(ConfigError::DuplicateSymbol(instrument.symbol));
            }
            map.insert(instrument.symbol.clone(), instrument);
        }

        Ok(Self {
            instruments: RwLock::new(map),
            filters: RwLock::new(filters),
        })
    }

    pub fn instrument(&self, raw_symbol: &str) -> Option<InstrumentConfig> {
        self.instruments.read().get(&symbol(raw_symbol)).cloned()
    }

    /// All instruments sorted by symbol.
    pub fn instruments(&self) -> Vec<InstrumentConfig> {
        self.instruments
            .read()
            .values()
            .cloned()
            .sorted_by(|a, b| a.symbol.cmp(&b.symbol))
            .collect()
    }

    pub fn enabled_symbols(&self) -> Vec<Symbol> {
        self.instruments()
            .into_iter()
            .filter(|instrument| instrument.enabled)
            .map(|instrument| instrument.symbol)
            .collect()
    }

    pub fn filters(&self) -> FilterConfig {
        self.filters.read().clone()
    }

    pub fn decay(&self) -> DecayConfig {
        self.filters.read().decay.clone()
    }

    pub fn stop_cluster(&self) -> StopClusterConfig {
        self.filters.read().stop_cluster.clone()
    }

    pub fn time_filter(&self) -> TimeFilterConfig {
        self.filters.read().time.clone()
    }

    pub fn volatility(&self) -> VolatilityConfig {
        self.filters.read().volatility.clone()
    }

    /// Set a numeric instrument threshold, eg/ `("BTCUSDT", "min_volume", "1500000")`.
    pub fn set_instrument_param(
        &self,
        raw_symbol: &str,
        param: &str,
        value: &str,
    ) -> Result<ParamChange, ConfigError> {
        let param = InstrumentParam::from_str(param)?;
        let new = value
            .trim()
            .parse::<f64>()
            .map_err(|_| ConfigError::invalid(&param.to_string(), value, "a number"))?;
        param.check(new)?;

        let key = symbol(raw_symbol);
        let mut instruments = self.instruments.write();
        let instrument = instruments
            .get_mut(&key)
            .ok_or_else(|| ConfigError::UnknownSymbol(key.clone()))?;
        let old = instrument.get(param);
        instrument.set(param, new);

        Ok(ParamChange::new(ParamValue::Number(old), ParamValue::Number(new)))
    }

    /// Flip the `enabled` flag only. Trade streams are started by `SentinelHandle::set_enabled`.
    pub fn set_enabled(&self, raw_symbol: &str, enabled: bool) -> Result<ParamChange, ConfigError> {
        let key = symbol(raw_symbol);
        let mut instruments = self.instruments.write();
        let instrument = instruments
            .get_mut(&key)
            .ok_or(ConfigError::UnknownSymbol(key))?;
        let old = std::mem::replace(&mut instrument.enabled, enabled);

        Ok(ParamChange::new(ParamValue::Flag(old), ParamValue::Flag(enabled)))
    }

    /// Set a filter knob, eg/ `("stop_cluster", "max_stops", "3")` or `("time", "enabled", "on")`.
    pub fn set_filter_param(
        &self,
        filter: &str,
        param: &str,
        value: &str,
    ) -> Result<ParamChange, ConfigError> {
        let kind = FilterKind::from_str(filter)?;
        let mut filters = self.filters.write();
        let mut candidate = filters.clone();
        let change = candidate.set_param(kind, param, value)?;
        candidate.validate()?;
        *filters = candidate;
        Ok(change)
    }
}

// ============================================================================
// Static settings
// ============================================================================

/// Rolling window settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WindowConfig {
    pub window_secs: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_secs: DEFAULT_WINDOW_SECS,
        }
    }
}

/// Connection supervision settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Delay between consecutive instrument connection starts.
    pub stagger_ms: u64,
    /// Reconnect delay is `base × attempt`.
    pub reconnect_base_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    /// Clear the instrument window when a connection is re-established.
    pub reset_window_on_reconnect: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            stagger_ms: 250,
            reconnect_base_delay_ms: 5_000,
            max_reconnect_attempts: 10,
            reset_window_on_reconnect: false,
        }
    }
}

impl SupervisorConfig {
    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms)
    }

    /// Linear backoff for the given (1-based) attempt.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms.saturating_mul(attempt as u64))
    }
}

/// Exchange transport settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FeedConfig {
    pub ws_base_url: String,
    pub rest_base_url: String,
    pub ping_interval_secs: u64,
    /// Connection is treated as dead when silent for this long.
    pub read_timeout_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ws_base_url: "wss://fstream.binance.com/ws".to_string(),
            rest_base_url: "https://fapi.binance.com".to_string(),
            ping_interval_secs: 30,
            read_timeout_secs: 120,
        }
    }
}

/// Alert delivery settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Batch deliveries to the start of the next whole minute.
    pub defer_to_next_minute: bool,
    /// Optional JSON webhook receiving every notification.
    pub webhook_url: Option<String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            defer_to_next_minute: true,
            webhook_url: None,
        }
    }
}

/// Complete static configuration of a sentinel process.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SentinelConfig {
    pub instruments: Vec<InstrumentConfig>,
    pub filters: FilterConfig,
    pub window: WindowConfig,
    pub supervisor: SupervisorConfig,
    pub feed: FeedConfig,
    pub dispatch: DispatchConfig,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            instruments: DEFAULT_SYMBOLS
                .iter()
                .map(|raw| InstrumentConfig::new(raw))
                .collect(),
            filters: FilterConfig::default(),
            window: WindowConfig::default(),
            supervisor: SupervisorConfig::default(),
            feed: FeedConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

impl SentinelConfig {
    /// Load from the JSON file named by `SENTINEL_CONFIG`, falling back to defaults, then apply
    /// environment overrides:
    /// - `SYMBOLS`: comma separated instruments (default thresholds)
    /// - `BINANCE_WS_URL`, `BINANCE_REST_URL`: exchange endpoints
    /// - `ALERT_WEBHOOK_URL`: JSON webhook for notifications
    /// - `REFERENCE_SYMBOL`: volatility kill-switch reference instrument
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("SENTINEL_CONFIG") {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path)
                    .map_err(|error| ConfigError::Load(format!("{path}: {error}")))?;
                Self::from_json(&raw)?
            }
            Err(_) => Self::default(),
        };

        if let Some(symbols) = env_var("SYMBOLS") {
            config.instruments = symbols
                .split(',')
                .filter(|raw| !raw.trim().is_empty())
                .map(InstrumentConfig::new)
                .collect();
        }
        if let Some(url) = env_var("BINANCE_WS_URL") {
            config.feed.ws_base_url = url;
        }
        if let Some(url) = env_var("BINANCE_REST_URL") {
            config.feed.rest_base_url = url;
        }
        if let Some(url) = env_var("ALERT_WEBHOOK_URL") {
            config.dispatch.webhook_url = Some(url);
        }
        if let Some(reference) = env_var("REFERENCE_SYMBOL") {
            config.filters.volatility.reference_symbol = symbol(&reference);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config = serde_json::from_str::<Self>(raw)
            .map_err(|error| ConfigError::Load(error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.filters.validate()?;
        self.instruments.iter().try_for_each(InstrumentConfig::validate)?;
        if self.window.window_secs == 0 {
            return Err(ConfigError::out_of_range("window_secs", 0.0, ">= 1"));
        }
        Ok(())
    }

    /// Build the shared runtime store from the loaded instruments and filters.
    pub fn store(&self) -> Result<ConfigStore, ConfigError> {
        ConfigStore::new(self.instruments.clone(), self.filters.clone())
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}
