use crate::{
    config::{ConfigStore, FilterKind, InstrumentConfig},
    filter::{FilterContext, FilterStack},
    types::{Side, Symbol},
    window::WindowSnapshot,
};
use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::{borrow::Cow, sync::Arc};

/// Presentation label attached to an admitted signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum SignalLabel {
    #[display("short squeeze")]
    ShortSqueeze,
    #[display("long liquidation")]
    LongLiquidation,
}

impl SignalLabel {
    pub fn for_side(side: Side) -> Self {
        match side {
            Side::Buy => SignalLabel::ShortSqueeze,
            Side::Sell => SignalLabel::LongLiquidation,
        }
    }

    pub fn is_bullish(&self) -> bool {
        matches!(self, SignalLabel::ShortSqueeze)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Signal {
    pub side: Side,
    pub label: SignalLabel,
}

/// Why an evaluation was rejected. The `Display` output is the single reason reported.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum DenyReason {
    UnknownInstrument,
    Disabled,
    VolumeTooLow { volume: f64, min: f64 },
    DominanceTooLow { dominance: f64, min: f64 },
    PriceChangeTooSmall { change: f64, min: f64 },
    DirectionMismatch { side: Side, change: f64 },
    Filter { kind: FilterKind, reason: Cow<'static, str> },
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenyReason::UnknownInstrument => write!(f, "unknown instrument"),
            DenyReason::Disabled => write!(f, "instrument disabled"),
            DenyReason::VolumeTooLow { volume, min } => {
                write!(f, "volume too low (${volume:.0} < ${min:.0})")
            }
            DenyReason::DominanceTooLow { dominance, min } => {
                write!(f, "dominance too low ({dominance:.1}% < {min:.1}%)")
            }
            DenyReason::PriceChangeTooSmall { change, min } => {
                write!(f, "price change too small ({change:+.2}% < {min:.2}%)")
            }
            DenyReason::DirectionMismatch { side, change } => {
                write!(f, "direction mismatch ({side} flow, price {change:+.2}%)")
            }
            DenyReason::Filter { kind, reason } => write!(f, "{kind}: {reason}"),
        }
    }
}

impl DenyReason {
    /// Short reason without the measured values, eg/ "price change too small".
    pub fn summary(&self) -> &'static str {
        match self {
            DenyReason::UnknownInstrument => "unknown instrument",
            DenyReason::Disabled => "instrument disabled",
            DenyReason::VolumeTooLow { .. } => "volume too low",
            DenyReason::DominanceTooLow { .. } => "dominance too low",
            DenyReason::PriceChangeTooSmall { .. } => "price change too small",
            DenyReason::DirectionMismatch { .. } => "direction mismatch",
            DenyReason::Filter { .. } => "filtered",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum Decision {
    Allow(Signal),
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow(_))
    }
}

/// Instrument threshold checks, cheapest first, for one snapshot.
pub fn check_thresholds(config: &InstrumentConfig, snapshot: &WindowSnapshot) -> Result<Signal, DenyReason> {
    if !config.enabled {
        return Err(DenyReason::Disabled);
    }

    let volume = snapshot.total_volume();
    if volume < config.min_volume_usd {
        return Err(DenyReason::VolumeTooLow {
            volume,
            min: config.min_volume_usd,
        });
    }

    if snapshot.dominance_pct < config.min_dominance_pct {
        return Err(DenyReason::DominanceTooLow {
            dominance: snapshot.dominance_pct,
            min: config.min_dominance_pct,
        });
    }

    let change = snapshot.price_change_pct;
    if change.abs() < config.min_price_change_pct {
        return Err(DenyReason::PriceChangeTooSmall {
            change,
            min: config.min_price_change_pct,
        });
    }

    let side = snapshot.dominant_side;
    if !side.agrees_with(change) {
        return Err(DenyReason::DirectionMismatch { side, change });
    }

    Ok(Signal {
        side,
        label: SignalLabel::for_side(side),
    })
}

/// Side-effect free decision function combining instrument thresholds with the filter stack.
#[derive(Debug, Clone)]
pub struct SignalEngine {
    config: Arc<ConfigStore>,
    filters: Arc<FilterStack>,
}

impl SignalEngine {
    pub fn new(config: Arc<ConfigStore>, filters: Arc<FilterStack>) -> Self {
        Self { config, filters }
    }

    pub fn decide(&self, symbol: &Symbol, snapshot: &WindowSnapshot, now: DateTime<Utc>) -> Decision {
        let Some(instrument) = self.config.instrument(symbol) else {
            return Decision::Deny(DenyReason::UnknownInstrument);
        };

        let signal = match check_thresholds(&instrument, snapshot) {
            Ok(signal) => signal,
            Err(reason) => return Decision::Deny(reason),
        };

        let context = FilterContext {
            symbol,
            snapshot,
            now,
        };
        match self.filters.first_denial(&context) {
            Some((kind, verdict)) => Decision::Deny(DenyReason::Filter {
                kind,
                reason: verdict.reason,
            }),
            None => Decision::Allow(signal),
        }
    }
}
