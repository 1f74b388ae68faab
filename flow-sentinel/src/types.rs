/// Core market data types
///
/// Trade prints arrive as Binance `aggTrade` messages and are normalised into [`Trade`]s before
/// reaching the rolling windows.
use crate::error::FeedError;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Upper-case instrument symbol, eg/ "BTCUSDT".
pub type Symbol = SmolStr;

/// Normalise user or exchange supplied symbols into the canonical upper-case form.
pub fn symbol(raw: &str) -> Symbol {
    SmolStr::new(raw.trim().to_ascii_uppercase())
}

/// Aggressor side of a trade (taker buy or taker sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize, Display)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    #[display("BUY")]
    Buy,
    #[display("SELL")]
    Sell,
}

impl Side {
    /// Check if this is taker buy flow
    pub fn is_buy(&self) -> bool {
        matches!(self, Side::Buy)
    }

    /// Sign of the price move that agrees with this side's aggression.
    pub fn agrees_with(&self, price_change_pct: f64) -> bool {
        match self {
            Side::Buy => price_change_pct > 0.0,
            Side::Sell => price_change_pct < 0.0,
        }
    }
}

/// Single normalised trade print.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Trade {
    pub symbol: Symbol,
    /// Exchange event time in epoch milliseconds.
    pub time_ms: i64,
    pub price: f64,
    pub quantity: f64,
    /// True when the buyer was the maker, ie/ the aggressor sold.
    pub is_maker_sell: bool,
}

impl Trade {
    /// Side of the taker that initiated the trade.
    pub fn aggressor(&self) -> Side {
        if self.is_maker_sell {
            Side::Sell
        } else {
            Side::Buy
        }
    }

    /// Quote currency value of the trade.
    pub fn notional(&self) -> f64 {
        self.price * self.quantity
    }

    /// Reject prints that would poison window statistics.
    pub fn validate(self) -> Result<Self, FeedError> {
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(FeedError::InvalidTrade(format!(
                "{} price must be positive, got {}",
                self.symbol, self.price
            )));
        }
        if !self.quantity.is_finite() || self.quantity <= 0.0 {
            return Err(FeedError::InvalidTrade(format!(
                "{} quantity must be positive, got {}",
                self.symbol, self.quantity
            )));
        }
        Ok(self)
    }
}

/// ### Raw Payload Examples
/// See docs: <https://developers.binance.com/docs/derivatives/usds-margined-futures/websocket-market-streams/Aggregate-Trade-Streams>
/// ```json
/// {
///     "e": "aggTrade",
///     "E": 123456789,
///     "s": "BTCUSDT",
///     "a": 5933014,
///     "p": "0.001",
///     "q": "100",
///     "f": 100,
///     "l": 105,
///     "T": 123456785,
///     "m": true
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BinanceAggTrade {
    #[serde(rename = "s")]
    pub symbol: String,

    #[serde(rename = "p", deserialize_with = "crate::de::de_str")]
    pub price: f64,

    #[serde(rename = "q", deserialize_with = "crate::de::de_str")]
    pub quantity: f64,

    #[serde(rename = "T")]
    pub time_ms: i64,

    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
}

impl From<BinanceAggTrade> for Trade {
    fn from(value: BinanceAggTrade) -> Self {
        Self {
            symbol: symbol(&value.symbol),
            time_ms: value.time_ms,
            price: value.price,
            quantity: value.quantity,
            is_maker_sell: value.is_buyer_maker,
        }
    }
}

/// Decode and validate one raw trade message.
pub fn decode_trade(text: &str) -> Result<Trade, FeedError> {
    serde_json::from_str::<BinanceAggTrade>(text)
        .map_err(|error| FeedError::Decode(error.to_string()))
        .map(Trade::from)
        .and_then(Trade::validate)
}
