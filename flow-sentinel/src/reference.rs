use crate::{error::ReferenceError, types::Symbol};
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt::Debug;

/// Point-in-time price of a reference instrument.
#[async_trait]
pub trait ReferencePriceSource: Debug + Send + Sync {
    async fn fetch_price(&self, symbol: &Symbol) -> Result<f64, ReferenceError>;
}

/// ### Raw Payload Examples
/// See docs: <https://developers.binance.com/docs/derivatives/usds-margined-futures/market-data/rest-api/Symbol-Price-Ticker>
/// ```json
/// {
///     "symbol": "BTCUSDT",
///     "price": "6000.01",
///     "time": 1589437530011
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BinanceTickerPrice {
    pub symbol: String,
    #[serde(deserialize_with = "crate::de::de_str")]
    pub price: f64,
}

/// Polls the Binance futures REST ticker.
#[derive(Debug, Clone)]
pub struct BinanceRestPriceSource {
    client: reqwest::Client,
    base_url: String,
}

impl BinanceRestPriceSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn url(&self, symbol: &Symbol) -> String {
        format!("{}/fapi/v1/ticker/price?symbol={symbol}", self.base_url)
    }
}

#[async_trait]
impl ReferencePriceSource for BinanceRestPriceSource {
    async fn fetch_price(&self, symbol: &Symbol) -> Result<f64, ReferenceError> {
        let response = self
            .client
            .get(self.url(symbol))
            .send()
            .await
            .map_err(|error| ReferenceError::Request {
                symbol: symbol.to_string(),
                reason: error.to_string(),
            })?;

        if let Err(status_err) = response.error_for_status_ref() {
            return Err(ReferenceError::Request {
                symbol: symbol.to_string(),
                reason: status_err.to_string(),
            });
        }

        let ticker = response
            .json::<BinanceTickerPrice>()
            .await
            .map_err(|error| ReferenceError::Decode {
                symbol: symbol.to_string(),
                reason: error.to_string(),
            })?;

        validate_price(symbol, ticker.price)
    }
}

pub(crate) fn validate_price(symbol: &Symbol, price: f64) -> Result<f64, ReferenceError> {
    if price.is_finite() && price > 0.0 {
        Ok(price)
    } else {
        Err(ReferenceError::InvalidPrice {
            symbol: symbol.to_string(),
            price,
        })
    }
}
