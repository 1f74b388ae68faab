use crate::{filter::FilterStackStatus, supervisor::ConnectionStatus, types::Symbol};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Read-only snapshot of the whole sentinel.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SentinelStatus {
    pub time: DateTime<Utc>,
    pub instruments: Vec<InstrumentStatus>,
    pub filters: FilterStackStatus,
    pub pending_dispatches: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InstrumentStatus {
    pub symbol: Symbol,
    pub enabled: bool,
    pub window_trades: usize,
    pub buy_cooldown_until: Option<DateTime<Utc>>,
    pub sell_cooldown_until: Option<DateTime<Utc>>,
    pub connection: Option<ConnectionStatus>,
}

impl SentinelStatus {
    /// Attach supervisor connection state to the matching instruments.
    pub fn with_connections(mut self, connections: Vec<ConnectionStatus>) -> Self {
        for connection in connections {
            if let Some(instrument) = self
                .instruments
                .iter_mut()
                .find(|instrument| instrument.symbol == connection.symbol)
            {
                instrument.connection = Some(connection);
            }
        }
        self
    }

    pub fn instrument(&self, symbol: &str) -> Option<&InstrumentStatus> {
        self.instruments.iter().find(|instrument| instrument.symbol == symbol)
    }
}
