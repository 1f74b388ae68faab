//! # Flow Sentinel
//! Detects aggressive one-sided order flow on a configurable set of instruments and emits
//! deduplicated, rate-limited alerts.
//!
//! Data moves through the crate in one direction:
//!
//! - [`supervisor`]: keeps one live trade subscription per instrument alive, reconnecting with
//!   linear backoff and abandoning an instrument once its retry budget is spent.
//! - [`window`]: rolling per-instrument trade window deriving buy/sell volume, dominance and
//!   price change.
//! - [`signal`]: decision function combining instrument thresholds with the [`filter`] stack.
//! - [`cooldown`]: refractory period per `(instrument, side)`.
//! - [`dispatch`]: defers alert delivery to the next whole minute behind a per-key pending gate.
//!
//! All tunables live in a [`config::ConfigStore`] that is injected into every consumer and
//! mutated only through validated setters.

/// Notification payloads and the [`AlertSink`](alert::AlertSink) delivery boundary.
pub mod alert;

/// Shared, validated runtime configuration.
pub mod config;

/// Per `(instrument, side)` alert refractory periods.
pub mod cooldown;

/// Serde helpers for exchange payloads.
pub mod de;

/// Deferred, deduplicated alert delivery.
pub mod dispatch;

/// All errors generated in `flow-sentinel`.
pub mod error;

/// Exchange trade stream transport.
pub mod feed;

/// Stateful acceptance filters evaluated after the instrument thresholds.
pub mod filter;

/// Reference-price polling used by the volatility kill-switch.
pub mod reference;

/// Wiring of every component into a running system with coordinated shutdown.
pub mod runtime;

/// The per-trade pipeline tying windows, decisions, cooldowns and dispatch together.
pub mod sentinel;

/// Instrument threshold checks and filter composition.
pub mod signal;

/// Read-only status snapshots.
pub mod status;

/// Per-instrument connection supervision.
pub mod supervisor;

/// Core market data types.
pub mod types;

/// Rolling trade windows.
pub mod window;

pub use config::{ConfigStore, SentinelConfig};
pub use runtime::SentinelHandle;
pub use sentinel::{Evaluation, Sentinel};
pub use types::{Side, Symbol, Trade};
