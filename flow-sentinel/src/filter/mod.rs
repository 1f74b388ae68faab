use crate::{
    config::{ConfigStore, FilterKind},
    types::Symbol,
    window::WindowSnapshot,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{borrow::Cow, sync::Arc};

/// Aggression-decay filter: admits only fading aggression.
pub mod decay;

/// Stop-cluster protection: global pause after a burst of reported stops.
pub mod stop_cluster;

/// Stateless weekday and UTC hour restrictions.
pub mod time;

/// Market-wide volatility kill-switch fed by reference prices.
pub mod volatility;

pub use decay::{AggressionDecayFilter, DecayStatus};
pub use stop_cluster::{StopClusterFilter, StopClusterStatus, StopClusterTrigger};
pub use time::{TimeFilterStatus, TimeOfDayFilter};
pub use volatility::{VolatilityFilter, VolatilityStatus, VolatilityTrigger};

/// Inputs available to every filter for one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct FilterContext<'a> {
    pub symbol: &'a Symbol,
    pub snapshot: &'a WindowSnapshot,
    pub now: DateTime<Utc>,
}

/// Outcome of one filter evaluation. Every verdict carries exactly one reason.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FilterVerdict {
    pub allowed: bool,
    pub reason: Cow<'static, str>,
}

impl FilterVerdict {
    pub fn allow(reason: impl Into<Cow<'static, str>>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
        }
    }

    pub fn deny(reason: impl Into<Cow<'static, str>>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }

    pub fn disabled() -> Self {
        Self::allow("disabled")
    }
}

/// Closed set of acceptance filters sharing one evaluation shape.
#[derive(Debug, Clone, Copy)]
pub enum Filter<'a> {
    AggressionDecay(&'a AggressionDecayFilter),
    StopCluster(&'a StopClusterFilter),
    TimeOfDay(&'a TimeOfDayFilter),
    Volatility(&'a VolatilityFilter),
}

impl Filter<'_> {
    pub fn kind(&self) -> FilterKind {
        match self {
            Filter::AggressionDecay(_) => FilterKind::AggressionDecay,
            Filter::StopCluster(_) => FilterKind::StopCluster,
            Filter::TimeOfDay(_) => FilterKind::TimeOfDay,
            Filter::Volatility(_) => FilterKind::Volatility,
        }
    }

    pub fn evaluate(&self, context: &FilterContext<'_>) -> FilterVerdict {
        match self {
            Filter::AggressionDecay(filter) => filter.evaluate(context),
            Filter::StopCluster(filter) => filter.evaluate(context.now),
            Filter::TimeOfDay(filter) => filter.evaluate(context.now),
            Filter::Volatility(filter) => filter.evaluate(context.now),
        }
    }
}

/// Read-only view of every filter's pause state and counters.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FilterStackStatus {
    pub decay: DecayStatus,
    pub stop_cluster: StopClusterStatus,
    pub time: TimeFilterStatus,
    pub volatility: VolatilityStatus,
}

/// Owner of every filter's state.
#[derive(Debug)]
pub struct FilterStack {
    pub decay: AggressionDecayFilter,
    pub stop_cluster: StopClusterFilter,
    pub time: TimeOfDayFilter,
    pub volatility: VolatilityFilter,
}

impl FilterStack {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self {
            decay: AggressionDecayFilter::new(Arc::clone(&config)),
            stop_cluster: StopClusterFilter::new(Arc::clone(&config)),
            time: TimeOfDayFilter::new(Arc::clone(&config)),
            volatility: VolatilityFilter::new(config),
        }
    }

    /// Filters in evaluation order.
    pub fn ordered(&self) -> [Filter<'_>; 4] {
        [
            Filter::AggressionDecay(&self.decay),
            Filter::StopCluster(&self.stop_cluster),
            Filter::TimeOfDay(&self.time),
            Filter::Volatility(&self.volatility),
        ]
    }

    /// First denial in evaluation order, if any.
    pub fn first_denial(&self, context: &FilterContext<'_>) -> Option<(FilterKind, FilterVerdict)> {
        self.ordered().into_iter().find_map(|filter| {
            let verdict = filter.evaluate(context);
            (!verdict.allowed).then(|| (filter.kind(), verdict))
        })
    }

    pub fn status(&self, now: DateTime<Utc>) -> FilterStackStatus {
        FilterStackStatus {
            decay: self.decay.status(),
            stop_cluster: self.stop_cluster.status(now),
            time: self.time.status(now),
            volatility: self.volatility.status(now),
        }
    }
}

/// Format a pause deadline the way it is reported in denial reasons.
pub(crate) fn fmt_deadline(deadline: DateTime<Utc>) -> String {
    deadline.format("%H:%M UTC").to_string()
}
