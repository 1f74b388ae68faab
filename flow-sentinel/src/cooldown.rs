use crate::{
    config::ConfigStore,
    types::{Side, Symbol},
};
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// Refractory period per `(instrument, side)`.
///
/// Only the time of the last alert is stored. The deadline is derived from the live
/// `cooldown_minutes` on every check, so a changed cooldown applies to one already in progress.
/// Stale entries are never swept; they simply stop blocking.
#[derive(Debug)]
pub struct CooldownManager {
    config: Arc<ConfigStore>,
    last_alert: RwLock<FnvHashMap<(Symbol, Side), DateTime<Utc>>>,
}

impl CooldownManager {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self {
            config,
            last_alert: RwLock::new(FnvHashMap::default()),
        }
    }

    pub fn is_eligible(&self, symbol: &Symbol, side: Side, now: DateTime<Utc>) -> bool {
        self.next_eligible(symbol, side)
            .is_none_or(|deadline| now >= deadline)
    }

    /// Earliest time a new alert for the key may fire, if one was ever recorded.
    pub fn next_eligible(&self, symbol: &Symbol, side: Side) -> Option<DateTime<Utc>> {
        let last = *self.last_alert.read().get(&(symbol.clone(), side))?;
        let cooldown = self
            .config
            .instrument(symbol)
            .map(|instrument| instrument.cooldown())
            .unwrap_or_else(chrono::TimeDelta::zero);
        Some(last + cooldown)
    }

    pub fn record_alert(&self, symbol: &Symbol, side: Side, now: DateTime<Utc>) {
        self.last_alert.write().insert((symbol.clone(), side), now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::FilterConfig,
        error::ConfigError,
        filter::test_util::{noon, store},
        types::symbol,
    };
    use chrono::TimeDelta;

    #[test]
    fn test_cooldown_window() {
        let config = store(FilterConfig::default());
        config.set_instrument_param("XRPUSDT", "cooldown_minutes", "5").unwrap();
        let cooldown = CooldownManager::new(config);
        let symbol = symbol("XRPUSDT");
        let start = noon();

        assert!(cooldown.is_eligible(&symbol, Side::Buy, start));
        cooldown.record_alert(&symbol, Side::Buy, start);

        struct TestCase {
            offset: TimeDelta,
            side: Side,
            expected: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: at the alert time
                offset: TimeDelta::zero(),
                side: Side::Buy,
                expected: false,
            },
            TestCase {
                // TC1: just before expiry
                offset: TimeDelta::minutes(5) - TimeDelta::milliseconds(1),
                side: Side::Buy,
                expected: false,
            },
            TestCase {
                // TC2: exactly at expiry
                offset: TimeDelta::minutes(5),
                side: Side::Buy,
                expected: true,
            },
            TestCase {
                // TC3: opposite side is independent
                offset: TimeDelta::zero(),
                side: Side::Sell,
                expected: true,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = cooldown.is_eligible(&symbol, test.side, start + test.offset);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_cooldown_reads_live_config() {
        let config = store(FilterConfig::default());
        let cooldown = CooldownManager::new(Arc::clone(&config));
        let symbol = symbol("XRPUSDT");

        cooldown.record_alert(&symbol, Side::Sell, noon());
        let later = noon() + TimeDelta::minutes(6);
        assert!(!cooldown.is_eligible(&symbol, Side::Sell, later));

        config.set_instrument_param("XRPUSDT", "cooldown", "5").unwrap();
        assert!(cooldown.is_eligible(&symbol, Side::Sell, later));
    }

    #[test]
    fn test_cooldown_rejects_unbounded_minutes() {
        struct TestCase {
            value: &'static str,
            accepted: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: would overflow deadline arithmetic
                value: "1e12",
                accepted: false,
            },
            TestCase {
                // TC1: just above the bound
                value: "525600.5",
                accepted: false,
            },
            TestCase {
                // TC2: the bound itself
                value: "525600",
                accepted: true,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let config = store(FilterConfig::default());
            let cooldown = CooldownManager::new(Arc::clone(&config));
            let symbol = symbol("XRPUSDT");

            let result = config.set_instrument_param("XRPUSDT", "cooldown_minutes", test.value);
            assert_eq!(result.is_ok(), test.accepted, "TC{} failed", index);
            if !test.accepted {
                assert!(matches!(result, Err(ConfigError::OutOfRange { .. })), "TC{} failed", index);
                assert_eq!(config.instrument("XRPUSDT").unwrap().cooldown_minutes, 15.0);
            }

            cooldown.record_alert(&symbol, Side::Buy, noon());
            let expected_until = noon() + config.instrument("XRPUSDT").unwrap().cooldown();
            assert!(!cooldown.is_eligible(&symbol, Side::Buy, noon()), "TC{} failed", index);
            assert!(cooldown.is_eligible(&symbol, Side::Buy, expected_until), "TC{} failed", index);
        }
    }
}
