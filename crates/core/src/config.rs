//! Tunable queue parameters and the retry policy derived from them.

use core::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::error::{DomainError, DomainResult};

/// Persisted queue configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Attempts allowed before a job is dead-lettered.
    pub max_retries: u32,
    /// Base of the exponential backoff (`backoff_base ^ retries` time units).
    #[serde(serialize_with = "serialize_number")]
    pub backoff_base: f64,
    /// Failure probability used by the simulated executor.
    #[serde(serialize_with = "serialize_number")]
    pub failure_rate: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: 2.0,
            failure_rate: 0.0,
        }
    }
}

/// Keys of the configuration schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    MaxRetries,
    BackoffBase,
    FailureRate,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 3] = [
        ConfigKey::MaxRetries,
        ConfigKey::BackoffBase,
        ConfigKey::FailureRate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKey::MaxRetries => "max_retries",
            ConfigKey::BackoffBase => "backoff_base",
            ConfigKey::FailureRate => "failure_rate",
        }
    }

    fn available() -> String {
        Self::ALL
            .iter()
            .map(ConfigKey::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl core::fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigKey {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| DomainError::UnknownConfigKey {
                key: s.to_string(),
                available: Self::available(),
            })
    }
}

impl Config {
    /// Read a value by key name.
    pub fn get(&self, key: &str) -> DomainResult<Value> {
        let value = match key.parse::<ConfigKey>()? {
            ConfigKey::MaxRetries => Value::from(self.max_retries),
            ConfigKey::BackoffBase => number_value(self.backoff_base),
            ConfigKey::FailureRate => number_value(self.failure_rate),
        };
        Ok(value)
    }

    /// Set a value by key name from its textual form.
    ///
    /// The text is coerced to a number (float if it contains `.`, integer
    /// otherwise) and range-checked. On error `self` is left untouched.
    pub fn set(&mut self, key: &str, raw: &str) -> DomainResult<()> {
        let key = key.parse::<ConfigKey>()?;
        let number = coerce_number(raw)
            .ok_or_else(|| DomainError::invalid_value(key.as_str(), raw, "not a number"))?;

        match key {
            ConfigKey::MaxRetries => {
                let n = number
                    .as_u64()
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| {
                        DomainError::invalid_value(key.as_str(), raw, "must be a non-negative integer")
                    })?;
                self.max_retries = n;
            }
            ConfigKey::BackoffBase => {
                let base = number.as_f64().unwrap_or(f64::NAN);
                if !(base >= 1.0) {
                    return Err(DomainError::invalid_value(key.as_str(), raw, "must be at least 1"));
                }
                self.backoff_base = base;
            }
            ConfigKey::FailureRate => {
                let rate = number.as_f64().unwrap_or(f64::NAN);
                if !(0.0..=1.0).contains(&rate) {
                    return Err(DomainError::invalid_value(
                        key.as_str(),
                        raw,
                        "must be between 0 and 1",
                    ));
                }
                self.failure_rate = rate;
            }
        }
        Ok(())
    }

    /// Every key with its current value, in schema order.
    pub fn entries(&self) -> Vec<(ConfigKey, Value)> {
        ConfigKey::ALL
            .into_iter()
            .filter_map(|k| self.get(k.as_str()).ok().map(|v| (k, v)))
            .collect()
    }

    /// Whether the values are inside their documented ranges.
    pub fn is_valid(&self) -> bool {
        self.backoff_base >= 1.0 && (0.0..=1.0).contains(&self.failure_rate)
    }

    pub fn retry_policy(&self, unit: Duration, max_delay: Duration) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_base: self.backoff_base,
            unit,
            max_delay,
        }
    }
}

fn coerce_number(raw: &str) -> Option<Value> {
    let raw = raw.trim();
    if !raw.contains('.') {
        if let Ok(n) = raw.parse::<u64>() {
            return Some(Value::from(n));
        }
        if let Ok(n) = raw.parse::<i64>() {
            return Some(Value::from(n));
        }
    }
    raw.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(Value::from)
}

/// Render integral floats as integers so `3` reads back as `3`.
fn number_value(x: f64) -> Value {
    if x.fract() == 0.0 && x.abs() < 9_007_199_254_740_992.0 {
        Value::from(x as i64)
    } else {
        Value::from(x)
    }
}

fn serialize_number<S: Serializer>(x: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    number_value(*x).serialize(serializer)
}

/// Retry/backoff policy applied by workers.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts allowed before dead-lettering
    pub max_retries: u32,
    /// Base of the exponential curve
    pub backoff_base: f64,
    /// Length of one backoff time unit
    pub unit: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Config::default().retry_policy(Duration::from_secs(1), Duration::from_secs(3600))
    }
}

impl RetryPolicy {
    /// Whether a job that has failed `retries` times goes back to pending.
    pub fn should_retry(&self, retries: u32) -> bool {
        retries < self.max_retries
    }

    /// Delay before a job that has failed `retries` times is requeued.
    pub fn delay_for_retry(&self, retries: u32) -> Duration {
        let exp = i32::try_from(retries).unwrap_or(i32::MAX);
        let nanos = self.unit.as_nanos() as f64 * self.backoff_base.powi(exp);
        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        Duration::from_nanos(nanos.max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.get("backoff_base").unwrap(), json!(2));
        assert_eq!(config.get("failure_rate").unwrap(), json!(0));
    }

    #[test]
    fn set_then_get_round_trips_integers() {
        let mut config = Config::default();
        config.set("backoff_base", "3").unwrap();
        assert_eq!(config.get("backoff_base").unwrap(), json!(3));

        config.set("failure_rate", "0.25").unwrap();
        assert_eq!(config.get("failure_rate").unwrap(), json!(0.25));
    }

    #[test]
    fn unknown_key_is_rejected_without_change() {
        let mut config = Config::default();
        let err = config.set("unknown_key", "x").unwrap_err();

        assert!(matches!(err, DomainError::UnknownConfigKey { .. }));
        assert_eq!(config, Config::default());
        assert!(config.get("unknown_key").is_err());
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let mut config = Config::default();
        for (key, raw) in [
            ("max_retries", "-1"),
            ("max_retries", "2.5"),
            ("max_retries", "many"),
            ("backoff_base", "0.5"),
            ("failure_rate", "1.5"),
            ("failure_rate", "NaN"),
        ] {
            assert!(
                matches!(config.set(key, raw), Err(DomainError::InvalidConfigValue { .. })),
                "accepted {key}={raw}"
            );
        }
        assert_eq!(config, Config::default());
    }

    #[test]
    fn serializes_integral_floats_as_integers() {
        let written = serde_json::to_string(&Config::default()).unwrap();
        assert_eq!(written, r#"{"max_retries":3,"backoff_base":2,"failure_rate":0}"#);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: Config = serde_json::from_str(r#"{"max_retries":5}"#).unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.backoff_base, 2.0);
    }

    #[test]
    fn exponential_backoff_calculates_correctly() {
        let policy = RetryPolicy {
            max_retries: 5,
            backoff_base: 2.0,
            unit: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        };

        assert_eq!(policy.delay_for_retry(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_retry(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_retry(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for_retry(10), Duration::from_secs(10));
        assert_eq!(policy.delay_for_retry(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn should_retry_respects_max_retries() {
        let policy = RetryPolicy {
            max_retries: 3,
            ..Default::default()
        };

        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }

    proptest! {
        /// Property: the backoff curve never decreases and never exceeds its cap.
        #[test]
        fn backoff_is_monotonic_and_capped(
            base in 1.0f64..10.0,
            unit_ms in 1u64..5_000,
            retries in 0u32..64,
        ) {
            let policy = RetryPolicy {
                max_retries: 64,
                backoff_base: base,
                unit: Duration::from_millis(unit_ms),
                max_delay: Duration::from_secs(60),
            };
            let now = policy.delay_for_retry(retries);
            let next = policy.delay_for_retry(retries + 1);

            prop_assert!(now <= next);
            prop_assert!(next <= policy.max_delay);
        }

        /// Property: any non-negative integer text is accepted for max_retries.
        #[test]
        fn max_retries_accepts_any_u32(n in any::<u32>()) {
            let mut config = Config::default();
            config.set("max_retries", &n.to_string()).unwrap();
            prop_assert_eq!(config.get("max_retries").unwrap(), json!(n));
        }
    }
}
