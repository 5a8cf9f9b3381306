//! The resilience-stack / load-test configuration shape (spec §6
//! "Configuration"). This is the one YAML surface the core treats as
//! normative even though file loading, CLI merging, and env overlays are
//! out of scope (spec §1) — §6 gives the shape as interop-normative, and
//! §8 requires `from_yaml(to_yaml(c)) == c`. What's here is deliberately
//! narrow: parse/round-trip the shape and convert it into the resilience
//! stack's and load engine's own config types; anything fancier (profiles,
//! includes, secrets) is a CLI/config-loader concern this crate doesn't own.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{ErrorContext, VenomError, VenomResult};
use crate::load::LoadTestConfig;
use crate::resilience::circuit_breaker::{CircuitBreakerDefaults, CircuitBreakerRegistry};
use crate::resilience::retry::{BackoffStrategy, RetryConfig};

/// Top-level shape of the YAML block in spec §6.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenomConfig {
    pub retry: RetryYaml,
    #[serde(default)]
    pub circuit_breakers: HashMap<String, CircuitBreakerYaml>,
    pub load_test: LoadTestYaml,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryYaml {
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
    pub initial_delay: f64,
    pub max_delay: f64,
    #[serde(default)]
    pub retry_on: Vec<RetryOn>,
}

/// One entry of the `retry_on` list: either an HTTP status code or a named
/// error kind (`ConnectionError`, `Timeout`, ...). Untagged so both numeric
/// and string YAML scalars parse into the same list without a wrapper key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RetryOn {
    StatusCode(u16),
    ErrorKind(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerYaml {
    pub failure_threshold: u32,
    pub recovery_timeout: f64,
    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u32,
}

fn default_half_open_max_calls() -> u32 {
    3
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadTestYaml {
    #[serde(with = "duration_suffix")]
    pub duration: Duration,
    pub users: u32,
    #[serde(with = "duration_suffix", default)]
    pub ramp_up: Duration,
    #[serde(with = "duration_suffix", default)]
    pub ramp_down: Duration,
    #[serde(default)]
    pub think_time: Option<ThinkTimeRange>,
    #[serde(default)]
    pub requests_per_second: f64,
    #[serde(default)]
    pub warmup: Option<ThinkTimeRange>,
}

/// A `min-max` uniform-random range with a shared unit suffix, e.g.
/// `1-3s` (spec §6 `think_time: 1-3s`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ThinkTimeRange {
    pub min: Duration,
    pub max: Duration,
}

impl TryFrom<String> for ThinkTimeRange {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        let (number_part, suffix) = split_suffix(&raw)?;
        let (min_str, max_str) = number_part
            .split_once('-')
            .ok_or_else(|| format!("expected 'min-max{suffix}', got '{raw}'"))?;
        let min = parse_number(min_str, suffix)?;
        let max = parse_number(max_str, suffix)?;
        Ok(ThinkTimeRange { min, max })
    }
}

impl From<ThinkTimeRange> for String {
    fn from(range: ThinkTimeRange) -> String {
        format!(
            "{}-{}s",
            range.min.as_secs_f64(),
            range.max.as_secs_f64()
        )
    }
}

/// Parses the `ms`/`s`/`m`/`h`-suffixed duration strings spec §6 calls for
/// (`duration: 60s`, `ramp_up: 10s`), via a `serde(with = ...)` module so
/// plain `std::time::Duration` fields can use the wire format directly.
mod duration_suffix {
    use super::{parse_duration_string, Duration};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        format_duration(*value).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_duration_string(&raw).map_err(serde::de::Error::custom)
    }

    pub fn format_duration(d: Duration) -> String {
        let millis = d.as_millis();
        if millis % 1000 == 0 {
            format!("{}s", millis / 1000)
        } else {
            format!("{millis}ms")
        }
    }
}

fn split_suffix(raw: &str) -> Result<(&str, &str), String> {
    for suffix in ["ms", "s", "m", "h"] {
        if let Some(stripped) = raw.strip_suffix(suffix) {
            return Ok((stripped, suffix));
        }
    }
    Err(format!("duration '{raw}' has no recognised ms/s/m/h suffix"))
}

fn unit_seconds(suffix: &str) -> f64 {
    match suffix {
        "ms" => 0.001,
        "s" => 1.0,
        "m" => 60.0,
        "h" => 3600.0,
        _ => unreachable!("validated by split_suffix"),
    }
}

fn parse_number(part: &str, suffix: &str) -> Result<Duration, String> {
    let value: f64 = part
        .trim()
        .parse()
        .map_err(|_| format!("'{part}' is not a number"))?;
    Ok(Duration::from_secs_f64(value * unit_seconds(suffix)))
}

/// Parses a single suffixed duration string, e.g. `"500ms"`, `"10s"`,
/// `"2m"`, `"1h"`.
pub fn parse_duration_string(raw: &str) -> Result<Duration, String> {
    let (number_part, suffix) = split_suffix(raw.trim())?;
    parse_number(number_part, suffix)
}

impl VenomConfig {
    pub fn from_yaml(raw: &str) -> VenomResult<Self> {
        serde_yaml::from_str(raw).map_err(|e| VenomError::ConfigValidation {
            message: e.to_string(),
            context: ErrorContext::new(),
        })
    }

    pub fn to_yaml(&self) -> VenomResult<String> {
        serde_yaml::to_string(self).map_err(|e| VenomError::ConfigValidation {
            message: e.to_string(),
            context: ErrorContext::new(),
        })
    }

    /// Converts the `retry` block into the resilience stack's own
    /// [`RetryConfig`], splitting `retry_on` into its status-code and
    /// error-kind halves.
    pub fn retry_config(&self) -> RetryConfig {
        let mut status_codes = Vec::new();
        let mut exception_set = Vec::new();
        for entry in &self.retry.retry_on {
            match entry {
                RetryOn::StatusCode(code) => status_codes.push(*code),
                RetryOn::ErrorKind(kind) => exception_set.push(kind.clone()),
            }
        }

        RetryConfig {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_secs_f64(self.retry.initial_delay),
            max_delay: Duration::from_secs_f64(self.retry.max_delay),
            backoff_strategy: self.retry.backoff,
            exponential_base: 2.0,
            retryable_status_codes: status_codes,
            retryable_exception_set: exception_set,
        }
    }

    /// Builds a [`CircuitBreakerRegistry`] with every declared name
    /// pre-configured, defaulting to the `"default"` entry's parameters (or
    /// the registry's built-in defaults if none is declared).
    pub fn circuit_breaker_registry(&self) -> CircuitBreakerRegistry {
        let defaults = self
            .circuit_breakers
            .get("default")
            .map(|c| CircuitBreakerDefaults {
                failure_threshold: c.failure_threshold,
                recovery_timeout: Duration::from_secs_f64(c.recovery_timeout),
                half_open_max_calls: c.half_open_max_calls,
            })
            .unwrap_or_default();

        let mut registry = CircuitBreakerRegistry::new(defaults);
        for (name, cfg) in &self.circuit_breakers {
            if name == "default" {
                continue;
            }
            registry.declare(
                name.clone(),
                CircuitBreakerDefaults {
                    failure_threshold: cfg.failure_threshold,
                    recovery_timeout: Duration::from_secs_f64(cfg.recovery_timeout),
                    half_open_max_calls: cfg.half_open_max_calls,
                },
            );
        }
        registry
    }

    /// Converts the `load_test` block into the load engine's own
    /// [`LoadTestConfig`], defaulting unset think-time/warmup ranges to zero.
    pub fn load_test_config(&self) -> LoadTestConfig {
        let think = self.load_test.think_time.unwrap_or(ThinkTimeRange {
            min: Duration::ZERO,
            max: Duration::ZERO,
        });
        LoadTestConfig {
            duration: self.load_test.duration,
            concurrent_users: self.load_test.users,
            ramp_up: self.load_test.ramp_up,
            ramp_down: self.load_test.ramp_down,
            requests_per_second: self.load_test.requests_per_second,
            think_time_min: think.min,
            think_time_max: think.max,
            warmup: self.load_test.warmup.map(|w| w.max).unwrap_or(Duration::ZERO),
            ..LoadTestConfig::default()
        }
    }

    /// Validates cross-field invariants spec §4.6 calls out explicitly:
    /// non-positive durations, `think_max < think_min`, and
    /// `concurrent_users < 1` are all rejected before a load test runs.
    pub fn validate(&self) -> VenomResult<()> {
        if self.load_test.duration.is_zero() {
            return Err(VenomError::ConfigValidation {
                message: "load_test.duration must be positive".to_string(),
                context: ErrorContext::new(),
            });
        }
        if self.load_test.users < 1 {
            return Err(VenomError::ConfigValidation {
                message: "load_test.users must be at least 1".to_string(),
                context: ErrorContext::new(),
            });
        }
        if let Some(think) = self.load_test.think_time {
            if think.max < think.min {
                return Err(VenomError::ConfigValidation {
                    message: "load_test.think_time max is less than min".to_string(),
                    context: ErrorContext::new(),
                });
            }
        }
        if self.retry.max_attempts < 1 {
            return Err(VenomError::ConfigValidation {
                message: "retry.max_attempts must be at least 1".to_string(),
                context: ErrorContext::new(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_yaml() -> &'static str {
        r#"
retry:
  max_attempts: 3
  backoff: exponential_full_jitter
  initial_delay: 1.0
  max_delay: 60.0
  retry_on: [500, 502, 503, 504, ConnectionError, Timeout]
circuit_breakers:
  default:       { failure_threshold: 5, recovery_timeout: 30 }
  payment-api:   { failure_threshold: 2, recovery_timeout: 15 }
load_test:
  duration: 60s
  users: 10
  ramp_up: 10s
  think_time: 1-3s
"#
    }

    #[test]
    fn parses_the_spec_example_yaml() {
        let config = VenomConfig::from_yaml(sample_yaml()).unwrap();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.backoff, BackoffStrategy::ExponentialFullJitter);
        assert_eq!(config.retry.retry_on.len(), 6);
        assert_eq!(config.circuit_breakers.len(), 2);
        assert_eq!(config.load_test.duration, Duration::from_secs(60));
        assert_eq!(config.load_test.users, 10);
        assert_eq!(
            config.load_test.think_time,
            Some(ThinkTimeRange { min: Duration::from_secs(1), max: Duration::from_secs(3) })
        );
    }

    #[test]
    fn round_trips_through_yaml() {
        let config = VenomConfig::from_yaml(sample_yaml()).unwrap();
        let rendered = config.to_yaml().unwrap();
        let reparsed = VenomConfig::from_yaml(&rendered).unwrap();
        assert_eq!(config, reparsed);
    }

    #[test]
    fn retry_on_splits_into_status_codes_and_exception_names() {
        let config = VenomConfig::from_yaml(sample_yaml()).unwrap();
        let retry_config = config.retry_config();
        assert_eq!(retry_config.retryable_status_codes, vec![500, 502, 503, 504]);
        assert_eq!(
            retry_config.retryable_exception_set,
            vec!["ConnectionError".to_string(), "Timeout".to_string()]
        );
    }

    #[test]
    fn circuit_breaker_registry_uses_default_as_fallback() {
        let config = VenomConfig::from_yaml(sample_yaml()).unwrap();
        let registry = config.circuit_breaker_registry();
        // "default" name itself is never declared under its own key, so
        // looking it up falls back to the registry's baked-in defaults
        // only when the YAML has no "default" entry. Here it does.
        assert!(!config.circuit_breakers.contains_key("unused-name"));
        drop(registry);
    }

    #[test]
    fn rejects_zero_duration() {
        let mut config = VenomConfig::from_yaml(sample_yaml()).unwrap();
        config.load_test.duration = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_fewer_than_one_user() {
        let mut config = VenomConfig::from_yaml(sample_yaml()).unwrap();
        config.load_test.users = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_think_time_max_below_min() {
        let mut config = VenomConfig::from_yaml(sample_yaml()).unwrap();
        config.load_test.think_time = Some(ThinkTimeRange {
            min: Duration::from_secs(3),
            max: Duration::from_secs(1),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn duration_suffix_accepts_ms_s_m_h() {
        assert_eq!(parse_duration_string("500ms"), Ok(Duration::from_millis(500)));
        assert_eq!(parse_duration_string("10s"), Ok(Duration::from_secs(10)));
        assert_eq!(parse_duration_string("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration_string("1h"), Ok(Duration::from_secs(3600)));
    }
}
