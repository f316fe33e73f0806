// src/resilience/backoff.rs

use crate::config::ResilienceConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Priority class of a store call. Scales the backoff between retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    pub fn factor(&self) -> f64 {
        match self {
            Priority::High => 0.5,
            Priority::Normal => 1.0,
            Priority::Low => 2.0,
        }
    }
}

/// Delay before retry number `retry` (0-based): doubling from the base,
/// capped, scaled by priority, plus up to `jitter` of itself.
/// `jitter_sample` is expected in `[0, 1)`.
pub fn backoff_delay(
    config: &ResilienceConfig,
    retry: u32,
    priority: Priority,
    jitter_sample: f64,
) -> Duration {
    let exponential = config.base_backoff_ms as f64 * 2f64.powi(retry.min(30) as i32);
    let capped = exponential.min(config.max_backoff_ms as f64);
    let scaled = capped * priority.factor();
    let jitter = scaled * config.jitter * jitter_sample.clamp(0.0, 1.0);
    Duration::from_millis((scaled + jitter).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ResilienceConfig {
        ResilienceConfig {
            base_backoff_ms: 100,
            max_backoff_ms: 1000,
            jitter: 0.25,
            ..ResilienceConfig::default()
        }
    }

    #[test]
    fn test_exponential_growth_and_cap() {
        let c = config();
        assert_eq!(backoff_delay(&c, 0, Priority::Normal, 0.0), Duration::from_millis(100));
        assert_eq!(backoff_delay(&c, 1, Priority::Normal, 0.0), Duration::from_millis(200));
        assert_eq!(backoff_delay(&c, 3, Priority::Normal, 0.0), Duration::from_millis(800));
        assert_eq!(backoff_delay(&c, 10, Priority::Normal, 0.0), Duration::from_millis(1000));
    }

    #[test]
    fn test_priority_scaling() {
        let c = config();
        let high = backoff_delay(&c, 1, Priority::High, 0.0);
        let normal = backoff_delay(&c, 1, Priority::Normal, 0.0);
        let low = backoff_delay(&c, 1, Priority::Low, 0.0);
        assert!(high < normal && normal < low);
        assert_eq!(low, Duration::from_millis(400));
    }

    #[test]
    fn test_jitter_bounded() {
        let c = config();
        let max = backoff_delay(&c, 0, Priority::Normal, 0.999);
        assert!(max >= Duration::from_millis(100));
        assert!(max <= Duration::from_millis(125));
    }
}
