use std::time::Duration;

use distribution_core::config::RetryConfig;

/// 投递重试策略
///
/// 第 n 次失败后的等待时间为 `base * multiplier^(n-1)`，不超过 `max_delay_ms`，
/// 再叠加 `±jitter_factor` 比例的随机抖动。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// 已尝试 `attempts` 次后是否还能继续重试
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.config.max_attempts
    }

    /// 第 `attempts` 次失败后的退避时间
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let base = self.config.base_delay_ms as f64;
        let max = self.config.max_delay_ms as f64;
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;

        let exponential = base * self.config.backoff_multiplier.powi(exponent);
        let capped = exponential.min(max);

        let jitter = capped * self.config.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0;
        let final_delay = (capped + jitter).clamp(0.0, max);

        Duration::from_millis(final_delay as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
