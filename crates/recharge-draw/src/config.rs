//! Engine configuration, fixed at construction.

use std::time::Duration;

use recharge_notify::MessageTemplate;
use recharge_types::{DrawType, Prize, DEFAULT_DAILY_LOOKBACK_SECS, DEFAULT_SATURDAY_LOOKBACK_SECS};
use serde::{Deserialize, Serialize};

/// Draw engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Country code prefixed to national-format numbers.
    #[serde(default = "default_country_code")]
    pub default_country_code: String,
    /// Offset of the promotion's calendar day from UTC.
    #[serde(default)]
    pub utc_offset_secs: i32,
    #[serde(default = "default_daily_lookback")]
    pub daily_lookback_secs: u64,
    #[serde(default = "default_saturday_lookback")]
    pub saturday_lookback_secs: u64,
    #[serde(default = "default_daily_prizes")]
    pub daily_prizes: Vec<Prize>,
    #[serde(default = "default_saturday_prizes")]
    pub saturday_prizes: Vec<Prize>,
    /// Fixed part of the per-execution deadline.
    #[serde(default = "default_base_deadline_ms")]
    pub execution_base_deadline_ms: u64,
    /// Deadline added per candidate in the pool.
    #[serde(default = "default_per_candidate_us")]
    pub execution_per_candidate_us: u64,
    /// Optimistic retries for a subscriber's point update.
    #[serde(default = "default_points_retries")]
    pub points_update_retries: u32,
    #[serde(default)]
    pub winner_template: MessageTemplate,
}

fn default_country_code() -> String {
    "234".to_string()
}

fn default_daily_lookback() -> u64 {
    DEFAULT_DAILY_LOOKBACK_SECS
}

fn default_saturday_lookback() -> u64 {
    DEFAULT_SATURDAY_LOOKBACK_SECS
}

fn prize(rank: u32, name: &str, amount: u64, quantity: u32) -> Prize {
    Prize {
        rank,
        name: name.to_string(),
        amount,
        quantity,
    }
}

fn default_daily_prizes() -> Vec<Prize> {
    vec![
        prize(1, "Daily Jackpot", 1_000_000, 1),
        prize(2, "Consolation", 100_000, 5),
    ]
}

fn default_saturday_prizes() -> Vec<Prize> {
    vec![
        prize(1, "Weekly Jackpot", 10_000_000, 1),
        prize(2, "Runner-up", 1_000_000, 3),
        prize(3, "Consolation", 200_000, 10),
    ]
}

fn default_base_deadline_ms() -> u64 {
    30_000
}

fn default_per_candidate_us() -> u64 {
    100
}

fn default_points_retries() -> u32 {
    5
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_country_code: default_country_code(),
            utc_offset_secs: 0,
            daily_lookback_secs: default_daily_lookback(),
            saturday_lookback_secs: default_saturday_lookback(),
            daily_prizes: default_daily_prizes(),
            saturday_prizes: default_saturday_prizes(),
            execution_base_deadline_ms: default_base_deadline_ms(),
            execution_per_candidate_us: default_per_candidate_us(),
            points_update_retries: default_points_retries(),
            winner_template: MessageTemplate::default(),
        }
    }
}

impl EngineConfig {
    /// Default lookback for a draw type.
    pub fn lookback_for(&self, draw_type: DrawType) -> u64 {
        match draw_type {
            DrawType::Daily => self.daily_lookback_secs,
            DrawType::Saturday => self.saturday_lookback_secs,
        }
    }

    /// Default prize table for a draw type.
    pub fn prizes_for(&self, draw_type: DrawType) -> &[Prize] {
        match draw_type {
            DrawType::Daily => &self.daily_prizes,
            DrawType::Saturday => &self.saturday_prizes,
        }
    }

    /// Execution deadline for a pool of `candidates`.
    pub fn deadline_for(&self, candidates: usize) -> Duration {
        Duration::from_millis(self.execution_base_deadline_ms)
            + Duration::from_micros(
                self.execution_per_candidate_us
                    .saturating_mul(candidates as u64),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recharge_types::draw::validate_prize_structure;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        validate_prize_structure(&config.daily_prizes).expect("daily");
        validate_prize_structure(&config.saturday_prizes).expect("saturday");
        assert_eq!(config.lookback_for(DrawType::Daily), 86_400);
        assert_eq!(config.lookback_for(DrawType::Saturday), 7 * 86_400);
    }

    #[test]
    fn test_deadline_scales_with_pool() {
        let config = EngineConfig::default();
        assert_eq!(config.deadline_for(0), Duration::from_secs(30));
        assert_eq!(
            config.deadline_for(10_000),
            Duration::from_secs(30) + Duration::from_secs(1)
        );
    }
}
