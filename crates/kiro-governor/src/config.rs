//! Governor configuration: which strategies are on, and their thresholds.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    pub auto_truncate: bool,
    pub pre_estimate: bool,
    pub smart_summary: bool,
    pub error_retry: bool,
    pub truncate_threshold_tokens: u64,
    pub pre_estimate_threshold_tokens: u64,
    pub error_retry_threshold_tokens: u64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            auto_truncate: false,
            pre_estimate: false,
            smart_summary: false,
            error_retry: true,
            truncate_threshold_tokens: 180_000,
            pre_estimate_threshold_tokens: 150_000,
            error_retry_threshold_tokens: 100_000,
        }
    }
}
