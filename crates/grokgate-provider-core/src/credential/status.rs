use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Durable per-(session key, model class) usage record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenStatus {
    pub is_valid: bool,
    /// Epoch milliseconds of the last invalidation.
    pub invalidated_time: Option<i64>,
    pub total_request_count: u64,
}

impl Default for TokenStatus {
    fn default() -> Self {
        Self {
            is_valid: true,
            invalidated_time: None,
            total_request_count: 0,
        }
    }
}

impl TokenStatus {
    pub(crate) fn reset(&mut self) {
        *self = TokenStatus::default();
    }

    pub(crate) fn invalidate(&mut self, now_ms: i64) {
        self.is_valid = false;
        self.invalidated_time = Some(now_ms);
    }
}

/// session key -> model class -> status
pub type StatusMap = BTreeMap<String, BTreeMap<String, TokenStatus>>;
