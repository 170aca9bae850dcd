use crate::credential::{Credential, Tier};
use crate::model::ModelClass;

/// A credential pulled from rotation for one model class.
#[derive(Debug, Clone)]
pub struct CooldownRecord {
    pub credential: Credential,
    pub class: ModelClass,
    /// Epoch milliseconds.
    pub retired_at: i64,
    pub tier: Tier,
}

impl CooldownRecord {
    pub fn is_due(&self, now_ms: i64, window_ms: i64) -> bool {
        now_ms.saturating_sub(self.retired_at) >= window_ms
    }
}
