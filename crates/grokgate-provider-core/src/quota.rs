use std::collections::BTreeMap;
use std::time::Duration;

use crate::credential::Tier;
use crate::model::ModelClass;

const HOUR: u64 = 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelQuota {
    /// Requests allowed per window before the credential is retired.
    pub ceiling: u32,
    pub window: Duration,
}

impl ModelQuota {
    pub const fn new(ceiling: u32, window_secs: u64) -> Self {
        Self {
            ceiling,
            window: Duration::from_secs(window_secs),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QuotaError {
    #[error("unknown model class in quota table: {0}")]
    UnknownClass(String),
    #[error("quota ceiling for {0} must be positive")]
    ZeroCeiling(String),
}

/// Per-tier quota lookup keyed by model class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaTable {
    normal: BTreeMap<ModelClass, ModelQuota>,
    heavy: BTreeMap<ModelClass, ModelQuota>,
}

impl QuotaTable {
    /// Builds a table from `(tier, class name, quota)` rows.
    pub fn from_rows<'a>(
        rows: impl IntoIterator<Item = (Tier, &'a str, ModelQuota)>,
    ) -> Result<Self, QuotaError> {
        let mut normal = BTreeMap::new();
        let mut heavy = BTreeMap::new();
        for (tier, name, quota) in rows {
            let class =
                ModelClass::parse(name).ok_or_else(|| QuotaError::UnknownClass(name.to_string()))?;
            if quota.ceiling == 0 {
                return Err(QuotaError::ZeroCeiling(name.to_string()));
            }
            match tier {
                Tier::Normal => normal.insert(class, quota),
                Tier::Heavy => heavy.insert(class, quota),
            };
        }
        Ok(Self { normal, heavy })
    }

    pub fn get(&self, tier: Tier, class: ModelClass) -> Option<ModelQuota> {
        self.table(tier).get(&class).copied()
    }

    pub fn classes(&self, tier: Tier) -> impl Iterator<Item = ModelClass> + '_ {
        self.table(tier).keys().copied()
    }

    fn table(&self, tier: Tier) -> &BTreeMap<ModelClass, ModelQuota> {
        match tier {
            Tier::Normal => &self.normal,
            Tier::Heavy => &self.heavy,
        }
    }
}

impl Default for QuotaTable {
    fn default() -> Self {
        let rows = [
            (Tier::Normal, "grok-3", ModelQuota::new(100, 2 * HOUR)),
            (Tier::Normal, "grok-3-deepsearch", ModelQuota::new(30, 24 * HOUR)),
            (Tier::Normal, "grok-3-deepersearch", ModelQuota::new(30, 24 * HOUR)),
            (Tier::Normal, "grok-3-reasoning", ModelQuota::new(30, 24 * HOUR)),
            (Tier::Normal, "grok-4", ModelQuota::new(20, 2 * HOUR)),
            (Tier::Heavy, "grok-3", ModelQuota::new(100, 2 * HOUR)),
            (Tier::Heavy, "grok-3-deepsearch", ModelQuota::new(30, 24 * HOUR)),
            (Tier::Heavy, "grok-3-deepersearch", ModelQuota::new(30, 24 * HOUR)),
            (Tier::Heavy, "grok-3-reasoning", ModelQuota::new(30, 24 * HOUR)),
            (Tier::Heavy, "grok-4", ModelQuota::new(40, 2 * HOUR)),
            (Tier::Heavy, "grok-4-heavy", ModelQuota::new(20, 2 * HOUR)),
        ];
        let mut normal = BTreeMap::new();
        let mut heavy = BTreeMap::new();
        for (tier, name, quota) in rows {
            let Some(class) = ModelClass::parse(name) else {
                continue;
            };
            match tier {
                Tier::Normal => normal.insert(class, quota),
                Tier::Heavy => heavy.insert(class, quota),
            };
        }
        Self { normal, heavy }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_class_at_construction() {
        let err = QuotaTable::from_rows([(Tier::Normal, "grok-9", ModelQuota::new(1, 60))])
            .unwrap_err();
        assert_eq!(err, QuotaError::UnknownClass("grok-9".to_string()));
    }

    #[test]
    fn default_tables_differ_by_tier() {
        let table = QuotaTable::default();
        assert_eq!(table.get(Tier::Normal, ModelClass::Grok4).unwrap().ceiling, 20);
        assert_eq!(table.get(Tier::Heavy, ModelClass::Grok4).unwrap().ceiling, 40);
        assert!(table.get(Tier::Normal, ModelClass::Grok4Heavy).is_none());
        assert_eq!(
            table.get(Tier::Normal, ModelClass::Grok3Reasoning).unwrap().window,
            Duration::from_secs(24 * HOUR)
        );
        assert_eq!(table.classes(Tier::Heavy).count(), 6);
    }
}
