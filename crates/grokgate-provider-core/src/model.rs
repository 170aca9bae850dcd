use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Normalized model identifier that owns one quota bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ModelClass {
    #[serde(rename = "grok-3")]
    Grok3,
    #[serde(rename = "grok-3-deepsearch")]
    Grok3DeepSearch,
    #[serde(rename = "grok-3-deepersearch")]
    Grok3DeeperSearch,
    #[serde(rename = "grok-3-reasoning")]
    Grok3Reasoning,
    #[serde(rename = "grok-4")]
    Grok4,
    #[serde(rename = "grok-4-heavy")]
    Grok4Heavy,
}

impl ModelClass {
    pub const ALL: [ModelClass; 6] = [
        ModelClass::Grok3,
        ModelClass::Grok3DeepSearch,
        ModelClass::Grok3DeeperSearch,
        ModelClass::Grok3Reasoning,
        ModelClass::Grok4,
        ModelClass::Grok4Heavy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelClass::Grok3 => "grok-3",
            ModelClass::Grok3DeepSearch => "grok-3-deepsearch",
            ModelClass::Grok3DeeperSearch => "grok-3-deepersearch",
            ModelClass::Grok3Reasoning => "grok-3-reasoning",
            ModelClass::Grok4 => "grok-4",
            ModelClass::Grok4Heavy => "grok-4-heavy",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|class| class.as_str() == value)
    }

    /// Agent classes run multi-step tool use and stream intermediate events.
    pub fn is_agent(&self) -> bool {
        matches!(
            self,
            ModelClass::Grok4
                | ModelClass::Grok4Heavy
                | ModelClass::Grok3DeepSearch
                | ModelClass::Grok3DeeperSearch
        )
    }
}

impl fmt::Display for ModelClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownModelClass(pub String);

impl fmt::Display for UnknownModelClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown model class: {}", self.0)
    }
}

impl std::error::Error for UnknownModelClass {}

impl FromStr for ModelClass {
    type Err = UnknownModelClass;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| UnknownModelClass(s.to_string()))
    }
}
