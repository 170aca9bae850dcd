mod cooldown;
mod pool;
mod status;

pub use cooldown::CooldownRecord;
pub use pool::{CredentialPool, PoolOptions};
pub use status::{StatusMap, TokenStatus};

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Upstream session credential: the cookie string sent upstream and the
/// stable session key extracted from it.
#[derive(Clone)]
pub struct Credential {
    cookie: Arc<str>,
    session_key: Arc<str>,
}

impl Credential {
    /// Builds the cookie pair the upstream expects from a bare session token.
    pub fn from_sso(sso: &str) -> Self {
        let sso = sso.trim();
        Self {
            cookie: Arc::from(format!("sso-rw={sso};sso={sso}")),
            session_key: Arc::from(sso),
        }
    }

    /// Accepts either a bare session token or a full cookie string carrying `sso=`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if raw.contains("sso=") {
            let key = extract_session_key(raw)?;
            return Some(Self {
                cookie: Arc::from(raw),
                session_key: Arc::from(key),
            });
        }
        Some(Self::from_sso(raw))
    }

    pub fn cookie(&self) -> &str {
        &self.cookie
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    /// Short form safe to put in logs.
    pub fn key_prefix(&self) -> &str {
        let end = self
            .session_key
            .char_indices()
            .nth(8)
            .map(|(idx, _)| idx)
            .unwrap_or(self.session_key.len());
        &self.session_key[..end]
    }
}

fn extract_session_key(cookie: &str) -> Option<&str> {
    let start = cookie.find("sso=")? + "sso=".len();
    let rest = &cookie[start..];
    let value = rest.split(';').next().unwrap_or(rest).trim();
    if value.is_empty() { None } else { Some(value) }
}

impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        self.session_key == other.session_key
    }
}

impl Eq for Credential {}

impl Hash for Credential {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.session_key.hash(state);
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("session_key", &format_args!("{}…", self.key_prefix()))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Normal,
    Heavy,
}

impl Tier {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "normal" | "" => Some(Tier::Normal),
            "heavy" | "super" => Some(Tier::Heavy),
            _ => None,
        }
    }
}
