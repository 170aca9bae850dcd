use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum GlobalConfigError {
    #[error("missing required global config field: {0}")]
    MissingField(&'static str),
    #[error("invalid global config field {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

/// Final, merged global configuration used by the running process.
///
/// Merge order: CLI flag > environment > built-in default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub host: String,
    pub port: u16,
    /// Bearer key callers must present.
    pub api_key: String,
    /// Normal-tier session tokens loaded at startup.
    pub sso: Vec<String>,
    /// Heavy-tier session tokens loaded at startup.
    pub sso_heavy: Vec<String>,
    /// Callers supply their own upstream credential; the pool is bypassed.
    pub custom_sso: bool,
    pub temporary: bool,
    pub base_url: String,
    pub assets_url: String,
    /// Optional outbound proxy (for upstream egress).
    pub proxy: Option<String>,
    pub cf_clearance: Option<String>,
    pub picgo_key: Option<String>,
    pub tumy_key: Option<String>,
    pub data_dir: String,
    pub show_thinking: bool,
    pub show_search_results: bool,
    pub manager_password: Option<String>,
    pub max_attempts: u32,
    pub sweep_interval_secs: u64,
    pub keepalive_secs: u64,
}

/// Optional layer used for merging global config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub api_key: Option<String>,
    pub sso: Option<String>,
    pub sso_heavy: Option<String>,
    pub custom_sso: Option<bool>,
    pub temporary: Option<bool>,
    pub base_url: Option<String>,
    pub assets_url: Option<String>,
    pub proxy: Option<String>,
    pub cf_clearance: Option<String>,
    pub picgo_key: Option<String>,
    pub tumy_key: Option<String>,
    pub data_dir: Option<String>,
    pub show_thinking: Option<bool>,
    pub show_search_results: Option<bool>,
    pub manager_password: Option<String>,
    pub max_attempts: Option<u32>,
    pub sweep_interval_secs: Option<u64>,
    pub keepalive_secs: Option<u64>,
}

macro_rules! overlay_fields {
    ($self:ident, $other:ident, $($field:ident),+ $(,)?) => {
        $(
            if $other.$field.is_some() {
                $self.$field = $other.$field;
            }
        )+
    };
}

impl GlobalConfigPatch {
    pub fn overlay(&mut self, other: GlobalConfigPatch) {
        overlay_fields!(
            self,
            other,
            host,
            port,
            api_key,
            sso,
            sso_heavy,
            custom_sso,
            temporary,
            base_url,
            assets_url,
            proxy,
            cf_clearance,
            picgo_key,
            tumy_key,
            data_dir,
            show_thinking,
            show_search_results,
            manager_password,
            max_attempts,
            sweep_interval_secs,
            keepalive_secs,
        );
    }

    pub fn into_config(self) -> Result<GlobalConfig, GlobalConfigError> {
        let max_attempts = self.max_attempts.unwrap_or(5);
        if max_attempts == 0 {
            return Err(GlobalConfigError::Invalid {
                field: "max_attempts",
                message: "must be at least 1".to_string(),
            });
        }
        let keepalive_secs = self.keepalive_secs.unwrap_or(15);
        if keepalive_secs == 0 {
            return Err(GlobalConfigError::Invalid {
                field: "keepalive_secs",
                message: "must be at least 1".to_string(),
            });
        }
        let api_key = non_empty(self.api_key).ok_or(GlobalConfigError::MissingField("api_key"))?;
        Ok(GlobalConfig {
            host: non_empty(self.host).unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(5200),
            api_key,
            sso: split_tokens(self.sso.as_deref()),
            sso_heavy: split_tokens(self.sso_heavy.as_deref()),
            custom_sso: self.custom_sso.unwrap_or(false),
            temporary: self.temporary.unwrap_or(true),
            base_url: trim_origin(self.base_url, "https://grok.com"),
            assets_url: trim_origin(self.assets_url, "https://assets.grok.com"),
            proxy: non_empty(self.proxy),
            cf_clearance: non_empty(self.cf_clearance),
            picgo_key: non_empty(self.picgo_key),
            tumy_key: non_empty(self.tumy_key),
            data_dir: non_empty(self.data_dir).unwrap_or_else(|| "./data".to_string()),
            show_thinking: self.show_thinking.unwrap_or(false),
            show_search_results: self.show_search_results.unwrap_or(true),
            manager_password: non_empty(self.manager_password),
            max_attempts,
            sweep_interval_secs: self.sweep_interval_secs.unwrap_or(3600).max(1),
            keepalive_secs,
        })
    }
}

impl GlobalConfig {
    /// True when generated images can be published to an external host.
    pub fn has_image_host(&self) -> bool {
        self.picgo_key.is_some() || self.tumy_key.is_some()
    }

    /// Copy of the config with secrets masked, suitable for logging.
    pub fn redacted(&self) -> GlobalConfig {
        let mask = |value: &Option<String>| value.as_ref().map(|_| "***".to_string());
        GlobalConfig {
            api_key: "***".to_string(),
            sso: self.sso.iter().map(|_| "***".to_string()).collect(),
            sso_heavy: self.sso_heavy.iter().map(|_| "***".to_string()).collect(),
            cf_clearance: mask(&self.cf_clearance),
            picgo_key: mask(&self.picgo_key),
            tumy_key: mask(&self.tumy_key),
            manager_password: mask(&self.manager_password),
            ..self.clone()
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
}

fn trim_origin(value: Option<String>, default: &str) -> String {
    non_empty(value)
        .map(|item| item.trim_end_matches('/').to_string())
        .unwrap_or_else(|| default.to_string())
}

fn split_tokens(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
