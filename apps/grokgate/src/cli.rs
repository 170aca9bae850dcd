use clap::Parser;
use clap::builder::BoolishValueParser;

use grokgate_common::GlobalConfigPatch;

/// Command line and environment configuration. A flag wins over its
/// environment variable; unset values fall back to built-in defaults.
#[derive(Debug, Parser)]
#[command(name = "grokgate", version, about)]
pub(crate) struct Cli {
    #[arg(long, env = "HOST")]
    pub(crate) host: Option<String>,
    #[arg(long, env = "PORT")]
    pub(crate) port: Option<u16>,
    #[arg(long, env = "API_KEY", default_value = "sk-123456")]
    pub(crate) api_key: String,
    /// Comma-separated normal-tier session tokens.
    #[arg(long, env = "SSO")]
    pub(crate) sso: Option<String>,
    /// Comma-separated heavy-tier session tokens.
    #[arg(long, env = "SSO_HEAVY")]
    pub(crate) sso_heavy: Option<String>,
    #[arg(long, env = "IS_CUSTOM_SSO", value_parser = BoolishValueParser::new())]
    pub(crate) custom_sso: Option<bool>,
    #[arg(long, env = "IS_TEMP_CONVERSATION", value_parser = BoolishValueParser::new())]
    pub(crate) temporary: Option<bool>,
    #[arg(long, env = "BASE_URL")]
    pub(crate) base_url: Option<String>,
    #[arg(long, env = "ASSETS_URL")]
    pub(crate) assets_url: Option<String>,
    #[arg(long, env = "PROXY")]
    pub(crate) proxy: Option<String>,
    #[arg(long, env = "CF_CLEARANCE")]
    pub(crate) cf_clearance: Option<String>,
    #[arg(long, env = "PICGO_KEY")]
    pub(crate) picgo_key: Option<String>,
    #[arg(long, env = "TUMY_KEY")]
    pub(crate) tumy_key: Option<String>,
    #[arg(long, env = "DATA_DIR")]
    pub(crate) data_dir: Option<String>,
    #[arg(long, env = "SHOW_THINKING", value_parser = BoolishValueParser::new())]
    pub(crate) show_thinking: Option<bool>,
    #[arg(long, env = "ISSHOW_SEARCH_RESULTS", value_parser = BoolishValueParser::new())]
    pub(crate) show_search_results: Option<bool>,
    #[arg(long, env = "ADMINPASSWORD")]
    pub(crate) manager_password: Option<String>,
    #[arg(long, env = "MAX_ATTEMPTS")]
    pub(crate) max_attempts: Option<u32>,
    #[arg(long, env = "SWEEP_INTERVAL_SECS")]
    pub(crate) sweep_interval_secs: Option<u64>,
    #[arg(long, env = "KEEPALIVE_SECS")]
    pub(crate) keepalive_secs: Option<u64>,
}

impl Cli {
    pub(crate) fn into_patch(self) -> GlobalConfigPatch {
        GlobalConfigPatch {
            host: self.host,
            port: self.port,
            api_key: Some(self.api_key),
            sso: self.sso,
            sso_heavy: self.sso_heavy,
            custom_sso: self.custom_sso,
            temporary: self.temporary,
            base_url: self.base_url,
            assets_url: self.assets_url,
            proxy: self.proxy,
            cf_clearance: self.cf_clearance,
            picgo_key: self.picgo_key,
            tumy_key: self.tumy_key,
            data_dir: self.data_dir,
            show_thinking: self.show_thinking,
            show_search_results: self.show_search_results,
            manager_password: self.manager_password,
            max_attempts: self.max_attempts,
            sweep_interval_secs: self.sweep_interval_secs,
            keepalive_secs: self.keepalive_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_fold_into_config() {
        let cli = Cli::try_parse_from([
            "grokgate",
            "--port",
            "8080",
            "--sso",
            "a,b",
            "--custom-sso",
            "yes",
            "--temporary",
            "0",
            "--max-attempts",
            "3",
        ])
        .unwrap();
        let config = cli.into_patch().into_config().unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.sso, vec!["a".to_string(), "b".to_string()]);
        assert!(config.custom_sso);
        assert!(!config.temporary);
        assert_eq!(config.max_attempts, 3);
    }

    #[test]
    fn api_key_has_a_default() {
        let cli = Cli::try_parse_from(["grokgate"]).unwrap();
        assert!(!cli.api_key.is_empty());
    }
}
