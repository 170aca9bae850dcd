use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use arc_swap::ArcSwapOption;
use tracing::{info, warn};

use grokgate_common::GlobalConfig;
use grokgate_provider_core::{
    Clock, Credential, CredentialPool, PoolOptions, StatusSink, StatusStore, SystemClock, Tier,
    UpstreamClient,
};
use grokgate_provider_impl::{
    GrokEndpoints, HomepageFetcher, IdentityTagProvider, ImageHost, ImageResolver, PayloadOptions,
    PicGoHost, TumyHost,
};
use grokgate_storage::{JsonFileStore, StatusBus, StatusBusConfig};

use crate::dispatch::{Dispatcher, DispatcherConfig};
use crate::heartbeat::HeartbeatDecoupler;
use crate::state::GatewayState;
use crate::upstream_client::{UpstreamClientConfig, WreqUpstreamClient};

/// Parses the configured token lists into credentials with their tiers.
pub fn configured_credentials(config: &GlobalConfig) -> Vec<(Credential, Tier)> {
    let normal = config
        .sso
        .iter()
        .filter_map(|raw| Credential::parse(raw))
        .map(|credential| (credential, Tier::Normal));
    let heavy = config
        .sso_heavy
        .iter()
        .filter_map(|raw| Credential::parse(raw))
        .map(|credential| (credential, Tier::Heavy));
    normal.chain(heavy).collect()
}

/// Builds the shared gateway state: persistence, pool, upstream client,
/// identity tags, image handling and the dispatcher.
pub async fn bootstrap(config: GlobalConfig) -> anyhow::Result<Arc<GatewayState>> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store = Arc::new(JsonFileStore::in_dir(&config.data_dir));
    let loaded = match store.load().await {
        Ok(map) => map,
        Err(err) => {
            warn!(event = "status_load_failed", path = %store.path().display(), error = %err);
            Default::default()
        }
    };
    let sink: Arc<dyn StatusSink> = Arc::new(StatusBus::spawn(store, StatusBusConfig::default()));

    let pool = CredentialPool::new(
        PoolOptions {
            clock: clock.clone(),
            sweep_interval: Duration::from_secs(config.sweep_interval_secs.max(1)),
            ..PoolOptions::default()
        },
        sink,
    );
    let restored = loaded.len();
    pool.restore_status(loaded).await;
    let added = pool.add_bulk(configured_credentials(&config)).await;
    info!(event = "pool_loaded", restored, added);
    for (class, remaining) in pool.remaining_capacity().await {
        info!(event = "pool_capacity", class = %class, remaining);
    }

    let upstream = WreqUpstreamClient::new(UpstreamClientConfig::from_global(&config))
        .context("build upstream client")?;
    let raw_client = upstream.shared_client();
    let client: Arc<dyn UpstreamClient> = Arc::new(upstream);

    let endpoints = GrokEndpoints::new(config.base_url.clone(), config.assets_url.clone());
    let fetcher = Arc::new(HomepageFetcher::new(client.clone(), endpoints.base_url.clone()));
    let identity = Arc::new(IdentityTagProvider::new(fetcher, clock.clone()));

    let host: Option<Arc<dyn ImageHost>> = match (&config.picgo_key, &config.tumy_key) {
        (Some(key), _) => Some(Arc::new(PicGoHost::new(raw_client, key.clone()))),
        (None, Some(key)) => Some(Arc::new(TumyHost::new(raw_client, key.clone()))),
        (None, None) => None,
    };
    let images = Arc::new(ImageResolver::new(client.clone(), endpoints.clone(), host));

    let cf_clearance = Arc::new(ArcSwapOption::from_pointee(config.cf_clearance.clone()));
    let dispatcher = Dispatcher::new(
        client,
        pool.clone(),
        identity,
        endpoints,
        cf_clearance.clone(),
        DispatcherConfig {
            max_attempts: config.max_attempts.max(1) as usize,
            custom_sso: config.custom_sso,
            payload: PayloadOptions {
                temporary: config.temporary,
                has_image_host: config.has_image_host(),
            },
        },
    );

    Ok(Arc::new(GatewayState {
        heartbeat: HeartbeatDecoupler::new(Duration::from_secs(config.keepalive_secs.max(1))),
        config,
        pool,
        dispatcher,
        cf_clearance,
        images,
        clock,
    }))
}
