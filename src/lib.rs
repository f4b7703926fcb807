use std::time::Duration;

use futures::future::BoxFuture;
use kube::client::Client;
use log::info;
use serde::Deserialize;

pub mod controller;
pub mod crd;
pub mod engine;
pub mod errors;
pub mod gpu;
pub mod metrics;
pub mod registry;
pub mod resolve;
pub mod utils;
pub mod views;

use crate::crd::template::{BreakerPolicy, DiscoverySettings};
use crate::errors::Error;

pub use crd::model_source::AIMClusterModelSource;
pub use crd::service::AIMService;
pub use crd::template::{AIMClusterServiceTemplate, AIMServiceTemplate};

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AimEnvironmentConfig {
    pub server_host: String,
    pub server_port: u16,
    pub operator_namespace: String,
    pub discovery_service_account: Option<String>,
    pub discovery_base_backoff_seconds: u64,
    pub discovery_max_backoff_seconds: u64,
    pub max_concurrent_discovery_jobs: usize,
    pub registry_workers: usize,
    pub registry_timeout_seconds: u64,
    pub requeue_seconds: u64,
    pub resync_seconds: u64,
}

impl Default for AimEnvironmentConfig {
    fn default() -> Self {
        AimEnvironmentConfig {
            server_host: "0.0.0.0".to_owned(),
            server_port: 8888,
            operator_namespace: "aim-system".to_owned(),
            discovery_service_account: None,
            discovery_base_backoff_seconds: 60,
            discovery_max_backoff_seconds: 3600,
            max_concurrent_discovery_jobs: 10,
            registry_workers: 4,
            registry_timeout_seconds: 120,
            requeue_seconds: 30,
            resync_seconds: 600,
        }
    }
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub discovery: DiscoverySettings,
    pub registry_workers: usize,
    pub registry_timeout: Duration,
    pub requeue: Duration,
    pub resync: Duration,
}

impl Config {
    pub fn from_env_config(env_config: AimEnvironmentConfig) -> Result<Self, Error> {
        if env_config.registry_workers == 0 {
            return Err(Error::Config("registry_workers must be at least 1".into()));
        }
        if env_config.max_concurrent_discovery_jobs == 0 {
            return Err(Error::Config("max_concurrent_discovery_jobs must be at least 1".into()));
        }
        if env_config.discovery_base_backoff_seconds > env_config.discovery_max_backoff_seconds {
            return Err(Error::Config(format!(
                "discovery_base_backoff_seconds ({}) is larger than discovery_max_backoff_seconds ({})",
                env_config.discovery_base_backoff_seconds, env_config.discovery_max_backoff_seconds
            )));
        }
        if env_config.operator_namespace.is_empty() {
            return Err(Error::Config("operator_namespace is empty".into()));
        }

        let requeue = Duration::from_secs(env_config.requeue_seconds);
        Ok(Config {
            server_host: env_config.server_host,
            server_port: env_config.server_port,
            discovery: DiscoverySettings {
                operator_namespace: env_config.operator_namespace,
                service_account: env_config.discovery_service_account.filter(|a| !a.is_empty()),
                policy: BreakerPolicy {
                    base: Duration::from_secs(env_config.discovery_base_backoff_seconds),
                    max: Duration::from_secs(env_config.discovery_max_backoff_seconds),
                },
                max_active_jobs: env_config.max_concurrent_discovery_jobs,
                requeue,
            },
            registry_workers: env_config.registry_workers,
            registry_timeout: Duration::from_secs(env_config.registry_timeout_seconds),
            requeue,
            resync: Duration::from_secs(env_config.resync_seconds),
        })
    }
}

/// Start every controller, the returned future runs until they all shut down.
pub async fn init_controller(client: Client, config: Config) -> Result<BoxFuture<'static, ()>, Error> {
    info!(
        "Starting controllers, discovery jobs of cluster templates run in '{}'",
        config.discovery.operator_namespace
    );
    controller::init_controllers(client, &config)
}
