use std::{env::var, str::FromStr, time::Duration};

use derive_builder::Builder;
use thiserror::Error;

const ENV_PREFIX: &str = "NEUTRON_FIP_";

#[derive(Debug, Error)]
pub enum FromError {
    #[error("Env var unavailable: {}", .0)]
    VarUnset(String),
    #[error("Env var {} holds an invalid value: '{}'", .key, .value)]
    InvalidValue { key: String, value: String },
    #[error("Configuration is incomplete: {}", .0)]
    Incomplete(String),
}

/// Settings of the remote network provider.
#[derive(Debug, Clone, Builder)]
pub struct ProviderConfig {
    #[builder(setter(into))]
    pub endpoint: String,
    #[builder(setter(into))]
    pub auth_token: String,
    #[builder(default = "Duration::from_secs(60)")]
    pub request_timeout: Duration,
    /// tag marking provider resources owned by this controller
    #[builder(setter(into), default = "\"kube-ovn\".to_owned()")]
    pub resource_tag: String,
}

/// Immutable controller configuration, built once at startup and shared by
/// every component.
#[derive(Debug, Clone, Builder)]
pub struct ControllerConfig {
    #[builder(default = "5")]
    pub worker_count: usize,
    #[builder(default = "Duration::from_secs(3)")]
    pub sync_interval: Duration,
    #[builder(default = "Duration::from_secs(60)")]
    pub gc_interval: Duration,
    /// grace period tolerating cache lag before an allocation is reclaimed
    #[builder(default = "Duration::from_secs(3)")]
    pub gc_debounce: Duration,
    #[builder(default = "97")]
    pub key_mutex_shards: usize,
    #[builder(default = "Duration::from_millis(5)")]
    pub retry_base_delay: Duration,
    #[builder(default = "Duration::from_secs(1000)")]
    pub retry_max_delay: Duration,
    /// how long an allocation waits for its status patches to land
    #[builder(default = "Duration::from_secs(30)")]
    pub patch_wait_timeout: Duration,
    #[builder(default)]
    pub max_retries: Option<u32>,
    #[builder(default)]
    pub pod_label_selector: Option<String>,
    #[builder(default)]
    pub vpc_label_selector: Option<String>,
    /// namespace the port queue is restricted to, all namespaces when unset
    #[builder(default)]
    pub port_namespace: Option<String>,
    pub provider: ProviderConfig,
}

impl ControllerConfig {
    pub fn from_env() -> Result<Self, FromError> {
        let mut builder = ControllerConfigBuilder::default();

        if let Some(workers) = parse_var("WORKER_COUNT")? {
            builder.worker_count(workers);
        }
        if let Some(secs) = parse_var("SYNC_INTERVAL_SECS")? {
            builder.sync_interval(Duration::from_secs(secs));
        }
        if let Some(secs) = parse_var("GC_INTERVAL_SECS")? {
            builder.gc_interval(Duration::from_secs(secs));
        }
        if let Some(secs) = parse_var("GC_DEBOUNCE_SECS")? {
            builder.gc_debounce(Duration::from_secs(secs));
        }
        if let Some(shards) = parse_var("KEY_MUTEX_SHARDS")? {
            builder.key_mutex_shards(shards);
        }
        if let Some(millis) = parse_var("RETRY_BASE_DELAY_MS")? {
            builder.retry_base_delay(Duration::from_millis(millis));
        }
        if let Some(secs) = parse_var("RETRY_MAX_DELAY_SECS")? {
            builder.retry_max_delay(Duration::from_secs(secs));
        }
        if let Some(secs) = parse_var("PATCH_WAIT_TIMEOUT_SECS")? {
            builder.patch_wait_timeout(Duration::from_secs(secs));
        }

        builder
            .max_retries(parse_var("MAX_RETRIES")?)
            .pod_label_selector(optional_var("POD_LABEL_SELECTOR"))
            .vpc_label_selector(optional_var("VPC_LABEL_SELECTOR"))
            .port_namespace(optional_var("PORT_NAMESPACE"))
            .provider(ProviderConfig::from_env()?)
            .build()
            .map_err(|e| FromError::Incomplete(e.to_string()))
    }
}

impl ProviderConfig {
    pub fn from_env() -> Result<Self, FromError> {
        let mut builder = ProviderConfigBuilder::default();

        builder
            .endpoint(required_var("OS_NETWORK_ENDPOINT")?)
            .auth_token(required_var("OS_AUTH_TOKEN")?);

        if let Some(secs) = parse_var("OS_REQUEST_TIMEOUT_SECS")? {
            builder.request_timeout(Duration::from_secs(secs));
        }
        if let Some(tag) = optional_var("OS_RESOURCE_TAG") {
            builder.resource_tag(tag);
        }

        builder
            .build()
            .map_err(|e| FromError::Incomplete(e.to_string()))
    }
}

fn optional_var(key: &str) -> Option<String> {
    var(format!("{ENV_PREFIX}{key}"))
        .ok()
        .filter(|value| !value.is_empty())
}

fn required_var(key: &str) -> Result<String, FromError> {
    optional_var(key).ok_or_else(|| FromError::VarUnset(format!("{ENV_PREFIX}{key}")))
}

fn parse_var<T: FromStr>(key: &str) -> Result<Option<T>, FromError> {
    optional_var(key)
        .map(|value| {
            value.parse().map_err(|_| FromError::InvalidValue {
                key: format!("{ENV_PREFIX}{key}"),
                value,
            })
        })
        .transpose()
}
