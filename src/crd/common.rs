use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const API_GROUP: &str = "aim.eai.amd.com";

pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";
pub const LABEL_TEMPLATE: &str = "aim.eai.amd.com/template";
pub const LABEL_TEMPLATE_SCOPE: &str = "aim.eai.amd.com/template-scope";
pub const LABEL_SPEC_HASH: &str = "aim.eai.amd.com/spec-hash";
pub const LABEL_ATTEMPT: &str = "aim.eai.amd.com/discovery-attempt";
pub const LABEL_MODEL_SOURCE: &str = "aim.eai.amd.com/model-source";
pub const LABEL_TEMPLATE_CACHE: &str = "aim.eai.amd.com/template-cache";
pub const MANAGED_BY: &str = "aim-controller";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Namespace,
    Cluster,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Namespace => "namespace",
            Scope::Cluster => "cluster",
        }
    }
}

/// Which concrete object satisfied a reference.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedReference {
    pub name: String,
    pub kind: String,
    pub scope: Scope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Persisted circuit-breaker state of a discovery job.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryState {
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_hash: Option<String>,
}

/// Persisted single-retry counter for a dependent cache. Only ever 0 or 1.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CacheRetryState {
    #[serde(default)]
    pub retry_attempts: u8,
}

/// GPU request of a deployment profile.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GpuRequirement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub requests: u32,
    /// Quantity such as `64Gi` or `192G`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_vram: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CpuRequirement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HardwareRequirement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<GpuRequirement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuRequirement>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Latency,
    Throughput,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Fp8,
    Fp16,
    Bf16,
    Fp32,
}

impl Precision {
    /// Lower ranks are preferred when several profiles qualify.
    pub fn rank(&self) -> u8 {
        match self {
            Precision::Fp8 => 0,
            Precision::Fp16 => 1,
            Precision::Bf16 => 2,
            Precision::Fp32 => 3,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, JsonSchema)]
pub struct EnvVarSpec {
    pub name: String,
    #[serde(default)]
    pub value: String,
}
