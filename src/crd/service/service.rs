use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crd::common::{CacheRetryState, EnvVarSpec, Metric, Precision, ResolvedReference};
use crate::engine::{AimStatus, Condition, HasStatus, StatusWithConditions};

/// Model a service runs, by catalog name or by image.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceModel {
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub ref_: Option<String>,
    /// Container image of a catalog entry, used when no `ref` is given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Caching mode as written by users. `Auto`, `Always` and `Never` are legacy spellings.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum CachingModeInput {
    Shared,
    Dedicated,
    Auto,
    Always,
    Never,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCaching {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<CachingModeInput>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GpuSelector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
}

/// Narrows template selection.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<Metric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<Precision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_selector: Option<GpuSelector>,
}

/// Represents the 'spec' field of an AIMService
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "aim.eai.amd.com",
    version = "v1alpha1",
    kind = "AIMService",
    namespaced,
    status = "AIMServiceStatus",
    shortname = "aimsvc"
)]
#[serde(rename_all = "camelCase")]
pub struct AIMServiceSpec {
    pub model: ServiceModel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caching: Option<ServiceCaching>,
    /// Legacy switch, `caching.mode` wins when both are set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_model: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overrides: Option<ServiceOverrides>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVarSpec>,
}

/// Coarse status in the vocabulary of services.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum ServicePhase {
    #[default]
    Pending,
    Starting,
    Running,
    Degraded,
    Failed,
}

impl From<AimStatus> for ServicePhase {
    fn from(status: AimStatus) -> Self {
        match status {
            AimStatus::Pending => ServicePhase::Pending,
            AimStatus::Progressing => ServicePhase::Starting,
            AimStatus::Ready => ServicePhase::Running,
            AimStatus::Degraded | AimStatus::NotAvailable => ServicePhase::Degraded,
            AimStatus::Failed => ServicePhase::Failed,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCacheStatus {
    #[serde(default)]
    pub template_cache_ref: Option<ResolvedReference>,
    #[serde(flatten)]
    pub retry: CacheRetryState,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AIMServiceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub status: ServicePhase,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub resolved_model: Option<ResolvedReference>,
    #[serde(default)]
    pub resolved_template: Option<ResolvedReference>,
    #[serde(default)]
    pub cache: Option<ServiceCacheStatus>,
}

impl AIMServiceStatus {
    pub fn retry_state(&self) -> CacheRetryState {
        self.cache.as_ref().map(|c| c.retry).unwrap_or_default()
    }
}

impl StatusWithConditions for AIMServiceStatus {
    fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    fn set_conditions(&mut self, conditions: Vec<Condition>) {
        self.conditions = conditions;
    }

    fn set_status(&mut self, status: AimStatus) {
        self.status = status.into();
    }

    fn observed_generation(&self) -> Option<i64> {
        self.observed_generation
    }

    fn set_observed_generation(&mut self, generation: i64) {
        self.observed_generation = Some(generation);
    }
}

impl HasStatus for AIMService {
    type Status = AIMServiceStatus;

    fn status(&self) -> Option<&Self::Status> {
        self.status.as_ref()
    }
}
