use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crd::common::{DiscoveryState, EnvVarSpec, GpuRequirement, Metric, Precision, ResolvedReference};
use crate::engine::{AimStatus, Condition, HasStatus, StatusWithConditions};

/// One artifact a template needs downloaded before serving.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModelSourceEntry {
    pub name: String,
    pub source_uri: String,
    /// Size in bytes when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProfileMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<String>,
    #[serde(default)]
    pub gpu_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<Metric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<Precision>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "type")]
    pub type_: Option<String>,
}

/// Runtime profile reported by discovery.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default)]
    pub metadata: ProfileMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_args: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env_vars: BTreeMap<String, String>,
}

/// Fields shared by namespaced and cluster templates.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSpecCommon {
    pub model_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<Metric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<Precision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<GpuRequirement>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVarSpec>,
    /// Known artifacts; when set discovery is skipped.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub model_sources: Vec<ModelSourceEntry>,
}

/// Represents the 'spec' field of an AIMServiceTemplate
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "aim.eai.amd.com",
    version = "v1alpha1",
    kind = "AIMServiceTemplate",
    namespaced,
    status = "TemplateStatus",
    shortname = "aimst"
)]
#[serde(rename_all = "camelCase")]
pub struct AIMServiceTemplateSpec {
    #[serde(flatten)]
    pub common: TemplateSpecCommon,
}

/// Represents the 'spec' field of an AIMClusterServiceTemplate
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "aim.eai.amd.com",
    version = "v1alpha1",
    kind = "AIMClusterServiceTemplate",
    status = "TemplateStatus",
    shortname = "aimcst"
)]
#[serde(rename_all = "camelCase")]
pub struct AIMClusterServiceTemplateSpec {
    #[serde(flatten)]
    pub common: TemplateSpecCommon,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TemplateStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub status: AimStatus,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    // Written as null or empty when cleared, status is merge-patched.
    #[serde(default)]
    pub resolved_model: Option<ResolvedReference>,
    #[serde(default)]
    pub discovery: Option<DiscoveryState>,
    #[serde(default)]
    pub discovery_job: Option<String>,
    #[serde(default)]
    pub model_sources: Vec<ModelSourceEntry>,
    #[serde(default)]
    pub profile: Option<Profile>,
}

impl StatusWithConditions for TemplateStatus {
    fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    fn set_conditions(&mut self, conditions: Vec<Condition>) {
        self.conditions = conditions;
    }

    fn set_status(&mut self, status: AimStatus) {
        self.status = status;
    }

    fn observed_generation(&self) -> Option<i64> {
        self.observed_generation
    }

    fn set_observed_generation(&mut self, generation: i64) {
        self.observed_generation = Some(generation);
    }
}

impl HasStatus for AIMServiceTemplate {
    type Status = TemplateStatus;

    fn status(&self) -> Option<&Self::Status> {
        self.status.as_ref()
    }
}

impl HasStatus for AIMClusterServiceTemplate {
    type Status = TemplateStatus;

    fn status(&self) -> Option<&Self::Status> {
        self.status.as_ref()
    }
}
