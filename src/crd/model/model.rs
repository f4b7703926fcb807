use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::engine::{AimStatus, ChildResource, Condition, Lifecycle};

/// Represents the 'spec' field of an AIMModel catalog entry
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "aim.eai.amd.com",
    version = "v1alpha1",
    kind = "AIMModel",
    namespaced,
    status = "AIMModelStatus",
    shortname = "aimmdl"
)]
#[serde(rename_all = "camelCase")]
pub struct AIMModelSpec {
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Cluster-wide catalog entry, also created by model sources
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "aim.eai.amd.com",
    version = "v1alpha1",
    kind = "AIMClusterModel",
    status = "AIMModelStatus",
    shortname = "aimcmdl"
)]
#[serde(rename_all = "camelCase")]
pub struct AIMClusterModelSpec {
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AIMModelStatus {
    #[serde(default)]
    pub status: AimStatus,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl ChildResource for AIMClusterModel {
    const LIFECYCLE: Lifecycle = Lifecycle::AppendOnly;
}
