use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::engine::{AimStatus, Condition, HasStatus, StatusWithConditions};

pub const DEFAULT_MAX_MODELS: u32 = 100;

/// One image pattern of a model source
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModelSourceFilter {
    /// `[registry/]repository[:tag]`, `*` matches any run of characters.
    pub image: String,
    /// Repositories to skip, matched exactly.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
    /// Tag pattern used when `image` carries no tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// Represents the 'spec' field of an AIMClusterModelSource
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "aim.eai.amd.com",
    version = "v1alpha1",
    kind = "AIMClusterModelSource",
    status = "AIMClusterModelSourceStatus",
    shortname = "aimcms"
)]
#[serde(rename_all = "camelCase")]
pub struct AIMClusterModelSourceSpec {
    /// Registry used by filters that do not name one, `docker.io` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
    #[serde(default)]
    pub filters: Vec<ModelSourceFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_models: Option<u32>,
}

impl AIMClusterModelSourceSpec {
    pub fn max_models(&self) -> usize {
        self.max_models.unwrap_or(DEFAULT_MAX_MODELS) as usize
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AIMClusterModelSourceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub status: AimStatus,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Catalog entries this source created, existing and new.
    #[serde(default)]
    pub discovered_models: u32,
    /// Images matched by the filters, before the limit.
    #[serde(default)]
    pub available_models: u32,
    #[serde(default)]
    pub models_limit_reached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<DateTime<Utc>>,
}

impl StatusWithConditions for AIMClusterModelSourceStatus {
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

impl HasStatus for AIMClusterModelSource {
    type Status = AIMClusterModelSourceStatus;

    fn status(&self) -> Option<&Self::Status> {
        self.status.as_ref()
    }
}
