use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crd::common::Scope;
use crate::engine::{AimStatus, ChildResource, Condition, HasStatus, Lifecycle, StatusWithConditions};

/// Canonical caching mode of a template cache.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, JsonSchema, Default)]
pub enum CacheMode {
    /// Named after the template and reused by every service of it.
    #[default]
    Shared,
    /// Named after a single service and deleted with it.
    Dedicated,
}

/// Represents the 'spec' field of an AIMTemplateCache
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "aim.eai.amd.com",
    version = "v1alpha1",
    kind = "AIMTemplateCache",
    namespaced,
    status = "CacheStatus",
    shortname = "aimtc"
)]
#[serde(rename_all = "camelCase")]
pub struct AIMTemplateCacheSpec {
    pub template_name: String,
    pub template_scope: Scope,
    #[serde(default)]
    pub mode: CacheMode,
}

/// Represents the 'spec' field of an AIMModelCache, one downloaded artifact of a template cache
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "aim.eai.amd.com",
    version = "v1alpha1",
    kind = "AIMModelCache",
    namespaced,
    status = "CacheStatus",
    shortname = "aimmc"
)]
#[serde(rename_all = "camelCase")]
pub struct AIMModelCacheSpec {
    pub source_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

/// Status written by the cache warmer, read here only.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub status: AimStatus,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl StatusWithConditions for CacheStatus {
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

impl HasStatus for AIMTemplateCache {
    type Status = CacheStatus;

    fn status(&self) -> Option<&Self::Status> {
        self.status.as_ref()
    }
}

impl HasStatus for AIMModelCache {
    type Status = CacheStatus;

    fn status(&self) -> Option<&Self::Status> {
        self.status.as_ref()
    }
}

impl ChildResource for AIMTemplateCache {
    const LIFECYCLE: Lifecycle = Lifecycle::Owned;
}

impl ChildResource for AIMModelCache {
    const LIFECYCLE: Lifecycle = Lifecycle::Owned;
}
