use kube::ResourceExt;

use crate::crd::common::LABEL_TEMPLATE_CACHE;
use crate::engine::{AimStatus, HasStatus};

pub mod cache;
pub use cache::*;

/// Coarse status of a cache object, `Pending` until the warmer reports.
pub fn cache_state<K: HasStatus<Status = CacheStatus>>(cache: &K) -> AimStatus {
    cache.status().map(|s| s.status).unwrap_or_default()
}

/// Model caches labelled as belonging to `template_cache` that ended up `Failed`.
pub fn failed_model_caches<'a>(template_cache: &str, caches: &'a [AIMModelCache]) -> Vec<&'a AIMModelCache> {
    caches
        .iter()
        .filter(|c| c.labels().get(LABEL_TEMPLATE_CACHE).map(String::as_str) == Some(template_cache))
        .filter(|c| cache_state(*c) == AimStatus::Failed)
        .collect()
}
