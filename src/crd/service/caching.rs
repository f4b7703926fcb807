use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;

use crate::crd::cache::{AIMTemplateCache, AIMTemplateCacheSpec, CacheMode};
use crate::crd::common::{CacheRetryState, LABEL_MANAGED_BY, LABEL_TEMPLATE, LABEL_TEMPLATE_SCOPE, MANAGED_BY};
use crate::engine::AimStatus;
use crate::utils::bounded_name;

use super::selection::TemplateCandidate;
use super::service::CachingModeInput;

/// Fold the caching inputs of a service into a canonical mode.
///
/// `caching.mode` wins over the legacy `cacheModel` switch, and neither given means `Shared`.
pub fn normalize_caching_mode(mode: Option<CachingModeInput>, cache_model: Option<bool>) -> CacheMode {
    let mode = mode.or_else(|| {
        cache_model.map(|cache| {
            if cache {
                CachingModeInput::Always
            } else {
                CachingModeInput::Never
            }
        })
    });
    match mode {
        None | Some(CachingModeInput::Shared) | Some(CachingModeInput::Auto) | Some(CachingModeInput::Always) => {
            CacheMode::Shared
        }
        Some(CachingModeInput::Dedicated) | Some(CachingModeInput::Never) => CacheMode::Dedicated,
    }
}

/// Shared caches are named after the template, dedicated ones after the service.
pub fn template_cache_name(mode: CacheMode, service: &str, template: &TemplateCandidate) -> String {
    match mode {
        CacheMode::Shared => bounded_name("", &format!("{}-cache", template.name)),
        CacheMode::Dedicated => bounded_name("", &format!("{}-svc-cache", service)),
    }
}

/// Build the template cache a service waits on. `owner` is only set for dedicated caches.
pub fn build_template_cache(
    name: &str,
    namespace: &str,
    mode: CacheMode,
    template: &TemplateCandidate,
    owner: Option<OwnerReference>,
) -> AIMTemplateCache {
    let labels = [
        (LABEL_MANAGED_BY, MANAGED_BY),
        (LABEL_TEMPLATE, template.name.as_str()),
        (LABEL_TEMPLATE_SCOPE, template.scope.as_str()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    AIMTemplateCache {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            owner_references: owner.map(|o| vec![o]),
            ..ObjectMeta::default()
        },
        spec: AIMTemplateCacheSpec {
            template_name: template.name.clone(),
            template_scope: template.scope,
            mode,
        },
        status: None,
    }
}

/// What to do about a cache after looking at its state and the retry counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheRetryAction {
    /// Cache is not failed, nothing to remediate.
    None,
    /// First failure: delete the cache and its failed artifacts so it warms again.
    Retry,
    /// Failed again after the single retry. Left for an operator.
    Exhausted,
}

/// One automatic retry per service, then stop.
pub fn cache_retry(cache_state: AimStatus, retry: CacheRetryState) -> (CacheRetryState, CacheRetryAction) {
    if cache_state != AimStatus::Failed {
        return (retry, CacheRetryAction::None);
    }
    if retry.retry_attempts == 0 {
        (CacheRetryState { retry_attempts: 1 }, CacheRetryAction::Retry)
    } else {
        (retry, CacheRetryAction::Exhausted)
    }
}
