use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kube::{
    api::{Api, ListParams},
    client::Client,
    Resource, ResourceExt,
};
use log::{info, warn};

use crate::crd::cache::{cache_state, failed_model_caches, AIMModelCache, AIMTemplateCache, CacheMode};
use crate::crd::common::{CacheRetryState, ResolvedReference, LABEL_TEMPLATE_CACHE};
use crate::crd::model::{resolve_model, resolve_model_by_image, ModelRef};
use crate::crd::template::{AIMClusterServiceTemplate, AIMServiceTemplate};
use crate::engine::{
    AimStatus, ComponentHealth, ConditionManager, DomainReconciler, FetchPolicy, FetchResult, HasStatus, PlanResult,
};
use crate::errors::Error;
use crate::resolve::{resolve, Resolution, Resolved};
use crate::utils::object_to_owner_reference;

pub mod caching;
pub mod selection;
pub mod service;

pub use caching::{cache_retry, normalize_caching_mode, CacheRetryAction};
pub use selection::{select_template, Selection, TemplateCandidate, COMPONENT_TEMPLATE};
pub use service::*;

use caching::{build_template_cache, template_cache_name};
use selection::{explicit_template_health, selection_health};

pub const COMPONENT_MODEL: &str = "Model";
pub const COMPONENT_CACHE: &str = "CacheReady";

/// How the template of a service was looked up.
#[derive(Debug)]
pub enum TemplateChoice {
    /// No explicit template and the model is not resolved yet.
    AwaitingModel,
    Explicit(Resolution<TemplateCandidate>),
    Implicit(FetchResult<Selection>),
}

impl TemplateChoice {
    /// Template the service can run on right now.
    pub fn ready_template(&self) -> Option<&TemplateCandidate> {
        match self {
            TemplateChoice::Explicit(Resolution::Found(resolved)) if resolved.value.status == AimStatus::Ready => {
                Some(&resolved.value)
            }
            TemplateChoice::Implicit(FetchResult::Found(selection)) => selection.selected(),
            _ => None,
        }
    }

    pub fn reference(&self) -> Option<ResolvedReference> {
        match self {
            TemplateChoice::Explicit(resolution) => resolution.reference().cloned(),
            TemplateChoice::Implicit(FetchResult::Found(selection)) => selection.selected().map(|c| c.reference()),
            _ => None,
        }
    }

    pub fn health(&self) -> ComponentHealth {
        let c = COMPONENT_TEMPLATE;
        match self {
            TemplateChoice::AwaitingModel => {
                ComponentHealth::pending(c, "AwaitingModel", "Template selection waits for the model to resolve")
            }
            TemplateChoice::Explicit(resolution) => {
                resolution.to_component_health(c, AimStatus::Failed, |resolved| explicit_template_health(&resolved.value))
            }
            TemplateChoice::Implicit(selection) => {
                selection.to_component_health(c, FetchPolicy::upstream(AimStatus::Failed), selection_health)
            }
        }
    }
}

pub struct ServiceFetch {
    pub model: Resolution<ModelRef>,
    pub template: TemplateChoice,
    /// Only looked up once a ready template is known.
    pub cache: Option<FetchResult<AIMTemplateCache>>,
    /// Only listed when the cache failed and a retry may follow.
    pub model_caches: Option<FetchResult<Vec<AIMModelCache>>>,
}

/// State of the template cache a service depends on.
#[derive(Debug)]
pub enum CacheView {
    AwaitingTemplate,
    Unavailable(String),
    Missing { name: String },
    Present { name: String, state: AimStatus },
    /// First failure, the cache and its failed artifacts get deleted this pass.
    Retry {
        cache: Box<AIMTemplateCache>,
        failed: Vec<AIMModelCache>,
    },
    /// Failed again after the retry.
    Exhausted { name: String },
}

impl CacheView {
    pub fn cache_name(&self) -> Option<String> {
        match self {
            CacheView::Missing { name } | CacheView::Present { name, .. } | CacheView::Exhausted { name } => {
                Some(name.clone())
            }
            CacheView::Retry { cache, .. } => Some(cache.name_any()),
            CacheView::AwaitingTemplate | CacheView::Unavailable(_) => None,
        }
    }
}

#[derive(Debug)]
pub struct ServiceObservation {
    pub model: Resolution<ModelRef>,
    pub template: TemplateChoice,
    pub mode: CacheMode,
    pub cache: CacheView,
    /// Retry counter after this pass.
    pub retry: CacheRetryState,
}

/// Derive the cache view from the fetched cache and the persisted retry counter.
pub fn observe_cache(
    template_ready: bool,
    cache: Option<FetchResult<AIMTemplateCache>>,
    model_caches: Option<FetchResult<Vec<AIMModelCache>>>,
    expected_name: Option<String>,
    retry: CacheRetryState,
) -> (CacheView, CacheRetryState) {
    let (cache, name) = match (template_ready, cache, expected_name) {
        (true, Some(cache), Some(name)) => (cache, name),
        _ => return (CacheView::AwaitingTemplate, retry),
    };
    let cache = match cache {
        FetchResult::Found(cache) => cache,
        FetchResult::NotFound => return (CacheView::Missing { name }, retry),
        FetchResult::Error(err) => return (CacheView::Unavailable(err.to_string()), retry),
    };

    let state = cache_state(&cache);
    match cache_retry(state, retry) {
        (_, CacheRetryAction::None) => (CacheView::Present { name, state }, retry),
        (_, CacheRetryAction::Exhausted) => (CacheView::Exhausted { name }, retry),
        (next, CacheRetryAction::Retry) => match model_caches {
            Some(FetchResult::Found(all)) => {
                let failed = failed_model_caches(&name, &all).into_iter().cloned().collect();
                (
                    CacheView::Retry {
                        cache: Box::new(cache),
                        failed,
                    },
                    next,
                )
            }
            Some(FetchResult::NotFound) | None => (
                CacheView::Retry {
                    cache: Box::new(cache),
                    failed: vec![],
                },
                next,
            ),
            // Counter is only spent once the failed artifacts can be found.
            Some(FetchResult::Error(err)) => (CacheView::Unavailable(err.to_string()), retry),
        },
    }
}

pub fn cache_health(view: &CacheView) -> ComponentHealth {
    let c = COMPONENT_CACHE;
    match view {
        CacheView::AwaitingTemplate => {
            ComponentHealth::pending(c, "AwaitingTemplate", "Cache waits for a ready template")
        }
        CacheView::Unavailable(err) => {
            ComponentHealth::degraded(c, "CacheFetchFailed", format!("Cannot read template cache: {}", err)).transient()
        }
        CacheView::Missing { name } => {
            ComponentHealth::progressing(c, "CacheCreating", format!("Creating template cache '{}'", name))
        }
        CacheView::Present { name, state } => match state {
            AimStatus::Ready => ComponentHealth::ready(c, "CacheReady", format!("Template cache '{}' is ready", name)),
            AimStatus::Pending | AimStatus::Progressing => {
                ComponentHealth::progressing(c, "CacheWarming", format!("Template cache '{}' is warming", name))
            }
            other => ComponentHealth::degraded(
                c,
                "CacheNotReady",
                format!("Template cache '{}' is {}", name, other.as_str()),
            ),
        },
        CacheView::Retry { cache, .. } => ComponentHealth::progressing(
            c,
            "CacheRetrying",
            format!("Template cache '{}' failed, retrying once", cache.name_any()),
        ),
        CacheView::Exhausted { .. } => {
            ComponentHealth::degraded(c, "CacheFailed", "Template cache failed after retry")
        }
    }
}

pub struct ServiceReconciler {
    pub client: Client,
    /// Poll interval while dependencies are not ready.
    pub requeue: Duration,
}

impl ServiceReconciler {
    pub fn new(client: Client, requeue: Duration) -> Self {
        ServiceReconciler { client, requeue }
    }

    async fn resolve_service_model(&self, namespace: &str, model: &ServiceModel) -> Resolution<ModelRef> {
        match (&model.ref_, &model.image) {
            (Some(name), _) => resolve_model(&self.client, Some(namespace), name).await,
            (None, Some(image)) => resolve_model_by_image(&self.client, namespace, image).await,
            (None, None) => Resolution::NotFound("<unset>".to_string()),
        }
    }

    async fn resolve_template(&self, namespace: &str, name: &str) -> Resolution<TemplateCandidate> {
        let templates: Api<AIMServiceTemplate> = Api::namespaced(self.client.clone(), namespace);
        let clusters: Api<AIMClusterServiceTemplate> = Api::all(self.client.clone());
        let namespaced = async move {
            FetchResult::from_kube(templates.get(name).await).map(|t| {
                Resolved::namespaced(TemplateCandidate::from_template(&t), "AIMServiceTemplate", name, namespace)
            })
        };
        let cluster = move || async move {
            FetchResult::from_kube(clusters.get(name).await)
                .map(|t| Resolved::cluster(TemplateCandidate::from_template(&t), "AIMClusterServiceTemplate", name))
        };
        resolve(name, namespaced, cluster).await
    }

    async fn candidates(&self, namespace: &str) -> Result<Vec<TemplateCandidate>, kube::Error> {
        let templates: Api<AIMServiceTemplate> = Api::namespaced(self.client.clone(), namespace);
        let clusters: Api<AIMClusterServiceTemplate> = Api::all(self.client.clone());
        let mut candidates: Vec<TemplateCandidate> = templates
            .list(&ListParams::default())
            .await?
            .items
            .iter()
            .map(TemplateCandidate::from_template)
            .collect();
        candidates.extend(
            clusters
                .list(&ListParams::default())
                .await?
                .items
                .iter()
                .map(TemplateCandidate::from_template),
        );
        Ok(candidates)
    }
}

fn cache_mode(service: &AIMService) -> CacheMode {
    normalize_caching_mode(
        service.spec.caching.as_ref().and_then(|c| c.mode),
        service.spec.cache_model,
    )
}

#[async_trait]
impl DomainReconciler for ServiceReconciler {
    type Object = AIMService;
    type Fetched = ServiceFetch;
    type Observation = ServiceObservation;

    async fn fetch(&self, service: &AIMService) -> Result<ServiceFetch, Error> {
        let namespace = service.namespace().ok_or(Error::MissingKey(".metadata.namespace"))?;
        let model = self.resolve_service_model(&namespace, &service.spec.model).await;

        let template = match (&service.spec.template_name, model.resolved()) {
            (Some(name), _) => TemplateChoice::Explicit(self.resolve_template(&namespace, name).await),
            (None, Some(resolved)) => {
                let overrides = service.spec.overrides.clone().unwrap_or_default();
                TemplateChoice::Implicit(
                    FetchResult::from_kube(self.candidates(&namespace).await)
                        .map(|all| select_template(&all, &resolved.value.name, &overrides)),
                )
            }
            (None, None) => TemplateChoice::AwaitingModel,
        };

        let (mut cache, mut model_caches) = (None, None);
        if let Some(candidate) = template.ready_template() {
            let name = template_cache_name(cache_mode(service), &service.name_any(), candidate);
            let caches: Api<AIMTemplateCache> = Api::namespaced(self.client.clone(), &namespace);
            let fetched = FetchResult::from_kube(caches.get(&name).await);

            let retry = service.status().map(|s| s.retry_state()).unwrap_or_default();
            let failed = fetched.value().map(|c| cache_state(c) == AimStatus::Failed) == Some(true);
            if failed && retry.retry_attempts == 0 {
                let models: Api<AIMModelCache> = Api::namespaced(self.client.clone(), &namespace);
                let params = ListParams::default().labels(&format!("{}={}", LABEL_TEMPLATE_CACHE, name));
                model_caches = Some(FetchResult::from_kube(models.list(&params).await.map(|l| l.items)));
            }
            cache = Some(fetched);
        }

        Ok(ServiceFetch {
            model,
            template,
            cache,
            model_caches,
        })
    }

    fn observe(&self, service: &AIMService, fetched: ServiceFetch, _now: DateTime<Utc>) -> ServiceObservation {
        let mode = cache_mode(service);
        let retry = service.status().map(|s| s.retry_state()).unwrap_or_default();
        let expected = fetched
            .template
            .ready_template()
            .map(|t| template_cache_name(mode, &service.name_any(), t));
        let (cache, retry) = observe_cache(
            fetched.template.ready_template().is_some(),
            fetched.cache,
            fetched.model_caches,
            expected,
            retry,
        );
        ServiceObservation {
            model: fetched.model,
            template: fetched.template,
            mode,
            cache,
            retry,
        }
    }

    fn plan(&self, service: &AIMService, observation: &ServiceObservation) -> Result<PlanResult, Error> {
        let mut plan = PlanResult::new();
        let name = service.name_any();

        if observation.template.ready_template().is_none() {
            plan.requeue(self.requeue);
        }

        match &observation.cache {
            CacheView::Missing { name: cache_name } => {
                if let Some(template) = observation.template.ready_template() {
                    let namespace = service.namespace().ok_or(Error::MissingKey(".metadata.namespace"))?;
                    let owner = match observation.mode {
                        CacheMode::Shared => None,
                        CacheMode::Dedicated => Some(object_to_owner_reference::<AIMService>(service.meta())?),
                    };
                    info!("Service '{}': creating {:?} template cache '{}'", name, observation.mode, cache_name);
                    plan.apply(&build_template_cache(cache_name, &namespace, observation.mode, template, owner))?;
                    plan.requeue(self.requeue);
                }
            }
            CacheView::Retry { cache, failed } => {
                warn!(
                    "Service '{}': template cache '{}' failed, deleting it and {} failed model cache(s)",
                    name,
                    cache.name_any(),
                    failed.len()
                );
                plan.delete(&**cache)?;
                for model_cache in failed {
                    plan.delete(model_cache)?;
                }
                plan.requeue(self.requeue);
            }
            CacheView::Present { state, .. } if *state != AimStatus::Ready => plan.requeue(self.requeue),
            CacheView::Exhausted { name: cache_name } => {
                warn!("Service '{}': template cache '{}' failed again, not retrying", name, cache_name);
            }
            _ => {}
        }
        Ok(plan)
    }

    fn components(&self, observation: &ServiceObservation) -> Vec<ComponentHealth> {
        let model = observation
            .model
            .to_component_health(COMPONENT_MODEL, AimStatus::Failed, |resolved| {
                ComponentHealth::ready(
                    COMPONENT_MODEL,
                    "ModelResolved",
                    format!("Resolved {} '{}'", resolved.reference.kind, resolved.reference.name),
                )
            });
        vec![model, observation.template.health(), cache_health(&observation.cache)]
    }

    fn decorate_status(
        &self,
        service: &AIMService,
        observation: &ServiceObservation,
        status: &mut AIMServiceStatus,
        _conditions: &mut ConditionManager,
    ) {
        status.resolved_model = observation.model.reference().cloned();
        status.resolved_template = observation.template.reference();
        let template_cache_ref = observation.cache.cache_name().map(|cache| {
            Resolved::namespaced((), "AIMTemplateCache", &cache, &service.namespace().unwrap_or_default()).reference
        });
        status.cache = Some(ServiceCacheStatus {
            template_cache_ref,
            retry: observation.retry,
        });
    }
}
