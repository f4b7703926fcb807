use std::{fmt::Debug, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kube::{api::ApiResource, runtime::controller::Action, Resource, ResourceExt};
use log::info;

use crate::errors::Error;

use super::{
    conditions::{transitions, ConditionManager, ConditionTransition},
    health::{has_transient, reduce_status, worst_component, AimStatus, ComponentHealth, NotAvailablePolicy},
    plan::PlanResult,
    status::{HasStatus, StatusWithConditions},
    store::ObjectStore,
};

pub type StatusOf<R> = <<R as DomainReconciler>::Object as HasStatus>::Status;

/// Domain half of a reconciliation pass. The pipeline drives the stages in order.
#[async_trait]
pub trait DomainReconciler: Send + Sync + 'static {
    type Object: Resource<DynamicType = ()> + HasStatus + Clone + Debug + Send + Sync + 'static;
    type Fetched: Send;
    type Observation: Send + Sync;

    fn not_available_policy(&self) -> NotAvailablePolicy {
        NotAvailablePolicy::Degraded
    }

    /// Read children and referenced dependencies. Only infrastructure failures
    /// that make the whole pass meaningless should return `Err`.
    async fn fetch(&self, obj: &Self::Object) -> Result<Self::Fetched, Error>;

    /// Pure derivation of everything later stages need.
    fn observe(&self, obj: &Self::Object, fetched: Self::Fetched, now: DateTime<Utc>) -> Self::Observation;

    fn plan(&self, obj: &Self::Object, observation: &Self::Observation) -> Result<PlanResult, Error>;

    fn components(&self, observation: &Self::Observation) -> Vec<ComponentHealth>;

    /// Write kind-specific status fields and domain conditions.
    fn decorate_status(
        &self,
        obj: &Self::Object,
        observation: &Self::Observation,
        status: &mut StatusOf<Self>,
        conditions: &mut ConditionManager,
    );
}

/// Status computed at the end of a pass.
#[derive(Debug)]
pub struct StatusProjection<S> {
    pub status: S,
    pub coarse: AimStatus,
    pub changed: bool,
    pub transient: bool,
    pub transitions: Vec<ConditionTransition>,
}

/// Derive the new status of `obj` from an observation.
pub fn project_status<R: DomainReconciler>(
    reconciler: &R,
    obj: &R::Object,
    observation: &R::Observation,
    now: DateTime<Utc>,
) -> StatusProjection<StatusOf<R>> {
    let previous: StatusOf<R> = obj.status().cloned().unwrap_or_default();
    let mut status = previous.clone();
    let policy = reconciler.not_available_policy();

    let components = reconciler.components(observation);
    let coarse = reduce_status(&components, policy);

    let mut conditions = ConditionManager::new(previous.conditions(), now);
    for component in &components {
        conditions.set_component(component);
    }
    reconciler.decorate_status(obj, observation, &mut status, &mut conditions);

    let (reason, message) = match (coarse, worst_component(&components, policy)) {
        (AimStatus::Ready, _) => ("AllComponentsReady".to_string(), String::new()),
        (_, Some(worst)) => (worst.reason.clone(), worst.message.clone()),
        (_, None) => ("AwaitingComponents".to_string(), String::new()),
    };
    conditions.set_aggregate(coarse, &reason, &message);

    let transitions = transitions(previous.conditions(), conditions.conditions());
    status.set_conditions(conditions.into_conditions());
    status.set_status(coarse);

    let transient = has_transient(&components);
    if !transient {
        if let Some(generation) = obj.meta().generation {
            if previous.observed_generation().map(|g| generation > g).unwrap_or(true) {
                status.set_observed_generation(generation);
            }
        }
    }

    StatusProjection {
        changed: status != previous,
        status,
        coarse,
        transient,
        transitions,
    }
}

/// Runs fetch, observe, plan, delete, apply and status projection for one object.
pub struct Pipeline<R: DomainReconciler> {
    pub reconciler: R,
    store: Arc<dyn ObjectStore>,
    requeue: Duration,
}

impl<R: DomainReconciler> Pipeline<R> {
    pub fn new(reconciler: R, store: Arc<dyn ObjectStore>, requeue: Duration) -> Self {
        Pipeline {
            reconciler,
            store,
            requeue,
        }
    }

    pub async fn run(&self, obj: &R::Object) -> Result<Action, Error> {
        let kind = R::Object::kind(&());
        let name = obj.name_any();
        let id = match obj.namespace() {
            Some(namespace) => format!("{}/{}", namespace, name),
            None => name.clone(),
        };
        let now = Utc::now();

        let fetched = self.reconciler.fetch(obj).await?;
        let observation = self.reconciler.observe(obj, fetched, now);
        let plan = self.reconciler.plan(obj, &observation)?;

        for child in plan.to_delete() {
            info!("{} '{}': deleting {}", kind, id, child.describe());
            self.store.delete(&child.resource, &child.object).await?;
        }
        for child in plan.to_apply() {
            info!("{} '{}': applying {}", kind, id, child.describe());
            self.store.apply(&child.resource, &child.object).await?;
        }

        let projection = project_status(&self.reconciler, obj, &observation, now);
        for transition in &projection.transitions {
            info!(
                "{} '{}': condition {} {:?} -> {:?}",
                kind, id, transition.type_, transition.from, transition.to
            );
        }

        if projection.changed {
            let value = serde_json::to_value(&projection.status)?;
            self.store
                .patch_status(
                    &ApiResource::erase::<R::Object>(&()),
                    obj.namespace(),
                    name,
                    obj.resource_version(),
                    value,
                )
                .await?;
            info!("{} '{}': status patched to {}", kind, id, projection.coarse.as_str());
        }

        Ok(next_action(&plan, projection.transient, self.requeue))
    }
}

fn next_action(plan: &PlanResult, transient: bool, requeue: Duration) -> Action {
    match (transient, plan.requeue_after) {
        (true, Some(after)) if after < requeue => Action::requeue(after),
        (true, _) => Action::requeue(requeue),
        (false, Some(after)) => Action::requeue(after),
        (false, None) => Action::await_change(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::service::{AIMService, AIMServiceSpec, ServiceModel, ServicePhase};
    use crate::engine::store::MockObjectStore;
    use k8s_openapi::api::batch::v1::Job;
    use kube::api::ObjectMeta;
    use serde_json::Value;

    struct FakeReconciler {
        components: Vec<ComponentHealth>,
        child: Option<Job>,
    }

    #[async_trait]
    impl DomainReconciler for FakeReconciler {
        type Object = AIMService;
        type Fetched = ();
        type Observation = ();

        async fn fetch(&self, _obj: &AIMService) -> Result<(), Error> {
            Ok(())
        }

        fn observe(&self, _obj: &AIMService, _fetched: (), _now: DateTime<Utc>) {}

        fn plan(&self, _obj: &AIMService, _observation: &()) -> Result<PlanResult, Error> {
            let mut plan = PlanResult::new();
            if let Some(job) = &self.child {
                plan.apply(job)?;
            }
            Ok(plan)
        }

        fn components(&self, _observation: &()) -> Vec<ComponentHealth> {
            self.components.clone()
        }

        fn decorate_status(
            &self,
            _obj: &AIMService,
            _observation: &(),
            _status: &mut StatusOf<Self>,
            _conditions: &mut ConditionManager,
        ) {
        }
    }

    fn service() -> AIMService {
        let mut service = AIMService::new(
            "chat",
            AIMServiceSpec {
                model: ServiceModel {
                    ref_: Some("llama".into()),
                    image: None,
                },
                template_name: None,
                caching: None,
                cache_model: None,
                replicas: None,
                overrides: None,
                env: vec![],
            },
        );
        service.metadata.namespace = Some("ml".into());
        service.metadata.generation = Some(3);
        service.metadata.resource_version = Some("42".into());
        service
    }

    fn job() -> Job {
        Job {
            metadata: ObjectMeta {
                name: Some("child".into()),
                namespace: Some("ml".into()),
                ..ObjectMeta::default()
            },
            ..Job::default()
        }
    }

    fn ready() -> FakeReconciler {
        FakeReconciler {
            components: vec![ComponentHealth::ready("Model", "ModelResolved", "ok")],
            child: Some(job()),
        }
    }

    #[tokio::test]
    async fn test_run_applies_then_patches_status() {
        let mut store = MockObjectStore::new();
        store.expect_apply().times(1).returning(|_, _| Ok(()));
        store.expect_delete().never();
        store
            .expect_patch_status()
            .times(1)
            .withf(|_, namespace, name, version, status: &Value| {
                namespace.as_deref() == Some("ml")
                    && name == "chat"
                    && version.as_deref() == Some("42")
                    && status["status"] == "Running"
                    && status["observedGeneration"] == 3
            })
            .returning(|_, _, _, _, _| Ok(()));

        let pipeline = Pipeline::new(ready(), Arc::new(store), Duration::from_secs(30));
        let action = pipeline.run(&service()).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn test_apply_error_leaves_status_untouched() {
        let mut store = MockObjectStore::new();
        store
            .expect_apply()
            .times(1)
            .returning(|_, _| Err(Error::MissingKey(".metadata.name")));
        store.expect_patch_status().never();

        let pipeline = Pipeline::new(ready(), Arc::new(store), Duration::from_secs(30));
        assert!(pipeline.run(&service()).await.is_err());
    }

    #[tokio::test]
    async fn test_unchanged_status_is_not_patched() {
        let reconciler = ready();
        let mut obj = service();
        let projection = project_status(&reconciler, &obj, &(), Utc::now());
        assert_eq!(projection.status.status, ServicePhase::Running);
        obj.status = Some(projection.status);

        let mut store = MockObjectStore::new();
        store.expect_apply().times(1).returning(|_, _| Ok(()));
        store.expect_patch_status().never();

        let pipeline = Pipeline::new(reconciler, Arc::new(store), Duration::from_secs(30));
        pipeline.run(&obj).await.unwrap();
    }

    #[test]
    fn test_transient_component_holds_generation() {
        let reconciler = FakeReconciler {
            components: vec![
                ComponentHealth::ready("Model", "ModelResolved", "ok"),
                ComponentHealth::degraded("Template", "TemplateFetchFailed", "timeout").transient(),
            ],
            child: None,
        };
        let projection = project_status(&reconciler, &service(), &(), Utc::now());
        assert!(projection.transient);
        assert_eq!(projection.coarse, AimStatus::Degraded);
        assert_eq!(projection.status.observed_generation, None);
        assert_eq!(projection.status.status, ServicePhase::Degraded);
    }

    #[test]
    fn test_next_action() {
        let mut plan = PlanResult::new();
        assert_eq!(next_action(&plan, false, Duration::from_secs(30)), Action::await_change());
        assert_eq!(next_action(&plan, true, Duration::from_secs(30)), Action::requeue(Duration::from_secs(30)));
        plan.requeue(Duration::from_secs(5));
        assert_eq!(next_action(&plan, false, Duration::from_secs(30)), Action::requeue(Duration::from_secs(5)));
        assert_eq!(next_action(&plan, true, Duration::from_secs(30)), Action::requeue(Duration::from_secs(5)));
    }
}
