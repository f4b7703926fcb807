use std::fmt::Debug;
use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::{
    batch::v1::Job,
    core::v1::{Node, Pod},
};
use kube::{
    api::{Api, ListParams, LogParams},
    client::Client,
    Resource, ResourceExt,
};
use log::{debug, info, warn};
use serde::{de::DeserializeOwned, Serialize};

use crate::crd::common::{DiscoveryState, HardwareRequirement, Scope, LABEL_COMPONENT};
use crate::crd::model::{resolve_model, ModelRef};
use crate::engine::{
    AimStatus, ComponentHealth, ConditionManager, DomainReconciler, FetchResult, HasStatus, NotAvailablePolicy,
    PlanResult,
};
use crate::errors::Error;
use crate::gpu::{gpu_capacity_from_nodes, match_hardware, GpuCapacity};
use crate::resolve::Resolution;
use crate::utils::object_to_owner_reference;

pub mod discovery;
pub mod job;
pub mod template;

pub use discovery::{BreakerPhase, BreakerPolicy, DiscoveryOutput};
pub use template::*;

use discovery::{
    evaluate, next_attempt_time, parse_discovery_output, record_attempt, spec_hash, JobOutcome, ObservedJob,
};
use job::{
    belongs_to, build_discovery_job, discovery_job_name, job_attempt, job_state, matches_spec_hash,
    DiscoveryJobParams, JobState, DISCOVERY_COMPONENT_LABEL, DISCOVERY_CONTAINER,
};

pub const COMPONENT_MODEL: &str = "Model";
pub const COMPONENT_DISCOVERY: &str = "Discovery";

/// Delay before retrying creation while the global job cap is reached.
pub const THROTTLE_REQUEUE: Duration = Duration::from_secs(5);

/// Operations shared by namespaced and cluster templates.
pub trait TemplateKind:
    Resource<DynamicType = ()>
    + HasStatus<Status = TemplateStatus>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    const SCOPE: Scope;

    fn common(&self) -> &TemplateSpecCommon;
}

impl TemplateKind for AIMServiceTemplate {
    const SCOPE: Scope = Scope::Namespace;

    fn common(&self) -> &TemplateSpecCommon {
        &self.spec.common
    }
}

impl TemplateKind for AIMClusterServiceTemplate {
    const SCOPE: Scope = Scope::Cluster;

    fn common(&self) -> &TemplateSpecCommon {
        &self.spec.common
    }
}

#[derive(Clone, Debug)]
pub struct DiscoverySettings {
    /// Namespace running the jobs of cluster templates.
    pub operator_namespace: String,
    pub service_account: Option<String>,
    pub policy: BreakerPolicy,
    pub max_active_jobs: usize,
    /// Poll interval while a job runs or the model is missing.
    pub requeue: Duration,
}

pub struct TemplateFetch {
    pub model: Resolution<ModelRef>,
    pub capacity: FetchResult<GpuCapacity>,
    /// Every discovery job in the cluster, for the concurrency cap.
    pub jobs: FetchResult<Vec<Job>>,
    /// Log of the succeeded pod of the newest completed job for the current hash.
    pub log: Option<FetchResult<String>>,
}

/// Where discovery stands after this pass.
#[derive(Clone, Debug, PartialEq)]
pub enum DiscoveryPhase {
    /// Job created this pass, with its attempt number.
    Created(u32),
    Throttled,
    Running,
    Succeeded,
    Backoff(Duration),
}

#[derive(Debug)]
pub enum DiscoveryView {
    /// Sources given inline, nothing to discover.
    Inline,
    AwaitingModel,
    JobsUnavailable(String),
    Breaker(BreakerView),
}

#[derive(Debug)]
pub struct BreakerView {
    pub spec_hash: String,
    pub image: String,
    pub phase: DiscoveryPhase,
    pub state: DiscoveryState,
    pub reset: bool,
    /// Name of the job created this pass.
    pub job_name: Option<String>,
    pub output: Option<DiscoveryOutput>,
    /// Active jobs left over from a previous spec hash.
    pub stale_jobs: Vec<Job>,
    /// Set when the result of a finished job could not be read.
    pub unreadable: Option<String>,
}

#[derive(Debug)]
pub struct TemplateObservation {
    pub model: Resolution<ModelRef>,
    pub gpu: ComponentHealth,
    pub discovery: DiscoveryView,
}

fn own_jobs<'a>(jobs: &'a [Job], name: &str, scope: Scope) -> impl Iterator<Item = &'a Job> {
    let name = name.to_string();
    jobs.iter().filter(move |j| belongs_to(j, &name, scope))
}

/// Newest job of this template for `hash`.
fn current_job<'a>(jobs: &'a [Job], name: &str, scope: Scope, hash: &str) -> Option<&'a Job> {
    own_jobs(jobs, name, scope)
        .filter(|j| matches_spec_hash(j, hash))
        .max_by_key(|j| job_attempt(j))
}

/// Derive the discovery view of a template from what was fetched.
pub fn observe_discovery(
    name: &str,
    scope: Scope,
    spec: &TemplateSpecCommon,
    status: Option<&TemplateStatus>,
    fetched: &TemplateFetch,
    now: DateTime<Utc>,
    settings: &DiscoverySettings,
) -> DiscoveryView {
    if !spec.model_sources.is_empty() {
        return DiscoveryView::Inline;
    }
    let image = match fetched.model.resolved() {
        Some(resolved) => resolved.value.image.clone(),
        None => return DiscoveryView::AwaitingModel,
    };
    let log = fetched.log.as_ref();
    let jobs = match &fetched.jobs {
        FetchResult::Found(jobs) => jobs.as_slice(),
        FetchResult::NotFound => &[][..],
        FetchResult::Error(err) => return DiscoveryView::JobsUnavailable(err.to_string()),
    };

    let hash = spec_hash(spec, &image);
    let mut unreadable = None;
    let observed = current_job(jobs, name, scope, &hash).map(|job| {
        let outcome = match job_state(job) {
            JobState::Active => JobOutcome::Running,
            JobState::Failed(reason) => JobOutcome::Failed(reason),
            JobState::Complete => match log {
                Some(FetchResult::Found(log)) => match parse_discovery_output(log) {
                    Ok(output) => JobOutcome::Succeeded(output),
                    Err(err) => JobOutcome::Failed(format!("MalformedDiscoveryOutput: {}", err)),
                },
                Some(FetchResult::Error(err)) => {
                    unreadable = Some(err.to_string());
                    JobOutcome::Running
                }
                Some(FetchResult::NotFound) | None => JobOutcome::Failed("DiscoveryPodNotFound".to_string()),
            },
        };
        ObservedJob {
            name: job.name_any(),
            attempt: job_attempt(job),
            created: job.creation_timestamp().map(|t| t.0),
            outcome,
        }
    });

    let has_result = status
        .map(|s| !s.model_sources.is_empty() || s.profile.is_some())
        .unwrap_or(false);
    let decision = evaluate(
        status.and_then(|s| s.discovery.as_ref()),
        &hash,
        observed.as_ref(),
        has_result,
        now,
        &settings.policy,
    );

    let mut state = decision.state;
    let phase = match decision.phase {
        BreakerPhase::Create => {
            let active = jobs.iter().filter(|j| job_state(j) == JobState::Active).count();
            if active >= settings.max_active_jobs {
                DiscoveryPhase::Throttled
            } else {
                record_attempt(&mut state, now);
                DiscoveryPhase::Created(state.attempts)
            }
        }
        BreakerPhase::AwaitingResult => DiscoveryPhase::Running,
        BreakerPhase::Succeeded => DiscoveryPhase::Succeeded,
        BreakerPhase::Backoff(remaining) => DiscoveryPhase::Backoff(remaining),
    };

    let output = match observed.map(|o| o.outcome) {
        Some(JobOutcome::Succeeded(output)) => Some(output),
        _ => None,
    };
    let stale_jobs = own_jobs(jobs, name, scope)
        .filter(|j| !matches_spec_hash(j, &hash) && job_state(j) == JobState::Active)
        .cloned()
        .collect();
    let job_name = match phase {
        DiscoveryPhase::Created(attempt) => Some(discovery_job_name(name, &hash, attempt)),
        _ => None,
    };

    DiscoveryView::Breaker(BreakerView {
        spec_hash: hash,
        image,
        phase,
        state,
        reset: decision.reset,
        job_name,
        output,
        stale_jobs,
        unreadable,
    })
}

pub fn discovery_health(view: &DiscoveryView, settings: &DiscoverySettings) -> ComponentHealth {
    let c = COMPONENT_DISCOVERY;
    let breaker = match view {
        DiscoveryView::Inline => return ComponentHealth::ready(c, "InlineModelSources", "Model sources given in spec"),
        DiscoveryView::AwaitingModel => {
            return ComponentHealth::pending(c, "AwaitingModel", "Discovery waits for the model to resolve")
        }
        DiscoveryView::JobsUnavailable(err) => {
            return ComponentHealth::degraded(c, "DiscoveryFetchFailed", format!("Cannot list discovery jobs: {}", err))
                .transient()
        }
        DiscoveryView::Breaker(breaker) => breaker,
    };

    if let Some(err) = &breaker.unreadable {
        return ComponentHealth::degraded(c, "DiscoveryResultUnavailable", format!("Cannot read discovery result: {}", err))
            .transient();
    }

    match &breaker.phase {
        DiscoveryPhase::Succeeded => ComponentHealth::ready(c, "DiscoveryComplete", "Discovery completed"),
        DiscoveryPhase::Created(attempt) => {
            ComponentHealth::progressing(c, "DiscoveryJobCreated", format!("Discovery attempt {} started", attempt))
        }
        DiscoveryPhase::Running => ComponentHealth::progressing(c, "DiscoveryRunning", "Discovery job is running"),
        DiscoveryPhase::Throttled => ComponentHealth::progressing(
            c,
            "DiscoveryThrottled",
            format!("{} discovery jobs already running", settings.max_active_jobs),
        ),
        DiscoveryPhase::Backoff(_) => {
            let next = next_attempt_time(&breaker.state, &settings.policy)
                .map(|at| format!("next attempt at {}", at.to_rfc3339_opts(SecondsFormat::Secs, true)))
                .unwrap_or_else(|| "next attempt pending".to_string());
            ComponentHealth::degraded(
                c,
                "DiscoveryBackoff",
                format!(
                    "Attempt {} failed: {}. Backing off, {}",
                    breaker.state.attempts,
                    breaker.state.last_failure_reason.as_deref().unwrap_or("unknown"),
                    next
                ),
            )
        }
    }
}

/// Copy the breaker outcome and discovery results into `status`.
pub fn decorate_discovery(view: &DiscoveryView, spec: &TemplateSpecCommon, status: &mut TemplateStatus) {
    match view {
        DiscoveryView::Inline => {
            status.model_sources = spec.model_sources.clone();
            status.discovery = None;
            status.discovery_job = None;
        }
        DiscoveryView::AwaitingModel | DiscoveryView::JobsUnavailable(_) => {}
        DiscoveryView::Breaker(breaker) => {
            if breaker.reset {
                status.model_sources.clear();
                status.profile = None;
                status.discovery_job = None;
            }
            if breaker.job_name.is_some() {
                status.discovery_job = breaker.job_name.clone();
            }
            if let Some(output) = &breaker.output {
                status.model_sources = output.model_sources.clone();
                status.profile = Some(output.profile.clone());
            }
            status.discovery = Some(breaker.state.clone());
        }
    }
}

pub struct TemplateReconciler<K> {
    pub client: Client,
    pub settings: DiscoverySettings,
    kind: PhantomData<fn() -> K>,
}

impl<K: TemplateKind> TemplateReconciler<K> {
    pub fn new(client: Client, settings: DiscoverySettings) -> Self {
        TemplateReconciler {
            client,
            settings,
            kind: PhantomData,
        }
    }

    fn job_namespace(&self, template: &K) -> String {
        match K::SCOPE {
            Scope::Namespace => template.namespace().unwrap_or_default(),
            Scope::Cluster => self.settings.operator_namespace.clone(),
        }
    }

    /// Log of the succeeded pod of `job`.
    async fn job_log(&self, job: &Job) -> FetchResult<String> {
        let namespace = job.namespace().unwrap_or_default();
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);
        let params = ListParams::default().labels(&format!("job-name={}", job.name_any()));
        let pod = match pods.list(&params).await {
            Ok(list) => list
                .items
                .into_iter()
                .find(|p| p.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Succeeded")),
            Err(err) => return FetchResult::Error(err.into()),
        };
        let pod = match pod {
            Some(pod) => pod,
            None => return FetchResult::NotFound,
        };
        let log_params = LogParams {
            container: Some(DISCOVERY_CONTAINER.to_string()),
            ..LogParams::default()
        };
        FetchResult::from_kube(pods.logs(&pod.name_any(), &log_params).await)
    }
}

#[async_trait]
impl<K: TemplateKind> DomainReconciler for TemplateReconciler<K> {
    type Object = K;
    type Fetched = TemplateFetch;
    type Observation = TemplateObservation;

    fn not_available_policy(&self) -> NotAvailablePolicy {
        NotAvailablePolicy::Surface
    }

    async fn fetch(&self, template: &K) -> Result<TemplateFetch, Error> {
        let spec = template.common();
        let namespace = match K::SCOPE {
            Scope::Namespace => template.namespace(),
            Scope::Cluster => None,
        };
        let model = resolve_model(&self.client, namespace.as_deref(), &spec.model_name).await;

        let nodes: Api<Node> = Api::all(self.client.clone());
        let capacity = FetchResult::from_kube(
            nodes
                .list(&ListParams::default())
                .await
                .map(|list| gpu_capacity_from_nodes(&list.items)),
        );

        let jobs: Api<Job> = Api::all(self.client.clone());
        let selector = format!("{}={}", LABEL_COMPONENT, DISCOVERY_COMPONENT_LABEL);
        let jobs = FetchResult::from_kube(jobs.list(&ListParams::default().labels(&selector)).await.map(|l| l.items));

        let mut log = None;
        if let (Some(resolved), Some(all)) = (model.resolved(), jobs.value()) {
            let hash = spec_hash(spec, &resolved.value.image);
            if let Some(job) = current_job(all, &template.name_any(), K::SCOPE, &hash) {
                if job_state(job) == JobState::Complete {
                    debug!("Reading discovery result of job '{}'", job.name_any());
                    log = Some(self.job_log(job).await);
                }
            }
        }

        Ok(TemplateFetch {
            model,
            capacity,
            jobs,
            log,
        })
    }

    fn observe(&self, template: &K, fetched: TemplateFetch, now: DateTime<Utc>) -> TemplateObservation {
        let spec = template.common();
        let requirement = HardwareRequirement {
            gpu: spec.gpu.clone(),
            cpu: None,
        };
        let gpu = match_hardware(&requirement, &fetched.capacity);
        let discovery = observe_discovery(
            &template.name_any(),
            K::SCOPE,
            spec,
            template.status(),
            &fetched,
            now,
            &self.settings,
        );
        TemplateObservation {
            model: fetched.model,
            gpu,
            discovery,
        }
    }

    fn plan(&self, template: &K, observation: &TemplateObservation) -> Result<PlanResult, Error> {
        let mut plan = PlanResult::new();
        let name = template.name_any();

        if !observation.model.ok() {
            plan.requeue(self.settings.requeue);
        }

        let breaker = match &observation.discovery {
            DiscoveryView::Breaker(breaker) => breaker,
            _ => return Ok(plan),
        };

        for stale in &breaker.stale_jobs {
            info!("Template '{}': stopping discovery job '{}' of an outdated spec", name, stale.name_any());
            plan.delete(stale)?;
        }

        match &breaker.phase {
            DiscoveryPhase::Created(attempt) => {
                let namespace = self.job_namespace(template);
                let job = build_discovery_job(&DiscoveryJobParams {
                    template_name: &name,
                    scope: K::SCOPE,
                    namespace: &namespace,
                    image: &breaker.image,
                    spec: template.common(),
                    spec_hash: &breaker.spec_hash,
                    attempt: *attempt,
                    service_account: self.settings.service_account.as_deref(),
                    owner: object_to_owner_reference::<K>(template.meta())?,
                })?;
                info!("Template '{}': starting discovery attempt {}", name, attempt);
                plan.apply(&job)?;
                plan.requeue(self.settings.requeue);
            }
            DiscoveryPhase::Running => plan.requeue(self.settings.requeue),
            DiscoveryPhase::Throttled => {
                warn!("Template '{}': discovery throttled, job cap reached", name);
                plan.requeue(THROTTLE_REQUEUE);
            }
            DiscoveryPhase::Backoff(remaining) => plan.requeue(*remaining),
            DiscoveryPhase::Succeeded => {}
        }
        Ok(plan)
    }

    fn components(&self, observation: &TemplateObservation) -> Vec<ComponentHealth> {
        let model = observation
            .model
            .to_component_health(COMPONENT_MODEL, AimStatus::Failed, |resolved| {
                ComponentHealth::ready(
                    COMPONENT_MODEL,
                    "ModelResolved",
                    format!("Resolved {} '{}'", resolved.reference.kind, resolved.reference.name),
                )
            });
        vec![
            model,
            observation.gpu.clone(),
            discovery_health(&observation.discovery, &self.settings),
        ]
    }

    fn decorate_status(
        &self,
        template: &K,
        observation: &TemplateObservation,
        status: &mut TemplateStatus,
        _conditions: &mut ConditionManager,
    ) {
        status.resolved_model = observation.model.reference().cloned();
        decorate_discovery(&observation.discovery, template.common(), status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::common::GpuRequirement;
    use crate::engine::offline_client;
    use crate::engine::pipeline::project_status;
    use crate::resolve::Resolved;
    use chrono::TimeZone;
    use k8s_openapi::api::batch::v1::{JobCondition, JobStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{OwnerReference, Time};

    const IMAGE: &str = "ghcr.io/amd/llama:0.8.4";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn settings(max_active_jobs: usize) -> DiscoverySettings {
        DiscoverySettings {
            operator_namespace: "aim-system".into(),
            service_account: None,
            policy: BreakerPolicy {
                base: Duration::from_secs(60),
                max: Duration::from_secs(3600),
            },
            max_active_jobs,
            requeue: Duration::from_secs(30),
        }
    }

    fn spec() -> TemplateSpecCommon {
        TemplateSpecCommon {
            model_name: "llama".into(),
            ..TemplateSpecCommon::default()
        }
    }

    fn fetched(jobs: Vec<Job>, log: Option<FetchResult<String>>) -> TemplateFetch {
        TemplateFetch {
            model: Resolution::Found(Resolved::cluster(
                ModelRef {
                    name: "llama".into(),
                    image: IMAGE.into(),
                },
                "AIMClusterModel",
                "llama",
            )),
            capacity: FetchResult::Found(GpuCapacity::new()),
            jobs: FetchResult::Found(jobs),
            log,
        }
    }

    fn job(template: &str, spec: &TemplateSpecCommon, attempt: u32, state: Option<&str>) -> Job {
        let hash = spec_hash(spec, IMAGE);
        let mut job = build_discovery_job(&DiscoveryJobParams {
            template_name: template,
            scope: Scope::Cluster,
            namespace: "aim-system",
            image: IMAGE,
            spec,
            spec_hash: &hash,
            attempt,
            service_account: None,
            owner: OwnerReference {
                api_version: "aim.eai.amd.com/v1alpha1".into(),
                kind: "AIMClusterServiceTemplate".into(),
                name: template.into(),
                uid: "uid".into(),
                ..OwnerReference::default()
            },
        })
        .unwrap();
        job.metadata.creation_timestamp = Some(Time(now()));
        job.status = state.map(|type_| JobStatus {
            conditions: Some(vec![JobCondition {
                type_: type_.into(),
                status: "True".into(),
                message: Some("pod failed".into()),
                ..JobCondition::default()
            }]),
            ..JobStatus::default()
        });
        job
    }

    fn breaker(view: DiscoveryView) -> BreakerView {
        match view {
            DiscoveryView::Breaker(breaker) => breaker,
            other => panic!("expected breaker view, got {:?}", other),
        }
    }

    #[test]
    fn test_inline_sources_skip_discovery() {
        let spec = TemplateSpecCommon {
            model_sources: vec![ModelSourceEntry {
                name: "weights".into(),
                source_uri: "hf://amd/llama".into(),
                size: None,
            }],
            ..spec()
        };
        let view = observe_discovery("llama", Scope::Cluster, &spec, None, &fetched(vec![], None), now(), &settings(10));
        assert!(matches!(view, DiscoveryView::Inline));
        assert_eq!(discovery_health(&view, &settings(10)).state, AimStatus::Ready);

        let mut status = TemplateStatus::default();
        decorate_discovery(&view, &spec, &mut status);
        assert_eq!(status.model_sources, spec.model_sources);
        assert_eq!(status.discovery, None);
    }

    #[test]
    fn test_first_pass_creates_job() {
        let view = breaker(observe_discovery("llama", Scope::Cluster, &spec(), None, &fetched(vec![], None), now(), &settings(10)));
        assert_eq!(view.phase, DiscoveryPhase::Created(1));
        assert_eq!(view.state.attempts, 1);
        assert_eq!(view.state.last_attempt_time, Some(now()));
        assert_eq!(view.job_name, Some(discovery_job_name("llama", &view.spec_hash, 1)));

        let mut status = TemplateStatus::default();
        decorate_discovery(&DiscoveryView::Breaker(view), &spec(), &mut status);
        assert_eq!(status.discovery.as_ref().map(|d| d.attempts), Some(1));
        assert!(status.discovery_job.is_some());
    }

    #[test]
    fn test_job_cap_throttles_without_counting() {
        let running = vec![job("other-a", &spec(), 1, None), job("other-b", &spec(), 1, None)];
        let view = observe_discovery("llama", Scope::Cluster, &spec(), None, &fetched(running, None), now(), &settings(2));
        let health = discovery_health(&view, &settings(2));
        let view = breaker(view);
        assert_eq!(view.phase, DiscoveryPhase::Throttled);
        assert_eq!(view.state.attempts, 0);
        assert_eq!(view.job_name, None);
        assert_eq!(health.reason, "DiscoveryThrottled");
    }

    #[test]
    fn test_completed_job_result_is_copied() {
        let log = r#"{"profile": {"metadata": {"gpu": "MI300X", "gpu_count": 1}}, "models": [{"name": "llama", "source": "hf://amd/llama", "size_gb": 1}]}"#;
        let jobs = vec![job("llama", &spec(), 1, Some("Complete"))];
        let view = breaker(observe_discovery(
            "llama",
            Scope::Cluster,
            &spec(),
            None,
            &fetched(jobs, Some(FetchResult::Found(log.into()))),
            now(),
            &settings(10),
        ));
        assert_eq!(view.phase, DiscoveryPhase::Succeeded);
        assert_eq!(view.state.attempts, 1);

        let mut status = TemplateStatus::default();
        decorate_discovery(&DiscoveryView::Breaker(view), &spec(), &mut status);
        assert_eq!(status.model_sources[0].source_uri, "hf://amd/llama");
        assert_eq!(status.profile.unwrap().metadata.gpu.as_deref(), Some("MI300X"));
    }

    #[test]
    fn test_malformed_result_backs_off() {
        let jobs = vec![job("llama", &spec(), 1, Some("Complete"))];
        let view = observe_discovery(
            "llama",
            Scope::Cluster,
            &spec(),
            None,
            &fetched(jobs, Some(FetchResult::Found("Traceback (most recent call last)".into()))),
            now() + chrono::Duration::seconds(10),
            &settings(10),
        );
        let health = discovery_health(&view, &settings(10));
        let view = breaker(view);
        assert_eq!(view.phase, DiscoveryPhase::Backoff(Duration::from_secs(110)));
        assert!(view.state.last_failure_reason.unwrap().starts_with("MalformedDiscoveryOutput"));
        assert_eq!(health.state, AimStatus::Degraded);
        assert!(!health.transient);
    }

    #[test]
    fn test_spec_change_resets_and_stops_stale_jobs() {
        let old = TemplateSpecCommon {
            precision: Some(crate::crd::common::Precision::Fp16),
            ..spec()
        };
        let status = TemplateStatus {
            discovery: Some(DiscoveryState {
                attempts: 4,
                last_attempt_time: Some(now()),
                last_failure_reason: Some("OOMKilled".into()),
                spec_hash: Some(spec_hash(&old, IMAGE)),
            }),
            model_sources: vec![ModelSourceEntry {
                name: "old".into(),
                source_uri: "hf://old".into(),
                size: None,
            }],
            ..TemplateStatus::default()
        };
        let jobs = vec![job("llama", &old, 4, None)];
        let view = breaker(observe_discovery(
            "llama",
            Scope::Cluster,
            &spec(),
            Some(&status),
            &fetched(jobs, None),
            now(),
            &settings(10),
        ));
        assert!(view.reset);
        assert_eq!(view.phase, DiscoveryPhase::Created(1));
        assert_eq!(view.stale_jobs.len(), 1);

        let mut status = status.clone();
        decorate_discovery(&DiscoveryView::Breaker(view), &spec(), &mut status);
        assert!(status.model_sources.is_empty());
        assert_eq!(status.discovery.unwrap().last_failure_reason, None);
    }

    #[tokio::test]
    async fn test_backoff_status_is_stable_between_passes() {
        let reconciler = TemplateReconciler::<AIMClusterServiceTemplate>::new(offline_client(), settings(10));
        let mut template = AIMClusterServiceTemplate::new("llama", AIMClusterServiceTemplateSpec { common: spec() });
        template.metadata.generation = Some(1);

        let pass = |template: &mut AIMClusterServiceTemplate, at: DateTime<Utc>| {
            let jobs = vec![job("llama", &spec(), 1, Some("Failed"))];
            let observation = reconciler.observe(&*template, fetched(jobs, None), at);
            let plan = reconciler.plan(&*template, &observation).unwrap();
            let projection = project_status(&reconciler, &*template, &observation, at);
            template.status = Some(projection.status);
            (projection.changed, plan.requeue_after)
        };

        let (changed, requeue) = pass(&mut template, now() + chrono::Duration::seconds(5));
        assert!(changed);
        assert_eq!(requeue, Some(Duration::from_secs(115)));

        let (changed, requeue) = pass(&mut template, now() + chrono::Duration::seconds(6));
        assert!(!changed);
        assert_eq!(requeue, Some(Duration::from_secs(114)));

        let status = template.status.unwrap();
        let condition = status.conditions.iter().find(|c| c.type_ == COMPONENT_DISCOVERY).unwrap();
        assert_eq!(condition.reason, "DiscoveryBackoff");
        assert!(condition.message.ends_with("next attempt at 2024-06-01T12:02:00Z"));
    }

    #[tokio::test]
    async fn test_absent_gpu_surfaces_not_available() {
        let reconciler = TemplateReconciler::<AIMClusterServiceTemplate>::new(offline_client(), settings(10));
        let spec = TemplateSpecCommon {
            gpu: Some(GpuRequirement {
                model: Some("MI355X".into()),
                requests: 1,
                min_vram: None,
            }),
            ..spec()
        };
        let template = AIMClusterServiceTemplate::new("llama", AIMClusterServiceTemplateSpec { common: spec });

        let observation = reconciler.observe(&template, fetched(vec![], None), now());
        let projection = project_status(&reconciler, &template, &observation, now());
        assert_eq!(projection.coarse, AimStatus::NotAvailable);
        assert_eq!(projection.status.status, AimStatus::NotAvailable);
    }

    #[test]
    fn test_unresolved_model_waits() {
        let mut f = fetched(vec![], None);
        f.model = Resolution::NotFound("llama".into());
        let view = observe_discovery("llama", Scope::Cluster, &spec(), None, &f, now(), &settings(10));
        assert!(matches!(view, DiscoveryView::AwaitingModel));
        assert_eq!(discovery_health(&view, &settings(10)).state, AimStatus::Pending);
    }
}
