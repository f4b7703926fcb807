use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kube::{
    api::{Api, ListParams, ObjectMeta},
    client::Client,
    ResourceExt,
};
use log::{debug, info};
use tokio_util::sync::CancellationToken;

use crate::crd::common::{LABEL_MANAGED_BY, LABEL_MODEL_SOURCE, MANAGED_BY};
use crate::crd::model::{AIMClusterModel, AIMClusterModelSpec};
use crate::engine::{
    ComponentHealth, ConditionManager, DomainReconciler, FetchPolicy, FetchResult, PlanResult,
};
use crate::errors::Error;
use crate::registry::{compose_filter_health, scan_filters, FilterResult, ImageRegistry, RegistryImage};
use crate::utils::{sanitize_name_component, short_hash, MAX_NAME_LENGTH};

pub mod model_source;
pub use model_source::*;

pub const COMPONENT_EXISTING_MODELS: &str = "ExistingModels";
pub const CONDITION_LIMIT_REACHED: &str = "MaxModelsLimitReached";

/// How the scanned images relate to the catalog this source already produced.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Composition {
    /// Images to add this pass, already cut to the remaining capacity.
    pub new_images: Vec<RegistryImage>,
    /// Distinct images matched by the filters plus the ones this source created before.
    pub total_filtered: usize,
    /// Catalog entries of this source once `new_images` exist.
    pub total_discovered: usize,
    pub limit_reached: bool,
}

/// Diff scan results against the catalog.
///
/// Entries are keyed by image URI. Images already in the catalog are never created again,
/// whoever created them; only entries labelled with `source` count towards `max_models`.
pub fn compose(source: &str, existing: &[AIMClusterModel], results: &[FilterResult], max_models: usize) -> Composition {
    let catalog: BTreeSet<&str> = existing.iter().map(|m| m.spec.image.as_str()).collect();
    let own: BTreeSet<&str> = existing
        .iter()
        .filter(|m| m.labels().get(LABEL_MODEL_SOURCE).map(String::as_str) == Some(source))
        .map(|m| m.spec.image.as_str())
        .collect();

    let mut discovered: BTreeMap<String, &RegistryImage> = BTreeMap::new();
    for image in results.iter().flat_map(|r| r.images.iter()) {
        discovered.entry(image.uri()).or_insert(image);
    }

    let filtered: BTreeSet<&str> = discovered.keys().map(String::as_str).chain(own.iter().copied()).collect();
    let candidates: Vec<&RegistryImage> = discovered
        .iter()
        .filter(|(uri, _)| !catalog.contains(uri.as_str()))
        .map(|(_, image)| *image)
        .collect();

    let capacity = max_models.saturating_sub(own.len());
    let new_images: Vec<RegistryImage> = candidates.iter().take(capacity).map(|i| (*i).clone()).collect();

    Composition {
        total_filtered: filtered.len(),
        total_discovered: own.len() + new_images.len(),
        limit_reached: candidates.len() > capacity,
        new_images,
    }
}

/// `<repository>-<tag>-<hash8>`, the hash taken over the full image URI.
pub fn model_name_for(image: &RegistryImage) -> String {
    let uri = image.uri();
    let hash = short_hash(uri.as_bytes(), 8);
    let repo = image.repository.rsplit('/').next().unwrap_or(&image.repository);
    let base = sanitize_name_component(&format!("{}-{}", repo, image.tag));
    let base: String = base.chars().take(MAX_NAME_LENGTH - hash.len() - 1).collect();
    let base = base.trim_end_matches('-');
    if base.is_empty() {
        hash
    } else {
        format!("{}-{}", base, hash)
    }
}

/// Catalog entry for a discovered image. No owner: entries outlive their source.
pub fn build_cluster_model(source: &str, image: &RegistryImage) -> AIMClusterModel {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string());
    labels.insert(LABEL_MODEL_SOURCE.to_string(), source.to_string());

    AIMClusterModel {
        metadata: ObjectMeta {
            name: Some(model_name_for(image)),
            labels: Some(labels),
            ..ObjectMeta::default()
        },
        spec: AIMClusterModelSpec {
            image: image.uri(),
            description: Some(format!("Discovered by model source {}", source)),
        },
        status: None,
    }
}

pub struct SourceFetch {
    pub existing: FetchResult<Vec<AIMClusterModel>>,
    pub results: Vec<FilterResult>,
}

pub struct SourceObservation {
    pub existing: FetchResult<Vec<AIMClusterModel>>,
    pub results: Vec<FilterResult>,
    /// None when the catalog could not be listed.
    pub composition: Option<Composition>,
    pub now: DateTime<Utc>,
}

pub struct ModelSourceReconciler {
    pub client: Client,
    pub registry: Arc<dyn ImageRegistry>,
    pub workers: usize,
    pub scan_timeout: Duration,
    pub resync: Duration,
}

impl ModelSourceReconciler {
    /// Scan every filter, giving up on outstanding registry calls after `scan_timeout`.
    async fn scan(&self, source: &AIMClusterModelSource) -> Vec<FilterResult> {
        let cancel = CancellationToken::new();
        let deadline = cancel.clone();
        let timeout = self.scan_timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            deadline.cancel();
        });

        let results = scan_filters(
            self.registry.as_ref(),
            source.spec.registry.as_deref(),
            &source.spec.filters,
            self.workers,
            cancel,
        )
        .await;
        timer.abort();
        results
    }
}

#[async_trait]
impl DomainReconciler for ModelSourceReconciler {
    type Object = AIMClusterModelSource;
    type Fetched = SourceFetch;
    type Observation = SourceObservation;

    async fn fetch(&self, source: &AIMClusterModelSource) -> Result<SourceFetch, Error> {
        let models: Api<AIMClusterModel> = Api::all(self.client.clone());
        let existing = FetchResult::from_kube(models.list(&ListParams::default()).await.map(|l| l.items));
        let results = self.scan(source).await;
        debug!(
            "Model source '{}' scanned {} filters",
            source.name_any(),
            results.len()
        );
        Ok(SourceFetch { existing, results })
    }

    fn observe(&self, source: &AIMClusterModelSource, fetched: SourceFetch, now: DateTime<Utc>) -> SourceObservation {
        let composition = fetched
            .existing
            .value()
            .map(|existing| compose(&source.name_any(), existing, &fetched.results, source.spec.max_models()));
        SourceObservation {
            existing: fetched.existing,
            results: fetched.results,
            composition,
            now,
        }
    }

    fn plan(&self, source: &AIMClusterModelSource, observation: &SourceObservation) -> Result<PlanResult, Error> {
        let mut plan = PlanResult::new();
        if let Some(composition) = &observation.composition {
            for image in &composition.new_images {
                info!("Model source '{}' adding {}", source.name_any(), image);
                plan.apply(&build_cluster_model(&source.name_any(), image))?;
            }
        }
        plan.requeue(self.resync);
        Ok(plan)
    }

    fn components(&self, observation: &SourceObservation) -> Vec<ComponentHealth> {
        let existing = observation
            .existing
            .to_component_health(COMPONENT_EXISTING_MODELS, FetchPolicy::downstream(), |models| {
                ComponentHealth::ready(
                    COMPONENT_EXISTING_MODELS,
                    "CatalogListed",
                    format!("{} catalog entries listed", models.len()),
                )
            });
        vec![existing, compose_filter_health(&observation.results)]
    }

    fn decorate_status(
        &self,
        source: &AIMClusterModelSource,
        observation: &SourceObservation,
        status: &mut AIMClusterModelSourceStatus,
        conditions: &mut ConditionManager,
    ) {
        let composition = match &observation.composition {
            Some(composition) => composition,
            None => return,
        };

        let discovered = composition.total_discovered as u32;
        let available = composition.total_filtered as u32;
        // Only a sync that changed the catalog moves the timestamp, so an identical rescan
        // leaves status untouched.
        let synced = status.last_sync_time.is_none()
            || !composition.new_images.is_empty()
            || status.discovered_models != discovered
            || status.available_models != available
            || status.models_limit_reached != composition.limit_reached;

        status.discovered_models = discovered;
        status.available_models = available;
        status.models_limit_reached = composition.limit_reached;
        if synced {
            status.last_sync_time = Some(observation.now);
        }

        if composition.limit_reached {
            conditions.mark_true(
                CONDITION_LIMIT_REACHED,
                "LimitReached",
                &format!(
                    "{} of {} matching images added, maxModels is {}",
                    composition.total_discovered,
                    composition.total_filtered,
                    source.spec.max_models()
                ),
            );
        } else {
            conditions.mark_false(CONDITION_LIMIT_REACHED, "WithinLimit", "");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::offline_client;
    use crate::engine::pipeline::project_status;
    use crate::registry::HttpRegistry;
    use chrono::TimeZone;

    fn image(repo: &str, tag: &str) -> RegistryImage {
        RegistryImage {
            registry: "ghcr.io".into(),
            repository: repo.into(),
            tag: tag.into(),
        }
    }

    fn found(images: Vec<RegistryImage>) -> FilterResult {
        FilterResult {
            filter: ModelSourceFilter {
                image: "ghcr.io/amd/aim-*".into(),
                exclude: vec![],
                tag: None,
            },
            images,
            error: None,
        }
    }

    #[test]
    fn test_existing_entries_are_not_recreated() {
        let existing = vec![build_cluster_model("amd", &image("amd/aim-llama", "0.8.4"))];
        let results = vec![found(vec![
            image("amd/aim-llama", "0.8.4"),
            image("amd/aim-mistral", "0.8.4"),
            image("amd/aim-qwen", "0.8.4"),
        ])];

        let composition = compose("amd", &existing, &results, 100);
        assert_eq!(composition.new_images.len(), 2);
        assert_eq!(composition.total_discovered, 3);
        assert_eq!(composition.total_filtered, 3);
        assert!(!composition.limit_reached);
    }

    #[test]
    fn test_limit_truncates_new_entries() {
        let existing = vec![build_cluster_model("amd", &image("amd/aim-old", "0.1"))];
        let results = vec![found(vec![
            image("amd/aim-a", "1"),
            image("amd/aim-b", "1"),
            image("amd/aim-c", "1"),
        ])];

        let composition = compose("amd", &existing, &results, 2);
        assert_eq!(composition.new_images, vec![image("amd/aim-a", "1")]);
        assert_eq!(composition.total_filtered, 4);
        assert_eq!(composition.total_discovered, 2);
        assert!(composition.limit_reached);
    }

    #[test]
    fn test_duplicates_across_filters_count_once() {
        let results = vec![
            found(vec![image("amd/aim-a", "1")]),
            found(vec![image("amd/aim-a", "1"), image("amd/aim-b", "1")]),
        ];
        let composition = compose("amd", &[], &results, 100);
        assert_eq!(composition.new_images.len(), 2);
        assert_eq!(composition.total_filtered, 2);
    }

    #[test]
    fn test_entries_of_other_sources_do_not_count_towards_limit() {
        let existing = vec![build_cluster_model("other", &image("amd/aim-a", "1"))];
        let results = vec![found(vec![image("amd/aim-a", "1"), image("amd/aim-b", "1")])];
        let composition = compose("amd", &existing, &results, 1);
        assert_eq!(composition.new_images, vec![image("amd/aim-b", "1")]);
        assert_eq!(composition.total_discovered, 1);
        assert!(!composition.limit_reached);
    }

    #[test]
    fn test_model_name_for() {
        let name = model_name_for(&image("amd/aim-Llama_3.1", "0.8.4"));
        assert!(name.starts_with("aim-llama-3-1-0-8-4-"));
        assert_eq!(name.len(), "aim-llama-3-1-0-8-4-".len() + 8);

        let long = image(&"x".repeat(80), "latest");
        assert!(model_name_for(&long).len() <= MAX_NAME_LENGTH);
        assert_ne!(model_name_for(&long), model_name_for(&image(&"x".repeat(80), "other")));
    }

    fn source() -> AIMClusterModelSource {
        let mut source = AIMClusterModelSource::new(
            "amd",
            AIMClusterModelSourceSpec {
                registry: Some("ghcr.io".into()),
                filters: vec![],
                max_models: None,
            },
        );
        source.metadata.generation = Some(1);
        source
    }

    fn pass(
        reconciler: &ModelSourceReconciler,
        source: &mut AIMClusterModelSource,
        existing: Vec<AIMClusterModel>,
        images: Vec<RegistryImage>,
        now: DateTime<Utc>,
    ) -> bool {
        let fetched = SourceFetch {
            existing: FetchResult::Found(existing),
            results: vec![found(images)],
        };
        let observation = reconciler.observe(&*source, fetched, now);
        let projection = project_status(reconciler, &*source, &observation, now);
        source.status = Some(projection.status);
        projection.changed
    }

    #[tokio::test]
    async fn test_identical_rescan_leaves_status_unchanged() {
        let reconciler = ModelSourceReconciler {
            client: offline_client(),
            registry: Arc::new(HttpRegistry::new(Duration::from_secs(1)).unwrap()),
            workers: 1,
            scan_timeout: Duration::from_secs(1),
            resync: Duration::from_secs(600),
        };
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let later = |secs| t0 + chrono::Duration::seconds(secs);
        let images = vec![image("amd/aim-a", "1"), image("amd/aim-b", "1")];
        let catalog: Vec<_> = images.iter().map(|i| build_cluster_model("amd", i)).collect();
        let mut source = source();

        assert!(pass(&reconciler, &mut source, vec![], images.clone(), t0));
        // catalog listing now shows the created entries
        assert!(pass(&reconciler, &mut source, catalog.clone(), images.clone(), later(1)));
        assert!(!pass(&reconciler, &mut source, catalog.clone(), images.clone(), later(2)));
        assert!(!pass(&reconciler, &mut source, catalog.clone(), images.clone(), later(600)));

        let status = source.status.clone().unwrap();
        assert_eq!(status.last_sync_time, Some(t0));
        assert_eq!(status.discovered_models, 2);

        let mut grown = images.clone();
        grown.push(image("amd/aim-c", "1"));
        assert!(pass(&reconciler, &mut source, catalog, grown, later(1200)));
        assert_eq!(source.status.unwrap().last_sync_time, Some(later(1200)));
    }

    #[test]
    fn test_built_model_has_no_owner() {
        let model = build_cluster_model("amd", &image("amd/aim-a", "1"));
        assert!(model.metadata.owner_references.is_none());
        assert_eq!(model.labels().get(LABEL_MODEL_SOURCE).unwrap(), "amd");
        assert_eq!(model.spec.image, "ghcr.io/amd/aim-a:1");
    }
}
