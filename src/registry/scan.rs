use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use log::{debug, warn};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::crd::model_source::ModelSourceFilter;
use crate::errors::Error;

use super::{
    filter::{matches_filter, matches_wildcard, ParsedFilter},
    ImageRegistry, RegistryImage, DOCKER_REGISTRY,
};

/// Images gathered for one filter, possibly partial, with the error that cut it short.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterResult {
    pub filter: ModelSourceFilter,
    pub images: Vec<RegistryImage>,
    pub error: Option<String>,
}

struct Scanner<'a> {
    registry: &'a dyn ImageRegistry,
    default_registry: &'a str,
    limiter: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl<'a> Scanner<'a> {
    /// Run one registry call inside the worker pool, giving up when cancelled.
    async fn limited<T, F>(&self, work: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            result = async {
                let _permit = self.limiter.acquire().await.map_err(|_| Error::Cancelled)?;
                work.await
            } => result,
        }
    }

    async fn scan(&self, filter: &ModelSourceFilter) -> FilterResult {
        let parsed = ParsedFilter::parse(&filter.image);
        let registry = parsed
            .registry
            .clone()
            .unwrap_or_else(|| self.default_registry.to_string());

        let (mut images, error) = if parsed.is_static() {
            let image = RegistryImage {
                registry,
                repository: parsed.repository.clone(),
                tag: parsed.tag.clone().unwrap_or_default(),
            };
            let excluded = filter.exclude.iter().any(|e| e == &image.repository);
            (if excluded { vec![] } else { vec![image] }, None)
        } else if !parsed.repository_has_wildcard() {
            match self.tags_for(&registry, &parsed.repository, filter, &parsed).await {
                Ok(images) => (images, None),
                Err(err) => (vec![], Some(format!("{}: {}", parsed.repository, err))),
            }
        } else {
            self.scan_repositories(&registry, filter, &parsed).await
        };

        images.sort();
        images.dedup();
        FilterResult {
            filter: filter.clone(),
            images,
            error,
        }
    }

    async fn tags_for(
        &self,
        registry: &str,
        repository: &str,
        filter: &ModelSourceFilter,
        parsed: &ParsedFilter,
    ) -> Result<Vec<RegistryImage>, Error> {
        let tags = self.limited(self.registry.list_tags(registry, repository)).await?;
        Ok(tags
            .into_iter()
            .map(|tag| RegistryImage {
                registry: registry.to_string(),
                repository: repository.to_string(),
                tag,
            })
            .filter(|image| matches_filter(image, filter, parsed))
            .collect())
    }

    async fn scan_repositories(
        &self,
        registry: &str,
        filter: &ModelSourceFilter,
        parsed: &ParsedFilter,
    ) -> (Vec<RegistryImage>, Option<String>) {
        let namespace = match parsed.namespace() {
            Some(namespace) => namespace,
            None => {
                return (
                    vec![],
                    Some(format!("Cannot derive a namespace from pattern '{}'", filter.image)),
                )
            }
        };

        let repositories = match self.limited(self.registry.list_repositories(registry, &namespace)).await {
            Ok(repositories) => repositories,
            Err(err) => return (vec![], Some(format!("{}: {}", namespace, err))),
        };

        let matching: Vec<String> = repositories
            .into_iter()
            .filter(|repo| matches_wildcard(&parsed.repository, repo))
            .filter(|repo| !filter.exclude.iter().any(|e| e == repo))
            .collect();
        debug!("Filter '{}' matched {} repositories", filter.image, matching.len());

        let results = join_all(
            matching
                .iter()
                .map(|repo| self.tags_for(registry, repo, filter, parsed)),
        )
        .await;

        let mut images = Vec::new();
        let mut failures = Vec::new();
        for (repo, result) in matching.iter().zip(results) {
            match result {
                Ok(mut found) => images.append(&mut found),
                Err(err) => {
                    warn!("Listing tags of '{}' failed: {}", repo, err);
                    failures.push(format!("{}: {}", repo, err));
                }
            }
        }

        let error = if failures.is_empty() {
            None
        } else {
            Some(format!(
                "{} of {} repositories failed: {}",
                failures.len(),
                matching.len(),
                failures.join("; ")
            ))
        };
        (images, error)
    }
}

/// Scan every filter concurrently, with at most `workers` registry calls in flight.
///
/// Each filter yields its own result; a failing filter or repository never aborts the
/// others. Once `cancel` fires, outstanding calls stop and whatever was gathered is returned.
pub async fn scan_filters(
    registry: &dyn ImageRegistry,
    default_registry: Option<&str>,
    filters: &[ModelSourceFilter],
    workers: usize,
    cancel: CancellationToken,
) -> Vec<FilterResult> {
    let scanner = Scanner {
        registry,
        default_registry: default_registry.unwrap_or(DOCKER_REGISTRY),
        limiter: Arc::new(Semaphore::new(workers.max(1))),
        cancel,
    };
    join_all(filters.iter().map(|filter| scanner.scan(filter))).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// In-memory registry recording how many calls run at once.
    struct FakeRegistry {
        repositories: HashMap<String, Vec<String>>,
        tags: HashMap<String, Vec<String>>,
        broken: Vec<String>,
        hanging: Vec<String>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FakeRegistry {
        fn new() -> Self {
            FakeRegistry {
                repositories: HashMap::new(),
                tags: HashMap::new(),
                broken: vec![],
                hanging: vec![],
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }

        async fn track<T>(&self, value: T) -> T {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            value
        }
    }

    #[async_trait]
    impl ImageRegistry for FakeRegistry {
        async fn list_tags(&self, _registry: &str, repository: &str) -> Result<Vec<String>, Error> {
            if self.hanging.iter().any(|r| r == repository) {
                futures::future::pending::<()>().await;
            }
            let result = if self.broken.iter().any(|r| r == repository) {
                Err(Error::RegistryError(format!("unauthorized: {}", repository)))
            } else {
                Ok(self.tags.get(repository).cloned().unwrap_or_default())
            };
            self.track(result).await
        }

        async fn list_repositories(&self, _registry: &str, namespace: &str) -> Result<Vec<String>, Error> {
            let result = self
                .repositories
                .get(namespace)
                .cloned()
                .ok_or_else(|| Error::RegistryError(format!("unknown namespace {}", namespace)));
            self.track(result).await
        }
    }

    fn filter(image: &str) -> ModelSourceFilter {
        ModelSourceFilter {
            image: image.to_string(),
            exclude: vec![],
            tag: None,
        }
    }

    fn populated() -> FakeRegistry {
        let mut registry = FakeRegistry::new();
        let repos: Vec<String> = (0..6).map(|i| format!("amd/aim-model-{}", i)).collect();
        for repo in &repos {
            registry.tags.insert(repo.clone(), vec!["0.8.4".into(), "latest".into()]);
        }
        registry.repositories.insert("amd".into(), repos);
        registry
    }

    #[tokio::test]
    async fn test_static_filter_skips_registry() {
        let registry = FakeRegistry::new();
        let results = scan_filters(&registry, None, &[filter("amd/aim-llama:0.8.4")], 2, CancellationToken::new()).await;
        assert_eq!(results[0].images.len(), 1);
        assert_eq!(results[0].images[0].uri(), "amd/aim-llama:0.8.4");
        assert_eq!(registry.peak.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let registry = populated();
        let f = ModelSourceFilter {
            tag: Some("0.8.*".into()),
            ..filter("amd/aim-*")
        };
        let results = scan_filters(&registry, Some("ghcr.io"), &[f], 2, CancellationToken::new()).await;
        assert_eq!(results[0].error, None);
        assert_eq!(results[0].images.len(), 6);
        assert!(results[0].images.iter().all(|i| i.tag == "0.8.4" && i.registry == "ghcr.io"));
        assert!(registry.peak.load(Ordering::SeqCst) <= 2);
        assert!(registry.peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_results() {
        let mut registry = populated();
        registry.broken.push("amd/aim-model-3".into());
        let filters = vec![filter("amd/aim-*:latest"), filter("missing/aim-*"), filter("amd/aim-model-1")];
        let results = scan_filters(&registry, None, &filters, 4, CancellationToken::new()).await;

        assert_eq!(results[0].images.len(), 5);
        assert!(results[0].error.as_deref().unwrap().starts_with("1 of 6 repositories failed"));
        assert!(results[1].images.is_empty());
        assert!(results[1].error.is_some());
        assert_eq!(results[2].images.len(), 2);
        assert_eq!(results[2].error, None);
    }

    #[tokio::test]
    async fn test_cancellation_returns_gathered_images() {
        let mut registry = populated();
        registry.hanging.push("amd/aim-model-5".into());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let results = scan_filters(&registry, None, &[filter("amd/aim-*:latest")], 2, cancel).await;
        assert_eq!(results[0].images.len(), 5);
        assert!(results[0].error.as_deref().unwrap().contains("cancelled"));
    }
}
