//! Namespace-first resolution of names that may exist at namespace or cluster scope.

use std::future::Future;

use crate::crd::common::{ResolvedReference, Scope};
use crate::engine::{AimStatus, ComponentHealth, FetchResult};
use crate::errors::Error;

/// A dependency together with the reference that located it.
#[derive(Clone, Debug, PartialEq)]
pub struct Resolved<T> {
    pub value: T,
    pub reference: ResolvedReference,
}

impl<T> Resolved<T> {
    pub fn namespaced(value: T, kind: &str, name: &str, namespace: &str) -> Self {
        Resolved {
            value,
            reference: ResolvedReference {
                name: name.to_string(),
                kind: kind.to_string(),
                scope: Scope::Namespace,
                namespace: Some(namespace.to_string()),
            },
        }
    }

    pub fn cluster(value: T, kind: &str, name: &str) -> Self {
        Resolved {
            value,
            reference: ResolvedReference {
                name: name.to_string(),
                kind: kind.to_string(),
                scope: Scope::Cluster,
                namespace: None,
            },
        }
    }
}

#[derive(Debug)]
pub enum Resolution<T> {
    Found(Resolved<T>),
    NotFound(String),
    Error(Error),
}

impl<T> Resolution<T> {
    pub fn ok(&self) -> bool {
        matches!(self, Resolution::Found(_))
    }

    pub fn resolved(&self) -> Option<&Resolved<T>> {
        match self {
            Resolution::Found(resolved) => Some(resolved),
            _ => None,
        }
    }

    pub fn reference(&self) -> Option<&ResolvedReference> {
        self.resolved().map(|r| &r.reference)
    }

    /// `missing` is the state an unresolved reference blocks the owner with.
    pub fn to_component_health<F>(&self, component: &str, missing: AimStatus, health_fn: F) -> ComponentHealth
    where
        F: FnOnce(&Resolved<T>) -> ComponentHealth,
    {
        match self {
            Resolution::Found(resolved) => health_fn(resolved),
            Resolution::NotFound(name) => ComponentHealth::new(
                component,
                missing,
                &format!("{}NotFound", component),
                format!("{} '{}' not found in namespace or cluster scope", component, name),
            ),
            Resolution::Error(err) => ComponentHealth::degraded(
                component,
                &format!("{}FetchFailed", component),
                err.to_string(),
            )
            .transient(),
        }
    }
}

/// Precedence rule over already fetched lookups.
///
/// A namespace hit always wins. A namespace lookup that errored stops resolution,
/// falling through to cluster scope could pick an object the namespace entry overrides.
pub fn decide<T>(
    name: &str,
    namespaced: FetchResult<Resolved<T>>,
    cluster: Option<FetchResult<Resolved<T>>>,
) -> Resolution<T> {
    match namespaced {
        FetchResult::Found(resolved) => Resolution::Found(resolved),
        FetchResult::Error(err) => Resolution::Error(err),
        FetchResult::NotFound => match cluster {
            Some(FetchResult::Found(resolved)) => Resolution::Found(resolved),
            Some(FetchResult::Error(err)) => Resolution::Error(err),
            Some(FetchResult::NotFound) | None => Resolution::NotFound(name.to_string()),
        },
    }
}

/// Look `name` up at namespace scope, then at cluster scope only when the first lookup found nothing.
pub async fn resolve<T, FN, FC, Fut>(name: &str, namespaced: FN, cluster: FC) -> Resolution<T>
where
    FN: Future<Output = FetchResult<Resolved<T>>>,
    FC: FnOnce() -> Fut,
    Fut: Future<Output = FetchResult<Resolved<T>>>,
{
    let namespaced = namespaced.await;
    if !namespaced.is_not_found() {
        return decide(name, namespaced, None);
    }
    let cluster = cluster().await;
    decide(name, namespaced, Some(cluster))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::ready;

    fn ns(v: u8) -> FetchResult<Resolved<u8>> {
        FetchResult::Found(Resolved::namespaced(v, "AIMModel", "llama", "team-a"))
    }

    fn cl(v: u8) -> FetchResult<Resolved<u8>> {
        FetchResult::Found(Resolved::cluster(v, "AIMClusterModel", "llama"))
    }

    #[tokio::test]
    async fn test_namespace_wins_over_cluster() {
        let resolution = resolve("llama", ready(ns(1)), || ready(cl(2))).await;
        let resolved = resolution.resolved().unwrap();
        assert_eq!(resolved.value, 1);
        assert_eq!(resolved.reference.scope, Scope::Namespace);
        assert_eq!(resolved.reference.namespace.as_deref(), Some("team-a"));
    }

    #[tokio::test]
    async fn test_cluster_fallback() {
        let resolution = resolve("llama", ready(FetchResult::NotFound), || ready(cl(2))).await;
        let reference = resolution.reference().unwrap();
        assert_eq!(reference.scope, Scope::Cluster);
        assert_eq!(reference.kind, "AIMClusterModel");
    }

    #[tokio::test]
    async fn test_neither_found() {
        let resolution: Resolution<u8> =
            resolve("llama", ready(FetchResult::NotFound), || ready(FetchResult::NotFound)).await;
        match &resolution {
            Resolution::NotFound(name) => assert_eq!(name, "llama"),
            other => panic!("unexpected {:?}", other),
        }
        let health = resolution.to_component_health("Model", AimStatus::Failed, |_| unreachable!());
        assert_eq!(health.state, AimStatus::Failed);
        assert_eq!(health.reason, "ModelNotFound");
        assert!(health.message.contains("'llama'"));
    }

    #[test]
    fn test_namespace_error_does_not_fall_through() {
        let resolution = decide(
            "llama",
            FetchResult::Error(Error::KubeError(kube::Error::Api(kube::error::ErrorResponse {
                status: "Failure".into(),
                message: "etcdserver: request timed out".into(),
                reason: "InternalError".into(),
                code: 500,
            }))),
            Some(cl(2)),
        );
        assert!(matches!(resolution, Resolution::Error(_)));
        let health = resolution.to_component_health("Model", AimStatus::Failed, |_| unreachable!());
        assert_eq!(health.state, AimStatus::Degraded);
        assert!(health.transient);
    }

    #[tokio::test]
    async fn test_cluster_not_queried_on_namespace_hit() {
        let resolution = resolve("llama", ready(ns(1)), || -> futures::future::Ready<FetchResult<Resolved<u8>>> {
            panic!("cluster scope must not be queried")
        })
        .await;
        assert!(resolution.ok());
    }
}
