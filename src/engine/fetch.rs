use crate::errors::Error;

use super::health::{AimStatus, ComponentHealth};

/// Outcome of a single read against the cluster or an external service.
#[derive(Debug)]
pub enum FetchResult<T> {
    Found(T),
    NotFound,
    Error(Error),
}

/// How a caller wants `NotFound` and `Error` outcomes to project onto component health.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FetchPolicy {
    pub not_found: AimStatus,
    pub error: AimStatus,
}

impl FetchPolicy {
    /// A dependency the object references but does not create.
    pub const fn upstream(not_found: AimStatus) -> Self {
        FetchPolicy {
            not_found,
            error: AimStatus::Degraded,
        }
    }

    /// A child the object creates; absence means creation is underway.
    pub const fn downstream() -> Self {
        FetchPolicy {
            not_found: AimStatus::Progressing,
            error: AimStatus::Degraded,
        }
    }
}

impl<T> FetchResult<T> {
    /// Classify a kube read, turning 404 into `NotFound`.
    pub fn from_kube(result: Result<T, kube::Error>) -> Self {
        Self::from_result(result.map_err(Error::from))
    }

    pub fn from_result(result: Result<T, Error>) -> Self {
        match result {
            Ok(value) => FetchResult::Found(value),
            Err(err) if err.is_not_found() => FetchResult::NotFound,
            Err(err) => FetchResult::Error(err),
        }
    }

    /// Found when `Some`, used for lookups inside an already fetched list.
    pub fn from_option(value: Option<T>) -> Self {
        match value {
            Some(value) => FetchResult::Found(value),
            None => FetchResult::NotFound,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchResult::NotFound)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            FetchResult::Found(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> FetchResult<U> {
        match self {
            FetchResult::Found(value) => FetchResult::Found(f(value)),
            FetchResult::NotFound => FetchResult::NotFound,
            FetchResult::Error(err) => FetchResult::Error(err),
        }
    }

    /// Project this outcome onto the health of `component`.
    ///
    /// `Found` defers to `health_fn`; the other outcomes follow `policy`.
    /// Errors are marked transient so the pass is retried.
    pub fn to_component_health<F>(&self, component: &str, policy: FetchPolicy, health_fn: F) -> ComponentHealth
    where
        F: FnOnce(&T) -> ComponentHealth,
    {
        match self {
            FetchResult::Found(value) => health_fn(value),
            FetchResult::NotFound => ComponentHealth::new(
                component,
                policy.not_found,
                &format!("{}NotFound", component),
                format!("{} not found", component),
            ),
            FetchResult::Error(err) => ComponentHealth::new(
                component,
                policy.error,
                &format!("{}FetchFailed", component),
                err.to_string(),
            )
            .transient(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::error::ErrorResponse;

    fn kube_err(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: "nope".into(),
            reason: "NotFound".into(),
            code,
        })
    }

    #[test]
    fn test_from_kube_classifies() {
        assert_eq!(FetchResult::<u8>::from_kube(Ok(1)).value(), Some(&1));
        assert!(FetchResult::<u8>::from_kube(Err(kube_err(404))).is_not_found());
        assert!(matches!(FetchResult::<u8>::from_kube(Err(kube_err(503))), FetchResult::Error(_)));
    }

    #[test]
    fn test_to_component_health() {
        let found: FetchResult<u8> = FetchResult::Found(3);
        let health = found.to_component_health("Cache", FetchPolicy::downstream(), |v| {
            ComponentHealth::ready("Cache", "CacheReady", format!("{} items", v))
        });
        assert_eq!(health.state, AimStatus::Ready);
        assert_eq!(health.message, "3 items");

        let missing: FetchResult<u8> = FetchResult::NotFound;
        let health = missing.to_component_health("Cache", FetchPolicy::downstream(), |_| unreachable!());
        assert_eq!(health.state, AimStatus::Progressing);
        assert_eq!(health.reason, "CacheNotFound");
        assert!(!health.transient);

        let missing: FetchResult<u8> = FetchResult::NotFound;
        let health = missing.to_component_health("Model", FetchPolicy::upstream(AimStatus::Failed), |_| unreachable!());
        assert_eq!(health.state, AimStatus::Failed);

        let broken: FetchResult<u8> = FetchResult::Error(Error::RegistryError("timeout".into()));
        let health = broken.to_component_health("Model", FetchPolicy::upstream(AimStatus::Failed), |_| unreachable!());
        assert_eq!(health.state, AimStatus::Degraded);
        assert_eq!(health.reason, "ModelFetchFailed");
        assert!(health.transient);
    }
}
