//! Generic reconciliation machinery shared by every managed kind.

pub mod conditions;
pub mod fetch;
pub mod health;
pub mod pipeline;
pub mod plan;
pub mod status;
pub mod store;

pub use conditions::{Condition, ConditionManager, ConditionState};
pub use fetch::{FetchPolicy, FetchResult};
pub use health::{AimStatus, ComponentHealth, NotAvailablePolicy};
pub use pipeline::{DomainReconciler, Pipeline, StatusOf};
pub use plan::{ChildResource, Lifecycle, PlanResult};
pub use status::{HasStatus, StatusWithConditions};
pub use store::{KubeStore, ObjectStore};

/// Client pointed at an address nothing listens on, for reconcilers whose
/// pure stages are exercised without a cluster.
#[cfg(test)]
pub(crate) fn offline_client() -> kube::Client {
    let config = kube::Config::new("http://127.0.0.1:9".parse().unwrap());
    kube::Client::try_from(config).unwrap()
}
