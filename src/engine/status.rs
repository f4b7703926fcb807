use serde::Serialize;

use super::conditions::Condition;
use super::health::AimStatus;

/// Accessors every controller-authored status exposes to the pipeline.
pub trait StatusWithConditions: Clone + Default + PartialEq + Serialize + Send + Sync {
    fn conditions(&self) -> &[Condition];
    fn set_conditions(&mut self, conditions: Vec<Condition>);
    /// Kinds with a narrower vocabulary relabel `status` here.
    fn set_status(&mut self, status: AimStatus);
    fn observed_generation(&self) -> Option<i64>;
    fn set_observed_generation(&mut self, generation: i64);
}

/// A reconciled object carrying a controller-authored status.
pub trait HasStatus {
    type Status: StatusWithConditions;
    fn status(&self) -> Option<&Self::Status>;
}
