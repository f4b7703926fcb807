use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::conditions::ConditionState;

/// Coarse status shared by every reconciled kind.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, JsonSchema, Default)]
pub enum AimStatus {
    #[default]
    Pending,
    Progressing,
    Ready,
    Degraded,
    Failed,
    NotAvailable,
}

impl AimStatus {
    /// Condition state a component in this state projects onto its condition.
    pub fn condition_state(&self) -> ConditionState {
        match self {
            AimStatus::Ready => ConditionState::True,
            AimStatus::Degraded | AimStatus::Failed | AimStatus::NotAvailable => ConditionState::False,
            AimStatus::Pending | AimStatus::Progressing => ConditionState::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AimStatus::Pending => "Pending",
            AimStatus::Progressing => "Progressing",
            AimStatus::Ready => "Ready",
            AimStatus::Degraded => "Degraded",
            AimStatus::Failed => "Failed",
            AimStatus::NotAvailable => "NotAvailable",
        }
    }
}

/// How a `NotAvailable` component counts towards the coarse status of its parent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotAvailablePolicy {
    Degraded,
    Failed,
    /// Keep `NotAvailable` as the coarse status, ranked between `Failed` and `Degraded`.
    Surface,
}

/// Health of one dependency or sub-part of a reconciled object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentHealth {
    pub component: String,
    pub state: AimStatus,
    pub reason: String,
    pub message: String,
    /// Set when the state comes from an error that may resolve on its own.
    pub transient: bool,
}

impl ComponentHealth {
    pub fn new(component: &str, state: AimStatus, reason: &str, message: impl Into<String>) -> Self {
        ComponentHealth {
            component: component.to_string(),
            state,
            reason: reason.to_string(),
            message: message.into(),
            transient: false,
        }
    }

    pub fn ready(component: &str, reason: &str, message: impl Into<String>) -> Self {
        Self::new(component, AimStatus::Ready, reason, message)
    }

    pub fn progressing(component: &str, reason: &str, message: impl Into<String>) -> Self {
        Self::new(component, AimStatus::Progressing, reason, message)
    }

    pub fn degraded(component: &str, reason: &str, message: impl Into<String>) -> Self {
        Self::new(component, AimStatus::Degraded, reason, message)
    }

    pub fn failed(component: &str, reason: &str, message: impl Into<String>) -> Self {
        Self::new(component, AimStatus::Failed, reason, message)
    }

    pub fn not_available(component: &str, reason: &str, message: impl Into<String>) -> Self {
        Self::new(component, AimStatus::NotAvailable, reason, message)
    }

    pub fn pending(component: &str, reason: &str, message: impl Into<String>) -> Self {
        Self::new(component, AimStatus::Pending, reason, message)
    }

    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }
}

/// Reduce component healths into one coarse status.
///
/// Precedence: Failed, then Degraded (or NotAvailable per `policy`), then Progressing,
/// then Ready when every component is Ready. No components, or any Pending one, gives Pending.
pub fn reduce_status(components: &[ComponentHealth], policy: NotAvailablePolicy) -> AimStatus {
    match worst_component(components, policy) {
        Some(component) => effective_state(component.state, policy),
        None => AimStatus::Pending,
    }
}

/// The component that decides the coarse status; ties resolve to the first one listed.
pub fn worst_component(components: &[ComponentHealth], policy: NotAvailablePolicy) -> Option<&ComponentHealth> {
    let mut worst: Option<&ComponentHealth> = None;
    for component in components {
        let state = effective_state(component.state, policy);
        match worst {
            Some(current) if rank(effective_state(current.state, policy)) >= rank(state) => {}
            _ => worst = Some(component),
        }
    }
    worst
}

fn effective_state(state: AimStatus, policy: NotAvailablePolicy) -> AimStatus {
    match (state, policy) {
        (AimStatus::NotAvailable, NotAvailablePolicy::Degraded) => AimStatus::Degraded,
        (AimStatus::NotAvailable, NotAvailablePolicy::Failed) => AimStatus::Failed,
        (state, _) => state,
    }
}

fn rank(state: AimStatus) -> u8 {
    match state {
        AimStatus::Ready => 0,
        AimStatus::Pending => 1,
        AimStatus::Progressing => 2,
        AimStatus::Degraded => 3,
        AimStatus::NotAvailable => 4,
        AimStatus::Failed => 5,
    }
}

/// True when any component carries a retryable error.
pub fn has_transient(components: &[ComponentHealth]) -> bool {
    components.iter().any(|c| c.transient)
}
