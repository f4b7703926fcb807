use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::health::{AimStatus, ComponentHealth};

pub const CONDITION_READY: &str = "Ready";
pub const CONDITION_PROGRESSING: &str = "Progressing";
pub const CONDITION_DEGRADED: &str = "Degraded";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum ConditionState {
    True,
    False,
    Unknown,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionState,
    pub reason: String,
    #[serde(default)]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

/// A change in state or reason of one condition between two passes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConditionTransition {
    pub type_: String,
    pub from: Option<(ConditionState, String)>,
    pub to: (ConditionState, String),
}

/// Keyed set of conditions with stable transition times.
///
/// `last_transition_time` only moves when the state of a condition changes,
/// a new reason or message alone keeps the previous timestamp.
#[derive(Clone, Debug)]
pub struct ConditionManager {
    now: DateTime<Utc>,
    conditions: Vec<Condition>,
}

impl ConditionManager {
    pub fn new(existing: &[Condition], now: DateTime<Utc>) -> Self {
        ConditionManager {
            now,
            conditions: existing.to_vec(),
        }
    }

    pub fn set(&mut self, type_: &str, state: ConditionState, reason: &str, message: &str) {
        match self.conditions.iter_mut().find(|c| c.type_ == type_) {
            Some(condition) => {
                if condition.status != state {
                    condition.last_transition_time = self.now;
                }
                condition.status = state;
                condition.reason = reason.to_string();
                condition.message = message.to_string();
            }
            None => self.conditions.push(Condition {
                type_: type_.to_string(),
                status: state,
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: self.now,
            }),
        }
    }

    pub fn mark_true(&mut self, type_: &str, reason: &str, message: &str) {
        self.set(type_, ConditionState::True, reason, message)
    }

    pub fn mark_false(&mut self, type_: &str, reason: &str, message: &str) {
        self.set(type_, ConditionState::False, reason, message)
    }

    pub fn get(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Project one component onto the condition named after it.
    pub fn set_component(&mut self, health: &ComponentHealth) {
        self.set(&health.component, health.state.condition_state(), &health.reason, &health.message);
    }

    /// Set `Ready`, `Progressing` and `Degraded` from the coarse status.
    pub fn set_aggregate(&mut self, status: AimStatus, reason: &str, message: &str) {
        match status {
            AimStatus::Ready => {
                self.mark_true(CONDITION_READY, reason, message);
                self.mark_false(CONDITION_PROGRESSING, reason, "");
                self.mark_false(CONDITION_DEGRADED, reason, "");
            }
            AimStatus::Pending | AimStatus::Progressing => {
                self.mark_false(CONDITION_READY, reason, message);
                self.mark_true(CONDITION_PROGRESSING, reason, message);
                self.mark_false(CONDITION_DEGRADED, reason, "");
            }
            AimStatus::Degraded | AimStatus::NotAvailable | AimStatus::Failed => {
                self.mark_false(CONDITION_READY, reason, message);
                self.mark_false(CONDITION_PROGRESSING, reason, "");
                self.mark_true(CONDITION_DEGRADED, reason, message);
            }
        }
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn into_conditions(self) -> Vec<Condition> {
        self.conditions
    }
}

/// Conditions whose state or reason differ between `before` and `after`.
pub fn transitions(before: &[Condition], after: &[Condition]) -> Vec<ConditionTransition> {
    after
        .iter()
        .filter_map(|new| {
            let old = before.iter().find(|c| c.type_ == new.type_);
            match old {
                Some(old) if old.status == new.status && old.reason == new.reason => None,
                _ => Some(ConditionTransition {
                    type_: new.type_.clone(),
                    from: old.map(|o| (o.status, o.reason.clone())),
                    to: (new.status, new.reason.clone()),
                }),
            }
        })
        .collect()
}
