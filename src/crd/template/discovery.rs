//! Circuit breaker bounding discovery job retries, and the discovery output format.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::crd::common::DiscoveryState;
use crate::errors::Error;
use crate::utils::short_hash;

use super::template::{ModelSourceEntry, Profile, ProfileMetadata, TemplateSpecCommon};

/// Exponential backoff bounds of the breaker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BreakerPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl BreakerPolicy {
    /// `min(max, base * 2^attempts)`
    pub fn backoff(&self, attempts: u32) -> Duration {
        let factor = 2u32.checked_pow(attempts).unwrap_or(u32::MAX);
        self.base.checked_mul(factor).map(|d| d.min(self.max)).unwrap_or(self.max)
    }
}

/// What the cluster shows of the newest discovery job for the current spec hash.
#[derive(Clone, Debug, PartialEq)]
pub enum JobOutcome {
    Running,
    Succeeded(DiscoveryOutput),
    Failed(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ObservedJob {
    pub name: String,
    pub attempt: u32,
    pub created: Option<DateTime<Utc>>,
    pub outcome: JobOutcome,
}

#[derive(Clone, Debug, PartialEq)]
pub enum BreakerPhase {
    /// A new job should be created now.
    Create,
    AwaitingResult,
    Succeeded,
    /// Waiting out the backoff, with the time left.
    Backoff(Duration),
}

#[derive(Clone, Debug, PartialEq)]
pub struct BreakerDecision {
    pub state: DiscoveryState,
    pub phase: BreakerPhase,
    /// The spec hash changed since the persisted state was written.
    pub reset: bool,
}

/// Hash of exactly the inputs that change what discovery would report.
pub fn spec_hash(spec: &TemplateSpecCommon, model_image: &str) -> String {
    let canonical = json!({
        "modelName": spec.model_name,
        "image": model_image,
        "metric": spec.metric,
        "precision": spec.precision,
        "gpu": spec.gpu,
        "env": spec.env,
    });
    short_hash(canonical.to_string().as_bytes(), 64)
}

/// Decide the next breaker step from the persisted state and the observed job.
///
/// `has_result` tells whether the status already holds discovery output; it is ignored
/// when the spec hash changed. The returned state does not yet count a new attempt,
/// apply [`record_attempt`] once the job is actually created.
pub fn evaluate(
    previous: Option<&DiscoveryState>,
    hash: &str,
    job: Option<&ObservedJob>,
    has_result: bool,
    now: DateTime<Utc>,
    policy: &BreakerPolicy,
) -> BreakerDecision {
    let mut state = previous.cloned().unwrap_or_default();
    let reset = state.spec_hash.as_deref() != Some(hash);
    if reset {
        state = DiscoveryState {
            spec_hash: Some(hash.to_string()),
            ..DiscoveryState::default()
        };
    }

    if let Some(job) = job {
        // Status may have been lost after the job was created.
        if job.attempt > state.attempts {
            state.attempts = job.attempt;
            state.last_attempt_time = job.created.or(state.last_attempt_time);
        }
    }

    let phase = match job.map(|j| &j.outcome) {
        Some(JobOutcome::Running) => BreakerPhase::AwaitingResult,
        Some(JobOutcome::Succeeded(_)) => {
            state.last_failure_reason = None;
            BreakerPhase::Succeeded
        }
        Some(JobOutcome::Failed(reason)) => {
            state.last_failure_reason = Some(reason.clone());
            backoff_phase(&state, now, policy)
        }
        None if has_result && !reset => BreakerPhase::Succeeded,
        None => backoff_phase(&state, now, policy),
    };

    BreakerDecision { state, phase, reset }
}

fn backoff_phase(state: &DiscoveryState, now: DateTime<Utc>, policy: &BreakerPolicy) -> BreakerPhase {
    let last = match state.last_attempt_time {
        Some(last) => last,
        None => return BreakerPhase::Create,
    };
    let backoff = policy.backoff(state.attempts);
    let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
    if elapsed >= backoff {
        BreakerPhase::Create
    } else {
        BreakerPhase::Backoff(backoff - elapsed)
    }
}

/// When the breaker allows the next job, `None` before any attempt.
pub fn next_attempt_time(state: &DiscoveryState, policy: &BreakerPolicy) -> Option<DateTime<Utc>> {
    let last = state.last_attempt_time?;
    let backoff = chrono::Duration::from_std(policy.backoff(state.attempts)).ok()?;
    last.checked_add_signed(backoff)
}

/// Count a job creation.
pub fn record_attempt(state: &mut DiscoveryState, now: DateTime<Utc>) {
    state.attempts = state.attempts.saturating_add(1);
    state.last_attempt_time = Some(now);
}

/// Parsed result of a discovery run.
#[derive(Clone, Debug, PartialEq)]
pub struct DiscoveryOutput {
    pub model_sources: Vec<ModelSourceEntry>,
    pub profile: Profile,
}

#[derive(Deserialize)]
struct RawOutput {
    #[serde(default)]
    profile: RawProfile,
    #[serde(default)]
    models: Vec<RawModel>,
}

#[derive(Deserialize, Default)]
struct RawProfile {
    #[serde(default)]
    metadata: RawMetadata,
    #[serde(default)]
    engine_args: Option<serde_json::Value>,
    #[serde(default)]
    env_vars: BTreeMap<String, String>,
}

/// Free-form strings; values outside the known vocabulary are dropped, not rejected.
#[derive(Deserialize, Default)]
struct RawMetadata {
    #[serde(default)]
    engine: Option<String>,
    #[serde(default)]
    gpu: Option<String>,
    #[serde(default)]
    gpu_count: u32,
    #[serde(default)]
    metric: Option<String>,
    #[serde(default)]
    precision: Option<String>,
    #[serde(default, rename = "type")]
    type_: Option<String>,
}

impl RawMetadata {
    fn into_metadata(self) -> ProfileMetadata {
        ProfileMetadata {
            engine: self.engine,
            gpu: self.gpu,
            gpu_count: self.gpu_count,
            metric: self.metric.and_then(|m| serde_json::from_value(serde_json::Value::String(m)).ok()),
            precision: self.precision.and_then(|p| serde_json::from_value(serde_json::Value::String(p)).ok()),
            type_: self.type_,
        }
    }
}

#[derive(Deserialize)]
struct RawModel {
    name: String,
    source: String,
    #[serde(default)]
    size_gb: Option<f64>,
}

/// Parse the log of a discovery pod. The last line holding a JSON object wins.
pub fn parse_discovery_output(log: &str) -> Result<DiscoveryOutput, Error> {
    let document = log
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| line.starts_with('{'))
        .unwrap_or_else(|| log.trim());
    let raw: RawOutput = serde_json::from_str(document)?;
    if raw.models.is_empty() {
        return Err(Error::MissingKey("models"));
    }

    let model_sources = raw
        .models
        .into_iter()
        .map(|m| ModelSourceEntry {
            name: m.name,
            source_uri: m.source,
            size: m.size_gb.filter(|s| *s >= 0.0).map(|gb| (gb * 1024.0 * 1024.0 * 1024.0) as u64),
        })
        .collect();

    Ok(DiscoveryOutput {
        model_sources,
        profile: Profile {
            metadata: raw.profile.metadata.into_metadata(),
            engine_args: raw.profile.engine_args,
            env_vars: raw.profile.env_vars,
        },
    })
}
