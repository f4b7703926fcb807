use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;
use serde_json::{json, Value};

use crate::crd::common::{
    EnvVarSpec, Scope, LABEL_ATTEMPT, LABEL_COMPONENT, LABEL_MANAGED_BY, LABEL_SPEC_HASH, LABEL_TEMPLATE,
    LABEL_TEMPLATE_SCOPE, MANAGED_BY,
};
use crate::errors::Error;
use crate::utils::bounded_name;

use super::template::TemplateSpecCommon;

pub const DISCOVERY_COMPONENT_LABEL: &str = "discovery";
pub const DISCOVERY_CONTAINER: &str = "discovery";
pub const DISCOVERY_TTL_SECONDS: i32 = 60;
const HASH_LABEL_LENGTH: usize = 16;

/// Everything a discovery job is built from.
pub struct DiscoveryJobParams<'a> {
    pub template_name: &'a str,
    pub scope: Scope,
    pub namespace: &'a str,
    pub image: &'a str,
    pub spec: &'a TemplateSpecCommon,
    pub spec_hash: &'a str,
    pub attempt: u32,
    pub service_account: Option<&'a str>,
    pub owner: OwnerReference,
}

/// `aim-discovery-<template>-<hash8>-<attempt>`, cut to 63 characters keeping the end.
pub fn discovery_job_name(template: &str, spec_hash: &str, attempt: u32) -> String {
    let hash: String = spec_hash.chars().take(8).collect();
    bounded_name("aim-discovery-", &format!("{}-{}-{}", template, hash, attempt))
}

fn discovery_env(spec: &TemplateSpecCommon) -> Vec<Value> {
    let mut env = vec![
        json!({"name": "AIM_LOG_LEVEL_ROOT", "value": "CRITICAL"}),
        json!({"name": "AIM_LOG_LEVEL", "value": "CRITICAL"}),
    ];
    env.extend(
        spec.env
            .iter()
            .map(|EnvVarSpec { name, value }| json!({"name": name, "value": value})),
    );

    if let Some(metric) = spec.metric {
        env.push(json!({"name": "AIM_METRIC", "value": metric}));
    }
    if let Some(precision) = spec.precision {
        env.push(json!({"name": "AIM_PRECISION", "value": precision}));
    }
    if let Some(gpu) = &spec.gpu {
        if let Some(model) = gpu.model.as_deref().filter(|m| !m.is_empty()) {
            env.push(json!({"name": "AIM_GPU_MODEL", "value": model}));
        }
        if gpu.requests > 0 {
            env.push(json!({"name": "AIM_GPU_COUNT", "value": gpu.requests.to_string()}));
        }
    }
    env
}

/// Create a discovery job running the model image in dry-run mode.
pub fn build_discovery_job(params: &DiscoveryJobParams) -> Result<Job, Error> {
    let job_name = discovery_job_name(params.template_name, params.spec_hash, params.attempt);

    let mut pod_spec = json!({
        "restartPolicy": "Never",
        "securityContext": {
            "runAsNonRoot": true,
            "runAsUser": 65532,
            "seccompProfile": {"type": "RuntimeDefault"}
        },
        "containers": [{
            "name": DISCOVERY_CONTAINER,
            "image": params.image,
            "args": ["dry-run", "--format=json"],
            "env": discovery_env(params.spec),
            "securityContext": {
                "allowPrivilegeEscalation": false,
                "runAsNonRoot": true,
                "capabilities": {"drop": ["ALL"]}
            },
            "resources": {
                "limits": {
                    "memory": "1000Mi",
                    "cpu": "1000m"
                },
                "requests": {
                    "memory": "256Mi",
                    "cpu": "100m"
                }
            }
        }]
    });
    if let Some(account) = params.service_account {
        pod_spec["serviceAccountName"] = json!(account);
    }

    let manifest = json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {
            "name": &job_name,
            "namespace": params.namespace,
            "ownerReferences": [params.owner],
            "labels": {
                LABEL_MANAGED_BY: MANAGED_BY,
                LABEL_COMPONENT: DISCOVERY_COMPONENT_LABEL,
                LABEL_TEMPLATE: params.template_name,
                LABEL_TEMPLATE_SCOPE: params.scope.as_str(),
                LABEL_SPEC_HASH: hash_label(params.spec_hash),
                LABEL_ATTEMPT: params.attempt.to_string()
            }
        },
        "spec": {
            "backoffLimit": 0,
            "ttlSecondsAfterFinished": DISCOVERY_TTL_SECONDS,
            "template": {
                "metadata": {
                    "labels": {
                        LABEL_TEMPLATE: params.template_name,
                        LABEL_COMPONENT: DISCOVERY_COMPONENT_LABEL
                    }
                },
                "spec": pod_spec
            }
        }
    });
    Ok(serde_json::from_value(manifest)?)
}

/// Whether `job` was created for the template `name` at `scope`.
pub fn belongs_to(job: &Job, name: &str, scope: Scope) -> bool {
    let labels = job.labels();
    labels.get(LABEL_TEMPLATE).map(String::as_str) == Some(name)
        && labels.get(LABEL_TEMPLATE_SCOPE).map(String::as_str) == Some(scope.as_str())
}

fn hash_label(spec_hash: &str) -> String {
    spec_hash.chars().take(HASH_LABEL_LENGTH).collect()
}

/// Whether `job` was created for `spec_hash`. Labels carry a prefix of the hash.
pub fn matches_spec_hash(job: &Job, spec_hash: &str) -> bool {
    job.labels().get(LABEL_SPEC_HASH).map(|label| *label == hash_label(spec_hash)) == Some(true)
}

pub fn job_attempt(job: &Job) -> u32 {
    job.labels()
        .get(LABEL_ATTEMPT)
        .and_then(|a| a.parse().ok())
        .unwrap_or(0)
}

/// Terminal state of a job, from its conditions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobState {
    Active,
    Complete,
    Failed(String),
}

pub fn job_state(job: &Job) -> JobState {
    let conditions = job
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .cloned()
        .unwrap_or_default();

    for condition in &conditions {
        if condition.status != "True" {
            continue;
        }
        match condition.type_.as_str() {
            "Complete" => return JobState::Complete,
            "Failed" => {
                let reason = condition
                    .message
                    .clone()
                    .filter(|m| !m.is_empty())
                    .or_else(|| condition.reason.clone())
                    .unwrap_or_else(|| "JobFailed".to_string());
                return JobState::Failed(reason);
            }
            _ => {}
        }
    }
    JobState::Active
}
