use std::cmp::Ordering;

use kube::ResourceExt;

use crate::crd::common::{Metric, Precision, ResolvedReference, Scope};
use crate::crd::template::{TemplateKind, TemplateStatus};
use crate::engine::{AimStatus, ComponentHealth, HasStatus};
use crate::gpu::normalize_gpu_model;
use crate::resolve::Resolved;

use super::service::ServiceOverrides;

pub const COMPONENT_TEMPLATE: &str = "Template";

/// A template a service could run on, flattened over both scopes.
#[derive(Clone, Debug, PartialEq)]
pub struct TemplateCandidate {
    pub name: String,
    pub scope: Scope,
    pub namespace: Option<String>,
    pub model_name: String,
    pub status: AimStatus,
    pub metric: Option<Metric>,
    pub precision: Option<Precision>,
    pub gpu_model: Option<String>,
    pub gpu_count: u32,
}

impl TemplateCandidate {
    /// Discovered profile values win over the requested ones.
    pub fn from_template<K: TemplateKind>(template: &K) -> Self {
        let spec = template.common();
        let status: Option<&TemplateStatus> = template.status();
        let profile = status.and_then(|s| s.profile.as_ref()).map(|p| &p.metadata);
        let spec_gpu = spec.gpu.as_ref();

        TemplateCandidate {
            name: template.name_any(),
            scope: K::SCOPE,
            namespace: template.namespace(),
            model_name: spec.model_name.clone(),
            status: status.map(|s| s.status).unwrap_or_default(),
            metric: profile.and_then(|p| p.metric).or(spec.metric),
            precision: profile.and_then(|p| p.precision).or(spec.precision),
            gpu_model: spec_gpu
                .and_then(|g| g.model.clone())
                .filter(|m| !m.trim().is_empty())
                .or_else(|| profile.and_then(|p| p.gpu.clone())),
            gpu_count: spec_gpu
                .map(|g| g.requests)
                .filter(|c| *c > 0)
                .or_else(|| profile.map(|p| p.gpu_count))
                .unwrap_or(0),
        }
    }

    pub fn reference(&self) -> ResolvedReference {
        let kind = match self.scope {
            Scope::Namespace => "AIMServiceTemplate",
            Scope::Cluster => "AIMClusterServiceTemplate",
        };
        match (&self.scope, &self.namespace) {
            (Scope::Namespace, Some(namespace)) => Resolved::namespaced((), kind, &self.name, namespace).reference,
            _ => Resolved::cluster((), kind, &self.name).reference,
        }
    }
}

/// Outcome of picking a template for a service.
#[derive(Clone, Debug, PartialEq)]
pub enum Selection {
    Selected(TemplateCandidate),
    /// Nothing matches the model and overrides.
    NoCandidates,
    /// Matching templates exist and some are still being prepared.
    Awaiting(usize),
    /// Matching templates exist but none of them can become ready.
    Unsuitable(usize),
}

impl Selection {
    pub fn selected(&self) -> Option<&TemplateCandidate> {
        match self {
            Selection::Selected(candidate) => Some(candidate),
            _ => None,
        }
    }
}

fn matches_overrides(candidate: &TemplateCandidate, overrides: &ServiceOverrides) -> bool {
    if overrides.metric.is_some() && candidate.metric != overrides.metric {
        return false;
    }
    if overrides.precision.is_some() && candidate.precision != overrides.precision {
        return false;
    }
    if let Some(selector) = &overrides.gpu_selector {
        if let Some(model) = selector.model.as_deref().filter(|m| !m.trim().is_empty()) {
            let wanted = normalize_gpu_model(model);
            if candidate.gpu_model.as_deref().map(normalize_gpu_model) != Some(wanted) {
                return false;
            }
        }
        if let Some(count) = selector.count.filter(|c| *c > 0) {
            if candidate.gpu_count > 0 && candidate.gpu_count != count {
                return false;
            }
        }
    }
    true
}

fn scope_rank(scope: Scope) -> u8 {
    match scope {
        Scope::Namespace => 0,
        Scope::Cluster => 1,
    }
}

fn metric_rank(metric: Option<Metric>) -> u8 {
    match metric {
        Some(Metric::Latency) => 0,
        Some(Metric::Throughput) => 1,
        None => 2,
    }
}

/// Total order over candidates, preferred first.
fn preference(a: &TemplateCandidate, b: &TemplateCandidate) -> Ordering {
    scope_rank(a.scope)
        .cmp(&scope_rank(b.scope))
        .then_with(|| metric_rank(a.metric).cmp(&metric_rank(b.metric)))
        .then_with(|| {
            let rank = |p: Option<Precision>| p.map(|p| p.rank()).unwrap_or(u8::MAX);
            rank(a.precision).cmp(&rank(b.precision))
        })
        .then_with(|| a.name.cmp(&b.name))
}

/// Pick the template a service without an explicit `templateName` runs on.
pub fn select_template(candidates: &[TemplateCandidate], model_name: &str, overrides: &ServiceOverrides) -> Selection {
    let matching: Vec<&TemplateCandidate> = candidates
        .iter()
        .filter(|c| c.model_name == model_name)
        .filter(|c| matches_overrides(c, overrides))
        .collect();
    if matching.is_empty() {
        return Selection::NoCandidates;
    }

    let best = matching
        .iter()
        .filter(|c| c.status == AimStatus::Ready)
        .min_by(|a, b| preference(a, b));
    if let Some(best) = best {
        return Selection::Selected((*best).clone());
    }

    let preparing = matching
        .iter()
        .filter(|c| matches!(c.status, AimStatus::Pending | AimStatus::Progressing))
        .count();
    if preparing > 0 {
        Selection::Awaiting(preparing)
    } else {
        Selection::Unsuitable(matching.len())
    }
}

pub fn selection_health(selection: &Selection) -> ComponentHealth {
    let c = COMPONENT_TEMPLATE;
    match selection {
        Selection::Selected(candidate) => ComponentHealth::ready(
            c,
            "TemplateSelected",
            format!("Selected {} template '{}'", candidate.scope.as_str(), candidate.name),
        ),
        Selection::NoCandidates => {
            ComponentHealth::failed(c, "TemplateNotFound", "No template matches the model and overrides")
        }
        Selection::Awaiting(count) => ComponentHealth::progressing(
            c,
            "AwaitingTemplate",
            format!("{} matching template(s) not ready yet", count),
        ),
        Selection::Unsuitable(count) => ComponentHealth::degraded(
            c,
            "NoReadyTemplate",
            format!("None of {} matching template(s) can become ready", count),
        ),
    }
}

/// Health of a template named explicitly by the service.
pub fn explicit_template_health(candidate: &TemplateCandidate) -> ComponentHealth {
    let c = COMPONENT_TEMPLATE;
    match candidate.status {
        AimStatus::Ready => ComponentHealth::ready(c, "TemplateResolved", format!("Template '{}' is ready", candidate.name)),
        AimStatus::Pending | AimStatus::Progressing => ComponentHealth::progressing(
            c,
            "AwaitingTemplate",
            format!("Template '{}' is not ready yet", candidate.name),
        ),
        AimStatus::Failed => ComponentHealth::failed(c, "TemplateFailed", format!("Template '{}' failed", candidate.name)),
        AimStatus::Degraded | AimStatus::NotAvailable => ComponentHealth::degraded(
            c,
            "TemplateNotReady",
            format!("Template '{}' is {}", candidate.name, candidate.status.as_str()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::service::GpuSelector;

    fn candidate(name: &str, scope: Scope, metric: Option<Metric>, precision: Option<Precision>) -> TemplateCandidate {
        TemplateCandidate {
            name: name.into(),
            scope,
            namespace: match scope {
                Scope::Namespace => Some("ml".into()),
                Scope::Cluster => None,
            },
            model_name: "llama".into(),
            status: AimStatus::Ready,
            metric,
            precision,
            gpu_model: Some("MI300X".into()),
            gpu_count: 1,
        }
    }

    fn selected_name(selection: &Selection) -> &str {
        &selection.selected().expect("a template").name
    }

    #[test]
    fn test_namespace_beats_cluster() {
        let candidates = vec![
            candidate("a-cluster", Scope::Cluster, Some(Metric::Latency), Some(Precision::Fp8)),
            candidate("z-local", Scope::Namespace, Some(Metric::Throughput), Some(Precision::Fp32)),
        ];
        let selection = select_template(&candidates, "llama", &ServiceOverrides::default());
        assert_eq!(selected_name(&selection), "z-local");
        assert_eq!(selection.selected().unwrap().reference().kind, "AIMServiceTemplate");
    }

    #[test]
    fn test_metric_then_precision_then_name() {
        let candidates = vec![
            candidate("b", Scope::Cluster, Some(Metric::Throughput), Some(Precision::Fp8)),
            candidate("c", Scope::Cluster, Some(Metric::Latency), Some(Precision::Bf16)),
            candidate("d", Scope::Cluster, Some(Metric::Latency), Some(Precision::Fp16)),
            candidate("a", Scope::Cluster, Some(Metric::Latency), Some(Precision::Fp16)),
        ];
        let selection = select_template(&candidates, "llama", &ServiceOverrides::default());
        assert_eq!(selected_name(&selection), "a");

        let mut reversed = candidates.clone();
        reversed.reverse();
        assert_eq!(selected_name(&select_template(&reversed, "llama", &ServiceOverrides::default())), "a");
    }

    #[test]
    fn test_overrides_filter() {
        let mut mi250 = candidate("mi250", Scope::Cluster, Some(Metric::Throughput), None);
        mi250.gpu_model = Some("Instinct MI250X".into());
        let candidates = vec![candidate("mi300", Scope::Cluster, Some(Metric::Latency), None), mi250];

        let overrides = ServiceOverrides {
            gpu_selector: Some(GpuSelector {
                model: Some("mi250x".into()),
                count: None,
            }),
            ..ServiceOverrides::default()
        };
        assert_eq!(selected_name(&select_template(&candidates, "llama", &overrides)), "mi250");

        let overrides = ServiceOverrides {
            precision: Some(Precision::Fp8),
            ..ServiceOverrides::default()
        };
        let selection = select_template(&candidates, "llama", &overrides);
        assert_eq!(selection, Selection::NoCandidates);
        assert_eq!(selection_health(&selection).state, AimStatus::Failed);
    }

    #[test]
    fn test_only_ready_candidates_qualify() {
        let mut pending = candidate("a", Scope::Namespace, Some(Metric::Latency), None);
        pending.status = AimStatus::Progressing;
        let mut broken = candidate("b", Scope::Cluster, Some(Metric::Latency), None);
        broken.status = AimStatus::Failed;

        let selection = select_template(&[pending.clone(), broken.clone()], "llama", &ServiceOverrides::default());
        assert_eq!(selection, Selection::Awaiting(1));
        assert_eq!(selection_health(&selection).state, AimStatus::Progressing);

        let selection = select_template(&[broken], "llama", &ServiceOverrides::default());
        assert_eq!(selection, Selection::Unsuitable(1));
        assert_eq!(selection_health(&selection).state, AimStatus::Degraded);
    }

    #[test]
    fn test_other_models_ignored() {
        let mut other = candidate("other", Scope::Cluster, None, None);
        other.model_name = "mistral".into();
        assert_eq!(
            select_template(&[other], "llama", &ServiceOverrides::default()),
            Selection::NoCandidates
        );
    }
}
