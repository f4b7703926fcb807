use crate::crd::model_source::ModelSourceFilter;
use crate::engine::ComponentHealth;

use super::{scan::FilterResult, RegistryImage};

pub const COMPONENT_FILTERS: &str = "Filters";

/// `*` matches any run of characters, everything else is literal.
pub fn matches_wildcard(pattern: &str, value: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == value;
    }

    let first = parts[0];
    let last = parts[parts.len() - 1];
    if value.len() < first.len() + last.len() || !value.starts_with(first) || !value.ends_with(last) {
        return false;
    }

    let mut rest = &value[first.len()..value.len() - last.len()];
    for middle in &parts[1..parts.len() - 1] {
        match rest.find(middle) {
            Some(idx) => rest = &rest[idx + middle.len()..],
            None => return false,
        }
    }
    true
}

/// The parts of a filter's `image` pattern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedFilter {
    pub registry: Option<String>,
    pub repository: String,
    pub tag: Option<String>,
}

impl ParsedFilter {
    /// Split `[registry/]repository[:tag]`. The first segment is a registry when it
    /// looks like a host (has a dot or port, or is `localhost`).
    pub fn parse(image: &str) -> Self {
        let image = image.trim();
        let (path, tag) = match image.rfind(':') {
            Some(idx) if idx > image.rfind('/').unwrap_or(0) => (&image[..idx], Some(image[idx + 1..].to_string())),
            _ => (image, None),
        };

        let (registry, repository) = match path.split_once('/') {
            Some((first, rest)) if first.contains('.') || first.contains(':') || first == "localhost" => {
                (Some(first.to_string()), rest.to_string())
            }
            _ => (None, path.to_string()),
        };

        ParsedFilter {
            registry,
            repository,
            tag: tag.filter(|t| !t.is_empty()),
        }
    }

    pub fn repository_has_wildcard(&self) -> bool {
        self.repository.contains('*')
    }

    /// Exact repository and exact tag, nothing to ask the registry.
    pub fn is_static(&self) -> bool {
        !self.repository_has_wildcard() && self.tag.as_deref().map(|t| !t.contains('*')).unwrap_or(false)
    }

    /// Leading path segments free of wildcards, used to list candidate repositories.
    pub fn namespace(&self) -> Option<String> {
        let fixed: Vec<&str> = self
            .repository
            .split('/')
            .take_while(|segment| !segment.contains('*'))
            .collect();
        if fixed.is_empty() {
            None
        } else {
            Some(fixed.join("/"))
        }
    }
}

/// Tag pattern of a filter: the one in `image` wins over the `tag` field.
pub fn tag_pattern<'a>(filter: &'a ModelSourceFilter, parsed: &'a ParsedFilter) -> Option<&'a str> {
    parsed.tag.as_deref().or(filter.tag.as_deref())
}

/// Repository pattern, exclusion list and tag pattern, in that order.
pub fn matches_filter(image: &RegistryImage, filter: &ModelSourceFilter, parsed: &ParsedFilter) -> bool {
    if !matches_wildcard(&parsed.repository, &image.repository) {
        return false;
    }
    if filter.exclude.iter().any(|excluded| excluded == &image.repository) {
        return false;
    }
    match tag_pattern(filter, parsed) {
        Some(pattern) => matches_wildcard(pattern, &image.tag),
        None => true,
    }
}

/// Fold per-filter outcomes into one health: all succeeded, some failed or all failed.
pub fn compose_filter_health(results: &[FilterResult]) -> ComponentHealth {
    let total = results.len();
    if total == 0 {
        return ComponentHealth::progressing(COMPONENT_FILTERS, "NoFilters", "No filters configured");
    }

    let errors = results.iter().filter(|r| r.error.is_some()).count();
    if errors == 0 {
        ComponentHealth::ready(COMPONENT_FILTERS, "AllFiltersSucceeded", format!("All {} filters succeeded", total))
    } else if errors < total {
        ComponentHealth::degraded(
            COMPONENT_FILTERS,
            "SomeFiltersFailed",
            format!("{} of {} filters had errors", errors, total),
        )
    } else {
        ComponentHealth::failed(COMPONENT_FILTERS, "AllFiltersFailed", format!("All {} filters failed", total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::AimStatus;

    fn filter(image: &str, exclude: &[&str]) -> ModelSourceFilter {
        ModelSourceFilter {
            image: image.to_string(),
            exclude: exclude.iter().map(|s| s.to_string()).collect(),
            tag: None,
        }
    }

    fn result(error: Option<&str>) -> FilterResult {
        FilterResult {
            filter: filter("amdenterpriseai/aim-*", &[]),
            images: vec![],
            error: error.map(String::from),
        }
    }

    #[test]
    fn test_matches_wildcard() {
        assert!(matches_wildcard("aim-*", "aim-llama"));
        assert!(matches_wildcard("*-llama", "aim-llama"));
        assert!(matches_wildcard("a*m*a", "aim-llama"));
        assert!(matches_wildcard("*", ""));
        assert!(!matches_wildcard("aim-*", "base-llama"));
        assert!(!matches_wildcard("aim", "aim-llama"));
        assert!(!matches_wildcard("ab*ba", "aba"));
    }

    #[test]
    fn test_parse_filter() {
        let parsed = ParsedFilter::parse("ghcr.io/silogen/aim-*:0.8.*");
        assert_eq!(parsed.registry.as_deref(), Some("ghcr.io"));
        assert_eq!(parsed.repository, "silogen/aim-*");
        assert_eq!(parsed.tag.as_deref(), Some("0.8.*"));
        assert_eq!(parsed.namespace().as_deref(), Some("silogen"));
        assert!(!parsed.is_static());

        let hub = ParsedFilter::parse("amdenterpriseai/aim-llama:0.8.4");
        assert_eq!(hub.registry, None);
        assert!(hub.is_static());

        let local = ParsedFilter::parse("localhost:5000/models/mistral");
        assert_eq!(local.registry.as_deref(), Some("localhost:5000"));
        assert_eq!(local.repository, "models/mistral");
        assert_eq!(local.tag, None);
        assert!(!local.is_static());

        assert_eq!(ParsedFilter::parse("*").namespace(), None);
    }

    #[test]
    fn test_matches_filter_with_exclusions_and_tags() {
        let f = ModelSourceFilter {
            tag: Some("0.8.*".into()),
            ..filter("amdenterpriseai/aim-*", &["amdenterpriseai/aim-base"])
        };
        let parsed = ParsedFilter::parse(&f.image);
        let image = |repo: &str, tag: &str| RegistryImage {
            registry: "docker.io".into(),
            repository: repo.into(),
            tag: tag.into(),
        };
        assert!(matches_filter(&image("amdenterpriseai/aim-llama", "0.8.4"), &f, &parsed));
        assert!(!matches_filter(&image("amdenterpriseai/aim-llama", "0.7.0"), &f, &parsed));
        assert!(!matches_filter(&image("amdenterpriseai/aim-base", "0.8.4"), &f, &parsed));
        assert!(!matches_filter(&image("other/aim-llama", "0.8.4"), &f, &parsed));
    }

    #[test]
    fn test_compose_filter_health() {
        let health = compose_filter_health(&[result(None), result(Some("timeout")), result(None)]);
        assert_eq!(health.state, AimStatus::Degraded);
        assert_eq!(health.reason, "SomeFiltersFailed");
        assert_eq!(health.message, "1 of 3 filters had errors");

        let health = compose_filter_health(&[result(None), result(None), result(None)]);
        assert_eq!(health.state, AimStatus::Ready);
        assert_eq!(health.reason, "AllFiltersSucceeded");

        let health = compose_filter_health(&[result(Some("a")), result(Some("b")), result(Some("c"))]);
        assert_eq!(health.state, AimStatus::Failed);
        assert_eq!(health.reason, "AllFiltersFailed");
        assert_eq!(health.message, "All 3 filters failed");

        assert_eq!(compose_filter_health(&[]).reason, "NoFilters");
    }
}
