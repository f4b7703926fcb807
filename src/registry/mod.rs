//! Container registry queries used by model sources.

use std::fmt;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::errors::Error;

pub mod filter;
pub mod http;
pub mod scan;

pub use filter::{compose_filter_health, matches_wildcard, ParsedFilter};
pub use http::HttpRegistry;
pub use scan::{scan_filters, FilterResult};

pub const DOCKER_REGISTRY: &str = "docker.io";

/// One `registry/repository:tag` found while scanning.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistryImage {
    pub registry: String,
    pub repository: String,
    pub tag: String,
}

impl RegistryImage {
    /// Pullable reference. Docker Hub images omit the registry.
    pub fn uri(&self) -> String {
        if self.registry.is_empty() || self.registry == DOCKER_REGISTRY {
            format!("{}:{}", self.repository, self.tag)
        } else {
            format!("{}/{}:{}", self.registry, self.repository, self.tag)
        }
    }
}

impl fmt::Display for RegistryImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri())
    }
}

/// Listing capability of a container registry. Credentials are the implementor's concern.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    async fn list_tags(&self, registry: &str, repository: &str) -> Result<Vec<String>, Error>;

    /// Repositories under `namespace`, returned as `namespace/name`.
    async fn list_repositories(&self, registry: &str, namespace: &str) -> Result<Vec<String>, Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_uri() {
        let hub = RegistryImage {
            registry: DOCKER_REGISTRY.into(),
            repository: "amdenterpriseai/aim-llama".into(),
            tag: "0.8.4".into(),
        };
        assert_eq!(hub.uri(), "amdenterpriseai/aim-llama:0.8.4");

        let ghcr = RegistryImage {
            registry: "ghcr.io".into(),
            ..hub
        };
        assert_eq!(ghcr.to_string(), "ghcr.io/amdenterpriseai/aim-llama:0.8.4");
    }
}
