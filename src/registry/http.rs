use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;

use crate::errors::Error;

use super::{ImageRegistry, DOCKER_REGISTRY};

const DOCKER_HUB_API: &str = "https://hub.docker.com/v2";
const DOCKER_HUB_REGISTRY_HOST: &str = "registry-1.docker.io";

#[derive(Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct Catalog {
    #[serde(default)]
    repositories: Vec<String>,
}

#[derive(Deserialize)]
struct HubRepository {
    name: String,
}

#[derive(Deserialize)]
struct HubPage {
    #[serde(default)]
    results: Vec<HubRepository>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// Anonymous client for the registry v2 API and the Docker Hub listing API.
pub struct HttpRegistry {
    client: Client,
}

impl HttpRegistry {
    pub fn new(timeout: Duration) -> Result<Self, Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(HttpRegistry { client })
    }

    fn host(registry: &str) -> &str {
        if registry == DOCKER_REGISTRY {
            DOCKER_HUB_REGISTRY_HOST
        } else {
            registry
        }
    }

    /// GET a registry endpoint, answering a bearer challenge with an anonymous token once.
    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, Error> {
        let response = self.client.get(url).send().await?;
        let response = if response.status() == StatusCode::UNAUTHORIZED {
            let challenge = response
                .headers()
                .get(header::WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
                .ok_or_else(|| Error::RegistryError(format!("{} requires credentials", url)))?;
            let token = self.anonymous_token(&challenge).await?;
            self.client.get(url).bearer_auth(token).send().await?
        } else {
            response
        };

        if !response.status().is_success() {
            return Err(Error::RegistryError(format!("unexpected status {} from {}", response.status(), url)));
        }
        Ok(response.json::<T>().await?)
    }

    async fn anonymous_token(&self, challenge: &str) -> Result<String, Error> {
        let params = parse_bearer_challenge(challenge)
            .ok_or_else(|| Error::RegistryError(format!("unsupported auth challenge '{}'", challenge)))?;
        let realm = params
            .iter()
            .find(|(k, _)| k == "realm")
            .map(|(_, v)| v.clone())
            .ok_or_else(|| Error::RegistryError("auth challenge without realm".to_string()))?;
        let query: Vec<(String, String)> = params.into_iter().filter(|(k, _)| k != "realm").collect();

        debug!("Requesting anonymous registry token from {}", realm);
        let response: TokenResponse = self.client.get(&realm).query(&query).send().await?.json().await?;
        response
            .token
            .or(response.access_token)
            .ok_or_else(|| Error::RegistryError("token endpoint returned no token".to_string()))
    }
}

/// `Bearer realm="..",service="..",scope=".."` into key/value pairs.
pub(crate) fn parse_bearer_challenge(challenge: &str) -> Option<Vec<(String, String)>> {
    let rest = challenge.trim().strip_prefix("Bearer ")?;
    let mut params = Vec::new();
    let mut remaining = rest.trim();
    while !remaining.is_empty() {
        let (key, after_key) = remaining.split_once('=')?;
        let after_key = after_key.strip_prefix('"')?;
        let end = after_key.find('"')?;
        params.push((key.trim().to_string(), after_key[..end].to_string()));
        remaining = after_key[end + 1..].trim_start_matches(',').trim();
    }
    Some(params)
}

#[async_trait]
impl ImageRegistry for HttpRegistry {
    async fn list_tags(&self, registry: &str, repository: &str) -> Result<Vec<String>, Error> {
        let url = format!("https://{}/v2/{}/tags/list", Self::host(registry), repository);
        let list: TagList = self.get_json(&url).await?;
        Ok(list.tags.unwrap_or_default())
    }

    async fn list_repositories(&self, registry: &str, namespace: &str) -> Result<Vec<String>, Error> {
        if registry == DOCKER_REGISTRY {
            let mut repositories = Vec::new();
            let mut next = Some(format!("{}/namespaces/{}/repositories?page_size=100", DOCKER_HUB_API, namespace));
            while let Some(url) = next {
                let page: HubPage = self.get_json(&url).await?;
                repositories.extend(page.results.into_iter().map(|r| format!("{}/{}", namespace, r.name)));
                next = page.next.filter(|n| !n.is_empty());
            }
            return Ok(repositories);
        }

        let url = format!("https://{}/v2/_catalog", Self::host(registry));
        let catalog: Catalog = self.get_json(&url).await?;
        let prefix = format!("{}/", namespace);
        Ok(catalog
            .repositories
            .into_iter()
            .filter(|repo| repo.starts_with(&prefix))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bearer_challenge() {
        let params = parse_bearer_challenge(
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:amd/aim:pull""#,
        )
        .unwrap();
        assert_eq!(
            params,
            vec![
                ("realm".to_string(), "https://auth.docker.io/token".to_string()),
                ("service".to_string(), "registry.docker.io".to_string()),
                ("scope".to_string(), "repository:amd/aim:pull".to_string()),
            ]
        );
        assert!(parse_bearer_challenge("Basic realm=\"x\"").is_none());
    }
}
