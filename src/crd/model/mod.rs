use futures::future::ready;
use kube::{
    api::{Api, ListParams},
    client::Client,
    ResourceExt,
};

use crate::engine::FetchResult;
use crate::resolve::{resolve, Resolution, Resolved};

pub mod model;
pub use model::*;

/// What consumers of a catalog entry need, regardless of its scope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelRef {
    pub name: String,
    pub image: String,
}

impl From<&AIMModel> for ModelRef {
    fn from(model: &AIMModel) -> Self {
        ModelRef {
            name: model.metadata.name.clone().unwrap_or_default(),
            image: model.spec.image.clone(),
        }
    }
}

impl From<&AIMClusterModel> for ModelRef {
    fn from(model: &AIMClusterModel) -> Self {
        ModelRef {
            name: model.metadata.name.clone().unwrap_or_default(),
            image: model.spec.image.clone(),
        }
    }
}

/// Resolve a model name. Namespaced callers look at their own namespace first;
/// cluster-scoped callers (`namespace == None`) only see cluster entries.
pub async fn resolve_model(client: &Client, namespace: Option<&str>, name: &str) -> Resolution<ModelRef> {
    let clusters: Api<AIMClusterModel> = Api::all(client.clone());
    let cluster_lookup = move || async move {
        FetchResult::from_kube(clusters.get(name).await)
            .map(|m| Resolved::cluster(ModelRef::from(&m), "AIMClusterModel", name))
    };

    match namespace {
        Some(ns) => {
            let models: Api<AIMModel> = Api::namespaced(client.clone(), ns);
            let namespaced = async move {
                FetchResult::from_kube(models.get(name).await)
                    .map(|m| Resolved::namespaced(ModelRef::from(&m), "AIMModel", name, ns))
            };
            resolve(name, namespaced, cluster_lookup).await
        }
        None => resolve(name, ready(FetchResult::NotFound), cluster_lookup).await,
    }
}

/// First entry by name whose image is `image`.
fn by_image<'a, K: ResourceExt>(items: &'a [K], image: &str, image_of: fn(&K) -> &str) -> Option<&'a K> {
    items
        .iter()
        .filter(|m| image_of(m) == image)
        .min_by_key(|m| m.name_any())
}

/// Resolve a catalog entry by container image, namespace entries first.
pub async fn resolve_model_by_image(client: &Client, namespace: &str, image: &str) -> Resolution<ModelRef> {
    let models: Api<AIMModel> = Api::namespaced(client.clone(), namespace);
    let clusters: Api<AIMClusterModel> = Api::all(client.clone());

    let namespaced = async move {
        match models.list(&ListParams::default()).await {
            Ok(list) => FetchResult::from_option(by_image(&list.items, image, |m| m.spec.image.as_str()).map(|m| {
                Resolved::namespaced(ModelRef::from(m), "AIMModel", &m.name_any(), namespace)
            })),
            Err(err) => FetchResult::Error(err.into()),
        }
    };
    let cluster_lookup = move || async move {
        match clusters.list(&ListParams::default()).await {
            Ok(list) => FetchResult::from_option(
                by_image(&list.items, image, |m| m.spec.image.as_str())
                    .map(|m| Resolved::cluster(ModelRef::from(m), "AIMClusterModel", &m.name_any())),
            ),
            Err(err) => FetchResult::Error(err.into()),
        }
    };
    resolve(image, namespaced, cluster_lookup).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PlanResult;
    use crate::errors::Error;
    use kube::api::ObjectMeta;

    #[test]
    fn test_cluster_models_are_append_only() {
        let model = AIMClusterModel {
            metadata: ObjectMeta {
                name: Some("llama-3-8b".into()),
                ..ObjectMeta::default()
            },
            spec: AIMClusterModelSpec {
                image: "ghcr.io/amd/llama-3-8b:0.8.4".into(),
                description: None,
            },
            status: None,
        };
        let mut plan = PlanResult::new();
        plan.apply(&model).unwrap();
        match plan.delete(&model) {
            Err(Error::AppendOnlyDeletion(kind)) => assert_eq!(kind, "AIMClusterModel"),
            other => panic!("expected refusal, got {:?}", other),
        }
        assert!(plan.to_delete().is_empty());
        assert_eq!(plan.to_apply().len(), 1);
    }

    #[test]
    fn test_by_image_is_deterministic() {
        let model = |name: &str, image: &str| AIMModel {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some("ml".into()),
                ..ObjectMeta::default()
            },
            spec: AIMModelSpec {
                image: image.into(),
                description: None,
            },
            status: None,
        };
        let models = vec![
            model("zeta", "ghcr.io/amd/llama:1"),
            model("alpha", "ghcr.io/amd/llama:1"),
            model("beta", "ghcr.io/amd/mistral:1"),
        ];
        let found = by_image(&models, "ghcr.io/amd/llama:1", |m| m.spec.image.as_str()).unwrap();
        assert_eq!(found.name_any(), "alpha");
        assert!(by_image(&models, "ghcr.io/amd/qwen:1", |m| m.spec.image.as_str()).is_none());
    }
}
