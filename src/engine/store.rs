use async_trait::async_trait;
use kube::{
    api::{Api, ApiResource, DeleteParams, DynamicObject, Patch, PatchParams},
    client::Client,
};
use log::info;
#[cfg(test)]
use mockall::automock;
use serde_json::{json, Value};

use crate::errors::Error;
use crate::metrics::kube_error_happened;

pub const FIELD_MANAGER: &str = "aim-controller";

/// Write side of the cluster object store.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Server-side apply, forcing ownership of the fields this controller authors.
    async fn apply(&self, resource: &ApiResource, object: &DynamicObject) -> Result<(), Error>;

    /// Delete one object. Already gone counts as success.
    async fn delete(&self, resource: &ApiResource, object: &DynamicObject) -> Result<(), Error>;

    /// Merge `status` into the status subresource, rejected when `resource_version` is stale.
    async fn patch_status(
        &self,
        resource: &ApiResource,
        namespace: Option<String>,
        name: String,
        resource_version: Option<String>,
        status: Value,
    ) -> Result<(), Error>;
}

pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        KubeStore { client }
    }

    fn api(&self, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, resource),
            None => Api::all_with(self.client.clone(), resource),
        }
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn apply(&self, resource: &ApiResource, object: &DynamicObject) -> Result<(), Error> {
        let name = object.metadata.name.as_deref().ok_or(Error::MissingKey(".metadata.name"))?;
        let api = self.api(resource, object.metadata.namespace.as_deref());
        let params = PatchParams::apply(FIELD_MANAGER).force();
        match api.patch(name, &params, &Patch::Apply(object)).await {
            Ok(_) => {
                info!(
                    "Applied {} '{}/{}'",
                    resource.kind,
                    object.metadata.namespace.as_deref().unwrap_or_default(),
                    name
                );
                Ok(())
            }
            Err(err) => {
                kube_error_happened("apply", &err);
                Err(err.into())
            }
        }
    }

    async fn delete(&self, resource: &ApiResource, object: &DynamicObject) -> Result<(), Error> {
        let name = object.metadata.name.as_deref().ok_or(Error::MissingKey(".metadata.name"))?;
        let api = self.api(resource, object.metadata.namespace.as_deref());
        match api.delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(err) => {
                let err: Error = err.into();
                if err.is_not_found() {
                    return Ok(());
                }
                if let Error::KubeError(kube_err) = &err {
                    kube_error_happened("delete", kube_err);
                }
                Err(err)
            }
        }
    }

    async fn patch_status(
        &self,
        resource: &ApiResource,
        namespace: Option<String>,
        name: String,
        resource_version: Option<String>,
        status: Value,
    ) -> Result<(), Error> {
        let api = self.api(resource, namespace.as_deref());
        let patch = json!({
            "apiVersion": resource.api_version,
            "kind": resource.kind,
            "metadata": { "resourceVersion": resource_version },
            "status": status,
        });
        match api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch)).await {
            Ok(_) => Ok(()),
            Err(err) => {
                kube_error_happened("patch_status", &err);
                Err(err.into())
            }
        }
    }
}
