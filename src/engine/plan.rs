use std::time::Duration;

use k8s_openapi::api::batch::v1::Job;
use kube::{
    api::{ApiResource, DynamicObject},
    Resource, ResourceExt,
};
use serde::Serialize;

use crate::errors::Error;

/// Deletion policy of a child kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    /// Instances are never deleted by the controller once created.
    AppendOnly,
    /// Deleted only when domain logic explicitly asks for it.
    Owned,
}

/// A kind this controller may create as a child of a reconciled object.
pub trait ChildResource: Resource<DynamicType = ()> + Serialize {
    const LIFECYCLE: Lifecycle;
}

impl ChildResource for Job {
    const LIFECYCLE: Lifecycle = Lifecycle::Owned;
}

/// A typed child erased into a dynamic object plus the API it lives under.
#[derive(Clone, Debug)]
pub struct PlannedObject {
    pub resource: ApiResource,
    pub object: DynamicObject,
}

impl PlannedObject {
    pub fn from_typed<K: ChildResource>(obj: &K) -> Result<Self, Error> {
        let mut value = serde_json::to_value(obj)?;
        value["apiVersion"] = serde_json::Value::String(K::api_version(&()).to_string());
        value["kind"] = serde_json::Value::String(K::kind(&()).to_string());
        let object: DynamicObject = serde_json::from_value(value)?;
        if object.metadata.name.is_none() {
            return Err(Error::MissingKey(".metadata.name"));
        }
        Ok(PlannedObject {
            resource: ApiResource::erase::<K>(&()),
            object,
        })
    }

    pub fn name(&self) -> String {
        self.object.name_any()
    }

    pub fn namespace(&self) -> Option<String> {
        self.object.namespace()
    }

    fn sort_key(&self) -> (String, String, String, String) {
        (
            self.resource.api_version.clone(),
            self.resource.kind.clone(),
            self.namespace().unwrap_or_default(),
            self.name(),
        )
    }

    /// `Kind/namespace/name`, for logs.
    pub fn describe(&self) -> String {
        match self.namespace() {
            Some(ns) => format!("{}/{}/{}", self.resource.kind, ns, self.name()),
            None => format!("{}/{}", self.resource.kind, self.name()),
        }
    }
}

/// Children to apply and delete in this pass. Never persisted.
#[derive(Clone, Debug, Default)]
pub struct PlanResult {
    to_apply: Vec<PlannedObject>,
    to_delete: Vec<PlannedObject>,
    pub requeue_after: Option<Duration>,
}

impl PlanResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `obj` for create-or-update.
    pub fn apply<K: ChildResource>(&mut self, obj: &K) -> Result<(), Error> {
        self.to_apply.push(PlannedObject::from_typed(obj)?);
        Ok(())
    }

    /// Queue `obj` for deletion. Append-only kinds are rejected.
    pub fn delete<K: ChildResource>(&mut self, obj: &K) -> Result<(), Error> {
        if K::LIFECYCLE == Lifecycle::AppendOnly {
            return Err(Error::AppendOnlyDeletion(K::kind(&()).to_string()));
        }
        self.to_delete.push(PlannedObject::from_typed(obj)?);
        Ok(())
    }

    /// Keep the shortest requested requeue.
    pub fn requeue(&mut self, after: Duration) {
        self.requeue_after = Some(match self.requeue_after {
            Some(existing) if existing < after => existing,
            _ => after,
        });
    }

    /// Objects to apply, ordered by apiVersion, kind, namespace and name.
    pub fn to_apply(&self) -> Vec<&PlannedObject> {
        let mut objects: Vec<&PlannedObject> = self.to_apply.iter().collect();
        objects.sort_by_key(|o| o.sort_key());
        objects
    }

    pub fn to_delete(&self) -> Vec<&PlannedObject> {
        let mut objects: Vec<&PlannedObject> = self.to_delete.iter().collect();
        objects.sort_by_key(|o| o.sort_key());
        objects
    }
}
