use std::{fmt::Debug, sync::Arc, time::Duration};

use futures::{
    future::{join4, BoxFuture},
    FutureExt, StreamExt,
};
use k8s_openapi::api::batch::v1::Job;
use kube::{
    api::Api,
    client::Client,
    runtime::{controller::Action, watcher, Controller},
    Resource, ResourceExt,
};
use log::{debug, warn};
use serde::de::DeserializeOwned;

use crate::crd::cache::AIMTemplateCache;
use crate::crd::common::LABEL_COMPONENT;
use crate::crd::model_source::{AIMClusterModelSource, ModelSourceReconciler};
use crate::crd::service::{AIMService, ServiceReconciler};
use crate::crd::template::{
    job::DISCOVERY_COMPONENT_LABEL, AIMClusterServiceTemplate, AIMServiceTemplate, TemplateReconciler,
};
use crate::engine::{DomainReconciler, KubeStore, ObjectStore, Pipeline};
use crate::errors::Error;
use crate::metrics::{error_happened, reconciliation_happened};
use crate::registry::http::HttpRegistry;
use crate::Config;

/// Shared state handed to every reconciliation of one kind.
pub struct Context<R: DomainReconciler> {
    pub pipeline: Pipeline<R>,
    pub requeue: Duration,
}

async fn reconcile<R: DomainReconciler>(obj: Arc<R::Object>, ctx: Arc<Context<R>>) -> Result<Action, Error> {
    let kind = R::Object::kind(&());
    debug!("Reconciling {} '{}'", kind, obj.name_any());
    match ctx.pipeline.run(&obj).await {
        Ok(action) => {
            reconciliation_happened(&kind, "ok");
            Ok(action)
        }
        Err(err) => {
            reconciliation_happened(&kind, "error");
            Err(err)
        }
    }
}

fn error_policy<R: DomainReconciler>(obj: Arc<R::Object>, err: &Error, ctx: Arc<Context<R>>) -> Action {
    warn!(
        "{} '{}': reconciliation failed, retrying in {}s: {}",
        R::Object::kind(&()),
        obj.name_any(),
        ctx.requeue.as_secs(),
        err
    );
    error_happened(err.metric_name());
    Action::requeue(ctx.requeue)
}

/// Run `controller` until shutdown, driving each object through `pipeline`.
fn drive<R>(controller: Controller<R::Object>, pipeline: Pipeline<R>, requeue: Duration) -> BoxFuture<'static, ()>
where
    R: DomainReconciler,
    R::Object: DeserializeOwned + Debug,
{
    let context = Arc::new(Context { pipeline, requeue });
    controller
        .shutdown_on_signal()
        .run(reconcile::<R>, error_policy::<R>, context)
        .for_each(|result| async move {
            if let Err(err) = result {
                debug!("Controller event not handled: {:?}", err);
            }
        })
        .boxed()
}

fn discovery_jobs(client: &Client) -> (Api<Job>, watcher::Config) {
    let selector = format!("{}={}", LABEL_COMPONENT, DISCOVERY_COMPONENT_LABEL);
    (Api::all(client.clone()), watcher::Config::default().labels(&selector))
}

/// Build every controller. The returned future completes once all of them have drained.
pub fn init_controllers(client: Client, config: &Config) -> Result<BoxFuture<'static, ()>, Error> {
    let store: Arc<dyn ObjectStore> = Arc::new(KubeStore::new(client.clone()));
    let requeue = config.requeue;

    let (jobs, jobs_config) = discovery_jobs(&client);
    let cluster_templates = drive(
        Controller::new(Api::<AIMClusterServiceTemplate>::all(client.clone()), watcher::Config::default())
            .owns(jobs, jobs_config),
        Pipeline::new(
            TemplateReconciler::<AIMClusterServiceTemplate>::new(client.clone(), config.discovery.clone()),
            store.clone(),
            requeue,
        ),
        requeue,
    );

    let (jobs, jobs_config) = discovery_jobs(&client);
    let templates = drive(
        Controller::new(Api::<AIMServiceTemplate>::all(client.clone()), watcher::Config::default())
            .owns(jobs, jobs_config),
        Pipeline::new(
            TemplateReconciler::<AIMServiceTemplate>::new(client.clone(), config.discovery.clone()),
            store.clone(),
            requeue,
        ),
        requeue,
    );

    let sources = drive(
        Controller::new(Api::<AIMClusterModelSource>::all(client.clone()), watcher::Config::default()),
        Pipeline::new(
            ModelSourceReconciler {
                client: client.clone(),
                registry: Arc::new(HttpRegistry::new(config.registry_timeout)?),
                workers: config.registry_workers,
                scan_timeout: config.registry_timeout,
                resync: config.resync,
            },
            store.clone(),
            requeue,
        ),
        requeue,
    );

    let services = drive(
        Controller::new(Api::<AIMService>::all(client.clone()), watcher::Config::default())
            .owns(Api::<AIMTemplateCache>::all(client.clone()), watcher::Config::default()),
        Pipeline::new(ServiceReconciler::new(client, requeue), store, requeue),
        requeue,
    );

    Ok(join4(cluster_templates, templates, sources, services).map(|_| ()).boxed())
}
