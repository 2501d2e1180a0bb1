//! # Watch Loop
//!
//! One kube-runtime `Controller` per workload kind, run side by side.
//!
//! Each controller watches its workload kind and ConfigMaps and Secrets. The
//! workload stream is filtered down to changes a reconcile depends on, so
//! status writes from the workload controllers are dropped. Child events go
//! through an [`OwnerIndex`], so a change to a child triggers the workloads
//! that own it (and those that just stopped owning it).

use crate::config::SharedControllerConfig;
use crate::controller::reconciler::{reconcile, OwnerIndex, Reconciler};
use crate::controller::server::ServerState;
use crate::runtime::error_policy::{handle_reconciliation_error, log_controller_result};
use crate::store::ConfigSource;
use crate::workload::Workload;
use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::NamespaceResourceScope;
use kube::{Api, Client, Resource};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{
    controller, predicates, reflector, watcher, Controller, Predicate, WatchStreamExt,
};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn, Instrument};

/// Api for `K` in the watched namespace, or across the cluster
fn scoped_api<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
    K::DynamicType: Default,
{
    match namespace {
        Some(namespace) => Api::namespaced(client, namespace),
        None => Api::all(client),
    }
}

fn deletion_requested<K: Resource>(obj: &K) -> Option<u64> {
    Some(u64::from(obj.meta().deletion_timestamp.is_some()))
}

/// Workload properties a reconcile depends on
///
/// Spec changes bump the generation; opt-in, finalizers and deletion live in
/// metadata. Status-only updates change none of these.
#[must_use]
pub fn workload_changes<K: Workload>() -> impl Predicate<K> + Send + Sync + 'static {
    predicates::generation::<K>
        .combine(predicates::annotations::<K>)
        .combine(predicates::finalizers::<K>)
        .combine(deletion_requested::<K>)
}

/// Object to map for one child watch event
///
/// A deleted child arrives without owner references, so the index drops it
/// and its last owners still get triggered.
#[must_use]
pub fn touched_child<C: Resource>(event: watcher::Event<C>) -> Option<C> {
    match event {
        watcher::Event::Apply(obj) | watcher::Event::InitApply(obj) => Some(obj),
        watcher::Event::Delete(mut obj) => {
            obj.meta_mut().owner_references = None;
            Some(obj)
        }
        watcher::Event::Init | watcher::Event::InitDone => None,
    }
}

fn child_stream<C>(api: Api<C>) -> impl Stream<Item = Result<C, watcher::Error>> + Send + 'static
where
    C: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
{
    watcher(api, watcher::Config::default())
        .default_backoff()
        .filter_map(|event| futures::future::ready(event.map(touched_child).transpose()))
}

/// Workloads of kind `K` to reconcile after a change to `child`
pub fn workloads_for_child<K: Workload>(
    index: &OwnerIndex,
    child: Option<ConfigSource>,
) -> Vec<ObjectRef<K>> {
    let Some(child) = child else {
        return Vec::new();
    };
    index
        .observe(&child)
        .iter()
        .map(|name| ObjectRef::new(name).within(&child.id.namespace))
        .collect()
}

/// Wait for SIGINT, or SIGTERM on unix
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for SIGINT: {}", e);
            futures::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                futures::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = futures::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

/// Run the controller for workload kind `K` until shutdown, restarting it if its stream ends
async fn run_controller<K: Workload>(
    client: Client,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
    controller_config: SharedControllerConfig,
) {
    loop {
        if !server_state.is_ready() {
            info!("Shutdown requested, not starting {} controller", K::KIND);
            break;
        }

        let config = controller_config.read().await.clone();
        let namespace = config.watch_namespace.as_deref();
        let workloads = scoped_api::<K>(client.clone(), namespace);
        let config_maps = scoped_api::<ConfigMap>(client.clone(), namespace);
        let secrets = scoped_api::<Secret>(client.clone(), namespace);

        let index = OwnerIndex::new(K::KIND);
        let config_map_index = index.clone();
        let secret_index = index;

        info!(
            "Starting {} controller (namespace: {}, concurrency: {})",
            K::KIND,
            namespace.unwrap_or("<all>"),
            config.max_concurrent_reconciliations
        );

        let (reader, writer) = reflector::store::<K>();
        let workload_stream = reflector(
            writer,
            watcher(workloads, watcher::Config::default().any_semantic()).default_backoff(),
        )
        .applied_objects()
        .predicate_filter(workload_changes::<K>());

        Controller::for_stream(workload_stream, reader)
            .with_config(
                controller::Config::default().concurrency(config.max_concurrent_reconciliations),
            )
            .watches_stream(child_stream(config_maps), move |config_map: ConfigMap| {
                workloads_for_child::<K>(&config_map_index, ConfigSource::from_config_map(&config_map))
            })
            .watches_stream(child_stream(secrets), move |secret: Secret| {
                workloads_for_child::<K>(&secret_index, ConfigSource::from_secret(&secret))
            })
            .shutdown_on_signal()
            .run(
                reconcile::<K>,
                handle_reconciliation_error::<K>,
                Arc::clone(&reconciler),
            )
            .for_each(|result| {
                log_controller_result(&result);
                futures::future::ready(())
            })
            .await;

        if !server_state.is_ready() {
            info!("{} controller stopped gracefully", K::KIND);
            break;
        }

        let delay = controller_config.read().await.watch_restart_delay_duration();
        warn!(
            "{} controller stream ended, restarting in {} seconds...",
            K::KIND,
            delay.as_secs()
        );
        tokio::time::sleep(delay).await;
    }
}

/// Run the Deployment, DaemonSet and StatefulSet controllers until shutdown
///
/// A shutdown signal marks the server not ready (so probes fail while
/// in-flight reconciliations drain) and stops every controller.
///
/// # Errors
///
/// Currently infallible; the signature matches the rest of the runtime.
pub async fn run_watch_loop(
    client: Client,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
    controller_config: SharedControllerConfig,
) -> Result<(), anyhow::Error> {
    info!("Starting controller watch loop...");

    let shutdown_server_state = Arc::clone(&server_state);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
        shutdown_server_state.is_ready.store(false, Ordering::Relaxed);
        info!("Marked server as not ready, waiting for in-flight reconciliations to complete...");
    });

    let watch_span = tracing::span!(tracing::Level::INFO, "controller.watch", operation = "watch_loop");
    async {
        tokio::join!(
            run_controller::<Deployment>(
                client.clone(),
                Arc::clone(&reconciler),
                Arc::clone(&server_state),
                Arc::clone(&controller_config),
            ),
            run_controller::<DaemonSet>(
                client.clone(),
                Arc::clone(&reconciler),
                Arc::clone(&server_state),
                Arc::clone(&controller_config),
            ),
            run_controller::<StatefulSet>(
                client.clone(),
                Arc::clone(&reconciler),
                Arc::clone(&server_state),
                Arc::clone(&controller_config),
            ),
        );
    }
    .instrument(watch_span)
    .await;

    info!("Controller stopped gracefully");
    Ok(())
}
