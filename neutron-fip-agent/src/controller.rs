use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use kube::{runtime::watcher::Config, Api, Client};
use log::{error, info};
use neutron_fip_core::resources::crd::v1::{fip::Fip, port::Port, vpc::Vpc};
use tokio::{join, sync::watch};

use crate::{
    cache::{start_cache, start_routed_cache},
    cluster::{ClusterApi, KubeClusterApi},
    config::ControllerConfig,
    dispatch::{
        keymutex::KeyMutex,
        queue::{RetryPolicy, WorkQueue},
        spawn_workers,
    },
    fip::{
        applier::apply_fip_patch,
        gc::FipCollector,
        pod::{handle_pod_request, route_pod_event},
        sync::FipSynchronizer,
        FipContext,
    },
    port::{reconciler::PortReconciler, route_port_event},
    provider::NetworkProvider,
};

fn watcher_config(label_selector: &Option<String>) -> Config {
    match label_selector {
        Some(selector) => Config::default().labels(selector),
        None => Config::default(),
    }
}

/// Runs every engine until a termination signal arrives, then drains the
/// queues before returning.
pub async fn run_controller(config: ControllerConfig, client: Client, provider: Arc<dyn NetworkProvider>) {
    let config = Arc::new(config);
    let cluster: Arc<dyn ClusterApi> = Arc::new(KubeClusterApi::new(client.clone()));
    let policy = || {
        RetryPolicy::new(
            config.retry_base_delay,
            config.retry_max_delay,
            config.max_retries,
        )
    };

    let patch_queue = Arc::new(WorkQueue::new("fip-patch", policy()));
    let pod_queue = Arc::new(WorkQueue::new("pod-fip", policy()));
    let port_queue = Arc::new(WorkQueue::new("port", policy()));

    let port_api = match &config.port_namespace {
        Some(namespace) => Api::<Port>::namespaced(client.clone(), namespace),
        None => Api::<Port>::all(client.clone()),
    };

    let (vpc_cache, vpcs) = start_cache(
        Api::<Vpc>::all(client.clone()),
        watcher_config(&config.vpc_label_selector),
    );
    let (fip_cache, fips) = start_cache(Api::<Fip>::all(client.clone()), Config::default());
    let (pod_cache, pods) = start_routed_cache(
        Api::<Pod>::all(client.clone()),
        watcher_config(&config.pod_label_selector),
        Some(pod_queue.clone()),
        route_pod_event,
    );
    let (port_cache, ports) = start_routed_cache(
        port_api,
        Config::default(),
        Some(port_queue.clone()),
        route_port_event,
    );

    let caches = vec![
        tokio::spawn(vpc_cache),
        tokio::spawn(fip_cache),
        tokio::spawn(pod_cache),
        tokio::spawn(port_cache),
    ];

    info!("Waiting for caches to sync...");

    let synced = join!(
        vpcs.wait_ready(),
        fips.wait_ready(),
        pods.wait_ready(),
        ports.wait_ready()
    );

    if synced != (true, true, true, true) {
        error!("Caches couldn't be synced, exiting!");
        caches.iter().for_each(|cache| cache.abort());
        return;
    }

    let context = Arc::new(FipContext {
        config: config.clone(),
        cluster: cluster.clone(),
        provider: provider.clone(),
        patches: patch_queue.clone(),
        fip_mutex: KeyMutex::new(config.key_mutex_shards),
        allocation_mutex: KeyMutex::new(config.key_mutex_shards),
        applied: watch::channel(0).0,
        vpcs: vpcs.store.clone(),
        fips: fips.store.clone(),
        pods: pods.store.clone(),
    });
    let port_reconciler = Arc::new(PortReconciler {
        ports: ports.store.clone(),
        provider,
        cluster,
        port_mutex: KeyMutex::new(config.key_mutex_shards),
    });

    let synchronizer = FipSynchronizer::new(context.clone());
    synchronizer.initialize().await;

    let mut workers = Vec::new();
    workers.extend(spawn_workers(patch_queue.clone(), config.worker_count, {
        let context = context.clone();
        move |patch| {
            let context = context.clone();
            async move { apply_fip_patch(&context, patch).await }
        }
    }));
    workers.extend(spawn_workers(pod_queue.clone(), config.worker_count, {
        let context = context.clone();
        move |request| {
            let context = context.clone();
            async move { handle_pod_request(&context, request).await }
        }
    }));
    workers.extend(spawn_workers(port_queue.clone(), config.worker_count, {
        move |item| {
            let reconciler = port_reconciler.clone();
            async move { reconciler.reconcile(item).await }
        }
    }));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let collector = FipCollector::new(context);
    let loops = vec![
        tokio::spawn({
            let shutdown = shutdown_rx.clone();
            async move { synchronizer.start(shutdown).await }
        }),
        tokio::spawn(async move { collector.start(shutdown_rx).await }),
    ];

    info!("Controller started!");

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Couldn't listen for the termination signal! {err}");
    }

    info!("Shutting down...");

    shutdown_tx.send_replace(true);
    for task in loops {
        if let Err(err) = task.await {
            error!("Background loop failed! {err}");
        }
    }

    // pod handling feeds the patch queue, so it drains first
    pod_queue.shutdown_with_drain().await;
    port_queue.shutdown_with_drain().await;
    patch_queue.shutdown_with_drain().await;

    for worker in workers {
        if let Err(err) = worker.await {
            error!("Worker failed! {err}");
        }
    }

    caches.iter().for_each(|cache| cache.abort());

    info!("Controller stopped!");
}
