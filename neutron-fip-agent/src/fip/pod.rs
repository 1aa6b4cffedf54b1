use std::collections::HashSet;

use k8s_openapi::api::core::v1::Pod;
use kube::{
    runtime::{
        reflector::{ObjectRef, Store},
        watcher::Event,
    },
    ResourceExt,
};
use log::info;
use neutron_fip_core::{
    allocation::plan::{plan_allocation, AllocationAction},
    helpers::split_resource_key,
    resources::annotations::{FipAnnotations, FipOperation, PodFipRequest},
};

use crate::{error::ReconcilerError, provider::Reservation};

use super::FipContext;

fn on_applied(pod: &Pod, previous: Option<&Pod>) -> Vec<PodFipRequest> {
    let deleting = pod.metadata.deletion_timestamp.is_some();
    let current = FipAnnotations::from_pod(pod);

    let request = |operation, annotations: &FipAnnotations| {
        PodFipRequest::from_pod(operation, pod).map(|request| PodFipRequest {
            annotations: annotations.clone(),
            ..request
        })
    };

    match previous {
        Some(previous) if previous.metadata.deletion_timestamp.is_some() => Vec::new(),
        _ if deleting => on_deleted(pod),
        None if current.requests_fip() => request(FipOperation::Add, &current).into_iter().collect(),
        None => Vec::new(),
        Some(previous) => {
            let old = FipAnnotations::from_pod(previous);

            if old == current {
                return Vec::new();
            }

            let release = Some(&old)
                .filter(|old| old.requests_fip())
                .and_then(|old| request(FipOperation::Del, old));
            let acquire = Some(&current)
                .filter(|current| current.requests_fip())
                .and_then(|current| request(FipOperation::Add, current));

            release.into_iter().chain(acquire).collect()
        }
    }
}

fn on_deleted(pod: &Pod) -> Vec<PodFipRequest> {
    PodFipRequest::from_pod(FipOperation::Del, pod)
        .filter(|request| request.annotations.requests_fip())
        .into_iter()
        .collect()
}

/// Translates a pod watch event into allocation requests. `store` still
/// holds the state from before the event.
pub fn route_pod_event(event: &Event<Pod>, store: &Store<Pod>) -> Vec<PodFipRequest> {
    let previous = |pod: &Pod| store.get(&ObjectRef::from_obj(pod));

    match event {
        Event::Applied(pod) => on_applied(pod, previous(pod).as_deref()),
        Event::Deleted(pod) => on_deleted(pod),
        Event::Restarted(pods) => {
            let listed = pods
                .iter()
                .map(|p| (p.namespace(), p.name_any()))
                .collect::<HashSet<_>>();

            let missing = store
                .state()
                .into_iter()
                .filter(|p| !listed.contains(&(p.namespace(), p.name_any())))
                .flat_map(|p| on_deleted(&p));

            pods.iter()
                .flat_map(|pod| on_applied(pod, previous(pod).as_deref()))
                .chain(missing)
                .collect()
        }
    }
}

/// Trims a release down to what the live pod under the same key no longer
/// asks for, so a release handled after the pod was re-created can't undo
/// the new allocation.
fn outstanding_release(context: &FipContext, request: PodFipRequest) -> PodFipRequest {
    let live = split_resource_key(&request.resource)
        .and_then(|(namespace, name)| context.pods.get(&ObjectRef::new(name).within(namespace)))
        .filter(|pod| pod.metadata.deletion_timestamp.is_none());

    match live {
        Some(pod) => PodFipRequest {
            annotations: request
                .annotations
                .no_longer_requested(&FipAnnotations::from_pod(&pod)),
            ..request
        },
        None => request,
    }
}

/// Allocates or releases the floating addresses a pod asks for. Validation
/// happens up front, provider calls run before the matching patch is queued
/// and the first failure stops the rest. Decisions against one Fip are
/// serialized and each returns only once its patches are visible.
pub async fn handle_pod_request(
    context: &FipContext,
    request: PodFipRequest,
) -> Result<(), ReconcilerError> {
    let request = match request.operation {
        FipOperation::Add => request,
        FipOperation::Del => outstanding_release(context, request),
    };

    if !request.annotations.requests_fip() {
        info!("{} still asks for its addresses, nothing to release", request.resource);
        return Ok(());
    }

    let router = request.annotations.validate()?;

    let vpc = context
        .vpcs
        .get(&ObjectRef::new(router))
        .ok_or_else(|| ReconcilerError::VpcNotFound(router.to_owned()))?;
    let network_id = vpc
        .external_network_id()
        .ok_or_else(|| ReconcilerError::MissingExternalNetwork(router.to_owned()))?;

    let _guard = context.allocation_mutex.lock(network_id).await;

    let fip = match context.cluster.get_fip(network_id).await? {
        Some(fip) => fip,
        None if request.operation == FipOperation::Del => {
            info!("Fip {network_id} is gone, nothing to release for {}", request.resource);
            return Ok(());
        }
        None => return Err(ReconcilerError::FipNotFound(network_id.to_owned())),
    };

    let mut batch = context.patch_batch(network_id);

    for action in plan_allocation(&request, &fip)? {
        match action {
            AllocationAction::CreateFloatingIp { ip, holder } => {
                let reservation = Reservation::from_holder(holder.as_deref());
                context
                    .provider
                    .create_floating_ip_port(network_id, &ip, reservation)
                    .await?;
            }
            AllocationAction::DeleteFloatingIp(ip) => {
                context.provider.delete_floating_ip_port(network_id, &ip).await?;
            }
            AllocationAction::EnqueuePatch(patch) => batch.enqueue(patch).await,
        }
    }

    batch.wait().await
}
