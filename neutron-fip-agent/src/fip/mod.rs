use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use kube::runtime::reflector::Store;
use log::{debug, info};
use neutron_fip_core::{
    allocation::patch::FipPatch,
    resources::crd::v1::{fip::Fip, vpc::Vpc},
};
use tokio::{sync::watch, time::Instant};

use crate::{
    cluster::ClusterApi,
    config::ControllerConfig,
    dispatch::{keymutex::KeyMutex, queue::WorkQueue},
    error::ReconcilerError,
    provider::NetworkProvider,
};

pub mod applier;
pub mod gc;
pub mod pod;
pub mod sync;

/// Everything the floating IP engines share. The patch queue is the only
/// path through which Fip statuses are written.
pub struct FipContext {
    pub config: Arc<ControllerConfig>,
    pub cluster: Arc<dyn ClusterApi>,
    pub provider: Arc<dyn NetworkProvider>,
    pub patches: Arc<WorkQueue<FipPatch>>,
    /// guards each read-modify-write of a Fip status
    pub fip_mutex: KeyMutex,
    /// guards each allocation decision against a Fip, from planning until
    /// its patches are visible
    pub allocation_mutex: KeyMutex,
    /// bumped whenever the applier finishes a patch
    pub applied: watch::Sender<u64>,
    pub vpcs: Store<Vpc>,
    pub fips: Store<Fip>,
    pub pods: Store<Pod>,
}

impl FipContext {
    pub async fn enqueue_patch(&self, patch: FipPatch) {
        info!("Enqueuing FipPatch ({patch})");
        self.patches.add(patch).await;
    }

    /// Starts tracking the patches of one allocation decision against `name`.
    pub fn patch_batch(&self, name: &str) -> PatchBatch<'_> {
        PatchBatch {
            context: self,
            name: name.to_owned(),
            applied: self.applied.subscribe(),
            patches: Vec::new(),
        }
    }

    pub fn notify_applied(&self) {
        self.applied.send_modify(|count| *count = count.wrapping_add(1));
    }
}

/// Patches queued by a single allocation decision. Waiting on the batch
/// makes the next decision against the same Fip plan against them.
pub struct PatchBatch<'a> {
    context: &'a FipContext,
    name: String,
    applied: watch::Receiver<u64>,
    patches: Vec<FipPatch>,
}

impl PatchBatch<'_> {
    pub async fn enqueue(&mut self, patch: FipPatch) {
        self.context.enqueue_patch(patch.clone()).await;
        self.patches.push(patch);
    }

    /// Waits until a fresh read of the Fip reflects every queued patch. A
    /// deleted Fip drops its patches, so there's nothing left to wait for.
    pub async fn wait(mut self) -> Result<(), ReconcilerError> {
        if self.patches.is_empty() {
            return Ok(());
        }

        let deadline = Instant::now() + self.context.config.patch_wait_timeout;

        loop {
            let status = match self.context.cluster.get_fip(&self.name).await? {
                Some(fip) => fip.status_or_default(),
                None => return Ok(()),
            };

            if self.patches.iter().all(|patch| patch.is_reflected_in(&status)) {
                debug!("{} patches of Fip {} landed", self.patches.len(), self.name);
                return Ok(());
            }

            match tokio::time::timeout_at(deadline, self.applied.changed()).await {
                Ok(Ok(())) => (),
                Ok(Err(_)) | Err(_) => return Err(ReconcilerError::PatchTimeout(self.name)),
            }
        }
    }
}

#[cfg(test)]
pub mod tests {
    use std::sync::Arc;

    use k8s_openapi::api::core::v1::Pod;
    use neutron_fip_core::{
        allocation::patch::FipPatch,
        resources::crd::v1::{
            fip::{AllocatedIp, AllocationPool, Fip, FipSpec, FipStatus},
            vpc::{Vpc, VpcSpec},
        },
    };

    use tokio::{sync::watch, task::JoinHandle};

    use crate::{
        config::tests::test_config,
        dispatch::{
            keymutex::KeyMutex,
            queue::{RetryPolicy, WorkQueue},
            spawn_workers,
        },
        testing::{store_of, FakeCluster, FakeProvider},
    };

    use super::{applier::apply_fip_patch, FipContext};

    pub fn fip(name: &str, allocated_ips: Vec<AllocatedIp>) -> Fip {
        let mut fip = Fip::new(
            name,
            FipSpec {
                external_network_id: name.to_owned(),
                external_network_name: "public".to_owned(),
                allocation_pools: vec![AllocationPool {
                    cidr: "10.0.0.0/24".to_owned(),
                    start: "10.0.0.2".to_owned(),
                    end: "10.0.0.10".to_owned(),
                }],
            },
        );
        fip.status = Some(FipStatus {
            allocated_ips,
            ..Default::default()
        });

        fip
    }

    pub fn vpc(name: &str, network: &str) -> Vpc {
        Vpc::new(
            name,
            VpcSpec {
                external_network_id: network.to_owned(),
                neutron_router: format!("router-{name}"),
                ..Default::default()
            },
        )
    }

    pub fn context(
        cluster: Arc<FakeCluster>,
        provider: Arc<FakeProvider>,
        vpcs: Vec<Vpc>,
        fips: Vec<Fip>,
        pods: Vec<Pod>,
    ) -> FipContext {
        let config = test_config();

        FipContext {
            patches: Arc::new(WorkQueue::new(
                "fip-patch",
                RetryPolicy::new(config.retry_base_delay, config.retry_max_delay, None),
            )),
            config: Arc::new(config),
            cluster,
            provider,
            fip_mutex: KeyMutex::new(7),
            allocation_mutex: KeyMutex::new(7),
            applied: watch::channel(0).0,
            vpcs: store_of(vpcs),
            fips: store_of(fips),
            pods: store_of(pods),
        }
    }

    /// Drains the patch queue without workers.
    pub async fn queued_patches(context: &FipContext) -> Vec<FipPatch> {
        let mut patches = Vec::new();

        while context.patches.len().await > 0 {
            if let Some(patch) = context.patches.get().await {
                context.patches.done(&patch).await;
                patches.push(patch);
            }
        }

        patches
    }

    /// Runs patch workers the way the controller does.
    pub fn spawn_appliers(context: &Arc<FipContext>) -> Vec<JoinHandle<()>> {
        let context = context.clone();

        spawn_workers(context.patches.clone(), 2, move |patch| {
            let context = context.clone();
            async move { apply_fip_patch(&context, patch).await }
        })
    }

    pub async fn stop_appliers(context: &FipContext, workers: Vec<JoinHandle<()>>) {
        context.patches.shutdown_with_drain().await;
        for worker in workers {
            worker.await.unwrap();
        }
    }
}
