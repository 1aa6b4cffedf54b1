use std::{collections::BTreeMap, sync::Arc};

use futures::future::try_join_all;
use kube::ResourceExt;
use log::{debug, info, warn};
use neutron_fip_core::{
    resources::crd::v1::{fip::AllocationPool, vpc::Vpc},
    topology::{group_by_external_network, DesiredTopology, TopologyDiff},
};
use tokio::sync::watch::Receiver;

use crate::{
    error::ReconcilerError,
    helpers::{delayed_interval, next_tick, LoopCommand},
    provider::ProviderError,
};

use super::FipContext;

/// Keeps one Fip per referenced external network in line with the provider
/// and the routers attached to it.
pub struct FipSynchronizer {
    context: Arc<FipContext>,
}

impl FipSynchronizer {
    pub fn new(context: Arc<FipContext>) -> Self {
        Self { context }
    }

    /// Makes sure every discovered external network has its Fip before any
    /// allocation is handled.
    pub async fn initialize(&self) {
        info!("Initializing Fips...");

        match self.synchronize().await {
            Ok(()) => info!("Fips initialized!"),
            Err(err) => warn!("Fip initialization failed! {err}"),
        }
    }

    pub async fn start(&self, mut shutdown: Receiver<bool>) {
        info!("Starting Fip synchronization...");

        let mut interval = delayed_interval(self.context.config.sync_interval);

        while let LoopCommand::Continue = next_tick(&mut interval, &mut shutdown).await {
            if let Err(err) = self.synchronize().await {
                warn!("Fip synchronization failed! {err}");
            }
        }

        info!("Exiting Fip synchronization...");
    }

    /// A failure on one network doesn't stop the others.
    pub async fn synchronize(&self) -> Result<(), ReconcilerError> {
        let vpcs = self.context.vpcs.state();
        let networks = group_by_external_network(vpcs.iter().map(|vpc| vpc.as_ref()));

        for (network_id, vpcs) in &networks {
            if let Err(err) = self.synchronize_network(network_id, vpcs).await {
                warn!("Couldn't synchronize Fip {network_id}! {err}");
            }
        }

        self.release_orphans(&networks).await;

        Ok(())
    }

    async fn synchronize_network(&self, network_id: &str, vpcs: &[&Vpc]) -> Result<(), ReconcilerError> {
        let desired = self.desired_topology(network_id, vpcs).await?;

        let fip = match self.context.cluster.get_fip(network_id).await? {
            Some(fip) => fip,
            None => {
                info!("Creating Fip {network_id}...");
                self.context.cluster.create_fip(&desired.to_fip()).await?;
                return Ok(());
            }
        };

        let diff = TopologyDiff::between(&fip, &desired);

        if diff.is_empty() {
            debug!("Fip {network_id} is up to date");
            return Ok(());
        }

        for patch in diff.status_patches(network_id) {
            self.context.enqueue_patch(patch).await;
        }

        if let Some(pools) = &diff.allocation_pools {
            info!("Updating allocation pools of Fip {network_id}...");
            self.context
                .cluster
                .patch_fip_allocation_pools(network_id, pools)
                .await?;
        }

        Ok(())
    }

    async fn desired_topology(&self, network_id: &str, vpcs: &[&Vpc]) -> Result<DesiredTopology, ReconcilerError> {
        let provider = &self.context.provider;
        let network = provider.get_network(network_id).await?;

        if network.subnets.is_empty() {
            return Err(ProviderError::Incomplete("network", format!("{network_id} has no subnets")).into());
        }

        let subnets = try_join_all(network.subnets.iter().map(|id| provider.get_subnet(id))).await?;
        let pools = subnets
            .iter()
            .flat_map(|subnet| {
                subnet.allocation_pools.iter().map(|pool| AllocationPool {
                    cidr: subnet.cidr.clone(),
                    start: pool.start.clone(),
                    end: pool.end.clone(),
                })
            })
            .collect();

        // addresses of our own floating ip ports are tracked as allocations
        let tag = provider.resource_tag();
        let forbidden = provider
            .list_ports_by_network(network_id)
            .await?
            .iter()
            .filter(|port| !port.has_tag(tag))
            .flat_map(|port| port.addresses().map(str::to_owned))
            .collect();

        Ok(DesiredTopology::new(network_id, &network.name, vpcs, pools, forbidden))
    }

    /// Fips of networks no router references anymore are deleted once they
    /// hold no allocations. A failure on one doesn't stop the others.
    async fn release_orphans(&self, networks: &BTreeMap<String, Vec<&Vpc>>) {
        let orphans = self
            .context
            .fips
            .state()
            .iter()
            .map(|fip| fip.name_any())
            .filter(|name| !networks.contains_key(name))
            .collect::<Vec<_>>();

        for name in orphans {
            if let Err(err) = self.release_orphan(&name).await {
                warn!("Couldn't release unreferenced Fip {name}! {err}");
            }
        }
    }

    async fn release_orphan(&self, name: &str) -> Result<(), ReconcilerError> {
        let _allocation_guard = self.context.allocation_mutex.lock(name).await;
        let _guard = self.context.fip_mutex.lock(name).await;

        let fip = match self.context.cluster.get_fip(name).await? {
            Some(fip) => fip,
            None => return Ok(()),
        };

        if fip.allocations().is_empty() {
            info!("Fip {name} is no longer referenced, deleting...");
            self.context.cluster.delete_fip(name).await?;
        } else {
            warn!(
                "Fip {name} is no longer referenced but still holds {} allocations!",
                fip.allocations().len()
            );
        }

        Ok(())
    }
}
