use std::sync::Arc;

use kube::{runtime::reflector::ObjectRef, ResourceExt};
use log::{debug, info, warn};
use neutron_fip_core::{
    allocation::patch::eip_patch,
    helpers::split_resource_key,
    resources::crd::v1::fip::{AllocatedIp, AllocatedIpType},
};
use tokio::sync::watch::Receiver;

use crate::{
    error::ReconcilerError,
    helpers::{delayed_interval, next_tick, LoopCommand},
};

use super::FipContext;

/// Reclaims eips whose pods vanished without a release being handled.
pub struct FipCollector {
    context: Arc<FipContext>,
}

impl FipCollector {
    pub fn new(context: Arc<FipContext>) -> Self {
        Self { context }
    }

    pub async fn start(&self, mut shutdown: Receiver<bool>) {
        info!("Starting Fip garbage collection...");

        let mut interval = delayed_interval(self.context.config.gc_interval);

        while let LoopCommand::Continue = next_tick(&mut interval, &mut shutdown).await {
            self.collect().await;
        }

        info!("Exiting Fip garbage collection...");
    }

    pub async fn collect(&self) {
        let candidates = self.candidates();

        if candidates.is_empty() {
            return;
        }

        // the pod cache may lag behind a freshly scheduled pod
        tokio::time::sleep(self.context.config.gc_debounce).await;

        for (fip_name, entry) in candidates {
            if let Err(err) = self.reclaim(&fip_name, &entry).await {
                warn!("Couldn't reclaim {} from Fip {fip_name}! {err}", entry.ip);
            }
        }
    }

    fn candidates(&self) -> Vec<(String, AllocatedIp)> {
        let mut candidates = Vec::new();

        for fip in self.context.fips.state() {
            for entry in fip.allocations() {
                if entry.type_ == AllocatedIpType::Snat {
                    debug!("Skipping shared allocation {} of Fip {}", entry.ip, fip.name_any());
                    continue;
                }

                let present = entry
                    .resources
                    .first()
                    .and_then(|key| split_resource_key(key))
                    .map(|(namespace, name)| {
                        self.context
                            .pods
                            .get(&ObjectRef::new(name).within(namespace))
                            .is_some()
                    });

                match present {
                    Some(true) => (),
                    Some(false) => candidates.push((fip.name_any(), entry.clone())),
                    None => warn!(
                        "Allocation {} of Fip {} has no valid owner: {:?}",
                        entry.ip,
                        fip.name_any(),
                        entry.resources
                    ),
                }
            }
        }

        candidates
    }

    async fn reclaim(&self, fip_name: &str, entry: &AllocatedIp) -> Result<(), ReconcilerError> {
        let key = entry
            .resources
            .first()
            .ok_or_else(|| ReconcilerError::MalformedKey(String::new()))?;
        let (namespace, name) =
            split_resource_key(key).ok_or_else(|| ReconcilerError::MalformedKey(key.to_owned()))?;

        let _guard = self.context.allocation_mutex.lock(fip_name).await;

        if self.context.cluster.pod_exists(namespace, name).await? {
            debug!("Pod {key} still exists, keeping {}", entry.ip);
            return Ok(());
        }

        let fip = match self.context.cluster.get_fip(fip_name).await? {
            Some(fip) => fip,
            None => return Ok(()),
        };

        if !fip.allocations().iter().any(|a| a.same_as(entry)) {
            debug!("Allocation {} of Fip {fip_name} is already released", entry.ip);
            return Ok(());
        }

        info!("Reclaiming {} of missing pod {key}...", entry.ip);

        self.context
            .provider
            .delete_floating_ip_port(fip.external_network_id(), &entry.ip)
            .await?;

        let mut batch = self.context.patch_batch(fip_name);
        batch.enqueue(eip_patch(false, &entry.ip, key, &fip)).await;

        batch.wait().await
    }
}
