use crate::resources::{
    annotations::{FipAnnotations, FipOperation, PodFipRequest},
    crd::v1::fip::{AllocatedIpType, Fip},
};

use super::{
    is_available, is_other_pod_eip_allocated, is_pod_eip_allocated, is_snat_allocated,
    is_snat_unique_allocated,
    patch::{eip_patch, snat_patch, FipPatch},
    AllocationError,
};

/// A single step of a pod allocation. Steps run in order and the first
/// failing provider call stops the rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocationAction {
    /// reserve the address, exclusively for `holder` or shared when unset
    CreateFloatingIp { ip: String, holder: Option<String> },
    DeleteFloatingIp(String),
    EnqueuePatch(FipPatch),
}

impl FipAnnotations {
    /// Checks the annotations before anything is touched and returns the
    /// logical router the workload is attached to.
    pub fn validate(&self) -> Result<&str, AllocationError> {
        if let (Some(eip), Some(snat)) = (&self.eip, &self.snat) {
            if eip == snat {
                return Err(AllocationError::EipSnatConflict(eip.to_owned()));
            }
        }

        self.logical_router
            .as_deref()
            .ok_or(AllocationError::MissingLogicalRouter)
    }
}

/// Computes the provider calls and status patches a pod event needs against
/// the current revision of its Fip. Every validation happens here, so an
/// error means nothing was done.
pub fn plan_allocation(
    request: &PodFipRequest,
    fip: &Fip,
) -> Result<Vec<AllocationAction>, AllocationError> {
    request.annotations.validate()?;

    match request.operation {
        FipOperation::Add => plan_add(request, fip),
        FipOperation::Del => Ok(plan_del(request, fip)),
    }
}

fn plan_add(request: &PodFipRequest, fip: &Fip) -> Result<Vec<AllocationAction>, AllocationError> {
    let resource = request.resource.as_str();
    let mut actions = Vec::new();

    if let Some(eip) = request.annotations.eip.as_deref() {
        if is_other_pod_eip_allocated(eip, resource, fip) {
            return Err(AllocationError::AlreadyAllocated {
                ip: eip.to_owned(),
                holders: fip
                    .find_allocation(eip)
                    .map(|a| a.resources.clone())
                    .unwrap_or_default(),
            });
        }

        if is_available(eip, fip) {
            actions.push(AllocationAction::CreateFloatingIp {
                ip: eip.to_owned(),
                holder: Some(resource.to_owned()),
            });
            actions.push(AllocationAction::EnqueuePatch(eip_patch(true, eip, resource, fip)));
        } else if !is_pod_eip_allocated(eip, resource, fip) {
            return Err(AllocationError::Unavailable(eip.to_owned()));
        }
    }

    if let Some(snat) = request.annotations.snat.as_deref() {
        match fip.find_allocation(snat) {
            Some(existing) if existing.type_ == AllocatedIpType::Eip => {
                return Err(AllocationError::HeldAsEip(snat.to_owned()));
            }
            Some(_) => (),
            None if is_available(snat, fip) => {
                actions.push(AllocationAction::CreateFloatingIp {
                    ip: snat.to_owned(),
                    holder: None,
                });
            }
            None => return Err(AllocationError::Unavailable(snat.to_owned())),
        }

        if let Some(patch) = snat_patch(true, snat, resource, fip) {
            actions.push(AllocationAction::EnqueuePatch(patch));
        }
    }

    Ok(actions)
}

fn plan_del(request: &PodFipRequest, fip: &Fip) -> Vec<AllocationAction> {
    let resource = request.resource.as_str();
    let mut actions = Vec::new();

    if let Some(eip) = request.annotations.eip.as_deref() {
        if is_pod_eip_allocated(eip, resource, fip) {
            actions.push(AllocationAction::DeleteFloatingIp(eip.to_owned()));
            actions.push(AllocationAction::EnqueuePatch(eip_patch(false, eip, resource, fip)));
        }
    }

    if let Some(snat) = request.annotations.snat.as_deref() {
        if is_snat_allocated(snat, resource, fip) {
            if is_snat_unique_allocated(snat, resource, fip) {
                actions.push(AllocationAction::DeleteFloatingIp(snat.to_owned()));
            }

            if let Some(patch) = snat_patch(false, snat, resource, fip) {
                actions.push(AllocationAction::EnqueuePatch(patch));
            }
        }
    }

    actions
}
