use thiserror::Error;

use crate::{
    ip::same_address,
    resources::crd::v1::fip::{AllocatedIp, AllocatedIpType, Fip},
};

pub mod patch;
pub mod plan;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AllocationError {
    #[error("eip and snat annotations can't request the same address ({})!", .0)]
    EipSnatConflict(String),
    #[error("logical router annotation is missing!")]
    MissingLogicalRouter,
    #[error("Address {} is already allocated to {:?}!", .ip, .holders)]
    AlreadyAllocated { ip: String, holders: Vec<String> },
    #[error("Address {} is held as an eip and can't be shared!", .0)]
    HeldAsEip(String),
    #[error("Address {} is out of the allocation pools or reserved by the provider!", .0)]
    Unavailable(String),
}

/// An address can be handed out only if it lies inside some allocation pool
/// and is neither allocated nor forbidden.
pub fn is_available(ip: &str, fip: &Fip) -> bool {
    if ip.is_empty() || !fip.pools_contain(ip) {
        return false;
    }

    let allocated = fip.allocations().iter().any(|a| a.is_for(ip));
    let forbidden = fip.forbidden_ips().iter().any(|f| same_address(f, ip));

    !allocated && !forbidden
}

/// Whether the address is bound as an eip to exactly this resource.
pub fn is_pod_eip_allocated(ip: &str, resource: &str, fip: &Fip) -> bool {
    if ip.is_empty() {
        return false;
    }

    let expected = AllocatedIp::new(ip, AllocatedIpType::Eip, resource);

    fip.allocations().iter().any(|a| a.same_as(&expected))
}

/// Whether the address is held by anything other than this resource alone.
pub fn is_other_pod_eip_allocated(ip: &str, resource: &str, fip: &Fip) -> bool {
    if ip.is_empty() {
        return false;
    }

    fip.allocations()
        .iter()
        .any(|a| a.is_for(ip) && a.resources != [resource])
}

pub fn is_snat_allocated(ip: &str, resource: &str, fip: &Fip) -> bool {
    if ip.is_empty() {
        return false;
    }

    fip.allocations()
        .iter()
        .any(|a| a.is_for(ip) && a.is_held_by(resource))
}

/// Whether this resource is the sole user of a shared address.
pub fn is_snat_unique_allocated(ip: &str, resource: &str, fip: &Fip) -> bool {
    if ip.is_empty() {
        return false;
    }

    let expected = AllocatedIp::new(ip, AllocatedIpType::Snat, resource);

    fip.allocations().iter().any(|a| a.same_as(&expected))
}
