use std::fmt::Display;

use log::warn;

use crate::resources::crd::v1::fip::{
    AllocatedIp, AllocatedIpType, Fip, FipStatus, NeutronRouter,
};

pub const ALLOCATED_IPS_PATH: &str = "/status/allocatedIPs";
pub const ALLOCATED_IP_RESOURCES_PATH: &str = "/status/allocatedIPs/allocatedIP";
pub const NEUTRON_ROUTERS_PATH: &str = "/status/neutronRouters";
pub const FORBIDDEN_IPS_PATH: &str = "/status/forbiddenIPs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatchOp {
    Add,
    Del,
    Replace,
}

impl Display for PatchOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatchOp::Add => f.write_str("add"),
            PatchOp::Del => f.write_str("del"),
            PatchOp::Replace => f.write_str("replace"),
        }
    }
}

/// A field-scoped mutation of a Fip status. Every operation is self-describing
/// and idempotent, so it can be applied to whatever revision is current.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FipPatchOperation {
    /// add a whole allocation entry
    AddAllocatedIp(AllocatedIp),
    /// append the entry's single resource to the existing entry with the same IP
    AddAllocatedIpResource(AllocatedIp),
    /// remove a structurally identical allocation entry
    DelAllocatedIp(AllocatedIp),
    /// remove the entry's single resource from the entry with the same IP
    DelAllocatedIpResource(AllocatedIp),
    ReplaceNeutronRouters(Vec<NeutronRouter>),
    ReplaceForbiddenIps(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FipPatch {
    /// name of the Fip this patch targets
    pub name: String,
    pub operation: FipPatchOperation,
}

impl FipPatch {
    pub fn new(name: impl Into<String>, operation: FipPatchOperation) -> Self {
        Self {
            name: name.into(),
            operation,
        }
    }

    pub fn op(&self) -> PatchOp {
        match self.operation {
            FipPatchOperation::AddAllocatedIp(_) | FipPatchOperation::AddAllocatedIpResource(_) => {
                PatchOp::Add
            }
            FipPatchOperation::DelAllocatedIp(_) | FipPatchOperation::DelAllocatedIpResource(_) => {
                PatchOp::Del
            }
            FipPatchOperation::ReplaceNeutronRouters(_)
            | FipPatchOperation::ReplaceForbiddenIps(_) => PatchOp::Replace,
        }
    }

    pub fn path(&self) -> &'static str {
        match self.operation {
            FipPatchOperation::AddAllocatedIp(_) | FipPatchOperation::DelAllocatedIp(_) => {
                ALLOCATED_IPS_PATH
            }
            FipPatchOperation::AddAllocatedIpResource(_)
            | FipPatchOperation::DelAllocatedIpResource(_) => ALLOCATED_IP_RESOURCES_PATH,
            FipPatchOperation::ReplaceNeutronRouters(_) => NEUTRON_ROUTERS_PATH,
            FipPatchOperation::ReplaceForbiddenIps(_) => FORBIDDEN_IPS_PATH,
        }
    }

    /// Returns the status after this patch, leaving the input untouched.
    pub fn apply(&self, status: &FipStatus) -> FipStatus {
        let mut status = status.clone();

        match &self.operation {
            FipPatchOperation::AddAllocatedIp(entry) => add_allocated_ip(&mut status, entry),
            FipPatchOperation::AddAllocatedIpResource(entry) => {
                add_allocated_ip_resource(&mut status, entry)
            }
            FipPatchOperation::DelAllocatedIp(entry) => del_allocated_ip(&mut status, entry),
            FipPatchOperation::DelAllocatedIpResource(entry) => {
                del_allocated_ip_resource(&mut status, entry)
            }
            FipPatchOperation::ReplaceNeutronRouters(routers) => {
                status.neutron_routers = routers.clone()
            }
            FipPatchOperation::ReplaceForbiddenIps(ips) => status.forbidden_ips = ips.clone(),
        }

        status
    }

    /// Whether the effect of this patch is visible in `status`. Unlike
    /// comparing against [`FipPatch::apply`], a refused add doesn't count.
    pub fn is_reflected_in(&self, status: &FipStatus) -> bool {
        let held = |entry: &AllocatedIp| {
            status
                .allocated_ips
                .iter()
                .any(|a| a.is_for(&entry.ip) && entry.resources.iter().any(|r| a.is_held_by(r)))
        };

        match &self.operation {
            FipPatchOperation::AddAllocatedIp(entry) => status.allocated_ips.iter().any(|a| {
                a.is_for(&entry.ip)
                    && a.type_ == entry.type_
                    && entry.resources.iter().all(|r| a.is_held_by(r))
            }),
            FipPatchOperation::AddAllocatedIpResource(entry) => held(entry),
            FipPatchOperation::DelAllocatedIp(entry)
            | FipPatchOperation::DelAllocatedIpResource(entry) => !held(entry),
            FipPatchOperation::ReplaceNeutronRouters(routers) => &status.neutron_routers == routers,
            FipPatchOperation::ReplaceForbiddenIps(ips) => &status.forbidden_ips == ips,
        }
    }
}

impl Display for FipPatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "op: {}, name: {}, path: {}", self.op(), self.name, self.path())
    }
}

fn add_allocated_ip(status: &mut FipStatus, entry: &AllocatedIp) {
    if status.allocated_ips.iter().any(|a| a.same_as(entry)) {
        return;
    }

    match status.allocated_ips.iter_mut().find(|a| a.is_for(&entry.ip)) {
        // concurrent first holders of a shared address join the same entry
        Some(existing)
            if existing.type_ == AllocatedIpType::Snat && entry.type_ == AllocatedIpType::Snat =>
        {
            for resource in &entry.resources {
                if !existing.is_held_by(resource) {
                    existing.resources.push(resource.to_owned());
                }
            }
        }
        Some(existing) => warn!(
            "Refusing to add {} allocation of {} for {:?}, it's already held by {:?}!",
            entry.type_, entry.ip, entry.resources, existing.resources
        ),
        None => status.allocated_ips.push(entry.clone()),
    }
}

fn add_allocated_ip_resource(status: &mut FipStatus, entry: &AllocatedIp) {
    let resource = match entry.resources.first() {
        Some(resource) => resource,
        None => return,
    };

    match status.allocated_ips.iter_mut().find(|a| a.is_for(&entry.ip)) {
        Some(existing) if existing.is_held_by(resource) => (),
        Some(existing) => existing.resources.push(resource.to_owned()),
        None => warn!(
            "No allocation of {} to share with {resource}, skipping!",
            entry.ip
        ),
    }
}

fn del_allocated_ip(status: &mut FipStatus, entry: &AllocatedIp) {
    if let Some(index) = status.allocated_ips.iter().position(|a| a.same_as(entry)) {
        status.allocated_ips.remove(index);
        return;
    }

    if entry.type_ != AllocatedIpType::Snat {
        return;
    }

    // the entry gained holders after the release was planned
    if let Some(index) = status
        .allocated_ips
        .iter()
        .position(|a| a.is_for(&entry.ip) && a.type_ == AllocatedIpType::Snat)
    {
        let existing = &mut status.allocated_ips[index];
        existing.resources.retain(|r| !entry.resources.contains(r));

        if existing.resources.is_empty() {
            status.allocated_ips.remove(index);
        }
    }
}

fn del_allocated_ip_resource(status: &mut FipStatus, entry: &AllocatedIp) {
    let index = match status.allocated_ips.iter().position(|a| a.is_for(&entry.ip)) {
        Some(index) => index,
        None => return,
    };

    if status.allocated_ips[index].same_as(entry) {
        status.allocated_ips.remove(index);
        return;
    }

    if let Some(resource) = entry.resources.first() {
        status.allocated_ips[index].resources.retain(|r| r != resource);
    }
}

/// Patch recording (or releasing) an exclusive address for a single resource.
pub fn eip_patch(adding: bool, eip: &str, resource: &str, fip: &Fip) -> FipPatch {
    let entry = AllocatedIp::new(eip, AllocatedIpType::Eip, resource);
    let operation = match adding {
        true => FipPatchOperation::AddAllocatedIp(entry),
        false => FipPatchOperation::DelAllocatedIp(entry),
    };

    FipPatch::new(fip.metadata.name.clone().unwrap_or_default(), operation)
}

/// Patch joining (or leaving) a shared address. Joining an existing entry or
/// leaving one that others still use only touches the entry's resources.
pub fn snat_patch(adding: bool, snat: &str, resource: &str, fip: &Fip) -> Option<FipPatch> {
    let entry = AllocatedIp::new(snat, AllocatedIpType::Snat, resource);
    let existing = fip.find_allocation(snat);

    let operation = match (adding, existing) {
        (true, Some(_)) => FipPatchOperation::AddAllocatedIpResource(entry),
        (true, None) => FipPatchOperation::AddAllocatedIp(entry),
        (false, Some(existing)) if existing.resources.len() > 1 => {
            FipPatchOperation::DelAllocatedIpResource(entry)
        }
        (false, Some(_)) => FipPatchOperation::DelAllocatedIp(entry),
        (false, None) => return None,
    };

    Some(FipPatch::new(
        fip.metadata.name.clone().unwrap_or_default(),
        operation,
    ))
}
