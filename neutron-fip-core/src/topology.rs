use std::collections::BTreeMap;

use itertools::Itertools;

use crate::{
    allocation::patch::{FipPatch, FipPatchOperation},
    kubernetes::operations::cluster_metadata,
    resources::crd::v1::{
        fip::{AllocationPool, Fip, FipSpec, FipStatus, NeutronRouter},
        vpc::Vpc,
    },
};

/// Groups router-bearing resources by the external network they are
/// attached to. Resources without an external network are skipped.
pub fn group_by_external_network<'a>(
    vpcs: impl IntoIterator<Item = &'a Vpc>,
) -> BTreeMap<String, Vec<&'a Vpc>> {
    vpcs.into_iter()
        .filter_map(|vpc| vpc.external_network_id().map(|id| (id.to_owned(), vpc)))
        .into_group_map()
        .into_iter()
        .collect()
}

pub fn neutron_router_from_vpc(vpc: &Vpc) -> NeutronRouter {
    NeutronRouter {
        neutron_router_id: vpc.spec.neutron_router.clone(),
        neutron_router_name: vpc.metadata.name.clone().unwrap_or_default(),
        availability_zone: vpc.spec.availability_zone.clone(),
        external_gateway_ip: vpc.spec.external_gateway_ip.clone(),
        subnets: vpc
            .status
            .as_ref()
            .and_then(|s| s.subnets.clone())
            .unwrap_or_default(),
    }
}

pub fn sort_neutron_routers(routers: &mut [NeutronRouter]) {
    routers.sort_by(|a, b| a.neutron_router_id.cmp(&b.neutron_router_id));
}

pub fn sort_allocation_pools(pools: &mut [AllocationPool]) {
    pools.sort_by(|a, b| a.cidr.cmp(&b.cidr).then_with(|| a.start.cmp(&b.start)));
}

pub fn normalize_forbidden_ips(ips: &mut Vec<String>) {
    ips.sort();
    ips.dedup();
}

/// State of one external network as observed in the cluster and provider,
/// kept in the canonical order used for comparisons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredTopology {
    pub external_network_id: String,
    pub external_network_name: String,
    pub allocation_pools: Vec<AllocationPool>,
    pub neutron_routers: Vec<NeutronRouter>,
    pub forbidden_ips: Vec<String>,
}

impl DesiredTopology {
    pub fn new(
        external_network_id: impl Into<String>,
        external_network_name: impl Into<String>,
        vpcs: &[&Vpc],
        mut allocation_pools: Vec<AllocationPool>,
        mut forbidden_ips: Vec<String>,
    ) -> Self {
        let mut neutron_routers = vpcs
            .iter()
            .map(|vpc| neutron_router_from_vpc(vpc))
            .collect::<Vec<_>>();

        sort_neutron_routers(&mut neutron_routers);
        sort_allocation_pools(&mut allocation_pools);
        normalize_forbidden_ips(&mut forbidden_ips);

        Self {
            external_network_id: external_network_id.into(),
            external_network_name: external_network_name.into(),
            allocation_pools,
            neutron_routers,
            forbidden_ips,
        }
    }

    /// A fresh record for a newly discovered network, named after the network
    /// id and carrying no allocations.
    pub fn to_fip(&self) -> Fip {
        Fip {
            metadata: cluster_metadata(&self.external_network_id),
            spec: FipSpec {
                external_network_id: self.external_network_id.clone(),
                external_network_name: self.external_network_name.clone(),
                allocation_pools: self.allocation_pools.clone(),
            },
            status: Some(self.initial_status()),
        }
    }

    pub fn initial_status(&self) -> FipStatus {
        FipStatus {
            neutron_routers: self.neutron_routers.clone(),
            allocated_ips: vec![],
            forbidden_ips: vec![],
        }
    }
}

/// Differences between a stored Fip and the desired topology. Every
/// comparison is made on sorted copies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyDiff {
    pub neutron_routers: Option<Vec<NeutronRouter>>,
    pub forbidden_ips: Option<Vec<String>>,
    pub allocation_pools: Option<Vec<AllocationPool>>,
}

impl TopologyDiff {
    pub fn between(fip: &Fip, desired: &DesiredTopology) -> Self {
        let status = fip.status_or_default();

        let mut stored_routers = status.neutron_routers;
        sort_neutron_routers(&mut stored_routers);

        let mut stored_forbidden = status.forbidden_ips;
        normalize_forbidden_ips(&mut stored_forbidden);

        let mut stored_pools = fip.spec.allocation_pools.clone();
        sort_allocation_pools(&mut stored_pools);

        Self {
            neutron_routers: (stored_routers != desired.neutron_routers)
                .then(|| desired.neutron_routers.clone()),
            forbidden_ips: (stored_forbidden != desired.forbidden_ips)
                .then(|| desired.forbidden_ips.clone()),
            allocation_pools: (stored_pools != desired.allocation_pools)
                .then(|| desired.allocation_pools.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.neutron_routers.is_none()
            && self.forbidden_ips.is_none()
            && self.allocation_pools.is_none()
    }

    /// Status replacements to route through the patch queue. Pool changes
    /// touch the spec and are written directly.
    pub fn status_patches(&self, name: &str) -> Vec<FipPatch> {
        let routers = self
            .neutron_routers
            .clone()
            .map(FipPatchOperation::ReplaceNeutronRouters);
        let forbidden = self
            .forbidden_ips
            .clone()
            .map(FipPatchOperation::ReplaceForbiddenIps);

        routers
            .into_iter()
            .chain(forbidden)
            .map(|operation| FipPatch::new(name, operation))
            .collect()
    }
}
