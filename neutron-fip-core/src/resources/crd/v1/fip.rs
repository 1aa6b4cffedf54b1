use std::fmt::Display;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use ipnet::IpNet;

use crate::ip::{
    parse_address, parse_network, same_address, AddressError, AddressRange, Contains,
};

/// One Fip exists per external network, named after the network id.
#[derive(CustomResource, Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "neutron.io",
    version = "v1",
    kind = "Fip",
    status = "FipStatus",
    derive = "Default",
    derive = "PartialEq"
)]
pub struct FipSpec {
    pub external_network_id: String,
    pub external_network_name: String,
    #[serde(default)]
    pub allocation_pools: Vec<AllocationPool>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FipStatus {
    #[serde(default)]
    pub neutron_routers: Vec<NeutronRouter>,
    #[serde(default, rename = "allocatedIPs")]
    pub allocated_ips: Vec<AllocatedIp>,
    #[serde(default, rename = "forbiddenIPs")]
    pub forbidden_ips: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AllocationPool {
    pub cidr: String,
    pub start: String,
    pub end: String,
}

impl AllocationPool {
    pub fn range(&self) -> Result<AddressRange, AddressError> {
        AddressRange::parse(&self.start, &self.end)
    }

    pub fn network(&self) -> Result<IpNet, AddressError> {
        parse_network(&self.cidr)
    }

    /// Pools without a cidr are bounded by their range alone.
    pub fn contains(&self, address: &std::net::IpAddr) -> Result<bool, AddressError> {
        let in_range = self.range()?.contains(address);

        match self.cidr.is_empty() {
            true => Ok(in_range),
            false => Ok(in_range && Contains::contains(&self.network()?, address)),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NeutronRouter {
    pub neutron_router_id: String,
    pub neutron_router_name: String,
    #[serde(default)]
    pub availability_zone: String,
    #[serde(default, rename = "externalGatewayIP")]
    pub external_gateway_ip: String,
    #[serde(default)]
    pub subnets: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum AllocatedIpType {
    /// exclusively bound to a single workload
    Eip,
    /// shared by any number of workloads for outbound traffic
    Snat,
}

impl Display for AllocatedIpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocatedIpType::Eip => f.write_str("eip"),
            AllocatedIpType::Snat => f.write_str("snat"),
        }
    }
}

/// An address held by workloads. `resources` contains `namespace/name` keys,
/// exactly one for an eip and one or more for a snat.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AllocatedIp {
    pub ip: String,
    #[serde(rename = "type")]
    pub type_: AllocatedIpType,
    #[serde(default)]
    pub resources: Vec<String>,
}

impl AllocatedIp {
    pub fn new(ip: impl Into<String>, type_: AllocatedIpType, resource: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            type_,
            resources: vec![resource.into()],
        }
    }

    pub fn is_held_by(&self, resource: &str) -> bool {
        self.resources.iter().any(|r| r == resource)
    }

    pub fn is_for(&self, ip: &str) -> bool {
        same_address(&self.ip, ip)
    }

    /// Structural equality with the address compared by value.
    pub fn same_as(&self, other: &AllocatedIp) -> bool {
        self.type_ == other.type_ && self.resources == other.resources && self.is_for(&other.ip)
    }
}

impl Fip {
    pub fn external_network_id(&self) -> &str {
        &self.spec.external_network_id
    }

    pub fn status_or_default(&self) -> FipStatus {
        self.status.clone().unwrap_or_default()
    }

    pub fn find_allocation(&self, ip: &str) -> Option<&AllocatedIp> {
        self.status
            .as_ref()
            .and_then(|status| status.allocated_ips.iter().find(|a| a.is_for(ip)))
    }

    pub fn allocations(&self) -> &[AllocatedIp] {
        self.status
            .as_ref()
            .map(|status| status.allocated_ips.as_slice())
            .unwrap_or_default()
    }

    pub fn forbidden_ips(&self) -> &[String] {
        self.status
            .as_ref()
            .map(|status| status.forbidden_ips.as_slice())
            .unwrap_or_default()
    }

    /// Whether the address falls into any of the allocation pools. Pools with
    /// unparseable bounds never match.
    pub fn pools_contain(&self, ip: &str) -> bool {
        let address = match parse_address(ip) {
            Ok(address) => address,
            Err(_) => return false,
        };

        self.spec.allocation_pools.iter().any(|pool| match pool.contains(&address) {
            Ok(contained) => contained,
            Err(err) => {
                log::warn!("Skipping invalid allocation pool {pool:?}: {err}");
                false
            }
        })
    }
}
