use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod neutron;

pub const PORTS_RESOURCE: &str = "ports";
const SHARED_RESERVATION: &str = "shared";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Request couldn't be completed: {}", .0)]
    Http(reqwest::Error),
    #[error("Provider responded with {}: {}", .code, .message)]
    Status { code: u16, message: String },
    #[error("Provider returned an incomplete {}: {}", .0, .1)]
    Incomplete(&'static str, String),
    #[error("Address {} is already reserved for {}!", .ip, .holder)]
    Conflict { ip: String, holder: String },
}

impl From<reqwest::Error> for ProviderError {
    fn from(value: reqwest::Error) -> Self {
        ProviderError::Http(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Network {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub subnets: Vec<String>,
    #[serde(default)]
    pub mtu: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SubnetPool {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Subnet {
    pub id: String,
    pub cidr: String,
    #[serde(default)]
    pub gateway_ip: Option<String>,
    #[serde(default)]
    pub allocation_pools: Vec<SubnetPool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedIp {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subnet_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ip_address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProviderPort {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub network_id: String,
    #[serde(default)]
    pub mac_address: String,
    #[serde(default)]
    pub fixed_ips: Vec<FixedIp>,
    #[serde(default)]
    pub security_groups: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: String,
}

impl ProviderPort {
    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.fixed_ips
            .iter()
            .map(|f| f.ip_address.as_str())
            .filter(|ip| !ip.is_empty())
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Whom a floating IP reservation is made for. The reservation port's
/// description records it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation<'a> {
    /// an eip, owned by a single `namespace/name` resource
    Exclusive(&'a str),
    /// a snat, joined by every holder
    Shared,
}

impl<'a> Reservation<'a> {
    pub fn from_holder(holder: Option<&'a str>) -> Self {
        match holder {
            Some(holder) => Reservation::Exclusive(holder),
            None => Reservation::Shared,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Reservation::Exclusive(holder) => holder,
            Reservation::Shared => SHARED_RESERVATION,
        }
    }

    /// Checks whether an existing reservation of `ip` can be taken over.
    /// Exclusive reservations are only reused by their own holder.
    pub fn claim(&self, ip: &str, existing: &ProviderPort) -> Result<(), ProviderError> {
        let reusable = match self {
            Reservation::Exclusive(holder) => existing.description == *holder,
            Reservation::Shared => {
                existing.description.is_empty() || existing.description == SHARED_RESERVATION
            }
        };

        if reusable {
            return Ok(());
        }

        Err(ProviderError::Conflict {
            ip: ip.to_owned(),
            holder: match existing.description.as_str() {
                "" => existing.id.clone(),
                holder => holder.to_owned(),
            },
        })
    }
}

/// Everything needed to create a workload port.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortRequest {
    pub name: String,
    pub project_id: Option<String>,
    pub network_id: String,
    pub subnet_id: String,
    pub fixed_ip: Option<String>,
    pub mac_address: Option<String>,
    pub security_groups: Vec<String>,
}

/// A created workload port joined with its subnet and network details.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreatedPort {
    pub id: String,
    pub name: String,
    pub subnet_id: String,
    pub ip: String,
    pub mac: String,
    pub cidr: String,
    pub gateway: String,
    pub mtu: u32,
    pub security_groups: Vec<String>,
}

/// Remote network/subnet/port/floating IP operations. Every call is bounded
/// by the client timeout.
#[async_trait]
pub trait NetworkProvider: Send + Sync {
    async fn get_network(&self, id: &str) -> Result<Network, ProviderError>;

    async fn get_subnet(&self, id: &str) -> Result<Subnet, ProviderError>;

    async fn list_ports_by_network(&self, network_id: &str) -> Result<Vec<ProviderPort>, ProviderError>;

    /// Creates a workload port, rolling it back when its subnet or network
    /// can't be resolved.
    async fn create_port(&self, request: &PortRequest) -> Result<CreatedPort, ProviderError>;

    /// Deleting a missing port succeeds.
    async fn delete_port(&self, id: &str) -> Result<(), ProviderError>;

    /// Reserves the address on the external network with a tagged port. An
    /// existing reservation is returned only when `reservation` may claim it,
    /// otherwise the call fails with [`ProviderError::Conflict`].
    async fn create_floating_ip_port(
        &self,
        network_id: &str,
        ip: &str,
        reservation: Reservation<'_>,
    ) -> Result<ProviderPort, ProviderError>;

    /// Releases the reservation of the address, succeeding when there is none.
    async fn delete_floating_ip_port(&self, network_id: &str, ip: &str) -> Result<(), ProviderError>;

    async fn add_tag(&self, resource_type: &str, resource_id: &str, tag: &str) -> Result<(), ProviderError>;

    /// Tag carried by every resource created by this controller.
    fn resource_tag(&self) -> &str;
}
