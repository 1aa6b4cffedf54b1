use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Router-bearing resource owned by the network fabric. This controller only
/// reads it to learn which routers sit behind which external network.
#[derive(CustomResource, Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "kubeovn.io",
    version = "v1",
    kind = "Vpc",
    status = "VpcStatus",
    derive = "Default"
)]
pub struct VpcSpec {
    #[serde(default, rename = "externalNetworkID")]
    pub external_network_id: String,
    #[serde(default)]
    pub external_network_name: String,
    /// provider router backing this vpc
    #[serde(default)]
    pub neutron_router: String,
    #[serde(default)]
    pub availability_zone: String,
    #[serde(default, rename = "externalGatewayIP")]
    pub external_gateway_ip: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VpcStatus {
    pub subnets: Option<Vec<String>>,
}

impl Vpc {
    pub fn external_network_id(&self) -> Option<&str> {
        Some(self.spec.external_network_id.as_str()).filter(|id| !id.is_empty())
    }
}
