use async_trait::async_trait;
use log::{info, warn};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;

use crate::config::ProviderConfig;

use super::{
    CreatedPort, Network, NetworkProvider, PortRequest, ProviderError, ProviderPort, Reservation,
    Subnet, PORTS_RESOURCE,
};

const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";
const FLOATING_IP_PORT_PREFIX: &str = "fip-";

#[derive(Deserialize)]
struct NetworkEnvelope {
    network: Network,
}

#[derive(Deserialize)]
struct SubnetEnvelope {
    subnet: Subnet,
}

#[derive(Deserialize)]
struct PortEnvelope {
    port: ProviderPort,
}

#[derive(Deserialize)]
struct PortsEnvelope {
    ports: Vec<ProviderPort>,
}

/// Client of the Neutron v2.0 networking API.
pub struct NeutronClient {
    client: Client,
    endpoint: String,
    auth_token: String,
    resource_tag: String,
}

impl NeutronClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;

        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: &ProviderConfig) -> Self {
        Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_owned(),
            auth_token: config.auth_token.clone(),
            resource_tag: config.resource_tag.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v2.0/{path}", self.endpoint)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(AUTH_TOKEN_HEADER, &self.auth_token)
    }

    async fn checked(response: Response) -> Result<Response, ProviderError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();

        Err(ProviderError::Status {
            code: status.as_u16(),
            message,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, ProviderError> {
        let response = self
            .authorized(self.client.get(self.url(path)))
            .query(query)
            .send()
            .await?;

        Ok(Self::checked(response).await?.json().await?)
    }

    async fn post_port(&self, body: serde_json::Value) -> Result<ProviderPort, ProviderError> {
        let response = self
            .authorized(self.client.post(self.url(PORTS_RESOURCE)))
            .json(&body)
            .send()
            .await?;

        let envelope: PortEnvelope = Self::checked(response).await?.json().await?;

        Ok(envelope.port)
    }

    async fn find_floating_ip_ports(&self, network_id: &str, ip: &str) -> Result<Vec<ProviderPort>, ProviderError> {
        let envelope: PortsEnvelope = self
            .get_json(
                PORTS_RESOURCE,
                &[
                    ("network_id", network_id.to_owned()),
                    ("fixed_ips", format!("ip_address={ip}")),
                ],
            )
            .await?;

        Ok(envelope
            .ports
            .into_iter()
            .filter(|port| port.has_tag(&self.resource_tag) && port.addresses().any(|a| a == ip))
            .collect())
    }
}

#[async_trait]
impl NetworkProvider for NeutronClient {
    async fn get_network(&self, id: &str) -> Result<Network, ProviderError> {
        let envelope: NetworkEnvelope = self.get_json(&format!("networks/{id}"), &[]).await?;

        Ok(envelope.network)
    }

    async fn get_subnet(&self, id: &str) -> Result<Subnet, ProviderError> {
        let envelope: SubnetEnvelope = self.get_json(&format!("subnets/{id}"), &[]).await?;

        Ok(envelope.subnet)
    }

    async fn list_ports_by_network(&self, network_id: &str) -> Result<Vec<ProviderPort>, ProviderError> {
        let envelope: PortsEnvelope = self
            .get_json(PORTS_RESOURCE, &[("network_id", network_id.to_owned())])
            .await?;

        Ok(envelope.ports)
    }

    async fn create_port(&self, request: &PortRequest) -> Result<CreatedPort, ProviderError> {
        let (port, subnet, network) = tokio::join!(
            self.post_port(port_body(request)),
            self.get_subnet(&request.subnet_id),
            self.get_network(&request.network_id)
        );
        let port = port?;

        let details = subnet.and_then(|subnet| {
            let network = network?;
            if network.mtu == 0 {
                return Err(ProviderError::Incomplete("network", format!("mtu of {} is unknown", network.id)));
            }
            Ok((subnet, network))
        });

        let (subnet, network) = match details {
            Ok(details) => details,
            Err(error) => {
                warn!("Rolling back port {} after a failed lookup!", port.id);
                if let Err(rollback_error) = self.delete_port(&port.id).await {
                    warn!("Couldn't roll back port {}! {rollback_error}", port.id);
                }
                return Err(error);
            }
        };

        let ip = port
            .addresses()
            .next()
            .map(str::to_owned)
            .ok_or_else(|| ProviderError::Incomplete("port", format!("{} has no fixed ip", port.id)))?;

        Ok(CreatedPort {
            id: port.id,
            name: port.name,
            subnet_id: request.subnet_id.clone(),
            ip,
            mac: port.mac_address,
            cidr: subnet.cidr,
            gateway: subnet.gateway_ip.unwrap_or_default(),
            mtu: network.mtu,
            security_groups: port.security_groups,
        })
    }

    async fn delete_port(&self, id: &str) -> Result<(), ProviderError> {
        let response = self
            .authorized(self.client.delete(self.url(&format!("{PORTS_RESOURCE}/{id}"))))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }

        Self::checked(response).await.map(|_| ())
    }

    async fn create_floating_ip_port(
        &self,
        network_id: &str,
        ip: &str,
        reservation: Reservation<'_>,
    ) -> Result<ProviderPort, ProviderError> {
        if let Some(existing) = self.find_floating_ip_ports(network_id, ip).await?.into_iter().next() {
            reservation.claim(ip, &existing)?;
            return Ok(existing);
        }

        let port = self
            .post_port(json!({
                "port": {
                    "name": format!("{FLOATING_IP_PORT_PREFIX}{ip}"),
                    "description": reservation.description(),
                    "network_id": network_id,
                    "fixed_ips": [{ "ip_address": ip }],
                }
            }))
            .await?;

        // an untagged reservation is invisible to release and would be forbidden on the next sync
        if let Err(error) = self.add_tag(PORTS_RESOURCE, &port.id, &self.resource_tag).await {
            warn!("Rolling back untagged reservation {} of {ip}!", port.id);
            if let Err(rollback_error) = self.delete_port(&port.id).await {
                warn!("Couldn't roll back port {}! {rollback_error}", port.id);
            }
            return Err(error);
        }

        info!("Reserved {ip} on network {network_id} with port {}", port.id);

        Ok(port)
    }

    async fn delete_floating_ip_port(&self, network_id: &str, ip: &str) -> Result<(), ProviderError> {
        for port in self.find_floating_ip_ports(network_id, ip).await? {
            self.delete_port(&port.id).await?;
            info!("Released {ip} on network {network_id} (port {})", port.id);
        }

        Ok(())
    }

    async fn add_tag(&self, resource_type: &str, resource_id: &str, tag: &str) -> Result<(), ProviderError> {
        let response = self
            .authorized(
                self.client
                    .put(self.url(&format!("{resource_type}/{resource_id}/tags/{tag}"))),
            )
            .send()
            .await?;

        Self::checked(response).await.map(|_| ())
    }

    fn resource_tag(&self) -> &str {
        &self.resource_tag
    }
}

fn port_body(request: &PortRequest) -> serde_json::Value {
    let mut port = json!({
        "name": request.name,
        "network_id": request.network_id,
        "fixed_ips": [{
            "subnet_id": request.subnet_id,
            "ip_address": request.fixed_ip.clone().unwrap_or_default(),
        }],
    });

    if let Some(project_id) = &request.project_id {
        port["project_id"] = json!(project_id);
    }
    if let Some(mac) = &request.mac_address {
        port["mac_address"] = json!(mac);
    }
    if !request.security_groups.is_empty() {
        port["security_groups"] = json!(request.security_groups);
    }
    if request.fixed_ip.as_deref().map_or(true, str::is_empty) {
        port["fixed_ips"] = json!([{ "subnet_id": request.subnet_id }]);
    }

    json!({ "port": port })
}
