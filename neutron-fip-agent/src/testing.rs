use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    core::ObjectMeta,
    error::ErrorResponse,
    runtime::{
        reflector::{self, Store},
        watcher::Event,
    },
    Resource,
};
use neutron_fip_core::resources::crd::v1::{
    fip::{AllocationPool, Fip, FipStatus},
    port::PortStatus,
};

use crate::{
    cluster::ClusterApi,
    provider::{
        CreatedPort, FixedIp, Network, NetworkProvider, PortRequest, ProviderError, ProviderPort,
        Reservation, Subnet,
    },
};

pub const TEST_TAG: &str = "kube-ovn";

/// Builds a populated reflector store.
pub fn store_of<K>(objects: Vec<K>) -> Store<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    let (store, mut writer) = reflector::store();
    writer.apply_watcher_event(&Event::Restarted(objects));

    store
}

pub fn pod(namespace: &str, name: &str, annotations: &[(&str, &str)]) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            namespace: Some(namespace.to_owned()),
            annotations: Some(
                annotations
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn not_found(name: &str) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_owned(),
        message: format!("{name} not found"),
        reason: "NotFound".to_owned(),
        code: 404,
    })
}

fn server_error(name: &str) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_owned(),
        message: format!("{name} couldn't be processed"),
        reason: "InternalError".to_owned(),
        code: 500,
    })
}

#[derive(Default)]
pub struct FakeClusterState {
    pub fips: BTreeMap<String, Fip>,
    pub pods: BTreeSet<String>,
    pub port_statuses: HashMap<String, PortStatus>,
    pub port_finalizers: HashMap<String, Vec<String>>,
    pub status_writes: usize,
    pub pool_patches: Vec<(String, Vec<AllocationPool>)>,
    pub created_fips: Vec<String>,
    pub deleted_fips: Vec<String>,
    pub failing_fip_deletes: BTreeSet<String>,
    pub fail_port_status: bool,
    pub fail_port_finalizers: bool,
}

#[derive(Default)]
pub struct FakeCluster {
    pub state: Mutex<FakeClusterState>,
}

impl FakeCluster {
    pub fn with_fips(fips: Vec<Fip>) -> Arc<Self> {
        let cluster = Self::default();
        {
            let mut state = cluster.state.lock().unwrap();
            for fip in fips {
                state.fips.insert(fip.metadata.name.clone().unwrap(), fip);
            }
        }

        Arc::new(cluster)
    }

    pub fn fip(&self, name: &str) -> Option<Fip> {
        self.state.lock().unwrap().fips.get(name).cloned()
    }

    pub fn fip_status(&self, name: &str) -> FipStatus {
        self.fip(name).unwrap().status_or_default()
    }

    pub fn add_pod(&self, key: &str) {
        self.state.lock().unwrap().pods.insert(key.to_owned());
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get_fip(&self, name: &str) -> Result<Option<Fip>, kube::Error> {
        Ok(self.fip(name))
    }

    async fn create_fip(&self, fip: &Fip) -> Result<(), kube::Error> {
        let name = fip.metadata.name.clone().unwrap_or_default();
        let mut state = self.state.lock().unwrap();

        state.created_fips.push(name.clone());
        state.fips.insert(name, fip.clone());

        Ok(())
    }

    async fn delete_fip(&self, name: &str) -> Result<(), kube::Error> {
        let mut state = self.state.lock().unwrap();

        if state.failing_fip_deletes.contains(name) {
            return Err(server_error(name));
        }

        state.fips.remove(name);
        state.deleted_fips.push(name.to_owned());

        Ok(())
    }

    async fn patch_fip_status(&self, name: &str, status: &FipStatus) -> Result<(), kube::Error> {
        let mut state = self.state.lock().unwrap();
        let fip = state.fips.get_mut(name).ok_or_else(|| not_found(name))?;

        fip.status = Some(status.clone());
        state.status_writes += 1;

        Ok(())
    }

    async fn patch_fip_allocation_pools(
        &self,
        name: &str,
        pools: &[AllocationPool],
    ) -> Result<(), kube::Error> {
        let mut state = self.state.lock().unwrap();
        let fip = state.fips.get_mut(name).ok_or_else(|| not_found(name))?;

        fip.spec.allocation_pools = pools.to_vec();
        state.pool_patches.push((name.to_owned(), pools.to_vec()));

        Ok(())
    }

    async fn patch_port_status(
        &self,
        namespace: &str,
        name: &str,
        status: &PortStatus,
    ) -> Result<(), kube::Error> {
        let mut state = self.state.lock().unwrap();

        if state.fail_port_status {
            return Err(not_found(name));
        }

        state
            .port_statuses
            .insert(format!("{namespace}/{name}"), status.clone());

        Ok(())
    }

    async fn patch_port_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: &[String],
        _resource_version: Option<&str>,
    ) -> Result<(), kube::Error> {
        let mut state = self.state.lock().unwrap();

        if state.fail_port_finalizers {
            return Err(server_error(name));
        }

        state
            .port_finalizers
            .insert(format!("{namespace}/{name}"), finalizers.to_vec());

        Ok(())
    }

    async fn pod_exists(&self, namespace: &str, name: &str) -> Result<bool, kube::Error> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .pods
            .contains(&format!("{namespace}/{name}")))
    }
}

#[derive(Default)]
pub struct FakeProviderState {
    pub networks: HashMap<String, Network>,
    pub subnets: HashMap<String, Subnet>,
    pub ports: Vec<ProviderPort>,
    pub created_ports: Vec<PortRequest>,
    pub deleted_ports: Vec<String>,
    pub created_floating_ips: Vec<String>,
    pub deleted_floating_ips: Vec<String>,
    pub fail_create_port: Option<String>,
    pub fail_floating_ips: bool,
    next_id: usize,
}

#[derive(Default)]
pub struct FakeProvider {
    pub state: Mutex<FakeProviderState>,
}

impl FakeProvider {
    pub fn with_network(network: Network, subnets: Vec<Subnet>) -> Arc<Self> {
        let provider = Self::default();
        {
            let mut state = provider.state.lock().unwrap();
            for subnet in subnets {
                state.subnets.insert(subnet.id.clone(), subnet);
            }
            state.networks.insert(network.id.clone(), network);
        }

        Arc::new(provider)
    }

    pub fn add_port(&self, network_id: &str, ip: &str, tags: &[&str]) {
        self.add_described_port(network_id, ip, tags, "");
    }

    pub fn add_described_port(&self, network_id: &str, ip: &str, tags: &[&str], description: &str) {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("port-{}", state.next_id);

        state.ports.push(ProviderPort {
            id,
            network_id: network_id.to_owned(),
            fixed_ips: vec![FixedIp {
                subnet_id: String::new(),
                ip_address: ip.to_owned(),
            }],
            tags: tags.iter().map(|t| t.to_string()).collect(),
            description: description.to_owned(),
            ..Default::default()
        });
    }

    /// Tagged reservations currently holding the address.
    pub fn reservations(&self, ip: &str) -> Vec<ProviderPort> {
        self.state
            .lock()
            .unwrap()
            .ports
            .iter()
            .filter(|p| p.has_tag(TEST_TAG) && p.addresses().any(|a| a == ip))
            .cloned()
            .collect()
    }

    pub fn created_floating_ips(&self) -> Vec<String> {
        self.state.lock().unwrap().created_floating_ips.clone()
    }

    pub fn deleted_floating_ips(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted_floating_ips.clone()
    }
}

fn unavailable() -> ProviderError {
    ProviderError::Status {
        code: 503,
        message: "service unavailable".to_owned(),
    }
}

#[async_trait]
impl NetworkProvider for FakeProvider {
    async fn get_network(&self, id: &str) -> Result<Network, ProviderError> {
        self.state
            .lock()
            .unwrap()
            .networks
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderError::Status {
                code: 404,
                message: format!("network {id} not found"),
            })
    }

    async fn get_subnet(&self, id: &str) -> Result<Subnet, ProviderError> {
        self.state
            .lock()
            .unwrap()
            .subnets
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderError::Status {
                code: 404,
                message: format!("subnet {id} not found"),
            })
    }

    async fn list_ports_by_network(&self, network_id: &str) -> Result<Vec<ProviderPort>, ProviderError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .ports
            .iter()
            .filter(|p| p.network_id == network_id)
            .cloned()
            .collect())
    }

    async fn create_port(&self, request: &PortRequest) -> Result<CreatedPort, ProviderError> {
        let mut state = self.state.lock().unwrap();

        if let Some(message) = &state.fail_create_port {
            return Err(ProviderError::Status {
                code: 409,
                message: message.clone(),
            });
        }

        state.next_id += 1;
        state.created_ports.push(request.clone());

        Ok(CreatedPort {
            id: format!("port-{}", state.next_id),
            name: request.name.clone(),
            subnet_id: request.subnet_id.clone(),
            ip: request.fixed_ip.clone().unwrap_or_else(|| "192.168.0.10".to_owned()),
            mac: request
                .mac_address
                .clone()
                .unwrap_or_else(|| "fa:16:3e:00:00:01".to_owned()),
            cidr: "192.168.0.0/24".to_owned(),
            gateway: "192.168.0.1".to_owned(),
            mtu: 1450,
            security_groups: request.security_groups.clone(),
        })
    }

    async fn delete_port(&self, id: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();

        state.ports.retain(|p| p.id != id);
        state.deleted_ports.push(id.to_owned());

        Ok(())
    }

    async fn create_floating_ip_port(
        &self,
        network_id: &str,
        ip: &str,
        reservation: Reservation<'_>,
    ) -> Result<ProviderPort, ProviderError> {
        if self.state.lock().unwrap().fail_floating_ips {
            return Err(unavailable());
        }

        let existing = self
            .reservations(ip)
            .into_iter()
            .find(|p| p.network_id == network_id);
        if let Some(existing) = existing {
            reservation.claim(ip, &existing)?;
            return Ok(existing);
        }

        self.add_described_port(network_id, ip, &[TEST_TAG], reservation.description());

        let mut state = self.state.lock().unwrap();
        state.created_floating_ips.push(ip.to_owned());

        Ok(state.ports.last().cloned().unwrap_or_default())
    }

    async fn delete_floating_ip_port(&self, network_id: &str, ip: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();

        if state.fail_floating_ips {
            return Err(unavailable());
        }

        state
            .ports
            .retain(|p| {
                !(p.network_id == network_id && p.has_tag(TEST_TAG) && p.addresses().any(|a| a == ip))
            });
        state.deleted_floating_ips.push(ip.to_owned());

        Ok(())
    }

    async fn add_tag(&self, _resource_type: &str, _resource_id: &str, _tag: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    fn resource_tag(&self) -> &str {
        TEST_TAG
    }
}
