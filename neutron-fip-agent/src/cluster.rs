use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client};
use neutron_fip_core::{
    kubernetes::{
        operations::{create_with_status, merge_patch, merge_patch_status, try_delete},
        finalizers_merge_patch, spec_field_merge_patch, status_merge_patch,
    },
    resources::crd::v1::{
        fip::{AllocationPool, Fip, FipStatus},
        port::{Port, PortStatus},
    },
};

/// Reads and writes against the authoritative store, bypassing the caches.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get_fip(&self, name: &str) -> Result<Option<Fip>, kube::Error>;

    /// Creates the record together with its status.
    async fn create_fip(&self, fip: &Fip) -> Result<(), kube::Error>;

    async fn delete_fip(&self, name: &str) -> Result<(), kube::Error>;

    async fn patch_fip_status(&self, name: &str, status: &FipStatus) -> Result<(), kube::Error>;

    async fn patch_fip_allocation_pools(
        &self,
        name: &str,
        pools: &[AllocationPool],
    ) -> Result<(), kube::Error>;

    async fn patch_port_status(
        &self,
        namespace: &str,
        name: &str,
        status: &PortStatus,
    ) -> Result<(), kube::Error>;

    /// Replaces the port finalizers, failing with a conflict if the port
    /// moved past `resource_version`.
    async fn patch_port_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: &[String],
        resource_version: Option<&str>,
    ) -> Result<(), kube::Error>;

    async fn pod_exists(&self, namespace: &str, name: &str) -> Result<bool, kube::Error>;
}

pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn fip_api(&self) -> Api<Fip> {
        Api::all(self.client.clone())
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get_fip(&self, name: &str) -> Result<Option<Fip>, kube::Error> {
        self.fip_api().get_opt(name).await
    }

    async fn create_fip(&self, fip: &Fip) -> Result<(), kube::Error> {
        let status = fip.status_or_default();

        create_with_status(&self.fip_api(), fip, &status).await?;

        Ok(())
    }

    async fn delete_fip(&self, name: &str) -> Result<(), kube::Error> {
        try_delete(&self.fip_api(), name).await
    }

    async fn patch_fip_status(&self, name: &str, status: &FipStatus) -> Result<(), kube::Error> {
        merge_patch_status(&self.fip_api(), name, &status_merge_patch(status)).await?;

        Ok(())
    }

    async fn patch_fip_allocation_pools(
        &self,
        name: &str,
        pools: &[AllocationPool],
    ) -> Result<(), kube::Error> {
        merge_patch(
            &self.fip_api(),
            name,
            &spec_field_merge_patch("allocationPools", &pools),
        )
        .await?;

        Ok(())
    }

    async fn patch_port_status(
        &self,
        namespace: &str,
        name: &str,
        status: &PortStatus,
    ) -> Result<(), kube::Error> {
        let api: Api<Port> = Api::namespaced(self.client.clone(), namespace);

        merge_patch_status(&api, name, &status_merge_patch(status)).await?;

        Ok(())
    }

    async fn patch_port_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: &[String],
        resource_version: Option<&str>,
    ) -> Result<(), kube::Error> {
        let api: Api<Port> = Api::namespaced(self.client.clone(), namespace);

        merge_patch(&api, name, &finalizers_merge_patch(finalizers, resource_version)).await?;

        Ok(())
    }

    async fn pod_exists(&self, namespace: &str, name: &str) -> Result<bool, kube::Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);

        Ok(api.get_opt(name).await?.is_some())
    }
}
