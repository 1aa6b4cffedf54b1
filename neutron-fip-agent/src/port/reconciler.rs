use std::sync::Arc;

use kube::runtime::reflector::{ObjectRef, Store};
use log::{error, info, warn};
use neutron_fip_core::{
    helpers::split_resource_key,
    resources::{
        condition::REASON_CREATE_FAILED,
        crd::v1::port::{Port, PortStatus},
    },
};

use crate::{
    cluster::ClusterApi,
    dispatch::keymutex::KeyMutex,
    error::ReconcilerError,
    provider::{CreatedPort, NetworkProvider, PortRequest},
};

use super::PortWorkItem;

pub struct PortReconciler {
    pub ports: Store<Port>,
    pub provider: Arc<dyn NetworkProvider>,
    pub cluster: Arc<dyn ClusterApi>,
    pub port_mutex: KeyMutex,
}

impl PortReconciler {
    pub async fn reconcile(&self, item: PortWorkItem) -> Result<(), ReconcilerError> {
        match item {
            PortWorkItem::Add(key) => self.handle_add(&key).await,
            PortWorkItem::Delete { key, provider_id } => self.handle_delete(&key, &provider_id).await,
            PortWorkItem::Update(key) => self.handle_update(&key).await,
            PortWorkItem::Finalize(key) => self.handle_finalize(&key).await,
        }
    }

    async fn handle_add(&self, key: &str) -> Result<(), ReconcilerError> {
        let _guard = self.port_mutex.lock(key).await;
        let (namespace, name) =
            split_resource_key(key).ok_or_else(|| ReconcilerError::MalformedKey(key.to_owned()))?;

        // the queued key may be stale, the cache holds the freshest spec
        let port = match self.ports.get(&ObjectRef::new(name).within(namespace)) {
            Some(port) => port,
            None => {
                info!("Port {key} is gone, skipping creation");
                return Ok(());
            }
        };

        if port.is_deleting() {
            return Ok(());
        }

        if !port.has_cleanup_finalizer() {
            self.cluster
                .patch_port_finalizers(
                    namespace,
                    name,
                    &port.finalizers_with_cleanup(),
                    port.metadata.resource_version.as_deref(),
                )
                .await?;
        }

        if port.is_created() {
            return Ok(());
        }

        let mut status = port.status.clone().unwrap_or_default();

        match self.provider.create_port(&port_request(key, &port)).await {
            Ok(created) => {
                info!("Created provider port {} for {key}", created.id);
                apply_created(&mut status, &created);

                if let Err(err) = self.cluster.patch_port_status(namespace, name, &status).await {
                    warn!("Couldn't record port {} for {key}, rolling it back!", created.id);
                    if let Err(rollback_err) = self.provider.delete_port(&created.id).await {
                        error!("Couldn't roll back provider port {}! {rollback_err}", created.id);
                    }
                    return Err(err.into());
                }

                Ok(())
            }
            Err(err) => {
                status.set_error(REASON_CREATE_FAILED, &err.to_string());

                if let Err(patch_err) = self.cluster.patch_port_status(namespace, name, &status).await {
                    warn!("Couldn't record the failure of {key}! {patch_err}");
                }

                Err(err.into())
            }
        }
    }

    async fn handle_delete(&self, key: &str, provider_id: &str) -> Result<(), ReconcilerError> {
        let _guard = self.port_mutex.lock(key).await;

        self.provider.delete_port(provider_id).await?;
        info!("Deleted provider port {provider_id} of {key}");

        Ok(())
    }

    async fn handle_finalize(&self, key: &str) -> Result<(), ReconcilerError> {
        let _guard = self.port_mutex.lock(key).await;
        let (namespace, name) =
            split_resource_key(key).ok_or_else(|| ReconcilerError::MalformedKey(key.to_owned()))?;

        let port = match self.ports.get(&ObjectRef::new(name).within(namespace)) {
            Some(port) if port.is_deleting() && port.has_cleanup_finalizer() => port,
            _ => return Ok(()),
        };

        if let Some(provider_id) = port.provider_id() {
            self.provider.delete_port(provider_id).await?;
            info!("Deleted provider port {provider_id} of {key}");
        }

        match self
            .cluster
            .patch_port_finalizers(
                namespace,
                name,
                &port.finalizers_without_cleanup(),
                port.metadata.resource_version.as_deref(),
            )
            .await
        {
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(()),
            result => result.map_err(Into::into),
        }
    }

    async fn handle_update(&self, _key: &str) -> Result<(), ReconcilerError> {
        Err(ReconcilerError::NotImplemented("port update"))
    }
}

fn port_request(key: &str, port: &Port) -> PortRequest {
    PortRequest {
        name: port.spec.name.clone().unwrap_or_else(|| key.to_owned()),
        project_id: port.spec.project_id.clone(),
        network_id: port.spec.network_id.clone(),
        subnet_id: port.spec.subnet_id.clone(),
        fixed_ip: port.spec.fix_ip.clone(),
        mac_address: port.spec.fix_mac.clone(),
        security_groups: port.spec.security_group_id.clone(),
    }
}

fn apply_created(status: &mut PortStatus, created: &CreatedPort) {
    status.id = created.id.clone();
    status.ip = created.ip.clone();
    status.mac = created.mac.clone();
    status.security_group_id = created.security_groups.clone();
    status.cidr = created.cidr.clone();
    status.gateway = created.gateway.clone();
    status.mtu = created.mtu;
    status.set_created(&format!("provider port {} created", created.id));
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use k8s_openapi::{apimachinery::pkg::apis::meta::v1::Time, chrono::Utc};
    use kube::core::ObjectMeta;
    use neutron_fip_core::resources::crd::v1::port::{Port, PortConditionType, PortSpec, PortStatus};

    use crate::{
        dispatch::keymutex::KeyMutex,
        error::{ReconcilerError, Retryable},
        port::PortWorkItem,
        testing::{store_of, FakeCluster, FakeProvider},
    };

    use super::PortReconciler;

    fn port(name: &str) -> Port {
        Port {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                namespace: Some("ns".to_owned()),
                ..Default::default()
            },
            spec: PortSpec {
                network_id: "net".to_owned(),
                subnet_id: "sub".to_owned(),
                security_group_id: vec!["sg-1".to_owned()],
                fix_ip: Some("192.168.0.5".to_owned()),
                ..Default::default()
            },
            status: None,
        }
    }

    fn created(mut port: Port, id: &str) -> Port {
        let mut status = PortStatus {
            id: id.to_owned(),
            ..Default::default()
        };
        status.set_created("created");
        port.status = Some(status);
        port
    }

    fn deleting(mut port: Port) -> Port {
        port.metadata.deletion_timestamp = Some(Time(Utc::now()));
        port.metadata.finalizers = Some(vec!["example.com/hold".to_owned(), Port::cleanup_finalizer()]);
        port
    }

    fn reconciler(ports: Vec<Port>, provider: Arc<FakeProvider>, cluster: Arc<FakeCluster>) -> PortReconciler {
        PortReconciler {
            ports: store_of(ports),
            provider,
            cluster,
            port_mutex: KeyMutex::new(7),
        }
    }

    #[tokio::test]
    async fn add_creates_port_and_records_status() {
        let provider = Arc::new(FakeProvider::default());
        let cluster = Arc::new(FakeCluster::default());
        let reconciler = reconciler(vec![port("a")], provider.clone(), cluster.clone());

        reconciler.reconcile(PortWorkItem::Add("ns/a".to_owned())).await.unwrap();

        let request = provider.state.lock().unwrap().created_ports[0].clone();
        let status = cluster.state.lock().unwrap().port_statuses["ns/a"].clone();

        assert_eq!(request.name, "ns/a");
        assert_eq!(request.fixed_ip.as_deref(), Some("192.168.0.5"));
        assert_eq!(request.security_groups, vec!["sg-1".to_owned()]);
        assert_eq!(status.ip, "192.168.0.5");
        assert_eq!(status.mtu, 1450);
        assert_eq!(status.gateway, "192.168.0.1");
        assert!(status.is_condition_true(PortConditionType::Created));
        assert!(status.is_condition_true(PortConditionType::Ready));
        assert_eq!(
            cluster.state.lock().unwrap().port_finalizers["ns/a"],
            vec![Port::cleanup_finalizer()]
        );
    }

    #[tokio::test]
    async fn port_is_not_created_without_its_finalizer() {
        let provider = Arc::new(FakeProvider::default());
        let cluster = Arc::new(FakeCluster::default());
        cluster.state.lock().unwrap().fail_port_finalizers = true;
        let reconciler = reconciler(vec![port("a")], provider.clone(), cluster);

        let err = reconciler
            .reconcile(PortWorkItem::Add("ns/a".to_owned()))
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert!(provider.state.lock().unwrap().created_ports.is_empty());
    }

    #[tokio::test]
    async fn created_port_is_adopted_with_a_finalizer() {
        let provider = Arc::new(FakeProvider::default());
        let cluster = Arc::new(FakeCluster::default());
        let reconciler = reconciler(vec![created(port("a"), "p-1")], provider.clone(), cluster.clone());

        reconciler.reconcile(PortWorkItem::Add("ns/a".to_owned())).await.unwrap();

        assert!(provider.state.lock().unwrap().created_ports.is_empty());
        assert_eq!(
            cluster.state.lock().unwrap().port_finalizers["ns/a"],
            vec![Port::cleanup_finalizer()]
        );
    }

    #[tokio::test]
    async fn finalize_releases_provider_port_then_the_finalizer() {
        let provider = Arc::new(FakeProvider::default());
        let cluster = Arc::new(FakeCluster::default());
        let reconciler = reconciler(
            vec![deleting(created(port("a"), "p-9"))],
            provider.clone(),
            cluster.clone(),
        );

        reconciler
            .reconcile(PortWorkItem::Finalize("ns/a".to_owned()))
            .await
            .unwrap();

        assert_eq!(provider.state.lock().unwrap().deleted_ports, vec!["p-9".to_owned()]);
        assert_eq!(
            cluster.state.lock().unwrap().port_finalizers["ns/a"],
            vec!["example.com/hold".to_owned()]
        );
    }

    #[tokio::test]
    async fn failed_finalizer_removal_is_retried() {
        let provider = Arc::new(FakeProvider::default());
        let cluster = Arc::new(FakeCluster::default());
        cluster.state.lock().unwrap().fail_port_finalizers = true;
        let reconciler = reconciler(
            vec![deleting(created(port("a"), "p-9"))],
            provider.clone(),
            cluster.clone(),
        );

        let err = reconciler
            .reconcile(PortWorkItem::Finalize("ns/a".to_owned()))
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert!(cluster.state.lock().unwrap().port_finalizers.is_empty());
    }

    #[tokio::test]
    async fn uncreated_port_is_finalized_without_provider_calls() {
        let provider = Arc::new(FakeProvider::default());
        let cluster = Arc::new(FakeCluster::default());
        let reconciler = reconciler(vec![deleting(port("a"))], provider.clone(), cluster.clone());

        reconciler
            .reconcile(PortWorkItem::Finalize("ns/a".to_owned()))
            .await
            .unwrap();

        assert!(provider.state.lock().unwrap().deleted_ports.is_empty());
        assert_eq!(
            cluster.state.lock().unwrap().port_finalizers["ns/a"],
            vec!["example.com/hold".to_owned()]
        );
    }

    #[tokio::test]
    async fn failed_creation_sets_error_condition_and_retries() {
        let provider = Arc::new(FakeProvider::default());
        provider.state.lock().unwrap().fail_create_port = Some("quota exceeded".to_owned());
        let cluster = Arc::new(FakeCluster::default());
        let reconciler = reconciler(vec![port("a")], provider, cluster.clone());

        let err = reconciler
            .reconcile(PortWorkItem::Add("ns/a".to_owned()))
            .await
            .unwrap_err();

        let status = cluster.state.lock().unwrap().port_statuses["ns/a"].clone();
        let condition = status.get_condition(PortConditionType::Error).unwrap();

        assert!(err.is_retryable());
        assert!(condition.message.as_deref().unwrap().contains("quota exceeded"));
        assert!(!status.is_condition_true(PortConditionType::Created));
    }

    #[tokio::test]
    async fn unrecorded_port_is_rolled_back() {
        let provider = Arc::new(FakeProvider::default());
        let cluster = Arc::new(FakeCluster::default());
        cluster.state.lock().unwrap().fail_port_status = true;
        let reconciler = reconciler(vec![port("a")], provider.clone(), cluster);

        assert!(reconciler.reconcile(PortWorkItem::Add("ns/a".to_owned())).await.is_err());
        assert_eq!(provider.state.lock().unwrap().deleted_ports, vec!["port-1".to_owned()]);
    }

    #[tokio::test]
    async fn created_or_missing_ports_are_skipped() {
        let mut adopted = created(port("b"), "p-1");
        adopted.metadata.finalizers = Some(vec![Port::cleanup_finalizer()]);

        let provider = Arc::new(FakeProvider::default());
        let reconciler = reconciler(vec![adopted], provider.clone(), Arc::new(FakeCluster::default()));

        reconciler.reconcile(PortWorkItem::Add("ns/b".to_owned())).await.unwrap();
        reconciler.reconcile(PortWorkItem::Add("ns/missing".to_owned())).await.unwrap();

        assert!(provider.state.lock().unwrap().created_ports.is_empty());
    }

    #[tokio::test]
    async fn delete_releases_provider_port() {
        let provider = Arc::new(FakeProvider::default());
        let reconciler = reconciler(vec![], provider.clone(), Arc::new(FakeCluster::default()));

        reconciler
            .reconcile(PortWorkItem::Delete {
                key: "ns/a".to_owned(),
                provider_id: "p-9".to_owned(),
            })
            .await
            .unwrap();

        assert_eq!(provider.state.lock().unwrap().deleted_ports, vec!["p-9".to_owned()]);
    }

    #[tokio::test]
    async fn update_is_a_permanent_failure() {
        let reconciler = reconciler(
            vec![port("a")],
            Arc::new(FakeProvider::default()),
            Arc::new(FakeCluster::default()),
        );

        let err = reconciler
            .reconcile(PortWorkItem::Update("ns/a".to_owned()))
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcilerError::NotImplemented(_)));
        assert!(!err.is_retryable());
    }
}
