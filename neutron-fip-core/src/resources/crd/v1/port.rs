use std::fmt::Display;

use chrono::{DateTime, Utc};
use kube::{CustomResource, CustomResourceExt, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

#[skip_serializing_none]
#[derive(CustomResource, Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "neutron.io",
    version = "v1",
    kind = "Port",
    namespaced,
    status = "PortStatus",
    derive = "Default"
)]
pub struct PortSpec {
    pub name: Option<String>,
    /// project the provider port is created in
    pub project_id: Option<String>,
    pub network_id: String,
    pub subnet_id: String,
    #[serde(default)]
    pub security_group_id: Vec<String>,
    /// desired fixed IP, left to the provider when unset
    pub fix_ip: Option<String>,
    /// desired MAC address, left to the provider when unset
    pub fix_mac: Option<String>,
    #[serde(default)]
    pub delete_by_pod: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PortStatus {
    #[serde(default)]
    pub conditions: Vec<PortCondition>,
    /// provider assigned port id
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub mac: String,
    #[serde(default)]
    pub security_group_id: Vec<String>,
    /// CIDR of the subnet the port lives in
    #[serde(default)]
    pub cidr: String,
    #[serde(default)]
    pub gateway: String,
    #[serde(default)]
    pub mtu: u32,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum PortConditionType {
    Created,
    Ready,
    Error,
}

impl Display for PortConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortConditionType::Created => f.write_str("Created"),
            PortConditionType::Ready => f.write_str("Ready"),
            PortConditionType::Error => f.write_str("Error"),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PortCondition {
    #[serde(rename = "type")]
    pub type_: PortConditionType,
    pub status: ConditionStatus,
    pub reason: Option<String>,
    pub message: Option<String>,
    pub last_update_time: Option<DateTime<Utc>>,
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Port {
    pub fn is_created(&self) -> bool {
        self.status
            .as_ref()
            .map(|status| status.is_condition_true(PortConditionType::Created))
            .unwrap_or(false)
    }

    pub fn provider_id(&self) -> Option<&str> {
        self.status
            .as_ref()
            .map(|status| status.id.as_str())
            .filter(|id| !id.is_empty())
    }

    /// Held on every port until its provider port is released.
    pub fn cleanup_finalizer() -> String {
        format!("{}/cleanup", Self::crd_name())
    }

    pub fn has_cleanup_finalizer(&self) -> bool {
        let cleanup = Self::cleanup_finalizer();

        self.finalizers().iter().any(|finalizer| *finalizer == cleanup)
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn finalizers_with_cleanup(&self) -> Vec<String> {
        let mut finalizers = self.finalizers().to_vec();

        if !self.has_cleanup_finalizer() {
            finalizers.push(Self::cleanup_finalizer());
        }

        finalizers
    }

    pub fn finalizers_without_cleanup(&self) -> Vec<String> {
        let cleanup = Self::cleanup_finalizer();

        self.finalizers()
            .iter()
            .filter(|finalizer| **finalizer != cleanup)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use kube::{core::ObjectMeta, ResourceExt};

    use super::{Port, PortSpec};

    fn port(finalizers: &[&str]) -> Port {
        Port {
            metadata: ObjectMeta {
                name: Some("a".to_owned()),
                namespace: Some("ns".to_owned()),
                finalizers: Some(finalizers.iter().map(|f| f.to_string()).collect()),
                ..Default::default()
            },
            spec: PortSpec::default(),
            status: None,
        }
    }

    #[test]
    fn cleanup_finalizer_is_named_after_the_crd() {
        assert_eq!(Port::cleanup_finalizer(), "ports.neutron.io/cleanup");
    }

    #[test]
    fn foreign_finalizers_are_preserved() {
        let bare = port(&["example.com/hold"]);
        let finalized = port(&["example.com/hold", "ports.neutron.io/cleanup"]);

        assert!(!bare.has_cleanup_finalizer());
        assert!(finalized.has_cleanup_finalizer());
        assert_eq!(bare.finalizers_with_cleanup(), finalized.finalizers().to_vec());
        assert_eq!(finalized.finalizers_with_cleanup(), finalized.finalizers().to_vec());
        assert_eq!(finalized.finalizers_without_cleanup(), vec!["example.com/hold".to_owned()]);
    }
}
