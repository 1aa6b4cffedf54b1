use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Pod;

use crate::helpers::resource_key;

pub const EIP_ANNOTATION: &str = "ovn.kubernetes.io/eip";
pub const SNAT_ANNOTATION: &str = "ovn.kubernetes.io/snat";
pub const LOGICAL_ROUTER_ANNOTATION: &str = "ovn.kubernetes.io/logical_router";

/// Floating IP related annotations of a workload. Empty annotation values are
/// treated as unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FipAnnotations {
    pub eip: Option<String>,
    pub snat: Option<String>,
    pub logical_router: Option<String>,
}

impl FipAnnotations {
    pub fn from_annotations(annotations: &BTreeMap<String, String>) -> Self {
        let get = |key: &str| {
            annotations
                .get(key)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };

        Self {
            eip: get(EIP_ANNOTATION),
            snat: get(SNAT_ANNOTATION),
            logical_router: get(LOGICAL_ROUTER_ANNOTATION),
        }
    }

    pub fn from_pod(pod: &Pod) -> Self {
        match &pod.metadata.annotations {
            Some(annotations) => Self::from_annotations(annotations),
            None => Self::default(),
        }
    }

    pub fn requests_fip(&self) -> bool {
        self.eip.is_some() || self.snat.is_some()
    }

    /// The addresses of these annotations that `current` doesn't ask for
    /// anymore. A changed logical router gives up every address.
    pub fn no_longer_requested(&self, current: &FipAnnotations) -> FipAnnotations {
        let same_router = self.logical_router == current.logical_router;
        let released = |old: &Option<String>, new: &Option<String>| {
            old.clone().filter(|_| !same_router || old != new)
        };

        FipAnnotations {
            eip: released(&self.eip, &current.eip),
            snat: released(&self.snat, &current.snat),
            logical_router: self.logical_router.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FipOperation {
    Add,
    Del,
}

impl std::fmt::Display for FipOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FipOperation::Add => f.write_str("add"),
            FipOperation::Del => f.write_str("del"),
        }
    }
}

/// A pod lifecycle event reduced to what the allocation handler needs. It is
/// self-contained so that deletions can be handled after the pod is gone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PodFipRequest {
    pub operation: FipOperation,
    /// `namespace/name` of the pod
    pub resource: String,
    pub annotations: FipAnnotations,
}

impl PodFipRequest {
    pub fn new(operation: FipOperation, namespace: &str, name: &str, annotations: FipAnnotations) -> Self {
        Self {
            operation,
            resource: resource_key(namespace, name),
            annotations,
        }
    }

    pub fn from_pod(operation: FipOperation, pod: &Pod) -> Option<Self> {
        let namespace = pod.metadata.namespace.as_deref()?;
        let name = pod.metadata.name.as_deref()?;

        Some(Self::new(operation, namespace, name, FipAnnotations::from_pod(pod)))
    }
}

impl std::fmt::Display for PodFipRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "op: {}, pod: {}, eip: {}, snat: {}",
            self.operation,
            self.resource,
            self.annotations.eip.as_deref().unwrap_or("-"),
            self.annotations.snat.as_deref().unwrap_or("-")
        )
    }
}
