use neutron_fip_core::allocation::AllocationError;
use thiserror::Error;

use crate::provider::ProviderError;

/// Classifies failures for the dispatch layer. Permanent failures are logged
/// and forgotten instead of being rescheduled.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("Malformed resource key '{}'!", .0)]
    MalformedKey(String),
    #[error("Couldn't reach the cluster API! Reason: {}", .0)]
    KubeApiError(kube::Error),
    #[error("Provider request failed! Reason: {}", .0)]
    ProviderError(ProviderError),
    #[error("Couldn't serialize the resource! Reason: {}", .0)]
    SerializationError(serde_json::Error),
    #[error("Invalid allocation request! Reason: {}", .0)]
    Allocation(AllocationError),
    #[error("Logical router '{}' was not found!", .0)]
    VpcNotFound(String),
    #[error("Logical router '{}' isn't attached to an external network!", .0)]
    MissingExternalNetwork(String),
    #[error("Fip '{}' was not found!", .0)]
    FipNotFound(String),
    #[error("Status patches of Fip '{}' didn't land in time!", .0)]
    PatchTimeout(String),
    #[error("{} isn't implemented!", .0)]
    NotImplemented(&'static str),
}

impl Retryable for ReconcilerError {
    fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ReconcilerError::MalformedKey(_)
                | ReconcilerError::Allocation(_)
                | ReconcilerError::NotImplemented(_)
        )
    }
}

impl From<kube::Error> for ReconcilerError {
    fn from(value: kube::Error) -> Self {
        ReconcilerError::KubeApiError(value)
    }
}

impl From<ProviderError> for ReconcilerError {
    fn from(value: ProviderError) -> Self {
        match value {
            // the provider saw the address reserved before the status did
            ProviderError::Conflict { ip, holder } => {
                ReconcilerError::Allocation(AllocationError::AlreadyAllocated {
                    ip,
                    holders: vec![holder],
                })
            }
            value => ReconcilerError::ProviderError(value),
        }
    }
}

impl From<AllocationError> for ReconcilerError {
    fn from(value: AllocationError) -> Self {
        ReconcilerError::Allocation(value)
    }
}

impl From<serde_json::Error> for ReconcilerError {
    fn from(value: serde_json::Error) -> Self {
        ReconcilerError::SerializationError(value)
    }
}
