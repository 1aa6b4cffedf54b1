use serde::Serialize;
use serde_json::{json, Value};

pub mod operations;

/// Wraps a status into the body of a merge patch against the status
/// subresource.
pub fn status_merge_patch<S: Serialize>(status: &S) -> Value {
    json!({ "status": status })
}

/// Body of a merge patch replacing a single spec field.
pub fn spec_field_merge_patch<V: Serialize>(field: &str, value: &V) -> Value {
    json!({ "spec": { field: value } })
}

/// Body of a merge patch replacing the finalizers. Carrying the resource
/// version makes the write fail with a conflict if the list changed meanwhile.
pub fn finalizers_merge_patch(finalizers: &[String], resource_version: Option<&str>) -> Value {
    let mut metadata = json!({ "finalizers": finalizers });

    if let Some(version) = resource_version {
        metadata["resourceVersion"] = json!(version);
    }

    json!({ "metadata": metadata })
}
