use std::fmt::Debug;

use kube::{
    api::{DeleteParams, Patch, PatchParams, PostParams},
    core::ObjectMeta,
    Api, Resource,
};
use log::info;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::{helpers::pretty_type_name, CONTROLLER_FIELD_MANAGER};

use super::status_merge_patch;

fn merge_patch_params() -> PatchParams {
    PatchParams {
        field_manager: Some(CONTROLLER_FIELD_MANAGER.to_owned()),
        ..Default::default()
    }
}

/// Creates the resource and then writes its status, since creation ignores
/// the status of resources exposing a status subresource.
pub async fn create_with_status<T, S>(api: &Api<T>, resource: &T, status: &S) -> kube::Result<T>
where
    T: Resource<DynamicType = ()> + Serialize + Clone + DeserializeOwned + Debug,
    S: Serialize,
{
    let created = api.create(&PostParams::default(), resource).await?;
    let name = created.meta().name.clone().unwrap_or_default();

    info!(
        "Created '{name}' {} resource on the cluster",
        pretty_type_name::<T>()
    );

    api.patch_status(&name, &merge_patch_params(), &Patch::Merge(status_merge_patch(status)))
        .await
}

pub async fn merge_patch<T>(api: &Api<T>, name: &str, patch: &Value) -> kube::Result<T>
where
    T: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    api.patch(name, &merge_patch_params(), &Patch::Merge(patch))
        .await
}

pub async fn merge_patch_status<T>(api: &Api<T>, name: &str, patch: &Value) -> kube::Result<T>
where
    T: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    api.patch_status(name, &merge_patch_params(), &Patch::Merge(patch))
        .await
}

/// Deletes the resource, treating an already missing one as deleted.
pub async fn try_delete<T>(api: &Api<T>, name: &str) -> kube::Result<()>
where
    T: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => {
            info!("Deleted '{name}' {} resource", pretty_type_name::<T>());
            Ok(())
        }
        Err(kube::Error::Api(response)) if response.code == 404 => Ok(()),
        Err(error) => Err(error),
    }
}

/// Builds bare metadata for a cluster-scoped resource.
pub fn cluster_metadata(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_owned()),
        ..Default::default()
    }
}
