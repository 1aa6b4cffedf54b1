use log::{info, warn};
use neutron_fip_core::allocation::patch::FipPatch;

use crate::error::ReconcilerError;

use super::FipContext;

/// Applies a single patch under the Fip's lock, against a revision fetched
/// from the authoritative store. Unchanged statuses are not written.
pub async fn apply_fip_patch(context: &FipContext, patch: FipPatch) -> Result<(), ReconcilerError> {
    let result = apply_locked(context, &patch).await;

    if result.is_ok() {
        context.notify_applied();
    }

    result
}

async fn apply_locked(context: &FipContext, patch: &FipPatch) -> Result<(), ReconcilerError> {
    let _guard = context.fip_mutex.lock(&patch.name).await;

    let fip = match context.cluster.get_fip(&patch.name).await? {
        Some(fip) => fip,
        None => {
            warn!("Fip {} not found, dropping patch ({patch})", patch.name);
            return Ok(());
        }
    };

    let current = fip.status_or_default();
    let updated = patch.apply(&current);

    if updated == current {
        info!("Fip {} status unchanged by ({patch}), no sync required", patch.name);
        return Ok(());
    }

    context.cluster.patch_fip_status(&patch.name, &updated).await?;

    Ok(())
}
