//! Network hygiene before kill and removal.
//!
//! A crashed container can stay attached to daemon networks and block both
//! its own removal and name reuse. Before any kill or forced removal the
//! executor walks every network the daemon knows and force-disconnects the
//! target. All of it is best-effort: individual failures become warnings,
//! never errors.

use crate::client::{ContainerClient, ContainerRemoveOptions};
use crate::error::Result;
use crate::trace::TraceSink;
use tracing::debug;

/// Force-disconnects `id` (a container id or name) from every network that
/// still lists it as attached.
pub(crate) async fn disconnect_all_networks(
    client: &dyn ContainerClient,
    trace: &dyn TraceSink,
    id: &str,
) {
    let networks = match client.network_list().await {
        Ok(networks) => networks,
        Err(err) => {
            debug!(error = %err, "can't get network list");
            return;
        }
    };

    for network in networks {
        for (attached_id, endpoint) in &network.containers {
            if attached_id == id || endpoint.name == id {
                match client.network_disconnect(&network.id, id, true).await {
                    Ok(()) => trace.warning(&format!(
                        "Possibly zombie container {} is disconnected from network {}",
                        endpoint.name, network.name
                    )),
                    Err(err) => trace.warning(&format!(
                        "Can't disconnect possibly zombie container {} from network {}: {}",
                        endpoint.name, network.name, err
                    )),
                }
                break;
            }
        }
    }
}

/// Removes a container (and its anonymous volumes) by id or name,
/// scrubbing network attachments first. Removal is forced, so it is
/// idempotent from the caller's point of view.
pub(crate) async fn remove_container(
    client: &dyn ContainerClient,
    trace: &dyn TraceSink,
    id: &str,
) -> Result<()> {
    disconnect_all_networks(client, trace, id).await;
    let result = client
        .container_remove(
            id,
            ContainerRemoveOptions {
                remove_volumes: true,
                force: true,
            },
        )
        .await;
    match &result {
        Ok(()) => debug!(id, "removed container"),
        Err(err) => debug!(id, error = %err, "container removal failed"),
    }
    result
}
