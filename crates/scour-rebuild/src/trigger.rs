//! Leader side of the scan trigger: fan the request out and aggregate the
//! replies.

use std::collections::HashMap;
use std::sync::Arc;

use scour_net::{ReplyStatus, ScanReply, ScanRequest, Transport};
use scour_types::TargetId;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::{ERR_INTERNAL, ERR_NETWORK};

/// Send `request` to every target in `targets` and merge the replies.
///
/// A target that cannot be reached counts as failed to start. Failed ranks
/// are appended in completion order, without dedup.
pub async fn trigger_scan(
    transport: Arc<dyn Transport>,
    targets: &[TargetId],
    request: &ScanRequest,
) -> ScanReply {
    let mut tasks = JoinSet::new();
    let mut task_targets = HashMap::new();
    for &target in targets {
        let transport = transport.clone();
        let request = request.clone();
        let handle = tasks.spawn(async move { transport.send_scan(target, &request).await });
        task_targets.insert(handle.id(), target);
    }

    let mut reply = ScanReply::ok();
    while let Some(joined) = tasks.join_next_with_id().await {
        match joined {
            Ok((id, Ok(target_reply))) => {
                if !target_reply.status.is_ok() {
                    debug!(
                        target = ?task_targets.get(&id),
                        status = ?target_reply.status,
                        "target failed to start scan"
                    );
                }
                reply.merge(target_reply);
            }
            Ok((id, Err(e))) => {
                let Some(&target) = task_targets.get(&id) else {
                    continue;
                };
                warn!(%target, error = %e, "scan request failed");
                reply.merge(ScanReply::failed(
                    ReplyStatus::failed(ERR_NETWORK, e.to_string()),
                    target,
                ));
            }
            Err(e) => {
                let Some(&target) = task_targets.get(&e.id()) else {
                    continue;
                };
                warn!(%target, error = %e, "scan request task failed");
                reply.merge(ScanReply::failed(
                    ReplyStatus::failed(ERR_INTERNAL, e.to_string()),
                    target,
                ));
            }
        }
    }

    debug!(
        pool = %request.pool_id,
        version = request.rebuild_version,
        targets = targets.len(),
        failed = reply.failed_ranks.as_ref().map_or(0, Vec::len),
        "scan trigger complete"
    );
    reply
}
