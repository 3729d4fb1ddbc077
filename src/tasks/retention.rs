use std::cmp::Reverse;

use kube::{runtime::events::EventType, Resource as _, ResourceExt as _};
use snafu::OptionExt as _;
use tracing::{debug, info, warn};

use crate::{
    crd::{Backup, BackupPolicy, Phase},
    events::{actions, reasons},
    Context, MissingObjectKeySnafu, Result,
};

/// Delete the policy's Completed Backups beyond the newest `keepLast`. Returns the number
/// deleted. A Backup that fails to delete is logged and left for the next run.
pub async fn cleanup(policy: &BackupPolicy, ctx: &Context) -> Result<usize> {
    let Some(keep_last) = policy.keep_last() else {
        return Ok(0);
    };
    let name = policy.name_any();
    let namespace = policy
        .namespace()
        .with_context(|| MissingObjectKeySnafu { kind: "BackupPolicy", name: name.clone() })?;

    let mut completed: Vec<Backup> = ctx
        .backups
        .list(&namespace, None)
        .await?
        .into_iter()
        .filter(|x| x.spec.policy_ref == name && x.phase() == Phase::Completed)
        .collect();
    completed.sort_by_key(|x| Reverse(x.creation_timestamp()));

    let mut deleted = 0;
    for backup in completed.iter().skip(keep_last as usize) {
        let backup_name = backup.name_any();
        match ctx.backups.delete(&namespace, &backup_name).await {
            Ok(()) => {
                info!(policy = name, namespace, backup = backup_name, "Deleted old backup");
                deleted += 1;
            }
            Err(err) => {
                warn!(
                    policy = name,
                    namespace,
                    backup = backup_name,
                    %err,
                    "Failed to delete backup"
                );
            }
        }
    }

    if deleted == 0 {
        debug!(policy = name, namespace, keep_last, "No backups to prune");
        return Ok(0);
    }

    ctx.metrics.backups_pruned.inc_by(deleted as u64);
    ctx.events
        .publish(
            &policy.object_ref(&()),
            EventType::Normal,
            reasons::CLEANUP_TRIGGERED,
            actions::PRUNE,
            Some(format!("Deleted {deleted} old backups (keepLast={keep_last})")),
        )
        .await;
    Ok(deleted)
}
