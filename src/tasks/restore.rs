use std::cmp::Reverse;

use async_trait::async_trait;
use k8s_openapi::{
    api::{batch::v1::Job, core::v1::Pod},
    apimachinery::pkg::apis::meta::v1::Condition,
};
use kube::{Resource as _, ResourceExt as _};
use tracing::{debug, warn};

use crate::{
    crd::{Phase, Restore},
    events::reasons,
    store::ObjectStore,
    Context, Result,
};

use super::{
    job::{restore_script, ClaimMount, JobBuilder},
    job_name,
    lifecycle::{Admission, Executable, Transition},
    BACKUP_SOURCE_PATH, RESTORE_TARGET_PATH,
};

const CONTAINER: &str = "restore";

#[async_trait]
impl Executable for Restore {
    const STARTED: &'static str = reasons::RESTORE_STARTED;
    const COMPLETED: &'static str = reasons::RESTORE_COMPLETED;
    const FAILED: &'static str = reasons::RESTORE_FAILED;

    fn store(ctx: &Context) -> &dyn ObjectStore<Self> {
        ctx.restores.as_ref()
    }

    fn phase(&self) -> Phase {
        Restore::phase(self)
    }

    fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map(|x| x.conditions.as_slice()).unwrap_or_default()
    }

    fn apply(&mut self, transition: Transition) {
        let status = self.status.get_or_insert_with(Default::default);
        status.phase = Some(transition.phase);
        if let Some(start_time) = transition.start_time {
            status.start_time = Some(start_time);
        }
        if let Some(completion_time) = transition.completion_time {
            status.completion_time = Some(completion_time);
        }
        status.conditions = vec![transition.condition];
    }

    /// The referenced Backup must exist and be Completed.
    async fn admit(&self, ctx: &Context) -> Result<Admission> {
        let backup_name = &self.spec.backup_name;
        let namespace = self.backup_namespace().unwrap_or_default();

        let Some(backup) = ctx.backups.get(&namespace, backup_name).await? else {
            return Ok(Admission::Denied {
                reason: reasons::BACKUP_NOT_FOUND,
                message: format!("Backup {backup_name} not found"),
            });
        };

        let phase = backup.phase();
        if phase != Phase::Completed {
            return Ok(Admission::Denied {
                reason: reasons::BACKUP_NOT_READY,
                message: format!("Backup is in phase {phase}, not Completed"),
            });
        }

        Ok(Admission::Granted)
    }

    fn build_job(&self, ctx: &Context) -> Result<Job> {
        let name = self.name_any();
        JobBuilder {
            name: job_name(&name),
            namespace: self.namespace().unwrap_or_default(),
            owner: name,
            owner_references: self.controller_owner_ref(&()).into_iter().collect(),
            container: CONTAINER,
            image: ctx.config.worker_image.clone(),
            service_account: ctx.config.worker_service_account_name.clone(),
            script: restore_script(&self.spec.backup_name),
            mounts: vec![
                ClaimMount {
                    volume: "backup-source",
                    claim_name: ctx.config.storage_pvc.clone(),
                    mount_path: BACKUP_SOURCE_PATH,
                    read_only: true,
                },
                ClaimMount {
                    volume: "restore-target",
                    claim_name: self.spec.target_pvc.clone(),
                    mount_path: RESTORE_TARGET_PATH,
                    read_only: false,
                },
            ],
        }
        .build()
    }

    /// Restored size is best-effort: a missing or unreadable pod leaves it unset.
    async fn record_success(&mut self, ctx: &Context, job: &Job) -> Result<()> {
        let namespace = self.namespace().unwrap_or_default();
        match restored_size(ctx, &namespace, &job.name_any()).await {
            Ok(Some(size)) => {
                self.status.get_or_insert_with(Default::default).restored_data_size = Some(size);
            }
            Ok(None) => debug!(name = self.name_any(), "No restored size reported by Job"),
            Err(err) => warn!(name = self.name_any(), ?err, "Unable to read restored size"),
        }
        Ok(())
    }

    fn started_message(&self) -> String {
        "Restore job is being created".to_string()
    }

    fn completed_message(&self) -> String {
        format!("Successfully restored from backup {}", self.spec.backup_name)
    }

    fn failed_message(&self) -> String {
        "Restore job failed - check job logs for details".to_string()
    }
}

/// Termination message of the restore container in the Job's newest pod.
async fn restored_size(ctx: &Context, namespace: &str, job: &str) -> Result<Option<String>> {
    let mut pods: Vec<Pod> = ctx.pods.list(namespace, Some(&format!("job-name={job}"))).await?;
    pods.sort_by_key(|x| Reverse(x.creation_timestamp()));

    Ok(pods
        .first()
        .and_then(|x| x.status.as_ref())
        .and_then(|x| x.container_statuses.as_ref())
        .and_then(|x| x.iter().find(|x| x.name == CONTAINER))
        .and_then(|x| x.state.as_ref())
        .and_then(|x| x.terminated.as_ref())
        .and_then(|x| x.message.as_deref())
        .map(str::trim)
        .filter(|x| !x.is_empty())
        .map(str::to_string))
}
