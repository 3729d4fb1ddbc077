use async_trait::async_trait;
use k8s_openapi::{api::batch::v1::Job, apimachinery::pkg::apis::meta::v1::Condition};
use kube::{Resource as _, ResourceExt as _};

use crate::{
    crd::{Backup, Phase},
    events::reasons,
    store::ObjectStore,
    Context, Result,
};

use super::{
    archive_file,
    job::{backup_script, ClaimMount, JobBuilder},
    job_name,
    lifecycle::{Executable, Transition},
    BACKUP_OUTPUT_PATH, DATA_PATH,
};

#[async_trait]
impl Executable for Backup {
    const STARTED: &'static str = reasons::BACKUP_STARTED;
    const COMPLETED: &'static str = reasons::BACKUP_COMPLETED;
    const FAILED: &'static str = reasons::BACKUP_FAILED;

    fn store(ctx: &Context) -> &dyn ObjectStore<Self> {
        ctx.backups.as_ref()
    }

    fn phase(&self) -> Phase {
        Backup::phase(self)
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

    fn build_job(&self, ctx: &Context) -> Result<Job> {
        let name = self.name_any();
        JobBuilder {
            name: job_name(&name),
            namespace: self.namespace().unwrap_or_default(),
            owner: name.clone(),
            owner_references: self.controller_owner_ref(&()).into_iter().collect(),
            container: "backup",
            image: ctx.config.worker_image.clone(),
            service_account: ctx.config.worker_service_account_name.clone(),
            script: backup_script(&name, &self.spec.target.pvc_name),
            mounts: vec![
                ClaimMount {
                    volume: "source-data",
                    claim_name: self.spec.target.pvc_name.clone(),
                    mount_path: DATA_PATH,
                    read_only: true,
                },
                ClaimMount {
                    volume: "backup-output",
                    claim_name: ctx.config.storage_pvc.clone(),
                    mount_path: BACKUP_OUTPUT_PATH,
                    read_only: false,
                },
            ],
        }
        .build()
    }

    async fn record_success(&mut self, ctx: &Context, _job: &Job) -> Result<()> {
        let location = format!("{}/{}", ctx.config.storage_pvc, archive_file(&self.name_any()));
        self.status.get_or_insert_with(Default::default).backup_location = Some(location);
        Ok(())
    }

    fn started_message(&self) -> String {
        format!("Backing up PVC {}", self.spec.target)
    }

    fn completed_message(&self) -> String {
        format!("Backup of PVC {} completed", self.spec.target)
    }

    fn failed_message(&self) -> String {
        "Backup job failed - check job logs for details".to_string()
    }
}
