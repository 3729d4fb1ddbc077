use k8s_openapi::{api::batch::v1::Job, apimachinery::pkg::apis::meta::v1::OwnerReference};
use serde_json::{json, Value};
use snafu::ResultExt as _;

use crate::{Result, SerializationSnafu, MANAGER};

use super::{archive_file, BACKUP_OUTPUT_PATH, BACKUP_SOURCE_PATH, DATA_PATH, RESTORE_TARGET_PATH};

pub const OWNER_LABEL: &str = "backup.manuchim.dev/owner";

/// A PersistentVolumeClaim mounted into the data mover container.
#[derive(Clone, Debug, PartialEq)]
pub struct ClaimMount {
    pub volume: &'static str,
    pub claim_name: String,
    pub mount_path: &'static str,
    pub read_only: bool,
}

/// Builds the single-container, run-once Job that moves data for a Backup or Restore.
pub struct JobBuilder {
    pub name: String,
    pub namespace: String,
    /// Name of the Backup/Restore the Job works for
    pub owner: String,
    pub owner_references: Vec<OwnerReference>,

    pub container: &'static str,
    pub image: String,
    pub service_account: Option<String>,
    pub script: String,
    pub mounts: Vec<ClaimMount>,
}

impl JobBuilder {
    pub fn build(&self) -> Result<Job> {
        serde_json::from_value(self.job_spec()).context(SerializationSnafu)
    }

    fn job_spec(&self) -> Value {
        let volumes = self
            .mounts
            .iter()
            .map(|x| {
                json!({
                    "name": x.volume,
                    "persistentVolumeClaim": { "claimName": x.claim_name, "readOnly": x.read_only },
                })
            })
            .collect::<Value>();

        let volume_mounts = self
            .mounts
            .iter()
            .map(|x| {
                json!({ "name": x.volume, "mountPath": x.mount_path, "readOnly": x.read_only })
            })
            .collect::<Value>();

        let mut spec = json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {
                "name": self.name,
                "namespace": self.namespace,
                "labels": {
                    "app.kubernetes.io/created-by": MANAGER,
                    OWNER_LABEL: self.owner,
                },
                "ownerReferences": self.owner_references.as_slice(),
            },
            "spec": {
                "backoffLimit": 0,
                "template": {
                    "metadata": {
                        "labels": {
                            "app.kubernetes.io/created-by": MANAGER,
                            OWNER_LABEL: self.owner,
                        }
                    },
                    "spec": {
                        "containers": [{
                            "name": self.container,
                            "image": self.image,
                            "command": ["sh", "-c", self.script],
                            "volumeMounts": volume_mounts,
                        }],
                        "volumes": volumes,
                        "restartPolicy": "Never",
                    }
                }
            }
        });

        if let Some(ref service_account) = self.service_account {
            spec["spec"]["template"]["spec"]["serviceAccountName"] = json!(service_account);
        }
        spec
    }
}

/// Archive the source volume into `<backup>.tar.gz` on the shared storage volume.
pub fn backup_script(backup: &str, pvc: &str) -> String {
    let archive = format!("{BACKUP_OUTPUT_PATH}/{}", archive_file(backup));
    format!(
        "echo 'Starting backup of PVC: {pvc}' && \
         tar -czf '{archive}' -C {DATA_PATH} . && \
         echo 'Backup completed successfully' && \
         ls -lh {BACKUP_OUTPUT_PATH}/"
    )
}

/// Extract `<backup>.tar.gz` into the target volume and report the restored size through the
/// container's termination message. Fails when the archive is missing.
pub fn restore_script(backup: &str) -> String {
    let archive = format!("{BACKUP_SOURCE_PATH}/{}", archive_file(backup));
    format!(
        "echo 'Starting restore operation...' && \
         if [ -f '{archive}' ]; then \
           tar -xzf '{archive}' -C {RESTORE_TARGET_PATH} && \
           echo 'Restore completed successfully' && \
           du -sh {RESTORE_TARGET_PATH} | cut -f1 > /dev/termination-log; \
         else \
           echo 'ERROR: Backup file not found at {archive}' && exit 1; \
         fi"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> JobBuilder {
        JobBuilder {
            name: "nightly-20260101-020000-job".into(),
            namespace: "apps".into(),
            owner: "nightly-20260101-020000".into(),
            owner_references: vec![],
            container: "backup",
            image: "busybox:latest".into(),
            service_account: None,
            script: backup_script("nightly-20260101-020000", "postgres-data"),
            mounts: vec![
                ClaimMount {
                    volume: "source-data",
                    claim_name: "postgres-data".into(),
                    mount_path: DATA_PATH,
                    read_only: true,
                },
                ClaimMount {
                    volume: "backup-output",
                    claim_name: "backup-storage".into(),
                    mount_path: BACKUP_OUTPUT_PATH,
                    read_only: false,
                },
            ],
        }
    }

    #[test]
    fn job_runs_once_with_claim_mounts() {
        let job = builder().build().unwrap();
        let spec = job.spec.unwrap();
        assert_eq!(spec.backoff_limit, Some(0));

        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        assert!(pod.service_account_name.is_none());

        let volumes = pod.volumes.unwrap();
        let source = volumes[0].persistent_volume_claim.as_ref().unwrap();
        assert_eq!(source.claim_name, "postgres-data");
        assert_eq!(source.read_only, Some(true));
        let output = volumes[1].persistent_volume_claim.as_ref().unwrap();
        assert_eq!(output.claim_name, "backup-storage");
        assert_eq!(output.read_only, Some(false));

        let mounts = pod.containers[0].volume_mounts.clone().unwrap();
        assert_eq!(mounts[0].mount_path, "/data");
        assert_eq!(mounts[0].read_only, Some(true));
        assert_eq!(mounts[1].mount_path, "/backup-output");
    }

    #[test]
    fn job_carries_owner_label_and_service_account() {
        let mut builder = builder();
        builder.service_account = Some("mover".into());
        let job = builder.build().unwrap();

        let labels = job.metadata.labels.unwrap();
        assert_eq!(labels[OWNER_LABEL], "nightly-20260101-020000");
        assert_eq!(labels["app.kubernetes.io/created-by"], MANAGER);
        let pod = job.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.service_account_name.as_deref(), Some("mover"));
    }

    #[test]
    fn scripts_reference_the_archive() {
        let script = backup_script("nightly-1", "data");
        assert!(script.contains("tar -czf '/backup-output/nightly-1.tar.gz' -C /data ."));

        let script = restore_script("nightly-1");
        assert!(script.contains("tar -xzf '/backup-source/nightly-1.tar.gz' -C /restore-target"));
        assert!(script.contains("exit 1"));
        assert!(script.contains("/dev/termination-log"));
    }
}
