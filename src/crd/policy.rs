use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::BackupTarget;

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    kind = "BackupPolicy",
    group = "backup.manuchim.dev",
    version = "v1alpha1",
    namespaced
)]
#[kube(status = "BackupPolicyStatus", shortname = "bp", derive = "PartialEq")]
#[kube(printcolumn = r#"{"name":"Schedule", "type":"string", "jsonPath":".spec.schedule"}"#)]
#[kube(
    printcolumn = r#"{"name":"LastBackup", "type":"date", "description":"When the last Backup was created", "jsonPath":".status.lastBackupTime"}"#
)]
#[kube(
    printcolumn = r#"{"name":"NextBackup", "type":"date", "description":"When the next Backup is due", "jsonPath":".status.nextScheduledBackup"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BackupPolicySpec {
    /// Cron expression, e.g. "0 2 * * *" for daily at 02:00 UTC. Five-field expressions use
    /// standard cron semantics (day-of-week 0 or 7 is Sunday).
    pub schedule: String,

    pub target: BackupTarget,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention: Option<RetentionPolicy>,

    /// What to do when a Backup is due while an earlier one is still Pending or Running.
    #[serde(default)]
    pub concurrency_policy: ConcurrencyPolicy,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetentionPolicy {
    /// Number of most recent Completed Backups to keep
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 1))]
    pub keep_last: Option<u32>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum ConcurrencyPolicy {
    /// Create a new Backup on every interval
    #[default]
    Allow,
    /// Skip an interval while an earlier Backup of this policy hasn't finished
    Forbid,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupPolicyStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_backup_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_scheduled_backup: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl BackupPolicy {
    pub fn keep_last(&self) -> Option<u32> {
        self.spec.retention.as_ref().and_then(|x| x.keep_last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_uses_wire_field_names() {
        let spec: BackupPolicySpec = serde_json::from_value(serde_json::json!({
            "schedule": "0 2 * * *",
            "target": { "pvcName": "postgres-data", "namespace": "db" },
            "retention": { "keepLast": 7 },
        }))
        .unwrap();

        assert_eq!(spec.target.pvc_name, "postgres-data");
        assert_eq!(spec.target.namespace.as_deref(), Some("db"));
        assert_eq!(spec.retention.and_then(|x| x.keep_last), Some(7));
        assert_eq!(spec.concurrency_policy, ConcurrencyPolicy::Allow);
    }
}
