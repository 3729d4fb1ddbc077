use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{BackupTarget, Phase};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(kind = "Backup", group = "backup.manuchim.dev", version = "v1alpha1", namespaced)]
#[kube(status = "BackupStatus", shortname = "bk", derive = "PartialEq")]
#[kube(
    printcolumn = r#"{"name":"Phase", "type":"string", "description":"Phase of Backup", "jsonPath":".status.phase"}"#
)]
#[kube(printcolumn = r#"{"name":"Policy", "type":"string", "jsonPath":".spec.policyRef"}"#)]
#[kube(
    printcolumn = r#"{"name":"StartTime", "type":"date", "description":"When backup was started", "jsonPath":".status.startTime"}"#
)]
#[kube(
    printcolumn = r#"{"name":"CompletionTime", "type":"date", "jsonPath":".status.completionTime"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BackupSpec {
    /// Name of the BackupPolicy that created this Backup
    pub policy_ref: String,

    /// Copied from the BackupPolicy when the Backup is created
    pub target: BackupTarget,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,

    /// Where the archive was written, `<storage pvc>/<backup>.tar.gz`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_location: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl Backup {
    pub fn phase(&self) -> Phase {
        self.status.as_ref().and_then(|x| x.phase).unwrap_or_default()
    }
}
