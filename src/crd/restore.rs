use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::{CustomResource, ResourceExt as _};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::Phase;

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(kind = "Restore", group = "backup.manuchim.dev", version = "v1alpha1", namespaced)]
#[kube(status = "RestoreStatus", shortname = "rs", derive = "PartialEq")]
#[kube(
    printcolumn = r#"{"name":"Phase", "type":"string", "description":"Phase of Restore", "jsonPath":".status.phase"}"#
)]
#[kube(printcolumn = r#"{"name":"Backup", "type":"string", "jsonPath":".spec.backupName"}"#)]
#[kube(printcolumn = r#"{"name":"Size", "type":"string", "jsonPath":".status.restoredDataSize"}"#)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSpec {
    /// Backup to restore from, must be Completed
    pub backup_name: String,

    /// PersistentVolumeClaim the archive is extracted into
    #[serde(rename = "targetPVC")]
    pub target_pvc: String,

    /// Namespace the Backup is looked up in, defaults to the Restore's own namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_namespace: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RestoreStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restored_data_size: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl Restore {
    pub fn phase(&self) -> Phase {
        self.status.as_ref().and_then(|x| x.phase).unwrap_or_default()
    }

    /// Namespace the referenced Backup lives in.
    pub fn backup_namespace(&self) -> Option<String> {
        self.spec.target_namespace.clone().filter(|x| !x.is_empty()).or_else(|| self.namespace())
    }
}
