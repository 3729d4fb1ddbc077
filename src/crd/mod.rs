pub mod backup;
pub mod policy;
pub mod restore;

use std::fmt::Display;

pub use backup::*;
use k8s_openapi::List;
pub use policy::*;
pub use restore::*;

use kube::CustomResourceExt as _;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const API_GROUP: &str = "backup.manuchim.dev";
pub const API_VERSION: &str = "backup.manuchim.dev/v1alpha1";

pub fn generate_crds() -> Result<String, serde_yaml::Error> {
    serde_yaml::to_string(&List {
        items: vec![BackupPolicy::crd(), Backup::crd(), Restore::crd()],
        ..Default::default()
    })
}

/// Volume a Backup reads from.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupTarget {
    /// Name of the PersistentVolumeClaim to back up
    pub pvc_name: String,

    /// Namespace of the PersistentVolumeClaim, defaults to the namespace of the owning resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl Display for BackupTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref ns) = self.namespace {
            write!(f, "{}/", ns)?;
        }
        write!(f, "{}", self.pvc_name)?;
        Ok(())
    }
}

/// Coarse lifecycle of a Backup or Restore. A missing phase is read as `Pending`.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum Phase {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Pending => "Pending",
            Phase::Running => "Running",
            Phase::Completed => "Completed",
            Phase::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
