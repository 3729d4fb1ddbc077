use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
pub struct AppConfig {
    /// PersistentVolumeClaim holding every backup archive. Mounted read-write by backup Jobs and
    /// read-only by restore Jobs.
    #[serde(default = "default_storage_pvc")]
    pub storage_pvc: String,

    /// Image running the tar/untar data mover.
    #[serde(default = "default_worker_image")]
    pub worker_image: String,

    pub worker_service_account_name: Option<String>,

    /// How often a Running Backup/Restore checks on its Job.
    #[serde(default = "default_job_poll_interval_secs")]
    pub job_poll_interval_secs: u64,

    #[serde(default = "default_error_requeue_secs")]
    pub error_requeue_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage_pvc: default_storage_pvc(),
            worker_image: default_worker_image(),
            worker_service_account_name: None,
            job_poll_interval_secs: default_job_poll_interval_secs(),
            error_requeue_secs: default_error_requeue_secs(),
        }
    }
}

impl AppConfig {
    pub fn job_poll_interval(&self) -> Duration {
        Duration::from_secs(self.job_poll_interval_secs)
    }

    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_secs)
    }
}

fn default_storage_pvc() -> String {
    "backup-storage".to_string()
}

fn default_worker_image() -> String {
    "busybox:latest".to_string()
}

fn default_job_poll_interval_secs() -> u64 {
    10
}

fn default_error_requeue_secs() -> u64 {
    30
}
