#![allow(dead_code)]

use backup_operator::{
    config::AppConfig,
    crd::{Backup, BackupPolicy, Phase, Restore, API_VERSION},
    store::memory::MemoryCluster,
    Context,
};
use chrono::{DateTime, TimeZone as _, Utc};
use k8s_openapi::api::{batch::v1::Job, core::v1::Pod};
use serde_json::json;
use test_context::AsyncTestContext;

pub const NS: &str = "apps";

pub fn at(day: u32, hour: u32, min: u32, sec: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, day, hour, min, sec).unwrap()
}

/// A cluster held in memory, with a reconciler Context over it.
pub struct TestCluster {
    pub cluster: MemoryCluster,
    pub ctx: Context,
}

impl TestCluster {
    pub fn with_config(&mut self, config: AppConfig) {
        self.ctx = self.cluster.context(config).unwrap();
    }

    pub fn add_policy(&self, name: &str, spec: serde_json::Value) -> BackupPolicy {
        self.cluster.policies.insert(
            serde_json::from_value(json!({
                "apiVersion": API_VERSION,
                "kind": "BackupPolicy",
                "metadata": { "name": name, "namespace": NS },
                "spec": spec,
            }))
            .unwrap(),
        )
    }

    pub fn policy(&self, name: &str) -> BackupPolicy {
        self.cluster.policies.find(NS, name).unwrap()
    }

    /// Seed a Backup of `policy`. `phase: None` leaves the status empty.
    pub fn add_backup(
        &self, namespace: &str, name: &str, policy: &str, phase: Option<Phase>,
        created: DateTime<Utc>,
    ) -> Backup {
        let status = phase.map(|x| json!({ "phase": x }));
        self.cluster.backups.insert(
            serde_json::from_value(json!({
                "apiVersion": API_VERSION,
                "kind": "Backup",
                "metadata": {
                    "name": name,
                    "namespace": namespace,
                    "creationTimestamp": created,
                },
                "spec": {
                    "policyRef": policy,
                    "target": { "pvcName": "postgres-data" },
                },
                "status": status,
            }))
            .unwrap(),
        )
    }

    pub fn backup(&self, name: &str) -> Backup {
        self.cluster.backups.find(NS, name).unwrap()
    }

    pub fn backup_names(&self) -> Vec<String> {
        self.cluster.backups.all().into_iter().filter_map(|x| x.metadata.name).collect()
    }

    pub fn add_restore(&self, name: &str, spec: serde_json::Value) -> Restore {
        self.cluster.restores.insert(
            serde_json::from_value(json!({
                "apiVersion": API_VERSION,
                "kind": "Restore",
                "metadata": { "name": name, "namespace": NS },
                "spec": spec,
            }))
            .unwrap(),
        )
    }

    pub fn restore(&self, name: &str) -> Restore {
        self.cluster.restores.find(NS, name).unwrap()
    }

    pub fn job(&self, name: &str) -> Option<Job> {
        self.cluster.jobs.find(NS, name)
    }

    /// Report Job progress the way the Job controller would.
    pub fn finish_job(&self, name: &str, succeeded: i32, failed: i32) {
        self.cluster
            .jobs
            .modify(NS, name, |job| {
                job.status = Some(
                    serde_json::from_value(json!({ "succeeded": succeeded, "failed": failed }))
                        .unwrap(),
                );
            })
            .unwrap();
    }

    /// Seed a finished pod of `job` whose restore container reported `message`.
    pub fn add_job_pod(&self, job: &str, pod: &str, created: DateTime<Utc>, message: &str) -> Pod {
        self.cluster.pods.insert(
            serde_json::from_value(json!({
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": {
                    "name": pod,
                    "namespace": NS,
                    "creationTimestamp": created,
                    "labels": { "job-name": job },
                },
                "status": {
                    "containerStatuses": [{
                        "name": "restore",
                        "image": "busybox:latest",
                        "imageID": "",
                        "ready": false,
                        "restartCount": 0,
                        "state": { "terminated": { "exitCode": 0, "message": message } },
                    }],
                },
            }))
            .unwrap(),
        )
    }

    pub fn reasons(&self) -> Vec<String> {
        self.cluster.events.events().into_iter().map(|x| x.reason).collect()
    }
}

#[async_trait::async_trait]
impl AsyncTestContext for TestCluster {
    async fn setup() -> Self {
        backup_operator::telemetry::init().await;

        let cluster = MemoryCluster::new();
        let ctx = cluster.context(AppConfig::default()).unwrap();
        TestCluster { cluster, ctx }
    }
}
