//! Kubernetes Events emitted by the reconcilers.
//!
//! Events are informational: a failed publish is logged and never fails a reconciliation.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::{
    runtime::events::{Event, EventType, Recorder, Reporter},
    Client,
};
use tracing::warn;

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self, resource_ref: &ObjectReference, type_: EventType, reason: &str, action: &str,
        note: Option<String>,
    );
}

/// Publishes through `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter { controller: controller_name.to_string(), instance: None };
        Self { recorder: Recorder::new(client, reporter) }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self, resource_ref: &ObjectReference, type_: EventType, reason: &str, action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(err) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, ?err, "Failed to publish event");
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecordedEvent {
    pub kind: Option<String>,
    pub name: Option<String>,
    pub type_: EventType,
    pub reason: String,
    pub action: String,
    pub note: Option<String>,
}

/// Keeps every published event in memory.
#[derive(Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEventPublisher {
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn with_reason(&self, reason: &str) -> Vec<RecordedEvent> {
        self.events().into_iter().filter(|x| x.reason == reason).collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(
        &self, resource_ref: &ObjectReference, type_: EventType, reason: &str, action: &str,
        note: Option<String>,
    ) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(RecordedEvent {
            kind: resource_ref.kind.clone(),
            name: resource_ref.name.clone(),
            type_,
            reason: reason.to_string(),
            action: action.to_string(),
            note,
        });
    }
}

/// Values of the REASON column in `kubectl get events`.
pub mod reasons {
    pub const BACKUP_SCHEDULED: &str = "BackupScheduled";
    pub const INVALID_SCHEDULE: &str = "InvalidSchedule";
    pub const SCHEDULE_EXHAUSTED: &str = "ScheduleExhausted";
    pub const BACKUP_CREATED: &str = "BackupCreated";
    pub const BACKUP_SKIPPED: &str = "BackupSkipped";
    pub const CLEANUP_TRIGGERED: &str = "CleanupTriggered";
    pub const JOB_CREATED: &str = "JobCreated";
    pub const INVALID_NAME: &str = "InvalidName";

    pub const BACKUP_STARTED: &str = "BackupStarted";
    pub const BACKUP_COMPLETED: &str = "BackupCompleted";
    pub const BACKUP_FAILED: &str = "BackupFailed";

    pub const RESTORE_STARTED: &str = "RestoreStarted";
    pub const RESTORE_COMPLETED: &str = "RestoreCompleted";
    pub const RESTORE_FAILED: &str = "RestoreFailed";
    pub const BACKUP_NOT_FOUND: &str = "BackupNotFound";
    pub const BACKUP_NOT_READY: &str = "BackupNotReady";
}

/// Values of the ACTION column in `kubectl get events`.
pub mod actions {
    pub const SCHEDULE: &str = "Schedule";
    pub const CREATE: &str = "Create";
    pub const PRUNE: &str = "Prune";
    pub const START: &str = "Start";
    pub const FINISH: &str = "Finish";
    pub const VALIDATE: &str = "Validate";
}
