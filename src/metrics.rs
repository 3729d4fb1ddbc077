use kube::ResourceExt as _;
use prometheus::{
    histogram_opts, opts, HistogramTimer, HistogramVec, IntCounter, IntCounterVec, Registry,
};

use crate::{crd::Phase, AppError};

#[derive(Clone)]
pub struct Metrics {
    pub reconciliations: IntCounterVec,
    pub failures: IntCounterVec,
    pub reconcile_duration: HistogramVec,
    pub backups_created: IntCounter,
    pub backups_pruned: IntCounter,
    pub phase_transitions: IntCounterVec,
}

impl Metrics {
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let reconcile_duration = HistogramVec::new(
            histogram_opts!(
                "backup_operator_reconcile_duration_seconds",
                "The duration of reconcile to complete in seconds"
            )
            .buckets(vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.]),
            &["kind"],
        )?;
        let reconciliations = IntCounterVec::new(
            opts!("backup_operator_reconciliations_total", "reconciliations"),
            &["kind"],
        )?;
        let failures = IntCounterVec::new(
            opts!("backup_operator_reconciliation_errors_total", "reconciliation errors"),
            &["kind", "instance", "error"],
        )?;
        let backups_created = IntCounter::new(
            "backup_operator_backups_created_total",
            "Backups created by BackupPolicies",
        )?;
        let backups_pruned = IntCounter::new(
            "backup_operator_backups_pruned_total",
            "Completed Backups deleted by retention",
        )?;
        let phase_transitions = IntCounterVec::new(
            opts!("backup_operator_phase_transitions_total", "Backup and Restore phase changes"),
            &["kind", "phase"],
        )?;

        registry.register(Box::new(reconcile_duration.clone()))?;
        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(failures.clone()))?;
        registry.register(Box::new(backups_created.clone()))?;
        registry.register(Box::new(backups_pruned.clone()))?;
        registry.register(Box::new(phase_transitions.clone()))?;

        Ok(Self {
            reconciliations,
            failures,
            reconcile_duration,
            backups_created,
            backups_pruned,
            phase_transitions,
        })
    }

    pub fn reconcile_failure<K: kube::Resource<DynamicType = ()>>(&self, obj: &K, e: &AppError) {
        let kind = K::kind(&());
        self.failures
            .with_label_values(&[kind.as_ref(), obj.name_any().as_ref(), e.metric_label().as_ref()])
            .inc()
    }

    pub fn phase_transition(&self, kind: &str, phase: Phase) {
        self.phase_transitions.with_label_values(&[kind, phase.as_str()]).inc()
    }

    pub fn count_and_measure(&self, kind: &str) -> ReconcileMeasurer {
        self.reconciliations.with_label_values(&[kind]).inc();
        let timer = self.reconcile_duration.with_label_values(&[kind]).start_timer();
        ReconcileMeasurer { timer: Some(timer) }
    }
}

/// Records the reconcile duration when dropped.
pub struct ReconcileMeasurer {
    timer: Option<HistogramTimer>,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.observe_duration();
        }
    }
}
