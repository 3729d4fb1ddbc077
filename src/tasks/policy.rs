use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use kube::{
    runtime::{controller::Action, events::EventType},
    Resource as _, ResourceExt as _,
};
use maplit::btreemap;
use snafu::OptionExt as _;
use tracing::{debug, info, warn};

use crate::{
    crd::{Backup, BackupPolicy, BackupPolicyStatus, BackupSpec, ConcurrencyPolicy},
    events::{actions, reasons},
    store::Created,
    Context, MissingObjectKeySnafu, Result, MANAGER,
};

use super::{
    backup_name, check_job_name, retention, schedule, ConditionStatus, Conditions, PartialCondition,
};

pub const POLICY_LABEL: &str = "backup.manuchim.dev/policy";

impl BackupPolicy {
    pub async fn reconcile(&self, ctx: &Context, now: DateTime<Utc>) -> Result<Action> {
        let name = self.name_any();
        let namespace = self
            .namespace()
            .with_context(|| MissingObjectKeySnafu { kind: "BackupPolicy", name: name.clone() })?;
        let status = self.status.clone().unwrap_or_default();

        debug!(name, namespace, schedule = self.spec.schedule, "Reconciling BackupPolicy");

        let schedule = match schedule::parse(&self.spec.schedule) {
            Ok(schedule) => schedule,
            Err(err) => {
                warn!(name, namespace, schedule = self.spec.schedule, %err, "Invalid schedule");
                let message = format!("Invalid cron schedule: {err}");
                self.halt(ctx, &status, now, reasons::INVALID_SCHEDULE, message).await?;
                return Ok(Action::await_change());
            }
        };

        let from = status.last_backup_time.unwrap_or(now - chrono::Duration::seconds(1));
        let Some(next_due) = schedule.next_after(from) else {
            warn!(name, namespace, %schedule, "Schedule has no future fire time");
            let message = format!("Schedule {schedule} never fires after {}", rfc3339(from));
            self.halt(ctx, &status, now, reasons::SCHEDULE_EXHAUSTED, message).await?;
            return Ok(Action::await_change());
        };

        if let Err(err) = check_job_name(&backup_name(&name, next_due)) {
            warn!(name, namespace, %err, "Policy name too long");
            let message = format!("Policy name {name} is too long for its Backups: {err}");
            self.halt(ctx, &status, now, reasons::INVALID_NAME, message).await?;
            return Ok(Action::await_change());
        }

        if now < next_due {
            let message = format!("Next backup scheduled for {}", rfc3339(next_due));
            let prev = Conditions::new(&status.conditions);
            let condition =
                PartialCondition::new(ConditionStatus::True, "Scheduled", message.clone())
                    .into_condition("Ready", self.meta().generation, &prev, now);
            let updated = BackupPolicyStatus {
                next_scheduled_backup: Some(next_due),
                conditions: vec![condition],
                ..status.clone()
            };
            if self.update_status(ctx, &status, updated).await? {
                ctx.events
                    .publish(
                        &self.object_ref(&()),
                        EventType::Normal,
                        reasons::BACKUP_SCHEDULED,
                        actions::SCHEDULE,
                        Some(message),
                    )
                    .await;
            }
            return Ok(requeue_until(next_due, now));
        }

        let (reason, outcome) = self.run_interval(ctx, &namespace, next_due).await?;

        let next = schedule.next_after(now);
        let message = match next {
            Some(next) => format!("{outcome}, next backup scheduled for {}", rfc3339(next)),
            None => format!("{outcome}, schedule has no further fire times"),
        };
        let prev = Conditions::new(&status.conditions);
        let condition = PartialCondition::new(ConditionStatus::True, reason, message)
            .into_condition("Ready", self.meta().generation, &prev, now);
        let updated = BackupPolicyStatus {
            last_backup_time: Some(now),
            next_scheduled_backup: next,
            conditions: vec![condition],
        };
        self.update_status(ctx, &status, updated).await?;

        Ok(next.map_or_else(Action::await_change, |next| requeue_until(next, now)))
    }

    /// Create (or skip) the Backup for the interval that became due at `slot`. Returns the
    /// condition reason and a summary for the status message.
    async fn run_interval(
        &self, ctx: &Context, namespace: &str, slot: DateTime<Utc>,
    ) -> Result<(&'static str, String)> {
        let name = self.name_any();
        let backup_name = backup_name(&name, slot);

        if self.spec.concurrency_policy == ConcurrencyPolicy::Forbid {
            if let Some(active) = self.unfinished_backup(ctx, namespace, &backup_name).await? {
                let message = format!(
                    "Backup {} is still {}, skipped backup {backup_name}",
                    active.name_any(),
                    active.phase()
                );
                warn!(name, namespace, active = active.name_any(), "Skipping backup interval");
                ctx.events
                    .publish(
                        &self.object_ref(&()),
                        EventType::Warning,
                        reasons::BACKUP_SKIPPED,
                        actions::SCHEDULE,
                        Some(message.clone()),
                    )
                    .await;
                return Ok((reasons::BACKUP_SKIPPED, message));
            }
        }

        match ctx.backups.create(namespace, &self.backup_for(namespace, &backup_name)).await? {
            Created::New(_) => {
                info!(name, namespace, backup = backup_name, %slot, "Created scheduled Backup");
                ctx.metrics.backups_created.inc();
                ctx.events
                    .publish(
                        &self.object_ref(&()),
                        EventType::Normal,
                        reasons::BACKUP_CREATED,
                        actions::CREATE,
                        Some(format!("Created backup {backup_name}")),
                    )
                    .await;
            }
            Created::AlreadyExists => {
                debug!(name, namespace, backup = backup_name, "Backup for interval already exists")
            }
        }

        if let Err(err) = retention::cleanup(self, ctx).await {
            warn!(name, namespace, %err, "Failed to clean up old backups");
        }

        Ok((reasons::BACKUP_CREATED, format!("Backup {backup_name} created")))
    }

    fn backup_for(&self, namespace: &str, backup_name: &str) -> Backup {
        let mut backup = Backup::new(
            backup_name,
            BackupSpec { policy_ref: self.name_any(), target: self.spec.target.clone() },
        );
        backup.metadata.namespace = Some(namespace.to_string());
        backup.metadata.labels = Some(btreemap! {
            "app.kubernetes.io/created-by".to_string() => MANAGER.to_string(),
            POLICY_LABEL.to_string() => self.name_any(),
        });
        backup.metadata.owner_references = self.controller_owner_ref(&()).map(|x| vec![x]);
        backup
    }

    /// An earlier Backup of this policy that hasn't reached a terminal phase. The Backup for
    /// the current interval doesn't count, it may have been created by an interrupted pass.
    async fn unfinished_backup(
        &self, ctx: &Context, namespace: &str, current: &str,
    ) -> Result<Option<Backup>> {
        let name = self.name_any();
        Ok(ctx.backups.list(namespace, None).await?.into_iter().find(|x| {
            x.spec.policy_ref == name && x.name_any() != current && !x.phase().is_terminal()
        }))
    }

    /// Record a policy that can't be acted on. No timed retry; a spec change re-triggers.
    async fn halt(
        &self, ctx: &Context, status: &BackupPolicyStatus, now: DateTime<Utc>,
        reason: &'static str, message: String,
    ) -> Result<()> {
        let prev = Conditions::new(&status.conditions);
        let condition = PartialCondition::new(ConditionStatus::False, reason, message.clone())
            .into_condition("Ready", self.meta().generation, &prev, now);
        let updated = BackupPolicyStatus {
            next_scheduled_backup: None,
            conditions: vec![condition],
            ..status.clone()
        };
        if self.update_status(ctx, status, updated).await? {
            let obj_ref = self.object_ref(&());
            ctx.events
                .publish(&obj_ref, EventType::Warning, reason, actions::SCHEDULE, Some(message))
                .await;
        }
        Ok(())
    }

    /// Persist `updated` unless it matches what's stored. Returns whether a write happened.
    async fn update_status(
        &self, ctx: &Context, current: &BackupPolicyStatus, updated: BackupPolicyStatus,
    ) -> Result<bool> {
        if self.status.is_some() && *current == updated {
            return Ok(false);
        }

        let mut policy = self.clone();
        policy.status = Some(updated);
        ctx.policies.replace_status(&policy).await?;
        Ok(true)
    }
}

fn requeue_until(at: DateTime<Utc>, now: DateTime<Utc>) -> Action {
    Action::requeue((at - now).to_std().unwrap_or(Duration::ZERO))
}

fn rfc3339(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}
