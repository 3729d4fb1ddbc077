//! Phase machine shared by Backups and Restores.
//!
//! ```text
//! Pending ──admit──► Running ──job succeeded──► Completed
//!    │                  └─────job failed──────► Failed
//!    └──denied───────────────────────────────► Failed
//! ```
//!
//! Each pass reads the object's phase and its Job, takes at most one step per phase and persists
//! the result before returning. Terminal phases are never left.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::{api::batch::v1::Job, apimachinery::pkg::apis::meta::v1::Condition};
use kube::{
    runtime::{controller::Action, events::EventType},
    Resource, ResourceExt as _,
};
use snafu::OptionExt as _;
use tracing::{debug, info, warn};

use crate::{
    crd::Phase,
    events::{actions, reasons},
    store::{Created, ObjectStore},
    Context, MissingObjectKeySnafu, Result,
};

use super::{check_job_name, job_name, ConditionStatus, Conditions, PartialCondition};

pub enum Admission {
    Granted,
    Denied { reason: &'static str, message: String },
}

/// Status fields every phase change writes.
pub struct Transition {
    pub phase: Phase,
    /// Left untouched when `None`
    pub start_time: Option<DateTime<Utc>>,
    /// Left untouched when `None`
    pub completion_time: Option<DateTime<Utc>>,
    pub condition: Condition,
}

/// A resource whose work is carried out by a single Job.
#[async_trait]
pub trait Executable: Resource<DynamicType = ()> + Clone + Send + Sync + 'static {
    const STARTED: &'static str;
    const COMPLETED: &'static str;
    const FAILED: &'static str;

    fn store(ctx: &Context) -> &dyn ObjectStore<Self>;

    fn phase(&self) -> Phase;

    fn conditions(&self) -> &[Condition];

    /// Replace the status fields named by `transition`, keeping kind-specific fields.
    fn apply(&mut self, transition: Transition);

    /// Checked once, before leaving Pending.
    async fn admit(&self, _ctx: &Context) -> Result<Admission> {
        Ok(Admission::Granted)
    }

    fn build_job(&self, ctx: &Context) -> Result<Job>;

    /// Fill in kind-specific status after the Job succeeded.
    async fn record_success(&mut self, ctx: &Context, job: &Job) -> Result<()>;

    fn started_message(&self) -> String;

    fn completed_message(&self) -> String;

    fn failed_message(&self) -> String;
}

pub async fn drive<K: Executable>(owner: &K, ctx: &Context, now: DateTime<Utc>) -> Result<Action> {
    let kind = K::kind(&()).to_string();
    let name = owner.name_any();
    let namespace = owner
        .namespace()
        .with_context(|| MissingObjectKeySnafu { kind: kind.clone(), name: name.clone() })?;
    let store = K::store(ctx);
    let obj_ref = owner.object_ref(&());

    let phase = owner.phase();
    if phase.is_terminal() {
        debug!(name, namespace, %phase, "{kind} already finished");
        return Ok(Action::await_change());
    }

    let mut current = owner.clone();
    if phase == Phase::Pending {
        let admission = match check_job_name(&name) {
            Ok(()) => current.admit(ctx).await?,
            Err(message) => Admission::Denied { reason: reasons::INVALID_NAME, message },
        };
        if let Admission::Denied { reason, message } = admission {
            warn!(name, namespace, reason, message, "{kind} rejected");
            let condition = PartialCondition::new(ConditionStatus::False, reason, message.clone())
                .into_condition(
                    "Ready",
                    current.meta().generation,
                    &Conditions::new(current.conditions()),
                    now,
                );
            current.apply(Transition {
                phase: Phase::Failed,
                start_time: Some(now),
                completion_time: Some(now),
                condition,
            });
            store.replace_status(&current).await?;
            ctx.metrics.phase_transition(&kind, Phase::Failed);
            ctx.events
                .publish(&obj_ref, EventType::Warning, reason, actions::VALIDATE, Some(message))
                .await;
            return Ok(Action::await_change());
        }

        let message = current.started_message();
        let condition = PartialCondition::new(ConditionStatus::True, K::STARTED, message.clone())
            .into_condition(
                "Progressing",
                current.meta().generation,
                &Conditions::new(current.conditions()),
                now,
            );
        current.apply(Transition {
            phase: Phase::Running,
            start_time: Some(now),
            completion_time: None,
            condition,
        });
        current = store.replace_status(&current).await?;
        info!(name, namespace, "{kind} started");
        ctx.metrics.phase_transition(&kind, Phase::Running);
        ctx.events
            .publish(&obj_ref, EventType::Normal, K::STARTED, actions::START, Some(message))
            .await;
    }

    let job_name = job_name(&name);
    let Some(job) = ctx.jobs.get(&namespace, &job_name).await? else {
        match ctx.jobs.create(&namespace, &current.build_job(ctx)?).await? {
            Created::New(_) => {
                info!(name, namespace, job_name, "Created Job for {kind}");
                ctx.events
                    .publish(
                        &obj_ref,
                        EventType::Normal,
                        reasons::JOB_CREATED,
                        actions::CREATE,
                        Some(format!("Created Job {job_name}")),
                    )
                    .await;
            }
            Created::AlreadyExists => debug!(name, namespace, job_name, "Job already exists"),
        }
        return Ok(Action::requeue(ctx.config.job_poll_interval()));
    };

    let (succeeded, failed) =
        job.status.as_ref().map_or((0, 0), |x| (x.succeeded.unwrap_or(0), x.failed.unwrap_or(0)));

    let (phase, status, reason, message, event_type) = if succeeded > 0 {
        current.record_success(ctx, &job).await?;
        let message = current.completed_message();
        (Phase::Completed, ConditionStatus::True, K::COMPLETED, message, EventType::Normal)
    } else if failed > 0 {
        let message = current.failed_message();
        (Phase::Failed, ConditionStatus::False, K::FAILED, message, EventType::Warning)
    } else {
        debug!(name, namespace, job_name, "Job still running");
        return Ok(Action::requeue(ctx.config.job_poll_interval()));
    };

    let condition = PartialCondition::new(status, reason, message.clone()).into_condition(
        "Ready",
        current.meta().generation,
        &Conditions::new(current.conditions()),
        now,
    );
    current.apply(Transition { phase, start_time: None, completion_time: Some(now), condition });
    store.replace_status(&current).await?;

    info!(name, namespace, %phase, "{kind} finished");
    ctx.metrics.phase_transition(&kind, phase);
    ctx.events.publish(&obj_ref, event_type, reason, actions::FINISH, Some(message)).await;
    Ok(Action::await_change())
}
