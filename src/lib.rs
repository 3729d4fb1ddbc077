use std::{future, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures::StreamExt as _;
use k8s_openapi::api::{batch::v1::Job, core::v1::Pod};
use kube::{
    api::ListParams,
    runtime::{controller::Action, watcher, Controller},
    Api, Client, Resource, ResourceExt as _,
};
use serde::Serialize;
use snafu::ResultExt as _;
use tokio::sync::RwLock;
use tracing::{error, info, instrument, warn};

pub mod config;
pub mod crd;
pub mod error;
pub mod events;
pub mod metrics;
pub mod store;
pub mod tasks;
pub mod telemetry;

use config::AppConfig;
use crd::{Backup, BackupPolicy, Restore};
pub use error::*;
use events::{EventPublisher, KubeEventPublisher};
use metrics::Metrics;
use store::{KubeStore, ObjectStore};

pub const MANAGER: &str = "backup-operator";

/// State shared between the controllers and anything reporting on them
#[derive(Clone, Default)]
pub struct State {
    /// Diagnostics populated by the reconcilers
    diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    registry: prometheus::Registry,
    /// Application configuration
    config: AppConfig,
}

impl State {
    pub fn new(config: AppConfig) -> Self {
        Self { config, ..Default::default() }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    /// Controller Context backed by the API server
    pub fn to_context(&self, client: Client) -> Result<Arc<Context>> {
        let metrics = Metrics::new(&self.registry).context(MetricsSnafu)?;
        let mut ctx = Context::new(
            Arc::new(KubeStore::<BackupPolicy>::new(client.clone())),
            Arc::new(KubeStore::<Backup>::new(client.clone())),
            Arc::new(KubeStore::<Restore>::new(client.clone())),
            Arc::new(KubeStore::<Job>::new(client.clone())),
            Arc::new(KubeStore::<Pod>::new(client.clone())),
            Arc::new(KubeEventPublisher::new(client, &format!("{MANAGER}-controller"))),
            metrics,
            self.config.clone(),
        );
        ctx.diagnostics = self.diagnostics.clone();
        Ok(Arc::new(ctx))
    }
}

/// Everything a reconciler reads from or writes to
#[derive(Clone)]
pub struct Context {
    pub policies: Arc<dyn ObjectStore<BackupPolicy>>,
    pub backups: Arc<dyn ObjectStore<Backup>>,
    pub restores: Arc<dyn ObjectStore<Restore>>,
    pub jobs: Arc<dyn ObjectStore<Job>>,
    pub pods: Arc<dyn ObjectStore<Pod>>,
    pub events: Arc<dyn EventPublisher>,
    /// Prometheus metrics
    pub metrics: Metrics,
    /// Application configuration
    pub config: AppConfig,
    /// Diagnostics read by whoever holds the State
    pub diagnostics: Arc<RwLock<Diagnostics>>,
}

impl Context {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        policies: Arc<dyn ObjectStore<BackupPolicy>>, backups: Arc<dyn ObjectStore<Backup>>,
        restores: Arc<dyn ObjectStore<Restore>>, jobs: Arc<dyn ObjectStore<Job>>,
        pods: Arc<dyn ObjectStore<Pod>>, events: Arc<dyn EventPublisher>, metrics: Metrics,
        config: AppConfig,
    ) -> Self {
        Self {
            policies,
            backups,
            restores,
            jobs,
            pods,
            events,
            metrics,
            config,
            diagnostics: Default::default(),
        }
    }
}

/// Diagnostics of the last reconciliation
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    pub last_kind: Option<String>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self { last_event: Utc::now(), last_kind: None }
    }
}

async fn record<K: Resource<DynamicType = ()>>(ctx: &Context) {
    let mut diagnostics = ctx.diagnostics.write().await;
    diagnostics.last_event = Utc::now();
    diagnostics.last_kind = Some(K::kind(&()).to_string());
}

#[instrument(skip(ctx, policy), fields(name = policy.name_any(), namespace = policy.namespace()))]
async fn reconcile_policy(policy: Arc<BackupPolicy>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = ctx.metrics.count_and_measure("BackupPolicy");
    record::<BackupPolicy>(&ctx).await;
    policy.reconcile(&ctx, Utc::now()).await
}

#[instrument(skip(ctx, backup), fields(name = backup.name_any(), namespace = backup.namespace()))]
async fn reconcile_backup(backup: Arc<Backup>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = ctx.metrics.count_and_measure("Backup");
    record::<Backup>(&ctx).await;
    tasks::lifecycle::drive(backup.as_ref(), &ctx, Utc::now()).await
}

#[instrument(skip(ctx, restore), fields(name = restore.name_any(), namespace = restore.namespace()))]
async fn reconcile_restore(restore: Arc<Restore>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = ctx.metrics.count_and_measure("Restore");
    record::<Restore>(&ctx).await;
    tasks::lifecycle::drive(restore.as_ref(), &ctx, Utc::now()).await
}

/// Conflicts are retried promptly from fresh state, anything else after the configured delay.
pub fn error_policy<K: Resource<DynamicType = ()>>(
    obj: Arc<K>, error: &AppError, ctx: Arc<Context>,
) -> Action {
    ctx.metrics.reconcile_failure(obj.as_ref(), error);
    if error.is_conflict() {
        info!(name = obj.meta().name, "Status write conflicted, retrying");
        return Action::requeue(Duration::from_secs(1));
    }
    warn!(name = obj.meta().name, %error, "reconcile failed");
    Action::requeue(ctx.config.error_requeue())
}

async fn crd_installed<K>(client: &Client) -> bool
where
    K: Resource<DynamicType = ()> + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    let api = Api::<K>::all(client.clone());
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!("{} CRD is not queryable; {e:?}. Is the CRD installed?", K::kind(&()));
        return false;
    }
    true
}

/// Initialize the controllers and shared state (given the crds are installed)
pub async fn run(state: State) -> Result<()> {
    let client = Client::try_default().await.context(KubeSnafu { msg: "Failed to create client" })?;

    if !(crd_installed::<BackupPolicy>(&client).await
        && crd_installed::<Backup>(&client).await
        && crd_installed::<Restore>(&client).await)
    {
        info!("Installation: cargo run --bin crdgen | kubectl apply -f -");
        snafu::whatever!("Required CRDs are not installed");
    }

    let ctx = state.to_context(client.clone())?;
    let wc = watcher::Config::default().any_semantic();

    let policies = Controller::new(Api::<BackupPolicy>::all(client.clone()), wc.clone())
        .owns(Api::<Backup>::all(client.clone()), wc.clone())
        .shutdown_on_signal()
        .run(reconcile_policy, error_policy, ctx.clone())
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| future::ready(()));

    let backups = Controller::new(Api::<Backup>::all(client.clone()), wc.clone())
        .owns(Api::<Job>::all(client.clone()), wc.clone())
        .shutdown_on_signal()
        .run(reconcile_backup, error_policy, ctx.clone())
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| future::ready(()));

    let restores = Controller::new(Api::<Restore>::all(client.clone()), wc.clone())
        .owns(Api::<Job>::all(client), wc)
        .shutdown_on_signal()
        .run(reconcile_restore, error_policy, ctx)
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| future::ready(()));

    tokio::join!(policies, backups, restores);
    Ok(())
}
