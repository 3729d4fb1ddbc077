use std::env;

use backup_operator::{config::AppConfig, ConfigSnafu, State, MANAGER};
use snafu::ResultExt as _;

#[tokio::main]
async fn main() -> backup_operator::Result<()> {
    backup_operator::telemetry::init().await;

    // Initialize Kubernetes controller state
    let config_source = config::Config::builder()
        .add_source(
            config::File::with_name(env::var("APP_CONFIG").as_deref().unwrap_or(MANAGER))
                .required(false),
        )
        .add_source(config::Environment::with_prefix("APP"))
        .build()
        .context(ConfigSnafu)?;

    let settings = config_source.try_deserialize::<AppConfig>().context(ConfigSnafu)?;
    tracing::info!(?settings, "Starting {MANAGER}");

    let state = State::new(settings);
    backup_operator::run(state).await
}
