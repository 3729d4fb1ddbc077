use tracing_subscriber::{prelude::*, EnvFilter, Registry};

/// Install the global tracing subscriber. Safe to call more than once; later calls are ignored.
///
/// Filtering comes from `RUST_LOG` (default `info,kube=warn`). Set `LOG_FORMAT=json` for
/// structured output.
pub async fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,kube=warn"));

    let json = std::env::var("LOG_FORMAT").is_ok_and(|x| x.eq_ignore_ascii_case("json"));
    let result = if json {
        Registry::default()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init()
    } else {
        Registry::default().with(filter).with(tracing_subscriber::fmt::layer().compact()).try_init()
    };

    if let Err(err) = result {
        tracing::debug!(%err, "Tracing subscriber already installed");
    }
}
