#[derive(snafu::Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum AppError {
    #[snafu(display("SerializationError: {source}"))]
    SerializationError { source: serde_json::Error },

    #[snafu(display("Kube Error: {msg}: {source}"))]
    KubeError { msg: String, source: kube::Error },

    #[snafu(display("{kind} {name} is missing a namespace"))]
    MissingObjectKey { kind: String, name: String },

    #[snafu(display("Conflict writing {kind} {namespace}/{name}: object was modified"))]
    Conflict { kind: String, namespace: String, name: String },

    #[snafu(display("{kind} {namespace}/{name} not found"))]
    NotFound { kind: String, namespace: String, name: String },

    #[snafu(display("Unable to load configuration: {source}"))]
    ConfigError { source: config::ConfigError },

    #[snafu(display("Unable to register metrics: {source}"))]
    MetricsError { source: prometheus::Error },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error + Send + Sync>, Some)))]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        backtrace: snafu::Backtrace,
    },
}

impl AppError {
    pub fn metric_label(&self) -> String {
        let label = match self {
            Self::SerializationError { .. } => "serialization",
            Self::KubeError { .. } => "kube",
            Self::MissingObjectKey { .. } => "missing_object_key",
            Self::Conflict { .. } => "conflict",
            Self::NotFound { .. } => "not_found",
            Self::ConfigError { .. } => "config",
            Self::MetricsError { .. } => "metrics",
            Self::Whatever { .. } => "other",
        };
        label.to_string()
    }

    /// Optimistic-concurrency failure; the framework should retry promptly from fresh state.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Conflict { .. } => true,
            Self::KubeError { source: kube::Error::Api(resp), .. } => resp.code == 409,
            _ => false,
        }
    }
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_is_detected_for_memory_and_api_errors() {
        let memory = AppError::Conflict {
            kind: "Backup".into(),
            namespace: "default".into(),
            name: "nightly".into(),
        };
        assert!(memory.is_conflict());
        assert_eq!(memory.metric_label(), "conflict");

        let api = AppError::KubeError {
            msg: "Failed to update Backup status".into(),
            source: kube::Error::Api(kube::core::ErrorResponse {
                status: "Failure".into(),
                message: "the object has been modified".into(),
                reason: "Conflict".into(),
                code: 409,
            }),
        };
        assert!(api.is_conflict());

        let missing = AppError::NotFound {
            kind: "Backup".into(),
            namespace: "default".into(),
            name: "nightly".into(),
        };
        assert!(!missing.is_conflict());
    }
}
