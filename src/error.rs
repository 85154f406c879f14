//! Error types for the KubeEdge apps controllers

use thiserror::Error;

use crate::overrides::OverrideError;

/// Result alias used throughout the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// A manifest entry could not be decoded into an object
    #[error("failed to decode manifest at ordinal {ordinal}: {message}")]
    ParseError { ordinal: usize, message: String },

    #[error("override failed: {0}")]
    OverrideError(#[from] OverrideError),

    #[error("configuration error: {0}")]
    ConfigError(String),

    /// The status manager could not accept a watch or cancel request
    #[error("status manager queue error: {0}")]
    QueueError(String),

    #[error("ownership conflict: {0}")]
    OwnershipConflict(String),

    #[error("{}", join_errors(.0))]
    Aggregate(Vec<Error>),
}

fn join_errors(errors: &[Error]) -> String {
    let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
    format!("[{}]", messages.join(", "))
}

impl Error {
    /// Collapse a list of errors into a single result.
    ///
    /// An empty list is success and a single error is returned as-is.
    pub fn aggregate(mut errors: Vec<Error>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Aggregate(errors)),
        }
    }

    /// Returns true when the error is an API 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::KubeError(kube::Error::Api(e)) if e.code == 404)
    }

    /// Whether a reconcile failing with this error should retry quickly
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::KubeError(kube::Error::Api(e)) => {
                !(400..500).contains(&e.code) || e.code == 409 || e.code == 429
            }
            Error::KubeError(_) => true,
            Error::QueueError(_) => true,
            Error::Aggregate(errors) => errors.iter().any(Error::is_retriable),
            _ => false,
        }
    }

    /// Short label used for the error metric
    pub fn metric_kind(&self) -> &'static str {
        match self {
            Error::KubeError(_) => "kube",
            Error::SerializationError(_) | Error::YamlError(_) => "serialization",
            Error::ParseError { .. } => "parse",
            Error::OverrideError(_) => "override",
            Error::ConfigError(_) => "config",
            Error::QueueError(_) => "queue",
            Error::OwnershipConflict(_) => "ownership",
            Error::Aggregate(_) => "aggregate",
        }
    }
}
