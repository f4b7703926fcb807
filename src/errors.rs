use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Key '{0}' is empty")]
    MissingKey(&'static str),

    #[error("Kube API Error: {0}")]
    KubeError(#[source] kube::Error),

    #[error("Serialization Error: {0}")]
    SerdeError(#[source] serde_json::Error),

    #[error("Registry Error: {0}")]
    RegistryError(String),

    #[error("Refusing to delete append-only {0}")]
    AppendOnlyDeletion(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Kube API responded with 404 for the requested object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::KubeError(kube::Error::Api(response)) if response.code == 404)
    }

    /// Short stable label used for the error counters.
    pub fn metric_name(&self) -> &'static str {
        match self {
            Error::MissingKey(_) => "missing_key",
            Error::KubeError(_) => "kube",
            Error::SerdeError(_) => "serde",
            Error::RegistryError(_) => "registry",
            Error::AppendOnlyDeletion(_) => "append_only_deletion",
            Error::Cancelled => "cancelled",
            Error::Config(_) => "config",
        }
    }
}

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        Error::KubeError(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerdeError(err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::RegistryError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::error::ErrorResponse;

    fn api_error(code: u16) -> Error {
        Error::KubeError(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "Whatever".to_string(),
            code,
        }))
    }

    #[test]
    fn test_is_not_found() {
        assert!(api_error(404).is_not_found());
        assert!(!api_error(500).is_not_found());
        assert!(!api_error(409).is_not_found());
        assert!(!Error::MissingKey(".metadata.name").is_not_found());
    }
}
