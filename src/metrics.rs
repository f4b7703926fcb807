use prometheus::{IntCounterVec, Opts, Registry};

use kube::Error;
use lazy_static::lazy_static;

pub const METRICS_NAMESPACE: &str = "aim_controller";

lazy_static! {
    pub static ref KUBE_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("kube_errors", "aim-controller k8s related errors").namespace(METRICS_NAMESPACE),
        &["action", "kube_name"]
    )
    .unwrap();
    pub static ref ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("errors", "aim-controller errors").namespace(METRICS_NAMESPACE),
        &["name"]
    )
    .unwrap();
    pub static ref RECONCILIATIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("reconciliations", "aim-controller reconciliation passes").namespace(METRICS_NAMESPACE),
        &["kind", "result"]
    )
    .unwrap();
}

pub fn custom_metrics(registry: &Registry) -> Result<(), prometheus::Error> {
    registry.register(Box::new(KUBE_ERRORS.clone()))?;
    registry.register(Box::new(ERRORS.clone()))?;
    registry.register(Box::new(RECONCILIATIONS.clone()))?;
    Ok(())
}

pub fn kube_error_name(err: &Error) -> &'static str {
    match err {
        Error::Api(response) if response.code == 409 => "conflict",
        Error::Api(_) => "api",
        Error::HyperError(_) => "hyper_error",
        Error::Service(_) => "service_error",
        Error::HttpError(_) => "http_error",
        Error::SerdeError(_) => "serde_error",
        Error::BuildRequest(_) => "request_build",
        Error::InferConfig(_) => "kube_config",
        Error::Discovery(_) => "discovery",
        Error::Auth(_) => "auth",
        _ => "other",
    }
}

pub fn kube_error_happened(action: &str, err: &Error) {
    KUBE_ERRORS.with_label_values(&[action, kube_error_name(err)]).inc_by(1);
}

pub fn error_happened(name: &str) {
    ERRORS.with_label_values(&[name]).inc_by(1);
}

pub fn reconciliation_happened(kind: &str, result: &str) {
    RECONCILIATIONS.with_label_values(&[kind, result]).inc_by(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::error::ErrorResponse;

    #[test]
    fn test_kube_error_name() {
        let err = |code| {
            Error::Api(ErrorResponse {
                status: "Failure".into(),
                message: "boom".into(),
                reason: "Conflict".into(),
                code,
            })
        };
        assert_eq!(kube_error_name(&err(409)), "conflict");
        assert_eq!(kube_error_name(&err(500)), "api");
    }

    #[test]
    fn test_counters_register_once() {
        let registry = Registry::new();
        custom_metrics(&registry).unwrap();
        reconciliation_happened("AIMService", "ok");
        assert!(RECONCILIATIONS.with_label_values(&["AIMService", "ok"]).get() >= 1);
        assert!(custom_metrics(&registry).is_err());
    }
}
