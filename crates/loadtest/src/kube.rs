//! `kubectl` queries for the service under test.

use serde_json::Value;
use snafu::ResultExt;

use crate::error::{JsonSnafu, LoadTestError, Result};

/// The Kubernetes CLI.
pub const KUBECTL: &str = "kubectl";

/// Arguments for reading a service as JSON.
#[must_use]
pub fn get_service_args(service: &str) -> Vec<String> {
    ["get", "services", service, "-o", "json"].map(String::from).to_vec()
}

/// Arguments for reading a deployment as JSON.
#[must_use]
pub fn get_deployment_args(deployment: &str) -> Vec<String> {
    ["get", "deployments", deployment, "-o", "json"].map(String::from).to_vec()
}

/// Arguments for scaling a deployment.
#[must_use]
pub fn scale_args(deployment: &str, replicas: u32) -> Vec<String> {
    vec![
        "scale".to_string(),
        "deployments".to_string(),
        deployment.to_string(),
        "--replicas".to_string(),
        replicas.to_string(),
    ]
}

fn decode(output: &str) -> Result<Value> {
    serde_json::from_str(output).context(JsonSnafu { program: KUBECTL })
}

/// Reads the load balancer ingress IP from `kubectl get services -o json`.
///
/// # Errors
///
/// Returns [`LoadTestError::MissingField`] while the load balancer has not
/// been assigned an address yet.
pub fn parse_service_ip(service: &str, output: &str) -> Result<String> {
    const POINTER: &str = "/status/loadBalancer/ingress/0/ip";
    decode(output)?
        .pointer(POINTER)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| LoadTestError::MissingField {
            object: format!("service {service}"),
            field: POINTER.to_string(),
        })
}

/// Reads the ready replica count from `kubectl get deployments -o json`.
///
/// Kubernetes omits `readyReplicas` while none are ready, which reads as 0.
///
/// # Errors
///
/// Returns [`LoadTestError::Json`] if the output is not JSON.
pub fn parse_ready_replicas(output: &str) -> Result<u32> {
    let ready = decode(output)?
        .pointer("/status/readyReplicas")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    Ok(u32::try_from(ready).unwrap_or(u32::MAX))
}
