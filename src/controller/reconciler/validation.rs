//! # Spec Validation
//!
//! Checks run before any credential is touched. Failures are `Validation` errors and wait
//! for the next change to the resource.

use super::errors::ManagedEnvError;
use crate::crd::ManagedEnvironmentSpec;
use regex::Regex;
use std::sync::LazyLock;

// RFC 1123 label: [a-z0-9]([-a-z0-9]*[a-z0-9])?
static NAMESPACE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("Failed to compile namespace regex")
});

// RFC 1123 subdomain, the shape of a Secret name
static SECRET_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("Failed to compile secret name regex")
});

/// Validate the declared spec
pub fn validate_spec(spec: &ManagedEnvironmentSpec) -> Result<(), ManagedEnvError> {
    validate_api_url(&spec.api_url)?;
    validate_secret_name(&spec.credentials_secret)?;
    for namespace in &spec.namespaces {
        validate_namespace(namespace)?;
    }
    Ok(())
}

/// apiURL must be an absolute http(s) URL with a host
pub fn validate_api_url(api_url: &str) -> Result<(), ManagedEnvError> {
    let trimmed = api_url.trim();
    if trimmed.is_empty() {
        return Err(ManagedEnvError::Validation("apiURL cannot be empty".to_string()));
    }
    let url = url::Url::parse(trimmed)
        .map_err(|e| ManagedEnvError::Validation(format!("apiURL '{trimmed}' is invalid: {e}")))?;
    if !matches!(url.scheme(), "https" | "http") {
        return Err(ManagedEnvError::Validation(format!(
            "apiURL '{trimmed}' must use http or https, got '{}'",
            url.scheme()
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(ManagedEnvError::Validation(format!(
            "apiURL '{trimmed}' has no host"
        )));
    }
    Ok(())
}

pub fn validate_secret_name(name: &str) -> Result<(), ManagedEnvError> {
    if name.trim().is_empty() {
        return Err(ManagedEnvError::Validation(
            "credentialsSecret cannot be empty".to_string(),
        ));
    }
    if name.len() > 253 || !SECRET_NAME_REGEX.is_match(name) {
        return Err(ManagedEnvError::Validation(format!(
            "credentialsSecret '{name}' must be a valid Kubernetes name"
        )));
    }
    Ok(())
}

pub fn validate_namespace(namespace: &str) -> Result<(), ManagedEnvError> {
    if namespace.is_empty() || namespace.len() > 63 || !NAMESPACE_REGEX.is_match(namespace) {
        return Err(ManagedEnvError::Validation(format!(
            "namespace '{namespace}' must be a valid Kubernetes namespace (lowercase alphanumeric, hyphens; cannot start/end with hyphen)"
        )));
    }
    Ok(())
}
