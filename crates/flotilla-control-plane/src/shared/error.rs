use flotilla_core::CoreError;
use std::collections::HashMap;
use thiserror::Error;

use crate::shared::types::RuntimeOperation;

/// Control plane specific errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlPlaneError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("No such service: {0}")]
    UnknownService(String),
    #[error("Container runtime unavailable: {0}")]
    RuntimeUnavailable(String),
    #[error("{operation} failed for {service}{}: {message}", index_suffix(.index))]
    Infrastructure {
        service: String,
        index: Option<u32>,
        operation: RuntimeOperation,
        message: String,
    },
    #[error("{operation} timed out for {service}{}", index_suffix(.index))]
    Timeout {
        service: String,
        index: Option<u32>,
        operation: RuntimeOperation,
    },
    #[error("Scaling of {0} cancelled")]
    Cancelled(String),
    #[error("Service {service} depends on {dependency}, which has no running instance")]
    DependencyNotRunning { service: String, dependency: String },
    #[error("Application definition error: {0}")]
    DefinitionError(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

fn index_suffix(index: &Option<u32>) -> String {
    index.map(|i| format!("-{i}")).unwrap_or_default()
}

impl ControlPlaneError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ControlPlaneError::InvalidArgument(_) => "INVALID_ARGUMENT",
            ControlPlaneError::UnknownService(_) => "UNKNOWN_SERVICE",
            ControlPlaneError::RuntimeUnavailable(_) => "RUNTIME_UNAVAILABLE",
            ControlPlaneError::Infrastructure { .. } => "INFRASTRUCTURE_ERROR",
            ControlPlaneError::Timeout { .. } => "TIMEOUT",
            ControlPlaneError::Cancelled(_) => "CANCELLED",
            ControlPlaneError::DependencyNotRunning { .. } => "DEPENDENCY_NOT_RUNNING",
            ControlPlaneError::DefinitionError(_) => "DEFINITION_ERROR",
            ControlPlaneError::StorageError(_) => "STORAGE_ERROR",
            ControlPlaneError::ConfigError(_) => "CONFIG_ERROR",
        }
    }

    pub fn service(&self) -> Option<&str> {
        match self {
            ControlPlaneError::Infrastructure { service, .. }
            | ControlPlaneError::Timeout { service, .. }
            | ControlPlaneError::DependencyNotRunning { service, .. }
            | ControlPlaneError::Cancelled(service)
            | ControlPlaneError::UnknownService(service) => Some(service.as_str()),
            _ => None,
        }
    }

    pub fn index(&self) -> Option<u32> {
        match self {
            ControlPlaneError::Infrastructure { index, .. }
            | ControlPlaneError::Timeout { index, .. } => *index,
            _ => None,
        }
    }
}

impl From<CoreError> for ControlPlaneError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::UnknownService(service) => ControlPlaneError::UnknownService(service),
            CoreError::InvalidArgument(msg) => ControlPlaneError::InvalidArgument(msg),
            other @ CoreError::InvalidTransition { .. } => {
                ControlPlaneError::StorageError(other.to_string())
            }
        }
    }
}

impl From<ControlPlaneError> for flotilla_core::ErrorResponse {
    fn from(err: ControlPlaneError) -> Self {
        let mut details = HashMap::new();
        if let Some(service) = err.service() {
            details.insert("service".to_string(), service.to_string());
        }
        if let Some(index) = err.index() {
            details.insert("index".to_string(), index.to_string());
        }

        let response = flotilla_core::ErrorResponse::new(err.error_code(), err.to_string());
        if details.is_empty() {
            response
        } else {
            response.with_details(details)
        }
    }
}

pub type ControlPlaneResult<T> = std::result::Result<T, ControlPlaneError>;
