use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use flotilla_core::{
    DependencyMode, ExecutionEventRecorder, InstanceHandle, InstanceRecord, InstanceStatus,
    ServiceDefinition, StatusLine,
};

use crate::shared::error::ControlPlaneError;

/// Runtime primitive an error or timeout is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeOperation {
    List,
    Create,
    Start,
    Stop,
    Remove,
}

impl fmt::Display for RuntimeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuntimeOperation::List => "list",
            RuntimeOperation::Create => "create",
            RuntimeOperation::Start => "start",
            RuntimeOperation::Stop => "stop",
            RuntimeOperation::Remove => "remove",
        };
        f.write_str(name)
    }
}

/// Request to scale services, as received from the CLI
#[derive(Debug, Clone, Default)]
pub struct ScaleCommand {
    /// Raw `SERVICE=REPLICAS` arguments.
    pub entries: Vec<String>,
    pub no_deps: bool,
    /// Overrides the configured dependency mode when set.
    pub dependency_mode: Option<DependencyMode>,
}

impl ScaleCommand {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: entries.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn no_deps(mut self) -> Self {
        self.no_deps = true;
        self
    }

    pub fn with_dependency_mode(mut self, mode: DependencyMode) -> Self {
        self.dependency_mode = Some(mode);
        self
    }
}

/// Per-service result of a scale operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceOutcome {
    pub service: String,
    pub desired: u32,
    /// Live replicas once the operation finished.
    pub live: u32,
    pub error: Option<ControlPlaneError>,
}

impl ServiceOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of a scale operation. Partial convergence is a valid outcome, so
/// success is tracked per service.
#[derive(Debug, Clone, Default)]
pub struct ScaleResponse {
    pub lines: Vec<StatusLine>,
    pub outcomes: Vec<ServiceOutcome>,
    pub events: ExecutionEventRecorder,
}

impl ScaleResponse {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(ServiceOutcome::is_success)
    }

    pub fn failed(&self) -> impl Iterator<Item = &ServiceOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.is_success())
    }

    pub fn outcome(&self, service: &str) -> Option<&ServiceOutcome> {
        self.outcomes.iter().find(|outcome| outcome.service == service)
    }
}

/// One row of `ps` output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSummary {
    pub service: String,
    pub index: u32,
    pub container_name: String,
    pub status: InstanceStatus,
    pub created_at: DateTime<Utc>,
}
