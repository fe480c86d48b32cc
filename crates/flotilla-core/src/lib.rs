pub mod graph;
pub mod plan;
pub mod report;
pub mod request;
pub mod snapshot;

pub use graph::{DependencyGraph, DependencyMode};
pub use plan::{ScalePlan, ServicePlan};
pub use report::{ServiceProgress, StateReporter, StatusLine};
pub use request::ScaleRequest;
pub use snapshot::ApplicationSnapshot;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Unknown service: {0}")]
    UnknownService(String),
    #[error("Invalid lifecycle transition for {instance}: {from} -> {to}")]
    InvalidTransition {
        instance: String,
        from: InstanceStatus,
        to: InstanceStatus,
    },
}

/// Lifecycle of a single service instance.
///
/// `Started` marks an instance brought up by the current operation, `Running`
/// one that was already live when the operation began.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Created,
    Started,
    Running,
    Stopping,
    Removed,
}

impl InstanceStatus {
    pub fn can_transition_to(self, next: InstanceStatus) -> bool {
        use InstanceStatus::*;
        matches!(
            (self, next),
            (Created, Started)
                | (Created, Removed)
                | (Started, Running)
                | (Started, Stopping)
                | (Running, Stopping)
                | (Stopping, Removed)
        )
    }

    /// Instances that still count towards a service's replica count.
    pub fn is_live(self) -> bool {
        !matches!(self, InstanceStatus::Removed)
    }

    pub fn is_running(self) -> bool {
        matches!(self, InstanceStatus::Started | InstanceStatus::Running)
    }

    pub fn label(self) -> &'static str {
        match self {
            InstanceStatus::Created => "Created",
            InstanceStatus::Started => "Started",
            InstanceStatus::Running => "Running",
            InstanceStatus::Stopping => "Stopping",
            InstanceStatus::Removed => "Removed",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A service as declared by the application definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub name: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub default_scale: Option<u32>,
}

impl ServiceDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            depends_on: Vec::new(),
            default_scale: None,
        }
    }

    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_default_scale(mut self, scale: u32) -> Self {
        self.default_scale = Some(scale);
        self
    }
}

/// `<service>-<index>`, the identity used in reports.
pub fn instance_name(service: &str, index: u32) -> String {
    format!("{service}-{index}")
}

/// Opaque reference to a container owned by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceHandle {
    pub service: String,
    pub index: u32,
    pub container_id: String,
}

impl InstanceHandle {
    pub fn new(service: impl Into<String>, index: u32) -> Self {
        Self {
            service: service.into(),
            index,
            container_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn instance_name(&self) -> String {
        instance_name(&self.service, self.index)
    }

    pub fn container_name(&self, project: &str) -> String {
        format!("{project}-{}", self.instance_name())
    }
}

/// Point-in-time view of one instance as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub handle: InstanceHandle,
    pub status: InstanceStatus,
    pub created_at: DateTime<Utc>,
}

impl InstanceRecord {
    pub fn new(handle: InstanceHandle, status: InstanceStatus) -> Self {
        Self {
            handle,
            status,
            created_at: Utc::now(),
        }
    }

    pub fn index(&self) -> u32 {
        self.handle.index
    }

    pub fn service(&self) -> &str {
        &self.handle.service
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn transition(&mut self, next: InstanceStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                instance: self.handle.instance_name(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error_code: String,
    pub message: String,
    pub details: Option<HashMap<String, String>>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorResponse {
    pub fn new(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
            details: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: HashMap<String, String>) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub event_type: String,
    pub instance: String,
    pub timestamp: DateTime<Utc>,
    pub details: Option<HashMap<String, String>>,
}

impl ExecutionEvent {
    pub fn new(event_type: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            instance: instance.into(),
            timestamp: Utc::now(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: HashMap<String, String>) -> Self {
        self.details = Some(details);
        self
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Execution event recorder for tracking instance lifecycle during a scale operation
#[derive(Debug, Default, Clone)]
pub struct ExecutionEventRecorder {
    events: Vec<ExecutionEvent>,
}

impl ExecutionEventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_event(&mut self, event: ExecutionEvent) {
        self.events.push(event);
    }

    pub fn record_transition(&mut self, instance: &str, status: InstanceStatus) {
        let event_type = format!("instance_{}", status.label().to_lowercase());
        self.record_event(ExecutionEvent::new(event_type, instance));
    }

    pub fn record_failure(&mut self, instance: &str, operation: &str, error: &str) {
        let mut details = HashMap::new();
        details.insert("operation".to_string(), operation.to_string());
        details.insert("error".to_string(), error.to_string());

        self.record_event(ExecutionEvent::new("instance_failed", instance).with_details(details));
    }

    pub fn extend(&mut self, other: ExecutionEventRecorder) {
        self.events.extend(other.events);
    }

    pub fn get_events(&self) -> &[ExecutionEvent] {
        &self.events
    }

    pub fn get_events_for_instance(&self, instance: &str) -> Vec<&ExecutionEvent> {
        self.events
            .iter()
            .filter(|e| e.instance == instance)
            .collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
