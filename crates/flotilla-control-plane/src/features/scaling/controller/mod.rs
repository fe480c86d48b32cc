use crate::features::scaling::service::ScalingService;
use crate::shared::types::{InstanceSummary, ScaleCommand, ScaleResponse};
use flotilla_core::ErrorResponse;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Report of a scale operation split by output stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedReport {
    /// `Container <name>  Started|Running` lines.
    pub stdout: Vec<String>,
    /// `Removed` lines followed by one `Error` line per failed service.
    pub stderr: Vec<String>,
}

/// Controller for the scale and ps commands
pub struct ScalingController {
    service: Arc<ScalingService>,
}

impl ScalingController {
    pub fn new(service: Arc<ScalingService>) -> Self {
        Self { service }
    }

    /// Handle scale request
    pub async fn scale(
        &self,
        command: ScaleCommand,
        cancel: CancellationToken,
    ) -> Result<ScaleResponse, ErrorResponse> {
        info!(entries = ?command.entries, no_deps = command.no_deps, "Received scale request");

        self.service
            .scale(command, cancel)
            .await
            .map_err(|e| e.into())
    }

    /// Handle ps request
    pub async fn ps(&self, filter: &[String]) -> Result<Vec<InstanceSummary>, ErrorResponse> {
        self.service.ps(filter).await.map_err(|e| e.into())
    }

    pub fn render(&self, response: &ScaleResponse) -> RenderedReport {
        render_report(self.service.project(), response)
    }
}

pub fn render_report(project: &str, response: &ScaleResponse) -> RenderedReport {
    let mut report = RenderedReport::default();
    for line in &response.lines {
        let rendered = format!("Container {project}-{}  {}", line.instance_name(), line.label);
        if line.is_live() {
            report.stdout.push(rendered);
        } else {
            report.stderr.push(rendered);
        }
    }
    for outcome in response.failed() {
        if let Some(error) = &outcome.error {
            report.stderr.push(format!("Error {}: {error}", outcome.service));
        }
    }
    report
}

/// One `NAME  SERVICE  STATUS  CREATED` row per instance.
pub fn render_ps(summaries: &[InstanceSummary]) -> Vec<String> {
    let width = summaries
        .iter()
        .map(|s| s.container_name.len())
        .max()
        .unwrap_or(0)
        .max("NAME".len());

    std::iter::once(format!(
        "{:<width$}  {:<12}  {:<8}  {}",
        "NAME", "SERVICE", "STATUS", "CREATED"
    ))
    .chain(summaries.iter().map(|s| {
        format!(
            "{:<width$}  {:<12}  {:<8}  {}",
            s.container_name,
            s.service,
            s.status.label(),
            s.created_at.format("%Y-%m-%d %H:%M:%S")
        )
    }))
    .collect()
}
