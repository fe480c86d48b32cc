pub mod features;
pub mod shared;

use std::sync::Arc;

use features::application::repo::{ApplicationRepository, YamlApplicationRepository};
use features::application::service::ApplicationService;
use features::observability::controller::ObservabilityController;
use features::runtime::{ContainerRuntime, InMemoryContainerRuntime};
use features::scaling::controller::ScalingController;
use features::scaling::service::ScalingService;
use shared::config::Config;
use shared::error::ControlPlaneResult;
use tracing::debug;

/// Wires the feature slices together for one project.
pub struct ControlPlane {
    config: Config,
    scaling: ScalingController,
    observability: ObservabilityController,
}

impl ControlPlane {
    /// Project file from disk, container state persisted next to it.
    pub fn from_config(config: Config) -> ControlPlaneResult<Self> {
        let apps = Arc::new(YamlApplicationRepository::new(config.project_file_path()));
        let runtime = Arc::new(InMemoryContainerRuntime::with_state_file(&config.state_file)?);
        debug!(
            project = %config.project_name,
            file = %apps.path().display(),
            state = %config.state_file.display(),
            "Control plane configured"
        );
        Self::with_components(config, apps, runtime)
    }

    pub fn with_components(
        config: Config,
        apps: Arc<dyn ApplicationRepository>,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> ControlPlaneResult<Self> {
        let (observability, metrics) = ObservabilityController::with_new_registry()?;
        let service = ScalingService::new(
            config.project_name.clone(),
            ApplicationService::new(apps),
            runtime,
        )
        .with_metrics(metrics)
        .with_operation_timeout(config.operation_timeout)
        .with_dependency_mode(config.dependency_mode);

        Ok(Self {
            config,
            scaling: ScalingController::new(Arc::new(service)),
            observability,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn scaling(&self) -> &ScalingController {
        &self.scaling
    }

    pub fn observability(&self) -> &ObservabilityController {
        &self.observability
    }
}
