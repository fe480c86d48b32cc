use crate::features::observability::repo::ObservabilityRepository;
use crate::features::observability::service::ObservabilityService;
use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use std::sync::Arc;

pub struct ObservabilityController {
    service: Arc<ObservabilityService>,
}

impl ObservabilityController {
    pub fn new(service: Arc<ObservabilityService>) -> Self {
        Self { service }
    }

    /// Controller over a fresh registry, returning the service so it can be
    /// handed to the scaling slice.
    pub fn with_new_registry() -> ControlPlaneResult<(Self, Arc<ObservabilityService>)> {
        let repo = ObservabilityRepository::new().map_err(ControlPlaneError::ConfigError)?;
        let service = Arc::new(ObservabilityService::new(Arc::new(repo)));
        Ok((Self::new(service.clone()), service))
    }

    pub fn render_metrics(&self) -> Result<String, String> {
        self.service.render_metrics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::types::RuntimeOperation;
    use std::time::Duration;

    #[test]
    fn test_metrics_render_contains_known_metric_names() {
        let (controller, service) = ObservabilityController::with_new_registry().unwrap();
        service.record_started();
        service.record_started();
        service.record_removed();
        service.record_failure(RuntimeOperation::Start);
        service.set_replicas("web", 2);
        service.record_scale_duration(Duration::from_millis(20));

        let rendered = controller.render_metrics().unwrap();
        assert!(rendered.contains("flotilla_instances_started_total 2"));
        assert!(rendered.contains("flotilla_instances_removed_total 1"));
        assert!(rendered.contains("flotilla_operation_failures_total{operation=\"start\"} 1"));
        assert!(rendered.contains("flotilla_service_replicas{service=\"web\"} 2"));
        assert!(rendered.contains("flotilla_scale_duration_seconds_count 1"));
    }

    #[test]
    fn test_registries_are_independent() {
        let (first, first_service) = ObservabilityController::with_new_registry().unwrap();
        let (second, _) = ObservabilityController::with_new_registry().unwrap();
        first_service.record_started();

        assert!(first.render_metrics().unwrap().contains("flotilla_instances_started_total 1"));
        assert!(second.render_metrics().unwrap().contains("flotilla_instances_started_total 0"));
    }
}
