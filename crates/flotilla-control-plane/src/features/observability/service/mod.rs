use crate::features::observability::repo::ObservabilityRepository;
use crate::shared::types::RuntimeOperation;
use std::sync::Arc;
use std::time::Duration;

pub struct ObservabilityService {
    repo: Arc<ObservabilityRepository>,
}

impl ObservabilityService {
    pub fn new(repo: Arc<ObservabilityRepository>) -> Self {
        Self { repo }
    }

    pub fn record_started(&self) {
        self.repo.inc_instances_started();
    }

    pub fn record_removed(&self) {
        self.repo.inc_instances_removed();
    }

    pub fn record_failure(&self, operation: RuntimeOperation) {
        self.repo.inc_operation_failure(&operation.to_string());
    }

    pub fn set_replicas(&self, service: &str, replicas: u32) {
        self.repo.set_service_replicas(service, replicas);
    }

    pub fn record_scale_duration(&self, elapsed: Duration) {
        self.repo.observe_scale_duration(elapsed.as_secs_f64());
    }

    pub fn render_metrics(&self) -> Result<String, String> {
        self.repo.render_metrics()
    }
}
