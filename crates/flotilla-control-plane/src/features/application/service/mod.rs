use crate::features::application::repo::ApplicationRepository;
use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use crate::shared::types::ServiceDefinition;
use flotilla_core::DependencyGraph;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

/// Loaded application definition
#[derive(Debug, Clone)]
pub struct Application {
    pub services: Vec<ServiceDefinition>,
    pub graph: DependencyGraph,
}

impl Application {
    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.services.iter().map(|s| s.name.as_str())
    }
}

/// Service for loading and validating the application definition
pub struct ApplicationService {
    repo: Arc<dyn ApplicationRepository>,
}

impl ApplicationService {
    pub fn new(repo: Arc<dyn ApplicationRepository>) -> Self {
        Self { repo }
    }

    pub async fn load(&self) -> ControlPlaneResult<Application> {
        let services = self.repo.list_services().await?;
        Self::validate(&services)?;

        let graph = DependencyGraph::from_services(&services);
        Ok(Application { services, graph })
    }

    fn validate(services: &[ServiceDefinition]) -> ControlPlaneResult<()> {
        let mut names = HashSet::new();
        for service in services {
            if service.name.is_empty() {
                return Err(ControlPlaneError::DefinitionError(
                    "service name cannot be empty".to_string(),
                ));
            }
            if !names.insert(service.name.as_str()) {
                return Err(ControlPlaneError::DefinitionError(format!(
                    "service {} is declared more than once",
                    service.name
                )));
            }
        }

        for service in services {
            for dependency in &service.depends_on {
                if !names.contains(dependency.as_str()) {
                    warn!(service = %service.name, %dependency, "Service depends on an undeclared service");
                }
            }
        }

        Ok(())
    }
}
