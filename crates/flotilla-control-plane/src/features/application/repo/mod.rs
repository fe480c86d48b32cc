use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use crate::shared::types::ServiceDefinition;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Source of the application's service declarations
#[async_trait]
pub trait ApplicationRepository: Send + Sync {
    /// List every declared service with its dependencies and default scale
    async fn list_services(&self) -> ControlPlaneResult<Vec<ServiceDefinition>>;
}

/// In-memory implementation of application repository
#[derive(Clone, Default)]
pub struct InMemoryApplicationRepository {
    services: Arc<RwLock<Vec<ServiceDefinition>>>,
}

impl InMemoryApplicationRepository {
    pub fn new(services: Vec<ServiceDefinition>) -> Self {
        Self {
            services: Arc::new(RwLock::new(services)),
        }
    }

    pub fn declare(&self, service: ServiceDefinition) -> ControlPlaneResult<()> {
        let mut services = self.services.write().map_err(|_| {
            ControlPlaneError::StorageError("Lock poisoned".to_string())
        })?;
        services.retain(|existing| existing.name != service.name);
        services.push(service);
        Ok(())
    }
}

#[async_trait]
impl ApplicationRepository for InMemoryApplicationRepository {
    async fn list_services(&self) -> ControlPlaneResult<Vec<ServiceDefinition>> {
        let services = self.services.read().map_err(|_| {
            ControlPlaneError::StorageError("Lock poisoned".to_string())
        })?;
        Ok(services.clone())
    }
}

/// Reads the YAML project file on every call, so edits between operations
/// are picked up.
#[derive(Debug, Clone)]
pub struct YamlApplicationRepository {
    path: PathBuf,
}

impl YamlApplicationRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ApplicationRepository for YamlApplicationRepository {
    async fn list_services(&self) -> ControlPlaneResult<Vec<ServiceDefinition>> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            ControlPlaneError::DefinitionError(format!("{}: {e}", self.path.display()))
        })?;
        let services = parse_project(&raw)?;
        debug!(path = %self.path.display(), services = services.len(), "Loaded application definition");
        Ok(services)
    }
}

#[derive(Debug, Deserialize)]
struct ProjectFile {
    #[serde(default)]
    services: BTreeMap<String, ServiceSpec>,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceSpec {
    #[serde(default)]
    depends_on: DependsOn,
    #[serde(default)]
    scale: Option<u32>,
    #[serde(default)]
    deploy: Option<DeploySpec>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DependsOn {
    List(Vec<String>),
    Conditions(BTreeMap<String, serde_yaml::Value>),
}

impl Default for DependsOn {
    fn default() -> Self {
        DependsOn::List(Vec::new())
    }
}

impl DependsOn {
    fn into_names(self) -> Vec<String> {
        match self {
            DependsOn::List(names) => names,
            DependsOn::Conditions(conditions) => conditions.into_keys().collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct DeploySpec {
    #[serde(default)]
    replicas: Option<u32>,
}

/// Parse a project file into service definitions, ordered by name.
pub fn parse_project(raw: &str) -> ControlPlaneResult<Vec<ServiceDefinition>> {
    let project: ProjectFile = serde_yaml::from_str(raw)
        .map_err(|e| ControlPlaneError::DefinitionError(e.to_string()))?;

    project
        .services
        .into_iter()
        .map(|(name, spec)| {
            let default_scale = match (spec.scale, spec.deploy.and_then(|d| d.replicas)) {
                (Some(scale), Some(replicas)) if scale != replicas => {
                    return Err(ControlPlaneError::DefinitionError(format!(
                        "service {name}: scale ({scale}) and deploy.replicas ({replicas}) disagree"
                    )));
                }
                (scale, replicas) => scale.or(replicas),
            };
            Ok(ServiceDefinition {
                name,
                depends_on: spec.depends_on.into_names(),
                default_scale,
            })
        })
        .collect()
}
