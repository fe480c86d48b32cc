//! Dependency graph of an application: expansion of scale targets and
//! topological layering for execution.
//!
//! The graph comes straight from the application definition and may contain
//! cycles or references to undeclared services. Every walk here keeps an
//! explicit visited set, so neither case can prevent termination.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{ApplicationSnapshot, CoreError, ServiceDefinition};

/// How dependencies of scaled services are brought into the target map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyMode {
    /// Raise dependencies that have no started or running instance to one
    /// replica.
    #[default]
    EnsureRunning,
    /// Reconcile every dependency to its declared default scale.
    ConvergeToDefault,
}

impl FromStr for DependencyMode {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ensure-running" => Ok(DependencyMode::EnsureRunning),
            "converge-to-default" => Ok(DependencyMode::ConvergeToDefault),
            other => Err(CoreError::InvalidArgument(format!(
                "unknown dependency mode {other:?}, expected ensure-running or converge-to-default"
            ))),
        }
    }
}

impl fmt::Display for DependencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyMode::EnsureRunning => f.write_str("ensure-running"),
            DependencyMode::ConvergeToDefault => f.write_str("converge-to-default"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: BTreeMap<String, Vec<String>>,
    default_scale: BTreeMap<String, u32>,
}

impl DependencyGraph {
    pub fn from_services(services: &[ServiceDefinition]) -> Self {
        let mut graph = Self::default();
        for service in services {
            graph
                .edges
                .insert(service.name.clone(), service.depends_on.clone());
            if let Some(scale) = service.default_scale {
                graph.default_scale.insert(service.name.clone(), scale);
            }
        }
        graph
    }

    pub fn contains(&self, service: &str) -> bool {
        self.edges.contains_key(service)
    }

    pub fn dependencies_of(&self, service: &str) -> &[String] {
        self.edges
            .get(service)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn default_scale(&self, service: &str) -> u32 {
        self.default_scale.get(service).copied().unwrap_or(1)
    }

    /// Every declared service reachable from `service` through dependency
    /// edges, excluding `service` itself, in discovery order.
    pub fn transitive_dependencies(&self, service: &str) -> Vec<String> {
        let mut visited = BTreeSet::from([service.to_string()]);
        let mut order = Vec::new();
        let mut stack: Vec<&str> = self.dependencies_of(service).iter().rev().map(String::as_str).collect();

        while let Some(current) = stack.pop() {
            if !visited.insert(current.to_string()) {
                continue;
            }
            if !self.contains(current) {
                warn!(service, dependency = current, "dependency is not declared, ignoring");
                continue;
            }
            order.push(current.to_string());
            stack.extend(self.dependencies_of(current).iter().rev().map(String::as_str));
        }

        order
    }

    /// Add the dependencies of scaled services to `targets`.
    ///
    /// Explicit targets are never overridden. With `no_deps` the map is
    /// returned unchanged.
    pub fn expand(
        &self,
        targets: &BTreeMap<String, u32>,
        no_deps: bool,
        snapshot: &ApplicationSnapshot,
        mode: DependencyMode,
    ) -> BTreeMap<String, u32> {
        let mut expanded = targets.clone();
        if no_deps {
            return expanded;
        }

        let mut visited: BTreeSet<String> = BTreeSet::new();
        let mut stack: Vec<String> = Vec::new();

        for (root, desired) in targets {
            if *desired == 0 {
                continue;
            }
            stack.extend(self.dependencies_of(root).iter().rev().cloned());

            while let Some(dependency) = stack.pop() {
                if !visited.insert(dependency.clone()) {
                    continue;
                }
                if !self.contains(&dependency) {
                    warn!(service = %root, %dependency, "dependency is not declared, ignoring");
                    continue;
                }

                let running = snapshot.running_count(&dependency);
                let required = match expanded.get(&dependency) {
                    Some(explicit) => *explicit > 0,
                    None => {
                        let target = match mode {
                            DependencyMode::EnsureRunning if running == 0 => Some(1),
                            DependencyMode::EnsureRunning => None,
                            DependencyMode::ConvergeToDefault => Some(self.default_scale(&dependency)),
                        };
                        if let Some(count) = target {
                            debug!(service = %root, %dependency, running, count, "adding dependency to scale targets");
                            expanded.insert(dependency.clone(), count);
                        }
                        target.map_or(running > 0, |count| count > 0)
                    }
                };

                // A dependency that will not run needs nothing of its own.
                if required {
                    stack.extend(self.dependencies_of(&dependency).iter().rev().cloned());
                }
            }
        }

        expanded
    }

    /// Group `services` into layers such that each service's dependencies
    /// (restricted to `services`) lie in earlier layers. Services caught in a
    /// cycle are placed together in a final layer.
    pub fn layers<'a, I>(&self, services: I) -> Vec<Vec<String>>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let members: BTreeSet<String> = services.into_iter().cloned().collect();
        let mut pending: BTreeMap<String, BTreeSet<String>> = members
            .iter()
            .map(|service| {
                let deps = self
                    .dependencies_of(service)
                    .iter()
                    .filter(|dep| *dep != service && members.contains(*dep))
                    .cloned()
                    .collect();
                (service.clone(), deps)
            })
            .collect();

        let mut layers = Vec::new();
        while !pending.is_empty() {
            let ready: Vec<String> = pending
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(service, _)| service.clone())
                .collect();

            if ready.is_empty() {
                let cyclic: Vec<String> = pending.keys().cloned().collect();
                warn!(services = ?cyclic, "dependency cycle detected, scheduling services together");
                layers.push(cyclic);
                break;
            }

            for service in &ready {
                pending.remove(service);
            }
            for deps in pending.values_mut() {
                for service in &ready {
                    deps.remove(service);
                }
            }
            layers.push(ready);
        }

        layers
    }
}
