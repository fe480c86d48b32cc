mod executor;

pub use executor::{Executor, ServiceRun};

use crate::features::application::service::ApplicationService;
use crate::features::observability::service::ObservabilityService;
use crate::features::runtime::ContainerRuntime;
use crate::shared::config::DEFAULT_OPERATION_TIMEOUT_SECS;
use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use crate::shared::types::{
    DependencyMode, InstanceSummary, ScaleCommand, ScaleResponse, ServiceOutcome,
};
use flotilla_core::{
    ApplicationSnapshot, DependencyGraph, ScalePlan, ScaleRequest, StateReporter,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A computed but not yet executed scale operation
#[derive(Debug, Clone)]
pub struct PlannedScale {
    pub request: ScaleRequest,
    /// Explicit targets plus the dependencies pulled in for them.
    pub targets: BTreeMap<String, u32>,
    pub snapshot: ApplicationSnapshot,
    pub plan: ScalePlan,
    /// Processing order: each layer only depends on earlier ones.
    pub layers: Vec<Vec<String>>,
    pub graph: DependencyGraph,
}

impl PlannedScale {
    pub fn processing_order(&self) -> impl Iterator<Item = &String> {
        self.layers.iter().flatten()
    }
}

/// Service reconciling requested replica counts with the runtime
pub struct ScalingService {
    project: String,
    apps: ApplicationService,
    runtime: Arc<dyn ContainerRuntime>,
    metrics: Option<Arc<ObservabilityService>>,
    operation_timeout: Duration,
    dependency_mode: DependencyMode,
}

impl ScalingService {
    pub fn new(
        project: impl Into<String>,
        apps: ApplicationService,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        Self {
            project: project.into(),
            apps,
            runtime,
            metrics: None,
            operation_timeout: Duration::from_secs(DEFAULT_OPERATION_TIMEOUT_SECS),
            dependency_mode: DependencyMode::default(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<ObservabilityService>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_dependency_mode(mut self, mode: DependencyMode) -> Self {
        self.dependency_mode = mode;
        self
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    /// Snapshot the live instances of `services`. Any runtime failure is
    /// reported as `RuntimeUnavailable`.
    pub async fn inspect<'a, I>(&self, services: I) -> ControlPlaneResult<ApplicationSnapshot>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut snapshot = ApplicationSnapshot::new();
        for service in services {
            let listed = tokio::time::timeout(self.operation_timeout, self.runtime.list_instances(service))
                .await
                .map_err(|_| {
                    ControlPlaneError::RuntimeUnavailable(format!("listing {service} timed out"))
                })?
                .map_err(|e| ControlPlaneError::RuntimeUnavailable(e.to_string()))?;
            snapshot.insert(service.clone(), listed);
        }
        Ok(snapshot)
    }

    /// Resolve, inspect, expand and diff without touching the runtime.
    pub async fn plan(&self, command: &ScaleCommand) -> ControlPlaneResult<PlannedScale> {
        let app = self.apps.load().await?;
        let request = ScaleRequest::resolve(command.entries.as_slice(), command.no_deps, &app.services)?;
        let mode = command.dependency_mode.unwrap_or(self.dependency_mode);

        let mut observed: BTreeSet<String> = request.targets.keys().cloned().collect();
        if !request.no_deps {
            for service in request.targets.keys() {
                observed.extend(app.graph.transitive_dependencies(service));
            }
        }

        let snapshot = self.inspect(&observed).await?;
        let targets = app
            .graph
            .expand(&request.targets, request.no_deps, &snapshot, mode);
        let plan = ScalePlan::compute(&targets, &snapshot);
        let layers = app.graph.layers(plan.service_names());

        debug!(
            targets = ?targets,
            operations = plan.operation_count(),
            layers = layers.len(),
            mode = %mode,
            "Scale plan computed"
        );

        Ok(PlannedScale {
            request,
            targets,
            snapshot,
            plan,
            layers,
            graph: app.graph,
        })
    }

    /// Bring the targeted services (and their dependencies) to the requested
    /// replica counts. Per-service failures are reported in the response;
    /// only rejected requests and an unreachable runtime return `Err`.
    pub async fn scale(
        &self,
        command: ScaleCommand,
        cancel: CancellationToken,
    ) -> ControlPlaneResult<ScaleResponse> {
        let started = Instant::now();
        let planned = self.plan(&command).await?;

        if planned.plan.is_noop() {
            info!(services = planned.plan.len(), "All services already at desired scale");
        }

        let executor = Executor::new(
            self.runtime.clone(),
            self.metrics.clone(),
            self.operation_timeout,
            cancel,
        );
        let plan = Arc::new(planned.plan.clone());
        let snapshot = Arc::new(planned.snapshot.clone());
        let mut runs = executor
            .execute(plan, snapshot, &planned.graph, &planned.layers)
            .await;

        let mut reporter = StateReporter::new();
        let mut response = ScaleResponse::default();
        for service in planned.processing_order() {
            let (Some(service_plan), Some(run)) = (planned.plan.get(service), runs.remove(service)) else {
                continue;
            };

            reporter.record(service_plan, &run.progress);
            response.events.extend(run.events);
            if let Some(metrics) = &self.metrics {
                metrics.set_replicas(service, run.live);
            }
            if let Some(error) = &run.error {
                warn!(service = %service, error = %error, live = run.live, "Service did not reach desired scale");
            }
            response.outcomes.push(ServiceOutcome {
                service: service.clone(),
                desired: service_plan.desired,
                live: run.live,
                error: run.error,
            });
        }
        response.lines = reporter.finish();

        if let Some(metrics) = &self.metrics {
            metrics.record_scale_duration(started.elapsed());
        }
        info!(
            services = response.outcomes.len(),
            failed = response.failed().count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Scale operation finished"
        );

        Ok(response)
    }

    /// Live instances of the named services, or of every declared service
    /// when `filter` is empty.
    pub async fn ps(&self, filter: &[String]) -> ControlPlaneResult<Vec<InstanceSummary>> {
        let app = self.apps.load().await?;
        let services: Vec<String> = if filter.is_empty() {
            app.service_names().map(str::to_string).collect()
        } else {
            for service in filter {
                if !app.graph.contains(service) {
                    return Err(ControlPlaneError::UnknownService(service.clone()));
                }
            }
            filter.to_vec()
        };

        let snapshot = self.inspect(&services).await?;
        let mut summaries: Vec<InstanceSummary> = snapshot
            .services()
            .flat_map(|service| snapshot.instances(service))
            .map(|record| InstanceSummary {
                service: record.service().to_string(),
                index: record.index(),
                container_name: record.handle.container_name(&self.project),
                status: record.status,
                created_at: record.created_at,
            })
            .collect();
        summaries.sort_by(|a, b| (&a.service, a.index).cmp(&(&b.service, b.index)));
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::application::repo::InMemoryApplicationRepository;
    use crate::features::runtime::repo::MockContainerRuntime;
    use crate::features::runtime::{InMemoryContainerRuntime, RuntimeError};
    use crate::shared::types::{InstanceStatus, RuntimeOperation, ServiceDefinition};

    fn services() -> Vec<ServiceDefinition> {
        vec![
            ServiceDefinition::new("db"),
            ServiceDefinition::new("back").depends_on(["db"]),
            ServiceDefinition::new("front").depends_on(["back"]),
            ServiceDefinition::new("dbadmin").depends_on(["db"]),
        ]
    }

    fn create_test_service(runtime: Arc<dyn ContainerRuntime>) -> ScalingService {
        let apps = ApplicationService::new(Arc::new(InMemoryApplicationRepository::new(services())));
        ScalingService::new("test", apps, runtime).with_operation_timeout(Duration::from_millis(200))
    }

    fn labels(response: &ScaleResponse) -> Vec<(String, InstanceStatus)> {
        response
            .lines
            .iter()
            .map(|line| (line.instance_name(), line.label))
            .collect()
    }

    #[tokio::test]
    async fn test_scale_up_pulls_in_dependencies() {
        let runtime = InMemoryContainerRuntime::new();
        let service = create_test_service(Arc::new(runtime.clone()));

        let response = service
            .scale(ScaleCommand::new(["front=2"]), CancellationToken::new())
            .await
            .unwrap();

        assert!(response.is_success());
        assert_eq!(
            labels(&response),
            vec![
                ("db-1".to_string(), InstanceStatus::Started),
                ("back-1".to_string(), InstanceStatus::Started),
                ("front-1".to_string(), InstanceStatus::Started),
                ("front-2".to_string(), InstanceStatus::Started),
            ]
        );
        assert_eq!(runtime.live_indices("front"), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_plan_does_not_mutate() {
        let runtime = InMemoryContainerRuntime::new();
        runtime.seed("db", 1).unwrap();
        let service = create_test_service(Arc::new(runtime.clone()));

        let planned = service.plan(&ScaleCommand::new(["back=2"])).await.unwrap();
        assert_eq!(planned.targets.get("db"), None);
        assert_eq!(planned.plan.get("back").unwrap().create, vec![1, 2]);
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_service_rejected_before_inspection() {
        let mut runtime = MockContainerRuntime::new();
        runtime.expect_list_instances().never();
        let service = create_test_service(Arc::new(runtime));

        let result = service
            .scale(ScaleCommand::new(["cache=1"]), CancellationToken::new())
            .await;
        assert_eq!(result.unwrap_err(), ControlPlaneError::UnknownService("cache".to_string()));
    }

    #[tokio::test]
    async fn test_unreachable_runtime_mutates_nothing() {
        let mut runtime = MockContainerRuntime::new();
        runtime
            .expect_list_instances()
            .returning(|_| Err(RuntimeError::Unreachable("connection refused".to_string())));
        runtime.expect_create_instance().never();
        let service = create_test_service(Arc::new(runtime));

        let result = service
            .scale(ScaleCommand::new(["db=2"]), CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ControlPlaneError::RuntimeUnavailable(_))));
    }

    #[tokio::test]
    async fn test_failed_start_rolls_back_created_instance() {
        let runtime = InMemoryContainerRuntime::new();
        runtime.fail_on(RuntimeOperation::Start, "db", Some(2));
        let service = create_test_service(Arc::new(runtime.clone()));

        let response = service
            .scale(ScaleCommand::new(["db=3"]).no_deps(), CancellationToken::new())
            .await
            .unwrap();

        let outcome = response.outcome("db").unwrap();
        assert_eq!(outcome.live, 1);
        assert!(matches!(
            outcome.error,
            Some(ControlPlaneError::Infrastructure { operation: RuntimeOperation::Start, index: Some(2), .. })
        ));
        assert_eq!(runtime.live_indices("db"), vec![1]);
        assert_eq!(labels(&response), vec![("db-1".to_string(), InstanceStatus::Started)]);
    }

    #[tokio::test]
    async fn test_dependent_skipped_when_dependency_never_runs() {
        let runtime = InMemoryContainerRuntime::new();
        runtime.fail_on(RuntimeOperation::Create, "db", None);
        let service = create_test_service(Arc::new(runtime.clone()));

        let response = service
            .scale(ScaleCommand::new(["back=1"]), CancellationToken::new())
            .await
            .unwrap();

        assert!(!response.is_success());
        assert_eq!(
            response.outcome("back").unwrap().error,
            Some(ControlPlaneError::DependencyNotRunning {
                service: "back".to_string(),
                dependency: "db".to_string(),
            })
        );
        assert!(runtime.live_indices("back").is_empty());
    }

    #[tokio::test]
    async fn test_stopping_dependency_is_replaced_before_dependent() {
        let runtime = InMemoryContainerRuntime::new();
        runtime.seed("db", 1).unwrap();
        let db = runtime.list_instances("db").await.unwrap().remove(0);
        runtime.stop_instance(&db.handle).await.unwrap();
        let service = create_test_service(Arc::new(runtime.clone()));

        let response = service
            .scale(ScaleCommand::new(["db=1", "back=1"]), CancellationToken::new())
            .await
            .unwrap();

        assert!(response.is_success());
        assert_eq!(
            labels(&response),
            vec![
                ("db-1".to_string(), InstanceStatus::Started),
                ("back-1".to_string(), InstanceStatus::Started),
            ]
        );
        assert_eq!(
            runtime.calls(),
            vec![
                (RuntimeOperation::Stop, "db-1".to_string()),
                (RuntimeOperation::Remove, "db-1".to_string()),
                (RuntimeOperation::Create, "db-1".to_string()),
                (RuntimeOperation::Start, "db-1".to_string()),
                (RuntimeOperation::Create, "back-1".to_string()),
                (RuntimeOperation::Start, "back-1".to_string()),
            ]
        );
        let db = runtime.list_instances("db").await.unwrap();
        assert_eq!(db[0].status, InstanceStatus::Running);
    }

    #[tokio::test]
    async fn test_dependent_skipped_when_idle_dependency_stays_down() {
        let runtime = InMemoryContainerRuntime::new();
        runtime.seed("db", 1).unwrap();
        let db = runtime.list_instances("db").await.unwrap().remove(0);
        runtime.stop_instance(&db.handle).await.unwrap();
        runtime.fail_on(RuntimeOperation::Remove, "db", Some(1));
        let service = create_test_service(Arc::new(runtime.clone()));

        let response = service
            .scale(ScaleCommand::new(["db=1", "back=1"]), CancellationToken::new())
            .await
            .unwrap();

        assert!(!response.is_success());
        assert_eq!(
            response.outcome("back").unwrap().error,
            Some(ControlPlaneError::DependencyNotRunning {
                service: "back".to_string(),
                dependency: "db".to_string(),
            })
        );
        assert!(runtime.live_indices("back").is_empty());
        assert_eq!(labels(&response), vec![("db-1".to_string(), InstanceStatus::Stopping)]);
        assert!(response.lines.iter().all(|line| !line.is_live()));
    }

    #[tokio::test]
    async fn test_created_dependency_is_started_in_place() {
        let runtime = InMemoryContainerRuntime::new();
        runtime.create_instance("db", 1).await.unwrap();
        let service = create_test_service(Arc::new(runtime.clone()));

        let response = service
            .scale(ScaleCommand::new(["back=1"]), CancellationToken::new())
            .await
            .unwrap();

        assert!(response.is_success());
        assert_eq!(
            labels(&response),
            vec![
                ("db-1".to_string(), InstanceStatus::Started),
                ("back-1".to_string(), InstanceStatus::Started),
            ]
        );
        assert_eq!(runtime.calls()[1], (RuntimeOperation::Start, "db-1".to_string()));
        assert_eq!(runtime.live_indices("db"), vec![1]);
    }

    #[tokio::test]
    async fn test_slow_listing_is_runtime_unavailable() {
        let runtime = InMemoryContainerRuntime::new().with_latency(RuntimeOperation::List, Duration::from_millis(100));
        let service = create_test_service(Arc::new(runtime)).with_operation_timeout(Duration::from_millis(10));

        let result = service.inspect(&["db".to_string()]).await;
        assert!(matches!(result, Err(ControlPlaneError::RuntimeUnavailable(_))));
    }

    #[tokio::test]
    async fn test_slow_start_times_out_and_rolls_back() {
        let runtime = InMemoryContainerRuntime::new().with_latency(RuntimeOperation::Start, Duration::from_millis(500));
        let service = create_test_service(Arc::new(runtime.clone())).with_operation_timeout(Duration::from_millis(50));

        let response = service
            .scale(ScaleCommand::new(["db=1"]), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            response.outcome("db").unwrap().error,
            Some(ControlPlaneError::Timeout {
                service: "db".to_string(),
                index: Some(1),
                operation: RuntimeOperation::Start,
            })
        );
        assert!(runtime.live_indices("db").is_empty());
        assert!(response.lines.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_first_operation() {
        let runtime = InMemoryContainerRuntime::new();
        let service = create_test_service(Arc::new(runtime.clone()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let response = service.scale(ScaleCommand::new(["db=2"]), cancel).await.unwrap();
        assert_eq!(
            response.outcome("db").unwrap().error,
            Some(ControlPlaneError::Cancelled("db".to_string()))
        );
        assert!(runtime.live_indices("db").is_empty());
    }

    #[tokio::test]
    async fn test_ps_lists_instances_sorted() {
        let runtime = InMemoryContainerRuntime::new();
        runtime.seed("db", 2).unwrap();
        runtime.seed("back", 1).unwrap();
        let service = create_test_service(Arc::new(runtime));

        let all = service.ps(&[]).await.unwrap();
        let names: Vec<&str> = all.iter().map(|s| s.container_name.as_str()).collect();
        assert_eq!(names, vec!["test-back-1", "test-db-1", "test-db-2"]);

        let filtered = service.ps(&["db".to_string()]).await.unwrap();
        assert_eq!(filtered.len(), 2);
        assert!(matches!(
            service.ps(&["cache".to_string()]).await,
            Err(ControlPlaneError::UnknownService(_))
        ));
    }

    #[tokio::test]
    async fn test_metrics_follow_operations() {
        let runtime = InMemoryContainerRuntime::new();
        runtime.seed("db", 3).unwrap();
        let (controller, metrics) =
            crate::features::observability::controller::ObservabilityController::with_new_registry().unwrap();
        let service = create_test_service(Arc::new(runtime)).with_metrics(metrics);

        service
            .scale(ScaleCommand::new(["db=1"]), CancellationToken::new())
            .await
            .unwrap();

        let rendered = controller.render_metrics().unwrap();
        assert!(rendered.contains("flotilla_instances_removed_total 2"));
        assert!(rendered.contains("flotilla_service_replicas{service=\"db\"} 1"));
    }
}
