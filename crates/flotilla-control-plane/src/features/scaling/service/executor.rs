use crate::features::observability::service::ObservabilityService;
use crate::features::runtime::{ContainerRuntime, RuntimeResult};
use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use crate::shared::types::{
    ExecutionEventRecorder, InstanceHandle, InstanceRecord, InstanceStatus, RuntimeOperation,
};
use flotilla_core::{instance_name, ApplicationSnapshot, DependencyGraph, ScalePlan, ServicePlan, ServiceProgress};
use futures::{stream::FuturesUnordered, StreamExt};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What happened to one service during execution.
#[derive(Debug, Clone, Default)]
pub struct ServiceRun {
    pub progress: ServiceProgress,
    pub events: ExecutionEventRecorder,
    pub live: u32,
    /// Live instances that are started or running.
    pub running: u32,
    pub error: Option<ControlPlaneError>,
}

impl ServiceRun {
    fn new(plan: &ServicePlan, snapshot: &ApplicationSnapshot) -> Self {
        Self {
            live: snapshot.live_count(&plan.service),
            running: snapshot.running_count(&plan.service),
            ..Self::default()
        }
    }

    fn failed(plan: &ServicePlan, snapshot: &ApplicationSnapshot, error: ControlPlaneError) -> Self {
        Self {
            error: Some(error),
            ..Self::new(plan, snapshot)
        }
    }
}

/// Applies a scale plan against the runtime, one dependency layer at a time.
///
/// Services within a layer run concurrently. A service's own operations run
/// sequentially: idle survivors are brought back up first, then creations in
/// ascending index order, then removals descending.
#[derive(Clone)]
pub struct Executor {
    runtime: Arc<dyn ContainerRuntime>,
    metrics: Option<Arc<ObservabilityService>>,
    operation_timeout: Duration,
    cancel: CancellationToken,
}

impl Executor {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        metrics: Option<Arc<ObservabilityService>>,
        operation_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            runtime,
            metrics,
            operation_timeout,
            cancel,
        }
    }

    pub async fn execute(
        &self,
        plan: Arc<ScalePlan>,
        snapshot: Arc<ApplicationSnapshot>,
        graph: &DependencyGraph,
        layers: &[Vec<String>],
    ) -> BTreeMap<String, ServiceRun> {
        let mut results: BTreeMap<String, ServiceRun> = BTreeMap::new();

        for (depth, layer) in layers.iter().enumerate() {
            debug!(depth, services = ?layer, "Executing layer");
            let mut tasks = FuturesUnordered::new();

            for service in layer {
                let Some(service_plan) = plan.get(service) else {
                    continue;
                };

                if let Some(dependency) = blocking_dependency(graph, &plan, &results, service_plan) {
                    warn!(service = %service, %dependency, "Dependency has no running instance, skipping service");
                    let run = ServiceRun::failed(
                        service_plan,
                        &snapshot,
                        ControlPlaneError::DependencyNotRunning {
                            service: service.clone(),
                            dependency,
                        },
                    );
                    results.insert(service.clone(), run);
                    continue;
                }

                let executor = self.clone();
                let plan = plan.clone();
                let snapshot = snapshot.clone();
                let service = service.clone();
                tasks.push(task::spawn(async move {
                    let run = match plan.get(&service) {
                        Some(service_plan) => Some(executor.run_service(service_plan, &snapshot).await),
                        None => None,
                    };
                    (service, run)
                }));
            }

            while let Some(joined) = tasks.next().await {
                match joined {
                    Ok((service, Some(run))) => {
                        results.insert(service, run);
                    }
                    Ok((_, None)) => {}
                    Err(e) => error!(error = %e, "Service task aborted"),
                }
            }

            for service in layer {
                if let (Some(service_plan), false) = (plan.get(service), results.contains_key(service)) {
                    results.insert(
                        service.clone(),
                        ServiceRun::failed(
                            service_plan,
                            &snapshot,
                            ControlPlaneError::StorageError(format!("scaling task for {service} aborted")),
                        ),
                    );
                }
            }
        }

        results
    }

    async fn run_service(&self, plan: &ServicePlan, snapshot: &ApplicationSnapshot) -> ServiceRun {
        let mut run = ServiceRun::new(plan, snapshot);
        if plan.is_noop() {
            debug!(service = %plan.service, replicas = plan.desired, "Service already at desired scale");
            return run;
        }

        info!(
            service = %plan.service,
            current = plan.current.len(),
            desired = plan.desired,
            "Scaling service"
        );

        for (index, _) in &plan.restart {
            let Some(record) = find_record(snapshot, &plan.service, *index) else {
                continue;
            };
            if let Err(e) = self.restart(record, &mut run).await {
                run.error = Some(e);
                return run;
            }
        }

        for index in &plan.create {
            if let Err(e) = self.create_and_start(&plan.service, *index, &mut run).await {
                run.error = Some(e);
                return run;
            }
        }

        for index in &plan.remove {
            let Some(record) = find_record(snapshot, &plan.service, *index) else {
                continue;
            };
            if let Err(e) = self.stop_and_remove(&record.handle, record.status, &mut run).await {
                run.error = Some(e);
                return run;
            }
        }

        run
    }

    async fn create_and_start(&self, service: &str, index: u32, run: &mut ServiceRun) -> ControlPlaneResult<()> {
        let name = instance_name(service, index);
        self.ensure_not_cancelled(service)?;

        let handle = self
            .call(service, Some(index), RuntimeOperation::Create, self.runtime.create_instance(service, index))
            .await
            .map_err(|e| self.fail(&name, RuntimeOperation::Create, e, run))?;
        run.events.record_transition(&name, InstanceStatus::Created);

        if let Err(e) = self
            .call(service, Some(index), RuntimeOperation::Start, self.runtime.start_instance(&handle))
            .await
        {
            let e = self.fail(&name, RuntimeOperation::Start, e, run);
            // Roll back so the index is free for the next run.
            match self
                .call(service, Some(index), RuntimeOperation::Remove, self.runtime.remove_instance(&handle))
                .await
            {
                Ok(()) => run.events.record_transition(&name, InstanceStatus::Removed),
                Err(rollback) => warn!(instance = %name, error = %rollback, "Failed to remove unstarted instance"),
            }
            return Err(e);
        }

        run.events.record_transition(&name, InstanceStatus::Started);
        run.progress.created.push(index);
        run.live += 1;
        run.running += 1;
        if let Some(metrics) = &self.metrics {
            metrics.record_started();
        }
        info!(instance = %name, "Instance started");
        Ok(())
    }

    /// Bring a kept instance that is not running back up. A never-started
    /// instance is started in place; one that is stopping is replaced at the
    /// same index.
    async fn restart(&self, record: &InstanceRecord, run: &mut ServiceRun) -> ControlPlaneResult<()> {
        let handle = &record.handle;
        let name = handle.instance_name();
        let service = handle.service.as_str();

        if record.status == InstanceStatus::Created {
            self.ensure_not_cancelled(service)?;
            self.call(service, Some(handle.index), RuntimeOperation::Start, self.runtime.start_instance(handle))
                .await
                .map_err(|e| self.fail(&name, RuntimeOperation::Start, e, run))?;
            run.events.record_transition(&name, InstanceStatus::Started);
            run.progress.created.push(handle.index);
            run.running += 1;
            if let Some(metrics) = &self.metrics {
                metrics.record_started();
            }
            info!(instance = %name, "Idle instance started");
            return Ok(());
        }

        debug!(instance = %name, status = %record.status, "Replacing idle instance");
        self.stop_and_remove(handle, record.status, run).await?;
        self.create_and_start(service, handle.index, run).await
    }

    async fn stop_and_remove(
        &self,
        handle: &InstanceHandle,
        status: InstanceStatus,
        run: &mut ServiceRun,
    ) -> ControlPlaneResult<()> {
        let name = handle.instance_name();
        let service = handle.service.as_str();
        self.ensure_not_cancelled(service)?;

        if status.is_running() {
            self.call(service, Some(handle.index), RuntimeOperation::Stop, self.runtime.stop_instance(handle))
                .await
                .map_err(|e| self.fail(&name, RuntimeOperation::Stop, e, run))?;
            run.events.record_transition(&name, InstanceStatus::Stopping);
        }

        self.call(service, Some(handle.index), RuntimeOperation::Remove, self.runtime.remove_instance(handle))
            .await
            .map_err(|e| self.fail(&name, RuntimeOperation::Remove, e, run))?;
        run.events.record_transition(&name, InstanceStatus::Removed);
        run.progress.removed.push(handle.index);
        run.live = run.live.saturating_sub(1);
        if status.is_running() {
            run.running = run.running.saturating_sub(1);
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_removed();
        }
        info!(instance = %name, "Instance removed");
        Ok(())
    }

    fn ensure_not_cancelled(&self, service: &str) -> ControlPlaneResult<()> {
        if self.cancel.is_cancelled() {
            info!(service, "Scaling cancelled before next operation");
            return Err(ControlPlaneError::Cancelled(service.to_string()));
        }
        Ok(())
    }

    async fn call<T, F>(
        &self,
        service: &str,
        index: Option<u32>,
        operation: RuntimeOperation,
        fut: F,
    ) -> ControlPlaneResult<T>
    where
        F: Future<Output = RuntimeResult<T>>,
    {
        match tokio::time::timeout(self.operation_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(ControlPlaneError::Infrastructure {
                service: service.to_string(),
                index,
                operation,
                message: e.to_string(),
            }),
            Err(_) => Err(ControlPlaneError::Timeout {
                service: service.to_string(),
                index,
                operation,
            }),
        }
    }

    fn fail(
        &self,
        instance: &str,
        operation: RuntimeOperation,
        error: ControlPlaneError,
        run: &mut ServiceRun,
    ) -> ControlPlaneError {
        error!(%instance, %operation, error = %error, "Runtime operation failed");
        run.events
            .record_failure(instance, &operation.to_string(), &error.to_string());
        if let Some(metrics) = &self.metrics {
            metrics.record_failure(operation);
        }
        error
    }
}

fn find_record<'a>(snapshot: &'a ApplicationSnapshot, service: &str, index: u32) -> Option<&'a InstanceRecord> {
    snapshot
        .instances(service)
        .iter()
        .find(|record| record.index() == index)
}

/// First direct dependency of `service_plan` that was scheduled to run in an
/// earlier layer but ended with no started or running instance.
fn blocking_dependency(
    graph: &DependencyGraph,
    plan: &ScalePlan,
    done: &BTreeMap<String, ServiceRun>,
    service_plan: &ServicePlan,
) -> Option<String> {
    if service_plan.desired == 0 {
        return None;
    }

    graph
        .dependencies_of(&service_plan.service)
        .iter()
        .find(|dependency| {
            let scheduled = plan.desired(dependency).is_some_and(|desired| desired > 0);
            scheduled && done.get(*dependency).is_some_and(|run| run.running == 0)
        })
        .cloned()
}
