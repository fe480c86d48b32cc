use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use crate::shared::types::{InstanceHandle, InstanceRecord, InstanceStatus, RuntimeOperation};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors reported by a container runtime
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("runtime unreachable: {0}")]
    Unreachable(String),
    #[error("no such container: {0}")]
    NotFound(String),
    #[error("container already exists: {0}")]
    Conflict(String),
    #[error("{0}")]
    Failed(String),
}

pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

/// Primitives the control plane needs from the container engine
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Live instances of a service
    async fn list_instances(&self, service: &str) -> RuntimeResult<Vec<InstanceRecord>>;

    /// Create (but do not start) the instance `index` of `service`
    async fn create_instance(&self, service: &str, index: u32) -> RuntimeResult<InstanceHandle>;

    async fn start_instance(&self, handle: &InstanceHandle) -> RuntimeResult<()>;

    async fn stop_instance(&self, handle: &InstanceHandle) -> RuntimeResult<()>;

    /// Remove a stopped or never-started instance and release it
    async fn remove_instance(&self, handle: &InstanceHandle) -> RuntimeResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Fault {
    operation: RuntimeOperation,
    service: String,
    index: Option<u32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    instances: Vec<InstanceRecord>,
}

type InstanceTable = BTreeMap<String, BTreeMap<u32, InstanceRecord>>;

/// In-memory container engine.
///
/// State can be persisted to a JSON file so separate CLI invocations observe
/// each other. Faults and latency can be injected for tests.
#[derive(Clone, Default)]
pub struct InMemoryContainerRuntime {
    storage: Arc<RwLock<InstanceTable>>,
    faults: Arc<RwLock<Vec<Fault>>>,
    calls: Arc<RwLock<Vec<(RuntimeOperation, String)>>>,
    unreachable: Arc<AtomicBool>,
    latency: Vec<(RuntimeOperation, Duration)>,
    state_file: Option<PathBuf>,
}

impl InMemoryContainerRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a runtime backed by `path`, loading any state already there.
    pub fn with_state_file(path: impl Into<PathBuf>) -> ControlPlaneResult<Self> {
        let path = path.into();
        let mut table = InstanceTable::new();

        if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| ControlPlaneError::StorageError(format!("{}: {e}", path.display())))?;
            let state: PersistedState = serde_json::from_str(&raw)
                .map_err(|e| ControlPlaneError::StorageError(format!("{}: {e}", path.display())))?;
            for record in state.instances {
                table
                    .entry(record.handle.service.clone())
                    .or_default()
                    .insert(record.handle.index, record);
            }
        }

        Ok(Self {
            storage: Arc::new(RwLock::new(table)),
            state_file: Some(path),
            ..Self::default()
        })
    }

    /// Delay every `operation` call by `latency` before it takes effect.
    pub fn with_latency(mut self, operation: RuntimeOperation, latency: Duration) -> Self {
        self.latency.push((operation, latency));
        self
    }

    /// Bring up `count` running instances of `service`, indices `1..=count`.
    pub fn seed(&self, service: &str, count: u32) -> ControlPlaneResult<()> {
        let mut storage = self.write_storage()?;
        let instances = storage.entry(service.to_string()).or_default();
        for index in 1..=count {
            instances.insert(
                index,
                InstanceRecord::new(InstanceHandle::new(service, index), InstanceStatus::Running),
            );
        }
        self.persist(&storage)
    }

    /// Make the next matching call fail. `index: None` matches every index.
    pub fn fail_on(&self, operation: RuntimeOperation, service: &str, index: Option<u32>) {
        if let Ok(mut faults) = self.faults.write() {
            faults.push(Fault {
                operation,
                service: service.to_string(),
                index,
            });
        }
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Live indices of `service`, ascending.
    pub fn live_indices(&self, service: &str) -> Vec<u32> {
        self.storage
            .read()
            .map(|storage| {
                storage
                    .get(service)
                    .map(|instances| instances.keys().copied().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Mutating calls in the order they reached the runtime, as
    /// `(operation, "<service>-<index>")`.
    pub fn calls(&self) -> Vec<(RuntimeOperation, String)> {
        self.calls.read().map(|calls| calls.clone()).unwrap_or_default()
    }

    async fn enter(&self, operation: RuntimeOperation, service: &str, index: Option<u32>) -> RuntimeResult<()> {
        if let Some((_, latency)) = self.latency.iter().find(|(op, _)| *op == operation) {
            tokio::time::sleep(*latency).await;
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(RuntimeError::Unreachable("connection refused".to_string()));
        }

        let mut faults = self
            .faults
            .write()
            .map_err(|_| RuntimeError::Failed("Lock poisoned".to_string()))?;
        let matching = faults.iter().position(|fault| {
            fault.operation == operation
                && fault.service == service
                && (fault.index.is_none() || fault.index == index)
        });
        if let Some(position) = matching {
            faults.remove(position);
            return Err(RuntimeError::Failed(format!("injected {operation} failure")));
        }
        drop(faults);

        if operation != RuntimeOperation::List {
            if let (Ok(mut calls), Some(index)) = (self.calls.write(), index) {
                calls.push((operation, flotilla_core::instance_name(service, index)));
            }
        }
        Ok(())
    }

    fn write_storage(&self) -> ControlPlaneResult<std::sync::RwLockWriteGuard<'_, InstanceTable>> {
        self.storage
            .write()
            .map_err(|_| ControlPlaneError::StorageError("Lock poisoned".to_string()))
    }

    fn persist(&self, storage: &InstanceTable) -> ControlPlaneResult<()> {
        let Some(path) = &self.state_file else {
            return Ok(());
        };
        let state = PersistedState {
            instances: storage
                .values()
                .flat_map(|instances| instances.values().cloned())
                .collect(),
        };
        write_state(path, &state)
    }

    /// Apply `apply` to a copy of the table and keep it only once it has
    /// been persisted.
    fn commit<T, F>(&self, apply: F) -> RuntimeResult<T>
    where
        F: FnOnce(&mut InstanceTable) -> RuntimeResult<T>,
    {
        let mut storage = self
            .storage
            .write()
            .map_err(|_| RuntimeError::Failed("Lock poisoned".to_string()))?;
        let mut next = storage.clone();
        let value = apply(&mut next)?;
        self.persist(&next)
            .map_err(|e| RuntimeError::Failed(e.to_string()))?;
        *storage = next;
        Ok(value)
    }

    fn update<F>(&self, handle: &InstanceHandle, apply: F) -> RuntimeResult<()>
    where
        F: FnOnce(&mut InstanceRecord) -> RuntimeResult<bool>,
    {
        self.commit(|table| {
            let instances = table
                .get_mut(&handle.service)
                .ok_or_else(|| RuntimeError::NotFound(handle.instance_name()))?;
            let record = instances
                .get_mut(&handle.index)
                .filter(|record| record.handle.container_id == handle.container_id)
                .ok_or_else(|| RuntimeError::NotFound(handle.instance_name()))?;

            if apply(record)? {
                instances.remove(&handle.index);
            }
            Ok(())
        })
    }
}

fn write_state(path: &Path, state: &PersistedState) -> ControlPlaneResult<()> {
    let raw = serde_json::to_string_pretty(state)
        .map_err(|e| ControlPlaneError::StorageError(e.to_string()))?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, raw)
        .and_then(|_| std::fs::rename(&tmp, path))
        .map_err(|e| ControlPlaneError::StorageError(format!("{}: {e}", path.display())))
}

fn transition(record: &mut InstanceRecord, next: InstanceStatus) -> RuntimeResult<()> {
    record
        .transition(next)
        .map_err(|e| RuntimeError::Failed(e.to_string()))
}

#[async_trait]
impl ContainerRuntime for InMemoryContainerRuntime {
    async fn list_instances(&self, service: &str) -> RuntimeResult<Vec<InstanceRecord>> {
        self.enter(RuntimeOperation::List, service, None).await?;
        let storage = self
            .storage
            .read()
            .map_err(|_| RuntimeError::Failed("Lock poisoned".to_string()))?;
        Ok(storage
            .get(service)
            .map(|instances| instances.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn create_instance(&self, service: &str, index: u32) -> RuntimeResult<InstanceHandle> {
        self.enter(RuntimeOperation::Create, service, Some(index)).await?;
        let handle = self.commit(|table| {
            let instances = table.entry(service.to_string()).or_default();
            if instances.contains_key(&index) {
                return Err(RuntimeError::Conflict(flotilla_core::instance_name(service, index)));
            }
            let handle = InstanceHandle::new(service, index);
            instances.insert(index, InstanceRecord::new(handle.clone(), InstanceStatus::Created));
            Ok(handle)
        })?;
        debug!(service, index, container_id = %handle.container_id, "Container created");
        Ok(handle)
    }

    async fn start_instance(&self, handle: &InstanceHandle) -> RuntimeResult<()> {
        self.enter(RuntimeOperation::Start, &handle.service, Some(handle.index))
            .await?;
        self.update(handle, |record| {
            transition(record, InstanceStatus::Started)?;
            transition(record, InstanceStatus::Running)?;
            Ok(false)
        })
    }

    async fn stop_instance(&self, handle: &InstanceHandle) -> RuntimeResult<()> {
        self.enter(RuntimeOperation::Stop, &handle.service, Some(handle.index))
            .await?;
        self.update(handle, |record| {
            transition(record, InstanceStatus::Stopping)?;
            Ok(false)
        })
    }

    async fn remove_instance(&self, handle: &InstanceHandle) -> RuntimeResult<()> {
        self.enter(RuntimeOperation::Remove, &handle.service, Some(handle.index))
            .await?;
        self.update(handle, |record| {
            transition(record, InstanceStatus::Removed)?;
            Ok(true)
        })
    }
}
