//! Point-in-time view of an application's live instances.
//!
//! The inspector builds one snapshot per operation; planning reads only from
//! it, so the plan cannot observe mutations made while it is being executed.

use std::collections::BTreeMap;

use crate::InstanceRecord;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplicationSnapshot {
    services: BTreeMap<String, Vec<InstanceRecord>>,
}

impl ApplicationSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert the instances of one service. Removed instances are dropped and
    /// the rest kept in ascending index order.
    pub fn insert(&mut self, service: impl Into<String>, mut instances: Vec<InstanceRecord>) {
        instances.retain(|record| record.status.is_live());
        instances.sort_by_key(|record| record.index());
        instances.dedup_by_key(|record| record.index());
        self.services.insert(service.into(), instances);
    }

    pub fn with_service(mut self, service: impl Into<String>, instances: Vec<InstanceRecord>) -> Self {
        self.insert(service, instances);
        self
    }

    pub fn instances(&self, service: &str) -> &[InstanceRecord] {
        self.services
            .get(service)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn live_indices(&self, service: &str) -> Vec<u32> {
        self.instances(service).iter().map(InstanceRecord::index).collect()
    }

    pub fn live_count(&self, service: &str) -> u32 {
        self.instances(service).len() as u32
    }

    /// Instances that are `Started` or `Running`.
    pub fn running_count(&self, service: &str) -> u32 {
        self.instances(service)
            .iter()
            .filter(|record| record.status.is_running())
            .count() as u32
    }

    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.services.values().all(Vec::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InstanceHandle, InstanceStatus};

    fn record(service: &str, index: u32, status: InstanceStatus) -> InstanceRecord {
        InstanceRecord::new(InstanceHandle::new(service, index), status)
    }

    #[test]
    fn test_insert_orders_and_filters_removed() {
        let snapshot = ApplicationSnapshot::new().with_service(
            "web",
            vec![
                record("web", 3, InstanceStatus::Running),
                record("web", 1, InstanceStatus::Running),
                record("web", 2, InstanceStatus::Removed),
            ],
        );

        assert_eq!(snapshot.live_indices("web"), vec![1, 3]);
        assert_eq!(snapshot.live_count("web"), 2);
    }

    #[test]
    fn test_running_count_skips_idle_instances() {
        let snapshot = ApplicationSnapshot::new().with_service(
            "db",
            vec![
                record("db", 1, InstanceStatus::Stopping),
                record("db", 2, InstanceStatus::Running),
                record("db", 3, InstanceStatus::Created),
            ],
        );

        assert_eq!(snapshot.live_count("db"), 3);
        assert_eq!(snapshot.running_count("db"), 1);
    }

    #[test]
    fn test_unknown_service_is_empty() {
        let snapshot = ApplicationSnapshot::new();
        assert!(snapshot.instances("db").is_empty());
        assert_eq!(snapshot.live_count("db"), 0);
        assert_eq!(snapshot.running_count("db"), 0);
        assert!(snapshot.is_empty());
    }
}
