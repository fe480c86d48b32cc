//! Diff planning: desired replica counts against a snapshot.
//!
//! Surviving instances always form the prefix `1..=desired`. New instances
//! fill the lowest free indices in that range, removals take everything above
//! it, highest index first. Surviving instances that are not running are
//! brought back up in place.

use std::collections::BTreeMap;

use crate::{ApplicationSnapshot, InstanceStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePlan {
    pub service: String,
    pub desired: u32,
    /// Live indices at snapshot time, ascending.
    pub current: Vec<u32>,
    /// Indices to create and start, ascending.
    pub create: Vec<u32>,
    /// Indices to stop and remove, descending.
    pub remove: Vec<u32>,
    /// Kept indices whose instance is neither started nor running, with the
    /// status seen at snapshot time. Ascending.
    pub restart: Vec<(u32, InstanceStatus)>,
}

impl ServicePlan {
    pub fn compute(service: impl Into<String>, desired: u32, mut current: Vec<u32>) -> Self {
        current.sort_unstable();
        current.dedup();

        let create = (1..=desired)
            .filter(|index| current.binary_search(index).is_err())
            .collect();
        let remove = current
            .iter()
            .rev()
            .copied()
            .filter(|index| *index > desired)
            .collect();

        Self {
            service: service.into(),
            desired,
            current,
            create,
            remove,
            restart: Vec::new(),
        }
    }

    /// Schedule every kept index listed in `statuses` that is not running
    /// for a restart. Entries for removed or unknown indices are ignored.
    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = (u32, InstanceStatus)>) -> Self {
        let mut restart: Vec<(u32, InstanceStatus)> = statuses
            .into_iter()
            .filter(|(index, status)| {
                !status.is_running()
                    && *index <= self.desired
                    && self.current.binary_search(index).is_ok()
            })
            .collect();
        restart.sort_unstable_by_key(|(index, _)| *index);
        restart.dedup_by_key(|(index, _)| *index);
        self.restart = restart;
        self
    }

    pub fn is_noop(&self) -> bool {
        self.create.is_empty() && self.remove.is_empty() && self.restart.is_empty()
    }

    /// Snapshot status of a kept index that is scheduled for a restart.
    pub fn idle_status(&self, index: u32) -> Option<InstanceStatus> {
        self.restart
            .iter()
            .find(|(idle, _)| *idle == index)
            .map(|(_, status)| *status)
    }

    /// Pre-existing indices that survive the plan.
    pub fn kept(&self) -> impl Iterator<Item = u32> + '_ {
        self.current.iter().copied().filter(|index| *index <= self.desired)
    }

    pub fn operation_count(&self) -> usize {
        self.create.len() + self.remove.len() + self.restart.len()
    }
}

/// Immutable work list for one scale operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScalePlan {
    services: BTreeMap<String, ServicePlan>,
}

impl ScalePlan {
    /// Plan every service in `targets`. Services absent from `targets` are
    /// never part of the plan, whatever their current state.
    pub fn compute(targets: &BTreeMap<String, u32>, snapshot: &ApplicationSnapshot) -> Self {
        let services = targets
            .iter()
            .map(|(service, desired)| {
                let records = snapshot.instances(service);
                let plan = ServicePlan::compute(service.clone(), *desired, snapshot.live_indices(service))
                    .with_statuses(records.iter().map(|record| (record.index(), record.status)));
                (service.clone(), plan)
            })
            .collect();
        Self { services }
    }

    pub fn get(&self, service: &str) -> Option<&ServicePlan> {
        self.services.get(service)
    }

    pub fn services(&self) -> impl Iterator<Item = &ServicePlan> {
        self.services.values()
    }

    pub fn service_names(&self) -> impl Iterator<Item = &String> {
        self.services.keys()
    }

    pub fn desired(&self, service: &str) -> Option<u32> {
        self.services.get(service).map(|plan| plan.desired)
    }

    pub fn operation_count(&self) -> usize {
        self.services.values().map(ServicePlan::operation_count).sum()
    }

    pub fn is_noop(&self) -> bool {
        self.services.values().all(ServicePlan::is_noop)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InstanceHandle, InstanceRecord};
    use proptest::prelude::*;

    #[test]
    fn test_scale_up_creates_next_indices() {
        let plan = ServicePlan::compute("dbadmin", 2, vec![1]);
        assert_eq!(plan.create, vec![2]);
        assert!(plan.remove.is_empty());
        assert_eq!(plan.kept().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_scale_down_removes_highest_first() {
        let plan = ServicePlan::compute("front", 1, vec![1, 2, 3]);
        assert!(plan.create.is_empty());
        assert_eq!(plan.remove, vec![3, 2]);
    }

    #[test]
    fn test_same_count_is_noop() {
        let plan = ServicePlan::compute("back", 2, vec![1, 2]);
        assert!(plan.is_noop());
        assert_eq!(plan.kept().count(), 2);
    }

    #[test]
    fn test_scale_to_zero_removes_everything() {
        let plan = ServicePlan::compute("dbadmin", 0, vec![1, 2]);
        assert_eq!(plan.remove, vec![2, 1]);
        assert!(plan.create.is_empty());
        assert_eq!(plan.kept().count(), 0);
    }

    #[test]
    fn test_sparse_indices_are_repaired() {
        let plan = ServicePlan::compute("web", 3, vec![1, 3, 5]);
        assert_eq!(plan.create, vec![2]);
        assert_eq!(plan.remove, vec![5]);
    }

    #[test]
    fn test_untargeted_services_are_not_planned() {
        let snapshot = ApplicationSnapshot::new()
            .with_service(
                "db",
                vec![InstanceRecord::new(InstanceHandle::new("db", 1), InstanceStatus::Running)],
            );
        let targets = BTreeMap::from([("front".to_string(), 2)]);
        let plan = ScalePlan::compute(&targets, &snapshot);

        assert_eq!(plan.len(), 1);
        assert!(plan.get("db").is_none());
        assert_eq!(plan.get("front").unwrap().create, vec![1, 2]);
        assert_eq!(plan.operation_count(), 2);
    }

    #[test]
    fn test_idle_survivors_are_restarted() {
        let snapshot = ApplicationSnapshot::new().with_service(
            "db",
            vec![
                InstanceRecord::new(InstanceHandle::new("db", 1), InstanceStatus::Stopping),
                InstanceRecord::new(InstanceHandle::new("db", 2), InstanceStatus::Running),
                InstanceRecord::new(InstanceHandle::new("db", 3), InstanceStatus::Created),
            ],
        );
        let targets = BTreeMap::from([("db".to_string(), 2)]);
        let plan = ScalePlan::compute(&targets, &snapshot);
        let db = plan.get("db").unwrap();

        // db-3 goes away, so only db-1 needs bringing back
        assert_eq!(db.restart, vec![(1, InstanceStatus::Stopping)]);
        assert_eq!(db.remove, vec![3]);
        assert_eq!(db.idle_status(1), Some(InstanceStatus::Stopping));
        assert_eq!(db.idle_status(2), None);
        assert!(!db.is_noop());
        assert_eq!(plan.operation_count(), 2);
    }

    #[test]
    fn test_running_survivors_stay_noop() {
        let plan = ServicePlan::compute("back", 2, vec![1, 2])
            .with_statuses([(1, InstanceStatus::Running), (2, InstanceStatus::Started)]);
        assert!(plan.restart.is_empty());
        assert!(plan.is_noop());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn property_survivors_are_contiguous_prefix(
            current in prop::collection::btree_set(1u32..20, 0..12),
            desired in 0u32..20,
        ) {
            let current: Vec<u32> = current.into_iter().collect();
            let plan = ServicePlan::compute("svc", desired, current.clone());

            let mut live: Vec<u32> = current
                .iter()
                .copied()
                .filter(|index| !plan.remove.contains(index))
                .chain(plan.create.iter().copied())
                .collect();
            live.sort_unstable();

            prop_assert_eq!(live, (1..=desired).collect::<Vec<_>>());
            prop_assert!(plan.remove.windows(2).all(|w| w[0] > w[1]));
            prop_assert!(plan.create.windows(2).all(|w| w[0] < w[1]));
        }

        #[test]
        fn property_contiguous_scale_touches_only_the_difference(
            current in 0u32..15,
            desired in 0u32..15,
        ) {
            let plan = ServicePlan::compute("svc", desired, (1..=current).collect());
            if desired >= current {
                prop_assert_eq!(plan.create, (current + 1..=desired).collect::<Vec<_>>());
                prop_assert!(plan.remove.is_empty());
            } else {
                prop_assert_eq!(plan.remove, (desired + 1..=current).rev().collect::<Vec<_>>());
                prop_assert!(plan.create.is_empty());
            }
        }
    }
}
