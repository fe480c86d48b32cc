//! Classification of instances into observable lifecycle labels.

use serde::{Deserialize, Serialize};

use crate::{instance_name, InstanceStatus, ServicePlan};

/// One `(service-index, label)` entry of a scale report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusLine {
    pub service: String,
    pub index: u32,
    pub label: InstanceStatus,
}

impl StatusLine {
    pub fn instance_name(&self) -> String {
        instance_name(&self.service, self.index)
    }

    /// Lines that belong on the primary output stream.
    pub fn is_live(&self) -> bool {
        self.label.is_running()
    }
}

/// What the executor actually achieved for one service. May be a prefix of
/// the plan when a runtime call failed or the operation was cancelled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceProgress {
    pub created: Vec<u32>,
    pub removed: Vec<u32>,
}

impl ServiceProgress {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.removed.is_empty()
    }
}

/// Accumulates status lines service by service, in processing order.
#[derive(Debug, Default)]
pub struct StateReporter {
    lines: Vec<StatusLine>,
}

impl StateReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify every instance of `plan.service` touched or kept by the
    /// operation. Indices are reported ascending.
    ///
    /// A kept index brought back up shows as `Started`. One that is still
    /// idle keeps its snapshot status.
    pub fn record(&mut self, plan: &ServicePlan, progress: &ServiceProgress) {
        let mut entries: Vec<(u32, InstanceStatus)> = plan
            .current
            .iter()
            .copied()
            .filter(|index| !progress.created.contains(index))
            .map(|index| {
                if progress.removed.contains(&index) {
                    (index, InstanceStatus::Removed)
                } else {
                    (index, plan.idle_status(index).unwrap_or(InstanceStatus::Running))
                }
            })
            .chain(
                progress
                    .created
                    .iter()
                    .copied()
                    .map(|index| (index, InstanceStatus::Started)),
            )
            .collect();
        entries.sort_by_key(|(index, _)| *index);

        self.lines.extend(entries.into_iter().map(|(index, label)| StatusLine {
            service: plan.service.clone(),
            index,
            label,
        }));
    }

    pub fn lines(&self) -> &[StatusLine] {
        &self.lines
    }

    pub fn finish(self) -> Vec<StatusLine> {
        self.lines
    }
}
