//! Turns raw `service=count` arguments into a validated scale request.

use std::collections::{BTreeMap, HashSet};

use crate::{CoreError, Result, ServiceDefinition};

/// Validated scaling targets. Only services named by the caller appear here;
/// dependency expansion happens later, against a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScaleRequest {
    pub targets: BTreeMap<String, u32>,
    pub no_deps: bool,
}

impl ScaleRequest {
    /// Parse and validate `entries` against the declared `services`.
    pub fn resolve<S: AsRef<str>>(
        entries: &[S],
        no_deps: bool,
        services: &[ServiceDefinition],
    ) -> Result<Self> {
        if entries.is_empty() {
            return Err(CoreError::InvalidArgument(
                "at least one SERVICE=REPLICAS pair is required".to_string(),
            ));
        }

        let declared: HashSet<&str> = services.iter().map(|s| s.name.as_str()).collect();
        let mut targets = BTreeMap::new();

        for entry in entries {
            let (service, count) = parse_scale_entry(entry.as_ref())?;
            if !declared.contains(service.as_str()) {
                return Err(CoreError::UnknownService(service));
            }
            if targets.insert(service.clone(), count).is_some() {
                return Err(CoreError::InvalidArgument(format!(
                    "service {service} is listed more than once"
                )));
            }
        }

        Ok(Self { targets, no_deps })
    }

    pub fn target(&self, service: &str) -> Option<u32> {
        self.targets.get(service).copied()
    }
}

/// Split one `service=count` argument.
pub fn parse_scale_entry(entry: &str) -> Result<(String, u32)> {
    let (service, count) = entry.split_once('=').ok_or_else(|| {
        CoreError::InvalidArgument(format!("invalid scale specifier {entry:?}, expected SERVICE=REPLICAS"))
    })?;

    let service = service.trim();
    if service.is_empty() {
        return Err(CoreError::InvalidArgument(format!(
            "invalid scale specifier {entry:?}, service name is empty"
        )));
    }

    let count = count.trim().parse::<u32>().map_err(|_| {
        CoreError::InvalidArgument(format!(
            "invalid replica count {count:?} for service {service}, expected a non-negative integer"
        ))
    })?;

    Ok((service.to_string(), count))
}
