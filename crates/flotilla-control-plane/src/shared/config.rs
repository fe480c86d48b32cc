use std::path::{Path, PathBuf};
use std::time::Duration;

use flotilla_core::DependencyMode;

use crate::shared::error::{ControlPlaneError, ControlPlaneResult};

pub const DEFAULT_PROJECT_FILE: &str = "flotilla.yaml";
pub const STATE_FILE_NAME: &str = ".flotilla-state.json";
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 60;

/// Control plane settings, resolved from the environment and then
/// overridden by command line flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub project_directory: PathBuf,
    pub project_name: String,
    pub project_file: PathBuf,
    pub state_file: PathBuf,
    pub operation_timeout: Duration,
    pub dependency_mode: DependencyMode,
}

impl Config {
    pub fn from_env() -> ControlPlaneResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> ControlPlaneResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let project_directory = lookup("FLOTILLA_PROJECT_DIRECTORY")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let project_name = lookup("FLOTILLA_PROJECT_NAME").or_else(|| lookup("COMPOSE_PROJECT_NAME"));

        let project_file = lookup("FLOTILLA_PROJECT_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PROJECT_FILE));

        let operation_timeout = match lookup("FLOTILLA_OP_TIMEOUT_SECS") {
            Some(raw) => parse_timeout(&raw)?,
            None => Duration::from_secs(DEFAULT_OPERATION_TIMEOUT_SECS),
        };

        let dependency_mode = match lookup("FLOTILLA_DEPENDENCY_MODE") {
            Some(raw) => raw
                .parse::<DependencyMode>()
                .map_err(|e| ControlPlaneError::ConfigError(e.to_string()))?,
            None => DependencyMode::default(),
        };

        let mut config = Self {
            state_file: project_directory.join(STATE_FILE_NAME),
            project_name: String::new(),
            project_directory,
            project_file,
            operation_timeout,
            dependency_mode,
        };
        config.project_name = match project_name {
            Some(name) => normalize_project_name(&name)?,
            None => config.default_project_name()?,
        };
        Ok(config)
    }

    /// Point the config at another project directory, moving the derived
    /// paths with it.
    pub fn with_project_directory(mut self, directory: impl Into<PathBuf>) -> ControlPlaneResult<Self> {
        let previous_default = self.default_project_name().ok();
        self.project_directory = directory.into();
        self.state_file = self.project_directory.join(STATE_FILE_NAME);
        if previous_default.as_deref() == Some(self.project_name.as_str()) {
            self.project_name = self.default_project_name()?;
        }
        Ok(self)
    }

    pub fn with_project_name(mut self, name: &str) -> ControlPlaneResult<Self> {
        self.project_name = normalize_project_name(name)?;
        Ok(self)
    }

    pub fn with_project_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.project_file = file.into();
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

    /// Project file path, resolved against the project directory.
    pub fn project_file_path(&self) -> PathBuf {
        if self.project_file.is_absolute() {
            self.project_file.clone()
        } else {
            self.project_directory.join(&self.project_file)
        }
    }

    fn default_project_name(&self) -> ControlPlaneResult<String> {
        let directory = absolute(&self.project_directory);
        let name = directory
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                ControlPlaneError::ConfigError(format!(
                    "cannot derive a project name from {}",
                    directory.display()
                ))
            })?;
        normalize_project_name(name)
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
        .components()
        .filter(|c| !matches!(c, std::path::Component::CurDir))
        .collect()
}

fn parse_timeout(raw: &str) -> ControlPlaneResult<Duration> {
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => Err(ControlPlaneError::ConfigError(format!(
            "FLOTILLA_OP_TIMEOUT_SECS must be a positive integer, got {raw:?}"
        ))),
        Ok(secs) => Ok(Duration::from_secs(secs)),
    }
}

/// Lowercase `name` and drop characters not allowed in container names.
pub fn normalize_project_name(name: &str) -> ControlPlaneResult<String> {
    let normalized: String = name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    let normalized = normalized.trim_start_matches(['-', '_']).to_string();

    if normalized.is_empty() {
        return Err(ControlPlaneError::ConfigError(format!(
            "project name {name:?} has no usable characters"
        )));
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[("FLOTILLA_PROJECT_DIRECTORY", "/srv/My App")])).unwrap();
        assert_eq!(config.project_name, "myapp");
        assert_eq!(config.project_file_path(), PathBuf::from("/srv/My App/flotilla.yaml"));
        assert_eq!(config.state_file, PathBuf::from("/srv/My App/.flotilla-state.json"));
        assert_eq!(config.operation_timeout, Duration::from_secs(60));
        assert_eq!(config.dependency_mode, DependencyMode::EnsureRunning);
    }

    #[test]
    fn test_compose_project_name_fallback() {
        let config = Config::from_lookup(lookup(&[
            ("FLOTILLA_PROJECT_DIRECTORY", "/srv/app"),
            ("COMPOSE_PROJECT_NAME", "scale-basic-tests"),
        ]))
        .unwrap();
        assert_eq!(config.project_name, "scale-basic-tests");

        let config = Config::from_lookup(lookup(&[
            ("FLOTILLA_PROJECT_DIRECTORY", "/srv/app"),
            ("COMPOSE_PROJECT_NAME", "ignored"),
            ("FLOTILLA_PROJECT_NAME", "Primary"),
        ]))
        .unwrap();
        assert_eq!(config.project_name, "primary");
    }

    #[test]
    fn test_timeout_and_mode_from_env() {
        let config = Config::from_lookup(lookup(&[
            ("FLOTILLA_PROJECT_DIRECTORY", "/srv/app"),
            ("FLOTILLA_OP_TIMEOUT_SECS", "5"),
            ("FLOTILLA_DEPENDENCY_MODE", "converge-to-default"),
        ]))
        .unwrap();
        assert_eq!(config.operation_timeout, Duration::from_secs(5));
        assert_eq!(config.dependency_mode, DependencyMode::ConvergeToDefault);
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        for (key, value) in [
            ("FLOTILLA_OP_TIMEOUT_SECS", "0"),
            ("FLOTILLA_OP_TIMEOUT_SECS", "soon"),
            ("FLOTILLA_DEPENDENCY_MODE", "sometimes"),
        ] {
            let result = Config::from_lookup(lookup(&[("FLOTILLA_PROJECT_DIRECTORY", "/srv/app"), (key, value)]));
            assert!(matches!(result, Err(ControlPlaneError::ConfigError(_))), "{key}={value}");
        }
    }

    #[test]
    fn test_project_directory_override_moves_defaults() {
        let config = Config::from_lookup(lookup(&[("FLOTILLA_PROJECT_DIRECTORY", "/srv/app")]))
            .unwrap()
            .with_project_directory("/srv/scale")
            .unwrap();
        assert_eq!(config.project_name, "scale");
        assert_eq!(config.state_file, PathBuf::from("/srv/scale/.flotilla-state.json"));

        let named = Config::from_lookup(lookup(&[
            ("FLOTILLA_PROJECT_DIRECTORY", "/srv/app"),
            ("COMPOSE_PROJECT_NAME", "pinned"),
        ]))
        .unwrap()
        .with_project_directory("/srv/scale")
        .unwrap();
        assert_eq!(named.project_name, "pinned");
    }

    #[test]
    fn test_normalize_project_name() {
        assert_eq!(normalize_project_name("Scale_Tests.v2").unwrap(), "scale_testsv2");
        assert_eq!(normalize_project_name("-x").unwrap(), "x");
        assert!(normalize_project_name("...").is_err());
    }
}
