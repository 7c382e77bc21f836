use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    env,
    fs::{self, File},
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
    time::Duration,
};
use sysinfo::System;
use thiserror::Error;
use tracing::{debug, error, warn};

/// default share of the system memory the scheduler may commit
pub const DEFAULT_RAM_FRACTION: f64 = 0.8;
/// default delay between launches and between completion checks, in seconds
pub const DEFAULT_DELAY: f64 = 5.0;

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Failed to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to read sweep file {path:?}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Filename format '{template}' references unknown keyword '{key}'")]
    MissingFormatKey { key: String, template: String },
    #[error("Filename format '{0}' is neither 'input_file' nor a deck keyword")]
    UnknownFormatTarget(String),
    #[error("No 'input_file' filename format was given, unable to name the deck")]
    MissingInputFile,
    #[error("Executable {0:?} was not found and no default solver is available")]
    MissingExecutable(PathBuf),
    #[error("Invalid executor setting: {0}")]
    InvalidSetting(String),
    #[error("Invalid value for parameter '{key}': {reason}")]
    InvalidParameter { key: String, reason: String },
    #[error("Globs were invalid")]
    InvalidGlob(#[from] globset::Error),
    #[error("Map reference '{0}' matched no files")]
    NoMapsMatched(String),
}

/// check if a file is executable
pub fn check_executable(path: &Path) -> Result<bool, ConfigErrors> {
    match File::open(path).and_then(|file| file.metadata()) {
        Ok(metadata) => Ok(metadata.is_file() && (metadata.mode() & 0o111) != 0),
        Err(source) => Err(ConfigErrors::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Find an executable either as an existing file or, for bare names, on `PATH`.
pub fn locate_executable(path: &Path) -> Option<PathBuf> {
    if path.is_file() {
        return Some(path.to_path_buf());
    }

    if path.components().count() != 1 {
        return None;
    }

    env::var_os("PATH").and_then(|paths| {
        env::split_paths(&paths)
            .map(|dir| dir.join(path))
            .find(|candidate| candidate.is_file())
    })
}

/// Explicit limits for a scheduler run.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    /// maximum number of concurrently running solvers
    pub cpu_limit: usize,
    /// RAM in GB that all running solvers together may reserve
    pub ram_budget: f64,
    /// minimum interval between two launches
    pub spawn_delay: Duration,
    /// interval between two completion scans
    pub retest_delay: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            cpu_limit: num_cpus::get(),
            ram_budget: system_ram() * DEFAULT_RAM_FRACTION,
            spawn_delay: Duration::from_secs_f64(DEFAULT_DELAY),
            retest_delay: Duration::from_secs_f64(DEFAULT_DELAY),
        }
    }
}

/// total system memory in GB
pub fn system_ram() -> f64 {
    let mut system = System::new();
    system.refresh_memory();

    system.total_memory() as f64 / f64::from(1u32 << 30)
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    // Name of the selected executor, see Executors::load for the selection proccess
    #[serde(default = "default_executor")]
    pub name: String,
    /// number of CPUs, defaults to all logical CPUs
    pub cpus: Option<usize>,
    /// RAM budget in GB, defaults to `ram_fraction` of the system memory
    pub ram: Option<f64>,
    #[serde(default = "default_ram_fraction")]
    pub ram_fraction: f64,
    #[serde(default = "default_delay")]
    pub spawn_delay: f64,
    #[serde(default = "default_delay")]
    pub retest_delay: f64,
    /// pass solver output through instead of capturing it
    #[serde(default)]
    pub show_output: bool,
    /// keep jobs whose RAM estimate exceeds the budget instead of failing
    #[serde(default)]
    pub suppress_ram_errors: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            name: default_executor(),
            cpus: None,
            ram: None,
            ram_fraction: default_ram_fraction(),
            spawn_delay: default_delay(),
            retest_delay: default_delay(),
            show_output: false,
            suppress_ram_errors: false,
        }
    }
}

impl ExecutorConfig {
    /// validate and turn into scheduler settings
    pub fn settings(&self) -> Result<SchedulerSettings, ConfigErrors> {
        let cpu_limit = self.cpus.unwrap_or_else(num_cpus::get);
        if cpu_limit == 0 {
            return Err(ConfigErrors::InvalidSetting(
                "executor.cpus must be at least 1".to_string(),
            ));
        }

        if !(self.ram_fraction > 0.0 && self.ram_fraction <= 1.0) {
            return Err(ConfigErrors::InvalidSetting(format!(
                "executor.ram_fraction must be in (0, 1], got {}",
                self.ram_fraction
            )));
        }

        let ram_budget = match self.ram {
            Some(ram) => ram,
            None => system_ram() * self.ram_fraction,
        };
        if !(ram_budget.is_finite() && ram_budget > 0.0) {
            return Err(ConfigErrors::InvalidSetting(format!(
                "executor.ram must be a positive number of GB, got {ram_budget}"
            )));
        }

        Ok(SchedulerSettings {
            cpu_limit,
            ram_budget,
            spawn_delay: delay("spawn_delay", self.spawn_delay)?,
            retest_delay: delay("retest_delay", self.retest_delay)?,
        })
    }
}

fn delay(name: &str, seconds: f64) -> Result<Duration, ConfigErrors> {
    Duration::try_from_secs_f64(seconds).map_err(|_| {
        ConfigErrors::InvalidSetting(format!(
            "executor.{name} must be a non-negative number of seconds, got {seconds}"
        ))
    })
}

/// parameter and filename format defaults shared by all maps
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct DefaultsConfig {
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_yaml::Value>,
    #[serde(default)]
    pub formats: BTreeMap<String, String>,
}

/// one aperture map reference with its overrides
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct MapConfig {
    /// a path or a glob, relative to the sweep file
    #[serde(alias = "map")]
    pub path: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_yaml::Value>,
    #[serde(default)]
    pub formats: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct SweepConfig {
    /// template deck every job is cloned from
    pub template: PathBuf,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    pub maps: Vec<MapConfig>,
    pub case_identifier: Option<String>,
    #[serde(default)]
    pub case_parameters: BTreeMap<String, BTreeMap<String, serde_yaml::Value>>,

    // directory relative paths are resolved against
    #[serde(default, skip)]
    pub base_dir: PathBuf,
}

impl SweepConfig {
    /// load a sweep file, relative paths resolve against its directory
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        let content = fs::read_to_string(path).map_err(|source| ConfigErrors::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self =
            serde_yaml::from_str(&content).map_err(|source| ConfigErrors::Yaml {
                path: path.to_path_buf(),
                source,
            })?;

        config.base_dir = path.parent().unwrap_or(Path::new("")).to_path_buf();
        debug!(sweep = ?path, maps = config.maps.len(), "Loaded sweep file");

        Ok(config)
    }

    pub fn template_path(&self) -> PathBuf {
        self.base_dir.join(&self.template)
    }

    pub fn preflight_checks(&self) -> bool {
        // collect all problems instead of stopping at the first to make debugging easier
        let mut contains_error = false;

        if self.maps.is_empty() {
            warn!("No maps were defined, the sweep will not produce any job");
        }

        if !self.template_path().is_file() {
            error!(
                "Template deck {} is not a file",
                self.template_path().to_string_lossy()
            );
            contains_error = true;
        }

        if !self.defaults.formats.contains_key(crate::deck::INPUT_FILE_FORMAT)
            && self
                .maps
                .iter()
                .any(|map| !map.formats.contains_key(crate::deck::INPUT_FILE_FORMAT))
        {
            error!("defaults.formats has no 'input_file' entry and not every map defines one");
            contains_error = true;
        }

        if let Some(identifier) = &self.case_identifier {
            for key in crate::deck::template::placeholders(identifier) {
                if !self.defaults.parameters.contains_key(&key) && key != crate::sweep::MAP_NAME {
                    warn!("case_identifier references '{key}' which has no default parameter");
                }
            }
        } else if !self.case_parameters.is_empty() {
            warn!("case_parameters are ignored without a case_identifier");
        }

        contains_error
    }
}

/// Turn a YAML parameter value into a list of strings. Null and empty
/// sequences produce an empty list.
pub fn value_list(key: &str, value: &serde_yaml::Value) -> Result<Vec<String>, ConfigErrors> {
    use serde_yaml::Value;

    fn scalar(key: &str, value: &Value) -> Result<String, ConfigErrors> {
        match value {
            Value::String(string) => Ok(string.clone()),
            Value::Number(number) => Ok(number.to_string()),
            Value::Bool(boolean) => Ok(boolean.to_string()),
            other => Err(ConfigErrors::InvalidParameter {
                key: key.to_string(),
                reason: format!("expected a scalar, got {other:?}"),
            }),
        }
    }

    match value {
        Value::Null => Ok(Vec::new()),
        Value::Sequence(values) => values.iter().map(|value| scalar(key, value)).collect(),
        other => scalar(key, other).map(|value| vec![value]),
    }
}

/// convert a whole parameter table
pub fn value_lists(
    values: &BTreeMap<String, serde_yaml::Value>,
) -> Result<BTreeMap<String, Vec<String>>, ConfigErrors> {
    values
        .iter()
        .map(|(key, value)| Ok((key.clone(), value_list(key, value)?)))
        .collect()
}

fn default_executor() -> String {
    "local".to_string()
}

fn default_ram_fraction() -> f64 {
    DEFAULT_RAM_FRACTION
}

fn default_delay() -> f64 {
    DEFAULT_DELAY
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SWEEP: &str = r#"
template: base.inp
executor:
  cpus: 2
  ram: 4.5
  spawn_delay: 0.5
  retest_delay: 0
defaults:
  parameters:
    OUTLET-PRESS: [100, 200]
    ROUGHNESS: 0.5
    INLET-RATE: ~
  formats:
    input_file: "decks/{apmap}-{OUTLET-PRESS}.inp"
maps:
  - path: maps/*.txt
  - map: single.txt
    parameters:
      OUTLET-PRESS: [300]
case_identifier: "{apmap}-{ROUGHNESS}"
case_parameters:
  "single-0.5":
    OUTLET-PRESS: [400]
"#;

    #[test]
    fn loads_sweep_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sweep.yaml");
        fs::write(&path, SWEEP).unwrap();

        let config = SweepConfig::load(&path).unwrap();

        assert_eq!(config.base_dir, dir.path());
        assert_eq!(config.template_path(), dir.path().join("base.inp"));
        assert_eq!(config.maps.len(), 2);
        assert_eq!(config.maps[1].path, "single.txt");
        assert_eq!(config.executor.name, "local");
        assert_eq!(config.case_parameters.len(), 1);
        assert!(config.preflight_checks(), "template is missing");
    }

    #[test]
    fn rejects_unknown_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sweep.yaml");
        fs::write(&path, "template: a.inp\nmaps: []\nthreads: 3\n").unwrap();

        assert!(matches!(
            SweepConfig::load(&path),
            Err(ConfigErrors::Yaml { .. })
        ));
    }

    #[test]
    fn converts_parameter_values() {
        let config: SweepConfig = serde_yaml::from_str(SWEEP).unwrap();
        let lists = value_lists(&config.defaults.parameters).unwrap();

        assert_eq!(lists["OUTLET-PRESS"], ["100", "200"]);
        assert_eq!(lists["ROUGHNESS"], ["0.5"]);
        assert!(lists["INLET-RATE"].is_empty());
    }

    #[test]
    fn rejects_nested_parameter_values() {
        let value: serde_yaml::Value = serde_yaml::from_str("[[1, 2]]").unwrap();

        assert!(matches!(
            value_list("OUTLET-PRESS", &value),
            Err(ConfigErrors::InvalidParameter { key, .. }) if key == "OUTLET-PRESS"
        ));
    }

    #[test]
    fn builds_settings() {
        let config: SweepConfig = serde_yaml::from_str(SWEEP).unwrap();
        let settings = config.executor.settings().unwrap();

        assert_eq!(
            settings,
            SchedulerSettings {
                cpu_limit: 2,
                ram_budget: 4.5,
                spawn_delay: Duration::from_millis(500),
                retest_delay: Duration::ZERO,
            }
        );
    }

    #[test]
    fn rejects_invalid_settings() {
        let zero_cpus = ExecutorConfig {
            cpus: Some(0),
            ..Default::default()
        };
        let negative_ram = ExecutorConfig {
            ram: Some(-1.0),
            ..Default::default()
        };
        let negative_delay = ExecutorConfig {
            ram: Some(1.0),
            spawn_delay: -2.0,
            ..Default::default()
        };

        for config in [zero_cpus, negative_ram, negative_delay] {
            assert!(matches!(
                config.settings(),
                Err(ConfigErrors::InvalidSetting(_))
            ));
        }
    }

    #[test]
    fn locates_executables() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("solver");
        fs::write(&file, "#!/bin/sh\n").unwrap();

        assert_eq!(locate_executable(&file), Some(file.clone()));
        assert_eq!(locate_executable(&dir.path().join("missing")), None);
        assert!(!check_executable(&file).unwrap());
    }
}
