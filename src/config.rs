//! # Runtime and resource configuration.
//!
//! [`Config`] holds the timing knobs shared by every node of a supervisor and by the
//! remote tracker. [`ResourceRegistry`] holds per-resource launch parameters loaded
//! from JSON and validates them eagerly, before any remote call.
//!
//! ## Environment overrides
//! [`Config::from_env`] starts from [`Config::default`] and applies, in seconds
//! (fractions allowed):
//!
//! | variable                | field            |
//! |-------------------------|------------------|
//! | `PILOT_GRACE_TIMEOUT`   | `grace`          |
//! | `PILOT_HARD_TIMEOUT`    | `hard`           |
//! | `PILOT_WATCH_INTERVAL`  | `watch_interval` |
//! | `PILOT_POLL_INTERVAL`   | `poll_interval`  |
//! | `PILOT_CANCEL_DELAY`    | `cancel_delay`   |
//! | `PILOT_CANCEL_WAIT`     | `cancel_wait`    |
//! | `PILOT_MAX_MISSES`      | `max_misses` (integer) |
//!
//! ## Sentinel values
//! - `watch_interval = 0s` and `poll_interval = 0s` are clamped to 1ms by the accessors
//!   so interval timers never spin.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Global configuration for nodes, escalation, and remote tracking.
///
/// ## Field semantics
/// - `grace`: how long a parent waits for armed children before forcing them
/// - `hard`: how long a parent waits after the forced interrupt before declaring a leak
/// - `watch_interval`: how often a watcher samples its children
/// - `poll_interval`: how often the tracker polls remote job state
/// - `cancel_delay`: soft-cancel window before a forced remote cancel
/// - `cancel_wait`: bound on waiting for a forced remote cancel to settle
/// - `max_misses`: consecutive absent polls before a job is declared disappeared
/// - `bus_capacity`: event bus ring buffer size (min 1; clamped by Bus)
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Grace period granted to armed nodes.
    pub grace: Duration,
    /// Hard period granted after a forced interrupt.
    pub hard: Duration,
    /// Watcher sampling period.
    pub watch_interval: Duration,
    /// Remote state polling period.
    pub poll_interval: Duration,
    /// Cancellation delay before forced remote cancel.
    pub cancel_delay: Duration,
    /// Bound on waiting for a forced remote cancel.
    pub cancel_wait: Duration,
    /// Consecutive misses before a tracked job is declared disappeared (min 1).
    pub max_misses: u32,
    /// Capacity of the event bus broadcast channel ring buffer.
    pub bus_capacity: usize,
}

impl Config {
    pub const ENV_GRACE: &'static str = "PILOT_GRACE_TIMEOUT";
    pub const ENV_HARD: &'static str = "PILOT_HARD_TIMEOUT";
    pub const ENV_WATCH: &'static str = "PILOT_WATCH_INTERVAL";
    pub const ENV_POLL: &'static str = "PILOT_POLL_INTERVAL";
    pub const ENV_CANCEL_DELAY: &'static str = "PILOT_CANCEL_DELAY";
    pub const ENV_CANCEL_WAIT: &'static str = "PILOT_CANCEL_WAIT";
    pub const ENV_MAX_MISSES: &'static str = "PILOT_MAX_MISSES";

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary lookup (the environment, a map in tests).
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let durations: [(&str, &mut Duration); 6] = [
            (Self::ENV_GRACE, &mut self.grace),
            (Self::ENV_HARD, &mut self.hard),
            (Self::ENV_WATCH, &mut self.watch_interval),
            (Self::ENV_POLL, &mut self.poll_interval),
            (Self::ENV_CANCEL_DELAY, &mut self.cancel_delay),
            (Self::ENV_CANCEL_WAIT, &mut self.cancel_wait),
        ];
        for (key, slot) in durations {
            if let Some(raw) = lookup(key) {
                *slot = parse_seconds(key, &raw)?;
            }
        }
        if let Some(raw) = lookup(Self::ENV_MAX_MISSES) {
            self.max_misses = raw
                .trim()
                .parse::<u32>()
                .map_err(|e| ConfigError::InvalidValue {
                    key: Self::ENV_MAX_MISSES.to_string(),
                    reason: e.to_string(),
                })?;
        }
        Ok(self)
    }

    /// Watcher period, never zero.
    #[inline]
    pub fn watch_period(&self) -> Duration {
        self.watch_interval.max(Duration::from_millis(1))
    }

    /// Tracker period, never zero.
    #[inline]
    pub fn poll_period(&self) -> Duration {
        self.poll_interval.max(Duration::from_millis(1))
    }

    /// Miss threshold, never zero.
    #[inline]
    pub fn miss_threshold(&self) -> u32 {
        self.max_misses.max(1)
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `grace = 60s`, `hard = 5s`
    /// - `watch_interval = 1s`, `poll_interval = 10s`
    /// - `cancel_delay = 12000s`, `cancel_wait = 30s`, `max_misses = 3`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(60),
            hard: Duration::from_secs(5),
            watch_interval: Duration::from_secs(1),
            poll_interval: Duration::from_secs(10),
            cancel_delay: Duration::from_secs(12_000),
            cancel_wait: Duration::from_secs(30),
            max_misses: 3,
            bus_capacity: 1024,
        }
    }
}

fn parse_seconds(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidValue {
        key: key.to_string(),
        reason,
    };
    let secs = raw
        .trim()
        .parse::<f64>()
        .map_err(|e| invalid(format!("{raw:?}: {e}")))?;
    Duration::try_from_secs_f64(secs).map_err(|e| invalid(format!("{raw:?}: {e}")))
}

/// Launch parameters of one remote resource, as stored in the resource file.
///
/// ```json
/// {
///   "local.localhost": {
///     "schemas": { "local": "fork://localhost/" },
///     "default_schema": "local",
///     "lrms": "FORK",
///     "agent_launch_method": "FORK",
///     "task_launch_method": "FORK"
///   }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Access schema name to job manager endpoint.
    #[serde(default)]
    pub schemas: BTreeMap<String, String>,
    /// Schema used when a pilot names none.
    #[serde(default)]
    pub default_schema: Option<String>,
    /// Local resource manager type.
    #[serde(default)]
    pub lrms: Option<String>,
    /// How the agent itself is started on the resource.
    #[serde(default)]
    pub agent_launch_method: Option<String>,
    /// How the agent starts tasks.
    #[serde(default)]
    pub task_launch_method: Option<String>,
    /// How the agent spawns task processes.
    #[serde(default = "default_spawner")]
    pub agent_spawner: Option<String>,
    /// Remote sandbox base directory.
    #[serde(default)]
    pub sandbox: Option<String>,
}

fn default_spawner() -> Option<String> {
    Some("POPEN".to_string())
}

/// Resolved, validated launch parameters for one `(resource, schema)` bucket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchParams {
    pub resource: String,
    pub schema: String,
    pub endpoint: String,
    pub lrms: String,
    pub agent_launch_method: String,
    pub task_launch_method: String,
    pub agent_spawner: String,
    pub sandbox: Option<String>,
}

/// Resource configurations keyed by resource label.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceRegistry {
    resources: BTreeMap<String, ResourceConfig>,
}

impl ResourceRegistry {
    /// Parses a JSON document mapping resource labels to configurations.
    pub fn from_json(doc: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(doc).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })
    }

    /// Reads and parses a JSON resource file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let doc = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json(&doc)
    }

    /// Adds or replaces one resource.
    pub fn insert(&mut self, label: impl Into<String>, cfg: ResourceConfig) {
        self.resources.insert(label.into(), cfg);
    }

    /// Returns the raw configuration of a resource.
    pub fn get(&self, label: &str) -> Option<&ResourceConfig> {
        self.resources.get(label)
    }

    /// Validates and resolves the launch parameters for `resource` via `schema`
    /// (or the resource's default schema).
    pub fn resolve(&self, resource: &str, schema: Option<&str>) -> Result<LaunchParams, ConfigError> {
        let cfg = self
            .resources
            .get(resource)
            .ok_or_else(|| ConfigError::MissingResource {
                resource: resource.to_string(),
            })?;
        let missing = |param: &'static str| ConfigError::MissingParameter {
            resource: resource.to_string(),
            param,
        };

        let schema = schema
            .map(str::to_string)
            .or_else(|| cfg.default_schema.clone())
            .or_else(|| cfg.schemas.keys().next().cloned())
            .ok_or_else(|| missing("access schema"))?;
        let endpoint = cfg
            .schemas
            .get(&schema)
            .cloned()
            .ok_or_else(|| missing("job manager endpoint"))?;

        Ok(LaunchParams {
            resource: resource.to_string(),
            schema,
            endpoint,
            lrms: cfg.lrms.clone().ok_or_else(|| missing("LRMS"))?,
            agent_launch_method: cfg
                .agent_launch_method
                .clone()
                .ok_or_else(|| missing("agent launch method"))?,
            task_launch_method: cfg
                .task_launch_method
                .clone()
                .ok_or_else(|| missing("task launch method"))?,
            agent_spawner: cfg
                .agent_spawner
                .clone()
                .ok_or_else(|| missing("agent spawner"))?,
            sandbox: cfg.sandbox.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn overrides_accept_fractional_seconds() {
        let cfg = Config::default()
            .with_overrides(lookup(&[
                ("PILOT_GRACE_TIMEOUT", "1.5"),
                ("PILOT_HARD_TIMEOUT", "0.25"),
                ("PILOT_MAX_MISSES", "5"),
            ]))
            .unwrap();
        assert_eq!(cfg.grace, Duration::from_millis(1500));
        assert_eq!(cfg.hard, Duration::from_millis(250));
        assert_eq!(cfg.max_misses, 5);
        assert_eq!(cfg.poll_interval, Duration::from_secs(10));
    }

    #[test]
    fn malformed_override_names_the_variable() {
        let err = Config::default()
            .with_overrides(lookup(&[("PILOT_CANCEL_DELAY", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "PILOT_CANCEL_DELAY"));

        let err = Config::default()
            .with_overrides(lookup(&[("PILOT_WATCH_INTERVAL", "-1")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn zero_periods_are_clamped() {
        let cfg = Config {
            watch_interval: Duration::ZERO,
            max_misses: 0,
            ..Config::default()
        };
        assert_eq!(cfg.watch_period(), Duration::from_millis(1));
        assert_eq!(cfg.miss_threshold(), 1);
    }

    #[test]
    fn resolve_uses_default_schema() {
        let reg = ResourceRegistry::from_json(
            r#"{
                "local.localhost": {
                    "schemas": { "local": "fork://localhost/", "ssh": "ssh://localhost/" },
                    "default_schema": "ssh",
                    "lrms": "FORK",
                    "agent_launch_method": "FORK",
                    "task_launch_method": "FORK"
                }
            }"#,
        )
        .unwrap();

        let params = reg.resolve("local.localhost", None).unwrap();
        assert_eq!(params.schema, "ssh");
        assert_eq!(params.endpoint, "ssh://localhost/");
        assert_eq!(params.agent_spawner, "POPEN");

        let params = reg.resolve("local.localhost", Some("local")).unwrap();
        assert_eq!(params.endpoint, "fork://localhost/");
    }

    #[test]
    fn resolve_reports_missing_parameters() {
        let reg = ResourceRegistry::from_json(
            r#"{ "hpc.cluster": { "schemas": { "ssh": "ssh://login/" }, "lrms": "SLURM" } }"#,
        )
        .unwrap();

        assert_eq!(
            reg.resolve("hpc.cluster", None).unwrap_err(),
            ConfigError::MissingParameter {
                resource: "hpc.cluster".into(),
                param: "agent launch method",
            }
        );
        assert!(matches!(
            reg.resolve("nowhere", None),
            Err(ConfigError::MissingResource { .. })
        ));
        assert!(matches!(
            reg.resolve("hpc.cluster", Some("gsissh")),
            Err(ConfigError::MissingParameter { param: "job manager endpoint", .. })
        ));
    }

    #[test]
    fn from_file_reads_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            br#"{ "a": { "schemas": { "x": "fork://localhost/" }, "lrms": "FORK",
                 "agent_launch_method": "FORK", "task_launch_method": "FORK" } }"#,
        )
        .unwrap();

        let reg = ResourceRegistry::from_file(file.path()).unwrap();
        assert_eq!(reg.resolve("a", None).unwrap().schema, "x");

        let err = ResourceRegistry::from_file(file.path().with_extension("missing")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
