use super::{ConfigError, RunConfig, Strategy};
use directories::ProjectDirs;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "CHUNKRUN_";

/// Layered configuration loader.
///
/// Layers apply in the order they are added, later layers winning field by
/// field: built-in defaults, then config files, then environment overrides.
pub struct ConfigLoader {
    merged: Value,
}

impl ConfigLoader {
    pub fn new() -> Result<Self, ConfigError> {
        let merged = serde_json::to_value(RunConfig::default()).map_err(|e| ConfigError::Parse {
            path: PathBuf::from("<defaults>"),
            message: e.to_string(),
        })?;
        Ok(Self { merged })
    }

    /// Location of the per-user configuration file
    pub fn user_config_path() -> Option<PathBuf> {
        ProjectDirs::from("org", "chunkrun", "chunkrun")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Apply the per-user file when it exists
    pub fn with_user_file(self) -> Result<Self, ConfigError> {
        match Self::user_config_path() {
            Some(path) if path.exists() => self.with_file(&path),
            _ => Ok(self),
        }
    }

    /// Apply a TOML or YAML file, chosen by extension
    pub fn with_file(mut self, path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let layer = parse_layer(path, &content)?;
        debug!("Applying configuration layer {}", path.display());
        merge_values(&mut self.merged, layer);
        Ok(self)
    }

    /// Apply `CHUNKRUN_*` overrides from the process environment
    pub fn with_env(self) -> Result<Self, ConfigError> {
        self.with_env_vars(std::env::vars())
    }

    /// Apply `CHUNKRUN_*` overrides from an explicit set of variables
    pub fn with_env_vars<I, K, V>(mut self, vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .filter(|(k, _)| k.as_ref().starts_with(ENV_PREFIX))
            .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
            .collect();

        for (key, value) in vars {
            let Some(pointer) = env_pointer(&key[ENV_PREFIX.len()..]) else {
                debug!("Ignoring unknown override {}", key);
                continue;
            };
            let parsed = parse_env_value(pointer, &value).ok_or_else(|| {
                ConfigError::InvalidOverride {
                    key: key.clone(),
                    value: value.clone(),
                }
            })?;
            set_pointer(&mut self.merged, pointer, parsed);
        }
        Ok(self)
    }

    /// Produce the final, validated configuration
    pub fn build(self) -> Result<RunConfig, ConfigError> {
        let mut config: RunConfig =
            serde_json::from_value(self.merged).map_err(|e| ConfigError::Parse {
                path: PathBuf::from("<merged>"),
                message: e.to_string(),
            })?;
        if config.run_stamp.is_none() {
            config.run_stamp = Some(chrono::Local::now().format("%Y_%m_%d_%Hh%Mm%S").to_string());
        }
        config.validate()?;
        Ok(config)
    }
}

fn parse_layer(path: &Path, content: &str) -> Result<Value, ConfigError> {
    let parse_err = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };
    match path.extension().and_then(|e| e.to_str()) {
        Some("yml") | Some("yaml") => {
            serde_yaml::from_str::<Value>(content).map_err(|e| parse_err(e.to_string()))
        }
        _ => {
            let table: toml::Table = toml::from_str(content).map_err(|e| parse_err(e.to_string()))?;
            serde_json::to_value(table).map_err(|e| parse_err(e.to_string()))
        }
    }
}

/// Keys holding externally tagged enums; a layer replaces them whole
const REPLACED_KEYS: &[&str] = &["backoff"];

/// Recursively overlay `layer` onto `base`; objects merge, everything else replaces
fn merge_values(base: &mut Value, layer: Value) {
    match (base, layer) {
        (Value::Object(base_map), Value::Object(layer_map)) => {
            for (key, value) in layer_map {
                match base_map.get_mut(&key) {
                    Some(existing) if !REPLACED_KEYS.contains(&key.as_str()) => {
                        merge_values(existing, value)
                    }
                    _ => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, layer) => *base = layer,
    }
}

fn env_pointer(name: &str) -> Option<&'static str> {
    let pointer = match name {
        "OUTPUT_DIR" => "/output_dir",
        "STRATEGY" => "/strategy",
        "THRESHOLD" => "/partition/threshold",
        "JOB_BINARY" => "/job/binary",
        "WORKERS" => "/local/workers",
        "QUEUE" => "/remote/queue",
        "POLL_INTERVAL" => "/remote/poll_interval",
        "STALENESS_WINDOW" => "/remote/staleness_window",
        "MIN_VALID_SIZE" => "/merge/min_valid_size",
        "RECOVER" => "/recover",
        "DRY_RUN" => "/dry_run",
        _ => return None,
    };
    Some(pointer)
}

fn parse_env_value(pointer: &str, raw: &str) -> Option<Value> {
    match pointer {
        "/partition/threshold" | "/local/workers" | "/merge/min_valid_size" => {
            raw.parse::<u64>().ok().map(Value::from)
        }
        "/recover" | "/dry_run" => raw.parse::<bool>().ok().map(Value::from),
        "/strategy" => match raw {
            "local" => serde_json::to_value(Strategy::Local).ok(),
            "remote" => serde_json::to_value(Strategy::Remote).ok(),
            _ => None,
        },
        "/remote/poll_interval" | "/remote/staleness_window" => humantime_serde::re::humantime::parse_duration(raw)
            .ok()
            .map(|_| Value::from(raw.to_string())),
        _ => Some(Value::from(raw.to_string())),
    }
}

fn set_pointer(root: &mut Value, pointer: &str, value: Value) {
    let mut current = root;
    let segments: Vec<&str> = pointer.trim_start_matches('/').split('/').collect();
    let (last, parents) = match segments.split_last() {
        Some(split) => split,
        None => return,
    };
    for segment in parents {
        if !current.get(*segment).is_some_and(Value::is_object) {
            if let Value::Object(map) = current {
                map.insert(segment.to_string(), Value::Object(Default::default()));
            }
        }
        current = match current.get_mut(*segment) {
            Some(next) => next,
            None => return,
        };
    }
    if let Value::Object(map) = current {
        map.insert(last.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::BackoffStrategy;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_only() {
        let config = ConfigLoader::new().unwrap().build().unwrap();
        assert_eq!(config.local.workers, 1);
        assert!(config.run_stamp.is_some());
    }

    #[test]
    fn test_toml_layer_merges_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chunkrun.toml");
        std::fs::write(
            &path,
            r#"
strategy = "remote"

[remote]
queue = "8nh"

[partition]
threshold = 250000
"#,
        )
        .unwrap();

        let config = ConfigLoader::new()
            .unwrap()
            .with_file(&path)
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(config.strategy, Strategy::Remote);
        assert_eq!(config.remote.queue, "8nh");
        // untouched sibling keeps its default
        assert_eq!(config.remote.poll_interval, Duration::from_secs(30));
        assert_eq!(config.partition.threshold, 250_000);
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chunkrun.yaml");
        std::fs::write(&path, "local:\n  workers: 2\n").unwrap();

        let config = ConfigLoader::new()
            .unwrap()
            .with_file(&path)
            .unwrap()
            .with_env_vars([
                ("CHUNKRUN_WORKERS", "6"),
                ("CHUNKRUN_STALENESS_WINDOW", "2m"),
                ("UNRELATED", "x"),
            ])
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(config.local.workers, 6);
        assert_eq!(config.remote.staleness_window, Duration::from_secs(120));
    }

    #[test]
    fn test_bad_override_is_rejected() {
        let result = ConfigLoader::new()
            .unwrap()
            .with_env_vars([("CHUNKRUN_WORKERS", "many")]);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidOverride { .. })
        ));
    }

    #[test]
    fn test_invalid_merged_config_fails_validation() {
        let result = ConfigLoader::new()
            .unwrap()
            .with_env_vars([("CHUNKRUN_WORKERS", "0")])
            .unwrap()
            .build();
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_backoff_layer_replaces_default_strategy() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chunkrun.toml");
        std::fs::write(
            &path,
            r#"
[retry.dispatch]
attempts = 4

[retry.dispatch.backoff.linear]
increment = "5s"
"#,
        )
        .unwrap();

        let config = ConfigLoader::new()
            .unwrap()
            .with_file(&path)
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(config.retry.dispatch.attempts, 4);
        assert_eq!(
            config.retry.dispatch.backoff,
            BackoffStrategy::Linear {
                increment: Duration::from_secs(5)
            }
        );
        // other policies keep their defaults
        assert_eq!(config.retry.execution, RunConfig::default().retry.execution);
    }

    #[test]
    fn test_yaml_fixed_backoff_replaces_default_strategy() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chunkrun.yaml");
        std::fs::write(&path, "retry:\n  merge:\n    backoff: fixed\n").unwrap();

        let config = ConfigLoader::new()
            .unwrap()
            .with_file(&path)
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(config.retry.merge.backoff, BackoffStrategy::Fixed);
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let result = ConfigLoader::new()
            .unwrap()
            .with_file(Path::new("/definitely/not/here.toml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
