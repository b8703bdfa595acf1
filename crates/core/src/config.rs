use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EngineConfig {
    pub default_timeout_ms: u64,
    pub global_timeout_ms: u64,
    pub max_concurrency: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StoreConfig {
    /// JSON seed dataset; the embedded seed is used when unset.
    pub seed_path: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub default_timeout_ms: Option<u64>,
    pub global_timeout_ms: Option<u64>,
    pub max_concurrency: Option<usize>,
    pub seed_path: Option<PathBuf>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { default_timeout_ms: 5_000, global_timeout_ms: 30_000, max_concurrency: 8 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Compact }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = SettingsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(SettingsError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, SettingsError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("iqq.toml"));
            return Err(SettingsError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(engine) = patch.engine {
            if let Some(default_timeout_ms) = engine.default_timeout_ms {
                self.engine.default_timeout_ms = default_timeout_ms;
            }
            if let Some(global_timeout_ms) = engine.global_timeout_ms {
                self.engine.global_timeout_ms = global_timeout_ms;
            }
            if let Some(max_concurrency) = engine.max_concurrency {
                self.engine.max_concurrency = max_concurrency;
            }
        }

        if let Some(store) = patch.store {
            if let Some(seed_path) = store.seed_path {
                self.store.seed_path = Some(seed_path);
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), SettingsError> {
        if let Some(value) = read_env("IQQ_ENGINE_DEFAULT_TIMEOUT_MS") {
            self.engine.default_timeout_ms = parse_u64("IQQ_ENGINE_DEFAULT_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("IQQ_ENGINE_GLOBAL_TIMEOUT_MS") {
            self.engine.global_timeout_ms = parse_u64("IQQ_ENGINE_GLOBAL_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("IQQ_ENGINE_MAX_CONCURRENCY") {
            self.engine.max_concurrency = parse_usize("IQQ_ENGINE_MAX_CONCURRENCY", &value)?;
        }

        if let Some(value) = read_env("IQQ_STORE_SEED_PATH") {
            self.store.seed_path = Some(PathBuf::from(value));
        }

        let log_level = read_env("IQQ_LOGGING_LEVEL").or_else(|| read_env("IQQ_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format = read_env("IQQ_LOGGING_FORMAT").or_else(|| read_env("IQQ_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(default_timeout_ms) = overrides.default_timeout_ms {
            self.engine.default_timeout_ms = default_timeout_ms;
        }
        if let Some(global_timeout_ms) = overrides.global_timeout_ms {
            self.engine.global_timeout_ms = global_timeout_ms;
        }
        if let Some(max_concurrency) = overrides.max_concurrency {
            self.engine.max_concurrency = max_concurrency;
        }
        if let Some(seed_path) = overrides.seed_path {
            self.store.seed_path = Some(seed_path);
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        validate_engine(&self.engine)?;
        validate_store(&self.store)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("iqq.toml"), PathBuf::from("config/iqq.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, SettingsError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| SettingsError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| SettingsError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, SettingsError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(SettingsError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| SettingsError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_engine(engine: &EngineConfig) -> Result<(), SettingsError> {
    if engine.default_timeout_ms == 0 || engine.default_timeout_ms > 300_000 {
        return Err(SettingsError::Validation(
            "engine.default_timeout_ms must be in range 1..=300000".to_string(),
        ));
    }

    if engine.global_timeout_ms < engine.default_timeout_ms {
        return Err(SettingsError::Validation(format!(
            "engine.global_timeout_ms ({}) must not be lower than engine.default_timeout_ms ({})",
            engine.global_timeout_ms, engine.default_timeout_ms
        )));
    }

    if engine.max_concurrency == 0 || engine.max_concurrency > 256 {
        return Err(SettingsError::Validation(
            "engine.max_concurrency must be in range 1..=256".to_string(),
        ));
    }

    Ok(())
}

fn validate_store(store: &StoreConfig) -> Result<(), SettingsError> {
    if store.seed_path.as_ref().is_some_and(|path| path.as_os_str().is_empty()) {
        return Err(SettingsError::Validation(
            "store.seed_path must not be empty when set".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), SettingsError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(SettingsError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u64(key: &str, value: &str) -> Result<u64, SettingsError> {
    value.trim().parse::<u64>().map_err(|_| SettingsError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, SettingsError> {
    value.trim().parse::<usize>().map_err(|_| SettingsError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    engine: Option<EnginePatch>,
    store: Option<StorePatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct EnginePatch {
    default_timeout_ms: Option<u64>,
    global_timeout_ms: Option<u64>,
    max_concurrency: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct StorePatch {
    seed_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::path::PathBuf;
    use std::sync::{Mutex, OnceLock};

    use tempfile::TempDir;

    use super::{AppConfig, ConfigOverrides, LoadOptions, LogFormat, SettingsError};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_are_valid_without_a_file() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.engine.default_timeout_ms == 5_000, "default provider timeout is 5s")?;
        ensure(config.engine.global_timeout_ms == 30_000, "default aggregation deadline is 30s")?;
        ensure(config.engine.max_concurrency == 8, "default concurrency cap is 8")?;
        ensure(config.store.seed_path.is_none(), "embedded seed is used by default")?;
        ensure(
            matches!(config.logging.format, LogFormat::Compact),
            "default logging format should be compact",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_IQQ_SEED_DIR", "/srv/iqq");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("iqq.toml");
            fs::write(
                &path,
                r#"
[engine]
default_timeout_ms = 2500

[store]
seed_path = "${TEST_IQQ_SEED_DIR}/seed.json"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.engine.default_timeout_ms == 2_500, "file timeout should apply")?;
            ensure(
                config.store.seed_path == Some(PathBuf::from("/srv/iqq/seed.json")),
                "seed path should be interpolated from environment",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_IQQ_SEED_DIR"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("IQQ_LOG_LEVEL", "warn");
        env::set_var("IQQ_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["IQQ_LOG_LEVEL", "IQQ_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("IQQ_ENGINE_MAX_CONCURRENCY", "4");
        env::set_var("IQQ_ENGINE_GLOBAL_TIMEOUT_MS", "9000");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("iqq.toml");
            fs::write(
                &path,
                r#"
[engine]
default_timeout_ms = 1000
global_timeout_ms = 3000
max_concurrency = 2

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    max_concurrency: Some(16),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.engine.default_timeout_ms == 1_000, "file value should beat default")?;
            ensure(config.engine.global_timeout_ms == 9_000, "env value should beat file")?;
            ensure(config.engine.max_concurrency == 16, "override should beat env")?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            Ok(())
        })();

        clear_vars(&["IQQ_ENGINE_MAX_CONCURRENCY", "IQQ_ENGINE_GLOBAL_TIMEOUT_MS"]);
        result
    }

    #[test]
    fn invalid_env_override_is_reported_by_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("IQQ_ENGINE_DEFAULT_TIMEOUT_MS", "soon");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected env override failure".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(
                    error,
                    SettingsError::InvalidEnvOverride { ref key, .. }
                        if key == "IQQ_ENGINE_DEFAULT_TIMEOUT_MS"
                ),
                "error should name the offending variable",
            )
        })();

        clear_vars(&["IQQ_ENGINE_DEFAULT_TIMEOUT_MS"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let error = match AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                default_timeout_ms: Some(10_000),
                global_timeout_ms: Some(2_000),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }) {
            Ok(_) => return Err("expected validation failure but config load succeeded".to_string()),
            Err(error) => error,
        };

        let has_message = matches!(
            error,
            SettingsError::Validation(ref message) if message.contains("engine.global_timeout_ms")
        );
        ensure(has_message, "validation failure should mention engine.global_timeout_ms")
    }

    #[test]
    fn required_file_must_exist() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let missing = dir.path().join("absent.toml");
        let result = AppConfig::load(LoadOptions {
            config_path: Some(missing.clone()),
            require_file: true,
            ..LoadOptions::default()
        });

        ensure(
            matches!(result, Err(SettingsError::MissingConfigFile(ref path)) if path == &missing),
            "missing required file should be reported with its path",
        )
    }
}
