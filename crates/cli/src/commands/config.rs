use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use toml::Value;

use crate::commands::{load_config, CommandResult};

pub fn run() -> CommandResult {
    let config = match load_config("config") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_keys: &[&str]| {
        field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let mut lines =
        vec!["effective config (source precedence: env > file > default):".to_string()];

    lines.push(render_line(
        "engine.default_timeout_ms",
        &config.engine.default_timeout_ms.to_string(),
        source("engine.default_timeout_ms", &["IQQ_ENGINE_DEFAULT_TIMEOUT_MS"]),
    ));
    lines.push(render_line(
        "engine.global_timeout_ms",
        &config.engine.global_timeout_ms.to_string(),
        source("engine.global_timeout_ms", &["IQQ_ENGINE_GLOBAL_TIMEOUT_MS"]),
    ));
    lines.push(render_line(
        "engine.max_concurrency",
        &config.engine.max_concurrency.to_string(),
        source("engine.max_concurrency", &["IQQ_ENGINE_MAX_CONCURRENCY"]),
    ));

    let seed_path = config
        .store
        .seed_path
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "<embedded>".to_string());
    lines.push(render_line(
        "store.seed_path",
        &seed_path,
        source("store.seed_path", &["IQQ_STORE_SEED_PATH"]),
    ));

    lines.push(render_line(
        "logging.level",
        &config.logging.level,
        source("logging.level", &["IQQ_LOGGING_LEVEL", "IQQ_LOG_LEVEL"]),
    ));
    lines.push(render_line(
        "logging.format",
        &format!("{:?}", config.logging.format),
        source("logging.format", &["IQQ_LOGGING_FORMAT", "IQQ_LOG_FORMAT"]),
    ));

    CommandResult::success("config", lines.join("\n"))
}

fn detect_config_path() -> Option<PathBuf> {
    ["iqq.toml", "config/iqq.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
