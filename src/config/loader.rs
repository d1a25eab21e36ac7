//! Config loading, the `AGENTIC_OS_` environment overlay, and atomic
//! saves.
//!
//! Overlay keys use `__` to separate nesting: `AGENTIC_OS_GATEWAY__PORT`
//! overrides `gateway.port`. Values are coerced — `"true"`/`"false"`
//! become booleans, numeric literals become numbers, everything else
//! stays a string. The overlay is applied to the parsed TOML value tree,
//! so it works for any key without per-field plumbing.

use std::fs;
use std::path::{Path, PathBuf};

use super::schema::AppConfig;
use crate::error::{Error, Result};

pub const ENV_PREFIX: &str = "AGENTIC_OS_";

/// Default config path: `~/.agentos/config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".agentos")
        .join("config.toml")
}

/// Load, overlay the process environment, and validate.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    load_with_env(path, std::env::vars())
}

/// Load with an explicit variable set (tests use this).
pub fn load_with_env(
    path: &Path,
    vars: impl IntoIterator<Item = (String, String)>,
) -> Result<AppConfig> {
    let raw = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
    parse_with_env(&raw, vars)
}

pub fn parse_with_env(
    raw: &str,
    vars: impl IntoIterator<Item = (String, String)>,
) -> Result<AppConfig> {
    let mut value: toml::Value = toml::from_str(raw)
        .map_err(|e| Error::Config(format!("config parse error: {e}")))?;
    apply_env_overlay(&mut value, vars);
    let config: AppConfig = value
        .try_into()
        .map_err(|e| Error::Config(format!("config error: {e}")))?;
    config.validate()?;
    Ok(config)
}

/// Apply `AGENTIC_OS_SECTION__KEY=value` overrides onto the value tree.
pub fn apply_env_overlay(
    value: &mut toml::Value,
    vars: impl IntoIterator<Item = (String, String)>,
) {
    for (key, raw) in vars {
        let Some(rest) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let path: Vec<String> = rest.split("__").map(str::to_lowercase).collect();
        if path.iter().any(String::is_empty) {
            continue;
        }
        set_path(value, &path, coerce(&raw));
    }
}

/// `"true"/"false"` → boolean; numeric literals → number; else string.
fn coerce(raw: &str) -> toml::Value {
    match raw {
        "true" => return toml::Value::Boolean(true),
        "false" => return toml::Value::Boolean(false),
        _ => {}
    }
    if let Ok(int) = raw.parse::<i64>() {
        return toml::Value::Integer(int);
    }
    if let Ok(float) = raw.parse::<f64>() {
        return toml::Value::Float(float);
    }
    toml::Value::String(raw.to_string())
}

fn set_path(value: &mut toml::Value, path: &[String], leaf: toml::Value) {
    let Some((head, rest)) = path.split_first() else {
        return;
    };
    let Some(table) = value.as_table_mut() else {
        return;
    };
    if rest.is_empty() {
        table.insert(head.clone(), leaf);
        return;
    }
    let child = table
        .entry(head.clone())
        .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    set_path(child, rest, leaf);
}

/// Atomically save `config`: write `<path>.tmp`, then rename over the
/// target so a partial write can never be loaded.
pub fn save_config(path: &Path, config: &AppConfig) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("config serialize error: {e}")))?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("toml.tmp");
    fs::write(&tmp, &content)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
