//! tg-config
//!
//! Layered YAML configuration shared by the trading process, the watchdog
//! and the operator CLI.
//!
//! Pipeline: read YAML layers (base -> environment -> overrides), deep-merge
//! them as JSON, refuse secret literals, canonicalize, hash, then deserialize
//! into the typed [`GuardConfig`]. Both processes log the same `config_hash`
//! at startup so an operator can confirm they run under identical limits.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;

mod guard;
pub mod secrets;

pub use guard::{
    AlertsConfig, BrokerConfig, GuardConfig, LimitsConfig, RetryConfig, StoreConfig,
    TradingConfig, WatchdogConfig,
};

/// Leaf string values starting with any of these abort the load with
/// CONFIG_SECRET_DETECTED. Config stores env var NAMES, never values.
const SECRET_PREFIXES: &[&str] = &[
    "sk-",
    "sk_live",
    "sk_test",
    "AKIA",
    "-----BEGIN",
    "ghp_",
    "gho_",
    "glpat-",
    "xoxb-",
    "xoxp-",
];

/// Webhook URLs embed their credential in the path.
const SECRET_URL_MARKERS: &[&str] = &["hooks.slack.com/services/", "discord.com/api/webhooks/"];

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
}

impl LoadedConfig {
    /// Deserialize and validate the typed configuration.
    pub fn guard(&self) -> Result<GuardConfig> {
        GuardConfig::from_json(&self.config_json)
    }
}

pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut docs: Vec<String> = Vec::new();
    for p in paths {
        let raw =
            fs::read_to_string(p).with_context(|| format!("failed to read yaml path: {p}"))?;
        docs.push(raw);
    }

    let doc_refs: Vec<&str> = docs.iter().map(|s| s.as_str()).collect();
    load_layered_yaml_from_strings(&doc_refs)
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    // Earlier docs are base, later docs override.
    let mut merged = serde_json::json!({});
    for raw in yaml_docs {
        let v_yaml: serde_yaml::Value = serde_yaml::from_str(raw).context("invalid yaml")?;
        let v_json = serde_json::to_value(v_yaml).context("yaml->json conversion failed")?;
        merged = deep_merge(merged, v_json);
    }

    enforce_no_secret_literals(&merged)?;

    let canonical_json = canonicalize_json(&merged)?;
    let config_hash = sha256_hex(canonical_json.as_bytes());
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
    })
}

/// Env var listing config layers, comma separated, base first.
pub const CONFIG_PATHS_ENV: &str = "TG_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/base.yaml";

/// Layer paths for the binaries: `TG_CONFIG` when set, else the base file.
pub fn config_paths_from_env() -> Vec<String> {
    match std::env::var(CONFIG_PATHS_ENV) {
        Ok(v) if !v.trim().is_empty() => split_paths(&v),
        _ => vec![DEFAULT_CONFIG_PATH.to_string()],
    }
}

fn split_paths(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Load layers from disk and produce the validated typed config in one step.
pub fn load_guard_config(paths: &[&str]) -> Result<(LoadedConfig, GuardConfig)> {
    let loaded = load_layered_yaml(paths)?;
    let guard = loaded
        .guard()
        .with_context(|| format!("config_hash={}", loaded.config_hash))?;
    Ok((loaded, guard))
}

fn deep_merge(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut a_map), Value::Object(b_map)) => {
            for (k, b_val) in b_map {
                let a_val = a_map.remove(&k).unwrap_or(Value::Null);
                a_map.insert(k, deep_merge(a_val, b_val));
            }
            Value::Object(a_map)
        }
        // A null overlay leaf keeps the base value; YAML `key:` with no value
        // should not erase a limit.
        (a_other, Value::Null) => a_other,
        (_, b_other) => b_other,
    }
}

fn canonicalize_json(v: &Value) -> Result<String> {
    // serde_json's default Map is a BTreeMap, so keys serialize sorted.
    serde_json::to_string(v).context("canonical json serialize failed")
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn enforce_no_secret_literals(v: &Value) -> Result<()> {
    let mut leaves = Vec::new();
    collect_leaf_pointers(v, "", &mut leaves);

    for ptr in leaves {
        if let Some(s) = v.pointer(&ptr).and_then(|val| val.as_str()) {
            if looks_like_secret(s) {
                bail!("CONFIG_SECRET_DETECTED leaf={} value=REDACTED", ptr);
            }
        }
    }
    Ok(())
}

fn looks_like_secret(s: &str) -> bool {
    let t = s.trim();
    if SECRET_URL_MARKERS.iter().any(|m| t.contains(m)) {
        return true;
    }
    if t.len() < 8 {
        return false;
    }
    SECRET_PREFIXES.iter().any(|p| t.starts_with(p))
}

fn collect_leaf_pointers(v: &Value, prefix: &str, out: &mut Vec<String>) {
    match v {
        Value::Object(map) => {
            for (k, vv) in map.iter() {
                let next = format!("{}/{}", prefix, escape_pointer_token(k));
                collect_leaf_pointers(vv, &next, out);
            }
        }
        Value::Array(arr) => {
            for (i, vv) in arr.iter().enumerate() {
                let next = format!("{}/{}", prefix, i);
                collect_leaf_pointers(vv, &next, out);
            }
        }
        _ => {
            let p = if prefix.is_empty() {
                String::new()
            } else {
                prefix.to_string()
            };
            out.push(p);
        }
    }
}

fn escape_pointer_token(s: &str) -> String {
    s.replace('~', "~0").replace('/', "~1")
}
