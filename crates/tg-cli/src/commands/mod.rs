//! Command handlers for the `tg` operator CLI.

pub mod audit;
pub mod ops;
pub mod preview;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tg_config::GuardConfig;

/// Load the layered config: explicit `--config` paths win over `TG_CONFIG`.
pub fn load_config(paths: &[String]) -> Result<GuardConfig> {
    let paths = if paths.is_empty() {
        tg_config::config_paths_from_env()
    } else {
        paths.to_vec()
    };
    let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
    let (loaded, cfg) = tg_config::load_guard_config(&refs)?;
    tracing::debug!(config_hash = %loaded.config_hash, "config loaded");
    Ok(cfg)
}

pub async fn open_store(cfg: &GuardConfig) -> Result<SqlitePool> {
    tg_db::open(&cfg.store.db_path)
        .await
        .with_context(|| format!("open store {}", cfg.store.db_path))
}

pub(crate) fn opt_dt(v: &Option<chrono::DateTime<chrono::Utc>>) -> String {
    v.map(|d| d.to_rfc3339()).unwrap_or_else(|| "null".to_string())
}

pub(crate) fn opt_str(v: &Option<String>) -> &str {
    v.as_deref().unwrap_or("null")
}
