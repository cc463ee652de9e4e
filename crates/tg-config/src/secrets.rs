//! Runtime secret resolution.
//!
//! Config YAML stores only env var NAMES (e.g. `"TG_ALERT_WEBHOOK_URL"`).
//! Binaries call [`resolve_secrets`] once at startup and pass the result into
//! constructors. `Debug` output redacts every value and error messages name
//! the variable, never its contents.

use anyhow::{bail, Result};

use crate::GuardConfig;

#[derive(Clone, Default)]
pub struct ResolvedSecrets {
    /// Operator alert webhook. `None` when unconfigured or the env var is unset.
    pub alert_webhook_url: Option<String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field(
                "alert_webhook_url",
                &self.alert_webhook_url.as_ref().map(|_| "<REDACTED>"),
            )
            .finish()
    }
}

/// Resolve a named environment variable. Blank counts as unset.
fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Resolve all secrets named in `cfg` from the process environment.
///
/// The webhook is optional: an unset variable degrades to log-only alerting.
/// A set variable that is not an http(s) URL fails the startup.
pub fn resolve_secrets(cfg: &GuardConfig) -> Result<ResolvedSecrets> {
    let Some(var) = cfg.alerts.webhook_url_env.as_deref() else {
        return Ok(ResolvedSecrets::default());
    };
    let var = var.trim();
    if var.is_empty() {
        return Ok(ResolvedSecrets::default());
    }

    let alert_webhook_url = resolve_env(var);
    if let Some(url) = &alert_webhook_url {
        let t = url.trim();
        if !(t.starts_with("https://") || t.starts_with("http://")) {
            bail!("SECRETS_INVALID: env var '{var}' is not an http(s) URL");
        }
    }

    Ok(ResolvedSecrets { alert_webhook_url })
}
