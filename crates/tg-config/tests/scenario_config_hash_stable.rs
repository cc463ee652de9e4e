//! Config hash stability.
//!
//! GREEN when:
//! - the same layers hash identically on every load;
//! - key order inside YAML does not change the hash;
//! - a changed limit changes the hash;
//! - overlays take effect and the merged hash is stable.

use tg_config::load_layered_yaml_from_strings;

const BASE_YAML: &str = r#"
limits:
  max_trade_risk: 500.0
  daily_loss_limit: 1000.0
trading:
  client_id: "tg-trader"
watchdog:
  client_id: "tg-watchdog"
  poll_interval_ms: 10000
"#;

const BASE_YAML_REORDERED: &str = r#"
watchdog:
  poll_interval_ms: 10000
  client_id: "tg-watchdog"
trading:
  client_id: "tg-trader"
limits:
  daily_loss_limit: 1000.0
  max_trade_risk: 500.0
"#;

const OVERLAY_YAML: &str = r#"
limits:
  max_trade_risk: 250.0
"#;

#[test]
fn same_input_produces_identical_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
    assert_eq!(a.canonical_json, b.canonical_json);
}

#[test]
fn reordered_keys_produce_same_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML_REORDERED]).unwrap();
    assert_eq!(
        a.config_hash, b.config_hash,
        "key order in the source must not change the hash"
    );
}

#[test]
fn changed_limit_changes_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    assert_ne!(a.config_hash, b.config_hash);
}

#[test]
fn overlay_overrides_base_and_hash_is_stable() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);

    let risk = a
        .config_json
        .pointer("/limits/max_trade_risk")
        .and_then(|v| v.as_f64())
        .unwrap();
    assert!((risk - 250.0).abs() < 1e-9);

    // Untouched sibling keys survive the merge.
    let dll = a
        .config_json
        .pointer("/limits/daily_loss_limit")
        .and_then(|v| v.as_f64())
        .unwrap();
    assert!((dll - 1000.0).abs() < 1e-9);
}

#[test]
fn hash_is_64_hex_chars() {
    let loaded = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    assert_eq!(loaded.config_hash.len(), 64);
    assert!(loaded.config_hash.chars().all(|c| c.is_ascii_hexdigit()));
}
