//! Scenario: Typed config defaults and validation
//!
//! # Invariant under test
//! - An empty config yields the production defaults.
//! - Out-of-range values are rejected with CONFIG_INVALID at `typed()`.

use beacon_config::load_layered_yaml_from_strings;
use beacon_schemas::Status;

#[test]
fn empty_config_yields_defaults() {
    let cfg = load_layered_yaml_from_strings(&[]).unwrap().typed().unwrap();
    assert_eq!(cfg.gate.window_secs, 7200);
    assert_eq!(cfg.gate.scan_default_status, Status::Busy);
    assert_eq!((cfg.sweep.hour, cfg.sweep.minute), (18, 0));
    assert_eq!(cfg.sweep.timezone, "Asia/Manila");
    assert_eq!(cfg.unregistered.capacity, 1000);
    assert_eq!(cfg.audit.default_page, 20);
    assert_eq!(cfg.daemon.addr, "127.0.0.1:8899");
    assert_eq!(cfg.gate.gate_config().window_secs, 7200);
}

#[test]
fn active_alias_parses_as_available() {
    let yaml = "gate:\n  scan_default_status: Active\n";
    let cfg = load_layered_yaml_from_strings(&[yaml]).unwrap().typed().unwrap();
    assert_eq!(cfg.gate.scan_default_status, Status::Available);
}

#[test]
fn invalid_values_are_rejected() {
    for bad in [
        "gate:\n  window_secs: 0\n",
        "gate:\n  scan_default_status: Offline\n",
        "sweep:\n  hour: 24\n",
        "sweep:\n  timezone: Mars/Olympus\n",
        "unregistered:\n  capacity: 0\n",
        "audit:\n  default_page: 500\n",
        "storage:\n  timeout_ms: 0\n",
    ] {
        let loaded = load_layered_yaml_from_strings(&[bad]).unwrap();
        let err = loaded.typed().unwrap_err();
        assert!(format!("{err:#}").contains("CONFIG_INVALID"), "{bad:?} -> {err:#}");
    }
}
