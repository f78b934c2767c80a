use std::time::Duration;

use blsftcosi::{Mask, Policy, RoundConfig};

#[test]
fn default_config() {
    let config = RoundConfig::default();
    assert_eq!(config.subtrees, 1);
    assert_eq!(config.timeout, Duration::from_secs(5));
    assert_eq!(config.subtree_timeout(), Duration::from_millis(1250));
    assert_eq!(config.fault_threshold, 0);
    assert_eq!(config.policy, Policy::Complete);
}

#[test]
fn config_from_json() {
    let config: RoundConfig = serde_json::from_str(
        r#"{
            "subtrees": 4,
            "timeout": { "secs": 10, "nanos": 0 },
            "subtree_timeout": null,
            "fault_threshold": 2,
            "policy": { "Threshold": 20 }
        }"#,
    )
    .unwrap();
    assert_eq!(
        config,
        RoundConfig {
            subtrees: 4,
            timeout: Duration::from_secs(10),
            subtree_timeout: None,
            fault_threshold: 2,
            policy: Policy::Threshold(20),
        }
    );
    assert_eq!(config.subtree_timeout(), Duration::from_millis(2500));

    let json = serde_json::to_string(&config).unwrap();
    let parsed: RoundConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, config);
}

#[test]
fn mask_keeps_its_length_when_serialized() {
    let mut mask = Mask::new(11);
    mask.set(0).unwrap();
    mask.set(10).unwrap();

    let json = serde_json::to_string(&mask).unwrap();
    let parsed: Mask = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, mask);
    assert_eq!(parsed.len(), 11);
    assert_eq!(parsed.iter().collect::<Vec<_>>(), [0, 10]);
}
