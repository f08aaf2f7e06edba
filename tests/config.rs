use mesh_blocks::master::MasterConfig;

#[test]
fn config_roundtrips_through_json() {
    let config = MasterConfig {
        limit: Some(8),
        threads: 4,
        queue_threshold: 1 << 20,
        immediate: false,
        stall_warning_ms: Some(2_000),
    };
    let json = serde_json::to_string(&config).unwrap();
    let back: MasterConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back, config);
}

#[test]
fn missing_fields_take_defaults() {
    let config: MasterConfig = serde_json::from_str(r#"{ "threads": 3 }"#).unwrap();
    assert_eq!(config.threads, 3);
    assert_eq!(config.limit, None);
    assert_eq!(config.queue_threshold, MasterConfig::default().queue_threshold);
    assert!(config.immediate);
}

#[test]
fn decomposer_options_from_json() {
    let opts: mesh_blocks::decomposition::DecomposerOptions<i64> =
        serde_json::from_str(r#"{ "wrap": [true, false], "ghosts": [1, 1] }"#).unwrap();
    assert_eq!(opts.wrap, vec![true, false]);
    assert_eq!(opts.ghosts, vec![1, 1]);
    assert!(opts.divisions.is_empty());
    assert!(opts.share_face.is_empty());
}
