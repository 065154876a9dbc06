use super::*;

#[test]
fn sections_parse_with_defaults() {
    let config = StowConfig::from_toml_str(
        r#"
        [stores.notes]
        batch_size = 50
        cache_ttl_secs = 30
        exclude_fields = ["secret"]
        validate_schema = true

        [stores.tasks]
        readonly = true
        "#,
    )
    .expect("config should parse");

    let notes = config.store("notes");
    assert_eq!(notes.batch_size, Some(50));
    assert_eq!(notes.cache_ttl(), Some(Duration::from_secs(30)));
    assert_eq!(notes.exclude_fields, vec!["secret".to_string()]);
    assert!(notes.validate_schema);
    assert!(!notes.dispatch_triggers);

    assert!(config.store("tasks").readonly);
    assert_eq!(config.store("unlisted"), StoreSettings::default());
}

#[test]
fn zero_batch_size_is_invalid() {
    let err = StowConfig::from_toml_str("[stores.notes]\nbatch_size = 0\n").expect_err("zero must fail");

    assert!(
        matches!(&err, ConfigError::Invalid { store, .. } if store == "notes"),
        "{err}"
    );
}

#[test]
fn duplicate_exclusions_are_invalid() {
    let err = StowConfig::from_toml_str("[stores.notes]\nexclude_fields = [\"a\", \"a\"]\n")
        .expect_err("duplicate must fail");

    assert!(err.to_string().contains("excluded twice"), "{err}");
}

#[test]
fn unknown_keys_are_rejected() {
    let err = StowConfig::from_toml_str("[stores.notes]\ncache_ttl = 3\n").expect_err("typo must fail");

    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn missing_file_reports_its_path() {
    let err = StowConfig::load("/definitely/not/here.toml").expect_err("missing file must fail");

    assert!(err.to_string().contains("/definitely/not/here.toml"), "{err}");
}
