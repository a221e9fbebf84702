use std::io::Write;

use super::*;
use crate::cache::ApiConfig;

#[test]
fn defaults_match_the_cache_defaults() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.api, ApiSettings::default());
    assert_eq!(ApiConfig::from(&settings.api), ApiConfig::default());
    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert_eq!(settings.logging.format, LogFormat::Compact);
}

#[test]
fn refetch_on_mount_accepts_flags_and_seconds() {
    let mut raw = RawSettings::default();
    raw.api.refetch_on_mount_or_arg_change = Some(RawRefetch::Flag(true));
    let settings = Settings::from_raw(raw.clone()).expect("valid settings");
    assert_eq!(settings.api.refetch_on_mount_or_arg_change, RefetchPolicy::Always);

    raw.api.refetch_on_mount_or_arg_change = Some(RawRefetch::Seconds(30.0));
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(
        settings.api.refetch_on_mount_or_arg_change,
        RefetchPolicy::IfOlderThan(Duration::from_secs(30))
    );
}

#[test]
fn infinite_retention_keeps_entries_forever() {
    let mut raw = RawSettings::default();
    raw.api.keep_unused_data_for = Some(f64::INFINITY);
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.api.keep_unused_data_for, Retention::Forever);
}

#[test]
fn invalid_values_name_their_key() {
    let mut raw = RawSettings::default();
    raw.api.key_memo_capacity = Some(0);
    let err = Settings::from_raw(raw).expect_err("zero capacity rejected");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "api.key_memo_capacity",
            ..
        }
    ));

    let mut raw = RawSettings::default();
    raw.api.invalidation_behavior = Some("eventually".to_string());
    let err = Settings::from_raw(raw).expect_err("unknown behavior rejected");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "api.invalidation_behavior",
            ..
        }
    ));

    let mut raw = RawSettings::default();
    raw.api.keep_unused_data_for = Some(-1.0);
    assert!(Settings::from_raw(raw).is_err());

    let mut raw = RawSettings::default();
    raw.api.max_timer_delay_seconds = Some(0);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn json_logging_switches_format() {
    let mut raw = RawSettings::default();
    raw.logging.json = Some(true);
    raw.logging.level = Some("debug".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.logging.format, LogFormat::Json);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn explicit_file_is_loaded() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp file");
    writeln!(
        file,
        "[api]\nkeep_unused_data_for = 5\nrefetch_on_focus = true\ninvalidation_behavior = \"immediate\"\n\n[logging]\nlevel = \"warn\""
    )
    .expect("write config");

    let settings = load(Some(file.path())).expect("settings load");

    assert_eq!(settings.api.keep_unused_data_for, Retention::Seconds(5.0));
    assert!(settings.api.refetch_on_focus);
    assert_eq!(
        settings.api.invalidation_behavior,
        InvalidationBehavior::Immediate
    );
    assert_eq!(settings.logging.level, LevelFilter::WARN);
}

#[test]
fn missing_explicit_file_is_an_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let missing = dir.path().join("absent.toml");
    assert!(matches!(load(Some(&missing)), Err(LoadError::Build(_))));
}
