use std::io::Write;

use endpoint_cache::config::{self, LogFormat};
use endpoint_cache::{InvalidationBehavior, Retention};
use serial_test::serial;
use tracing::level_filters::LevelFilter;

struct EnvGuard(&'static [&'static str]);

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for key in self.0 {
            // SAFETY: tests touching the environment run serially.
            unsafe { std::env::remove_var(key) };
        }
    }
}

const KEYS: &[&str] = &[
    "ENDPOINT_CACHE__API__REFETCH_ON_FOCUS",
    "ENDPOINT_CACHE__API__KEEP_UNUSED_DATA_FOR",
    "ENDPOINT_CACHE__LOGGING__JSON",
];

fn config_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
#[serial]
fn environment_overrides_files() {
    let _guard = EnvGuard(KEYS);
    let file = config_file(
        "[api]\nrefetch_on_focus = false\nkeep_unused_data_for = 5\ninvalidation_behavior = \"immediate\"\n",
    );
    // SAFETY: tests touching the environment run serially.
    unsafe {
        std::env::set_var("ENDPOINT_CACHE__API__REFETCH_ON_FOCUS", "true");
        std::env::set_var("ENDPOINT_CACHE__API__KEEP_UNUSED_DATA_FOR", "30");
        std::env::set_var("ENDPOINT_CACHE__LOGGING__JSON", "true");
    }

    let settings = config::load(Some(file.path())).expect("settings load");

    assert!(settings.api.refetch_on_focus);
    assert_eq!(settings.api.keep_unused_data_for, Retention::Seconds(30.0));
    assert_eq!(
        settings.api.invalidation_behavior,
        InvalidationBehavior::Immediate
    );
    assert_eq!(settings.logging.format, LogFormat::Json);
    assert_eq!(settings.logging.level, LevelFilter::INFO);
}

#[test]
#[serial]
fn defaults_apply_without_any_source() {
    let _guard = EnvGuard(KEYS);
    let settings = config::load(None).expect("settings load");

    assert!(!settings.api.refetch_on_focus);
    assert_eq!(settings.api.keep_unused_data_for, Retention::default());
    assert_eq!(settings.logging.format, LogFormat::Compact);
}

#[test]
#[serial]
fn invalid_environment_values_are_reported() {
    let _guard = EnvGuard(KEYS);
    // SAFETY: tests touching the environment run serially.
    unsafe { std::env::set_var("ENDPOINT_CACHE__API__KEEP_UNUSED_DATA_FOR", "-5") };

    let err = config::load(None).expect_err("negative retention rejected");
    assert!(matches!(
        err,
        config::LoadError::Invalid {
            key: "api.keep_unused_data_for",
            ..
        }
    ));
}
