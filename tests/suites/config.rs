//! Settings files, environment expansion and CLI/env overrides.
//!
//! These tests touch process environment variables, so they run serially.

use clap::Parser;
use koala::cli::Args;
use koala::config::{self, Loader};
use serial_test::serial;

fn set_env(name: &str, value: &str) {
    // SAFETY: Serial tests, no other thread reads the environment meanwhile
    unsafe { std::env::set_var(name, value) }
}

fn remove_env(name: &str) {
    // SAFETY: Serial tests, no other thread reads the environment meanwhile
    unsafe { std::env::remove_var(name) }
}

const SETTINGS: &str = r#"
cors: true
debug: {{ env "KOALA_SUITE_DEBUG" "false" }}
server:
  port: 9010
jwt:
  secret: '{{ env "KOALA_SUITE_JWT_SECRET" }}'
db:
  driver: sqlite
  dsn: '{{ env "KOALA_SUITE_DSN" "suite.db" }}'
"#;

fn write_settings(dir: &tempfile::TempDir) -> Loader {
    std::fs::write(dir.path().join("app.yml"), SETTINGS).unwrap();
    Loader::new().with_dir(dir.path())
}

#[test]
#[serial]
fn settings_read_environment() {
    let dir = tempfile::tempdir().unwrap();
    set_env("KOALA_SUITE_DEBUG", "true");
    set_env("KOALA_SUITE_JWT_SECRET", "from-the-environment");
    let config = write_settings(&dir).load();
    remove_env("KOALA_SUITE_DEBUG");
    remove_env("KOALA_SUITE_JWT_SECRET");

    let config = config.unwrap();
    assert!(config.debug);
    assert!(config.cors);
    assert_eq!(config.jwt.secret, "from-the-environment");
    assert_eq!(config.db.dsn, "suite.db");
}

#[test]
#[serial]
fn empty_variables_use_defaults() {
    let dir = tempfile::tempdir().unwrap();
    set_env("KOALA_SUITE_DSN", "");
    let config = write_settings(&dir).load();
    remove_env("KOALA_SUITE_DSN");

    let config = config.unwrap();
    assert!(!config.debug);
    assert_eq!(config.jwt.secret, "");
    assert_eq!(config.db.dsn, "suite.db");
}

#[test]
#[serial]
fn port_env_overrides_settings() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = write_settings(&dir).load().unwrap();

    set_env("PORT", ":9020");
    let args = Args::parse_from(["koala"]);
    remove_env("PORT");

    config.apply_args(&args).unwrap();
    assert_eq!(config.server.port, 9020);
    assert!(!config.server.suppress_errors);
}

#[test]
#[serial]
fn flags_override_settings() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = write_settings(&dir).load().unwrap();

    let args = Args::parse_from([
        "koala",
        "--koala_server_port=9030",
        "--koala_knife_supress_error",
    ]);
    config.apply_args(&args).unwrap();

    assert_eq!(config.server.port, 9030);
    assert!(config.server.suppress_errors);
}

#[test]
#[serial]
fn invalid_port_is_rejected() {
    let mut config = koala::Config::default();
    let args = Args::parse_from(["koala", "--koala_server_port", "http"]);
    assert!(config.apply_args(&args).is_err());
}

#[test]
#[serial]
fn config_filename_comes_from_environment() {
    set_env("CONFIG_FILENAME", "staging.yml");
    let args = Args::parse_from(["koala"]);
    remove_env("CONFIG_FILENAME");

    let loader = Loader::from_args(&args);
    assert_eq!(loader.path(), std::path::Path::new("config/staging.yml"));
}

#[test]
#[serial]
fn target_env_defaults_to_development() {
    remove_env("APP_TARGETENV");
    assert_eq!(config::target_env(), "development");

    set_env("APP_TARGETENV", "production");
    let target = config::target_env();
    remove_env("APP_TARGETENV");
    assert_eq!(target, "production");
}
