//! Unit tests for configuration validation and conversion.

use std::time::Duration;

use cloudkit::test_support::EnvGuard;
use cloudkit::{ClientConfig, ConfigError, Zone};
use rstest::*;
use tempfile::TempDir;

#[fixture]
fn valid_config() -> ClientConfig {
    ClientConfig {
        access_token: String::from("token-example"),
        access_token_secret: String::from("secret-example"),
        zone: String::from("tk1a"),
        api_root_url: String::from("https://api.example.test/cloud"),
        trace: false,
        fake_mode: false,
        poll_interval_secs: 5,
        wait_timeout_secs: 1200,
        not_found_retry: 3,
    }
}

#[rstest]
fn valid_config_passes(valid_config: ClientConfig) {
    assert_eq!(valid_config.validate(), Ok(()));
}

#[rstest]
#[case::token(
    |cfg: &mut ClientConfig| cfg.access_token.clear(),
    "CLOUDKIT_ACCESS_TOKEN",
    "access_token"
)]
#[case::secret(
    |cfg: &mut ClientConfig| cfg.access_token_secret = String::from("  "),
    "CLOUDKIT_ACCESS_TOKEN_SECRET",
    "access_token_secret"
)]
#[case::zone(|cfg: &mut ClientConfig| cfg.zone.clear(), "CLOUDKIT_ZONE", "zone")]
#[case::root(
    |cfg: &mut ClientConfig| cfg.api_root_url.clear(),
    "CLOUDKIT_API_ROOT_URL",
    "api_root_url"
)]
fn missing_fields_produce_actionable_errors(
    mut valid_config: ClientConfig,
    #[case] mutate: fn(&mut ClientConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    mutate(&mut valid_config);
    let error = valid_config.validate().expect_err("validation should fail");
    let ConfigError::MissingField(ref message) = error else {
        panic!("expected MissingField error, got {error:?}");
    };
    assert!(message.contains(env_var), "error should mention {env_var}: {message}");
    assert!(message.contains(toml_key), "error should mention {toml_key}: {message}");
    assert!(
        message.contains("cloudkit.toml"),
        "error should mention the config file: {message}"
    );
}

#[rstest]
fn fake_mode_does_not_need_credentials(valid_config: ClientConfig) {
    let cfg = ClientConfig {
        access_token: String::new(),
        access_token_secret: String::new(),
        fake_mode: true,
        ..valid_config
    };
    assert_eq!(cfg.validate(), Ok(()));
}

#[rstest]
#[case::interval(ClientConfig { poll_interval_secs: 0, ..valid_config() }, "poll_interval_secs")]
#[case::timeout(ClientConfig { wait_timeout_secs: 0, ..valid_config() }, "wait_timeout_secs")]
fn zero_durations_are_rejected(#[case] cfg: ClientConfig, #[case] field: &str) {
    let error = cfg.validate().expect_err("zero is invalid");
    assert!(matches!(error, ConfigError::InvalidValue(_)), "{error:?}");
    assert!(error.to_string().contains(field), "{error}");
}

#[rstest]
fn wait_settings_follow_configuration(valid_config: ClientConfig) {
    let cfg = ClientConfig {
        poll_interval_secs: 2,
        wait_timeout_secs: 90,
        not_found_retry: 7,
        ..valid_config
    };
    let settings = cfg.wait_settings();
    assert_eq!(settings.polling_interval, Duration::from_secs(2));
    assert_eq!(settings.timeout, Duration::from_secs(90));
    assert_eq!(settings.not_found_retry, 7);
}

#[rstest]
fn http_settings_carry_credentials(valid_config: ClientConfig) {
    let settings = valid_config.http_settings();
    assert_eq!(settings.root_url, valid_config.api_root_url);
    assert_eq!(settings.access_token, "token-example");
    assert_eq!(settings.access_token_secret, "secret-example");
    assert!(!settings.trace);
}

#[rstest]
fn zone_is_trimmed(valid_config: ClientConfig) {
    let cfg = ClientConfig {
        zone: String::from(" is1b "),
        ..valid_config
    };
    assert_eq!(cfg.zone(), Zone::new("is1b"));
}

#[tokio::test]
async fn boolean_switches_load_from_the_environment() {
    let _guard = EnvGuard::apply(
        &[("CLOUDKIT_FAKE_MODE", "true"), ("CLOUDKIT_TRACE", "true")],
        &["CLOUDKIT_ACCESS_TOKEN", "CLOUDKIT_CONFIG_PATH"],
    )
    .await;

    let cfg = ClientConfig::load_without_cli_args().expect("config loads");
    assert!(cfg.fake_mode, "CLOUDKIT_FAKE_MODE should enable fake mode");
    assert!(cfg.trace, "CLOUDKIT_TRACE should enable tracing");
    assert_eq!(cfg.validate(), Ok(()));
}

#[tokio::test]
async fn boolean_switches_load_from_the_config_file() {
    let tmp = TempDir::new().expect("tempdir");
    let path = tmp.path().join("cloudkit.toml");
    std::fs::write(&path, "fake_mode = true\nzone = \"tk1a\"\n").expect("write config");
    let path_str = path.to_str().expect("utf8 path");
    let _guard = EnvGuard::apply(
        &[("CLOUDKIT_CONFIG_PATH", path_str)],
        &["CLOUDKIT_FAKE_MODE", "CLOUDKIT_ZONE"],
    )
    .await;

    let cfg = ClientConfig::load_without_cli_args().expect("config loads");
    assert!(cfg.fake_mode, "fake_mode in cloudkit.toml should apply");
    assert_eq!(cfg.zone(), Zone::new("tk1a"));
}
