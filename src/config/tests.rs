//! Config module tests

use std::collections::HashMap;
use std::io::Write;

use pretty_assertions::assert_eq;
use test_case::test_case;

use super::*;

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

fn no_env(_: &str) -> Option<String> {
    None
}

#[test]
fn test_substitute_env_vars_simple() {
    let env = env_from(&[("TEST_VAR_SIMPLE", "hello")]);
    let result = substitute_env_vars("value = \"${TEST_VAR_SIMPLE}\"", &env);
    assert_eq!(result, "value = \"hello\"");
}

#[test]
fn test_substitute_env_vars_with_default() {
    let result = substitute_env_vars("value = \"${TEST_VAR_UNSET:-default_value}\"", &no_env);
    assert_eq!(result, "value = \"default_value\"");

    let env = env_from(&[("TEST_VAR_SET", "env_value")]);
    let result = substitute_env_vars("value = \"${TEST_VAR_SET:-default_value}\"", &env);
    assert_eq!(result, "value = \"env_value\"");
}

#[test]
fn test_substitute_env_vars_missing_no_default() {
    let result = substitute_env_vars("value = \"${TEST_VAR_MISSING}\"", &no_env);
    assert_eq!(result, "value = \"\"");
}

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.mqtt.host, "127.0.0.1");
    assert_eq!(config.mqtt.port, 1883);
    assert_eq!(config.mqtt.base_topic, "ha-satellite");
    assert_eq!(config.mqtt.qos(), QoS::AtMostOnce);
    assert_eq!(config.mqtt.keepalive, 60);
    assert!(config.mqtt.credentials().is_none());
    assert_eq!(config.mixer.card, "1");
    assert_eq!(
        config.mixer.control_address(),
        ControlAddress::Name("Speaker Playback Volume".to_string())
    );
    assert_eq!(config.mixer.range(), VolumeRange::new(0, 255));
    assert!(config.state.publish);
    assert!(!config.state.retain);
    assert_eq!(config.reconnect.retry_delay, Duration::from_secs(5));
    assert_eq!(config.reconnect.min_backoff, Duration::from_secs(1));
    assert_eq!(config.reconnect.max_backoff, Duration::from_secs(30));
    assert!(config.validate().is_ok());
}

#[test]
fn test_load_without_sources_matches_defaults() {
    let config = Config::load_with(None, no_env).unwrap();
    assert_eq!(config.mqtt.address(), "127.0.0.1:1883");
    assert_eq!(config.mixer.binary, PathBuf::from("/usr/bin/amixer"));
    assert_eq!(config.mixer.timeout, Duration::from_secs(10));
    assert_eq!(config.mqtt.connect_timeout, Duration::from_secs(10));
    assert!(config.mixer.numid.is_none());
    assert!(config.state.publish);
}

#[test]
fn test_env_overrides() {
    let env = env_from(&[
        ("MQTT_HOST", "broker.lan"),
        ("MQTT_PORT", "1884"),
        ("MQTT_USER", "sat"),
        ("MQTT_PASS", "pw"),
        ("MQTT_BASE", "audio"),
        ("MQTT_QOS", "1"),
        ("ALSA_CARD", "0"),
        ("ALSA_NUMID", "6"),
        ("VOL_MIN", "10"),
        ("VOL_MAX", "200"),
        ("PUBLISH_STATE", "0"),
        ("RETAIN_STATE", "1"),
    ]);

    let config = Config::load_with(None, env).unwrap();
    assert_eq!(config.mqtt.address(), "broker.lan:1884");
    assert_eq!(config.mqtt.base_topic, "audio");
    assert_eq!(config.mqtt.qos(), QoS::AtLeastOnce);
    assert_eq!(
        config.mqtt.credentials(),
        Some(("sat".to_string(), Some(Bytes::from_static(b"pw"))))
    );
    assert_eq!(config.mixer.card, "0");
    assert_eq!(
        config.mixer.control_address(),
        ControlAddress::NumId("6".to_string())
    );
    assert_eq!(config.mixer.range(), VolumeRange::new(10, 200));
    assert!(!config.state.publish);
    assert!(config.state.retain);
}

#[test]
fn test_empty_env_values_are_unset() {
    let env = env_from(&[("MQTT_USER", ""), ("ALSA_NUMID", "  "), ("MQTT_HOST", "")]);
    let config = Config::load_with(None, env).unwrap();
    assert!(config.mqtt.credentials().is_none());
    assert!(config.mixer.numid.is_none());
    assert_eq!(config.mqtt.host, "127.0.0.1");
}

#[test_case("2", false ; "other number")]
#[test_case("enabled", false ; "unknown word")]
#[test_case("disabled", false ; "negative word")]
#[test_case("0", false ; "zero")]
#[test_case("1", true ; "one")]
#[test_case(" TRUE ", true ; "truthy word")]
#[test_case("on", true ; "on")]
fn test_state_flags_from_env(value: &str, expected: bool) {
    let env = env_from(&[("PUBLISH_STATE", value), ("RETAIN_STATE", value)]);
    let config = Config::load_with(None, env).unwrap();
    assert_eq!(config.state.publish, expected);
    assert_eq!(config.state.retain, expected);
}

#[test]
fn test_user_without_password() {
    let env = env_from(&[("MQTT_USER", "sat")]);
    let config = Config::load_with(None, env).unwrap();
    assert_eq!(config.mqtt.credentials(), Some(("sat".to_string(), None)));
}

#[test]
fn test_invalid_env_value_fails() {
    let env = env_from(&[("MQTT_PORT", "not-a-port")]);
    assert!(matches!(
        Config::load_with(None, env),
        Err(ConfigError::Config(_))
    ));
}

#[test]
fn test_load_file_with_substitution_and_env_precedence() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[mqtt]
host = "${{TEST_BROKER:-fallback.lan}}"
keepalive = 30
client_id = "living-room"

[mixer]
binary = "/opt/bin/amixer"
control = "Master Playback Volume"
timeout = "2s"

[reconnect]
retry_delay = "3s"

[device]
name = "den"
"#
    )
    .unwrap();

    let env = env_from(&[("MQTT_PORT", "2883")]);
    let config = Config::load_with(Some(file.path()), env).unwrap();
    assert_eq!(config.mqtt.host, "fallback.lan");
    assert_eq!(config.mqtt.port, 2883);
    assert_eq!(config.mqtt.keepalive, 30);
    assert_eq!(config.mqtt.client_id("den"), "living-room");
    assert_eq!(config.mixer.binary, PathBuf::from("/opt/bin/amixer"));
    assert_eq!(
        config.mixer.control_address(),
        ControlAddress::Name("Master Playback Volume".to_string())
    );
    assert_eq!(config.mixer.timeout, Duration::from_secs(2));
    assert_eq!(config.reconnect.retry_delay, Duration::from_secs(3));
    assert_eq!(config.device.name.as_deref(), Some("den"));
}

#[test]
fn test_env_overrides_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "[mixer]\nmax = 100\n").unwrap();

    let env = env_from(&[("VOL_MAX", "150")]);
    let config = Config::load_with(Some(file.path()), env).unwrap();
    assert_eq!(config.mixer.max, 150);
}

#[test]
fn test_missing_config_file_fails() {
    let result = Config::load_with(Some(Path::new("/nonexistent/volmq.toml")), no_env);
    assert!(matches!(result, Err(ConfigError::Io(_))));
}

#[test]
fn test_default_client_id() {
    let config = Config::default();
    assert_eq!(config.mqtt.client_id("kitchen"), "ha-satellite-kitchen");
}

#[test]
fn test_parse_minimal_config() {
    let config = Config::parse("[mqtt]\nhost = \"10.0.0.2\"\n").unwrap();
    assert_eq!(config.mqtt.host, "10.0.0.2");
    assert_eq!(config.mqtt.port, 1883);
}

#[test]
fn test_validation_rejects_inverted_range() {
    let result = Config::parse("[mixer]\nmin = 200\nmax = 100\n");
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_validation_rejects_bad_qos() {
    let env = env_from(&[("MQTT_QOS", "3")]);
    assert!(matches!(
        Config::load_with(None, env),
        Err(ConfigError::Validation(_))
    ));
}

#[test]
fn test_validation_rejects_wildcard_base() {
    let result = Config::parse("[mqtt]\nbase_topic = \"home/#\"\n");
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_validation_rejects_bad_device_name() {
    let result = Config::parse("[device]\nname = \"a/b\"\n");
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_validation_rejects_inverted_backoff() {
    let result = Config::parse("[reconnect]\nmin_backoff = \"40s\"\nmax_backoff = \"30s\"\n");
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_validation_rejects_zero_retry_delay() {
    let result = Config::parse("[reconnect]\nretry_delay = \"0s\"\n");
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_validation_requires_control_without_numid() {
    let result = Config::parse("[mixer]\ncontrol = \"\"\n");
    assert!(matches!(result, Err(ConfigError::Validation(_))));

    let config = Config::parse("[mixer]\ncontrol = \"\"\nnumid = \"4\"\n").unwrap();
    assert_eq!(
        config.mixer.control_address(),
        ControlAddress::NumId("4".to_string())
    );
}
