use std::io::Write;

use campush::{Config, ConfigError};

#[test]
fn file_values_layer_over_defaults() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        r#"
verbose = true

[transport]
server_address = "collector.local:5555"
identity = "porch"
send_timeout_ms = 2000

[output]
width = 320
height = 240
flip = true
"#
    )
    .unwrap();

    let config = Config::load(Some(file.path())).unwrap();

    assert!(config.verbose);
    assert_eq!(config.transport.server_address, "collector.local:5555");
    assert_eq!(config.transport.identity, "porch");
    assert_eq!(
        config.transport.send_timeout(),
        Some(std::time::Duration::from_secs(2))
    );
    assert_eq!((config.output.width, config.output.height), (320, 240));
    assert!(config.output.flip);

    // Untouched keys keep their defaults.
    assert_eq!(config.transport.queue_depth, 1000);
    assert_eq!(config.output.jpeg_quality, 95);
    assert_eq!(config.capture.buffer_count, 4);

    assert!(config.validate().is_ok());
    assert_eq!(
        config.transport.endpoint().unwrap(),
        "tcp://collector.local:5555"
    );
}

#[test]
fn missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = Config::load(Some(&dir.path().join("absent.toml")));
    assert!(matches!(result, Err(ConfigError::Load(_))));
}

#[test]
fn environment_overrides_defaults() {
    std::env::set_var("CAMPUSH_CAPTURE__MAX_PROBE_ATTEMPTS", "9");
    let config = Config::load(None).unwrap();
    std::env::remove_var("CAMPUSH_CAPTURE__MAX_PROBE_ATTEMPTS");

    assert_eq!(config.capture.max_probe_attempts, 9);
}

#[test]
fn defaults_alone_are_incomplete() {
    let config = Config::default();
    assert!(matches!(
        config.validate(),
        Err(ConfigError::MissingServerAddress)
    ));
}
