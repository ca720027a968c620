use lenscheck::common::{CameraSource, Config, SpoofConfig};

#[test]
fn shipped_example_config_is_valid() {
    let config = Config::from_toml(include_str!("../configs/lenscheck.example.toml")).unwrap();
    assert_eq!(config.primary.source().unwrap(), CameraSource::Device(0));
    assert_eq!(config.auxiliary.source().unwrap(), CameraSource::Device(2));
    assert_eq!(config.spoof, SpoofConfig::default());
    assert_eq!(config.timing.classification_grace_ms, 500);
}
