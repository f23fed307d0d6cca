// Unit tests for configuration loading

use super::*;
use tempfile::TempDir;

#[test]
fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.resolver.attempts, 5);
    assert_eq!(config.resolver.retry_delay(), Duration::from_millis(1000));
    assert_eq!(config.resolver.visibility_timeout(), Duration::from_millis(5000));
    assert_eq!(config.selector.max_path_depth, 5);
    assert_eq!(config.selector.max_text_len, 50);
    assert_eq!(config.visual.threshold, 5.0);
    assert_eq!(config.visual.pixel_threshold, 10.0);
    assert_eq!(config.visual.on_diff, DiffDecision::Stop);
    assert_eq!(config.replay.scroll_poll(), Duration::from_millis(100));
    assert_eq!(config.webdriver.browser, BrowserType::Chrome);
}

#[test]
fn test_partial_config_keeps_defaults() {
    let config = Config::parse(
        r#"
        [resolver]
        attempts = 2

        [visual]
        threshold = 0.5
        on_diff = "continue"

        [webdriver]
        browser = "Firefox"
        headless = false
        "#,
    )
    .unwrap();

    assert_eq!(config.resolver.attempts, 2);
    assert_eq!(config.resolver.retry_delay_ms, 1000);
    assert_eq!(config.visual.threshold, 0.5);
    assert_eq!(config.visual.on_diff, DiffDecision::Continue);
    assert_eq!(config.webdriver.browser, BrowserType::Firefox);
    assert!(!config.webdriver.headless);
    assert_eq!(config.replay.watchdog_ms, 30_000);
}

#[test]
fn test_strict_visual_config() {
    let strict = VisualConfig::strict();
    assert!(strict.threshold < 0.1);
    assert_eq!(strict.pixel_threshold, 10.0);
}

#[test]
fn test_load_missing_file_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::load(&temp_dir.path().join("missing.toml")).unwrap();
    assert_eq!(config.resolver.attempts, 5);
}

#[test]
fn test_load_invalid_file_fails() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(&path, "[resolver]\nattempts = \"many\"\n").unwrap();
    assert!(Config::load(&path).is_err());
}

#[test]
#[serial_test::serial]
fn test_load_default_reads_home_config() {
    let temp_dir = TempDir::new().unwrap();
    let original = std::env::var_os("HOME");
    // SAFETY: serialized with every other test that reads HOME
    unsafe { std::env::set_var("HOME", temp_dir.path()) };

    let dir = data_dir().unwrap();
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("config.toml"), "[replay]\nready_timeout_ms = 250\n").unwrap();
    let loaded = Config::load_default();

    match original {
        Some(home) => unsafe { std::env::set_var("HOME", home) },
        None => unsafe { std::env::remove_var("HOME") },
    }

    assert_eq!(dir, temp_dir.path().join(".retrace"));
    assert_eq!(loaded.unwrap().replay.ready_timeout_ms, 250);
}
