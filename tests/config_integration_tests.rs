//! Integration tests for ConfigManager and configuration file handling
//!
//! These tests verify:
//! - Default configuration generation on first run
//! - Backfilling of missing fields in older files
//! - Recovery from corrupt and wrongly shaped files
//! - Partial saves and language set consistency
//! - Integration with AppContext (settings save + change broadcast)

use camino::{Utf8Path, Utf8PathBuf};
use quick_ocr::services::AppContext;
use quick_ocr::{Config, ConfigManager, PartialConfig};
use serde_json::{Value, json};
use std::fs;
use tempfile::TempDir;
use tokio::time::{Duration, timeout};

fn create_test_config_dir() -> (TempDir, Utf8PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
    (temp_dir, config_path)
}

fn read_json(path: &Utf8Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

fn backups_of(dir: &Utf8Path, name: &str) -> Vec<Utf8PathBuf> {
    let prefix = format!("{}.backup.", name);
    dir.read_dir_utf8()
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().starts_with(&prefix))
        .map(|entry| entry.path().to_path_buf())
        .collect()
}

#[test]
fn test_create_config_manager() {
    let (_temp_dir, data_dir) = create_test_config_dir();
    let nested = data_dir.join("nested").join("quick-ocr");
    let manager = ConfigManager::new(&nested).unwrap();

    assert!(nested.exists());
    assert_eq!(manager.data_dir(), nested);
    assert_eq!(manager.config_path(), nested.join("config.json"));
    assert_eq!(manager.log_dir(), nested.join("logs"));
}

#[test]
fn test_load_default_config_writes_file() {
    let (_temp_dir, data_dir) = create_test_config_dir();
    let manager = ConfigManager::new(&data_dir).unwrap();

    let config = manager.load().unwrap();
    assert_eq!(config, Config::default());
    assert_eq!(config.language, "chi_sim+eng");

    let on_disk = read_json(&manager.config_path());
    assert_eq!(on_disk["language"], "chi_sim+eng");
    assert_eq!(on_disk["autoClipboard"], true);
    assert_eq!(on_disk["languages"]["jpn"], false);
}

#[test]
fn test_older_file_is_backfilled() {
    let (_temp_dir, data_dir) = create_test_config_dir();
    fs::write(
        data_dir.join("config.json"),
        r#"{"shortcut": "Shift+Alt+O", "language": "jpn+eng"}"#,
    )
    .unwrap();

    let manager = ConfigManager::new(&data_dir).unwrap();
    let config = manager.load().unwrap();

    assert_eq!(config.shortcut, "Shift+Alt+O");
    assert_eq!(config.language, "eng+jpn");
    assert_eq!(config.languages.get("jpn"), Some(&true));
    assert_eq!(config.languages.get("chi_sim"), Some(&false));
    assert!(config.show_notification);

    // Backfilled fields are persisted
    let on_disk = read_json(&manager.config_path());
    assert_eq!(on_disk["showNotification"], true);
    assert!(on_disk["languages"].is_object());
}

#[test]
fn test_corrupt_config_is_backed_up_and_reset() {
    let (_temp_dir, data_dir) = create_test_config_dir();
    let corrupt = "{ \"shortcut\": ";
    fs::write(data_dir.join("config.json"), corrupt).unwrap();

    let manager = ConfigManager::new(&data_dir).unwrap();
    let config = manager.load().unwrap();
    assert_eq!(config, Config::default());

    let backups = backups_of(&data_dir, "config.json");
    assert_eq!(backups.len(), 1);
    assert_eq!(fs::read_to_string(&backups[0]).unwrap(), corrupt);

    assert_eq!(read_json(&manager.config_path())["language"], "chi_sim+eng");
}

#[test]
fn test_undecodable_config_is_backed_up_and_reset() {
    let (_temp_dir, data_dir) = create_test_config_dir();
    fs::write(data_dir.join("config.json"), [0xff, 0xfe, b'{', 0x80]).unwrap();

    let manager = ConfigManager::new(&data_dir).unwrap();
    let config = manager.load().unwrap();

    assert_eq!(config, Config::default());
    assert_eq!(backups_of(&data_dir, "config.json").len(), 1);

    // The daemon context starts on top of the recovered file
    assert!(AppContext::load(manager).is_ok());
}

#[test]
fn test_wrongly_shaped_config_is_backed_up() {
    let (_temp_dir, data_dir) = create_test_config_dir();
    fs::write(data_dir.join("config.json"), "[1, 2, 3]").unwrap();

    let manager = ConfigManager::new(&data_dir).unwrap();
    let config = manager.load().unwrap();

    assert_eq!(config, Config::default());
    assert_eq!(backups_of(&data_dir, "config.json").len(), 1);
}

#[test]
fn test_save_partial_merges_and_persists() {
    let (_temp_dir, data_dir) = create_test_config_dir();
    let manager = ConfigManager::new(&data_dir).unwrap();

    let mut languages = indexmap::IndexMap::new();
    languages.insert("kor".to_string(), true);
    languages.insert("eng".to_string(), false);

    let merged = manager
        .save_partial(PartialConfig {
            languages: Some(languages),
            auto_clipboard: Some(false),
            ..Default::default()
        })
        .unwrap();

    assert_eq!(merged.language, "kor");
    assert!(!merged.auto_clipboard);

    let reloaded = manager.load().unwrap();
    assert_eq!(reloaded, merged);
}

#[test]
fn test_all_languages_disabled_falls_back_to_eng() {
    let (_temp_dir, data_dir) = create_test_config_dir();
    let manager = ConfigManager::new(&data_dir).unwrap();

    let languages = Config::default()
        .languages
        .keys()
        .map(|code| (code.clone(), false))
        .collect();

    let merged = manager
        .save_partial(PartialConfig {
            languages: Some(languages),
            ..Default::default()
        })
        .unwrap();

    assert_eq!(merged.language, "eng");
    assert_eq!(merged.languages.get("eng"), Some(&true));
}

#[test]
fn test_default_data_dir_override_wins() {
    let (_temp_dir, data_dir) = create_test_config_dir();
    let resolved = ConfigManager::default_data_dir(Some(&data_dir)).unwrap();
    assert_eq!(resolved, data_dir);
}

#[test]
fn test_history_store_lives_beside_config() {
    let (_temp_dir, data_dir) = create_test_config_dir();
    let manager = ConfigManager::new(&data_dir).unwrap();

    let history = manager.history_store();
    assert_eq!(history.path(), data_dir.join("ocr_history.json"));
}

#[tokio::test]
async fn test_app_context_save_settings_broadcasts() {
    let (_temp_dir, data_dir) = create_test_config_dir();
    let context = AppContext::load(ConfigManager::new(&data_dir).unwrap()).unwrap();
    let mut rx = context.subscribe_config();

    assert!(context.save_settings(PartialConfig {
        shortcut: Some("Shift+Alt+T".to_string()),
        ..Default::default()
    }));

    let published = timeout(Duration::from_millis(100), rx.recv())
        .await
        .expect("Timeout waiting for config")
        .expect("Channel closed");
    assert_eq!(published.shortcut, "Shift+Alt+T");
    assert_eq!(context.config().shortcut, "Shift+Alt+T");
    assert_eq!(read_json(&context.config_manager().config_path())["shortcut"], "Shift+Alt+T");
}

#[test]
fn test_app_context_reload_picks_up_external_edit() {
    let (_temp_dir, data_dir) = create_test_config_dir();
    let context = AppContext::load(ConfigManager::new(&data_dir).unwrap()).unwrap();

    // Nothing changed on disk
    assert!(!context.reload_config().unwrap());

    // Another process edits the file
    let mut on_disk = read_json(&context.config_manager().config_path());
    on_disk["mergeParagraphs"] = json!(true);
    fs::write(
        context.config_manager().config_path(),
        serde_json::to_string(&on_disk).unwrap(),
    )
    .unwrap();

    assert!(context.reload_config().unwrap());
    assert!(context.config().merge_paragraphs);
}
