// Unit tests for the key-value stores and typed wrappers

use super::*;
use crate::step::{Action, Step};
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

fn sample_test(name: &str) -> StepSequence {
    StepSequence::merge(
        name,
        "https://example.com/",
        vec![Step::new(
            Action::Click {
                selector: "#go".to_string(),
                text: Some("Go".to_string()),
                scroll_before: None,
            },
            10,
            "https://example.com/",
        )],
        vec![Step::new(Action::Screenshot, 20, "https://example.com/")],
    )
}

#[test]
fn test_memory_store_get_set_remove() {
    let store = MemoryStore::new();
    assert_eq!(store.get("missing").unwrap(), None);

    store.set("a", json!({"x": 1})).unwrap();
    assert_eq!(store.get("a").unwrap(), Some(json!({"x": 1})));
    assert_eq!(store.keys().unwrap(), vec!["a".to_string()]);

    store.remove("a").unwrap();
    assert_eq!(store.get("a").unwrap(), None);
    // Removing twice is fine
    store.remove("a").unwrap();
}

#[test]
fn test_file_store_persists_across_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("store.json");

    {
        let store = FileStore::open(path.clone()).unwrap();
        store.set("settings", json!({"replayDelay": 10})).unwrap();
        store.set("other", json!(true)).unwrap();
        store.remove("other").unwrap();
    }

    let reopened = FileStore::open(path).unwrap();
    assert_eq!(
        reopened.get("settings").unwrap(),
        Some(json!({"replayDelay": 10}))
    );
    assert_eq!(reopened.get("other").unwrap(), None);
}

#[test]
fn test_file_store_rejects_corrupt_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("store.json");
    std::fs::write(&path, "{not json").unwrap();
    assert!(FileStore::open(path).is_err());
}

#[test]
fn test_settings_default_and_partial() {
    let store = MemoryStore::new();
    assert_eq!(Settings::load(&store).unwrap(), Settings::default());

    store.set(SETTINGS_KEY, json!({"replayDelay": 25})).unwrap();
    let settings = Settings::load(&store).unwrap();
    assert_eq!(settings.replay_delay, 25);
    assert_eq!(settings.recording_delay, 500);

    Settings {
        recording_delay: 1,
        replay_delay: 2,
    }
    .save(&store)
    .unwrap();
    assert_eq!(
        store.get(SETTINGS_KEY).unwrap(),
        Some(json!({"recordingDelay": 1, "replayDelay": 2}))
    );
}

#[test]
fn test_library_save_replaces_by_name() {
    let store = MemoryStore::new();
    let library = TestLibrary::new(&store);

    library.save(sample_test("login")).unwrap();
    library.save(sample_test("checkout")).unwrap();

    let mut replacement = sample_test("login");
    replacement.steps.truncate(1);
    library.save(replacement).unwrap();

    let tests = library.list().unwrap();
    assert_eq!(tests.len(), 2);
    assert_eq!(library.get("login").unwrap().unwrap().steps.len(), 1);
    assert_eq!(library.get("checkout").unwrap().unwrap().steps.len(), 2);
}

#[test]
fn test_library_delete() {
    let store = MemoryStore::new();
    let library = TestLibrary::new(&store);
    library.save(sample_test("login")).unwrap();

    assert!(library.delete("login").unwrap());
    assert!(!library.delete("login").unwrap());
    assert!(library.list().unwrap().is_empty());
}

#[test]
fn test_library_update_baseline() {
    let store = MemoryStore::new();
    let library = TestLibrary::new(&store);
    library.save(sample_test("visual")).unwrap();

    library
        .update_baseline("visual", 1, "data:image/png;base64,QQ==".to_string())
        .unwrap();
    let test = library.get("visual").unwrap().unwrap();
    assert_eq!(
        test.steps[1].screenshot.as_deref(),
        Some("data:image/png;base64,QQ==")
    );

    assert!(library.update_baseline("missing", 0, String::new()).is_err());
    assert!(library.update_baseline("visual", 9, String::new()).is_err());
}

#[test]
fn test_key_helpers() {
    assert_eq!(recording_steps_key("login"), "recordingSteps:login");
    assert_eq!(execution_state_key("main"), "executionState:main");
}

#[test]
fn test_execution_state_does_not_rewrite_main_document() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("store.json");
    let store = FileStore::open(path.clone()).unwrap();
    TestLibrary::new(&store).save(sample_test("login")).unwrap();
    let before = std::fs::read(&path).unwrap();

    let key = execution_state_key("tab/1");
    store.set(&key, json!({"currentStepIndex": 1})).unwrap();
    store.set(&key, json!({"currentStepIndex": 2})).unwrap();

    assert_eq!(std::fs::read(&path).unwrap(), before);
    let files = std::fs::read_dir(temp_dir.path().join("executions")).unwrap().count();
    assert_eq!(files, 1);

    let reopened = FileStore::open(path.clone()).unwrap();
    assert_eq!(reopened.get(&key).unwrap(), Some(json!({"currentStepIndex": 2})));
    assert!(reopened.keys().unwrap().contains(&key));

    reopened.remove(&key).unwrap();
    assert_eq!(reopened.get(&key).unwrap(), None);
    let files = std::fs::read_dir(temp_dir.path().join("executions")).unwrap().count();
    assert_eq!(files, 0);
}

#[test]
fn test_inline_execution_state_moves_to_its_own_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("store.json");
    std::fs::write(
        &path,
        r#"{"settings": {"replayDelay": 5}, "executionState:main": {"currentStepIndex": 3}}"#,
    )
    .unwrap();

    let store = FileStore::open(path.clone()).unwrap();
    assert_eq!(
        store.get("executionState:main").unwrap(),
        Some(json!({"currentStepIndex": 3}))
    );

    let main: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(main, json!({"settings": {"replayDelay": 5}}));
    let reopened = FileStore::open(path).unwrap();
    assert_eq!(
        reopened.get("executionState:main").unwrap(),
        Some(json!({"currentStepIndex": 3}))
    );
}
