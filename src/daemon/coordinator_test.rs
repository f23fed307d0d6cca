// Coordinator tests against in-memory pages

use super::*;
use crate::config::{ReplayConfig, ResolverConfig};
use crate::page::memory::MemoryPage;
use crate::recorder::{RawEvent, RawEventKind};
use crate::replay::{ReplayStatus, ReplaySummary};
use crate::step::{Action, StepKind};
use crate::store::MemoryStore;
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use std::time::Duration;

const START: &str = "https://example.com/start";
const OTHER: &str = "https://example.com/other";

const FORM: &str = r#"<html><body>
    <button id="submit">Go</button>
    <input id="name" type="text">
</body></html>"#;

struct FormLauncher;

#[async_trait]
impl PageLauncher<MemoryPage> for FormLauncher {
    async fn launch(&self, _tab_name: &str) -> Result<MemoryPage> {
        let page = MemoryPage::new(START, FORM);
        page.route(START, FORM);
        page.route(OTHER, r#"<html><body><a id="y" href="/">Next</a></body></html>"#);
        Ok(page)
    }
}

fn coordinator(attempts: u32) -> Arc<Coordinator<MemoryPage>> {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    Settings {
        recording_delay: 0,
        replay_delay: 0,
    }
    .save(&*store)
    .unwrap();

    let config = Config {
        resolver: ResolverConfig {
            attempts,
            retry_delay_ms: 20,
            visibility_timeout_ms: 20,
            visibility_poll_ms: 5,
        },
        replay: ReplayConfig {
            scroll_poll_ms: 1,
            scroll_max_polls: 5,
            ready_timeout_ms: 100,
            ..Default::default()
        },
        ..Default::default()
    };
    Arc::new(Coordinator::new(store, config, Arc::new(FormLauncher)))
}

/// Collect events until the run reports its terminal event
async fn wait_terminal(coordinator: &Coordinator<MemoryPage>, execution_id: &str) -> Vec<ReplayEvent> {
    let mut events = Vec::new();
    for _ in 0..200 {
        events.extend(coordinator.events(execution_id));
        if events.iter().any(ReplayEvent::is_terminal) {
            return events;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("execution {execution_id} never finished: {events:?}");
}

fn terminal_status(events: &[ReplayEvent]) -> ReplayStatus {
    match events.iter().find(|e| e.is_terminal()) {
        Some(ReplayEvent::Completed { summary, .. })
        | Some(ReplayEvent::Failed { summary, .. })
        | Some(ReplayEvent::Interrupted { summary, .. }) => summary.status,
        _ => ReplayStatus::Running,
    }
}

#[tokio::test]
async fn test_record_then_replay_in_tab() {
    let coordinator = coordinator(2);
    coordinator.start_recording("form", "main", None).await.unwrap();

    let page = coordinator.tabs().get_tab("main").await.unwrap();
    let target = page.snapshot_of("#submit").unwrap();
    assert!(page.emit(RawEvent::new(
        RawEventKind::Click { scroll_before: None },
        target,
        100,
        START
    )));
    coordinator.poll_recordings().await;

    let test = coordinator.stop_recording("main").await.unwrap();
    assert_eq!(test.len(), 1);
    assert!(!page.recorder_installed());
    assert_eq!(coordinator.list_tests().unwrap()[0].steps, 1);

    let execution_id = coordinator
        .replay_test("form", "main", Some("run-1".to_string()))
        .await
        .unwrap();
    assert_eq!(execution_id, "run-1");

    let events = wait_terminal(&coordinator, &execution_id).await;
    assert_eq!(terminal_status(&events), ReplayStatus::Completed);
    assert!(matches!(events[0], ReplayEvent::Progress { step_index: 0, .. }));
    assert!(!coordinator.registry().is_active("main", "run-1"));
}

#[tokio::test]
async fn test_navigation_is_resumed_by_the_coordinator() {
    let coordinator = coordinator(2);
    let mut test = StepSequence::new("nav", START);
    test.steps = vec![
        Step::new(Action::Navigation { url: OTHER.to_string() }, 1, START),
        Step::new(
            Action::Click {
                selector: "#y".to_string(),
                text: Some("Next".to_string()),
                scroll_before: None,
            },
            2,
            OTHER,
        ),
    ];
    coordinator.save_test(test).unwrap();

    let execution_id = coordinator.replay_test("nav", "main", None).await.unwrap();
    let events = wait_terminal(&coordinator, &execution_id).await;

    match events.last() {
        Some(ReplayEvent::Completed { summary, .. }) => {
            assert_eq!(summary.executed_steps, 2);
        }
        other => panic!("expected completion, got {other:?}"),
    }
    let page = coordinator.tabs().get_tab("main").await.unwrap();
    assert_eq!(page.current_url().await.unwrap(), OTHER);
}

#[tokio::test]
async fn test_second_replay_in_same_tab_is_rejected() {
    let coordinator = coordinator(20);
    let mut test = StepSequence::new("slow", START);
    test.steps = vec![Step::new(
        Action::Click {
            selector: "#missing".to_string(),
            text: None,
            scroll_before: None,
        },
        1,
        START,
    )];
    coordinator.save_test(test).unwrap();

    let first = coordinator.replay_test("slow", "main", None).await.unwrap();
    let second = coordinator.replay_test("slow", "main", None).await;
    let err = second.unwrap_err().downcast::<ReplayError>().unwrap();
    assert!(matches!(err, ReplayError::AlreadyRunning(ref tab) if tab == "main"));

    // The first run still owns the tab and reports its own failure
    let events = wait_terminal(&coordinator, &first).await;
    assert_eq!(terminal_status(&events), ReplayStatus::Failed);
}

#[tokio::test]
async fn test_unknown_test_and_execution() {
    let coordinator = coordinator(2);
    let err = coordinator.replay_test("nope", "main", None).await.unwrap_err();
    assert!(err.to_string().contains("not found"));
    assert!(!coordinator.force_stop("unknown"));
    assert!(coordinator.events("unknown").is_empty());
}

#[tokio::test]
async fn test_full_page_capture_needs_an_open_tab() {
    let coordinator = coordinator(2);
    assert!(coordinator.capture_full_page("main").await.is_err());

    coordinator.tabs().get_or_create_tab("main").await.unwrap();
    let data_url = coordinator.capture_full_page("main").await.unwrap();
    assert!(data_url.starts_with("data:image/png;base64,"));
}

#[tokio::test]
async fn test_recording_twice_in_one_tab_is_rejected() {
    let coordinator = coordinator(2);
    coordinator.start_recording("a", "main", None).await.unwrap();
    assert!(coordinator.start_recording("b", "main", None).await.is_err());
    assert!(coordinator.replay_test("a", "main", None).await.is_err());
    assert!(coordinator.capture_screenshot("main").await.is_ok());
    assert!(coordinator.stop_recording("other").await.is_err());
}

#[tokio::test]
async fn test_update_settings_keeps_unset_values() {
    let coordinator = coordinator(2);
    let settings = coordinator.update_settings(None, Some(250)).unwrap();
    assert_eq!(
        settings,
        Settings {
            recording_delay: 0,
            replay_delay: 250
        }
    );
    assert_eq!(coordinator.settings().unwrap(), settings);
}

#[tokio::test]
async fn test_rejected_resume_reports_a_terminal_failure() {
    let coordinator = coordinator(2);
    coordinator.registry().try_begin("main", "other").unwrap();

    let mut test = StepSequence::new("form", START);
    test.steps = vec![
        Step::new(Action::Navigation { url: OTHER.to_string() }, 1, START),
        Step::new(
            Action::Click {
                selector: "#y".to_string(),
                text: None,
                scroll_before: None,
            },
            2,
            OTHER,
        ),
    ];
    let state = ExecutionState {
        test_data: test,
        current_step_index: 1,
        start_time: now_millis(),
        tab_id: "main".to_string(),
        execution_id: "mine".to_string(),
    };
    coordinator.resume_test(state).await.unwrap();

    let events = wait_terminal(&coordinator, "mine").await;
    match events.last() {
        Some(ReplayEvent::Failed { summary, failure, .. }) => {
            assert_eq!(summary.status, ReplayStatus::Failed);
            assert_eq!(failure.step_index, 1);
            assert_eq!(failure.selector.as_deref(), Some("#y"));
            assert_eq!(failure.exit_code, ReplayError::AlreadyRunning(String::new()).exit_code());
        }
        other => panic!("expected a failure, got {other:?}"),
    }
    // The run holding the tab keeps it
    assert!(coordinator.registry().is_active("main", "other"));
}

#[tokio::test]
async fn test_slow_poll_does_not_block_other_tabs() {
    let coordinator = coordinator(2);
    coordinator.update_settings(Some(400), None).unwrap();
    coordinator.start_recording("slow", "main", None).await.unwrap();

    // A navigation makes the next poll wait out the recording delay
    let page = coordinator.tabs().get_tab("main").await.unwrap();
    page.navigate(OTHER).await.unwrap();
    let polling = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.poll_recordings().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(
        Duration::from_millis(200),
        coordinator.start_recording("quick", "side", None),
    )
    .await
    .expect("blocked behind the other tab's poll")
    .unwrap();

    polling.await.unwrap();
    let test = coordinator.stop_recording("main").await.unwrap();
    assert_eq!(test.steps[0].kind(), StepKind::Navigation);
    assert!(coordinator.stop_recording("side").await.is_ok());
}

fn finished(execution_id: &str) -> ReplayEvent {
    ReplayEvent::Completed {
        execution_id: execution_id.to_string(),
        summary: ReplaySummary {
            test_name: "form".to_string(),
            execution_id: execution_id.to_string(),
            status: ReplayStatus::Completed,
            passed: true,
            total_steps: 1,
            executed_steps: 1,
            duration_ms: 1,
            error: None,
        },
    }
}

#[tokio::test]
async fn test_undrained_events_expire_after_the_run_ends() {
    let events = Arc::new(DashMap::new());
    let (tx, rx) = mpsc::unbounded_channel();
    let forwarder = tokio::spawn(buffer_events(Arc::clone(&events), rx, Duration::from_millis(30)));

    tx.send(ReplayEvent::Progress {
        execution_id: "running".to_string(),
        step_index: 0,
        total_steps: 2,
        kind: StepKind::Click,
    })
    .unwrap();
    tx.send(finished("done")).unwrap();
    drop(tx);
    forwarder.await.unwrap();
    assert!(events.contains_key("done"));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!events.contains_key("done"));
    // Runs without a terminal event are still being followed
    assert!(events.contains_key("running"));
}
