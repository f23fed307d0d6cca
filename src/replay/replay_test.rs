// Unit tests for the replay state machine against an in-memory page

use super::*;
use crate::config::{ReplayConfig, ResolverConfig, VisualConfig};
use crate::errors::ReplayError;
use crate::execution::{ExecutionState, SessionRegistry};
use crate::page::memory::{Dispatched, MemoryPage};
use crate::page::{Interaction, Page};
use crate::selector::Resolver;
use crate::step::{Action, Step, StepSequence};
use crate::store::{MemoryStore, Settings, Store, TestLibrary};
use crate::types::ScrollPosition;
use crate::visual::{self, VisualDiff};
use async_trait::async_trait;
use image::{ImageBuffer, Rgba};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tokio::sync::mpsc;

const START: &str = "https://example.com/start";
const OTHER: &str = "https://example.com/other";

const FORM: &str = r#"<html><body>
    <button id="submit">Go</button>
    <input id="name" type="text">
</body></html>"#;

struct Harness {
    page: Arc<MemoryPage>,
    store: Arc<dyn Store>,
    registry: Arc<SessionRegistry>,
    events: mpsc::UnboundedReceiver<ReplayEvent>,
    engine: ReplayEngine<MemoryPage>,
}

fn harness(url: &str, html: &str) -> Harness {
    let page = Arc::new(MemoryPage::new(url, html));
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    Settings {
        recording_delay: 0,
        replay_delay: 0,
    }
    .save(&*store)
    .unwrap();
    let registry = Arc::new(SessionRegistry::new());
    let (tx, events) = mpsc::unbounded_channel();

    let engine = ReplayEngine::new(Arc::clone(&page), Arc::clone(&store), Arc::clone(&registry))
        .with_resolver(Resolver::new(ResolverConfig {
            attempts: 2,
            retry_delay_ms: 5,
            visibility_timeout_ms: 20,
            visibility_poll_ms: 5,
        }))
        .with_replay_config(ReplayConfig {
            scroll_poll_ms: 1,
            scroll_max_polls: 5,
            ..Default::default()
        })
        .with_events(tx);

    Harness {
        page,
        store,
        registry,
        events,
        engine,
    }
}

fn click(selector: &str, text: Option<&str>, ts: u64) -> Step {
    Step::new(
        Action::Click {
            selector: selector.to_string(),
            text: text.map(str::to_string),
            scroll_before: None,
        },
        ts,
        START,
    )
}

fn input(selector: &str, value: &str, ts: u64) -> Step {
    Step::new(
        Action::Input {
            selector: selector.to_string(),
            value: value.to_string(),
        },
        ts,
        START,
    )
}

fn sequence(steps: Vec<Step>) -> StepSequence {
    StepSequence::merge("form", START, steps, Vec::new())
}

fn white_png(width: u32, height: u32) -> Vec<u8> {
    visual::encode_png(&ImageBuffer::from_pixel(width, height, Rgba([255, 255, 255, 255]))).unwrap()
}

fn black_png(width: u32, height: u32) -> Vec<u8> {
    visual::encode_png(&ImageBuffer::from_pixel(width, height, Rgba([0, 0, 0, 255]))).unwrap()
}

fn drain(events: &mut mpsc::UnboundedReceiver<ReplayEvent>) -> Vec<ReplayEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test]
async fn test_completes_against_identical_dom() {
    let mut h = harness(START, FORM);
    let test = sequence(vec![click("#submit", Some("Go"), 1), input("#name", "hi", 2)]);

    let result = h.engine.replay_test(test, "tab", "exec-1").await.unwrap();

    let RunOutcome::Completed(summary) = &result.outcome else {
        panic!("expected completion, got {:?}", result.outcome);
    };
    assert!(summary.passed);
    assert_eq!((summary.executed_steps, summary.total_steps), (2, 2));
    assert_eq!(summary.error, None);
    assert_eq!(
        h.page.dispatched(),
        vec![
            Dispatched {
                target: "button#submit".to_string(),
                interaction: Interaction::Click,
            },
            Dispatched {
                target: "input#name".to_string(),
                interaction: Interaction::Input {
                    value: "hi".to_string()
                },
            },
        ]
    );

    assert_eq!(h.engine.states().get("tab").unwrap(), None);
    assert_eq!(h.registry.active_execution("tab"), None);

    let events = drain(&mut h.events);
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e.execution_id() == "exec-1"));
    assert!(matches!(events[2], ReplayEvent::Completed { .. }));
}

#[tokio::test]
async fn test_changed_text_fails_at_first_step() {
    let mut h = harness(START, &FORM.replace(">Go<", ">Go!<"));
    let test = sequence(vec![click("#submit", Some("Go"), 1), input("#name", "hi", 2)]);

    let result = h.engine.replay_test(test, "tab", "exec-1").await.unwrap();

    let failure = result.outcome.failure().expect("run should fail");
    assert_eq!(failure.error, "ElementNotFoundError");
    assert_eq!(failure.step_index, 0);
    assert_eq!(failure.step_number(), 1);
    assert_eq!(failure.selector.as_deref(), Some("#submit"));
    assert!(failure.to_string().starts_with("Step 1 (click #submit) failed"));

    assert!(h.page.dispatched().is_empty());
    assert_eq!(h.engine.states().get("tab").unwrap(), None);
    assert_eq!(h.registry.active_execution("tab"), None);

    let events = drain(&mut h.events);
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert!(matches!(events.last(), Some(ReplayEvent::Failed { .. })));
}

#[tokio::test]
async fn test_invalid_selector_fails_the_run() {
    let h = harness(START, FORM);
    let result = h
        .engine
        .replay_test(sequence(vec![click("button[", None, 1)]), "tab", "exec")
        .await
        .unwrap();

    assert_eq!(
        result.outcome.failure().map(|f| f.error.as_str()),
        Some("InvalidSelectorError")
    );
}

#[tokio::test]
async fn test_dispatch_failure_is_an_action_error() {
    let h = harness(START, FORM);
    h.page.fail_next_dispatch("element detached");

    let result = h
        .engine
        .replay_test(sequence(vec![click("#submit", None, 1)]), "tab", "exec")
        .await
        .unwrap();

    let failure = result.outcome.failure().unwrap();
    assert_eq!(failure.error, "ActionDispatchError");
    assert_eq!(failure.exit_code, 4);
    assert!(failure.message.contains("element detached"));
}

#[tokio::test]
async fn test_navigation_suspends_and_resumes_at_next_step() {
    let h = harness(OTHER, "<html><body></body></html>");
    h.page.route(
        START,
        r#"<html><body><a id="x">X</a><a id="y">Y</a></body></html>"#,
    );
    let test = sequence(vec![
        Step::new(
            Action::Navigation {
                url: START.to_string(),
            },
            1,
            OTHER,
        ),
        click("#x", None, 2),
        click("#y", None, 3),
    ]);

    let first = h.engine.replay_test(test, "tab", "exec").await.unwrap();
    let RunOutcome::NavigationPending(state) = first.outcome else {
        panic!("expected navigation, got {:?}", first.outcome);
    };
    assert_eq!(state.current_step_index, 1);
    assert_eq!(h.engine.states().get("tab").unwrap(), Some(state.clone()));
    assert_eq!(h.page.current_url().await.unwrap(), START);
    assert!(h.registry.is_active("tab", "exec"));

    let resumed = h.engine.resume_test(state).await.unwrap();
    let summary = resumed.outcome.summary().unwrap();
    assert_eq!(resumed.outcome.status(), ReplayStatus::Completed);
    assert_eq!(summary.executed_steps, 3);

    let targets: Vec<String> = h.page.dispatched().into_iter().map(|d| d.target).collect();
    assert_eq!(targets, vec!["a#x".to_string(), "a#y".to_string()]);
    assert_eq!(h.engine.states().get("tab").unwrap(), None);
}

#[tokio::test]
async fn test_navigation_to_current_url_is_a_checkpoint() {
    let h = harness(START, FORM);
    let test = sequence(vec![
        Step::new(
            Action::Navigation {
                url: format!("{}#top", START),
            },
            1,
            START,
        ),
        click("#submit", None, 2),
    ]);

    let result = h.engine.replay_test(test, "tab", "exec").await.unwrap();
    assert_eq!(result.outcome.status(), ReplayStatus::Completed);
}

#[tokio::test]
async fn test_second_replay_in_same_tab_is_rejected() {
    let h = harness(START, FORM);
    let running = ExecutionState {
        test_data: sequence(vec![click("#submit", None, 1)]),
        current_step_index: 1,
        start_time: 5,
        tab_id: "tab".to_string(),
        execution_id: "first".to_string(),
    };
    h.engine.states().put(&running).unwrap();

    let err = h
        .engine
        .replay_test(sequence(vec![input("#name", "x", 1)]), "tab", "second")
        .await
        .unwrap_err();

    assert!(matches!(err, ReplayError::AlreadyRunning(_)));
    assert_eq!(h.engine.states().get("tab").unwrap(), Some(running));
    assert!(h.page.dispatched().is_empty());
    assert_eq!(h.registry.active_execution("tab"), None);
}

#[tokio::test]
async fn test_resume_rejects_foreign_execution() {
    let h = harness(START, FORM);
    h.registry.try_begin("tab", "owner").unwrap();
    let state = ExecutionState {
        test_data: sequence(vec![click("#submit", None, 1)]),
        current_step_index: 0,
        start_time: 5,
        tab_id: "tab".to_string(),
        execution_id: "intruder".to_string(),
    };

    assert!(matches!(
        h.engine.resume_test(state).await,
        Err(ReplayError::AlreadyRunning(_))
    ));
    assert!(h.registry.is_active("tab", "owner"));
}

/// Answers `Continue` but asks the run to stop, like a user hitting stop mid-run
struct StopDuringDecision {
    registry: Arc<SessionRegistry>,
}

#[async_trait]
impl DiffDecider for StopDuringDecision {
    async fn decide(&self, context: &StepContext, _diff: &VisualDiff) -> DiffDecision {
        self.registry.request_stop(&context.execution_id);
        DiffDecision::Continue
    }
}

#[tokio::test]
async fn test_stop_request_interrupts_at_next_step() {
    let mut h = harness(START, FORM);
    h.page.set_viewport_png(black_png(32, 32));
    let shot = Step::new(Action::Screenshot, 1, START)
        .with_screenshot(visual::encode_data_url(&white_png(32, 32)));
    let test = sequence(vec![shot, click("#submit", None, 2)]);

    let engine = h.engine.with_decider(Arc::new(StopDuringDecision {
        registry: Arc::clone(&h.registry),
    }));
    let result = engine.replay_test(test, "tab", "exec").await.unwrap();

    let RunOutcome::Interrupted(summary) = &result.outcome else {
        panic!("expected interruption, got {:?}", result.outcome);
    };
    assert_eq!(summary.executed_steps, 1);
    assert!(result.outcome.failure().is_none());
    assert!(h.page.dispatched().is_empty());
    assert_eq!(engine.states().get("tab").unwrap(), None);
    assert!(!h.registry.is_stop_requested("exec"));

    let events = drain(&mut h.events);
    assert!(matches!(events.last(), Some(ReplayEvent::Interrupted { .. })));
    assert!(!events.iter().any(|e| matches!(e, ReplayEvent::Failed { .. })));
}

async fn run_visual(decision: DiffDecision) -> (Harness, ReplayOutcome) {
    let h = harness(START, FORM);
    h.page.set_viewport_png(black_png(16, 16));
    let shot = Step::new(Action::Screenshot, 1, START)
        .with_screenshot(visual::encode_data_url(&white_png(16, 16)));
    let test = sequence(vec![shot]);
    TestLibrary::new(&*h.store).save(test.clone()).unwrap();

    let engine = ReplayEngine::new(Arc::clone(&h.page), Arc::clone(&h.store), Arc::clone(&h.registry))
        .with_visual_config(VisualConfig {
            on_diff: decision,
            ..Default::default()
        });
    let result = engine.replay_test(test, "tab", "exec").await.unwrap();
    (h, result)
}

#[tokio::test]
async fn test_visual_stop_fails_with_regression() {
    let (h, result) = run_visual(DiffDecision::Stop).await;

    let failure = result.outcome.failure().unwrap();
    assert_eq!(failure.error, "VisualRegressionError");
    assert_eq!(failure.exit_code, 5);
    assert_eq!(
        result.checkpoints,
        vec![CheckpointResult {
            step_index: 0,
            difference_percentage: Some(100.0),
            decision: Some(DiffDecision::Stop),
        }]
    );
    // The capture hid the recorder overlays
    assert_eq!(h.page.captures(), vec![true]);
}

#[tokio::test]
async fn test_visual_update_rewrites_baseline() {
    let (h, result) = run_visual(DiffDecision::Update).await;

    assert_eq!(result.outcome.status(), ReplayStatus::Completed);
    let saved = TestLibrary::new(&*h.store).get("form").unwrap().unwrap();
    let baseline = visual::decode_data_url(saved.steps[0].screenshot.as_deref().unwrap()).unwrap();
    assert_eq!(baseline, black_png(16, 16));
}

#[tokio::test]
async fn test_visual_continue_keeps_baseline() {
    let (h, result) = run_visual(DiffDecision::Continue).await;

    assert_eq!(result.outcome.status(), ReplayStatus::Completed);
    let saved = TestLibrary::new(&*h.store).get("form").unwrap().unwrap();
    let baseline = visual::decode_data_url(saved.steps[0].screenshot.as_deref().unwrap()).unwrap();
    assert_eq!(baseline, white_png(16, 16));
}

#[tokio::test]
async fn test_unreadable_baseline_passes_without_diff() {
    let h = harness(START, FORM);
    let shot = Step::new(Action::Screenshot, 1, START).with_screenshot("data:image/png;base64,AAAA");
    let plain = Step::new(Action::Screenshot, 2, START);

    let result = h
        .engine
        .replay_test(sequence(vec![shot, plain]), "tab", "exec")
        .await
        .unwrap();

    assert_eq!(result.outcome.status(), ReplayStatus::Completed);
    assert_eq!(
        result.checkpoints,
        vec![CheckpointResult {
            step_index: 0,
            difference_percentage: None,
            decision: None,
        }]
    );
}

#[tokio::test]
async fn test_element_checkpoint_compares_cropped_capture() {
    let h = harness(START, FORM);
    let step = click("#submit", Some("Go"), 1)
        .with_screenshot(visual::encode_data_url(&white_png(100, 20)));

    let result = h
        .engine
        .replay_test(sequence(vec![step]), "tab", "exec")
        .await
        .unwrap();

    assert_eq!(result.outcome.status(), ReplayStatus::Completed);
    assert_eq!(result.checkpoints[0].difference_percentage, Some(0.0));
}

#[tokio::test]
async fn test_screenshot_checkpoint_restores_recorded_scroll() {
    let h = harness(START, FORM);
    let shot = Step::new(Action::Screenshot, 1, START)
        .with_scroll(ScrollPosition::new(0.0, 120.0))
        .with_screenshot(visual::encode_data_url(&white_png(320, 240)));

    let result = h
        .engine
        .replay_test(sequence(vec![shot]), "tab", "exec")
        .await
        .unwrap();

    assert_eq!(result.outcome.status(), ReplayStatus::Completed);
    assert_eq!(h.page.capture_scrolls(), vec![ScrollPosition::new(0.0, 120.0)]);
    assert_eq!(result.checkpoints[0].difference_percentage, Some(0.0));
}

#[tokio::test]
async fn test_element_checkpoint_crops_after_scroll_restore() {
    let h = harness(START, FORM);
    // The button sits at document y=60; only rows 20..40 are white, where
    // it lands once the page is scrolled down by 40
    let viewport: image::RgbaImage = ImageBuffer::from_fn(320, 240, |_, y| {
        if (20..40).contains(&y) {
            Rgba([255, 255, 255, 255])
        } else {
            Rgba([0, 0, 0, 255])
        }
    });
    h.page.set_viewport_png(visual::encode_png(&viewport).unwrap());
    let step = click("#submit", Some("Go"), 1)
        .with_scroll(ScrollPosition::new(0.0, 40.0))
        .with_screenshot(visual::encode_data_url(&white_png(100, 20)));

    let result = h
        .engine
        .replay_test(sequence(vec![step]), "tab", "exec")
        .await
        .unwrap();

    assert_eq!(result.outcome.status(), ReplayStatus::Completed);
    assert_eq!(h.page.capture_scrolls(), vec![ScrollPosition::new(0.0, 40.0)]);
    assert_eq!(result.checkpoints[0].difference_percentage, Some(0.0));
}
