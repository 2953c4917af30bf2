//! Tests for run finalization.

mod common;

use common::{assert_well_formed, event_names, results_for, tool_call};
use pretty_assertions::assert_eq;
use runwire::finalizer::{finalize_run_events, FinalizeOptions, DEFAULT_STOPPED_MESSAGE};
use runwire::types::{Event, Role};

fn sequences() -> Vec<Vec<Event>> {
    vec![
        Vec::new(),
        vec![Event::run_started("th", "r1")],
        vec![
            Event::run_started("th", "r1"),
            Event::text_message_start("m1", Role::Assistant),
        ],
        vec![
            Event::run_started("th", "r1"),
            Event::text_message_start("m1", Role::Assistant),
            Event::text_message_content("m1", "a"),
            Event::tool_call_start("t1", "x", Some("m1".to_string())),
            Event::tool_call_args("t1", "{"),
            Event::run_finished("th", "r1"),
        ],
        vec![
            Event::run_started("th", "r1"),
            Event::tool_call_start("t1", "x", None),
            Event::tool_call_end("t1"),
            Event::tool_call_start("t2", "y", None),
            Event::run_error("boom", None),
            Event::text_message_start("late", Role::Assistant),
        ],
        vec![
            Event::text_message_start("m1", Role::Assistant),
            Event::text_message_start("m2", Role::Assistant),
            Event::text_message_end("m1"),
            Event::run_finished("th", "r1"),
            Event::run_finished("th", "r1"),
        ],
    ]
}

#[test]
fn every_sequence_is_well_formed_after_finalization() {
    for events in sequences() {
        for options in [
            FinalizeOptions::default(),
            FinalizeOptions::stopped(),
            FinalizeOptions::default().with_interruption_message("network lost"),
        ] {
            let finalized = finalize_run_events(&events, &options);
            assert_well_formed(&finalized);
            // Finalization is a fixed point.
            assert_eq!(finalize_run_events(&finalized, &options), finalized);
        }
    }
}

#[test]
fn unterminated_message_is_closed_before_run_finished() {
    let events = vec![
        Event::run_started("th", "r1"),
        Event::text_message_start("m1", Role::Assistant),
        Event::text_message_content("m1", "hi"),
        Event::run_finished("th", "r1"),
    ];
    let finalized = finalize_run_events(&events, &FinalizeOptions::default());
    assert_eq!(
        event_names(&finalized),
        vec![
            "RUN_STARTED",
            "TEXT_MESSAGE_START",
            "TEXT_MESSAGE_CONTENT",
            "TEXT_MESSAGE_END",
            "RUN_FINISHED",
        ]
    );
    assert_eq!(
        finalized
            .iter()
            .filter(|event| matches!(event, Event::RunFinished { .. }))
            .count(),
        1
    );
}

#[test]
fn missing_terminal_gets_structured_result_and_incomplete_error() {
    let mut events = vec![Event::run_started("th", "r1")];
    events.extend(tool_call("t1", "search", r#"{"q":"x"}"#));

    let finalized = finalize_run_events(&events, &FinalizeOptions::default());
    let results = results_for(&finalized, "t1");
    assert_eq!(results.len(), 1);
    let payload: serde_json::Value = serde_json::from_str(results[0]).unwrap();
    assert_eq!(payload["status"], "error");
    assert_eq!(payload["reason"], "missing_terminal_event");
    match finalized.last() {
        Some(Event::RunError { code, .. }) => {
            assert_eq!(code.as_deref(), Some("INCOMPLETE_STREAM"))
        }
        other => panic!("expected RunError, got {other:?}"),
    }
}

#[test]
fn stopped_run_finishes_with_run_ids_of_its_start() {
    let mut events = vec![Event::run_started("th", "r9")];
    events.extend(tool_call("t1", "search", "{}"));

    let finalized = finalize_run_events(&events, &FinalizeOptions::stopped());
    assert_eq!(finalized.last(), Some(&Event::run_finished("th", "r9")));
    let payload: serde_json::Value =
        serde_json::from_str(results_for(&finalized, "t1")[0]).unwrap();
    assert_eq!(payload["reason"], "stop_requested");
    assert_eq!(payload["message"], DEFAULT_STOPPED_MESSAGE);
}

#[test]
fn terminal_log_never_gets_synthetic_results() {
    let mut events = vec![Event::run_started("th", "r1")];
    events.extend(tool_call("t1", "remote", "{}"));
    events.push(Event::run_finished("th", "r1"));
    let finalized = finalize_run_events(&events, &FinalizeOptions::default());
    assert_eq!(finalized, events);
}
