// Integration tests for structured operation logging around commits

mod common;

use common::{set, setup};
use relmap_core::logging_facility::init_test_capture;
use relmap_core::BuildDepth;

#[test]
fn test_commit_emits_start_and_end_events() {
    // Given: test capture and a pending author
    let capture = init_test_capture();
    let (_conn, mut session) = setup();
    let author = session.create("Author", BuildDepth::Single).unwrap();
    set(&author, "name", "Logged");

    // When: the session commits
    session.commit().unwrap();

    // Then: both commit events were captured with this request's id
    capture.assert_event_exists("commit", "start");
    capture.assert_event_exists("commit", "end");
    let request_id = session.context().request_id.to_string();
    let tagged = capture.count_events(|e| {
        e.op.as_deref() == Some("commit") && e.field("request_id") == Some(request_id.as_str())
    });
    assert!(tagged >= 1);
}

#[test]
fn test_failed_commit_emits_error_event() {
    // Given: test capture and an author missing its required name
    let capture = init_test_capture();
    let (_conn, mut session) = setup();
    session.create("Author", BuildDepth::Single).unwrap();

    // When: the commit fails validation
    assert!(session.commit().is_err());

    // Then: this commit's error event carries the validation code
    capture.assert_event_exists("commit", "end_error");
    let request_id = session.context().request_id.to_string();
    let failed: Vec<_> = capture
        .find("commit", "end_error")
        .into_iter()
        .filter(|e| e.field("request_id") == Some(request_id.as_str()))
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].field("err.code"), Some("ERR_VALIDATION"));
}
