use serde_json::Value;
use tasklink::error::{exit_codes, Error, JsonError};
use tasklink::model::{GatingClass, TaskStatus};
use tasklink::validate::Violation;

#[test]
fn exit_code_user_error() {
    let err = Error::NotFound("a".to_string());
    assert_eq!(err.exit_code(), exit_codes::USER_ERROR);
}

#[test]
fn exit_code_policy_blocked() {
    let err = Error::InvalidTransition {
        task: "a".to_string(),
        from: TaskStatus::Pending,
        to: TaskStatus::Complete,
    };
    assert_eq!(err.exit_code(), exit_codes::POLICY_BLOCKED);
}

#[test]
fn exit_code_operation_failed() {
    let err = Error::ConcurrentModification {
        task: "a".to_string(),
    };
    assert_eq!(err.exit_code(), exit_codes::OPERATION_FAILED);
}

#[test]
fn details_include_cycle_path() {
    let err = Error::CycleDetected {
        from: "a".to_string(),
        to: "b".to_string(),
        class: GatingClass::Dependency,
        path: vec!["a".to_string(), "b".to_string(), "a".to_string()],
    };
    let details = err.details().expect("details");
    assert_eq!(details["class"], Value::String("dependency".to_string()));
    assert_eq!(details["path"].as_array().map(Vec::len), Some(3));
    assert_eq!(err.kind(), "cycle_detected");
}

#[test]
fn json_error_carries_violations() {
    let err = Error::CorruptGraph(vec![Violation::MultipleParents {
        task: "c".to_string(),
        parents: vec!["p1".to_string(), "p2".to_string()],
    }]);
    let json = JsonError::from(&err);
    assert_eq!(json.code, exit_codes::OPERATION_FAILED);
    assert_eq!(json.kind, "corrupt_graph");
    let details = json.details.expect("details");
    assert_eq!(details["violations"][0]["kind"], "multiple_parents");
}

#[test]
fn io_errors_have_no_details() {
    let err = Error::from(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
    assert_eq!(err.kind(), "io");
    assert!(err.details().is_none());
}
