use taskweave::error::{exit_codes, Error, JsonError};

#[test]
fn exit_codes_map_correctly() {
    let user = Error::InvalidArgument("bad".to_string());
    assert_eq!(user.exit_code(), exit_codes::USER_ERROR);

    let rejected = Error::CircularDependency {
        task: "tw-a".to_string(),
        depends_on: "tw-b".to_string(),
    };
    assert_eq!(rejected.exit_code(), exit_codes::REJECTED);

    let op = Error::OperationFailed("boom".to_string());
    assert_eq!(op.exit_code(), exit_codes::OPERATION_FAILED);
}

#[test]
fn json_error_includes_code_and_details() {
    let err = Error::CircularHierarchy {
        task: "tw-a".to_string(),
        parent: "tw-c".to_string(),
    };
    let json = JsonError::from(&err);
    assert_eq!(json.code, exit_codes::REJECTED);
    assert!(json.error.contains("circular hierarchy"));
    let details = json.details.expect("details");
    assert_eq!(details["parent"], "tw-c");
}

#[test]
fn user_errors_carry_no_details() {
    let err = Error::TaskNotFound("tw-x".to_string());
    let json = JsonError::from(&err);
    assert_eq!(json.code, exit_codes::USER_ERROR);
    assert!(json.details.is_none());
}
