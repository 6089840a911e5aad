use super::{
    MAX_TITLE_LEN, SquadError, Status, combine_errors, validate_title,
};

#[test]
fn status_serializes_as_tagged_name() {
    assert_eq!(
        serde_json::to_string(&Status::Running).expect("status should encode"),
        "\"running\""
    );
    assert_eq!(
        serde_json::to_string(&Status::Translating).expect("status should encode"),
        "\"translating\""
    );

    let decoded: Status =
        serde_json::from_str("\"paused\"").expect("status should decode");
    assert_eq!(decoded, Status::Paused);
}

#[test]
fn status_rejects_integer_encoding() {
    assert!(serde_json::from_str::<Status>("3").is_err());
}

#[test]
fn legacy_status_codes_map_to_names() {
    assert_eq!(Status::from_legacy_code(0), Status::Running);
    assert_eq!(Status::from_legacy_code(1), Status::Ready);
    assert_eq!(Status::from_legacy_code(2), Status::Loading);
    assert_eq!(Status::from_legacy_code(3), Status::Paused);
    assert_eq!(Status::from_legacy_code(99), Status::Ready);
}

#[test]
fn validate_title_accepts_max_length() {
    let title = "a".repeat(MAX_TITLE_LEN);
    assert!(validate_title(&title).is_ok());
}

#[test]
fn validate_title_rejects_empty_and_overlong() {
    assert!(matches!(
        validate_title(""),
        Err(SquadError::NameInvalid(_))
    ));

    let title = "a".repeat(MAX_TITLE_LEN + 1);
    assert!(matches!(
        validate_title(&title),
        Err(SquadError::NameInvalid(_))
    ));
}

#[test]
fn validate_title_counts_characters_not_bytes() {
    let title = "é".repeat(MAX_TITLE_LEN);
    assert!(validate_title(&title).is_ok());
}

#[test]
fn combine_errors_passes_through_single_error() {
    let result = combine_errors(vec![SquadError::BaseCommitUnset]);
    assert!(matches!(result, Err(SquadError::BaseCommitUnset)));
}

#[test]
fn combine_errors_aggregates_multiple() {
    let result = combine_errors(vec![
        SquadError::Io("read failed".to_string()),
        SquadError::ChildProcess("tmux exited".to_string()),
    ]);

    match result {
        Err(SquadError::Aggregate(errors)) => {
            assert_eq!(errors.len(), 2);
            let message = SquadError::Aggregate(errors).to_string();
            assert!(message.contains("multiple errors occurred:"));
            assert!(message.contains("read failed"));
            assert!(message.contains("tmux exited"));
        }
        other => panic!("expected aggregate, got: {other:?}"),
    }
}

#[test]
fn combine_errors_is_ok_when_empty() {
    assert!(combine_errors(Vec::new()).is_ok());
}

#[test]
fn base_commit_unset_message_is_matchable() {
    assert!(
        SquadError::BaseCommitUnset
            .to_string()
            .contains("base commit SHA not set")
    );
}
