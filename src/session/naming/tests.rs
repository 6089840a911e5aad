use proptest::prelude::*;

use super::{
    FallbackTranslator, NameTranslator, fallback_identifier, has_non_ascii,
    sanitize_identifier,
};

#[test]
fn sanitize_identifier_normalizes_spacing_and_case() {
    assert_eq!(sanitize_identifier("  Fix  DB   "), "fix-db");
}

#[test]
fn sanitize_identifier_collapses_and_trims_hyphens() {
    assert_eq!(sanitize_identifier("---foo--bar---"), "foo-bar");
}

#[test]
fn sanitize_identifier_can_produce_empty() {
    assert_eq!(sanitize_identifier("!!!"), "");
}

#[test]
fn sanitize_identifier_keeps_underscores_and_digits() {
    assert_eq!(sanitize_identifier("fix_db 2"), "fix_db-2");
}

#[test]
fn sanitize_identifier_trims_edge_underscores() {
    assert_eq!(sanitize_identifier("_foo_"), "foo");
    assert_eq!(sanitize_identifier("-_foo-bar_-"), "foo-bar");
    assert_eq!(sanitize_identifier("___"), "");
}

#[test]
fn has_non_ascii_detects_multibyte_names() {
    assert!(has_non_ascii("修复数据库"));
    assert!(has_non_ascii("café"));
    assert!(!has_non_ascii("fix-db"));
    assert!(!has_non_ascii(""));
}

#[test]
fn fallback_identifier_embeds_timestamp() {
    assert_eq!(fallback_identifier(1_700_000_000), "session-1700000000");
}

#[test]
fn fallback_translator_yields_session_identifier() {
    let translated = FallbackTranslator.translate("修复数据库");
    assert!(translated.starts_with("session-"));
    assert!(!has_non_ascii(&translated));
}

proptest! {
    #[test]
    fn sanitize_identifier_is_idempotent(input in ".{0,64}") {
        let once = sanitize_identifier(&input);
        prop_assert_eq!(sanitize_identifier(&once), once.clone());
    }

    #[test]
    fn sanitize_identifier_output_matches_identifier_shape(input in ".{0,64}") {
        // Empty, or alphanumeric at both ends with only [a-z0-9_-] between.
        let sanitized = sanitize_identifier(&input);
        let all_valid_chars = sanitized
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
        prop_assert!(all_valid_chars);
        if let Some(first) = sanitized.chars().next() {
            prop_assert!(first.is_ascii_lowercase() || first.is_ascii_digit());
        }
        if let Some(last) = sanitized.chars().last() {
            prop_assert!(last.is_ascii_lowercase() || last.is_ascii_digit());
        }
        prop_assert!(!sanitized.contains("--"));
    }
}
