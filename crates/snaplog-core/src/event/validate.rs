//! Input validation for appends and file artifacts.
//!
//! Validation runs before anything touches the store, so a rejected call
//! never changes state.

use std::sync::LazyLock;

use regex::Regex;

use super::Payload;
use crate::error::{CoreError, Result};

/// `local@domain` where the domain has at least one dot between non-empty
/// labels.
static ACTOR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@(?:[a-zA-Z0-9-]+\.)+[a-zA-Z0-9-]+$")
        .expect("actor regex is valid")
});

/// Check that `actor` is a syntactically valid email address.
///
/// # Errors
///
/// Returns [`CoreError::Validation`] otherwise.
pub fn validate_actor(actor: &str) -> Result<()> {
    if ACTOR_REGEX.is_match(actor) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "actor '{actor}' is not an email address"
        )))
    }
}

/// Check that `payload` has at least one category.
///
/// The shape of each category is the projector's concern.
///
/// # Errors
///
/// Returns [`CoreError::Validation`] for an empty payload.
pub fn validate_payload(payload: &Payload) -> Result<()> {
    if payload.is_empty() {
        return Err(CoreError::Validation("payload must be a non-empty object".into()));
    }
    Ok(())
}

/// Parse an untyped JSON value into a payload.
///
/// # Errors
///
/// Returns [`CoreError::Validation`] when the value is not a non-empty object.
pub fn payload_from_value(value: serde_json::Value) -> Result<Payload> {
    match value {
        serde_json::Value::Object(map) => {
            validate_payload(&map)?;
            Ok(map)
        }
        other => Err(CoreError::Validation(format!(
            "payload must be a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

/// Check a pending file artifact name.
///
/// Names end up inside space-separated sync tokens and archive paths, so
/// whitespace, path separators and dot-only names are refused.
///
/// # Errors
///
/// Returns [`CoreError::Validation`] for unusable names.
pub fn validate_file_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name.chars().any(|c| c.is_whitespace() || c == '/' || c == '\\')
        || name.chars().all(|c| c == '.');
    if bad {
        return Err(CoreError::Validation(format!("unusable file name '{name}'")));
    }
    Ok(())
}

const fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;

    #[test]
    fn accepts_ordinary_addresses() {
        for actor in [
            "ada@example.com",
            "first.last+tag@mail.example.co.uk",
            "x_y@a-b.io",
            "a@b.c",
            "ops@host.internal1",
        ] {
            assert!(validate_actor(actor).is_ok(), "{actor} should be valid");
        }
    }

    #[test]
    fn rejects_addresses_without_dotted_domain() {
        for actor in [
            "",
            "ada",
            "ada@",
            "@example.com",
            "ada@localhost",
            "ada@example.",
            "ada@.com",
            "ada@example..com",
            "a b@x.com",
        ] {
            let err = validate_actor(actor).unwrap_err();
            assert_eq!(err.code(), ErrorCode::Validation, "{actor}");
        }
    }

    #[test]
    fn payload_must_be_non_empty_object() {
        assert!(payload_from_value(json!({"post": {"title": "A"}})).is_ok());
        assert!(payload_from_value(json!({})).is_err());
        assert!(payload_from_value(json!([1, 2])).is_err());
        assert!(payload_from_value(json!("post")).is_err());
        assert!(payload_from_value(serde_json::Value::Null).is_err());
    }

    #[test]
    fn malformed_categories_pass_validation() {
        // shape errors belong to the projector
        assert!(payload_from_value(json!({"post": 3})).is_ok());
    }

    #[test]
    fn file_names_are_token_safe() {
        assert!(validate_file_name("abc.png").is_ok());
        for name in ["", "a b.png", "dir/abc.png", "..", ".", "tab\tname"] {
            assert!(validate_file_name(name).is_err(), "{name:?} should be rejected");
        }
    }
}
