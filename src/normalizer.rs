//! Attention state normalization
//!
//! Detectors send either a bare state string or an object carrying the state
//! at one of a few known positions. This module maps both to a canonical
//! [`AttentionState`], or `None` when nothing recognizable is present.

use crate::types::AttentionState;
use serde_json::Value;

/// Field names probed for a state, in priority order
const STATE_FIELDS: [&str; 2] = ["attentionState", "state"];

/// Field names probed for a display name
const NAME_FIELDS: [&str; 2] = ["userName", "name"];

/// Nested envelope probed one level down
const NESTED_FIELD: &str = "data";

/// Normalizer for raw detector payloads
pub struct StateNormalizer;

impl StateNormalizer {
    /// Normalize a raw signal to a canonical state
    pub fn normalize(raw: &Value) -> Option<AttentionState> {
        extract_state(raw)
            .and_then(Value::as_str)
            .and_then(normalize_state_str)
    }

    /// Display name carried alongside the state, if any
    pub fn display_name(raw: &Value) -> Option<String> {
        first_string(raw, &NAME_FIELDS)
            .or_else(|| raw.get(NESTED_FIELD).and_then(|d| first_string(d, &NAME_FIELDS)))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

/// Collapse an alias to its canonical state
pub fn normalize_state_str(raw: &str) -> Option<AttentionState> {
    let normalized = raw.trim().to_lowercase();

    match normalized.as_str() {
        "attentive" => Some(AttentionState::Attentive),
        "active" => Some(AttentionState::Active),
        "looking_away" | "lookingaway" | "looking away" | "looking-away" => {
            Some(AttentionState::LookingAway)
        }
        "drowsy" => Some(AttentionState::Drowsy),
        "absent" => Some(AttentionState::Absent),
        "darkness" => Some(AttentionState::Darkness),
        _ => None,
    }
}

/// First present candidate: bare string, top-level field, then `data.*`.
///
/// A candidate is present when it is set to anything other than null, false,
/// zero or the empty string. A present candidate that is not a string makes
/// the whole signal invalid; later positions are not consulted.
fn extract_state(raw: &Value) -> Option<&Value> {
    match raw {
        Value::String(s) => non_empty(s).map(|_| raw),
        Value::Object(_) => first_present(raw, &STATE_FIELDS)
            .or_else(|| raw.get(NESTED_FIELD).and_then(|d| first_present(d, &STATE_FIELDS))),
        _ => None,
    }
}

fn first_present<'a>(value: &'a Value, fields: &[&str]) -> Option<&'a Value> {
    fields
        .iter()
        .filter_map(|field| value.get(*field))
        .find(|v| is_present(v))
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => true,
    }
}

fn first_string<'a>(value: &'a Value, fields: &[&str]) -> Option<&'a str> {
    fields
        .iter()
        .find_map(|field| value.get(*field).and_then(Value::as_str).and_then(non_empty))
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bare_strings() {
        assert_eq!(
            StateNormalizer::normalize(&json!("attentive")),
            Some(AttentionState::Attentive)
        );
        assert_eq!(
            StateNormalizer::normalize(&json!("  DROWSY ")),
            Some(AttentionState::Drowsy)
        );
        assert_eq!(
            StateNormalizer::normalize(&json!("Looking Away")),
            Some(AttentionState::LookingAway)
        );
        assert_eq!(
            StateNormalizer::normalize(&json!("lookingaway")),
            Some(AttentionState::LookingAway)
        );
    }

    #[test]
    fn test_field_positions() {
        assert_eq!(
            StateNormalizer::normalize(&json!({"attentionState": "absent"})),
            Some(AttentionState::Absent)
        );
        assert_eq!(
            StateNormalizer::normalize(&json!({"state": "active"})),
            Some(AttentionState::Active)
        );
        assert_eq!(
            StateNormalizer::normalize(&json!({"data": {"attentionState": "darkness"}})),
            Some(AttentionState::Darkness)
        );
        assert_eq!(
            StateNormalizer::normalize(&json!({"data": {"state": "drowsy"}})),
            Some(AttentionState::Drowsy)
        );
    }

    #[test]
    fn test_priority_order() {
        let raw = json!({
            "attentionState": "attentive",
            "state": "absent",
            "data": {"state": "drowsy"}
        });
        assert_eq!(StateNormalizer::normalize(&raw), Some(AttentionState::Attentive));

        // Empty top-level value falls through to the next candidate
        let raw = json!({"attentionState": "", "data": {"attentionState": "active"}});
        assert_eq!(StateNormalizer::normalize(&raw), Some(AttentionState::Active));
    }

    #[test]
    fn test_non_string_state_is_not_skipped() {
        // The first present candidate decides, even when it is not a string
        assert_eq!(
            StateNormalizer::normalize(&json!({"attentionState": 3, "state": "active"})),
            None
        );
        assert_eq!(
            StateNormalizer::normalize(&json!({"state": {"v": 1}, "data": {"state": "active"}})),
            None
        );

        // Absent-like values fall through to the next position
        for blank in [json!(null), json!(false), json!(0), json!("")] {
            let raw = json!({"attentionState": blank, "state": "active"});
            assert_eq!(StateNormalizer::normalize(&raw), Some(AttentionState::Active), "{raw}");
        }
    }

    #[test]
    fn test_invalid_inputs() {
        for raw in [
            json!(""),
            json!("   "),
            json!("sleeping"),
            json!(null),
            json!(42),
            json!({}),
            json!({"state": 3}),
            json!({"data": {"data": {"state": "active"}}}),
        ] {
            assert_eq!(StateNormalizer::normalize(&raw), None, "input: {raw}");
        }
    }

    #[test]
    fn test_deterministic_over_aliases() {
        let aliases = [
            "attentive",
            "active",
            "looking_away",
            "lookingaway",
            "looking away",
            "looking-away",
            "drowsy",
            "absent",
            "darkness",
        ];
        for alias in aliases {
            let first = normalize_state_str(alias);
            assert!(first.is_some(), "alias {alias} should normalize");
            for _ in 0..3 {
                assert_eq!(normalize_state_str(alias), first);
            }
        }
    }

    #[test]
    fn test_from_str() {
        let state: AttentionState = "Looking_Away".parse().unwrap();
        assert_eq!(state, AttentionState::LookingAway);
        assert!("bored".parse::<AttentionState>().is_err());
    }

    #[test]
    fn test_display_name() {
        assert_eq!(
            StateNormalizer::display_name(&json!({"state": "active", "userName": "Ada"})),
            Some("Ada".to_string())
        );
        assert_eq!(
            StateNormalizer::display_name(&json!({"data": {"name": " Grace "}})),
            Some("Grace".to_string())
        );
        assert_eq!(StateNormalizer::display_name(&json!("active")), None);
        assert_eq!(StateNormalizer::display_name(&json!({"name": ""})), None);
    }
}
