//! Userinfo claim extraction
//!
//! Providers map logical claims to locations in their userinfo responses via
//! a small path grammar:
//!
//! - segments separated by `.`: `profile.email`
//! - integer index over arrays: `[0].email`
//! - splat over arrays, producing a list: `value.[*].displayName`
//! - the literal strings `true` / `false` are constants, not paths
//!
//! Deliberately not a JSONPath engine; this covers every mapping the
//! supported providers need.

use serde_json::Value;

/// Resolve `path` against `value`.
///
/// Returns `None` when any segment fails to match. A path containing `[*]`
/// yields `Value::Array` of the matched leaves.
#[must_use]
pub fn extract(value: &Value, path: &str) -> Option<Value> {
    if path == "true" {
        return Some(Value::Bool(true));
    }
    if path == "false" {
        return Some(Value::Bool(false));
    }
    walk(value, &path.split('.').collect::<Vec<_>>())
        .map(|v| v.clone_or_collect())
}

/// Resolve `path` and coerce the result to a string claim.
///
/// Booleans and numbers are rendered; arrays and objects are not valid
/// string claims and return `None`.
#[must_use]
pub fn extract_string(value: &Value, path: &str) -> Option<String> {
    match extract(value, path)? {
        Value::String(s) => Some(s),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Resolve `path` and coerce the result to a boolean claim.
///
/// Accepts JSON booleans and the strings `"true"`/`"false"`.
#[must_use]
pub fn extract_bool(value: &Value, path: &str) -> Option<bool> {
    match extract(value, path)? {
        Value::Bool(b) => Some(b),
        Value::String(s) => match s.as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Resolve `path` to a list of strings (group memberships).
#[must_use]
pub fn extract_string_list(value: &Value, path: &str) -> Option<Vec<String>> {
    match extract(value, path)? {
        Value::Array(items) => Some(
            items
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
        ),
        Value::String(s) => Some(vec![s]),
        _ => None,
    }
}

/// Intermediate result: either a borrowed single value or an owned list from
/// a splat expansion.
enum Matched<'a> {
    One(&'a Value),
    Many(Vec<Value>),
}

impl Matched<'_> {
    fn clone_or_collect(self) -> Value {
        match self {
            Matched::One(v) => v.clone(),
            Matched::Many(items) => Value::Array(items),
        }
    }
}

fn walk<'a>(value: &'a Value, segments: &[&str]) -> Option<Matched<'a>> {
    let Some((segment, rest)) = segments.split_first() else {
        return Some(Matched::One(value));
    };

    if *segment == "[*]" {
        let items = value.as_array()?;
        let mut collected = Vec::new();
        for item in items {
            match walk(item, rest)? {
                Matched::One(v) => collected.push(v.clone()),
                Matched::Many(vs) => collected.extend(vs),
            }
        }
        return Some(Matched::Many(collected));
    }

    if let Some(index) = parse_index(segment) {
        let item = value.as_array()?.get(index)?;
        return walk(item, rest);
    }

    walk(value.get(*segment)?, rest)
}

fn parse_index(segment: &str) -> Option<usize> {
    segment
        .strip_prefix('[')?
        .strip_suffix(']')?
        .parse::<usize>()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_field() {
        let doc = json!({"email": "a@x"});
        assert_eq!(extract_string(&doc, "email").unwrap(), "a@x");
    }

    #[test]
    fn dotted_path() {
        let doc = json!({"profile": {"name": {"display": "Alice"}}});
        assert_eq!(
            extract_string(&doc, "profile.name.display").unwrap(),
            "Alice"
        );
    }

    #[test]
    fn indexed_array_head() {
        // GitHub /user/emails returns a bare array
        let doc = json!([
            {"email": "primary@x", "primary": true},
            {"email": "alt@x", "primary": false}
        ]);
        assert_eq!(extract_string(&doc, "[0].email").unwrap(), "primary@x");
        assert_eq!(extract_string(&doc, "[1].email").unwrap(), "alt@x");
    }

    #[test]
    fn out_of_range_index_is_none() {
        let doc = json!([{"email": "only@x"}]);
        assert!(extract_string(&doc, "[5].email").is_none());
    }

    #[test]
    fn splat_collects_list() {
        // Microsoft Graph memberOf shape
        let doc = json!({"value": [
            {"displayName": "engineers"},
            {"displayName": "admins"}
        ]});
        assert_eq!(
            extract_string_list(&doc, "value.[*].displayName").unwrap(),
            vec!["engineers", "admins"]
        );
    }

    #[test]
    fn splat_requires_every_leaf() {
        let doc = json!({"value": [
            {"displayName": "engineers"},
            {"displayName": "admins"}
        ]});
        // A leaf missing from one element fails the whole match rather than
        // silently returning a partial list
        let doc_partial = json!({"value": [
            {"displayName": "engineers"},
            {"other": 1}
        ]});
        assert!(extract(&doc, "value.[*].displayName").is_some());
        assert!(extract(&doc_partial, "value.[*].displayName").is_none());
    }

    #[test]
    fn literal_true_false_are_constants() {
        let doc = json!({"true": "this field is never consulted"});
        assert!(extract_bool(&doc, "true").unwrap());
        assert!(!extract_bool(&doc, "false").unwrap());
    }

    #[test]
    fn missing_field_is_none() {
        let doc = json!({"email": "a@x"});
        assert!(extract_string(&doc, "name").is_none());
    }

    #[test]
    fn bool_claim_from_json_bool() {
        let doc = json!({"email_verified": true});
        assert!(extract_bool(&doc, "email_verified").unwrap());
    }

    #[test]
    fn bool_claim_from_string() {
        let doc = json!({"email_verified": "true"});
        assert!(extract_bool(&doc, "email_verified").unwrap());
    }

    #[test]
    fn numbers_render_as_strings() {
        // GitHub subjects are numeric ids
        let doc = json!({"id": 583231});
        assert_eq!(extract_string(&doc, "id").unwrap(), "583231");
    }

    #[test]
    fn single_string_promotes_to_list() {
        let doc = json!({"group": "engineers"});
        assert_eq!(
            extract_string_list(&doc, "group").unwrap(),
            vec!["engineers"]
        );
    }
}
