use serde_json::{Map, Value};

pub type Id = String;

/// Wire tag marking a collection envelope
pub const LIST_OBJECT: &str = "list";

/// Render a JSON value the way it appears inside a query string: strings
/// unquoted, everything else in its JSON form.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Extract the identity of a payload. Missing, null, empty-string and
/// `false` ids count as no id.
pub fn id_of(fields: &Map<String, Value>) -> Option<Id> {
    match fields.get("id")? {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        other => Some(display_value(other)),
    }
}

/// `TestSnake` -> `test_snake`, `HTTPError` -> `http_error`
pub fn to_snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    let mut i = 0;

    while i < chars.len() {
        out.push(chars[i]);
        if i + 2 < chars.len()
            && chars[i].is_ascii_alphabetic()
            && chars[i + 1].is_ascii_uppercase()
            && chars[i + 2].is_ascii_lowercase()
        {
            out.push('_');
            out.push(chars[i + 1]);
            out.push(chars[i + 2]);
            i += 3;
            continue;
        }
        i += 1;
    }

    out.to_lowercase()
}

/// Every key of `required` is present in `fields` with an equal value.
pub fn matches_discriminator(required: &Map<String, Value>, fields: &Map<String, Value>) -> bool {
    required
        .iter()
        .all(|(k, v)| fields.get(k).map_or(false, |actual| actual == v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("Test", "test")]
    #[case("TestSnake", "test_snake")]
    #[case("TicketCommentReply", "ticket_comment_reply")]
    #[case("HTTPError", "http_error")]
    #[case("already_snake", "already_snake")]
    fn test_to_snake_case(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(to_snake_case(input), expected);
    }

    #[rstest]
    #[case(json!({"id": 1}), Some("1"))]
    #[case(json!({"id": "abc"}), Some("abc"))]
    #[case(json!({"id": ""}), None)]
    #[case(json!({"id": null}), None)]
    #[case(json!({"title": "x"}), None)]
    fn test_id_of(#[case] payload: Value, #[case] expected: Option<&str>) {
        let fields = payload.as_object().cloned().unwrap();
        assert_eq!(id_of(&fields).as_deref(), expected);
    }

    #[test]
    fn test_matches_discriminator() {
        let required = json!({"poly": true}).as_object().cloned().unwrap();
        let yes = json!({"object": "test", "poly": true}).as_object().cloned().unwrap();
        let no = json!({"object": "test"}).as_object().cloned().unwrap();

        assert!(matches_discriminator(&required, &yes));
        assert!(!matches_discriminator(&required, &no));
        assert!(matches_discriminator(&Map::new(), &no));
    }
}
