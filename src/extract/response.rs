//! Turning raw model output into JSON.

use serde_json::Value;

use crate::error::{Result, ScoutError};

/// Drop markdown code fences around a JSON answer.
///
/// Fenced and unfenced forms of the same JSON come out identical.
pub fn strip_fences(response: &str) -> String {
    let text = response.trim();
    if !text.starts_with("```") {
        return text.to_string();
    }

    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn decode(response: &str) -> Result<Value> {
    let cleaned = strip_fences(response);
    serde_json::from_str(&cleaned).map_err(|e| {
        let preview: String = cleaned.chars().take(200).collect();
        ScoutError::Extraction(format!("response is not JSON ({e}): {preview}"))
    })
}

/// The listing array of a results-page answer.
pub fn decode_array(response: &str) -> Result<Vec<Value>> {
    match decode(response)? {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => Err(ScoutError::Extraction(format!(
            "expected a JSON array, got {}",
            kind(&other)
        ))),
    }
}

/// The single object of a detail-page answer.
pub fn decode_object(response: &str) -> Result<Value> {
    match decode(response)? {
        value @ Value::Object(_) => Ok(value),
        other => Err(ScoutError::Extraction(format!(
            "expected a JSON object, got {}",
            kind(&other)
        ))),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANSWER: &str = r#"[{"id": "1", "make": "Honda"}]"#;

    #[test]
    fn fenced_and_plain_answers_decode_the_same() {
        let plain = decode_array(ANSWER).unwrap();
        let fenced = decode_array(&format!("```json\n{ANSWER}\n```")).unwrap();
        let bare_fence = decode_array(&format!("  ```\n{ANSWER}\n```  \n")).unwrap();

        assert_eq!(plain, fenced);
        assert_eq!(plain, bare_fence);
    }

    #[test]
    fn prose_is_an_extraction_error() {
        assert!(matches!(
            decode_array("Sorry, I could not find any listings."),
            Err(ScoutError::Extraction(_))
        ));
    }

    #[test]
    fn wrong_shape_is_an_extraction_error() {
        assert!(decode_array(r#"{"id": "1"}"#).is_err());
        assert!(decode_object(ANSWER).is_err());
        assert!(decode_object(r#"{"id": "1"}"#).is_ok());
    }
}
