//! Tolerant parsing of model output into extraction candidates.
//!
//! Accepts a bare JSON object, an array of objects, or an object wrapping an
//! array under `places`/`restaurants`, optionally inside a Markdown code
//! fence. `null`, empty and `N/A` field values are treated as absent.

use serde_json::Value;

use crate::extractor::Candidate;
use crate::ExtractorError;

const NAME_KEYS: &[&str] = &["placeName", "place_name", "name", "restaurantName", "restaurant_name"];
const ADDRESS_KEYS: &[&str] = &["address", "raw_address", "rawAddress"];
const LIST_KEYS: &[&str] = &["places", "restaurants", "results"];

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn text_field(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find_map(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("n/a") && !s.eq_ignore_ascii_case("null"))
        .map(str::to_owned)
}

fn confidence_field(obj: &serde_json::Map<String, Value>) -> Option<f64> {
    let raw = match obj.get("confidence")? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    raw.filter(|c| c.is_finite()).map(|c| c.clamp(0.0, 1.0))
}

fn candidate_from(value: &Value) -> Option<Candidate> {
    let obj = value.as_object()?;
    Some(Candidate {
        name: text_field(obj, NAME_KEYS),
        address: text_field(obj, ADDRESS_KEYS),
        confidence: confidence_field(obj),
    })
}

/// Parse raw model output. Array elements that are not objects become
/// nameless candidates so callers can count them as malformed.
///
/// # Errors
///
/// Returns [`ExtractorError::Deserialize`] if the text is not JSON at all.
pub fn parse_candidates(raw: &str) -> Result<Vec<Candidate>, ExtractorError> {
    let body = strip_code_fence(raw);
    if body.is_empty() || body == "null" {
        return Ok(Vec::new());
    }

    let value: Value = serde_json::from_str(body).map_err(|e| ExtractorError::Deserialize {
        context: "model output".to_owned(),
        source: e,
    })?;

    let items: Vec<&Value> = match &value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(obj) => match LIST_KEYS.iter().find_map(|k| obj.get(*k)?.as_array()) {
            Some(list) => list.iter().collect(),
            None => vec![&value],
        },
        _ => vec![&value],
    };

    Ok(items
        .into_iter()
        .map(|item| candidate_from(item).unwrap_or_default())
        .collect())
}
