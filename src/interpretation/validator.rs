use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::interpretation::{
    error::{InterpretError, parsing_error},
    types::{InboundResult, Interpretation, LlmEmotion, Mode, OutboundResult},
};

pub const MAX_SCORE: u64 = 10;

/// Prompt-version-dependent list bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationBounds {
    #[serde(default = "default_min_emotions")]
    pub min_emotions: usize,
    #[serde(default = "default_max_emotions")]
    pub max_emotions: usize,
    #[serde(default = "default_min_suggestions")]
    pub min_suggestions: usize,
    #[serde(default = "default_max_suggestions")]
    pub max_suggestions: usize,
}

impl Default for ValidationBounds {
    fn default() -> Self {
        Self {
            min_emotions: default_min_emotions(),
            max_emotions: default_max_emotions(),
            min_suggestions: default_min_suggestions(),
            max_suggestions: default_max_suggestions(),
        }
    }
}

fn default_min_emotions() -> usize {
    1
}

fn default_max_emotions() -> usize {
    3
}

fn default_min_suggestions() -> usize {
    1
}

fn default_max_suggestions() -> usize {
    5
}

pub fn validate(
    raw_text: &str,
    mode: Mode,
    same_culture: bool,
    bounds: &ValidationBounds,
) -> Result<Interpretation, InterpretError> {
    let body = strip_code_fence(raw_text);
    if body.is_empty() {
        return Err(parsing_error("model returned an empty response"));
    }

    let value: Value = serde_json::from_str(&body)
        .map_err(|err| parsing_error(format!("model output is not valid JSON: {}", err)))?;
    validate_value(&value, mode, same_culture, bounds)
}

/// Same checks as [`validate`] for a payload that is already JSON, such as a
/// buffered response or a received complete event.
pub fn validate_value(
    value: &Value,
    mode: Mode,
    same_culture: bool,
    bounds: &ValidationBounds,
) -> Result<Interpretation, InterpretError> {
    let object = value
        .as_object()
        .ok_or_else(|| parsing_error("model output is not a JSON object"))?;

    match mode {
        Mode::Inbound => validate_inbound(object, same_culture, bounds).map(Interpretation::Inbound),
        Mode::Outbound => {
            validate_outbound(object, same_culture, bounds).map(Interpretation::Outbound)
        }
    }
}

/// Removes one surrounding markdown fence (with or without a language tag).
pub fn strip_code_fence(text: &str) -> String {
    let text = text.trim();
    if !text.starts_with("```") {
        return text.to_string();
    }

    let mut lines = text.lines();
    lines.next();
    let mut body = Vec::new();
    for line in lines {
        if line.trim_start().starts_with("```") {
            break;
        }
        body.push(line);
    }
    body.join("\n").trim().to_string()
}

fn validate_inbound(
    object: &Map<String, Value>,
    same_culture: bool,
    bounds: &ValidationBounds,
) -> Result<InboundResult, InterpretError> {
    Ok(InboundResult {
        bottom_line: required_string(object, "bottomLine")?,
        cultural_context: required_string(object, "culturalContext")?,
        emotions: validate_emotions(object, same_culture, bounds)?,
    })
}

fn validate_outbound(
    object: &Map<String, Value>,
    same_culture: bool,
    bounds: &ValidationBounds,
) -> Result<OutboundResult, InterpretError> {
    Ok(OutboundResult {
        original_analysis: required_string(object, "originalAnalysis")?,
        suggestions: validate_suggestions(object, bounds)?,
        optimized_message: required_string(object, "optimizedMessage")?,
        emotions: validate_emotions(object, same_culture, bounds)?,
    })
}

fn required_string(object: &Map<String, Value>, key: &str) -> Result<String, InterpretError> {
    match object.get(key).and_then(Value::as_str) {
        Some(text) if !text.trim().is_empty() => Ok(text.to_string()),
        Some(_) => Err(parsing_error(format!("field `{}` is empty", key))),
        None => Err(parsing_error(format!("field `{}` is missing or not a string", key))),
    }
}

fn validate_suggestions(
    object: &Map<String, Value>,
    bounds: &ValidationBounds,
) -> Result<Vec<String>, InterpretError> {
    let items = object
        .get("suggestions")
        .and_then(Value::as_array)
        .ok_or_else(|| parsing_error("field `suggestions` is missing or not an array"))?;

    if items.len() < bounds.min_suggestions || items.len() > bounds.max_suggestions {
        return Err(parsing_error(format!(
            "expected {}-{} suggestions, got {}",
            bounds.min_suggestions,
            bounds.max_suggestions,
            items.len()
        )));
    }

    items
        .iter()
        .enumerate()
        .map(|(index, item)| match item.as_str() {
            Some(text) if !text.trim().is_empty() => Ok(text.to_string()),
            _ => Err(parsing_error(format!(
                "suggestion {} is empty or not a string",
                index
            ))),
        })
        .collect()
}

fn validate_emotions(
    object: &Map<String, Value>,
    same_culture: bool,
    bounds: &ValidationBounds,
) -> Result<Vec<LlmEmotion>, InterpretError> {
    let items = object
        .get("emotions")
        .and_then(Value::as_array)
        .ok_or_else(|| parsing_error("field `emotions` is missing or not an array"))?;

    if items.is_empty() || items.len() < bounds.min_emotions {
        return Err(parsing_error(format!(
            "expected at least {} emotions, got {}",
            bounds.min_emotions.max(1),
            items.len()
        )));
    }

    let mut emotions = items
        .iter()
        .enumerate()
        .map(|(index, item)| validate_emotion(index, item, same_culture))
        .collect::<Result<Vec<_>, _>>()?;
    emotions.truncate(bounds.max_emotions.max(1));
    Ok(emotions)
}

fn validate_emotion(
    index: usize,
    item: &Value,
    same_culture: bool,
) -> Result<LlmEmotion, InterpretError> {
    let object = item
        .as_object()
        .ok_or_else(|| parsing_error(format!("emotion {} is not an object", index)))?;

    let name = match object.get("name").and_then(Value::as_str) {
        Some(name) if !name.trim().is_empty() => name.to_string(),
        _ => {
            return Err(parsing_error(format!(
                "emotion {} has a missing or empty name",
                index
            )));
        }
    };

    let sender_score = match object.get("senderScore") {
        Some(value) => score(index, "senderScore", value)?,
        None => {
            return Err(parsing_error(format!(
                "emotion {} is missing senderScore",
                index
            )));
        }
    };

    let receiver_score = match object.get("receiverScore") {
        Some(Value::Null) | None => None,
        Some(value) => Some(score(index, "receiverScore", value)?),
    };
    if !same_culture && receiver_score.is_none() {
        return Err(parsing_error(format!(
            "emotion {} is missing receiverScore for a cross-culture pairing",
            index
        )));
    }

    let explanation = object
        .get("explanation")
        .and_then(Value::as_str)
        .filter(|text| !text.trim().is_empty())
        .map(str::to_string);

    Ok(LlmEmotion {
        name,
        sender_score,
        receiver_score,
        explanation,
    })
}

fn score(index: usize, key: &str, value: &Value) -> Result<u8, InterpretError> {
    match value.as_u64() {
        Some(score) if score <= MAX_SCORE => Ok(score as u8),
        _ => Err(parsing_error(format!(
            "emotion {} has {} {} outside the integer range 0-{}",
            index, key, value, MAX_SCORE
        ))),
    }
}
