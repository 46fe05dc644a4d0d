use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::interpretation::{
    types::{Interpretation, LlmEmotion, Mode},
    validator::{MAX_SCORE, strip_code_fence},
};

/// Best-effort view of an in-flight result. Every field is absent until its
/// JSON value has been fully received.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bottom_line: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cultural_context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_analysis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimized_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotions: Option<Vec<LlmEmotion>>,
}

impl PartialResult {
    pub fn is_empty(&self) -> bool {
        *self == PartialResult::default()
    }

    fn merge_from(&mut self, newer: PartialResult) {
        fn keep<T>(slot: &mut Option<T>, newer: Option<T>) {
            if newer.is_some() {
                *slot = newer;
            }
        }
        keep(&mut self.bottom_line, newer.bottom_line);
        keep(&mut self.cultural_context, newer.cultural_context);
        keep(&mut self.original_analysis, newer.original_analysis);
        keep(&mut self.suggestions, newer.suggestions);
        keep(&mut self.optimized_message, newer.optimized_message);
        keep(&mut self.emotions, newer.emotions);
    }
}

impl From<&Interpretation> for PartialResult {
    fn from(interpretation: &Interpretation) -> Self {
        match interpretation {
            Interpretation::Inbound(result) => PartialResult {
                bottom_line: Some(result.bottom_line.clone()),
                cultural_context: Some(result.cultural_context.clone()),
                emotions: Some(result.emotions.clone()),
                ..PartialResult::default()
            },
            Interpretation::Outbound(result) => PartialResult {
                original_analysis: Some(result.original_analysis.clone()),
                suggestions: Some(result.suggestions.clone()),
                optimized_message: Some(result.optimized_message.clone()),
                emotions: Some(result.emotions.clone()),
                ..PartialResult::default()
            },
        }
    }
}

/// Still-growing decoded text of the mode's long narrative field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveNarrative {
    pub field: &'static str,
    pub text: String,
    pub complete: bool,
}

/// Rebuilds a `PartialResult` from the raw text accumulated so far.
#[derive(Debug, Clone)]
pub struct ProgressiveReconstructor {
    mode: Mode,
    max_emotions: usize,
    partial: PartialResult,
    live: Option<LiveNarrative>,
}

impl ProgressiveReconstructor {
    pub fn new(mode: Mode, max_emotions: usize) -> Self {
        Self {
            mode,
            max_emotions: max_emotions.max(1),
            partial: PartialResult::default(),
            live: None,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn reset(&mut self) {
        self.partial = PartialResult::default();
        self.live = None;
    }

    pub fn partial(&self) -> &PartialResult {
        &self.partial
    }

    pub fn live(&self) -> Option<&LiveNarrative> {
        self.live.as_ref()
    }

    /// Re-reads the whole accumulated buffer. Fields never regress within a
    /// session.
    pub fn update(&mut self, buffer: &str) -> &PartialResult {
        let scan = scan_buffer(buffer);
        let newer = self.project(&scan.fields);
        self.partial.merge_from(newer);
        self.update_live(&scan);
        &self.partial
    }

    fn narrative_key(&self) -> &'static str {
        match self.mode {
            Mode::Inbound => "culturalContext",
            Mode::Outbound => "originalAnalysis",
        }
    }

    fn update_live(&mut self, scan: &Scan) {
        let key = self.narrative_key();
        let next = if let Some(text) = scan.fields.get(key).and_then(Value::as_str) {
            Some(LiveNarrative {
                field: key,
                text: text.to_string(),
                complete: true,
            })
        } else {
            match &scan.pending {
                Some((pending_key, raw)) if pending_key == key => Some(LiveNarrative {
                    field: key,
                    text: decode_lenient(raw),
                    complete: false,
                }),
                _ => None,
            }
        };

        let Some(next) = next else {
            return;
        };
        let regresses = self.live.as_ref().is_some_and(|current| {
            current.complete || current.text.len() > next.text.len()
        });
        if !regresses {
            self.live = Some(next);
        }
    }

    fn project(&self, fields: &Map<String, Value>) -> PartialResult {
        let text = |key: &str| fields.get(key).and_then(Value::as_str).map(str::to_string);
        let emotions = fields
            .get("emotions")
            .and_then(Value::as_array)
            .map(|items| {
                let mut emotions: Vec<LlmEmotion> =
                    items.iter().filter_map(emotion_from_value).collect();
                emotions.truncate(self.max_emotions);
                emotions
            });

        match self.mode {
            Mode::Inbound => PartialResult {
                bottom_line: text("bottomLine"),
                cultural_context: text("culturalContext"),
                emotions,
                ..PartialResult::default()
            },
            Mode::Outbound => PartialResult {
                original_analysis: text("originalAnalysis"),
                suggestions: fields.get("suggestions").and_then(Value::as_array).map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .filter(|item| !item.trim().is_empty())
                        .map(str::to_string)
                        .collect()
                }),
                optimized_message: text("optimizedMessage"),
                emotions,
                ..PartialResult::default()
            },
        }
    }
}

fn emotion_from_value(value: &Value) -> Option<LlmEmotion> {
    let object = value.as_object()?;
    let name = object
        .get("name")
        .and_then(Value::as_str)
        .filter(|name| !name.trim().is_empty())?;
    let score = |value: &Value| {
        value
            .as_u64()
            .filter(|score| *score <= MAX_SCORE)
            .map(|score| score as u8)
    };
    let sender_score = object.get("senderScore").and_then(score)?;
    let receiver_score = match object.get("receiverScore") {
        None | Some(Value::Null) => None,
        Some(value) => Some(score(value)?),
    };
    let explanation = object
        .get("explanation")
        .and_then(Value::as_str)
        .filter(|text| !text.trim().is_empty())
        .map(str::to_string);

    Some(LlmEmotion {
        name: name.to_string(),
        sender_score,
        receiver_score,
        explanation,
    })
}

#[derive(Debug, Default)]
struct Scan {
    fields: Map<String, Value>,
    /// Key and raw undecoded body of a string value still being received.
    pending: Option<(String, String)>,
}

fn scan_buffer(buffer: &str) -> Scan {
    if let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(&strip_code_fence(buffer)) {
        return Scan {
            fields,
            pending: None,
        };
    }
    scan_fields(strip_open_fence(buffer))
}

/// Drops a leading fence line even when its closing fence has not arrived.
fn strip_open_fence(buffer: &str) -> &str {
    let trimmed = buffer.trim_start();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    match trimmed.find('\n') {
        Some(newline) => &trimmed[newline + 1..],
        None => "",
    }
}

fn scan_fields(body: &str) -> Scan {
    let mut scan = Scan::default();
    let bytes = body.as_bytes();
    let Some(open) = body.find('{') else {
        return scan;
    };
    let mut pos = open + 1;

    loop {
        pos = skip_separators(bytes, pos);
        if pos >= bytes.len() || bytes[pos] != b'"' {
            return scan;
        }
        let Some(key_end) = string_end(bytes, pos) else {
            return scan;
        };
        let Ok(key) = serde_json::from_str::<String>(&body[pos..key_end]) else {
            return scan;
        };

        pos = skip_whitespace(bytes, key_end);
        if pos >= bytes.len() || bytes[pos] != b':' {
            return scan;
        }
        pos = skip_whitespace(bytes, pos + 1);
        if pos >= bytes.len() {
            return scan;
        }

        match value_end(bytes, pos) {
            Some(end) => {
                if let Ok(value) = serde_json::from_str::<Value>(&body[pos..end]) {
                    scan.fields.insert(key, value);
                }
                pos = end;
            }
            None => {
                if bytes[pos] == b'"' {
                    scan.pending = Some((key, body[pos + 1..].to_string()));
                }
                return scan;
            }
        }
    }
}

fn skip_whitespace(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    pos
}

fn skip_separators(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && (bytes[pos].is_ascii_whitespace() || bytes[pos] == b',') {
        pos += 1;
    }
    pos
}

/// Index one past the closing quote of the string starting at `start`.
fn string_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut pos = start + 1;
    while pos < bytes.len() {
        match bytes[pos] {
            b'\\' => pos += 2,
            b'"' => return Some(pos + 1),
            _ => pos += 1,
        }
    }
    None
}

/// Index one past the end of the value at `start`, or `None` while it is
/// still open. A bare number at the end of the buffer counts as open.
fn value_end(bytes: &[u8], start: usize) -> Option<usize> {
    match bytes[start] {
        b'"' => string_end(bytes, start),
        b'[' | b'{' => {
            let mut depth = 0_usize;
            let mut pos = start;
            while pos < bytes.len() {
                match bytes[pos] {
                    b'"' => {
                        pos = string_end(bytes, pos)?;
                        continue;
                    }
                    b'[' | b'{' => depth += 1,
                    b']' | b'}' => {
                        depth -= 1;
                        if depth == 0 {
                            return Some(pos + 1);
                        }
                    }
                    _ => {}
                }
                pos += 1;
            }
            None
        }
        _ => {
            let mut pos = start;
            while pos < bytes.len() {
                if matches!(bytes[pos], b',' | b'}' | b']') || bytes[pos].is_ascii_whitespace() {
                    return Some(pos);
                }
                pos += 1;
            }
            None
        }
    }
}

/// Decodes the body of an unterminated JSON string, dropping a trailing
/// escape sequence that has not fully arrived.
fn decode_lenient(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        let Some(escape) = chars.next() else {
            break;
        };
        match escape {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'u' => {
                let hex: String = chars.by_ref().take(4).collect();
                if hex.chars().count() < 4 {
                    break;
                }
                let Ok(unit) = u16::from_str_radix(&hex, 16) else {
                    continue;
                };
                if (0xD800..0xDC00).contains(&unit) {
                    // High surrogate: wait for its pair.
                    let rest: String = chars.clone().take(6).collect();
                    if rest.chars().count() < 6 {
                        break;
                    }
                    let low = rest
                        .strip_prefix("\\u")
                        .and_then(|hex| u16::from_str_radix(hex, 16).ok());
                    if let Some(low) = low {
                        for _ in 0..6 {
                            chars.next();
                        }
                        if let Some(decoded) = char::decode_utf16([unit, low]).next() {
                            out.push(decoded.unwrap_or(char::REPLACEMENT_CHARACTER));
                        }
                    }
                } else if let Some(decoded) = char::from_u32(u32::from(unit)) {
                    out.push(decoded);
                }
            }
            other => out.push(other),
        }
    }
    out
}
