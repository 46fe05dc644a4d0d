use serde::{Deserialize, Serialize};

pub type CultureCode = String;
pub type InterpretationId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Inbound,
    Outbound,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Inbound => "inbound",
            Mode::Outbound => "outbound",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterpretationRequest {
    pub message: String,
    pub sender_culture: CultureCode,
    pub receiver_culture: CultureCode,
    pub same_culture: bool,
    pub mode: Mode,
}

impl InterpretationRequest {
    /// Builds a request, deriving `same_culture` from the two codes.
    pub fn new(
        message: impl Into<String>,
        sender_culture: impl Into<String>,
        receiver_culture: impl Into<String>,
        mode: Mode,
    ) -> Self {
        let sender_culture = sender_culture.into();
        let receiver_culture = receiver_culture.into();
        let same_culture = sender_culture.trim().eq_ignore_ascii_case(receiver_culture.trim());
        Self {
            message: message.into(),
            sender_culture,
            receiver_culture,
            same_culture,
            mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmEmotion {
    pub name: String,
    pub sender_score: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundResult {
    pub bottom_line: String,
    pub cultural_context: String,
    pub emotions: Vec<LlmEmotion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundResult {
    pub original_analysis: String,
    pub suggestions: Vec<String>,
    pub optimized_message: String,
    pub emotions: Vec<LlmEmotion>,
}

/// Final typed result; serialized without a tag, the shape follows the mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Interpretation {
    Outbound(OutboundResult),
    Inbound(InboundResult),
}

impl Interpretation {
    pub fn mode(&self) -> Mode {
        match self {
            Interpretation::Inbound(_) => Mode::Inbound,
            Interpretation::Outbound(_) => Mode::Outbound,
        }
    }

    pub fn emotions(&self) -> &[LlmEmotion] {
        match self {
            Interpretation::Inbound(result) => &result.emotions,
            Interpretation::Outbound(result) => &result.emotions,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmMetadata {
    pub cost_usd: f64,
    pub response_time_ms: u64,
    pub token_count: u64,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpretationOutcome {
    pub interpretation: Interpretation,
    pub metadata: LlmMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    Text {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    Complete {
        interpretation: Interpretation,
        metadata: LlmMetadata,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        interpretation_id: Option<InterpretationId>,
    },
    Error {
        code: String,
        message: String,
    },
}

impl StreamChunk {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamChunk::Complete { .. } | StreamChunk::Error { .. })
    }
}

/// Token accounting reported by the provider for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
}

impl UsageStats {
    /// Folds a later usage report in; zero fields in `other` keep the earlier value.
    pub fn merge(&mut self, other: &UsageStats) {
        if other.input_tokens > 0 {
            self.input_tokens = other.input_tokens;
        }
        if other.output_tokens > 0 {
            self.output_tokens = other.output_tokens;
        }
        if other.cache_read_tokens > 0 {
            self.cache_read_tokens = other.cache_read_tokens;
        }
        if other.cache_creation_tokens > 0 {
            self.cache_creation_tokens = other.cache_creation_tokens;
        }
    }
}

pub const ANTHROPIC_PROVIDER: &str = "anthropic";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialRef {
    Env { var: String },
    InlineToken { token: String },
    None,
}

impl Default for CredentialRef {
    fn default() -> Self {
        Self::None
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResolvedCredential {
    pub secret: Option<String>,
}

impl ResolvedCredential {
    pub fn none() -> Self {
        Self { secret: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_kind")]
    pub kind: String,
    pub model: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub credential: CredentialRef,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_anthropic_version")]
    pub anthropic_version: String,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl ProviderConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            kind: default_provider_kind(),
            model: model.into(),
            endpoint: None,
            credential: CredentialRef::None,
            timeout_ms: default_timeout_ms(),
            max_output_tokens: default_max_output_tokens(),
            anthropic_version: default_anthropic_version(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_provider_kind() -> String {
    ANTHROPIC_PROVIDER.to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_output_tokens() -> u32 {
    2_048
}

fn default_anthropic_version() -> String {
    "2023-06-01".to_string()
}

fn default_channel_capacity() -> usize {
    64
}
