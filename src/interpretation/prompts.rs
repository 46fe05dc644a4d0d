use crate::interpretation::types::Mode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CultureProfile {
    pub code: &'static str,
    pub name: &'static str,
    pub style: &'static str,
}

const CULTURES: &[CultureProfile] = &[
    CultureProfile {
        code: "american",
        name: "American",
        style: "direct, informal, optimistic; praise is frequent and explicit",
    },
    CultureProfile {
        code: "british",
        name: "British",
        style: "indirect, understated, heavy use of politeness and irony",
    },
    CultureProfile {
        code: "german",
        name: "German",
        style: "direct, precise, task-focused; criticism is not softened",
    },
    CultureProfile {
        code: "french",
        name: "French",
        style: "formal openings, values eloquence, debate is a sign of engagement",
    },
    CultureProfile {
        code: "japanese",
        name: "Japanese",
        style: "high-context, indirect, harmony-preserving; refusals are implied",
    },
    CultureProfile {
        code: "chinese",
        name: "Chinese",
        style: "high-context, face-conscious, relationship before task",
    },
    CultureProfile {
        code: "korean",
        name: "Korean",
        style: "hierarchy-aware, honorific-rich, indirect disagreement",
    },
    CultureProfile {
        code: "indian",
        name: "Indian",
        style: "warm, relationship-oriented, indirect refusals, respect for seniority",
    },
    CultureProfile {
        code: "brazilian",
        name: "Brazilian",
        style: "warm, expressive, personal rapport precedes business",
    },
    CultureProfile {
        code: "mexican",
        name: "Mexican",
        style: "courteous, indirect, relationship-focused, avoids blunt refusal",
    },
    CultureProfile {
        code: "dutch",
        name: "Dutch",
        style: "very direct, egalitarian, values plain speaking",
    },
    CultureProfile {
        code: "arabic",
        name: "Arabic",
        style: "elaborate courtesy, high-context, hospitality and honor matter",
    },
];

pub fn culture_profile(code: &str) -> Option<&'static CultureProfile> {
    let normalized = code.trim().to_ascii_lowercase();
    CULTURES.iter().find(|profile| profile.code == normalized)
}

fn culture_name(code: &str) -> String {
    culture_profile(code)
        .map(|profile| profile.name.to_string())
        .unwrap_or_else(|| code.trim().to_string())
}

/// Points at the cached profile rather than restating it.
fn culture_note(code: &str) -> String {
    match culture_profile(code) {
        Some(profile) => format!("see the {} ({}) profile above", profile.name, profile.code),
        None => "no stored profile; rely on general knowledge of this culture".to_string(),
    }
}

/// Large static prefix sent as the provider-cached system block.
pub fn cacheable_system_prompt() -> String {
    let mut prompt = String::from(concat!(
        "You are a cross-cultural communication expert. You explain what a message really ",
        "means to the people reading it, and how its emotional tone lands in each culture.\n\n",
        "<cultural-knowledge>\n",
    ));
    for profile in CULTURES {
        prompt.push_str(&format!("- {} ({}): {}\n", profile.name, profile.code, profile.style));
    }
    prompt.push_str(concat!(
        "</cultural-knowledge>\n\n",
        "<output-format>\n",
        "1) Respond with a single JSON object and nothing else. No prose before or after it.\n",
        "2) Do not wrap the JSON in markdown code fences.\n",
        "3) Use exactly the keys requested in the task. All string values must be non-empty.\n",
        "4) `emotions` is an array of exactly 3 objects with keys `name`, `senderScore`, ",
        "optional `receiverScore`, and `explanation`.\n",
        "5) Scores are integers, never decimals or strings.\n",
        "</output-format>\n\n",
        "<scoring-rubric>\n",
        "Scores measure emotional intensity on a 0-10 integer scale:\n",
        "0 = absent, 1-3 = faint, 4-6 = clearly present, 7-9 = strong, 10 = overwhelming.\n",
        "`senderScore` is the intensity the sender intends or would perceive in their own culture.\n",
        "`receiverScore` is the intensity a reader from the receiver's culture would perceive.\n",
        "Only include `receiverScore` when the task says the cultures differ.\n",
        "</scoring-rubric>",
    ));
    prompt
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptTemplate {
    InboundSameCulture,
    InboundCrossCulture,
    OutboundSameCulture,
    OutboundCrossCulture,
}

impl PromptTemplate {
    pub fn select(mode: Mode, same_culture: bool) -> Self {
        match (mode, same_culture) {
            (Mode::Inbound, true) => PromptTemplate::InboundSameCulture,
            (Mode::Inbound, false) => PromptTemplate::InboundCrossCulture,
            (Mode::Outbound, true) => PromptTemplate::OutboundSameCulture,
            (Mode::Outbound, false) => PromptTemplate::OutboundCrossCulture,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PromptTemplate::InboundSameCulture => "inbound_same_culture",
            PromptTemplate::InboundCrossCulture => "inbound_cross_culture",
            PromptTemplate::OutboundSameCulture => "outbound_same_culture",
            PromptTemplate::OutboundCrossCulture => "outbound_cross_culture",
        }
    }
}

pub fn build_dynamic_prompt(
    message: &str,
    sender_culture: &str,
    receiver_culture: &str,
    same_culture: bool,
    mode: Mode,
) -> String {
    let sender = culture_name(sender_culture);
    let receiver = culture_name(receiver_culture);

    match PromptTemplate::select(mode, same_culture) {
        PromptTemplate::InboundSameCulture => format!(
            concat!(
                "Task: interpret a message received by a {receiver} reader from a {sender} sender. ",
                "Both share the same culture ({sender_note}).\n",
                "Return JSON with keys `bottomLine` (one sentence on what the sender really means), ",
                "`culturalContext` (the unspoken norms behind the wording), and `emotions`.\n",
                "The cultures are the same: give only `senderScore`, omit `receiverScore`.\n\n",
                "<message>\n{message}\n</message>"
            ),
            receiver = receiver,
            sender = sender,
            sender_note = culture_note(sender_culture),
            message = message,
        ),
        PromptTemplate::InboundCrossCulture => format!(
            concat!(
                "Task: interpret a message received by a {receiver} reader from a {sender} sender.\n",
                "Sender culture: {sender_note}.\nReceiver culture: {receiver_note}.\n",
                "Return JSON with keys `bottomLine` (one sentence on what the sender really means), ",
                "`culturalContext` (why the wording might be misread across these cultures), ",
                "and `emotions`.\n",
                "The cultures differ: every emotion needs both `senderScore` and `receiverScore`.\n\n",
                "<message>\n{message}\n</message>"
            ),
            receiver = receiver,
            sender = sender,
            sender_note = culture_note(sender_culture),
            receiver_note = culture_note(receiver_culture),
            message = message,
        ),
        PromptTemplate::OutboundSameCulture => format!(
            concat!(
                "Task: a {sender} writer wants to send this draft to a {receiver} reader of the ",
                "same culture ({sender_note}).\n",
                "Return JSON with keys `originalAnalysis` (how the draft will come across), ",
                "`suggestions` (an array of short, concrete edits), `optimizedMessage` ",
                "(the improved draft), and `emotions` describing the original draft.\n",
                "The cultures are the same: give only `senderScore`, omit `receiverScore`.\n\n",
                "<draft>\n{message}\n</draft>"
            ),
            sender = sender,
            receiver = receiver,
            sender_note = culture_note(sender_culture),
            message = message,
        ),
        PromptTemplate::OutboundCrossCulture => format!(
            concat!(
                "Task: a {sender} writer wants to send this draft to a {receiver} reader.\n",
                "Sender culture: {sender_note}.\nReceiver culture: {receiver_note}.\n",
                "Return JSON with keys `originalAnalysis` (how the draft will land with the ",
                "receiver), `suggestions` (an array of short, concrete edits), `optimizedMessage` ",
                "(the draft rewritten for the receiver's culture), and `emotions` describing ",
                "the original draft.\n",
                "The cultures differ: every emotion needs both `senderScore` and `receiverScore`.\n\n",
                "<draft>\n{message}\n</draft>"
            ),
            sender = sender,
            receiver = receiver,
            sender_note = culture_note(sender_culture),
            receiver_note = culture_note(receiver_culture),
            message = message,
        ),
    }
}
