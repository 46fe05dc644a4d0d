use crosstalk::{
    interpretation::{
        types::Mode,
        validator::{ValidationBounds, validate},
    },
    stream::progressive::{PartialResult, ProgressiveReconstructor},
};

use crate::support::{INBOUND_TEXT, OUTBOUND_TEXT};

fn present_fields(partial: &PartialResult) -> usize {
    [
        partial.bottom_line.is_some(),
        partial.cultural_context.is_some(),
        partial.original_analysis.is_some(),
        partial.suggestions.is_some(),
        partial.optimized_message.is_some(),
        partial.emotions.is_some(),
    ]
    .into_iter()
    .filter(|present| *present)
    .count()
}

fn replay(text: &str, mode: Mode) -> ProgressiveReconstructor {
    let mut reconstructor = ProgressiveReconstructor::new(mode, 3);
    let mut buffer = String::new();
    let mut previous = PartialResult::default();
    let mut live_len = 0;

    for ch in text.chars() {
        buffer.push(ch);
        let partial = reconstructor.update(&buffer).clone();

        assert!(present_fields(&partial) >= present_fields(&previous));
        for (before, after) in [
            (&previous.bottom_line, &partial.bottom_line),
            (&previous.cultural_context, &partial.cultural_context),
            (&previous.original_analysis, &partial.original_analysis),
            (&previous.optimized_message, &partial.optimized_message),
        ] {
            if before.is_some() {
                assert_eq!(before, after, "a revealed field must not change");
            }
        }
        if let Some(live) = reconstructor.live() {
            assert!(live.text.len() >= live_len, "live narrative never shrinks");
            live_len = live.text.len();
        }
        previous = partial;
    }
    reconstructor
}

#[test]
fn given_inbound_text_replayed_char_by_char_when_finished_then_partial_equals_validated() {
    let reconstructor = replay(INBOUND_TEXT, Mode::Inbound);
    let validated = validate(INBOUND_TEXT, Mode::Inbound, false, &ValidationBounds::default())
        .expect("fixture validates");

    assert_eq!(reconstructor.partial(), &PartialResult::from(&validated));
    let live = reconstructor.live().expect("narrative seen");
    assert_eq!(live.field, "culturalContext");
    assert!(live.complete);
}

#[test]
fn given_fenced_outbound_text_when_finished_then_partial_equals_validated() {
    let fenced = format!("```json\n{}\n```", OUTBOUND_TEXT);
    let reconstructor = replay(&fenced, Mode::Outbound);
    let validated = validate(&fenced, Mode::Outbound, false, &ValidationBounds::default())
        .expect("fenced fixture validates");

    assert_eq!(reconstructor.partial(), &PartialResult::from(&validated));
    assert_eq!(
        reconstructor.live().map(|live| live.field),
        Some("originalAnalysis")
    );
}

#[test]
fn given_more_emotions_than_allowed_when_reconstructed_then_list_is_truncated() {
    let text = r#"{"bottomLine":"b","culturalContext":"c","emotions":[{"name":"A","senderScore":1},{"name":"B","senderScore":2},{"name":"C","senderScore":3},{"name":"D","senderScore":4}]}"#;
    let mut reconstructor = ProgressiveReconstructor::new(Mode::Inbound, 3);
    let partial = reconstructor.update(text);
    assert_eq!(partial.emotions.as_ref().map(Vec::len), Some(3));

    let validated = validate(text, Mode::Inbound, true, &ValidationBounds::default())
        .expect("validates");
    assert_eq!(partial, &PartialResult::from(&validated));
}
