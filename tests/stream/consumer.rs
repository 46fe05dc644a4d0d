use std::{sync::Arc, time::Duration};

use crosstalk::{
    interpretation::types::{InboundResult, Interpretation, LlmEmotion, Mode},
    stream::{
        consumer::{Lane, LaneErrorKind, LaneStatus},
        lanes::InterpretationController,
        progressive::PartialResult,
        transport::{BufferedError, BufferedSuccess, GENERIC_FAILURE_CODE, TransportError},
        wire::WireEvent,
    },
};
use tokio::sync::mpsc;

use crate::support::{
    INBOUND_TEXT, OUTBOUND_TEXT, ScriptedTransport, StreamScript, buffered_ok, complete_frame,
    error_frame, full_stream, inbound_request, interpretation, metadata, ok_chunks,
    outbound_request, shared, text_frame, wait_for_view,
};

#[tokio::test]
async fn given_clean_stream_when_submitted_then_lane_completes_without_fallback() {
    let transport = shared(ScriptedTransport::default().with_stream(StreamScript::Chunks(
        ok_chunks(full_stream(INBOUND_TEXT, Mode::Inbound, "interp-7", 7)),
    )));
    let mut lane = Lane::new(Mode::Inbound, transport.clone(), 3);
    let mut rx = lane.subscribe();

    let submission = lane.submit(inbound_request());
    let view = wait_for_view(&mut rx, |view| view.is_settled()).await;

    assert_eq!(view.status, LaneStatus::Complete);
    assert_eq!(view.submission, submission);
    assert_eq!(view.interpretation_id.as_deref(), Some("interp-7"));
    assert_eq!(view.result, Some(interpretation(INBOUND_TEXT, Mode::Inbound)));
    assert!(view.metadata.is_some());
    assert!(view.streaming_text.is_empty());
    assert_eq!(
        view.partial,
        PartialResult::from(&interpretation(INBOUND_TEXT, Mode::Inbound))
    );
    assert_eq!(transport.buffered_calls(), 0);
    assert_eq!(transport.bodies.lock().expect("lock")[0].sender_culture, "american");
}

#[tokio::test]
async fn given_mid_stream_error_frame_when_streaming_then_buffered_retry_completes_lane() {
    let transport = shared(
        ScriptedTransport::default()
            .with_stream(StreamScript::Chunks(ok_chunks(vec![
                text_frame("{\"bottomLine\":\"They are gra"),
                error_frame("PROVIDER_ERROR"),
            ])))
            .with_buffered(buffered_ok(INBOUND_TEXT, "interp-buffered")),
    );
    let mut lane = Lane::new(Mode::Inbound, transport.clone(), 3);
    let mut rx = lane.subscribe();

    lane.submit(inbound_request());
    let view = wait_for_view(&mut rx, |view| view.is_settled()).await;

    assert_eq!(view.status, LaneStatus::Complete);
    assert_eq!(view.result, Some(interpretation(INBOUND_TEXT, Mode::Inbound)));
    assert_eq!(view.interpretation_id.as_deref(), Some("interp-buffered"));
    assert_eq!(view.messages_remaining, Some(9));
    assert!(view.error.is_none());
    assert!(!view.retrying);
    assert!(
        !view.streaming_text.contains("They are gra"),
        "partial fragment must not survive the fallback"
    );
    assert_eq!(transport.stream_calls(), 1);
    assert_eq!(transport.buffered_calls(), 1);
}

#[tokio::test]
async fn given_read_error_and_failing_fallback_when_streaming_then_lane_shows_one_error() {
    let transport = shared(
        ScriptedTransport::default()
            .with_stream(StreamScript::Chunks(vec![
                Ok(text_frame("{\"origin")),
                Err(TransportError::Read("connection reset".to_string())),
            ]))
            .with_buffered(Err(BufferedError::Rejected {
                status: 500,
                code: "INTERPRETATION_FAILED".to_string(),
                message: "We couldn't interpret this message.".to_string(),
            })),
    );
    let mut lane = Lane::new(Mode::Outbound, transport.clone(), 3);
    let mut rx = lane.subscribe();

    lane.submit(outbound_request());
    let view = wait_for_view(&mut rx, |view| view.is_settled()).await;

    assert_eq!(view.status, LaneStatus::Errored);
    let error = view.error.expect("user-visible error");
    assert_eq!(error.kind, LaneErrorKind::General);
    assert_eq!(error.code, "INTERPRETATION_FAILED");
    assert!(view.result.is_none());
    assert!(view.streaming_text.is_empty());
    assert_eq!(transport.buffered_calls(), 1, "exactly one fallback");
}

#[tokio::test]
async fn given_usage_limit_on_fallback_when_streaming_fails_then_upgrade_is_required() {
    let transport = shared(
        ScriptedTransport::default()
            .with_stream(StreamScript::OpenFails(TransportError::Status {
                status: 403,
                body: String::new(),
            }))
            .with_buffered(Err(BufferedError::Rejected {
                status: 403,
                code: "LIMIT_EXCEEDED".to_string(),
                message: "You've used all your messages.".to_string(),
            })),
    );
    let mut lane = Lane::new(Mode::Inbound, transport, 3);
    let mut rx = lane.subscribe();

    lane.submit(inbound_request());
    let view = wait_for_view(&mut rx, |view| view.is_settled()).await;

    assert_eq!(view.status, LaneStatus::Errored);
    let error = view.error.expect("upgrade prompt");
    assert_eq!(error.kind, LaneErrorKind::UpgradeRequired);
    assert_eq!(error.code, "LIMIT_EXCEEDED");
}

#[tokio::test]
async fn given_stream_without_terminal_frame_when_it_closes_then_fallback_runs() {
    let transport = shared(
        ScriptedTransport::default()
            .with_stream(StreamScript::Chunks(ok_chunks(vec![text_frame(
                "{\"bottomLine\":",
            )])))
            .with_buffered(buffered_ok(INBOUND_TEXT, "interp-2")),
    );
    let mut lane = Lane::new(Mode::Inbound, transport.clone(), 3);
    let mut rx = lane.subscribe();

    lane.submit(inbound_request());
    let view = wait_for_view(&mut rx, |view| view.is_settled()).await;

    assert_eq!(view.status, LaneStatus::Complete);
    assert_eq!(transport.buffered_calls(), 1);
}

#[tokio::test]
async fn given_malformed_frame_when_streaming_then_it_is_skipped() {
    let mut frames = vec![bytes::Bytes::from_static(b"data: {not json\n\n")];
    frames.extend(full_stream(INBOUND_TEXT, Mode::Inbound, "interp-3", 3));
    let transport = shared(ScriptedTransport::default().with_stream(StreamScript::Chunks(
        ok_chunks(frames),
    )));
    let mut lane = Lane::new(Mode::Inbound, transport.clone(), 3);
    let mut rx = lane.subscribe();

    lane.submit(inbound_request());
    let view = wait_for_view(&mut rx, |view| view.is_settled()).await;

    assert_eq!(view.status, LaneStatus::Complete);
    assert_eq!(view.interpretation_id.as_deref(), Some("interp-3"));
    assert_eq!(transport.buffered_calls(), 0);
}

#[tokio::test]
async fn given_frames_split_mid_character_when_streaming_then_text_is_intact() {
    let text = r#"{"bottomLine":"Très reconnaissant 🙏","culturalContext":"#;
    let frame = text_frame(text);
    let split = frame
        .iter()
        .position(|byte| *byte == 0xF0)
        .expect("emoji lead byte")
        + 2;
    let transport = shared(ScriptedTransport::default().with_stream(
        StreamScript::ChunksThenStall(vec![
            Ok(frame.slice(..split)),
            Ok(frame.slice(split..)),
        ]),
    ));
    let mut lane = Lane::new(Mode::Inbound, transport, 3);
    let mut rx = lane.subscribe();

    lane.submit(inbound_request());
    let view = wait_for_view(&mut rx, |view| !view.streaming_text.is_empty()).await;

    assert_eq!(view.streaming_text, text);
    assert_eq!(
        view.partial.bottom_line.as_deref(),
        Some("Très reconnaissant 🙏")
    );
    assert_eq!(view.partial.cultural_context, None);
    lane.cancel();
}

#[tokio::test]
async fn given_cancel_mid_stream_when_more_chunks_arrive_then_lane_stays_idle_without_fallback() {
    let (chunk_tx, chunk_rx) = mpsc::channel(8);
    let transport = shared(ScriptedTransport::default().with_stream(StreamScript::Channel(chunk_rx)));
    let mut lane = Lane::new(Mode::Inbound, transport.clone(), 3);
    let mut rx = lane.subscribe();

    lane.submit(inbound_request());
    chunk_tx
        .send(Ok(text_frame("{\"bottomLine\":\"They")))
        .await
        .expect("consumer is reading");
    wait_for_view(&mut rx, |view| !view.streaming_text.is_empty()).await;

    lane.cancel();
    let view = lane.view();
    assert_eq!(view.status, LaneStatus::Idle);
    assert!(view.streaming_text.is_empty());
    assert!(view.partial.is_empty());

    let _ = chunk_tx.send(Ok(text_frame(" are grateful.\""))).await;
    let _ = chunk_tx
        .send(Ok(complete_frame(INBOUND_TEXT, Mode::Inbound, "late")))
        .await;
    let _ = chunk_tx.send(Ok(error_frame("PROVIDER_ERROR"))).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let view = lane.view();
    assert_eq!(view.status, LaneStatus::Idle);
    assert!(view.result.is_none());
    assert!(view.streaming_text.is_empty());
    assert_eq!(transport.buffered_calls(), 0, "cancellation never falls back");
}

#[tokio::test]
async fn given_new_submission_when_previous_is_streaming_then_previous_is_superseded() {
    let transport = shared(
        ScriptedTransport::default()
            .with_stream(StreamScript::ChunksThenStall(ok_chunks(vec![text_frame(
                "{\"bottomLine\":\"first",
            )])))
            .with_stream(StreamScript::Chunks(ok_chunks(full_stream(
                INBOUND_TEXT,
                Mode::Inbound,
                "second",
                4,
            )))),
    );
    let mut lane = Lane::new(Mode::Inbound, transport.clone(), 3);
    let mut rx = lane.subscribe();

    let first = lane.submit(inbound_request());
    wait_for_view(&mut rx, |view| !view.streaming_text.is_empty()).await;
    let second = lane.submit(inbound_request());
    assert!(second > first);

    let view = wait_for_view(&mut rx, |view| view.is_settled()).await;
    assert_eq!(view.submission, second);
    assert_eq!(view.interpretation_id.as_deref(), Some("second"));
    assert_eq!(transport.stream_calls(), 2);
    assert_eq!(transport.buffered_calls(), 0);
}

#[tokio::test]
async fn given_two_lanes_when_one_completes_then_the_other_keeps_streaming() {
    let (inbound_tx, inbound_rx) = mpsc::channel(8);
    let transport = shared(
        ScriptedTransport::default()
            .with_stream(StreamScript::Channel(inbound_rx))
            .with_stream(StreamScript::Chunks(ok_chunks(full_stream(
                OUTBOUND_TEXT,
                Mode::Outbound,
                "out-1",
                3,
            )))),
    );
    let mut controller = InterpretationController::new(transport.clone(), 3);
    let mut inbound = controller.subscribe(Mode::Inbound);
    let mut outbound = controller.subscribe(Mode::Outbound);

    controller.submit(inbound_request());
    inbound_tx
        .send(Ok(text_frame("{\"bottomLine\":\"Half")))
        .await
        .expect("inbound consumer is reading");
    wait_for_view(&mut inbound, |view| !view.streaming_text.is_empty()).await;

    controller.submit(outbound_request());
    assert_eq!(controller.active(), Mode::Outbound);
    let done = wait_for_view(&mut outbound, |view| view.is_settled()).await;
    assert_eq!(done.status, LaneStatus::Complete);
    assert_eq!(done.result, Some(interpretation(OUTBOUND_TEXT, Mode::Outbound)));

    controller.switch_to(Mode::Inbound);
    let still = controller.view(Mode::Inbound);
    assert_eq!(still.status, LaneStatus::Streaming);
    assert_eq!(still.streaming_text, "{\"bottomLine\":\"Half");

    // Cancelling a settled lane keeps its result.
    controller.cancel(Mode::Outbound);
    assert_eq!(controller.view(Mode::Outbound).status, LaneStatus::Complete);

    controller.cancel_active();
    assert_eq!(controller.view(Mode::Inbound).status, LaneStatus::Idle);
    assert_eq!(transport.buffered_calls(), 0);
}

#[tokio::test]
async fn given_complete_frame_for_other_mode_when_streaming_then_fallback_is_used() {
    let transport = shared(
        ScriptedTransport::default()
            .with_stream(StreamScript::Chunks(ok_chunks(vec![complete_frame(
                OUTBOUND_TEXT,
                Mode::Outbound,
                "wrong",
            )])))
            .with_buffered(buffered_ok(INBOUND_TEXT, "right")),
    );
    let mut lane = Lane::new(Mode::Inbound, transport.clone(), 3);
    let mut rx = lane.subscribe();

    lane.submit(inbound_request());
    let view = wait_for_view(&mut rx, |view| view.is_settled()).await;

    assert_eq!(view.interpretation_id.as_deref(), Some("right"));
    assert_eq!(transport.buffered_calls(), 1);
}

#[tokio::test]
async fn given_cancel_during_fallback_when_buffered_call_is_pending_then_lane_is_idle() {
    struct SlowBuffered(ScriptedTransport);

    #[async_trait::async_trait]
    impl crosstalk::stream::transport::InterpretTransport for SlowBuffered {
        async fn open_stream(
            &self,
            body: &crosstalk::stream::transport::SubmitRequest,
        ) -> Result<crosstalk::stream::transport::ByteStream, TransportError> {
            self.0.open_stream(body).await
        }

        async fn submit_buffered(
            &self,
            _body: &crosstalk::stream::transport::SubmitRequest,
        ) -> Result<crosstalk::stream::transport::BufferedSuccess, BufferedError> {
            self.0
                .buffered_calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            std::future::pending().await
        }
    }

    let transport = Arc::new(SlowBuffered(ScriptedTransport::default().with_stream(
        StreamScript::Chunks(ok_chunks(vec![error_frame("TIMEOUT")])),
    )));
    let mut lane = Lane::new(Mode::Inbound, transport.clone(), 3);
    let mut rx = lane.subscribe();

    lane.submit(inbound_request());
    let view = wait_for_view(&mut rx, |view| view.retrying).await;
    assert_eq!(view.status, LaneStatus::Errored);
    assert!(view.error.is_none(), "the first failure is silent");

    lane.cancel();
    assert_eq!(lane.view().status, LaneStatus::Idle);
    assert_eq!(
        transport
            .0
            .buffered_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );
}

fn five_emotions(score: u64, with_receiver: bool) -> serde_json::Value {
    let emotions: Vec<serde_json::Value> = ["A", "B", "C", "D", "E"]
        .iter()
        .map(|name| {
            let mut emotion = serde_json::json!({"name": name, "senderScore": score});
            if with_receiver {
                emotion["receiverScore"] = serde_json::json!(score);
            }
            emotion
        })
        .collect();
    serde_json::json!({
        "bottomLine": "They are grateful.",
        "culturalContext": "Thanks often come with an apology.",
        "emotions": emotions
    })
}

#[tokio::test]
async fn given_buffered_result_out_of_bounds_when_stream_fails_then_lane_shows_error() {
    let transport = shared(
        ScriptedTransport::default()
            .with_stream(StreamScript::OpenFails(TransportError::Status {
                status: 502,
                body: String::new(),
            }))
            .with_buffered(Ok(BufferedSuccess {
                interpretation: five_emotions(42, false),
                interpretation_id: Some("bad".to_string()),
                messages_remaining: Some(4),
            })),
    );
    let mut lane = Lane::new(Mode::Inbound, transport.clone(), 3);
    let mut rx = lane.subscribe();

    lane.submit(inbound_request());
    let view = wait_for_view(&mut rx, |view| view.is_settled()).await;

    assert_eq!(view.status, LaneStatus::Errored);
    assert!(view.result.is_none());
    let error = view.error.expect("rejected result is an error");
    assert_eq!(error.kind, LaneErrorKind::General);
    assert_eq!(error.code, GENERIC_FAILURE_CODE);
    assert_eq!(transport.buffered_calls(), 1);
}

#[tokio::test]
async fn given_buffered_result_with_extra_emotions_when_accepted_then_list_is_truncated() {
    let transport = shared(
        ScriptedTransport::default()
            .with_stream(StreamScript::OpenFails(TransportError::Request(
                "connection refused".to_string(),
            )))
            .with_buffered(Ok(BufferedSuccess {
                interpretation: five_emotions(6, true),
                interpretation_id: Some("five".to_string()),
                messages_remaining: None,
            })),
    );
    let mut lane = Lane::new(Mode::Inbound, transport, 3);
    let mut rx = lane.subscribe();

    lane.submit(inbound_request());
    let view = wait_for_view(&mut rx, |view| view.is_settled()).await;

    assert_eq!(view.status, LaneStatus::Complete);
    let result = view.result.expect("validated result");
    assert_eq!(result.emotions().len(), 3);
    assert!(result.emotions().iter().all(|e| e.receiver_score == Some(6)));
}

#[tokio::test]
async fn given_complete_frame_failing_validation_when_streaming_then_buffered_retry_is_used() {
    let invalid = WireEvent::Complete {
        interpretation: Interpretation::Inbound(InboundResult {
            bottom_line: "They are grateful.".to_string(),
            cultural_context: "Thanks often come with an apology.".to_string(),
            emotions: vec![LlmEmotion {
                name: "Gratitude".to_string(),
                sender_score: 42,
                receiver_score: None,
                explanation: None,
            }],
        }),
        metadata: metadata(),
        interpretation_id: Some("streamed".to_string()),
    };
    let transport = shared(
        ScriptedTransport::default()
            .with_stream(StreamScript::Chunks(ok_chunks(vec![
                text_frame("{\"bottomLine\":\"They"),
                invalid.to_frame(),
            ])))
            .with_buffered(buffered_ok(INBOUND_TEXT, "buffered")),
    );
    let mut lane = Lane::new(Mode::Inbound, transport.clone(), 3);
    let mut rx = lane.subscribe();

    lane.submit(inbound_request());
    let view = wait_for_view(&mut rx, |view| view.is_settled()).await;

    assert_eq!(view.status, LaneStatus::Complete);
    assert_eq!(view.interpretation_id.as_deref(), Some("buffered"));
    assert_eq!(view.result, Some(interpretation(INBOUND_TEXT, Mode::Inbound)));
    assert_eq!(transport.buffered_calls(), 1);
}

#[tokio::test]
async fn given_rate_limit_or_auth_error_frame_when_streaming_then_error_is_shown_without_retry() {
    for code in ["RATE_LIMITED", "AUTH_ERROR"] {
        let transport = shared(ScriptedTransport::default().with_stream(StreamScript::Chunks(
            ok_chunks(vec![text_frame("{\"bottomLine\":"), error_frame(code)]),
        )));
        let mut lane = Lane::new(Mode::Inbound, transport.clone(), 3);
        let mut rx = lane.subscribe();

        lane.submit(inbound_request());
        let view = wait_for_view(&mut rx, |view| view.is_settled()).await;

        assert_eq!(view.status, LaneStatus::Errored);
        assert!(!view.retrying);
        assert!(view.streaming_text.is_empty());
        let error = view.error.expect("surfaced error");
        assert_eq!(error.kind, LaneErrorKind::General);
        assert_eq!(error.code, code);
        assert_eq!(error.message, "Something went wrong.");
        assert_eq!(transport.buffered_calls(), 0, "{} must not be retried", code);
    }
}
