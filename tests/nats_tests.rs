use dictation_stream::nats::messages::{
    command_subject, decode_audio, decode_command, disconnect_subject, encode_audio, encode_event,
    event_subject, socket_id_from_subject,
};
use dictation_stream::pipeline::{StreamCommand, StreamEvent};
use dictation_stream::session::{ContextType, Language, SessionId};
use dictation_stream::{ErrorCode, StreamError};

#[test]
fn test_start_command_deserialization() {
    let json = r#"{
        "event": "stream:start",
        "data": {
            "user_id": "nurse-12",
            "context_type": "patient",
            "patient_id": "p-889"
        }
    }"#;

    match decode_command(json.as_bytes()).unwrap() {
        StreamCommand::Start(config) => {
            assert_eq!(config.user_id, "nurse-12");
            assert_eq!(config.context_type, ContextType::Patient);
            assert_eq!(config.patient_id.as_deref(), Some("p-889"));
            // Language defaults to Japanese
            assert_eq!(config.language, Language::Ja);
        }
        other => panic!("unexpected command: {:?}", other),
    }
}

#[test]
fn test_chunk_command_carries_base64_audio() {
    let payload = encode_audio(&[1, 2, 3, 250]);
    let json = format!(
        r#"{{"event":"stream:chunk","data":{{"session_id":"stream-abc","sequence":7,"data":"{}"}}}}"#,
        payload
    );

    let StreamCommand::Chunk {
        session_id,
        sequence,
        data,
    } = decode_command(json.as_bytes()).unwrap()
    else {
        panic!("expected chunk command");
    };
    assert_eq!(session_id, SessionId::from("stream-abc"));
    assert_eq!(sequence, 7);
    assert_eq!(decode_audio(&data).unwrap(), vec![1, 2, 3, 250]);
}

#[test]
fn test_context_command_flattens_context_fields() {
    let json = r#"{
        "event": "stream:context",
        "data": {"session_id": "stream-abc", "context_type": "global"}
    }"#;

    let StreamCommand::UpdateContext {
        session_id,
        context,
    } = decode_command(json.as_bytes()).unwrap()
    else {
        panic!("expected context command");
    };
    assert_eq!(session_id.as_str(), "stream-abc");
    assert_eq!(context.context_type, ContextType::Global);
    assert!(context.patient_id.is_none());
}

#[test]
fn test_malformed_commands_are_transport_errors() {
    for payload in [
        &b"not json"[..],
        br#"{"event":"stream:unknown","data":{}}"#,
        br#"{"event":"stream:stop","data":{}}"#,
    ] {
        let err = decode_command(payload).unwrap_err();
        assert!(matches!(err, StreamError::Transport(_)), "{:?}", err);
    }
}

#[test]
fn test_invalid_base64_is_invalid_audio() {
    let err = decode_audio("***").unwrap_err();
    assert!(matches!(err, StreamError::InvalidAudio(_)));
    assert_eq!(err.code(), ErrorCode::InvalidAudioFormat);
}

#[test]
fn test_event_serialization_uses_event_names() {
    let event = StreamEvent::Queued {
        ticket_id: "ticket-1".to_string(),
        position: 3,
        estimated_wait_ms: 90_000,
    };
    let json: serde_json::Value = serde_json::from_slice(&encode_event(&event).unwrap()).unwrap();
    assert_eq!(json["event"], "stream:queued");
    assert_eq!(json["data"]["position"], 3);
    assert_eq!(json["data"]["estimated_wait_ms"], 90_000);

    let event = StreamEvent::Error {
        code: ErrorCode::SessionLimitReached,
        message: "full".to_string(),
    };
    let json: serde_json::Value = serde_json::from_slice(&encode_event(&event).unwrap()).unwrap();
    assert_eq!(json["event"], "stream:error");
    assert_eq!(json["data"]["code"], "SESSION_LIMIT_REACHED");
}

#[test]
fn test_categorization_events_round_trip() {
    let event = StreamEvent::CategorizationComplete {
        review_id: "review-9".to_string(),
        categories: vec!["vital_signs".to_string(), "medication".to_string()],
    };
    let bytes = encode_event(&event).unwrap();
    let back: StreamEvent = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(back, event);
    assert_eq!(back.name(), "categorization:complete");
}

#[test]
fn test_subjects_embed_socket_id() {
    assert_eq!(command_subject("sock-1"), "stream.command.sock-1");
    assert_eq!(event_subject("sock-1"), "stream.event.sock-1");
    assert_eq!(disconnect_subject("sock-1"), "stream.disconnect.sock-1");

    assert_eq!(socket_id_from_subject("stream.command.sock-1"), Some("sock-1"));
    assert_eq!(socket_id_from_subject(&disconnect_subject("a.b")), Some("a.b"));
    assert_eq!(socket_id_from_subject("stream.command."), None);
    assert_eq!(socket_id_from_subject("other.command.sock-1"), None);
    assert_eq!(socket_id_from_subject("stream"), None);
}
