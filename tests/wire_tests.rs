use duplex::audio::encoder::AudioFrame;
use duplex::config::SessionConfig;
use duplex::transport::wire::{
    decode_server_message, parse_rate, realtime_input_message, setup_message, DEFAULT_OUTPUT_RATE,
};
use duplex::{AgentError, ServerEvent, TransportEvent};

#[test]
fn test_setup_message_carries_session_config() {
    let config = SessionConfig::default();
    let msg = setup_message(&config);
    let setup = &msg["setup"];

    assert_eq!(setup["model"], format!("models/{}", config.model));
    assert_eq!(setup["generationConfig"]["responseModalities"][0], "AUDIO");
    assert_eq!(
        setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
        "Fenrir"
    );
    assert_eq!(setup["systemInstruction"]["parts"][0]["text"], config.system_instruction);
    assert!(setup.get("inputAudioTranscription").is_some());
    assert!(setup.get("outputAudioTranscription").is_some());
}

#[test]
fn test_setup_message_omits_disabled_transcription() {
    let config = SessionConfig {
        model: "models/custom".into(),
        input_transcription: false,
        ..SessionConfig::default()
    };
    let msg = setup_message(&config);
    assert_eq!(msg["setup"]["model"], "models/custom");
    assert!(msg["setup"].get("inputAudioTranscription").is_none());
}

#[test]
fn test_realtime_input_is_base64_pcm() {
    let frame = AudioFrame {
        pcm: vec![0x01, 0x02, 0x03, 0x04],
        sample_rate: 16_000,
    };
    let msg = realtime_input_message(&frame);
    let chunk = &msg["realtimeInput"]["mediaChunks"][0];
    assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
    assert_eq!(chunk["data"], "AQIDBA==");
}

#[test]
fn test_setup_complete_is_the_open_acknowledgment() {
    let events = decode_server_message(r#"{"setupComplete":{}}"#).unwrap();
    assert_eq!(events, vec![TransportEvent::Opened]);
}

#[test]
fn test_server_content_maps_in_order() {
    let text = r#"{
        "serverContent": {
            "outputTranscription": {"text": "Hi"},
            "inputTranscription": {"text": "ignored when output present"},
            "turnComplete": true,
            "modelTurn": {"parts": [
                {"inlineData": {"mimeType": "audio/pcm;rate=22050", "data": "AAABAA=="}},
                {"inlineData": {"mimeType": "audio/pcm", "data": "AAAA"}}
            ]},
            "interrupted": true
        }
    }"#;
    let events = decode_server_message(text).unwrap();
    let expected: Vec<TransportEvent> = vec![
        ServerEvent::OutputTranscriptDelta("Hi".into()).into(),
        ServerEvent::TurnComplete.into(),
        ServerEvent::AudioChunk {
            data: vec![0, 0, 1, 0],
            sample_rate: 22_050,
            channels: 1,
        }
        .into(),
        ServerEvent::Interrupted.into(),
    ];
    assert_eq!(events, expected);
}

#[test]
fn test_input_transcription_and_default_rate() {
    let text = r#"{"serverContent": {
        "inputTranscription": {"text": "hello"},
        "modelTurn": {"parts": [{"inlineData": {"data": "AAA="}}]}
    }}"#;
    let events = decode_server_message(text).unwrap();
    assert_eq!(
        events[0],
        TransportEvent::Server(ServerEvent::InputTranscriptDelta("hello".into()))
    );
    match &events[1] {
        TransportEvent::Server(ServerEvent::AudioChunk { sample_rate, .. }) => {
            assert_eq!(*sample_rate, DEFAULT_OUTPUT_RATE)
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_unrelated_messages_map_to_nothing() {
    assert!(decode_server_message(r#"{"usageMetadata": {"totalTokenCount": 3}}"#)
        .unwrap()
        .is_empty());
}

#[test]
fn test_malformed_messages_are_errors() {
    assert!(matches!(
        decode_server_message("not json"),
        Err(AgentError::TransportFailure(_))
    ));
    let bad_audio = r#"{"serverContent": {"modelTurn": {"parts": [{"inlineData": {"data": "%%%"}}]}}}"#;
    assert!(matches!(
        decode_server_message(bad_audio),
        Err(AgentError::DecodeFailure(_))
    ));
}

#[test]
fn test_parse_rate() {
    assert_eq!(parse_rate("audio/pcm;rate=24000"), Some(24_000));
    assert_eq!(parse_rate("audio/pcm; rate=16000"), Some(16_000));
    assert_eq!(parse_rate("audio/pcm"), None);
}
