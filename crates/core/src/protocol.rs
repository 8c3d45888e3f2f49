//! JSON messages exchanged with the remote streaming audio service.
//!
//! Client -> server: one `setup` message, then `realtimeInput` chunks.
//! Server -> client: `setupComplete`, `serverContent` (audio parts,
//! `interrupted`, `turnComplete`) and `goAway`.

use crate::codec::EncodedChunk;
use crate::config::SessionConfig;
use crate::error::ChannelError;
use crate::event::{InboundMessage, SessionEvent};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetupMessage {
    pub setup: Setup,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseModality {
    Audio,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<ResponseModality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextPart {
    pub text: String,
}

impl SetupMessage {
    /// Audio-only responses; the system instruction is copied as-is.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            setup: Setup {
                model: config.model.clone(),
                generation_config: GenerationConfig {
                    response_modalities: vec![ResponseModality::Audio],
                    speech_config: config.voice_name.as_ref().map(|name| SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: name.clone(),
                            },
                        },
                    }),
                },
                system_instruction: Content {
                    parts: vec![TextPart {
                        text: config.system_instruction.clone(),
                    }],
                },
            },
        }
    }

    pub fn system_instruction(&self) -> &str {
        self.setup
            .system_instruction
            .parts
            .first()
            .map(|part| part.text.as_str())
            .unwrap_or_default()
    }

    pub fn to_json(&self) -> Result<String, ChannelError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInputMessage<'a> {
    realtime_input: RealtimeInput<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput<'a> {
    media_chunks: [&'a EncodedChunk; 1],
}

/// Wraps one capture chunk in a `realtimeInput` message.
pub fn realtime_input_json(chunk: &EncodedChunk) -> Result<String, ChannelError> {
    let message = RealtimeInputMessage {
        realtime_input: RealtimeInput {
            media_chunks: [chunk],
        },
    };
    Ok(serde_json::to_string(&message)?)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<ServerContent>,
    go_away: Option<GoAway>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    turn_complete: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<ServerPart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerPart {
    inline_data: Option<InlineData>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    data: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoAway {
    time_left: Option<String>,
}

/// Maps one server message to session events, in the order they must be
/// applied: open, audio parts, then interruption, then turn bookkeeping.
pub fn decode_server_message(raw: &str) -> Result<Vec<SessionEvent>, ChannelError> {
    let message: ServerMessage = serde_json::from_str(raw)?;
    let mut events = Vec::new();

    if message.setup_complete.is_some() {
        events.push(SessionEvent::ChannelOpened);
    }

    if let Some(content) = message.server_content {
        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if let Some(inline) = part.inline_data {
                    events.push(SessionEvent::ChannelMessage(InboundMessage::Audio(
                        inline.data,
                    )));
                }
                if let Some(text) = part.text {
                    events.push(SessionEvent::ChannelMessage(InboundMessage::Text(text)));
                }
            }
        }
        if content.interrupted {
            events.push(SessionEvent::ChannelMessage(InboundMessage::Interrupted));
        }
        if content.turn_complete {
            events.push(SessionEvent::ChannelMessage(InboundMessage::TurnComplete));
        }
    }

    if let Some(go_away) = message.go_away {
        events.push(SessionEvent::ChannelMessage(InboundMessage::GoAway {
            time_left: go_away.time_left,
        }));
    }

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_message_shape() {
        let config = SessionConfig {
            model: "models/test".to_string(),
            voice_name: Some("Fenrir".to_string()),
            system_instruction: "Stay quiet.".to_string(),
            ..SessionConfig::default()
        };
        let json: serde_json::Value =
            serde_json::from_str(&SetupMessage::from_config(&config).to_json().unwrap()).unwrap();

        assert_eq!(json["setup"]["model"], "models/test");
        assert_eq!(
            json["setup"]["generationConfig"]["responseModalities"],
            serde_json::json!(["AUDIO"])
        );
        assert_eq!(
            json["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]
                ["prebuiltVoiceConfig"]["voiceName"],
            "Fenrir"
        );
        assert_eq!(
            json["setup"]["systemInstruction"]["parts"][0]["text"],
            "Stay quiet."
        );
    }

    #[test]
    fn test_setup_without_voice_omits_speech_config() {
        let config = SessionConfig {
            voice_name: None,
            ..SessionConfig::default()
        };
        let json = SetupMessage::from_config(&config).to_json().unwrap();
        assert!(!json.contains("speechConfig"));
    }

    #[test]
    fn test_system_instruction_is_verbatim() {
        let instruction = "  Línea 1\n\"quoted\"  ";
        let config = SessionConfig {
            system_instruction: instruction.to_string(),
            ..SessionConfig::default()
        };
        assert_eq!(SetupMessage::from_config(&config).system_instruction(), instruction);
    }

    #[test]
    fn test_realtime_input_shape() {
        let chunk = EncodedChunk {
            data: "AAAA".to_string(),
            mime_type: "audio/pcm;rate=16000".to_string(),
        };
        assert_eq!(
            realtime_input_json(&chunk).unwrap(),
            r#"{"realtimeInput":{"mediaChunks":[{"data":"AAAA","mimeType":"audio/pcm;rate=16000"}]}}"#
        );
    }

    #[test]
    fn test_setup_complete_opens_channel() {
        assert_eq!(
            decode_server_message(r#"{"setupComplete":{}}"#).unwrap(),
            vec![SessionEvent::ChannelOpened]
        );
    }

    #[test]
    fn test_audio_parts_then_interruption() {
        let raw = r#"{"serverContent":{
            "modelTurn":{"parts":[
                {"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAAA"}},
                {"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"BBBB"}}
            ]},
            "interrupted":true
        }}"#;
        assert_eq!(
            decode_server_message(raw).unwrap(),
            vec![
                SessionEvent::ChannelMessage(InboundMessage::Audio("AAAA".to_string())),
                SessionEvent::ChannelMessage(InboundMessage::Audio("BBBB".to_string())),
                SessionEvent::ChannelMessage(InboundMessage::Interrupted),
            ]
        );
    }

    #[test]
    fn test_turn_complete_and_go_away() {
        let raw = r#"{"serverContent":{"turnComplete":true},"goAway":{"timeLeft":"10s"}}"#;
        assert_eq!(
            decode_server_message(raw).unwrap(),
            vec![
                SessionEvent::ChannelMessage(InboundMessage::TurnComplete),
                SessionEvent::ChannelMessage(InboundMessage::GoAway {
                    time_left: Some("10s".to_string())
                }),
            ]
        );
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let raw = r#"{"usageMetadata":{"totalTokenCount":12}}"#;
        assert!(decode_server_message(raw).unwrap().is_empty());
    }

    #[test]
    fn test_garbage_is_a_protocol_error() {
        assert!(matches!(
            decode_server_message("not json"),
            Err(ChannelError::Protocol(_))
        ));
    }
}
