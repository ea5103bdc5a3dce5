//! Wire schemas for the WebSocket channels and REST endpoints. Everything
//! here is a plain serde shape; handler logic lives in `ws` and `routes`.

use canvas_core::analysis::AnalysisRecord;
use serde::{Deserialize, Serialize};

/// Frames accepted on the voice channel.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VoiceChannelFrame {
    /// One spoken utterance, base64-encoded audio bytes.
    Voice { audio_data: String },
    /// A canvas snapshot, base64-encoded PNG bytes.
    Image { image_data: String },
}

/// Outbound `"type": "voice"` message. The user-side echo has no audio; the
/// assistant reply carries synthesized speech; a relayed text (pending-text
/// drain) carries neither audio nor an `is_user` flag.
#[derive(Debug, Serialize)]
pub struct VoiceMessage {
    pub r#type: &'static str,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_user: Option<bool>,
}

impl VoiceMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            r#type: "voice",
            text: text.into(),
            audio_data: None,
            is_user: Some(true),
        }
    }

    pub fn assistant(text: impl Into<String>, audio_b64: String) -> Self {
        Self {
            r#type: "voice",
            text: text.into(),
            audio_data: Some(audio_b64),
            is_user: Some(false),
        }
    }

    pub fn relay(text: impl Into<String>) -> Self {
        Self {
            r#type: "voice",
            text: text.into(),
            audio_data: None,
            is_user: None,
        }
    }
}

/// Canvas snapshot forwarded from the analysis channel to the voice channel.
#[derive(Debug, Serialize)]
pub struct ImageForward {
    pub r#type: &'static str,
    pub image_data: String,
}

impl ImageForward {
    pub fn new(image_data: String) -> Self {
        Self {
            r#type: "image",
            image_data,
        }
    }
}

/// Minimal status envelope shared by both channels.
#[derive(Debug, Serialize)]
pub struct StatusMessage {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StatusMessage {
    pub fn success() -> Self {
        Self {
            status: "success",
            message: None,
        }
    }

    pub fn success_with(message: impl Into<String>) -> Self {
        Self {
            status: "success",
            message: Some(message.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error",
            message: Some(message.into()),
        }
    }
}

/// Structured analysis reply on the analysis channel.
#[derive(Debug, Serialize)]
pub struct AnalysisReply {
    pub status: &'static str,
    pub analysis: AnalysisPayload,
}

#[derive(Debug, Serialize)]
pub struct AnalysisPayload {
    pub colors: Vec<String>,
    pub emotion: String,
    pub content: String,
    pub context: String,
}

impl From<&AnalysisRecord> for AnalysisReply {
    fn from(record: &AnalysisRecord) -> Self {
        Self {
            status: "success",
            analysis: AnalysisPayload {
                colors: record.colors.clone(),
                emotion: record.emotion.clone(),
                content: record.content.clone(),
                context: record.context.clone(),
            },
        }
    }
}

/// First frame on the analysis channel, naming the session to join.
#[derive(Debug, Deserialize)]
pub struct DrawingHandshake {
    pub canvas_id: String,
}

/// Subsequent frames on the analysis channel. Exactly one of the fields is
/// expected; an object with neither is acknowledged and ignored.
#[derive(Debug, Deserialize)]
pub struct DrawingFrame {
    pub image_url: Option<String>,
    pub image_data: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NewDrawingBody {
    pub robot_id: String,
    pub name: String,
    pub age: Option<u8>,
    pub canvas_id: String,
}

#[derive(Debug, Deserialize)]
pub struct DoneDrawingBody {
    pub canvas_id: String,
    pub image_url: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatQuery {
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voice_frame_deserializes_by_type_tag() {
        let frame: VoiceChannelFrame =
            serde_json::from_str(r#"{"type":"voice","audio_data":"QUJD"}"#).unwrap();
        assert!(matches!(frame, VoiceChannelFrame::Voice { audio_data } if audio_data == "QUJD"));

        let frame: VoiceChannelFrame =
            serde_json::from_str(r#"{"type":"image","image_data":"UE5H"}"#).unwrap();
        assert!(matches!(frame, VoiceChannelFrame::Image { image_data } if image_data == "UE5H"));
    }

    #[test]
    fn unknown_frame_type_is_rejected() {
        assert!(serde_json::from_str::<VoiceChannelFrame>(r#"{"type":"ping"}"#).is_err());
    }

    #[test]
    fn user_echo_has_no_audio() {
        let json = serde_json::to_value(VoiceMessage::user("안녕하세요")).unwrap();
        assert_eq!(json["type"], "voice");
        assert_eq!(json["is_user"], true);
        assert!(json.get("audio_data").is_none());
    }

    #[test]
    fn assistant_message_carries_audio() {
        let json =
            serde_json::to_value(VoiceMessage::assistant("반가워요", "QVVESU8=".to_string()))
                .unwrap();
        assert_eq!(json["is_user"], false);
        assert_eq!(json["audio_data"], "QVVESU8=");
    }

    #[test]
    fn relayed_text_omits_both_optional_fields() {
        let json = serde_json::to_value(VoiceMessage::relay("참 잘했어요")).unwrap();
        assert!(json.get("audio_data").is_none());
        assert!(json.get("is_user").is_none());
    }

    #[test]
    fn status_success_omits_message() {
        let json = serde_json::to_value(StatusMessage::success()).unwrap();
        assert_eq!(json["status"], "success");
        assert!(json.get("message").is_none());

        let json = serde_json::to_value(StatusMessage::error("Invalid JSON format")).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["message"], "Invalid JSON format");
    }

    #[test]
    fn analysis_reply_mirrors_the_record() {
        let record =
            AnalysisRecord::parse("색상: 빨강, 파랑\n감정: 기쁨\n내용: 나무\n문맥: 숲 이야기");
        let json = serde_json::to_value(AnalysisReply::from(&record)).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["analysis"]["colors"][0], "빨강");
        assert_eq!(json["analysis"]["emotion"], "기쁨");
        assert_eq!(json["analysis"]["context"], "숲 이야기");
    }
}
