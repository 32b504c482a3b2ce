use super::{EmotionEvent, Envelope, MESSAGE_TYPE_EMOTION, MESSAGE_TYPE_ERROR};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;

/// Decode errors for inbound frames
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    NotUtf8,
    Malformed(String),
    NotAnObject,
    MissingType,
    InvalidEmotion(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::NotUtf8 => write!(f, "frame is not valid UTF-8"),
            DecodeError::Malformed(e) => write!(f, "frame is not valid JSON: {}", e),
            DecodeError::NotAnObject => write!(f, "frame must be a JSON object"),
            DecodeError::MissingType => write!(f, "frame has no string 'type' field"),
            DecodeError::InvalidEmotion(e) => {
                write!(f, "emotion data does not match the event schema: {}", e)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// What a decoded frame carries beyond its envelope
#[derive(Clone, Debug, PartialEq)]
pub enum FrameKind {
    Emotion(EmotionEvent),
    /// Server-reported error; `data` is forwarded as-is
    ServerError(Value),
    /// Any other type; only the generic envelope is published
    Other,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DecodedFrame {
    pub envelope: Envelope,
    pub kind: FrameKind,
}

/// Decodes one inbound text frame.
///
/// Rules:
/// - Frame must be a JSON object with a string `type`
/// - `data` defaults to null when absent
/// - `type == "emotion"` requires `data` to match [`EmotionEvent`]
///   (`lat`, `lng`, `emotion`, `intensity` required)
pub fn decode_frame(text: &str) -> Result<DecodedFrame, DecodeError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let object = value.as_object().ok_or(DecodeError::NotAnObject)?;
    if !object.get("type").map_or(false, Value::is_string) {
        return Err(DecodeError::MissingType);
    }

    let envelope: Envelope =
        serde_json::from_value(value).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let kind = match envelope.msg_type.as_str() {
        MESSAGE_TYPE_EMOTION => {
            let event = EmotionEvent::deserialize_data(&envelope.data)?;
            FrameKind::Emotion(event)
        }
        MESSAGE_TYPE_ERROR => FrameKind::ServerError(envelope.data.clone()),
        _ => FrameKind::Other,
    };

    Ok(DecodedFrame { envelope, kind })
}

/// Decodes a binary frame, which must hold UTF-8 JSON text.
pub fn decode_bytes(bytes: &[u8]) -> Result<DecodedFrame, DecodeError> {
    let text = std::str::from_utf8(bytes).map_err(|_| DecodeError::NotUtf8)?;
    decode_frame(text)
}

impl EmotionEvent {
    fn deserialize_data(data: &Value) -> Result<Self, DecodeError> {
        if !data.is_object() {
            return Err(DecodeError::InvalidEmotion("data must be an object".to_string()));
        }
        EmotionEvent::deserialize(data).map_err(|e| DecodeError::InvalidEmotion(e.to_string()))
    }
}
