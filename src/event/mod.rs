use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

mod decode;

pub use decode::{decode_bytes, decode_frame, DecodeError, DecodedFrame, FrameKind};

/// Envelope type carrying an [`EmotionEvent`] in `data`.
pub const MESSAGE_TYPE_EMOTION: &str = "emotion";
/// Envelope type the server uses to report its own failures.
pub const MESSAGE_TYPE_ERROR: &str = "error";
/// Envelope type for informational server messages.
pub const MESSAGE_TYPE_INFO: &str = "info";

/// Envelope wraps every inbound frame: `{ "type": ..., "data": ... }`.
///
/// `data` is kept as raw JSON; only known types are decoded further.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub msg_type: String,

    #[serde(default)]
    pub data: Value,
}

/// The fixed set of emotions the map knows how to draw.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Happy,
    Sad,
    Angry,
    Surprised,
    Neutral,
}

impl Emotion {
    pub const ALL: [Emotion; 5] = [
        Emotion::Happy,
        Emotion::Sad,
        Emotion::Angry,
        Emotion::Surprised,
        Emotion::Neutral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Angry => "angry",
            Emotion::Surprised => "surprised",
            Emotion::Neutral => "neutral",
        }
    }

    /// Parse an emotion label, treating anything unrecognized as `Neutral`.
    pub fn parse_lossy(label: &str) -> Emotion {
        label.parse().unwrap_or(Emotion::Neutral)
    }

    /// Marker color used by the map view.
    pub fn color_hex(&self) -> &'static str {
        match self {
            Emotion::Happy => "#FFD700",
            Emotion::Sad => "#4169E1",
            Emotion::Angry => "#DC143C",
            Emotion::Surprised => "#FF8C00",
            Emotion::Neutral => "#808080",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a label is not one of the known emotions.
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownEmotion(pub String);

impl fmt::Display for UnknownEmotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown emotion '{}'", self.0)
    }
}

impl std::error::Error for UnknownEmotion {}

impl FromStr for Emotion {
    type Err = UnknownEmotion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Emotion::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| UnknownEmotion(s.to_string()))
    }
}

/// EmotionEvent is one geotagged emotion observation reported by the server.
///
/// Values are passed through untouched: coordinates are not range checked,
/// intensity is not clamped, and `emotion` is stored exactly as received.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmotionEvent {
    #[serde(rename = "lat")]
    pub latitude: f64,

    #[serde(rename = "lng")]
    pub longitude: f64,

    /// Raw label; see [`EmotionEvent::kind`] for the normalized value
    pub emotion: String,

    /// Nominally 0.0..=1.0
    pub intensity: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,

    /// Original text the emotion was classified from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl EmotionEvent {
    pub fn new(latitude: f64, longitude: f64, emotion: impl Into<String>, intensity: f64) -> Self {
        Self {
            latitude,
            longitude,
            emotion: emotion.into(),
            intensity,
            city: None,
            country: None,
            text: None,
        }
    }

    pub fn kind(&self) -> Emotion {
        Emotion::parse_lossy(&self.emotion)
    }

    /// Circle marker radius in pixels: 8 at zero intensity, 20 at full.
    pub fn marker_radius(&self) -> f64 {
        8.0 + self.intensity * 12.0
    }
}
