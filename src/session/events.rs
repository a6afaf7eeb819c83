//! Wire schema for the Deepgram live-transcription protocol.
//!
//! See the [Deepgram API reference][api] for the canonical field list. Unknown
//! fields are ignored by `serde` by default, which matches the tolerance the
//! pool needs to stay forward-compatible with new server fields.
//!
//! [api]: https://developers.deepgram.com/docs/live-streaming-audio

use serde::{Deserialize, Serialize};

/// One inbound text frame, decoded from JSON.
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptEvent {
    #[serde(rename = "type", default)]
    pub event_type: Option<String>,
    #[serde(rename = "channel_index", default)]
    pub channel_index: Vec<i64>,
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub duration: f64,
    #[serde(rename = "is_final", default)]
    pub is_final: bool,
    #[serde(rename = "speech_final", default)]
    pub speech_final: bool,
    #[serde(rename = "from_finalize", default)]
    pub from_finalize: bool,
    #[serde(default)]
    pub channel: Option<Channel>,
    #[serde(default)]
    pub metadata: Option<EventMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Channel {
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Alternative {
    pub transcript: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub words: Vec<Word>,
}

/// A single recognized word.
///
/// `end = -1.0` is a sentinel meaning "open-ended" — it intentionally bypasses
/// the usual `end >= start` invariant, since the server hasn't closed the word
/// boundary yet.
#[derive(Debug, Clone, Deserialize)]
pub struct Word {
    pub word: String,
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub confidence: f64,
    #[serde(rename = "punctuated_word", default)]
    pub punctuated_word: Option<String>,
}

impl Word {
    /// Whether `end` is the open-ended sentinel rather than a real timestamp.
    pub fn is_open_ended(&self) -> bool {
        self.end < 0.0
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventMetadata {
    #[serde(rename = "request_id", default)]
    pub request_id: Option<String>,
    #[serde(rename = "model_info", default)]
    pub model_info: Option<ModelInfo>,
    #[serde(rename = "model_uuid", default)]
    pub model_uuid: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub arch: Option<String>,
}

/// The flattened, caller-facing projection of a [`TranscriptEvent`].
///
/// Synthesized only when the event carries at least one alternative; see
/// [`TranscriptEvent::to_message`].
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptMessage {
    pub transcript: String,
    pub confidence: f64,
    pub channel_index: String,
    pub start: f64,
    pub duration: f64,
    pub words: Vec<Word>,
    pub is_final: bool,
}

impl PartialEq for Word {
    fn eq(&self, other: &Self) -> bool {
        self.word == other.word
            && self.start == other.start
            && self.end == other.end
            && self.confidence == other.confidence
            && self.punctuated_word == other.punctuated_word
    }
}

impl TranscriptEvent {
    /// Project this event into a [`TranscriptMessage`], or `None` if there is
    /// no channel or the channel has no alternatives.
    pub fn to_message(&self) -> Option<TranscriptMessage> {
        let channel = self.channel.as_ref()?;
        let alternative = channel.alternatives.first()?;

        let channel_index = self
            .channel_index
            .first()
            .map(|n| n.to_string())
            .unwrap_or_else(|| "default".to_string());

        Some(TranscriptMessage {
            transcript: alternative.transcript.clone(),
            confidence: alternative.confidence,
            channel_index,
            start: self.start,
            duration: self.duration,
            words: alternative.words.clone(),
            is_final: self.is_final,
        })
    }
}

/// An outbound control frame. `message` is required when `kind` is
/// `"Error"`; the builder helpers enforce this at the call site.
#[derive(Debug, Clone, Serialize)]
pub struct ControlMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ControlMessage {
    pub fn start_stream() -> Self {
        Self::bare("StartStream")
    }

    pub fn close_stream() -> Self {
        Self::bare("CloseStream")
    }

    pub fn keep_alive() -> Self {
        Self::bare("KeepAlive")
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: "Error".to_string(),
            message: Some(message.into()),
            code: None,
            details: None,
        }
    }

    fn bare(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            message: None,
            code: None,
            details: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "type": "Results",
            "channel_index": [0, 1],
            "start": 1.02,
            "duration": 0.98,
            "is_final": true,
            "speech_final": true,
            "from_finalize": false,
            "channel": {
                "alternatives": [{
                    "transcript": "Hello world",
                    "confidence": 0.925,
                    "words": [
                        {"word": "hello", "start": 1.02, "end": 1.30, "confidence": 0.99, "punctuated_word": "Hello"},
                        {"word": "world", "start": 1.31, "end": 1.60, "confidence": 0.90, "punctuated_word": "world"}
                    ]
                }]
            },
            "metadata": {
                "request_id": "abc-123",
                "model_info": {"name": "nova-2", "version": "1", "arch": "general"},
                "model_uuid": "uuid-1"
            }
        }"#
    }

    #[test]
    fn decodes_sample_transcript_event() {
        let event: TranscriptEvent = serde_json::from_str(sample_json()).unwrap();
        let alt = &event.channel.as_ref().unwrap().alternatives[0];
        assert_eq!(alt.transcript, "Hello world");
        assert!((alt.confidence - 0.925).abs() < 1e-9);
        assert_eq!(alt.words.len(), 2);
    }

    #[test]
    fn to_message_projects_first_alternative() {
        let event: TranscriptEvent = serde_json::from_str(sample_json()).unwrap();
        let msg = event.to_message().expect("message");
        assert_eq!(msg.transcript, "Hello world");
        assert_eq!(msg.channel_index, "0");
        assert_eq!(msg.start, event.start);
        assert_eq!(msg.duration, event.duration);
        assert!(msg.is_final);
    }

    #[test]
    fn to_message_none_without_channel() {
        let event: TranscriptEvent = serde_json::from_str(r#"{"type":"Metadata"}"#).unwrap();
        assert!(event.to_message().is_none());
    }

    #[test]
    fn to_message_none_with_empty_alternatives() {
        let event: TranscriptEvent =
            serde_json::from_str(r#"{"channel":{"alternatives":[]}}"#).unwrap();
        assert!(event.to_message().is_none());
    }

    #[test]
    fn channel_index_defaults_to_default_string() {
        let event: TranscriptEvent = serde_json::from_str(
            r#"{"channel":{"alternatives":[{"transcript":"hi","confidence":0.5,"words":[]}]}}"#,
        )
        .unwrap();
        assert_eq!(event.to_message().unwrap().channel_index, "default");
    }

    #[test]
    fn open_ended_word_sentinel() {
        let word = Word {
            word: "foo".to_string(),
            start: 1.0,
            end: -1.0,
            confidence: 0.5,
            punctuated_word: None,
        };
        assert!(word.is_open_ended());
    }

    #[test]
    fn control_message_serializes_exact_field_names() {
        let json = serde_json::to_string(&ControlMessage::keep_alive()).unwrap();
        assert_eq!(json, r#"{"type":"KeepAlive"}"#);

        let err = ControlMessage::error("boom");
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, r#"{"type":"Error","message":"boom"}"#);
    }
}
