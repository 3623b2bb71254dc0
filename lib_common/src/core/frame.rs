//! # Measurement Frame Decoding
//!
//! Inbound frames are text renderings of a key/value mapping. The server may
//! emit strict JSON or a literal-style mapping with single-quoted strings, so
//! the body is parsed with `serde_json5`, which accepts both.

use serde_json::Value;
use thiserror::Error;

/// Key holding the per-event identifier.
pub const FILE_IDENTIFIER_KEY: &str = "file_identifier";
/// Key holding the measured payload.
pub const TIMESTAMP_DATA_KEY: &str = "timestamp_data";

/// Reasons a frame is rejected. Rejected frames are dropped by the ingestor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The body is not a parseable literal mapping.
    #[error("Frame body could not be parsed: {0}")]
    Unparseable(String),

    /// The body parsed, but is not a mapping.
    #[error("Frame body is not a key/value mapping")]
    NotAMapping,

    /// A required field is absent, null or empty.
    #[error("Frame is missing required field '{0}'")]
    MissingField(&'static str),

    /// A required field has the wrong type.
    #[error("Frame field '{0}' has an unexpected type")]
    InvalidField(&'static str),
}

/// A decoded measurement event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurementFrame {
    /// Server-issued identifier, unique within a session.
    pub file_identifier: String,
    /// Payload to stage, in its textual form.
    pub timestamp_data: String,
}

impl MeasurementFrame {
    /// Decodes one frame body.
    ///
    /// `timestamp_data` is kept verbatim when it is a string; any other
    /// non-null value is staged as its JSON text.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let value: Value =
            serde_json5::from_str(text).map_err(|e| FrameError::Unparseable(e.to_string()))?;
        let map = value.as_object().ok_or(FrameError::NotAMapping)?;

        let file_identifier = match map.get(FILE_IDENTIFIER_KEY) {
            None | Some(Value::Null) => return Err(FrameError::MissingField(FILE_IDENTIFIER_KEY)),
            Some(Value::String(s)) if s.is_empty() => {
                return Err(FrameError::MissingField(FILE_IDENTIFIER_KEY))
            }
            Some(Value::String(s)) => s.clone(),
            Some(_) => return Err(FrameError::InvalidField(FILE_IDENTIFIER_KEY)),
        };

        let timestamp_data = match map.get(TIMESTAMP_DATA_KEY) {
            None | Some(Value::Null) => return Err(FrameError::MissingField(TIMESTAMP_DATA_KEY)),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };

        Ok(Self {
            file_identifier,
            timestamp_data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_json_frame() {
        let frame =
            MeasurementFrame::decode(r#"{"file_identifier": "abc123", "timestamp_data": "1700000000"}"#)
                .unwrap();
        assert_eq!(frame.file_identifier, "abc123");
        assert_eq!(frame.timestamp_data, "1700000000");
    }

    #[test]
    fn test_decode_single_quoted_mapping() {
        let frame =
            MeasurementFrame::decode("{'file_identifier': 'f-1', 'timestamp_data': '12:00:01.5'}")
                .unwrap();
        assert_eq!(frame.file_identifier, "f-1");
        assert_eq!(frame.timestamp_data, "12:00:01.5");
    }

    #[test]
    fn test_non_string_payload_is_rendered_as_json() {
        let frame =
            MeasurementFrame::decode(r#"{"file_identifier": "n", "timestamp_data": true}"#).unwrap();
        assert_eq!(frame.timestamp_data, "true");
    }

    #[test]
    fn test_missing_fields_are_rejected() {
        assert_eq!(
            MeasurementFrame::decode(r#"{"timestamp_data": "1"}"#),
            Err(FrameError::MissingField(FILE_IDENTIFIER_KEY))
        );
        assert_eq!(
            MeasurementFrame::decode(r#"{"file_identifier": "a"}"#),
            Err(FrameError::MissingField(TIMESTAMP_DATA_KEY))
        );
        assert_eq!(
            MeasurementFrame::decode(r#"{"file_identifier": "", "timestamp_data": "1"}"#),
            Err(FrameError::MissingField(FILE_IDENTIFIER_KEY))
        );
    }

    #[test]
    fn test_garbage_is_unparseable() {
        assert!(matches!(
            MeasurementFrame::decode("not a mapping {"),
            Err(FrameError::Unparseable(_))
        ));
        assert_eq!(MeasurementFrame::decode("[1, 2]"), Err(FrameError::NotAMapping));
        assert_eq!(
            MeasurementFrame::decode(r#"{"file_identifier": 7, "timestamp_data": "1"}"#),
            Err(FrameError::InvalidField(FILE_IDENTIFIER_KEY))
        );
    }
}
