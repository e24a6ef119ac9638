//! Document parsing seam.
//!
//! The pipeline works on [`Document`] values; how bytes become documents is
//! behind the [`DocumentParser`] trait. The default wire format is TOML, as
//! produced and consumed by the peers this listener talks to.

use serde_json::Value;

use jobstream_registry::Document;

use crate::error::ParseError;

/// Default cap on payload size, matching the limit peers enforce.
pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Turns raw payload bytes into a structured document and back.
pub trait DocumentParser: Send + Sync {
    fn parse(&self, payload: &[u8]) -> Result<Document, ParseError>;
    fn serialize(&self, doc: &Document) -> Result<Vec<u8>, ParseError>;
}

/// TOML wire format.
#[derive(Debug, Clone)]
pub struct TomlDocumentParser {
    max_payload: usize,
}

impl TomlDocumentParser {
    pub fn new() -> Self {
        Self {
            max_payload: MAX_PAYLOAD_BYTES,
        }
    }

    /// Override the payload size cap.
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self { max_payload }
    }
}

impl Default for TomlDocumentParser {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentParser for TomlDocumentParser {
    fn parse(&self, payload: &[u8]) -> Result<Document, ParseError> {
        if payload.len() > self.max_payload {
            return Err(ParseError::TooLarge {
                size: payload.len(),
                max: self.max_payload,
            });
        }
        let text = std::str::from_utf8(payload)?;
        let value: Value =
            toml::from_str(text).map_err(|e| ParseError::Syntax(e.to_string()))?;
        match value {
            Value::Object(map) => Ok(map),
            _ => Err(ParseError::NotATable),
        }
    }

    fn serialize(&self, doc: &Document) -> Result<Vec<u8>, ParseError> {
        let text = toml::to_string(&Value::Object(doc.clone()))
            .map_err(|e| ParseError::Syntax(e.to_string()))?;
        Ok(text.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_a_toml_table() {
        let parser = TomlDocumentParser::new();
        let doc = parser
            .parse(b"job_id = \"T1\"\ncount = 3\n\n[nested]\nflag = true\n")
            .unwrap();
        assert_eq!(doc.get("job_id"), Some(&json!("T1")));
        assert_eq!(doc.get("count"), Some(&json!(3)));
        assert_eq!(doc.get("nested"), Some(&json!({"flag": true})));
    }

    #[test]
    fn rejects_invalid_syntax() {
        let parser = TomlDocumentParser::new();
        let err = parser.parse(b"not valid [toml").unwrap_err();
        assert!(matches!(err, ParseError::Syntax(_)));
    }

    #[test]
    fn rejects_invalid_utf8() {
        let parser = TomlDocumentParser::new();
        let err = parser.parse(&[0xff, 0xfe, 0x00]).unwrap_err();
        assert!(matches!(err, ParseError::Utf8(_)));
    }

    #[test]
    fn rejects_oversized_payloads() {
        let parser = TomlDocumentParser::with_max_payload(16);
        let err = parser.parse(b"key = \"a long enough value\"").unwrap_err();
        assert!(matches!(err, ParseError::TooLarge { .. }));
    }

    #[test]
    fn round_trips_a_document() {
        let parser = TomlDocumentParser::new();
        let mut doc = Document::new();
        doc.insert("job_id".into(), json!("T1"));
        doc.insert("answer".into(), json!(42));
        doc.insert("tags".into(), json!(["a", "b"]));

        let bytes = parser.serialize(&doc).unwrap();
        let reparsed = parser.parse(&bytes).unwrap();
        assert_eq!(reparsed, doc);
    }
}
