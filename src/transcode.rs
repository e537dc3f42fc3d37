//! Import and export of document content in external formats.

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

use crate::sync::PLAINTEXT;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("{0}")]
    UnsupportedFormat(String),

    #[error("{0}")]
    Malformed(String),
}

/// An uploaded file about to become a change to a document
#[derive(Debug, Clone)]
pub struct ImportRequest<'a> {
    pub document_id: &'a str,
    pub user_id: Option<&'a str>,
    pub doc_type: &'a str,
    /// Content of the head snapshot the change will be based on
    pub current: &'a Value,
    pub mime: &'a str,
    pub bytes: &'a [u8],
}

#[derive(Debug, Clone, PartialEq)]
pub struct Exported {
    pub mime: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Turn an uploaded file into a changeset against `current`
    async fn import(&self, request: ImportRequest<'_>) -> Result<Value, TranscodeError>;

    /// Render snapshot content; `format` is the client's `type` query value
    async fn export(&self, doc_type: &str, content: &Value, format: Option<&str>) -> Result<Exported, TranscodeError>;
}

/// `text/plain` in and out of `plaintext` documents, plus JSON export
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextTranscoder;

fn essence(mime: &str) -> String {
    mime.split(';').next().unwrap_or_default().trim().to_ascii_lowercase()
}

impl PlainTextTranscoder {
    fn ensure_plaintext(doc_type: &str) -> Result<(), TranscodeError> {
        if doc_type == PLAINTEXT {
            Ok(())
        } else {
            Err(TranscodeError::UnsupportedFormat(format!(
                "documents of type '{}' cannot be transcoded",
                doc_type
            )))
        }
    }
}

#[async_trait]
impl Transcoder for PlainTextTranscoder {
    async fn import(&self, request: ImportRequest<'_>) -> Result<Value, TranscodeError> {
        Self::ensure_plaintext(request.doc_type)?;
        if essence(request.mime) != "text/plain" {
            return Err(TranscodeError::UnsupportedFormat(format!(
                "cannot import '{}' into a plaintext document",
                request.mime
            )));
        }

        let text = std::str::from_utf8(request.bytes)
            .map_err(|_| TranscodeError::Malformed("uploaded text is not valid UTF-8".to_string()))?;
        let existing = request.current.as_str().map_or(0, |s| s.chars().count());

        // Replace the whole document: delete what is there, insert the upload
        let mut changeset = Vec::new();
        if existing > 0 {
            changeset.push(json!({ "d": existing }));
        }
        if !text.is_empty() {
            changeset.push(Value::String(text.to_string()));
        }
        Ok(Value::Array(changeset))
    }

    async fn export(&self, doc_type: &str, content: &Value, format: Option<&str>) -> Result<Exported, TranscodeError> {
        Self::ensure_plaintext(doc_type)?;
        match format.map(essence).as_deref() {
            None | Some("text") | Some("txt") | Some("text/plain") => {
                let text = content
                    .as_str()
                    .ok_or_else(|| TranscodeError::Malformed("snapshot content is not text".to_string()))?;
                Ok(Exported {
                    mime: "text/plain; charset=utf-8".to_string(),
                    bytes: text.as_bytes().to_vec(),
                })
            }
            Some("json") | Some("application/json") => Ok(Exported {
                mime: "application/json".to_string(),
                bytes: serde_json::to_vec(&json!({ "content": content }))
                    .map_err(|e| TranscodeError::Malformed(e.to_string()))?,
            }),
            Some(other) => Err(TranscodeError::UnsupportedFormat(format!(
                "export format '{}' is not supported",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{EditType, PlainText};

    fn request<'a>(current: &'a Value, mime: &'a str, bytes: &'a [u8]) -> ImportRequest<'a> {
        ImportRequest {
            document_id: "d1",
            user_id: Some("u1"),
            doc_type: PLAINTEXT,
            current,
            mime,
            bytes,
        }
    }

    #[tokio::test]
    async fn import_replaces_content() {
        let current = json!("old text");
        let changeset = PlainTextTranscoder
            .import(request(&current, "text/plain; charset=utf-8", b"new"))
            .await
            .unwrap();
        assert_eq!(changeset, json!([{ "d": 8 }, "new"]));
        assert_eq!(PlainText.apply(&current, &changeset).unwrap(), json!("new"));
    }

    #[tokio::test]
    async fn import_rejects_other_formats() {
        let current = json!("");
        let err = PlainTextTranscoder
            .import(request(&current, "application/pdf", b"%PDF"))
            .await
            .unwrap_err();
        assert!(matches!(err, TranscodeError::UnsupportedFormat(_)));

        let err = PlainTextTranscoder
            .import(request(&current, "text/plain", &[0xff, 0xfe]))
            .await
            .unwrap_err();
        assert!(matches!(err, TranscodeError::Malformed(_)));
    }

    #[tokio::test]
    async fn export_formats() {
        let content = json!("hello");
        let text = PlainTextTranscoder.export(PLAINTEXT, &content, None).await.unwrap();
        assert_eq!(text.bytes, b"hello");
        assert!(text.mime.starts_with("text/plain"));

        let as_json = PlainTextTranscoder.export(PLAINTEXT, &content, Some("json")).await.unwrap();
        assert_eq!(serde_json::from_slice::<Value>(&as_json.bytes).unwrap(), json!({ "content": "hello" }));

        assert!(PlainTextTranscoder.export(PLAINTEXT, &content, Some("docx")).await.is_err());
        assert!(PlainTextTranscoder.export("sheet", &content, None).await.is_err());
    }
}
