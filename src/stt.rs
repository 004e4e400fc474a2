//! Speech-to-text upload pipeline
//!
//! An audio file is posted as multipart form data to a user-configured
//! recognition endpoint. Services disagree on the response shape, so the
//! body is first classified into a [`SttPayload`] and then normalized into
//! one ordered list of [`Segment`]s; nothing else looks at the raw shape.

use crate::history::{HistoryEntry, Segment};
use crate::http::{AudioUpload, HttpTransport, TransportError};
use crate::store::SessionStore;
use log::{info, warn};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SttError {
    #[error("no speech-to-text endpoint configured (set one with `voxlate config set stt-endpoint <url>`)")]
    NoEndpoint,
    #[error("failed to read audio file {}: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("{endpoint} answered {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("no segments in speech-to-text response")]
    NoSegments,
}

#[derive(Debug, Clone, Deserialize)]
struct RawSegment {
    #[serde(default)]
    start: Option<f64>,
    #[serde(default)]
    end: Option<f64>,
    #[serde(default)]
    text: Option<String>,
}

/// The response shapes recognition services are known to return
#[derive(Debug, Clone)]
pub enum SttPayload {
    List(Vec<RawSegmentView>),
    Keyed(Vec<RawSegmentView>),
    PlainText(String),
    Empty,
}

/// A segment as the service sent it, before clamping and ordering
#[derive(Debug, Clone, PartialEq)]
pub struct RawSegmentView {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl From<RawSegment> for RawSegmentView {
    fn from(raw: RawSegment) -> Self {
        Self {
            start: raw.start.unwrap_or(0.0),
            end: raw.end.unwrap_or(0.0),
            text: raw.text.unwrap_or_default(),
        }
    }
}

impl SttPayload {
    /// Classify a response body; segments win over a bare `text` field when both carry data
    pub fn classify(body: &Value) -> Self {
        let segments = match body.get("segments") {
            Some(Value::Array(items)) => Some(SttPayload::List(
                items.iter().filter_map(parse_segment).collect(),
            )),
            Some(Value::Object(map)) => {
                let keyed: BTreeMap<&String, &Value> = map.iter().collect();
                Some(SttPayload::Keyed(
                    keyed.values().filter_map(|v| parse_segment(v)).collect(),
                ))
            }
            _ => None,
        };

        match segments {
            Some(SttPayload::List(items)) if has_text(&items) => SttPayload::List(items),
            Some(SttPayload::Keyed(items)) if has_text(&items) => SttPayload::Keyed(items),
            _ => match body.get("text").and_then(Value::as_str) {
                Some(text) if !text.trim().is_empty() => SttPayload::PlainText(text.to_string()),
                _ => SttPayload::Empty,
            },
        }
    }

    pub fn into_segments(self) -> Result<Vec<Segment>, SttError> {
        let raw = match self {
            SttPayload::List(items) | SttPayload::Keyed(items) => items,
            SttPayload::PlainText(text) => {
                return Ok(vec![Segment::new(0.0, 0.0, text.trim())]);
            }
            SttPayload::Empty => return Err(SttError::NoSegments),
        };

        let mut segments: Vec<Segment> = raw
            .into_iter()
            .filter(|s| !s.text.trim().is_empty())
            .map(|s| {
                let start = finite_or_zero(s.start).max(0.0);
                let end = finite_or_zero(s.end).max(start);
                Segment::new(start, end, s.text.trim())
            })
            .collect();

        if segments.is_empty() {
            return Err(SttError::NoSegments);
        }

        segments.sort_by(|a, b| a.start.total_cmp(&b.start));
        Ok(segments)
    }
}

fn parse_segment(value: &Value) -> Option<RawSegmentView> {
    serde_json::from_value::<RawSegment>(value.clone())
        .ok()
        .map(RawSegmentView::from)
}

fn has_text(items: &[RawSegmentView]) -> bool {
    items.iter().any(|s| !s.text.trim().is_empty())
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

/// Normalize a raw response body into ordered segments
pub fn normalize(body: &Value) -> Result<Vec<Segment>, SttError> {
    SttPayload::classify(body).into_segments()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub segments: Vec<Segment>,
    pub language: Option<String>,
    pub file_name: String,
}

impl Transcript {
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub struct SttClient<T> {
    transport: T,
    endpoint: String,
}

impl<T: HttpTransport> SttClient<T> {
    pub fn new(transport: T, endpoint: impl Into<String>) -> Self {
        Self {
            transport,
            endpoint: endpoint.into(),
        }
    }

    /// Build a client for the endpoint configured in the store
    pub fn from_store(transport: T, store: &SessionStore) -> Result<Self, SttError> {
        let endpoint = store.stt_endpoint().ok_or(SttError::NoEndpoint)?;
        Ok(Self::new(transport, endpoint))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Upload `path`, normalize the reply and record it in the history
    pub async fn transcribe(
        &self,
        store: &mut SessionStore,
        path: &Path,
        language_hint: Option<&str>,
    ) -> Result<Transcript, SttError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| SttError::ReadFile {
                path: path.to_path_buf(),
                source,
            })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio".to_string());

        let upload = AudioUpload::new(file_name.clone(), bytes, language_hint);
        let transcript = self.transcribe_upload(&upload).await?;

        let entry = HistoryEntry::new(
            transcript.text(),
            language_hint.unwrap_or("auto"),
            "",
            self.endpoint.clone(),
        )
        .with_file_name(file_name)
        .with_detected_lang(transcript.language.clone())
        .with_segments(transcript.segments.clone());

        if let Err(e) = store.append_history(entry) {
            warn!("Transcription of {} not saved to history: {}", path.display(), e);
        }

        Ok(transcript)
    }

    pub async fn transcribe_upload(&self, upload: &AudioUpload) -> Result<Transcript, SttError> {
        info!(
            "Uploading {} ({} bytes) to {}",
            upload.file_name,
            upload.bytes.len(),
            self.endpoint
        );
        let reply = self.transport.post_upload(&self.endpoint, upload).await?;

        if !reply.is_success() {
            return Err(SttError::Status {
                endpoint: self.endpoint.clone(),
                status: reply.status,
                body: reply.body.trim().chars().take(200).collect(),
            });
        }

        let body: Value = serde_json::from_str(&reply.body).map_err(|e| {
            warn!("Speech-to-text response is not JSON: {}", e);
            SttError::NoSegments
        })?;

        let segments = normalize(&body)?;
        let language = body
            .get("language")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string);

        info!(
            "Received {} segment(s) for {}{}",
            segments.len(),
            upload.file_name,
            language
                .as_deref()
                .map(|l| format!(" ({})", l))
                .unwrap_or_default()
        );

        Ok(Transcript {
            segments,
            language,
            file_name: upload.file_name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpReply;
    use crate::http::testing::{ScriptedTransport, Sent};
    use crate::store::testing::memory_store;
    use serde_json::json;

    const ENDPOINT: &str = "http://stt.test/asr";

    #[test]
    fn test_plain_text_becomes_one_segment() {
        let segments = normalize(&json!({"text": "hello world"})).unwrap();
        assert_eq!(segments, vec![Segment::new(0.0, 0.0, "hello world")]);
    }

    #[test]
    fn test_segment_array_is_kept_in_order() {
        let body = json!({"segments": [
            {"start": 0.0, "end": 1.0, "text": " one "},
            {"start": 1.0, "end": 2.5, "text": "two"}
        ]});
        let segments = normalize(&body).unwrap();
        assert_eq!(
            segments,
            vec![Segment::new(0.0, 1.0, "one"), Segment::new(1.0, 2.5, "two")]
        );
    }

    #[test]
    fn test_keyed_segments_are_sorted_by_start() {
        let body = json!({"segments": {
            "a": {"start": 4.0, "end": 5.0, "text": "late"},
            "b": {"start": 0.5, "end": 1.0, "text": "early"},
            "c": {"start": 2.0, "end": 3.0, "text": "middle"}
        }});
        let texts: Vec<_> = normalize(&body)
            .unwrap()
            .into_iter()
            .map(|s| s.text)
            .collect();
        assert_eq!(texts, vec!["early", "middle", "late"]);
    }

    #[test]
    fn test_times_are_repaired() {
        let body = json!({"segments": [{"start": -1.0, "end": -2.0, "text": "x"}]});
        assert_eq!(normalize(&body).unwrap(), vec![Segment::new(0.0, 0.0, "x")]);

        let body = json!({"segments": [{"start": 3.0, "end": 1.0, "text": "y"}]});
        assert_eq!(normalize(&body).unwrap(), vec![Segment::new(3.0, 3.0, "y")]);
    }

    #[test]
    fn test_empty_segments_fall_back_to_text() {
        let body = json!({"segments": [], "text": "fallback"});
        assert!(matches!(
            SttPayload::classify(&body),
            SttPayload::PlainText(_)
        ));
    }

    #[test]
    fn test_unusable_shapes_are_errors() {
        for body in [
            json!({}),
            json!({"segments": []}),
            json!({"segments": [{"start": 0, "end": 1, "text": "  "}]}),
            json!({"text": ""}),
            json!({"segments": "nope"}),
        ] {
            assert!(
                matches!(normalize(&body), Err(SttError::NoSegments)),
                "expected no segments for {}",
                body
            );
        }
    }

    #[tokio::test]
    async fn test_transcribe_uploads_and_records_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meeting.wav");
        std::fs::write(&path, b"RIFF....").unwrap();

        let transport = ScriptedTransport::new(vec![Ok(HttpReply::new(
            200,
            r#"{"language":"de","segments":[{"start":0,"end":1.2,"text":"Hallo"},{"start":1.2,"end":2,"text":"Welt"}]}"#,
        ))]);
        let client = SttClient::new(transport, ENDPOINT);
        let (mut store, _) = memory_store();

        let transcript = client
            .transcribe(&mut store, &path, Some("de"))
            .await
            .unwrap();
        assert_eq!(transcript.text(), "Hallo Welt");
        assert_eq!(transcript.language.as_deref(), Some("de"));

        match &client.transport.sent()[0] {
            Sent::Upload {
                url,
                file_name,
                mime,
                language,
            } => {
                assert_eq!(url, ENDPOINT);
                assert_eq!(file_name, "meeting.wav");
                assert_eq!(*mime, "audio/wav");
                assert_eq!(language, "de");
            }
            other => panic!("unexpected request {:?}", other),
        }

        let history = store.history(None);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].recognized, "Hallo Welt");
        assert_eq!(history[0].translated, "");
        assert_eq!(history[0].file_name.as_deref(), Some("meeting.wav"));
        assert_eq!(history[0].detected_lang.as_deref(), Some("de"));
        assert_eq!(history[0].endpoint, ENDPOINT);
        assert_eq!(history[0].segments.as_ref().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn test_no_segments_is_reported_and_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("silence.mp3");
        std::fs::write(&path, b"ID3").unwrap();

        let transport = ScriptedTransport::new(vec![Ok(HttpReply::new(200, r#"{"segments":[]}"#))]);
        let client = SttClient::new(transport, ENDPOINT);
        let (mut store, _) = memory_store();

        let err = client.transcribe(&mut store, &path, None).await.unwrap_err();
        assert!(matches!(err, SttError::NoSegments));
        assert!(store.history(None).is_empty());
    }

    #[tokio::test]
    async fn test_error_status_is_surfaced() {
        let transport = ScriptedTransport::new(vec![Ok(HttpReply::new(415, "unsupported media"))]);
        let client = SttClient::new(transport, ENDPOINT);
        let upload = AudioUpload::new("x.bin", vec![0], None);

        let err = client.transcribe_upload(&upload).await.unwrap_err();
        assert!(matches!(err, SttError::Status { status: 415, .. }));
    }

    #[test]
    fn test_missing_endpoint() {
        let (store, _) = memory_store();
        let result = SttClient::from_store(ScriptedTransport::default(), &store);
        assert!(matches!(result, Err(SttError::NoEndpoint)));
    }
}
