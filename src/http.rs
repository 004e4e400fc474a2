//! HTTP transport for the translation and speech-to-text endpoints
//!
//! Both clients talk to the network through [`HttpTransport`] so the retry
//! policy and response normalization can be exercised against scripted
//! replies. [`ReqwestTransport`] is the production implementation.

use log::debug;
use reqwest::multipart::{Form, Part};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// A response that reached us, successful or not
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The request never produced a response (DNS, refused connection, TLS, timeout)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request to {url} failed: {reason}")]
    Unreachable { url: String, reason: String },
    #[error("could not build request for {url}: {reason}")]
    InvalidRequest { url: String, reason: String },
}

/// An audio file staged for a multipart upload
#[derive(Debug, Clone)]
pub struct AudioUpload {
    pub file_name: String,
    pub mime: &'static str,
    pub bytes: Vec<u8>,
    pub language: String,
}

impl AudioUpload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>, language: Option<&str>) -> Self {
        let file_name = file_name.into();
        Self {
            mime: mime_for(&file_name),
            file_name,
            bytes,
            language: language.unwrap_or_default().trim().to_string(),
        }
    }
}

/// Guess the upload MIME type from the file extension
pub fn mime_for(file_name: &str) -> &'static str {
    let extension = Path::new(file_name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "ogg" | "oga" | "opus" => "audio/ogg",
        "webm" => "audio/webm",
        "m4a" | "mp4" => "audio/mp4",
        "flac" => "audio/flac",
        _ => "application/octet-stream",
    }
}

pub trait HttpTransport {
    fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> impl Future<Output = Result<HttpReply, TransportError>>;

    fn post_upload(
        &self,
        url: &str,
        upload: &AudioUpload,
    ) -> impl Future<Output = Result<HttpReply, TransportError>>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                log::warn!("Failed to build HTTP client with timeout ({}), using defaults", e);
                reqwest::Client::new()
            });
        Self { client }
    }

    async fn read_reply(url: &str, response: reqwest::Response) -> Result<HttpReply, TransportError> {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Unreachable {
                url: url.to_string(),
                reason: format!("failed to read response body: {}", e),
            })?;
        debug!("{} answered {} ({} bytes)", url, status, body.len());
        Ok(HttpReply { status, body })
    }
}

impl HttpTransport for ReqwestTransport {
    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<HttpReply, TransportError> {
        debug!("POST {} (json)", url);
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::Unreachable {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        Self::read_reply(url, response).await
    }

    async fn post_upload(
        &self,
        url: &str,
        upload: &AudioUpload,
    ) -> Result<HttpReply, TransportError> {
        debug!(
            "POST {} (multipart, {} bytes of {})",
            url,
            upload.bytes.len(),
            upload.mime
        );
        let file_part = Part::bytes(upload.bytes.clone())
            .file_name(upload.file_name.clone())
            .mime_str(upload.mime)
            .map_err(|e| TransportError::InvalidRequest {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let form = Form::new()
            .part("file", file_part)
            .text("language", upload.language.clone());

        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| TransportError::Unreachable {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        Self::read_reply(url, response).await
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_guess() {
        assert_eq!(mime_for("talk.WAV"), "audio/wav");
        assert_eq!(mime_for("memo.m4a"), "audio/mp4");
        assert_eq!(mime_for("voice.opus"), "audio/ogg");
        assert_eq!(mime_for("noext"), "application/octet-stream");
    }

    #[test]
    fn test_upload_language_is_trimmed_or_empty() {
        let upload = AudioUpload::new("a.mp3", vec![1, 2, 3], None);
        assert_eq!(upload.language, "");
        assert_eq!(upload.mime, "audio/mpeg");

        let upload = AudioUpload::new("a.mp3", vec![], Some(" de "));
        assert_eq!(upload.language, "de");
    }

    #[test]
    fn test_reply_success_range() {
        assert!(HttpReply::new(200, "").is_success());
        assert!(!HttpReply::new(0, "").is_success());
        assert!(!HttpReply::new(503, "").is_success());
    }
}
