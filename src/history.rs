use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// One time-coded chunk of recognized speech
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl Segment {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }
}

/// A recorded translation (or transcription) transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: String,
    pub source_lang: String,
    pub target_lang: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_lang: Option<String>,
    pub recognized: String,
    #[serde(default)]
    pub translated: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segments: Option<Vec<Segment>>,
}

impl HistoryEntry {
    pub fn new(
        recognized: impl Into<String>,
        source_lang: impl Into<String>,
        target_lang: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Timestamp::now().to_string(),
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
            detected_lang: None,
            recognized: recognized.into(),
            translated: String::new(),
            confidence: None,
            endpoint: endpoint.into(),
            file_name: None,
            segments: None,
        }
    }

    pub fn with_translation(mut self, translated: impl Into<String>) -> Self {
        self.translated = translated.into();
        self
    }

    pub fn with_detected_lang(mut self, detected: Option<String>) -> Self {
        self.detected_lang = detected;
        self
    }

    pub fn with_confidence(mut self, confidence: Option<f64>) -> Self {
        self.confidence = confidence.map(|c| c.clamp(0.0, 1.0));
        self
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn with_segments(mut self, segments: Vec<Segment>) -> Self {
        self.segments = Some(segments);
        self
    }

    /// Case-insensitive substring match over recognized, translated and detected language
    pub fn matches(&self, query: &str) -> bool {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        [
            Some(self.recognized.as_str()),
            Some(self.translated.as_str()),
            self.detected_lang.as_deref(),
        ]
        .into_iter()
        .flatten()
        .any(|field| field.to_lowercase().contains(&needle))
    }

    pub fn language_pair(&self) -> String {
        let target = if self.target_lang.is_empty() {
            "-"
        } else {
            self.target_lang.as_str()
        };
        match &self.detected_lang {
            Some(detected) if self.source_lang == "auto" => {
                format!("auto ({}) -> {}", detected, target)
            }
            _ => format!("{} -> {}", self.source_lang, target),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }
}

/// Diagnostic record kept alongside the history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Timestamp::now().to_string(),
            level,
            message: message.into(),
            meta: None,
        }
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// Plain-text export: one block per entry
pub fn to_text(entries: &[HistoryEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        let _ = writeln!(out, "[{}] {}", entry.timestamp, entry.language_pair());
        if let Some(file_name) = &entry.file_name {
            let _ = writeln!(out, "File: {}", file_name);
        }
        let _ = writeln!(out, "Recognized: {}", entry.recognized);
        let _ = writeln!(out, "Translated: {}", entry.translated);
        out.push('\n');
    }
    out
}

pub fn logs_to_text(entries: &[LogEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        let _ = write!(
            out,
            "{} {:<5} {}",
            entry.timestamp,
            entry.level.as_str().to_uppercase(),
            entry.message
        );
        if let Some(meta) = &entry.meta {
            let _ = write!(out, " {}", meta);
        }
        out.push('\n');
    }
    out
}
