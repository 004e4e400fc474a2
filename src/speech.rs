//! Live speech capabilities
//!
//! Recognition and synthesis are external collaborators. Recognition feeds
//! discrete [`LiveMessage`]s into the session queue; synthesis speaks one
//! [`Utterance`] at a time. The CLI implementations read transcripts from
//! stdin and speak through `espeak-ng`.

use crate::langs;
use crate::store::SpeechParams;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Error, Debug)]
pub enum SpeechError {
    #[error("{0} is not available in this environment")]
    Unsupported(&'static str),
    #[error("{program} failed: {reason}")]
    Failed { program: String, reason: String },
    #[error("speech I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    pub transcript: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

/// One recognition result carrying one or more alternatives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechResult {
    pub alternatives: Vec<Alternative>,
    #[serde(default = "default_is_final")]
    pub is_final: bool,
}

fn default_is_final() -> bool {
    true
}

impl SpeechResult {
    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            alternatives: vec![Alternative {
                transcript: text.into(),
                confidence: None,
            }],
            is_final: true,
        }
    }

    /// Transcript of the best (first) alternative
    pub fn transcript(&self) -> Option<&str> {
        self.alternatives
            .first()
            .map(|a| a.transcript.trim())
            .filter(|t| !t.is_empty())
    }

    pub fn confidences(&self) -> Vec<f32> {
        self.alternatives.iter().filter_map(|a| a.confidence).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    Started,
    Result(SpeechResult),
    Ended,
    Error(String),
}

/// Everything the live session reacts to
#[derive(Debug, Clone, PartialEq)]
pub enum LiveMessage {
    Recognition(RecognitionEvent),
    RetryLast,
}

pub const RETRY_COMMAND: &str = ":retry";

/// Interpret one stdin line: JSON speech result, retry command, or plain final text
pub fn parse_line(line: &str) -> Option<LiveMessage> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if line == RETRY_COMMAND {
        return Some(LiveMessage::RetryLast);
    }
    if line.starts_with('{') {
        match serde_json::from_str::<SpeechResult>(line) {
            Ok(result) => return Some(LiveMessage::Recognition(RecognitionEvent::Result(result))),
            Err(e) => debug!("Line is not a speech result ({}), treating as text", e),
        }
    }
    Some(LiveMessage::Recognition(RecognitionEvent::Result(
        SpeechResult::final_text(line),
    )))
}

pub trait Recognizer {
    fn is_available(&self) -> bool;
    fn start(&mut self, locale: &str, queue: UnboundedSender<LiveMessage>) -> Result<(), SpeechError>;
    fn stop(&mut self);
}

/// Reads transcripts line by line from stdin on a dedicated thread
#[derive(Default)]
pub struct StdinRecognizer {
    stop_signal: Option<Arc<AtomicBool>>,
}

impl Recognizer for StdinRecognizer {
    fn is_available(&self) -> bool {
        true
    }

    fn start(&mut self, locale: &str, queue: UnboundedSender<LiveMessage>) -> Result<(), SpeechError> {
        self.stop();
        let stop_signal = Arc::new(AtomicBool::new(false));
        self.stop_signal = Some(Arc::clone(&stop_signal));

        debug!("Reading {} transcripts from stdin", locale);
        let _ = queue.send(LiveMessage::Recognition(RecognitionEvent::Started));

        // A blocked stdin read cannot be cancelled, so keep it off the runtime
        std::thread::Builder::new()
            .name("stdin-recognizer".to_string())
            .spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    if stop_signal.load(Ordering::Acquire) {
                        return;
                    }
                    match line {
                        Ok(line) => {
                            if let Some(message) = parse_line(&line) {
                                if queue.send(message).is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            let _ = queue.send(LiveMessage::Recognition(RecognitionEvent::Error(
                                e.to_string(),
                            )));
                            break;
                        }
                    }
                }
                if !stop_signal.load(Ordering::Acquire) {
                    let _ = queue.send(LiveMessage::Recognition(RecognitionEvent::Ended));
                }
            })?;
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(signal) = self.stop_signal.take() {
            signal.store(true, Ordering::Release);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voice {
    pub name: String,
    pub lang: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub lang: String,
    pub voice: Option<String>,
    pub params: SpeechParams,
}

pub trait Synthesizer {
    fn is_available(&self) -> bool;
    fn voices(&self) -> Result<Vec<Voice>, SpeechError>;
    fn speak(&self, utterance: &Utterance) -> Result<(), SpeechError>;
}

/// `espeak-ng` (or classic `espeak`) found on PATH
pub struct EspeakSynthesizer {
    program: Option<&'static str>,
}

impl EspeakSynthesizer {
    pub fn detect() -> Self {
        let program = ["espeak-ng", "espeak"].into_iter().find(|tool| {
            Command::new("which")
                .arg(tool)
                .output()
                .map(|o| o.status.success())
                .unwrap_or(false)
        });
        if program.is_none() {
            debug!("No espeak binary on PATH, synthesis disabled");
        }
        Self { program }
    }

    fn program(&self) -> Result<&'static str, SpeechError> {
        self.program.ok_or(SpeechError::Unsupported("speech synthesis"))
    }

    /// espeak arguments: words per minute, pitch 0-99, amplitude 0-200
    fn args(utterance: &Utterance) -> Vec<String> {
        let params = utterance.params.clamped();
        let voice = utterance
            .voice
            .clone()
            .unwrap_or_else(|| langs::primary_subtag(&utterance.lang));
        vec![
            "-v".to_string(),
            voice,
            "-s".to_string(),
            ((175.0 * params.rate).round() as u32).to_string(),
            "-p".to_string(),
            ((50.0 * params.pitch).round().min(99.0) as u32).to_string(),
            "-a".to_string(),
            ((100.0 * params.volume).round() as u32).to_string(),
        ]
    }
}

impl Synthesizer for EspeakSynthesizer {
    fn is_available(&self) -> bool {
        self.program.is_some()
    }

    fn voices(&self) -> Result<Vec<Voice>, SpeechError> {
        let program = self.program()?;
        let output = Command::new(program).arg("--voices").output()?;
        if !output.status.success() {
            return Err(SpeechError::Failed {
                program: program.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(parse_espeak_voices(&String::from_utf8_lossy(&output.stdout)))
    }

    fn speak(&self, utterance: &Utterance) -> Result<(), SpeechError> {
        let program = self.program()?;
        let output = Command::new(program)
            .args(Self::args(utterance))
            .arg("--")
            .arg(&utterance.text)
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SpeechError::Failed {
                program: program.to_string(),
                reason: stderr.trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Parse `espeak --voices`: `Pty Language Age/Gender VoiceName File Other Languages`
pub fn parse_espeak_voices(listing: &str) -> Vec<Voice> {
    listing
        .lines()
        .skip(1)
        .filter_map(|line| {
            let columns: Vec<&str> = line.split_whitespace().collect();
            match columns.as_slice() {
                [_, lang, _, name, ..] => Some(Voice {
                    name: name.to_string(),
                    lang: lang.to_string(),
                }),
                _ => None,
            }
        })
        .collect()
}

/// Saved voice by name first; otherwise, with auto-selection on, the first voice for the target language
pub fn select_voice(
    voices: &[Voice],
    saved: Option<&str>,
    auto_select: bool,
    target_lang: &str,
) -> Option<Voice> {
    if let Some(saved) = saved {
        if let Some(voice) = voices.iter().find(|v| v.name == saved) {
            return Some(voice.clone());
        }
        warn!("Saved voice '{}' is not installed", saved);
    }
    if !auto_select {
        return None;
    }
    let wanted = langs::primary_subtag(target_lang);
    voices
        .iter()
        .find(|v| langs::primary_subtag(&v.lang) == wanted)
        .cloned()
}

/// Which live capabilities work here; probed once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub recognition: bool,
    pub synthesis: bool,
}

impl Capabilities {
    pub fn detect(recognizer: &impl Recognizer, synthesizer: &impl Synthesizer) -> Self {
        Self {
            recognition: recognizer.is_available(),
            synthesis: synthesizer.is_available(),
        }
    }

    pub fn require_recognition(&self) -> Result<(), SpeechError> {
        if self.recognition {
            Ok(())
        } else {
            Err(SpeechError::Unsupported("speech recognition"))
        }
    }

    pub fn require_synthesis(&self) -> Result<(), SpeechError> {
        if self.synthesis {
            Ok(())
        } else {
            Err(SpeechError::Unsupported("speech synthesis"))
        }
    }
}
