use crate::http::{HttpTransport, TransportError};
use crate::retry::{Outcome, RetryPolicy, RetryState, Sleeper};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

pub const DEFAULT_TRANSLATE_ENDPOINT: &str = "https://libretranslate.de/translate";

/// Keys a translation service may use to report the detected source language
const DETECTED_LANGUAGE_KEYS: [&str; 3] = ["detectedLanguage", "detected_language", "detected"];

const MAX_ERROR_BODY: usize = 200;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TranslateError {
    #[error("nothing to translate")]
    EmptyText,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("{endpoint} answered {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("no usable data in translation response: {reason}")]
    Malformed { reason: String },
    #[error("translation via {endpoint} failed after {attempts} attempts: {last}")]
    Exhausted {
        endpoint: String,
        attempts: u32,
        #[source]
        last: Box<TranslateError>,
    },
}

impl TranslateError {
    pub fn outcome(&self) -> Outcome {
        match self {
            TranslateError::Transport(_) => Outcome::TransportFailure,
            TranslateError::Status { status, .. } => Outcome::from_status(*status),
            TranslateError::Malformed { .. } | TranslateError::EmptyText => Outcome::Malformed,
            TranslateError::Exhausted { last, .. } => last.outcome(),
        }
    }

    /// Hint for the user when the failure looks like a blocked or unreachable endpoint
    pub fn hint(&self) -> Option<&'static str> {
        match self.outcome() {
            Outcome::TransportFailure | Outcome::AmbiguousStatus => Some(
                "Check the network, or point `voxlate config set translate-endpoint` at your own LibreTranslate instance",
            ),
            _ => None,
        }
    }
}

/// Input of one translation call; the last one is kept for manual retry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationRequest {
    pub text: String,
    pub source: String,
    pub target: String,
}

impl TranslationRequest {
    pub fn new(text: impl Into<String>, source: &str, target: &str) -> Self {
        let source = source.trim();
        Self {
            text: text.into(),
            source: if source.is_empty() { "auto" } else { source }.to_string(),
            target: target.trim().to_string(),
        }
    }

    fn body(&self) -> Value {
        json!({
            "q": self.text,
            "source": self.source,
            "target": self.target,
            "format": "text",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Translation {
    pub translated_text: String,
    pub detected_language: Option<String>,
}

pub struct TranslationClient<T, S> {
    transport: T,
    sleeper: S,
    endpoint: String,
    policy: RetryPolicy,
}

impl<T: HttpTransport, S: Sleeper> TranslationClient<T, S> {
    pub fn new(transport: T, sleeper: S, endpoint: impl Into<String>) -> Self {
        Self {
            transport,
            sleeper,
            endpoint: endpoint.into(),
            policy: RetryPolicy::default(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn translate(
        &self,
        request: &TranslationRequest,
    ) -> Result<Translation, TranslateError> {
        if request.text.trim().is_empty() {
            return Err(TranslateError::EmptyText);
        }

        let body = request.body();
        let mut state = RetryState::start();

        loop {
            match state {
                RetryState::Attempting { attempt } => {
                    let result = self.attempt(&body).await;
                    let outcome = match &result {
                        Ok(_) => Outcome::Success,
                        Err(e) => e.outcome(),
                    };
                    state = self.policy.next(attempt, outcome);

                    match (state, result) {
                        (_, Ok(translation)) => {
                            debug!(
                                "Translated {} chars {} -> {} on attempt {}",
                                request.text.len(),
                                request.source,
                                request.target,
                                attempt
                            );
                            return Ok(translation);
                        }
                        (RetryState::Exhausted { attempts }, Err(last)) => {
                            return Err(TranslateError::Exhausted {
                                endpoint: self.endpoint.clone(),
                                attempts,
                                last: Box::new(last),
                            });
                        }
                        (RetryState::Rejected { .. }, Err(e)) => return Err(e),
                        (_, Err(e)) => {
                            warn!("Translation attempt {} failed: {}", attempt, e);
                        }
                    }
                }
                RetryState::Backoff { attempt, delay } => {
                    debug!("Retrying translation after attempt {} in {:?}", attempt, delay);
                    self.sleeper.sleep(delay).await;
                    state = state.resume();
                }
                RetryState::Succeeded { .. }
                | RetryState::Exhausted { .. }
                | RetryState::Rejected { .. } => {
                    unreachable!("terminal retry states return from the attempt arm")
                }
            }
        }
    }

    async fn attempt(&self, body: &Value) -> Result<Translation, TranslateError> {
        let reply = self.transport.post_json(&self.endpoint, body).await?;

        if !reply.is_success() {
            let mut text = reply.body.trim().to_string();
            if text.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|i| text.is_char_boundary(*i))
                    .unwrap_or(0);
                text.truncate(cut);
            }
            return Err(TranslateError::Status {
                endpoint: self.endpoint.clone(),
                status: reply.status,
                body: text,
            });
        }

        parse_translation(&reply.body)
    }
}

pub fn parse_translation(body: &str) -> Result<Translation, TranslateError> {
    let value: Value = serde_json::from_str(body).map_err(|e| TranslateError::Malformed {
        reason: format!("invalid JSON ({})", e),
    })?;

    let translated_text = value
        .get("translatedText")
        .and_then(Value::as_str)
        .ok_or_else(|| TranslateError::Malformed {
            reason: "missing `translatedText`".to_string(),
        })?
        .to_string();

    let detected_language = DETECTED_LANGUAGE_KEYS
        .iter()
        .filter_map(|key| value.get(*key))
        .find_map(detected_code);

    Ok(Translation {
        translated_text,
        detected_language,
    })
}

fn detected_code(value: &Value) -> Option<String> {
    let code = match value {
        Value::String(code) => code.as_str(),
        // LibreTranslate: {"confidence": 90, "language": "en"}
        Value::Object(map) => map.get("language").and_then(Value::as_str)?,
        _ => return None,
    };
    let code = code.trim();
    (!code.is_empty()).then(|| code.to_string())
}
