//! Session orchestration
//!
//! A [`Session`] owns the translation client, the last submitted request and
//! the status indicator. One-shot commands call [`Session::submit_for_translation`]
//! directly; `listen` drives [`Session::run_live`], which consumes recognizer
//! messages from a single queue and stops the recognizer after a quiet period.

use crate::debounce::Debounce;
use crate::history::{HistoryEntry, LogLevel};
use crate::http::HttpTransport;
use crate::retry::Sleeper;
use crate::speech::{LiveMessage, RecognitionEvent, Recognizer, SpeechError};
use crate::store::SessionStore;
use crate::translate::{TranslateError, Translation, TranslationClient, TranslationRequest};
use log::{debug, info, warn};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("nothing to retry yet")]
    NoPreviousRequest,
    #[error(transparent)]
    Translate(#[from] TranslateError),
    #[error(transparent)]
    Speech(#[from] SpeechError),
}

impl SessionError {
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            SessionError::Translate(e) => e.hint(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Idle,
    Translating,
    Succeeded,
    Failed(String),
}

/// Mean of the reported confidences, rounded to two decimals
pub fn aggregate_confidence(confidences: &[f32]) -> Option<f64> {
    if confidences.is_empty() {
        return None;
    }
    let sum: f64 = confidences.iter().map(|c| f64::from(*c)).sum();
    let mean = sum / confidences.len() as f64;
    Some((mean * 100.0).round() / 100.0)
}

pub fn format_confidence(confidence: Option<f64>) -> String {
    match confidence {
        Some(c) => format!("{:.2}", c),
        None => "unavailable".to_string(),
    }
}

/// What the live loop tells the caller about
#[derive(Debug)]
pub enum LiveReport {
    Listening,
    Interim(String),
    Translated(HistoryEntry),
    Failed(SessionError),
    Stopped,
}

#[derive(Debug, Clone)]
pub struct LiveOptions {
    pub source: String,
    pub target: String,
    pub locale: String,
    /// `None` keeps listening until the recognizer ends
    pub auto_stop: Option<Duration>,
}

pub struct Session<T, S> {
    client: TranslationClient<T, S>,
    last_request: Option<TranslationRequest>,
    status: Status,
}

impl<T: HttpTransport, S: Sleeper> Session<T, S> {
    pub fn new(client: TranslationClient<T, S>) -> Self {
        Self {
            client,
            last_request: None,
            status: Status::Idle,
        }
    }

    #[cfg(test)]
    pub fn status(&self) -> &Status {
        &self.status
    }

    #[cfg(test)]
    pub fn last_request(&self) -> Option<&TranslationRequest> {
        self.last_request.as_ref()
    }

    pub fn client(&self) -> &TranslationClient<T, S> {
        &self.client
    }

    pub async fn submit_for_translation(
        &mut self,
        text: &str,
        source: &str,
        target: &str,
    ) -> Result<Translation, SessionError> {
        self.submit(TranslationRequest::new(text, source, target)).await
    }

    /// Resubmit the exact parameters of the last request
    pub async fn retry_last(&mut self) -> Result<Translation, SessionError> {
        let request = self
            .last_request
            .clone()
            .ok_or(SessionError::NoPreviousRequest)?;
        self.submit(request).await
    }

    async fn submit(&mut self, request: TranslationRequest) -> Result<Translation, SessionError> {
        self.last_request = Some(request.clone());
        self.status = Status::Translating;

        match self.client.translate(&request).await {
            Ok(translation) => {
                self.status = Status::Succeeded;
                Ok(translation)
            }
            Err(e) => {
                self.status = Status::Failed(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Translate and keep the outcome: history on success, a log entry on failure
    pub async fn translate_and_record(
        &mut self,
        store: &mut SessionStore,
        text: &str,
        source: &str,
        target: &str,
        confidence: Option<f64>,
    ) -> Result<HistoryEntry, SessionError> {
        let result = self.submit_for_translation(text, source, target).await;
        self.record(store, result, confidence)
    }

    pub async fn retry_and_record(
        &mut self,
        store: &mut SessionStore,
    ) -> Result<HistoryEntry, SessionError> {
        let result = self.retry_last().await;
        self.record(store, result, None)
    }

    fn record(
        &self,
        store: &mut SessionStore,
        result: Result<Translation, SessionError>,
        confidence: Option<f64>,
    ) -> Result<HistoryEntry, SessionError> {
        // Only a retry with nothing submitted leaves no request behind
        let Some(request) = &self.last_request else {
            return Err(result.err().unwrap_or(SessionError::NoPreviousRequest));
        };

        match result {
            Ok(translation) => {
                let entry = HistoryEntry::new(
                    request.text.as_str(),
                    request.source.as_str(),
                    request.target.as_str(),
                    self.client.endpoint(),
                )
                .with_translation(translation.translated_text)
                .with_detected_lang(translation.detected_language)
                .with_confidence(confidence);

                if let Err(e) = store.append_history(entry.clone()) {
                    store.record(
                        LogLevel::Warn,
                        format!("Translation not saved to history: {}", e),
                        None,
                    );
                }
                Ok(entry)
            }
            Err(e) => {
                store.record(
                    LogLevel::Error,
                    format!("Translation failed: {}", e),
                    Some(json!({
                        "endpoint": self.client.endpoint(),
                        "source": request.source,
                        "target": request.target,
                    })),
                );
                Err(e)
            }
        }
    }

    /// Drive one live recognition session until the recognizer ends or auto-stop fires
    pub async fn run_live<R, F>(
        &mut self,
        store: &mut SessionStore,
        recognizer: &mut R,
        options: &LiveOptions,
        mut report: F,
    ) -> Result<(), SessionError>
    where
        R: Recognizer,
        F: FnMut(LiveReport),
    {
        if !recognizer.is_available() {
            return Err(SpeechError::Unsupported("speech recognition").into());
        }

        let (queue, mut messages) = mpsc::unbounded_channel();
        recognizer.start(&options.locale, queue)?;
        info!(
            "Listening ({}), translating {} -> {}",
            options.locale, options.source, options.target
        );

        // Armed by the first speech result, not by start
        let mut debounce = Debounce::new(options.auto_stop.unwrap_or_default());

        loop {
            tokio::select! {
                // Queued speech always wins over an expired countdown
                biased;

                message = messages.recv() => {
                    let Some(message) = message else {
                        debug!("Recognizer queue closed");
                        break;
                    };
                    match message {
                        LiveMessage::Recognition(RecognitionEvent::Started) => {
                            report(LiveReport::Listening);
                        }
                        LiveMessage::Recognition(RecognitionEvent::Result(result)) => {
                            if options.auto_stop.is_some() {
                                if !debounce.is_armed() {
                                    debug!("Auto-stop armed ({:?})", debounce.window());
                                }
                                debounce.reset();
                            }
                            let Some(text) = result.transcript() else {
                                continue;
                            };
                            if !result.is_final {
                                report(LiveReport::Interim(text.to_string()));
                                continue;
                            }
                            let confidence = aggregate_confidence(&result.confidences());
                            let outcome = self
                                .translate_and_record(store, text, &options.source, &options.target, confidence)
                                .await;
                            // The quiet period restarts once the translation settles
                            if options.auto_stop.is_some() {
                                debounce.reset();
                            }
                            report(match outcome {
                                Ok(entry) => LiveReport::Translated(entry),
                                Err(e) => LiveReport::Failed(e),
                            });
                        }
                        LiveMessage::Recognition(RecognitionEvent::Error(message)) => {
                            store.record(
                                LogLevel::Warn,
                                format!("Recognition error: {}", message),
                                Some(json!({ "locale": options.locale })),
                            );
                        }
                        LiveMessage::Recognition(RecognitionEvent::Ended) => {
                            debug!("Recognizer ended");
                            break;
                        }
                        LiveMessage::RetryLast => {
                            let outcome = self.retry_and_record(store).await;
                            if debounce.is_armed() {
                                debounce.reset();
                            }
                            report(match outcome {
                                Ok(entry) => LiveReport::Translated(entry),
                                Err(e) => LiveReport::Failed(e),
                            });
                        }
                    }
                }
                _ = debounce.elapsed() => {
                    debug!("No speech for {:?}, stopping recognizer", debounce.window());
                    recognizer.stop();
                    break;
                }
            }
        }

        if let Status::Failed(reason) = &self.status {
            warn!("Live session ended after a failed translation: {}", reason);
        }
        report(LiveReport::Stopped);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpReply;
    use crate::http::testing::ScriptedTransport;
    use crate::retry::testing::RecordingSleeper;
    use crate::speech::SpeechResult;
    use crate::store::testing::memory_store;
    use crate::http::TransportError;
    use tokio::sync::mpsc::UnboundedSender;
    use tokio::time::Instant;

    const ENDPOINT: &str = "https://translate.test/translate";

    fn session(
        replies: Vec<Result<HttpReply, TransportError>>,
    ) -> Session<ScriptedTransport, RecordingSleeper> {
        Session::new(TranslationClient::new(
            ScriptedTransport::new(replies),
            RecordingSleeper::default(),
            ENDPOINT,
        ))
    }

    fn ok(body: &str) -> Result<HttpReply, TransportError> {
        Ok(HttpReply::new(200, body))
    }

    #[derive(Default)]
    struct FakeRecognizer {
        script: Vec<LiveMessage>,
        /// Sent after the given delay from start
        later: Vec<(Duration, LiveMessage)>,
        queue: Option<UnboundedSender<LiveMessage>>,
        stopped: bool,
    }

    impl Recognizer for FakeRecognizer {
        fn is_available(&self) -> bool {
            true
        }

        fn start(
            &mut self,
            _locale: &str,
            queue: UnboundedSender<LiveMessage>,
        ) -> Result<(), SpeechError> {
            for message in self.script.drain(..) {
                let _ = queue.send(message);
            }
            for (delay, message) in self.later.drain(..) {
                let queue = queue.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = queue.send(message);
                });
            }
            // Keep the queue open so only auto-stop or Ended finishes the session
            self.queue = Some(queue);
            Ok(())
        }

        fn stop(&mut self) {
            self.stopped = true;
            self.queue = None;
        }
    }

    /// Answers every request after a fixed delay on the tokio clock
    struct SlowTransport {
        delay: Duration,
    }

    impl HttpTransport for SlowTransport {
        async fn post_json(
            &self,
            _url: &str,
            body: &serde_json::Value,
        ) -> Result<HttpReply, TransportError> {
            tokio::time::sleep(self.delay).await;
            let text = body["q"].as_str().unwrap_or_default().to_uppercase();
            Ok(HttpReply::new(200, json!({ "translatedText": text }).to_string()))
        }

        async fn post_upload(
            &self,
            url: &str,
            _upload: &crate::http::AudioUpload,
        ) -> Result<HttpReply, TransportError> {
            Err(TransportError::InvalidRequest {
                url: url.to_string(),
                reason: "uploads are not scripted".to_string(),
            })
        }
    }

    fn said(text: &str, confidence: Option<f32>, is_final: bool) -> LiveMessage {
        let mut result = SpeechResult::final_text(text);
        result.alternatives[0].confidence = confidence;
        result.is_final = is_final;
        LiveMessage::Recognition(RecognitionEvent::Result(result))
    }

    fn options(auto_stop: Option<Duration>) -> LiveOptions {
        LiveOptions {
            source: "en".to_string(),
            target: "ru".to_string(),
            locale: "en-EN".to_string(),
            auto_stop,
        }
    }

    #[tokio::test]
    async fn test_retry_last_without_submission() {
        let mut session = session(vec![ok(r#"{"translatedText":"x"}"#)]);

        let err = session.retry_last().await.unwrap_err();
        assert!(matches!(err, SessionError::NoPreviousRequest));
        assert_eq!(session.client().transport().calls(), 0);
        assert_eq!(session.status(), &Status::Idle);
    }

    #[tokio::test]
    async fn test_failed_submission_is_kept_for_retry() {
        let mut session = session(vec![
            Ok(HttpReply::new(400, "bad target")),
            ok(r#"{"translatedText":"привет"}"#),
        ]);

        let err = session
            .submit_for_translation("hi", "en", "xx")
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Translate(_)));
        assert!(matches!(session.status(), Status::Failed(_)));
        assert_eq!(
            session.last_request(),
            Some(&TranslationRequest::new("hi", "en", "xx"))
        );

        let translation = session.retry_last().await.unwrap();
        assert_eq!(translation.translated_text, "привет");
        assert_eq!(session.status(), &Status::Succeeded);
        assert_eq!(session.client().transport().calls(), 2);
    }

    #[test]
    fn test_confidence_aggregation() {
        assert_eq!(aggregate_confidence(&[]), None);
        assert_eq!(aggregate_confidence(&[0.5, 0.25]), Some(0.38));
        assert_eq!(aggregate_confidence(&[0.9, 0.8]), Some(0.85));
        assert_eq!(format_confidence(None), "unavailable");
        assert_eq!(format_confidence(Some(0.5)), "0.50");
    }

    #[tokio::test]
    async fn test_record_success_and_failure() {
        let (mut store, _backend) = memory_store();
        let mut session = session(vec![
            ok(r#"{"translatedText":"hola","detectedLanguage":{"language":"en"}}"#),
            Ok(HttpReply::new(404, "no such language")),
        ]);

        let entry = session
            .translate_and_record(&mut store, "hello", "auto", "es", Some(0.9))
            .await
            .unwrap();
        assert_eq!(entry.translated, "hola");
        assert_eq!(entry.detected_lang.as_deref(), Some("en"));
        assert_eq!(entry.endpoint, ENDPOINT);

        session
            .translate_and_record(&mut store, "hello", "en", "zz", None)
            .await
            .unwrap_err();

        assert_eq!(store.history(None), vec![entry]);
        let logs = store.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].level, LogLevel::Error);
        assert_eq!(
            logs[0].meta,
            Some(json!({"endpoint": ENDPOINT, "source": "en", "target": "zz"}))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_session_auto_stops_after_quiet_period() {
        let (mut store, _backend) = memory_store();
        let mut session = session(vec![ok(r#"{"translatedText":"привет"}"#)]);
        let mut recognizer = FakeRecognizer {
            script: vec![
                LiveMessage::Recognition(RecognitionEvent::Started),
                said("hel", None, false),
                said("hello", Some(0.5), true),
            ],
            ..Default::default()
        };

        let start = Instant::now();
        let mut reports = Vec::new();
        session
            .run_live(
                &mut store,
                &mut recognizer,
                &options(Some(Duration::from_millis(1500))),
                |report| reports.push(report),
            )
            .await
            .unwrap();

        assert!(recognizer.stopped);
        assert_eq!(start.elapsed(), Duration::from_millis(1500));
        assert!(matches!(reports[0], LiveReport::Listening));
        assert!(matches!(&reports[1], LiveReport::Interim(text) if text == "hel"));
        assert!(matches!(&reports[2], LiveReport::Translated(entry) if entry.translated == "привет"));
        assert!(matches!(reports[3], LiveReport::Stopped));

        let history = store.history(None);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].confidence, Some(0.5));
    }

    #[tokio::test]
    async fn test_live_retry_command_resubmits() {
        let (mut store, _backend) = memory_store();
        let mut session = session(vec![
            Ok(HttpReply::new(422, "unsupported")),
            ok(r#"{"translatedText":"ok"}"#),
        ]);
        let mut recognizer = FakeRecognizer {
            script: vec![
                said("hello", None, true),
                LiveMessage::RetryLast,
                LiveMessage::Recognition(RecognitionEvent::Ended),
            ],
            ..Default::default()
        };

        let mut reports = Vec::new();
        session
            .run_live(&mut store, &mut recognizer, &options(None), |report| {
                reports.push(report)
            })
            .await
            .unwrap();

        assert!(!recognizer.stopped);
        assert!(matches!(reports[0], LiveReport::Failed(SessionError::Translate(_))));
        assert!(matches!(&reports[1], LiveReport::Translated(entry) if entry.translated == "ok"));
        assert_eq!(store.history(None).len(), 1);
        assert_eq!(store.logs().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_speech_during_slow_translation_is_not_dropped() {
        let (mut store, _backend) = memory_store();
        let mut session = Session::new(TranslationClient::new(
            SlowTransport {
                delay: Duration::from_secs(2),
            },
            RecordingSleeper::default(),
            ENDPOINT,
        ));
        let mut recognizer = FakeRecognizer {
            script: vec![said("first", None, true)],
            later: vec![(Duration::from_secs(1), said("second", None, true))],
            ..Default::default()
        };

        let start = Instant::now();
        session
            .run_live(
                &mut store,
                &mut recognizer,
                &options(Some(Duration::from_millis(1500))),
                |_| {},
            )
            .await
            .unwrap();

        assert!(recognizer.stopped);
        let translated: Vec<_> = store
            .history(None)
            .into_iter()
            .map(|e| e.translated)
            .collect();
        assert_eq!(translated, vec!["SECOND", "FIRST"]);
        // Two 2s translations back to back, then the full quiet period
        assert_eq!(start.elapsed(), Duration::from_millis(5500));
    }
}
