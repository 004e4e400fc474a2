mod conf;
mod debounce;
mod export;
mod history;
mod http;
mod langs;
mod retry;
mod session;
mod speech;
mod store;
mod stt;
mod subtitle;
mod translate;

use crate::conf::Settings;
use crate::export::ExportFormat;
use crate::history::{HistoryEntry, LogLevel};
use crate::http::ReqwestTransport;
use crate::retry::TokioSleeper;
use crate::session::{LiveOptions, LiveReport, Session, SessionError};
use crate::speech::{Capabilities, EspeakSynthesizer, StdinRecognizer, Synthesizer, Utterance};
use crate::store::{FileBackend, SessionStore, SpeechParams};
use crate::stt::SttClient;
use crate::translate::{TranslateError, TranslationClient};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "voxlate")]
#[command(about = "Voice translator: live transcripts, audio uploads, subtitles and speech")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate text once (reads stdin when no text is given)
    Translate {
        text: Vec<String>,

        /// Source language code, or "auto"
        #[arg(long)]
        from: Option<String>,

        /// Target language code
        #[arg(long)]
        to: Option<String>,

        /// Speak the translation
        #[arg(long)]
        speak: bool,
    },

    /// Translate transcripts as they arrive on stdin, one per line
    Listen {
        /// Source language code, or "auto"
        #[arg(long)]
        from: Option<String>,

        /// Target language code
        #[arg(long)]
        to: Option<String>,

        /// Stop after this many milliseconds without speech (0 = never)
        #[arg(long)]
        auto_stop_ms: Option<u64>,

        /// Speak each translation
        #[arg(long)]
        speak: bool,
    },

    /// Upload an audio file to the speech-to-text endpoint
    Transcribe {
        file: PathBuf,

        /// Language hint for the recognizer
        #[arg(long)]
        language: Option<String>,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: ExportFormat,

        /// Write the result to this file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Speak text with the local synthesizer
    Speak {
        text: Vec<String>,

        /// Language of the text
        #[arg(long)]
        lang: Option<String>,

        /// Voice name (see `voxlate voices`)
        #[arg(long)]
        voice: Option<String>,
    },

    /// List synthesizer voices
    Voices,

    /// List supported language codes
    Langs,

    /// Show, export or prune the translation history
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Show, export or clear the diagnostic log
    Logs {
        #[command(subcommand)]
        action: LogsAction,
    },

    /// Show or change persisted settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    /// Newest first
    List {
        /// Only entries whose text or detected language contains this
        #[arg(long)]
        filter: Option<String>,
    },
    /// Remove one entry by its index in `history list`
    Remove { index: usize },
    /// Remove all entries
    Clear,
    /// Write the history to a file
    Export {
        #[arg(long, value_enum, default_value = "json")]
        format: ExportFormat,

        /// Entry whose segments become subtitles (srt only)
        #[arg(long)]
        index: Option<usize>,

        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum LogsAction {
    List,
    Clear,
    Export {
        #[arg(long, value_enum, default_value = "json")]
        format: ExportFormat,

        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Show,
    /// Write config.toml with the settings currently in effect
    Init,
    Set { key: ConfigKey, value: String },
    /// Restore the default for a key
    Unset { key: ConfigKey },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ConfigKey {
    TranslateEndpoint,
    SttEndpoint,
    Voice,
    TtsRate,
    TtsPitch,
    TtsVolume,
    AutoVoice,
}

fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Words from the command line, or all of stdin
fn read_text(words: Vec<String>) -> Result<String> {
    let text = if words.is_empty() {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read text from stdin")?;
        buf
    } else {
        words.join(" ")
    };
    let text = text.trim().to_string();
    if text.is_empty() {
        anyhow::bail!("No text given");
    }
    Ok(text)
}

fn new_session(
    settings: &Settings,
    store: &SessionStore,
) -> Session<ReqwestTransport, TokioSleeper> {
    Session::new(TranslationClient::new(
        ReqwestTransport::new(settings.request_timeout()),
        TokioSleeper,
        store.translate_endpoint(),
    ))
}

fn print_entry(entry: &HistoryEntry) {
    println!("{}", entry.translated);
    eprintln!(
        "[{}] confidence: {}",
        entry.language_pair(),
        session::format_confidence(entry.confidence)
    );
}

/// Explicit voice first, then the saved or auto-selected one
fn choose_voice(
    synthesizer: &impl Synthesizer,
    store: &SessionStore,
    explicit: Option<String>,
    lang: &str,
) -> Option<String> {
    if explicit.is_some() {
        return explicit;
    }
    let voices = synthesizer.voices().unwrap_or_else(|e| {
        warn!("Could not list voices: {}", e);
        Vec::new()
    });
    speech::select_voice(&voices, store.voice().as_deref(), store.auto_voice(), lang)
        .map(|v| v.name)
}

fn utterance(text: String, lang: &str, voice: Option<String>, params: SpeechParams) -> Utterance {
    Utterance {
        text,
        lang: langs::locale_tag(lang),
        voice,
        params,
    }
}

fn parse_number(value: &str) -> Result<f32> {
    value
        .trim()
        .parse::<f32>()
        .map_err(|_| anyhow!("Expected a number, got '{}'", value))
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        other => Err(anyhow!("Expected true or false, got '{}'", other)),
    }
}

fn update_config(store: &mut SessionStore, key: ConfigKey, value: Option<&str>) -> Result<()> {
    let defaults = SpeechParams::default();
    let mut params = store.speech_params();
    let text = value.map(str::to_string);

    match key {
        ConfigKey::TranslateEndpoint => store.set_translate_endpoint(text)?,
        ConfigKey::SttEndpoint => store.set_stt_endpoint(text)?,
        ConfigKey::Voice => store.set_voice(text)?,
        ConfigKey::TtsRate => {
            params.rate = value.map(parse_number).transpose()?.unwrap_or(defaults.rate);
            store.set_speech_params(params)?;
        }
        ConfigKey::TtsPitch => {
            params.pitch = value.map(parse_number).transpose()?.unwrap_or(defaults.pitch);
            store.set_speech_params(params)?;
        }
        ConfigKey::TtsVolume => {
            params.volume = value.map(parse_number).transpose()?.unwrap_or(defaults.volume);
            store.set_speech_params(params)?;
        }
        ConfigKey::AutoVoice => {
            store.set_auto_voice(value.map(parse_flag).transpose()?.unwrap_or(true))?;
        }
    }
    Ok(())
}

fn hint(e: &anyhow::Error) -> Option<&'static str> {
    e.chain().find_map(|cause| {
        cause
            .downcast_ref::<SessionError>()
            .and_then(SessionError::hint)
            .or_else(|| {
                cause
                    .downcast_ref::<TranslateError>()
                    .and_then(TranslateError::hint)
            })
    })
}

async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load();
    let backend = FileBackend::default_location(settings.data_dir.as_deref())?;
    let state_path = backend.path().to_path_buf();
    debug!("State file: {}", state_path.display());
    let mut store = SessionStore::open(Box::new(backend))
        .with_context(|| format!("Failed to open state at {}", state_path.display()))?;

    let mut recognizer = StdinRecognizer::default();
    let synthesizer = EspeakSynthesizer::detect();
    let capabilities = Capabilities::detect(&recognizer, &synthesizer);

    match cli.command {
        Commands::Translate {
            text,
            from,
            to,
            speak,
        } => {
            let text = read_text(text)?;
            let source = from.unwrap_or_else(|| settings.default_source.clone());
            let target = to.unwrap_or_else(|| settings.default_target.clone());
            if speak {
                capabilities.require_synthesis()?;
            }

            let mut session = new_session(&settings, &store);
            let pb = spinner(format!("Translating via {}", session.client().endpoint()));
            let result = session
                .translate_and_record(&mut store, &text, &source, &target, None)
                .await;
            pb.finish_and_clear();

            let entry = result.context("Translation failed")?;
            print_entry(&entry);

            if speak {
                let voice = choose_voice(&synthesizer, &store, None, &target);
                let utterance = utterance(entry.translated, &target, voice, store.speech_params());
                synthesizer.speak(&utterance)?;
            }
        }

        Commands::Listen {
            from,
            to,
            auto_stop_ms,
            speak,
        } => {
            capabilities.require_recognition()?;
            if speak {
                capabilities.require_synthesis()?;
            }

            let source = from.unwrap_or_else(|| settings.default_source.clone());
            let target = to.unwrap_or_else(|| settings.default_target.clone());
            let auto_stop = match auto_stop_ms {
                Some(0) => None,
                Some(ms) => Some(Duration::from_millis(ms)),
                None => settings.auto_stop(),
            };
            let options = LiveOptions {
                locale: langs::recognition_locale(&source, &settings.recognition_fallback_locale),
                source,
                target: target.clone(),
                auto_stop,
            };

            let voice = if speak {
                choose_voice(&synthesizer, &store, None, &target)
            } else {
                None
            };
            let params = store.speech_params();

            eprintln!(
                "Translating into {}. Enter transcripts one per line; `{}` resubmits the last one",
                langs::name_of(&options.target).unwrap_or(&options.target),
                speech::RETRY_COMMAND
            );

            let mut session = new_session(&settings, &store);
            session
                .run_live(&mut store, &mut recognizer, &options, |report| match report {
                    LiveReport::Listening => info!("Listening ({})", options.locale),
                    LiveReport::Interim(text) => eprintln!("... {}", text),
                    LiveReport::Translated(entry) => {
                        print_entry(&entry);
                        if speak {
                            let utterance =
                                utterance(entry.translated, &options.target, voice.clone(), params);
                            if let Err(e) = synthesizer.speak(&utterance) {
                                warn!("Could not speak translation: {}", e);
                            }
                        }
                    }
                    LiveReport::Failed(e) => {
                        eprintln!("Error: {}", e);
                        if let Some(hint) = e.hint() {
                            eprintln!("Tip: {}", hint);
                        }
                    }
                    LiveReport::Stopped => info!("Stopped listening"),
                })
                .await?;
        }

        Commands::Transcribe {
            file,
            language,
            format,
            output,
        } => {
            let client = SttClient::from_store(ReqwestTransport::new(settings.request_timeout()), &store)?;
            let pb = spinner(format!("Transcribing {}", file.display()));
            let result = client.transcribe(&mut store, &file, language.as_deref()).await;
            pb.finish_and_clear();

            let transcript = match result {
                Ok(transcript) => transcript,
                Err(e) => {
                    store.record(
                        LogLevel::Error,
                        format!("Transcription failed: {}", e),
                        Some(serde_json::json!({
                            "endpoint": client.endpoint(),
                            "file": file.display().to_string(),
                        })),
                    );
                    return Err(e).with_context(|| format!("Could not transcribe {}", file.display()));
                }
            };

            let rendered = match format {
                ExportFormat::Text => transcript.text(),
                ExportFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
                    "file": transcript.file_name,
                    "language": transcript.language,
                    "text": transcript.text(),
                    "segments": transcript.segments,
                }))?,
                ExportFormat::Srt => subtitle::to_srt(&transcript.segments),
            };

            match output {
                Some(path) => {
                    std::fs::write(&path, rendered)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("Saved to {}", path.display());
                }
                None => println!("{}", rendered),
            }
        }

        Commands::Speak { text, lang, voice } => {
            capabilities.require_synthesis()?;
            let text = read_text(text)?;
            let lang = lang.unwrap_or_else(|| settings.default_target.clone());
            let voice = choose_voice(&synthesizer, &store, voice, &lang);
            synthesizer.speak(&utterance(text, &lang, voice, store.speech_params()))?;
        }

        Commands::Voices => {
            capabilities.require_synthesis()?;
            let saved = store.voice();
            println!("{:<30} Language", "Name");
            println!("{}", "-".repeat(45));
            for voice in synthesizer.voices()? {
                let marker = if saved.as_deref() == Some(voice.name.as_str()) {
                    " *"
                } else {
                    ""
                };
                println!("{:<30} {}{}", voice.name, voice.lang, marker);
            }
        }

        Commands::Langs => {
            for (code, name) in langs::LANGUAGES {
                println!("{:<4} {}", code, name);
            }
        }

        Commands::History { action } => match action {
            HistoryAction::List { filter } => {
                let query = filter.as_deref().unwrap_or("");
                let entries = store.history(None);
                if entries.is_empty() {
                    println!("No history yet");
                }
                for (i, entry) in entries.iter().enumerate().filter(|(_, e)| e.matches(query)) {
                    println!("{:>3}  [{}] {}", i, entry.timestamp, entry.language_pair());
                    if let Some(file_name) = &entry.file_name {
                        println!("     File: {}", file_name);
                    }
                    println!("     {}", entry.recognized);
                    if !entry.translated.is_empty() {
                        println!("     -> {}", entry.translated);
                    }
                }
            }
            HistoryAction::Remove { index } => {
                let removed = store.remove_history(index)?;
                println!("Removed entry {}: {}", index, removed.recognized);
            }
            HistoryAction::Clear => {
                store.clear_history()?;
                println!("History cleared");
            }
            HistoryAction::Export {
                format,
                index,
                output,
            } => {
                let contents = export::render_history(&store.history(None), format, index)?;
                let dir = std::env::current_dir()?;
                let path = export::write(&dir, output.as_deref(), "history", format, &contents)?;
                println!("Exported history to {}", path.display());
            }
        },

        Commands::Logs { action } => match action {
            LogsAction::List => {
                let logs = store.logs();
                if logs.is_empty() {
                    println!("No log entries");
                }
                print!("{}", history::logs_to_text(&logs));
            }
            LogsAction::Clear => {
                store.clear_logs()?;
                println!("Logs cleared");
            }
            LogsAction::Export { format, output } => {
                let contents = export::render_logs(&store.logs(), format)?;
                let dir = std::env::current_dir()?;
                let path = export::write(&dir, output.as_deref(), "logs", format, &contents)?;
                println!("Exported logs to {}", path.display());
            }
        },

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let mut shown = store.settings_snapshot();
                shown["state_file"] = state_path.display().to_string().into();
                if let Some(path) = conf::config_path() {
                    shown["config_file"] = path.display().to_string().into();
                }
                shown["recognition"] = capabilities.recognition.into();
                shown["synthesis"] = capabilities.synthesis.into();
                println!("{}", serde_json::to_string_pretty(&shown)?);
            }
            ConfigAction::Init => {
                settings.save()?;
            }
            ConfigAction::Set { key, value } => {
                update_config(&mut store, key, Some(&value))?;
                println!("{}", serde_json::to_string_pretty(&store.settings_snapshot())?);
            }
            ConfigAction::Unset { key } => {
                update_config(&mut store, key, None)?;
                println!("{}", serde_json::to_string_pretty(&store.settings_snapshot())?);
            }
        },
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .format_target(false)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        if let Some(hint) = hint(&e) {
            eprintln!("Tip: {}", hint);
        }
        std::process::exit(1);
    }
}
