use crate::history::{self, HistoryEntry, LogEntry};
use crate::subtitle;
use jiff::Zoned;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("nothing to export")]
    Empty,
    #[error("no history entry at index {index} (have {len})")]
    OutOfRange { index: usize, len: usize },
    #[error("history entry {0} has no time-coded segments")]
    NoSegments(usize),
    #[error("{0} export is not available for logs")]
    Unsupported(&'static str),
    #[error("failed to serialize export: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Text,
    Srt,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Text => "txt",
            ExportFormat::Srt => "srt",
        }
    }
}

/// `history-2025-01-31_14-05-09.json`
pub fn file_name(kind: &str, format: ExportFormat) -> String {
    let timestamp = Zoned::now().strftime("%Y-%m-%d_%H-%M-%S");
    format!("{}-{}.{}", kind, timestamp, format.extension())
}

/// JSON and text cover every given entry; SRT uses the segments of entry `index` (newest by default)
pub fn render_history(
    entries: &[HistoryEntry],
    format: ExportFormat,
    index: Option<usize>,
) -> Result<String, ExportError> {
    if entries.is_empty() {
        return Err(ExportError::Empty);
    }
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(entries)?),
        ExportFormat::Text => Ok(history::to_text(entries)),
        ExportFormat::Srt => {
            let index = index.unwrap_or(0);
            let entry = entries.get(index).ok_or(ExportError::OutOfRange {
                index,
                len: entries.len(),
            })?;
            match entry.segments.as_deref() {
                Some(segments) if !segments.is_empty() => Ok(subtitle::to_srt(segments)),
                _ => Err(ExportError::NoSegments(index)),
            }
        }
    }
}

pub fn render_logs(entries: &[LogEntry], format: ExportFormat) -> Result<String, ExportError> {
    if entries.is_empty() {
        return Err(ExportError::Empty);
    }
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(entries)?),
        ExportFormat::Text => Ok(history::logs_to_text(entries)),
        ExportFormat::Srt => Err(ExportError::Unsupported("SRT")),
    }
}

/// Write to `output` if given, otherwise to a timestamped file in `dir`
pub fn write(
    dir: &Path,
    output: Option<&Path>,
    kind: &str,
    format: ExportFormat,
    contents: &str,
) -> Result<PathBuf, ExportError> {
    let path = match output {
        Some(path) => path.to_path_buf(),
        None => dir.join(file_name(kind, format)),
    };
    fs::write(&path, contents).map_err(|source| ExportError::Write {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{LogLevel, Segment};
    use crate::store::testing::memory_store;

    fn entry(recognized: &str) -> HistoryEntry {
        HistoryEntry::new(recognized, "en", "ru", "https://translate.test")
            .with_translation(recognized.to_uppercase())
    }

    #[test]
    fn test_json_export_matches_store() {
        let (mut store, _backend) = memory_store();
        for text in ["one", "two", "three"] {
            store.append_history(entry(text)).unwrap();
        }
        store
            .append_history(
                entry("clip")
                    .with_file_name("clip.wav")
                    .with_segments(vec![Segment::new(0.0, 1.0, "clip")]),
            )
            .unwrap();

        let history = store.history(None);
        let json = render_history(&history, ExportFormat::Json, None).unwrap();
        let parsed: Vec<HistoryEntry> = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, history);
        assert_eq!(parsed[0].recognized, "clip");
        assert_eq!(parsed[3].recognized, "one");
    }

    #[test]
    fn test_srt_export_needs_segments() {
        let entries = vec![
            entry("typed"),
            entry("clip").with_segments(vec![Segment::new(1.2345, 3.0, "hi")]),
        ];

        assert!(matches!(
            render_history(&entries, ExportFormat::Srt, None),
            Err(ExportError::NoSegments(0))
        ));
        assert_eq!(
            render_history(&entries, ExportFormat::Srt, Some(1)).unwrap(),
            "1\n00:00:01,234 --> 00:00:03,000\nhi\n\n"
        );
        assert!(matches!(
            render_history(&entries, ExportFormat::Srt, Some(5)),
            Err(ExportError::OutOfRange { index: 5, len: 2 })
        ));
    }

    #[test]
    fn test_logs_export() {
        let logs = vec![LogEntry::new(LogLevel::Warn, "slow endpoint")];
        assert!(render_logs(&logs, ExportFormat::Text).unwrap().contains("WARN  slow endpoint"));
        assert!(matches!(
            render_logs(&logs, ExportFormat::Srt),
            Err(ExportError::Unsupported(_))
        ));
        assert!(matches!(render_logs(&[], ExportFormat::Json), Err(ExportError::Empty)));
    }

    #[test]
    fn test_write_uses_timestamped_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), None, "history", ExportFormat::Json, "[]").unwrap();

        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("history-"));
        assert!(name.ends_with(".json"));
        // history-YYYY-MM-DD_HH-MM-SS.json
        assert_eq!(name.len(), "history-".len() + 19 + ".json".len());
        assert_eq!(fs::read_to_string(path).unwrap(), "[]");
    }
}
