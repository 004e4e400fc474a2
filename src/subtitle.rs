use crate::history::Segment;
use std::fmt::Write as _;

/// `HH:MM:SS,mmm`; negative or non-finite times render as zero
pub fn timecode(seconds: f64) -> String {
    let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
    // Whole microseconds first, so 0.29 is 290ms rather than 289.999...
    let total_ms = (seconds * 1_000_000.0).round() as u64 / 1000;

    let ms = total_ms % 1000;
    let secs = (total_ms / 1000) % 60;
    let mins = (total_ms / 60_000) % 60;
    let hours = (total_ms / 3_600_000) % 100;

    format!("{:02}:{:02}:{:02},{:03}", hours, mins, secs, ms)
}

/// Render segments as SubRip text
pub fn to_srt(segments: &[Segment]) -> String {
    let mut out = String::new();
    for (i, segment) in segments.iter().enumerate() {
        let _ = write!(
            out,
            "{}\n{} --> {}\n{}\n\n",
            i + 1,
            timecode(segment.start),
            timecode(segment.end),
            segment.text.trim()
        );
    }
    out
}
