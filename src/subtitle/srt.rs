// SRT subtitle format
use super::{clean_cue_text, SubtitleCue};
use crate::error::{AutodubError, Result};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

/// Serialize cues as SRT: index, `HH:MM:SS,mmm --> HH:MM:SS,mmm`, text, blank line.
pub fn format_srt(cues: &[SubtitleCue]) -> String {
    cues.iter()
        .map(|cue| {
            format!(
                "{}\n{} --> {}\n{}\n",
                cue.index,
                format_timestamp(cue.start),
                format_timestamp(cue.end),
                clean_cue_text(&cue.text)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse SRT text back into cues.
///
/// Accepts `\r\n` line endings and `.` as the millisecond separator. Text
/// spanning several lines is joined with `\n`.
pub fn parse_srt(content: &str) -> Result<Vec<SubtitleCue>> {
    let normalized = content.replace("\r\n", "\n");
    let mut cues = Vec::new();

    for block in normalized.split("\n\n") {
        let mut lines = block.lines().map(str::trim_end).skip_while(|l| l.trim().is_empty());

        let Some(index_line) = lines.next() else {
            continue;
        };
        let index: usize = index_line.trim().trim_start_matches('\u{feff}').parse().map_err(|_| {
            AutodubError::InvalidTranscript(format!("Bad SRT index line: {:?}", index_line))
        })?;

        let timing_line = lines.next().ok_or_else(|| {
            AutodubError::InvalidTranscript(format!("Cue {} has no timing line", index))
        })?;
        let (start, end) = parse_timing_line(timing_line)?;

        let text = lines.collect::<Vec<_>>().join("\n").trim().to_string();

        cues.push(SubtitleCue {
            index,
            start,
            end,
            text,
        });
    }

    debug!("Parsed {} SRT cues", cues.len());
    Ok(cues)
}

/// Write cues to an SRT file.
pub async fn write_srt(cues: &[SubtitleCue], path: &Path) -> Result<()> {
    tokio::fs::write(path, format_srt(cues)).await?;
    debug!("Wrote {} cues to {}", cues.len(), path.display());
    Ok(())
}

fn timing_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(\d{1,}):(\d{2}):(\d{2})[,.](\d{3})\s*-->\s*(\d{1,}):(\d{2}):(\d{2})[,.](\d{3})",
        )
        .expect("valid SRT timing regex")
    })
}

fn parse_timing_line(line: &str) -> Result<(Duration, Duration)> {
    let caps = timing_regex().captures(line).ok_or_else(|| {
        AutodubError::InvalidTranscript(format!("Bad SRT timing line: {:?}", line))
    })?;

    let out_of_range =
        || AutodubError::InvalidTranscript(format!("SRT timestamp out of range: {:?}", line));
    let field = |i: usize| caps[i].parse::<u64>().map_err(|_| out_of_range());
    let to_duration = |first: usize| -> Result<Duration> {
        let (h, m, s, ms) = (field(first)?, field(first + 1)?, field(first + 2)?, field(first + 3)?);
        h.checked_mul(3_600_000)
            .and_then(|millis| millis.checked_add((m * 60 + s) * 1000 + ms))
            .map(Duration::from_millis)
            .ok_or_else(out_of_range)
    };

    Ok((to_duration(1)?, to_duration(5)?))
}

/// Format a duration as `HH:MM:SS,mmm`, rounded to the nearest millisecond.
pub fn format_timestamp(d: Duration) -> String {
    let total_millis = (d.as_nanos() + 500_000) / 1_000_000;
    let hours = total_millis / 3_600_000;
    let minutes = (total_millis % 3_600_000) / 60_000;
    let seconds = (total_millis % 60_000) / 1000;
    let millis = total_millis % 1000;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, millis)
}
