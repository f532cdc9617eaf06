pub mod srt;

use crate::error::{AutodubError, Result};
use std::time::Duration;

/// One timed unit of subtitle text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleCue {
    /// 1-based position in its transcript.
    pub index: usize,
    pub start: Duration,
    pub end: Duration,
    pub text: String,
}

impl SubtitleCue {
    pub fn new(index: usize, start: Duration, end: Duration, text: impl Into<String>) -> Self {
        Self {
            index,
            start,
            end,
            text: text.into(),
        }
    }

    /// Length of the caption window.
    pub fn window(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }
}

/// Trim every line of cue text and drop blank ones.
///
/// A blank line ends a cue block in SRT, so cue text may never contain one.
pub fn clean_cue_text(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Ordered, non-overlapping cues covering one audio track.
///
/// Cues are sorted by `start`, `cue[i].end <= cue[i + 1].start`, indices run
/// `1..=N` without gaps, every window is non-empty and every text is non-empty.
/// Construction fails if any of these do not hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    language: String,
    cues: Vec<SubtitleCue>,
}

impl Transcript {
    pub fn new(language: impl Into<String>, cues: Vec<SubtitleCue>) -> Result<Self> {
        validate_cues(&cues)?;
        Ok(Self {
            language: language.into(),
            cues,
        })
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn cues(&self) -> &[SubtitleCue] {
        &self.cues
    }

    pub fn len(&self) -> usize {
        self.cues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }

    /// End of the last cue.
    pub fn end(&self) -> Duration {
        self.cues.last().map(|c| c.end).unwrap_or(Duration::ZERO)
    }

    /// Same cues with new `(start, end)` pairs; count and order are kept.
    pub fn with_timings(&self, timings: &[(Duration, Duration)]) -> Result<Self> {
        if timings.len() != self.cues.len() {
            return Err(AutodubError::InvalidTranscript(format!(
                "Expected {} timings, got {}",
                self.cues.len(),
                timings.len()
            )));
        }

        let cues = self
            .cues
            .iter()
            .zip(timings)
            .map(|(cue, &(start, end))| SubtitleCue {
                start,
                end,
                ..cue.clone()
            })
            .collect();

        Transcript::new(self.language.clone(), cues)
    }
}

/// A transcript whose cue texts are in the target language.
///
/// Indices and timings are copied from the source transcript at creation;
/// only [`TranslatedTranscript::retimed`] may change timings afterwards, and it
/// never changes cue count or order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslatedTranscript {
    source_language: String,
    transcript: Transcript,
}

impl TranslatedTranscript {
    /// Pair every source cue with its translated text.
    pub fn from_source(
        source: &Transcript,
        target_language: impl Into<String>,
        texts: Vec<String>,
    ) -> Result<Self> {
        if texts.len() != source.len() {
            return Err(AutodubError::Translation(format!(
                "Cue count mismatch: {} source cues, {} translations",
                source.len(),
                texts.len()
            )));
        }

        let cues = source
            .cues()
            .iter()
            .zip(texts)
            .map(|(cue, text)| SubtitleCue {
                text: clean_cue_text(&text),
                ..cue.clone()
            })
            .collect::<Vec<_>>();

        if let Some(empty) = cues.iter().find(|c| c.text.is_empty()) {
            return Err(AutodubError::Translation(format!(
                "Empty translation for cue {}",
                empty.index
            )));
        }

        Ok(Self {
            source_language: source.language().to_string(),
            transcript: Transcript::new(target_language, cues)?,
        })
    }

    pub fn source_language(&self) -> &str {
        &self.source_language
    }

    pub fn target_language(&self) -> &str {
        self.transcript.language()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn cues(&self) -> &[SubtitleCue] {
        self.transcript.cues()
    }

    pub fn len(&self) -> usize {
        self.transcript.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transcript.is_empty()
    }

    pub fn retimed(&self, timings: &[(Duration, Duration)]) -> Result<Self> {
        Ok(Self {
            source_language: self.source_language.clone(),
            transcript: self.transcript.with_timings(timings)?,
        })
    }
}

fn validate_cues(cues: &[SubtitleCue]) -> Result<()> {
    for (i, cue) in cues.iter().enumerate() {
        if cue.index != i + 1 {
            return Err(AutodubError::InvalidTranscript(format!(
                "Cue at position {} has index {}",
                i + 1,
                cue.index
            )));
        }
        if cue.start >= cue.end {
            return Err(AutodubError::InvalidTranscript(format!(
                "Cue {} has empty window ({:?} >= {:?})",
                cue.index, cue.start, cue.end
            )));
        }
        if cue.text.trim().is_empty() {
            return Err(AutodubError::InvalidTranscript(format!(
                "Cue {} has empty text",
                cue.index
            )));
        }
        if let Some(next) = cues.get(i + 1) {
            if cue.end > next.start {
                return Err(AutodubError::InvalidTranscript(format!(
                    "Cue {} ends after cue {} starts",
                    cue.index, next.index
                )));
            }
        }
    }
    Ok(())
}
