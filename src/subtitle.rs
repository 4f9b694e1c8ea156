//! Subtitle cleaning and time-based chunking.
//!
//! Raw subtitle lines carry sound cues, markup tags and styling noise that
//! would pollute fact extraction. Cleaning strips them per line; chunking
//! groups the survivors into contiguous, duration-bounded segments that fit
//! a single extraction prompt.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// One time-stamped dialogue line as supplied by the subtitle store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtitleLine {
    /// Start time in seconds from the beginning of the episode
    pub start_time: f64,
    /// End time in seconds
    pub end_time: f64,
    /// Speaker name, when the subtitle format carries one
    pub speaker: Option<String>,
    pub text: String,
}

/// A contiguous slice of cleaned, display-ready dialogue lines.
///
/// Ephemeral: chunks are built per generation attempt and never persisted.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Start time of the first line in the chunk, in seconds
    pub start_time: f64,
    /// Display-ready lines: "speaker: text" or bare "text"
    pub lines: Vec<String>,
}

impl Chunk {
    pub fn transcript(&self) -> String {
        self.lines.join("\n")
    }
}

// Bracketed and parenthesised non-speech cues: [MUSIC], (laughs), [door slams]
static CUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[[^\]]*\]|\([^)]*\)").expect("valid cue regex"));

// Markup: HTML-style tags (<i>, <font ...>) and ASS override blocks ({\an8})
static MARKUP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>|\{[^}]*\}").expect("valid markup regex"));

/// Clean a single raw subtitle line.
///
/// Strips non-speech cues, markup, and music-note decorations, then
/// collapses whitespace. Returns `None` when nothing remains.
pub fn clean_line(raw: &str) -> Option<String> {
    let without_cues = CUE_RE.replace_all(raw, " ");
    let without_markup = MARKUP_RE.replace_all(&without_cues, " ");
    let without_notes = without_markup.replace(['♪', '♫'], " ");

    let cleaned = without_notes.split_whitespace().collect::<Vec<_>>().join(" ");

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Group subtitle lines into duration-bounded chunks.
///
/// Lines must already be ordered by start time. A chunk closes once the
/// elapsed time since its first line reaches `target_secs` and it holds at
/// least one line; the closing line starts the next chunk. Lines whose text
/// cleans to nothing are dropped. The final partial chunk is always emitted
/// when non-empty, so a chunk may exceed the target duration when dialogue
/// gaps are large; no line is ever split.
pub fn chunk_lines(lines: &[SubtitleLine], target_secs: f64) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut current: Option<Chunk> = None;

    for line in lines {
        let Some(text) = clean_line(&line.text) else {
            continue;
        };

        let display = match &line.speaker {
            Some(speaker) if !speaker.trim().is_empty() => {
                format!("{}: {}", speaker.trim(), text)
            }
            _ => text,
        };

        let close = current
            .as_ref()
            .is_some_and(|chunk| line.start_time - chunk.start_time >= target_secs);
        if close {
            if let Some(chunk) = current.take() {
                chunks.push(chunk);
            }
        }

        match current.as_mut() {
            Some(chunk) => chunk.lines.push(display),
            None => {
                current = Some(Chunk {
                    start_time: line.start_time,
                    lines: vec![display],
                });
            }
        }
    }

    if let Some(chunk) = current {
        chunks.push(chunk);
    }

    chunks
}
