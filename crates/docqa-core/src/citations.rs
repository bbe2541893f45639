//! Citation parsing and source matching.
//!
//! The generation step returns free text ending in a `SOURCES:` line. This
//! module splits that text into an [`ChainOutput`], then maps every cited
//! source token back to a chunk of the session's current chunk set and
//! assembles the [`SourcedAnswer`] shown to the user.

use crate::models::{ChainOutput, Chunk, Citation, SourcedAnswer};

/// Marker the prompt asks the model to start its answer with.
pub const FINAL_ANSWER_MARKER: &str = "FINAL ANSWER:";

/// Suffix appended when a sources field was present but nothing matched.
pub const NO_SOURCES_FOUND: &str = "No sources found";

/// Split raw generated text into `{answer, sources}`.
///
/// The first case-insensitive `SOURCE:` or `SOURCES:` marker separates the
/// answer from the sources; only the first line after the marker is kept.
/// Without a marker the whole text is the answer and `sources` is empty.
pub fn parse_chain_output(raw: &str) -> ChainOutput {
    let (answer, sources) = match find_sources_marker(raw) {
        Some((start, end)) => {
            let rest = &raw[end..];
            let first_line = rest.split('\n').next().unwrap_or("");
            (&raw[..start], first_line.trim().to_string())
        }
        None => (raw, String::new()),
    };

    ChainOutput {
        answer: strip_answer_marker(answer).to_string(),
        sources,
    }
}

/// Byte range of the first `SOURCE:` / `SOURCES:` marker, case-insensitive.
fn find_sources_marker(text: &str) -> Option<(usize, usize)> {
    // ASCII lowercasing keeps byte offsets aligned with `text`.
    let lower = text.to_ascii_lowercase();
    let mut from = 0;
    while let Some(pos) = lower[from..].find("source") {
        let start = from + pos;
        let after = start + "source".len();
        let tail = &lower[after..];
        if tail.starts_with(':') {
            return Some((start, after + 1));
        }
        if tail.starts_with("s:") {
            return Some((start, after + 2));
        }
        from = after;
    }
    None
}

fn strip_answer_marker(answer: &str) -> &str {
    let trimmed = answer.trim();
    match trimmed.get(..FINAL_ANSWER_MARKER.len()) {
        Some(head) if head.eq_ignore_ascii_case(FINAL_ANSWER_MARKER) => {
            trimmed[FINAL_ANSWER_MARKER.len()..].trim()
        }
        _ => trimmed,
    }
}

/// Incremental view of the answer part of a streamed generation.
///
/// Fragments are pushed as they arrive and each call returns the newly
/// visible answer text. A leading `FINAL ANSWER:` marker, everything from
/// the sources marker onward, and surrounding whitespace are withheld, so
/// the concatenated output equals `parse_chain_output(raw).answer`. A tail
/// that could still grow into a marker is held until the next fragment or
/// [`finish`](AnswerStreamFilter::finish).
#[derive(Debug, Default)]
pub struct AnswerStreamFilter {
    raw: String,
    cursor: Option<usize>,
    emitted_any: bool,
    sealed: bool,
}

impl AnswerStreamFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: &str) -> String {
        self.raw.push_str(fragment);
        self.release(false)
    }

    /// Release whatever was held back; call once the stream has ended.
    pub fn finish(&mut self) -> String {
        self.release(true)
    }

    /// Everything pushed so far.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    fn release(&mut self, at_end: bool) -> String {
        if self.sealed {
            return String::new();
        }

        let start = match self.cursor {
            Some(pos) => pos,
            None => match answer_start(&self.raw, at_end) {
                Some(pos) => {
                    self.cursor = Some(pos);
                    pos
                }
                None => return String::new(),
            },
        };

        let end = match find_sources_marker(&self.raw) {
            Some((marker, _)) => {
                self.sealed = true;
                self.raw[..marker].trim_end().len()
            }
            None if at_end => {
                self.sealed = true;
                self.raw.trim_end().len()
            }
            None => held_back_end(&self.raw),
        };
        if end <= start {
            return String::new();
        }

        let mut visible = &self.raw[start..end];
        if !self.emitted_any {
            visible = visible.trim_start();
        }
        let out = visible.to_string();
        self.cursor = Some(end);
        if !out.is_empty() {
            self.emitted_any = true;
        }
        out
    }
}

/// Offset where the answer body starts, past any leading `FINAL ANSWER:`.
/// `None` while the text could still turn into that marker.
fn answer_start(raw: &str, at_end: bool) -> Option<usize> {
    let lead = raw.len() - raw.trim_start().len();
    let rest = &raw[lead..];
    match rest.get(..FINAL_ANSWER_MARKER.len()) {
        Some(head) if head.eq_ignore_ascii_case(FINAL_ANSWER_MARKER) => {
            Some(lead + FINAL_ANSWER_MARKER.len())
        }
        Some(_) => Some(lead),
        None if !at_end && is_prefix_ignore_case(rest, FINAL_ANSWER_MARKER) => None,
        None => Some(lead),
    }
}

/// End of the text that can be released now: trailing whitespace and any
/// suffix that may be the start of a sources marker stay buffered.
fn held_back_end(raw: &str) -> usize {
    let trimmed = raw.trim_end();
    let len = trimmed.len();
    for k in (1..="sources:".len()).rev() {
        let Some(tail) = len.checked_sub(k).and_then(|from| trimmed.get(from..)) else {
            continue;
        };
        if is_prefix_ignore_case(tail, "sources:") || is_prefix_ignore_case(tail, "source:") {
            return trimmed[..len - k].trim_end().len();
        }
    }
    len
}

fn is_prefix_ignore_case(text: &str, of: &str) -> bool {
    text.len() <= of.len() && of.as_bytes()[..text.len()].eq_ignore_ascii_case(text.as_bytes())
}

/// Normalize one cited token: trim whitespace and trailing periods.
///
/// ```rust
/// use docqa_core::citations::normalize_source_token;
/// assert_eq!(normalize_source_token(" source_2. "), "source_2");
/// ```
pub fn normalize_source_token(token: &str) -> &str {
    token.trim().trim_end_matches('.').trim()
}

/// Match the cited sources against `chunks` and build the final answer.
///
/// Each comma-separated token is normalized and looked up against the
/// chunks' source ids (first match in recorded order, case-sensitive).
/// Every match contributes a citation panel carrying the chunk's full text,
/// and the matched ids are appended as `"\nSources: a,b"`. If the sources
/// field is non-empty but nothing matched, `"\nNo sources found"` is
/// appended instead. An empty sources field leaves the answer untouched.
pub fn resolve_sources(output: &ChainOutput, chunks: &[Chunk]) -> SourcedAnswer {
    let mut answer = output.answer.clone();
    let sources = output.sources.trim();
    if sources.is_empty() {
        return SourcedAnswer {
            answer,
            citations: Vec::new(),
            found_sources: Vec::new(),
        };
    }

    let mut citations = Vec::new();
    let mut found = Vec::new();

    for token in sources.split(',') {
        let name = normalize_source_token(token);
        if name.is_empty() {
            continue;
        }
        let Some(chunk) = chunks.iter().find(|c| c.source_id == name) else {
            continue;
        };
        citations.push(Citation {
            name: name.to_string(),
            content: chunk.text.clone(),
        });
        found.push(name.to_string());
    }

    if found.is_empty() {
        answer.push('\n');
        answer.push_str(NO_SOURCES_FOUND);
    } else {
        answer.push_str("\nSources: ");
        answer.push_str(&found.join(","));
    }

    SourcedAnswer {
        answer,
        citations,
        found_sources: found,
    }
}
