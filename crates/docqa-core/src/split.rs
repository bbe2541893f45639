//! Recursive character text splitter.
//!
//! Splits parsed document text into overlapping windows bounded by a
//! character budget. Each file kind carries its own [`SplitterConfig`]
//! (PDF: 1000/300, text and CSV: 800/150).
//!
//! # Algorithm
//!
//! 1. Pick the first separator from `["\n\n", "\n", " ", ""]` that occurs in
//!    the text (`""` always matches and splits into characters).
//! 2. Split on it, keeping the separator at the start of the following piece.
//! 3. Pieces shorter than `chunk_size` are merged greedily into a window.
//!    When the next piece would overflow the window, the window is emitted
//!    and pieces are dropped from its front until at most `chunk_overlap`
//!    characters remain.
//! 4. Pieces of `chunk_size` characters or more are split again with the
//!    remaining separators.
//! 5. Windows are whitespace-trimmed; empty windows are dropped.
//!
//! Lengths are counted in `char`s, not bytes.
//!
//! # Example
//!
//! ```rust
//! use docqa_core::split::{RecursiveCharacterSplitter, SplitterConfig};
//!
//! let splitter = RecursiveCharacterSplitter::new(SplitterConfig::new(800, 150).unwrap());
//! let chunks = splitter.split_text("Hello world.\n\nSecond paragraph.");
//! assert_eq!(chunks, vec!["Hello world.\n\nSecond paragraph.".to_string()]);
//! ```

use anyhow::{bail, Result};
use serde::Deserialize;

/// Separators tried in priority order.
pub const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Window size and overlap, both in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SplitterConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl SplitterConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        let config = Self {
            chunk_size,
            chunk_overlap,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            bail!("chunk_size must be > 0");
        }
        if self.chunk_overlap >= self.chunk_size {
            bail!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap,
                self.chunk_size
            );
        }
        Ok(())
    }

    pub const PDF: SplitterConfig = SplitterConfig {
        chunk_size: 1000,
        chunk_overlap: 300,
    };

    pub const TEXT: SplitterConfig = SplitterConfig {
        chunk_size: 800,
        chunk_overlap: 150,
    };

    pub const CSV: SplitterConfig = SplitterConfig {
        chunk_size: 800,
        chunk_overlap: 150,
    };
}

#[derive(Debug, Clone)]
pub struct RecursiveCharacterSplitter {
    config: SplitterConfig,
    separators: Vec<String>,
}

impl RecursiveCharacterSplitter {
    pub fn new(config: SplitterConfig) -> Self {
        Self {
            config,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn config(&self) -> SplitterConfig {
        self.config
    }

    /// Split one logical document into windows, in document order.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let mut final_chunks = Vec::new();

        let mut separator = separators.last().map(String::as_str).unwrap_or("");
        let mut remaining: &[String] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                separator = "";
                break;
            }
            if text.contains(sep.as_str()) {
                separator = sep;
                remaining = &separators[i + 1..];
                break;
            }
        }

        let pieces = split_keeping_separator(text, separator);
        let mut good: Vec<String> = Vec::new();

        for piece in pieces {
            if char_len(&piece) < self.config.chunk_size {
                good.push(piece);
                continue;
            }
            if !good.is_empty() {
                final_chunks.extend(self.merge_pieces(&good, ""));
                good.clear();
            }
            if remaining.is_empty() {
                final_chunks.push(piece);
            } else {
                final_chunks.extend(self.split_recursive(&piece, remaining));
            }
        }

        if !good.is_empty() {
            final_chunks.extend(self.merge_pieces(&good, ""));
        }

        final_chunks
    }

    fn merge_pieces(&self, pieces: &[String], separator: &str) -> Vec<String> {
        let size = self.config.chunk_size;
        let overlap = self.config.chunk_overlap;
        let sep_len = char_len(separator);

        let mut docs = Vec::new();
        let mut window: std::collections::VecDeque<(&str, usize)> = Default::default();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);
            let joiner = if window.is_empty() { 0 } else { sep_len };
            if total + len + joiner > size {
                if !window.is_empty() {
                    if let Some(doc) = join_window(&window, separator) {
                        docs.push(doc);
                    }
                    // Shrink from the front until the retained tail fits the overlap
                    // and the incoming piece fits the window.
                    loop {
                        let joiner = if window.is_empty() { 0 } else { sep_len };
                        let overflows = total + len + joiner > size && total > 0;
                        if !(total > overlap || overflows) {
                            break;
                        }
                        let Some((_, front_len)) = window.pop_front() else {
                            break;
                        };
                        let front_joiner = if window.is_empty() { 0 } else { sep_len };
                        total -= front_len + front_joiner;
                    }
                }
            }
            window.push_back((piece.as_str(), len));
            total += len + if window.len() > 1 { sep_len } else { 0 };
        }

        if let Some(doc) = join_window(&window, separator) {
            docs.push(doc);
        }
        docs
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn join_window(window: &std::collections::VecDeque<(&str, usize)>, separator: &str) -> Option<String> {
    let joined = window
        .iter()
        .map(|(s, _)| *s)
        .collect::<Vec<_>>()
        .join(separator);
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Split on `separator`, attaching it to the start of each following piece.
fn split_keeping_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(|c| c.to_string()).collect();
    }
    let mut pieces = Vec::new();
    for (i, part) in text.split(separator).enumerate() {
        if i == 0 {
            pieces.push(part.to_string());
        } else {
            pieces.push(format!("{}{}", separator, part));
        }
    }
    pieces.retain(|p| !p.is_empty());
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_splitter() -> RecursiveCharacterSplitter {
        RecursiveCharacterSplitter::new(SplitterConfig::TEXT)
    }

    #[test]
    fn short_text_is_one_chunk() {
        let text = "word ".repeat(120); // 600 chars
        let chunks = text_splitter().split_text(&text);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], text.trim());
    }

    #[test]
    fn exactly_chunk_size_is_one_chunk() {
        let text = "a".repeat(800);
        let chunks = text_splitter().split_text(&text);
        assert_eq!(chunks, vec![text]);
    }

    #[test]
    fn unbroken_text_overlaps_by_configured_amount() {
        let text: String = (0..2000)
            .map(|i| char::from(b'a' + (i % 26) as u8))
            .collect();
        let chunks = text_splitter().split_text(&text);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 800);
        assert_eq!(chunks[1].chars().count(), 800);
        assert_eq!(chunks[2].chars().count(), 700);

        for pair in chunks.windows(2) {
            let prev_tail: String = pair[0].chars().skip(800 - 150).collect();
            let next_head: String = pair[1].chars().take(150).collect();
            assert_eq!(prev_tail, next_head);
        }
        assert_eq!(&chunks[0], &text[..800]);
        assert_eq!(&chunks[1], &text[650..1450]);
        assert_eq!(&chunks[2], &text[1300..]);
    }

    #[test]
    fn pdf_config_uses_larger_windows() {
        let splitter = RecursiveCharacterSplitter::new(SplitterConfig::PDF);
        let text = "x".repeat(1500);
        let chunks = splitter.split_text(&text);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 1000);
        assert_eq!(chunks[1].len(), 800);
    }

    #[test]
    fn prefers_paragraph_boundaries() {
        let para_a = "alpha ".repeat(100); // 600 chars
        let para_b = "beta ".repeat(100); // 500 chars
        let text = format!("{}\n\n{}", para_a.trim(), para_b.trim());
        let chunks = text_splitter().split_text(&text);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], para_a.trim());
        assert_eq!(chunks[1], para_b.trim());
    }

    #[test]
    fn chunks_respect_size_limit() {
        let text = (0..400)
            .map(|i| format!("sentence number {} ends here.", i))
            .collect::<Vec<_>>()
            .join(" ");
        for chunk in text_splitter().split_text(&text) {
            assert!(chunk.chars().count() <= 800);
        }
    }

    #[test]
    fn multibyte_text_counts_chars() {
        let text = "é".repeat(800);
        let chunks = text_splitter().split_text(&text);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn whitespace_only_text_yields_nothing() {
        assert!(text_splitter().split_text("   \n\n  ").is_empty());
        assert!(text_splitter().split_text("").is_empty());
    }

    #[test]
    fn keeps_separator_with_following_piece() {
        assert_eq!(
            split_keeping_separator("a\n\nb\n\nc", "\n\n"),
            vec!["a", "\n\nb", "\n\nc"]
        );
    }

    #[test]
    fn config_validation() {
        assert!(SplitterConfig::new(0, 0).is_err());
        assert!(SplitterConfig::new(100, 100).is_err());
        assert!(SplitterConfig::new(100, 20).is_ok());
    }
}
