//! Chunk normalization for the incoming token stream.
//!
//! Upstream deltas arrive at any granularity, so blank-line runs may be split across chunks or
//! arrive with redundant newlines.  [`ChunkNormalizer`] collapses every run of two or more
//! newlines to exactly two and reports where line and paragraph boundaries fall, carrying its
//! state across chunk edges.

/// Fixed prefix that turns a line of reasoning text into a markdown blockquote line.
pub const REASONING_PREFIX: &str = "> ";

/// A boundary found while walking a chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Boundary {
    /// A single newline ended a line.
    Line,
    /// A second consecutive newline ended a paragraph.
    Paragraph,
}

/// One unit of normalized chunk text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Piece {
    /// A non-newline character.
    Char(char),
    /// A newline, tagged with the boundary it completes.
    Break(Boundary),
}

/// Collapses newline runs and exposes chunk text piece by piece.
#[derive(Clone, Debug, Default)]
pub struct ChunkNormalizer {
    trailing_newlines: usize,
}

impl ChunkNormalizer {
    /// Creates a normalizer positioned at the start of a stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Splits `chunk` into pieces, dropping any newline beyond the second in a row.
    ///
    /// Runs are tracked across calls, so `"a\n"` followed by `"\n\nb"` yields the same pieces as
    /// `"a\n\n\nb"` fed at once.
    pub fn pieces(&mut self, chunk: &str) -> Vec<Piece> {
        let mut pieces = Vec::with_capacity(chunk.len());
        for ch in chunk.chars() {
            if ch == '\n' {
                if self.trailing_newlines >= 2 {
                    continue;
                }
                self.trailing_newlines += 1;
                let boundary = if self.trailing_newlines == 2 {
                    Boundary::Paragraph
                } else {
                    Boundary::Line
                };
                pieces.push(Piece::Break(boundary));
            } else {
                self.trailing_newlines = 0;
                pieces.push(Piece::Char(ch));
            }
        }
        pieces
    }
}

/// Collapses two or more consecutive newlines in `chunk` to exactly two.
///
/// All other characters pass through unchanged.
///
/// ```
/// assert_eq!(mdstream::normalize("a\n\n\n\nb\nc"), "a\n\nb\nc");
/// ```
pub fn normalize(chunk: &str) -> String {
    ChunkNormalizer::new()
        .pieces(chunk)
        .into_iter()
        .map(|piece| match piece {
            Piece::Char(ch) => ch,
            Piece::Break(_) => '\n',
        })
        .collect()
}

/// Prefixes every line of reasoning text with [`REASONING_PREFIX`].
///
/// Newline runs collapse to a single newline so the resulting blockquote is never split by a
/// blank line.  The prefix is emitted lazily, when the first character of a line arrives, which
/// keeps the transform independent of how the text was chunked.
#[derive(Clone, Debug)]
pub struct ReasoningQuoter {
    at_line_start: bool,
}

impl ReasoningQuoter {
    /// Creates a quoter positioned at the start of a line.
    pub fn new() -> Self {
        Self {
            at_line_start: true,
        }
    }

    /// Transforms the next chunk of reasoning text.
    pub fn quote(&mut self, text: &str) -> String {
        let mut quoted = String::with_capacity(text.len() + REASONING_PREFIX.len());
        for ch in text.chars() {
            if ch == '\n' {
                if !self.at_line_start {
                    quoted.push('\n');
                    self.at_line_start = true;
                }
                continue;
            }
            if self.at_line_start {
                quoted.push_str(REASONING_PREFIX);
                self.at_line_start = false;
            }
            quoted.push(ch);
        }
        quoted
    }

    /// Forgets any partial line so the next character starts a fresh quoted line.
    pub fn reset(&mut self) {
        self.at_line_start = true;
    }
}

impl Default for ReasoningQuoter {
    fn default() -> Self {
        Self::new()
    }
}
