//! Snippet registry.
//!
//! Every code block that closes while streaming becomes a [`Snippet`] with a stable integer id.
//! Ids start at a caller-supplied offset so that several renderers in one session (one per
//! model response) hand out ids that never collide.

use serde::{Deserialize, Serialize};

/// A finalized, addressable code block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snippet {
    /// Stable id: the registry's start offset plus the number of earlier snippets.
    #[serde(default)]
    pub id: usize,
    /// Language from the fence info string; empty when none was given.
    #[serde(default, alias = "lang")]
    pub language: String,
    /// The code between the fences, without the final line ending.
    pub code: String,
    /// True when the stream ended before the closing fence arrived.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

/// Assigns monotonically increasing ids to snippets in arrival order.
///
/// There is no removal: editing or deleting snippets is the caller's concern once
/// [`SnippetRegistry::all`] has handed them over.
#[derive(Clone, Debug, Default)]
pub struct SnippetRegistry {
    start_offset: usize,
    snippets: Vec<Snippet>,
}

impl SnippetRegistry {
    /// Creates an empty registry whose first id is `start_offset`.
    pub fn new(start_offset: usize) -> Self {
        Self {
            start_offset,
            snippets: Vec::new(),
        }
    }

    /// Registers a cleanly closed code block and returns its id.
    pub fn register(&mut self, language: impl Into<String>, code: impl Into<String>) -> usize {
        self.push(language.into(), code.into(), false)
    }

    /// Registers a block whose fence was still open when the stream ended.
    pub fn register_truncated(
        &mut self,
        language: impl Into<String>,
        code: impl Into<String>,
    ) -> usize {
        self.push(language.into(), code.into(), true)
    }

    /// Returns every snippet registered so far, oldest first.
    pub fn all(&self) -> &[Snippet] {
        &self.snippets
    }

    /// Returns the id the next registration will receive.
    pub fn next_id(&self) -> usize {
        self.start_offset + self.snippets.len()
    }

    /// Returns the number of snippets registered so far.
    pub fn len(&self) -> usize {
        self.snippets.len()
    }

    /// Returns true when nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty()
    }

    /// Consumes the registry, returning its snippets.
    pub fn into_snippets(self) -> Vec<Snippet> {
        self.snippets
    }

    fn push(&mut self, language: String, code: String, truncated: bool) -> usize {
        let id = self.next_id();
        self.snippets.push(Snippet {
            id,
            language,
            code,
            truncated,
        });
        id
    }
}
