//! Fence boundary tracking.
//!
//! After every reparse the tracker decides whether the buffer currently ends inside an open
//! triple-backtick fence.  Transitions are edge-triggered against the previous classification:
//! the renderer acts only when a fence has just opened or just closed.

use crate::markdown::ParseResult;

const FENCE_MARKER: &str = "```";

/// Whether the buffer ends inside a fence, plus the offset of the rightmost fence marker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FenceState {
    /// True when the buffer ends inside an unclosed backtick fence, at any nesting depth.
    pub in_fence: bool,
    /// Byte offset where that open fence starts.
    pub start: Option<usize>,
    /// Byte offset of the last `` ``` `` in the buffer, if any.
    pub offset: Option<usize>,
}

/// The edge observed between two consecutive classifications.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FenceTransition {
    /// Nothing of interest changed.
    Unchanged,
    /// A fence just opened; `offset` is where the fence starts in the current buffer.
    Opened {
        /// Offset of the opening fence.
        offset: usize,
    },
    /// The open fence just received its closing marker.
    Closed {
        /// Offset of the closing marker.
        offset: usize,
    },
}

/// Classifies `buffer` given its fresh parse.
pub fn classify(buffer: &str, parsed: &ParseResult) -> FenceState {
    let start = parsed
        .open_fence()
        .filter(|fence| fence.code.is_backtick())
        .map(|fence| fence.range.start);
    FenceState {
        in_fence: start.is_some(),
        start,
        offset: buffer.rfind(FENCE_MARKER),
    }
}

/// Holds the previous classification so transitions can be detected.
#[derive(Clone, Debug, Default)]
pub struct FenceBoundaryTracker {
    state: FenceState,
    opened_at: Option<usize>,
}

impl FenceBoundaryTracker {
    /// Creates a tracker in the no-fence state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current classification.
    pub fn state(&self) -> FenceState {
        self.state
    }

    /// Returns true while the buffer ends inside an open fence.
    pub fn in_fence(&self) -> bool {
        self.state.in_fence
    }

    /// Reclassifies after a reparse and reports the edge, if any.
    ///
    /// Leaving a fence only counts as a close when the rightmost marker is no longer the one that
    /// opened it; a fence that ends because its list item or quote ended is not a close.
    pub fn on_reparse(&mut self, buffer: &str, parsed: &ParseResult) -> FenceTransition {
        let previous = self.state;
        let next = classify(buffer, parsed);
        self.state = next;
        match (previous.start, next.start) {
            (before, Some(start)) if before != Some(start) => {
                self.opened_at = next.offset;
                FenceTransition::Opened { offset: start }
            }
            (Some(_), None) => {
                let opened_at = self.opened_at.take();
                match next.offset {
                    Some(offset) if Some(offset) != opened_at => {
                        FenceTransition::Closed { offset }
                    }
                    _ => FenceTransition::Unchanged,
                }
            }
            _ => FenceTransition::Unchanged,
        }
    }

    /// Shifts the remembered offsets after the first `cut` bytes of the buffer were dropped.
    pub fn rebase(&mut self, cut: usize) {
        let shift = |offset: Option<usize>| offset.and_then(|offset| offset.checked_sub(cut));
        self.state.start = shift(self.state.start);
        self.state.offset = shift(self.state.offset);
        self.opened_at = shift(self.opened_at);
    }

    /// Returns to the no-fence state, as for an empty buffer.
    pub fn reset(&mut self) {
        self.state = FenceState::default();
        self.opened_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markdown::parse;

    fn step(tracker: &mut FenceBoundaryTracker, buffer: &str) -> FenceTransition {
        let parsed = parse(buffer).unwrap();
        tracker.on_reparse(buffer, &parsed)
    }

    #[test]
    fn no_marker_means_no_fence() {
        let parsed = parse("plain text\n").unwrap();
        assert_eq!(classify("plain text\n", &parsed), FenceState::default());
    }

    #[test]
    fn nested_fences_open_and_close() {
        let mut tracker = FenceBoundaryTracker::new();
        assert_eq!(step(&mut tracker, "1. Install:\n"), FenceTransition::Unchanged);
        assert!(matches!(
            step(&mut tracker, "1. Install:\n   ```sh\n"),
            FenceTransition::Opened { .. }
        ));
        assert!(tracker.in_fence());
        assert!(matches!(
            step(&mut tracker, "1. Install:\n   ```sh\n   ls\n   ```\n"),
            FenceTransition::Closed { .. }
        ));
        assert!(!tracker.in_fence());

        let mut tracker = FenceBoundaryTracker::new();
        assert!(matches!(
            step(&mut tracker, "> ```sh\n"),
            FenceTransition::Opened { .. }
        ));
        assert!(tracker.in_fence());
    }

    #[test]
    fn fence_ended_by_its_list_item_is_not_a_close() {
        let mut tracker = FenceBoundaryTracker::new();
        step(&mut tracker, "- a\n  ```sh\n  ls\n");
        assert!(tracker.in_fence());
        assert_eq!(
            step(&mut tracker, "- a\n  ```sh\n  ls\nafter\n"),
            FenceTransition::Unchanged
        );
        assert!(!tracker.in_fence());
    }

    #[test]
    fn open_then_close() {
        let mut tracker = FenceBoundaryTracker::new();
        assert_eq!(
            step(&mut tracker, "intro\n```py\n"),
            FenceTransition::Opened { offset: 6 }
        );
        assert!(tracker.in_fence());
        assert_eq!(
            step(&mut tracker, "intro\n```py\nx = 1\n"),
            FenceTransition::Unchanged
        );
        assert_eq!(
            step(&mut tracker, "intro\n```py\nx = 1\n```\n"),
            FenceTransition::Closed { offset: 18 }
        );
        assert!(!tracker.in_fence());
    }

    #[test]
    fn unterminated_close_is_not_yet_a_close() {
        let mut tracker = FenceBoundaryTracker::new();
        step(&mut tracker, "```py\nx\n");
        assert_eq!(step(&mut tracker, "```py\nx\n```"), FenceTransition::Unchanged);
        assert!(tracker.in_fence());
    }

    #[test]
    fn close_seen_mid_line_is_reported_at_line_end() {
        let mut tracker = FenceBoundaryTracker::new();
        step(&mut tracker, "```\nplain\n");
        assert_eq!(step(&mut tracker, "```\nplain\n``"), FenceTransition::Unchanged);
        assert_eq!(step(&mut tracker, "```\nplain\n```"), FenceTransition::Unchanged);
        assert_eq!(
            step(&mut tracker, "```\nplain\n```\n"),
            FenceTransition::Closed { offset: 10 }
        );
    }

    #[test]
    fn inline_marker_does_not_open() {
        let mut tracker = FenceBoundaryTracker::new();
        assert_eq!(
            step(&mut tracker, "call ```x``` inline\n"),
            FenceTransition::Unchanged
        );
        assert_eq!(tracker.state().offset, Some(9));
        assert!(!tracker.in_fence());
    }

    #[test]
    fn false_fence_is_not_a_close() {
        let mut tracker = FenceBoundaryTracker::new();
        assert_eq!(
            step(&mut tracker, "```foo"),
            FenceTransition::Opened { offset: 0 }
        );
        assert_eq!(
            step(&mut tracker, "```foo`bar\n"),
            FenceTransition::Unchanged
        );
        assert!(!tracker.in_fence());
    }

    #[test]
    fn tilde_fences_are_ignored() {
        let mut tracker = FenceBoundaryTracker::new();
        assert_eq!(step(&mut tracker, "~~~\ncode\n"), FenceTransition::Unchanged);
        assert!(!tracker.in_fence());
    }

    #[test]
    fn rebase_shifts_offset() {
        let mut tracker = FenceBoundaryTracker::new();
        step(&mut tracker, "intro\n```py\n");
        tracker.rebase(6);
        assert_eq!(tracker.state().offset, Some(0));
        assert_eq!(tracker.state().start, Some(0));
        assert!(tracker.in_fence());
        assert_eq!(step(&mut tracker, "```py\nx\n"), FenceTransition::Unchanged);
        tracker.reset();
        assert_eq!(tracker.state(), FenceState::default());
    }
}
