//! The stream renderer.
//!
//! [`StreamRenderer`] accumulates text deltas into a buffer, re-parses the buffer at every line
//! boundary, and keeps one live display region up to date.  Regions are committed at paragraph
//! boundaries and around fenced code, which bounds the size of the buffer that gets re-parsed.
//! Every backtick fence becomes a [`Snippet`] once it closes, wherever it is nested.

use std::sync::Arc;
use std::time::Instant;

use crate::config::RenderConfig;
use crate::error::Result;
use crate::fence::{FenceBoundaryTracker, FenceTransition};
use crate::format::{Frame, Highlighter, MarkdownFormatter, SnippetMarker};
use crate::markdown::{self, ParseDegradation, ParseResult};
use crate::normalize::{Boundary, ChunkNormalizer, Piece, ReasoningQuoter};
use crate::observability::{
    RENDER_DEGRADATIONS, RENDER_REGIONS_COMMITTED, RENDER_REPARSE_DURATION, RENDER_REPARSES,
    RENDER_SINK_ERRORS, SNIPPETS_REGISTERED, SNIPPETS_TRUNCATED,
};
use crate::replay::TextDelta;
use crate::sink::DisplaySink;
use crate::snippet::{Snippet, SnippetRegistry};

/// One parse of the buffer as the renderer sees it.
struct Reparse {
    parsed: ParseResult,
    /// Shown verbatim because the buffer degraded.
    plain: bool,
    /// No structure at all could be recovered.
    blind: bool,
}

/// Splits a fence that starts at `start` into its language and the code after the opening line.
fn raw_fence(buffer: &str, start: usize) -> (String, String) {
    let rest = buffer.get(start..).unwrap_or_default();
    let (opening, code) = rest.split_once('\n').unwrap_or((rest, ""));
    let language = opening
        .trim_start_matches([' ', '\t', '>'])
        .trim_start_matches('`')
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string();
    (language, code.trim_end_matches(['\n', '\r']).to_string())
}

/// Renders a stream of markdown deltas into a display sink.
///
/// The renderer is synchronous and must be driven from a single task: call
/// [`update`](Self::update) for every delta and [`finish`](Self::finish) once the stream ends or
/// is cancelled.  Neither ever fails; parse problems degrade to plain text and sink errors are
/// logged.
pub struct StreamRenderer<S: DisplaySink> {
    config: RenderConfig,
    sink: S,
    highlighter: Option<Arc<Highlighter>>,
    buffer: String,
    normalizer: ChunkNormalizer,
    quoter: ReasoningQuoter,
    fences: FenceBoundaryTracker,
    registry: SnippetRegistry,
    /// Start offsets of the fences in the buffer that already have a snippet, with its id.
    marked: Vec<(usize, usize)>,
    reasoning: Option<bool>,
    separate: bool,
    rendered: bool,
    committed_any: bool,
    finished: bool,
}

impl<S: DisplaySink> StreamRenderer<S> {
    /// Creates a renderer and opens its first region.
    ///
    /// Loads a highlighter for `config.code_theme` when color is enabled.  Fails with
    /// `DisplayUnavailable` when the sink cannot host a live region; the caller should retry with
    /// a [`PlainSink`](crate::PlainSink).
    pub fn new(config: RenderConfig, sink: S) -> Result<Self> {
        let highlighter = config
            .use_color
            .then(|| Highlighter::shared(&config.code_theme));
        Self::with_highlighter(config, sink, highlighter)
    }

    /// Creates a renderer that shares an already loaded highlighter.
    pub fn with_highlighter(
        config: RenderConfig,
        mut sink: S,
        highlighter: Option<Arc<Highlighter>>,
    ) -> Result<Self> {
        sink.open()?;
        Ok(Self {
            registry: SnippetRegistry::new(config.snippet_start_offset),
            config,
            sink,
            highlighter,
            buffer: String::new(),
            normalizer: ChunkNormalizer::new(),
            quoter: ReasoningQuoter::new(),
            fences: FenceBoundaryTracker::new(),
            marked: Vec::new(),
            reasoning: None,
            separate: false,
            rendered: false,
            committed_any: false,
            finished: false,
        })
    }

    /// Feeds one chunk of text.
    ///
    /// Reasoning text is quoted line by line before parsing so it renders as a blockquote.  A
    /// switch between reasoning and answer text commits the current region first.
    pub fn update(&mut self, chunk: &str, is_reasoning: bool) {
        if self.finished {
            tracing::warn!("update after finish ignored");
            return;
        }
        if self.reasoning.is_some_and(|previous| previous != is_reasoning) {
            self.switch_mode();
        }
        self.reasoning = Some(is_reasoning);

        let text = if is_reasoning {
            self.quoter.quote(chunk)
        } else {
            chunk.to_string()
        };
        let mut pending = false;
        for piece in self.normalizer.pieces(&text) {
            match piece {
                Piece::Char(ch) => {
                    self.buffer.push(ch);
                    pending = true;
                }
                Piece::Break(boundary) => {
                    if self.buffer.is_empty() {
                        continue;
                    }
                    self.buffer.push('\n');
                    pending = false;
                    self.step(Some(boundary));
                }
            }
        }
        if pending {
            self.step(None);
        }
    }

    /// Feeds one [`TextDelta`].
    pub fn apply(&mut self, delta: &TextDelta) {
        self.update(&delta.content, delta.is_reasoning);
    }

    /// Ends the stream.
    ///
    /// A fence that is still open becomes a truncated snippet holding whatever code arrived.
    /// The last region is committed and further updates are ignored.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.flush_region();
        self.finished = true;
        tracing::debug!(snippets = self.registry.len(), "stream finished");
    }

    /// Every snippet registered so far, oldest first.
    pub fn snippets(&self) -> &[Snippet] {
        self.registry.all()
    }

    /// The id the next snippet will receive.
    pub fn next_snippet_id(&self) -> usize {
        self.registry.next_id()
    }

    /// The text of the live region.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// True while the live region ends inside an open code fence.
    pub fn in_fence(&self) -> bool {
        self.fences.in_fence()
    }

    /// True once [`finish`](Self::finish) has run.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// The configuration this renderer was built with.
    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Returns a reference to the sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Consumes the renderer, returning its sink and snippets.
    ///
    /// Call [`finish`](Self::finish) first; an unfinished region is not committed.
    pub fn into_parts(self) -> (S, Vec<Snippet>) {
        (self.sink, self.registry.into_snippets())
    }

    fn switch_mode(&mut self) {
        if !self.buffer.trim().is_empty() {
            self.flush_region();
            self.open_region();
        } else {
            self.buffer.clear();
            self.fences.reset();
            self.marked.clear();
        }
        self.separate = self.committed_any;
        self.normalizer = ChunkNormalizer::new();
        self.quoter.reset();
    }

    /// Renders and commits whatever the buffer holds, closing an open fence as truncated.
    fn flush_region(&mut self) {
        if !self.buffer.is_empty() && !self.buffer.ends_with('\n') {
            self.buffer.push('\n');
            self.step(Some(Boundary::Line));
        }
        if !self.buffer.is_empty() {
            let view = self.reparse();
            let before = self.marked.len();
            self.register_complete(&view.parsed);
            let open = view
                .parsed
                .open_fence()
                .filter(|fence| fence.code.is_backtick())
                .map(|fence| {
                    let code = &fence.code;
                    (fence.range.start, code.language.clone(), code.code().to_string())
                });
            let open = match (open, self.fences.state().start) {
                (Some(open), _) => Some(open),
                (None, Some(start)) if view.blind => {
                    let (language, code) = raw_fence(&self.buffer, start);
                    Some((start, language, code))
                }
                _ => None,
            };
            if let Some((start, language, code)) = open {
                let id = self.registry.register_truncated(language.clone(), code);
                self.marked.push((start, id));
                SNIPPETS_TRUNCATED.click();
                tracing::warn!(id, language = %language, "truncated fence");
            }
            if self.marked.len() != before {
                let frame = self.frame(&view.parsed, view.plain, self.buffer.len());
                self.render_frame(&frame);
            }
        }
        self.commit_region();
        self.buffer.clear();
        self.fences.reset();
        self.marked.clear();
    }

    /// Re-renders the live region and, at a line boundary, acts on fence transitions and commits.
    ///
    /// Fence transitions and snippet registration happen only at line boundaries, where the
    /// buffer is the same no matter how the text was chunked.  Between boundaries the region is
    /// just redrawn.
    fn step(&mut self, boundary: Option<Boundary>) {
        let Some(boundary) = boundary else {
            let view = self.reparse();
            let frame = self.frame(&view.parsed, view.plain, self.buffer.len());
            self.render_frame(&frame);
            return;
        };
        loop {
            let view = self.reparse();
            self.register_complete(&view.parsed);
            let transition = if view.blind {
                FenceTransition::Unchanged
            } else {
                self.fences.on_reparse(&self.buffer, &view.parsed)
            };
            match transition {
                FenceTransition::Closed { offset } => {
                    tracing::debug!(offset, "fence closed");
                    let closed = view.parsed.fences().iter().rev().find(|fence| {
                        fence.code.is_backtick()
                            && fence.code.closed
                            && fence.range.contains(&offset)
                    });
                    match closed {
                        Some(fence) if !fence.is_nested() => {
                            if self.close_fence(&view, fence.block) {
                                continue;
                            }
                        }
                        _ => self.show(&view, boundary),
                    }
                }
                FenceTransition::Opened { offset } => {
                    tracing::debug!(offset, "fence opened");
                    self.open_fence(&view, offset);
                }
                FenceTransition::Unchanged => self.show(&view, boundary),
            }
            return;
        }
    }

    fn show(&mut self, view: &Reparse, boundary: Boundary) {
        let frame = self.frame(&view.parsed, view.plain, self.buffer.len());
        self.render_frame(&frame);
        self.maybe_commit(boundary, &view.parsed);
    }

    /// Registers every backtick fence that can no longer change and has no snippet yet.
    fn register_complete(&mut self, parsed: &ParseResult) {
        for fence in parsed.fences() {
            if !fence.code.is_backtick()
                || !fence.is_complete()
                || self.marked.iter().any(|(start, _)| *start == fence.range.start)
            {
                continue;
            }
            let id = self
                .registry
                .register(fence.code.language.clone(), fence.code.code());
            self.marked.push((fence.range.start, id));
            SNIPPETS_REGISTERED.click();
            tracing::debug!(
                id,
                language = %fence.code.language,
                depth = fence.depth,
                "snippet registered"
            );
        }
    }

    /// Commits everything through the top-level fence at `index` as one region.
    ///
    /// Returns true when text after the closing marker is left to render.
    fn close_fence(&mut self, view: &Reparse, index: usize) -> bool {
        let end = view.parsed.blocks()[index].range.end.min(self.buffer.len());
        let frame = self.frame(&view.parsed.head(index + 1), view.plain, end);
        self.render_frame(&frame);
        self.commit_region();

        let tail = self.buffer[end..]
            .trim_start_matches(['\n', '\r'])
            .to_string();
        self.buffer = tail;
        self.fences.reset();
        self.marked.clear();
        self.open_region();
        !self.buffer.is_empty()
    }

    /// Moves everything before the block holding the new fence into a committed region.
    fn open_fence(&mut self, view: &Reparse, start: usize) {
        let block = view
            .parsed
            .open_fence()
            .filter(|fence| fence.range.start == start)
            .map_or(0, |fence| fence.block);
        let block_start = view
            .parsed
            .blocks()
            .get(block)
            .map_or(start, |block| block.range.start)
            .min(self.buffer.len());
        let cut = self.buffer[..block_start]
            .rfind('\n')
            .map_or(0, |index| index + 1);
        if cut > 0 {
            if !self.buffer[..cut].trim().is_empty() {
                let frame = self.frame(&view.parsed.head(block), view.plain, cut);
                self.render_frame(&frame);
                self.commit_region();
                self.open_region();
            }
            self.buffer.drain(..cut);
            self.fences.rebase(cut);
            self.marked.retain(|(start, _)| *start >= cut);
            for (start, _) in &mut self.marked {
                *start -= cut;
            }
        }
        let view = self.reparse();
        let frame = self.frame(&view.parsed, view.plain, self.buffer.len());
        self.render_frame(&frame);
    }

    /// Commits the region at a paragraph boundary, or at any line boundary of reasoning text.
    fn maybe_commit(&mut self, boundary: Boundary, parsed: &ParseResult) {
        let reasoning = self.reasoning.unwrap_or(false);
        let at_boundary = boundary == Boundary::Paragraph || reasoning;
        if !at_boundary
            || self.fences.in_fence()
            || parsed.open_fence().is_some()
            || self.buffer.trim().is_empty()
        {
            return;
        }
        self.commit_region();
        if reasoning {
            self.separate = false;
        }
        self.buffer.clear();
        self.fences.reset();
        self.marked.clear();
        self.open_region();
    }

    /// Parses the buffer.  A degraded buffer is shown as plain text but keeps whatever structure
    /// its masked copy had, so fences are still tracked through it.
    fn reparse(&self) -> Reparse {
        let start = Instant::now();
        let parsed = markdown::parse(&self.buffer);
        RENDER_REPARSES.click();
        RENDER_REPARSE_DURATION.add(start.elapsed().as_secs_f64());
        match parsed {
            Ok(parsed) => Reparse {
                parsed,
                plain: false,
                blind: false,
            },
            Err(ParseDegradation { message, structure }) => {
                RENDER_DEGRADATIONS.click();
                tracing::warn!(error = %message, "rendering buffer as plain text");
                Reparse {
                    blind: structure.is_none(),
                    parsed: structure.unwrap_or_default(),
                    plain: true,
                }
            }
        }
    }

    /// The frame for the first `end` bytes of the buffer, whose structure is `parsed`.
    fn frame(&self, parsed: &ParseResult, plain: bool, end: usize) -> Frame {
        let formatter = MarkdownFormatter::new(
            &self.config.markdown_theme,
            self.highlighter.as_deref(),
            self.config.width,
            self.config.use_color,
        );
        if plain {
            let mut frame = Frame::plain(&self.buffer[..end.min(self.buffer.len())]);
            for (start, id) in &self.marked {
                if *start < end {
                    frame.push(formatter.marker_line(*id));
                }
            }
            return frame;
        }
        let markers: Vec<SnippetMarker> = self
            .marked
            .iter()
            .filter_map(|(start, id)| {
                parsed
                    .fences()
                    .iter()
                    .find(|fence| fence.range.start == *start)
                    .map(|fence| SnippetMarker {
                        block: fence.block,
                        fence: fence.ordinal,
                        id: *id,
                    })
            })
            .collect();
        formatter.format(parsed, &markers)
    }

    /// Renders `frame`, preceded by a blank line when earlier regions need separating from it.
    fn render_frame(&mut self, frame: &Frame) {
        self.rendered = !frame.is_empty();
        let result = if self.separate && self.rendered {
            let mut lines = vec![String::new()];
            lines.extend(frame.lines().iter().cloned());
            self.sink.render(&Frame::new(lines))
        } else {
            self.sink.render(frame)
        };
        if let Err(err) = result {
            RENDER_SINK_ERRORS.click();
            tracing::warn!(error = %err, "render failed");
        }
    }

    fn commit_region(&mut self) {
        if std::mem::take(&mut self.rendered) {
            self.separate = true;
            self.committed_any = true;
        }
        match self.sink.commit() {
            Ok(()) => {
                RENDER_REGIONS_COMMITTED.click();
                tracing::debug!("region committed");
            }
            Err(err) => {
                RENDER_SINK_ERRORS.click();
                tracing::warn!(error = %err, "commit failed");
            }
        }
    }

    fn open_region(&mut self) {
        if let Err(err) = self.sink.open() {
            RENDER_SINK_ERRORS.click();
            tracing::warn!(error = %err, "open failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{PlainSink, RecordingSink, SinkEvent};

    fn config() -> RenderConfig {
        RenderConfig::new().without_color().with_width(40)
    }

    fn recorder() -> StreamRenderer<RecordingSink> {
        StreamRenderer::new(config(), RecordingSink::new()).unwrap()
    }

    fn output(chunks: &[&str]) -> String {
        let mut renderer = StreamRenderer::new(config(), PlainSink::new(Vec::new())).unwrap();
        for chunk in chunks {
            renderer.update(chunk, false);
        }
        renderer.finish();
        let (sink, _) = renderer.into_parts();
        String::from_utf8(sink.into_inner()).unwrap()
    }

    #[test]
    fn construction_opens_a_region() {
        let renderer = recorder();
        assert_eq!(renderer.sink().events(), &[SinkEvent::Open]);
        assert!(renderer.snippets().is_empty());
    }

    #[test]
    fn paragraphs_commit_separately() {
        let mut renderer = recorder();
        renderer.update("first\n\nsecond", false);
        assert_eq!(renderer.sink().committed_text(), vec!["first\n"]);
        assert_eq!(renderer.buffer(), "second");
        renderer.finish();
        assert_eq!(
            renderer.sink().committed_text(),
            vec!["first\n", "\nsecond\n"]
        );
    }

    #[test]
    fn text_without_newline_still_renders() {
        let mut renderer = recorder();
        renderer.update("partial", false);
        assert_eq!(
            renderer.sink().events().last(),
            Some(&SinkEvent::Render(Frame::new(vec!["partial".to_string()])))
        );
    }

    #[test]
    fn fence_gets_its_own_region() {
        let mut renderer = recorder();
        renderer.update("intro\n```sh\nls\n```\nafter", false);
        renderer.finish();
        assert_eq!(
            renderer.sink().committed_text(),
            vec![
                "intro\n".to_string(),
                format!("\n  ls\n{}[snippet 0]\n", " ".repeat(29)),
                "\nafter\n".to_string(),
            ]
        );
        assert_eq!(renderer.snippets().len(), 1);
        assert_eq!(renderer.snippets()[0].code, "ls");
        assert!(!renderer.snippets()[0].truncated);
    }

    #[test]
    fn closing_marker_at_stream_end_is_a_clean_close() {
        let mut renderer = recorder();
        renderer.update("```py\nprint(1)\n```", false);
        assert!(renderer.in_fence());
        renderer.finish();
        assert_eq!(renderer.snippets().len(), 1);
        assert!(!renderer.snippets()[0].truncated);
    }

    #[test]
    fn open_fence_at_finish_is_truncated() {
        let mut renderer = recorder();
        renderer.update("```python\nprint(1)\n", false);
        assert!(renderer.snippets().is_empty());
        renderer.finish();
        let snippets = renderer.snippets();
        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].language, "python");
        assert_eq!(snippets[0].code, "print(1)");
        assert!(snippets[0].truncated);
        assert!(renderer.is_finished());
    }

    #[test]
    fn reasoning_lines_commit_as_quotes() {
        let mut renderer = recorder();
        renderer.update("step one\nstep two", true);
        assert_eq!(renderer.buffer(), "> step two");
        renderer.update("\nanswer", false);
        renderer.finish();
        assert_eq!(
            renderer.sink().committed_text(),
            vec!["▌ step one\n", "▌ step two\n", "\nanswer\n"]
        );
    }

    #[test]
    fn control_characters_render_as_plain_text() {
        let mut renderer = recorder();
        renderer.update("bad \u{1b}[2J\n\nok", false);
        renderer.finish();
        assert_eq!(
            renderer.sink().committed_text(),
            vec!["bad \u{241b}[2J\n", "\nok\n"]
        );
    }

    #[test]
    fn fences_in_list_items_become_snippets() {
        let mut renderer = recorder();
        renderer.update(
            "1. Install:\n   ```sh\n   pip install x\n   ```\n2. Run:\n   ```sh\n   x --go\n   ```\n\nDone.\n",
            false,
        );
        renderer.finish();
        let codes: Vec<&str> = renderer.snippets().iter().map(|s| s.code.as_str()).collect();
        assert_eq!(codes, vec!["pip install x", "x --go"]);
        assert!(renderer.snippets().iter().all(|s| !s.truncated));
        let committed = renderer.sink().committed_text();
        assert_eq!(committed.len(), 2);
        assert!(committed[0].contains("[snippet 0]"));
        assert!(committed[0].contains("[snippet 1]"));
        assert_eq!(committed[1], "\nDone.\n");
    }

    #[test]
    fn fences_in_reasoning_become_snippets() {
        let mut renderer = recorder();
        renderer.update("try:\n```sh\nls\n```\n", true);
        renderer.finish();
        assert_eq!(renderer.snippets().len(), 1);
        assert_eq!(renderer.snippets()[0].language, "sh");
        assert_eq!(renderer.snippets()[0].code, "ls");
        let committed = renderer.sink().committed_text();
        assert_eq!(committed[0], "▌ try:\n");
        assert!(committed[1].contains("[snippet 0]"));
    }

    #[test]
    fn control_character_in_a_fence_still_closes_it() {
        let mut renderer = recorder();
        renderer.update("```sh\nprintf 'bell\u{7}'\n```\n\nafter\n", false);
        renderer.finish();
        assert_eq!(renderer.snippets().len(), 1);
        assert_eq!(renderer.snippets()[0].code, "printf 'bell\u{7}'");
        assert!(!renderer.snippets()[0].truncated);
        let committed = renderer.sink().committed_text();
        assert_eq!(committed.len(), 2);
        assert!(committed[0].contains("printf 'bell\u{2407}'"));
        assert!(committed[0].contains("[snippet 0]"));
        assert_eq!(committed[1], "\nafter\n");
    }

    #[test]
    fn control_character_in_an_open_fence_is_truncated_at_finish() {
        let mut renderer = recorder();
        renderer.update("```sh\nprintf 'bell\u{7}'\n", false);
        assert!(renderer.in_fence());
        renderer.finish();
        assert_eq!(renderer.snippets().len(), 1);
        assert_eq!(renderer.snippets()[0].language, "sh");
        assert_eq!(renderer.snippets()[0].code, "printf 'bell\u{7}'");
        assert!(renderer.snippets()[0].truncated);
    }

    #[test]
    fn c1_controls_are_escaped() {
        let mut renderer = recorder();
        renderer.update("a\u{85}b\u{9b}c\n", false);
        renderer.finish();
        assert_eq!(renderer.sink().committed_text(), vec!["a\\u{85}b\\u{9b}c\n"]);
    }

    #[test]
    fn marker_that_is_not_a_fence_commits_the_same_either_way() {
        let text = "intro\n```foo`bar\n";
        let mut whole = recorder();
        whole.update(text, false);
        whole.finish();
        let mut by_char = recorder();
        for ch in text.chars() {
            by_char.update(&ch.to_string(), false);
        }
        by_char.finish();
        assert_eq!(
            by_char.sink().committed_text(),
            whole.sink().committed_text()
        );
        assert_eq!(whole.sink().committed_text(), vec!["intro ```foo`bar\n"]);
        assert!(whole.snippets().is_empty());
    }

    #[test]
    fn updates_after_finish_are_ignored() {
        let mut renderer = recorder();
        renderer.update("a", false);
        renderer.finish();
        let events = renderer.sink().events().len();
        renderer.update("more", false);
        renderer.finish();
        assert_eq!(renderer.sink().events().len(), events);
    }

    #[test]
    fn blank_line_runs_do_not_create_empty_regions() {
        assert_eq!(output(&["a\n\n\n\n\nb"]), "a\n\nb\n");
    }

    #[test]
    fn tilde_fences_stay_in_one_region() {
        assert_eq!(output(&["~~~\nx\n\ny\n~~~\n"]), "  x\n\n  y\n");
    }
}
