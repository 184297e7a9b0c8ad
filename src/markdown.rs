//! Buffered markdown parsing.
//!
//! The stream buffer is re-parsed from scratch on every update with `pulldown-cmark`.  A full
//! CommonMark parser already treats a truncated document as ending at the truncation point, so
//! the result is always a best-effort list of top-level blocks.  What the parser cannot tell us
//! is whether a fenced code block was closed by a marker that actually arrived, so every fenced
//! block, at any depth, is re-checked against the raw buffer and reported as open or closed.

use std::error;
use std::fmt;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};

use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag, TagEnd};

/// Characters that may precede a fence marker on its line inside quotes and list items.
const CONTAINER_PREFIX: [char; 3] = [' ', '\t', '>'];

/// A buffer that could not be parsed as markdown and must be shown as plain text.
#[derive(Clone, Debug, PartialEq)]
pub struct ParseDegradation {
    /// Why the buffer was rejected.
    pub message: String,
    /// The block structure of the buffer with its offending characters masked, when the parser
    /// could produce one.  Fence tracking keeps working from it while the text is shown plain.
    pub structure: Option<ParseResult>,
}

impl ParseDegradation {
    /// Creates a new degradation with the given reason.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            structure: None,
        }
    }
}

impl fmt::Display for ParseDegradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl error::Error for ParseDegradation {}

/// The contents of a fenced code block as seen in the current buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeBlock {
    /// First word of the info string; empty when none was given.
    pub language: String,
    /// Raw content between the fences, with container prefixes removed.
    pub content: String,
    /// The fence character, either a backtick or a tilde.
    pub fence: char,
    /// True once a closing marker, including its line ending, is present in the buffer.
    pub closed: bool,
}

impl CodeBlock {
    /// The code without the trailing line ending(s).
    pub fn code(&self) -> &str {
        self.content.trim_end_matches(['\n', '\r'])
    }

    /// True for triple-backtick fences.
    pub fn is_backtick(&self) -> bool {
        self.fence == '`'
    }
}

/// A fenced code block at any nesting depth.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fence {
    /// Index of the top-level block that contains the fence.
    pub block: usize,
    /// Position of the fence among the fences of its top-level block.
    pub ordinal: usize,
    /// Number of enclosing containers (quotes, lists, items); zero at the top level.
    pub depth: usize,
    /// Byte range of the fence in the buffer.
    pub range: Range<usize>,
    /// What the fence holds.
    pub code: CodeBlock,
    /// True when nothing but whitespace follows the fence, so more text may still extend it.
    pub trailing: bool,
}

impl Fence {
    /// True while the fence may still receive content.
    pub fn is_open(&self) -> bool {
        !self.code.closed && self.trailing
    }

    /// True once the fence can no longer change: its closing marker arrived, or the container
    /// around it ended.
    pub fn is_complete(&self) -> bool {
        !self.is_open()
    }

    /// True for fences inside a quote or list.
    pub fn is_nested(&self) -> bool {
        self.depth > 0
    }
}

/// The kind of a top-level block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockKind {
    /// A paragraph of inline content.
    Paragraph,
    /// An ATX or setext heading.
    Heading(HeadingLevel),
    /// A fenced code block.
    FencedCode(CodeBlock),
    /// An indented code block.
    IndentedCode,
    /// A blockquote, including everything nested in it.
    BlockQuote,
    /// An ordered or unordered list.
    List,
    /// A thematic break.
    Rule,
    /// A raw HTML block.
    Html,
    /// Anything else the parser reports at the top level.
    Other,
}

/// One top-level block and the parser events that make it up.
#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    /// What kind of block this is.
    pub kind: BlockKind,
    /// Byte range of the block in the parsed buffer.
    pub range: Range<usize>,
    /// Every parser event from the block's start to its end, inclusive.
    pub events: Vec<Event<'static>>,
}

impl Block {
    /// The fenced code block, if this block is one.
    pub fn code_block(&self) -> Option<&CodeBlock> {
        match &self.kind {
            BlockKind::FencedCode(code) => Some(code),
            _ => None,
        }
    }
}

/// The ordered top-level blocks of a buffer, plus every fenced code block inside them.
///
/// Produced fresh by [`parse`] and never mutated afterwards.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParseResult {
    blocks: Vec<Block>,
    fences: Vec<Fence>,
}

impl ParseResult {
    /// Returns the blocks in source order.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Returns the fenced code blocks in source order, nested ones included.
    pub fn fences(&self) -> &[Fence] {
        &self.fences
    }

    /// Returns true when the buffer held no blocks.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Returns the trailing block, if any.
    pub fn last(&self) -> Option<&Block> {
        self.blocks.last()
    }

    /// Returns a result holding only the first `count` blocks and their fences.
    pub fn head(&self, count: usize) -> ParseResult {
        ParseResult {
            blocks: self.blocks.iter().take(count).cloned().collect(),
            fences: self
                .fences
                .iter()
                .filter(|fence| fence.block < count)
                .cloned()
                .collect(),
        }
    }

    /// Returns the fence the buffer ends inside of, at whatever depth it is nested.
    pub fn open_fence(&self) -> Option<&Fence> {
        self.fences.last().filter(|fence| fence.is_open())
    }

    /// Returns the last fence whose closing marker has arrived.
    pub fn last_closed_fence(&self) -> Option<&Fence> {
        self.fences.iter().rev().find(|fence| fence.code.closed)
    }
}

/// Parses `buffer` into its top-level blocks.
///
/// Buffers containing raw control characters (other than line endings and tabs) are rejected so
/// that they are displayed literally instead of being fed to the terminal; the rejection still
/// carries the structure of the buffer with those characters masked.  A parser panic is also
/// reported as a degradation rather than unwinding into the caller.
pub fn parse(buffer: &str) -> Result<ParseResult, ParseDegradation> {
    let Some(ch) = buffer.chars().find(|ch| is_disallowed_control(*ch)) else {
        return guarded(buffer, buffer)
            .ok_or_else(|| ParseDegradation::new("markdown parser panicked"));
    };
    let masked = mask_controls(buffer);
    Err(ParseDegradation {
        message: format!("buffer contains control character U+{:04X}", ch as u32),
        structure: guarded(buffer, &masked),
    })
}

fn guarded(source: &str, text: &str) -> Option<ParseResult> {
    panic::catch_unwind(AssertUnwindSafe(|| parse_blocks(source, text))).ok()
}

fn is_disallowed_control(ch: char) -> bool {
    ch.is_control() && !matches!(ch, '\n' | '\r' | '\t')
}

/// Replaces control characters with inert ones of the same encoded length, so byte offsets into
/// the masked text are byte offsets into the original.
fn mask_controls(buffer: &str) -> String {
    buffer
        .chars()
        .map(|ch| match ch {
            ch if !is_disallowed_control(ch) => ch,
            ch if ch.len_utf8() == 1 => '?',
            _ => '\u{bf}',
        })
        .collect()
}

fn options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    options
}

/// Parses `text`, taking code content from `source`, which has the same layout.
fn parse_blocks(source: &str, text: &str) -> ParseResult {
    let mut blocks = Vec::new();
    let mut fences: Vec<Fence> = Vec::new();
    let mut current: Option<Block> = None;
    let mut reading: Option<(usize, usize)> = None;
    let mut depth = 0usize;

    for (event, range) in Parser::new_ext(text, options()).into_offset_iter() {
        match &event {
            Event::Start(tag) => {
                if depth == 0 {
                    current = Some(Block {
                        kind: kind_of(tag),
                        range: range.clone(),
                        events: Vec::new(),
                    });
                }
                if let Tag::CodeBlock(CodeBlockKind::Fenced(info)) = tag {
                    let block = blocks.len();
                    let ordinal = fences.iter().filter(|fence| fence.block == block).count();
                    let opening_end = text[range.clone()]
                        .find('\n')
                        .map_or(range.end, |index| range.start + index + 1);
                    reading = Some((fences.len(), opening_end));
                    fences.push(Fence {
                        block,
                        ordinal,
                        depth,
                        range: range.clone(),
                        code: CodeBlock {
                            language: info.split_whitespace().next().unwrap_or_default().to_string(),
                            content: String::new(),
                            fence: fence_char(text, &range),
                            closed: false,
                        },
                        trailing: false,
                    });
                }
                depth += 1;
            }
            Event::End(tag) => {
                depth = depth.saturating_sub(1);
                if *tag == TagEnd::CodeBlock
                    && let Some((index, content_end)) = reading.take()
                {
                    let fence = &mut fences[index];
                    fence.code.closed =
                        fence_is_closed(text, &fence.range, content_end, fence.code.fence);
                }
            }
            Event::Text(chunk) => {
                if let Some((index, content_end)) = reading.as_mut() {
                    let raw = source
                        .get(range.clone())
                        .filter(|_| text.get(range.clone()) == Some(&**chunk))
                        .unwrap_or(&**chunk);
                    fences[*index].code.content.push_str(raw);
                    *content_end = (*content_end).max(range.end);
                }
            }
            _ => {}
        }
        let closes_block = matches!(event, Event::End(_)) && depth == 0;
        match current.as_mut() {
            Some(block) => block.events.push(event.into_static()),
            None => {
                let kind = match event {
                    Event::Rule => BlockKind::Rule,
                    Event::Html(_) => BlockKind::Html,
                    _ => BlockKind::Other,
                };
                blocks.push(Block {
                    kind,
                    range,
                    events: vec![event.into_static()],
                });
                continue;
            }
        }
        if closes_block && let Some(block) = current.take() {
            blocks.push(block);
        }
    }
    if let Some(block) = current.take() {
        blocks.push(block);
    }

    for fence in &mut fences {
        let rest = text.get(fence.range.end..).unwrap_or_default();
        fence.trailing = rest
            .trim_matches(|ch: char| ch.is_whitespace() || ch == '>')
            .is_empty();
        if fence.depth == 0
            && let Some(block) = blocks.get_mut(fence.block)
        {
            block.kind = BlockKind::FencedCode(fence.code.clone());
        }
    }

    ParseResult { blocks, fences }
}

fn kind_of(tag: &Tag<'_>) -> BlockKind {
    match tag {
        Tag::Paragraph => BlockKind::Paragraph,
        Tag::Heading { level, .. } => BlockKind::Heading(*level),
        Tag::CodeBlock(CodeBlockKind::Fenced(_)) => BlockKind::FencedCode(CodeBlock {
            language: String::new(),
            content: String::new(),
            fence: '`',
            closed: false,
        }),
        Tag::CodeBlock(CodeBlockKind::Indented) => BlockKind::IndentedCode,
        Tag::BlockQuote(_) => BlockKind::BlockQuote,
        Tag::List(_) => BlockKind::List,
        Tag::HtmlBlock => BlockKind::Html,
        _ => BlockKind::Other,
    }
}

fn fence_char(text: &str, range: &Range<usize>) -> char {
    text[range.clone()]
        .trim_start_matches(CONTAINER_PREFIX)
        .chars()
        .next()
        .unwrap_or('`')
}

/// A fence is closed when a line after its content is a run of at least as many fence
/// characters as the opening marker and that line has been terminated.  An unterminated
/// `` ``` `` at the end of the buffer may still grow into content (for example `` ```js ``), so
/// it does not count yet.
fn fence_is_closed(text: &str, range: &Range<usize>, content_end: usize, fence: char) -> bool {
    let opening = text[range.clone()].trim_start_matches(CONTAINER_PREFIX);
    let fence_len = opening.chars().take_while(|ch| *ch == fence).count();
    if fence_len < 3 {
        return false;
    }
    let mut offset = content_end.clamp(range.start, range.end);
    for line in text[offset..range.end].split_inclusive('\n') {
        offset += line.len();
        let marker = line
            .trim_matches(|ch: char| CONTAINER_PREFIX.contains(&ch) || ch == '\r' || ch == '\n');
        if marker.chars().count() >= fence_len && marker.chars().all(|ch| ch == fence) {
            return line.ends_with('\n') || text[offset..].starts_with(['\n', '\r']);
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(result: &ParseResult) -> Vec<BlockKind> {
        result.blocks().iter().map(|b| b.kind.clone()).collect()
    }

    #[test]
    fn top_level_blocks_in_order() {
        let result = parse("# Title\n\nSome *text*.\n\n- one\n- two\n\n> quoted\n").unwrap();
        assert_eq!(
            kinds(&result),
            vec![
                BlockKind::Heading(HeadingLevel::H1),
                BlockKind::Paragraph,
                BlockKind::List,
                BlockKind::BlockQuote,
            ]
        );
    }

    #[test]
    fn unterminated_fence_is_open() {
        let result = parse("```python\nprint(1)\n").unwrap();
        let fence = result.open_fence().expect("open fence");
        assert_eq!(fence.code.language, "python");
        assert_eq!(fence.code.code(), "print(1)");
        assert!(!fence.code.closed);
        assert!(!fence.is_nested());
    }

    #[test]
    fn closing_marker_needs_line_ending() {
        let result = parse("```js\nconsole.log(1)\n```").unwrap();
        assert!(result.open_fence().is_some());

        let result = parse("```js\nconsole.log(1)\n```\n").unwrap();
        assert!(result.open_fence().is_none());
        let fence = result.last_closed_fence().expect("closed fence");
        assert_eq!(fence.block, 0);
        assert_eq!(fence.code.language, "js");
        assert_eq!(fence.code.code(), "console.log(1)");
        assert_eq!(
            result.blocks()[0].code_block().map(|code| code.closed),
            Some(true)
        );
    }

    #[test]
    fn longer_fence_needs_longer_close() {
        let result = parse("````md\n```js\nx\n```\n").unwrap();
        let code = &result.open_fence().unwrap().code;
        assert_eq!(code.language, "md");
        assert!(code.content.contains("```js"));

        let result = parse("````md\n```js\nx\n```\n````\n").unwrap();
        assert!(result.open_fence().is_none());
    }

    #[test]
    fn info_string_keeps_first_word() {
        let result = parse("```rust title=main.rs\nfn main() {}\n```\n").unwrap();
        let code = &result.last_closed_fence().unwrap().code;
        assert_eq!(code.language, "rust");
        assert!(code.is_backtick());
    }

    #[test]
    fn tilde_fences_are_reported() {
        let result = parse("~~~\nplain\n").unwrap();
        let code = &result.open_fence().unwrap().code;
        assert_eq!(code.fence, '~');
        assert!(!code.is_backtick());
    }

    #[test]
    fn inline_backticks_are_not_a_fence() {
        let result = parse("use ```x``` inline\n").unwrap();
        assert_eq!(kinds(&result), vec![BlockKind::Paragraph]);
        assert!(result.open_fence().is_none());
        assert!(result.fences().is_empty());
    }

    #[test]
    fn fences_in_list_items_are_found() {
        let text = "1. Install:\n   ```sh\n   pip install x\n   ```\n2. Run:\n   ```sh\n   x --go\n";
        let result = parse(text).unwrap();
        assert_eq!(kinds(&result), vec![BlockKind::List]);
        let fences = result.fences();
        assert_eq!(fences.len(), 2);
        assert!(fences.iter().all(|fence| fence.is_nested() && fence.block == 0));
        assert_eq!(fences[0].ordinal, 0);
        assert_eq!(fences[0].code.code(), "pip install x");
        assert!(fences[0].code.closed);
        assert_eq!(fences[1].ordinal, 1);
        assert_eq!(fences[1].code.code(), "x --go");
        assert!(fences[1].is_open());
        assert_eq!(result.open_fence(), Some(&fences[1]));
    }

    #[test]
    fn fences_in_quotes_are_found() {
        let result = parse("> ```sh\n> rm -rf build\n> ```\n").unwrap();
        let fence = result.last_closed_fence().expect("closed fence");
        assert!(fence.is_nested());
        assert_eq!(fence.code.language, "sh");
        assert_eq!(fence.code.code(), "rm -rf build");
        assert!(result.open_fence().is_none());

        let result = parse("> ```sh\n> ls\n").unwrap();
        assert!(result.open_fence().is_some());
    }

    #[test]
    fn fence_ended_by_its_container_is_complete() {
        let result = parse("- a\n  ```sh\n  ls\nafter\n").unwrap();
        let fence = &result.fences()[0];
        assert!(!fence.code.closed);
        assert!(fence.is_complete());
        assert!(result.open_fence().is_none());
    }

    #[test]
    fn control_characters_degrade() {
        let err = parse("bad \u{1b}[31m escape").unwrap_err();
        assert!(err.message.contains("U+001B"));
        assert!(parse("tabs\tand\r\nnewlines are fine").is_ok());
    }

    #[test]
    fn degraded_buffers_keep_their_fences() {
        let err = parse("```sh\nprintf 'bell\u{7}'\n```\n").unwrap_err();
        let structure = err.structure.expect("structure");
        let fence = structure.last_closed_fence().expect("closed fence");
        assert_eq!(fence.code.code(), "printf 'bell\u{7}'");

        let err = parse("```sh\necho \u{85}\n").unwrap_err();
        let structure = err.structure.expect("structure");
        assert_eq!(structure.open_fence().unwrap().code.code(), "echo \u{85}");
    }

    #[test]
    fn parsing_is_pure() {
        let text = "para\n\n```sh\nls\n";
        assert_eq!(parse(text).unwrap(), parse(text).unwrap());
    }

    #[test]
    fn empty_buffer_has_no_blocks() {
        assert!(parse("").unwrap().is_empty());
    }
}
