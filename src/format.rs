//! Markdown-to-terminal formatting.
//!
//! A [`MarkdownFormatter`] walks the events of each top-level block and produces the lines of a
//! [`Frame`].  Fenced code is highlighted with `syntect`; everything else is styled from the
//! [`MarkdownTheme`].  With color disabled the output is plain text, which is what the tests and
//! piped output see.

use std::sync::Arc;

use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Tag, TagEnd};
use syntect::easy::HighlightLines;
use syntect::highlighting::{Theme, ThemeSet};
use syntect::parsing::SyntaxSet;
use syntect::util::{LinesWithEndings, as_24_bit_terminal_escaped};
use unicode_width::UnicodeWidthChar;

use crate::markdown::{Block, ParseResult};
use crate::theme::{MarkdownTheme, Style};

/// The syntect theme used when none is configured or the configured one is unknown.
pub const DEFAULT_CODE_THEME: &str = "base16-ocean.dark";

const RESET: &str = "\x1b[0m";
const QUOTE_BORDER: &str = "▌ ";
const BULLET: &str = "• ";
const CODE_INDENT: &str = "  ";

//////////////////////////////////////////////// Frame ////////////////////////////////////////////

/// The rendered lines of a display region, without line terminators.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Frame {
    lines: Vec<String>,
}

impl Frame {
    /// Creates a frame from rendered lines.
    pub fn new(lines: Vec<String>) -> Self {
        Self { lines }
    }

    /// Shows `text` verbatim, one frame line per source line.
    ///
    /// C0 controls other than tab become their Unicode control pictures and C1 controls are
    /// written as `\u{..}` escapes, so nothing in the text is interpreted by the terminal and
    /// nothing is dropped.
    pub fn plain(text: &str) -> Self {
        let text = text.trim_end_matches('\n');
        if text.is_empty() {
            return Self::default();
        }
        Self {
            lines: text
                .split('\n')
                .map(|line| control_pictures(line.strip_suffix('\r').unwrap_or(line)))
                .collect(),
        }
    }

    /// Returns the lines of the frame.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Returns true when the frame has no lines.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Appends a line.
    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    /// Returns the terminal rows the frame occupies at the given column count.
    pub fn rows(&self, columns: usize) -> usize {
        let columns = columns.max(1);
        self.lines
            .iter()
            .map(|line| visible_width(line).max(1).div_ceil(columns))
            .sum()
    }

    /// Joins the lines with newlines, including a final one.
    pub fn to_text(&self) -> String {
        let mut text = String::new();
        for line in &self.lines {
            text.push_str(line);
            text.push('\n');
        }
        text
    }
}

fn control_pictures(line: &str) -> String {
    let mut shown = String::with_capacity(line.len());
    for ch in line.chars() {
        match ch {
            '\t' => shown.push(ch),
            '\u{0}'..='\u{1f}' => shown.push(char::from_u32(0x2400 + ch as u32).unwrap_or(ch)),
            '\u{7f}' => shown.push('\u{2421}'),
            '\u{80}'..='\u{9f}' => shown.push_str(&format!("\\u{{{:x}}}", ch as u32)),
            _ => shown.push(ch),
        }
    }
    shown
}

/// Display width of `line`, ignoring ANSI escape sequences.
pub fn visible_width(line: &str) -> usize {
    let mut width = 0;
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\x1b' {
            if chars.peek() == Some(&'[') {
                chars.next();
                for c in chars.by_ref() {
                    if ('@'..='~').contains(&c) {
                        break;
                    }
                }
            }
            continue;
        }
        width += match ch {
            '\t' => 4,
            _ => ch.width().unwrap_or(0),
        };
    }
    width
}

///////////////////////////////////////////// Highlighter /////////////////////////////////////////

/// Syntax highlighting for fenced code.
///
/// Loading the syntax and theme sets is expensive, so one highlighter is built per process and
/// shared between renderers through an [`Arc`].
pub struct Highlighter {
    syntaxes: SyntaxSet,
    theme: Theme,
    theme_name: String,
}

impl Highlighter {
    /// Loads the default syntaxes and the named theme.
    ///
    /// Unknown theme names fall back to [`DEFAULT_CODE_THEME`].
    pub fn new(theme_name: &str) -> Self {
        let syntaxes = SyntaxSet::load_defaults_newlines();
        let mut themes = ThemeSet::load_defaults();
        let (theme, theme_name) = match themes.themes.remove(theme_name) {
            Some(theme) => (theme, theme_name.to_string()),
            None => {
                tracing::warn!(
                    theme = theme_name,
                    fallback = DEFAULT_CODE_THEME,
                    "unknown code theme"
                );
                (
                    themes
                        .themes
                        .remove(DEFAULT_CODE_THEME)
                        .unwrap_or_default(),
                    DEFAULT_CODE_THEME.to_string(),
                )
            }
        };
        Self {
            syntaxes,
            theme,
            theme_name,
        }
    }

    /// Creates a shareable highlighter.
    pub fn shared(theme_name: &str) -> Arc<Self> {
        Arc::new(Self::new(theme_name))
    }

    /// The name of the theme in use.
    pub fn theme_name(&self) -> &str {
        &self.theme_name
    }

    /// Returns true when `name` is one of the bundled themes.
    pub fn has_theme(name: &str) -> bool {
        ThemeSet::load_defaults().themes.contains_key(name)
    }

    /// Highlights `code` as `language`, one escaped line per source line.
    pub fn highlight(&self, code: &str, language: &str) -> Vec<String> {
        let syntax = self
            .syntaxes
            .find_syntax_by_token(language)
            .unwrap_or_else(|| self.syntaxes.find_syntax_plain_text());
        let mut lines = HighlightLines::new(syntax, &self.theme);
        let mut highlighted = Vec::new();
        for line in LinesWithEndings::from(code) {
            match lines.highlight_line(line, &self.syntaxes) {
                Ok(ranges) => {
                    let escaped = as_24_bit_terminal_escaped(&ranges, false);
                    highlighted.push(format!(
                        "{}{RESET}",
                        escaped.trim_end_matches(['\n', '\r'])
                    ));
                }
                Err(err) => {
                    tracing::debug!(language, error = %err, "highlighting failed");
                    highlighted.push(line.trim_end_matches(['\n', '\r']).to_string());
                }
            }
        }
        highlighted
    }
}

impl std::fmt::Debug for Highlighter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Highlighter")
            .field("theme_name", &self.theme_name)
            .finish_non_exhaustive()
    }
}

////////////////////////////////////////// MarkdownFormatter //////////////////////////////////////

/// A snippet id tag to draw under one fenced code block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SnippetMarker {
    /// Index of the top-level block holding the fence.
    pub block: usize,
    /// Position of the fence among the fences of that block.
    pub fence: usize,
    /// The snippet id to show.
    pub id: usize,
}

/// Turns parsed blocks into terminal lines.
#[derive(Clone, Copy, Debug)]
pub struct MarkdownFormatter<'a> {
    theme: &'a MarkdownTheme,
    highlighter: Option<&'a Highlighter>,
    width: usize,
    use_color: bool,
}

impl<'a> MarkdownFormatter<'a> {
    /// Creates a formatter.  Without a highlighter, code is shown unstyled.
    pub fn new(
        theme: &'a MarkdownTheme,
        highlighter: Option<&'a Highlighter>,
        width: usize,
        use_color: bool,
    ) -> Self {
        Self {
            theme,
            highlighter,
            width: width.max(1),
            use_color,
        }
    }

    /// Formats every block of `parsed`, separated by blank lines, with snippet tags under the
    /// marked fences.
    pub fn format(&self, parsed: &ParseResult, markers: &[SnippetMarker]) -> Frame {
        let mut frame = Frame::default();
        for (index, block) in parsed.blocks().iter().enumerate() {
            let marked: Vec<SnippetMarker> = markers
                .iter()
                .filter(|marker| marker.block == index)
                .copied()
                .collect();
            let lines = self.format_marked_block(block, &marked);
            if lines.is_empty() {
                continue;
            }
            if !frame.is_empty() {
                frame.push(String::new());
            }
            for line in lines {
                frame.push(line);
            }
        }
        frame
    }

    /// Formats a single top-level block.
    pub fn format_block(&self, block: &Block) -> Vec<String> {
        self.format_marked_block(block, &[])
    }

    fn format_marked_block(&self, block: &Block, markers: &[SnippetMarker]) -> Vec<String> {
        let mut walker = BlockWalker::new(self, markers);
        for event in &block.events {
            walker.process_event(event);
        }
        walker.finish()
    }

    /// The right-aligned `snippet <id>` tag.
    pub fn marker_line(&self, id: usize) -> String {
        self.indented_marker_line("", id)
    }

    fn indented_marker_line(&self, prefix: &str, id: usize) -> String {
        let label = if self.use_color {
            format!(" snippet {id} ")
        } else {
            format!("[snippet {id}]")
        };
        let pad = self
            .width
            .saturating_sub(visible_width(prefix) + visible_width(&label));
        format!(
            "{prefix}{}{}",
            " ".repeat(pad),
            self.paint(self.theme.snippet_marker, &label)
        )
    }

    /// The line shown in place of rows that do not fit the terminal.
    pub fn ellipsis_line(&self) -> String {
        self.paint(self.theme.ellipsis, "...")
    }

    fn paint(&self, style: Style, text: &str) -> String {
        if self.use_color {
            style.paint(text)
        } else {
            text.to_string()
        }
    }
}

#[derive(Debug)]
struct CodeCapture {
    language: String,
    content: String,
}

#[derive(Debug)]
struct ListState {
    next: Option<u64>,
}

struct BlockWalker<'f, 'a> {
    fmt: &'f MarkdownFormatter<'a>,
    markers: &'f [SnippetMarker],
    fences_seen: usize,
    marker: Option<usize>,
    lines: Vec<String>,
    line: String,
    styles: Vec<Style>,
    quote_depth: usize,
    lists: Vec<ListState>,
    bullet: Option<String>,
    code: Option<CodeCapture>,
    links: Vec<String>,
    needs_gap: bool,
}

impl<'f, 'a> BlockWalker<'f, 'a> {
    fn new(fmt: &'f MarkdownFormatter<'a>, markers: &'f [SnippetMarker]) -> Self {
        Self {
            fmt,
            markers,
            fences_seen: 0,
            marker: None,
            lines: Vec::new(),
            line: String::new(),
            styles: Vec::new(),
            quote_depth: 0,
            lists: Vec::new(),
            bullet: None,
            code: None,
            links: Vec::new(),
            needs_gap: false,
        }
    }

    fn current_style(&self) -> Style {
        self.styles
            .iter()
            .fold(Style::default(), |acc, style| acc.patch(*style))
    }

    fn push_text(&mut self, text: &str) {
        let style = self.current_style();
        let painted = self.fmt.paint(style, text);
        self.line.push_str(&painted);
    }

    fn process_event(&mut self, event: &Event<'static>) {
        match event {
            Event::Start(tag) => self.start_tag(tag),
            Event::End(tag) => self.end_tag(*tag),
            Event::Text(text) => self.add_text(text),
            Event::Code(code) => self.add_inline_code(code),
            Event::SoftBreak => self.push_text(" "),
            Event::HardBreak => self.flush_line(),
            Event::Html(html) | Event::InlineHtml(html) => self.add_text(html),
            Event::FootnoteReference(label) => self.push_text(&format!("[^{label}]")),
            Event::TaskListMarker(checked) => {
                let marker = if *checked { "[x] " } else { "[ ] " };
                self.push_text(marker);
            }
            Event::Rule => {
                self.flush_line();
                self.gap();
                let rule = "─".repeat(self.fmt.width.min(80));
                let prefix = self.prefix();
                let painted = self.fmt.paint(self.fmt.theme.rule, &rule);
                self.lines.push(format!("{prefix}{painted}"));
                self.needs_gap = true;
            }
            Event::InlineMath(math) | Event::DisplayMath(math) => self.push_text(math),
        }
    }

    fn start_tag(&mut self, tag: &Tag<'static>) {
        match tag {
            Tag::Paragraph => self.gap(),
            Tag::Heading { level, .. } => {
                self.gap();
                self.styles.push(self.fmt.theme.heading(*level));
                if !self.fmt.use_color {
                    self.line.push_str(&heading_hashes(*level));
                }
            }
            Tag::CodeBlock(kind) => {
                self.flush_line();
                self.gap();
                let language = match kind {
                    CodeBlockKind::Fenced(info) => {
                        let ordinal = self.fences_seen;
                        self.fences_seen += 1;
                        self.marker = self
                            .markers
                            .iter()
                            .find(|marker| marker.fence == ordinal)
                            .map(|marker| marker.id);
                        info.split_whitespace().next().unwrap_or_default().to_string()
                    }
                    CodeBlockKind::Indented => String::new(),
                };
                self.code = Some(CodeCapture {
                    language,
                    content: String::new(),
                });
            }
            Tag::List(start) => {
                self.flush_line();
                if self.lists.is_empty() {
                    self.gap();
                }
                self.lists.push(ListState { next: *start });
            }
            Tag::Item => {
                self.flush_line();
                self.needs_gap = false;
                let bullet = match self.lists.last_mut() {
                    Some(ListState { next: Some(n) }) => {
                        let bullet = format!("{n}. ");
                        *n += 1;
                        bullet
                    }
                    _ => BULLET.to_string(),
                };
                self.bullet = Some(bullet);
            }
            Tag::BlockQuote(_) => {
                self.flush_line();
                self.gap();
                self.quote_depth += 1;
                self.styles.push(self.fmt.theme.block_quote);
            }
            Tag::Emphasis => self.styles.push(self.fmt.theme.emphasis),
            Tag::Strong => self.styles.push(self.fmt.theme.strong),
            Tag::Strikethrough => self.styles.push(Style::default().crossed_out()),
            Tag::Link { dest_url, .. } | Tag::Image { dest_url, .. } => {
                self.styles.push(self.fmt.theme.link);
                self.links.push(dest_url.to_string());
            }
            _ => {}
        }
    }

    fn end_tag(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Paragraph => {
                self.flush_line();
                self.needs_gap = true;
            }
            TagEnd::Heading(_) => {
                self.flush_line();
                self.styles.pop();
                self.needs_gap = true;
            }
            TagEnd::CodeBlock => {
                self.flush_code();
                if let Some(id) = self.marker.take() {
                    let prefix = self.marker_prefix();
                    self.lines.push(self.fmt.indented_marker_line(&prefix, id));
                }
                self.needs_gap = true;
            }
            TagEnd::List(_) => {
                self.flush_line();
                self.lists.pop();
                self.needs_gap = self.lists.is_empty();
            }
            TagEnd::Item => self.flush_line(),
            TagEnd::BlockQuote(_) => {
                self.flush_line();
                self.quote_depth = self.quote_depth.saturating_sub(1);
                self.styles.pop();
                self.needs_gap = true;
            }
            TagEnd::Emphasis | TagEnd::Strong | TagEnd::Strikethrough => {
                self.styles.pop();
            }
            TagEnd::Link | TagEnd::Image => {
                self.styles.pop();
                if let Some(dest) = self.links.pop()
                    && !dest.is_empty()
                {
                    self.push_text(&format!(" ({dest})"));
                }
            }
            _ => {}
        }
    }

    fn add_text(&mut self, text: &str) {
        if let Some(code) = self.code.as_mut() {
            code.content.push_str(text);
            return;
        }
        let mut parts = text.split('\n').peekable();
        while let Some(part) = parts.next() {
            if !part.is_empty() {
                self.push_text(part);
            }
            if parts.peek().is_some() {
                self.flush_line();
            }
        }
    }

    fn add_inline_code(&mut self, code: &str) {
        if self.fmt.use_color {
            let style = self.current_style().patch(self.fmt.theme.code_inline);
            self.line.push_str(&style.paint(code));
        } else {
            self.line.push('`');
            self.line.push_str(code);
            self.line.push('`');
        }
    }

    fn prefix(&mut self) -> String {
        let mut prefix = String::new();
        for _ in 0..self.quote_depth {
            prefix.push_str(&self.fmt.paint(self.fmt.theme.block_quote_border, QUOTE_BORDER));
        }
        if !self.lists.is_empty() {
            prefix.push_str(&"  ".repeat(self.lists.len() - 1));
            match self.bullet.take() {
                Some(bullet) => {
                    prefix.push_str(&self.fmt.paint(self.fmt.theme.list_bullet, &bullet));
                }
                None => prefix.push_str("  "),
            }
        }
        prefix
    }

    /// Quote borders plus list indentation, without consuming a pending bullet.
    fn marker_prefix(&self) -> String {
        let mut prefix = String::new();
        for _ in 0..self.quote_depth {
            prefix.push_str(&self.fmt.paint(self.fmt.theme.block_quote_border, QUOTE_BORDER));
        }
        prefix.push_str(&"  ".repeat(self.lists.len()));
        prefix
    }

    fn gap(&mut self) {
        if !self.needs_gap || self.lines.is_empty() {
            self.needs_gap = false;
            return;
        }
        self.needs_gap = false;
        let mut prefix = String::new();
        for _ in 0..self.quote_depth {
            prefix.push_str(&self.fmt.paint(self.fmt.theme.block_quote_border, QUOTE_BORDER));
        }
        self.lines.push(prefix.trim_end().to_string());
    }

    fn flush_line(&mut self) {
        if self.line.is_empty() {
            return;
        }
        let prefix = self.prefix();
        let line = std::mem::take(&mut self.line);
        self.lines.push(format!("{prefix}{line}"));
    }

    fn flush_code(&mut self) {
        let Some(code) = self.code.take() else {
            return;
        };
        let body = code.content.trim_end_matches(['\n', '\r']);
        if body.is_empty() {
            return;
        }
        let highlighted = match self.fmt.highlighter {
            Some(highlighter) if self.fmt.use_color => {
                highlighter.highlight(body, &code.language)
            }
            _ => body
                .split('\n')
                .map(|line| line.trim_end_matches('\r').to_string())
                .collect(),
        };
        for line in highlighted {
            let prefix = self.prefix();
            if line.is_empty() {
                self.lines.push(prefix.trim_end().to_string());
            } else {
                self.lines.push(format!("{prefix}{CODE_INDENT}{line}"));
            }
        }
    }

    fn finish(mut self) -> Vec<String> {
        if self.code.is_some() {
            self.flush_code();
            if let Some(id) = self.marker.take() {
                let prefix = self.marker_prefix();
                self.lines.push(self.fmt.indented_marker_line(&prefix, id));
            }
        }
        self.flush_line();
        while self.lines.last().is_some_and(|line| line.is_empty()) {
            self.lines.pop();
        }
        self.lines
    }
}

fn heading_hashes(level: HeadingLevel) -> String {
    let count = match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    };
    format!("{} ", "#".repeat(count))
}
