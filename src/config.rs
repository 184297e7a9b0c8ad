//! Configuration types for the renderer and the `mdstream` tool.
//!
//! [`RenderConfig`] is what a [`StreamRenderer`](crate::StreamRenderer) is built from.
//! [`ReplayArgs`] is the command line of the `mdstream` binary and converts into a
//! `RenderConfig`.

use std::time::Duration;

use arrrg_derive::CommandLine;

use crate::error::{Error, Result};
use crate::format::DEFAULT_CODE_THEME;
use crate::theme::MarkdownTheme;

/// Width used when the terminal size cannot be determined.
pub const DEFAULT_WIDTH: usize = 80;

/// Default interval between live redraws (10 frames per second).
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_millis(100);

/// Default number of characters per replayed chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// Command-line arguments for the mdstream tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ReplayArgs {
    /// Syntax highlighting theme for code blocks.
    #[arrrg(optional, "Code theme (default: base16-ocean.dark)", "THEME")]
    pub theme: Option<String>,

    /// First snippet id.
    #[arrrg(optional, "First snippet id (default: 0)", "ID")]
    pub snippet_start: Option<usize>,

    /// Characters per replayed chunk.
    #[arrrg(optional, "Characters per replayed chunk (default: 100)", "CHARS")]
    pub chunk_size: Option<usize>,

    /// Delay between replayed chunks.
    #[arrrg(optional, "Delay between replayed chunks in milliseconds (default: 0)", "MS")]
    pub delay_ms: Option<u64>,

    /// Render width override.
    #[arrrg(optional, "Render width in columns (default: terminal width)", "COLUMNS")]
    pub width: Option<usize>,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,

    /// Never redraw in place.
    #[arrrg(flag, "Append-only output, even on a terminal")]
    pub plain: bool,

    /// Print the snippet list as JSON when done.
    #[arrrg(flag, "Print extracted snippets as JSON on exit")]
    pub json: bool,
}

impl ReplayArgs {
    /// Checks the arguments for values that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == Some(0) {
            return Err(Error::validation(
                "chunk size must be positive",
                Some("chunk-size".to_string()),
            ));
        }
        if self.width == Some(0) {
            return Err(Error::validation(
                "width must be positive",
                Some("width".to_string()),
            ));
        }
        Ok(())
    }

    /// Characters per replayed chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE).max(1)
    }

    /// Delay between replayed chunks.
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms.unwrap_or(0))
    }
}

/// Configuration for a stream renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderConfig {
    /// Id of the first snippet this renderer registers.
    pub snippet_start_offset: usize,

    /// Name of the syntax highlighting theme for code blocks.
    pub code_theme: String,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,

    /// Columns available for rules and the snippet tag.
    pub width: usize,

    /// Minimum time between two live redraws.
    pub refresh_interval: Duration,

    /// Styles for markdown elements.
    pub markdown_theme: MarkdownTheme,
}

impl RenderConfig {
    /// Creates a RenderConfig with default values.
    ///
    /// Defaults:
    /// - Snippet ids start at 0
    /// - Code theme: base16-ocean.dark
    /// - Color: enabled
    /// - Width: the terminal's, or 80
    /// - Refresh: every 100ms
    pub fn new() -> Self {
        Self {
            snippet_start_offset: 0,
            code_theme: DEFAULT_CODE_THEME.to_string(),
            use_color: true,
            width: terminal_width(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            markdown_theme: MarkdownTheme::default(),
        }
    }

    /// Sets the first snippet id.
    pub fn with_snippet_start_offset(mut self, offset: usize) -> Self {
        self.snippet_start_offset = offset;
        self
    }

    /// Sets the code theme.
    pub fn with_code_theme(mut self, theme: impl Into<String>) -> Self {
        self.code_theme = theme.into();
        self
    }

    /// Turns ANSI color output on or off.
    pub fn with_color(mut self, use_color: bool) -> Self {
        self.use_color = use_color;
        self
    }

    /// Disables ANSI color output.
    pub fn without_color(self) -> Self {
        self.with_color(false)
    }

    /// Sets the render width.
    pub fn with_width(mut self, width: usize) -> Self {
        self.width = width.max(1);
        self
    }

    /// Sets the minimum time between live redraws.
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Sets the markdown styles.
    pub fn with_markdown_theme(mut self, theme: MarkdownTheme) -> Self {
        self.markdown_theme = theme;
        self
    }

    /// The line shown below a truncated live region.
    pub fn ellipsis_line(&self) -> String {
        if self.use_color {
            self.markdown_theme.ellipsis.paint("...")
        } else {
            "...".to_string()
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&ReplayArgs> for RenderConfig {
    fn from(args: &ReplayArgs) -> Self {
        let mut config = RenderConfig::new()
            .with_snippet_start_offset(args.snippet_start.unwrap_or(0))
            .with_color(!args.no_color);
        if let Some(theme) = &args.theme {
            config = config.with_code_theme(theme.clone());
        }
        if let Some(width) = args.width {
            config = config.with_width(width);
        }
        config
    }
}

impl From<ReplayArgs> for RenderConfig {
    fn from(args: ReplayArgs) -> Self {
        RenderConfig::from(&args)
    }
}

fn terminal_width() -> usize {
    match crossterm::terminal::size() {
        Ok((columns, _)) if columns > 0 => columns as usize,
        _ => DEFAULT_WIDTH,
    }
}
