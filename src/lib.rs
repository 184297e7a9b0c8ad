// Public modules
pub mod commands;
pub mod config;
pub mod error;
pub mod fence;
pub mod format;
pub mod markdown;
pub mod normalize;
pub mod observability;
pub mod renderer;
pub mod replay;
pub mod sink;
pub mod snippet;
pub mod theme;

// Re-exports
pub use commands::{ViewerCommand, help_text, parse_command};
pub use config::{RenderConfig, ReplayArgs};
pub use error::{Error, Result};
pub use fence::{FenceBoundaryTracker, FenceState, FenceTransition};
pub use format::{DEFAULT_CODE_THEME, Frame, Highlighter, MarkdownFormatter, SnippetMarker};
pub use markdown::{Block, BlockKind, CodeBlock, Fence, ParseDegradation, ParseResult, parse};
pub use normalize::{ChunkNormalizer, REASONING_PREFIX, ReasoningQuoter, normalize};
pub use observability::register_biometrics;
pub use renderer::StreamRenderer;
pub use replay::{
    DriveOutcome, TextDelta, Transcript, TranscriptMessage, Utf8Chunker, chunked, drive, paced,
    replay,
};
pub use sink::{DisplaySink, PlainSink, RecordingSink, SinkEvent, TerminalSink};
pub use snippet::{Snippet, SnippetRegistry};
pub use theme::{MarkdownTheme, Style};
