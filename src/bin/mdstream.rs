//! Streaming markdown viewer.
//!
//! Renders markdown the way a chat client renders model output: incrementally, with each
//! paragraph and code block committed to the terminal as soon as it is complete, and every code
//! block captured as a numbered snippet.
//!
//! # Usage
//!
//! ```bash
//! # Replay saved conversations or markdown files
//! mdstream history.json notes.md
//!
//! # Render a stream piped in from another program
//! some-llm-cli "explain fork()" | mdstream
//!
//! # Type markdown interactively
//! mdstream
//!
//! # Slow replay, then print the snippets as JSON
//! mdstream --delay-ms 20 --json history.json
//! ```
//!
//! # Commands
//!
//! In interactive mode, typed lines are streamed into the current response.  Slash commands:
//! - `/end` - Finish the current response
//! - `/think on|off` - Stream following lines as reasoning or answer text
//! - `/load <file>` - Replay a transcript or markdown file
//! - `/snippets [lang]` - List snippets
//! - `/quit` - Exit the viewer

use std::io::{self, IsTerminal, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arrrg::CommandLine;
use crossterm::cursor::MoveUp;
use crossterm::style::Stylize;
use crossterm::terminal::{Clear, ClearType};
use futures::Stream;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;

use mdstream::format::visible_width;
use mdstream::{
    DisplaySink, Highlighter, PlainSink, RenderConfig, ReplayArgs, Snippet, StreamRenderer,
    TerminalSink, TextDelta, Transcript, TranscriptMessage, Utf8Chunker, ViewerCommand, chunked,
    drive, help_text, paced, parse_command,
};

const PROMPT: &str = "md> ";
const CONTINUATION_PROMPT: &str = "... ";

type Renderer = StreamRenderer<Box<dyn DisplaySink>>;

/// A response being typed in interactive mode.
struct Response {
    renderer: Renderer,
    message: TranscriptMessage,
}

struct Viewer {
    args: ReplayArgs,
    config: RenderConfig,
    highlighter: Option<Arc<Highlighter>>,
    transcript: Transcript,
    next_snippet_id: usize,
    current: Option<Response>,
    think: bool,
}

impl Viewer {
    fn new(args: ReplayArgs) -> Self {
        let config = RenderConfig::from(&args);
        let highlighter = config
            .use_color
            .then(|| Highlighter::shared(&config.code_theme));
        Self {
            next_snippet_id: config.snippet_start_offset,
            config,
            highlighter,
            transcript: Transcript::default(),
            current: None,
            think: false,
            args,
        }
    }

    /// True when output redraws in place.
    fn live(&self) -> bool {
        !self.args.plain && io::stdout().is_terminal()
    }

    fn renderer(&self) -> mdstream::Result<Renderer> {
        let config = self
            .config
            .clone()
            .with_snippet_start_offset(self.next_snippet_id);
        if !self.args.plain {
            let sink: Box<dyn DisplaySink> = Box::new(TerminalSink::stdout(&config));
            match StreamRenderer::with_highlighter(config.clone(), sink, self.highlighter.clone())
            {
                Ok(renderer) => return Ok(renderer),
                Err(err) if err.is_display_unavailable() => {
                    tracing::debug!(error = %err, "falling back to plain output");
                }
                Err(err) => {
                    tracing::warn!(error = %err, "falling back to plain output");
                }
            }
        }
        let sink: Box<dyn DisplaySink> = Box::new(PlainSink::stdout());
        StreamRenderer::with_highlighter(config, sink, self.highlighter.clone())
    }

    /// Collects the snippets of a finished renderer.
    fn absorb(&mut self, renderer: Renderer) -> Vec<Snippet> {
        self.next_snippet_id = renderer.next_snippet_id();
        let (_, snippets) = renderer.into_parts();
        self.transcript.snippet.extend(snippets.iter().cloned());
        snippets
    }

    async fn stream<St>(&mut self, deltas: St, interrupted: &AtomicBool) -> mdstream::Result<bool>
    where
        St: Stream<Item = TextDelta>,
    {
        let mut renderer = self.renderer()?;
        let outcome = drive(&mut renderer, deltas, interrupted).await;
        self.absorb(renderer);
        Ok(outcome == mdstream::DriveOutcome::Completed)
    }

    async fn replay_file(&mut self, path: &Path, interrupted: &AtomicBool) -> mdstream::Result<()> {
        let chunk_size = self.args.chunk_size();
        let delay = self.args.delay();
        if path.extension().is_some_and(|ext| ext == "json") {
            let transcript = Transcript::load(path)?;
            for message in &transcript.history {
                if message.is_user() {
                    print_user(&message.content, self.config.use_color);
                } else if message.is_assistant() {
                    print_header("Model", self.config.use_color);
                    let deltas = paced(message.deltas(chunk_size), delay);
                    let completed = self.stream(deltas, interrupted).await?;
                    print_footer(self.config.use_color);
                    self.transcript.history.push(message.clone());
                    if !completed {
                        break;
                    }
                }
            }
        } else {
            let text = std::fs::read_to_string(path)
                .map_err(|err| mdstream::Error::io("failed to read markdown file", err))?;
            let deltas = paced(chunked(&text, chunk_size, false), delay);
            self.stream(deltas, interrupted).await?;
            self.transcript.history.push(TranscriptMessage {
                role: "assistant".to_string(),
                content: text,
                reasoning_content: None,
            });
        }
        Ok(())
    }

    async fn replay_stdin(&mut self, interrupted: &AtomicBool) -> mdstream::Result<()> {
        self.stream(stdin_deltas(), interrupted).await?;
        Ok(())
    }

    fn feed_line(&mut self, line: &str) -> mdstream::Result<()> {
        if self.current.is_none() {
            self.current = Some(Response {
                renderer: self.renderer()?,
                message: TranscriptMessage {
                    role: "assistant".to_string(),
                    content: String::new(),
                    reasoning_content: None,
                },
            });
        }
        if let Some(response) = self.current.as_mut() {
            let text = format!("{line}\n");
            if self.think {
                response
                    .message
                    .reasoning_content
                    .get_or_insert_with(String::new)
                    .push_str(&text);
            } else {
                response.message.content.push_str(&text);
            }
            response.renderer.update(&text, self.think);
        }
        Ok(())
    }

    fn end_response(&mut self) {
        if let Some(Response {
            mut renderer,
            message,
        }) = self.current.take()
        {
            renderer.finish();
            self.absorb(renderer);
            self.transcript.history.push(message);
        }
    }

    fn clear(&mut self) {
        self.end_response();
        self.transcript = Transcript::default();
        self.next_snippet_id = self.config.snippet_start_offset;
    }

    fn set_theme(&mut self, theme: &str) -> bool {
        if !Highlighter::has_theme(theme) {
            return false;
        }
        self.config.code_theme = theme.to_string();
        if self.config.use_color {
            self.highlighter = Some(Highlighter::shared(theme));
        }
        true
    }

    fn print_snippets(&self, filter: Option<&str>) {
        let mut shown = 0;
        for snippet in &self.transcript.snippet {
            if filter.is_some_and(|lang| !snippet.language.starts_with(lang)) {
                continue;
            }
            let code = if filter.is_some() {
                snippet.code.clone()
            } else {
                short(&snippet.code)
            };
            let truncated = if snippet.truncated { " (truncated)" } else { "" };
            println!(
                "    ${:<3} [{:10}]: {:?}{}",
                snippet.id, snippet.language, code, truncated
            );
            shown += 1;
        }
        if shown == 0 {
            print_info("No snippets.", self.config.use_color);
        }
    }

    fn print_json(&self) -> mdstream::Result<()> {
        let json = serde_json::to_string_pretty(&self.transcript.snippet)?;
        println!("{json}");
        Ok(())
    }

    async fn repl(&mut self, interrupted: &AtomicBool) -> Result<(), Box<dyn std::error::Error>> {
        let mut rl = DefaultEditor::new()?;
        let use_color = self.config.use_color;

        println!("mdstream (theme: {})", self.config.code_theme);
        println!("Type markdown; /end finishes a response, /help for commands, /quit to exit\n");

        loop {
            interrupted.store(false, Ordering::Relaxed);

            let prompt = if self.current.is_some() {
                CONTINUATION_PROMPT
            } else {
                PROMPT
            };
            match rl.readline(prompt) {
                Ok(line) => {
                    let Some(command) = parse_command(&line) else {
                        if self.live() {
                            erase_echo(prompt, &line);
                        }
                        self.feed_line(&line)?;
                        continue;
                    };
                    let _ = rl.add_history_entry(line.as_str());
                    if let ViewerCommand::Think(on) = command {
                        if self.live() && self.current.is_some() {
                            erase_echo(prompt, &line);
                        }
                        self.think = on;
                        continue;
                    }
                    self.end_response();
                    match command {
                        ViewerCommand::Quit => break,
                        ViewerCommand::End | ViewerCommand::Think(_) => {}
                        ViewerCommand::Load(path) => {
                            if let Err(err) = self.replay_file(Path::new(&path), interrupted).await
                            {
                                print_error(&format!("Failed to load {path}: {err}"), use_color);
                            }
                        }
                        ViewerCommand::Save(path) => match self.transcript.save(&path) {
                            Ok(()) => print_info(&format!("Transcript saved to {path}"), use_color),
                            Err(err) => print_error(
                                &format!("Failed to save transcript: {err}"),
                                use_color,
                            ),
                        },
                        ViewerCommand::Snippets(filter) => self.print_snippets(filter.as_deref()),
                        ViewerCommand::Clear => {
                            self.clear();
                            print_info("Responses and snippets cleared.", use_color);
                        }
                        ViewerCommand::Theme(theme) => {
                            if self.set_theme(&theme) {
                                print_info(&format!("Code theme set to {theme}"), use_color);
                            } else {
                                print_error(&format!("Unknown theme: {theme}"), use_color);
                            }
                        }
                        ViewerCommand::Help => {
                            for line in help_text().lines() {
                                println!("    {line}");
                            }
                        }
                        ViewerCommand::Invalid(message) => print_error(&message, use_color),
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    self.end_response();
                    continue;
                }
                Err(ReadlineError::Eof) => break,
                Err(err) => {
                    print_error(&format!("Input error: {err}"), use_color);
                    break;
                }
            }
        }
        self.end_response();
        Ok(())
    }
}

/// Reads standard input as a stream of answer deltas, never splitting a UTF-8 sequence.
fn stdin_deltas() -> impl Stream<Item = TextDelta> {
    futures::stream::unfold(
        (tokio::io::stdin(), Utf8Chunker::new(), false),
        |(mut stdin, mut chunker, done)| async move {
            if done {
                return None;
            }
            let mut buf = [0u8; 4096];
            loop {
                let read = match stdin.read(&mut buf).await {
                    Ok(read) => read,
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to read stdin");
                        0
                    }
                };
                if read == 0 {
                    if chunker.is_empty() {
                        return None;
                    }
                    let text = chunker.finish();
                    return Some((TextDelta::answer(text), (stdin, chunker, true)));
                }
                let text = chunker.push(&buf[..read]);
                if text.is_empty() {
                    continue;
                }
                return Some((TextDelta::answer(text), (stdin, chunker, false)));
            }
        },
    )
}

/// Removes the echoed input line so the live region stays directly above the cursor.
fn erase_echo(prompt: &str, line: &str) {
    let columns = crossterm::terminal::size()
        .map(|(columns, _)| columns as usize)
        .unwrap_or(80)
        .max(1);
    let rows = visible_width(&format!("{prompt}{line}")).max(1).div_ceil(columns);
    let mut stdout = io::stdout();
    let _ = crossterm::queue!(
        stdout,
        MoveUp(rows.min(u16::MAX as usize) as u16),
        Clear(ClearType::FromCursorDown)
    );
    let _ = stdout.flush();
}

fn short(code: &str) -> String {
    let first = code.lines().next().unwrap_or_default();
    let mut short: String = first.chars().take(60).collect();
    if short.len() < code.len() {
        short.push('…');
    }
    short
}

fn print_header(who: &str, use_color: bool) {
    let header = format!("╭─ {who}");
    if use_color {
        println!("{}", header.bold());
    } else {
        println!("{header}");
    }
}

fn print_footer(use_color: bool) {
    let footer = "╰─────────────";
    if use_color {
        println!("{}", footer.dim());
    } else {
        println!("{footer}");
    }
}

fn print_user(content: &str, use_color: bool) {
    print_header("User", use_color);
    println!("╰─ {content}");
}

fn print_info(message: &str, use_color: bool) {
    if use_color {
        println!("{}", message.dim());
    } else {
        println!("{message}");
    }
}

fn print_error(message: &str, use_color: bool) {
    if use_color {
        eprintln!("{}", message.red());
    } else {
        eprintln!("{message}");
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("MDSTREAM_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Main entry point for the mdstream viewer.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (args, files) = ReplayArgs::from_command_line_relaxed("mdstream [OPTIONS] [FILE...]");
    init_tracing();
    args.validate()?;

    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_clone = interrupted.clone();
    ctrlc::set_handler(move || {
        interrupted_clone.store(true, Ordering::Relaxed);
    })?;

    let json = args.json;
    let mut viewer = Viewer::new(args);
    if !files.is_empty() {
        for file in &files {
            if interrupted.load(Ordering::Relaxed) {
                break;
            }
            if let Err(err) = viewer.replay_file(Path::new(file), &interrupted).await {
                print_error(&format!("{file}: {err}"), viewer.config.use_color);
            }
        }
    } else if !io::stdin().is_terminal() {
        viewer.replay_stdin(&interrupted).await?;
    } else {
        viewer.repl(&interrupted).await?;
    }

    if json {
        viewer.print_json()?;
    }
    Ok(())
}
