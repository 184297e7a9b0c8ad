//! Feeding deltas into a renderer.
//!
//! Live streams and saved transcripts reach the renderer the same way: as a sequence of
//! [`TextDelta`]s.  [`drive`] consumes an async stream of deltas; [`replay`] consumes an
//! iterator.  [`Utf8Chunker`] turns raw byte reads into text without splitting a character.  A
//! [`Transcript`] is a saved conversation whose assistant turns can be replayed in
//! fixed-size chunks to regenerate their rendering and their snippets.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{from_reader, to_writer_pretty};

use crate::error::{Error, Result};
use crate::observability::{REPLAY_DELTAS, REPLAY_INTERRUPTS};
use crate::renderer::StreamRenderer;
use crate::sink::DisplaySink;
use crate::snippet::Snippet;

/// How often [`drive`] checks the interrupt flag while waiting for the next delta.
const INTERRUPT_POLL: Duration = Duration::from_millis(25);

/// One increment of model output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextDelta {
    /// The text of this increment.
    pub content: String,
    /// True for intermediate reasoning, false for answer text.
    #[serde(default)]
    pub is_reasoning: bool,
}

impl TextDelta {
    /// Creates an answer delta.
    pub fn answer(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_reasoning: false,
        }
    }

    /// Creates a reasoning delta.
    pub fn reasoning(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_reasoning: true,
        }
    }
}

/// Splits `text` into deltas of at most `size` characters.
pub fn chunked(text: &str, size: usize, is_reasoning: bool) -> Vec<TextDelta> {
    let size = size.max(1);
    let mut deltas = Vec::new();
    let mut current = String::new();
    let mut count = 0;
    for ch in text.chars() {
        current.push(ch);
        count += 1;
        if count == size {
            deltas.push(TextDelta {
                content: std::mem::take(&mut current),
                is_reasoning,
            });
            count = 0;
        }
    }
    if !current.is_empty() {
        deltas.push(TextDelta {
            content: current,
            is_reasoning,
        });
    }
    deltas
}

/// How a [`drive`] call ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriveOutcome {
    /// The stream was exhausted.
    Completed,
    /// The interrupt flag was raised before the stream ended.
    Interrupted,
}

/// Feeds every delta of `stream` to `renderer`, then finishes it.
///
/// The flag is watched while waiting for the next delta and checked again before each delta is
/// applied; once it is set the renderer is finished immediately so that an in-flight fence is
/// still captured as a snippet.
pub async fn drive<S, St>(
    renderer: &mut StreamRenderer<S>,
    stream: St,
    interrupted: &AtomicBool,
) -> DriveOutcome
where
    S: DisplaySink,
    St: Stream<Item = TextDelta>,
{
    let mut stream = std::pin::pin!(stream);
    loop {
        let next = tokio::select! {
            biased;
            () = raised(interrupted) => return interrupt(renderer),
            next = stream.next() => next,
        };
        let Some(delta) = next else {
            break;
        };
        if interrupted.load(Ordering::Relaxed) {
            return interrupt(renderer);
        }
        REPLAY_DELTAS.click();
        renderer.apply(&delta);
    }
    renderer.finish();
    DriveOutcome::Completed
}

async fn raised(flag: &AtomicBool) {
    while !flag.load(Ordering::Relaxed) {
        tokio::time::sleep(INTERRUPT_POLL).await;
    }
}

fn interrupt<S: DisplaySink>(renderer: &mut StreamRenderer<S>) -> DriveOutcome {
    REPLAY_INTERRUPTS.click();
    tracing::debug!("stream interrupted");
    renderer.finish();
    DriveOutcome::Interrupted
}

/// Feeds every delta to `renderer`, then finishes it.
pub fn replay<S, I>(renderer: &mut StreamRenderer<S>, deltas: I)
where
    S: DisplaySink,
    I: IntoIterator<Item = TextDelta>,
{
    for delta in deltas {
        REPLAY_DELTAS.click();
        renderer.apply(&delta);
    }
    renderer.finish();
}

/// Yields `deltas` with `delay` between them.
pub fn paced(deltas: Vec<TextDelta>, delay: Duration) -> impl Stream<Item = TextDelta> {
    futures::stream::iter(deltas).then(move |delta| async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        delta
    })
}

/// Decodes a byte stream into text, holding back an incomplete trailing UTF-8 sequence until the
/// rest of it arrives.
///
/// Invalid sequences become U+FFFD one at a time; the bytes around them are kept as they are.
#[derive(Clone, Debug, Default)]
pub struct Utf8Chunker {
    pending: Vec<u8>,
}

impl Utf8Chunker {
    /// Creates an empty chunker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes` and returns all text that is complete so far.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut text = String::new();
        let mut consumed = 0;
        while consumed < self.pending.len() {
            let rest = &self.pending[consumed..];
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    consumed = self.pending.len();
                }
                Err(err) => {
                    let valid_up_to = err.valid_up_to();
                    if let Ok(valid) = std::str::from_utf8(&rest[..valid_up_to]) {
                        text.push_str(valid);
                    }
                    consumed += valid_up_to;
                    let Some(invalid) = err.error_len() else {
                        break;
                    };
                    text.push(char::REPLACEMENT_CHARACTER);
                    consumed += invalid;
                }
            }
        }
        self.pending.drain(..consumed);
        text
    }

    /// Returns the held-back bytes, decoded lossily, and empties the chunker.
    pub fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }

    /// True when no bytes are held back.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// One message of a saved conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    /// `system`, `user` or `assistant`.
    pub role: String,
    /// The message text.
    #[serde(default)]
    pub content: String,
    /// Reasoning that preceded an assistant answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
}

impl TranscriptMessage {
    /// Returns true for assistant messages.
    pub fn is_assistant(&self) -> bool {
        self.role == "assistant"
    }

    /// Returns true for user messages.
    pub fn is_user(&self) -> bool {
        self.role == "user"
    }

    /// The message as chunked deltas: reasoning first, then the answer.
    pub fn deltas(&self, chunk_size: usize) -> Vec<TextDelta> {
        let mut deltas = Vec::new();
        if let Some(reasoning) = &self.reasoning_content {
            deltas.extend(chunked(reasoning, chunk_size, true));
        }
        deltas.extend(chunked(&self.content, chunk_size, false));
        deltas
    }
}

/// A saved conversation and the snippets extracted from it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    /// Messages in conversation order.
    #[serde(default)]
    pub history: Vec<TranscriptMessage>,
    /// Snippets extracted from the assistant messages.
    #[serde(default)]
    pub snippet: Vec<Snippet>,
}

impl Transcript {
    /// Parses a transcript from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|err| Error::serialization("failed to parse transcript", Some(Box::new(err))))
    }

    /// Loads a transcript from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())
            .map_err(|err| Error::io("failed to open transcript file", err))?;
        let reader = BufReader::new(file);
        from_reader(reader)
            .map_err(|err| Error::serialization("failed to parse transcript", Some(Box::new(err))))
    }

    /// Writes the transcript to disk.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path.as_ref())
            .map_err(|err| Error::io("failed to create transcript file", err))?;
        let mut writer = BufWriter::new(file);
        to_writer_pretty(&mut writer, self).map_err(|err| {
            Error::serialization("failed to serialize transcript", Some(Box::new(err)))
        })?;
        writer
            .flush()
            .map_err(|err| Error::io("failed to write transcript file", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RenderConfig;
    use crate::sink::PlainSink;

    fn renderer() -> StreamRenderer<PlainSink<Vec<u8>>> {
        let config = RenderConfig::new().without_color().with_width(40);
        StreamRenderer::new(config, PlainSink::new(Vec::new())).unwrap()
    }

    #[test]
    fn chunks_split_on_characters() {
        let deltas = chunked("héllo", 2, false);
        let parts: Vec<&str> = deltas.iter().map(|d| d.content.as_str()).collect();
        assert_eq!(parts, vec!["hé", "ll", "o"]);
        assert!(chunked("", 3, true).is_empty());
        assert!(chunked("ab", 0, true).iter().all(|d| d.is_reasoning));
    }

    #[test]
    fn utf8_chunker_waits_for_split_characters() {
        let bytes = "é日".as_bytes();
        let mut chunker = Utf8Chunker::new();
        assert_eq!(chunker.push(&bytes[..1]), "");
        assert!(!chunker.is_empty());
        assert_eq!(chunker.push(&bytes[1..3]), "é");
        assert_eq!(chunker.push(&bytes[3..]), "日");
        assert!(chunker.is_empty());
    }

    #[test]
    fn utf8_chunker_replaces_only_invalid_bytes() {
        let mut chunker = Utf8Chunker::new();
        let mut bytes = b"ok \xff then ".to_vec();
        bytes.extend_from_slice(&"日".as_bytes()[..2]);
        assert_eq!(chunker.push(&bytes), "ok \u{fffd} then ");
        assert_eq!(chunker.push(&"日".as_bytes()[2..]), "日");

        assert_eq!(chunker.push(&[0xe6, 0x97]), "");
        assert_eq!(chunker.finish(), "\u{fffd}");
        assert!(chunker.is_empty());
    }

    #[test]
    fn message_deltas_put_reasoning_first() {
        let message = TranscriptMessage {
            role: "assistant".to_string(),
            content: "answer".to_string(),
            reasoning_content: Some("think".to_string()),
        };
        assert_eq!(
            message.deltas(100),
            vec![TextDelta::reasoning("think"), TextDelta::answer("answer")]
        );
    }

    #[test]
    fn transcript_parses_history_format() {
        let transcript = Transcript::from_json(
            r#"{
                "history": [
                    {"role": "system", "content": "be brief"},
                    {"role": "user", "content": "hi"},
                    {"role": "assistant", "content": "```sh\nls\n```\n"}
                ],
                "snippet": [{"lang": "sh", "code": "ls"}]
            }"#,
        )
        .unwrap();
        assert_eq!(transcript.history.len(), 3);
        assert!(transcript.history[1].is_user());
        assert!(transcript.history[2].is_assistant());
        assert_eq!(transcript.snippet[0].language, "sh");
    }

    #[test]
    fn malformed_transcript_is_a_serialization_error() {
        let err = Transcript::from_json("{not json").unwrap_err();
        assert!(matches!(err, Error::Serialization { .. }));
    }

    #[test]
    fn missing_transcript_is_an_io_error() {
        let err = Transcript::load("/nonexistent/mdstream/history.json").unwrap_err();
        assert!(err.is_io());
    }

    #[test]
    fn transcript_survives_save_and_load() {
        let path = std::env::temp_dir().join(format!(
            "mdstream-transcript-{}.json",
            std::process::id()
        ));
        let transcript = Transcript {
            history: vec![TranscriptMessage {
                role: "assistant".to_string(),
                content: "done".to_string(),
                reasoning_content: Some("thinking".to_string()),
            }],
            snippet: vec![Snippet {
                id: 4,
                language: "rust".to_string(),
                code: "fn main() {}".to_string(),
                truncated: false,
            }],
        };
        transcript.save(&path).unwrap();
        let loaded = Transcript::load(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(loaded, transcript);
    }

    #[test]
    fn replay_finishes_the_renderer() {
        let mut renderer = renderer();
        replay(&mut renderer, chunked("```py\nprint(1)\n", 3, false));
        assert!(renderer.is_finished());
        assert_eq!(renderer.snippets().len(), 1);
        assert!(renderer.snippets()[0].truncated);
    }

    #[tokio::test]
    async fn drive_consumes_the_whole_stream() {
        let mut renderer = renderer();
        let deltas = chunked("```js\nconsole.log(1)\n```\n", 4, false);
        let interrupted = AtomicBool::new(false);
        let outcome = drive(&mut renderer, futures::stream::iter(deltas), &interrupted).await;
        assert_eq!(outcome, DriveOutcome::Completed);
        assert_eq!(renderer.snippets()[0].code, "console.log(1)");
        assert!(!renderer.snippets()[0].truncated);
    }

    #[tokio::test]
    async fn interrupted_drive_still_captures_open_fence() {
        let mut renderer = renderer();
        let deltas = vec![
            TextDelta::answer("```rust\nfn main() {}\n"),
            TextDelta::answer("never seen\n```\n"),
        ];
        let interrupted = AtomicBool::new(false);
        let stream = futures::stream::iter(deltas).inspect(|delta| {
            if delta.content.starts_with("never") {
                interrupted.store(true, Ordering::Relaxed);
            }
        });
        let outcome = drive(&mut renderer, stream, &interrupted).await;
        assert_eq!(outcome, DriveOutcome::Interrupted);
        assert!(renderer.is_finished());
        assert_eq!(renderer.snippets().len(), 1);
        assert_eq!(renderer.snippets()[0].code, "fn main() {}");
        assert!(renderer.snippets()[0].truncated);
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_does_not_wait_for_the_next_delta() {
        let mut renderer = renderer();
        let deltas = vec![
            TextDelta::answer("```sh\nls\n"),
            TextDelta::answer("pwd\n```\n"),
        ];
        let interrupted = std::sync::Arc::new(AtomicBool::new(false));
        let flag = interrupted.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            flag.store(true, Ordering::Relaxed);
        });
        let started = tokio::time::Instant::now();
        let outcome = drive(
            &mut renderer,
            paced(deltas, Duration::from_secs(10)),
            &interrupted,
        )
        .await;
        assert_eq!(outcome, DriveOutcome::Interrupted);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(renderer.is_finished());
        assert!(renderer.snippets().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn paced_streams_keep_order() {
        let deltas = chunked("abcdef", 2, false);
        let collected: Vec<TextDelta> = paced(deltas.clone(), Duration::from_millis(50))
            .collect()
            .await;
        assert_eq!(collected, deltas);
    }
}
