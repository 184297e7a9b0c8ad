//! Display sinks.
//!
//! A sink owns one live region at a time.  `render` replaces what the region shows, `commit`
//! makes it permanent so that later output appears below it, and `open` starts the next region.
//! [`TerminalSink`] redraws the region in place; [`PlainSink`] writes each region once, when it
//! is committed, which is what pipes and log files want.

use std::io::{self, IsTerminal, Stdout, Write};
use std::time::{Duration, Instant};

use crossterm::cursor::{MoveToColumn, MoveUp};
use crossterm::queue;
use crossterm::terminal::{self, Clear, ClearType};

use crate::config::RenderConfig;
use crate::error::{Error, Result};
use crate::format::Frame;

/// Somewhere a stream renderer can show its current region.
pub trait DisplaySink {
    /// Starts a new, empty live region below everything committed so far.
    fn open(&mut self) -> Result<()>;

    /// Replaces the contents of the live region.
    fn render(&mut self, frame: &Frame) -> Result<()>;

    /// Freezes the live region in its last rendered state.
    fn commit(&mut self) -> Result<()>;
}

impl<S: DisplaySink + ?Sized> DisplaySink for Box<S> {
    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn render(&mut self, frame: &Frame) -> Result<()> {
        (**self).render(frame)
    }

    fn commit(&mut self) -> Result<()> {
        (**self).commit()
    }
}

/////////////////////////////////////////////// TerminalSink //////////////////////////////////////

/// A live region redrawn in place on an interactive terminal.
///
/// Redraws are rate limited; a frame that arrives too soon is held and drawn by the next
/// render after the interval, or by `commit`.  While the region is taller than the terminal the
/// live view shows its top rows followed by an ellipsis; the committed output is always complete.
pub struct TerminalSink<W: Write = Stdout> {
    out: W,
    check_terminal: bool,
    fixed_size: Option<(usize, usize)>,
    refresh_interval: Duration,
    ellipsis: String,
    current: Frame,
    drawn_rows: usize,
    last_draw: Option<Instant>,
    dirty: bool,
}

impl TerminalSink<Stdout> {
    /// Creates a sink on standard output.
    pub fn stdout(config: &RenderConfig) -> Self {
        Self {
            out: io::stdout(),
            check_terminal: true,
            fixed_size: None,
            refresh_interval: config.refresh_interval,
            ellipsis: config.ellipsis_line(),
            current: Frame::default(),
            drawn_rows: 0,
            last_draw: None,
            dirty: false,
        }
    }
}

impl<W: Write> TerminalSink<W> {
    /// Creates a sink on an arbitrary writer with a fixed `(columns, rows)` size.
    ///
    /// The writer is assumed to be a terminal.
    pub fn with_writer(out: W, size: (usize, usize), config: &RenderConfig) -> Self {
        Self {
            out,
            check_terminal: false,
            fixed_size: Some(size),
            refresh_interval: config.refresh_interval,
            ellipsis: config.ellipsis_line(),
            current: Frame::default(),
            drawn_rows: 0,
            last_draw: None,
            dirty: false,
        }
    }

    /// Returns a reference to the underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.out
    }

    /// Consumes the sink, returning the underlying writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn size(&self) -> (usize, usize) {
        if let Some(size) = self.fixed_size {
            return size;
        }
        match terminal::size() {
            Ok((columns, rows)) => (columns as usize, rows as usize),
            Err(err) => {
                tracing::debug!(error = %err, "terminal size unavailable");
                (80, 24)
            }
        }
    }

    fn live_view(&self, columns: usize, rows: usize) -> Frame {
        let budget = rows.saturating_sub(1).max(1);
        if self.current.rows(columns) <= budget {
            return self.current.clone();
        }
        let mut view = Frame::default();
        let mut used = 1;
        for line in self.current.lines() {
            let height = Frame::new(vec![line.clone()]).rows(columns);
            if used + height > budget {
                break;
            }
            used += height;
            view.push(line.clone());
        }
        view.push(self.ellipsis.clone());
        view
    }

    fn draw(&mut self, frame: &Frame, columns: usize) -> Result<()> {
        if self.drawn_rows > 0 {
            queue!(self.out, MoveUp(self.drawn_rows.min(u16::MAX as usize) as u16))?;
        }
        queue!(self.out, MoveToColumn(0), Clear(ClearType::FromCursorDown))?;
        for line in frame.lines() {
            self.out.write_all(line.as_bytes())?;
            self.out.write_all(b"\n")?;
        }
        self.out.flush()?;
        self.drawn_rows = frame.rows(columns);
        self.last_draw = Some(Instant::now());
        self.dirty = false;
        Ok(())
    }

    fn draw_live(&mut self) -> Result<()> {
        let (columns, rows) = self.size();
        let view = self.live_view(columns, rows);
        self.draw(&view, columns)
    }
}

impl<W: Write> DisplaySink for TerminalSink<W> {
    fn open(&mut self) -> Result<()> {
        if self.check_terminal && !io::stdout().is_terminal() {
            return Err(Error::display_unavailable("stdout is not a terminal"));
        }
        self.current = Frame::default();
        self.drawn_rows = 0;
        self.last_draw = None;
        self.dirty = false;
        Ok(())
    }

    fn render(&mut self, frame: &Frame) -> Result<()> {
        self.current = frame.clone();
        self.dirty = true;
        let due = self
            .last_draw
            .is_none_or(|at| at.elapsed() >= self.refresh_interval);
        if due {
            self.draw_live()?;
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let (columns, _) = self.size();
        if self.dirty || self.drawn_rows != self.current.rows(columns) {
            let frame = self.current.clone();
            self.draw(&frame, columns)?;
        }
        self.current = Frame::default();
        self.drawn_rows = 0;
        self.last_draw = None;
        Ok(())
    }
}

//////////////////////////////////////////////// PlainSink ////////////////////////////////////////

/// Append-only output for destinations that cannot redraw.
///
/// Each region is written exactly once, in its final state, when it is committed.
#[derive(Debug)]
pub struct PlainSink<W: Write> {
    out: W,
    current: Frame,
}

impl PlainSink<Stdout> {
    /// Creates a plain sink on standard output.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> PlainSink<W> {
    /// Creates a plain sink on `out`.
    pub fn new(out: W) -> Self {
        Self {
            out,
            current: Frame::default(),
        }
    }

    /// Returns a reference to the underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.out
    }

    /// Consumes the sink, returning the underlying writer.
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> DisplaySink for PlainSink<W> {
    fn open(&mut self) -> Result<()> {
        self.current = Frame::default();
        Ok(())
    }

    fn render(&mut self, frame: &Frame) -> Result<()> {
        self.current = frame.clone();
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let frame = std::mem::take(&mut self.current);
        if frame.is_empty() {
            return Ok(());
        }
        self.out.write_all(frame.to_text().as_bytes())?;
        self.out.flush()?;
        Ok(())
    }
}

////////////////////////////////////////////// RecordingSink ///////////////////////////////////////

/// One call observed by a [`RecordingSink`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkEvent {
    /// `open` was called.
    Open,
    /// `render` was called with this frame.
    Render(Frame),
    /// `commit` was called.
    Commit,
}

/// Records every call, for inspecting renderer behavior.
#[derive(Clone, Debug, Default)]
pub struct RecordingSink {
    events: Vec<SinkEvent>,
    current: Frame,
    committed: Vec<Frame>,
}

impl RecordingSink {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call in order.
    pub fn events(&self) -> &[SinkEvent] {
        &self.events
    }

    /// The final frame of every committed region, in order.
    pub fn committed(&self) -> &[Frame] {
        &self.committed
    }

    /// The committed regions as plain text, one string per region.
    pub fn committed_text(&self) -> Vec<String> {
        self.committed.iter().map(Frame::to_text).collect()
    }
}

impl DisplaySink for RecordingSink {
    fn open(&mut self) -> Result<()> {
        self.events.push(SinkEvent::Open);
        self.current = Frame::default();
        Ok(())
    }

    fn render(&mut self, frame: &Frame) -> Result<()> {
        self.events.push(SinkEvent::Render(frame.clone()));
        self.current = frame.clone();
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.events.push(SinkEvent::Commit);
        let frame = std::mem::take(&mut self.current);
        if !frame.is_empty() {
            self.committed.push(frame);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(lines: &[&str]) -> Frame {
        Frame::new(lines.iter().map(|l| l.to_string()).collect())
    }

    fn config() -> RenderConfig {
        RenderConfig::default()
            .with_color(false)
            .with_refresh_interval(Duration::ZERO)
    }

    #[test]
    fn plain_sink_writes_committed_regions_once() {
        let mut sink = PlainSink::new(Vec::new());
        sink.open().unwrap();
        sink.render(&frame(&["a"])).unwrap();
        sink.render(&frame(&["a", "b"])).unwrap();
        sink.commit().unwrap();
        sink.open().unwrap();
        sink.commit().unwrap();
        sink.open().unwrap();
        sink.render(&frame(&["c"])).unwrap();
        sink.commit().unwrap();
        assert_eq!(String::from_utf8(sink.into_inner()).unwrap(), "a\nb\nc\n");
    }

    #[test]
    fn terminal_sink_redraws_in_place() {
        let mut sink = TerminalSink::with_writer(Vec::new(), (80, 24), &config());
        sink.open().unwrap();
        sink.render(&frame(&["one"])).unwrap();
        sink.render(&frame(&["one", "two"])).unwrap();
        sink.commit().unwrap();
        let out = String::from_utf8(sink.into_inner()).unwrap();
        // second draw moves up over the first line before clearing
        assert!(out.contains("\x1b[1A"));
        assert!(out.ends_with("one\ntwo\n"));
    }

    #[test]
    fn terminal_sink_holds_frames_within_interval() {
        let config = RenderConfig::default()
            .with_color(false)
            .with_refresh_interval(Duration::from_secs(3600));
        let mut sink = TerminalSink::with_writer(Vec::new(), (80, 24), &config);
        sink.open().unwrap();
        sink.render(&frame(&["first"])).unwrap();
        sink.render(&frame(&["second"])).unwrap();
        assert!(!String::from_utf8_lossy(sink.get_ref()).contains("second"));
        sink.commit().unwrap();
        assert!(String::from_utf8_lossy(sink.get_ref()).ends_with("second\n"));
    }

    #[test]
    fn tall_regions_show_an_ellipsis_until_commit() {
        let mut sink = TerminalSink::with_writer(Vec::new(), (80, 4), &config());
        sink.open().unwrap();
        let tall = frame(&["1", "2", "3", "4", "5", "6"]);
        assert_eq!(sink.live_view(80, 4), Frame::default());
        sink.current = tall.clone();
        assert_eq!(sink.live_view(80, 4), frame(&["1", "2", "..."]));
        sink.render(&tall).unwrap();
        sink.commit().unwrap();
        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert!(out.ends_with("1\n2\n3\n4\n5\n6\n"));
    }

    #[test]
    fn recording_sink_keeps_committed_frames() {
        let mut sink = RecordingSink::new();
        sink.open().unwrap();
        sink.render(&frame(&["x"])).unwrap();
        sink.commit().unwrap();
        assert_eq!(
            sink.events(),
            &[
                SinkEvent::Open,
                SinkEvent::Render(frame(&["x"])),
                SinkEvent::Commit
            ]
        );
        assert_eq!(sink.committed_text(), vec!["x\n".to_string()]);
    }
}
