//! Terminal styles for rendered markdown.

use crossterm::style::{Color, Stylize, style};
use pulldown_cmark::HeadingLevel;

/// A terminal text style.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Style {
    /// Foreground color.
    pub fg: Option<Color>,
    /// Background color.
    pub bg: Option<Color>,
    /// Bold weight.
    pub bold: bool,
    /// Italic slant.
    pub italic: bool,
    /// Dim intensity.
    pub dim: bool,
    /// Underline.
    pub underline: bool,
    /// Strike-through.
    pub crossed_out: bool,
}

impl Style {
    /// Sets the foreground color.
    pub fn fg(mut self, color: Color) -> Self {
        self.fg = Some(color);
        self
    }

    /// Sets the background color.
    pub fn bg(mut self, color: Color) -> Self {
        self.bg = Some(color);
        self
    }

    /// Makes the style bold.
    pub fn bold(mut self) -> Self {
        self.bold = true;
        self
    }

    /// Makes the style italic.
    pub fn italic(mut self) -> Self {
        self.italic = true;
        self
    }

    /// Makes the style dim.
    pub fn dim(mut self) -> Self {
        self.dim = true;
        self
    }

    /// Makes the style underlined.
    pub fn underline(mut self) -> Self {
        self.underline = true;
        self
    }

    /// Makes the style struck through.
    pub fn crossed_out(mut self) -> Self {
        self.crossed_out = true;
        self
    }

    /// Layers `other` on top of this style; set colors and attributes in `other` win.
    pub fn patch(self, other: Style) -> Self {
        Self {
            fg: other.fg.or(self.fg),
            bg: other.bg.or(self.bg),
            bold: self.bold || other.bold,
            italic: self.italic || other.italic,
            dim: self.dim || other.dim,
            underline: self.underline || other.underline,
            crossed_out: self.crossed_out || other.crossed_out,
        }
    }

    /// Wraps `text` in the escape sequences for this style.
    pub fn paint(&self, text: &str) -> String {
        if text.is_empty() || *self == Style::default() {
            return text.to_string();
        }
        let mut styled = style(text);
        if let Some(fg) = self.fg {
            styled = styled.with(fg);
        }
        if let Some(bg) = self.bg {
            styled = styled.on(bg);
        }
        if self.bold {
            styled = styled.bold();
        }
        if self.italic {
            styled = styled.italic();
        }
        if self.dim {
            styled = styled.dim();
        }
        if self.underline {
            styled = styled.underlined();
        }
        if self.crossed_out {
            styled = styled.crossed_out();
        }
        styled.to_string()
    }
}

/// Builds a 24-bit color from a `0xRRGGBB` literal.
pub fn rgb(hex: u32) -> Color {
    Color::Rgb {
        r: ((hex >> 16) & 0xff) as u8,
        g: ((hex >> 8) & 0xff) as u8,
        b: (hex & 0xff) as u8,
    }
}

/// Styles for each markdown element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MarkdownTheme {
    /// Heading styles, `h1` through `h6`.
    pub headings: [Style; 6],
    /// Text inside a blockquote.
    pub block_quote: Style,
    /// The blockquote border glyph.
    pub block_quote_border: Style,
    /// Inline code spans.
    pub code_inline: Style,
    /// Emphasis.
    pub emphasis: Style,
    /// Strong emphasis.
    pub strong: Style,
    /// Link text.
    pub link: Style,
    /// List bullets and numbers.
    pub list_bullet: Style,
    /// Thematic breaks.
    pub rule: Style,
    /// The snippet id tag under a finished code block.
    pub snippet_marker: Style,
    /// The ellipsis shown when a live region overflows the terminal.
    pub ellipsis: Style,
}

impl MarkdownTheme {
    /// Returns the style for a heading level.
    pub fn heading(&self, level: HeadingLevel) -> Style {
        let index = match level {
            HeadingLevel::H1 => 0,
            HeadingLevel::H2 => 1,
            HeadingLevel::H3 => 2,
            HeadingLevel::H4 => 3,
            HeadingLevel::H5 => 4,
            HeadingLevel::H6 => 5,
        };
        self.headings[index]
    }
}

impl Default for MarkdownTheme {
    fn default() -> Self {
        Self {
            headings: [
                Style::default().fg(rgb(0x1E90FF)).bold(),
                Style::default().fg(rgb(0x00BFFF)).bold(),
                Style::default().fg(rgb(0x87CEFA)).bold(),
                Style::default().fg(rgb(0x87CEEB)).bold(),
                Style::default().fg(rgb(0xE0FFFF)).bold(),
                Style::default().fg(rgb(0xE0FFFF)),
            ],
            block_quote: Style::default().fg(rgb(0x999999)).bg(rgb(0x1F1F1F)),
            block_quote_border: Style::default().fg(rgb(0xD75F00)),
            code_inline: Style::default().fg(rgb(0xE6DB74)).bg(rgb(0x272822)),
            emphasis: Style::default().italic(),
            strong: Style::default().bold(),
            link: Style::default().fg(rgb(0x5FAFFF)).underline(),
            list_bullet: Style::default().fg(rgb(0xD75F00)).bold(),
            rule: Style::default().dim(),
            snippet_marker: Style::default().fg(rgb(0xE6DB74)).bg(rgb(0x272822)),
            ellipsis: Style::default().fg(rgb(0xE6DB74)).bg(rgb(0x272822)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_style_paints_nothing() {
        assert_eq!(Style::default().paint("plain"), "plain");
    }

    #[test]
    fn painted_text_keeps_content() {
        let painted = Style::default().fg(rgb(0x1E90FF)).bold().paint("Title");
        assert!(painted.contains("Title"));
        assert!(painted.starts_with('\x1b'));
        assert_ne!(painted, "Title");
    }

    #[test]
    fn rgb_splits_channels() {
        assert_eq!(
            rgb(0xD75F00),
            Color::Rgb {
                r: 0xD7,
                g: 0x5F,
                b: 0x00
            }
        );
    }

    #[test]
    fn patch_layers_styles() {
        let base = Style::default().fg(rgb(0x999999)).italic();
        let patched = base.patch(Style::default().bold());
        assert_eq!(patched.fg, Some(rgb(0x999999)));
        assert!(patched.bold && patched.italic);
    }
}
