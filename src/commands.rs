//! Slash command parsing for the interactive viewer.
//!
//! Lines typed into the viewer are streamed into the current response as markdown.  Lines that
//! start with `/` control the viewer instead.

/// A parsed viewer command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerCommand {
    /// Finish the current response, committing it and capturing any open fence.
    End,

    /// Treat subsequent lines as reasoning (`true`) or answer text (`false`).
    Think(bool),

    /// Replay a transcript or markdown file.
    Load(String),

    /// Save the session transcript.
    Save(String),

    /// List snippets, optionally only those whose language starts with the filter.
    Snippets(Option<String>),

    /// Forget the session's snippets and responses.
    Clear,

    /// Change the code highlighting theme.
    Theme(String),

    /// Display help information.
    Help,

    /// Exit the viewer.
    Quit,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses user input for slash commands.
///
/// Returns `Some(ViewerCommand)` if the input is a command, or `None` if it is markdown.
///
/// # Examples
///
/// ```
/// # use mdstream::parse_command;
/// assert!(parse_command("/quit").is_some());
/// assert!(parse_command("/snippets py").is_some());
/// assert!(parse_command("# a heading").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ViewerCommand> {
    let input = input.trim();

    let rest = input.strip_prefix('/')?;
    let mut parts = rest.splitn(2, ' ');
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(|s| s.trim()).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "end" | "done" => ViewerCommand::End,
        "think" | "thinking" => match argument {
            Some(arg) if arg.eq_ignore_ascii_case("on") => ViewerCommand::Think(true),
            Some(arg) if arg.eq_ignore_ascii_case("off") => ViewerCommand::Think(false),
            Some(arg) => ViewerCommand::Invalid(format!("/think expects on|off, got {arg}")),
            None => ViewerCommand::Invalid("/think requires on|off".to_string()),
        },
        "load" => match argument {
            Some(path) => ViewerCommand::Load(path.to_string()),
            None => ViewerCommand::Invalid("/load requires a file path".to_string()),
        },
        "save" => match argument {
            Some(path) => ViewerCommand::Save(path.to_string()),
            None => ViewerCommand::Invalid("/save requires a file path".to_string()),
        },
        "snippets" | "snippet" => ViewerCommand::Snippets(argument.map(|s| s.to_string())),
        "clear" => ViewerCommand::Clear,
        "theme" => match argument {
            Some(theme) => ViewerCommand::Theme(theme.to_string()),
            None => ViewerCommand::Invalid("/theme requires a theme name".to_string()),
        },
        "help" | "?" => ViewerCommand::Help,
        "quit" | "exit" | "q" => ViewerCommand::Quit,
        _ => return None,
    };

    Some(result)
}

/// Returns help text describing available commands.
pub fn help_text() -> &'static str {
    r#"Available commands:
  /end                   Finish the current response
  /think on|off          Stream following lines as reasoning or answer text
  /load <file>           Replay a transcript (.json) or markdown file
  /save <file>           Save the session transcript
  /snippets [lang]       List snippets, optionally filtered by language
  /clear                 Forget responses and snippets
  /theme <name>          Change the code highlighting theme
  /help                  Show this help message
  /quit                  Exit the viewer"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_quit_commands() {
        assert_eq!(parse_command("/quit"), Some(ViewerCommand::Quit));
        assert_eq!(parse_command("/exit"), Some(ViewerCommand::Quit));
        assert_eq!(parse_command("/q"), Some(ViewerCommand::Quit));
        assert_eq!(parse_command("  /quit  "), Some(ViewerCommand::Quit));
    }

    #[test]
    fn parse_think() {
        assert_eq!(parse_command("/think on"), Some(ViewerCommand::Think(true)));
        assert_eq!(parse_command("/THINK Off"), Some(ViewerCommand::Think(false)));
        assert!(matches!(
            parse_command("/think"),
            Some(ViewerCommand::Invalid(_))
        ));
        assert!(matches!(
            parse_command("/think maybe"),
            Some(ViewerCommand::Invalid(_))
        ));
    }

    #[test]
    fn parse_paths() {
        assert_eq!(
            parse_command("/load  history.json "),
            Some(ViewerCommand::Load("history.json".to_string()))
        );
        assert_eq!(
            parse_command("/save out.json"),
            Some(ViewerCommand::Save("out.json".to_string()))
        );
        assert_eq!(
            parse_command("/load"),
            Some(ViewerCommand::Invalid(
                "/load requires a file path".to_string()
            ))
        );
    }

    #[test]
    fn parse_snippets() {
        assert_eq!(parse_command("/snippets"), Some(ViewerCommand::Snippets(None)));
        assert_eq!(
            parse_command("/snippet py"),
            Some(ViewerCommand::Snippets(Some("py".to_string())))
        );
    }

    #[test]
    fn markdown_is_not_a_command() {
        assert_eq!(parse_command("plain text"), None);
        assert_eq!(parse_command("/usr/bin is a path"), None);
        assert_eq!(parse_command("```rust"), None);
    }

    #[test]
    fn help_text_lists_commands() {
        let help = help_text();
        for command in ["/end", "/think", "/load", "/snippets", "/theme", "/quit"] {
            assert!(help.contains(command), "{command}");
        }
    }
}
