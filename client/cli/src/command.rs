//! Input line parsing
//!
//! Lines starting with `/` are commands; anything else is message text.

use std::path::PathBuf;

/// One parsed input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Replace the draft with this text and send it
    Say(String),
    /// Send the draft as it stands
    Send,
    /// Switch to (or create) a session
    Session(Option<String>),
    /// Stop the streaming response
    Stop,
    /// Set or clear the video reference
    Video(Option<String>),
    /// Set or clear the audio reference
    Audio {
        /// Audio URL; `None` clears
        url: Option<String>,
        /// Display label
        label: Option<String>,
    },
    /// Attach an image file
    Image(PathBuf),
    /// Print the draft
    Draft,
    /// Force the offline flag
    Offline,
    /// Clear the offline flag and restore queued messages
    Online,
    /// List commands
    Help,
    /// Leave
    Quit,
}

/// Why a line was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Unknown `/word`
    Unknown(String),
    /// Command needs an argument
    MissingArgument(&'static str),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown(cmd) => write!(f, "unknown command /{cmd} (try /help)"),
            Self::MissingArgument(cmd) => write!(f, "/{cmd} needs an argument"),
        }
    }
}

/// Parse one input line; `None` for blank input
pub fn parse(line: &str) -> Option<Result<Command, ParseError>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Some(Ok(Command::Say(line.to_string())));
    };

    let (word, arg) = match rest.split_once(char::is_whitespace) {
        Some((word, arg)) => (word, Some(arg.trim()).filter(|a| !a.is_empty())),
        None => (rest, None),
    };

    let cmd = match word {
        "send" => Command::Send,
        "session" => Command::Session(arg.map(str::to_string)),
        "stop" => Command::Stop,
        "video" => Command::Video(clearable(arg)),
        "audio" => {
            let (url, label) = match arg.map(|a| a.split_once(char::is_whitespace)) {
                Some(Some((url, label))) => (Some(url), Some(label.trim().to_string())),
                Some(None) => (arg, None),
                None => (None, None),
            };
            Command::Audio {
                url: clearable(url),
                label,
            }
        }
        "image" => match arg {
            Some(path) => Command::Image(PathBuf::from(path)),
            None => return Some(Err(ParseError::MissingArgument("image"))),
        },
        "draft" => Command::Draft,
        "offline" => Command::Offline,
        "online" => Command::Online,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Some(Err(ParseError::Unknown(other.to_string()))),
    };
    Some(Ok(cmd))
}

/// `-` or a missing argument clears the field
fn clearable(arg: Option<&str>) -> Option<String> {
    arg.filter(|a| *a != "-").map(str::to_string)
}

/// Text printed by `/help`
pub const HELP: &str = "\
  <text>                 send text as a message
  /send                  send the current draft
  /session [id]          switch session (new id if omitted)
  /stop                  stop the streaming response
  /video <url|->         set or clear the video reference
  /audio <url|-> [label] set or clear the audio reference
  /image <path>          attach an image
  /draft                 show the draft
  /offline, /online      toggle connectivity
  /quit                  exit";

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_plain_text_is_a_message() {
        assert_eq!(parse("  draw a cat "), Some(Ok(Command::Say("draw a cat".into()))));
        assert_eq!(parse("   "), None);
    }

    #[test]
    fn test_session_with_and_without_id() {
        assert_eq!(parse("/session a"), Some(Ok(Command::Session(Some("a".into())))));
        assert_eq!(parse("/session"), Some(Ok(Command::Session(None))));
    }

    #[test]
    fn test_media_references_clear_with_dash() {
        assert_eq!(
            parse("/video https://cdn/v.mp4"),
            Some(Ok(Command::Video(Some("https://cdn/v.mp4".into()))))
        );
        assert_eq!(parse("/video -"), Some(Ok(Command::Video(None))));
        assert_eq!(
            parse("/audio https://cdn/a.mp3 Rain on tin"),
            Some(Ok(Command::Audio {
                url: Some("https://cdn/a.mp3".into()),
                label: Some("Rain on tin".into()),
            }))
        );
        assert_eq!(
            parse("/audio"),
            Some(Ok(Command::Audio {
                url: None,
                label: None
            }))
        );
    }

    #[test]
    fn test_errors() {
        assert_eq!(parse("/image"), Some(Err(ParseError::MissingArgument("image"))));
        assert_eq!(parse("/dance"), Some(Err(ParseError::Unknown("dance".into()))));
    }
}
