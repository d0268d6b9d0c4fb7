//! Turns [`UiUpdate`]s into terminal text
//!
//! Streaming characters are written as they arrive; everything else is a
//! full line. When a line has to interrupt a streaming message, a newline
//! is inserted first so the two never share a row.

use atelier_core::progress::ChannelState;
use atelier_core::{MessageRole, Notice, UiUpdate};

/// Stateful formatter for the update feed
#[derive(Debug, Default)]
pub struct Renderer {
    mid_line: bool,
    verbose: bool,
}

impl Renderer {
    pub fn new(verbose: bool) -> Self {
        Self {
            mid_line: false,
            verbose,
        }
    }

    /// Text to write for `update`, if any
    pub fn render(&mut self, update: &UiUpdate) -> Option<String> {
        let line = match update {
            UiUpdate::CharAppended { ch, .. } => {
                self.mid_line = *ch != '\n';
                return Some(ch.to_string());
            }
            UiUpdate::MessageCompleted { .. } => {
                return self.end_line();
            }
            UiUpdate::MessageAdded(message) => match message.role {
                // Echo of our own input
                MessageRole::User => return None,
                _ if message.streaming => {
                    let prefix = self.end_line().unwrap_or_default();
                    self.mid_line = true;
                    return Some(format!("{prefix}< "));
                }
                _ => format!("< {}", message.content),
            },
            UiUpdate::MessagePatched(message) => {
                let media = message.media.urls().join(" ");
                if media.is_empty() {
                    format!("< [{}] {}", message.id, message.content)
                } else {
                    format!("< [{}] {} {media}", message.id, message.content)
                }
            }
            UiUpdate::SessionActivated { session, restored } => {
                if *restored {
                    format!("-- session {session} (draft restored)")
                } else {
                    format!("-- session {session}")
                }
            }
            UiUpdate::JobsChanged(jobs) => {
                if jobs.is_empty() {
                    return None;
                }
                jobs.iter()
                    .map(|job| {
                        format!(
                            "   {:?} {} {}%{}",
                            job.kind,
                            job.progress_bar(20),
                            job.progress,
                            job.detail
                                .as_deref()
                                .map(|d| format!(" {d}"))
                                .unwrap_or_default()
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            UiUpdate::Status(Some(text)) => format!("   ... {text}"),
            UiUpdate::ErrorBanner(Some(text)) => format!("!! {text}"),
            UiUpdate::Notice(notice) => match notice {
                Notice::Queued { pending } => {
                    format!("-- offline: message saved ({pending} waiting)")
                }
                Notice::Busy => "-- still responding; /stop to interrupt".to_string(),
                Notice::Restored { count } => {
                    format!("-- back online: {count} saved message(s) moved to the draft (/send)")
                }
            },
            UiUpdate::DraftRestored(text) => format!("-- draft: {text}"),
            UiUpdate::ChannelState(state) if self.verbose => match state {
                ChannelState::Backoff { attempt, delay } => {
                    format!("   progress channel retry #{attempt} in {}s", delay.as_secs())
                }
                other => format!("   progress channel {other:?}"),
            },
            UiUpdate::Status(None)
            | UiUpdate::ErrorBanner(None)
            | UiUpdate::Loading(_)
            | UiUpdate::AssetsChanged
            | UiUpdate::EntitiesChanged
            | UiUpdate::ChannelState(_) => return None,
        };

        let prefix = self.end_line().unwrap_or_default();
        Some(format!("{prefix}{line}\n"))
    }

    fn end_line(&mut self) -> Option<String> {
        std::mem::take(&mut self.mid_line).then(|| "\n".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_core::{Message, MessageId};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_streaming_message_is_written_inline() {
        let mut renderer = Renderer::new(false);
        let id = MessageId::from_server("m1");

        let opened = renderer.render(&UiUpdate::MessageAdded(Message::streaming(id.clone())));
        assert_eq!(opened.as_deref(), Some("< "));

        let mut out = String::new();
        for ch in "Hi".chars() {
            out.push_str(&renderer.render(&UiUpdate::CharAppended { id: id.clone(), ch }).unwrap());
        }
        assert_eq!(out, "Hi");

        let done = renderer.render(&UiUpdate::MessageCompleted {
            id,
            content: "Hi".into(),
        });
        assert_eq!(done.as_deref(), Some("\n"));
    }

    #[test]
    fn test_line_interrupting_stream_starts_on_new_row() {
        let mut renderer = Renderer::new(false);
        let id = MessageId::from_server("m1");
        renderer.render(&UiUpdate::CharAppended { id, ch: 'a' });

        let out = renderer.render(&UiUpdate::Status(Some("searching".into())));
        assert_eq!(out.as_deref(), Some("\n   ... searching\n"));
    }

    #[test]
    fn test_quiet_updates() {
        let mut renderer = Renderer::new(false);
        assert_eq!(renderer.render(&UiUpdate::Loading(true)), None);
        assert_eq!(renderer.render(&UiUpdate::ChannelState(ChannelState::Open)), None);
        assert_eq!(renderer.render(&UiUpdate::MessageAdded(Message::user("hi"))), None);

        let mut verbose = Renderer::new(true);
        assert!(verbose
            .render(&UiUpdate::ChannelState(ChannelState::Open))
            .is_some());
    }
}
