//! Terminal Rendering
//!
//! Turns session events into lines on a terminal. The typing animation
//! publishes cumulative prefixes; only the new suffix is written each time,
//! so a reply appears to be typed in place.
//!
//! Notices that arrive while a reply is being typed (a generated title, a
//! persistence warning) are held back until the reply line is finished.

use std::io::{self, Write};

use mediscan_core::{ChatMessage, MessageRole, NotifyLevel, SessionSummary};

/// Column at which whole messages are wrapped
const WRAP_WIDTH: usize = 80;

const ASSISTANT_LABEL: &str = "MediScan: ";
const USER_LABEL: &str = "You: ";

/// Line-oriented renderer
pub struct Display<W: Write> {
    out: W,
    /// Key of the reply being typed and how many bytes of it are printed
    typing: Option<(String, usize)>,
    held: Vec<String>,
}

impl Display<io::Stdout> {
    /// Render to standard output
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> Display<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            typing: None,
            held: Vec::new(),
        }
    }

    /// Print the input prompt
    pub fn prompt(&mut self) -> io::Result<()> {
        write!(self.out, "> ")?;
        self.out.flush()
    }

    /// Write the newly revealed part of a reply
    pub fn typing(&mut self, key: &str, revealed: &str, done: bool) -> io::Result<()> {
        let printed = match &self.typing {
            Some((current, printed)) if current == key => *printed,
            Some(_) => {
                // A new reply started before the old one was finished
                writeln!(self.out)?;
                self.start_reply(key)?
            }
            None => self.start_reply(key)?,
        };

        if let Some(delta) = revealed.get(printed..) {
            write!(self.out, "{delta}")?;
            self.typing = Some((key.to_string(), revealed.len()));
        }

        if done {
            writeln!(self.out)?;
            self.typing = None;
            for line in std::mem::take(&mut self.held) {
                writeln!(self.out, "{line}")?;
            }
        }
        self.out.flush()
    }

    /// Print a notification
    pub fn notify(&mut self, level: NotifyLevel, message: &str) -> io::Result<()> {
        let tag = match level {
            NotifyLevel::Info => "info",
            NotifyLevel::Warning => "warning",
            NotifyLevel::Error => "error",
            NotifyLevel::Success => "ok",
        };
        self.notice(&format!("[{tag}] {message}"))
    }

    /// Print the conversation title
    pub fn title(&mut self, title: &str) -> io::Result<()> {
        self.notice(&format!("── {title} ──"))
    }

    /// Print a line, or hold it while a reply is being typed
    pub fn notice(&mut self, text: &str) -> io::Result<()> {
        let line = textwrap::fill(text, WRAP_WIDTH);
        if self.typing.is_some() {
            self.held.push(line);
            return Ok(());
        }
        writeln!(self.out, "{line}")?;
        self.out.flush()
    }

    /// Print whole messages, skipping the system prompt
    pub fn transcript(&mut self, messages: &[ChatMessage]) -> io::Result<()> {
        for message in messages {
            let label = match message.role {
                MessageRole::User => USER_LABEL,
                MessageRole::Assistant => ASSISTANT_LABEL,
                MessageRole::System => continue,
            };
            let indent = " ".repeat(label.len());
            let options = textwrap::Options::new(WRAP_WIDTH)
                .initial_indent(label)
                .subsequent_indent(&indent);
            writeln!(self.out, "{}", textwrap::fill(&message.content, options))?;
            if message.image_preview.is_some() {
                writeln!(self.out, "{indent}[image attached]")?;
            }
        }
        self.out.flush()
    }

    /// Print the conversation list
    pub fn sessions(&mut self, sessions: &[SessionSummary]) -> io::Result<()> {
        if sessions.is_empty() {
            writeln!(self.out, "No saved conversations.")?;
        }
        for session in sessions {
            writeln!(
                self.out,
                "{}  {}  {}",
                session.updated_at.format("%Y-%m-%d %H:%M"),
                session.id,
                session.title
            )?;
        }
        self.out.flush()
    }

    fn start_reply(&mut self, key: &str) -> io::Result<usize> {
        write!(self.out, "{ASSISTANT_LABEL}")?;
        self.typing = Some((key.to_string(), 0));
        Ok(0)
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }
}
