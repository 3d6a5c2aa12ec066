use std::io::{self, Write};

use tracing::warn;

use crate::chat::Conversation;
use crate::reply::ReplySurface;

pub fn print_help(out: &mut impl Write) -> io::Result<()> {
    writeln!(
        out,
        "/help     Show help\n/history  Show the conversation so far\n/tools    Show tool definitions (JSON)\n/clear    Clear screen\n/quit     Quit (also /exit)\nAnything else is sent to the assistant."
    )
}

/// `None` when the line is not a command and should go to the assistant.
/// `Some(true)` asks the loop to exit.
pub fn handle_command(
    line: &str,
    conversation: &Conversation,
    out: &mut impl Write,
) -> io::Result<Option<bool>> {
    let cmd = line.trim();
    if !cmd.starts_with('/') {
        return Ok(None);
    }
    match cmd {
        "/help" => print_help(out)?,
        "/history" => {
            let history = conversation.history();
            if history.is_empty() {
                writeln!(out, "(no messages yet)")?;
            }
            for turn in history {
                writeln!(out, "{}: {}", turn.role, turn.content)?;
            }
        }
        "/tools" => {
            let defs = conversation.invoker().definitions();
            let json = serde_json::to_string_pretty(&defs).map_err(io::Error::other)?;
            writeln!(out, "{json}")?;
        }
        "/clear" => {
            write!(out, "\x1B[2J\x1B[H")?;
        }
        "/quit" | "/exit" => return Ok(Some(true)),
        other => writeln!(out, "unknown command: {other} (try /help)")?,
    }
    out.flush()?;
    Ok(Some(false))
}

/// Streams the reply to a terminal by writing only the part not yet shown.
pub struct TerminalSurface<W: Write> {
    out: W,
    shown: String,
    write_failed: bool,
}

impl<W: Write> TerminalSurface<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            shown: String::new(),
            write_failed: false,
        }
    }

    /// End the current reply line and reset for the next turn.
    pub fn finish(&mut self) -> io::Result<()> {
        if !self.shown.is_empty() {
            writeln!(self.out)?;
        }
        self.shown.clear();
        self.out.flush()
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_suffix(&mut self, text: &str) -> io::Result<()> {
        let suffix = match text.strip_prefix(self.shown.as_str()) {
            Some(suffix) => suffix,
            None => {
                // Not an extension of what is on screen; start a fresh line.
                writeln!(self.out)?;
                text
            }
        };
        if suffix.is_empty() {
            return Ok(());
        }
        write!(self.out, "{suffix}")?;
        self.out.flush()?;
        self.shown = text.to_string();
        Ok(())
    }
}

impl<W: Write> ReplySurface for TerminalSurface<W> {
    fn render(&mut self, text: &str) {
        if let Err(e) = self.write_suffix(text)
            && !self.write_failed
        {
            // Only the first failure is logged; a closed terminal fails every call.
            warn!(err=%e, "reply render failed");
            self.write_failed = true;
        }
    }
}
