//! Terminal implementation of [`UserInputCallback`].

use std::io::{self, BufRead, Write};

use colored::Colorize;

use regsync_sync::{ConfirmContext, Message, MessageCode, UserInputCallback};

/// Prints notices and asks y/n questions on stdin.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleCallback {
    interactive: bool,
    quiet: bool,
}

impl ConsoleCallback {
    /// `interactive == false` answers every prompt with its default (yes).
    /// `quiet` drops notices, keeping stdout free for `--json`.
    pub fn new(interactive: bool, quiet: bool) -> Self {
        Self { interactive, quiet }
    }
}

impl UserInputCallback for ConsoleCallback {
    fn confirm(&self, message: &Message, _context: ConfirmContext) -> bool {
        if !self.interactive {
            return true;
        }
        eprint!("{} {} ", message, "[Y/n]".dimmed());
        let _ = io::stderr().flush();
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(_) => parse_answer(&line),
            Err(_) => true,
        }
    }

    fn display(&self, message: &Message) {
        if self.quiet {
            return;
        }
        let tag = match message.code {
            MessageCode::Added => "A".green(),
            MessageCode::Updated | MessageCode::Overwritten => "U".cyan(),
            MessageCode::Conflicted => "C".red().bold(),
            MessageCode::Deleted => "D".yellow(),
            MessageCode::NotOverwritten | MessageCode::NotDeleted => "·".dimmed(),
            _ => "?".normal(),
        };
        println!("  {tag}  {}", message.path);
    }
}

/// Empty input takes the default.
fn parse_answer(line: &str) -> bool {
    !matches!(line.trim().to_ascii_lowercase().as_str(), "n" | "no")
}
