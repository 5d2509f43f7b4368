//! The seam for user interaction.
//!
//! Engines take an `Option<&dyn UserInputCallback>`. When it is `None`
//! every prompt resolves to its default, which is always the "yes" answer
//! for the way prompts are phrased: overwrite, delete, keep the local
//! deletion.

use std::fmt;

use crate::error::MessageCode;

/// Why a confirmation is being asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmContext {
    Overwrite,
    Delete,
}

/// A notice or prompt about one working-copy path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub code: MessageCode,
    pub path: String,
}

impl Message {
    pub fn new(code: MessageCode, path: impl Into<String>) -> Self {
        Self {
            code,
            path: path.into(),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.code.is_prompt() {
            write!(f, "{}: {}", self.path, self.code)
        } else {
            write!(f, "{}: {}", self.code, self.path)
        }
    }
}

/// Receiver of engine notices and yes/no prompts.
pub trait UserInputCallback {
    /// Answer a prompt. `true` is the affirmative reading of
    /// [`Message::code`].
    fn confirm(&self, message: &Message, context: ConfirmContext) -> bool;

    /// Show a notice.
    fn display(&self, message: &Message);
}

/// Ask `callback`, defaulting to `true` when there is none.
pub(crate) fn confirm_or_default(
    callback: Option<&dyn UserInputCallback>,
    message: &Message,
    context: ConfirmContext,
) -> bool {
    callback.map_or(true, |cb| cb.confirm(message, context))
}
