//! Engine error type (spec.md §7).
//!
//! No error-derive crate is used here, matching the teacher workspace's own
//! `codegen::CodeGenError` (a hand-rolled enum with manual `Display` and
//! `std::error::Error` impls rather than `thiserror`/`anyhow`).

use std::fmt;

/// One stack frame of context: the Q-Register name, file name, or hook name
/// that introduced the macro invocation in which an error occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Human-readable description of what introduced this frame, e.g.
    /// `"Q-Register \"A\""`, `"file \"foo.tec\""`, `"hook \"ED\""`.
    pub description: String,
    /// Position (character offset) within that frame's macro text.
    pub position: usize,
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at position {}", self.description, self.position)
    }
}

/// The tagged error kinds from spec.md §7.
///
/// `Interrupted`, `CmdLine`, `Return` and `Quit` are internal signals rather
/// than user-facing failures; they are modelled as variants of the same
/// enum (per spec.md §9 "Exceptions for flow control") but are never caught
/// by ordinary command implementations — only the command-line controller,
/// the macro dispatcher, and the top-level driver match on them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Catch-all for most command-specific failures.
    Failed,
    /// Character not valid in the current parser state.
    Syntax(char),
    /// `@` or an extra `:` where the command does not allow it.
    Modifier(char),
    /// A command needed an argument it did not find.
    ArgExpected(String),
    /// Invalid codepoint for the current encoding.
    Codepoint(String),
    /// Attempt to move `dot` off the page.
    Move(String),
    /// Not enough words for a word-deletion command.
    Words(String),
    /// Invalid character range.
    Range(String),
    /// Index into `ranges[]` out of bounds.
    Subpattern(String),
    /// Buffer id does not exist.
    InvalidBuf(crate::types::Int),
    /// Q-Register does not exist where existence is required.
    InvalidQReg { name: String, local: bool },
    /// The operation is not meaningful for that register variant.
    QRegOpUnsupported { name: String, local: bool },
    /// Q-Reg used as a file name or env name contained a NUL byte.
    QRegContainsNull { name: String, local: bool },
    /// A macro ended while editing one of its own local Q-Registers.
    EditingLocalQReg(String),
    /// The memory limit would be exceeded by this command.
    MemLimit,
    /// Clipboard/OS pass-through error.
    Clipboard(String),
    /// I/O error from file load/save or process spawning.
    Io(String),
    /// Pass-through error from an external module/plugin.
    Module(String),
    /// SIGINT (or platform equivalent) was delivered.
    Interrupted,
    /// Internal signal from `}`: command-line replacement requested.
    CmdLine(String),
    /// Internal signal from `$$`: macro return, carrying the number of
    /// expression-stack values left for the caller (spec.md §4.9, scenario 6).
    Return,
    /// Internal signal from `^C^C`/the exit flag: terminate the process.
    Quit(crate::types::Int),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Failed => write!(f, "Failed"),
            ErrorKind::Syntax(c) => write!(f, "Syntax error \"{}\" (U+{:04X})", printable(*c), *c as u32),
            ErrorKind::Modifier(c) => write!(f, "Unexpected modifier on <{}>", c),
            ErrorKind::ArgExpected(cmd) => write!(f, "Argument expected for <{}>", cmd),
            ErrorKind::Codepoint(cmd) => write!(f, "Invalid Unicode codepoint for <{}>", cmd),
            ErrorKind::Move(cmd) => write!(f, "Attempt to move pointer off page with <{}>", cmd),
            ErrorKind::Words(cmd) => write!(f, "Not enough words to perform <{}>", cmd),
            ErrorKind::Range(cmd) => write!(f, "Invalid range specified for <{}>", cmd),
            ErrorKind::Subpattern(cmd) => write!(f, "Invalid subpattern specified for <{}>", cmd),
            ErrorKind::InvalidBuf(id) => write!(f, "Invalid buffer id {}", id),
            ErrorKind::InvalidQReg { name, local } => {
                write!(f, "Invalid {}Q-Register \"{}\"", local_prefix(*local), name)
            }
            ErrorKind::QRegOpUnsupported { name, local } => write!(
                f,
                "Operation unsupported on {}Q-Register \"{}\"",
                local_prefix(*local),
                name
            ),
            ErrorKind::QRegContainsNull { name, local } => write!(
                f,
                "{}Q-Register \"{}\" contains NUL",
                local_prefix(*local),
                name
            ),
            ErrorKind::EditingLocalQReg(name) => write!(
                f,
                "Macro ended while editing its own local Q-Register \"{}\"",
                name
            ),
            ErrorKind::MemLimit => write!(f, "Memory limit exceeded"),
            ErrorKind::Clipboard(msg) => write!(f, "Clipboard error: {}", msg),
            ErrorKind::Io(msg) => write!(f, "I/O error: {}", msg),
            ErrorKind::Module(msg) => write!(f, "Module error: {}", msg),
            ErrorKind::Interrupted => write!(f, "Interrupted"),
            ErrorKind::CmdLine(_) => write!(f, "(internal: command-line replacement)"),
            ErrorKind::Return => write!(f, "(internal: macro return)"),
            ErrorKind::Quit(code) => write!(f, "(internal: quit with code {})", code),
        }
    }
}

fn local_prefix(local: bool) -> &'static str {
    if local { "local " } else { "" }
}

/// Render a control character the way spec.md §3 requires for Q-Register
/// names and syntax errors: control characters shown as `^X`.
pub fn printable(c: char) -> String {
    let code = c as u32;
    if code < 0x20 {
        format!("^{}", (code as u8 + 0x40) as char)
    } else if code == 0x7f {
        "^?".to_string()
    } else {
        c.to_string()
    }
}

/// A fully-positioned engine error: a kind plus the frame chain describing
/// which Q-Register/file/hook macros were executing when it was raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub kind: ErrorKind,
    /// Innermost frame first.
    pub frames: Vec<Frame>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Error {
            kind,
            frames: Vec::new(),
        }
    }

    /// Push a frame describing the macro invocation currently unwinding
    /// through this error. Called by the macro dispatcher as the error
    /// propagates outward (spec.md §7 "frames stacked in a chain").
    pub fn push_frame(mut self, description: impl Into<String>, position: usize) -> Self {
        self.frames.push(Frame {
            description: description.into(),
            position,
        });
        self
    }

    /// Colon-modified commands never raise their natural failure error;
    /// they push a failure boolean instead. This predicate lets callers
    /// decide whether a given error is one of the un-catchable internal
    /// signals that must never be turned into a boolean (spec.md §7).
    pub fn is_internal_signal(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Interrupted | ErrorKind::CmdLine(_) | ErrorKind::Return | ErrorKind::Quit(_)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        for frame in &self.frames {
            write!(f, "\n  in {}", frame)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_frames() {
        let err = Error::new(ErrorKind::InvalidQReg {
            name: "A".to_string(),
            local: false,
        })
        .push_frame("Q-Register \"M\"", 12);
        let rendered = err.to_string();
        assert!(rendered.contains("Invalid Q-Register \"A\""));
        assert!(rendered.contains("Q-Register \"M\""));
    }

    #[test]
    fn control_char_printable() {
        assert_eq!(printable('\u{1}'), "^A");
        assert_eq!(printable('x'), "x");
    }

    #[test]
    fn internal_signals_are_flagged() {
        assert!(Error::new(ErrorKind::Return).is_internal_signal());
        assert!(!Error::new(ErrorKind::Failed).is_internal_signal());
    }
}
