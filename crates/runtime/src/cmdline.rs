//! The command-line controller (spec.md §4.8).
//!
//! [`Machine`] and [`crate::commands`] together implement the parser and
//! its undo log; this module is the thin layer on top that a front-end
//! actually drives one keystroke at a time: append the character, run the
//! parser, and apply the two policies spec.md §7 assigns to the
//! controller rather than to the parser itself -- auto-rubout of a failed
//! keystroke in interactive mode, and command-line replacement (`{`/`}`).

use crate::commands;
use crate::machine::Machine;
use sciteco_core::{Error, ErrorKind, Result};

/// Name of the Q-Register `{`/`}` stage a replacement through: codepoint
/// 27 (ESC), which no ordinary Q-Register reference can ever name (every
/// real reference is one printable character, a `.`-prefixed local, or a
/// `#XY` pair).
pub const REPLACEMENT_REGISTER: &str = "\u{1b}";

/// What happened to the character just fed.
#[derive(Debug, PartialEq, Eq)]
pub enum Fed {
    /// It ran (or was absorbed as a command-line-replacement edit); keep
    /// feeding keystrokes.
    Continued,
    /// The top-level macro returned (`$$`): this command line is done.
    Done,
}

/// Feed one keystroke to the controller.
///
/// While a `{`/`}` replacement is in progress (`{` has run and `}` hasn't
/// yet), every character other than `}` is a raw edit of the replacement
/// register's text rather than a new command -- spec.md §4.8 "the user
/// may edit the command line as text". Those edits are scratch work: they
/// touch only the replacement register's document, never the top-level
/// command line or its savepoint stack, because none of it is "real"
/// until `}` re-feeds the result through the ordinary per-character path.
/// `}` itself is always dispatched normally; [`crate::commands::step`]'s
/// `}` handler is what raises the internal replace signal this function
/// catches.
pub fn type_char(m: &mut Machine, c: char) -> Result<Fed> {
    if is_editing_replacement(m) && c != '}' {
        let pos = m.doc().length();
        let inserted = m.doc_mut().insert(pos, &c.to_string());
        m.dot = pos + inserted;
        return Ok(Fed::Continued);
    }

    m.macros[0].text.push(c);
    match commands::advance(m) {
        Ok(()) => Ok(Fed::Continued),
        Err(e) => handle_error(m, e),
    }
}

/// Rub out the most recently typed keystroke.
///
/// While editing the replacement register, this pops one character off
/// its *end* directly -- a raw backspace over scratch text, not a replay
/// of undo tokens -- until the register is emptied, at which point a
/// further rubout falls through to [`Machine::rubout_char`] and cancels
/// the `{` itself via the undo token that command pushed. Otherwise this
/// is exactly `Machine::rubout_char`.
pub fn rubout(m: &mut Machine) -> bool {
    if is_editing_replacement(m) {
        let len = m.doc().length();
        if len == 0 {
            return m.rubout_char();
        }
        m.doc_mut().delete_range(len - 1, len);
        m.dot = len - 1;
        true
    } else {
        m.rubout_char()
    }
}

fn is_editing_replacement(m: &Machine) -> bool {
    m.editing_qreg.as_deref() == Some(REPLACEMENT_REGISTER)
}

fn handle_error(m: &mut Machine, e: Error) -> Result<Fed> {
    match &e.kind {
        ErrorKind::CmdLine(new_text) => apply_replacement(m, new_text.clone()),
        ErrorKind::Return => Ok(Fed::Done),
        ErrorKind::Interrupted | ErrorKind::Quit(_) => Err(e),
        _ if m.is_interactive() => {
            // spec.md §7 "the controller rubs out the offending character
            // so the command line remains valid".
            m.rubout_char();
            Err(e)
        }
        _ => Err(e),
    }
}

/// Common spec.md §4.8 replacement machinery: rub out back to the first
/// point where `old` and `new` differ, then feed `new`'s remaining
/// characters as freshly typed. If that feed raises an ordinary error,
/// undo it and re-feed `old`'s own remaining characters instead, so the
/// command line ends up exactly as it was before `{` ran.
fn apply_replacement(m: &mut Machine, new_text: String) -> Result<Fed> {
    let old_text = m.replacement_origin.take().unwrap_or_default();
    let old_chars: Vec<char> = old_text.chars().collect();
    let new_chars: Vec<char> = new_text.chars().collect();
    let common = old_chars
        .iter()
        .zip(new_chars.iter())
        .take_while(|(a, b)| a == b)
        .count();

    rub_out_to(m, common);

    match feed_suffix(m, &new_chars[common..]) {
        Ok(fed) => Ok(fed),
        Err(e) if e.is_internal_signal() => Err(e),
        Err(e) => {
            rub_out_to(m, common);
            // Re-feed the old suffix to restore exactly the pre-`{` line.
            // A failure here would mean the command line was already
            // broken before `{` ran, which cannot happen -- it had
            // already executed successfully once.
            feed_suffix(m, &old_chars[common..])?;
            m.push_message(format!("{e}"));
            Ok(Fed::Continued)
        }
    }
}

fn rub_out_to(m: &mut Machine, target_len: usize) {
    while m.macros[0].text.len() > target_len {
        if !m.rubout_char() {
            break;
        }
    }
}

fn feed_suffix(m: &mut Machine, chars: &[char]) -> Result<Fed> {
    for &c in chars {
        m.macros[0].text.push(c);
        commands::advance(m)?;
    }
    Ok(Fed::Continued)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sciteco_core::MemDocument;

    fn feed(m: &mut Machine, s: &str) -> Result<Fed> {
        let mut last = Fed::Continued;
        for c in s.chars() {
            last = type_char(m, c)?;
        }
        Ok(last)
    }

    #[test]
    fn replacement_edits_the_command_line_and_buffer() {
        let mut m = Machine::new(MemDocument::new(), true);
        feed(&mut m, "Ihello\u{1b}").unwrap();
        assert_eq!(m.doc().text_range(0, m.doc().length()), "hello");

        type_char(&mut m, '{').unwrap();
        assert!(is_editing_replacement(&m));

        // rub out the trailing ESC and "hello", leaving just "I"
        for _ in 0..6 {
            assert!(rubout(&mut m));
        }
        feed(&mut m, "world\u{1b}").unwrap();
        type_char(&mut m, '}').unwrap();

        assert!(!is_editing_replacement(&m));
        assert_eq!(m.doc().text_range(0, m.doc().length()), "world");
    }

    #[test]
    fn broken_replacement_restores_the_old_line() {
        let mut m = Machine::new(MemDocument::new(), true);
        feed(&mut m, "Ihi\u{1b}").unwrap();
        assert_eq!(m.doc().text_range(0, m.doc().length()), "hi");

        type_char(&mut m, '{').unwrap();
        // Replace the whole line with something that fails to parse
        // (an unmatched `>` has no open loop).
        for _ in 0..4 {
            rubout(&mut m);
        }
        feed(&mut m, ">").unwrap();
        let err = type_char(&mut m, '}');
        assert!(err.is_ok());
        assert_eq!(m.doc().text_range(0, m.doc().length()), "hi");
    }

    #[test]
    fn plain_typing_auto_rubs_out_a_failed_keystroke() {
        let mut m = Machine::new(MemDocument::new(), true);
        let before = m.macros[0].text.len();
        assert!(type_char(&mut m, '>').is_err());
        assert_eq!(m.macros[0].text.len(), before);
    }
}
