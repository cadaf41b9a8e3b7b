//! Scintilla dispatch: the `ES` command (spec.md §4.10).
//!
//! `ES@msg,wparam@lparam$` takes two string arguments. The first packs
//! the symbolic message name and an optional `wparam` (comma-separated);
//! the second carries `lparam`, either as text (for messages that want a
//! string payload) or, if it parses as an integer, as a numeric `lparam`.
//! Either string argument may be empty, in which case the corresponding
//! value defaults to the top of the expression stack.

use sciteco_core::{Document, Error, ErrorKind, Int, Message};

/// Split the first `ES` string argument into a message name and an
/// optional explicit `wparam`.
pub fn parse_message_spec(spec: &str) -> (Option<&str>, Option<Int>) {
    let mut parts = spec.splitn(2, ',');
    let name = parts.next().filter(|s| !s.is_empty());
    let wparam = parts.next().and_then(|s| s.trim().parse::<Int>().ok());
    (name, wparam)
}

/// Dispatch one `ES` call. `stack_wparam`/`stack_lparam` are the
/// expression-stack fallbacks used when the corresponding part was
/// omitted from the string arguments.
pub fn execute(
    doc: &mut dyn Document,
    msg_spec: &str,
    lparam_spec: &str,
    stack_wparam: Int,
    stack_lparam: Int,
) -> sciteco_core::Result<Int> {
    let (name, wparam_override) = parse_message_spec(msg_spec);
    let name = name.ok_or_else(|| Error::new(ErrorKind::ArgExpected("ES message".to_string())))?;
    let msg = Message::from_name(name)
        .ok_or_else(|| Error::new(ErrorKind::Module(format!("unknown Scintilla message {name}"))))?;
    let wparam = wparam_override.unwrap_or(stack_wparam);
    let (lparam, lparam_text) = match lparam_spec.trim().parse::<Int>() {
        Ok(n) if !lparam_spec.trim().is_empty() => (n, None),
        _ if lparam_spec.is_empty() => (stack_lparam, None),
        _ => (stack_lparam, Some(lparam_spec)),
    };
    Ok(doc.ssm(msg, wparam, lparam, lparam_text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sciteco_core::MemDocument;

    #[test]
    fn parses_message_and_wparam() {
        let (name, wparam) = parse_message_spec("GOTOPOS,5");
        assert_eq!(name, Some("GOTOPOS"));
        assert_eq!(wparam, Some(5));
    }

    #[test]
    fn dispatches_addtext_with_text_lparam() {
        let mut doc = MemDocument::from_str("ab");
        doc.goto_pos(1);
        execute(&mut doc, "ADDTEXT", "X", 0, 0).unwrap();
        assert_eq!(doc.as_string(), "aXb");
    }

    #[test]
    fn unknown_message_errors() {
        let mut doc = MemDocument::new();
        assert!(execute(&mut doc, "NOSUCHMESSAGE", "", 0, 0).is_err());
    }
}
