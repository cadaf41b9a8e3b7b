//! The Q-Register-spec sub-machine (spec.md §4.4): parses the
//! `q` / `.q` / `#qq` / `[name]` register-reference syntax that follows
//! almost every Q-Register command letter.

use crate::stringbuilding::{self, QLookup};
use sciteco_core::{Error, ErrorKind, Result};

/// A parsed register reference: its resolved name and whether the `.`
/// local-register prefix was present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QRegRef {
    pub name: String,
    pub local: bool,
}

/// Parse one register reference starting at byte offset `*pos` within
/// `input`, advancing `*pos` past what was consumed. `ctx` backs the
/// nested string-building machine used inside `[...]` forms (spec.md
/// §4.4 "a nested string-building machine inside the bracketed form").
pub fn parse(input: &[char], pos: &mut usize, ctx: &dyn QLookup) -> Result<QRegRef> {
    let local = if input.get(*pos) == Some(&'.') {
        *pos += 1;
        true
    } else {
        false
    };

    let Some(&c) = input.get(*pos) else {
        return Err(Error::new(ErrorKind::ArgExpected(
            "Q-Register name".to_string(),
        )));
    };

    if c == '#' {
        *pos += 1;
        let a = *input
            .get(*pos)
            .ok_or_else(|| Error::new(ErrorKind::ArgExpected("Q-Register name".to_string())))?;
        let b = *input
            .get(*pos + 1)
            .ok_or_else(|| Error::new(ErrorKind::ArgExpected("Q-Register name".to_string())))?;
        *pos += 2;
        return Ok(QRegRef {
            name: format!("{a}{b}"),
            local,
        });
    }

    if c == '[' {
        let start = *pos + 1;
        let mut end = start;
        while end < input.len() && input[end] != ']' {
            end += 1;
        }
        if end >= input.len() {
            return Err(Error::new(ErrorKind::ArgExpected(
                "closing ']' in Q-Register name".to_string(),
            )));
        }
        let raw: String = input[start..end].iter().collect();
        *pos = end + 1;
        let name = stringbuilding::build(&raw, ctx)?;
        return Ok(QRegRef { name, local });
    }

    *pos += 1;
    Ok(QRegRef {
        name: c.to_string(),
        local,
    })
}

/// Convenience entry point over a plain `&str` (used by callers that
/// haven't already materialized a `Vec<char>`), returning the parsed
/// reference and the number of `chars` consumed.
pub fn parse_str(input: &str, ctx: &dyn QLookup) -> Result<(QRegRef, usize)> {
    let chars: Vec<char> = input.chars().collect();
    let mut pos = 0;
    let r = parse(&chars, &mut pos, ctx)?;
    Ok((r, pos))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullCtx;
    impl QLookup for NullCtx {
        fn radix(&self) -> sciteco_core::Int {
            10
        }
        fn get_integer(&self, _name: &str) -> Option<sciteco_core::Int> {
            None
        }
        fn get_string(&self, _name: &str) -> Option<String> {
            None
        }
    }

    #[test]
    fn single_char_name() {
        let (r, n) = parse_str("A", &NullCtx).unwrap();
        assert_eq!(r.name, "A");
        assert!(!r.local);
        assert_eq!(n, 1);
    }

    #[test]
    fn local_prefix() {
        let (r, _) = parse_str(".A", &NullCtx).unwrap();
        assert_eq!(r.name, "A");
        assert!(r.local);
    }

    #[test]
    fn two_char_name() {
        let (r, n) = parse_str("#XY", &NullCtx).unwrap();
        assert_eq!(r.name, "XY");
        assert_eq!(n, 3);
    }

    #[test]
    fn bracket_name_runs_string_building() {
        let (r, _) = parse_str("[foo]", &NullCtx).unwrap();
        assert_eq!(r.name, "foo");
    }

    #[test]
    fn missing_name_errors() {
        assert!(parse_str("", &NullCtx).is_err());
    }
}
