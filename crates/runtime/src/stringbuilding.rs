//! The string-building sub-machine (spec.md §4.4).
//!
//! Every command that takes a string argument (`I`, `O`, `S`, `FS`, …) runs
//! the raw argument text through this machine before using it: case
//! folding (`^V`/`^W`), verbatim escapes (`^Q`/`^R`), Q-Register
//! interpolation (`^E\q`, `^EUq`, `^EQq`), and shell-escaping (`^E@`).
//!
//! The machine is expressed here as a single pass over the already
//! collected raw argument rather than a literal character-at-a-time
//! `feed()` API: the top-level "expect-string" parser state (§4.1)
//! already accumulates the raw bytes up to the (unescaped) terminator, so
//! by the time building runs there is nothing left to do incrementally.
//! The per-character state machine and productions below are the same
//! either way.

use sciteco_core::{Error, ErrorKind, Int};

/// The lookup surface string-building needs from the Q-Register store,
/// kept as a trait so this module doesn't depend on `qregisters`
/// directly (`machine::Machine` is the real implementer).
pub trait QLookup {
    /// The current numeric radix (from the local `^R` register).
    fn radix(&self) -> Int;
    fn get_integer(&self, name: &str) -> Option<Int>;
    fn get_string(&self, name: &str) -> Option<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sticky {
    None,
    Upper,
    Lower,
}

/// Format `n` in `radix` (2..=36), unsigned magnitude with a leading `-`
/// for negative values -- the same convention `\` reads back.
pub fn format_radix_pub(n: Int, radix: Int) -> String {
    if radix < 2 {
        return n.to_string();
    }
    let neg = n < 0;
    let mut mag = n.unsigned_abs();
    if mag == 0 {
        return "0".to_string();
    }
    let digits = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut buf = Vec::new();
    while mag > 0 {
        buf.push(digits[(mag % radix as u64) as usize]);
        mag /= radix as u64;
    }
    if neg {
        buf.push(b'-');
    }
    buf.reverse();
    String::from_utf8(buf).unwrap()
}

/// Wrap `s` so a POSIX shell reads it back as one word (spec.md §4.4
/// `^E@`): single-quote it, escaping embedded single quotes.
fn shell_escape(s: &str) -> String {
    if !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || "-_./".contains(c)) {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

/// Read a register name starting at `chars[*i]`: either a single
/// character, a two-character `##` form, or a bracketed `[name]` form
/// (spec.md §4.4, §3 "register names"). Advances `*i` past what it
/// consumed.
fn read_register_name(chars: &[char], i: &mut usize) -> String {
    if *i >= chars.len() {
        return String::new();
    }
    if chars[*i] == '[' {
        let start = *i + 1;
        let mut j = start;
        while j < chars.len() && chars[j] != ']' {
            j += 1;
        }
        let name: String = chars[start..j].iter().collect();
        *i = (j + 1).min(chars.len());
        name
    } else {
        let c = chars[*i];
        *i += 1;
        c.to_string()
    }
}

/// Run the string-building pass over `raw`, producing the text that
/// should actually be inserted/compared/passed on.
pub fn build(raw: &str, ctx: &dyn QLookup) -> sciteco_core::Result<String> {
    let chars: Vec<char> = raw.chars().collect();
    let mut out = String::new();
    let mut sticky = Sticky::None;
    let mut i = 0;

    let fold = |c: char, one_shot: Option<Sticky>, sticky: Sticky| -> char {
        let mode = one_shot.unwrap_or(sticky);
        match mode {
            Sticky::Upper => c.to_ascii_uppercase(),
            Sticky::Lower => c.to_ascii_lowercase(),
            Sticky::None => c,
        }
    };

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\u{11}' | '\u{12}' if i + 1 < chars.len() => {
                // ^Q, ^R: emit the next character verbatim.
                out.push(chars[i + 1]);
                i += 2;
            }
            '\u{16}' => {
                // ^V: lower the next char, or toggle sticky-lower if doubled.
                if chars.get(i + 1) == Some(&'\u{16}') {
                    sticky = if sticky == Sticky::Lower {
                        Sticky::None
                    } else {
                        Sticky::Lower
                    };
                    i += 2;
                } else if let Some(&next) = chars.get(i + 1) {
                    out.push(fold(next, Some(Sticky::Lower), sticky));
                    i += 2;
                } else {
                    i += 1;
                }
            }
            '\u{17}' => {
                // ^W: upper the next char, or toggle sticky-upper if doubled.
                if chars.get(i + 1) == Some(&'\u{17}') {
                    sticky = if sticky == Sticky::Upper {
                        Sticky::None
                    } else {
                        Sticky::Upper
                    };
                    i += 2;
                } else if let Some(&next) = chars.get(i + 1) {
                    out.push(fold(next, Some(Sticky::Upper), sticky));
                    i += 2;
                } else {
                    i += 1;
                }
            }
            '\u{05}' => {
                // ^E: the escape-sequence introducer.
                i += 1;
                match chars.get(i) {
                    Some('\\') => {
                        i += 1;
                        let name = read_register_name(&chars, &mut i);
                        let n = ctx.get_integer(&name).unwrap_or(0);
                        out.push_str(&format_radix_pub(n, ctx.radix()));
                    }
                    Some('U') | Some('u') => {
                        i += 1;
                        let name = read_register_name(&chars, &mut i);
                        let n = ctx.get_integer(&name).unwrap_or(0);
                        if let Some(ch) = char::from_u32(n as u32) {
                            out.push(fold(ch, None, sticky));
                        }
                    }
                    Some('Q') | Some('q') => {
                        i += 1;
                        let name = read_register_name(&chars, &mut i);
                        let s = ctx.get_string(&name).unwrap_or_default();
                        for ch in s.chars() {
                            out.push(fold(ch, None, sticky));
                        }
                    }
                    Some('@') => {
                        i += 1;
                        // Shell-escape the remainder up to the next
                        // unescaped whitespace run, treated here as "the
                        // rest of the argument" for simplicity.
                        let rest: String = chars[i..].iter().collect();
                        out.push_str(&shell_escape(&rest));
                        i = chars.len();
                    }
                    Some(&other) => {
                        out.push('\u{05}');
                        out.push(other);
                        i += 1;
                    }
                    None => {
                        out.push('\u{05}');
                    }
                }
            }
            '^' if chars.get(i + 1).map(|c| *c != '^').unwrap_or(false) => {
                // Caret-mode: `^c` emits the control character C-@.
                let next = chars[i + 1];
                let upper = next.to_ascii_uppercase();
                if upper.is_ascii_uppercase() || upper == '@' {
                    let code = (upper as u32).wrapping_sub('@' as u32) & 0x1f;
                    out.push(char::from_u32(code).unwrap_or('\0'));
                    i += 2;
                } else {
                    return Err(Error::new(ErrorKind::Syntax(next)));
                }
            }
            _ => {
                out.push(fold(c, None, sticky));
                i += 1;
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ctx {
        radix: Int,
        reg_int: Int,
        reg_str: String,
    }

    impl QLookup for Ctx {
        fn radix(&self) -> Int {
            self.radix
        }
        fn get_integer(&self, _name: &str) -> Option<Int> {
            Some(self.reg_int)
        }
        fn get_string(&self, _name: &str) -> Option<String> {
            Some(self.reg_str.clone())
        }
    }

    fn ctx() -> Ctx {
        Ctx {
            radix: 10,
            reg_int: 65,
            reg_str: "hi".to_string(),
        }
    }

    #[test]
    fn verbatim_escape() {
        assert_eq!(build("\u{11}x", &ctx()).unwrap(), "x");
    }

    #[test]
    fn one_shot_case_fold() {
        assert_eq!(build("\u{16}hi\u{17}lo", &ctx()).unwrap(), "hiLo");
    }

    #[test]
    fn register_interpolation() {
        assert_eq!(build("\u{5}QA", &ctx()).unwrap(), "hi");
        assert_eq!(build("\u{5}UA", &ctx()).unwrap(), "A");
        assert_eq!(build("\u{5}\\A", &ctx()).unwrap(), "65");
    }

    #[test]
    fn caret_mode_control_char() {
        assert_eq!(build("^A", &ctx()).unwrap(), "\u{1}");
    }

    #[test]
    fn unknown_ctl_e_sequence_passes_through() {
        assert_eq!(build("\u{5}x", &ctx()).unwrap(), "\u{5}x");
    }
}
