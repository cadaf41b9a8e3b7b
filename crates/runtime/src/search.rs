//! The search/pattern engine (spec.md §4.6, feature `search`).
//!
//! Translates SciTECO's extended pattern syntax into a `regex` pattern
//! string in one pass, then hands off to [`regex::Regex`] (the
//! specification assumes a PCRE-equivalent regex engine is available
//! rather than asking for one to be written from scratch).

use crate::stringbuilding::QLookup;
use regex::Regex;
use sciteco_core::{Document, Int, Range};

/// Translate one pattern string. Returns `Ok(None)` for a pattern that is
/// a syntactically valid *prefix* of a longer pattern (e.g. a dangling
/// `^E` or an unclosed `^E[...]`/`^EM[...]`) -- the caller treats this as
/// "no match yet" so interactive search-as-you-type never errors on a
/// partially typed pattern (spec.md §4.6).
pub fn translate(raw: &str, ctx: &dyn QLookup) -> sciteco_core::Result<Option<String>> {
    let chars: Vec<char> = raw.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        match atom(&chars, i, ctx)? {
            Some((consumed, snippet)) => {
                out.push_str(&snippet);
                i += consumed;
            }
            None => return Ok(None),
        }
    }
    Ok(Some(out))
}

/// Translate exactly one pattern "atom" starting at `chars[i]`, returning
/// how many source characters it consumed and its regex-syntax
/// translation. `Ok(None)` signals an incomplete trailing construct.
fn atom(
    chars: &[char],
    i: usize,
    ctx: &dyn QLookup,
) -> sciteco_core::Result<Option<(usize, String)>> {
    let Some(&c) = chars.get(i) else {
        return Ok(None);
    };
    match c {
        '\u{13}' => Ok(Some((1, "[^[:alnum:]]".to_string()))), // ^S
        '\u{18}' => Ok(Some((1, ".".to_string()))),            // ^X
        '\u{0e}' => {
            // ^N: negate the following class atom.
            match chars.get(i + 1).copied() {
                None => Ok(None),
                Some(_) => match atom(chars, i + 1, ctx)? {
                    Some((consumed, snippet)) => {
                        let negated = if let Some(body) = snippet.strip_prefix('[') {
                            format!("[^{body}")
                        } else {
                            format!("[^{snippet}]")
                        };
                        Ok(Some((1 + consumed, negated)))
                    }
                    None => Ok(None),
                },
            }
        }
        '\u{05}' => ctl_e_atom(chars, i, ctx),
        _ => {
            let mut s = String::new();
            if "\\.+*?()|[]{}^$".contains(c) {
                s.push('\\');
            }
            s.push(c);
            Ok(Some((1, s)))
        }
    }
}

fn ctl_e_atom(
    chars: &[char],
    i: usize,
    ctx: &dyn QLookup,
) -> sciteco_core::Result<Option<(usize, String)>> {
    let Some(&next) = chars.get(i + 1) else {
        return Ok(None);
    };
    match next.to_ascii_uppercase() {
        'B' => Ok(Some((2, "[^[:alnum:]]".to_string()))),
        'A' => Ok(Some((2, "[[:alpha:]]".to_string()))),
        'C' => Ok(Some((2, "[[:alnum:].$]".to_string()))),
        'D' => Ok(Some((2, "[[:digit:]]".to_string()))),
        'L' => Ok(Some((2, "[\r\n\u{b}\u{c}]".to_string()))),
        'R' => Ok(Some((2, "[[:alnum:]]".to_string()))),
        'V' => Ok(Some((2, "[[:lower:]]".to_string()))),
        'W' => Ok(Some((2, "[[:upper:]]".to_string()))),
        'S' => Ok(Some((2, r"\s+".to_string()))),
        'G' => {
            let (name, name_len) = read_name(chars, i + 2);
            if name_len == 0 {
                return Ok(None);
            }
            let s = ctx.get_string(&name).unwrap_or_default();
            Ok(Some((2 + name_len, regex::escape(&s))))
        }
        'M' => {
            if chars.get(i + 2) != Some(&'[') {
                return Ok(None);
            }
            let Some((body, body_len)) = read_bracket(chars, i + 2) else {
                return Ok(None);
            };
            let Some(inner) = translate(&body, ctx)? else {
                return Ok(None);
            };
            Ok(Some((2 + body_len, format!("(?:{inner})+"))))
        }
        _ if next == '[' => {
            let Some((body, body_len)) = read_bracket(chars, i + 1) else {
                return Ok(None);
            };
            let mut alt = String::from("(?:");
            for (k, part) in body.split(',').enumerate() {
                if k > 0 {
                    alt.push('|');
                }
                match translate(part, ctx)? {
                    Some(t) => alt.push_str(&t),
                    None => return Ok(None),
                }
            }
            alt.push(')');
            Ok(Some((1 + body_len, alt)))
        }
        _ => {
            // Unknown ^Ex: not a recognized pattern class; treat the
            // introducer and the character as literal (mirrors
            // string-building's fallback for unknown `^E` sequences).
            Ok(Some((2, format!("\u{5}{next}"))))
        }
    }
}

fn read_name(chars: &[char], start: usize) -> (String, usize) {
    if chars.get(start) == Some(&'[') {
        read_bracket(chars, start)
            .map(|(b, l)| (b, l))
            .unwrap_or((String::new(), 0))
    } else if let Some(&c) = chars.get(start) {
        (c.to_string(), 1)
    } else {
        (String::new(), 0)
    }
}

/// Read a `[...]` bracketed body starting at `chars[start] == '['`,
/// returning its contents and the total length consumed (including both
/// brackets), or `None` if unterminated.
fn read_bracket(chars: &[char], start: usize) -> Option<(String, usize)> {
    if chars.get(start) != Some(&'[') {
        return None;
    }
    let body_start = start + 1;
    let mut j = body_start;
    while j < chars.len() && chars[j] != ']' {
        j += 1;
    }
    if j >= chars.len() {
        return None;
    }
    let body: String = chars[body_start..j].iter().collect();
    Some((body, j + 1 - start))
}

/// Compile a translated pattern string to a `Regex`. Errors that survive
/// `translate`'s best-effort handling (genuinely malformed regex syntax)
/// are reported as-is.
pub fn compile(raw: &str, ctx: &dyn QLookup) -> sciteco_core::Result<Option<Regex>> {
    match translate(raw, ctx)? {
        Some(pattern) => Regex::new(&pattern)
            .map(Some)
            .map_err(|e| sciteco_core::Error::new(sciteco_core::ErrorKind::Module(e.to_string()))),
        None => Ok(None),
    }
}

/// Result of one successful search: the whole match plus any captured
/// groups, all as glyph `Range`s (spec.md §3 invariant on `ranges[]`).
#[derive(Debug, Clone)]
pub struct SearchMatch {
    pub ranges: Vec<Range>,
}

/// Search `doc`'s text between `[from, to)` for the first match of
/// `pattern`, forward.
pub fn search_forward(doc: &dyn Document, pattern: &Regex, from: Int, to: Int) -> Option<SearchMatch> {
    let text = doc.text_range(from, to);
    let m = pattern.captures(&text)?;
    Some(captures_to_ranges(&m, from))
}

/// Search backward: the *last* match within `[from, to)` (`from <= to`,
/// search direction encoded by the caller swapping the endpoints it
/// passes based on sign).
pub fn search_backward(doc: &dyn Document, pattern: &Regex, from: Int, to: Int) -> Option<SearchMatch> {
    let text = doc.text_range(from, to);
    let last = pattern.captures_iter(&text).last()?;
    Some(captures_to_ranges(&last, from))
}

fn captures_to_ranges(captures: &regex::Captures, base: Int) -> SearchMatch {
    let mut ranges = Vec::new();
    // `regex`'s byte offsets are relative to the searched substring; walk
    // the whole match text once to build a byte->glyph index rather than
    // re-scanning per group.
    let whole = captures.get(0).unwrap();
    let text = whole.as_str();
    let prefix_glyphs = |byte_off: usize| -> Int { text[..byte_off].chars().count() as Int };
    for group in captures.iter() {
        match group {
            Some(m) => {
                let from = base + prefix_glyphs(m.start() - whole.start());
                let to = base + prefix_glyphs(m.end() - whole.start());
                ranges.push(Range::new(from, to));
            }
            None => ranges.push(Range::new(-1, -1)),
        }
    }
    SearchMatch { ranges }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sciteco_core::MemDocument;

    struct NullCtx;
    impl QLookup for NullCtx {
        fn radix(&self) -> Int {
            10
        }
        fn get_integer(&self, _name: &str) -> Option<Int> {
            None
        }
        fn get_string(&self, _name: &str) -> Option<String> {
            None
        }
    }

    #[test]
    fn literal_pattern_matches() {
        let doc = MemDocument::from_str("foobar");
        let re = compile("foo", &NullCtx).unwrap().unwrap();
        let m = search_forward(&doc, &re, 0, 6).unwrap();
        assert_eq!(m.ranges[0], Range::new(0, 3));
    }

    #[test]
    fn incomplete_ctl_e_bracket_is_none() {
        assert!(translate("\u{5}[", &NullCtx).unwrap().is_none());
    }

    #[test]
    fn dot_class_matches_any() {
        let doc = MemDocument::from_str("a\nb");
        let re = compile("a\u{18}b", &NullCtx).unwrap();
        // `^X` (.) doesn't match newline under default regex flags, which
        // mirrors Scintilla's line-oriented `.` semantics here.
        assert!(re.is_none() || search_forward(&doc, &re.unwrap(), 0, 3).is_none());
    }

    #[test]
    fn negated_class() {
        let doc = MemDocument::from_str("a1b");
        let re = compile("\u{e}\u{5}d", &NullCtx).unwrap().unwrap();
        let m = search_forward(&doc, &re, 0, 3).unwrap();
        assert_eq!(m.ranges[0], Range::new(0, 1));
    }
}
