//! The `Document` trait: the boundary the engine uses instead of embedding
//! Scintilla (spec.md §6). A real host wires in its own text buffer/view by
//! implementing this trait; the engine never assumes anything about how
//! glyphs are stored.
//!
//! The specification frames the boundary as a single `ssm(message_id,
//! wparam, lparam) -> Int` call. That shape is kept for the subset of
//! messages `ES` exposes to macros (`Document::ssm`), but the engine's own
//! command implementations go through the typed methods below rather than
//! re-encoding every call as three integers -- the same way a Rust rewrite
//! of a C vtable interface becomes a trait (spec.md §9).

use crate::types::Int;

/// End-of-line convention, as a Scintilla `SETEOLMODE`/`GETEOLMODE` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EolMode {
    Crlf = 0,
    Cr = 1,
    Lf = 2,
}

impl EolMode {
    pub fn as_str(self) -> &'static str {
        match self {
            EolMode::Crlf => "\r\n",
            EolMode::Cr => "\r",
            EolMode::Lf => "\n",
        }
    }

    pub fn from_int(n: Int) -> Option<Self> {
        match n {
            0 => Some(EolMode::Crlf),
            1 => Some(EolMode::Cr),
            2 => Some(EolMode::Lf),
            _ => None,
        }
    }
}

/// Scintilla message identifiers the engine dispatches through `ES`
/// (spec.md §6, §4.10). Only the subset meaningful without a real pointer
/// space is modelled; `GETRANGEPOINTER`/`GETGAPPOSITION` are accepted but
/// always report unsupported (`-1`) since no in-process buffer pointer
/// exists behind the trait boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    SetText,
    AddText,
    AppendText,
    DeleteRange,
    ReplaceSel,
    ClearAll,
    GotoPos,
    GetCurrentPos,
    SetSel,
    GetSel,
    GetLength,
    GetCharAt,
    GetTextRangeFull,
    GetRangePointer,
    GetGapPosition,
    PositionRelative,
    PositionFromLine,
    LineFromPosition,
    IndexPositionFromLine,
    LineFromIndexPosition,
    CountCharacters,
    GetEolMode,
    SetEolMode,
    BeginUndoAction,
    EndUndoAction,
    Undo,
    GetCodePage,
    SetCodePage,
    AllocateLineCharacterIndex,
    ReleaseLineCharacterIndex,
    SetRepresentation,
}

impl Message {
    /// Case-insensitive lookup with an optional `SCI_` prefix, matching the
    /// statically-sorted symbol table `ES` consults (spec.md §4.10).
    pub fn from_name(name: &str) -> Option<Self> {
        let upper = name.to_ascii_uppercase();
        let stripped = upper.strip_prefix("SCI_").unwrap_or(&upper);
        Some(match stripped {
            "SETTEXT" => Message::SetText,
            "ADDTEXT" => Message::AddText,
            "APPENDTEXT" => Message::AppendText,
            "DELETERANGE" => Message::DeleteRange,
            "REPLACESEL" => Message::ReplaceSel,
            "CLEARALL" => Message::ClearAll,
            "GOTOPOS" => Message::GotoPos,
            "GETCURRENTPOS" => Message::GetCurrentPos,
            "SETSEL" => Message::SetSel,
            "GETSEL" => Message::GetSel,
            "GETLENGTH" => Message::GetLength,
            "GETCHARAT" => Message::GetCharAt,
            "GETTEXTRANGEFULL" => Message::GetTextRangeFull,
            "GETRANGEPOINTER" => Message::GetRangePointer,
            "GETGAPPOSITION" => Message::GetGapPosition,
            "POSITIONRELATIVE" => Message::PositionRelative,
            "POSITIONFROMLINE" => Message::PositionFromLine,
            "LINEFROMPOSITION" => Message::LineFromPosition,
            "INDEXPOSITIONFROMLINE" => Message::IndexPositionFromLine,
            "LINEFROMINDEXPOSITION" => Message::LineFromIndexPosition,
            "COUNTCHARACTERS" => Message::CountCharacters,
            "GETEOLMODE" => Message::GetEolMode,
            "SETEOLMODE" => Message::SetEolMode,
            "BEGINUNDOACTION" => Message::BeginUndoAction,
            "ENDUNDOACTION" => Message::EndUndoAction,
            "UNDO" => Message::Undo,
            "GETCODEPAGE" => Message::GetCodePage,
            "SETCODEPAGE" => Message::SetCodePage,
            "ALLOCATELINECHARACTERINDEX" => Message::AllocateLineCharacterIndex,
            "RELEASELINECHARACTERINDEX" => Message::ReleaseLineCharacterIndex,
            "SETREPRESENTATION" => Message::SetRepresentation,
            _ => return None,
        })
    }
}

/// The document/view boundary. All positions are glyph (character) offsets,
/// not bytes (spec.md §3 invariant on `ranges[]`).
pub trait Document {
    /// Number of glyphs in the document.
    fn length(&self) -> Int;

    /// The codepoint at `pos`, or `None` if `pos` is off-page.
    fn char_at(&self, pos: Int) -> Option<char>;

    /// Text between `from` and `to` (glyph offsets, `from <= to`).
    fn text_range(&self, from: Int, to: Int) -> String;

    /// Replace the whole document.
    fn set_text(&mut self, text: &str);

    /// Insert `text` at `pos`, returning the number of glyphs inserted.
    fn insert(&mut self, pos: Int, text: &str) -> Int;

    /// Delete glyphs in `[from, to)`.
    fn delete_range(&mut self, from: Int, to: Int);

    /// Move `pos` by `delta` glyphs without clamping; `None` if the result
    /// would be off-page.
    fn position_relative(&self, pos: Int, delta: Int) -> Option<Int>;

    /// First glyph position of `line` (0-based).
    fn position_from_line(&self, line: Int) -> Int;

    /// Line number (0-based) containing `pos`.
    fn line_from_position(&self, pos: Int) -> Int;

    /// Total number of lines.
    fn line_count(&self) -> Int;

    /// Current EOL convention.
    fn eol_mode(&self) -> EolMode;
    fn set_eol_mode(&mut self, mode: EolMode);

    /// Codepage: `0` = single-byte, `65001` = UTF-8.
    fn code_page(&self) -> Int;
    fn set_code_page(&mut self, cp: Int);

    /// Begin/end a grouped native-undo action (so that a single TECO
    /// command's mutations collapse into one native undo step, per
    /// spec.md §4.5's mention of `BEGIN/ENDUNDOACTION`).
    fn begin_undo_action(&mut self);
    fn end_undo_action(&mut self);

    /// Perform one native undo step (`SCI_UNDO`), used by undo tokens that
    /// restore document content by replaying the document's own undo
    /// history rather than a captured byte copy.
    fn undo(&mut self);

    /// Caret (`dot`) position.
    fn current_pos(&self) -> Int;
    fn goto_pos(&mut self, pos: Int);

    /// Selection anchor/caret pair.
    fn selection(&self) -> (Int, Int);
    fn set_selection(&mut self, anchor: Int, caret: Int);

    /// Dispatch a raw Scintilla-style message (the `ES` command, spec.md
    /// §4.10). `lparam_text` carries the optional string payload for
    /// messages that need one (`SETTEXT`/`ADDTEXT`/…); it is ignored by
    /// messages that don't.
    fn ssm(&mut self, msg: Message, wparam: Int, lparam: Int, lparam_text: Option<&str>) -> Int {
        match msg {
            Message::SetText => {
                self.set_text(lparam_text.unwrap_or(""));
                0
            }
            Message::AddText | Message::AppendText | Message::ReplaceSel => {
                let pos = if matches!(msg, Message::AppendText) {
                    self.length()
                } else {
                    self.current_pos()
                };
                self.insert(pos, lparam_text.unwrap_or(""))
            }
            Message::ClearAll => {
                self.set_text("");
                0
            }
            Message::DeleteRange => {
                let from = wparam;
                self.delete_range(from, from + lparam);
                0
            }
            Message::GotoPos => {
                self.goto_pos(wparam);
                0
            }
            Message::GetCurrentPos => self.current_pos(),
            Message::SetSel => {
                self.set_selection(wparam, lparam);
                0
            }
            Message::GetSel => self.selection().1,
            Message::GetLength => self.length(),
            Message::GetCharAt => self.char_at(wparam).map(|c| c as Int).unwrap_or(-1),
            Message::GetTextRangeFull => 0,
            Message::GetRangePointer | Message::GetGapPosition => -1,
            Message::PositionRelative => self.position_relative(wparam, lparam).unwrap_or(-1),
            Message::PositionFromLine => self.position_from_line(wparam),
            Message::LineFromPosition => self.line_from_position(wparam),
            Message::IndexPositionFromLine => self.position_from_line(wparam),
            Message::LineFromIndexPosition => self.line_from_position(wparam),
            Message::CountCharacters => (lparam - wparam).max(0),
            Message::GetEolMode => self.eol_mode() as Int,
            Message::SetEolMode => {
                if let Some(mode) = EolMode::from_int(wparam) {
                    self.set_eol_mode(mode);
                }
                0
            }
            Message::BeginUndoAction => {
                self.begin_undo_action();
                0
            }
            Message::EndUndoAction => {
                self.end_undo_action();
                0
            }
            Message::Undo => {
                self.undo();
                0
            }
            Message::GetCodePage => self.code_page(),
            Message::SetCodePage => {
                self.set_code_page(wparam);
                0
            }
            Message::AllocateLineCharacterIndex | Message::ReleaseLineCharacterIndex => 0,
            Message::SetRepresentation => 0,
        }
    }
}

/// A minimal in-memory `Document`, sufficient for tests and for the CLI
/// front-end when no richer host is wired in. Glyphs are Unicode scalar
/// values (`char`); no grapheme clustering is performed.
#[derive(Debug, Clone)]
pub struct MemDocument {
    chars: Vec<char>,
    dot: Int,
    anchor: Int,
    eol_mode: EolMode,
    code_page: Int,
    undo_depth: u32,
}

impl Default for MemDocument {
    fn default() -> Self {
        MemDocument {
            chars: Vec::new(),
            dot: 0,
            anchor: 0,
            eol_mode: EolMode::Lf,
            code_page: 65001,
            undo_depth: 0,
        }
    }
}

impl MemDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_str(s: &str) -> Self {
        let mut doc = Self::default();
        doc.set_text(s);
        doc
    }

    pub fn as_string(&self) -> String {
        self.chars.iter().collect()
    }

    fn clamp(&self, pos: Int) -> Int {
        pos.clamp(0, self.chars.len() as Int)
    }
}

impl Document for MemDocument {
    fn length(&self) -> Int {
        self.chars.len() as Int
    }

    fn char_at(&self, pos: Int) -> Option<char> {
        if pos < 0 || pos as usize >= self.chars.len() {
            None
        } else {
            Some(self.chars[pos as usize])
        }
    }

    fn text_range(&self, from: Int, to: Int) -> String {
        let from = self.clamp(from) as usize;
        let to = self.clamp(to) as usize;
        if from >= to {
            return String::new();
        }
        self.chars[from..to].iter().collect()
    }

    fn set_text(&mut self, text: &str) {
        self.chars = text.chars().collect();
        self.dot = self.clamp(self.dot);
        self.anchor = self.clamp(self.anchor);
    }

    fn insert(&mut self, pos: Int, text: &str) -> Int {
        let pos = self.clamp(pos) as usize;
        let inserted: Vec<char> = text.chars().collect();
        let n = inserted.len();
        self.chars.splice(pos..pos, inserted);
        n as Int
    }

    fn delete_range(&mut self, from: Int, to: Int) {
        let from = self.clamp(from) as usize;
        let to = self.clamp(to) as usize;
        if from < to {
            self.chars.drain(from..to);
        }
        self.dot = self.clamp(self.dot);
        self.anchor = self.clamp(self.anchor);
    }

    fn position_relative(&self, pos: Int, delta: Int) -> Option<Int> {
        let result = pos + delta;
        if result < 0 || result > self.chars.len() as Int {
            None
        } else {
            Some(result)
        }
    }

    fn position_from_line(&self, line: Int) -> Int {
        if line <= 0 {
            return 0;
        }
        let mut seen = 0;
        for (i, c) in self.chars.iter().enumerate() {
            if *c == '\n' {
                seen += 1;
                if seen == line {
                    return (i + 1) as Int;
                }
            }
        }
        self.chars.len() as Int
    }

    fn line_from_position(&self, pos: Int) -> Int {
        let pos = self.clamp(pos) as usize;
        self.chars[..pos].iter().filter(|c| **c == '\n').count() as Int
    }

    fn line_count(&self) -> Int {
        self.chars.iter().filter(|c| **c == '\n').count() as Int + 1
    }

    fn eol_mode(&self) -> EolMode {
        self.eol_mode
    }

    fn set_eol_mode(&mut self, mode: EolMode) {
        self.eol_mode = mode;
    }

    fn code_page(&self) -> Int {
        self.code_page
    }

    fn set_code_page(&mut self, cp: Int) {
        self.code_page = cp;
    }

    fn begin_undo_action(&mut self) {
        self.undo_depth += 1;
    }

    fn end_undo_action(&mut self) {
        self.undo_depth = self.undo_depth.saturating_sub(1);
    }

    fn undo(&mut self) {
        // The in-memory document does not keep its own native undo history;
        // the engine's own undo log is authoritative for test purposes.
    }

    fn current_pos(&self) -> Int {
        self.dot
    }

    fn goto_pos(&mut self, pos: Int) {
        self.dot = self.clamp(pos);
    }

    fn selection(&self) -> (Int, Int) {
        (self.anchor, self.dot)
    }

    fn set_selection(&mut self, anchor: Int, caret: Int) {
        self.anchor = self.clamp(anchor);
        self.dot = self.clamp(caret);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_delete() {
        let mut doc = MemDocument::from_str("hello");
        doc.insert(5, " world");
        assert_eq!(doc.as_string(), "hello world");
        doc.delete_range(0, 6);
        assert_eq!(doc.as_string(), "world");
    }

    #[test]
    fn lines() {
        let doc = MemDocument::from_str("a\nbb\nccc");
        assert_eq!(doc.line_count(), 3);
        assert_eq!(doc.line_from_position(3), 1);
        assert_eq!(doc.position_from_line(2), 5);
    }

    #[test]
    fn message_from_name_accepts_prefix_and_case() {
        assert_eq!(Message::from_name("SCI_GOTOPOS"), Some(Message::GotoPos));
        assert_eq!(Message::from_name("gotopos"), Some(Message::GotoPos));
        assert_eq!(Message::from_name("bogus"), None);
    }

    #[test]
    fn ssm_insert_via_addtext() {
        let mut doc = MemDocument::from_str("ab");
        doc.goto_pos(1);
        doc.ssm(Message::AddText, 0, 0, Some("X"));
        assert_eq!(doc.as_string(), "aXb");
    }
}
