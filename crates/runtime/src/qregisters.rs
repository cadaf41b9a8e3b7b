//! The Q-Register store (spec.md §4.3).
//!
//! Register names are arbitrary strings. Most registers are *plain*: an
//! integer plus an owned string. A handful of names are bound to a
//! different backing store instead -- the current buffer's info, the
//! working directory, a clipboard slot, or a process environment
//! variable -- selected by [`QRegKind`], matching the vtable-dispatch
//! design the specification calls for.

use crate::ring::Ring;
use sciteco_core::{Document, Error, ErrorKind, Int, Result};
use std::collections::BTreeMap;

/// Which backing store a register's string/integer accessors go through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QRegKind {
    /// Plain memory: integer and string stored directly.
    Plain,
    /// `*`: integer == buffer id in the ring; string == current buffer's
    /// filename (read-only).
    BufferInfo,
    /// `$`: string is the OS current-directory; setting performs `chdir`.
    WorkingDir,
    /// `~`, `~P`, `~S`, `~C`: an external clipboard slot.
    Clipboard,
    /// `$NAME`: a process-environment variable.
    Environment(String),
}

/// A single named slot: `{name, integer, document/string, kind}`
/// (spec.md §3 "Q-Register").
///
/// `document` stands in for the Scintilla sub-document spec.md §3 and §4.3
/// describe: it is `None` until the register is first made the *currently
/// edited* one (the `EQ` command, §4.3 `edit(reg)`), at which point it is
/// materialized from `string` and becomes the source of truth; the two are
/// resynchronized whenever editing moves away from this register (see
/// `Machine::edit_qreg`/`stop_editing_qreg` in `machine.rs`). Not `Clone`
/// (it holds a `Box<dyn Document>`); nothing in this crate clones a whole
/// `QRegTable`, only individual fields of it.
pub struct QRegister {
    pub name: String,
    pub integer: Int,
    pub string: String,
    pub kind: QRegKind,
    pub document: Option<Box<dyn Document>>,
}

impl std::fmt::Debug for QRegister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QRegister")
            .field("name", &self.name)
            .field("integer", &self.integer)
            .field("string", &self.string)
            .field("kind", &self.kind)
            .field("document", &self.document.is_some())
            .finish()
    }
}

impl QRegister {
    pub fn plain(name: impl Into<String>) -> Self {
        QRegister {
            name: name.into(),
            integer: 0,
            string: String::new(),
            kind: QRegKind::Plain,
            document: None,
        }
    }

    fn with_kind(name: impl Into<String>, kind: QRegKind) -> Self {
        QRegister {
            name: name.into(),
            integer: 0,
            string: String::new(),
            kind,
            document: None,
        }
    }

    pub fn get_integer(&self) -> Int {
        self.integer
    }

    pub fn set_integer(&mut self, n: Int) -> Result<()> {
        match &self.kind {
            QRegKind::BufferInfo => {
                // Switching buffers by number is the ring's job; the
                // register just mirrors the id once the switch succeeds.
                self.integer = n;
                Ok(())
            }
            _ => {
                self.integer = n;
                Ok(())
            }
        }
    }

    pub fn get_string(&self) -> &str {
        &self.string
    }

    pub fn set_string(&mut self, s: String) -> Result<()> {
        match &self.kind {
            QRegKind::BufferInfo => Err(Error::new(ErrorKind::QRegOpUnsupported {
                name: self.name.clone(),
                local: false,
            })),
            QRegKind::WorkingDir => {
                if s.contains('\0') {
                    return Err(Error::new(ErrorKind::QRegContainsNull {
                        name: self.name.clone(),
                        local: false,
                    }));
                }
                std::env::set_current_dir(&s)
                    .map_err(|e| Error::new(ErrorKind::Module(e.to_string())))?;
                self.string = s;
                Ok(())
            }
            QRegKind::Environment(var) => {
                if s.contains('\0') {
                    return Err(Error::new(ErrorKind::QRegContainsNull {
                        name: self.name.clone(),
                        local: false,
                    }));
                }
                // SAFETY: the engine is single-threaded (spec.md §5); no
                // other thread reads/writes the process environment.
                unsafe {
                    std::env::set_var(var, &s);
                }
                self.string = s;
                Ok(())
            }
            QRegKind::Clipboard | QRegKind::Plain => {
                self.string = s;
                Ok(())
            }
        }
    }

    pub fn append_string(&mut self, s: &str) -> Result<()> {
        match &self.kind {
            QRegKind::BufferInfo => Err(Error::new(ErrorKind::QRegOpUnsupported {
                name: self.name.clone(),
                local: false,
            })),
            _ => {
                self.string.push_str(s);
                Ok(())
            }
        }
    }

    pub fn get_size(&self) -> Int {
        self.string.chars().count() as Int
    }

    pub fn get_character(&self, pos: Int) -> Option<char> {
        if pos < 0 {
            return None;
        }
        self.string.chars().nth(pos as usize)
    }

    /// Swap this register's string content with `other`'s, in place
    /// (used by `[q`/`]q` bookkeeping at a lower level, and directly by
    /// any command wanting register-to-register exchange).
    pub fn exchange_string(&mut self, other: &mut String) {
        std::mem::swap(&mut self.string, other);
    }
}

/// One table of registers: either the global table or a macro frame's
/// local table (spec.md §4.3).
#[derive(Debug, Default)]
pub struct QRegTable {
    registers: BTreeMap<String, QRegister>,
    /// Propagated to newly inserted registers so that edits to them are
    /// captured by the undo log (disabled wholesale in batch mode).
    pub must_undo: bool,
}

impl QRegTable {
    pub fn new(must_undo: bool) -> Self {
        QRegTable {
            registers: BTreeMap::new(),
            must_undo,
        }
    }

    pub fn insert(&mut self, name: &str) -> &mut QRegister {
        self.registers
            .entry(name.to_string())
            .or_insert_with(|| QRegister::plain(name))
    }

    pub fn insert_special(&mut self, name: &str, kind: QRegKind) -> &mut QRegister {
        self.registers
            .entry(name.to_string())
            .or_insert_with(|| QRegister::with_kind(name, kind))
    }

    pub fn find(&self, name: &str) -> Option<&QRegister> {
        self.registers.get(name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut QRegister> {
        self.registers.get_mut(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<QRegister> {
        self.registers.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registers.contains_key(name)
    }

    /// Completions for `name` as a case-sensitive prefix, sorted (the
    /// table's natural iteration order).
    pub fn auto_complete(&self, prefix: &str) -> Vec<String> {
        self.registers
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.registers.keys()
    }
}

/// Render a register name the way the engine reports it: control
/// characters as `^X`, everything else verbatim (spec.md §3 "canonical
/// form").
pub fn printable_name(name: &str) -> String {
    name.chars().map(sciteco_core::error::printable).collect()
}

/// An entry saved by `[q` and restored by `]q`.
#[derive(Debug, Clone)]
struct PushedReg {
    name: String,
    integer: Int,
    string: String,
}

/// The full register subsystem: global table, the stack of local tables
/// (one per active macro frame that doesn't share its caller's), and the
/// register push-down stack used by `[q`/`]q`.
#[derive(Debug)]
pub struct QRegisters {
    pub globals: QRegTable,
    locals: Vec<QRegTable>,
    push_stack: Vec<PushedReg>,
}

impl QRegisters {
    pub fn new(must_undo: bool) -> Self {
        let mut globals = QRegTable::new(must_undo);
        globals.insert_special("*", QRegKind::BufferInfo);
        globals.insert_special("$", QRegKind::WorkingDir);
        for name in ["~", "~P", "~S", "~C"] {
            globals.insert_special(name, QRegKind::Clipboard);
        }
        for (key, _) in std::env::vars() {
            globals.insert_special(&format!("${key}"), QRegKind::Environment(key.clone()));
        }
        // `_` holds the outcome of the last search/match (spec.md §4.6,
        // §4.9 `;`'s default argument).
        globals.insert("_");
        // `^R`: the current numeric radix, local per frame but seeded
        // here with the top-level default of decimal.
        globals.insert("^R").integer = 10;
        QRegisters {
            globals,
            locals: Vec::new(),
            push_stack: Vec::new(),
        }
    }

    pub fn push_local_frame(&mut self) {
        self.locals.push(QRegTable::new(self.globals.must_undo));
    }

    /// Whether `name` belongs to the innermost local table -- the one
    /// [`QRegisters::pop_local_frame`] is about to discard. Used to detect
    /// spec.md §4.3's "macro ended while editing one of its own locals"
    /// before the table (and the register's document) is dropped.
    pub fn top_local_contains(&self, name: &str) -> bool {
        self.local().map(|l| l.contains(name)).unwrap_or(false)
    }

    /// The string a read of `name` should observe right now: for most
    /// registers this is just the stored `string`, but `*` (BufferInfo)
    /// and `$` (WorkingDir) are live views over the ring/OS rather than a
    /// value that was ever `set_string`'d (spec.md §3).
    pub fn live_string(&self, name: &str, ring: &Ring) -> Result<String> {
        let reg = self.require(name)?;
        Ok(match &reg.kind {
            QRegKind::BufferInfo => ring.current().filename.clone().unwrap_or_default(),
            QRegKind::WorkingDir => std::env::current_dir()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .unwrap_or_default(),
            _ => reg.string.clone(),
        })
    }

    pub fn pop_local_frame(&mut self) -> Result<()> {
        let Some(frame) = self.locals.pop() else {
            return Ok(());
        };
        // spec.md §4.3: a macro ending while editing one of its own
        // locals would orphan the active document.
        drop(frame);
        Ok(())
    }

    pub fn has_local_frame(&self) -> bool {
        !self.locals.is_empty()
    }

    fn local_mut(&mut self) -> Option<&mut QRegTable> {
        self.locals.last_mut()
    }

    fn local(&self) -> Option<&QRegTable> {
        self.locals.last()
    }

    /// Local-shadows-global lookup, the access pattern every Q-Register
    /// command uses.
    pub fn find(&self, name: &str) -> Option<&QRegister> {
        self.local()
            .and_then(|l| l.find(name))
            .or_else(|| self.globals.find(name))
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut QRegister> {
        if self.local().map(|l| l.contains(name)).unwrap_or(false) {
            self.local_mut().unwrap().find_mut(name)
        } else {
            self.globals.find_mut(name)
        }
    }

    /// Create `name` in the local table if one is active, else globally.
    pub fn insert(&mut self, name: &str) -> &mut QRegister {
        if self.has_local_frame() {
            self.local_mut().unwrap().insert(name)
        } else {
            self.globals.insert(name)
        }
    }

    pub fn require(&self, name: &str) -> Result<&QRegister> {
        let local = self.local().map(|l| l.contains(name)).unwrap_or(false);
        self.find(name).ok_or_else(|| {
            Error::new(ErrorKind::InvalidQReg {
                name: printable_name(name),
                local,
            })
        })
    }

    pub fn require_mut(&mut self, name: &str) -> Result<&mut QRegister> {
        let display = printable_name(name);
        let local = self.local().map(|l| l.contains(name)).unwrap_or(false);
        self.find_mut(name)
            .ok_or_else(|| Error::new(ErrorKind::InvalidQReg { name: display, local }))
    }

    /// `[q`: push `q`'s current integer/string onto the register stack.
    pub fn push_register(&mut self, name: &str) -> Result<()> {
        let reg = self.require(name)?;
        self.push_stack.push(PushedReg {
            name: name.to_string(),
            integer: reg.integer,
            string: reg.string.clone(),
        });
        Ok(())
    }

    /// `]q`: exchange `q`'s current integer/string with the top of the
    /// register stack.
    pub fn pop_register(&mut self, name: &str) -> Result<()> {
        let Some(saved) = self.push_stack.pop() else {
            return Err(Error::new(ErrorKind::Failed));
        };
        let reg = self.require_mut(name)?;
        reg.integer = saved.integer;
        reg.string = saved.string;
        Ok(())
    }

    pub fn push_stack_depth(&self) -> usize {
        self.push_stack.len()
    }

    /// Undo counterpart to `push_register`: discard the most recent saved
    /// entry without touching the register itself (spec.md §4.3, `[q`'s
    /// own undo token).
    pub fn discard_pushed(&mut self) {
        self.push_stack.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_pop_round_trips() {
        let mut regs = QRegisters::new(true);
        regs.insert("A").set_string("hello".into()).unwrap();
        regs.insert("A").integer = 5;
        regs.push_register("A").unwrap();
        regs.find_mut("A").unwrap().set_string("bye".into()).unwrap();
        regs.find_mut("A").unwrap().integer = 9;
        regs.pop_register("A").unwrap();
        let a = regs.find("A").unwrap();
        assert_eq!(a.get_string(), "hello");
        assert_eq!(a.integer, 5);
    }

    #[test]
    fn locals_shadow_globals() {
        let mut regs = QRegisters::new(true);
        regs.insert("Q").integer = 1;
        regs.push_local_frame();
        regs.insert("Q").integer = 2;
        assert_eq!(regs.find("Q").unwrap().integer, 2);
        regs.pop_local_frame().unwrap();
        assert_eq!(regs.find("Q").unwrap().integer, 1);
    }

    #[test]
    fn buffer_info_string_is_read_only() {
        let mut regs = QRegisters::new(true);
        let err = regs
            .find_mut("*")
            .unwrap()
            .set_string("x".into())
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::QRegOpUnsupported { .. }));
    }
}
