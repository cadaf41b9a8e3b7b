//! `Machine`: the type that ties the rest of the engine together (spec.md
//! §3 "Parser machine", §9 "global singletons ... consolidated into a
//! single Engine value passed by mutable reference through every call").

use crate::expressions::ExprStack;
use crate::goto::{GotoTable, LoopStack};
use crate::qregisters::QRegisters;
use crate::ring::Ring;
use crate::state::{Mode, State};
use crate::stringbuilding::QLookup;
use crate::undo::UndoLog;
use sciteco_core::{Document, Int, Range};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One active macro invocation (spec.md §4.9). `macros[0]` is always
/// present and represents the top-level command line itself: the
/// command-line controller (§4.8) appends each typed character to its
/// `text` and drives it exactly like any nested `Mq` frame, so goto,
/// loop and conditional skip logic never needs a separate "am I at top
/// level" code path.
pub struct MacroFrame {
    pub text: Vec<char>,
    pub pc: usize,
    pub goto_table: GotoTable,
    pub loop_stack: LoopStack,
    /// `false` for `:Mq` calls, which share the caller's locals instead of
    /// pushing a new local Q-Register table (spec.md §4.3).
    pub owns_locals: bool,
    /// A human-readable description of what introduced this frame, used
    /// to build the error frame chain (spec.md §7).
    pub description: String,
}

/// The engine: undo log, expression stack, Q-Register store, buffer ring,
/// loop/goto state for the currently active frame, and the parser's own
/// state (spec.md §3, §9).
pub struct Machine {
    pub ring: Ring,
    pub qregs: QRegisters,
    pub expr: ExprStack,
    pub undo: UndoLog,
    pub mode: Mode,
    pub state: State,

    /// Current insertion position (spec.md Glossary "Dot"), in glyphs,
    /// within the currently active buffer's document.
    pub dot: Int,

    /// Ranges of the most recent insertion or search match plus its
    /// subpattern matches (spec.md §3 "ranges[]"). Per spec.md §9(c),
    /// starts empty (not pre-seeded with one empty range) -- `^Y` on a
    /// buffer where nothing has matched yet raises `Subpattern`.
    pub ranges: Vec<Range>,

    /// `0..2`: how many `:` modifiers have been seen before the current
    /// command. Reset after each completed command.
    pub colon_count: u8,
    /// Whether `@` was seen before the current command.
    pub at_flag: bool,

    /// Active frame stack. `macros[0]` is the top-level command line;
    /// `Mq` pushes additional entries on top. The innermost (last) entry
    /// is the one [`crate::commands::drive`] advances.
    pub macros: Vec<MacroFrame>,

    /// How many `"` conditionals are currently open across the whole
    /// frame stack, used only to reject a stray `F'`/`F|` outside any
    /// conditional (spec.md §4.9).
    pub cond_nest: u32,

    /// Set by SIGINT (or platform equivalent); polled by the parser loop
    /// and by the blocking points named in spec.md §5. Shared with no
    /// other thread than the one installing the OS signal handler.
    pub interrupted: Arc<AtomicBool>,

    /// Set by `^C^C` or `EX$$`; carries the process exit code.
    pub exit_requested: Option<Int>,

    /// The most recent message produced by `=`/`^A` et al, for the
    /// front-end to display (spec.md §4.1 "misc"). Not a log line --
    /// see SPEC_FULL.md's "Logging / diagnostics" section.
    pub message: Option<String>,

    /// Whether `message` should be followed by a trailing newline when
    /// displayed; `:=` (spec.md §4.1 line 121) suppresses it.
    pub message_newline: bool,

    /// The `EW` save-point filename counter (spec.md §6), reset at the
    /// start of each top-level command line (SPEC_FULL.md supplement).
    pub savepoint_counter: u32,

    /// Scratch state threaded between a Q-Register-spec sub-machine and
    /// the command that asked for it, for the two commands ( `X`, `^U` )
    /// whose own argument is resolved before the register reference is
    /// fully parsed (spec.md §4.1, §4.4).
    pub pending_range: Option<(Int, Int)>,
    pub pending_qreg: Option<crate::qregspec::QRegRef>,

    /// Set by one `^C`; a second consecutive one raises [`ErrorKind::Quit`]
    /// (spec.md §4.1 "misc"). Cleared by [`crate::commands::step`] at the
    /// start of every character that isn't itself that second `^C`.
    pub ctrl_c_pending: bool,

    /// Name of the Q-Register currently being *edited* (`EQ`, §4.3
    /// `edit(reg)`), if any. Per spec.md §3's invariant, `dot`/[`Machine::doc`]
    /// then refer to that register's document instead of the ring's current
    /// buffer -- never both at once.
    pub editing_qreg: Option<String>,

    /// The command line text as it stood the moment `{` last ran, captured
    /// so [`crate::cmdline`] can diff it against the replacement register's
    /// edited content once `}` fires (spec.md §4.8). `None` when no
    /// replacement cycle is in progress.
    pub replacement_origin: Option<String>,

    /// One entry per top-level keystroke, parallel to [`UndoLog`]'s own
    /// savepoint stack: the scalar parser fields that mutation-by-closure
    /// undo tokens don't cover (spec.md §4.8 "restores ... current state
    /// of the parser"). Popped and reapplied by [`Machine::rubout_char`]
    /// alongside the token replay.
    parser_savepoints: Vec<ParserSnapshot>,
}

/// The parser-level fields captured at each top-level keystroke, restored
/// verbatim on rubout (spec.md §4.8). `pc` is `macros[0]`'s program
/// counter; nested `Mq` frames never outlive a single keystroke (§4.9), so
/// there is always exactly one frame by the time a rubout can happen.
#[derive(Clone)]
struct ParserSnapshot {
    state: State,
    mode: Mode,
    pc: usize,
    colon_count: u8,
    at_flag: bool,
    cond_nest: u32,
    ctrl_c_pending: bool,
}

impl Machine {
    /// Build a fresh engine around `doc` as the initial unnamed buffer.
    /// `undo_enabled` selects interactive (`true`) vs batch (`false`)
    /// mode: in batch mode the undo log and the Q-Register `must_undo`
    /// flag are both disabled, matching spec.md §4.5's no-op contract.
    pub fn new<D: Document + 'static>(doc: D, undo_enabled: bool) -> Self {
        Machine {
            ring: Ring::with_doc(Box::new(doc)),
            qregs: QRegisters::new(undo_enabled),
            expr: ExprStack::new(),
            undo: UndoLog::new(undo_enabled),
            mode: Mode::Normal,
            state: State::Start,
            dot: 0,
            ranges: Vec::new(),
            colon_count: 0,
            at_flag: false,
            macros: vec![MacroFrame {
                text: Vec::new(),
                pc: 0,
                goto_table: GotoTable::new(),
                loop_stack: LoopStack::new(),
                owns_locals: false,
                description: "top level".to_string(),
            }],
            cond_nest: 0,
            interrupted: Arc::new(AtomicBool::new(false)),
            exit_requested: None,
            message: None,
            message_newline: true,
            savepoint_counter: 0,
            pending_range: None,
            pending_qreg: None,
            ctrl_c_pending: false,
            editing_qreg: None,
            replacement_origin: None,
            parser_savepoints: Vec::new(),
        }
    }

    pub fn is_interactive(&self) -> bool {
        self.undo.is_enabled()
    }

    /// The radix currently in effect: the local `^R` register if a macro
    /// frame has one, else the global one (spec.md §4.1 "Radix lookup
    /// consults the local Q-Reg named `^R`").
    pub fn radix(&self) -> Int {
        self.qregs.find("^R").map(|r| r.get_integer()).unwrap_or(10).max(2)
    }

    /// Current loop stack: always the innermost frame's, which is
    /// `macros[0]` (the top-level command line) when no `Mq` call is
    /// active.
    pub fn loop_stack(&mut self) -> &mut LoopStack {
        &mut self.macros.last_mut().unwrap().loop_stack
    }

    /// The document currently being edited: the active Q-Register's, if
    /// one is being edited (`EQ`), else the ring's current buffer (spec.md
    /// §3 invariant "never both").
    pub fn doc(&self) -> &dyn Document {
        if let Some(name) = &self.editing_qreg {
            &**self
                .qregs
                .find(name)
                .and_then(|r| r.document.as_ref())
                .expect("editing_qreg always names a materialized register document")
        } else {
            &*self.ring.current().doc
        }
    }

    pub fn doc_mut(&mut self) -> &mut dyn Document {
        if let Some(name) = self.editing_qreg.clone() {
            &mut **self
                .qregs
                .find_mut(&name)
                .and_then(|r| r.document.as_mut())
                .expect("editing_qreg always names a materialized register document")
        } else {
            &mut *self.ring.current_mut().doc
        }
    }

    /// `EQq$` with an empty file argument (§4.3 `edit(reg)`): make `name`
    /// the currently edited Q-Register, flushing whatever was previously
    /// being edited back out first. Autocreates `name` if it doesn't exist
    /// yet, matching the original's "undefined Q-Registers will be
    /// defined". Reversible: pushes an undo token that restores the
    /// previous edit target and `dot`.
    pub fn edit_qreg(&mut self, name: &str) {
        let prev_editing = self.editing_qreg.clone();
        let prev_dot = self.dot;

        self.flush_editing_qreg();
        if self.qregs.find(name).is_none() {
            self.qregs.insert(name);
        }
        let reg = self.qregs.find_mut(name).unwrap();
        if reg.document.is_none() {
            reg.document = Some(Box::new(sciteco_core::MemDocument::from_str(&reg.string)));
        }
        self.editing_qreg = Some(name.to_string());
        self.dot = self.doc().current_pos();

        self.undo.push(
            name.len() + std::mem::size_of::<Int>(),
            move |m| {
                m.flush_editing_qreg();
                m.editing_qreg = prev_editing.clone();
                m.dot = prev_dot;
            },
        );
    }

    /// Write the currently-edited Q-Register's document content back into
    /// its `string` and drop the live document, leaving no register being
    /// edited. A no-op if nothing is currently being edited. Does *not*
    /// push an undo token itself -- callers that need this reversible
    /// (e.g. [`Machine::edit_qreg`]) wrap it in their own token.
    pub fn flush_editing_qreg(&mut self) {
        let Some(name) = self.editing_qreg.take() else {
            return;
        };
        if let Some(reg) = self.qregs.find_mut(&name) {
            if let Some(doc) = reg.document.take() {
                reg.string = doc.text_range(0, doc.length());
            }
        }
    }

    /// Move `dot` to `new_dot`, recording an undo token and syncing the
    /// active document's own caret so native operations stay consistent.
    pub fn set_dot(&mut self, new_dot: Int) {
        let old = self.dot;
        if old == new_dot {
            return;
        }
        self.undo_scalar(old, |m, v| m.dot = v);
        self.dot = new_dot;
        self.doc_mut().goto_pos(new_dot);
    }

    pub fn push_message(&mut self, text: String) {
        self.push_message_raw(text, true);
    }

    /// Like [`Machine::push_message`], but lets the caller say whether the
    /// front-end should append a trailing newline (`:=`'s newline
    /// suppression, spec.md §4.1 line 121).
    pub fn push_message_raw(&mut self, text: String, newline: bool) {
        self.message = Some(text);
        self.message_newline = newline;
    }

    pub fn take_message(&mut self) -> Option<String> {
        self.message.take()
    }

    /// Consume the newline flag set by the most recent `push_message*`
    /// call, resetting it to the default (`true`) for next time.
    pub fn take_message_newline(&mut self) -> bool {
        std::mem::replace(&mut self.message_newline, true)
    }

    /// Demarcate one top-level keystroke (spec.md §4.8): mark the undo
    /// log's token floor and snapshot the scalar parser fields token
    /// replay doesn't cover. Called by [`crate::commands::step`] only when
    /// driving the outermost frame -- the per-character calls `advance`
    /// makes while diving into an `Mq` macro body share the same keystroke
    /// and must not each get their own savepoint (spec.md §4.9: a typed
    /// `Mq` rubs out as a single unit, not one macro-internal char at a
    /// time).
    pub fn mark_cmdline_char(&mut self) {
        self.undo.mark_savepoint();
        self.parser_savepoints.push(ParserSnapshot {
            state: self.state.clone(),
            mode: self.mode.clone(),
            pc: self.macros[0].pc,
            colon_count: self.colon_count,
            at_flag: self.at_flag,
            cond_nest: self.cond_nest,
            ctrl_c_pending: self.ctrl_c_pending,
        });
    }

    /// Number of keystrokes that can still be rubbed out.
    pub fn cmdline_savepoint_count(&self) -> usize {
        self.parser_savepoints.len()
    }

    /// Drop the most recent keystroke's savepoint without rubbing out --
    /// mirrors [`crate::undo::UndoLog::discard_last_savepoint`], used by
    /// command-line replacement (`{`/`}`, §4.8) bookkeeping.
    pub fn discard_last_cmdline_savepoint(&mut self) {
        self.undo.discard_last_savepoint();
        self.parser_savepoints.pop();
    }

    /// Pop the most recent keystroke's parser snapshot, if any, and apply
    /// its fields back onto `self`. Called by [`Machine::rubout_char`].
    pub(crate) fn apply_last_parser_snapshot(&mut self) {
        let Some(snap) = self.parser_savepoints.pop() else {
            return;
        };
        self.state = snap.state;
        self.mode = snap.mode;
        self.macros[0].pc = snap.pc;
        self.colon_count = snap.colon_count;
        self.at_flag = snap.at_flag;
        self.cond_nest = snap.cond_nest;
        self.ctrl_c_pending = snap.ctrl_c_pending;
    }
}

/// Adapt the machine's Q-Register/radix state to the interfaces the
/// string-building and search sub-machines need, without those modules
/// depending on `qregisters` directly.
impl QLookup for Machine {
    fn radix(&self) -> Int {
        Machine::radix(self)
    }

    fn get_integer(&self, name: &str) -> Option<Int> {
        self.qregs.find(name).map(|r| r.get_integer())
    }

    fn get_string(&self, name: &str) -> Option<String> {
        self.qregs.find(name).map(|r| r.get_string().to_string())
    }
}
