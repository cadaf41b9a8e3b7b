//! The undo log (spec.md §4.5).
//!
//! An append-only stack of closures ("undo tokens"). Each mutation the
//! engine performs pushes a token whose execution, in reverse order,
//! restores the prior value. Characters of the command line are demarcated
//! by savepoint marks; rubbing out one character replays and pops tokens
//! back to the preceding savepoint.
//!
//! Tokens operate on `&mut Machine` rather than on some narrower context,
//! because any given mutation (expression stack, Q-Register, buffer ring,
//! document content, parser state) can need to restore state living
//! anywhere in the engine -- the C original's "closure" is a function
//! pointer plus an opaque payload; here it is simply a boxed `FnOnce`.

use crate::machine::Machine;

/// A single undo token: a restore action plus its payload size, used for
/// the memory-budget accounting described in spec.md §4.5.
struct Token {
    run: Box<dyn FnOnce(&mut Machine)>,
    size: usize,
}

/// The undo log itself.
pub struct UndoLog {
    tokens: Vec<Token>,
    /// Stack of token-count marks, one per demarcated input character.
    savepoints: Vec<usize>,
    /// Running total of payload bytes pushed, for the memory limiter.
    size_bytes: usize,
    /// `false` in batch mode: `push` becomes a no-op (spec.md §4.5
    /// "`push_size` ... must be a no-op ... if undo is globally disabled").
    enabled: bool,
}

impl UndoLog {
    pub fn new(enabled: bool) -> Self {
        UndoLog {
            tokens: Vec::new(),
            savepoints: Vec::new(),
            size_bytes: 0,
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Current running size, in bytes, of all pending undo payloads.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    /// Push a new undo token. Returns `false` (and pushes nothing) if undo
    /// is disabled, mirroring `push_size`'s no-op contract.
    pub fn push<F>(&mut self, size: usize, run: F) -> bool
    where
        F: FnOnce(&mut Machine) + 'static,
    {
        if !self.enabled {
            return false;
        }
        self.tokens.push(Token {
            run: Box::new(run),
            size,
        });
        self.size_bytes += size;
        true
    }

    /// Demarcate one character of user input. Called by the command-line
    /// controller before feeding each keystroke to the parser.
    pub fn mark_savepoint(&mut self) {
        if self.enabled {
            self.savepoints.push(self.tokens.len());
        }
    }

    /// Number of savepoints currently recorded (i.e. how many characters of
    /// the command line can still be rubbed out).
    pub fn savepoint_count(&self) -> usize {
        self.savepoints.len()
    }

    /// Drop the most recent savepoint without rubbing out -- used when a
    /// character turns out not to need one (e.g. it was swallowed by
    /// command-line replacement bookkeeping).
    pub fn discard_last_savepoint(&mut self) {
        self.savepoints.pop();
    }

    /// Pop one token off the top, if any is newer than `floor`.
    fn pop_if_above(&mut self, floor: usize) -> Option<Token> {
        if self.tokens.len() > floor {
            let token = self.tokens.pop().unwrap();
            self.size_bytes -= token.size;
            Some(token)
        } else {
            None
        }
    }
}

impl Machine {
    /// Rub out one character: pop and replay tokens back to the most
    /// recent savepoint, restore the scalar parser fields captured at that
    /// savepoint, and drop the character itself from the top-level frame's
    /// text. Returns `false` if there is nothing left to rub out (command
    /// line is already empty).
    pub fn rubout_char(&mut self) -> bool {
        let Some(floor) = self.undo.savepoints.pop() else {
            return false;
        };
        while let Some(token) = self.undo.pop_if_above(floor) {
            (token.run)(self);
        }
        self.apply_last_parser_snapshot();
        self.macros[0].text.pop();
        true
    }

    /// Push an undo token that restores a `Copy` scalar captured by value.
    /// This is the workhorse for the vast majority of undo sites (spec.md
    /// §4.5 "restore scalar"): `undo_scalar(|m| &mut m.dot, old_dot)`.
    pub fn undo_scalar<T, F>(&mut self, old: T, setter: F)
    where
        T: Copy + 'static,
        F: Fn(&mut Machine, T) + 'static,
    {
        self.undo
            .push(std::mem::size_of::<T>(), move |m| setter(m, old));
    }

    /// Push an undo token that restores an owned byte buffer (spec.md
    /// §4.5 "restore bytes").
    pub fn undo_bytes<F>(&mut self, old: Vec<u8>, setter: F)
    where
        F: Fn(&mut Machine, Vec<u8>) + 'static,
    {
        let size = old.len();
        self.undo.push(size, move |m| setter(m, old));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::Machine;
    use sciteco_core::MemDocument;

    #[test]
    fn rubout_replays_in_reverse_order() {
        let mut m = Machine::new(MemDocument::new(), true);
        m.undo.mark_savepoint();
        m.dot = 5;
        let old = 0;
        m.undo_scalar(old, |m, v| m.dot = v);
        m.dot = 10;
        m.undo_scalar(5, |m, v| m.dot = v);
        assert_eq!(m.dot, 10);
        assert!(m.rubout_char());
        assert_eq!(m.dot, 0);
    }

    #[test]
    fn rubout_on_empty_log_returns_false() {
        let mut m = Machine::new(MemDocument::new(), true);
        assert!(!m.rubout_char());
    }

    #[test]
    fn disabled_log_drops_pushes() {
        let mut log = UndoLog::new(false);
        assert!(!log.push(4, |_m: &mut Machine| {}));
        assert_eq!(log.size_bytes(), 0);
    }
}
