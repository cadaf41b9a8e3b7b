//! The buffer ring (spec.md §3 "Buffer", §9 "cyclic graphs").
//!
//! Modelled as an arena (`Vec<Option<Buffer>>`) plus an index rather than
//! a doubly-linked list of raw pointers, per the specification's own
//! guidance for a safe-Rust rewrite: undo tokens that "re-insert" a
//! removed buffer remember its slot index and neighbours.

use sciteco_core::{Document, Error, ErrorKind, Int, MemDocument};

/// One entry in the ring: a filename, a dirty flag, and its document.
pub struct Buffer {
    pub filename: Option<String>,
    pub dirty: bool,
    pub doc: Box<dyn Document>,
}

impl Buffer {
    pub fn unnamed() -> Self {
        Buffer {
            filename: None,
            dirty: false,
            doc: Box::new(MemDocument::new()),
        }
    }

    pub fn named(filename: impl Into<String>, doc: Box<dyn Document>) -> Self {
        Buffer {
            filename: Some(filename.into()),
            dirty: false,
            doc,
        }
    }
}

/// The ring itself: an ordered list of buffer slots plus the index of the
/// current one. There is always at least one buffer (the unnamed
/// scratch buffer created at startup).
pub struct Ring {
    buffers: Vec<Buffer>,
    current: usize,
}

impl Ring {
    pub fn new() -> Self {
        Ring {
            buffers: vec![Buffer::unnamed()],
            current: 0,
        }
    }

    /// Start the ring with a caller-supplied document backing the initial
    /// unnamed buffer, instead of the default `MemDocument`.
    pub fn with_doc(doc: Box<dyn Document>) -> Self {
        Ring {
            buffers: vec![Buffer {
                filename: None,
                dirty: false,
                doc,
            }],
            current: 0,
        }
    }

    pub fn current(&self) -> &Buffer {
        &self.buffers[self.current]
    }

    pub fn current_mut(&mut self) -> &mut Buffer {
        &mut self.buffers[self.current]
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn get(&self, id: Int) -> Option<&Buffer> {
        if id < 0 {
            None
        } else {
            self.buffers.get(id as usize)
        }
    }

    pub fn get_mut(&mut self, id: Int) -> Option<&mut Buffer> {
        if id < 0 {
            None
        } else {
            self.buffers.get_mut(id as usize)
        }
    }

    /// Switch the current buffer to `id` (1-based, matching classic TECO
    /// buffer numbering where buffer 0 would be invalid). Returns the
    /// previous current index, for undo.
    pub fn switch_to(&mut self, id: Int) -> Result<usize, Error> {
        if id < 0 || id as usize >= self.buffers.len() {
            return Err(Error::new(ErrorKind::InvalidBuf(id)));
        }
        let prev = self.current;
        self.current = id as usize;
        Ok(prev)
    }

    /// Insert a new buffer at the end and make it current, returning its
    /// index and the previous current index.
    pub fn open(&mut self, buffer: Buffer) -> (usize, usize) {
        let prev = self.current;
        self.buffers.push(buffer);
        self.current = self.buffers.len() - 1;
        (self.current, prev)
    }

    /// Find an already-open buffer by filename.
    pub fn find_by_filename(&self, filename: &str) -> Option<usize> {
        self.buffers
            .iter()
            .position(|b| b.filename.as_deref() == Some(filename))
    }

    /// Remove the buffer at `id`, returning it so an undo token can
    /// re-insert it at the same slot later. The ring always keeps at
    /// least one buffer; removing the last one is a no-op that returns
    /// `None`.
    pub fn close(&mut self, id: usize) -> Option<Buffer> {
        if self.buffers.len() <= 1 || id >= self.buffers.len() {
            return None;
        }
        let removed = self.buffers.remove(id);
        if self.current >= self.buffers.len() {
            self.current = self.buffers.len() - 1;
        } else if self.current > id {
            self.current -= 1;
        }
        Some(removed)
    }

    /// Undo counterpart to `close`: re-insert `buffer` at `id`.
    pub fn reinsert(&mut self, id: usize, buffer: Buffer) {
        let id = id.min(self.buffers.len());
        self.buffers.insert(id, buffer);
    }
}

impl Default for Ring {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_one_unnamed_buffer() {
        let ring = Ring::new();
        assert_eq!(ring.len(), 1);
        assert!(ring.current().filename.is_none());
    }

    #[test]
    fn open_and_switch() {
        let mut ring = Ring::new();
        let (idx, prev) = ring.open(Buffer::named("a.tec", Box::new(MemDocument::new())));
        assert_eq!(idx, 1);
        assert_eq!(prev, 0);
        assert_eq!(ring.current_index(), 1);
        ring.switch_to(0).unwrap();
        assert_eq!(ring.current_index(), 0);
    }

    #[test]
    fn switch_to_invalid_id_errors() {
        let mut ring = Ring::new();
        assert!(ring.switch_to(5).is_err());
    }

    #[test]
    fn close_and_reinsert_round_trips() {
        let mut ring = Ring::new();
        ring.open(Buffer::named("a.tec", Box::new(MemDocument::new())));
        let removed = ring.close(0).unwrap();
        assert_eq!(ring.len(), 1);
        ring.reinsert(0, removed);
        assert_eq!(ring.len(), 2);
    }
}
