//! The cursor protocol and boolean combination cursors.
//!
//! Every iterator in a query tree, leaf or composite, implements
//! [`DocCursor`]: a strictly forward-only view over the documents it could
//! still match. Composites own their children and pull from them lazily;
//! a cursor tree belongs to exactly one evaluation and is discarded
//! afterwards.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt::Debug;

use crate::error::Result;
use crate::postings::{DocId, ExtentBuffer, NO_MORE_DOCS};

/// Forward-only document cursor.
///
/// Advancing calls require the cursor not to be exhausted; callers check
/// `is_done()` first. Reading per-document state for a document the cursor
/// does not match is a programmer error, guarded by `has_match()`.
pub trait DocCursor: Send + Debug {
    /// The smallest document this cursor could still match, or
    /// [`NO_MORE_DOCS`] when exhausted.
    fn current_candidate(&self) -> DocId;

    /// Whether the cursor is exhausted.
    fn is_done(&self) -> bool;

    /// Whether this cursor actually matches `document` (distinct from
    /// merely being positioned at or before it).
    fn has_match(&self, document: DocId) -> bool;

    /// Advance (never retreat) until `current_candidate() >= document`.
    fn move_to(&mut self, document: DocId) -> Result<()>;

    /// Advance until `current_candidate() > document`.
    fn move_past(&mut self, document: DocId) -> Result<()> {
        debug_assert!(document < NO_MORE_DOCS);
        self.move_to(document + 1)
    }

    /// Rewind to the beginning. Used for two-pass statistics gathering;
    /// not guaranteed efficient.
    fn reset(&mut self) -> Result<()>;
}

/// A cursor that exposes the extents of the current document.
pub trait ExtentCursor: DocCursor {
    /// Occurrence count for the current document.
    fn count(&self) -> u32;

    /// Extents for the current document, decoded on demand.
    fn extents(&mut self) -> Result<&ExtentBuffer>;
}

/// A cursor that scores documents.
pub trait ScoreCursor: DocCursor {
    /// Score `document` given its length.
    fn score(&self, document: DocId, length: u64) -> f64;
}

/// A cursor over nothing; used where a term is absent from the index.
#[derive(Debug, Default)]
pub struct NullCursor {
    extents: ExtentBuffer,
}

impl NullCursor {
    /// Create a new null cursor.
    pub fn new() -> Self {
        NullCursor {
            extents: ExtentBuffer::new(),
        }
    }
}

impl DocCursor for NullCursor {
    fn current_candidate(&self) -> DocId {
        NO_MORE_DOCS
    }

    fn is_done(&self) -> bool {
        true
    }

    fn has_match(&self, _document: DocId) -> bool {
        false
    }

    fn move_to(&mut self, _document: DocId) -> Result<()> {
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        Ok(())
    }
}

impl ExtentCursor for NullCursor {
    fn count(&self) -> u32 {
        0
    }

    fn extents(&mut self) -> Result<&ExtentBuffer> {
        Ok(&self.extents)
    }
}

/// Conjunction (AND) over child cursors.
///
/// The candidate is the largest child candidate; children are repeatedly
/// pulled up to it until they all agree or one exhausts.
#[derive(Debug)]
pub struct ConjunctionCursor {
    children: Vec<Box<dyn DocCursor>>,
    document: DocId,
    done: bool,
}

impl ConjunctionCursor {
    /// Create a conjunction over `children` and synchronize them.
    pub fn new(children: Vec<Box<dyn DocCursor>>) -> Result<Self> {
        let mut cursor = ConjunctionCursor {
            done: children.is_empty() || children.iter().any(|c| c.is_done()),
            children,
            document: NO_MORE_DOCS,
        };
        if !cursor.done {
            cursor.synchronize()?;
        }
        Ok(cursor)
    }

    /// Pull every child up to the shared candidate. Restarts whenever a
    /// child overshoots the target.
    fn synchronize(&mut self) -> Result<()> {
        loop {
            if self.children.iter().any(|c| c.is_done()) {
                self.done = true;
                self.document = NO_MORE_DOCS;
                return Ok(());
            }

            let target = self
                .children
                .iter()
                .map(|c| c.current_candidate())
                .max()
                .unwrap_or(NO_MORE_DOCS);

            let mut moved = false;
            for child in &mut self.children {
                if child.current_candidate() < target {
                    child.move_to(target)?;
                    moved = true;
                }
            }

            if !moved {
                self.document = target;
                return Ok(());
            }
        }
    }
}

impl DocCursor for ConjunctionCursor {
    fn current_candidate(&self) -> DocId {
        self.document
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn has_match(&self, document: DocId) -> bool {
        !self.done
            && self.document == document
            && self.children.iter().all(|c| c.has_match(document))
    }

    fn move_to(&mut self, document: DocId) -> Result<()> {
        debug_assert!(!self.done, "move_to on exhausted cursor");
        if self.done || self.document >= document {
            return Ok(());
        }

        for child in &mut self.children {
            if !child.is_done() && child.current_candidate() < document {
                child.move_to(document)?;
            }
        }
        self.synchronize()
    }

    fn reset(&mut self) -> Result<()> {
        for child in &mut self.children {
            child.reset()?;
        }
        self.done = self.children.is_empty() || self.children.iter().any(|c| c.is_done());
        self.document = NO_MORE_DOCS;
        if !self.done {
            self.synchronize()?;
        }
        Ok(())
    }
}

/// Heap entry for the disjunction. Ordered so the smallest candidate is
/// popped first; ties break on child index ascending, which keeps the
/// advance order deterministic.
#[derive(Debug)]
struct DisjunctionEntry {
    cursor: Box<dyn DocCursor>,
    index: usize,
}

impl PartialEq for DisjunctionEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DisjunctionEntry {}

impl PartialOrd for DisjunctionEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DisjunctionEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap: lower candidates come first, then lower child index.
        other
            .cursor
            .current_candidate()
            .cmp(&self.cursor.current_candidate())
            .then_with(|| other.index.cmp(&self.index))
    }
}

/// Disjunction (OR) over child cursors.
#[derive(Debug)]
pub struct DisjunctionCursor {
    heap: BinaryHeap<DisjunctionEntry>,
    exhausted: Vec<DisjunctionEntry>,
}

impl DisjunctionCursor {
    /// Create a disjunction over `children`.
    pub fn new(children: Vec<Box<dyn DocCursor>>) -> Self {
        let mut heap = BinaryHeap::new();
        let mut exhausted = Vec::new();

        for (index, cursor) in children.into_iter().enumerate() {
            let entry = DisjunctionEntry { cursor, index };
            if entry.cursor.is_done() {
                exhausted.push(entry);
            } else {
                heap.push(entry);
            }
        }

        DisjunctionCursor { heap, exhausted }
    }

    /// Move every child positioned at `winner` past it.
    ///
    /// Each tied child is popped exactly once and re-checked for
    /// exhaustion before being advanced; a child is never advanced twice
    /// for the same winner.
    fn advance_past(&mut self, winner: DocId) -> Result<()> {
        let mut advanced = Vec::new();
        while let Some(entry) = self.heap.peek() {
            if entry.cursor.current_candidate() != winner {
                break;
            }
            let mut entry = self.heap.pop().unwrap();
            if !entry.cursor.is_done() {
                entry.cursor.move_past(winner)?;
            }
            advanced.push(entry);
        }

        for entry in advanced {
            if entry.cursor.is_done() {
                self.exhausted.push(entry);
            } else {
                self.heap.push(entry);
            }
        }
        Ok(())
    }
}

impl DocCursor for DisjunctionCursor {
    fn current_candidate(&self) -> DocId {
        self.heap
            .peek()
            .map(|e| e.cursor.current_candidate())
            .unwrap_or(NO_MORE_DOCS)
    }

    fn is_done(&self) -> bool {
        self.heap.is_empty()
    }

    fn has_match(&self, document: DocId) -> bool {
        self.heap.iter().any(|e| e.cursor.has_match(document))
    }

    fn move_to(&mut self, document: DocId) -> Result<()> {
        debug_assert!(!self.is_done(), "move_to on exhausted cursor");
        while let Some(entry) = self.heap.peek() {
            let winner = entry.cursor.current_candidate();
            if winner >= document {
                break;
            }
            self.advance_past(winner)?;
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        let mut entries: Vec<DisjunctionEntry> = self.heap.drain().collect();
        entries.append(&mut self.exhausted);

        for entry in &mut entries {
            entry.cursor.reset()?;
        }
        for entry in entries {
            if entry.cursor.is_done() {
                self.exhausted.push(entry);
            } else {
                self.heap.push(entry);
            }
        }
        Ok(())
    }
}

/// Boolean aggregate mode for [`IndicatorCursor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorMode {
    /// True if any child matches the document.
    Existential,
    /// True only if every child matches the document.
    Universal,
}

/// Boolean indicator over child cursors, used to gate other operators.
#[derive(Debug)]
pub struct IndicatorCursor {
    children: Vec<Box<dyn DocCursor>>,
    mode: IndicatorMode,
}

impl IndicatorCursor {
    /// Create an indicator over `children`.
    pub fn new(children: Vec<Box<dyn DocCursor>>, mode: IndicatorMode) -> Self {
        IndicatorCursor { children, mode }
    }

    /// Evaluate the indicator at `document`.
    pub fn indicator(&self, document: DocId) -> bool {
        self.has_match(document)
    }
}

impl DocCursor for IndicatorCursor {
    fn current_candidate(&self) -> DocId {
        let candidates = self
            .children
            .iter()
            .map(|c| c.current_candidate());
        match self.mode {
            IndicatorMode::Existential => candidates.min().unwrap_or(NO_MORE_DOCS),
            IndicatorMode::Universal => candidates.max().unwrap_or(NO_MORE_DOCS),
        }
    }

    fn is_done(&self) -> bool {
        match self.mode {
            IndicatorMode::Existential => self.children.iter().all(|c| c.is_done()),
            IndicatorMode::Universal => {
                self.children.is_empty() || self.children.iter().any(|c| c.is_done())
            }
        }
    }

    fn has_match(&self, document: DocId) -> bool {
        match self.mode {
            IndicatorMode::Existential => self.children.iter().any(|c| c.has_match(document)),
            IndicatorMode::Universal => {
                !self.children.is_empty()
                    && self.children.iter().all(|c| c.has_match(document))
            }
        }
    }

    fn move_to(&mut self, document: DocId) -> Result<()> {
        debug_assert!(!self.is_done(), "move_to on exhausted cursor");
        for child in &mut self.children {
            if !child.is_done() && child.current_candidate() < document {
                child.move_to(document)?;
            }
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        for child in &mut self.children {
            child.reset()?;
        }
        Ok(())
    }
}
