//! Proximity-window cursors.
//!
//! Both window cursors synchronize their children conjunction-style and
//! recompute the window extents for every agreed document before the
//! advancing call returns. A document where the children agree but no
//! window fits is still a candidate; it simply has no match.

use crate::error::Result;
use crate::postings::{DocId, Extent, ExtentBuffer, NO_MORE_DOCS};
use crate::query::matcher::{DocCursor, ExtentCursor};

/// Ordered proximity window.
///
/// Child N's matched extent must begin at or after the end of child N-1's
/// matched extent; a window is emitted when the span from the first
/// extent's begin to the last extent's end does not exceed `width`.
#[derive(Debug)]
pub struct OrderedWindowCursor {
    children: Vec<Box<dyn ExtentCursor>>,
    width: u32,
    document: DocId,
    extents: ExtentBuffer,
    scratch: Vec<Vec<Extent>>,
    done: bool,
}

impl OrderedWindowCursor {
    /// Create an ordered window of the given width over `children`.
    pub fn new(children: Vec<Box<dyn ExtentCursor>>, width: u32) -> Result<Self> {
        let scratch = children.iter().map(|_| Vec::new()).collect();
        let mut cursor = OrderedWindowCursor {
            done: children.is_empty() || children.iter().any(|c| c.is_done()),
            children,
            width,
            document: NO_MORE_DOCS,
            extents: ExtentBuffer::new(),
            scratch,
        };
        if !cursor.done {
            cursor.synchronize()?;
        }
        Ok(cursor)
    }

    fn synchronize(&mut self) -> Result<()> {
        loop {
            if self.children.iter().any(|c| c.is_done()) {
                self.done = true;
                self.document = NO_MORE_DOCS;
                self.extents.reset(NO_MORE_DOCS);
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
                self.load_extents()?;
                return Ok(());
            }
        }
    }

    /// Recompute window extents for the agreed document.
    fn load_extents(&mut self) -> Result<()> {
        for (child, scratch) in self.children.iter_mut().zip(self.scratch.iter_mut()) {
            scratch.clear();
            scratch.extend_from_slice(child.extents()?.as_slice());
        }

        self.extents.reset(self.document);

        let n = self.scratch.len();
        // One monotone pointer per trailing child; pointers never retreat
        // across first-child iterations.
        let mut idx = vec![0usize; n];

        'outer: for first_index in 0..self.scratch[0].len() {
            let first = self.scratch[0][first_index];
            let mut prev_end = first.end;

            for i in 1..n {
                while idx[i] < self.scratch[i].len() && self.scratch[i][idx[i]].begin < prev_end {
                    idx[i] += 1;
                }
                if idx[i] == self.scratch[i].len() {
                    break 'outer; // no further ordered match possible
                }
                prev_end = self.scratch[i][idx[i]].end;
            }

            if prev_end - first.begin <= self.width {
                self.extents.push(first.begin, prev_end);
            }
        }
        Ok(())
    }
}

impl DocCursor for OrderedWindowCursor {
    fn current_candidate(&self) -> DocId {
        self.document
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn has_match(&self, document: DocId) -> bool {
        !self.done && self.document == document && !self.extents.is_empty()
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

impl ExtentCursor for OrderedWindowCursor {
    fn count(&self) -> u32 {
        self.extents.len() as u32
    }

    fn extents(&mut self) -> Result<&ExtentBuffer> {
        Ok(&self.extents)
    }
}

/// Unordered proximity window.
///
/// Tracks one current extent per child; whenever the running span
/// `max_end - min_begin` fits in `width`, a window is emitted. With
/// `overlap` set, only the minimum-begin child advances after a match, so
/// windows may share tokens; otherwise every child must move past the
/// matched span before another window is considered.
#[derive(Debug)]
pub struct UnorderedWindowCursor {
    children: Vec<Box<dyn ExtentCursor>>,
    width: u32,
    overlap: bool,
    document: DocId,
    extents: ExtentBuffer,
    scratch: Vec<Vec<Extent>>,
    done: bool,
}

impl UnorderedWindowCursor {
    /// Create an unordered window of the given width over `children`.
    pub fn new(children: Vec<Box<dyn ExtentCursor>>, width: u32, overlap: bool) -> Result<Self> {
        let scratch = children.iter().map(|_| Vec::new()).collect();
        let mut cursor = UnorderedWindowCursor {
            done: children.is_empty() || children.iter().any(|c| c.is_done()),
            children,
            width,
            overlap,
            document: NO_MORE_DOCS,
            extents: ExtentBuffer::new(),
            scratch,
        };
        if !cursor.done {
            cursor.synchronize()?;
        }
        Ok(cursor)
    }

    fn synchronize(&mut self) -> Result<()> {
        loop {
            if self.children.iter().any(|c| c.is_done()) {
                self.done = true;
                self.document = NO_MORE_DOCS;
                self.extents.reset(NO_MORE_DOCS);
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
                self.load_extents()?;
                return Ok(());
            }
        }
    }

    fn load_extents(&mut self) -> Result<()> {
        for (child, scratch) in self.children.iter_mut().zip(self.scratch.iter_mut()) {
            scratch.clear();
            scratch.extend_from_slice(child.extents()?.as_slice());
        }

        self.extents.reset(self.document);

        let n = self.scratch.len();
        let mut idx = vec![0usize; n];

        loop {
            if (0..n).any(|i| idx[i] >= self.scratch[i].len()) {
                return Ok(());
            }

            let mut min_begin = u32::MAX;
            let mut max_end = 0u32;
            let mut min_child = 0usize;
            for i in 0..n {
                let extent = self.scratch[i][idx[i]];
                if extent.begin < min_begin {
                    min_begin = extent.begin;
                    min_child = i;
                }
                max_end = max_end.max(extent.end);
            }

            if max_end - min_begin <= self.width {
                self.extents.push(min_begin, max_end);
                if self.overlap {
                    idx[min_child] += 1;
                } else {
                    // All children advance past the matched span.
                    for i in 0..n {
                        while idx[i] < self.scratch[i].len()
                            && self.scratch[i][idx[i]].begin < max_end
                        {
                            idx[i] += 1;
                        }
                    }
                }
            } else {
                idx[min_child] += 1;
            }
        }
    }
}

impl DocCursor for UnorderedWindowCursor {
    fn current_candidate(&self) -> DocId {
        self.document
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn has_match(&self, document: DocId) -> bool {
        !self.done && self.document == document && !self.extents.is_empty()
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

impl ExtentCursor for UnorderedWindowCursor {
    fn count(&self) -> u32 {
        self.extents.len() as u32
    }

    fn extents(&mut self) -> Result<&ExtentBuffer> {
        Ok(&self.extents)
    }
}
