//! Posting-list decoder and leaf cursor.

use std::fmt;
use std::sync::Arc;

use crate::error::{PeregrineError, Result};
use crate::postings::writer::SkipEntry;
use crate::postings::{DocId, ExtentBuffer, FLAG_POSITIONS, NO_MORE_DOCS};
use crate::query::matcher::{DocCursor, ExtentCursor};
use crate::util::varint;

/// An immutable decoded-on-demand posting list.
///
/// Opening a list parses the header and skip table only; document and
/// position streams are decoded incrementally by cursors. The list is
/// cheap to clone and may back any number of concurrent cursors.
#[derive(Debug, Clone)]
pub struct PostingList {
    inner: Arc<ListData>,
}

#[derive(Debug)]
struct ListData {
    data: Vec<u8>,
    doc_count: u32,
    position_count: u64,
    skip_distance: u32,
    skips: Vec<SkipEntry>,
    docs_start: usize,
    counts_start: usize,
    positions_start: usize,
    positions_end: usize,
}

impl PostingList {
    /// Parse an encoded posting list.
    pub fn open(data: Vec<u8>) -> Result<PostingList> {
        let mut pos = 0usize;

        let (doc_count, n) = varint::decode_u32(&data[pos..])?;
        pos += n;
        let (position_count, n) = varint::decode_u64(&data[pos..])?;
        pos += n;
        let (skip_distance, n) = varint::decode_u32(&data[pos..])?;
        pos += n;
        let (skip_count, n) = varint::decode_u32(&data[pos..])?;
        pos += n;

        let flags = *data
            .get(pos)
            .ok_or_else(|| PeregrineError::corruption("truncated posting header"))?;
        pos += 1;
        if flags != FLAG_POSITIONS {
            return Err(PeregrineError::corruption(format!(
                "unsupported posting flags: {flags:#04x}"
            )));
        }

        // Skip table, delta-encoded.
        let (skip_len, n) = varint::decode_u64(&data[pos..])?;
        pos += n;
        let skip_end = pos
            .checked_add(skip_len as usize)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| PeregrineError::corruption("skip table out of range"))?;
        let mut skips = Vec::with_capacity(skip_count as usize);
        let mut previous = SkipEntry {
            document: 0,
            doc_offset: 0,
            count_offset: 0,
            position_offset: 0,
        };
        for _ in 0..skip_count {
            let mut entry = previous;
            for field in [
                &mut entry.document,
                &mut entry.doc_offset,
                &mut entry.count_offset,
                &mut entry.position_offset,
            ] {
                let (delta, n) = varint::decode_u64(&data[pos..])?;
                *field += delta;
                pos += n;
            }
            skips.push(entry);
            previous = entry;
        }
        if pos != skip_end {
            return Err(PeregrineError::corruption("skip table length mismatch"));
        }

        let mut stream = |pos: &mut usize| -> Result<usize> {
            let (len, n) = varint::decode_u64(&data[*pos..])?;
            *pos += n;
            let start = *pos;
            *pos = pos
                .checked_add(len as usize)
                .filter(|end| *end <= data.len())
                .ok_or_else(|| PeregrineError::corruption("posting stream out of range"))?;
            Ok(start)
        };
        let docs_start = stream(&mut pos)?;
        let counts_start = stream(&mut pos)?;
        let positions_start = stream(&mut pos)?;

        if pos != data.len() {
            return Err(PeregrineError::corruption("posting list length mismatch"));
        }

        Ok(PostingList {
            inner: Arc::new(ListData {
                data,
                doc_count,
                position_count,
                skip_distance,
                skips,
                docs_start,
                counts_start,
                positions_start,
                positions_end: pos,
            }),
        })
    }

    /// Number of documents in the list.
    pub fn document_count(&self) -> u32 {
        self.inner.doc_count
    }

    /// Total number of extents in the list.
    pub fn position_count(&self) -> u64 {
        self.inner.position_count
    }

    /// Open a cursor positioned at the first document.
    pub fn cursor(&self) -> Result<PostingCursor> {
        PostingCursor::new(Arc::clone(&self.inner))
    }
}

/// Forward-only cursor over one posting list.
///
/// Positions for the current document are decoded only when `extents()`
/// is called; documents skipped over never have their positions decoded.
pub struct PostingCursor {
    list: Arc<ListData>,
    doc_pos: usize,
    count_pos: usize,
    pos_pos: usize,
    docs_read: u32,
    document: DocId,
    count: u32,
    extents: ExtentBuffer,
    extents_loaded: bool,
    done: bool,
}

impl fmt::Debug for PostingCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostingCursor")
            .field("document", &self.document)
            .field("docs_read", &self.docs_read)
            .field("done", &self.done)
            .finish()
    }
}

impl PostingCursor {
    fn new(list: Arc<ListData>) -> Result<Self> {
        let mut cursor = PostingCursor {
            doc_pos: list.docs_start,
            count_pos: list.counts_start,
            pos_pos: list.positions_start,
            docs_read: 0,
            document: 0,
            count: 0,
            extents: ExtentBuffer::new(),
            extents_loaded: true,
            done: list.doc_count == 0,
            list,
        };
        if cursor.done {
            cursor.document = NO_MORE_DOCS;
        } else {
            cursor.next_document()?;
        }
        Ok(cursor)
    }

    /// Decode the next document entry.
    fn next_document(&mut self) -> Result<()> {
        if !self.extents_loaded {
            // Positions of the outgoing document were never requested.
            self.skip_positions()?;
        }

        if self.docs_read == self.list.doc_count {
            self.done = true;
            self.document = NO_MORE_DOCS;
            return Ok(());
        }

        let (delta, n) = varint::decode_u64(&self.list.data[self.doc_pos..])?;
        self.doc_pos += n;
        self.document += delta;

        let (count, n) = varint::decode_u32(&self.list.data[self.count_pos..])?;
        self.count_pos += n;
        self.count = count;

        self.docs_read += 1;
        self.extents_loaded = false;
        Ok(())
    }

    /// Scan past the current document's position entries without decoding
    /// them into extents.
    fn skip_positions(&mut self) -> Result<()> {
        for _ in 0..self.count * 2 {
            self.pos_pos += varint::skip_varint(&self.list.data[self.pos_pos..])?;
        }
        self.extents_loaded = true;
        Ok(())
    }

    /// Jump over whole blocks using the skip table. Never decodes blocks
    /// strictly before the one that may contain `target`.
    fn skip_toward(&mut self, target: DocId) {
        if self.list.skips.is_empty() {
            return;
        }

        // Last entry whose recorded document is still before the target.
        let idx = self.list.skips.partition_point(|e| e.document < target);
        if idx == 0 {
            return;
        }
        let entry = &self.list.skips[idx - 1];
        let docs_before = idx as u32 * self.list.skip_distance;
        if docs_before <= self.docs_read {
            return; // already past this block
        }

        self.doc_pos = self.list.docs_start + entry.doc_offset as usize;
        self.count_pos = self.list.counts_start + entry.count_offset as usize;
        self.pos_pos = self.list.positions_start + entry.position_offset as usize;
        debug_assert!(self.pos_pos <= self.list.positions_end);
        self.document = entry.document;
        self.docs_read = docs_before;
        self.count = 0;
        self.extents_loaded = true;
    }
}

impl DocCursor for PostingCursor {
    fn current_candidate(&self) -> DocId {
        self.document
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn has_match(&self, document: DocId) -> bool {
        !self.done && self.document == document
    }

    fn move_to(&mut self, document: DocId) -> Result<()> {
        debug_assert!(!self.done, "move_to on exhausted cursor");
        if self.done {
            return Ok(());
        }

        if document > self.document {
            self.skip_toward(document);
        }
        while !self.done && self.document < document {
            self.next_document()?;
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.doc_pos = self.list.docs_start;
        self.count_pos = self.list.counts_start;
        self.pos_pos = self.list.positions_start;
        self.docs_read = 0;
        self.document = 0;
        self.count = 0;
        self.extents_loaded = true;
        self.done = self.list.doc_count == 0;
        if self.done {
            self.document = NO_MORE_DOCS;
        } else {
            self.next_document()?;
        }
        Ok(())
    }
}

impl ExtentCursor for PostingCursor {
    fn count(&self) -> u32 {
        debug_assert!(!self.done, "count on exhausted cursor");
        self.count
    }

    fn extents(&mut self) -> Result<&ExtentBuffer> {
        debug_assert!(!self.done, "extents on exhausted cursor");
        if !self.extents_loaded {
            self.extents.reset(self.document);
            let mut begin = 0u32;
            for _ in 0..self.count {
                let (delta, n) = varint::decode_u32(&self.list.data[self.pos_pos..])?;
                self.pos_pos += n;
                let (span, n) = varint::decode_u32(&self.list.data[self.pos_pos..])?;
                self.pos_pos += n;
                begin += delta;
                self.extents.push(begin, begin + span);
            }
            self.extents_loaded = true;
        }
        Ok(&self.extents)
    }
}
