//! Posting-list encoder.
//!
//! Byte layout of one encoded list:
//!
//! ```text
//! header:    doc_count, position_count, skip_distance, skip_count  (varints)
//!            flags                                                 (u8)
//! skips:     length-prefixed, delta-encoded skip entries
//! docs:      length-prefixed document-id delta stream
//! counts:    length-prefixed per-document count stream
//! positions: length-prefixed position stream; per extent the begin
//!            delta and the span length, begin deltas restarting at
//!            every document
//! ```
//!
//! Every sub-stream carries its own length prefix so a reader can skip it
//! wholesale. A skip entry is recorded after every `skip_distance`
//! documents and holds the last document id written so far plus the byte
//! offset of the upcoming block in each of the three streams.

use crate::error::{PeregrineError, Result};
use crate::postings::{DocId, FLAG_POSITIONS};
use crate::util::varint;

/// Documents per skip entry unless overridden.
pub const DEFAULT_SKIP_DISTANCE: u32 = 64;

/// One skip-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SkipEntry {
    /// Largest document id written before the block this entry addresses.
    pub document: DocId,
    /// Offset of the block within the document-delta stream.
    pub doc_offset: u64,
    /// Offset of the block within the count stream.
    pub count_offset: u64,
    /// Offset of the block within the position stream.
    pub position_offset: u64,
}

/// Encoder for a single posting list.
///
/// Input must arrive in strictly ascending `(document, begin)` order;
/// violations are corruption errors, not silently reordered.
#[derive(Debug)]
pub struct PostingListWriter {
    skip_distance: u32,
    docs: Vec<u8>,
    counts: Vec<u8>,
    positions: Vec<u8>,
    skips: Vec<SkipEntry>,
    docs_written: u32,
    position_count: u64,
    last_document: DocId,
    doc_open: bool,
    current_count: u32,
    last_begin: u32,
    has_first_extent: bool,
}

impl Default for PostingListWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl PostingListWriter {
    /// Create a writer with the default skip distance.
    pub fn new() -> Self {
        Self::with_skip_distance(DEFAULT_SKIP_DISTANCE)
    }

    /// Create a writer with a custom skip distance; `0` disables the
    /// skip table.
    pub fn with_skip_distance(skip_distance: u32) -> Self {
        PostingListWriter {
            skip_distance,
            docs: Vec::new(),
            counts: Vec::new(),
            positions: Vec::new(),
            skips: Vec::new(),
            docs_written: 0,
            position_count: 0,
            last_document: 0,
            doc_open: false,
            current_count: 0,
            last_begin: 0,
            has_first_extent: false,
        }
    }

    /// Append one extent.
    pub fn add(&mut self, document: DocId, begin: u32, end: u32) -> Result<()> {
        if end < begin {
            return Err(PeregrineError::corruption(format!(
                "extent ends before it begins: [{begin}, {end})"
            )));
        }

        if !self.doc_open || document != self.last_document {
            self.start_document(document)?;
        } else if self.has_first_extent && begin <= self.last_begin {
            return Err(PeregrineError::corruption(format!(
                "extents out of order in document {document}: begin {begin} after {}",
                self.last_begin
            )));
        }

        let delta = begin - if self.has_first_extent { self.last_begin } else { 0 };
        varint::encode_u32(delta, &mut self.positions);
        varint::encode_u32(end - begin, &mut self.positions);
        self.last_begin = begin;
        self.has_first_extent = true;
        self.current_count += 1;
        self.position_count += 1;
        Ok(())
    }

    fn start_document(&mut self, document: DocId) -> Result<()> {
        if self.doc_open && document <= self.last_document {
            return Err(PeregrineError::corruption(format!(
                "documents out of order: {document} after {}",
                self.last_document
            )));
        }

        self.close_document();

        if self.skip_distance > 0
            && self.docs_written > 0
            && self.docs_written % self.skip_distance == 0
        {
            self.skips.push(SkipEntry {
                document: self.last_document,
                doc_offset: self.docs.len() as u64,
                count_offset: self.counts.len() as u64,
                position_offset: self.positions.len() as u64,
            });
        }

        varint::encode_u64(document - self.last_document, &mut self.docs);
        self.last_document = document;
        self.doc_open = true;
        self.current_count = 0;
        self.last_begin = 0;
        self.has_first_extent = false;
        Ok(())
    }

    fn close_document(&mut self) {
        if self.doc_open {
            varint::encode_u32(self.current_count, &mut self.counts);
            self.docs_written += 1;
        }
    }

    /// Number of documents added so far (including the open one).
    pub fn document_count(&self) -> u32 {
        self.docs_written + if self.doc_open { 1 } else { 0 }
    }

    /// Total number of extents added so far.
    pub fn position_count(&self) -> u64 {
        self.position_count
    }

    /// Encode the complete list.
    pub fn finish(mut self) -> Vec<u8> {
        self.close_document();

        let mut skip_block = Vec::new();
        let mut previous = SkipEntry {
            document: 0,
            doc_offset: 0,
            count_offset: 0,
            position_offset: 0,
        };
        for entry in &self.skips {
            varint::encode_u64(entry.document - previous.document, &mut skip_block);
            varint::encode_u64(entry.doc_offset - previous.doc_offset, &mut skip_block);
            varint::encode_u64(entry.count_offset - previous.count_offset, &mut skip_block);
            varint::encode_u64(
                entry.position_offset - previous.position_offset,
                &mut skip_block,
            );
            previous = *entry;
        }

        let mut out = Vec::new();
        varint::encode_u32(self.docs_written, &mut out);
        varint::encode_u64(self.position_count, &mut out);
        varint::encode_u32(self.skip_distance, &mut out);
        varint::encode_u32(self.skips.len() as u32, &mut out);
        out.push(FLAG_POSITIONS);

        for stream in [&skip_block, &self.docs, &self.counts, &self.positions] {
            varint::encode_u64(stream.len() as u64, &mut out);
            out.extend_from_slice(stream);
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_out_of_order_documents() {
        let mut writer = PostingListWriter::new();
        writer.add(5, 1, 2).unwrap();
        writer.add(9, 0, 1).unwrap();

        let result = writer.add(9, 0, 1);
        assert!(result.is_err(), "equal begin within a document must fail");

        let mut writer = PostingListWriter::new();
        writer.add(5, 1, 2).unwrap();
        assert!(writer.add(3, 0, 1).is_err());
        assert!(writer.add(5, 0, 1).is_err(), "document reopened");
    }

    #[test]
    fn test_rejects_inverted_extent() {
        let mut writer = PostingListWriter::new();
        assert!(writer.add(1, 5, 4).is_err());
    }

    #[test]
    fn test_counts() {
        let mut writer = PostingListWriter::new();
        writer.add(2, 1, 2).unwrap();
        writer.add(2, 7, 8).unwrap();
        writer.add(4, 3, 4).unwrap();

        assert_eq!(writer.document_count(), 2);
        assert_eq!(writer.position_count(), 3);
    }

    #[test]
    fn test_skip_entries_every_distance() {
        let mut writer = PostingListWriter::with_skip_distance(4);
        for doc in 0..10u64 {
            writer.add(doc * 3, 1, 2).unwrap();
        }
        // Entries recorded after documents 4 and 8.
        assert_eq!(writer.skips.len(), 2);
        assert_eq!(writer.skips[0].document, 9);
        assert_eq!(writer.skips[1].document, 21);
    }

    #[test]
    fn test_empty_list() {
        let writer = PostingListWriter::new();
        let bytes = writer.finish();
        assert!(!bytes.is_empty());
    }
}
