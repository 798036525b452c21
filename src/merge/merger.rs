//! The generic k-way index merger.
//!
//! N already-sorted part readers feed one sorted writer. A min-heap keyed
//! by raw key bytes (tie-break: shard id ascending) groups every cursor
//! positioned at the same key; a part-specific [`PartMerger`] combines
//! the group's values; then each grouped cursor advances and, if alive,
//! re-enters the heap. Ordering violations anywhere are corruption
//! errors: they mean an input shard or a mapping table already broke an
//! invariant, so the merge aborts rather than guessing.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt::Debug;
use std::io::Write;
use std::sync::Arc;

use log::debug;
use serde::Serialize;

use crate::error::{PeregrineError, Result};
use crate::merge::mapping::DocumentMappingReader;
use crate::postings::part::{
    InvertedKeyCursor, InvertedPartReader, LengthsKeyCursor, LengthsPartReader, LengthsPartWriter,
    NamesKeyCursor, NamesPartReader, NamesPartWriter,
};
use crate::postings::{DocId, InvertedPartWriter};
use crate::query::matcher::{DocCursor, ExtentCursor};

/// A sequential cursor over one shard's `(key, value)` records.
pub trait PartCursor: Debug {
    /// The current raw key bytes.
    fn key(&self) -> &[u8];

    /// Whether all records are consumed.
    fn is_done(&self) -> bool;

    /// Advance to the next key.
    fn next_key(&mut self) -> Result<()>;
}

impl PartCursor for InvertedKeyCursor {
    fn key(&self) -> &[u8] {
        InvertedKeyCursor::key(self)
    }

    fn is_done(&self) -> bool {
        InvertedKeyCursor::is_done(self)
    }

    fn next_key(&mut self) -> Result<()> {
        InvertedKeyCursor::next_key(self)
    }
}

impl PartCursor for LengthsKeyCursor {
    fn key(&self) -> &[u8] {
        LengthsKeyCursor::key(self)
    }

    fn is_done(&self) -> bool {
        LengthsKeyCursor::is_done(self)
    }

    fn next_key(&mut self) -> Result<()> {
        LengthsKeyCursor::next_key(self)
    }
}

impl PartCursor for NamesKeyCursor {
    fn key(&self) -> &[u8] {
        NamesKeyCursor::key(self)
    }

    fn is_done(&self) -> bool {
        NamesKeyCursor::is_done(self)
    }

    fn next_key(&mut self) -> Result<()> {
        NamesKeyCursor::next_key(self)
    }
}

/// Part-specific value merging.
pub trait PartMerger {
    /// The cursor type this merger consumes.
    type Cursor: PartCursor;

    /// The effective merge key for the cursor's current record. For
    /// document-keyed parts this passes the document through the mapping;
    /// for term-keyed parts it is the raw key.
    fn merge_key(&self, shard: usize, cursor: &Self::Cursor) -> Result<Vec<u8>>;

    /// Merge the values of every cursor positioned at `key`.
    fn merge_group(&mut self, key: &[u8], group: &mut [(usize, &mut Self::Cursor)]) -> Result<()>;
}

/// Statistics from one merge run.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MergeStats {
    /// Number of shards merged.
    pub shards: usize,
    /// Distinct keys written.
    pub keys_merged: u64,
}

/// Drives a k-way merge of part cursors through a [`PartMerger`].
pub struct GenericIndexMerger<M: PartMerger> {
    merger: M,
    cursors: Vec<M::Cursor>,
}

impl<M: PartMerger> GenericIndexMerger<M> {
    /// Create a merger over one cursor per shard.
    pub fn new(merger: M, cursors: Vec<M::Cursor>) -> Self {
        GenericIndexMerger { merger, cursors }
    }

    /// Run the merge to completion, returning the part merger (holding
    /// the output writer) and run statistics.
    pub fn run(mut self) -> Result<(M, MergeStats)> {
        let mut stats = MergeStats {
            shards: self.cursors.len(),
            keys_merged: 0,
        };

        let mut heap: BinaryHeap<Reverse<(Vec<u8>, usize)>> = BinaryHeap::new();
        for (shard, cursor) in self.cursors.iter().enumerate() {
            if !cursor.is_done() {
                let key = self.merger.merge_key(shard, cursor)?;
                heap.push(Reverse((key, shard)));
            }
        }

        while let Some(Reverse((key, shard))) = heap.pop() {
            let mut group_shards = vec![shard];
            while let Some(Reverse((next_key, _))) = heap.peek() {
                if *next_key != key {
                    break;
                }
                let Reverse((_, tied_shard)) = heap.pop().unwrap();
                group_shards.push(tied_shard);
            }

            {
                let mut group: Vec<(usize, &mut M::Cursor)> = self
                    .cursors
                    .iter_mut()
                    .enumerate()
                    .filter(|(i, _)| group_shards.contains(i))
                    .collect();
                self.merger.merge_group(&key, &mut group)?;
            }
            stats.keys_merged += 1;

            for shard in group_shards {
                let cursor = &mut self.cursors[shard];
                cursor.next_key()?;
                if !cursor.is_done() {
                    let next_key = self.merger.merge_key(shard, cursor)?;
                    if next_key <= key {
                        return Err(PeregrineError::corruption(format!(
                            "shard {shard} keys are not strictly increasing"
                        )));
                    }
                    heap.push(Reverse((next_key, shard)));
                }
            }
        }

        debug!(
            "merge complete: {} shards, {} keys",
            stats.shards, stats.keys_merged
        );
        Ok((self.merger, stats))
    }
}

/// Merges inverted (posting) parts: every shard contributes extents for
/// the key, documents are remapped, and the union is re-sorted by
/// `(document, begin)` because remapping can reorder documents across
/// shards.
pub struct PostingPartMerger<W: Write> {
    writer: InvertedPartWriter<W>,
    mapping: Option<Arc<DocumentMappingReader>>,
    postings_written: u64,
}

impl<W: Write> PostingPartMerger<W> {
    /// Create a merger writing to `output`.
    pub fn new(output: W, mapping: Option<Arc<DocumentMappingReader>>) -> Result<Self> {
        Ok(PostingPartMerger {
            writer: InvertedPartWriter::new(output)?,
            mapping,
            postings_written: 0,
        })
    }

    /// Total extents written.
    pub fn postings_written(&self) -> u64 {
        self.postings_written
    }

    /// Close the output part file.
    pub fn finish(self) -> Result<W> {
        self.writer.finish()
    }

    fn map_document(&self, shard: usize, document: DocId) -> Result<DocId> {
        match &self.mapping {
            Some(mapping) => mapping.map(shard, document),
            None => Ok(document),
        }
    }
}

impl<W: Write> PartMerger for PostingPartMerger<W> {
    type Cursor = InvertedKeyCursor;

    fn merge_key(&self, _shard: usize, cursor: &Self::Cursor) -> Result<Vec<u8>> {
        Ok(cursor.key().to_vec())
    }

    fn merge_group(&mut self, key: &[u8], group: &mut [(usize, &mut Self::Cursor)]) -> Result<()> {
        let mut tuples: Vec<(DocId, u32, u32)> = Vec::new();

        for (shard, cursor) in group.iter() {
            let list = cursor.posting_list()?;
            let mut postings = list.cursor()?;
            while !postings.is_done() {
                let document = postings.current_candidate();
                let mapped = self.map_document(*shard, document)?;
                for extent in postings.extents()?.as_slice() {
                    tuples.push((mapped, extent.begin, extent.end));
                }
                postings.move_past(document)?;
            }
        }

        // Remapped documents from different shards interleave.
        tuples.sort_unstable();

        for (document, begin, end) in tuples {
            self.writer.add(key, document, begin, end)?;
            self.postings_written += 1;
        }
        Ok(())
    }
}

/// Merges document-lengths parts. Lengths are singleton records: the same
/// document appearing in two shards means the shards were not disjoint,
/// which is a fatal consistency error.
pub struct LengthsPartMerger<W: Write> {
    writer: LengthsPartWriter,
    output: W,
    mapping: Option<Arc<DocumentMappingReader>>,
}

impl<W: Write> LengthsPartMerger<W> {
    /// Create a merger writing to `output`.
    pub fn new(output: W, mapping: Option<Arc<DocumentMappingReader>>) -> Self {
        LengthsPartMerger {
            writer: LengthsPartWriter::new(),
            output,
            mapping,
        }
    }

    /// Close the output part file.
    pub fn finish(self) -> Result<W> {
        self.writer.finish(self.output)
    }
}

impl<W: Write> PartMerger for LengthsPartMerger<W> {
    type Cursor = LengthsKeyCursor;

    fn merge_key(&self, shard: usize, cursor: &Self::Cursor) -> Result<Vec<u8>> {
        let document = match &self.mapping {
            Some(mapping) => mapping.map(shard, cursor.document())?,
            None => cursor.document(),
        };
        Ok(document.to_be_bytes().to_vec())
    }

    fn merge_group(&mut self, key: &[u8], group: &mut [(usize, &mut Self::Cursor)]) -> Result<()> {
        let document = DocId::from_be_bytes(key.try_into().expect("8-byte document key"));
        if group.len() > 1 {
            let shards: Vec<usize> = group.iter().map(|(shard, _)| *shard).collect();
            return Err(PeregrineError::corruption(format!(
                "document {document} has a length in multiple shards: {shards:?}"
            )));
        }
        self.writer.add(document, group[0].1.length())
    }
}

/// Merges document-names parts; singleton semantics as for lengths.
pub struct NamesPartMerger<W: Write> {
    writer: NamesPartWriter,
    output: W,
    mapping: Option<Arc<DocumentMappingReader>>,
}

impl<W: Write> NamesPartMerger<W> {
    /// Create a merger writing to `output`.
    pub fn new(output: W, mapping: Option<Arc<DocumentMappingReader>>) -> Self {
        NamesPartMerger {
            writer: NamesPartWriter::new(),
            output,
            mapping,
        }
    }

    /// Close the output part file.
    pub fn finish(self) -> Result<W> {
        self.writer.finish(self.output)
    }
}

impl<W: Write> PartMerger for NamesPartMerger<W> {
    type Cursor = NamesKeyCursor;

    fn merge_key(&self, shard: usize, cursor: &Self::Cursor) -> Result<Vec<u8>> {
        let document = match &self.mapping {
            Some(mapping) => mapping.map(shard, cursor.document())?,
            None => cursor.document(),
        };
        Ok(document.to_be_bytes().to_vec())
    }

    fn merge_group(&mut self, key: &[u8], group: &mut [(usize, &mut Self::Cursor)]) -> Result<()> {
        let document = DocId::from_be_bytes(key.try_into().expect("8-byte document key"));
        if group.len() > 1 {
            let shards: Vec<usize> = group.iter().map(|(shard, _)| *shard).collect();
            return Err(PeregrineError::corruption(format!(
                "document {document} is named in multiple shards: {shards:?}"
            )));
        }
        self.writer.add(document, group[0].1.name())
    }
}

/// Merge inverted parts into `output`.
pub fn merge_inverted_parts<W: Write>(
    readers: &[InvertedPartReader],
    mapping: Option<Arc<DocumentMappingReader>>,
    output: W,
) -> Result<(W, MergeStats)> {
    let cursors = readers.iter().map(|r| r.key_cursor()).collect();
    let merger = PostingPartMerger::new(output, mapping)?;
    let (merger, stats) = GenericIndexMerger::new(merger, cursors).run()?;
    Ok((merger.finish()?, stats))
}

/// Merge document-lengths parts into `output`.
pub fn merge_lengths_parts<W: Write>(
    readers: &[LengthsPartReader],
    mapping: Option<Arc<DocumentMappingReader>>,
    output: W,
) -> Result<(W, MergeStats)> {
    let cursors = readers.iter().map(|r| r.key_cursor()).collect();
    let merger = LengthsPartMerger::new(output, mapping);
    let (merger, stats) = GenericIndexMerger::new(merger, cursors).run()?;
    Ok((merger.finish()?, stats))
}

/// Merge document-names parts into `output`.
pub fn merge_names_parts<W: Write>(
    readers: &[NamesPartReader],
    mapping: Option<Arc<DocumentMappingReader>>,
    output: W,
) -> Result<(W, MergeStats)> {
    let cursors = readers.iter().map(|r| r.key_cursor()).collect();
    let merger = NamesPartMerger::new(output, mapping);
    let (merger, stats) = GenericIndexMerger::new(merger, cursors).run()?;
    Ok((merger.finish()?, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, Storage, StorageOutput};

    fn inverted_part(storage: &MemoryStorage, name: &str, rows: &[(&[u8], DocId, u32)]) {
        let output = storage.create_output(name).unwrap();
        let mut writer = InvertedPartWriter::new(output).unwrap();
        for (key, document, begin) in rows {
            writer.add(key, *document, *begin, begin + 1).unwrap();
        }
        writer.finish().unwrap().flush_and_sync().unwrap();
    }

    #[test]
    fn test_posting_merge_unions_keys() {
        let storage = MemoryStorage::new();
        inverted_part(
            &storage,
            "a.inv",
            &[(b"ant", 1, 0), (b"bee", 1, 3), (b"bee", 4, 0)],
        );
        inverted_part(&storage, "b.inv", &[(b"bee", 2, 7), (b"cat", 9, 1)]);

        let readers = vec![
            InvertedPartReader::open(&storage, "a.inv").unwrap(),
            InvertedPartReader::open(&storage, "b.inv").unwrap(),
        ];
        let (bytes, stats) = merge_inverted_parts(&readers, None, Vec::new()).unwrap();
        assert_eq!(stats.shards, 2);
        assert_eq!(stats.keys_merged, 3);

        let merged = InvertedPartReader::from_bytes(bytes).unwrap();
        let keys: Vec<&[u8]> = merged.keys().collect();
        assert_eq!(keys, vec![b"ant".as_slice(), b"bee".as_slice(), b"cat".as_slice()]);

        let bee = merged.posting(b"bee").unwrap().unwrap();
        assert_eq!(bee.document_count(), 3);
        let mut cursor = bee.cursor().unwrap();
        let mut docs = Vec::new();
        while !cursor.is_done() {
            docs.push(cursor.current_candidate());
            cursor.move_past(docs[docs.len() - 1]).unwrap();
        }
        assert_eq!(docs, vec![1, 2, 4]);
    }

    #[test]
    fn test_lengths_singleton_duplicate_is_fatal() {
        let storage = MemoryStorage::new();

        let mut a = LengthsPartWriter::new();
        a.add(3, 10).unwrap();
        a.finish(storage.create_output("a.len").unwrap()).unwrap();

        let mut b = LengthsPartWriter::new();
        b.add(3, 11).unwrap();
        b.finish(storage.create_output("b.len").unwrap()).unwrap();

        let readers = vec![
            LengthsPartReader::open(&storage, "a.len").unwrap(),
            LengthsPartReader::open(&storage, "b.len").unwrap(),
        ];
        let result = merge_lengths_parts(&readers, None, Vec::new());
        assert!(matches!(result, Err(PeregrineError::Corruption(_))));
    }
}
