//! Document-id mapping tables.
//!
//! Before a merge, every shard gets one table file: a fixed-width array
//! of big-endian u32 values where index `old` holds the merged global id
//! of shard-local document `old`. The tables are built once, then
//! memory-mapped read-only for the lifetime of the merge.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use memmap2::{Mmap, MmapOptions};

use crate::error::{PeregrineError, Result};
use crate::postings::DocId;

/// Builds one shard's mapping table file.
///
/// Entries are pushed in shard-local document order; entry `i` is the
/// global id assigned to local document `i`.
#[derive(Debug)]
pub struct DocumentMappingWriter {
    writer: BufWriter<File>,
    entries: u64,
}

impl DocumentMappingWriter {
    /// Create a table file at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path.as_ref()).map_err(|e| {
            PeregrineError::storage(format!(
                "failed to create mapping file {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Ok(DocumentMappingWriter {
            writer: BufWriter::new(file),
            entries: 0,
        })
    }

    /// Append the global id for the next shard-local document.
    pub fn push(&mut self, global_id: u32) -> Result<()> {
        self.writer.write_all(&global_id.to_be_bytes())?;
        self.entries += 1;
        Ok(())
    }

    /// Number of entries written.
    pub fn len(&self) -> u64 {
        self.entries
    }

    /// Whether no entries have been written.
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Flush and sync the table to disk.
    pub fn finish(mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }
}

#[derive(Debug)]
struct MappingTable {
    // None for an empty shard; mmap of a zero-length file is not portable.
    map: Option<Mmap>,
    entries: usize,
}

/// Read-only view over all shards' mapping tables.
///
/// `map(shard, old)` is a bounds-checked array lookup into the shard's
/// memory-mapped table. There is no write path at merge time.
#[derive(Debug)]
pub struct DocumentMappingReader {
    shards: Vec<MappingTable>,
}

impl DocumentMappingReader {
    /// Memory-map one table file per shard, in shard order.
    pub fn open<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut shards = Vec::with_capacity(paths.len());

        for path in paths {
            let file = File::open(path.as_ref()).map_err(|e| {
                PeregrineError::storage(format!(
                    "failed to open mapping file {}: {e}",
                    path.as_ref().display()
                ))
            })?;
            let len = file.metadata()?.len();
            if len % 4 != 0 {
                return Err(PeregrineError::corruption(format!(
                    "mapping file {} is not a whole number of u32 entries",
                    path.as_ref().display()
                )));
            }

            let map = if len == 0 {
                None
            } else {
                Some(unsafe {
                    MmapOptions::new().map(&file).map_err(|e| {
                        PeregrineError::storage(format!(
                            "failed to mmap {}: {e}",
                            path.as_ref().display()
                        ))
                    })?
                })
            };

            shards.push(MappingTable {
                map,
                entries: (len / 4) as usize,
            });
        }

        Ok(DocumentMappingReader { shards })
    }

    /// Number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Number of documents in `shard`'s table.
    pub fn shard_len(&self, shard: usize) -> usize {
        self.shards.get(shard).map(|t| t.entries).unwrap_or(0)
    }

    /// Map a shard-local document id to its merged global id.
    pub fn map(&self, shard: usize, old: DocId) -> Result<DocId> {
        let table = self.shards.get(shard).ok_or_else(|| {
            PeregrineError::merge(format!("no mapping table for shard {shard}"))
        })?;

        let index = old as usize;
        if index >= table.entries {
            return Err(PeregrineError::corruption(format!(
                "document {old} out of range for shard {shard} ({} entries)",
                table.entries
            )));
        }

        let data = table.map.as_ref().expect("non-empty table has a map");
        let offset = index * 4;
        let raw: [u8; 4] = data[offset..offset + 4].try_into().expect("4 bytes");
        Ok(u32::from_be_bytes(raw) as DocId)
    }
}
