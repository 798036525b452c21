//! On-disk index part files.
//!
//! Three part kinds share one discipline: records sorted by key, written
//! once through the checksummed structured layer, then opened read-only.
//!
//! - **Inverted part**: `(key, posting block)` records with a trailing
//!   key directory for random access.
//! - **Document-lengths part**: fixed 12-byte `(document, length)`
//!   records, binary-searchable; doubles as the evaluator's length store.
//! - **Document-names part**: `(document, name)` records.
//!
//! Each reader also exposes a sequential key cursor for the merger.

use std::io::{Cursor, Write};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{PeregrineError, Result};
use crate::postings::reader::PostingList;
use crate::postings::writer::PostingListWriter;
use crate::postings::{DocId, NO_MORE_DOCS};
use crate::query::collector::LengthLookup;
use crate::query::matcher::{ExtentCursor, NullCursor};
use crate::storage::{Storage, StorageInput, StructReader, StructWriter};
use crate::util::varint;

const INVERTED_MAGIC: u32 = 0x5047_4956;
const LENGTHS_MAGIC: u32 = 0x5047_4C4E;
const NAMES_MAGIC: u32 = 0x5047_4E4D;
const FORMAT_VERSION: u32 = 1;

/// Writer for an inverted index part.
///
/// Input arrives as a flat `(key, document, extent)` stream in strictly
/// ascending `(key, document, begin)` order; out-of-order input is a
/// fatal corruption error.
pub struct InvertedPartWriter<W: Write> {
    writer: StructWriter<W>,
    directory: Vec<DirectoryEntry>,
    current_key: Option<Vec<u8>>,
    current_list: Option<PostingListWriter>,
    skip_distance: u32,
}

#[derive(Clone)]
struct DirectoryEntry {
    key: Vec<u8>,
    offset: u64,
    length: u64,
}

impl<W: Write> InvertedPartWriter<W> {
    /// Create a writer emitting to `output`.
    pub fn new(output: W) -> Result<Self> {
        Self::with_skip_distance(output, crate::postings::writer::DEFAULT_SKIP_DISTANCE)
    }

    /// Create a writer with a custom posting skip distance.
    pub fn with_skip_distance(output: W, skip_distance: u32) -> Result<Self> {
        let mut writer = StructWriter::new(output);
        writer.write_u32(INVERTED_MAGIC)?;
        writer.write_u32(FORMAT_VERSION)?;
        Ok(InvertedPartWriter {
            writer,
            directory: Vec::new(),
            current_key: None,
            current_list: None,
            skip_distance,
        })
    }

    /// Append one extent.
    pub fn add(&mut self, key: &[u8], document: DocId, begin: u32, end: u32) -> Result<()> {
        let start_new_key = match &self.current_key {
            None => true,
            Some(current) => match key.cmp(current.as_slice()) {
                std::cmp::Ordering::Greater => true,
                std::cmp::Ordering::Equal => false,
                std::cmp::Ordering::Less => {
                    return Err(PeregrineError::corruption(format!(
                        "keys out of order: {key:?} after {current:?}"
                    )));
                }
            },
        };

        if start_new_key {
            self.flush_current()?;
            self.current_key = Some(key.to_vec());
            self.current_list = Some(PostingListWriter::with_skip_distance(self.skip_distance));
        }

        self.current_list
            .as_mut()
            .expect("posting list open")
            .add(document, begin, end)
    }

    fn flush_current(&mut self) -> Result<()> {
        let (key, list) = match (self.current_key.take(), self.current_list.take()) {
            (Some(key), Some(list)) => (key, list),
            _ => return Ok(()),
        };

        let value = list.finish();
        self.writer.write_bytes(&key)?;
        self.writer.write_varint(value.len() as u64)?;
        let offset = self.writer.position();
        self.writer.write_raw(&value)?;
        self.directory.push(DirectoryEntry {
            key,
            offset,
            length: value.len() as u64,
        });
        Ok(())
    }

    /// Number of keys written so far.
    pub fn key_count(&self) -> usize {
        self.directory.len() + usize::from(self.current_key.is_some())
    }

    /// Flush the final key, write the directory, and close the file.
    pub fn finish(mut self) -> Result<W> {
        self.flush_current()?;

        let directory_start = self.writer.position();
        self.writer.write_varint(self.directory.len() as u64)?;
        for entry in &self.directory {
            self.writer.write_bytes(&entry.key)?;
            self.writer.write_varint(entry.offset)?;
            self.writer.write_varint(entry.length)?;
        }
        self.writer.write_u64(directory_start)?;
        self.writer.finish()
    }
}

/// Read-only view of an inverted index part.
///
/// The whole file stays resident; posting cursors decode lazily out of
/// it. Cloning is cheap and readers are safe to share across threads.
#[derive(Debug, Clone)]
pub struct InvertedPartReader {
    inner: Arc<InvertedInner>,
}

#[derive(Debug)]
struct InvertedInner {
    data: Vec<u8>,
    directory: Vec<DirectoryEntry>,
}

impl std::fmt::Debug for DirectoryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryEntry")
            .field("key", &String::from_utf8_lossy(&self.key))
            .field("offset", &self.offset)
            .field("length", &self.length)
            .finish()
    }
}

impl InvertedPartReader {
    /// Open a part file from storage.
    pub fn open(storage: &dyn Storage, name: &str) -> Result<Self> {
        Self::from_bytes(storage.open_input(name)?.read_all()?)
    }

    /// Open a part from its raw bytes.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        if data.len() < 20 {
            return Err(PeregrineError::corruption("inverted part too small"));
        }

        let stored = (&data[data.len() - 4..]).read_u32::<LittleEndian>()?;
        let computed = crc32fast::hash(&data[..data.len() - 4]);
        if stored != computed {
            return Err(PeregrineError::corruption(format!(
                "inverted part checksum mismatch: expected {stored:08x}, computed {computed:08x}"
            )));
        }

        let magic = (&data[0..4]).read_u32::<LittleEndian>()?;
        let version = (&data[4..8]).read_u32::<LittleEndian>()?;
        if magic != INVERTED_MAGIC {
            return Err(PeregrineError::corruption("not an inverted part file"));
        }
        if version != FORMAT_VERSION {
            return Err(PeregrineError::corruption(format!(
                "unsupported inverted part version {version}"
            )));
        }

        let directory_start =
            (&data[data.len() - 12..data.len() - 4]).read_u64::<LittleEndian>()? as usize;
        if directory_start >= data.len() {
            return Err(PeregrineError::corruption("directory offset out of range"));
        }

        let mut pos = directory_start;
        let (count, n) = varint::decode_u64(&data[pos..])?;
        pos += n;

        let mut directory = Vec::with_capacity(count as usize);
        let mut previous: Option<Vec<u8>> = None;
        for _ in 0..count {
            let (key_len, n) = varint::decode_u64(&data[pos..])?;
            pos += n;
            let key_end = pos
                .checked_add(key_len as usize)
                .filter(|end| *end <= data.len())
                .ok_or_else(|| PeregrineError::corruption("truncated directory key"))?;
            let key = data[pos..key_end].to_vec();
            pos = key_end;

            let (offset, n) = varint::decode_u64(&data[pos..])?;
            pos += n;
            let (length, n) = varint::decode_u64(&data[pos..])?;
            pos += n;

            if offset + length > data.len() as u64 {
                return Err(PeregrineError::corruption("directory entry out of range"));
            }
            if let Some(prev) = &previous {
                if key <= *prev {
                    return Err(PeregrineError::corruption("directory keys out of order"));
                }
            }
            previous = Some(key.clone());
            directory.push(DirectoryEntry {
                key,
                offset,
                length,
            });
        }

        Ok(InvertedPartReader {
            inner: Arc::new(InvertedInner { data, directory }),
        })
    }

    /// Number of keys in the part.
    pub fn key_count(&self) -> usize {
        self.inner.directory.len()
    }

    /// All keys, ascending.
    pub fn keys(&self) -> impl Iterator<Item = &[u8]> {
        self.inner.directory.iter().map(|e| e.key.as_slice())
    }

    /// The posting list for `key`, if present.
    pub fn posting(&self, key: &[u8]) -> Result<Option<PostingList>> {
        let directory = &self.inner.directory;
        match directory.binary_search_by(|e| e.key.as_slice().cmp(key)) {
            Ok(index) => {
                let entry = &directory[index];
                let bytes = self.inner.data
                    [entry.offset as usize..(entry.offset + entry.length) as usize]
                    .to_vec();
                Ok(Some(PostingList::open(bytes)?))
            }
            Err(_) => Ok(None),
        }
    }

    /// An extent cursor for `key`: the posting cursor when the key is
    /// present, an exhausted null cursor otherwise.
    pub fn cursor_or_empty(&self, key: &[u8]) -> Result<Box<dyn ExtentCursor>> {
        match self.posting(key)? {
            Some(list) => Ok(Box::new(list.cursor()?)),
            None => Ok(Box::new(NullCursor::new())),
        }
    }

    /// A sequential cursor over `(key, posting list)` pairs for merging.
    pub fn key_cursor(&self) -> InvertedKeyCursor {
        InvertedKeyCursor {
            inner: Arc::clone(&self.inner),
            index: 0,
        }
    }
}

/// Sequential key cursor over an inverted part.
#[derive(Debug)]
pub struct InvertedKeyCursor {
    inner: Arc<InvertedInner>,
    index: usize,
}

impl InvertedKeyCursor {
    /// Whether all keys are consumed.
    pub fn is_done(&self) -> bool {
        self.index >= self.inner.directory.len()
    }

    /// The current key.
    pub fn key(&self) -> &[u8] {
        &self.inner.directory[self.index].key
    }

    /// Advance to the next key.
    pub fn next_key(&mut self) -> Result<()> {
        self.index += 1;
        Ok(())
    }

    /// Decode the current key's posting list.
    pub fn posting_list(&self) -> Result<PostingList> {
        let entry = &self.inner.directory[self.index];
        let bytes =
            self.inner.data[entry.offset as usize..(entry.offset + entry.length) as usize].to_vec();
        PostingList::open(bytes)
    }
}

/// Writer for a document-lengths part.
#[derive(Debug, Default)]
pub struct LengthsPartWriter {
    records: Vec<(DocId, u32)>,
}

impl LengthsPartWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one `(document, length)` record; documents must be strictly
    /// ascending.
    pub fn add(&mut self, document: DocId, length: u32) -> Result<()> {
        if let Some((last, _)) = self.records.last() {
            if document <= *last {
                return Err(PeregrineError::corruption(format!(
                    "documents out of order in lengths part: {document} after {last}"
                )));
            }
        }
        self.records.push((document, length));
        Ok(())
    }

    /// Number of records buffered.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the writer is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Encode all records into `output`.
    pub fn finish<W: Write>(self, output: W) -> Result<W> {
        let mut writer = StructWriter::new(output);
        writer.write_u32(LENGTHS_MAGIC)?;
        writer.write_u32(FORMAT_VERSION)?;
        writer.write_varint(self.records.len() as u64)?;
        for (document, length) in &self.records {
            writer.write_raw(&document.to_be_bytes())?;
            writer.write_u32(*length)?;
        }
        writer.finish()
    }
}

/// Read-only view of a document-lengths part.
#[derive(Debug, Clone)]
pub struct LengthsPartReader {
    records: Arc<Vec<(DocId, u32)>>,
}

impl LengthsPartReader {
    /// Open a part file from storage.
    pub fn open(storage: &dyn Storage, name: &str) -> Result<Self> {
        Self::from_bytes(storage.open_input(name)?.read_all()?)
    }

    /// Open a part from its raw bytes.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let size = data.len() as u64;
        let mut reader = StructReader::new(Cursor::new(data), size)?;

        if reader.read_u32()? != LENGTHS_MAGIC {
            return Err(PeregrineError::corruption("not a lengths part file"));
        }
        if reader.read_u32()? != FORMAT_VERSION {
            return Err(PeregrineError::corruption("unsupported lengths part version"));
        }

        let count = reader.read_varint()?;
        let mut records = Vec::with_capacity(count as usize);
        let mut previous: Option<DocId> = None;
        for _ in 0..count {
            let raw = reader.read_raw(8)?;
            let document = DocId::from_be_bytes(raw.as_slice().try_into().expect("8 bytes"));
            let length = reader.read_u32()?;
            if previous.map(|p| document <= p).unwrap_or(false) {
                return Err(PeregrineError::corruption(
                    "lengths part documents out of order",
                ));
            }
            previous = Some(document);
            records.push((document, length));
        }
        reader.finish()?;

        Ok(LengthsPartReader {
            records: Arc::new(records),
        })
    }

    /// Number of documents in the part.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the part is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All `(document, length)` records, ascending by document.
    pub fn records(&self) -> &[(DocId, u32)] {
        &self.records
    }

    /// A sequential cursor for merging.
    pub fn key_cursor(&self) -> LengthsKeyCursor {
        let mut cursor = LengthsKeyCursor {
            records: Arc::clone(&self.records),
            index: 0,
            key: [0u8; 8],
        };
        cursor.load_key();
        cursor
    }
}

impl LengthLookup for LengthsPartReader {
    fn length(&self, document: DocId) -> Result<u64> {
        match self.records.binary_search_by_key(&document, |(d, _)| *d) {
            Ok(index) => Ok(self.records[index].1 as u64),
            Err(_) => Err(PeregrineError::corruption(format!(
                "no length recorded for document {document}"
            ))),
        }
    }
}

/// Sequential cursor over a lengths part, keyed by the big-endian
/// document id so lexicographic key order equals numeric order.
#[derive(Debug)]
pub struct LengthsKeyCursor {
    records: Arc<Vec<(DocId, u32)>>,
    index: usize,
    key: [u8; 8],
}

impl LengthsKeyCursor {
    fn load_key(&mut self) {
        if let Some((document, _)) = self.records.get(self.index) {
            self.key = document.to_be_bytes();
        }
    }

    /// Whether all records are consumed.
    pub fn is_done(&self) -> bool {
        self.index >= self.records.len()
    }

    /// The current key (8 big-endian document-id bytes).
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// The current document id.
    pub fn document(&self) -> DocId {
        self.records.get(self.index).map(|(d, _)| *d).unwrap_or(NO_MORE_DOCS)
    }

    /// The current document's length.
    pub fn length(&self) -> u32 {
        self.records.get(self.index).map(|(_, l)| *l).unwrap_or(0)
    }

    /// Advance to the next record.
    pub fn next_key(&mut self) -> Result<()> {
        self.index += 1;
        self.load_key();
        Ok(())
    }
}

/// Writer for a document-names part.
#[derive(Debug, Default)]
pub struct NamesPartWriter {
    records: Vec<(DocId, String)>,
}

impl NamesPartWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one `(document, name)` record; documents must be strictly
    /// ascending.
    pub fn add(&mut self, document: DocId, name: &str) -> Result<()> {
        if let Some((last, _)) = self.records.last() {
            if document <= *last {
                return Err(PeregrineError::corruption(format!(
                    "documents out of order in names part: {document} after {last}"
                )));
            }
        }
        self.records.push((document, name.to_string()));
        Ok(())
    }

    /// Encode all records into `output`.
    pub fn finish<W: Write>(self, output: W) -> Result<W> {
        let mut writer = StructWriter::new(output);
        writer.write_u32(NAMES_MAGIC)?;
        writer.write_u32(FORMAT_VERSION)?;
        writer.write_varint(self.records.len() as u64)?;
        for (document, name) in &self.records {
            writer.write_raw(&document.to_be_bytes())?;
            writer.write_bytes(name.as_bytes())?;
        }
        writer.finish()
    }
}

/// Read-only view of a document-names part.
#[derive(Debug, Clone)]
pub struct NamesPartReader {
    records: Arc<Vec<(DocId, String)>>,
}

impl NamesPartReader {
    /// Open a part file from storage.
    pub fn open(storage: &dyn Storage, name: &str) -> Result<Self> {
        Self::from_bytes(storage.open_input(name)?.read_all()?)
    }

    /// Open a part from its raw bytes.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let size = data.len() as u64;
        let mut reader = StructReader::new(Cursor::new(data), size)?;

        if reader.read_u32()? != NAMES_MAGIC {
            return Err(PeregrineError::corruption("not a names part file"));
        }
        if reader.read_u32()? != FORMAT_VERSION {
            return Err(PeregrineError::corruption("unsupported names part version"));
        }

        let count = reader.read_varint()?;
        let mut records = Vec::with_capacity(count as usize);
        let mut previous: Option<DocId> = None;
        for _ in 0..count {
            let raw = reader.read_raw(8)?;
            let document = DocId::from_be_bytes(raw.as_slice().try_into().expect("8 bytes"));
            let name = String::from_utf8(reader.read_bytes()?)
                .map_err(|_| PeregrineError::corruption("document name is not UTF-8"))?;
            if previous.map(|p| document <= p).unwrap_or(false) {
                return Err(PeregrineError::corruption(
                    "names part documents out of order",
                ));
            }
            previous = Some(document);
            records.push((document, name));
        }
        reader.finish()?;

        Ok(NamesPartReader {
            records: Arc::new(records),
        })
    }

    /// Number of documents in the part.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the part is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The name of `document`, if recorded.
    pub fn name(&self, document: DocId) -> Option<&str> {
        self.records
            .binary_search_by_key(&document, |(d, _)| *d)
            .ok()
            .map(|index| self.records[index].1.as_str())
    }

    /// A sequential cursor for merging.
    pub fn key_cursor(&self) -> NamesKeyCursor {
        let mut cursor = NamesKeyCursor {
            records: Arc::clone(&self.records),
            index: 0,
            key: [0u8; 8],
        };
        cursor.load_key();
        cursor
    }
}

/// Sequential cursor over a names part.
#[derive(Debug)]
pub struct NamesKeyCursor {
    records: Arc<Vec<(DocId, String)>>,
    index: usize,
    key: [u8; 8],
}

impl NamesKeyCursor {
    fn load_key(&mut self) {
        if let Some((document, _)) = self.records.get(self.index) {
            self.key = document.to_be_bytes();
        }
    }

    /// Whether all records are consumed.
    pub fn is_done(&self) -> bool {
        self.index >= self.records.len()
    }

    /// The current key (8 big-endian document-id bytes).
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// The current document id.
    pub fn document(&self) -> DocId {
        self.records.get(self.index).map(|(d, _)| *d).unwrap_or(NO_MORE_DOCS)
    }

    /// The current document's name.
    pub fn name(&self) -> &str {
        self.records.get(self.index).map(|(_, n)| n.as_str()).unwrap_or("")
    }

    /// Advance to the next record.
    pub fn next_key(&mut self) -> Result<()> {
        self.index += 1;
        self.load_key();
        Ok(())
    }
}
