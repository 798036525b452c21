//! Storage abstraction and backends.
//!
//! Index parts are written through a pluggable [`Storage`] trait so the
//! same writer/reader code runs against the filesystem or, in tests,
//! against memory. Backing files are write-once: once a part is closed it
//! is immutable, and any number of readers may open it concurrently.

pub mod file;
pub mod memory;
pub mod structured;

pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use structured::{StructReader, StructWriter};

use std::io::{Read, Seek, Write};

use crate::error::Result;

/// A trait for storage backends that can store and retrieve files.
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Open a file for reading.
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>>;

    /// Create a file for writing, truncating any existing file.
    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>>;

    /// Check if a file exists.
    fn file_exists(&self, name: &str) -> bool;

    /// Delete a file.
    fn delete_file(&self, name: &str) -> Result<()>;

    /// List all files in the storage, sorted by name.
    fn list_files(&self) -> Result<Vec<String>>;

    /// Get the size of a file in bytes.
    fn file_size(&self, name: &str) -> Result<u64>;
}

/// A trait for reading data from storage.
pub trait StorageInput: Read + Seek + Send + std::fmt::Debug {
    /// Get the size of the input stream.
    fn size(&self) -> Result<u64>;

    /// Read the entire stream into memory.
    ///
    /// Part readers keep the whole file resident so posting cursors can
    /// slice into it without further I/O.
    fn read_all(&mut self) -> Result<Vec<u8>> {
        let size = self.size()? as usize;
        let mut data = Vec::with_capacity(size);
        self.seek(std::io::SeekFrom::Start(0))?;
        self.read_to_end(&mut data)?;
        Ok(data)
    }
}

/// A trait for writing data to storage.
pub trait StorageOutput: Write + Send + std::fmt::Debug {
    /// Flush buffered data and sync it to the backing store.
    fn flush_and_sync(&mut self) -> Result<()>;
}

impl StorageInput for Box<dyn StorageInput> {
    fn size(&self) -> Result<u64> {
        self.as_ref().size()
    }
}

impl StorageOutput for Box<dyn StorageOutput> {
    fn flush_and_sync(&mut self) -> Result<()> {
        self.as_mut().flush_and_sync()
    }
}
