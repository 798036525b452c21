//! Index merging: k-way combination of sorted part readers into one
//! sorted output, with optional document-id remapping.

pub mod mapping;
pub mod merger;

pub use mapping::{DocumentMappingReader, DocumentMappingWriter};
pub use merger::{
    GenericIndexMerger, LengthsPartMerger, MergeStats, NamesPartMerger, PartCursor, PartMerger,
    PostingPartMerger, merge_inverted_parts, merge_lengths_parts, merge_names_parts,
};
