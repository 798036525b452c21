//! End-to-end shard merging scenarios.

use std::sync::Arc;

use peregrine::error::PeregrineError;
use peregrine::merge::{
    DocumentMappingReader, DocumentMappingWriter, merge_inverted_parts, merge_lengths_parts,
    merge_names_parts,
};
use peregrine::postings::{
    DocId, InvertedPartReader, InvertedPartWriter, LengthsPartReader, LengthsPartWriter,
    NamesPartReader, NamesPartWriter,
};
use peregrine::query::{DocCursor, ExtentCursor, LengthLookup};
use peregrine::storage::{FileStorage, Storage, StorageOutput};
use tempfile::TempDir;

fn lengths_part(range: std::ops::Range<u64>) -> LengthsPartReader {
    let mut writer = LengthsPartWriter::new();
    for document in range {
        writer.add(document, document as u32 + 1).unwrap();
    }
    LengthsPartReader::from_bytes(writer.finish(Vec::new()).unwrap()).unwrap()
}

fn inverted_part(rows: &[(&[u8], DocId, &[(u32, u32)])]) -> InvertedPartReader {
    let mut writer = InvertedPartWriter::new(Vec::new()).unwrap();
    for (key, document, extents) in rows {
        for (begin, end) in *extents {
            writer.add(key, *document, *begin, *end).unwrap();
        }
    }
    InvertedPartReader::from_bytes(writer.finish().unwrap()).unwrap()
}

fn decode_postings(reader: &InvertedPartReader, key: &[u8]) -> Vec<(DocId, Vec<(u32, u32)>)> {
    let list = reader.posting(key).unwrap().unwrap();
    let mut cursor = list.cursor().unwrap();
    let mut out = Vec::new();
    while !cursor.is_done() {
        let document = cursor.current_candidate();
        let extents = cursor
            .extents()
            .unwrap()
            .as_slice()
            .iter()
            .map(|e| (e.begin, e.end))
            .collect();
        out.push((document, extents));
        cursor.move_past(document).unwrap();
    }
    out
}

#[test]
fn test_disjoint_lengths_shards_merge_sorted_and_complete() {
    let shards = vec![lengths_part(0..100), lengths_part(100..200)];

    let (bytes, stats) = merge_lengths_parts(&shards, None, Vec::new()).unwrap();
    assert_eq!(stats.shards, 2);
    assert_eq!(stats.keys_merged, 200);

    let merged = LengthsPartReader::from_bytes(bytes).unwrap();
    assert_eq!(merged.len(), 200);

    // Sorted, no duplicates, no gaps, and length == id + 1 throughout.
    for (expected, (document, length)) in merged.records().iter().enumerate() {
        assert_eq!(*document, expected as u64);
        assert_eq!(*length as u64, document + 1);
    }
    assert_eq!(merged.length(150).unwrap(), 151);
}

#[test]
fn test_single_shard_merge_is_idempotent() {
    let part = inverted_part(&[
        (b"ant", 2, &[(1, 2), (4, 5)]),
        (b"ant", 9, &[(0, 1)]),
        (b"bee", 3, &[(7, 9)]),
        (b"cat", 1, &[(2, 3)]),
    ]);

    let shards = vec![part.clone()];
    let (bytes, stats) = merge_inverted_parts(&shards, None, Vec::new()).unwrap();
    assert_eq!(stats.keys_merged, 3);

    let merged = InvertedPartReader::from_bytes(bytes).unwrap();
    let original_keys: Vec<Vec<u8>> = part.keys().map(|k| k.to_vec()).collect();
    let merged_keys: Vec<Vec<u8>> = merged.keys().map(|k| k.to_vec()).collect();
    assert_eq!(original_keys, merged_keys);

    for key in [b"ant".as_slice(), b"bee", b"cat"] {
        assert_eq!(decode_postings(&part, key), decode_postings(&merged, key));
    }
}

#[test]
fn test_posting_merge_with_document_remapping() {
    // Shard 0 holds local documents 0..3, shard 1 holds local 0..3;
    // mapping interleaves them: shard0 -> {0, 2, 4}, shard1 -> {1, 3, 5}.
    let dir = TempDir::new().unwrap();
    let map0 = dir.path().join("shard0.map");
    let map1 = dir.path().join("shard1.map");

    let mut writer = DocumentMappingWriter::create(&map0).unwrap();
    for global in [0u32, 2, 4] {
        writer.push(global).unwrap();
    }
    writer.finish().unwrap();

    let mut writer = DocumentMappingWriter::create(&map1).unwrap();
    for global in [1u32, 3, 5] {
        writer.push(global).unwrap();
    }
    writer.finish().unwrap();

    let mapping = Arc::new(DocumentMappingReader::open(&[&map0, &map1]).unwrap());

    let shard0 = inverted_part(&[
        (b"term", 0, &[(3, 4)]),
        (b"term", 2, &[(1, 2), (8, 9)]),
    ]);
    let shard1 = inverted_part(&[(b"only", 1, &[(0, 1)]), (b"term", 1, &[(5, 6)])]);

    let (bytes, _) =
        merge_inverted_parts(&[shard0, shard1], Some(mapping), Vec::new()).unwrap();
    let merged = InvertedPartReader::from_bytes(bytes).unwrap();

    // shard0 local {0, 2} -> global {0, 4}; shard1 local {1} -> global 3.
    assert_eq!(
        decode_postings(&merged, b"term"),
        vec![
            (0, vec![(3, 4)]),
            (3, vec![(5, 6)]),
            (4, vec![(1, 2), (8, 9)]),
        ]
    );
    // shard1 local 1 -> global 3.
    assert_eq!(decode_postings(&merged, b"only"), vec![(3, vec![(0, 1)])]);
}

#[test]
fn test_lengths_merge_with_remapped_keys() {
    let dir = TempDir::new().unwrap();
    let map0 = dir.path().join("shard0.map");
    let map1 = dir.path().join("shard1.map");

    // Shard order reversed in the global space: shard 1's documents land
    // before shard 0's.
    let mut writer = DocumentMappingWriter::create(&map0).unwrap();
    for global in [10u32, 11, 12] {
        writer.push(global).unwrap();
    }
    writer.finish().unwrap();

    let mut writer = DocumentMappingWriter::create(&map1).unwrap();
    for global in [0u32, 1, 2] {
        writer.push(global).unwrap();
    }
    writer.finish().unwrap();

    let mapping = Arc::new(DocumentMappingReader::open(&[&map0, &map1]).unwrap());

    let shards = vec![lengths_part(0..3), lengths_part(0..3)];
    let (bytes, _) = merge_lengths_parts(&shards, Some(mapping), Vec::new()).unwrap();

    let merged = LengthsPartReader::from_bytes(bytes).unwrap();
    let documents: Vec<DocId> = merged.records().iter().map(|(d, _)| *d).collect();
    assert_eq!(documents, vec![0, 1, 2, 10, 11, 12]);
}

#[test]
fn test_duplicate_document_name_across_shards_is_fatal() {
    let mut a = NamesPartWriter::new();
    a.add(1, "WEB-0001").unwrap();
    a.add(7, "WEB-0007").unwrap();
    let a = NamesPartReader::from_bytes(a.finish(Vec::new()).unwrap()).unwrap();

    let mut b = NamesPartWriter::new();
    b.add(7, "WEB-0777").unwrap();
    let b = NamesPartReader::from_bytes(b.finish(Vec::new()).unwrap()).unwrap();

    let result = merge_names_parts(&[a, b], None, Vec::new());
    match result {
        Err(PeregrineError::Corruption(message)) => {
            assert!(message.contains('7'), "error names the document: {message}");
        }
        other => panic!("duplicate names must be fatal, got {other:?}"),
    }
}

#[test]
fn test_names_merge_disjoint_shards() {
    let mut a = NamesPartWriter::new();
    a.add(0, "A-0").unwrap();
    a.add(2, "A-2").unwrap();
    let a = NamesPartReader::from_bytes(a.finish(Vec::new()).unwrap()).unwrap();

    let mut b = NamesPartWriter::new();
    b.add(1, "B-1").unwrap();
    let b = NamesPartReader::from_bytes(b.finish(Vec::new()).unwrap()).unwrap();

    let (bytes, stats) = merge_names_parts(&[a, b], None, Vec::new()).unwrap();
    assert_eq!(stats.keys_merged, 3);

    let merged = NamesPartReader::from_bytes(bytes).unwrap();
    assert_eq!(merged.name(0), Some("A-0"));
    assert_eq!(merged.name(1), Some("B-1"));
    assert_eq!(merged.name(2), Some("A-2"));
}

#[test]
fn test_merge_through_file_storage() {
    let dir = TempDir::new().unwrap();
    let storage = FileStorage::new(dir.path()).unwrap();

    for (name, range) in [("a.len", 0..100u64), ("b.len", 100..200)] {
        let mut writer = LengthsPartWriter::new();
        for document in range {
            writer.add(document, document as u32 + 1).unwrap();
        }
        let output = storage.create_output(name).unwrap();
        let mut output = writer.finish(output).unwrap();
        output.flush_and_sync().unwrap();
    }

    let shards = vec![
        LengthsPartReader::open(&storage, "a.len").unwrap(),
        LengthsPartReader::open(&storage, "b.len").unwrap(),
    ];

    let output = storage.create_output("merged.len").unwrap();
    let (mut output, stats) = merge_lengths_parts(&shards, None, output).unwrap();
    output.flush_and_sync().unwrap();
    drop(output);
    assert_eq!(stats.keys_merged, 200);

    let merged = LengthsPartReader::open(&storage, "merged.len").unwrap();
    assert_eq!(merged.len(), 200);
    assert_eq!(merged.length(199).unwrap(), 200);
}

#[test]
fn test_non_monotone_mapping_is_fatal() {
    // The mapping inverts shard 0's document order, which would break the
    // merged output ordering.
    let dir = TempDir::new().unwrap();
    let map0 = dir.path().join("shard0.map");

    let mut writer = DocumentMappingWriter::create(&map0).unwrap();
    for global in [2u32, 1, 0] {
        writer.push(global).unwrap();
    }
    writer.finish().unwrap();

    let mapping = Arc::new(DocumentMappingReader::open(&[&map0]).unwrap());
    let shards = vec![lengths_part(0..3)];

    let result = merge_lengths_parts(&shards, Some(mapping), Vec::new());
    assert!(matches!(result, Err(PeregrineError::Corruption(_))));
}
