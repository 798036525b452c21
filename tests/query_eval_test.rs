//! End-to-end query evaluation scenarios.

use peregrine::error::Result;
use peregrine::postings::{DocId, NO_MORE_DOCS, PostingList, PostingListWriter};
use peregrine::query::factory::{self, CursorInput, OperatorKind};
use peregrine::query::{
    DocCursor, ExtentCursor, LengthLookup, Parameters, QueryEvaluator, ScoreCombinationCursor,
    ScoreCursor,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Every document has the same length.
#[derive(Debug)]
struct FixedLength(u64);

impl LengthLookup for FixedLength {
    fn length(&self, _document: DocId) -> Result<u64> {
        Ok(self.0)
    }
}

/// A score cursor over a fixed `(document, score)` table. Non-matching
/// documents score zero.
#[derive(Debug)]
struct FixedScoreCursor {
    entries: Vec<(DocId, f64)>,
    position: usize,
}

impl FixedScoreCursor {
    fn new(entries: Vec<(DocId, f64)>) -> Self {
        FixedScoreCursor {
            entries,
            position: 0,
        }
    }
}

impl DocCursor for FixedScoreCursor {
    fn current_candidate(&self) -> DocId {
        self.entries
            .get(self.position)
            .map(|(d, _)| *d)
            .unwrap_or(NO_MORE_DOCS)
    }

    fn is_done(&self) -> bool {
        self.position >= self.entries.len()
    }

    fn has_match(&self, document: DocId) -> bool {
        self.current_candidate() == document
    }

    fn move_to(&mut self, document: DocId) -> Result<()> {
        while self.position < self.entries.len() && self.entries[self.position].0 < document {
            self.position += 1;
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }
}

impl ScoreCursor for FixedScoreCursor {
    fn score(&self, document: DocId, _length: u64) -> f64 {
        if self.has_match(document) {
            self.entries[self.position].1
        } else {
            0.0
        }
    }
}

fn posting_list(postings: &[(DocId, u32)]) -> PostingList {
    // `count` occurrences at consecutive token positions.
    let mut writer = PostingListWriter::new();
    for (document, count) in postings {
        for i in 0..*count {
            writer.add(*document, i, i + 1).unwrap();
        }
    }
    PostingList::open(writer.finish()).unwrap()
}

fn posting_list_at(postings: &[(DocId, u32)]) -> PostingList {
    // One occurrence per document at the given token position.
    let mut writer = PostingListWriter::new();
    for (document, begin) in postings {
        writer.add(*document, *begin, begin + 1).unwrap();
    }
    PostingList::open(writer.finish()).unwrap()
}

#[test]
fn test_unfiltered_combination_concrete_scores() {
    let a = FixedScoreCursor::new(vec![(5, 1.0), (10, 2.0), (15, 3.0), (20, 4.0)]);
    let b = FixedScoreCursor::new(
        [2u64, 4, 6, 8, 10, 12, 14, 16, 18, 20]
            .iter()
            .map(|&d| (d, d as f64))
            .collect(),
    );

    let mut combined = ScoreCombinationCursor::unfiltered(
        vec![Box::new(a), Box::new(b)],
        vec![0.2, 0.8],
    )
    .unwrap();

    let mut documents = Vec::new();
    let mut scores = Vec::new();
    while !combined.is_done() {
        let document = combined.current_candidate();
        combined.move_to(document).unwrap();
        assert!(combined.has_match(document));
        documents.push(document);
        scores.push(combined.score(document, 100));
        combined.move_past(document).unwrap();
    }

    assert_eq!(documents, vec![2, 4, 5, 6, 8, 10, 12, 14, 15, 16, 18, 20]);

    let expected = [
        1.6, 3.2, 0.2, 4.8, 6.4, 8.4, 9.6, 11.2, 0.6, 12.8, 14.4, 16.8,
    ];
    assert_eq!(scores.len(), expected.len());
    for (got, want) in scores.iter().zip(expected) {
        assert!((got - want).abs() < 1e-9, "got {got}, want {want}");
    }
}

#[test]
fn test_dirichlet_combined_top_five() {
    // Term "a": doc1 x3, doc3 x1, doc5 x1. Term "b": doc1 x2, doc2 x1,
    // doc3 x1, doc18 x1. Both have collection frequency 5.
    let term_a = posting_list(&[(1, 3), (3, 1), (5, 1)]);
    let term_b = posting_list(&[(1, 2), (2, 1), (3, 1), (18, 1)]);

    let mut statistics = Parameters::new();
    statistics.set("mu", 1500.0);
    statistics.set("collection_length", 10_000u64);
    statistics.set("collection_frequency", 5u64);

    let scored_a = factory::build(
        OperatorKind::Dirichlet,
        vec![CursorInput::Extent(Box::new(term_a.cursor().unwrap()))],
        &statistics,
    )
    .unwrap();
    let scored_b = factory::build(
        OperatorKind::Dirichlet,
        vec![CursorInput::Extent(Box::new(term_b.cursor().unwrap()))],
        &statistics,
    )
    .unwrap();

    let root = factory::build(
        OperatorKind::Combine,
        vec![
            CursorInput::Score(scored_a.into_score().unwrap()),
            CursorInput::Score(scored_b.into_score().unwrap()),
        ],
        &Parameters::new(),
    )
    .unwrap();
    let mut root = root.into_score().unwrap();

    let results = QueryEvaluator::new()
        .top_k(root.as_mut(), &FixedLength(100), 5, None)
        .unwrap();

    assert_eq!(results.len(), 5);

    // The two clear winners.
    assert_eq!(results[0].document, 1);
    assert!((results[0].score - -6.21108).abs() < 1e-4);
    assert_eq!(results[1].document, 3);
    assert!((results[1].score - -6.81814).abs() < 1e-4);

    // Documents 2, 5 and 18 tie exactly (one term present once, the
    // other absent); ties rank by ascending document id.
    let mut tied: Vec<DocId> = results[2..].iter().map(|r| r.document).collect();
    tied.sort_unstable();
    assert_eq!(tied, vec![2, 5, 18]);
    assert_eq!(
        results[2..].iter().map(|r| r.document).collect::<Vec<_>>(),
        vec![2, 5, 18]
    );
    for result in &results[2..] {
        assert!((result.score - -7.24179).abs() < 1e-4);
    }
}

#[test]
fn test_factory_builds_boolean_and_window_operators() {
    // "cat" OR "dog", and the ordered window "cat dog".
    let cat = posting_list_at(&[(1, 3), (4, 0), (9, 5)]);
    let dog = posting_list_at(&[(1, 4), (6, 2)]);

    let or = factory::build(
        factory::lookup_operator("or").unwrap(),
        vec![
            CursorInput::Extent(Box::new(cat.cursor().unwrap())),
            CursorInput::Extent(Box::new(dog.cursor().unwrap())),
        ],
        &Parameters::new(),
    )
    .unwrap();

    let mut or = match or {
        factory::BuiltCursor::Doc(cursor) => cursor,
        _ => panic!("disjunction builds a document cursor"),
    };

    let mut docs = Vec::new();
    while !or.is_done() {
        let document = or.current_candidate();
        docs.push(document);
        or.move_past(document).unwrap();
    }
    assert_eq!(docs, vec![1, 4, 6, 9]);

    let mut parameters = Parameters::new();
    parameters.set("width", 2u64);
    let window = factory::build(
        factory::lookup_operator("od").unwrap(),
        vec![
            CursorInput::Extent(Box::new(cat.cursor().unwrap())),
            CursorInput::Extent(Box::new(dog.cursor().unwrap())),
        ],
        &parameters,
    )
    .unwrap();
    let mut window = window.into_extent().unwrap();

    // Only document 1 has "cat" at 3 directly followed by "dog" at 4.
    assert_eq!(window.current_candidate(), 1);
    assert!(window.has_match(1));
    assert_eq!(window.count(), 1);
    let extent = window.extents().unwrap().as_slice()[0];
    assert_eq!((extent.begin, extent.end), (3, 5));

    window.move_past(1).unwrap();
    assert!(window.is_done());
}

#[test]
fn test_missing_statistic_aborts_before_scoring() {
    let term = posting_list(&[(1, 1)]);
    let result = factory::build(
        OperatorKind::Dirichlet,
        vec![CursorInput::Extent(Box::new(term.cursor().unwrap()))],
        &Parameters::new(),
    );
    assert!(result.is_err());
}

#[test]
fn test_skip_accelerated_movement_equals_linear_scan() {
    let mut rng = StdRng::seed_from_u64(0x5EED);

    for _ in 0..10 {
        // Random sorted document ids with random small extent sets.
        let mut document = 0u64;
        let mut postings: Vec<(DocId, Vec<(u32, u32)>)> = Vec::new();
        let doc_count = rng.random_range(50..400);
        for _ in 0..doc_count {
            document += rng.random_range(1..20);
            let mut begin = 0u32;
            let mut extents = Vec::new();
            for _ in 0..rng.random_range(1..5) {
                begin += rng.random_range(1..10);
                let span = rng.random_range(1..4);
                extents.push((begin, begin + span));
            }
            postings.push((document, extents));
        }

        let build = |skip_distance: u32| {
            let mut writer = PostingListWriter::with_skip_distance(skip_distance);
            for (document, extents) in &postings {
                for (begin, end) in extents {
                    writer.add(*document, *begin, *end).unwrap();
                }
            }
            PostingList::open(writer.finish()).unwrap()
        };
        let skipped = build(16);
        let linear = build(0);

        // Random forward-only move_to targets; both cursors must observe
        // identical (document, extents) sequences.
        let mut a = skipped.cursor().unwrap();
        let mut b = linear.cursor().unwrap();
        let mut target = 0u64;
        while !a.is_done() {
            target += rng.random_range(1..40);
            a.move_to(target).unwrap();
            b.move_to(target).unwrap();
            assert_eq!(a.current_candidate(), b.current_candidate());
            assert_eq!(a.is_done(), b.is_done());
            if !a.is_done() {
                assert_eq!(a.count(), b.count());
                assert_eq!(
                    a.extents().unwrap().as_slice(),
                    b.extents().unwrap().as_slice()
                );
            }
        }
        assert!(b.is_done());

        // Full scans decode strictly increasing documents.
        let mut cursor = skipped.cursor().unwrap();
        let mut previous = None;
        while !cursor.is_done() {
            let document = cursor.current_candidate();
            if let Some(previous) = previous {
                assert!(document > previous);
            }
            previous = Some(document);
            cursor.move_past(document).unwrap();
        }
    }
}

#[test]
fn test_filtered_combination_requires_all_children() {
    let a = FixedScoreCursor::new(vec![(2, 1.0), (4, 1.0), (8, 1.0)]);
    let b = FixedScoreCursor::new(vec![(4, 2.0), (6, 2.0), (8, 2.0)]);

    let mut combined =
        ScoreCombinationCursor::filtered(vec![Box::new(a), Box::new(b)], vec![]).unwrap();

    let mut matched = Vec::new();
    while !combined.is_done() {
        let document = combined.current_candidate();
        combined.move_to(document).unwrap();
        if combined.has_match(document) {
            matched.push((document, combined.score(document, 100)));
        }
        combined.move_past(document).unwrap();
    }

    // Default weights [1, 1] normalize to the mean.
    assert_eq!(matched, vec![(4, 1.5), (8, 1.5)]);
}

#[test]
fn test_evaluation_error_returns_no_partial_results() {
    #[derive(Debug)]
    struct FailingLengths;

    impl LengthLookup for FailingLengths {
        fn length(&self, document: DocId) -> Result<u64> {
            if document >= 10 {
                Err(peregrine::error::PeregrineError::storage("length store read failed"))
            } else {
                Ok(100)
            }
        }
    }

    let mut root = FixedScoreCursor::new(vec![(1, 5.0), (2, 4.0), (10, 3.0)]);
    let result = QueryEvaluator::new().top_k(&mut root, &FailingLengths, 2, None);
    assert!(result.is_err());
}
