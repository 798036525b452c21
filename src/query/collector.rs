//! Top-K collection and query evaluation.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use log::debug;
use serde::Serialize;

use crate::error::Result;
use crate::postings::{DocId, NO_MORE_DOCS};
use crate::query::matcher::ScoreCursor;

/// External collaborator: resolves a document id to its length.
pub trait LengthLookup: Send + Debug {
    /// The length of `document` in tokens.
    fn length(&self, document: DocId) -> Result<u64>;
}

/// One ranked result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoredDocument {
    /// The document id.
    pub document: DocId,
    /// The document's score.
    pub score: f64,
}

/// Heap entry ordered so the worst retained document is popped first:
/// lowest score, and among equal scores the largest document id.
#[derive(Debug, Clone, Copy)]
struct HeapDoc {
    document: DocId,
    score: f64,
}

impl PartialEq for HeapDoc {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.document == other.document
    }
}

impl Eq for HeapDoc {}

impl PartialOrd for HeapDoc {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapDoc {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap: lower scores come first; equal scores surface the
        // larger document id so ties are evicted deterministically.
        other
            .score
            .partial_cmp(&self.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.document.cmp(&other.document))
    }
}

/// A collector that retains the K best-scoring documents.
///
/// Tie rule: equal scores rank by ascending document id, and at the
/// retention boundary an equal score never evicts the incumbent. The heap
/// transiently holds K+1 entries between an insert and the eviction that
/// immediately follows.
#[derive(Debug)]
pub struct TopDocsCollector {
    requested: usize,
    heap: BinaryHeap<HeapDoc>,
    total_collected: u64,
}

impl TopDocsCollector {
    /// Create a collector retaining `requested` documents.
    pub fn new(requested: usize) -> Self {
        TopDocsCollector {
            requested,
            heap: BinaryHeap::with_capacity(requested + 1),
            total_collected: 0,
        }
    }

    /// Offer one scored document.
    pub fn collect(&mut self, document: DocId, score: f64) -> bool {
        self.total_collected += 1;

        if self.heap.len() < self.requested {
            self.heap.push(HeapDoc { document, score });
            return true;
        }

        let worst = match self.heap.peek() {
            Some(worst) => *worst,
            None => return false, // requested == 0
        };
        if score > worst.score {
            self.heap.push(HeapDoc { document, score });
            self.heap.pop();
            return true;
        }
        false
    }

    /// Number of documents offered so far.
    pub fn total_collected(&self) -> u64 {
        self.total_collected
    }

    /// The score a new document must beat to be retained, if the
    /// collector is full.
    pub fn threshold(&self) -> Option<f64> {
        if self.heap.len() < self.requested {
            None
        } else {
            self.heap.peek().map(|d| d.score)
        }
    }

    /// Drain into a descending-by-score array; ties ascend by document.
    pub fn into_results(self) -> Vec<ScoredDocument> {
        let mut results: Vec<ScoredDocument> = self
            .heap
            .into_iter()
            .map(|d| ScoredDocument {
                document: d.document,
                score: d.score,
            })
            .collect();
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.document.cmp(&b.document))
        });
        results
    }
}

/// Monotonic counters for one or more evaluations.
///
/// Safe to share across concurrently running evaluations; counters only
/// ever increment.
#[derive(Debug, Default)]
pub struct EvaluationMetrics {
    candidates_considered: AtomicU64,
    documents_scored: AtomicU64,
    documents_retained: AtomicU64,
}

impl EvaluationMetrics {
    /// Create zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Candidates the evaluator visited.
    pub fn candidates_considered(&self) -> u64 {
        self.candidates_considered.load(AtomicOrdering::Relaxed)
    }

    /// Documents actually scored.
    pub fn documents_scored(&self) -> u64 {
        self.documents_scored.load(AtomicOrdering::Relaxed)
    }

    /// Documents that entered the top-K heap.
    pub fn documents_retained(&self) -> u64 {
        self.documents_retained.load(AtomicOrdering::Relaxed)
    }
}

/// Drives a composed score-cursor tree to completion.
#[derive(Debug, Default)]
pub struct QueryEvaluator;

impl QueryEvaluator {
    /// Create a new evaluator.
    pub fn new() -> Self {
        QueryEvaluator
    }

    /// Evaluate `root` to completion, returning the `requested` best
    /// documents in descending score order.
    ///
    /// Any error aborts the whole evaluation; no partial results are
    /// returned.
    pub fn top_k(
        &self,
        root: &mut dyn ScoreCursor,
        lengths: &dyn LengthLookup,
        requested: usize,
        metrics: Option<&EvaluationMetrics>,
    ) -> Result<Vec<ScoredDocument>> {
        let mut collector = TopDocsCollector::new(requested);

        while !root.is_done() {
            let document = root.current_candidate();
            if document == NO_MORE_DOCS {
                break;
            }
            if let Some(m) = metrics {
                m.candidates_considered.fetch_add(1, AtomicOrdering::Relaxed);
            }

            // Pull lagging children (e.g. of a filtered combination) up to
            // the candidate before testing for a match.
            root.move_to(document)?;

            if root.has_match(document) {
                let length = lengths.length(document)?;
                let score = root.score(document, length);
                if let Some(m) = metrics {
                    m.documents_scored.fetch_add(1, AtomicOrdering::Relaxed);
                }
                if collector.collect(document, score) {
                    if let Some(m) = metrics {
                        m.documents_retained.fetch_add(1, AtomicOrdering::Relaxed);
                    }
                }
            }

            root.move_past(document)?;
        }

        debug!(
            "evaluation complete: {} candidates, retaining {}",
            collector.total_collected(),
            requested.min(collector.heap.len())
        );
        Ok(collector.into_results())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_keeps_top_k() {
        let mut collector = TopDocsCollector::new(3);

        for (doc, score) in [(1u64, 0.5), (2, 2.0), (3, 1.5), (4, 0.1), (5, 3.0)] {
            collector.collect(doc, score);
        }

        let results = collector.into_results();
        let docs: Vec<DocId> = results.iter().map(|r| r.document).collect();
        assert_eq!(docs, vec![5, 2, 3]);
        assert_eq!(results[0].score, 3.0);
    }

    #[test]
    fn test_collector_tie_break() {
        let mut collector = TopDocsCollector::new(2);

        collector.collect(10, 1.0);
        collector.collect(3, 1.0);
        // Equal score never evicts an incumbent.
        assert!(!collector.collect(1, 1.0));

        let results = collector.into_results();
        let docs: Vec<DocId> = results.iter().map(|r| r.document).collect();
        // Ties rank by ascending document id.
        assert_eq!(docs, vec![3, 10]);
    }

    #[test]
    fn test_collector_threshold() {
        let mut collector = TopDocsCollector::new(2);
        assert_eq!(collector.threshold(), None);

        collector.collect(1, 4.0);
        collector.collect(2, 7.0);
        assert_eq!(collector.threshold(), Some(4.0));

        collector.collect(3, 5.0);
        assert_eq!(collector.threshold(), Some(5.0));
    }

    #[test]
    fn test_collector_zero_requested() {
        let mut collector = TopDocsCollector::new(0);
        assert!(!collector.collect(1, 1.0));
        assert!(collector.into_results().is_empty());
    }

    #[test]
    fn test_total_collected_counts_everything() {
        let mut collector = TopDocsCollector::new(1);
        collector.collect(1, 1.0);
        collector.collect(2, 0.5);
        collector.collect(3, 2.0);
        assert_eq!(collector.total_collected(), 3);
    }
}
