//! Scoring functions and score-producing cursors.
//!
//! Scoring functions are pure functions of `(count, length)` closed over
//! corpus statistics captured at construction; missing mandatory
//! statistics fail construction, never scoring.

use std::fmt::Debug;

use crate::error::Result;
use crate::postings::{DocId, NO_MORE_DOCS};
use crate::query::factory::Parameters;
use crate::query::matcher::{DocCursor, ExtentCursor, ScoreCursor};

/// A pure `(count, length) -> score` function.
pub trait ScoringFunction: Send + Debug {
    /// Score one document given its occurrence count and length.
    fn score(&self, count: u32, length: u64) -> f64;

    /// Get the name of this scoring function.
    fn name(&self) -> &'static str;
}

/// Dirichlet-smoothed language-model scorer.
///
/// `score = ln((count + mu * background) / (length + mu))`, where
/// `background` is the term's collection probability.
#[derive(Debug, Clone)]
pub struct DirichletScorer {
    mu: f64,
    background: f64,
}

impl DirichletScorer {
    /// Default smoothing parameter.
    pub const DEFAULT_MU: f64 = 1500.0;

    /// Create a scorer from an explicit background probability.
    pub fn new(mu: f64, background: f64) -> Self {
        DirichletScorer { mu, background }
    }

    /// Create a scorer from collection statistics.
    ///
    /// The background is `collection_frequency / collection_length`, or
    /// `0.5 / collection_length` for a term absent from the collection.
    pub fn from_statistics(mu: f64, collection_frequency: u64, collection_length: u64) -> Self {
        let background = if collection_frequency > 0 {
            collection_frequency as f64 / collection_length as f64
        } else {
            0.5 / collection_length as f64
        };
        DirichletScorer { mu, background }
    }

    /// Create a scorer from a parameter bag.
    ///
    /// `collection_length` is mandatory; `mu` defaults to 1500 and the
    /// background falls back from `collection_probability` to
    /// `collection_frequency / collection_length`.
    pub fn from_parameters(parameters: &Parameters) -> Result<Self> {
        let mu = parameters.f64("mu").unwrap_or(Self::DEFAULT_MU);
        if let Some(background) = parameters.f64("collection_probability") {
            return Ok(DirichletScorer::new(mu, background));
        }
        let collection_length = parameters.require_u64("collection_length")?;
        let collection_frequency = parameters.u64("collection_frequency").unwrap_or(0);
        Ok(Self::from_statistics(
            mu,
            collection_frequency,
            collection_length,
        ))
    }
}

impl ScoringFunction for DirichletScorer {
    fn score(&self, count: u32, length: u64) -> f64 {
        let numerator = count as f64 + self.mu * self.background;
        let denominator = length as f64 + self.mu;
        (numerator / denominator).ln()
    }

    fn name(&self) -> &'static str {
        "Dirichlet"
    }
}

/// BM25 probabilistic scorer.
#[derive(Debug, Clone)]
pub struct Bm25Scorer {
    b: f64,
    k: f64,
    idf: f64,
    avg_doc_length: f64,
}

impl Bm25Scorer {
    /// Default length-normalization parameter.
    pub const DEFAULT_B: f64 = 0.75;
    /// Default saturation parameter.
    pub const DEFAULT_K: f64 = 1.2;

    /// Create a scorer from collection statistics.
    pub fn from_statistics(
        b: f64,
        k: f64,
        document_count: u64,
        document_frequency: u64,
        collection_length: u64,
    ) -> Self {
        let n = document_count as f64;
        let df = document_frequency as f64;
        let idf = ((n - df + 0.5) / (df + 0.5)).ln();
        Bm25Scorer {
            b,
            k,
            idf,
            avg_doc_length: collection_length as f64 / document_count as f64,
        }
    }

    /// Create a scorer from a parameter bag.
    ///
    /// `collection_length`, `document_count` and `df` are mandatory.
    pub fn from_parameters(parameters: &Parameters) -> Result<Self> {
        let b = parameters.f64("b").unwrap_or(Self::DEFAULT_B);
        let k = parameters.f64("k").unwrap_or(Self::DEFAULT_K);
        let collection_length = parameters.require_u64("collection_length")?;
        let document_count = parameters.require_u64("document_count")?;
        let df = parameters.require_u64("df")?;
        Ok(Self::from_statistics(b, k, document_count, df, collection_length))
    }
}

impl ScoringFunction for Bm25Scorer {
    fn score(&self, count: u32, length: u64) -> f64 {
        let tf = count as f64;
        let norm = self.k * (1.0 - self.b + self.b * (length as f64 / self.avg_doc_length));
        self.idf * (tf * (self.k + 1.0)) / (tf + norm)
    }

    fn name(&self) -> &'static str {
        "BM25"
    }
}

/// BM25 relevance-feedback scorer.
///
/// The score is constant across every document it is applied to; the
/// caller applies it only within the target posting list.
#[derive(Debug, Clone)]
pub struct Bm25RfScorer {
    value: f64,
}

impl Bm25RfScorer {
    /// Default scaling factor.
    pub const DEFAULT_FACTOR: f64 = 0.33;

    /// Create a scorer from relevance-feedback counts: `rt` relevant
    /// documents containing the term, `r` relevant documents, `ft`
    /// collection document frequency, `n` collection size.
    pub fn from_statistics(factor: f64, rt: u64, r: u64, ft: u64, n: u64) -> Self {
        let rt = rt as f64;
        let r = r as f64;
        let ft = ft as f64;
        let n = n as f64;
        let relevant = (rt + 0.5) / (r - rt + 0.5);
        let nonrelevant = (ft - rt + 0.5) / (n - ft - r + rt + 0.5);
        Bm25RfScorer {
            value: factor * (relevant / nonrelevant).ln(),
        }
    }

    /// Create a scorer from a parameter bag; `rt`, `r`, `ft` and `n` are
    /// mandatory.
    pub fn from_parameters(parameters: &Parameters) -> Result<Self> {
        let factor = parameters.f64("factor").unwrap_or(Self::DEFAULT_FACTOR);
        let rt = parameters.require_u64("rt")?;
        let r = parameters.require_u64("r")?;
        let ft = parameters.require_u64("ft")?;
        let n = parameters.require_u64("n")?;
        Ok(Self::from_statistics(factor, rt, r, ft, n))
    }
}

impl ScoringFunction for Bm25RfScorer {
    fn score(&self, _count: u32, _length: u64) -> f64 {
        self.value
    }

    fn name(&self) -> &'static str {
        "BM25-RF"
    }
}

/// Applies a scoring function to one extent cursor.
///
/// Scoring is total: asked about a document the child does not match, the
/// cursor scores a zero count, which for smoothed models yields the
/// background score.
#[derive(Debug)]
pub struct ScoringFunctionCursor {
    child: Box<dyn ExtentCursor>,
    function: Box<dyn ScoringFunction>,
}

impl ScoringFunctionCursor {
    /// Wrap `child` with `function`.
    pub fn new(child: Box<dyn ExtentCursor>, function: Box<dyn ScoringFunction>) -> Self {
        ScoringFunctionCursor { child, function }
    }
}

impl DocCursor for ScoringFunctionCursor {
    fn current_candidate(&self) -> DocId {
        self.child.current_candidate()
    }

    fn is_done(&self) -> bool {
        self.child.is_done()
    }

    fn has_match(&self, document: DocId) -> bool {
        self.child.has_match(document)
    }

    fn move_to(&mut self, document: DocId) -> Result<()> {
        self.child.move_to(document)
    }

    fn reset(&mut self) -> Result<()> {
        self.child.reset()
    }
}

impl ScoreCursor for ScoringFunctionCursor {
    fn score(&self, document: DocId, length: u64) -> f64 {
        let count = if self.child.has_match(document) {
            self.child.count()
        } else {
            0
        };
        self.function.score(count, length)
    }
}

/// Weighted combination of child score cursors.
///
/// Scores combine as `sum(w_i * s_i) / sum(w_i)`; weights default to 1.0
/// and are overridable per child index. Unfiltered combination has OR
/// semantics over candidates; filtered requires every child to match.
#[derive(Debug)]
pub struct ScoreCombinationCursor {
    children: Vec<Box<dyn ScoreCursor>>,
    weights: Vec<f64>,
    weight_sum: f64,
    filtered: bool,
}

impl ScoreCombinationCursor {
    /// Create an unfiltered (OR) combination.
    pub fn unfiltered(children: Vec<Box<dyn ScoreCursor>>, weights: Vec<f64>) -> Result<Self> {
        Self::build(children, weights, false)
    }

    /// Create a filtered (AND) combination.
    pub fn filtered(children: Vec<Box<dyn ScoreCursor>>, weights: Vec<f64>) -> Result<Self> {
        Self::build(children, weights, true)
    }

    fn build(
        children: Vec<Box<dyn ScoreCursor>>,
        mut weights: Vec<f64>,
        filtered: bool,
    ) -> Result<Self> {
        if children.is_empty() {
            return Err(crate::error::PeregrineError::query(
                "score combination requires at least one child",
            ));
        }
        weights.resize(children.len(), 1.0);
        let weight_sum: f64 = weights.iter().sum();
        if weight_sum <= 0.0 {
            return Err(crate::error::PeregrineError::query(
                "score combination weights must sum to a positive value",
            ));
        }
        Ok(ScoreCombinationCursor {
            children,
            weights,
            weight_sum,
            filtered,
        })
    }
}

impl DocCursor for ScoreCombinationCursor {
    fn current_candidate(&self) -> DocId {
        let candidates = self.children.iter().map(|c| c.current_candidate());
        if self.filtered {
            candidates.max().unwrap_or(NO_MORE_DOCS)
        } else {
            candidates.min().unwrap_or(NO_MORE_DOCS)
        }
    }

    fn is_done(&self) -> bool {
        if self.filtered {
            self.children.iter().any(|c| c.is_done())
        } else {
            self.children.iter().all(|c| c.is_done())
        }
    }

    fn has_match(&self, document: DocId) -> bool {
        if self.filtered {
            self.children.iter().all(|c| c.has_match(document))
        } else {
            self.children.iter().any(|c| c.has_match(document))
        }
    }

    fn move_to(&mut self, document: DocId) -> Result<()> {
        debug_assert!(!self.is_done(), "move_to on exhausted cursor");
        for child in &mut self.children {
            if !child.is_done() && child.current_candidate() < document {
                child.move_to(document)?;
            }
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        for child in &mut self.children {
            child.reset()?;
        }
        Ok(())
    }
}

impl ScoreCursor for ScoreCombinationCursor {
    fn score(&self, document: DocId, length: u64) -> f64 {
        let mut total = 0.0;
        for (child, weight) in self.children.iter().zip(&self.weights) {
            total += weight * child.score(document, length);
        }
        total / self.weight_sum
    }
}
