//! Query evaluation: the cursor protocol, combination iterators, scoring,
//! and the top-K evaluator.
//!
//! A query arrives as an externally parsed node tree; [`factory`] binds
//! each node to a cursor, [`matcher`] and [`window`] provide the boolean
//! and proximity combinators, [`scorer`] turns occurrence counts into
//! relevance scores, and [`collector`] drives the composed tree and keeps
//! the K best documents.

pub mod collector;
pub mod factory;
pub mod matcher;
pub mod scorer;
pub mod window;

pub use collector::{
    EvaluationMetrics, LengthLookup, QueryEvaluator, ScoredDocument, TopDocsCollector,
};
pub use factory::{OperatorKind, Parameters};
pub use matcher::{
    ConjunctionCursor, DisjunctionCursor, DocCursor, ExtentCursor, IndicatorCursor, IndicatorMode,
    NullCursor, ScoreCursor,
};
pub use scorer::{
    Bm25RfScorer, Bm25Scorer, DirichletScorer, ScoreCombinationCursor, ScoringFunction,
    ScoringFunctionCursor,
};
pub use window::{OrderedWindowCursor, UnorderedWindowCursor};
