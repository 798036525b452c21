//! Operator-name to cursor binding.
//!
//! An external parser produces a tree of named operator nodes; this module
//! resolves each name through a static registry and constructs the
//! matching cursor with a single pattern-matched builder. There is no
//! runtime reflection: the set of operators is closed over
//! [`OperatorKind`].

use ahash::AHashMap;
use lazy_static::lazy_static;
use serde_json::{Map, Value};

use crate::error::{PeregrineError, Result};
use crate::postings::DocId;
use crate::query::matcher::{
    ConjunctionCursor, DisjunctionCursor, DocCursor, ExtentCursor, IndicatorCursor, IndicatorMode,
    ScoreCursor,
};
use crate::query::scorer::{
    Bm25RfScorer, Bm25Scorer, DirichletScorer, ScoreCombinationCursor, ScoringFunction,
    ScoringFunctionCursor,
};
use crate::query::window::{OrderedWindowCursor, UnorderedWindowCursor};

/// A JSON-backed bag of operator parameters and corpus statistics.
#[derive(Debug, Clone, Default)]
pub struct Parameters(Map<String, Value>);

impl Parameters {
    /// Create an empty bag.
    pub fn new() -> Self {
        Parameters(Map::new())
    }

    /// Build a bag from a JSON object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Parameters(map)),
            other => Err(PeregrineError::query(format!(
                "parameters must be a JSON object, got {other}"
            ))),
        }
    }

    /// Set one parameter.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    /// Look up a float parameter.
    pub fn f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    /// Look up an unsigned integer parameter.
    pub fn u64(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(Value::as_u64)
    }

    /// Look up a boolean parameter.
    pub fn bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    /// A float parameter that must be present.
    pub fn require_f64(&self, key: &str) -> Result<f64> {
        self.f64(key)
            .ok_or_else(|| PeregrineError::missing_statistic(key))
    }

    /// An unsigned integer parameter that must be present.
    pub fn require_u64(&self, key: &str) -> Result<u64> {
        self.u64(key)
            .ok_or_else(|| PeregrineError::missing_statistic(key))
    }
}

/// The closed set of query operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorKind {
    /// Boolean AND over document candidates.
    Conjunction,
    /// Boolean OR over document candidates.
    Disjunction,
    /// Ordered proximity window.
    OrderedWindow,
    /// Unordered proximity window.
    UnorderedWindow,
    /// Unfiltered weighted score combination.
    Combine,
    /// Filtered (AND) weighted score combination.
    FilteredCombine,
    /// Dirichlet-smoothed scoring of one extent child.
    Dirichlet,
    /// BM25 scoring of one extent child.
    Bm25,
    /// BM25 relevance-feedback scoring of one extent child.
    Bm25Rf,
    /// True if any child matches.
    AnyIndicator,
    /// True only if every child matches.
    AllIndicator,
}

lazy_static! {
    static ref OPERATORS: AHashMap<&'static str, OperatorKind> = {
        let mut map = AHashMap::new();
        map.insert("and", OperatorKind::Conjunction);
        map.insert("or", OperatorKind::Disjunction);
        map.insert("ordered", OperatorKind::OrderedWindow);
        map.insert("od", OperatorKind::OrderedWindow);
        map.insert("unordered", OperatorKind::UnorderedWindow);
        map.insert("uw", OperatorKind::UnorderedWindow);
        map.insert("combine", OperatorKind::Combine);
        map.insert("filtered-combine", OperatorKind::FilteredCombine);
        map.insert("dirichlet", OperatorKind::Dirichlet);
        map.insert("bm25", OperatorKind::Bm25);
        map.insert("bm25rf", OperatorKind::Bm25Rf);
        map.insert("any", OperatorKind::AnyIndicator);
        map.insert("all", OperatorKind::AllIndicator);
        map
    };
}

/// Resolve an operator name.
pub fn lookup_operator(name: &str) -> Option<OperatorKind> {
    OPERATORS.get(name).copied()
}

/// A typed child handed to [`build`].
#[derive(Debug)]
pub enum CursorInput {
    /// A bare document cursor.
    Doc(Box<dyn DocCursor>),
    /// An extent-bearing cursor (leaf posting cursor or window).
    Extent(Box<dyn ExtentCursor>),
    /// A score-bearing cursor.
    Score(Box<dyn ScoreCursor>),
}

impl CursorInput {
    fn into_doc(self) -> Box<dyn DocCursor> {
        match self {
            CursorInput::Doc(cursor) => cursor,
            CursorInput::Extent(cursor) => Box::new(ExtentAsDoc(cursor)),
            CursorInput::Score(cursor) => Box::new(ScoreAsDoc(cursor)),
        }
    }

    fn into_extent(self) -> Result<Box<dyn ExtentCursor>> {
        match self {
            CursorInput::Extent(cursor) => Ok(cursor),
            other => Err(PeregrineError::query(format!(
                "operator requires an extent child, got {}",
                other.kind_name()
            ))),
        }
    }

    fn into_score(self) -> Result<Box<dyn ScoreCursor>> {
        match self {
            CursorInput::Score(cursor) => Ok(cursor),
            other => Err(PeregrineError::query(format!(
                "operator requires a score child, got {}",
                other.kind_name()
            ))),
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            CursorInput::Doc(_) => "document cursor",
            CursorInput::Extent(_) => "extent cursor",
            CursorInput::Score(_) => "score cursor",
        }
    }
}

/// A constructed cursor, typed by capability.
#[derive(Debug)]
pub enum BuiltCursor {
    /// A document cursor.
    Doc(Box<dyn DocCursor>),
    /// An extent cursor.
    Extent(Box<dyn ExtentCursor>),
    /// A score cursor.
    Score(Box<dyn ScoreCursor>),
}

impl BuiltCursor {
    /// Unwrap a score cursor, e.g. for the evaluator root.
    pub fn into_score(self) -> Result<Box<dyn ScoreCursor>> {
        match self {
            BuiltCursor::Score(cursor) => Ok(cursor),
            _ => Err(PeregrineError::query("query root must produce scores")),
        }
    }

    /// Unwrap an extent cursor.
    pub fn into_extent(self) -> Result<Box<dyn ExtentCursor>> {
        match self {
            BuiltCursor::Extent(cursor) => Ok(cursor),
            _ => Err(PeregrineError::query("expected an extent cursor")),
        }
    }
}

/// Construct the cursor for one operator node.
pub fn build(
    kind: OperatorKind,
    children: Vec<CursorInput>,
    parameters: &Parameters,
) -> Result<BuiltCursor> {
    match kind {
        OperatorKind::Conjunction => {
            let children = children.into_iter().map(CursorInput::into_doc).collect();
            Ok(BuiltCursor::Doc(Box::new(ConjunctionCursor::new(children)?)))
        }
        OperatorKind::Disjunction => {
            let children = children.into_iter().map(CursorInput::into_doc).collect();
            Ok(BuiltCursor::Doc(Box::new(DisjunctionCursor::new(children))))
        }
        OperatorKind::OrderedWindow => {
            let children = extent_children(children)?;
            let width = parameters.u64("width").map(|w| w as u32).unwrap_or(u32::MAX);
            Ok(BuiltCursor::Extent(Box::new(OrderedWindowCursor::new(
                children, width,
            )?)))
        }
        OperatorKind::UnorderedWindow => {
            let children = extent_children(children)?;
            let width = parameters.u64("width").map(|w| w as u32).unwrap_or(u32::MAX);
            let overlap = parameters.bool("overlap").unwrap_or(false);
            Ok(BuiltCursor::Extent(Box::new(UnorderedWindowCursor::new(
                children, width, overlap,
            )?)))
        }
        OperatorKind::Combine | OperatorKind::FilteredCombine => {
            let weights = child_weights(children.len(), parameters);
            let children: Vec<Box<dyn ScoreCursor>> = children
                .into_iter()
                .map(CursorInput::into_score)
                .collect::<Result<_>>()?;
            let cursor = if kind == OperatorKind::Combine {
                ScoreCombinationCursor::unfiltered(children, weights)?
            } else {
                ScoreCombinationCursor::filtered(children, weights)?
            };
            Ok(BuiltCursor::Score(Box::new(cursor)))
        }
        OperatorKind::Dirichlet => scoring_cursor(
            children,
            Box::new(DirichletScorer::from_parameters(parameters)?),
        ),
        OperatorKind::Bm25 => scoring_cursor(
            children,
            Box::new(Bm25Scorer::from_parameters(parameters)?),
        ),
        OperatorKind::Bm25Rf => scoring_cursor(
            children,
            Box::new(Bm25RfScorer::from_parameters(parameters)?),
        ),
        OperatorKind::AnyIndicator | OperatorKind::AllIndicator => {
            let mode = if kind == OperatorKind::AnyIndicator {
                IndicatorMode::Existential
            } else {
                IndicatorMode::Universal
            };
            let children = children.into_iter().map(CursorInput::into_doc).collect();
            Ok(BuiltCursor::Doc(Box::new(IndicatorCursor::new(
                children, mode,
            ))))
        }
    }
}

fn extent_children(children: Vec<CursorInput>) -> Result<Vec<Box<dyn ExtentCursor>>> {
    children.into_iter().map(CursorInput::into_extent).collect()
}

/// Per-child weights: parameter key "0" overrides child 0's weight, and
/// so on; unset weights default to 1.0.
fn child_weights(count: usize, parameters: &Parameters) -> Vec<f64> {
    (0..count)
        .map(|i| parameters.f64(&i.to_string()).unwrap_or(1.0))
        .collect()
}

fn scoring_cursor(
    children: Vec<CursorInput>,
    function: Box<dyn ScoringFunction>,
) -> Result<BuiltCursor> {
    let mut children = children;
    if children.len() != 1 {
        return Err(PeregrineError::query(format!(
            "scoring operators take exactly one child, got {}",
            children.len()
        )));
    }
    let child = children.remove(0).into_extent()?;
    Ok(BuiltCursor::Score(Box::new(ScoringFunctionCursor::new(
        child, function,
    ))))
}

/// Adapter exposing an extent cursor as a bare document cursor.
#[derive(Debug)]
struct ExtentAsDoc(Box<dyn ExtentCursor>);

impl DocCursor for ExtentAsDoc {
    fn current_candidate(&self) -> DocId {
        self.0.current_candidate()
    }

    fn is_done(&self) -> bool {
        self.0.is_done()
    }

    fn has_match(&self, document: DocId) -> bool {
        self.0.has_match(document)
    }

    fn move_to(&mut self, document: DocId) -> Result<()> {
        self.0.move_to(document)
    }

    fn reset(&mut self) -> Result<()> {
        self.0.reset()
    }
}

/// Adapter exposing a score cursor as a bare document cursor.
#[derive(Debug)]
struct ScoreAsDoc(Box<dyn ScoreCursor>);

impl DocCursor for ScoreAsDoc {
    fn current_candidate(&self) -> DocId {
        self.0.current_candidate()
    }

    fn is_done(&self) -> bool {
        self.0.is_done()
    }

    fn has_match(&self, document: DocId) -> bool {
        self.0.has_match(document)
    }

    fn move_to(&mut self, document: DocId) -> Result<()> {
        self.0.move_to(document)
    }

    fn reset(&mut self) -> Result<()> {
        self.0.reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::postings::{PostingList, PostingListWriter};

    fn leaf(postings: &[(DocId, u32)]) -> CursorInput {
        let mut writer = PostingListWriter::new();
        for (doc, begin) in postings {
            writer.add(*doc, *begin, begin + 1).unwrap();
        }
        let list = PostingList::open(writer.finish()).unwrap();
        CursorInput::Extent(Box::new(list.cursor().unwrap()))
    }

    #[test]
    fn test_lookup_operator() {
        assert_eq!(lookup_operator("od"), Some(OperatorKind::OrderedWindow));
        assert_eq!(lookup_operator("combine"), Some(OperatorKind::Combine));
        assert_eq!(lookup_operator("no-such-operator"), None);
    }

    #[test]
    fn test_build_conjunction_from_extent_children() {
        let built = build(
            OperatorKind::Conjunction,
            vec![leaf(&[(1, 0), (4, 0)]), leaf(&[(4, 2), (9, 2)])],
            &Parameters::new(),
        )
        .unwrap();

        match built {
            BuiltCursor::Doc(cursor) => {
                assert_eq!(cursor.current_candidate(), 4);
            }
            _ => panic!("conjunction builds a document cursor"),
        }
    }

    #[test]
    fn test_build_scoring_requires_single_extent_child() {
        let mut parameters = Parameters::new();
        parameters.set("collection_length", 10_000u64);

        let err = build(
            OperatorKind::Dirichlet,
            vec![leaf(&[(1, 0)]), leaf(&[(2, 0)])],
            &parameters,
        );
        assert!(err.is_err());

        let built = build(OperatorKind::Dirichlet, vec![leaf(&[(1, 0)])], &parameters).unwrap();
        assert!(matches!(built, BuiltCursor::Score(_)));
    }

    #[test]
    fn test_build_fails_fast_on_missing_statistic() {
        let result = build(OperatorKind::Bm25, vec![leaf(&[(1, 0)])], &Parameters::new());
        assert!(matches!(
            result,
            Err(PeregrineError::MissingStatistic(_))
        ));
    }

    #[test]
    fn test_combine_rejects_non_score_children() {
        let result = build(
            OperatorKind::Combine,
            vec![leaf(&[(1, 0)])],
            &Parameters::new(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_parameters_typed_getters() {
        let mut parameters = Parameters::new();
        parameters.set("width", 8u64);
        parameters.set("overlap", true);
        parameters.set("mu", 2500.0);

        assert_eq!(parameters.u64("width"), Some(8));
        assert_eq!(parameters.bool("overlap"), Some(true));
        assert_eq!(parameters.f64("mu"), Some(2500.0));
        assert_eq!(parameters.f64("width"), Some(8.0));
        assert!(parameters.require_u64("missing").is_err());
    }
}
