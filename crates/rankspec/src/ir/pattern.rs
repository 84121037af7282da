use crate::ir::{
    index::InstId,
    rewriter::{ProgramRewriter, RewriteError},
    spec::Operation,
};

/// Predicate used to restrict which operations a pattern should consider.
pub type OperationMatcher = fn(&Operation) -> bool;

/// Typed snapshot of a matched root instruction.
pub trait OperationView: Clone {
    const MATCHER: OperationMatcher;
    fn extract(root: InstId, rewriter: &ProgramRewriter) -> Option<Self>;
}

/// Base trait for rewrite patterns.
///
/// `Ok(false)` means the pattern declined and left the IR untouched.
pub trait Pattern: Send + Sync {
    fn name(&self) -> &'static str;
    fn matches_operation(&self, op: &Operation) -> bool {
        let _ = op;
        true
    }
    fn benefit(&self) -> u16 {
        1
    }
    fn match_and_rewrite(
        &self,
        root: InstId,
        rewriter: &mut ProgramRewriter,
    ) -> Result<bool, RewriteError>;
}

/// Typed convenience trait mirroring MLIR's `OpRewritePattern`.
pub trait OpRewritePattern<T> {
    fn name(&self) -> &'static str;
    fn benefit(&self) -> u16 {
        1
    }
    fn may_match(&self, _op: &T, _rewriter: &ProgramRewriter) -> bool {
        true
    }
    fn match_and_rewrite(&self, op: T, rewriter: &mut ProgramRewriter)
        -> Result<bool, RewriteError>;
}

/// Adapter converting a typed pattern into a [`Pattern`].
pub struct TypedPattern<P, T> {
    pattern: P,
    matcher: OperationMatcher,
    extractor: fn(InstId, &ProgramRewriter) -> Option<T>,
}

impl<P, T> TypedPattern<P, T> {
    pub fn with_operation_matcher(
        pattern: P,
        matcher: OperationMatcher,
        extractor: fn(InstId, &ProgramRewriter) -> Option<T>,
    ) -> Self {
        Self {
            pattern,
            matcher,
            extractor,
        }
    }
}

impl<P, V> TypedPattern<P, V>
where
    V: OperationView,
{
    pub fn from_view(pattern: P) -> Self {
        Self::with_operation_matcher(pattern, V::MATCHER, V::extract)
    }
}

impl<P, T> Pattern for TypedPattern<P, T>
where
    P: OpRewritePattern<T> + Send + Sync,
    T: Send,
{
    fn name(&self) -> &'static str {
        self.pattern.name()
    }

    fn matches_operation(&self, op: &Operation) -> bool {
        (self.matcher)(op)
    }

    fn benefit(&self) -> u16 {
        self.pattern.benefit()
    }

    fn match_and_rewrite(
        &self,
        root: InstId,
        rewriter: &mut ProgramRewriter,
    ) -> Result<bool, RewriteError> {
        let Some(view) = (self.extractor)(root, rewriter) else {
            return Ok(false);
        };
        if !self.pattern.may_match(&view, rewriter) {
            return Ok(false);
        }
        self.pattern.match_and_rewrite(view, rewriter)
    }
}

/// Mutable set that collects rewrite patterns prior to freezing.
pub struct PatternSet {
    patterns: Vec<Box<dyn Pattern>>,
}

impl PatternSet {
    pub fn new() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    pub fn add<P>(&mut self, pattern: P) -> &mut Self
    where
        P: Pattern + 'static,
    {
        self.patterns.push(Box::new(pattern));
        self
    }

    pub fn insert_view<V, P>(&mut self, pattern: P) -> &mut Self
    where
        V: OperationView + Send + 'static,
        P: OpRewritePattern<V> + Send + Sync + 'static,
    {
        self.add(TypedPattern::<P, V>::from_view(pattern))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Orders patterns by descending benefit; ties keep insertion order.
    pub fn freeze(mut self) -> FrozenPatternSet {
        self.patterns
            .sort_by_key(|pattern| std::cmp::Reverse(pattern.benefit()));
        FrozenPatternSet {
            patterns: self.patterns,
        }
    }
}

impl Default for PatternSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable collection of rewrite patterns ready for use by the driver.
pub struct FrozenPatternSet {
    patterns: Vec<Box<dyn Pattern>>,
}

impl FrozenPatternSet {
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn matching<'a>(
        &'a self,
        op: &'a Operation,
    ) -> impl Iterator<Item = (usize, &'a dyn Pattern)> + 'a {
        self.patterns
            .iter()
            .enumerate()
            .filter(move |(_, pattern)| pattern.matches_operation(op))
            .map(|(idx, pattern)| (idx, &**pattern))
    }
}

/// Common operation matchers.
pub mod filters {
    use crate::ir::spec::Operation;

    /// Pure element-wise compute operations.
    pub fn elementwise(op: &Operation) -> bool {
        matches!(
            op,
            Operation::ElementwiseUnary(_)
                | Operation::ElementwiseBinary(_)
                | Operation::Compare(_)
                | Operation::Select
                | Operation::Cast(_)
        )
    }

    /// Compute operations with implicit operand broadcasting.
    pub fn broadcasting(op: &Operation) -> bool {
        matches!(
            op,
            Operation::BroadcastBinary(_)
                | Operation::BroadcastCompare(_)
                | Operation::BroadcastSelect
        )
    }

    pub fn compute(op: &Operation) -> bool {
        elementwise(op) || broadcasting(op)
    }
}
