pub mod analyze;
pub mod equivalence;
pub mod range;

use sqlparser::ast::Expr;

use crate::column::QualifiedColumn;
use crate::predicate::equivalence::{EquivalenceClass, class_for_column, full_merge};
use crate::predicate::range::ColumnRange;

/// A `column = column` conjunct, sides normalized so `left <= right`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EqualPredicate {
    pub left: QualifiedColumn,
    pub right: QualifiedColumn,
    pub always_true: bool,
}

impl EqualPredicate {
    pub fn new(a: QualifiedColumn, b: QualifiedColumn) -> Self {
        let always_true = a == b;
        let (left, right) = if a <= b { (a, b) } else { (b, a) };
        Self {
            left,
            right,
            always_true,
        }
    }
}

/// A conjunct the analyzer cannot decompose: carried opaquely and matched
/// structurally during rewriting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtherPredicate {
    pub expr: Expr,
    pub always_true: bool,
}

impl OtherPredicate {
    pub fn new(expr: Expr) -> Self {
        let always_true = match &expr {
            Expr::Value(v) => matches!(v.value, sqlparser::ast::Value::Boolean(true)),
            // A comparison with structurally identical sides, e.g. an
            // unresolvable `x = x`, restricts nothing either.
            Expr::BinaryOp {
                left,
                op: sqlparser::ast::BinaryOperator::Eq,
                right,
            } => left == right,
            _ => false,
        };
        Self { expr, always_true }
    }
}

/// The decomposition of one WHERE (or HAVING) conjunction into equality,
/// range, and opaque atoms, plus the merged equivalence classes.
///
/// `unsupported` carries the reason when decomposition gave up; an
/// unsupported analysis never fits any candidate.
#[derive(Debug, Clone, Default)]
pub struct PredicateAnalysis {
    pub unsupported: Option<String>,
    pub equals: Vec<EqualPredicate>,
    pub ranges: Vec<ColumnRange>,
    pub others: Vec<OtherPredicate>,
    pub classes: Vec<EquivalenceClass>,
}

impl PredicateAnalysis {
    /// The analysis of an absent predicate: supported and empty.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self {
            unsupported: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn is_supported(&self) -> bool {
        self.unsupported.is_none()
    }

    /// True when at least one atom actually restricts rows. Trivial atoms
    /// like `x = x` or a bare TRUE never count.
    pub fn has_effective_predicate(&self) -> bool {
        !self.ranges.is_empty()
            || self.equals.iter().any(|e| !e.always_true)
            || self.others.iter().any(|o| !o.always_true)
    }

    /// Derives the equivalence classes: one class per non-trivial equality
    /// pair plus a singleton per range column, merged to closure, then each
    /// range gets its class attached.
    pub(crate) fn build(&mut self) {
        let mut classes: Vec<EquivalenceClass> = Vec::new();
        for equal in &self.equals {
            if !equal.always_true {
                classes.push(EquivalenceClass::of([
                    equal.left.clone(),
                    equal.right.clone(),
                ]));
            }
        }
        for range in &self.ranges {
            classes.push(EquivalenceClass::singleton(range.column.clone()));
        }
        self.classes = full_merge(classes);
        for range in &mut self.ranges {
            if let Some(class) = class_for_column(&self.classes, &range.column) {
                range.class = class.clone();
            }
        }
    }
}
