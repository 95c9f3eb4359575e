use sqlparser::ast::{BinaryOperator, Expr};

use crate::analyzer::ColumnRefs;
use crate::predicate::range::{ColumnRange, RangeOp};
use crate::predicate::{EqualPredicate, OtherPredicate, PredicateAnalysis};

/// Decomposes a predicate into its atoms. Only top-level `AND` chains are
/// split; an `OR` anywhere in the chain makes the whole analysis
/// unsupported. Conjuncts that are neither a column/literal comparison nor
/// a BETWEEN stay opaque.
pub fn analyze_predicate(predicate: Option<&Expr>, refs: &ColumnRefs) -> PredicateAnalysis {
    let Some(predicate) = predicate else {
        return PredicateAnalysis::empty();
    };
    let mut analysis = PredicateAnalysis::empty();
    for conjunct in split_conjuncts(predicate) {
        if matches!(
            conjunct,
            Expr::BinaryOp {
                op: BinaryOperator::Or,
                ..
            }
        ) {
            return PredicateAnalysis::unsupported("or predicate not support");
        }
        classify(conjunct, refs, &mut analysis);
    }
    analysis.build();
    analysis
}

/// Flattens nested `AND`s into a list of conjuncts, stripping parentheses.
pub fn split_conjuncts(predicate: &Expr) -> Vec<&Expr> {
    let mut conjuncts = Vec::new();
    collect_conjuncts(predicate, &mut conjuncts);
    conjuncts
}

fn collect_conjuncts<'a>(expr: &'a Expr, out: &mut Vec<&'a Expr>) {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_conjuncts(left, out);
            collect_conjuncts(right, out);
        }
        Expr::Nested(inner) => collect_conjuncts(inner, out),
        _ => out.push(expr),
    }
}

/// Folds predicates back into a single `AND` chain. `None` when the list
/// is empty.
pub fn combine_predicates(predicates: Vec<Expr>) -> Option<Expr> {
    predicates.into_iter().reduce(|acc, p| Expr::BinaryOp {
        left: Box::new(acc),
        op: BinaryOperator::And,
        right: Box::new(p),
    })
}

fn classify(conjunct: &Expr, refs: &ColumnRefs, analysis: &mut PredicateAnalysis) {
    match conjunct {
        Expr::BinaryOp { left, op, right } => {
            let Some(range_op) = RangeOp::from_binary_operator(op) else {
                analysis.others.push(OtherPredicate::new(conjunct.clone()));
                return;
            };
            let left_col = refs.resolve(left);
            let right_col = refs.resolve(right);
            match (left_col, right_col) {
                (Some(l), Some(r)) if range_op == RangeOp::Eq => {
                    analysis
                        .equals
                        .push(EqualPredicate::new(l.clone(), r.clone()));
                }
                (Some(l), None) => {
                    match ColumnRange::from_comparison(l.clone(), range_op, right) {
                        Some(range) => analysis.ranges.push(range),
                        None => analysis.others.push(OtherPredicate::new(conjunct.clone())),
                    }
                }
                (None, Some(r)) => {
                    match ColumnRange::from_comparison(r.clone(), range_op.flipped(), left) {
                        Some(range) => analysis.ranges.push(range),
                        None => analysis.others.push(OtherPredicate::new(conjunct.clone())),
                    }
                }
                _ => analysis.others.push(OtherPredicate::new(conjunct.clone())),
            }
        }
        Expr::Between {
            expr,
            negated: false,
            low,
            high,
        } => match refs
            .resolve(expr)
            .and_then(|col| ColumnRange::from_between(col.clone(), low, high))
        {
            Some(range) => analysis.ranges.push(range),
            None => analysis.others.push(OtherPredicate::new(conjunct.clone())),
        },
        _ => analysis.others.push(OtherPredicate::new(conjunct.clone())),
    }
}

#[cfg(test)]
mod tests {
    use sqlparser::ast::Ident;
    use sqlparser::dialect::GenericDialect;
    use sqlparser::parser::Parser;

    use super::*;
    use crate::column::QualifiedColumn;

    fn col(name: &str) -> QualifiedColumn {
        QualifiedColumn::new("cat", "sch", "t", name)
    }

    fn refs(names: &[&str]) -> ColumnRefs {
        let mut refs = ColumnRefs::default();
        for name in names {
            refs.insert(Expr::Identifier(Ident::new(*name)), col(name));
        }
        refs
    }

    fn parse(text: &str) -> Expr {
        Parser::new(&GenericDialect {})
            .try_with_sql(text)
            .unwrap()
            .parse_expr()
            .unwrap()
    }

    fn analyze(text: &str, columns: &[&str]) -> PredicateAnalysis {
        analyze_predicate(Some(&parse(text)), &refs(columns))
    }

    #[test]
    fn splits_nested_ands() {
        let expr = parse("a = 1 AND (b = 2 AND c = 3)");
        assert_eq!(split_conjuncts(&expr).len(), 3);
    }

    #[test]
    fn classifies_equal_range_and_other() {
        let analysis = analyze("a = b AND c > 5 AND d LIKE 'x%'", &["a", "b", "c", "d"]);
        assert!(analysis.is_supported());
        assert_eq!(analysis.equals.len(), 1);
        assert_eq!(analysis.ranges.len(), 1);
        assert_eq!(analysis.others.len(), 1);
    }

    #[test]
    fn equality_to_literal_is_a_range() {
        let analysis = analyze("a = 5", &["a"]);
        assert_eq!(analysis.ranges.len(), 1);
        assert!(analysis.ranges[0].equal.is_some());
        assert!(analysis.equals.is_empty());
    }

    #[test]
    fn literal_on_left_flips_the_operator() {
        let analysis = analyze("5 < a", &["a"]);
        assert_eq!(analysis.ranges.len(), 1);
        let range = &analysis.ranges[0];
        assert!(range.lower.is_some());
        assert_eq!(range.lower.as_ref().unwrap().op, RangeOp::Gt);
    }

    #[test]
    fn between_becomes_two_inclusive_bounds() {
        let analysis = analyze("a BETWEEN 3 AND 8", &["a"]);
        let range = &analysis.ranges[0];
        assert_eq!(range.lower.as_ref().unwrap().op, RangeOp::GtEq);
        assert_eq!(range.upper.as_ref().unwrap().op, RangeOp::LtEq);
    }

    #[test]
    fn negated_between_stays_opaque() {
        let analysis = analyze("a NOT BETWEEN 3 AND 8", &["a"]);
        assert!(analysis.ranges.is_empty());
        assert_eq!(analysis.others.len(), 1);
    }

    #[test]
    fn or_is_unsupported() {
        let analysis = analyze("a = 1 OR b = 2", &["a", "b"]);
        assert!(!analysis.is_supported());
    }

    #[test]
    fn trivial_equality_is_not_effective() {
        let analysis = analyze("a = a", &["a"]);
        assert!(analysis.is_supported());
        assert!(analysis.equals[0].always_true);
        assert!(!analysis.has_effective_predicate());

        let analysis = analyze("a = a AND a > 1", &["a"]);
        assert!(analysis.has_effective_predicate());
    }

    #[test]
    fn identical_opaque_sides_are_not_effective() {
        // neither side resolves to a column, but the comparison still
        // restricts nothing
        let analysis = analyze("upper(d) = upper(d)", &["a"]);
        assert_eq!(analysis.others.len(), 1);
        assert!(analysis.others[0].always_true);
        assert!(!analysis.has_effective_predicate());

        let analysis = analyze("upper(d) = upper(c)", &["a"]);
        assert!(!analysis.others[0].always_true);
        assert!(analysis.has_effective_predicate());
    }

    #[test]
    fn build_attaches_classes_to_ranges() {
        let analysis = analyze("a = b AND b > 5 AND c < 3", &["a", "b", "c"]);
        assert_eq!(analysis.classes.len(), 2);
        let b_range = &analysis.ranges[0];
        assert!(b_range.class.contains(&col("a")));
        assert!(b_range.class.contains(&col("b")));
        let c_range = &analysis.ranges[1];
        assert_eq!(c_range.class.columns(), &[col("c")]);
    }

    #[test]
    fn comparison_with_unparseable_literal_is_opaque() {
        let analysis = analyze("a = TRUE", &["a"]);
        assert!(analysis.ranges.is_empty());
        assert_eq!(analysis.others.len(), 1);
    }

    #[test]
    fn combine_rebuilds_and_chain() {
        let parts = vec![parse("a = 1"), parse("b = 2")];
        let combined = combine_predicates(parts).unwrap();
        assert_eq!(combined, parse("a = 1 AND b = 2"));
        assert!(combine_predicates(vec![]).is_none());
    }
}
