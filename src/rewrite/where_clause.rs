use rustc_hash::FxHashMap;
use sqlparser::ast::{BinaryOperator, Expr, Ident, Select};

use crate::analyzer::ColumnRefs;
use crate::column::QualifiedColumn;
use crate::descriptor::{MvDescriptor, extend_selectable};
use crate::predicate::PredicateAnalysis;
use crate::predicate::analyze::{analyze_predicate, combine_predicates};
use crate::predicate::equivalence::EquivalenceClass;
use crate::predicate::range::ColumnRange;
use crate::rewrite::expr::{AggregatePolicy, RewriteContext, rewrite_expr};
use crate::rewrite::{RewriteResult, not_fit};

pub(crate) struct WhereRewrite {
    /// The residual predicate the rewritten query must apply on top of the
    /// view. `None` when the view guarantees everything the query asks.
    pub compensation: Option<Expr>,
    /// The view's selectable-column map extended across the query's own
    /// equivalence classes; later stages resolve columns through this.
    pub selectable: FxHashMap<QualifiedColumn, Ident>,
    /// The query's merged equality classes; the grouping stage uses them
    /// to match group columns the view names differently.
    pub classes: Vec<EquivalenceClass>,
}

/// Proves the view's WHERE no more restrictive than the query's and builds
/// the compensation predicate.
pub(crate) fn rewrite_where(
    select: &Select,
    refs: &ColumnRefs,
    mv: &MvDescriptor,
) -> RewriteResult<WhereRewrite> {
    if let Some(reason) = &mv.where_analysis.unsupported {
        return not_fit(format!("mv where not supported: {}", reason));
    }

    let Some(selection) = &select.selection else {
        // A query without WHERE only matches views that filter nothing.
        if mv.where_analysis.has_effective_predicate() {
            return not_fit("mv where more strict than query: query has no where");
        }
        return Ok(WhereRewrite {
            compensation: None,
            selectable: mv.selectable.clone(),
            classes: vec![],
        });
    };

    let analysis = analyze_predicate(Some(selection), refs);
    if let Some(reason) = &analysis.unsupported {
        return not_fit(format!("query where not supported: {}", reason));
    }

    let mut parts = equal_compensation(&analysis, mv)?;

    let mut selectable = mv.selectable.clone();
    extend_selectable(&mut selectable, &analysis.classes);

    parts.extend(range_compensation(&analysis, mv, &selectable)?);
    parts.extend(other_compensation(&analysis, refs, mv, &selectable)?);

    Ok(WhereRewrite {
        compensation: combine_predicates(parts),
        selectable,
        classes: analysis.classes,
    })
}

/// Equality compensation. Every view class must sit inside one query
/// class; per query class, the spanning residue (one representative per
/// covering view class plus uncovered columns) is stitched back together
/// with `rep = other` predicates rendered against the view's unextended
/// selectable map.
fn equal_compensation(
    analysis: &PredicateAnalysis,
    mv: &MvDescriptor,
) -> RewriteResult<Vec<Expr>> {
    let mv_classes = &mv.where_analysis.classes;
    let mut used = vec![false; mv_classes.len()];
    let mut parts = Vec::new();

    for query_class in &analysis.classes {
        let mut residue = EquivalenceClass::new();
        let mut covered = EquivalenceClass::new();
        for (i, mv_class) in mv_classes.iter().enumerate() {
            // Singleton view classes carry no equality; the range stage
            // accounts for them.
            if mv_class.len() < 2 || !mv_class.intersects(query_class) {
                continue;
            }
            if !mv_class.is_subset_of(query_class) {
                return not_fit("mv equal predicate more strict than query");
            }
            used[i] = true;
            if let Some(rep) = mv_class.representative() {
                residue.add(rep.clone());
            }
            covered.merge_from(mv_class);
        }
        for column in query_class.columns() {
            if !covered.contains(column) {
                residue.add(column.clone());
            }
        }
        if residue.len() < 2 {
            continue;
        }
        let columns = residue.columns();
        let rep = column_in_mv(&columns[0], mv, &mv.selectable)?;
        for other in &columns[1..] {
            parts.push(Expr::BinaryOp {
                left: Box::new(rep.clone()),
                op: BinaryOperator::Eq,
                right: Box::new(column_in_mv(other, mv, &mv.selectable)?),
            });
        }
    }

    for (i, mv_class) in mv_classes.iter().enumerate() {
        if !used[i] && mv_class.len() >= 2 {
            return not_fit(format!(
                "mv equal predicate not in query: {:?}",
                mv_class.columns()
            ));
        }
    }
    Ok(parts)
}

/// Range compensation, one query class at a time: intersect each side's
/// ranges, check the view covers the query, and re-apply the residual.
fn range_compensation(
    analysis: &PredicateAnalysis,
    mv: &MvDescriptor,
    selectable: &FxHashMap<QualifiedColumn, Ident>,
) -> RewriteResult<Vec<Expr>> {
    let mut mv_consumed = vec![false; mv.where_analysis.ranges.len()];
    let mut parts = Vec::new();

    for query_class in &analysis.classes {
        let tight: Vec<&ColumnRange> = analysis
            .ranges
            .iter()
            .filter(|r| query_class.contains(&r.column))
            .collect();
        let loose: Vec<&ColumnRange> = mv
            .where_analysis
            .ranges
            .iter()
            .enumerate()
            .filter_map(|(i, r)| {
                query_class.contains(&r.column).then(|| {
                    mv_consumed[i] = true;
                    r
                })
            })
            .collect();

        if tight.is_empty() {
            if loose.is_empty() {
                continue;
            }
            return not_fit(format!(
                "mv range predicate not in query: {}",
                loose[0].column
            ));
        }

        let tight_range = intersect_all(&tight)?;
        let loose_range = match loose.is_empty() {
            true => ColumnRange::unconstrained(tight_range.column.clone()),
            false => intersect_all(&loose)?,
        };
        if !loose_range.covers(&tight_range)? {
            return not_fit(format!(
                "mv range predicate more strict than query: {}",
                tight_range.column
            ));
        }
        let residual = tight_range.base_on(&loose_range);
        if residual.is_unconstrained() {
            continue;
        }
        let column = column_in_mv(&residual.column, mv, selectable)?;
        for (op, literal) in residual.comparisons() {
            parts.push(Expr::BinaryOp {
                left: Box::new(column.clone()),
                op: op.binary_operator(),
                right: Box::new(literal.clone()),
            });
        }
    }

    // A view range on a column the query never mentions can only restrict.
    if let Some(i) = mv_consumed.iter().position(|c| !c) {
        return not_fit(format!(
            "mv range predicate not in query: {}",
            mv.where_analysis.ranges[i].column
        ));
    }
    Ok(parts)
}

fn intersect_all(ranges: &[&ColumnRange]) -> RewriteResult<ColumnRange> {
    let (first, rest) = ranges
        .split_first()
        .ok_or_else(|| crate::rewrite::RewriteError::Internal("empty range group".to_string()))?;
    let mut combined = (*first).clone();
    for range in rest {
        combined = combined.intersection(range)?;
    }
    Ok(combined)
}

/// Opaque-atom compensation: every query atom must be guaranteed by a
/// structurally identical view atom (after both sides substitute columns),
/// otherwise it is re-applied. A view atom with no query counterpart is
/// ignored; a view atom that fails to substitute rejects the candidate.
fn other_compensation(
    analysis: &PredicateAnalysis,
    refs: &ColumnRefs,
    mv: &MvDescriptor,
    selectable: &FxHashMap<QualifiedColumn, Ident>,
) -> RewriteResult<Vec<Expr>> {
    let query_ctx = RewriteContext {
        mv,
        refs,
        selectable,
        aggregates: AggregatePolicy::Forbid,
    };
    let mv_ctx = RewriteContext {
        mv,
        refs: &mv.refs,
        selectable,
        aggregates: AggregatePolicy::Forbid,
    };

    let mut mv_atoms = Vec::new();
    for other in &mv.where_analysis.others {
        if other.always_true {
            continue;
        }
        mv_atoms.push(rewrite_expr(&other.expr, &mv_ctx)?);
    }

    let mut parts = Vec::new();
    for other in &analysis.others {
        if other.always_true {
            continue;
        }
        let rewritten = rewrite_expr(&other.expr, &query_ctx)?;
        if !mv_atoms.contains(&rewritten) {
            parts.push(rewritten);
        }
    }
    Ok(parts)
}

fn column_in_mv(
    column: &QualifiedColumn,
    mv: &MvDescriptor,
    selectable: &FxHashMap<QualifiedColumn, Ident>,
) -> RewriteResult<Expr> {
    match mv.find_column(column, selectable) {
        Some(expr) => Ok(expr),
        None => not_fit(format!("cannot find column in mv: {}", column)),
    }
}
