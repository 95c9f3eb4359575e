use rustc_hash::{FxHashMap, FxHashSet};
use sqlparser::ast::{Expr, GroupByExpr, Ident, Select};

use crate::analyzer::ColumnRefs;
use crate::column::QualifiedColumn;
use crate::descriptor::MvDescriptor;
use crate::predicate::analyze::{analyze_predicate, combine_predicates};
use crate::predicate::equivalence::{EquivalenceClass, class_for_column};
use crate::rewrite::expr::{AggregatePolicy, RewriteContext, rewrite_expr};
use crate::rewrite::{RewriteResult, not_fit};

pub(crate) struct GroupByRewrite {
    pub group_by: GroupByExpr,
    pub having: Option<Expr>,
    /// HAVING conditions that become plain row filters when the view's
    /// grouping already matches the query's exactly.
    pub extra_where: Option<Expr>,
    /// How aggregate calls in the remaining clauses must be translated.
    pub policy: AggregatePolicy,
}

/// Matches the query's grouping against the view's and decides the
/// aggregate translation policy. A query group column matches either a
/// view grouping column directly or one tied to it by an equality in the
/// query's WHERE; expression-valued GROUP BY items are out of scope.
pub(crate) fn rewrite_group_by(
    select: &Select,
    refs: &ColumnRefs,
    mv: &MvDescriptor,
    selectable: &FxHashMap<QualifiedColumn, Ident>,
    classes: &[EquivalenceClass],
) -> RewriteResult<GroupByRewrite> {
    if mv.select.having.is_some() {
        return not_fit("mv has having");
    }

    let query_groups = group_columns(&select.group_by, refs)?;

    let empty = GroupByExpr::Expressions(vec![], vec![]);
    let (group_by, policy) = if !mv.is_grouped() {
        // The view keeps base-table rows; grouping on top of it is free.
        let group_by = match query_groups.is_empty() {
            true => empty,
            false => regroup(&select.group_by, refs, mv, selectable)?,
        };
        (group_by, AggregatePolicy::PassThrough)
    } else if query_groups.is_empty() {
        return not_fit("mv group by more coarse than query");
    } else {
        let mv_groups = group_columns(&mv.select.group_by, &mv.refs)?;
        if mv_groups.len() < query_groups.len() {
            return not_fit("mv group by more coarse than query");
        }
        for column in &query_groups {
            if mv_groups.contains(column) {
                continue;
            }
            let via_equality = class_for_column(classes, column).is_some_and(|class| {
                class.len() >= 2 && mv_groups.iter().any(|c| class.contains(c))
            });
            if !via_equality {
                return not_fit(format!("group by column not in mv: {}", column));
            }
        }
        if query_groups.len() == mv_groups.len() {
            // One view row per query group: aggregates relocate to plain
            // columns and grouping disappears.
            (empty, AggregatePolicy::Relocate)
        } else {
            (
                regroup(&select.group_by, refs, mv, selectable)?,
                AggregatePolicy::Reaggregate,
            )
        }
    };

    let compensation = having_compensation(select, refs, mv, selectable, policy)?;
    let (having, extra_where) = match policy {
        AggregatePolicy::Relocate => (None, compensation),
        _ => (compensation, None),
    };

    Ok(GroupByRewrite {
        group_by,
        having,
        extra_where,
        policy,
    })
}

fn group_columns(
    group_by: &GroupByExpr,
    refs: &ColumnRefs,
) -> RewriteResult<FxHashSet<QualifiedColumn>> {
    let GroupByExpr::Expressions(exprs, modifiers) = group_by else {
        return not_fit("group by all not support");
    };
    if !modifiers.is_empty() {
        return not_fit("group by modifier not support");
    }
    let mut columns = FxHashSet::default();
    for expr in exprs {
        match refs.resolve(expr) {
            Some(column) => {
                columns.insert(column.clone());
            }
            None => return not_fit(format!("group by contains non column: {}", expr)),
        }
    }
    Ok(columns)
}

/// Re-emits the query's GROUP BY items against the view's output columns.
fn regroup(
    group_by: &GroupByExpr,
    refs: &ColumnRefs,
    mv: &MvDescriptor,
    selectable: &FxHashMap<QualifiedColumn, Ident>,
) -> RewriteResult<GroupByExpr> {
    let GroupByExpr::Expressions(exprs, _) = group_by else {
        return not_fit("group by all not support");
    };
    let ctx = RewriteContext {
        mv,
        refs,
        selectable,
        aggregates: AggregatePolicy::Forbid,
    };
    let rewritten = exprs
        .iter()
        .map(|expr| rewrite_expr(expr, &ctx))
        .collect::<RewriteResult<Vec<Expr>>>()?;
    Ok(GroupByExpr::Expressions(rewritten, vec![]))
}

/// HAVING only survives as a set of opaque aggregate conditions; anything
/// the WHERE analysis would classify as an equality or a range belongs in
/// WHERE and is rejected here.
fn having_compensation(
    select: &Select,
    refs: &ColumnRefs,
    mv: &MvDescriptor,
    selectable: &FxHashMap<QualifiedColumn, Ident>,
    policy: AggregatePolicy,
) -> RewriteResult<Option<Expr>> {
    let Some(having) = &select.having else {
        return Ok(None);
    };
    let analysis = analyze_predicate(Some(having), refs);
    if let Some(reason) = &analysis.unsupported {
        return not_fit(format!("query having not supported: {}", reason));
    }
    if analysis.equals.iter().any(|e| !e.always_true) || !analysis.ranges.is_empty() {
        return not_fit("equal or range condition in having not support");
    }
    let ctx = RewriteContext {
        mv,
        refs,
        selectable,
        aggregates: policy,
    };
    let mut parts = Vec::new();
    for other in &analysis.others {
        if other.always_true {
            continue;
        }
        parts.push(rewrite_expr(&other.expr, &ctx)?);
    }
    Ok(combine_predicates(parts))
}
