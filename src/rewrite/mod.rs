pub mod expr;
pub mod group_by;
pub mod select;
pub mod where_clause;

use sqlparser::ast::{Query, SetExpr, TableFactor, TableWithJoins};

use crate::analyzer::{QueryAnalysis, query_select};
use crate::descriptor::MvDescriptor;
use crate::predicate::analyze::combine_predicates;
use crate::rewrite::expr::RewriteContext;

/// Why one candidate view was rejected. `NotFit` is the expected outcome
/// for most candidates; `Internal` marks an inconsistency that should not
/// happen and is logged louder, but both leave the original query intact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteError {
    NotFit(String),
    Internal(String),
}

pub type RewriteResult<T> = std::result::Result<T, RewriteError>;

pub(crate) fn not_fit<T>(reason: impl Into<String>) -> RewriteResult<T> {
    Err(RewriteError::NotFit(reason.into()))
}

impl From<mvrewrite_common::Error> for RewriteError {
    fn from(err: mvrewrite_common::Error) -> Self {
        RewriteError::Internal(err.to_string())
    }
}

/// Tries to rewrite `query` to read from one candidate view. Every stage
/// must prove the view is no more restrictive than the query; the first
/// failing stage rejects the candidate.
pub(crate) fn attempt_rewrite(
    query: &Query,
    analysis: &QueryAnalysis,
    mv: &MvDescriptor,
) -> RewriteResult<Query> {
    let select = match query_select(query) {
        Ok(select) => select,
        Err(err) => return not_fit(err.to_string()),
    };
    check_select_shape(select)?;
    select::match_relation(analysis, mv)?;

    let where_rewrite = where_clause::rewrite_where(select, &analysis.refs, mv)?;
    let group_rewrite = group_by::rewrite_group_by(
        select,
        &analysis.refs,
        mv,
        &where_rewrite.selectable,
        &where_rewrite.classes,
    )?;

    let ctx = RewriteContext {
        mv,
        refs: &analysis.refs,
        selectable: &where_rewrite.selectable,
        aggregates: group_rewrite.policy,
    };
    let projection = select::rewrite_select(select, mv, &ctx)?;

    let mut parts = Vec::new();
    if let Some(compensation) = where_rewrite.compensation {
        parts.push(compensation);
    }
    if let Some(extra) = group_rewrite.extra_where {
        parts.push(extra);
    }

    let mut rewritten = select.clone();
    rewritten.projection = projection;
    rewritten.from = vec![TableWithJoins {
        relation: mv_relation(select, mv),
        joins: vec![],
    }];
    rewritten.selection = combine_predicates(parts);
    rewritten.group_by = group_rewrite.group_by;
    rewritten.having = group_rewrite.having;

    let mut result = query.clone();
    result.body = Box::new(SetExpr::Select(Box::new(rewritten)));
    Ok(result)
}

/// The rewritten FROM clause: the query's own table factor retargeted at
/// the view's qualified name, alias dropped.
fn mv_relation(select: &sqlparser::ast::Select, mv: &MvDescriptor) -> TableFactor {
    let mut relation = select.from[0].relation.clone();
    if let TableFactor::Table { name, alias, .. } = &mut relation {
        *name = mv.name_object();
        *alias = None;
    }
    relation
}

/// Clauses the rewriter has no compensation story for must be absent on
/// the query side.
fn check_select_shape(select: &sqlparser::ast::Select) -> RewriteResult<()> {
    let plain = select.top.is_none()
        && select.exclude.is_none()
        && select.into.is_none()
        && select.lateral_views.is_empty()
        && select.prewhere.is_none()
        && select.cluster_by.is_empty()
        && select.distribute_by.is_empty()
        && select.sort_by.is_empty()
        && select.named_window.is_empty()
        && select.qualify.is_none()
        && !select.window_before_qualify
        && select.connect_by.is_none()
        && select.value_table_mode.is_none();
    if plain {
        Ok(())
    } else {
        not_fit("query select shape not support")
    }
}
