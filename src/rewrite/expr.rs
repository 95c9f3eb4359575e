use rustc_hash::FxHashMap;
use sqlparser::ast::{
    Expr, Function, FunctionArg, FunctionArgExpr, FunctionArgumentList, FunctionArguments, Ident,
    ObjectName, ObjectNamePart, UnaryOperator,
};

use crate::analyzer::ColumnRefs;
use crate::column::QualifiedColumn;
use crate::descriptor::{AggregateArg, MvDescriptor, aggregate_arg, function_name};
use crate::rewrite::{RewriteResult, not_fit};

const SUPPORTED_AGGREGATES: [&str; 5] = ["avg", "count", "max", "min", "sum"];

/// How aggregate calls are translated, decided by the GROUP BY stage and
/// shared with SELECT and HAVING rewriting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AggregatePolicy {
    /// No aggregates may appear (WHERE compensation).
    Forbid,
    /// Groupings are identical: `fn(col)` becomes a direct reference to
    /// the view's precomputed aggregate column.
    Relocate,
    /// The query groups coarser than the view: re-aggregate the view's
    /// partial aggregates.
    Reaggregate,
    /// The view is ungrouped: keep the aggregate, substitute its argument.
    PassThrough,
}

pub(crate) struct RewriteContext<'a> {
    pub mv: &'a MvDescriptor,
    pub refs: &'a ColumnRefs,
    pub selectable: &'a FxHashMap<QualifiedColumn, Ident>,
    pub aggregates: AggregatePolicy,
}

impl RewriteContext<'_> {
    fn column_reference(&self, column: &QualifiedColumn) -> RewriteResult<Expr> {
        match self.mv.find_column(column, self.selectable) {
            Some(expr) => Ok(expr),
            None => not_fit(format!("cannot find column in mv: {}", column)),
        }
    }
}

/// Substitutes base-table column references with view output references,
/// translating aggregate calls per the context's policy. Node kinds with
/// no sound translation reject the candidate.
pub(crate) fn rewrite_expr(expr: &Expr, ctx: &RewriteContext<'_>) -> RewriteResult<Expr> {
    match expr {
        Expr::Identifier(_) | Expr::CompoundIdentifier(_) => match ctx.refs.resolve(expr) {
            Some(column) => ctx.column_reference(column),
            None => not_fit(format!("unknown identifier: {}", expr)),
        },
        Expr::Value(_) | Expr::TypedString(_) | Expr::Interval(_) => Ok(expr.clone()),
        Expr::BinaryOp { left, op, right } => Ok(Expr::BinaryOp {
            left: Box::new(rewrite_expr(left, ctx)?),
            op: op.clone(),
            right: Box::new(rewrite_expr(right, ctx)?),
        }),
        Expr::UnaryOp {
            op: UnaryOperator::Not,
            expr: inner,
        } => Ok(Expr::UnaryOp {
            op: UnaryOperator::Not,
            expr: Box::new(rewrite_expr(inner, ctx)?),
        }),
        Expr::Nested(inner) => Ok(Expr::Nested(Box::new(rewrite_expr(inner, ctx)?))),
        Expr::IsNull(inner) => Ok(Expr::IsNull(Box::new(rewrite_expr(inner, ctx)?))),
        Expr::IsNotNull(inner) => Ok(Expr::IsNotNull(Box::new(rewrite_expr(inner, ctx)?))),
        Expr::Like { .. } => {
            let mut rewritten = expr.clone();
            if let Expr::Like {
                expr: inner,
                pattern,
                ..
            } = &mut rewritten
            {
                **inner = rewrite_expr(inner, ctx)?;
                **pattern = rewrite_expr(pattern, ctx)?;
            }
            Ok(rewritten)
        }
        Expr::InList {
            expr: needle,
            list,
            negated,
        } => {
            if !list.iter().all(is_literal) {
                return not_fit(format!("in-list with non literal element: {}", expr));
            }
            Ok(Expr::InList {
                expr: Box::new(rewrite_expr(needle, ctx)?),
                list: list.clone(),
                negated: *negated,
            })
        }
        Expr::Function(function) => rewrite_aggregate(function, ctx),
        _ => not_fit(format!("expression not support: {}", expr)),
    }
}

fn is_literal(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Value(_) | Expr::TypedString(_) | Expr::Interval(_)
    )
}

fn rewrite_aggregate(function: &Function, ctx: &RewriteContext<'_>) -> RewriteResult<Expr> {
    if ctx.aggregates == AggregatePolicy::Forbid {
        return not_fit(format!("expression not support: {}", function));
    }
    let Some(name) = function_name(function) else {
        return not_fit(format!("function not support: {}", function.name));
    };
    if !SUPPORTED_AGGREGATES.contains(&name.as_str()) {
        return not_fit(format!("function not support: {}", name));
    }
    let Some(arg) = aggregate_arg(function, ctx.refs) else {
        return not_fit(format!("function argument not support: {}", function));
    };
    match ctx.aggregates {
        AggregatePolicy::Forbid => unreachable!("rejected above"),
        AggregatePolicy::Relocate => {
            let output = if name == "count" {
                find_count_item(ctx.mv, &arg)?
            } else {
                find_item(ctx.mv, &name, &arg)?
            };
            Ok(ctx.mv.output_reference(output))
        }
        AggregatePolicy::Reaggregate => match name.as_str() {
            "max" | "min" | "sum" => {
                let output = find_item(ctx.mv, &name, &arg)?;
                Ok(make_call(&name, ctx.mv.output_reference(output)))
            }
            "count" => {
                let output = find_count_item(ctx.mv, &arg)?;
                Ok(make_call("sum", ctx.mv.output_reference(output)))
            }
            "avg" => {
                // avg re-aggregates as sum of sums over sum of counts
                let sum_output = find_item(ctx.mv, "sum", &arg)?;
                let count_output = find_count_item(ctx.mv, &arg)?;
                Ok(Expr::BinaryOp {
                    left: Box::new(make_call("sum", ctx.mv.output_reference(sum_output))),
                    op: sqlparser::ast::BinaryOperator::Divide,
                    right: Box::new(make_call("sum", ctx.mv.output_reference(count_output))),
                })
            }
            _ => not_fit(format!("function not support: {}", name)),
        },
        AggregatePolicy::PassThrough => {
            let rewritten_arg = match &arg {
                AggregateArg::Column(column) => {
                    FunctionArgExpr::Expr(ctx.column_reference(column)?)
                }
                AggregateArg::Star => FunctionArgExpr::Wildcard,
                AggregateArg::Literal => return Ok(Expr::Function(function.clone())),
            };
            let mut rewritten = function.clone();
            rewritten.args = FunctionArguments::List(FunctionArgumentList {
                duplicate_treatment: None,
                args: vec![FunctionArg::Unnamed(rewritten_arg)],
                clauses: vec![],
            });
            Ok(Expr::Function(rewritten))
        }
    }
}

fn find_item<'a>(
    mv: &'a MvDescriptor,
    name: &str,
    arg: &AggregateArg,
) -> RewriteResult<&'a Ident> {
    if *arg == AggregateArg::Literal {
        return not_fit(format!("literal argument not support for {}", name));
    }
    match mv.find_aggregate_item(name, arg) {
        Some(output) => Ok(output),
        None => not_fit(format!("cannot find {} aggregate in mv select", name)),
    }
}

/// `count` resolution: a literal argument counts rows like `count(*)`, and
/// a column argument falls back to the view's `count(*)` item when no
/// matching `count(col)` exists.
fn find_count_item<'a>(mv: &'a MvDescriptor, arg: &AggregateArg) -> RewriteResult<&'a Ident> {
    let target = match arg {
        AggregateArg::Literal => AggregateArg::Star,
        other => other.clone(),
    };
    let found = mv.find_aggregate_item("count", &target).or_else(|| {
        matches!(target, AggregateArg::Column(_))
            .then(|| mv.find_aggregate_item("count", &AggregateArg::Star))
            .flatten()
    });
    match found {
        Some(output) => Ok(output),
        None => not_fit("cannot find count aggregate in mv select"),
    }
}

fn make_call(name: &str, arg: Expr) -> Expr {
    Expr::Function(Function {
        name: ObjectName(vec![ObjectNamePart::Identifier(Ident::new(name))]),
        uses_odbc_syntax: false,
        parameters: FunctionArguments::None,
        args: FunctionArguments::List(FunctionArgumentList {
            duplicate_treatment: None,
            args: vec![FunctionArg::Unnamed(FunctionArgExpr::Expr(arg))],
            clauses: vec![],
        }),
        filter: None,
        null_treatment: None,
        over: None,
        within_group: vec![],
    })
}
