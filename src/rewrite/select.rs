use sqlparser::ast::{Select, SelectItem};

use crate::analyzer::QueryAnalysis;
use crate::descriptor::MvDescriptor;
use crate::rewrite::expr::{RewriteContext, rewrite_expr};
use crate::rewrite::{RewriteResult, not_fit};

/// The query and the view must read the same base table.
pub(crate) fn match_relation(analysis: &QueryAnalysis, mv: &MvDescriptor) -> RewriteResult<()> {
    if analysis.base_table.table == mv.base_table.table {
        Ok(())
    } else {
        not_fit(format!(
            "from table not match: {} vs {}",
            analysis.base_table.table, mv.base_table.table
        ))
    }
}

/// Rewrites the projection against the view's output columns. Wildcards
/// have no stable expansion over a view, so they reject the candidate.
pub(crate) fn rewrite_select(
    select: &Select,
    mv: &MvDescriptor,
    ctx: &RewriteContext,
) -> RewriteResult<Vec<SelectItem>> {
    if select.distinct != mv.select.distinct {
        return not_fit("distinct not match");
    }
    let mut projection = Vec::with_capacity(select.projection.len());
    for item in &select.projection {
        let rewritten = match item {
            SelectItem::UnnamedExpr(expr) => SelectItem::UnnamedExpr(rewrite_expr(expr, ctx)?),
            SelectItem::ExprWithAlias { expr, alias } => SelectItem::ExprWithAlias {
                expr: rewrite_expr(expr, ctx)?,
                alias: alias.clone(),
            },
            SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(..) => {
                return not_fit("select not support: wildcard");
            }
        };
        projection.push(rewritten);
    }
    Ok(projection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{analyze_query, parse_query, query_select};
    use crate::catalog::{MetadataProvider, MvDefinition, Session};
    use crate::column::QualifiedTable;
    use crate::rewrite::RewriteError;
    use crate::rewrite::expr::AggregatePolicy;

    struct Tables;

    impl MetadataProvider for Tables {
        fn list_catalogs(&self) -> Vec<String> {
            vec!["cat".to_string()]
        }

        fn materialized_views(&self, _catalog: &str) -> Vec<MvDefinition> {
            vec![]
        }

        fn table_columns(&self, table: &QualifiedTable) -> Option<Vec<String>> {
            match table.table.as_str() {
                "t" => Some(vec!["a".to_string(), "b".to_string()]),
                "u" => Some(vec!["a".to_string()]),
                _ => None,
            }
        }
    }

    fn mv(sql: &str) -> MvDescriptor {
        let definition = MvDefinition::new(QualifiedTable::new("cat", "mvs", "mv1"), sql);
        MvDescriptor::build(&definition, &Session::new("cat", "sch"), &Tables).unwrap()
    }

    fn rewrite(query_sql: &str, mv: &MvDescriptor) -> RewriteResult<String> {
        let query = parse_query(query_sql).unwrap();
        let analysis = analyze_query(&query, &Session::new("cat", "sch"), &Tables).unwrap();
        let select = query_select(&query).unwrap();
        let ctx = RewriteContext {
            mv,
            refs: &analysis.refs,
            selectable: &mv.selectable,
            aggregates: AggregatePolicy::PassThrough,
        };
        rewrite_select(select, mv, &ctx).map(|items| {
            items
                .iter()
                .map(|item| item.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        })
    }

    #[test]
    fn relation_must_match() {
        let mv = mv("SELECT a, b FROM t");
        let query = parse_query("SELECT a FROM u").unwrap();
        let analysis = analyze_query(&query, &Session::new("cat", "sch"), &Tables).unwrap();
        assert!(matches!(
            match_relation(&analysis, &mv),
            Err(RewriteError::NotFit(_))
        ));
    }

    #[test]
    fn plain_and_aliased_items_rewrite() {
        let mv = mv("SELECT a, b AS beta FROM t");
        let projection = rewrite("SELECT a, b AS x FROM t", &mv).unwrap();
        assert_eq!(projection, "cat.mvs.mv1.a, cat.mvs.mv1.beta AS x");
    }

    #[test]
    fn wildcard_rejects() {
        let mv = mv("SELECT a, b FROM t");
        assert!(matches!(
            rewrite("SELECT * FROM t", &mv),
            Err(RewriteError::NotFit(_))
        ));
    }

    #[test]
    fn distinct_must_match_on_both_sides() {
        let plain = mv("SELECT a, b FROM t");
        assert!(matches!(
            rewrite("SELECT DISTINCT a FROM t", &plain),
            Err(RewriteError::NotFit(_))
        ));

        let distinct = mv("SELECT DISTINCT a, b FROM t");
        let projection = rewrite("SELECT DISTINCT a FROM t", &distinct).unwrap();
        assert_eq!(projection, "cat.mvs.mv1.a");
    }
}
