use mvrewrite_common::{Error, Result};
use rustc_hash::FxHashMap;
use sqlparser::ast::{
    Expr, Function, FunctionArg, FunctionArgExpr, FunctionArguments, GroupByExpr, Ident,
    ObjectName, ObjectNamePart, Select, SelectItem,
};

use crate::analyzer::{ColumnRefs, ResolvedTable, analyze_query, parse_query, query_select};
use crate::catalog::{MetadataProvider, MvDefinition, Session};
use crate::column::{QualifiedColumn, QualifiedTable};
use crate::predicate::PredicateAnalysis;
use crate::predicate::analyze::analyze_predicate;
use crate::predicate::equivalence::EquivalenceClass;

/// Everything the rewriter needs to know about one materialized view,
/// precomputed once when the cache loads.
#[derive(Debug, Clone)]
pub struct MvDescriptor {
    pub name: QualifiedTable,
    pub select: Select,
    pub refs: ColumnRefs,
    pub base_table: ResolvedTable,
    /// Analysis of the view's own WHERE clause; the empty analysis when the
    /// view has none. May be unsupported, which rejects every attempt
    /// against this view.
    pub where_analysis: PredicateAnalysis,
    /// Base-table columns the view exposes directly, mapped to their output
    /// names, pre-extended across the view's own equivalence classes.
    pub selectable: FxHashMap<QualifiedColumn, Ident>,
}

impl MvDescriptor {
    pub fn build(
        definition: &MvDefinition,
        session: &Session,
        metadata: &dyn MetadataProvider,
    ) -> Result<MvDescriptor> {
        let query = parse_query(&definition.sql)?;
        if query.with.is_some()
            || query.order_by.is_some()
            || query.limit_clause.is_some()
            || query.fetch.is_some()
        {
            return Err(Error::unsupported(
                "mv definition carries WITH, ORDER BY, or LIMIT",
            ));
        }
        let analysis = analyze_query(&query, session, metadata)?;
        let select = query_select(&query)?.clone();

        let mut selectable = FxHashMap::default();
        for item in &select.projection {
            let (expr, alias) = match item {
                SelectItem::UnnamedExpr(expr) => (expr, None),
                SelectItem::ExprWithAlias { expr, alias } => (expr, Some(alias)),
                SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(_, _) => continue,
            };
            let Some(column) = analysis.refs.resolve(expr) else {
                continue;
            };
            let output = match alias {
                Some(alias) => alias.clone(),
                None => Ident::new(column.column.clone()),
            };
            selectable.entry(column.clone()).or_insert(output);
        }

        let where_analysis = analyze_predicate(select.selection.as_ref(), &analysis.refs);
        extend_selectable(&mut selectable, &where_analysis.classes);

        Ok(MvDescriptor {
            name: definition.name.clone(),
            select,
            refs: analysis.refs,
            base_table: analysis.base_table,
            where_analysis,
            selectable,
        })
    }

    pub fn is_grouped(&self) -> bool {
        !matches!(&self.select.group_by, GroupByExpr::Expressions(exprs, _) if exprs.is_empty())
    }

    /// The view's fully qualified name for the rewritten FROM clause.
    pub fn name_object(&self) -> ObjectName {
        ObjectName(vec![
            ObjectNamePart::Identifier(Ident::new(self.name.catalog.clone())),
            ObjectNamePart::Identifier(Ident::new(self.name.schema.clone())),
            ObjectNamePart::Identifier(Ident::new(self.name.table.clone())),
        ])
    }

    /// A reference to one of the view's output columns, fully qualified.
    pub fn output_reference(&self, output: &Ident) -> Expr {
        Expr::CompoundIdentifier(vec![
            Ident::new(self.name.catalog.clone()),
            Ident::new(self.name.schema.clone()),
            Ident::new(self.name.table.clone()),
            output.clone(),
        ])
    }

    /// Looks up a base-table column among the view's plain select items,
    /// returning a qualified reference to the matching output column.
    pub fn find_column(
        &self,
        column: &QualifiedColumn,
        selectable: &FxHashMap<QualifiedColumn, Ident>,
    ) -> Option<Expr> {
        selectable
            .get(column)
            .map(|output| self.output_reference(output))
    }

    /// Looks up an aggregate select item by function name and argument.
    /// Only aliased items qualify; the rewritten query has no other way to
    /// reference them.
    pub fn find_aggregate_item(&self, fn_name: &str, arg: &AggregateArg) -> Option<&Ident> {
        self.select.projection.iter().find_map(|item| {
            let SelectItem::ExprWithAlias {
                expr: Expr::Function(function),
                alias,
            } = item
            else {
                return None;
            };
            if function_name(function)? != fn_name {
                return None;
            }
            let candidate = aggregate_arg(function, &self.refs)?;
            (candidate == *arg).then_some(alias)
        })
    }
}

/// The shapes of aggregate argument the rewriter can match between the
/// query and a view's select list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregateArg {
    Star,
    Literal,
    Column(QualifiedColumn),
}

pub(crate) fn function_name(function: &Function) -> Option<String> {
    match function.name.0.as_slice() {
        [ObjectNamePart::Identifier(ident)] => Some(ident.value.to_lowercase()),
        _ => None,
    }
}

/// Classifies a call's single argument. `None` for anything the rewriter
/// cannot reason about: DISTINCT, FILTER, windows, named or multiple
/// arguments, non-column expressions.
pub(crate) fn aggregate_arg(function: &Function, refs: &ColumnRefs) -> Option<AggregateArg> {
    if function.over.is_some() || function.filter.is_some() {
        return None;
    }
    let FunctionArguments::List(list) = &function.args else {
        return None;
    };
    if list.duplicate_treatment.is_some() {
        return None;
    }
    match list.args.as_slice() {
        [FunctionArg::Unnamed(FunctionArgExpr::Wildcard)] => Some(AggregateArg::Star),
        [FunctionArg::Unnamed(FunctionArgExpr::Expr(expr))] => match refs.resolve(expr) {
            Some(column) => Some(AggregateArg::Column(column.clone())),
            None => matches!(expr, Expr::Value(_)).then_some(AggregateArg::Literal),
        },
        _ => None,
    }
}

/// Extends a selectable-column map across equivalence classes: when any
/// member of a class is selectable, every member becomes selectable under
/// the same output name. Existing entries are never overwritten.
pub(crate) fn extend_selectable(
    selectable: &mut FxHashMap<QualifiedColumn, Ident>,
    classes: &[EquivalenceClass],
) {
    for class in classes {
        let Some(output) = class
            .columns()
            .iter()
            .find_map(|c| selectable.get(c).cloned())
        else {
            continue;
        };
        for column in class.columns() {
            selectable.entry(column.clone()).or_insert(output.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MvRewriteMode;

    struct Tables;

    impl MetadataProvider for Tables {
        fn list_catalogs(&self) -> Vec<String> {
            vec!["cat".to_string()]
        }

        fn materialized_views(&self, _catalog: &str) -> Vec<MvDefinition> {
            vec![]
        }

        fn table_columns(&self, table: &QualifiedTable) -> Option<Vec<String>> {
            (table.table == "t").then(|| {
                vec![
                    "a".to_string(),
                    "b".to_string(),
                    "c".to_string(),
                    "d".to_string(),
                ]
            })
        }
    }

    fn session() -> Session {
        Session::new("cat", "sch").with_mv_rewrite(MvRewriteMode::Enabled)
    }

    fn mv(sql: &str) -> Result<MvDescriptor> {
        let definition = MvDefinition::new(QualifiedTable::new("cat", "mvs", "mv1"), sql);
        MvDescriptor::build(&definition, &session(), &Tables)
    }

    fn col(name: &str) -> QualifiedColumn {
        QualifiedColumn::new("cat", "sch", "t", name)
    }

    #[test]
    fn builds_selectable_map_with_aliases() {
        let descriptor = mv("SELECT a, b AS b_out, max(c) AS max_c FROM t GROUP BY a, b").unwrap();
        assert_eq!(descriptor.selectable.get(&col("a")), Some(&Ident::new("a")));
        assert_eq!(
            descriptor.selectable.get(&col("b")),
            Some(&Ident::new("b_out"))
        );
        // aggregate items are not plain selectable columns
        assert!(descriptor.selectable.get(&col("c")).is_none());
        assert!(descriptor.is_grouped());
    }

    #[test]
    fn own_equalities_extend_the_selectable_map() {
        let descriptor = mv("SELECT a FROM t WHERE a = b").unwrap();
        assert_eq!(descriptor.selectable.get(&col("b")), Some(&Ident::new("a")));
    }

    #[test]
    fn rejects_order_by_and_limit() {
        assert!(mv("SELECT a FROM t ORDER BY a").is_err());
        assert!(mv("SELECT a FROM t LIMIT 5").is_err());
        assert!(mv("WITH x AS (SELECT a FROM t) SELECT a FROM t").is_err());
    }

    #[test]
    fn finds_aggregate_items_by_name_and_argument() {
        let descriptor =
            mv("SELECT a, max(b) AS max_b, count(*) AS cnt FROM t GROUP BY a").unwrap();
        assert_eq!(
            descriptor.find_aggregate_item("max", &AggregateArg::Column(col("b"))),
            Some(&Ident::new("max_b"))
        );
        assert_eq!(
            descriptor.find_aggregate_item("count", &AggregateArg::Star),
            Some(&Ident::new("cnt"))
        );
        assert!(
            descriptor
                .find_aggregate_item("max", &AggregateArg::Column(col("a")))
                .is_none()
        );
        assert!(
            descriptor
                .find_aggregate_item("sum", &AggregateArg::Column(col("b")))
                .is_none()
        );
    }

    #[test]
    fn unaliased_aggregates_are_invisible() {
        let descriptor = mv("SELECT a, max(b) FROM t GROUP BY a").unwrap();
        assert!(
            descriptor
                .find_aggregate_item("max", &AggregateArg::Column(col("b")))
                .is_none()
        );
    }

    #[test]
    fn output_reference_is_fully_qualified() {
        let descriptor = mv("SELECT a FROM t").unwrap();
        let expr = descriptor.output_reference(&Ident::new("a"));
        assert_eq!(
            expr,
            Expr::CompoundIdentifier(vec![
                Ident::new("cat"),
                Ident::new("mvs"),
                Ident::new("mv1"),
                Ident::new("a"),
            ])
        );
    }
}
