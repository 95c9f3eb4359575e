use mvrewrite_common::{Error, Result};
use rustc_hash::FxHashMap;
use sqlparser::ast::{
    Expr, ObjectNamePart, Query, Select, SelectItem, SetExpr, TableFactor, TableWithJoins,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::catalog::{MetadataProvider, Session};
use crate::column::{QualifiedColumn, QualifiedTable};

/// Structural map from column-reference expressions to their resolved
/// identity. Expressions absent from the map are not columns.
#[derive(Debug, Clone, Default)]
pub struct ColumnRefs {
    map: FxHashMap<Expr, QualifiedColumn>,
}

impl ColumnRefs {
    pub fn insert(&mut self, expr: Expr, column: QualifiedColumn) {
        self.map.insert(expr, column);
    }

    pub fn resolve(&self, expr: &Expr) -> Option<&QualifiedColumn> {
        self.map.get(expr)
    }
}

/// The query FROM clause reduced to its single base relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTable {
    pub table: QualifiedTable,
    pub alias: Option<String>,
}

#[derive(Debug, Clone)]
pub struct QueryAnalysis {
    pub base_table: ResolvedTable,
    pub refs: ColumnRefs,
}

pub fn parse_query(sql: &str) -> Result<Query> {
    let statements = Parser::parse_sql(&GenericDialect {}, sql)
        .map_err(|e| Error::parse_error(e.to_string()))?;
    match <[_; 1]>::try_from(statements) {
        Ok([sqlparser::ast::Statement::Query(query)]) => Ok(*query),
        _ => Err(Error::parse_error("expected a single query statement")),
    }
}

pub(crate) fn query_select(query: &Query) -> Result<&Select> {
    match query.body.as_ref() {
        SetExpr::Select(select) => Ok(select.as_ref()),
        _ => Err(Error::unsupported("query body is not a plain select")),
    }
}

/// Resolves the single base table and every column reference of a plain
/// single-relation SELECT. Errors mean the statement is outside the shape
/// the rewriter understands; callers treat that as "leave the query alone".
pub fn analyze_query(
    query: &Query,
    session: &Session,
    metadata: &dyn MetadataProvider,
) -> Result<QueryAnalysis> {
    let select = query_select(query)?;
    let base_table = extract_base_table(&select.from, session)?;
    let columns = metadata
        .table_columns(&base_table.table)
        .ok_or_else(|| Error::table_not_found(base_table.table.to_string()))?;
    let scope = Scope {
        table: &base_table,
        columns: columns.iter().map(|c| c.to_lowercase()).collect(),
    };

    let mut refs = ColumnRefs::default();
    for item in &select.projection {
        match item {
            SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
                collect_refs(expr, &scope, &mut refs);
            }
            SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(_, _) => {}
        }
    }
    if let Some(selection) = &select.selection {
        collect_refs(selection, &scope, &mut refs);
    }
    if let sqlparser::ast::GroupByExpr::Expressions(exprs, _) = &select.group_by {
        for expr in exprs {
            collect_refs(expr, &scope, &mut refs);
        }
    }
    if let Some(having) = &select.having {
        collect_refs(having, &scope, &mut refs);
    }

    Ok(QueryAnalysis { base_table, refs })
}

struct Scope<'a> {
    table: &'a ResolvedTable,
    columns: Vec<String>,
}

fn extract_base_table(from: &[TableWithJoins], session: &Session) -> Result<ResolvedTable> {
    let [TableWithJoins { relation, joins }] = from else {
        return Err(Error::unsupported("expected exactly one relation in FROM"));
    };
    if !joins.is_empty() {
        return Err(Error::unsupported("joins are not supported"));
    }
    let TableFactor::Table { name, alias, .. } = relation else {
        return Err(Error::unsupported("FROM relation is not a base table"));
    };
    let mut parts = Vec::with_capacity(name.0.len());
    for part in &name.0 {
        match part {
            ObjectNamePart::Identifier(ident) => parts.push(ident.value.to_lowercase()),
            _ => return Err(Error::unsupported("unexpected table name part")),
        }
    }
    let table = match parts.as_slice() {
        [table] => QualifiedTable::new(
            session.catalog.to_lowercase(),
            session.schema.to_lowercase(),
            table.clone(),
        ),
        [schema, table] => QualifiedTable::new(
            session.catalog.to_lowercase(),
            schema.clone(),
            table.clone(),
        ),
        [catalog, schema, table] => {
            QualifiedTable::new(catalog.clone(), schema.clone(), table.clone())
        }
        _ => return Err(Error::unsupported("table name has too many parts")),
    };
    Ok(ResolvedTable {
        table,
        alias: alias.as_ref().map(|a| a.name.value.to_lowercase()),
    })
}

fn collect_refs(expr: &Expr, scope: &Scope<'_>, refs: &mut ColumnRefs) {
    match expr {
        Expr::Identifier(_) | Expr::CompoundIdentifier(_) => {
            if let Some(column) = resolve_column(expr, scope) {
                refs.insert(expr.clone(), column);
            }
        }
        Expr::BinaryOp { left, right, .. } => {
            collect_refs(left, scope, refs);
            collect_refs(right, scope, refs);
        }
        Expr::UnaryOp { expr, .. }
        | Expr::Nested(expr)
        | Expr::IsNull(expr)
        | Expr::IsNotNull(expr) => collect_refs(expr, scope, refs),
        Expr::Like { expr, pattern, .. } => {
            collect_refs(expr, scope, refs);
            collect_refs(pattern, scope, refs);
        }
        Expr::Between {
            expr, low, high, ..
        } => {
            collect_refs(expr, scope, refs);
            collect_refs(low, scope, refs);
            collect_refs(high, scope, refs);
        }
        Expr::InList { expr, list, .. } => {
            collect_refs(expr, scope, refs);
            for item in list {
                collect_refs(item, scope, refs);
            }
        }
        Expr::Function(function) => {
            if let sqlparser::ast::FunctionArguments::List(list) = &function.args {
                for arg in &list.args {
                    if let sqlparser::ast::FunctionArg::Unnamed(
                        sqlparser::ast::FunctionArgExpr::Expr(e),
                    ) = arg
                    {
                        collect_refs(e, scope, refs);
                    }
                }
            }
        }
        _ => {}
    }
}

fn resolve_column(expr: &Expr, scope: &Scope<'_>) -> Option<QualifiedColumn> {
    let idents = match expr {
        Expr::Identifier(ident) => std::slice::from_ref(ident),
        Expr::CompoundIdentifier(idents) => idents.as_slice(),
        _ => return None,
    };
    let (column, qualifier) = idents.split_last()?;
    let column = column.value.to_lowercase();
    if !scope.columns.contains(&column) {
        return None;
    }
    if !qualifier_matches(qualifier, scope) {
        return None;
    }
    Some(scope.table.table.column(column))
}

fn qualifier_matches(qualifier: &[sqlparser::ast::Ident], scope: &Scope<'_>) -> bool {
    let parts: Vec<String> = qualifier.iter().map(|i| i.value.to_lowercase()).collect();
    let table = &scope.table.table;
    match parts.as_slice() {
        [] => true,
        [one] => {
            Some(one) == scope.table.alias.as_ref()
                || (scope.table.alias.is_none() && *one == table.table)
        }
        [schema, name] => {
            scope.table.alias.is_none() && *schema == table.schema && *name == table.table
        }
        [catalog, schema, name] => {
            scope.table.alias.is_none()
                && *catalog == table.catalog
                && *schema == table.schema
                && *name == table.table
        }
        _ => false,
    }
}
