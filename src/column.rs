use std::fmt;

/// Fully resolved column identity: catalog, schema, table, column.
///
/// Ordering is lexicographic over the four fields in that sequence, which
/// keeps equivalence-class members and compensation output deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedColumn {
    pub catalog: String,
    pub schema: String,
    pub table: String,
    pub column: String,
}

impl QualifiedColumn {
    pub fn new(
        catalog: impl Into<String>,
        schema: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        Self {
            catalog: catalog.into(),
            schema: schema.into(),
            table: table.into(),
            column: column.into(),
        }
    }

    pub fn table(&self) -> QualifiedTable {
        QualifiedTable {
            catalog: self.catalog.clone(),
            schema: self.schema.clone(),
            table: self.table.clone(),
        }
    }
}

impl fmt::Display for QualifiedColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.catalog, self.schema, self.table, self.column
        )
    }
}

/// Fully resolved table identity. `Ord` so the MV cache can iterate
/// candidates in a fixed lexicographic order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedTable {
    pub catalog: String,
    pub schema: String,
    pub table: String,
}

impl QualifiedTable {
    pub fn new(
        catalog: impl Into<String>,
        schema: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            catalog: catalog.into(),
            schema: schema.into(),
            table: table.into(),
        }
    }

    pub fn column(&self, name: impl Into<String>) -> QualifiedColumn {
        QualifiedColumn {
            catalog: self.catalog.clone(),
            schema: self.schema.clone(),
            table: self.table.clone(),
            column: name.into(),
        }
    }
}

impl fmt::Display for QualifiedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.catalog, self.schema, self.table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_lexicographically_by_field() {
        let a = QualifiedColumn::new("c1", "s1", "t1", "x");
        let b = QualifiedColumn::new("c1", "s1", "t1", "y");
        let c = QualifiedColumn::new("c1", "s1", "t2", "a");
        let d = QualifiedColumn::new("c2", "a", "a", "a");
        assert!(a < b);
        assert!(b < c);
        assert!(c < d);
    }

    #[test]
    fn equality_covers_all_fields() {
        let a = QualifiedColumn::new("c", "s", "t", "x");
        let b = QualifiedColumn::new("c", "s", "t", "x");
        assert_eq!(a, b);
        assert_ne!(a, QualifiedColumn::new("c", "s", "t", "y"));
        assert_ne!(a, QualifiedColumn::new("c", "s2", "t", "x"));
    }

    #[test]
    fn table_of_column() {
        let col = QualifiedColumn::new("c", "s", "t", "x");
        assert_eq!(col.table(), QualifiedTable::new("c", "s", "t"));
        assert_eq!(col.table().column("x"), col);
    }
}
