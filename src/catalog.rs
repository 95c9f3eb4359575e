use crate::column::QualifiedTable;

/// A stored materialized-view definition as metadata hands it out.
#[derive(Debug, Clone)]
pub struct MvDefinition {
    pub name: QualifiedTable,
    pub sql: String,
}

impl MvDefinition {
    pub fn new(name: QualifiedTable, sql: impl Into<String>) -> Self {
        Self {
            name,
            sql: sql.into(),
        }
    }
}

/// Metadata boundary the rewriter works against. Implementations are
/// expected to be cheap to call repeatedly except for
/// `materialized_views`, which the cache calls once per load.
pub trait MetadataProvider {
    fn list_catalogs(&self) -> Vec<String>;

    fn materialized_views(&self, catalog: &str) -> Vec<MvDefinition>;

    /// Column names of a base table, in definition order. `None` when the
    /// table is unknown.
    fn table_columns(&self, table: &QualifiedTable) -> Option<Vec<String>>;
}

/// Per-session control of the rewriter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MvRewriteMode {
    #[default]
    Disabled,
    Enabled,
    /// Invalidate the MV cache before rewriting, then behave as `Enabled`.
    ForceReload,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub catalog: String,
    pub schema: String,
    pub mv_rewrite: MvRewriteMode,
}

impl Session {
    pub fn new(catalog: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            catalog: catalog.into(),
            schema: schema.into(),
            mv_rewrite: MvRewriteMode::Disabled,
        }
    }

    pub fn with_mv_rewrite(mut self, mode: MvRewriteMode) -> Self {
        self.mv_rewrite = mode;
        self
    }
}
