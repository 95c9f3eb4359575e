//! Materialized-view query rewriting.
//!
//! Given a parsed SELECT over a single base table, [`try_rewrite`] searches
//! the session's materialized views for one that can answer it and returns
//! the query rewritten to read from that view instead. A rewrite is only
//! produced when the view provably contains every row and aggregate the
//! query needs; anything the view does not already guarantee is re-applied
//! as a compensation predicate on top of it.
//!
//! The pipeline per candidate view:
//! ```text
//! relation match → WHERE containment → GROUP BY / HAVING match → SELECT
//! ```
//! Candidates are tried in ascending qualified-name order and the first
//! fit wins. A query that no view fits is returned unchanged.

pub mod analyzer;
pub mod cache;
pub mod catalog;
pub mod column;
pub mod descriptor;
pub mod predicate;
pub mod rewrite;

use log::{debug, warn};
use sqlparser::ast::Query;

pub use crate::cache::MvCache;
pub use crate::catalog::{MetadataProvider, MvDefinition, MvRewriteMode, Session};
pub use crate::column::{QualifiedColumn, QualifiedTable};
pub use crate::rewrite::RewriteError;
pub use mvrewrite_common::{Error, Result};

use crate::analyzer::analyze_query;
use crate::rewrite::attempt_rewrite;

/// Attempts to rewrite `query` onto a materialized view. Returns `None`
/// when rewriting is disabled, the query shape is out of scope, or no
/// candidate fits.
pub fn try_rewrite(
    query: &Query,
    session: &Session,
    metadata: &dyn MetadataProvider,
    cache: &MvCache,
) -> Option<Query> {
    match session.mv_rewrite {
        MvRewriteMode::Disabled => return None,
        MvRewriteMode::ForceReload => cache.invalidate(),
        MvRewriteMode::Enabled => {}
    }

    let analysis = match analyze_query(query, session, metadata) {
        Ok(analysis) => analysis,
        Err(err) => {
            debug!("query not eligible for mv rewrite: {}", err);
            return None;
        }
    };

    for mv in cache.candidates(session, metadata) {
        match attempt_rewrite(query, &analysis, &mv) {
            Ok(rewritten) => {
                debug!("query rewritten to use materialized view {}", mv.name);
                return Some(rewritten);
            }
            Err(RewriteError::NotFit(reason)) => {
                debug!("materialized view {} does not fit: {}", mv.name, reason);
            }
            Err(RewriteError::Internal(reason)) => {
                warn!(
                    "materialized view {} skipped, internal error: {}",
                    mv.name, reason
                );
            }
        }
    }
    None
}

/// Like [`try_rewrite`], but hands back the original query when no view
/// fits, so callers can thread it straight through planning.
pub fn rewrite_query(
    query: Query,
    session: &Session,
    metadata: &dyn MetadataProvider,
    cache: &MvCache,
) -> Query {
    try_rewrite(&query, session, metadata, cache).unwrap_or(query)
}
