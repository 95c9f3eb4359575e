use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use log::debug;

use crate::catalog::{MetadataProvider, Session};
use crate::column::QualifiedTable;
use crate::descriptor::MvDescriptor;

/// Process-wide cache of materialized-view descriptors. Loaded lazily on
/// the first rewrite attempt and only reloaded after `invalidate`. Reads
/// vastly outnumber loads, so steady state takes the read lock only.
#[derive(Debug, Default)]
pub struct MvCache {
    inner: RwLock<CacheState>,
}

#[derive(Debug, Default)]
struct CacheState {
    loaded: bool,
    views: BTreeMap<QualifiedTable, Arc<MvDescriptor>>,
}

impl MvCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every descriptor; the next rewrite attempt reloads.
    pub fn invalidate(&self) {
        let mut state = self.inner.write().unwrap_or_else(|e| e.into_inner());
        state.loaded = false;
        state.views.clear();
    }

    pub fn is_loaded(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .loaded
    }

    pub fn get(&self, name: &QualifiedTable) -> Option<Arc<MvDescriptor>> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .views
            .get(name)
            .cloned()
    }

    /// Ensures the cache is loaded, then returns every descriptor in
    /// ascending (catalog, schema, table) order. That order is what makes
    /// "first fitting view wins" deterministic.
    pub fn candidates(
        &self,
        session: &Session,
        metadata: &dyn MetadataProvider,
    ) -> Vec<Arc<MvDescriptor>> {
        {
            let state = self.inner.read().unwrap_or_else(|e| e.into_inner());
            if state.loaded {
                return state.views.values().cloned().collect();
            }
        }
        let mut state = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if !state.loaded {
            state.views = load_descriptors(session, metadata);
            state.loaded = true;
        }
        state.views.values().cloned().collect()
    }
}

fn load_descriptors(
    session: &Session,
    metadata: &dyn MetadataProvider,
) -> BTreeMap<QualifiedTable, Arc<MvDescriptor>> {
    let mut views = BTreeMap::new();
    for catalog in metadata.list_catalogs() {
        for definition in metadata.materialized_views(&catalog) {
            match MvDescriptor::build(&definition, session, metadata) {
                Ok(descriptor) => {
                    views.insert(definition.name.clone(), Arc::new(descriptor));
                }
                Err(err) => {
                    debug!("skipping materialized view {}: {}", definition.name, err);
                }
            }
        }
    }
    debug!("loaded {} materialized view descriptors", views.len());
    views
}
