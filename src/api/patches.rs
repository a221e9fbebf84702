use crate::cache::{Action, Patch, QueryCacheKey};

use super::Api;

/// Patches applied by [`Api::update_query_data`], with their inverse.
#[derive(Clone)]
pub struct PatchCollection {
    api: Api,
    cache_key: QueryCacheKey,
    pub patches: Vec<Patch>,
    pub inverse_patches: Vec<Patch>,
}

impl PatchCollection {
    pub(crate) fn new(
        api: Api,
        cache_key: QueryCacheKey,
        patches: Vec<Patch>,
        inverse_patches: Vec<Patch>,
    ) -> Self {
        Self {
            api,
            cache_key,
            patches,
            inverse_patches,
        }
    }

    pub(crate) fn empty(api: Api, cache_key: QueryCacheKey) -> Self {
        Self::new(api, cache_key, Vec::new(), Vec::new())
    }

    pub fn cache_key(&self) -> &QueryCacheKey {
        &self.cache_key
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    /// Roll the entry back by applying the inverse patches.
    pub fn undo(&self) {
        if self.inverse_patches.is_empty() {
            return;
        }
        self.api.engine.dispatch(Action::QueryResultPatched {
            cache_key: self.cache_key.clone(),
            patches: self.inverse_patches.clone(),
            update_provided: true,
        });
    }
}

impl std::fmt::Debug for PatchCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchCollection")
            .field("cache_key", &self.cache_key)
            .field("patches", &self.patches)
            .field("inverse_patches", &self.inverse_patches)
            .finish()
    }
}
