//! Bidirectional provided-tag registry.
//!
//! Tracks which query entries currently provide which tags, enabling
//! invalidation to find every affected entry from a list of tags.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use super::keys::QueryCacheKey;
use super::tags::{Tag, TagId};

/// Tracks tag → cache_keys and cache_key → tags mappings.
///
/// The forward direction is grouped by tag type so that an id-less
/// invalidation can reach every id of that type.
#[derive(Debug, Default, Clone)]
pub struct ProvidedIndex {
    /// type → id (None for id-less tags) → providing keys
    tag_to_keys: HashMap<String, HashMap<Option<TagId>, HashSet<QueryCacheKey>>>,
    /// key → tags it currently provides
    key_to_tags: HashMap<QueryCacheKey, HashSet<Tag>>,
}

impl ProvidedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the tags provided by `cache_key`.
    ///
    /// Previous associations are dropped first; tags are never merged across
    /// results.
    pub fn update_provided_by(&mut self, cache_key: &QueryCacheKey, tags: Vec<Tag>) {
        self.remove_key(cache_key);
        if tags.is_empty() {
            return;
        }

        let tags: HashSet<Tag> = tags.into_iter().collect();
        for tag in &tags {
            self.tag_to_keys
                .entry(tag.kind.clone())
                .or_default()
                .entry(tag.id.clone())
                .or_default()
                .insert(cache_key.clone());
        }
        self.key_to_tags.insert(cache_key.clone(), tags);
    }

    /// Every key that currently provides exactly `tag`.
    pub fn keys_for_tag(&self, tag: &Tag) -> HashSet<QueryCacheKey> {
        self.tag_to_keys
            .get(&tag.kind)
            .and_then(|by_id| by_id.get(&tag.id))
            .cloned()
            .unwrap_or_default()
    }

    /// Tags currently provided by `cache_key`.
    pub fn tags_for_key(&self, cache_key: &QueryCacheKey) -> HashSet<Tag> {
        self.key_to_tags.get(cache_key).cloned().unwrap_or_default()
    }

    /// Keys affected by invalidating `tags`.
    ///
    /// A tag with an id matches providers of that exact id; a tag without an
    /// id matches every provider of its type.
    pub fn select_invalidated_by<'a, I>(&self, tags: I) -> BTreeSet<QueryCacheKey>
    where
        I: IntoIterator<Item = &'a Tag>,
    {
        let mut affected = BTreeSet::new();
        for tag in tags {
            let Some(by_id) = self.tag_to_keys.get(&tag.kind) else {
                continue;
            };
            match &tag.id {
                Some(_) => {
                    if let Some(keys) = by_id.get(&tag.id) {
                        affected.extend(keys.iter().cloned());
                    }
                }
                None => {
                    for keys in by_id.values() {
                        affected.extend(keys.iter().cloned());
                    }
                }
            }
        }
        affected
    }

    /// Drop every association of `cache_key`.
    pub fn remove_key(&mut self, cache_key: &QueryCacheKey) {
        let Some(tags) = self.key_to_tags.remove(cache_key) else {
            return;
        };
        for tag in tags {
            let Some(by_id) = self.tag_to_keys.get_mut(&tag.kind) else {
                continue;
            };
            if let Some(keys) = by_id.get_mut(&tag.id) {
                keys.remove(cache_key);
                if keys.is_empty() {
                    by_id.remove(&tag.id);
                }
            }
            if by_id.is_empty() {
                self.tag_to_keys.remove(&tag.kind);
            }
        }
    }

    /// Clear all mappings.
    pub fn clear(&mut self) {
        self.tag_to_keys.clear();
        self.key_to_tags.clear();
    }

    /// Number of distinct tag types tracked.
    pub fn tag_type_count(&self) -> usize {
        self.tag_to_keys.len()
    }

    /// Number of keys providing at least one tag.
    pub fn key_count(&self) -> usize {
        self.key_to_tags.len()
    }

    /// Ordered copy of the key → tags direction, used for persistence.
    pub fn snapshot(&self) -> BTreeMap<QueryCacheKey, Vec<Tag>> {
        self.key_to_tags
            .iter()
            .map(|(key, tags)| {
                let mut tags: Vec<Tag> = tags.iter().cloned().collect();
                tags.sort();
                (key.clone(), tags)
            })
            .collect()
    }
}
