//! Structural sharing between successive results.

use std::sync::Arc;

use super::value::{Data, DataMap};

/// Merge `new` into `old`, reusing every subtree of `old` that is unchanged.
///
/// If nothing changed the returned value is `old` itself (same `Arc`), so
/// [`Data::ptr_eq`] holds for the whole tree. Containers of different kinds
/// are not merged; `new` wins.
pub fn copy_with_structural_sharing(old: &Data, new: Data) -> Data {
    match (old, new) {
        (Data::Array(old_items), Data::Array(new_items)) => {
            if Arc::ptr_eq(old_items, &new_items) {
                return old.clone();
            }
            let mut same = old_items.len() == new_items.len();
            let merged: Vec<Data> = Arc::unwrap_or_clone(new_items)
                .into_iter()
                .enumerate()
                .map(|(index, item)| match old_items.get(index) {
                    Some(previous) => {
                        let shared = copy_with_structural_sharing(previous, item);
                        same = same && Data::ptr_eq(previous, &shared);
                        shared
                    }
                    None => item,
                })
                .collect();
            if same {
                old.clone()
            } else {
                Data::Array(Arc::new(merged))
            }
        }
        (Data::Object(old_map), Data::Object(new_map)) => {
            if Arc::ptr_eq(old_map, &new_map) {
                return old.clone();
            }
            let mut same = old_map.len() == new_map.len();
            let merged: DataMap = Arc::unwrap_or_clone(new_map)
                .into_iter()
                .map(|(key, value)| match old_map.get(&key) {
                    Some(previous) => {
                        let shared = copy_with_structural_sharing(previous, value);
                        same = same && Data::ptr_eq(previous, &shared);
                        (key, shared)
                    }
                    None => {
                        same = false;
                        (key, value)
                    }
                })
                .collect();
            if same {
                old.clone()
            } else {
                Data::Object(Arc::new(merged))
            }
        }
        (previous, next) if *previous == next && !matches!(next, Data::Array(_) | Data::Object(_)) => {
            previous.clone()
        }
        (_, next) => next,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_results_keep_the_previous_root() {
        let old = Data::from(json!({"items": [{"id": 1}, {"id": 2}], "total": 2}));
        let new = Data::from(json!({"items": [{"id": 1}, {"id": 2}], "total": 2}));
        let merged = copy_with_structural_sharing(&old, new);
        assert!(Data::ptr_eq(&old, &merged));
    }

    #[test]
    fn unchanged_elements_keep_identity_when_one_changes() {
        let old = Data::from(json!([{"id": 1, "title": "a"}, {"id": 2, "title": "b"}, {"id": 3}]));
        let new = Data::from(json!([{"id": 1, "title": "a"}, {"id": 2, "title": "B"}, {"id": 3}]));
        let merged = copy_with_structural_sharing(&old, new);

        assert!(!Data::ptr_eq(&old, &merged));
        assert!(Data::ptr_eq(old.at(0).unwrap(), merged.at(0).unwrap()));
        assert!(!Data::ptr_eq(old.at(1).unwrap(), merged.at(1).unwrap()));
        assert!(Data::ptr_eq(old.at(2).unwrap(), merged.at(2).unwrap()));
        assert_eq!(merged.at(1).and_then(|p| p.get("title")), Some(&Data::from("B")));
    }

    #[test]
    fn added_keys_produce_a_new_object() {
        let old = Data::from(json!({"a": {"x": 1}}));
        let new = Data::from(json!({"a": {"x": 1}, "b": 2}));
        let merged = copy_with_structural_sharing(&old, new);
        assert!(!Data::ptr_eq(&old, &merged));
        assert!(Data::ptr_eq(old.get("a").unwrap(), merged.get("a").unwrap()));
    }

    #[test]
    fn shrinking_arrays_are_not_shared() {
        let old = Data::from(json!([1, 2, 3]));
        let new = Data::from(json!([1, 2]));
        let merged = copy_with_structural_sharing(&old, new);
        assert_eq!(merged, Data::from(json!([1, 2])));
        assert!(!Data::ptr_eq(&old, &merged));
    }

    #[test]
    fn mismatched_kinds_take_the_new_value() {
        let old = Data::from(json!({"a": 1}));
        let new = Data::from(json!([1]));
        let merged = copy_with_structural_sharing(&old, new.clone());
        assert!(Data::ptr_eq(&new, &merged));
    }
}
