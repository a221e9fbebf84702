//! Path-based patches over [`Data`] trees.
//!
//! `update_query_data` records the difference between the cached value and
//! the recipe's output as a patch list, together with the inverse list used
//! to roll an optimistic update back.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::value::Data;

/// One step of a patch path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Key(String),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Index(index) => write!(f, "{index}"),
            PathSegment::Key(key) => f.write_str(key),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

/// A single edit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Patch {
    Add { path: Vec<PathSegment>, value: Data },
    Replace { path: Vec<PathSegment>, value: Data },
    Remove { path: Vec<PathSegment> },
}

impl Patch {
    pub fn path(&self) -> &[PathSegment] {
        match self {
            Patch::Add { path, .. } | Patch::Replace { path, .. } | Patch::Remove { path } => path,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("patch path `{path}` does not exist")]
    MissingPath { path: String },
    #[error("patch path `{path}` does not address a container")]
    NotAContainer { path: String },
}

impl PatchError {
    fn missing(path: &[PathSegment]) -> Self {
        Self::MissingPath {
            path: render_path(path),
        }
    }

    fn not_container(path: &[PathSegment]) -> Self {
        Self::NotAContainer {
            path: render_path(path),
        }
    }
}

fn render_path(path: &[PathSegment]) -> String {
    let mut out = String::new();
    for segment in path {
        out.push('/');
        out.push_str(&segment.to_string());
    }
    out
}

/// Compute the patches that turn `old` into `new`.
pub fn diff(old: &Data, new: &Data) -> Vec<Patch> {
    let mut patches = Vec::new();
    diff_into(old, new, &mut Vec::new(), &mut patches);
    patches
}

fn diff_into(old: &Data, new: &Data, path: &mut Vec<PathSegment>, out: &mut Vec<Patch>) {
    if Data::ptr_eq(old, new) {
        return;
    }
    match (old, new) {
        (Data::Object(before), Data::Object(after)) => {
            for key in before.keys().filter(|key| !after.contains_key(*key)) {
                path.push(PathSegment::Key(key.clone()));
                out.push(Patch::Remove { path: path.clone() });
                path.pop();
            }
            for (key, value) in after.iter() {
                path.push(PathSegment::Key(key.clone()));
                match before.get(key) {
                    Some(previous) => diff_into(previous, value, path, out),
                    None => out.push(Patch::Add {
                        path: path.clone(),
                        value: value.clone(),
                    }),
                }
                path.pop();
            }
        }
        (Data::Array(before), Data::Array(after)) => {
            let common = before.len().min(after.len());
            for index in 0..common {
                path.push(PathSegment::Index(index));
                diff_into(&before[index], &after[index], path, out);
                path.pop();
            }
            for (index, value) in after.iter().enumerate().skip(common) {
                path.push(PathSegment::Index(index));
                out.push(Patch::Add {
                    path: path.clone(),
                    value: value.clone(),
                });
                path.pop();
            }
            for index in (common..before.len()).rev() {
                path.push(PathSegment::Index(index));
                out.push(Patch::Remove { path: path.clone() });
                path.pop();
            }
        }
        _ if old == new => {}
        _ => out.push(Patch::Replace {
            path: path.clone(),
            value: new.clone(),
        }),
    }
}

/// Apply `patches` in order, returning the patched value.
///
/// Untouched subtrees keep their identity.
pub fn apply(value: &Data, patches: &[Patch]) -> Result<Data, PatchError> {
    let mut current = value.clone();
    for patch in patches {
        apply_one(&mut current, patch)?;
    }
    Ok(current)
}

fn apply_one(root: &mut Data, patch: &Patch) -> Result<(), PatchError> {
    let path = patch.path();
    let Some((last, parents)) = path.split_last() else {
        match patch {
            Patch::Add { value, .. } | Patch::Replace { value, .. } => *root = value.clone(),
            Patch::Remove { .. } => *root = Data::Null,
        }
        return Ok(());
    };

    let mut target = root;
    for (depth, segment) in parents.iter().enumerate() {
        let prefix = &path[..=depth];
        let next = match (target, segment) {
            (Data::Object(map), PathSegment::Key(key)) => Arc::make_mut(map).get_mut(key),
            (Data::Array(items), PathSegment::Index(index)) => {
                Arc::make_mut(items).get_mut(*index)
            }
            _ => return Err(PatchError::not_container(prefix)),
        };
        target = next.ok_or_else(|| PatchError::missing(prefix))?;
    }

    match (target, last) {
        (Data::Object(map), PathSegment::Key(key)) => {
            let map = Arc::make_mut(map);
            match patch {
                Patch::Add { value, .. } | Patch::Replace { value, .. } => {
                    map.insert(key.clone(), value.clone());
                    Ok(())
                }
                Patch::Remove { .. } => map
                    .remove(key)
                    .map(|_| ())
                    .ok_or_else(|| PatchError::missing(path)),
            }
        }
        (Data::Array(items), PathSegment::Index(index)) => {
            let items = Arc::make_mut(items);
            let index = *index;
            match patch {
                Patch::Add { value, .. } if index <= items.len() => {
                    items.insert(index, value.clone());
                    Ok(())
                }
                Patch::Replace { value, .. } if index < items.len() => {
                    items[index] = value.clone();
                    Ok(())
                }
                Patch::Remove { .. } if index < items.len() => {
                    items.remove(index);
                    Ok(())
                }
                _ => Err(PatchError::missing(path)),
            }
        }
        _ => Err(PatchError::not_container(path)),
    }
}
