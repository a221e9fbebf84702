//! Tag descriptors.
//!
//! Queries provide tags, mutations invalidate them. A tag without an id
//! stands for every entity of its type.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::value::Data;

/// Tag id: numbers and strings never compare equal to each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagId {
    Num(i64),
    Str(String),
}

impl TagId {
    /// Read an id out of a data value (integer or string).
    pub fn from_data(value: &Data) -> Option<Self> {
        match value {
            Data::String(s) => Some(TagId::Str(s.to_string())),
            Data::Number(n) => n.as_i64().map(TagId::Num),
            _ => None,
        }
    }
}

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagId::Num(n) => write!(f, "{n}"),
            TagId::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for TagId {
    fn from(id: i64) -> Self {
        TagId::Num(id)
    }
}

impl From<i32> for TagId {
    fn from(id: i32) -> Self {
        TagId::Num(i64::from(id))
    }
}

impl From<&str> for TagId {
    fn from(id: &str) -> Self {
        TagId::Str(id.to_string())
    }
}

impl From<String> for TagId {
    fn from(id: String) -> Self {
        TagId::Str(id)
    }
}

/// Fully expanded tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<TagId>,
}

impl Tag {
    /// A tag covering every entity of `kind`.
    pub fn of_type(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: None,
        }
    }

    /// A tag for one entity.
    pub fn with_id(kind: impl Into<String>, id: impl Into<TagId>) -> Self {
        Self {
            kind: kind.into(),
            id: Some(id.into()),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}:{id}", self.kind),
            None => f.write_str(&self.kind),
        }
    }
}

/// What endpoints declare: either a bare type name or a full tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagDescription {
    Type(String),
    Tag(Tag),
}

impl TagDescription {
    /// Expand into a tag. A bare type name has no id.
    pub fn expand(&self) -> Tag {
        match self {
            TagDescription::Type(kind) => Tag::of_type(kind.clone()),
            TagDescription::Tag(tag) => tag.clone(),
        }
    }
}

impl From<&str> for TagDescription {
    fn from(kind: &str) -> Self {
        TagDescription::Type(kind.to_string())
    }
}

impl From<String> for TagDescription {
    fn from(kind: String) -> Self {
        TagDescription::Type(kind)
    }
}

impl From<Tag> for TagDescription {
    fn from(tag: Tag) -> Self {
        TagDescription::Tag(tag)
    }
}

/// Inputs available to a dynamic tag description.
#[derive(Debug, Clone, Copy)]
pub struct TagContext<'a> {
    pub result: Option<&'a Data>,
    pub error: Option<&'a Data>,
    pub arg: &'a Data,
    pub meta: Option<&'a Data>,
}

pub type TagsFn = Arc<dyn Fn(&TagContext<'_>) -> Vec<TagDescription> + Send + Sync>;

/// `providesTags` / `invalidatesTags`: a fixed list or a function of the
/// outcome.
#[derive(Clone)]
pub enum ResultDescription {
    Static(Vec<TagDescription>),
    Dynamic(TagsFn),
}

impl ResultDescription {
    pub fn fixed<I, T>(tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TagDescription>,
    {
        ResultDescription::Static(tags.into_iter().map(Into::into).collect())
    }

    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&TagContext<'_>) -> Vec<TagDescription> + Send + Sync + 'static,
    {
        ResultDescription::Dynamic(Arc::new(f))
    }
}

impl<T: Into<TagDescription>> From<Vec<T>> for ResultDescription {
    fn from(tags: Vec<T>) -> Self {
        ResultDescription::fixed(tags)
    }
}

impl fmt::Debug for ResultDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultDescription::Static(tags) => f.debug_tuple("Static").field(tags).finish(),
            ResultDescription::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// Evaluate a description against an outcome and expand every tag.
pub fn calculate_provided_by(
    description: Option<&ResultDescription>,
    context: &TagContext<'_>,
) -> Vec<Tag> {
    match description {
        None => Vec::new(),
        Some(ResultDescription::Static(tags)) => tags.iter().map(TagDescription::expand).collect(),
        Some(ResultDescription::Dynamic(provide)) => provide(context)
            .iter()
            .map(TagDescription::expand)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_strings_expand_without_id() {
        assert_eq!(TagDescription::from("Post").expand(), Tag::of_type("Post"));
    }

    #[test]
    fn dynamic_descriptions_see_the_result() {
        let description = ResultDescription::from_fn(|ctx| {
            let mut tags: Vec<TagDescription> = ctx
                .result
                .and_then(Data::as_array)
                .unwrap_or_default()
                .iter()
                .filter_map(|post| post.get("id").and_then(TagId::from_data))
                .map(|id| Tag::with_id("Post", id).into())
                .collect();
            tags.push(Tag::with_id("Post", "LIST").into());
            tags
        });
        let result = Data::from(json!([{"id": 1}, {"id": 2}]));
        let context = TagContext {
            result: Some(&result),
            error: None,
            arg: &Data::Null,
            meta: None,
        };
        assert_eq!(
            calculate_provided_by(Some(&description), &context),
            vec![
                Tag::with_id("Post", 1),
                Tag::with_id("Post", 2),
                Tag::with_id("Post", "LIST"),
            ]
        );
    }

    #[test]
    fn tags_serialize_like_descriptors() {
        let encoded = serde_json::to_value(Tag::with_id("Post", 1)).unwrap();
        assert_eq!(encoded, json!({"type": "Post", "id": 1}));
        let bare: TagDescription = serde_json::from_value(json!("Post")).unwrap();
        assert_eq!(bare, TagDescription::Type("Post".to_string()));
    }

    #[test]
    fn numeric_and_string_ids_differ() {
        assert_ne!(Tag::with_id("Post", 1), Tag::with_id("Post", "1"));
    }
}
