//! Cache key definitions.
//!
//! Defines `QueryCacheKey` for query entries, `RequestId` for individual
//! requests and `MutationKey` for tracked mutations, plus the argument
//! serializer that derives query keys.

use std::fmt;
use std::fmt::Write as _;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, Weak};

use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::Number;
use uuid::Uuid;

use super::lock::mutex_lock;
use super::value::{Data, DataMap};

const SOURCE: &str = "cache::keys";

/// Largest integer magnitude that survives a round trip through an `f64`.
const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

/// Identifies one endpoint + argument combination: `"{endpoint}({args})"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryCacheKey(String);

impl QueryCacheKey {
    /// Wrap an already serialized key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QueryCacheKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

/// Identifier of a single initiated request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Key of a tracked mutation entry: the fixed cache key if one was given,
/// otherwise the request id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MutationKey(String);

impl MutationKey {
    pub fn fixed(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<RequestId> for MutationKey {
    fn from(id: RequestId) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for MutationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of a custom argument serializer.
#[derive(Debug, Clone, PartialEq)]
pub enum SerializedArgs {
    /// Use this string verbatim as the cache key.
    Key(String),
    /// Serialize this value with the default algorithm instead of the
    /// original arguments.
    Args(Data),
}

/// Custom argument serializer: `(endpoint_name, args) -> SerializedArgs`.
pub type SerializeQueryArgsFn = Arc<dyn Fn(&str, &Data) -> SerializedArgs + Send + Sync>;

/// Deterministic JSON rendering of `args` with object keys sorted.
///
/// Integers outside the exactly representable `f64` range render as
/// `{"$bigint":"<digits>"}` so large ids never collide after a lossy
/// numeric conversion.
pub fn stable_stringify(args: &Data) -> String {
    let mut out = String::new();
    write_stable(args, &mut out);
    out
}

fn write_stable(value: &Data, out: &mut String) {
    match value {
        Data::Null => out.push_str("null"),
        Data::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Data::Number(n) => write_number(n, out),
        Data::String(s) => write_string(s, out),
        Data::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_stable(item, out);
            }
            out.push(']');
        }
        // `DataMap` iterates in key order.
        Data::Object(map) => {
            out.push('{');
            for (index, (key, item)) in map.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_stable(item, out);
            }
            out.push('}');
        }
    }
}

fn write_number(n: &Number, out: &mut String) {
    // Whole floats print like integers so `1.0` and `1` share a key.
    if n.is_f64() {
        let value = n.as_f64().unwrap_or(f64::NAN);
        if value.fract() == 0.0 && value.abs() <= MAX_SAFE_INTEGER as f64 {
            let _ = write!(out, "{}", value as i64);
            return;
        }
    }
    let big = match (n.as_i64(), n.as_u64()) {
        (Some(value), _) => value.unsigned_abs() > MAX_SAFE_INTEGER,
        (None, Some(value)) => value > MAX_SAFE_INTEGER,
        (None, None) => false,
    };
    if big {
        let _ = write!(out, "{{\"$bigint\":\"{n}\"}}");
    } else {
        let _ = write!(out, "{n}");
    }
}

fn write_string(s: &str, out: &mut String) {
    match serde_json::to_string(s) {
        Ok(quoted) => out.push_str(&quoted),
        Err(_) => out.push_str("\"\""),
    }
}

/// Default cache key: `"{endpoint}({stable json})"`.
pub fn default_serialize_query_args(endpoint_name: &str, args: &Data) -> QueryCacheKey {
    QueryCacheKey(format!("{endpoint_name}({})", stable_stringify(args)))
}

struct MemoEntry {
    node: Weak<DataMap>,
    serialized: Arc<str>,
}

/// Per-API serializer with a bounded identity memo.
///
/// Object arguments that are the same allocation as a recently serialized one
/// reuse the cached rendering. The memo holds only weak references, so a
/// freed-and-reused address is detected and recomputed.
pub struct KeySerializer {
    memo: Mutex<LruCache<usize, MemoEntry>>,
}

impl KeySerializer {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            memo: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Derive the cache key for `args`, honoring a custom serializer.
    pub fn cache_key(
        &self,
        endpoint_name: &str,
        args: &Data,
        custom: Option<&SerializeQueryArgsFn>,
    ) -> QueryCacheKey {
        match custom.map(|serialize| serialize(endpoint_name, args)) {
            Some(SerializedArgs::Key(key)) => QueryCacheKey(key),
            Some(SerializedArgs::Args(replacement)) => {
                QueryCacheKey(format!("{endpoint_name}({})", self.serialize(&replacement)))
            }
            None => QueryCacheKey(format!("{endpoint_name}({})", self.serialize(args))),
        }
    }

    /// Stable JSON for `args`, memoized by object identity.
    pub fn serialize(&self, args: &Data) -> Arc<str> {
        let Data::Object(map) = args else {
            return Arc::from(stable_stringify(args));
        };
        let address = Arc::as_ptr(map) as usize;

        let mut memo = mutex_lock(&self.memo, SOURCE, "serialize");
        if let Some(entry) = memo.get(&address) {
            let live = entry
                .node
                .upgrade()
                .is_some_and(|node| Arc::ptr_eq(&node, map));
            if live {
                return entry.serialized.clone();
            }
        }

        let serialized: Arc<str> = Arc::from(stable_stringify(args));
        memo.put(
            address,
            MemoEntry {
                node: Arc::downgrade(map),
                serialized: serialized.clone(),
            },
        );
        serialized
    }

    /// Number of memoized renderings.
    pub fn memo_len(&self) -> usize {
        mutex_lock(&self.memo, SOURCE, "memo_len").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn serializer() -> KeySerializer {
        KeySerializer::new(NonZeroUsize::new(8).unwrap())
    }

    #[test]
    fn key_ignores_property_order() {
        let a = Data::from(json!({"a": 1, "b": {"y": 2, "x": [3, {"q": 1, "p": 2}]}}));
        let b = Data::from(json!({"b": {"x": [3, {"p": 2, "q": 1}], "y": 2}, "a": 1}));
        let keys = serializer();
        assert_eq!(keys.cache_key("getPost", &a, None), keys.cache_key("getPost", &b, None));
        assert_eq!(
            keys.cache_key("getPost", &a, None).as_str(),
            r#"getPost({"a":1,"b":{"x":[3,{"p":2,"q":1}],"y":2}})"#
        );
    }

    #[test]
    fn key_differs_per_endpoint() {
        let args = Data::from(json!({"id": 1}));
        let keys = serializer();
        assert_ne!(
            keys.cache_key("getPost", &args, None),
            keys.cache_key("getUser", &args, None)
        );
    }

    #[test]
    fn primitives_use_plain_json() {
        assert_eq!(default_serialize_query_args("getPost", &Data::from(1)).as_str(), "getPost(1)");
        assert_eq!(
            default_serialize_query_args("search", &Data::from("a\"b")).as_str(),
            r#"search("a\"b")"#
        );
        assert_eq!(default_serialize_query_args("list", &Data::Null).as_str(), "list(null)");
    }

    #[test]
    fn whole_floats_share_the_integer_key() {
        assert_eq!(
            default_serialize_query_args("getPost", &Data::from(1.0_f64)),
            default_serialize_query_args("getPost", &Data::from(1))
        );
        assert_eq!(
            default_serialize_query_args("page", &Data::from(json!({"n": -3.0}))).as_str(),
            r#"page({"n":-3})"#
        );
        assert_eq!(default_serialize_query_args("page", &Data::from(1.5)).as_str(), "page(1.5)");
    }

    #[test]
    fn large_integers_are_tagged() {
        let args = Data::from(json!({"id": 9_007_199_254_740_993u64, "small": 42}));
        assert_eq!(
            stable_stringify(&args),
            r#"{"id":{"$bigint":"9007199254740993"},"small":42}"#
        );
        let negative = Data::from(json!(-9_007_199_254_740_993i64));
        assert_eq!(stable_stringify(&negative), r#"{"$bigint":"-9007199254740993"}"#);
    }

    #[test]
    fn memo_reuses_rendering_for_the_same_object() {
        let keys = serializer();
        let args = Data::from(json!({"page": 2}));
        let first = keys.serialize(&args);
        let second = keys.serialize(&args.clone());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(keys.memo_len(), 1);

        // Equal content in a different allocation still serializes identically.
        let other = Data::from(json!({"page": 2}));
        assert_eq!(keys.serialize(&other), first);
    }

    #[test]
    fn custom_serializer_can_replace_key_or_args() {
        let keys = serializer();
        let drop_client: SerializeQueryArgsFn = Arc::new(|_, args| {
            SerializedArgs::Args(args.get("query").cloned().unwrap_or_default())
        });
        let args = Data::from(json!({"query": {"q": "rust"}, "client": "handle-1"}));
        assert_eq!(
            keys.cache_key("search", &args, Some(&drop_client)).as_str(),
            r#"search({"q":"rust"})"#
        );

        let fixed: SerializeQueryArgsFn = Arc::new(|name, _| SerializedArgs::Key(name.to_string()));
        assert_eq!(keys.cache_key("feed", &args, Some(&fixed)).as_str(), "feed");
    }
}
