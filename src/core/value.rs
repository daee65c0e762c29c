use indexmap::IndexMap;
use serde_json::Value as Json;
use std::sync::Arc;

/// Key type for compile-time constant arrays
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArrayKey {
    Int(i64),
    Str(Arc<Vec<u8>>),
}

/// Member visibility. Declaration order is significant: a larger value is a
/// narrower visibility, so `child > parent` means the child narrowed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Visibility {
    Public,
    Protected,
    Private,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Protected => "protected",
            Visibility::Private => "private",
        }
    }
}

/// Literal value as it appears in class declarations and property-init
/// vectors. Linked classes are shared across threads, so payloads are
/// `Arc`-backed.
#[derive(Debug, Clone, PartialEq)]
pub enum Val {
    /// No scalar value: the initial value is computed at runtime by an
    /// initializer routine.
    Uninit,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(Arc<Vec<u8>>),
    Array(Arc<IndexMap<ArrayKey, Val>>),
    /// Placeholder written into lazy-init scratch containers for slots an
    /// initializer routine is expected to fill.
    Sentinel,
}

impl Val {
    pub fn string(s: &str) -> Self {
        Val::String(Arc::new(s.as_bytes().to_vec()))
    }

    pub fn is_uninit(&self) -> bool {
        matches!(self, Val::Uninit)
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self, Val::Sentinel)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Val::Uninit => "uninit",
            Val::Null => "null",
            Val::Bool(_) => "bool",
            Val::Int(_) => "int",
            Val::Float(_) => "float",
            Val::String(_) => "string",
            Val::Array(_) => "array",
            Val::Sentinel => "sentinel",
        }
    }

    /// Strict identity for scalar values: same type and same value.
    /// Arrays and placeholders never compare as the same scalar.
    pub fn same_scalar(&self, other: &Val) -> bool {
        match (self, other) {
            (Val::Null, Val::Null) => true,
            (Val::Bool(a), Val::Bool(b)) => a == b,
            (Val::Int(a), Val::Int(b)) => a == b,
            (Val::Float(a), Val::Float(b)) => a == b,
            (Val::String(a), Val::String(b)) => a == b,
            _ => false,
        }
    }

    /// Copy that shares nothing mutable with `self`. Strings are immutable
    /// and stay shared; arrays are rebuilt level by level.
    pub fn deep_copy(&self) -> Val {
        match self {
            Val::Array(arr) => Val::Array(Arc::new(
                arr.iter()
                    .map(|(k, v)| (k.clone(), v.deep_copy()))
                    .collect(),
            )),
            other => other.clone(),
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            Val::Uninit | Val::Sentinel | Val::Null => Json::Null,
            Val::Bool(b) => Json::Bool(*b),
            Val::Int(i) => Json::from(*i),
            Val::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Val::String(s) => Json::String(String::from_utf8_lossy(s).into_owned()),
            Val::Array(arr) => {
                let mut map = serde_json::Map::new();
                for (k, v) in arr.iter() {
                    let key = match k {
                        ArrayKey::Int(i) => i.to_string(),
                        ArrayKey::Str(s) => String::from_utf8_lossy(s).into_owned(),
                    };
                    map.insert(key, v.to_json());
                }
                Json::Object(map)
            }
        }
    }

    pub fn from_json(json: &Json) -> Val {
        match json {
            Json::Null => Val::Null,
            Json::Bool(b) => Val::Bool(*b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Val::Int(i),
                None => Val::Float(n.as_f64().unwrap_or(0.0)),
            },
            Json::String(s) => Val::string(s),
            Json::Array(items) => Val::Array(Arc::new(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (ArrayKey::Int(i as i64), Val::from_json(v)))
                    .collect(),
            )),
            Json::Object(map) => Val::Array(Arc::new(
                map.iter()
                    .map(|(k, v)| {
                        (
                            ArrayKey::Str(Arc::new(k.as_bytes().to_vec())),
                            Val::from_json(v),
                        )
                    })
                    .collect(),
            )),
        }
    }
}
