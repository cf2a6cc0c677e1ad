//! Payload values
//!
//! The engine never inspects a payload; it only has to carry it through the
//! codec unchanged.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// An opaque, self-describing value stored with each datapoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<Payload>),
    Map(BTreeMap<String, Payload>),
}

impl Payload {
    /// Build a map payload from key/value pairs
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Payload)>,
    {
        Payload::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Payload::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Payload::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Payload::Float(f) => Some(*f),
            Payload::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Payload::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Null => write!(f, "null"),
            Payload::Bool(b) => write!(f, "{}", b),
            Payload::Int(i) => write!(f, "{}", i),
            Payload::Float(x) => write!(f, "{}", x),
            Payload::String(s) => write!(f, "{:?}", s),
            Payload::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Payload::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Payload::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{:?}:{}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for Payload {
    fn from(v: bool) -> Self {
        Payload::Bool(v)
    }
}

impl From<i64> for Payload {
    fn from(v: i64) -> Self {
        Payload::Int(v)
    }
}

impl From<i32> for Payload {
    fn from(v: i32) -> Self {
        Payload::Int(v as i64)
    }
}

impl From<f64> for Payload {
    fn from(v: f64) -> Self {
        Payload::Float(v)
    }
}

impl From<&str> for Payload {
    fn from(v: &str) -> Self {
        Payload::String(v.to_string())
    }
}

impl From<String> for Payload {
    fn from(v: String) -> Self {
        Payload::String(v)
    }
}

impl From<Vec<Payload>> for Payload {
    fn from(v: Vec<Payload>) -> Self {
        Payload::Array(v)
    }
}

impl From<BTreeMap<String, Payload>> for Payload {
    fn from(v: BTreeMap<String, Payload>) -> Self {
        Payload::Map(v)
    }
}
