//! Run context that tags every dispatch.
//!
//! The hub owns one `Context`; the evaluation driver sets keys such as
//! `batch` before each round of probe updates. Meters receive a read-only
//! snapshot.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Context key the driver uses for the batch index.
pub const BATCH_KEY: &str = "batch";

/// A single context value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    Int(i64),
    Str(String),
}

impl fmt::Display for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for ContextValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for ContextValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<usize> for ContextValue {
    fn from(v: usize) -> Self {
        Self::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<&str> for ContextValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// Ordered key/value snapshot, iterated in key order.
///
/// # Examples
///
/// ```
/// use probehub::Context;
///
/// let mut ctx = Context::new();
/// ctx.set("batch", 3);
/// ctx.set("stage", "adversarial");
///
/// assert_eq!(ctx.batch(), Some(3));
/// assert_eq!(ctx.file_key(), "batch_3_stage_adversarial");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context {
    entries: BTreeMap<String, ContextValue>,
}

impl Context {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one key, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ContextValue>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Merge entries, replacing keys that already exist.
    pub fn extend<K, V, I>(&mut self, entries: I)
    where
        K: Into<String>,
        V: Into<ContextValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        for (k, v) in entries {
            self.set(k, v);
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.entries.get(key)
    }

    /// The integer `batch` entry, if set.
    #[must_use]
    pub fn batch(&self) -> Option<i64> {
        match self.entries.get(BATCH_KEY) {
            Some(ContextValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ContextValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// File-name fragment for this context: `key_value` pairs joined by `_`,
    /// in key order. An empty context encodes as `"nocontext"`.
    ///
    /// Keys and string values keep `[A-Za-z0-9-]` and percent-encode every
    /// other byte, so `_` only ever separates tokens and no path separator
    /// or `.` survives. String values that would read as integers carry a
    /// `~` prefix. Distinct contexts therefore never share a fragment.
    #[must_use]
    pub fn file_key(&self) -> String {
        if self.entries.is_empty() {
            return "nocontext".to_string();
        }
        let mut out = String::new();
        for (n, (k, v)) in self.entries.iter().enumerate() {
            if n > 0 {
                out.push('_');
            }
            push_escaped(&mut out, k);
            out.push('_');
            match v {
                ContextValue::Int(i) => out.push_str(&i.to_string()),
                ContextValue::Str(s) => {
                    let mut escaped = String::with_capacity(s.len());
                    push_escaped(&mut escaped, s);
                    if escaped.parse::<i64>().is_ok() {
                        out.push('~');
                    }
                    out.push_str(&escaped);
                }
            }
        }
        out
    }
}

fn push_escaped(out: &mut String, s: &str) {
    for b in s.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' {
            out.push(char::from(b));
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
}

impl<K: Into<String>, V: Into<ContextValue>> FromIterator<(K, V)> for Context {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut ctx = Self::new();
        ctx.extend(iter);
        ctx
    }
}
