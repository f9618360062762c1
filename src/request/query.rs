//! Query string encoding.
//!
//! Parameters are rendered as `key=value` pairs joined by `&`, with keys visited in
//! sorted order so that the same parameters always produce the same query. Nested maps
//! render as `key[subkey]=value`, lists as repeated `key[]=value`, and booleans as
//! `1` or `0`.

use std::collections::BTreeMap;
use std::fmt;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Characters left unescaped in keys and values.
///
/// Everything else is escaped, including the delimiters `:#[]@!$&'()*+,;=`
/// which carry meaning in the query grammar.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/')
    .remove(b'?');

/// A set of query (or form) parameters, ordered by key.
pub type QueryParameters = BTreeMap<String, QueryValue>;

/// A value which can be encoded into a query string.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    /// A string, escaped as-is.
    String(String),
    /// An integer.
    Integer(i64),
    /// A floating point number.
    Float(f64),
    /// A boolean, rendered as `1` or `0`.
    Bool(bool),
    /// A nested map, rendered as `key[subkey]=value`.
    Map(QueryParameters),
    /// A list, rendered as repeated `key[]=value`.
    List(Vec<QueryValue>),
}

impl fmt::Display for QueryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryValue::String(value) => f.write_str(value),
            QueryValue::Integer(value) => write!(f, "{value}"),
            QueryValue::Float(value) => write!(f, "{value}"),
            QueryValue::Bool(true) => f.write_str("1"),
            QueryValue::Bool(false) => f.write_str("0"),
            QueryValue::Map(_) | QueryValue::List(_) => Ok(()),
        }
    }
}

impl From<&str> for QueryValue {
    fn from(value: &str) -> Self {
        QueryValue::String(value.to_owned())
    }
}

impl From<String> for QueryValue {
    fn from(value: String) -> Self {
        QueryValue::String(value)
    }
}

impl From<i64> for QueryValue {
    fn from(value: i64) -> Self {
        QueryValue::Integer(value)
    }
}

impl From<i32> for QueryValue {
    fn from(value: i32) -> Self {
        QueryValue::Integer(value.into())
    }
}

impl From<u32> for QueryValue {
    fn from(value: u32) -> Self {
        QueryValue::Integer(value.into())
    }
}

impl From<f64> for QueryValue {
    fn from(value: f64) -> Self {
        QueryValue::Float(value)
    }
}

impl From<bool> for QueryValue {
    fn from(value: bool) -> Self {
        QueryValue::Bool(value)
    }
}

impl From<QueryParameters> for QueryValue {
    fn from(value: QueryParameters) -> Self {
        QueryValue::Map(value)
    }
}

impl<T: Into<QueryValue>> From<Vec<T>> for QueryValue {
    fn from(value: Vec<T>) -> Self {
        QueryValue::List(value.into_iter().map(Into::into).collect())
    }
}

/// Percent-escape a single key or value.
pub fn escape(value: &str) -> String {
    utf8_percent_encode(value, QUERY_VALUE).to_string()
}

/// Encode parameters as a query string, without the leading `?`.
pub fn encode(parameters: &QueryParameters) -> String {
    let mut pairs = Vec::new();
    for (key, value) in parameters {
        components(key, value, &mut pairs);
    }
    pairs
        .into_iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn components(key: &str, value: &QueryValue, pairs: &mut Vec<(String, String)>) {
    match value {
        QueryValue::Map(map) => {
            for (sub, value) in map {
                components(&format!("{key}[{sub}]"), value, pairs);
            }
        }
        QueryValue::List(list) => {
            let key = format!("{key}[]");
            for value in list {
                components(&key, value, pairs);
            }
        }
        scalar => pairs.push((escape(key), escape(&scalar.to_string()))),
    }
}

/// Split a query string into unescaped `(key, value)` pairs, in order.
///
/// Pairs without an `=` yield an empty value.
pub fn pairs(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (unescape(key), unescape(value))
        })
        .collect()
}

fn unescape(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}
