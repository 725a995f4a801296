//! Protobuf payloads of the built-in services.

use prost::Message;

use gleam_pool::SqlValue;

/// A SQL parameter or column value. All fields unset means `NULL`.
#[derive(Clone, PartialEq, Message)]
pub struct SqlParam {
    /// Integer value.
    #[prost(sint64, optional, tag = "1")]
    pub integer: Option<i64>,
    /// Floating-point value.
    #[prost(double, optional, tag = "2")]
    pub real: Option<f64>,
    /// Text value.
    #[prost(string, optional, tag = "3")]
    pub text: Option<String>,
    /// Blob value.
    #[prost(bytes = "vec", optional, tag = "4")]
    pub blob: Option<Vec<u8>>,
}

/// `db.execute` / `db.query` request.
#[derive(Clone, PartialEq, Message)]
pub struct SqlRequest {
    /// Statement text with `?` placeholders.
    #[prost(string, tag = "1")]
    pub sql: String,
    /// Positional parameters.
    #[prost(message, repeated, tag = "2")]
    pub params: Vec<SqlParam>,
}

/// `db.execute` reply.
#[derive(Clone, PartialEq, Message)]
pub struct SqlExecuteReply {
    /// Rows changed by the statement.
    #[prost(uint64, tag = "1")]
    pub rows_affected: u64,
}

/// One result row.
#[derive(Clone, PartialEq, Message)]
pub struct SqlRow {
    /// Values aligned with the reply's columns.
    #[prost(message, repeated, tag = "1")]
    pub values: Vec<SqlParam>,
}

/// `db.query` reply.
#[derive(Clone, PartialEq, Message)]
pub struct SqlQueryReply {
    /// Column names.
    #[prost(string, repeated, tag = "1")]
    pub columns: Vec<String>,
    /// Result rows.
    #[prost(message, repeated, tag = "2")]
    pub rows: Vec<SqlRow>,
}

/// `cache.get` / `cache.delete` request.
#[derive(Clone, PartialEq, Message)]
pub struct CacheKey {
    /// Entry key.
    #[prost(string, tag = "1")]
    pub key: String,
}

/// `cache.get` reply; `value` unset on a miss.
#[derive(Clone, PartialEq, Message)]
pub struct CacheGetReply {
    /// Stored bytes.
    #[prost(bytes = "vec", optional, tag = "1")]
    pub value: Option<Vec<u8>>,
}

/// `cache.set` request.
#[derive(Clone, PartialEq, Message)]
pub struct CacheSetRequest {
    /// Entry key.
    #[prost(string, tag = "1")]
    pub key: String,
    /// Bytes to store.
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
    /// Time to live; unset or zero uses the cache default.
    #[prost(uint64, optional, tag = "3")]
    pub ttl_ms: Option<u64>,
}

/// `cache.delete` reply.
#[derive(Clone, PartialEq, Message)]
pub struct CacheDeleteReply {
    /// Whether an entry was removed.
    #[prost(bool, tag = "1")]
    pub deleted: bool,
}

/// `session.get_attribute` request.
#[derive(Clone, PartialEq, Message)]
pub struct AttributeKey {
    /// Attribute name.
    #[prost(string, tag = "1")]
    pub key: String,
}

/// `session.set_attribute` request.
#[derive(Clone, PartialEq, Message)]
pub struct SetAttributeRequest {
    /// Attribute name.
    #[prost(string, tag = "1")]
    pub key: String,
    /// JSON-encoded value.
    #[prost(string, tag = "2")]
    pub value_json: String,
}

/// Attribute value as JSON; unset when absent. Also the previous value
/// returned by `set_attribute`.
#[derive(Clone, PartialEq, Message)]
pub struct AttributeValue {
    /// JSON-encoded value.
    #[prost(string, optional, tag = "1")]
    pub value_json: Option<String>,
}

/// Empty reply.
#[derive(Clone, PartialEq, Message)]
pub struct Empty {}

impl From<SqlParam> for SqlValue {
    fn from(p: SqlParam) -> Self {
        if let Some(i) = p.integer {
            Self::Integer(i)
        } else if let Some(f) = p.real {
            Self::Real(f)
        } else if let Some(s) = p.text {
            Self::Text(s)
        } else if let Some(b) = p.blob {
            Self::Blob(b)
        } else {
            Self::Null
        }
    }
}

impl From<SqlValue> for SqlParam {
    fn from(v: SqlValue) -> Self {
        let mut p = Self::default();
        match v {
            SqlValue::Null => {}
            SqlValue::Integer(i) => p.integer = Some(i),
            SqlValue::Real(f) => p.real = Some(f),
            SqlValue::Text(s) => p.text = Some(s),
            SqlValue::Blob(b) => p.blob = Some(b),
        }
        p
    }
}

impl SqlParam {
    /// Integer parameter.
    pub fn from_integer(i: i64) -> Self {
        SqlValue::Integer(i).into()
    }

    /// Text parameter.
    pub fn from_text(s: impl Into<String>) -> Self {
        SqlValue::Text(s.into()).into()
    }

    /// `NULL` parameter.
    pub fn null() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_param_is_null() {
        assert_eq!(SqlValue::from(SqlParam::null()), SqlValue::Null);
    }

    #[test]
    fn params_map_to_values() {
        assert_eq!(SqlValue::from(SqlParam::from_integer(-4)), SqlValue::Integer(-4));
        assert_eq!(SqlValue::from(SqlParam::from_text("x")), SqlValue::Text("x".into()));
        let blob = SqlParam::from(SqlValue::Blob(vec![1, 2]));
        assert_eq!(blob.blob.as_deref(), Some(&[1u8, 2][..]));
    }
}
