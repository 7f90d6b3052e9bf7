//! Convert cell values to types that sqlx can bind.

use crate::value::FieldValue;
use crate::geometry::Geometry;
use sqlx::postgres::{PgArguments, Postgres};
use sqlx::query::{Query, QueryScalar};

/// A value that can be bound to a PostgreSQL query.
#[derive(Clone, Debug, PartialEq)]
pub enum PgBindValue {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
    Uuid(uuid::Uuid),
    Date(chrono::NaiveDate),
    Timestamp(chrono::NaiveDateTime),
    TimestampTz(chrono::DateTime<chrono::Utc>),
    Json(serde_json::Value),
    Bytes(Vec<u8>),
    TextArray(Vec<String>),
    I64Array(Vec<i64>),
}

impl PgBindValue {
    pub fn from_field(v: &FieldValue) -> Self {
        match v {
            FieldValue::Null => PgBindValue::Null,
            FieldValue::Bool(b) => PgBindValue::Bool(*b),
            FieldValue::Int(n) => PgBindValue::I64(*n),
            FieldValue::Float(f) => PgBindValue::F64(*f),
            FieldValue::Text(s) => PgBindValue::String(s.clone()),
            FieldValue::Uuid(u) => PgBindValue::Uuid(*u),
            FieldValue::Date(d) => PgBindValue::Date(*d),
            FieldValue::Timestamp(t) => PgBindValue::Timestamp(*t),
            FieldValue::TimestampTz(t) => PgBindValue::TimestampTz(*t),
            FieldValue::Json(j) => PgBindValue::Json(j.clone()),
            FieldValue::Geometry(Geometry::Wkt(s)) => PgBindValue::String(s.clone()),
            FieldValue::Geometry(Geometry::Wkb(b)) => PgBindValue::Bytes(b.clone()),
            FieldValue::TextList(items) => PgBindValue::TextArray(items.clone()),
        }
    }

    pub fn bind<'q>(self, q: Query<'q, Postgres, PgArguments>) -> Query<'q, Postgres, PgArguments> {
        match self {
            // typed through the `$n::type` cast in the statement
            PgBindValue::Null => q.bind(Option::<String>::None),
            PgBindValue::Bool(b) => q.bind(b),
            PgBindValue::I64(n) => q.bind(n),
            PgBindValue::F64(n) => q.bind(n),
            PgBindValue::String(s) => q.bind(s),
            PgBindValue::Uuid(u) => q.bind(u),
            PgBindValue::Date(d) => q.bind(d),
            PgBindValue::Timestamp(t) => q.bind(t),
            PgBindValue::TimestampTz(t) => q.bind(t),
            PgBindValue::Json(v) => q.bind(sqlx::types::Json(v)),
            PgBindValue::Bytes(b) => q.bind(b),
            PgBindValue::TextArray(v) => q.bind(v),
            PgBindValue::I64Array(v) => q.bind(v),
        }
    }

    pub fn bind_scalar<'q, O>(
        self,
        q: QueryScalar<'q, Postgres, O, PgArguments>,
    ) -> QueryScalar<'q, Postgres, O, PgArguments> {
        match self {
            PgBindValue::Null => q.bind(Option::<String>::None),
            PgBindValue::Bool(b) => q.bind(b),
            PgBindValue::I64(n) => q.bind(n),
            PgBindValue::F64(n) => q.bind(n),
            PgBindValue::String(s) => q.bind(s),
            PgBindValue::Uuid(u) => q.bind(u),
            PgBindValue::Date(d) => q.bind(d),
            PgBindValue::Timestamp(t) => q.bind(t),
            PgBindValue::TimestampTz(t) => q.bind(t),
            PgBindValue::Json(v) => q.bind(sqlx::types::Json(v)),
            PgBindValue::Bytes(b) => q.bind(b),
            PgBindValue::TextArray(v) => q.bind(v),
            PgBindValue::I64Array(v) => q.bind(v),
        }
    }
}
