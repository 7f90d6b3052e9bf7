//! Typed cell values: coercion from request JSON and rendering to the wire.

use crate::config::ColumnType;
use crate::error::AppError;
use crate::geometry::{Geometry, GeometryDecoder};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Number, Value};

#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Uuid(uuid::Uuid),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Json(Value),
    Geometry(Geometry),
    /// A `text[]` column.
    TextList(Vec<String>),
}

const TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Coerce a request value into the column's storage type. Null is accepted for every type.
    pub fn from_json(column_type: ColumnType, field: &str, value: &Value) -> Result<Self, AppError> {
        if value.is_null() {
            return Ok(FieldValue::Null);
        }
        let mismatch = || {
            AppError::Validation(format!(
                "{} must be a {} value, got {}",
                field,
                column_type.pg_type(),
                value
            ))
        };
        Ok(match column_type {
            ColumnType::Integer | ColumnType::Bigint => {
                let n = value.as_i64().ok_or_else(mismatch)?;
                if column_type == ColumnType::Integer && i32::try_from(n).is_err() {
                    return Err(mismatch());
                }
                FieldValue::Int(n)
            }
            ColumnType::Float => FieldValue::Float(value.as_f64().ok_or_else(mismatch)?),
            ColumnType::Text => FieldValue::Text(value.as_str().ok_or_else(mismatch)?.to_string()),
            ColumnType::Boolean => FieldValue::Bool(value.as_bool().ok_or_else(mismatch)?),
            ColumnType::Uuid => {
                let s = value.as_str().ok_or_else(mismatch)?;
                FieldValue::Uuid(uuid::Uuid::parse_str(s).map_err(|_| mismatch())?)
            }
            ColumnType::Date => {
                let s = value.as_str().ok_or_else(mismatch)?;
                FieldValue::Date(NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| mismatch())?)
            }
            ColumnType::Timestamp => {
                let s = value.as_str().ok_or_else(mismatch)?;
                FieldValue::Timestamp(parse_timestamp(s).ok_or_else(mismatch)?)
            }
            ColumnType::Timestamptz => {
                let s = value.as_str().ok_or_else(mismatch)?;
                let dt = DateTime::parse_from_rfc3339(s).map_err(|_| mismatch())?;
                FieldValue::TimestampTz(dt.with_timezone(&Utc))
            }
            ColumnType::Json => FieldValue::Json(value.clone()),
            ColumnType::Geometry => FieldValue::Geometry(Geometry::from_text(
                value.as_str().ok_or_else(mismatch)?,
            )),
            ColumnType::TextArray => {
                let items = value.as_array().ok_or_else(mismatch)?;
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(item.as_str().ok_or_else(mismatch)?.to_string());
                }
                FieldValue::TextList(out)
            }
        })
    }

    /// Wire form: dates as ISO-8601 strings, lists realized, geometries decoded.
    pub fn to_wire(&self, geometry: &dyn GeometryDecoder) -> Result<Value, AppError> {
        Ok(match self {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Int(n) => Value::Number((*n).into()),
            FieldValue::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Uuid(u) => Value::String(u.to_string()),
            FieldValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            FieldValue::Timestamp(t) => Value::String(t.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            FieldValue::TimestampTz(t) => Value::String(t.to_rfc3339()),
            FieldValue::Json(v) => v.clone(),
            FieldValue::Geometry(g) => geometry.decode(g)?,
            FieldValue::TextList(items) => Value::Array(items.iter().cloned().map(Value::String).collect()),
        })
    }
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::GeoJsonDecoder;
    use serde_json::json;

    #[test]
    fn dates_render_as_iso_strings() {
        let d = FieldValue::from_json(ColumnType::Date, "born", &json!("1815-12-10")).unwrap();
        assert_eq!(d.to_wire(&GeoJsonDecoder).unwrap(), json!("1815-12-10"));

        let t = FieldValue::from_json(ColumnType::Timestamp, "at", &json!("2024-03-01 10:20:30")).unwrap();
        assert_eq!(t.to_wire(&GeoJsonDecoder).unwrap(), json!("2024-03-01T10:20:30"));

        let tz = FieldValue::from_json(ColumnType::Timestamptz, "at", &json!("2024-03-01T10:20:30+02:00")).unwrap();
        assert_eq!(tz.to_wire(&GeoJsonDecoder).unwrap(), json!("2024-03-01T08:20:30+00:00"));
    }

    #[test]
    fn lists_are_realized() {
        let v = FieldValue::from_json(ColumnType::TextArray, "aliases", &json!(["a", "b"])).unwrap();
        assert_eq!(v.to_wire(&GeoJsonDecoder).unwrap(), json!(["a", "b"]));
    }

    #[test]
    fn geometry_decodes_on_the_way_out() {
        let v = FieldValue::from_json(ColumnType::Geometry, "geom", &json!("POINT(1 2)")).unwrap();
        assert_eq!(
            v.to_wire(&GeoJsonDecoder).unwrap(),
            json!({"type": "Point", "coordinates": [1.0, 2.0]})
        );
    }

    #[test]
    fn type_mismatch_is_a_validation_error() {
        let err = FieldValue::from_json(ColumnType::Integer, "age", &json!("ten")).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        let err = FieldValue::from_json(ColumnType::Integer, "age", &json!(1u64 << 40)).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(
            FieldValue::from_json(ColumnType::Bigint, "big", &json!(1u64 << 40)).unwrap(),
            FieldValue::Int(1 << 40)
        );
    }

    #[test]
    fn null_is_accepted_for_any_type() {
        for t in [ColumnType::Date, ColumnType::Integer, ColumnType::Geometry] {
            assert_eq!(FieldValue::from_json(t, "x", &Value::Null).unwrap(), FieldValue::Null);
        }
    }
}
