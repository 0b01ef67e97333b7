//! Permissive conversions from adapter values to typed property values.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::entity::EntityValue;
use crate::schema::BasicType;
use crate::Value;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// `f` as an integer when it is integral and inside the `i64` range.
fn integral(f: f64) -> Option<i64> {
    let in_range = f >= i64::MIN as f64 && f < i64::MAX as f64;
    (f.is_finite() && f.fract() == 0.0 && in_range).then_some(f as i64)
}

/// Convert `value` to `ty`, or `None` if it cannot be represented.
///
/// Callers handle null and the empty string before getting here.
pub(crate) fn coerce_basic(ty: BasicType, value: &Value) -> Option<EntityValue> {
    match ty {
        BasicType::Boolean => match value {
            Value::Bool(b) => Some(EntityValue::Bool(*b)),
            Value::BigInt(i) => Some(EntityValue::Bool(*i != 0)),
            Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Some(EntityValue::Bool(true)),
                "false" | "0" => Some(EntityValue::Bool(false)),
                _ => None,
            },
            _ => None,
        },
        BasicType::Integer => match value {
            Value::BigInt(i) => Some(EntityValue::Int(*i)),
            Value::Bool(b) => Some(EntityValue::Int(i64::from(*b))),
            Value::Double(f) => integral(*f).map(EntityValue::Int),
            Value::Text(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().and_then(integral))
                    .map(EntityValue::Int)
            }
            _ => None,
        },
        BasicType::Float => match value {
            Value::Double(f) => Some(EntityValue::Float(*f)),
            Value::BigInt(i) => Some(EntityValue::Float(*i as f64)),
            Value::Text(s) => s.trim().parse::<f64>().ok().map(EntityValue::Float),
            _ => None,
        },
        BasicType::String => match value {
            Value::Text(s) => Some(EntityValue::Text(s.clone())),
            Value::BigInt(i) => Some(EntityValue::Text(i.to_string())),
            Value::Double(f) => Some(EntityValue::Text(f.to_string())),
            Value::Bool(b) => Some(EntityValue::Text(if *b { "1" } else { "0" }.to_string())),
            Value::DateTime(dt) => Some(EntityValue::Text(format_datetime(dt))),
            _ => None,
        },
    }
}

/// Accepts a datetime, a record with a "date" field, a string or unix seconds.
pub(crate) fn parse_datetime(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::DateTime(dt) => Some(*dt),
        Value::Record(record) => record.get("date").and_then(parse_datetime),
        Value::Text(s) => parse_datetime_str(s.trim()),
        Value::BigInt(secs) => DateTime::from_timestamp(*secs, 0).map(|dt| dt.naive_utc()),
        _ => None,
    }
}

fn parse_datetime_str(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

pub(crate) fn format_datetime(dt: &NaiveDateTime) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Record;

    #[test]
    fn booleans_from_strings() {
        assert_eq!(
            coerce_basic(BasicType::Boolean, &Value::Text("true".into())),
            Some(EntityValue::Bool(true))
        );
        assert_eq!(
            coerce_basic(BasicType::Boolean, &Value::Text("FALSE".into())),
            Some(EntityValue::Bool(false))
        );
        assert_eq!(
            coerce_basic(BasicType::Boolean, &Value::BigInt(0)),
            Some(EntityValue::Bool(false))
        );
        assert_eq!(coerce_basic(BasicType::Boolean, &Value::Text("maybe".into())), None);
    }

    #[test]
    fn integers() {
        assert_eq!(
            coerce_basic(BasicType::Integer, &Value::Text(" 42 ".into())),
            Some(EntityValue::Int(42))
        );
        assert_eq!(
            coerce_basic(BasicType::Integer, &Value::Double(3.0)),
            Some(EntityValue::Int(3))
        );
        assert_eq!(coerce_basic(BasicType::Integer, &Value::Double(3.5)), None);
        assert_eq!(coerce_basic(BasicType::Integer, &Value::Text("abc".into())), None);
    }

    #[test]
    fn integers_out_of_range_are_rejected() {
        assert_eq!(coerce_basic(BasicType::Integer, &Value::Double(1e20)), None);
        assert_eq!(coerce_basic(BasicType::Integer, &Value::Double(-1e20)), None);
        assert_eq!(coerce_basic(BasicType::Integer, &Value::Text("1e30".into())), None);
        assert_eq!(
            coerce_basic(BasicType::Integer, &Value::Double(i64::MAX as f64)),
            None
        );
        assert_eq!(
            coerce_basic(BasicType::Integer, &Value::Text("1e3".into())),
            Some(EntityValue::Int(1000))
        );
        assert_eq!(
            coerce_basic(BasicType::Integer, &Value::Double(-9.0e15)),
            Some(EntityValue::Int(-9_000_000_000_000_000))
        );
    }

    #[test]
    fn strings_and_floats() {
        assert_eq!(
            coerce_basic(BasicType::String, &Value::BigInt(7)),
            Some(EntityValue::Text("7".into()))
        );
        assert_eq!(
            coerce_basic(BasicType::Float, &Value::Text("2.5".into())),
            Some(EntityValue::Float(2.5))
        );
        assert_eq!(
            coerce_basic(BasicType::String, &Value::Array(vec![])),
            None
        );
    }

    #[test]
    fn datetimes() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap();
        assert_eq!(
            parse_datetime(&Value::Text("2024-03-01 12:30:00".into())),
            Some(expected)
        );
        assert_eq!(
            parse_datetime(&Value::Text("2024-03-01T12:30:00Z".into())),
            Some(expected)
        );
        let nested = Record::new().with("date", "2024-03-01 12:30:00");
        assert_eq!(parse_datetime(&Value::Record(nested)), Some(expected));
        assert_eq!(
            parse_datetime(&Value::Text("2024-03-01".into())),
            expected.date().and_hms_opt(0, 0, 0)
        );
        assert_eq!(parse_datetime(&Value::Text("yesterday".into())), None);
    }
}
