//! Row values, generic records and bound parameter values
//!
//! # Values
//! [`Value`] is the tagged scalar every backend converts its column data into.
//! It serializes directly to JSON: binary data as Base64, timestamps as ISO
//! 8601 text, non-finite floats as `null`.
//!
//! # Records
//! [`Record`] is an ordered column name to value mapping. Column names are
//! shared between all records of one result set.
//!
//! # Parameters
//! [`NamedParam`] carries a bound value. Values supplied as arbitrary Rust
//! types go through a process-wide type map keyed by [`TypeId`]; a type with
//! no entry is rejected before any connection is opened.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::error::{DbDriveError, Result};
use crate::naming::is_valid_name;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
const TEXT_TIMESTAMP_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S%.f", TIMESTAMP_FORMAT, "%Y-%m-%d"];

/// A typed scalar column value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
    Bytes(Vec<u8>),
}

impl Value {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Borrow text content, if this is a text value
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Short type tag used in diagnostics
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Timestamp(_) => "timestamp",
            Self::Bytes(_) => "bytes",
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Float(f) if f.is_finite() => serializer.serialize_f64(*f),
            Self::Float(_) => serializer.serialize_none(),
            Self::Text(s) => serializer.serialize_str(s),
            Self::Timestamp(t) => serializer.collect_str(&t.format(TIMESTAMP_FORMAT)),
            Self::Bytes(b) => serializer.serialize_str(&general_purpose::STANDARD.encode(b)),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// One fetched row: ordered column name to value mapping
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Record {
    /// Build a record; `values` pairs positionally with `columns`
    #[must_use]
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Build a record from `(column, value)` pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let (columns, values): (Vec<String>, Vec<Value>) =
            pairs.into_iter().map(|(k, v)| (k.into(), v.into())).unzip();
        Self { columns: columns.into(), values }
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Look up a column: exact name first, then ASCII case-insensitive
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        let idx = self
            .columns
            .iter()
            .position(|c| c == column)
            .or_else(|| self.columns.iter().position(|c| c.eq_ignore_ascii_case(column)))?;
        self.values.get(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(String::as_str).zip(self.values.iter())
    }

    fn require(&self, column: &str) -> Result<&Value> {
        self.get(column).ok_or_else(|| {
            DbDriveError::backend("catalog", format!("column '{column}' missing from catalog row"))
        })
    }

    /// Non-null text column
    pub fn text(&self, column: &str) -> Result<String> {
        self.opt_text(column)?.ok_or_else(|| {
            DbDriveError::backend("catalog", format!("column '{column}' is unexpectedly null"))
        })
    }

    /// Nullable text column; numbers and flags are rendered as text
    pub fn opt_text(&self, column: &str) -> Result<Option<String>> {
        Ok(match self.require(column)? {
            Value::Null => None,
            Value::Text(s) => Some(s.clone()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Timestamp(t) => Some(t.format(TIMESTAMP_FORMAT).to_string()),
            other @ Value::Bytes(_) => return Err(mismatch(column, "text", other)),
        })
    }

    /// Nullable integral column; integral floats and numeric text are accepted
    pub fn opt_i64(&self, column: &str) -> Result<Option<i64>> {
        match self.require(column)? {
            Value::Null => Ok(None),
            Value::Int(i) => Ok(Some(*i)),
            #[allow(clippy::cast_possible_truncation)]
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Ok(Some(*f as i64)),
            Value::Text(s) => s
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|_| mismatch(column, "integer", &Value::Text(s.clone()))),
            other => Err(mismatch(column, "integer", other)),
        }
    }

    /// Nullable non-negative count; negative values read as unknown
    pub fn opt_count(&self, column: &str) -> Result<Option<u64>> {
        Ok(self.opt_i64(column)?.and_then(|n| u64::try_from(n).ok()))
    }

    /// Nullable flag: booleans, 0/1, and `YES`/`NO`, `Y`/`N`, `TRUE`/`FALSE`
    pub fn opt_flag(&self, column: &str) -> Result<Option<bool>> {
        match self.require(column)? {
            Value::Null => Ok(None),
            Value::Bool(b) => Ok(Some(*b)),
            Value::Int(i) => Ok(Some(*i != 0)),
            Value::Text(s) => match s.trim().to_ascii_uppercase().as_str() {
                "YES" | "Y" | "TRUE" | "T" | "1" => Ok(Some(true)),
                "NO" | "N" | "FALSE" | "F" | "0" => Ok(Some(false)),
                _ => Err(mismatch(column, "flag", &Value::Text(s.clone()))),
            },
            other => Err(mismatch(column, "flag", other)),
        }
    }

    /// Nullable timestamp; text in common ISO layouts is parsed
    pub fn opt_timestamp(&self, column: &str) -> Result<Option<NaiveDateTime>> {
        match self.require(column)? {
            Value::Null => Ok(None),
            Value::Timestamp(t) => Ok(Some(*t)),
            Value::Text(s) => parse_text_timestamp(s)
                .map(Some)
                .ok_or_else(|| mismatch(column, "timestamp", &Value::Text(s.clone()))),
            other => Err(mismatch(column, "timestamp", other)),
        }
    }
}

fn parse_text_timestamp(s: &str) -> Option<NaiveDateTime> {
    TEXT_TIMESTAMP_FORMATS.iter().find_map(|fmt| {
        NaiveDateTime::parse_from_str(s, fmt)
            .ok()
            .or_else(|| NaiveDate::parse_from_str(s, fmt).ok().map(|d| d.and_time(NaiveTime::MIN)))
    })
}

fn mismatch(column: &str, expected: &str, found: &Value) -> DbDriveError {
    DbDriveError::backend(
        "catalog",
        format!("column '{column}' expected {expected}, found {}", found.kind()),
    )
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (column, value) in self.iter() {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// A value bound to a statement parameter
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
    Bytes(Vec<u8>),
    Uuid(Uuid),
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<NaiveDateTime> for ParamValue {
    fn from(v: NaiveDateTime) -> Self {
        Self::Timestamp(v)
    }
}

impl From<Vec<u8>> for ParamValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<Uuid> for ParamValue {
    fn from(v: Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

type Converter = fn(&dyn Any) -> Option<ParamValue>;

static TYPE_MAP: LazyLock<HashMap<TypeId, Converter>> = LazyLock::new(|| {
    let mut map: HashMap<TypeId, Converter> = HashMap::new();

    // Each type is registered together with its nullable variant.
    macro_rules! register {
        ($($ty:ty => $conv:expr),* $(,)?) => {$(
            map.insert(TypeId::of::<$ty>(), |any| {
                any.downcast_ref::<$ty>().map(|v| ($conv)(v.clone()))
            });
            map.insert(TypeId::of::<Option<$ty>>(), |any| {
                any.downcast_ref::<Option<$ty>>().map(|v| v.clone().map_or(ParamValue::Null, $conv))
            });
        )*};
    }

    register! {
        bool => ParamValue::Bool,
        i8 => |v: i8| ParamValue::Int(i64::from(v)),
        i16 => |v: i16| ParamValue::Int(i64::from(v)),
        i32 => |v: i32| ParamValue::Int(i64::from(v)),
        i64 => ParamValue::Int,
        u8 => |v: u8| ParamValue::Int(i64::from(v)),
        u16 => |v: u16| ParamValue::Int(i64::from(v)),
        u32 => |v: u32| ParamValue::Int(i64::from(v)),
        f32 => |v: f32| ParamValue::Float(f64::from(v)),
        f64 => ParamValue::Float,
        String => ParamValue::Text,
        &'static str => |v: &'static str| ParamValue::Text(v.to_string()),
        NaiveDateTime => ParamValue::Timestamp,
        NaiveDate => |v: NaiveDate| ParamValue::Timestamp(v.and_time(NaiveTime::MIN)),
        DateTime<Utc> => |v: DateTime<Utc>| ParamValue::Timestamp(v.naive_utc()),
        Vec<u8> => ParamValue::Bytes,
        Uuid => ParamValue::Uuid,
        ParamValue => |v: ParamValue| v,
    }

    map
});

/// A named statement parameter
///
/// SQL text refers to it as `:name`.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedParam {
    pub name: String,
    pub value: ParamValue,
}

impl NamedParam {
    /// Bind a value whose type is statically known to be supported
    pub fn new(name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        Self { name: name.into(), value: value.into() }
    }

    /// Bind a value of any type through the runtime type map
    ///
    /// Types without a mapping (for example `u64`) fail with
    /// `UnsupportedParameterType`.
    pub fn bind<T: Any>(name: &str, value: &T) -> Result<Self> {
        Self::bind_dyn(name, value, type_name::<T>())
    }

    /// Type-erased form of [`NamedParam::bind`]
    pub fn bind_dyn(name: &str, value: &dyn Any, type_name: &str) -> Result<Self> {
        validate_param_name(name)?;
        TYPE_MAP
            .get(&Any::type_id(value))
            .and_then(|convert| convert(value))
            .map(|value| Self { name: name.to_string(), value })
            .ok_or_else(|| DbDriveError::unsupported_parameter_type(name, type_name))
    }

    /// Bind a JSON scalar; arrays and objects are unsupported
    pub fn from_json(name: &str, value: &serde_json::Value) -> Result<Self> {
        validate_param_name(name)?;
        let value = match value {
            serde_json::Value::Null => ParamValue::Null,
            serde_json::Value::Bool(b) => ParamValue::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => ParamValue::Int(i),
                None => n.as_f64().map(ParamValue::Float).ok_or_else(|| {
                    DbDriveError::unsupported_parameter_type(name, "json number out of range")
                })?,
            },
            serde_json::Value::String(s) => ParamValue::Text(s.clone()),
            serde_json::Value::Array(_) => {
                return Err(DbDriveError::unsupported_parameter_type(name, "json array"))
            }
            serde_json::Value::Object(_) => {
                return Err(DbDriveError::unsupported_parameter_type(name, "json object"))
            }
        };
        Ok(Self { name: name.to_string(), value })
    }
}

fn validate_param_name(name: &str) -> Result<()> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(DbDriveError::invalid_input(format!("Invalid parameter name '{name}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample_record() -> Record {
        Record::from_pairs([
            ("TABLE_NAME", Value::from("ORDERS")),
            ("NUM_ROWS", Value::Int(10)),
            ("NULLABLE", Value::from("Y")),
            ("LAST_ANALYZED", Value::from("2024-03-01 10:11:12")),
            ("PAYLOAD", Value::Bytes(vec![0xde, 0xad])),
            ("MISSING_STATS", Value::Null),
        ])
    }

    #[test]
    fn test_record_lookup_is_case_insensitive_fallback() {
        let record = sample_record();
        assert_eq!(record.get("TABLE_NAME"), Some(&Value::from("ORDERS")));
        assert_eq!(record.get("table_name"), Some(&Value::from("ORDERS")));
        assert_eq!(record.get("nope"), None);
    }

    #[test]
    fn test_typed_accessors() {
        let record = sample_record();
        assert_eq!(record.text("TABLE_NAME").unwrap(), "ORDERS");
        assert_eq!(record.opt_i64("NUM_ROWS").unwrap(), Some(10));
        assert_eq!(record.opt_count("NUM_ROWS").unwrap(), Some(10));
        assert_eq!(record.opt_flag("NULLABLE").unwrap(), Some(true));
        assert_eq!(record.opt_i64("MISSING_STATS").unwrap(), None);
        let ts = record.opt_timestamp("LAST_ANALYZED").unwrap().unwrap();
        assert_eq!(ts.to_string(), "2024-03-01 10:11:12");
    }

    #[test]
    fn test_accessor_errors_are_backend_errors() {
        let record = sample_record();
        assert!(matches!(record.text("MISSING_STATS"), Err(DbDriveError::Backend { .. })));
        assert!(matches!(record.opt_text("PAYLOAD"), Err(DbDriveError::Backend { .. })));
        assert!(matches!(record.opt_i64("TABLE_NAME"), Err(DbDriveError::Backend { .. })));
        assert!(matches!(record.text("NO_SUCH_COLUMN"), Err(DbDriveError::Backend { .. })));
    }

    #[test]
    fn test_record_serializes_in_column_order() {
        let record = Record::from_pairs([
            ("z", Value::Int(1)),
            ("a", Value::Float(f64::NAN)),
            ("m", Value::Bytes(b"hi".to_vec())),
        ]);
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"z":1,"a":null,"m":"aGk="}"#);
    }

    #[test]
    fn test_timestamp_serialization() {
        let ts = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap().and_hms_opt(3, 4, 5).unwrap();
        assert_eq!(serde_json::to_value(Value::Timestamp(ts)).unwrap(), json!("2024-01-02T03:04:05"));
    }

    #[test]
    fn test_type_map_covers_nullable_variants() {
        assert_eq!(NamedParam::bind("p", &7_i16).unwrap().value, ParamValue::Int(7));
        assert_eq!(NamedParam::bind("p", &Some(7_u32)).unwrap().value, ParamValue::Int(7));
        assert_eq!(NamedParam::bind("p", &None::<i32>).unwrap().value, ParamValue::Null);
        assert_eq!(NamedParam::bind("p", &1.5_f32).unwrap().value, ParamValue::Float(1.5));
        assert_eq!(NamedParam::bind("p", &"x").unwrap().value, ParamValue::Text("x".into()));
        assert_eq!(
            NamedParam::bind("p", &String::from("y")).unwrap().value,
            ParamValue::Text("y".into())
        );
        assert_eq!(NamedParam::bind("p", &Some(true)).unwrap().value, ParamValue::Bool(true));
        assert_eq!(NamedParam::bind("p", &vec![1_u8, 2]).unwrap().value, ParamValue::Bytes(vec![1, 2]));

        let id = Uuid::nil();
        assert_eq!(NamedParam::bind("p", &id).unwrap().value, ParamValue::Uuid(id));

        let day = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap();
        assert_eq!(
            NamedParam::bind("p", &day).unwrap().value,
            ParamValue::Timestamp(day.and_time(NaiveTime::MIN))
        );
    }

    #[test]
    fn test_unmapped_type_is_rejected() {
        let err = NamedParam::bind("big", &7_u64).unwrap_err();
        match err {
            DbDriveError::UnsupportedParameterType { name, type_name } => {
                assert_eq!(name, "big");
                assert_eq!(type_name, "u64");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        #[derive(Debug)]
        struct Custom;
        assert!(NamedParam::bind("c", &Custom).is_err());
    }

    #[test]
    fn test_param_name_is_validated() {
        assert!(matches!(NamedParam::bind("a;b", &1_i32), Err(DbDriveError::InvalidInput(_))));
        assert!(matches!(NamedParam::from_json("", &json!(1)), Err(DbDriveError::InvalidInput(_))));
    }

    #[test]
    fn test_from_json_scalars() {
        assert_eq!(NamedParam::from_json("n", &json!(3)).unwrap().value, ParamValue::Int(3));
        assert_eq!(NamedParam::from_json("n", &json!(2.5)).unwrap().value, ParamValue::Float(2.5));
        assert_eq!(NamedParam::from_json("n", &json!("s")).unwrap().value, ParamValue::Text("s".into()));
        assert_eq!(NamedParam::from_json("n", &json!(null)).unwrap().value, ParamValue::Null);
        assert!(matches!(
            NamedParam::from_json("n", &json!([1, 2])),
            Err(DbDriveError::UnsupportedParameterType { .. })
        ));
        assert!(matches!(
            NamedParam::from_json("n", &json!({"a": 1})),
            Err(DbDriveError::UnsupportedParameterType { .. })
        ));
    }
}
