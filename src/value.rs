//! Dynamic values exchanged between rows, shapes, and statements.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::error::{RowmapError, RowmapResult};

/// A single cell or argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// NULL value
    Null,
    /// Boolean
    Bool(bool),
    /// Integer (every integral width widens to i64)
    Int(i64),
    /// Float
    Float(f64),
    /// String
    String(String),
    /// Binary blob
    Bytes(Vec<u8>),
    /// Timestamp without a zone
    DateTime(NaiveDateTime),
    /// Timestamp pinned to UTC
    DateTimeUtc(DateTime<Utc>),
    /// UUID value
    Uuid(Uuid),
    /// Ordered sequence, expanded into one placeholder per element
    List(Vec<Value>),
    /// Named properties, resolvable by `@name` placeholders
    Record(BTreeMap<String, Value>),
}

/// The storage type of a value, column, or field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Bool,
    Int,
    Float,
    String,
    Bytes,
    DateTime,
    DateTimeUtc,
    Uuid,
    /// An enumerated field; carries its enumerators.
    Enum(&'static EnumInfo),
    /// Type not known (untyped driver column, dynamic target).
    Unknown,
}

/// Enumerators of a [`DbEnum`] type.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct EnumInfo {
    pub name: &'static str,
    pub variants: &'static [(&'static str, i64)],
}

impl EnumInfo {
    /// Look up an enumerator by name, ignoring case.
    pub fn discriminant_of(&self, name: &str) -> Option<i64> {
        self.variants
            .iter()
            .find(|(variant, _)| variant.eq_ignore_ascii_case(name.trim()))
            .map(|(_, d)| *d)
    }

    pub fn name_of(&self, discriminant: i64) -> Option<&'static str> {
        self.variants
            .iter()
            .find(|(_, d)| *d == discriminant)
            .map(|(name, _)| *name)
    }
}

/// A value could not be converted to the requested type.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{0}")]
pub struct ConversionError(pub String);

impl ConversionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    fn cannot_convert(value: &Value, target: ValueType) -> Self {
        Self(format!("cannot convert {} to {}", value.describe(), target))
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Bool => write!(f, "Bool"),
            ValueType::Int => write!(f, "Int"),
            ValueType::Float => write!(f, "Float"),
            ValueType::String => write!(f, "String"),
            ValueType::Bytes => write!(f, "Bytes"),
            ValueType::DateTime => write!(f, "DateTime"),
            ValueType::DateTimeUtc => write!(f, "DateTimeUtc"),
            ValueType::Uuid => write!(f, "Uuid"),
            ValueType::Enum(info) => write!(f, "Enum({})", info.name),
            ValueType::Unknown => write!(f, "Unknown"),
        }
    }
}

impl ValueType {
    pub fn is_timestamp(&self) -> bool {
        matches!(self, ValueType::DateTime | ValueType::DateTimeUtc)
    }

    /// Whether a value of `source` can be stored in `self` without conversion.
    pub fn accepts(&self, source: ValueType) -> bool {
        *self == source || *self == ValueType::Unknown || source == ValueType::Unknown
    }
}

const TEXT_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

fn parse_naive(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    TEXT_TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

impl Value {
    /// Build a record argument from name/value pairs.
    pub fn record<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Record(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Build a list argument from anything convertible to values.
    pub fn list<T: Into<Value>>(items: impl IntoIterator<Item = T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }

    /// Build an argument from any serializable value. Structs and maps
    /// become records, sequences become lists.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> RowmapResult<Self> {
        let json = serde_json::to_value(value)
            .map_err(|e| RowmapError::Conversion(ConversionError::new(e.to_string())))?;
        Ok(Self::from_json(json))
    }

    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Record(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::Float(_) => ValueType::Float,
            Value::String(_) => ValueType::String,
            Value::Bytes(_) => ValueType::Bytes,
            Value::DateTime(_) => ValueType::DateTime,
            Value::DateTimeUtc(_) => ValueType::DateTimeUtc,
            Value::Uuid(_) => ValueType::Uuid,
            Value::Null | Value::List(_) | Value::Record(_) => ValueType::Unknown,
        }
    }

    /// Short type name used in messages and command dumps.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Bytes(_) => "Bytes",
            Value::DateTime(_) => "DateTime",
            Value::DateTimeUtc(_) => "DateTimeUtc",
            Value::Uuid(_) => "Uuid",
            Value::List(_) => "List",
            Value::Record(_) => "Record",
        }
    }

    fn describe(&self) -> String {
        match self {
            Value::String(s) => format!("String '{}'", s),
            Value::Null => "NULL".to_string(),
            other => format!("{} {}", other.type_name(), other),
        }
    }

    /// Look up a named property on a record.
    pub fn property(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Record(map) => map.get(name),
            _ => None,
        }
    }

    /// Generic conversion used when a column type is not directly
    /// assignable to a field type.
    pub fn convert_to(self, target: ValueType) -> Result<Value, ConversionError> {
        if self.is_null() || target.accepts(self.value_type()) {
            return Ok(self);
        }
        let converted = match (&self, target) {
            (Value::Int(i), ValueType::Bool) => Some(Value::Bool(*i != 0)),
            (Value::Float(f), ValueType::Bool) => Some(Value::Bool(*f != 0.0)),
            (Value::String(s), ValueType::Bool) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Some(Value::Bool(true)),
                "false" | "0" | "no" => Some(Value::Bool(false)),
                _ => None,
            },
            (Value::Bool(b), ValueType::Int) => Some(Value::Int(i64::from(*b))),
            (Value::Float(f), ValueType::Int) => {
                let rounded = f.round();
                (rounded >= i64::MIN as f64 && rounded <= i64::MAX as f64)
                    .then(|| Value::Int(rounded as i64))
            }
            (Value::String(s), ValueType::Int) => s.trim().parse().ok().map(Value::Int),
            (Value::Bool(b), ValueType::Float) => Some(Value::Float(if *b { 1.0 } else { 0.0 })),
            (Value::Int(i), ValueType::Float) => Some(Value::Float(*i as f64)),
            (Value::String(s), ValueType::Float) => s.trim().parse().ok().map(Value::Float),
            (Value::String(s), ValueType::Bytes) => Some(Value::Bytes(s.clone().into_bytes())),
            (Value::Bytes(b), ValueType::String) => {
                String::from_utf8(b.clone()).ok().map(Value::String)
            }
            (Value::List(_) | Value::Record(_), ValueType::String) => None,
            (_, ValueType::String) => Some(Value::String(self.to_string())),
            (Value::String(s), ValueType::DateTime) => parse_naive(s).map(Value::DateTime),
            (Value::DateTimeUtc(dt), ValueType::DateTime) => Some(Value::DateTime(dt.naive_utc())),
            (Value::String(s), ValueType::DateTimeUtc) => {
                parse_naive(s).map(|n| Value::DateTimeUtc(Utc.from_utc_datetime(&n)))
            }
            (Value::DateTime(n), ValueType::DateTimeUtc) => {
                Some(Value::DateTimeUtc(Utc.from_utc_datetime(n)))
            }
            (Value::String(s), ValueType::Uuid) => Uuid::parse_str(s.trim()).ok().map(Value::Uuid),
            (Value::Bytes(b), ValueType::Uuid) => Uuid::from_slice(b).ok().map(Value::Uuid),
            (Value::Int(i), ValueType::Enum(_)) => Some(Value::Int(*i)),
            (Value::Bool(b), ValueType::Enum(_)) => Some(Value::Int(i64::from(*b))),
            (Value::String(s), ValueType::Enum(info)) => info.discriminant_of(s).map(Value::Int),
            _ => None,
        };
        converted.ok_or_else(|| ConversionError::cannot_convert(&self, target))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Bytes(b) => {
                write!(f, "0x")?;
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            Value::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.f")),
            Value::DateTimeUtc(dt) => write!(f, "{}", dt.to_rfc3339()),
            Value::Uuid(u) => write!(f, "{}", u),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Record(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// A Rust type that can live in a shape field or be read as a scalar.
///
/// A NULL becomes `Default::default()` for plain types and `None` for
/// `Option<T>`.
pub trait FieldValue: Sized + Send + Sync + 'static {
    fn value_type() -> ValueType;

    fn nullable() -> bool {
        false
    }

    fn to_value(&self) -> Value;

    fn from_value(value: Value) -> Result<Self, ConversionError>;
}

/// Normalize a value to `target`, falling back to generic conversion.
fn coerce(value: Value, target: ValueType) -> Result<Value, ConversionError> {
    if value.value_type() == target {
        Ok(value)
    } else {
        value.convert_to(target)
    }
}

impl FieldValue for bool {
    fn value_type() -> ValueType {
        ValueType::Bool
    }

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match coerce(value, ValueType::Bool)? {
            Value::Null => Ok(false),
            Value::Bool(b) => Ok(b),
            other => Err(ConversionError::cannot_convert(&other, ValueType::Bool)),
        }
    }
}

macro_rules! impl_integral_field_value {
    ($($ty:ty),*) => {
        $(
            impl FieldValue for $ty {
                fn value_type() -> ValueType {
                    ValueType::Int
                }

                fn to_value(&self) -> Value {
                    Value::Int(i64::from(*self))
                }

                fn from_value(value: Value) -> Result<Self, ConversionError> {
                    match coerce(value, ValueType::Int)? {
                        Value::Null => Ok(0),
                        Value::Int(i) => <$ty>::try_from(i).map_err(|_| {
                            ConversionError::new(format!(
                                "{} is out of range for {}",
                                i,
                                stringify!($ty)
                            ))
                        }),
                        other => Err(ConversionError::cannot_convert(&other, ValueType::Int)),
                    }
                }
            }
        )*
    };
}

impl_integral_field_value!(i8, i16, i32, i64, u8, u16, u32);

impl FieldValue for f64 {
    fn value_type() -> ValueType {
        ValueType::Float
    }

    fn to_value(&self) -> Value {
        Value::Float(*self)
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match coerce(value, ValueType::Float)? {
            Value::Null => Ok(0.0),
            Value::Float(f) => Ok(f),
            other => Err(ConversionError::cannot_convert(&other, ValueType::Float)),
        }
    }
}

impl FieldValue for f32 {
    fn value_type() -> ValueType {
        ValueType::Float
    }

    fn to_value(&self) -> Value {
        Value::Float(f64::from(*self))
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        f64::from_value(value).map(|f| f as f32)
    }
}

impl FieldValue for String {
    fn value_type() -> ValueType {
        ValueType::String
    }

    fn to_value(&self) -> Value {
        Value::String(self.clone())
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match coerce(value, ValueType::String)? {
            Value::Null => Ok(String::new()),
            Value::String(s) => Ok(s),
            other => Err(ConversionError::cannot_convert(&other, ValueType::String)),
        }
    }
}

impl FieldValue for Vec<u8> {
    fn value_type() -> ValueType {
        ValueType::Bytes
    }

    fn to_value(&self) -> Value {
        Value::Bytes(self.clone())
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match coerce(value, ValueType::Bytes)? {
            Value::Null => Ok(Vec::new()),
            Value::Bytes(b) => Ok(b),
            other => Err(ConversionError::cannot_convert(&other, ValueType::Bytes)),
        }
    }
}

impl FieldValue for NaiveDateTime {
    fn value_type() -> ValueType {
        ValueType::DateTime
    }

    fn to_value(&self) -> Value {
        Value::DateTime(*self)
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match coerce(value, ValueType::DateTime)? {
            Value::Null => Ok(NaiveDateTime::default()),
            Value::DateTime(dt) => Ok(dt),
            other => Err(ConversionError::cannot_convert(&other, ValueType::DateTime)),
        }
    }
}

impl FieldValue for DateTime<Utc> {
    fn value_type() -> ValueType {
        ValueType::DateTimeUtc
    }

    fn to_value(&self) -> Value {
        Value::DateTimeUtc(*self)
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match coerce(value, ValueType::DateTimeUtc)? {
            Value::Null => Ok(DateTime::<Utc>::default()),
            Value::DateTimeUtc(dt) => Ok(dt),
            other => Err(ConversionError::cannot_convert(&other, ValueType::DateTimeUtc)),
        }
    }
}

impl FieldValue for Uuid {
    fn value_type() -> ValueType {
        ValueType::Uuid
    }

    fn to_value(&self) -> Value {
        Value::Uuid(*self)
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match coerce(value, ValueType::Uuid)? {
            Value::Null => Ok(Uuid::nil()),
            Value::Uuid(u) => Ok(u),
            other => Err(ConversionError::cannot_convert(&other, ValueType::Uuid)),
        }
    }
}

impl<T: FieldValue> FieldValue for Option<T> {
    fn value_type() -> ValueType {
        T::value_type()
    }

    fn nullable() -> bool {
        true
    }

    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

/// An enumerated type stored as an integral discriminant.
///
/// ```
/// use rowmap::value::{DbEnum, EnumInfo};
///
/// #[derive(Debug, Default, Clone, Copy, PartialEq)]
/// enum Status {
///     #[default]
///     Open,
///     Closed,
/// }
///
/// impl DbEnum for Status {
///     const INFO: &'static EnumInfo = &EnumInfo {
///         name: "Status",
///         variants: &[("Open", 0), ("Closed", 1)],
///     };
///
///     fn from_discriminant(d: i64) -> Option<Self> {
///         match d {
///             0 => Some(Status::Open),
///             1 => Some(Status::Closed),
///             _ => None,
///         }
///     }
///
///     fn discriminant(&self) -> i64 {
///         *self as i64
///     }
/// }
///
/// assert_eq!(Status::INFO.discriminant_of("closed"), Some(1));
/// ```
pub trait DbEnum: Sized + Send + Sync + 'static {
    const INFO: &'static EnumInfo;

    fn from_discriminant(discriminant: i64) -> Option<Self>;

    fn discriminant(&self) -> i64;
}

pub(crate) fn enum_from_value<E: DbEnum>(value: Value) -> Result<E, ConversionError> {
    match value.convert_to(ValueType::Enum(E::INFO))? {
        Value::Int(d) => E::from_discriminant(d).ok_or_else(|| {
            ConversionError::new(format!("{} is not a defined value of {}", d, E::INFO.name))
        }),
        other => Err(ConversionError::cannot_convert(&other, ValueType::Enum(E::INFO))),
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::DateTimeUtc(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
