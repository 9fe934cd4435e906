//! Scalar and column types shared by routing, merging and response decoding.

use std::fmt;
use std::str::FromStr;

use serde::ser::{SerializeSeq, SerializeStruct};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::error::{CoordError, Result};

/// Scalar type names declared by the search engine in result headers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float,
    Time,
    ShortText,
    Text,
    LongText,
    TokyoGeoPoint,
    Wgs84GeoPoint,
}

impl DataType {
    pub fn name(self) -> &'static str {
        match self {
            DataType::Bool => "Bool",
            DataType::Int8 => "Int8",
            DataType::Int16 => "Int16",
            DataType::Int32 => "Int32",
            DataType::Int64 => "Int64",
            DataType::UInt8 => "UInt8",
            DataType::UInt16 => "UInt16",
            DataType::UInt32 => "UInt32",
            DataType::UInt64 => "UInt64",
            DataType::Float => "Float",
            DataType::Time => "Time",
            DataType::ShortText => "ShortText",
            DataType::Text => "Text",
            DataType::LongText => "LongText",
            DataType::TokyoGeoPoint => "TokyoGeoPoint",
            DataType::Wgs84GeoPoint => "WGS84GeoPoint",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        let data_type = match name {
            "Bool" => DataType::Bool,
            "Int8" => DataType::Int8,
            "Int16" => DataType::Int16,
            "Int32" => DataType::Int32,
            "Int64" => DataType::Int64,
            "UInt8" => DataType::UInt8,
            "UInt16" => DataType::UInt16,
            "UInt32" => DataType::UInt32,
            "UInt64" => DataType::UInt64,
            "Float" => DataType::Float,
            "Time" => DataType::Time,
            "ShortText" => DataType::ShortText,
            "Text" => DataType::Text,
            "LongText" => DataType::LongText,
            "TokyoGeoPoint" => DataType::TokyoGeoPoint,
            "WGS84GeoPoint" => DataType::Wgs84GeoPoint,
            other => return Err(CoordError::UnsupportedType(other.to_string())),
        };
        Ok(data_type)
    }

    pub fn is_text(self) -> bool {
        matches!(
            self,
            DataType::ShortText | DataType::Text | DataType::LongText
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataType {
    type Err = CoordError;

    fn from_str(s: &str) -> Result<Self> {
        DataType::from_name(s)
    }
}

impl Serialize for DataType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// Geographic point in integer milliseconds, written `"<lat>x<lng>"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GeoPoint {
    pub latitude: i32,
    pub longitude: i32,
}

impl GeoPoint {
    pub fn new(latitude: i32, longitude: i32) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

impl FromStr for GeoPoint {
    type Err = CoordError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || CoordError::InvalidArgument(format!("invalid geo point: {s:?}"));
        let (lat, lng) = s.split_once('x').ok_or_else(invalid)?;
        let latitude = lat.trim().parse().map_err(|_| invalid())?;
        let longitude = lng.trim().parse().map_err(|_| invalid())?;
        Ok(GeoPoint::new(latitude, longitude))
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.latitude, self.longitude)
    }
}

impl Serialize for GeoPoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One value of a record batch handed to the typed load APIs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Vector(Vec<Scalar>),
}

impl Scalar {
    pub fn to_json(&self) -> Value {
        match self {
            Scalar::Null => Value::Null,
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::Int(i) => Value::from(*i),
            Scalar::Float(f) => Value::from(*f),
            Scalar::Text(s) => Value::String(s.clone()),
            Scalar::Vector(items) => Value::Array(items.iter().map(Scalar::to_json).collect()),
        }
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Bool(b)
    }
}

impl From<i64> for Scalar {
    fn from(i: i64) -> Self {
        Scalar::Int(i)
    }
}

impl From<f64> for Scalar {
    fn from(f: f64) -> Self {
        Scalar::Float(f)
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Text(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::Text(s)
    }
}

/// Homogeneously typed values of one result column.
///
/// All text types share `Text`; both geo-point types share `GeoPoint`.
/// `Time` holds microseconds since the epoch.
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnValues {
    Bool(Vec<bool>),
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    UInt8(Vec<u8>),
    UInt16(Vec<u16>),
    UInt32(Vec<u32>),
    UInt64(Vec<u64>),
    Float(Vec<f64>),
    Time(Vec<i64>),
    Text(Vec<String>),
    GeoPoint(Vec<GeoPoint>),
}

macro_rules! push_int {
    ($vec:expr, $ty:ty, $value:expr, $data_type:expr) => {{
        let parsed = $value
            .as_i64()
            .and_then(|v| <$ty>::try_from(v).ok())
            .or_else(|| $value.as_u64().and_then(|v| <$ty>::try_from(v).ok()));
        match parsed {
            Some(parsed) => $vec.push(parsed),
            None => return Err(mismatch($data_type, $value)),
        }
    }};
}

fn mismatch(data_type: DataType, value: &Value) -> CoordError {
    CoordError::UnsupportedType(format!("{value} is not a {data_type} value"))
}

/// Seconds (possibly fractional) to microseconds.
pub fn seconds_to_micros(seconds: f64) -> i64 {
    (seconds * 1e6).round() as i64
}

pub fn micros_to_seconds(micros: i64) -> f64 {
    micros as f64 / 1e6
}

impl ColumnValues {
    pub fn with_capacity(data_type: DataType, capacity: usize) -> Self {
        match data_type {
            DataType::Bool => ColumnValues::Bool(Vec::with_capacity(capacity)),
            DataType::Int8 => ColumnValues::Int8(Vec::with_capacity(capacity)),
            DataType::Int16 => ColumnValues::Int16(Vec::with_capacity(capacity)),
            DataType::Int32 => ColumnValues::Int32(Vec::with_capacity(capacity)),
            DataType::Int64 => ColumnValues::Int64(Vec::with_capacity(capacity)),
            DataType::UInt8 => ColumnValues::UInt8(Vec::with_capacity(capacity)),
            DataType::UInt16 => ColumnValues::UInt16(Vec::with_capacity(capacity)),
            DataType::UInt32 => ColumnValues::UInt32(Vec::with_capacity(capacity)),
            DataType::UInt64 => ColumnValues::UInt64(Vec::with_capacity(capacity)),
            DataType::Float => ColumnValues::Float(Vec::with_capacity(capacity)),
            DataType::Time => ColumnValues::Time(Vec::with_capacity(capacity)),
            DataType::ShortText | DataType::Text | DataType::LongText => {
                ColumnValues::Text(Vec::with_capacity(capacity))
            }
            DataType::TokyoGeoPoint | DataType::Wgs84GeoPoint => {
                ColumnValues::GeoPoint(Vec::with_capacity(capacity))
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnValues::Bool(v) => v.len(),
            ColumnValues::Int8(v) => v.len(),
            ColumnValues::Int16(v) => v.len(),
            ColumnValues::Int32(v) => v.len(),
            ColumnValues::Int64(v) => v.len(),
            ColumnValues::UInt8(v) => v.len(),
            ColumnValues::UInt16(v) => v.len(),
            ColumnValues::UInt32(v) => v.len(),
            ColumnValues::UInt64(v) => v.len(),
            ColumnValues::Float(v) => v.len(),
            ColumnValues::Time(v) => v.len(),
            ColumnValues::Text(v) => v.len(),
            ColumnValues::GeoPoint(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends one JSON-encoded engine value declared as `data_type`.
    pub fn push_json(&mut self, data_type: DataType, value: &Value) -> Result<()> {
        match self {
            ColumnValues::Bool(v) => match value.as_bool() {
                Some(b) => v.push(b),
                None => return Err(mismatch(data_type, value)),
            },
            ColumnValues::Int8(v) => push_int!(v, i8, value, data_type),
            ColumnValues::Int16(v) => push_int!(v, i16, value, data_type),
            ColumnValues::Int32(v) => push_int!(v, i32, value, data_type),
            ColumnValues::Int64(v) => push_int!(v, i64, value, data_type),
            ColumnValues::UInt8(v) => push_int!(v, u8, value, data_type),
            ColumnValues::UInt16(v) => push_int!(v, u16, value, data_type),
            ColumnValues::UInt32(v) => push_int!(v, u32, value, data_type),
            ColumnValues::UInt64(v) => push_int!(v, u64, value, data_type),
            ColumnValues::Float(v) => match value.as_f64() {
                Some(f) => v.push(f),
                None => return Err(mismatch(data_type, value)),
            },
            ColumnValues::Time(v) => match value.as_f64() {
                Some(seconds) => v.push(seconds_to_micros(seconds)),
                None => return Err(mismatch(data_type, value)),
            },
            ColumnValues::Text(v) => match value.as_str() {
                Some(s) => v.push(s.to_string()),
                None => return Err(mismatch(data_type, value)),
            },
            ColumnValues::GeoPoint(v) => match value.as_str() {
                Some(s) => v.push(s.parse()?),
                None => return Err(mismatch(data_type, value)),
            },
        }
        Ok(())
    }

    /// Concatenates `other` onto `self`. Both must hold the same variant.
    pub fn append(&mut self, other: ColumnValues) -> Result<()> {
        match (self, other) {
            (ColumnValues::Bool(a), ColumnValues::Bool(b)) => a.extend(b),
            (ColumnValues::Int8(a), ColumnValues::Int8(b)) => a.extend(b),
            (ColumnValues::Int16(a), ColumnValues::Int16(b)) => a.extend(b),
            (ColumnValues::Int32(a), ColumnValues::Int32(b)) => a.extend(b),
            (ColumnValues::Int64(a), ColumnValues::Int64(b)) => a.extend(b),
            (ColumnValues::UInt8(a), ColumnValues::UInt8(b)) => a.extend(b),
            (ColumnValues::UInt16(a), ColumnValues::UInt16(b)) => a.extend(b),
            (ColumnValues::UInt32(a), ColumnValues::UInt32(b)) => a.extend(b),
            (ColumnValues::UInt64(a), ColumnValues::UInt64(b)) => a.extend(b),
            (ColumnValues::Float(a), ColumnValues::Float(b)) => a.extend(b),
            (ColumnValues::Time(a), ColumnValues::Time(b)) => a.extend(b),
            (ColumnValues::Text(a), ColumnValues::Text(b)) => a.extend(b),
            (ColumnValues::GeoPoint(a), ColumnValues::GeoPoint(b)) => a.extend(b),
            (a, b) => {
                return Err(CoordError::SchemaMismatch(format!(
                    "cannot concatenate {} values onto {} values",
                    b.kind(),
                    a.kind()
                )))
            }
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        match self {
            ColumnValues::Bool(_) => "Bool",
            ColumnValues::Int8(_) => "Int8",
            ColumnValues::Int16(_) => "Int16",
            ColumnValues::Int32(_) => "Int32",
            ColumnValues::Int64(_) => "Int64",
            ColumnValues::UInt8(_) => "UInt8",
            ColumnValues::UInt16(_) => "UInt16",
            ColumnValues::UInt32(_) => "UInt32",
            ColumnValues::UInt64(_) => "UInt64",
            ColumnValues::Float(_) => "Float",
            ColumnValues::Time(_) => "Time",
            ColumnValues::Text(_) => "Text",
            ColumnValues::GeoPoint(_) => "GeoPoint",
        }
    }

    /// Integer value at `index`, for integer and time columns.
    pub fn as_i64(&self, index: usize) -> Option<i64> {
        match self {
            ColumnValues::Int8(v) => v.get(index).map(|&x| i64::from(x)),
            ColumnValues::Int16(v) => v.get(index).map(|&x| i64::from(x)),
            ColumnValues::Int32(v) => v.get(index).map(|&x| i64::from(x)),
            ColumnValues::Int64(v) | ColumnValues::Time(v) => v.get(index).copied(),
            ColumnValues::UInt8(v) => v.get(index).map(|&x| i64::from(x)),
            ColumnValues::UInt16(v) => v.get(index).map(|&x| i64::from(x)),
            ColumnValues::UInt32(v) => v.get(index).map(|&x| i64::from(x)),
            ColumnValues::UInt64(v) => v.get(index).and_then(|&x| i64::try_from(x).ok()),
            _ => None,
        }
    }

    /// Numeric value at `index`, for integer and float columns.
    pub fn as_f64(&self, index: usize) -> Option<f64> {
        match self {
            ColumnValues::Float(v) => v.get(index).copied(),
            ColumnValues::UInt64(v) => v.get(index).map(|&x| x as f64),
            _ => self.as_i64(index).map(|x| x as f64),
        }
    }

    /// Rewrites every value of an integer column through `f`.
    ///
    /// A result that does not fit the column's width is an `InvalidId`.
    pub fn map_integers(&mut self, mut f: impl FnMut(i64) -> Result<i64>) -> Result<()> {
        macro_rules! remap {
            ($values:expr, $ty:ty) => {
                for slot in $values.iter_mut() {
                    let current = i64::try_from(*slot).map_err(|_| {
                        CoordError::InvalidId(format!("{} out of range", *slot))
                    })?;
                    let mapped = f(current)?;
                    *slot = <$ty>::try_from(mapped).map_err(|_| {
                        CoordError::InvalidId(format!(
                            "{mapped} does not fit {}",
                            stringify!($ty)
                        ))
                    })?;
                }
            };
        }
        match self {
            ColumnValues::Int8(v) => remap!(v, i8),
            ColumnValues::Int16(v) => remap!(v, i16),
            ColumnValues::Int32(v) => remap!(v, i32),
            ColumnValues::Int64(v) => remap!(v, i64),
            ColumnValues::UInt8(v) => remap!(v, u8),
            ColumnValues::UInt16(v) => remap!(v, u16),
            ColumnValues::UInt32(v) => remap!(v, u32),
            ColumnValues::UInt64(v) => remap!(v, u64),
            other => {
                return Err(CoordError::InvalidId(format!(
                    "row IDs must be integers, got {} values",
                    other.kind()
                )))
            }
        }
        Ok(())
    }
}

impl Serialize for ColumnValues {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.len()))?;
        match self {
            ColumnValues::Bool(v) => v.iter().try_for_each(|x| seq.serialize_element(x))?,
            ColumnValues::Int8(v) => v.iter().try_for_each(|x| seq.serialize_element(x))?,
            ColumnValues::Int16(v) => v.iter().try_for_each(|x| seq.serialize_element(x))?,
            ColumnValues::Int32(v) => v.iter().try_for_each(|x| seq.serialize_element(x))?,
            ColumnValues::Int64(v) => v.iter().try_for_each(|x| seq.serialize_element(x))?,
            ColumnValues::UInt8(v) => v.iter().try_for_each(|x| seq.serialize_element(x))?,
            ColumnValues::UInt16(v) => v.iter().try_for_each(|x| seq.serialize_element(x))?,
            ColumnValues::UInt32(v) => v.iter().try_for_each(|x| seq.serialize_element(x))?,
            ColumnValues::UInt64(v) => v.iter().try_for_each(|x| seq.serialize_element(x))?,
            ColumnValues::Float(v) => v.iter().try_for_each(|x| seq.serialize_element(x))?,
            ColumnValues::Time(v) => v
                .iter()
                .try_for_each(|&x| seq.serialize_element(&micros_to_seconds(x)))?,
            ColumnValues::Text(v) => v.iter().try_for_each(|x| seq.serialize_element(x))?,
            ColumnValues::GeoPoint(v) => v.iter().try_for_each(|x| seq.serialize_element(x))?,
        }
        seq.end()
    }
}

/// A named, typed result column.
#[derive(Clone, Debug, PartialEq)]
pub struct TypedColumn {
    pub name: String,
    pub data_type: DataType,
    pub values: ColumnValues,
}

impl TypedColumn {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            values: ColumnValues::with_capacity(data_type, 0),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Serialize for TypedColumn {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("TypedColumn", 3)?;
        s.serialize_field("name", &self.name)?;
        s.serialize_field("type", &self.data_type)?;
        s.serialize_field("values", &self.values)?;
        s.end()
    }
}

/// Decoded select response: the engine's total match count plus columns.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SelectResult {
    pub total_hits: u64,
    pub columns: Vec<TypedColumn>,
}

impl SelectResult {
    pub fn row_count(&self) -> usize {
        self.columns.first().map_or(0, TypedColumn::len)
    }

    pub fn column(&self, name: &str) -> Option<&TypedColumn> {
        self.columns.iter().find(|c| c.name == name)
    }
}
