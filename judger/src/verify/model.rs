use err_derive::Error;
use serde::{
    de::{self, MapAccess, SeqAccess, Visitor},
    ser::SerializeMap,
    Deserialize, Deserializer, Serialize, Serializer,
};
use std::fmt;

/// A single value in a result row. Mirrors the storage classes of the engine,
/// minus blobs.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Integer(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::Integer(v.into())
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Real(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Text(v.to_owned())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Text(v)
    }
}

impl<T: Into<Scalar>> From<Option<T>> for Scalar {
    fn from(v: Option<T>) -> Self {
        v.map_or(Scalar::Null, Into::into)
    }
}

impl Serialize for Scalar {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Scalar::Null => serializer.serialize_unit(),
            Scalar::Integer(v) => serializer.serialize_i64(*v),
            Scalar::Real(v) => serializer.serialize_f64(*v),
            Scalar::Text(v) => serializer.serialize_str(v),
        }
    }
}

struct ScalarVisitor;

impl<'de> Visitor<'de> for ScalarVisitor {
    type Value = Scalar;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("null, a number or a string")
    }

    fn visit_unit<E>(self) -> Result<Scalar, E>
    where
        E: de::Error,
    {
        Ok(Scalar::Null)
    }

    fn visit_none<E>(self) -> Result<Scalar, E>
    where
        E: de::Error,
    {
        Ok(Scalar::Null)
    }

    fn visit_i64<E>(self, v: i64) -> Result<Scalar, E>
    where
        E: de::Error,
    {
        Ok(Scalar::Integer(v))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Scalar, E>
    where
        E: de::Error,
    {
        // The engine never emits integers outside i64, but stay lossless-ish.
        match i64::try_from(v) {
            Ok(v) => Ok(Scalar::Integer(v)),
            Err(_) => Ok(Scalar::Real(v as f64)),
        }
    }

    fn visit_f64<E>(self, v: f64) -> Result<Scalar, E>
    where
        E: de::Error,
    {
        Ok(Scalar::Real(v))
    }

    fn visit_str<E>(self, v: &str) -> Result<Scalar, E>
    where
        E: de::Error,
    {
        Ok(Scalar::Text(v.to_owned()))
    }

    fn visit_string<E>(self, v: String) -> Result<Scalar, E>
    where
        E: de::Error,
    {
        Ok(Scalar::Text(v))
    }
}

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(ScalarVisitor)
    }
}

/// One row of a result set.
///
/// Columns keep the order the engine printed them in, and duplicated column
/// names (`SELECT 1 AS a, 2 AS a`) are kept as-is.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    columns: Vec<(String, Scalar)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.columns.push((name.into(), value.into()));
        self
    }

    /// First column called `name`.
    pub fn get(&self, name: &str) -> Option<&Scalar> {
        self.columns
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Scalar)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Compact JSON text of this record, columns in their original order.
    pub fn to_json_string(&self) -> String {
        // Keys are strings and values are scalars; this cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl<K: Into<String>, V: Into<Scalar>> FromIterator<(K, V)> for Record {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Record {
            columns: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl Serialize for Record {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (k, v) in &self.columns {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

struct RecordVisitor;

impl<'de> Visitor<'de> for RecordVisitor {
    type Value = Record;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a record of column names to scalar values")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut columns = Vec::with_capacity(map.size_hint().unwrap_or(0));
        while let Some((k, v)) = map.next_entry::<String, Scalar>()? {
            columns.push((k, v));
        }
        Ok(Record { columns })
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(RecordVisitor)
    }
}

/// An ordered sequence of records, modelling one result set.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct StructuredResult(Vec<Record>);

impl StructuredResult {
    pub fn new(records: Vec<Record>) -> Self {
        StructuredResult(records)
    }

    pub fn records(&self) -> &[Record] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn reversed(&self) -> Self {
        StructuredResult(self.0.iter().rev().cloned().collect())
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl From<Vec<Record>> for StructuredResult {
    fn from(v: Vec<Record>) -> Self {
        StructuredResult(v)
    }
}

struct ResultVisitor;

impl<'de> Visitor<'de> for ResultVisitor {
    type Value = StructuredResult;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("an array of records")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut records = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(record) = seq.next_element::<Record>()? {
            records.push(record);
        }
        Ok(StructuredResult(records))
    }
}

impl<'de> Deserialize<'de> for StructuredResult {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_seq(ResultVisitor)
    }
}

/// Failure to find a result set in a sandbox's output.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractError {
    /// Nothing that looks like a result set. Holds the trimmed output, which is
    /// usually the engine's error message.
    #[error(display = "No structured output: {}", _0)]
    NoStructuredOutput(String),

    /// Something that looks like a result set, but does not parse as one.
    #[error(display = "Malformed structured output: {}", reason)]
    MalformedStructuredOutput { payload: String, reason: String },
}
