//! Record values and rendered output chunks.
//!
//! A [`Record`] is what the source produces: an ordered list of named scalar
//! fields. The transformer turns it into an [`EnrichedRecord`] and renders
//! that into a [`Chunk`], the unit the sink consumes.

use std::fmt;

/// A scalar column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Return the integer payload, if this is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Short type name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

/// One row from the source, fields kept in column order.
///
/// Records are immutable once built; the source is the only producer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    /// Build a record from `(name, value)` pairs in column order.
    pub fn from_fields(fields: Vec<(String, Value)>) -> Self {
        Self { fields }
    }

    /// Look up a field by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    /// Iterate over fields in column order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}

/// A record plus the two derived fields added by the transformer.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedRecord {
    /// The source record, unchanged.
    pub record: Record,
    /// Key field value.
    pub num: i64,
    /// Deterministic label derived from `num`.
    pub description: String,
    /// Capture time, read from the transformer's clock.
    pub timestamp: String,
}

impl EnrichedRecord {
    /// Render as one output line: `<num>, <description>, <timestamp>\n`.
    pub fn render(&self) -> Chunk {
        Chunk(format!(
            "{}, {}, {}\n",
            self.num, self.description, self.timestamp
        ))
    }
}

/// One rendered, newline-terminated line of output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk(String);

impl Chunk {
    /// Wrap a line, appending the terminator if it is missing.
    pub fn line(text: impl Into<String>) -> Self {
        let mut text = text.into();
        if !text.ends_with('\n') {
            text.push('\n');
        }
        Chunk(text)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}
