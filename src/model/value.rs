//! Field values and their XSD lexical forms.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};

use super::attachment::{normalize_content_id, Attachment, SwaRef};

/// The primitive type of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Boolean,
    Integer,
    Float,
    String,
    Date,
    Time,
    DateTime,
    Uri,
    /// A resolved file attachment.
    File,
    /// A `cid:` reference that has not been resolved to a file yet.
    SwaRef,
}

impl ValueKind {
    /// Name used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
            Self::Date => "date",
            Self::Time => "time",
            Self::DateTime => "datetime",
            Self::Uri => "uri",
            Self::File => "file",
            Self::SwaRef => "swaref",
        }
    }

    /// The built-in XSD type this kind maps to (without prefix).
    pub fn xsd_name(&self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
            Self::Date => "date",
            Self::Time => "time",
            Self::DateTime => "dateTime",
            Self::Uri => "anyURI",
            Self::File | Self::SwaRef => "swaRef",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single element value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(DateTime<FixedOffset>),
    Uri(String),
    File(Attachment),
    SwaRef(SwaRef),
}

impl Value {
    /// Build a URI value (strings default to [`Value::String`]).
    pub fn uri(s: impl Into<String>) -> Self {
        Self::Uri(s.into())
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Boolean(_) => ValueKind::Boolean,
            Self::Integer(_) => ValueKind::Integer,
            Self::Float(_) => ValueKind::Float,
            Self::String(_) => ValueKind::String,
            Self::Date(_) => ValueKind::Date,
            Self::Time(_) => ValueKind::Time,
            Self::DateTime(_) => ValueKind::DateTime,
            Self::Uri(_) => ValueKind::Uri,
            Self::File(_) => ValueKind::File,
            Self::SwaRef(_) => ValueKind::SwaRef,
        }
    }

    /// Canonical lexical form, as emitted into XML and matched by patterns.
    ///
    /// Attachments render as their `cid:` reference.
    pub fn lexical(&self) -> String {
        match self {
            Self::Boolean(b) => b.to_string(),
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => format_float(*f),
            Self::String(s) | Self::Uri(s) => s.clone(),
            Self::Date(d) => d.format("%Y-%m-%d").to_string(),
            Self::Time(t) => t.format("%H:%M:%S%.f").to_string(),
            Self::DateTime(dt) => dt.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            Self::File(att) => att.content_id.clone().unwrap_or_default(),
            Self::SwaRef(r) => r.content_id.clone(),
        }
    }

    /// Parse the lexical form of `kind`.
    ///
    /// Returns a human-readable reason on failure; the caller attaches the field name.
    pub fn parse(kind: ValueKind, text: &str) -> std::result::Result<Self, String> {
        let trimmed = text.trim();
        match kind {
            ValueKind::Boolean => match trimmed {
                "true" | "1" => Ok(Self::Boolean(true)),
                "false" | "0" => Ok(Self::Boolean(false)),
                _ => Err(format!("not a valid boolean $${text}$$")),
            },
            ValueKind::Integer => trimmed
                .parse::<i64>()
                .map(Self::Integer)
                .map_err(|_| format!("not a valid integer $${text}$$")),
            ValueKind::Float => parse_float(trimmed)
                .map(Self::Float)
                .ok_or_else(|| format!("not a valid float $${text}$$")),
            ValueKind::String => Ok(Self::String(text.to_string())),
            ValueKind::Date => NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                .map(Self::Date)
                .map_err(|_| format!("not a valid date $${text}$$")),
            ValueKind::Time => NaiveTime::parse_from_str(trimmed, "%H:%M:%S%.f")
                .map(Self::Time)
                .map_err(|_| format!("not a valid time $${text}$$")),
            ValueKind::DateTime => parse_datetime(trimmed)
                .map(Self::DateTime)
                .ok_or_else(|| format!("not a valid datetime $${text}$$")),
            ValueKind::Uri => {
                check_uri(trimmed)?;
                Ok(Self::Uri(trimmed.to_string()))
            }
            ValueKind::SwaRef | ValueKind::File => normalize_content_id(trimmed)
                .filter(|_| trimmed.to_ascii_lowercase().starts_with("cid:"))
                .map(|content_id| Self::SwaRef(SwaRef { content_id }))
                .ok_or_else(|| format!("not a valid cid: reference $${text}$$")),
        }
    }

    /// Order two values of the same kind. Values of different kinds are unordered.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Self::Integer(a), Self::Integer(b)) => Some(a.cmp(b)),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b),
            (Self::Date(a), Self::Date(b)) => Some(a.cmp(b)),
            (Self::Time(a), Self::Time(b)) => Some(a.cmp(b)),
            (Self::DateTime(a), Self::DateTime(b)) => Some(a.cmp(b)),
            (Self::String(a), Self::String(b)) | (Self::Uri(a), Self::Uri(b)) => Some(a.cmp(b)),
            (Self::Boolean(a), Self::Boolean(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::Uri(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_attachment(&self) -> Option<&Attachment> {
        match self {
            Self::File(att) => Some(att),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lexical())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Self::Date(d)
    }
}

impl From<NaiveTime> for Value {
    fn from(t: NaiveTime) -> Self {
        Self::Time(t)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(dt: DateTime<FixedOffset>) -> Self {
        Self::DateTime(dt)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::DateTime(dt.fixed_offset())
    }
}

impl From<Attachment> for Value {
    fn from(att: Attachment) -> Self {
        Self::File(att)
    }
}

/// The user-facing shape of a field: nothing, one value, or a list.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Single(Value),
    Many(Vec<Value>),
}

impl FieldValue {
    pub fn single(v: impl Into<Value>) -> Self {
        Self::Single(v.into())
    }

    pub fn many<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::Many(values.into_iter().map(Into::into).collect())
    }

    /// Type name quoted in "received …" errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Single(v) => v.kind().name(),
            Self::Many(_) => "list",
        }
    }

    pub fn as_single(&self) -> Option<&Value> {
        match self {
            Self::Single(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_many(&self) -> Option<&[Value]> {
        match self {
            Self::Many(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<Value> for FieldValue {
    fn from(v: Value) -> Self {
        Self::Single(v)
    }
}

impl From<Vec<Value>> for FieldValue {
    fn from(v: Vec<Value>) -> Self {
        Self::Many(v)
    }
}

impl From<Option<Value>> for FieldValue {
    fn from(v: Option<Value>) -> Self {
        v.map_or(Self::Null, Self::Single)
    }
}

fn format_float(f: f64) -> String {
    if f.is_nan() {
        "NaN".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "INF" } else { "-INF" }.to_string()
    } else {
        f.to_string()
    }
}

fn parse_float(s: &str) -> Option<f64> {
    match s {
        "INF" | "+INF" => Some(f64::INFINITY),
        "-INF" => Some(f64::NEG_INFINITY),
        "NaN" => Some(f64::NAN),
        // Rust accepts "inf"/"nan" spellings XSD does not
        _ if s.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') => None,
        _ => s.parse().ok(),
    }
}

/// Accept RFC 3339 with an offset, or a naive timestamp taken as UTC.
fn parse_datetime(s: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt);
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|ndt| ndt.and_utc().fixed_offset())
}

fn check_uri(s: &str) -> std::result::Result<(), String> {
    if s.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(format!("not a valid URI $${s}$$"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_boolean_forms() {
        assert_eq!(Value::parse(ValueKind::Boolean, "1"), Ok(Value::Boolean(true)));
        assert_eq!(Value::parse(ValueKind::Boolean, "false"), Ok(Value::Boolean(false)));
        assert!(Value::parse(ValueKind::Boolean, "yes").is_err());
    }

    #[test]
    fn test_float_special_values() {
        assert_eq!(Value::parse(ValueKind::Float, "INF"), Ok(Value::Float(f64::INFINITY)));
        assert!(Value::parse(ValueKind::Float, "inf").is_err());
        assert_eq!(Value::Float(f64::NEG_INFINITY).lexical(), "-INF");
        assert_eq!(Value::Float(2.5).lexical(), "2.5");
    }

    #[test]
    fn test_datetime_lexical() {
        let v = Value::parse(ValueKind::DateTime, "2024-01-04T10:00:00").unwrap();
        assert_eq!(v.lexical(), "2024-01-04T10:00:00Z");
        let with_offset = Value::parse(ValueKind::DateTime, "2024-01-04T12:00:00+02:00").unwrap();
        assert_eq!(with_offset, v);
    }

    #[test]
    fn test_time_without_fraction() {
        let v = Value::parse(ValueKind::Time, "08:30:00").unwrap();
        assert_eq!(v.lexical(), "08:30:00");
    }

    #[test]
    fn test_string_keeps_whitespace() {
        let v = Value::parse(ValueKind::String, "  padded ").unwrap();
        assert_eq!(v.as_str(), Some("  padded "));
    }

    #[test]
    fn test_uri_rejects_spaces() {
        assert!(Value::parse(ValueKind::Uri, "http://example.com/a b").is_err());
        assert!(Value::parse(ValueKind::Uri, "urn:x-road:ee").is_ok());
    }

    #[test]
    fn test_swaref_requires_cid_scheme() {
        let v = Value::parse(ValueKind::SwaRef, " cid:abc123 ").unwrap();
        assert_eq!(v.lexical(), "cid:abc123");
        assert!(Value::parse(ValueKind::SwaRef, "abc123").is_err());
    }

    #[test]
    fn test_compare_same_kind_only() {
        assert_eq!(Value::from(1).compare(&Value::from(2)), Some(Ordering::Less));
        assert_eq!(Value::from(1).compare(&Value::from("1")), None);
    }

    #[test]
    fn test_field_value_type_names() {
        assert_eq!(FieldValue::Null.type_name(), "null");
        assert_eq!(FieldValue::single("x").type_name(), "string");
        assert_eq!(FieldValue::many([1, 2]).type_name(), "list");
    }
}
