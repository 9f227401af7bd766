//! Value restrictions: length, pattern, enumeration, whitespace, ranges, file limits.
//!
//! Checks run in a fixed order and stop at the first violation. Text:
//! exact length (which overrides min/max length), pattern, enumeration, then
//! whitespace normalization. Ordered values: pattern on the lexical form,
//! total digits (integers), min/max value, then enumeration.

use std::cmp::Ordering;
use std::fmt::Write as _;

use regex::Regex;

use crate::error::{with_value, Result, SwaError};
use crate::model::attachment::{Attachment, HashFunction};
use crate::model::value::{Value, ValueKind};

/// XSD `whiteSpace` facet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Whitespace {
    #[default]
    Preserve,
    /// Every tab, newline and carriage return becomes a space.
    Replace,
    /// Replace, then collapse runs of spaces and trim.
    Collapse,
}

impl Whitespace {
    pub fn apply(&self, text: &str) -> String {
        match self {
            Self::Preserve => text.to_string(),
            Self::Replace => text
                .chars()
                .map(|c| if matches!(c, '\t' | '\n' | '\r') { ' ' } else { c })
                .collect(),
            Self::Collapse => text.split_whitespace().collect::<Vec<_>>().join(" "),
        }
    }

    pub fn xsd_name(&self) -> &'static str {
        match self {
            Self::Preserve => "preserve",
            Self::Replace => "replace",
            Self::Collapse => "collapse",
        }
    }
}

/// A `pattern` facet. Matches the whole value, as XSD patterns do.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    compiled: std::result::Result<Regex, String>,
}

impl Pattern {
    pub fn new(source: &str) -> Self {
        let compiled = Regex::new(&format!("^(?:{source})$")).map_err(|e| e.to_string());
        Self {
            source: source.to_string(),
            compiled,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Compilation error, reported when the schema is built.
    pub fn error(&self) -> Option<&str> {
        self.compiled.as_ref().err().map(String::as_str)
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.compiled.as_ref().is_ok_and(|re| re.is_match(text))
    }

    fn check(&self, field: &str, text: &str) -> Result<()> {
        if self.is_match(text) {
            Ok(())
        } else {
            Err(SwaError::validation(
                field,
                with_value(format!("must match pattern '{}'", self.source), text),
            ))
        }
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// Restrictions for string and URI elements.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextFacets {
    pub length: Option<usize>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<Pattern>,
    pub enumerations: Vec<Value>,
    pub whitespace: Whitespace,
}

impl TextFacets {
    /// Validate `text` and return it whitespace-normalized.
    pub fn check(&self, field: &str, text: &str) -> Result<String> {
        let fail = |reason: String| -> Result<String> {
            Err(SwaError::validation(field, with_value(reason, text)))
        };
        let len = text.chars().count();

        if let Some(exact) = self.length {
            if len != exact {
                return fail(format!("length must be exactly {exact}"));
            }
        } else {
            if let Some(min) = self.min_length.filter(|min| len < *min) {
                return fail(format!("length must be at least {min}"));
            }
            if let Some(max) = self.max_length.filter(|max| len > *max) {
                return fail(format!("length must be at most {max}"));
            }
        }

        if let Some(pattern) = &self.pattern {
            pattern.check(field, text)?;
        }

        if !self.enumerations.is_empty() && !self.enumerations.iter().any(|e| e.lexical() == text)
        {
            return fail(format!("must be one of {}", enumeration_list(&self.enumerations)));
        }

        Ok(self.whitespace.apply(text))
    }

    pub fn check_definition(&self, kind: ValueKind) -> std::result::Result<(), String> {
        if let Some(err) = self.pattern.as_ref().and_then(Pattern::error) {
            return Err(format!("invalid pattern: {err}"));
        }
        check_enumeration_kinds(&self.enumerations, kind)?;
        if let (Some(min), Some(max)) = (self.min_length, self.max_length) {
            if min > max {
                return Err(format!("min_length {min} is greater than max_length {max}"));
            }
        }
        Ok(())
    }

    pub fn is_constrained(&self) -> bool {
        self.length.is_some()
            || self.min_length.is_some()
            || self.max_length.is_some()
            || self.pattern.is_some()
            || !self.enumerations.is_empty()
            || self.whitespace != Whitespace::Preserve
    }

    /// Stable rendering of every set facet, hashed into the WSDL type name.
    pub fn canonical(&self) -> String {
        let mut out = String::from("text");
        if let Some(n) = self.length {
            let _ = write!(out, "|length={n}");
        }
        if let Some(n) = self.min_length {
            let _ = write!(out, "|minLength={n}");
        }
        if let Some(n) = self.max_length {
            let _ = write!(out, "|maxLength={n}");
        }
        if let Some(p) = &self.pattern {
            let _ = write!(out, "|pattern={}", p.source());
        }
        for e in &self.enumerations {
            let _ = write!(out, "|enumeration={}", e.lexical());
        }
        if self.whitespace != Whitespace::Preserve {
            let _ = write!(out, "|whiteSpace={}", self.whitespace.xsd_name());
        }
        out
    }
}

/// Restrictions for numeric, temporal and boolean elements.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangeFacets {
    pub min_value: Option<Value>,
    pub max_value: Option<Value>,
    pub total_digits: Option<u32>,
    pub pattern: Option<Pattern>,
    pub enumerations: Vec<Value>,
}

impl RangeFacets {
    pub fn check(&self, field: &str, value: &Value) -> Result<()> {
        let lexical = value.lexical();
        let fail = |reason: String| -> Result<()> {
            Err(SwaError::validation(field, with_value(reason, &lexical)))
        };

        if let Some(pattern) = &self.pattern {
            pattern.check(field, &lexical)?;
        }

        if let (Some(limit), Value::Integer(i)) = (self.total_digits, value) {
            let digits = i.unsigned_abs().to_string().len();
            if digits > limit as usize {
                return fail(format!("must have at most {limit} digits"));
            }
        }

        if let Some(min) = &self.min_value {
            if matches!(value.compare(min), Some(Ordering::Less) | None) {
                return fail(format!("must be greater than or equal to {min}"));
            }
        }
        if let Some(max) = &self.max_value {
            if matches!(value.compare(max), Some(Ordering::Greater) | None) {
                return fail(format!("must be less than or equal to {max}"));
            }
        }

        if !self.enumerations.is_empty() && !self.enumerations.contains(value) {
            return fail(format!("must be one of {}", enumeration_list(&self.enumerations)));
        }
        Ok(())
    }

    pub fn check_definition(&self, kind: ValueKind) -> std::result::Result<(), String> {
        if let Some(err) = self.pattern.as_ref().and_then(Pattern::error) {
            return Err(format!("invalid pattern: {err}"));
        }
        check_enumeration_kinds(&self.enumerations, kind)?;
        for (facet, bound) in [("min_value", &self.min_value), ("max_value", &self.max_value)] {
            if let Some(bound) = bound {
                if bound.kind() != kind {
                    return Err(format!(
                        "{facet} {bound} is a {} value, expected {kind}",
                        bound.kind()
                    ));
                }
            }
        }
        if let (Some(min), Some(max)) = (&self.min_value, &self.max_value) {
            if min.compare(max) == Some(Ordering::Greater) {
                return Err(format!("min_value {min} is greater than max_value {max}"));
            }
        }
        if self.total_digits == Some(0) {
            return Err("total_digits must be positive".to_string());
        }
        Ok(())
    }

    pub fn is_constrained(&self) -> bool {
        self.min_value.is_some()
            || self.max_value.is_some()
            || self.total_digits.is_some()
            || self.pattern.is_some()
            || !self.enumerations.is_empty()
    }

    pub fn canonical(&self) -> String {
        let mut out = String::from("range");
        if let Some(v) = &self.min_value {
            let _ = write!(out, "|minInclusive={v}");
        }
        if let Some(v) = &self.max_value {
            let _ = write!(out, "|maxInclusive={v}");
        }
        if let Some(n) = self.total_digits {
            let _ = write!(out, "|totalDigits={n}");
        }
        if let Some(p) = &self.pattern {
            let _ = write!(out, "|pattern={}", p.source());
        }
        for e in &self.enumerations {
            let _ = write!(out, "|enumeration={}", e.lexical());
        }
        out
    }
}

/// Restrictions for file attachments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileFacets {
    /// Mimetypes (`application/pdf`) or extensions (`.pdf`); empty allows all.
    pub allowed_filetypes: Vec<String>,
    pub max_filesize: Option<usize>,
    pub hash_function: HashFunction,
}

impl FileFacets {
    pub fn check(&self, field: &str, file: &Attachment) -> Result<()> {
        if let Some(max) = self.max_filesize {
            if file.size() > max {
                return Err(SwaError::validation(
                    field,
                    with_value(
                        format!("file size {} exceeds the limit of {max} bytes", file.size()),
                        &file.filename,
                    ),
                ));
            }
        }
        if !self.allowed_filetypes.is_empty() && !self.allows(file) {
            return Err(SwaError::validation(
                field,
                with_value(
                    format!("file type must be one of [{}]", self.allowed_filetypes.join(", ")),
                    &file.content_type,
                ),
            ));
        }
        Ok(())
    }

    fn allows(&self, file: &Attachment) -> bool {
        let mimetype = file
            .content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim();
        let filename = file.filename.to_lowercase();
        self.allowed_filetypes.iter().any(|allowed| {
            if allowed.starts_with('.') {
                filename.ends_with(&allowed.to_lowercase())
            } else {
                allowed.eq_ignore_ascii_case(mimetype)
            }
        })
    }
}

/// The facet group attached to an element, chosen by its kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Facets {
    Text(TextFacets),
    Range(RangeFacets),
    File(FileFacets),
}

impl Facets {
    pub fn for_kind(kind: ValueKind) -> Self {
        match kind {
            ValueKind::String | ValueKind::Uri => Self::Text(TextFacets::default()),
            ValueKind::File | ValueKind::SwaRef => Self::File(FileFacets::default()),
            _ => Self::Range(RangeFacets::default()),
        }
    }
}

fn check_enumeration_kinds(values: &[Value], kind: ValueKind) -> std::result::Result<(), String> {
    match values.iter().find(|v| v.kind() != kind) {
        Some(bad) => Err(format!(
            "{} is a {} value, expected {kind}",
            with_value("enumeration value", bad),
            bad.kind()
        )),
        None => Ok(()),
    }
}

fn enumeration_list(values: &[Value]) -> String {
    let items: Vec<String> = values.iter().map(Value::lexical).collect();
    format!("[{}]", items.join(", "))
}
