//! Per-field element specifications.
//!
//! An [`ElementSpec`] says what one field of a message body holds: its
//! value kind, occurrence bounds, XML naming and facets. It is declared
//! once, checked when the owning schema is built, and read-only afterwards.

use std::collections::BTreeMap;
use std::fmt;

use sha2::{Digest, Sha256};
use tracing::trace;

use super::facets::{Facets, FileFacets, Pattern, RangeFacets, TextFacets, Whitespace};
use super::occurrence::Occurrence;
use crate::error::{with_extra, with_value, Result, SwaError};
use crate::model::attachment::{generate_content_id, HashFunction};
use crate::model::value::{Value, ValueKind};
use crate::storage::AttachmentScope;

/// Prefix of the built-in XML Schema types.
pub const XSD_PREFIX: &str = "xs";
/// Prefix of generated simple types.
pub const TARGET_PREFIX: &str = "tns";
/// Prefix bound to the WS-I swaRef schema.
pub const SWAREF_PREFIX: &str = "ref";

/// Upper occurrence bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxOccurs {
    Bounded(u32),
    Unbounded,
}

impl MaxOccurs {
    pub fn allows(&self, count: usize) -> bool {
        match self {
            Self::Bounded(max) => count <= *max as usize,
            Self::Unbounded => true,
        }
    }
}

impl fmt::Display for MaxOccurs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bounded(n) => write!(f, "{n}"),
            Self::Unbounded => f.write_str("unbounded"),
        }
    }
}

/// Declaration of one message-body field.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementSpec {
    tag: Option<String>,
    namespace: Option<String>,
    namespace_map: BTreeMap<String, String>,
    min_occurs: u32,
    max_occurs: MaxOccurs,
    element_type: ValueKind,
    internal_type: Option<ValueKind>,
    occurrence: Option<Occurrence>,
    facets: Facets,
    misapplied: Vec<&'static str>,
}

impl ElementSpec {
    fn new(element_type: ValueKind) -> Self {
        Self {
            tag: None,
            namespace: None,
            namespace_map: BTreeMap::new(),
            min_occurs: 0,
            max_occurs: MaxOccurs::Unbounded,
            element_type,
            internal_type: None,
            occurrence: None,
            facets: Facets::for_kind(element_type),
            misapplied: Vec::new(),
        }
    }

    pub fn boolean() -> Self {
        Self::new(ValueKind::Boolean)
    }

    pub fn integer() -> Self {
        Self::new(ValueKind::Integer)
    }

    pub fn float() -> Self {
        Self::new(ValueKind::Float)
    }

    pub fn string() -> Self {
        Self::new(ValueKind::String)
    }

    pub fn date() -> Self {
        Self::new(ValueKind::Date)
    }

    pub fn time() -> Self {
        Self::new(ValueKind::Time)
    }

    pub fn datetime() -> Self {
        Self::new(ValueKind::DateTime)
    }

    pub fn uri() -> Self {
        Self::new(ValueKind::Uri)
    }

    /// A file attachment, carried in XML as a `cid:` reference.
    pub fn file() -> Self {
        let mut spec = Self::new(ValueKind::File);
        spec.internal_type = Some(ValueKind::SwaRef);
        spec
    }

    // Common options

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Declare a namespace prefix for this element.
    pub fn prefix(mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        self.namespace_map.insert(prefix.into(), uri.into());
        self
    }

    pub fn min_occurs(mut self, min: u32) -> Self {
        self.min_occurs = min;
        self
    }

    pub fn max_occurs(mut self, max: u32) -> Self {
        self.max_occurs = MaxOccurs::Bounded(max);
        self
    }

    pub fn unbounded(mut self) -> Self {
        self.max_occurs = MaxOccurs::Unbounded;
        self
    }

    // Facets. A facet the kind does not support is recorded and reported
    // when the schema is built.

    pub fn length(mut self, length: usize) -> Self {
        if let Some(text) = self.text_facets("length") {
            text.length = Some(length);
        }
        self
    }

    pub fn min_length(mut self, min: usize) -> Self {
        if let Some(text) = self.text_facets("min_length") {
            text.min_length = Some(min);
        }
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        if let Some(text) = self.text_facets("max_length") {
            text.max_length = Some(max);
        }
        self
    }

    pub fn whitespace(mut self, mode: Whitespace) -> Self {
        if let Some(text) = self.text_facets("whitespace") {
            text.whitespace = mode;
        }
        self
    }

    pub fn pattern(mut self, pattern: &str) -> Self {
        match &mut self.facets {
            Facets::Text(text) => text.pattern = Some(Pattern::new(pattern)),
            Facets::Range(range) => range.pattern = Some(Pattern::new(pattern)),
            Facets::File(_) => self.misapplied.push("pattern"),
        }
        self
    }

    pub fn enumerations<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        if self.element_type == ValueKind::Boolean {
            self.misapplied.push("enumerations");
            return self;
        }
        let kind = self.element_type;
        let values: Vec<Value> = values.into_iter().map(|v| coerce(kind, v.into())).collect();
        match &mut self.facets {
            Facets::Text(text) => text.enumerations = values,
            Facets::Range(range) => range.enumerations = values,
            Facets::File(_) => self.misapplied.push("enumerations"),
        }
        self
    }

    pub fn min_value(mut self, value: impl Into<Value>) -> Self {
        let value = coerce(self.element_type, value.into());
        if let Some(range) = self.range_facets("min_value") {
            range.min_value = Some(value);
        }
        self
    }

    pub fn max_value(mut self, value: impl Into<Value>) -> Self {
        let value = coerce(self.element_type, value.into());
        if let Some(range) = self.range_facets("max_value") {
            range.max_value = Some(value);
        }
        self
    }

    pub fn total_digits(mut self, digits: u32) -> Self {
        if self.element_type != ValueKind::Integer {
            self.misapplied.push("total_digits");
            return self;
        }
        if let Some(range) = self.range_facets("total_digits") {
            range.total_digits = Some(digits);
        }
        self
    }

    /// Accepted mimetypes or `.ext` extensions.
    pub fn allowed_filetypes<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Some(file) = self.file_facets("allowed_filetypes") {
            file.allowed_filetypes = types.into_iter().map(Into::into).collect();
        }
        self
    }

    pub fn max_filesize(mut self, bytes: usize) -> Self {
        if let Some(file) = self.file_facets("max_filesize") {
            file.max_filesize = Some(bytes);
        }
        self
    }

    pub fn hash_function(mut self, hash: HashFunction) -> Self {
        if let Some(file) = self.file_facets("hash_function") {
            file.hash_function = hash;
        }
        self
    }

    fn text_facets(&mut self, facet: &'static str) -> Option<&mut TextFacets> {
        match &mut self.facets {
            Facets::Text(text) => Some(text),
            _ => {
                self.misapplied.push(facet);
                None
            }
        }
    }

    fn range_facets(&mut self, facet: &'static str) -> Option<&mut RangeFacets> {
        match &mut self.facets {
            Facets::Range(range) if self.element_type != ValueKind::Boolean => Some(range),
            _ => {
                self.misapplied.push(facet);
                None
            }
        }
    }

    fn file_facets(&mut self, facet: &'static str) -> Option<&mut FileFacets> {
        match &mut self.facets {
            Facets::File(file) => Some(file),
            _ => {
                self.misapplied.push(facet);
                None
            }
        }
    }

    // Accessors

    pub fn element_tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn element_namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn namespace_map(&self) -> &BTreeMap<String, String> {
        &self.namespace_map
    }

    pub fn min(&self) -> u32 {
        self.min_occurs
    }

    pub fn max(&self) -> MaxOccurs {
        self.max_occurs
    }

    pub fn element_type(&self) -> ValueKind {
        self.element_type
    }

    pub fn internal_type(&self) -> Option<ValueKind> {
        self.internal_type
    }

    /// Kind the XML layer parses element text into.
    pub fn parse_kind(&self) -> ValueKind {
        self.internal_type.unwrap_or(self.element_type)
    }

    /// `None` until the owning schema has been built.
    pub fn occurrence(&self) -> Option<Occurrence> {
        self.occurrence
    }

    pub fn facets(&self) -> &Facets {
        &self.facets
    }

    /// `true` for values of the public or the internal type.
    pub fn accepts(&self, kind: ValueKind) -> bool {
        kind == self.element_type || Some(kind) == self.internal_type
    }

    /// Validate the declaration itself.
    pub fn check_definition(&self, class: &str, field: &str) -> Result<()> {
        let fail = |reason: String| -> Result<()> { Err(SwaError::definition(class, field, reason)) };

        if let Some(facet) = self.misapplied.first() {
            return fail(format!(
                "facet '{facet}' does not apply to {} elements",
                self.element_type
            ));
        }
        if let MaxOccurs::Bounded(max) = self.max_occurs {
            if max == 0 {
                return fail("max_occurs must be at least 1".to_string());
            }
            if self.min_occurs > max {
                return fail(format!(
                    "min_occurs {} is greater than max_occurs {max}",
                    self.min_occurs
                ));
            }
        }
        let checked = match &self.facets {
            Facets::Text(text) => text.check_definition(self.element_type),
            Facets::Range(range) => range.check_definition(self.element_type),
            Facets::File(_) => Ok(()),
        };
        checked.or_else(fail)
    }

    /// Fix the occurrence kind. Happens exactly once, when the schema is built.
    pub(crate) fn bind_occurrence(
        &mut self,
        occurrence: Occurrence,
        class: &str,
        field: &str,
    ) -> Result<()> {
        if let Some(bound) = self.occurrence {
            return Err(SwaError::definition(
                class,
                field,
                format!("specification already bound as {bound}"),
            ));
        }
        self.occurrence = Some(occurrence);
        Ok(())
    }

    /// Check and normalize values supplied by application code.
    ///
    /// Returns a new list; `values` is left untouched, also on failure.
    pub fn init_on_instantiation(&self, field: &str, values: &[Value]) -> Result<Vec<Value>> {
        values.iter().map(|v| self.check_value(field, v)).collect()
    }

    /// Check values parsed from XML, resolving `cid:` references through `scope`.
    pub fn init_on_deserialization(
        &self,
        field: &str,
        values: &[Value],
        scope: Option<&AttachmentScope>,
    ) -> Result<Vec<Value>> {
        values
            .iter()
            .map(|v| match v {
                Value::SwaRef(reference) if self.element_type == ValueKind::File => {
                    let resolved = resolve_reference(field, &reference.content_id, scope)?;
                    self.check_value(field, &resolved)
                }
                other => self.check_value(field, other),
            })
            .collect()
    }

    fn check_value(&self, field: &str, value: &Value) -> Result<Value> {
        if value.kind() != self.element_type {
            return Err(SwaError::validation(
                field,
                with_value(
                    format!("expected {}, received {}", self.element_type, value.kind()),
                    value,
                ),
            ));
        }
        match (&self.facets, value) {
            (Facets::Text(text), Value::String(s)) => Ok(Value::String(text.check(field, s)?)),
            (Facets::Text(text), Value::Uri(s)) => Ok(Value::Uri(text.check(field, s)?)),
            (Facets::Range(range), _) => {
                range.check(field, value)?;
                Ok(value.clone())
            }
            (Facets::File(limits), Value::File(file)) => {
                limits.check(field, file)?;
                let mut file = file.clone();
                if file.digest.is_none() {
                    file.digest = Some(limits.hash_function.digest(&file.content));
                }
                if file.content_id.is_none() {
                    file.content_id = Some(generate_content_id());
                }
                Ok(Value::File(file))
            }
            _ => Ok(value.clone()),
        }
    }

    /// `true` when a dedicated simple type must be emitted for this element.
    pub fn has_constraints(&self) -> bool {
        match &self.facets {
            Facets::Text(text) => text.is_constrained(),
            Facets::Range(range) => range.is_constrained(),
            Facets::File(_) => false,
        }
    }

    /// Stable hash of the facet set: equal facets give equal signatures.
    pub fn signature(&self) -> String {
        let canonical = match &self.facets {
            Facets::Text(text) => text.canonical(),
            Facets::Range(range) => range.canonical(),
            Facets::File(_) => String::new(),
        };
        let digest = Sha256::digest(format!("{}|{canonical}", self.element_type.xsd_name()));
        digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
    }

    /// Type name without prefix: a built-in name or `Custom<Type>__<signature>`.
    pub fn local_type_name(&self) -> String {
        let base = self.element_type.xsd_name();
        if self.has_constraints() {
            format!("Custom{}__{}", capitalize(base), self.signature())
        } else {
            base.to_string()
        }
    }

    /// Type name used in the generated schema, optionally prefixed.
    pub fn wsdl_type_name(&self, with_prefix: bool) -> String {
        let local = self.local_type_name();
        if !with_prefix {
            return local;
        }
        let prefix = if self.element_type == ValueKind::File {
            SWAREF_PREFIX
        } else if self.has_constraints() {
            TARGET_PREFIX
        } else {
            XSD_PREFIX
        };
        format!("{prefix}:{local}")
    }
}

/// Exchange a `cid:` reference for the attachment the request carried.
fn resolve_reference(
    field: &str,
    content_id: &str,
    scope: Option<&AttachmentScope>,
) -> Result<Value> {
    let not_found = || {
        SwaError::validation(field, with_extra("attachment not found in request", content_id))
    };
    let scope = scope.ok_or_else(not_found)?;
    let fingerprint = scope.fingerprint(content_id).ok_or_else(not_found)?;
    let part = scope.storage().retrieve_object(&fingerprint)?;

    if !part.digest_matches() {
        return Err(SwaError::validation(
            field,
            with_extra("attachment does not match its Content-Digest", content_id),
        ));
    }
    trace!(field, content_id, size = part.content.len(), "Resolved attachment reference");
    Ok(Value::File(part.to_attachment()))
}

/// Convert literals to the element's kind where that is unambiguous.
fn coerce(kind: ValueKind, value: Value) -> Value {
    match (kind, value) {
        (ValueKind::Float, Value::Integer(i)) => Value::Float(i as f64),
        (ValueKind::Uri, Value::String(s)) => Value::Uri(s),
        (_, value) => value,
    }
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}
