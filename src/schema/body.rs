//! Message-body instances and their two validation paths.
//!
//! Every field is stored as a list. [`MessageBody::new`] expands the
//! user-facing scalar, optional and list forms into that representation;
//! [`MessageBody::from_raw`] takes the lists the XML layer parsed, resolves
//! attachment references and checks occurrence counts. [`MessageBody::get`]
//! collapses a field back into its user-facing form.

use std::collections::HashMap;
use std::sync::Arc;

use super::builder::{BodySchema, FieldEntry};
use super::element::MaxOccurs;
use super::occurrence::Occurrence;
use crate::error::{with_value, Result, SwaError};
use crate::model::attachment::Attachment;
use crate::model::value::{FieldValue, Value};
use crate::storage::AttachmentScope;

/// Field lists as parsed from XML, before resolution and occurrence checks.
///
/// Attachment fields still hold `cid:` references here.
#[derive(Debug, Clone)]
pub struct RawBody {
    schema: Arc<BodySchema>,
    values: Vec<Vec<Value>>,
}

impl RawBody {
    pub fn new(schema: &Arc<BodySchema>) -> Self {
        Self {
            schema: Arc::clone(schema),
            values: vec![Vec::new(); schema.fields().len()],
        }
    }

    pub fn schema(&self) -> &Arc<BodySchema> {
        &self.schema
    }

    /// Append a parsed value to the field at `index`.
    pub(crate) fn push(&mut self, index: usize, value: Value) {
        if let Some(list) = self.values.get_mut(index) {
            list.push(value);
        }
    }

    pub fn values(&self, name: &str) -> Option<&[Value]> {
        let index = self.schema.index_of(name)?;
        Some(&self.values[index])
    }
}

/// A validated message body.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageBody {
    schema: Arc<BodySchema>,
    values: Vec<Vec<Value>>,
}

impl MessageBody {
    /// Build a body from application values.
    ///
    /// Unknown field names are rejected. Absent optional fields and absent
    /// lists are empty; an absent mandatory field is an error.
    pub fn new<I, K, V>(schema: &Arc<BodySchema>, fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<FieldValue>,
    {
        let mut provided: HashMap<String, FieldValue> = HashMap::new();
        for (name, value) in fields {
            let name = name.into();
            if schema.index_of(&name).is_none() {
                return Err(SwaError::validation(
                    &name,
                    with_value("no such field", schema.name()),
                ));
            }
            if provided.insert(name.clone(), value.into()).is_some() {
                return Err(SwaError::validation(&name, "value given more than once"));
            }
        }

        let mut values = Vec::with_capacity(schema.fields().len());
        for entry in schema.fields() {
            let list = instantiate_field(entry, provided.remove(entry.name()))?;
            values.push(list);
        }
        Ok(Self {
            schema: Arc::clone(schema),
            values,
        })
    }

    /// Finish a body parsed from XML.
    ///
    /// `scope` holds the request's attachments; without it any attachment
    /// reference fails to resolve.
    pub fn from_raw(raw: RawBody, scope: Option<&AttachmentScope>) -> Result<Self> {
        let RawBody { schema, values } = raw;
        let mut resolved = Vec::with_capacity(values.len());

        for (entry, list) in schema.fields().iter().zip(values) {
            let field = entry.name();
            let occurrence = entry.occurrence();
            if occurrence != Occurrence::List && list.len() > 1 {
                return Err(SwaError::validation(
                    field,
                    with_value("only one element allowed", list.len()),
                ));
            }
            if occurrence == Occurrence::Mandatory && list.is_empty() {
                return Err(SwaError::validation(
                    field,
                    "must provide at least one element",
                ));
            }
            if occurrence == Occurrence::List {
                check_list(entry, &list)?;
            }
            resolved.push(entry.spec().init_on_deserialization(field, &list, scope)?);
        }

        Ok(Self { schema, values: resolved })
    }

    pub fn schema(&self) -> &Arc<BodySchema> {
        &self.schema
    }

    /// A field in its user-facing form. `None` for unknown names.
    pub fn get(&self, name: &str) -> Option<FieldValue> {
        let index = self.schema.index_of(name)?;
        let list = &self.values[index];
        Some(match self.schema.fields()[index].occurrence() {
            Occurrence::List => FieldValue::Many(list.clone()),
            Occurrence::Mandatory | Occurrence::Optional => {
                list.first().cloned().map_or(FieldValue::Null, FieldValue::Single)
            }
        })
    }

    /// The internal list of a field.
    pub fn values(&self, name: &str) -> Option<&[Value]> {
        let index = self.schema.index_of(name)?;
        Some(&self.values[index])
    }

    /// Fields with their internal lists, in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&FieldEntry, &[Value])> {
        self.schema
            .fields()
            .iter()
            .zip(self.values.iter().map(Vec::as_slice))
    }

    /// Every file attachment held by the body, in field order.
    pub fn attachments(&self) -> Vec<&Attachment> {
        self.values
            .iter()
            .flatten()
            .filter_map(Value::as_attachment)
            .collect()
    }
}

/// Expand one user-supplied field into its internal list.
fn instantiate_field(entry: &FieldEntry, provided: Option<FieldValue>) -> Result<Vec<Value>> {
    let field = entry.name();
    let spec = entry.spec();
    let expected = spec.element_type();

    match (entry.occurrence(), provided) {
        (Occurrence::List, Some(FieldValue::Many(list))) => {
            check_list(entry, &list)?;
            spec.init_on_instantiation(field, &list)
        }
        (Occurrence::List, None) => {
            check_list(entry, &[])?;
            Ok(Vec::new())
        }
        (Occurrence::List, Some(other)) => Err(SwaError::validation(
            field,
            format!("expected a list of {expected}, received {}", other.type_name()),
        )),
        (Occurrence::Optional, None | Some(FieldValue::Null)) => Ok(Vec::new()),
        (Occurrence::Mandatory, None) => Err(SwaError::validation(field, "argument missing")),
        (_, Some(FieldValue::Single(value))) if spec.accepts(value.kind()) => {
            spec.init_on_instantiation(field, std::slice::from_ref(&value))
        }
        (_, Some(other)) => Err(SwaError::validation(
            field,
            format!("expected {expected}, received {}", other.type_name()),
        )),
    }
}

/// Occurrence bounds and element kinds of a list field.
fn check_list(entry: &FieldEntry, list: &[Value]) -> Result<()> {
    let field = entry.name();
    let spec = entry.spec();
    let min = spec.min() as usize;

    if list.len() < min {
        return Err(SwaError::validation(
            field,
            with_value(format!("expected at least {min} elements"), list.len()),
        ));
    }
    if let MaxOccurs::Bounded(max) = spec.max() {
        if !spec.max().allows(list.len()) {
            return Err(SwaError::validation(
                field,
                with_value(format!("expected at most {max} elements"), list.len()),
            ));
        }
    }
    if let Some(bad) = list.iter().find(|v| !spec.accepts(v.kind())) {
        return Err(SwaError::validation(
            field,
            with_value(
                format!("list items must be {}, received {}", spec.element_type(), bad.kind()),
                bad,
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::value::ValueKind;
    use crate::schema::element::ElementSpec;
    use crate::schema::occurrence::Annotation;

    fn schema() -> Arc<BodySchema> {
        BodySchema::builder("Order")
            .field("id", Annotation::Absent, ElementSpec::integer())
            .field("note", Annotation::optional(ValueKind::String), ElementSpec::string())
            .field(
                "tags",
                Annotation::list(ValueKind::String),
                ElementSpec::string().min_occurs(1).max_occurs(2),
            )
            .build()
            .unwrap()
    }

    fn tags(n: usize) -> FieldValue {
        FieldValue::many((0..n).map(|i| format!("t{i}")))
    }

    #[test]
    fn test_new_expands_fields() {
        let body = MessageBody::new(
            &schema(),
            [("id", FieldValue::single(7)), ("tags", tags(2))],
        )
        .unwrap();
        assert_eq!(body.values("id").unwrap(), &[Value::Integer(7)]);
        assert_eq!(body.values("note").unwrap(), &[] as &[Value]);
        assert_eq!(body.get("note"), Some(FieldValue::Null));
        assert_eq!(body.get("id"), Some(FieldValue::single(7)));
        assert_eq!(body.get("tags").unwrap().as_many().unwrap().len(), 2);
        assert_eq!(body.get("missing"), None);
    }

    #[test]
    fn test_list_bounds() {
        let schema = schema();
        for (n, ok) in [(0, false), (1, true), (2, true), (3, false)] {
            let result = MessageBody::new(&schema, [("id", FieldValue::single(1)), ("tags", tags(n))]);
            assert_eq!(result.is_ok(), ok, "{n} tags");
        }
    }

    #[test]
    fn test_missing_mandatory() {
        let err = MessageBody::new(&schema(), [("tags", tags(1))]).unwrap_err();
        assert_eq!(err.to_string(), "Validation failed for 'id': argument missing");
    }

    #[test]
    fn test_scalar_type_mismatch_cites_received_type() {
        let err = MessageBody::new(
            &schema(),
            [("id", FieldValue::single("seven")), ("tags", tags(1))],
        )
        .unwrap_err();
        assert!(err.to_string().ends_with("expected integer, received string"), "{err}");

        let err = MessageBody::new(&schema(), [("id", tags(1)), ("tags", tags(1))]).unwrap_err();
        assert!(err.to_string().ends_with("received list"), "{err}");

        let err = MessageBody::new(
            &schema(),
            [("id", FieldValue::single(1)), ("tags", FieldValue::single("x"))],
        )
        .unwrap_err();
        assert!(err.to_string().contains("expected a list"), "{err}");
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = MessageBody::new(&schema(), [("bogus", FieldValue::Null)]).unwrap_err();
        assert!(matches!(err, SwaError::Validation { .. }));
    }

    #[test]
    fn test_from_raw_occurrence_checks() {
        let schema = schema();

        let mut raw = RawBody::new(&schema);
        raw.push(0, Value::Integer(1));
        raw.push(0, Value::Integer(2));
        raw.push(2, Value::from("t"));
        let err = MessageBody::from_raw(raw, None).unwrap_err();
        assert!(err.to_string().contains("only one element allowed $$2$$"), "{err}");

        let mut raw = RawBody::new(&schema);
        raw.push(2, Value::from("t"));
        let err = MessageBody::from_raw(raw, None).unwrap_err();
        assert!(err.to_string().ends_with("must provide at least one element"));

        let mut raw = RawBody::new(&schema);
        raw.push(0, Value::Integer(5));
        raw.push(2, Value::from("t"));
        let body = MessageBody::from_raw(raw, None).unwrap();
        assert_eq!(body.get("id"), Some(FieldValue::single(5)));
        assert_eq!(body.get("note"), Some(FieldValue::Null));
    }
}
