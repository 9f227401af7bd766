//! Message-body schemas, assembled from field declarations.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use super::element::ElementSpec;
use super::occurrence::{classify, Annotation, Occurrence};
use crate::error::{Result, SwaError};

/// One field of a built schema.
#[derive(Debug, Clone)]
pub struct FieldEntry {
    name: String,
    tag: String,
    namespace: Option<String>,
    spec: ElementSpec,
}

impl FieldEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// XML element name (defaults to the field name).
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Element namespace; `None` inherits the body's.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn spec(&self) -> &ElementSpec {
        &self.spec
    }

    pub fn occurrence(&self) -> Occurrence {
        // Every entry is bound by `BodySchemaBuilder::build`.
        self.spec.occurrence().unwrap_or(Occurrence::Mandatory)
    }
}

/// The validated field table of a message body.
///
/// Built once with [`BodySchema::builder`] and shared by every body of that type.
#[derive(Debug)]
pub struct BodySchema {
    name: String,
    tag: String,
    namespace: Option<String>,
    namespace_map: BTreeMap<String, String>,
    fields: Vec<FieldEntry>,
}

impl BodySchema {
    pub fn builder(name: impl Into<String>) -> BodySchemaBuilder {
        BodySchemaBuilder {
            name: name.into(),
            tag: None,
            namespace: None,
            namespace_map: BTreeMap::new(),
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Root element name.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Prefixes declared on the body and on its fields.
    pub fn namespace_map(&self) -> &BTreeMap<String, String> {
        &self.namespace_map
    }

    pub fn fields(&self) -> &[FieldEntry] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldEntry> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub(crate) fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Field whose element name is `tag`.
    pub(crate) fn index_of_tag(&self, tag: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.tag == tag)
    }
}

/// Schemas are compared by identity.
impl PartialEq for BodySchema {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

/// Collects field declarations; [`build`](Self::build) validates them.
#[derive(Debug)]
pub struct BodySchemaBuilder {
    name: String,
    tag: Option<String>,
    namespace: Option<String>,
    namespace_map: BTreeMap<String, String>,
    fields: Vec<(String, Annotation, ElementSpec)>,
}

impl BodySchemaBuilder {
    /// Root element name (defaults to the schema name).
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        self.namespace_map.insert(prefix.into(), uri.into());
        self
    }

    /// Declare a field. `annotation` decides its occurrence.
    pub fn field(mut self, name: impl Into<String>, annotation: Annotation, spec: ElementSpec) -> Self {
        self.fields.push((name.into(), annotation, spec));
        self
    }

    /// Validate every declaration and fix the occurrence of each field.
    pub fn build(self) -> Result<Arc<BodySchema>> {
        let class = self.name;
        let mut namespace_map = self.namespace_map;
        let mut names = HashSet::new();
        let mut tags = HashSet::new();
        let mut fields = Vec::with_capacity(self.fields.len());

        for (name, annotation, mut spec) in self.fields {
            if !names.insert(name.clone()) {
                return Err(SwaError::definition(&class, &name, "field declared twice"));
            }
            spec.check_definition(&class, &name)?;
            let occurrence = classify(&annotation, spec.element_type(), &class, &name)?;
            spec.bind_occurrence(occurrence, &class, &name)?;

            let tag = spec.element_tag().unwrap_or(&name).to_string();
            if !tags.insert(tag.clone()) {
                return Err(SwaError::definition(
                    &class,
                    &name,
                    format!("element <{tag}> is already used by another field"),
                ));
            }
            for (prefix, uri) in spec.namespace_map() {
                namespace_map
                    .entry(prefix.clone())
                    .or_insert_with(|| uri.clone());
            }

            debug!(
                class = %class,
                field = %name,
                occurrence = %occurrence,
                kind = %spec.element_type(),
                "Declared field"
            );
            fields.push(FieldEntry {
                namespace: spec.element_namespace().map(String::from),
                name,
                tag,
                spec,
            });
        }

        Ok(Arc::new(BodySchema {
            tag: self.tag.unwrap_or_else(|| class.clone()),
            name: class,
            namespace: self.namespace,
            namespace_map,
            fields,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::value::ValueKind;

    #[test]
    fn test_build_binds_occurrences() {
        let schema = BodySchema::builder("Person")
            .namespace("urn:people")
            .field("name", Annotation::Absent, ElementSpec::string())
            .field("nick", Annotation::optional(ValueKind::String), ElementSpec::string())
            .field(
                "born",
                Annotation::list(ValueKind::Date),
                ElementSpec::date().tag("birthDate"),
            )
            .build()
            .unwrap();

        assert_eq!(schema.tag(), "Person");
        assert_eq!(schema.fields().len(), 3);
        assert_eq!(schema.fields()[0].occurrence(), Occurrence::Mandatory);
        assert_eq!(schema.fields()[1].occurrence(), Occurrence::Optional);
        let born = schema.field("born").unwrap();
        assert_eq!(born.occurrence(), Occurrence::List);
        assert_eq!(born.tag(), "birthDate");
        assert_eq!(born.spec().occurrence(), Some(Occurrence::List));
    }

    #[test]
    fn test_annotation_mismatch_fails_build() {
        let err = BodySchema::builder("Person")
            .field("age", Annotation::of(ValueKind::String), ElementSpec::integer())
            .build()
            .unwrap_err();
        match err {
            SwaError::Definition { class, field, .. } => {
                assert_eq!(class, "Person");
                assert_eq!(field, "age");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_names_and_tags() {
        assert!(BodySchema::builder("B")
            .field("a", Annotation::Absent, ElementSpec::string())
            .field("a", Annotation::Absent, ElementSpec::string())
            .build()
            .is_err());
        assert!(BodySchema::builder("B")
            .field("a", Annotation::Absent, ElementSpec::string().tag("x"))
            .field("b", Annotation::Absent, ElementSpec::string().tag("x"))
            .build()
            .is_err());
    }

    #[test]
    fn test_field_prefixes_collected() {
        let schema = BodySchema::builder("B")
            .prefix("a", "urn:a")
            .field(
                "f",
                Annotation::Absent,
                ElementSpec::string().namespace("urn:b").prefix("b", "urn:b"),
            )
            .build()
            .unwrap();
        assert_eq!(schema.namespace_map().get("b").map(String::as_str), Some("urn:b"));
        assert_eq!(schema.namespace_map().len(), 2);
        assert_eq!(schema.fields()[0].namespace(), Some("urn:b"));
    }
}
