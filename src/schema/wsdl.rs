//! XML Schema (`<wsdl:types>`) rendering for message-body schemas.

use std::collections::BTreeSet;
use std::sync::Arc;

use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::Writer;

use super::builder::BodySchema;
use super::element::{ElementSpec, SWAREF_PREFIX, XSD_PREFIX};
use super::facets::{Facets, Whitespace};
use super::occurrence::Occurrence;
use crate::error::Result;
use crate::model::value::ValueKind;
use crate::xml::xml_error;

pub const XSD_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema";
pub const SWAREF_NAMESPACE: &str = "http://ws-i.org/profiles/basic/1.1/xsd";
pub const SWAREF_LOCATION: &str = "http://ws-i.org/profiles/basic/1.1/swaref.xsd";

/// Where generated types live.
#[derive(Debug, Clone)]
pub struct TypeOptions {
    pub target_namespace: String,
    /// Prefix bound to `target_namespace` (`tns` by default).
    pub type_prefix: String,
}

impl Default for TypeOptions {
    fn default() -> Self {
        Self {
            target_namespace: "http://example.org/xroad-swa".to_string(),
            type_prefix: "tns".to_string(),
        }
    }
}

/// Render one `<xs:schema>` describing `schemas`.
///
/// Constrained fields get a named `simpleType`; fields with identical
/// constraints share it.
pub fn render_types(schemas: &[Arc<BodySchema>], options: &TypeOptions) -> Result<String> {
    let mut w = XsdWriter::new();
    let uses_swaref = schemas
        .iter()
        .flat_map(|s| s.fields())
        .any(|f| f.spec().element_type() == ValueKind::File);

    let tns = format!("xmlns:{}", options.type_prefix);
    let mut attrs = vec![
        ("xmlns:xs", XSD_NAMESPACE),
        (tns.as_str(), options.target_namespace.as_str()),
        ("targetNamespace", options.target_namespace.as_str()),
        ("elementFormDefault", "qualified"),
    ];
    if uses_swaref {
        attrs.push(("xmlns:ref", SWAREF_NAMESPACE));
    }
    w.start("xs:schema", &attrs)?;

    if uses_swaref {
        w.empty(
            "xs:import",
            &[("namespace", SWAREF_NAMESPACE), ("schemaLocation", SWAREF_LOCATION)],
        )?;
    }

    let mut emitted = BTreeSet::new();
    for field in schemas.iter().flat_map(|s| s.fields()) {
        let spec = field.spec();
        if spec.has_constraints() && emitted.insert(spec.local_type_name()) {
            write_simple_type(&mut w, spec)?;
        }
    }

    for schema in schemas {
        let type_ref = format!("{}:{}", options.type_prefix, schema.tag());
        w.empty("xs:element", &[("name", schema.tag()), ("type", type_ref.as_str())])?;
        w.start("xs:complexType", &[("name", schema.tag())])?;
        w.start("xs:sequence", &[])?;
        for field in schema.fields() {
            let (min, max) = occurs(field.occurrence(), field.spec());
            let type_name = type_name(field.spec(), options);
            w.empty(
                "xs:element",
                &[
                    ("name", field.tag()),
                    ("type", type_name.as_str()),
                    ("minOccurs", min.as_str()),
                    ("maxOccurs", max.as_str()),
                ],
            )?;
        }
        w.end("xs:sequence")?;
        w.end("xs:complexType")?;
    }

    w.end("xs:schema")?;
    w.finish()
}

/// Qualified type name, honoring the configured target prefix.
fn type_name(spec: &ElementSpec, options: &TypeOptions) -> String {
    if spec.element_type() == ValueKind::File {
        format!("{SWAREF_PREFIX}:{}", spec.local_type_name())
    } else if spec.has_constraints() {
        format!("{}:{}", options.type_prefix, spec.local_type_name())
    } else {
        format!("{XSD_PREFIX}:{}", spec.local_type_name())
    }
}

fn occurs(occurrence: Occurrence, spec: &ElementSpec) -> (String, String) {
    match occurrence {
        Occurrence::Mandatory => ("1".into(), "1".into()),
        Occurrence::Optional => ("0".into(), "1".into()),
        Occurrence::List => (spec.min().to_string(), spec.max().to_string()),
    }
}

fn write_simple_type(w: &mut XsdWriter, spec: &ElementSpec) -> Result<()> {
    let base = format!("{XSD_PREFIX}:{}", spec.element_type().xsd_name());
    w.start("xs:simpleType", &[("name", spec.local_type_name().as_str())])?;
    w.start("xs:restriction", &[("base", base.as_str())])?;

    match spec.facets() {
        Facets::Text(text) => {
            if let Some(n) = text.length {
                w.facet("xs:length", &n.to_string())?;
            }
            if let Some(n) = text.min_length {
                w.facet("xs:minLength", &n.to_string())?;
            }
            if let Some(n) = text.max_length {
                w.facet("xs:maxLength", &n.to_string())?;
            }
            if let Some(p) = &text.pattern {
                w.facet("xs:pattern", p.source())?;
            }
            for e in &text.enumerations {
                w.facet("xs:enumeration", &e.lexical())?;
            }
            if text.whitespace != Whitespace::Preserve {
                w.facet("xs:whiteSpace", text.whitespace.xsd_name())?;
            }
        }
        Facets::Range(range) => {
            if let Some(n) = range.total_digits {
                w.facet("xs:totalDigits", &n.to_string())?;
            }
            if let Some(v) = &range.min_value {
                w.facet("xs:minInclusive", &v.lexical())?;
            }
            if let Some(v) = &range.max_value {
                w.facet("xs:maxInclusive", &v.lexical())?;
            }
            if let Some(p) = &range.pattern {
                w.facet("xs:pattern", p.source())?;
            }
            for e in &range.enumerations {
                w.facet("xs:enumeration", &e.lexical())?;
            }
        }
        Facets::File(_) => {}
    }

    w.end("xs:restriction")?;
    w.end("xs:simpleType")
}

struct XsdWriter {
    inner: Writer<Vec<u8>>,
}

impl XsdWriter {
    fn new() -> Self {
        Self {
            inner: Writer::new_with_indent(Vec::new(), b' ', 2),
        }
    }

    fn start(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
        let tag = BytesStart::new(name).with_attributes(attrs.iter().copied());
        self.inner.write_event(Event::Start(tag)).map_err(xml_error)
    }

    fn empty(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
        let tag = BytesStart::new(name).with_attributes(attrs.iter().copied());
        self.inner.write_event(Event::Empty(tag)).map_err(xml_error)
    }

    fn facet(&mut self, name: &str, value: &str) -> Result<()> {
        self.empty(name, &[("value", value)])
    }

    fn end(&mut self, name: &str) -> Result<()> {
        self.inner
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(xml_error)
    }

    fn finish(self) -> Result<String> {
        String::from_utf8(self.inner.into_inner()).map_err(xml_error)
    }
}
