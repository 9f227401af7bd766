//! XML encoding of message bodies.
//!
//! Each field maps to a sequence of child elements of the body's root
//! element, one per value, so the codec only ever sees lists. Occurrence
//! rules are applied afterwards by [`MessageBody::from_raw`].

use std::sync::Arc;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{Result, SwaError};
use crate::model::value::Value;
use crate::schema::body::{MessageBody, RawBody};
use crate::schema::builder::{BodySchema, FieldEntry};

pub(crate) fn xml_error(e: impl std::fmt::Display) -> SwaError {
    SwaError::Xml(e.to_string())
}

/// Serialize a body as a standalone XML element (no declaration).
pub fn serialize_body(body: &MessageBody) -> Result<String> {
    let schema = body.schema();
    let mut writer = Writer::new(Vec::new());

    let mut root = BytesStart::new(schema.tag());
    if let Some(ns) = schema.namespace() {
        root.push_attribute(("xmlns", ns));
    }
    for (prefix, uri) in schema.namespace_map() {
        root.push_attribute((format!("xmlns:{prefix}").as_str(), uri.as_str()));
    }
    writer.write_event(Event::Start(root)).map_err(xml_error)?;

    for (entry, values) in body.iter() {
        let (name, default_ns) = element_name(schema, entry);
        for value in values {
            let mut start = BytesStart::new(name.as_str());
            if let Some(ns) = default_ns {
                start.push_attribute(("xmlns", ns));
            }
            writer.write_event(Event::Start(start)).map_err(xml_error)?;
            let text = value.lexical();
            writer
                .write_event(Event::Text(BytesText::new(&text)))
                .map_err(xml_error)?;
            writer
                .write_event(Event::End(BytesEnd::new(name.as_str())))
                .map_err(xml_error)?;
        }
    }

    writer
        .write_event(Event::End(BytesEnd::new(schema.tag())))
        .map_err(xml_error)?;
    String::from_utf8(writer.into_inner()).map_err(xml_error)
}

/// Qualified child name, plus an `xmlns` to declare when no prefix is bound.
fn element_name<'a>(schema: &BodySchema, entry: &'a FieldEntry) -> (String, Option<&'a str>) {
    match entry.namespace() {
        Some(ns) if Some(ns) != schema.namespace() => {
            match schema.namespace_map().iter().find(|(_, uri)| uri.as_str() == ns) {
                Some((prefix, _)) => (format!("{prefix}:{}", entry.tag()), None),
                None => (entry.tag().to_string(), Some(ns)),
            }
        }
        _ => (entry.tag().to_string(), None),
    }
}

/// Parse a body element into per-field value lists.
///
/// Children are matched by local name. Unknown children, nested markup
/// inside a field and unparsable values are rejected.
pub fn parse_body(schema: &Arc<BodySchema>, xml: &str) -> Result<RawBody> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut raw = RawBody::new(schema);
    let mut depth = 0usize;
    let mut current: Option<usize> = None;
    let mut text = String::new();
    let mut seen_root = false;

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) => {
                let local = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                depth += 1;
                match depth {
                    1 => {
                        if local != schema.tag() {
                            return Err(SwaError::Xml(format!(
                                "expected <{}>, found <{local}>",
                                schema.tag()
                            )));
                        }
                        seen_root = true;
                    }
                    2 => {
                        let index = schema.index_of_tag(&local).ok_or_else(|| {
                            SwaError::Xml(format!("unexpected element <{local}> in <{}>", schema.tag()))
                        })?;
                        current = Some(index);
                        text.clear();
                    }
                    _ => {
                        return Err(SwaError::Xml(format!(
                            "element <{local}> may not contain elements"
                        )));
                    }
                }
            }
            Event::Empty(e) => {
                let local = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                match depth {
                    0 if local == schema.tag() => {
                        seen_root = true;
                        break;
                    }
                    1 => {
                        let index = schema.index_of_tag(&local).ok_or_else(|| {
                            SwaError::Xml(format!("unexpected element <{local}> in <{}>", schema.tag()))
                        })?;
                        push_value(&mut raw, schema, index, "")?;
                    }
                    _ => {
                        return Err(SwaError::Xml(format!("unexpected element <{local}>")));
                    }
                }
            }
            Event::Text(e) => {
                let unescaped = e.unescape().map_err(xml_error)?;
                if current.is_some() {
                    text.push_str(&unescaped);
                } else if !unescaped.trim().is_empty() {
                    return Err(SwaError::Xml(format!(
                        "unexpected text in <{}>",
                        schema.tag()
                    )));
                }
            }
            Event::CData(e) => {
                if current.is_some() {
                    text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Event::End(_) => {
                if depth == 2 {
                    if let Some(index) = current.take() {
                        push_value(&mut raw, schema, index, &text)?;
                    }
                }
                depth = depth.saturating_sub(1);
                if depth == 0 && seen_root {
                    break;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_root {
        return Err(SwaError::Xml(format!("no <{}> element found", schema.tag())));
    }
    Ok(raw)
}

fn push_value(raw: &mut RawBody, schema: &BodySchema, index: usize, text: &str) -> Result<()> {
    let entry = &schema.fields()[index];
    let value = Value::parse(entry.spec().parse_kind(), text)
        .map_err(|reason| SwaError::validation(entry.name(), reason))?;
    raw.push(index, value);
    Ok(())
}
