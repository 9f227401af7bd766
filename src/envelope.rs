//! SOAP 1.1 envelopes carrying X-Road message headers.

use quick_xml::escape::escape;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde::Serialize;

use crate::error::{Result, SwaError};
use crate::xml::xml_error;

pub const SOAP11_NAMESPACE: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const XROAD_NAMESPACE: &str = "http://x-road.eu/xsd/xroad.xsd";
pub const IDENTIFIERS_NAMESPACE: &str = "http://x-road.eu/xsd/identifiers";

/// An X-Road client or service identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct XRoadIdentifier {
    /// `MEMBER`, `SUBSYSTEM` or `SERVICE`.
    pub object_type: String,
    pub instance: String,
    pub member_class: String,
    pub member_code: String,
    pub subsystem_code: Option<String>,
    pub service_code: Option<String>,
    pub service_version: Option<String>,
}

impl XRoadIdentifier {
    pub fn subsystem(instance: &str, member_class: &str, member_code: &str, subsystem: &str) -> Self {
        Self {
            object_type: "SUBSYSTEM".into(),
            instance: instance.into(),
            member_class: member_class.into(),
            member_code: member_code.into(),
            subsystem_code: Some(subsystem.into()),
            ..Self::default()
        }
    }

    /// A service of a subsystem.
    pub fn service(
        provider: &XRoadIdentifier,
        service_code: &str,
        service_version: Option<&str>,
    ) -> Self {
        Self {
            object_type: "SERVICE".into(),
            service_code: Some(service_code.into()),
            service_version: service_version.map(String::from),
            ..provider.clone()
        }
    }

    fn parts(&self) -> Vec<(&'static str, &str)> {
        let mut parts = vec![
            ("xRoadInstance", self.instance.as_str()),
            ("memberClass", self.member_class.as_str()),
            ("memberCode", self.member_code.as_str()),
        ];
        let optional = [
            ("subsystemCode", &self.subsystem_code),
            ("serviceCode", &self.service_code),
            ("serviceVersion", &self.service_version),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                parts.push((name, value.as_str()));
            }
        }
        parts
    }

    fn set(&mut self, name: &str, value: String) {
        match name {
            "xRoadInstance" => self.instance = value,
            "memberClass" => self.member_class = value,
            "memberCode" => self.member_code = value,
            "subsystemCode" => self.subsystem_code = Some(value),
            "serviceCode" => self.service_code = Some(value),
            "serviceVersion" => self.service_version = Some(value),
            _ => {}
        }
    }
}

/// The X-Road header block of a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct XRoadHeader {
    pub client: Option<XRoadIdentifier>,
    pub service: Option<XRoadIdentifier>,
    pub id: Option<String>,
    pub user_id: Option<String>,
    pub issue: Option<String>,
    pub protocol_version: Option<String>,
}

/// A parsed envelope: the header fields and the raw body content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub header: Option<XRoadHeader>,
    /// XML inside `<Body>`, trimmed.
    pub body: String,
}

/// Wrap a serialized body in a SOAP 1.1 envelope.
pub fn wrap_envelope(body_xml: &str, header: Option<&XRoadHeader>) -> Result<String> {
    let mut w = Writer::new(Vec::new());
    let mut envelope = BytesStart::new("SOAP-ENV:Envelope");
    envelope.push_attribute(("xmlns:SOAP-ENV", SOAP11_NAMESPACE));
    if header.is_some() {
        envelope.push_attribute(("xmlns:xrd", XROAD_NAMESPACE));
        envelope.push_attribute(("xmlns:id", IDENTIFIERS_NAMESPACE));
    }
    w.write_event(Event::Start(envelope)).map_err(xml_error)?;

    if let Some(header) = header {
        start(&mut w, BytesStart::new("SOAP-ENV:Header"))?;
        for (tag, ident) in [("xrd:client", &header.client), ("xrd:service", &header.service)] {
            if let Some(ident) = ident {
                let mut el = BytesStart::new(tag);
                el.push_attribute(("id:objectType", ident.object_type.as_str()));
                start(&mut w, el)?;
                for (name, value) in ident.parts() {
                    text_element(&mut w, &format!("id:{name}"), value)?;
                }
                end(&mut w, tag)?;
            }
        }
        let simple = [
            ("xrd:id", &header.id),
            ("xrd:userId", &header.user_id),
            ("xrd:issue", &header.issue),
            ("xrd:protocolVersion", &header.protocol_version),
        ];
        for (tag, value) in simple {
            if let Some(value) = value {
                text_element(&mut w, tag, value)?;
            }
        }
        end(&mut w, "SOAP-ENV:Header")?;
    }

    start(&mut w, BytesStart::new("SOAP-ENV:Body"))?;
    w.get_mut().extend_from_slice(body_xml.as_bytes());
    end(&mut w, "SOAP-ENV:Body")?;
    end(&mut w, "SOAP-ENV:Envelope")?;
    String::from_utf8(w.into_inner()).map_err(xml_error)
}

fn start(w: &mut Writer<Vec<u8>>, el: BytesStart<'_>) -> Result<()> {
    w.write_event(Event::Start(el)).map_err(xml_error)
}

fn end(w: &mut Writer<Vec<u8>>, tag: &str) -> Result<()> {
    w.write_event(Event::End(BytesEnd::new(tag))).map_err(xml_error)
}

fn text_element(w: &mut Writer<Vec<u8>>, tag: &str, value: &str) -> Result<()> {
    start(w, BytesStart::new(tag))?;
    w.write_event(Event::Text(BytesText::new(value)))
        .map_err(xml_error)?;
    end(w, tag)
}

/// Split an envelope into its X-Road header and body content.
///
/// Elements are matched by local name.
pub fn parse_envelope(xml: &str) -> Result<Envelope> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut path: Vec<String> = Vec::new();
    let mut header: Option<XRoadHeader> = None;
    let mut ident: Option<XRoadIdentifier> = None;
    let mut text = String::new();
    let mut body_start = None;
    let mut body = None;

    loop {
        let before = reader.buffer_position() as usize;
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) => {
                let local = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                match (path.len(), local.as_str()) {
                    (0, "Envelope") => {}
                    (0, other) => {
                        return Err(SwaError::Xml(format!(
                            "expected a SOAP Envelope, found <{other}>"
                        )))
                    }
                    (1, "Header") => header = Some(XRoadHeader::default()),
                    (1, "Body") => body_start = Some(reader.buffer_position() as usize),
                    (2, "client" | "service") if in_header(&path) => {
                        let object_type = e
                            .attributes()
                            .flatten()
                            .find(|a| a.key.local_name().as_ref() == b"objectType")
                            .map(|a| String::from_utf8_lossy(&a.value).into_owned())
                            .unwrap_or_default();
                        ident = Some(XRoadIdentifier {
                            object_type,
                            ..XRoadIdentifier::default()
                        });
                    }
                    _ => {}
                }
                path.push(local);
                text.clear();
            }
            Event::Text(e) => {
                text.push_str(&e.unescape().map_err(xml_error)?);
            }
            Event::End(_) => {
                let Some(local) = path.pop() else {
                    break;
                };
                let value = std::mem::take(&mut text).trim().to_string();
                match path.len() {
                    1 if local == "Body" => {
                        if let Some(start) = body_start {
                            body = Some(xml[start..before].trim().to_string());
                        }
                    }
                    2 if in_header(&path) => {
                        if let Some(h) = header.as_mut() {
                            match local.as_str() {
                                "client" => h.client = ident.take(),
                                "service" => h.service = ident.take(),
                                "id" => h.id = Some(value),
                                "userId" => h.user_id = Some(value),
                                "issue" => h.issue = Some(value),
                                "protocolVersion" => h.protocol_version = Some(value),
                                _ => {}
                            }
                        }
                    }
                    3 if in_header(&path) => {
                        if let Some(id) = ident.as_mut() {
                            id.set(&local, value);
                        }
                    }
                    _ => {}
                }
                if path.is_empty() {
                    break;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let body = body.ok_or_else(|| SwaError::Xml("SOAP Body not found".to_string()))?;
    Ok(Envelope { header, body })
}

fn in_header(path: &[String]) -> bool {
    path.get(1).is_some_and(|p| p == "Header")
}

/// Render a SOAP 1.1 fault for an error.
///
/// Errors the peer caused are `Client` faults, the rest `Server` faults.
pub fn fault_response(error: &SwaError) -> String {
    let code = if error.is_client_error() { "Client" } else { "Server" };
    format!(
        "<SOAP-ENV:Envelope xmlns:SOAP-ENV=\"{SOAP11_NAMESPACE}\"><SOAP-ENV:Body>\
         <SOAP-ENV:Fault><faultcode>SOAP-ENV:{code}</faultcode>\
         <faultstring>{}</faultstring></SOAP-ENV:Fault>\
         </SOAP-ENV:Body></SOAP-ENV:Envelope>",
        escape(error.to_string().as_str())
    )
}
