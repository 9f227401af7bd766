//! SOAP-with-Attachments request and response handling.
//!
//! A request is either a bare SOAP document or a `multipart/related`
//! message whose root part is the SOAP document. Attachments of a request live
//! in its [`AttachmentScope`] and are released together with the request.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::Config;
use crate::envelope::{parse_envelope, wrap_envelope, XRoadHeader};
use crate::error::{Result, SwaError};
use crate::model::attachment::{normalize_content_id, Attachment};
use crate::model::part::DecodedBodyPart;
use crate::multipart::decoder::{decode_multipart, DecoderOptions};
use crate::multipart::encoder::{encode_multipart, EncodedMessage};
use crate::multipart::header::ParsedValue;
use crate::multipart::transfer::normalize_to_utf8;
use crate::schema::body::MessageBody;
use crate::schema::builder::BodySchema;
use crate::schema::wsdl::{render_types, TypeOptions};
use crate::storage::{AttachmentScope, WeakStorage};
use crate::xml::{parse_body, serialize_body};

/// Shared registry for the attachments of in-flight requests.
pub type PartStorage = WeakStorage<DecodedBodyPart>;

/// An incoming SOAP request with its attachments.
#[derive(Debug)]
pub struct SwaRequest {
    header: Option<XRoadHeader>,
    body_xml: String,
    scope: AttachmentScope,
}

impl SwaRequest {
    /// Parse a request body as received with `content_type`.
    ///
    /// For multipart requests the root part is the one named by the `start`
    /// parameter, or the first part when `start` is absent.
    pub fn parse(
        content_type: &str,
        body: &[u8],
        storage: &Arc<PartStorage>,
        options: &DecoderOptions,
    ) -> Result<Self> {
        let parsed = ParsedValue::parse(content_type);
        let mut scope = AttachmentScope::new(Arc::clone(storage));

        let document = if parsed.value.starts_with("multipart/") {
            let mut parts = decode_multipart(content_type, body, options)?;
            let start = parsed.param("start").and_then(normalize_content_id);
            let root_index = match &start {
                Some(cid) => parts
                    .iter()
                    .position(|p| p.content_id.as_deref() == Some(cid.as_str()))
                    .ok_or_else(|| {
                        SwaError::MalformedBody(format!("root part {cid} not found"))
                    })?,
                None => 0,
            };
            let root = parts.remove(root_index);
            debug!(
                root = root.content_id.as_deref().unwrap_or("-"),
                attachments = parts.len(),
                "Split multipart request"
            );
            scope.register(parts, options)?;
            root.text()
        } else {
            let bytes = if options.normalize_charset {
                let charset = parsed.param("charset").map(str::to_ascii_lowercase);
                normalize_to_utf8(body.to_vec(), charset.as_deref()).0
            } else {
                body.to_vec()
            };
            String::from_utf8(bytes)
                .map_err(|e| SwaError::Xml(format!("request is not UTF-8: {e}")))?
        };

        let envelope = parse_envelope(&document)?;
        info!(attachments = scope.len(), "Parsed SOAP request");
        Ok(Self {
            header: envelope.header,
            body_xml: envelope.body,
            scope,
        })
    }

    pub fn header(&self) -> Option<&XRoadHeader> {
        self.header.as_ref()
    }

    /// The XML inside the SOAP Body.
    pub fn body_xml(&self) -> &str {
        &self.body_xml
    }

    pub fn attachments(&self) -> &AttachmentScope {
        &self.scope
    }

    /// Parse and validate the body against `schema`, resolving `cid:` references.
    pub fn deserialize(&self, schema: &Arc<BodySchema>) -> Result<MessageBody> {
        let raw = parse_body(schema, &self.body_xml)?;
        MessageBody::from_raw(raw, Some(&self.scope))
    }
}

/// The body schemas of one service together with its decoding and type settings.
///
/// Requests parsed through a service register their attachments in its shared
/// storage.
#[derive(Debug)]
pub struct SwaService {
    schemas: Vec<Arc<BodySchema>>,
    storage: Arc<PartStorage>,
    decoder: DecoderOptions,
    types: TypeOptions,
}

impl SwaService {
    pub fn new(config: &Config) -> Self {
        Self {
            schemas: Vec::new(),
            storage: Arc::new(PartStorage::new()),
            decoder: config.decoder_options(),
            types: config.type_options(),
        }
    }

    pub fn with_schema(mut self, schema: Arc<BodySchema>) -> Self {
        self.schemas.push(schema);
        self
    }

    /// Schema whose root element is `tag`.
    pub fn schema(&self, tag: &str) -> Option<&Arc<BodySchema>> {
        self.schemas.iter().find(|s| s.tag() == tag)
    }

    pub fn storage(&self) -> &Arc<PartStorage> {
        &self.storage
    }

    pub fn parse_request(&self, content_type: &str, body: &[u8]) -> Result<SwaRequest> {
        SwaRequest::parse(content_type, body, &self.storage, &self.decoder)
    }

    /// `<xs:schema>` describing every registered body schema.
    pub fn wsdl_types(&self) -> Result<String> {
        debug!(
            schemas = self.schemas.len(),
            namespace = %self.types.target_namespace,
            "Rendering types"
        );
        render_types(&self.schemas, &self.types)
    }
}

/// Encode a response body, with its file values as attachments.
///
/// Bodies without files go out as plain `text/xml`.
pub fn encode_response(body: &MessageBody, header: Option<&XRoadHeader>) -> Result<EncodedMessage> {
    let xml = wrap_envelope(&serialize_body(body)?, header)?;
    let files: Vec<Attachment> = body.attachments().into_iter().cloned().collect();
    if files.is_empty() {
        return Ok(plain_message(xml));
    }
    encode_multipart(&xml, &files)
}

fn plain_message(xml: String) -> EncodedMessage {
    let body = xml.into_bytes();
    let mut headers = BTreeMap::new();
    headers.insert("Content-Type".to_string(), "text/xml; charset=UTF-8".to_string());
    headers.insert("Content-Length".to_string(), body.len().to_string());
    EncodedMessage { headers, body }
}
