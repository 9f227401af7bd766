//! Assemble a SOAP document and its file attachments into a `multipart/related` message.

use std::collections::BTreeMap;

use tracing::debug;

use super::decoder::find;
use super::header::{percent_encode, quote};
use super::transfer::encode_base64_lines;
use crate::error::{Result, SwaError};
use crate::model::attachment::{Attachment, HashFunction};

/// Content-ID of the SOAP part, referenced by the `start` parameter.
pub const ROOT_CONTENT_ID: &str = "rootpart";

/// An encoded message: HTTP-level headers plus the body bytes.
#[derive(Debug, Clone)]
pub struct EncodedMessage {
    /// `Content-Type`, `MIME-Version` and `Content-Length`.
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl EncodedMessage {
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("Content-Type").map(String::as_str)
    }
}

/// Encode `xml` as the root part followed by `files`.
///
/// One file becomes the second part of the `multipart/related` container;
/// several are wrapped in a nested `multipart/mixed` part. Every file must
/// carry a Content-ID, since the XML refers to it by `cid:` URI. Files
/// without a digest get a SHA-256 `Content-Digest`.
pub fn encode_multipart(xml: &str, files: &[Attachment]) -> Result<EncodedMessage> {
    let rendered_files = files
        .iter()
        .map(render_file_part)
        .collect::<Result<Vec<_>>>()?;

    let mut payloads: Vec<&[u8]> = vec![xml.as_bytes()];
    payloads.extend(files.iter().map(|f| f.content.as_slice()));
    let boundary = unique_boundary(&payloads);

    let mut body = Vec::new();
    open_part(&mut body, &boundary);
    body.extend_from_slice(b"Content-Type: text/xml; charset=UTF-8\r\n");
    body.extend_from_slice(b"Content-Transfer-Encoding: 8bit\r\n");
    body.extend_from_slice(format!("Content-ID: <{ROOT_CONTENT_ID}>\r\n\r\n").as_bytes());
    body.extend_from_slice(xml.as_bytes());

    match rendered_files.len() {
        0 => {}
        1 => {
            open_part(&mut body, &boundary);
            body.extend_from_slice(&rendered_files[0]);
        }
        _ => {
            let inner = unique_boundary(&payloads);
            open_part(&mut body, &boundary);
            body.extend_from_slice(
                format!("Content-Type: multipart/mixed; boundary={}\r\n", quote(&inner)).as_bytes(),
            );
            body.extend_from_slice(b"Content-Transfer-Encoding: binary\r\n\r\n");
            for (i, rendered) in rendered_files.iter().enumerate() {
                if i > 0 {
                    body.extend_from_slice(b"\r\n");
                }
                body.extend_from_slice(format!("--{inner}\r\n").as_bytes());
                body.extend_from_slice(rendered);
            }
            body.extend_from_slice(format!("\r\n--{inner}--").as_bytes());
        }
    }
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    let mut headers = BTreeMap::new();
    headers.insert(
        "Content-Type".to_string(),
        format!(
            "multipart/related; type=\"text/xml\"; start=\"<{ROOT_CONTENT_ID}>\"; boundary={}",
            quote(&boundary)
        ),
    );
    headers.insert("MIME-Version".to_string(), "1.0".to_string());
    headers.insert("Content-Length".to_string(), body.len().to_string());

    debug!(files = files.len(), size = body.len(), "Encoded multipart message");
    Ok(EncodedMessage { headers, body })
}

/// Write the delimiter that opens a part. The first part has no leading CRLF.
fn open_part(body: &mut Vec<u8>, boundary: &str) {
    if !body.is_empty() {
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
}

/// Headers and base64 payload of one file part.
fn render_file_part(file: &Attachment) -> Result<Vec<u8>> {
    let token = file
        .content_id_token()
        .ok_or_else(|| SwaError::MissingContentId(file.filename.clone()))?;
    let digest = file
        .digest
        .clone()
        .unwrap_or_else(|| HashFunction::Sha256.digest(&file.content));
    let content_type = if file.content_type.is_empty() {
        "application/octet-stream"
    } else {
        file.content_type.as_str()
    };

    let mut out = Vec::new();
    out.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
    out.extend_from_slice(b"Content-Transfer-Encoding: base64\r\n");
    out.extend_from_slice(format!("Content-ID: <{token}>\r\n").as_bytes());
    out.extend_from_slice(format!("Content-Digest: {digest}\r\n").as_bytes());
    out.extend_from_slice(format!("Content-Length: {}\r\n", file.size()).as_bytes());
    out.extend_from_slice(
        format!("Content-Disposition: attachment; {}\r\n\r\n", filename_params(&file.filename))
            .as_bytes(),
    );
    out.extend_from_slice(&encode_base64_lines(&file.content));

    debug!(content_id = token, size = file.size(), "Encoded file part");
    Ok(out)
}

/// `name` and `filename` parameters, RFC 2231 encoded when not plain ASCII.
fn filename_params(filename: &str) -> String {
    if filename.is_ascii() && !filename.chars().any(|c| c.is_ascii_control()) {
        let quoted = quote(filename);
        format!("name={quoted}; filename={quoted}")
    } else {
        let encoded = percent_encode(filename);
        format!("name*=UTF-8''{encoded}; filename*=UTF-8''{encoded}")
    }
}

/// Generate a boundary that occurs in none of `payloads`.
fn unique_boundary(payloads: &[&[u8]]) -> String {
    loop {
        let candidate = format!("==============={:019}==", rand::random::<u64>());
        let clashes = payloads
            .iter()
            .any(|p| find(p, candidate.as_bytes(), 0).is_some());
        if !clashes {
            return candidate;
        }
    }
}
