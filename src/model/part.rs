//! One MIME part found while splitting a multipart body.

use serde::Serialize;

use crate::error::Result;
use crate::model::attachment::{Attachment, HashFunction};
use crate::multipart::decoder::{decode_multipart, DecoderOptions};
use crate::multipart::header::HeaderMap;

/// A decoded multipart body part.
///
/// For `multipart/mixed` containers `content` holds the raw nested body;
/// call [`DecodedBodyPart::nested_parts`] to split it.
#[derive(Debug, Clone, Serialize)]
pub struct DecodedBodyPart {
    /// Parsed header block, in wire order.
    pub headers: HeaderMap,

    /// Payload after transfer decoding (and charset normalization for text).
    #[serde(skip)]
    pub content: Vec<u8>,

    /// Mimetype, lowercased, without parameters.
    pub content_type: String,

    /// Charset the text payload was decoded from.
    pub charset: Option<String>,

    /// File name from `Content-Disposition` or the `Content-Type` `name` parameter.
    pub filename: Option<String>,

    /// Normalized `cid:<token>`.
    pub content_id: Option<String>,

    /// `Content-Disposition: attachment`.
    pub is_attachment: bool,

    /// Nested `multipart/mixed` container, not yet split.
    pub is_multipart_mixed: bool,

    /// Content size in bytes, as shown by `decode --json`.
    pub size: usize,
}

impl DecodedBodyPart {
    /// Split a nested `multipart/mixed` payload.
    ///
    /// Returns an empty list for leaf parts.
    pub fn nested_parts(&self, options: &DecoderOptions) -> Result<Vec<DecodedBodyPart>> {
        if !self.is_multipart_mixed {
            return Ok(Vec::new());
        }
        let content_type = self.headers.get("content-type").unwrap_or_default();
        decode_multipart(content_type, &self.content, options)
    }

    /// Payload as text, lossy for non-UTF-8 content.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }

    /// `Content-Digest` header value, if the sender supplied one.
    pub fn digest(&self) -> Option<&str> {
        self.headers.get("content-digest")
    }

    /// Check the payload against the sender's `Content-Digest`.
    ///
    /// Parts without a digest, or with an algorithm we do not know, pass.
    pub fn digest_matches(&self) -> bool {
        let Some(expected) = self.digest() else {
            return true;
        };
        match HashFunction::of_digest(expected) {
            Some(hash) => hash.digest(&self.content) == expected.trim(),
            None => true,
        }
    }

    /// Build the attachment value a file field resolves to.
    pub fn to_attachment(&self) -> Attachment {
        let filename = self.filename.clone().unwrap_or_else(|| {
            self.content_id
                .as_deref()
                .map(|cid| cid.trim_start_matches("cid:").to_string())
                .unwrap_or_else(|| "attachment".to_string())
        });
        Attachment {
            filename,
            content_type: self.content_type.clone(),
            content: self.content.clone(),
            digest: self.digest().map(|d| d.trim().to_string()),
            content_id: self.content_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(content: &[u8], digest: Option<&str>) -> DecodedBodyPart {
        let mut headers = HeaderMap::new();
        headers.insert("Content-Type", "application/octet-stream");
        if let Some(d) = digest {
            headers.insert("Content-Digest", d);
        }
        DecodedBodyPart {
            headers,
            content: content.to_vec(),
            content_type: "application/octet-stream".into(),
            charset: None,
            filename: None,
            content_id: Some("cid:blob1".into()),
            is_attachment: true,
            is_multipart_mixed: false,
            size: content.len(),
        }
    }

    #[test]
    fn test_digest_matches() {
        let good = HashFunction::Sha256.digest(b"payload");
        assert!(part(b"payload", Some(&good)).digest_matches());
        assert!(!part(b"tampered", Some(&good)).digest_matches());
        assert!(part(b"payload", None).digest_matches());
        assert!(part(b"payload", Some("md5=:abc:")).digest_matches());
    }

    #[test]
    fn test_to_attachment_falls_back_to_cid_name() {
        let att = part(b"x", None).to_attachment();
        assert_eq!(att.filename, "blob1");
        assert_eq!(att.content_id.as_deref(), Some("cid:blob1"));
        assert_eq!(att.digest, None);
    }

    #[test]
    fn test_leaf_has_no_nested_parts() {
        let nested = part(b"x", None)
            .nested_parts(&DecoderOptions::default())
            .unwrap();
        assert!(nested.is_empty());
    }
}
