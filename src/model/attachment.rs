//! File attachments carried next to a SOAP document.
//!
//! The XML only holds a `cid:` reference; the bytes travel in their own MIME part.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sha2::{Digest, Sha256, Sha512};

/// A resolved file attachment.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Attachment {
    /// File name. Generated from the Content-ID if the part carried none.
    pub filename: String,

    /// MIME content type (e.g. `"application/pdf"`).
    pub content_type: String,

    /// Decoded payload.
    #[serde(skip)]
    pub content: Vec<u8>,

    /// `Content-Digest` value (e.g. `"sha-256=:…:"`).
    pub digest: Option<String>,

    /// Normalized `cid:<token>` reference.
    pub content_id: Option<String>,
}

impl Attachment {
    /// Create an attachment with no digest and no Content-ID yet.
    pub fn new(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            content: content.into(),
            digest: None,
            content_id: None,
        }
    }

    /// Set the Content-ID (any of `abc`, `<abc>`, `cid:abc` is accepted).
    pub fn with_content_id(mut self, content_id: &str) -> Self {
        self.content_id = normalize_content_id(content_id);
        self
    }

    /// Decoded size in bytes.
    pub fn size(&self) -> usize {
        self.content.len()
    }

    /// The bare Content-ID token, as written between angle brackets in MIME headers.
    pub fn content_id_token(&self) -> Option<&str> {
        self.content_id.as_deref().map(content_id_token)
    }
}

/// An unresolved reference from XML to an attachment part.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
pub struct SwaRef {
    /// Normalized `cid:<token>` form.
    pub content_id: String,
}

/// Digest algorithm used for `Content-Digest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashFunction {
    #[default]
    Sha256,
    Sha512,
}

impl HashFunction {
    /// Algorithm label from the HTTP digest algorithm registry.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha-256",
            Self::Sha512 => "sha-512",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "sha-256" | "sha256" => Some(Self::Sha256),
            "sha-512" | "sha512" => Some(Self::Sha512),
            _ => None,
        }
    }

    /// Render an RFC 9530 `Content-Digest` value: `sha-256=:<base64>:`.
    pub fn digest(&self, content: &[u8]) -> String {
        let raw = match self {
            Self::Sha256 => Sha256::digest(content).to_vec(),
            Self::Sha512 => Sha512::digest(content).to_vec(),
        };
        format!("{}=:{}:", self.label(), BASE64.encode(raw))
    }

    /// Pick the algorithm a `Content-Digest` header value was produced with.
    pub fn of_digest(value: &str) -> Option<Self> {
        let (label, _) = value.split_once('=')?;
        Self::from_label(label)
    }
}

/// Normalize a Content-ID to `cid:<token>`.
///
/// Strips surrounding whitespace, angle brackets and an existing `cid:` prefix.
/// Returns `None` if nothing is left.
pub fn normalize_content_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let without_scheme = match trimmed.get(..4) {
        Some(prefix) if prefix.eq_ignore_ascii_case("cid:") => &trimmed[4..],
        _ => trimmed,
    };
    let token = without_scheme
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(format!("cid:{token}"))
    }
}

/// Strip the `cid:` prefix from a normalized Content-ID.
pub fn content_id_token(content_id: &str) -> &str {
    content_id.strip_prefix("cid:").unwrap_or(content_id)
}

/// Generate a fresh Content-ID for an outgoing attachment.
pub fn generate_content_id() -> String {
    format!("cid:{:016x}{:016x}", rand::random::<u64>(), rand::random::<u64>())
}
