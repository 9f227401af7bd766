//! Content-Transfer-Encoding and charset handling for MIME part payloads.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tracing::warn;

use super::header::hex_byte;
use crate::error::{Result, SwaError};

/// Line length for base64 payloads (RFC 2045 §6.8).
const BASE64_LINE_LEN: usize = 76;

/// Decode a part payload according to its `Content-Transfer-Encoding`.
///
/// `base64` and `quoted-printable` are decoded; `7bit`, `8bit`, `binary` and
/// a missing header pass the bytes through.
pub fn decode_transfer(encoding: Option<&str>, content: &[u8]) -> Result<Vec<u8>> {
    let encoding = encoding
        .map(|e| e.trim().to_ascii_lowercase())
        .unwrap_or_default();

    match encoding.as_str() {
        "base64" => decode_base64(content),
        "quoted-printable" => Ok(decode_quoted_printable(content)),
        "" | "7bit" | "8bit" | "binary" => Ok(content.to_vec()),
        other => {
            warn!(encoding = other, "Unknown Content-Transfer-Encoding, passing through");
            Ok(content.to_vec())
        }
    }
}

/// Base64-decode, ignoring line breaks and other whitespace.
fn decode_base64(content: &[u8]) -> Result<Vec<u8>> {
    let compact: Vec<u8> = content
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    BASE64
        .decode(&compact)
        .map_err(|e| SwaError::MalformedBody(format!("invalid base64 content: {e}")))
}

/// Decode quoted-printable (RFC 2045 §6.7): `=XX` escapes and `=` soft line breaks.
///
/// Trailing whitespace on an encoded line is transport padding and is dropped.
/// Malformed escapes are kept literally.
pub fn decode_quoted_printable(input: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(input.len());
    let mut lines = input.split(|&b| b == b'\n').peekable();
    while let Some(line) = lines.next() {
        let (line, ending) = match line.strip_suffix(b"\r") {
            Some(stripped) => (stripped, &b"\r\n"[..]),
            None => (line, &b"\n"[..]),
        };
        let end = line
            .iter()
            .rposition(|&b| b != b' ' && b != b'\t')
            .map_or(0, |p| p + 1);
        let line = &line[..end];
        let (line, soft) = match line.strip_suffix(b"=") {
            Some(stripped) => (stripped, true),
            None => (line, false),
        };

        decode_qp_escapes(line, &mut result);
        if !soft && lines.peek().is_some() {
            result.extend_from_slice(ending);
        }
    }
    result
}

fn decode_qp_escapes(line: &[u8], out: &mut Vec<u8>) {
    let mut i = 0;
    while i < line.len() {
        if line[i] == b'=' {
            if let Some(byte) = line
                .get(i + 1..i + 3)
                .and_then(|pair| hex_byte(pair[0], pair[1]))
            {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(line[i]);
        i += 1;
    }
}

/// Base64-encode a payload, wrapped at 76 columns with CRLF line breaks.
pub fn encode_base64_lines(content: &[u8]) -> Vec<u8> {
    let encoded = BASE64.encode(content);
    let mut out = Vec::with_capacity(encoded.len() + encoded.len() / BASE64_LINE_LEN * 2);
    for (i, chunk) in encoded.as_bytes().chunks(BASE64_LINE_LEN).enumerate() {
        if i > 0 {
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(chunk);
    }
    out
}

/// `true` for mimetypes whose payload is text and may be charset-normalized.
pub fn is_textual(mimetype: &str) -> bool {
    mimetype.starts_with("text/")
        || mimetype.ends_with("/xml")
        || mimetype.ends_with("+xml")
        || mimetype == "application/json"
}

/// Convert text content to UTF-8.
///
/// A declared charset wins; otherwise a BOM, then UTF-8 validity, then
/// Windows-1252 are tried. Content that looks binary (contains NUL) is
/// returned untouched with `None` as the detected charset.
pub fn normalize_to_utf8(content: Vec<u8>, declared: Option<&str>) -> (Vec<u8>, Option<String>) {
    if let Some(label) = declared {
        match encoding_rs::Encoding::for_label(label.trim().as_bytes()) {
            Some(encoding) if encoding == encoding_rs::UTF_8 => {
                return (content, Some(encoding.name().to_ascii_lowercase()));
            }
            Some(encoding) => {
                let (decoded, _, had_errors) = encoding.decode(&content);
                if had_errors {
                    warn!(charset = label, "Part content has invalid sequences for its charset");
                }
                return (
                    decoded.into_owned().into_bytes(),
                    Some(encoding.name().to_ascii_lowercase()),
                );
            }
            None => {
                warn!(charset = label, "Unknown charset, detecting instead");
            }
        }
    }

    if let Some((encoding, bom_len)) = encoding_rs::Encoding::for_bom(&content) {
        let (decoded, _) = encoding.decode_without_bom_handling(&content[bom_len..]);
        return (
            decoded.into_owned().into_bytes(),
            Some(encoding.name().to_ascii_lowercase()),
        );
    }

    if std::str::from_utf8(&content).is_ok() {
        return (content, Some("utf-8".to_string()));
    }

    if content.contains(&0) {
        return (content, None);
    }

    let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&content);
    (decoded.into_owned().into_bytes(), Some("windows-1252".to_string()))
}
