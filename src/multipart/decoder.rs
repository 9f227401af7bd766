//! Split `multipart/related` (and nested `multipart/mixed`) bodies into parts.
//!
//! Parsing is strict about structure: a missing boundary, a part without the
//! blank line between headers and content, or an attachment without a
//! Content-ID are reported as distinct errors instead of being papered over.

use tracing::{debug, warn};

use super::header::{parse_header_block, HeaderMap, ParsedValue};
use super::transfer::{decode_transfer, is_textual, normalize_to_utf8};
use crate::error::{Result, SwaError};
use crate::model::attachment::normalize_content_id;
use crate::model::part::DecodedBodyPart;

const CRLF: &[u8] = b"\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Limits and switches for [`decode_multipart`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderOptions {
    /// Bodies larger than this are rejected outright.
    pub max_body_size: usize,
    /// Maximum number of parts in one multipart level.
    pub max_parts: usize,
    /// Convert textual parts to UTF-8.
    pub normalize_charset: bool,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            max_body_size: 50 * 1024 * 1024,
            max_parts: 128,
            normalize_charset: true,
        }
    }
}

/// Extract the `boundary` parameter of a multipart `Content-Type` value.
pub fn find_boundary(content_type: &str) -> Result<String> {
    let parsed = ParsedValue::parse(content_type);
    if !parsed.value.starts_with("multipart/") {
        return Err(SwaError::BoundaryNotFound(format!(
            "not a multipart mimetype: '{}'",
            parsed.value
        )));
    }
    match parsed.param("boundary") {
        Some(b) if !b.is_empty() => Ok(b.to_string()),
        _ => Err(SwaError::BoundaryNotFound(format!(
            "no boundary parameter in '{content_type}'"
        ))),
    }
}

/// Decode a multipart body into its parts, in wire order.
///
/// Nested `multipart/mixed` parts are returned undecoded with
/// `is_multipart_mixed` set; see [`DecodedBodyPart::nested_parts`].
pub fn decode_multipart(
    content_type: &str,
    body: &[u8],
    options: &DecoderOptions,
) -> Result<Vec<DecodedBodyPart>> {
    if body.len() > options.max_body_size {
        return Err(SwaError::MalformedBody(format!(
            "body of {} bytes exceeds the {} byte limit",
            body.len(),
            options.max_body_size
        )));
    }

    let boundary = find_boundary(content_type)?;
    let dash_boundary = format!("--{boundary}");
    let delimiter = format!("\r\n{dash_boundary}");

    let mut segments = split_on(body, delimiter.as_bytes()).into_iter();
    let first = segments.next().unwrap_or_default();

    let mut raw_parts: Vec<&[u8]> = Vec::new();
    match first.strip_prefix(dash_boundary.as_bytes()) {
        Some(rest) => raw_parts.push(rest),
        None => {
            if !first.iter().all(u8::is_ascii_whitespace) {
                warn!(bytes = first.len(), "Discarding multipart preamble");
            }
        }
    }
    raw_parts.extend(segments);

    let mut parts = Vec::new();
    for segment in raw_parts {
        if segment.starts_with(b"--") {
            break;
        }
        if parts.len() >= options.max_parts {
            return Err(SwaError::MalformedBody(format!(
                "more than {} parts",
                options.max_parts
            )));
        }
        let part = decode_part(segment, parts.len(), options)?;
        parts.push(part);
    }

    if parts.is_empty() {
        return Err(SwaError::BoundaryNotFound(format!(
            "boundary '{boundary}' not present in body"
        )));
    }

    debug!(parts = parts.len(), boundary = %boundary, "Decoded multipart body");
    Ok(parts)
}

/// Decode one segment: everything after a delimiter up to the next one.
fn decode_part(segment: &[u8], index: usize, options: &DecoderOptions) -> Result<DecodedBodyPart> {
    // The rest of the delimiter line may only hold transport padding.
    let line_end = find(segment, CRLF, 0).ok_or_else(|| {
        SwaError::MalformedBody(format!("part {index} has no line break after its boundary"))
    })?;
    if !segment[..line_end].iter().all(|b| *b == b' ' || *b == b'\t') {
        return Err(SwaError::MalformedBody(format!(
            "unexpected data after boundary of part {index}"
        )));
    }
    let entity = &segment[line_end + CRLF.len()..];

    let (header_bytes, raw_content) = if let Some(rest) = entity.strip_prefix(CRLF) {
        (&[][..], rest)
    } else {
        let split = find(entity, HEADER_END, 0).ok_or_else(|| {
            SwaError::MalformedBody(format!(
                "part {index} is missing the blank line between headers and content"
            ))
        })?;
        (&entity[..split], &entity[split + HEADER_END.len()..])
    };

    let headers = parse_header_block(header_bytes);
    let content_type = ParsedValue::parse(headers.get("content-type").unwrap_or("text/plain"));
    let disposition = headers.get("content-disposition").map(ParsedValue::parse);
    let is_attachment = disposition
        .as_ref()
        .is_some_and(|d| d.value == "attachment");
    let content_id = headers.get("content-id").and_then(normalize_content_id);
    let filename = part_filename(disposition.as_ref(), &content_type);

    if is_attachment && content_id.is_none() {
        return Err(SwaError::MissingContentId(
            filename.unwrap_or_else(|| format!("part {index}")),
        ));
    }

    if content_type.value == "multipart/mixed" {
        debug!(index, size = raw_content.len(), "Found nested multipart/mixed part");
        return Ok(build_part(
            headers,
            raw_content.to_vec(),
            content_type.value,
            None,
            filename,
            content_id,
            is_attachment,
            true,
        ));
    }

    let decoded = decode_transfer(headers.get("content-transfer-encoding"), raw_content)?;
    let declared_charset = content_type.param("charset").map(str::to_ascii_lowercase);
    // Attachment bytes stay as sent so their Content-Digest still verifies.
    let normalize =
        options.normalize_charset && !is_attachment && is_textual(&content_type.value);
    let (content, charset) = if normalize {
        normalize_to_utf8(decoded, declared_charset.as_deref())
    } else {
        (decoded, declared_charset)
    };

    debug!(
        index,
        content_type = %content_type.value,
        size = content.len(),
        content_id = content_id.as_deref().unwrap_or(""),
        "Decoded body part"
    );

    Ok(build_part(
        headers,
        content,
        content_type.value,
        charset,
        filename,
        content_id,
        is_attachment,
        false,
    ))
}

#[allow(clippy::too_many_arguments)]
fn build_part(
    headers: HeaderMap,
    content: Vec<u8>,
    content_type: String,
    charset: Option<String>,
    filename: Option<String>,
    content_id: Option<String>,
    is_attachment: bool,
    is_multipart_mixed: bool,
) -> DecodedBodyPart {
    DecodedBodyPart {
        headers,
        size: content.len(),
        content,
        content_type,
        charset,
        filename,
        content_id,
        is_attachment,
        is_multipart_mixed,
    }
}

/// Disposition `filename`, then disposition `name`, then Content-Type `name`.
fn part_filename(disposition: Option<&ParsedValue>, content_type: &ParsedValue) -> Option<String> {
    disposition
        .and_then(|d| d.decoded_param("filename").or_else(|| d.decoded_param("name")))
        .or_else(|| content_type.decoded_param("name"))
        .filter(|name| !name.trim().is_empty())
}

/// Split `haystack` on every occurrence of `needle`.
fn split_on<'a>(haystack: &'a [u8], needle: &[u8]) -> Vec<&'a [u8]> {
    let mut pieces = Vec::new();
    let mut start = 0;
    while let Some(pos) = find(haystack, needle, start) {
        pieces.push(&haystack[start..pos]);
        start = pos + needle.len();
    }
    pieces.push(&haystack[start..]);
    pieces
}

/// Position of `needle` in `haystack` at or after `from`.
pub(crate) fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CT: &str = "multipart/related; type=\"text/xml\"; start=\"<rootpart>\"; boundary=\"b1\"";

    fn body(parts: &[&str]) -> Vec<u8> {
        let mut out = String::new();
        for p in parts {
            out.push_str("--b1\r\n");
            out.push_str(p);
            out.push_str("\r\n");
        }
        out.push_str("--b1--\r\n");
        out.into_bytes()
    }

    #[test]
    fn test_find_boundary() {
        assert_eq!(find_boundary(CT).unwrap(), "b1");
        assert!(matches!(
            find_boundary("text/xml; charset=utf-8"),
            Err(SwaError::BoundaryNotFound(_))
        ));
        assert!(matches!(
            find_boundary("multipart/related; type=\"text/xml\""),
            Err(SwaError::BoundaryNotFound(_))
        ));
    }

    #[test]
    fn test_decode_two_parts() {
        let raw = body(&[
            "Content-Type: text/xml; charset=UTF-8\r\nContent-ID: <rootpart>\r\n\r\n<a/>",
            "Content-Type: text/plain\r\nContent-Disposition: attachment; filename=\"n.txt\"\r\nContent-ID: <n1>\r\n\r\nnotes",
        ]);
        let parts = decode_multipart(CT, &raw, &DecoderOptions::default()).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].content, b"<a/>");
        assert_eq!(parts[0].content_id.as_deref(), Some("cid:rootpart"));
        assert!(!parts[0].is_attachment);
        assert_eq!(parts[1].content, b"notes");
        assert_eq!(parts[1].filename.as_deref(), Some("n.txt"));
        assert!(parts[1].is_attachment);
    }

    #[test]
    fn test_preamble_discarded() {
        let mut raw = b"This is a MIME preamble.\r\n".to_vec();
        raw.extend(body(&["Content-Type: text/xml\r\n\r\n<a/>"]));
        let parts = decode_multipart(CT, &raw, &DecoderOptions::default()).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].content, b"<a/>");
    }

    #[test]
    fn test_part_without_headers() {
        let raw = body(&["\r\nbare content"]);
        let parts = decode_multipart(CT, &raw, &DecoderOptions::default()).unwrap();
        assert!(parts[0].headers.is_empty());
        assert_eq!(parts[0].content_type, "text/plain");
        assert_eq!(parts[0].content, b"bare content");
    }

    #[test]
    fn test_missing_separator() {
        let raw = body(&["Content-Type: text/xml\r\n<a/>"]);
        let err = decode_multipart(CT, &raw, &DecoderOptions::default()).unwrap_err();
        assert!(matches!(err, SwaError::MalformedBody(_)));
    }

    #[test]
    fn test_attachment_without_content_id() {
        let raw = body(&[
            "Content-Type: application/pdf\r\nContent-Disposition: attachment; filename=x.pdf\r\n\r\n%PDF",
        ]);
        match decode_multipart(CT, &raw, &DecoderOptions::default()) {
            Err(SwaError::MissingContentId(name)) => assert_eq!(name, "x.pdf"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_boundary_absent_from_body() {
        let err = decode_multipart(CT, b"<a/>", &DecoderOptions::default()).unwrap_err();
        assert!(matches!(err, SwaError::BoundaryNotFound(_)));
    }

    #[test]
    fn test_body_size_limit() {
        let options = DecoderOptions {
            max_body_size: 8,
            ..DecoderOptions::default()
        };
        let raw = body(&["\r\n0123456789"]);
        assert!(matches!(
            decode_multipart(CT, &raw, &options),
            Err(SwaError::MalformedBody(_))
        ));
    }

    #[test]
    fn test_part_count_limit() {
        let options = DecoderOptions {
            max_parts: 1,
            ..DecoderOptions::default()
        };
        let raw = body(&["\r\na", "\r\nb"]);
        assert!(matches!(
            decode_multipart(CT, &raw, &options),
            Err(SwaError::MalformedBody(_))
        ));
    }

    #[test]
    fn test_nested_mixed_decoded_on_demand() {
        let inner = "--b2\r\nContent-Type: text/plain\r\nContent-Disposition: attachment; filename=a.txt\r\nContent-ID: <a>\r\n\r\nA\r\n--b2\r\nContent-Type: text/plain\r\nContent-Disposition: attachment; filename=b.txt\r\nContent-ID: <b>\r\n\r\nB\r\n--b2--";
        let outer = format!("Content-Type: multipart/mixed; boundary=\"b2\"\r\nContent-Transfer-Encoding: binary\r\n\r\n{inner}");
        let raw = body(&["Content-Type: text/xml\r\n\r\n<a/>", &outer]);
        let parts = decode_multipart(CT, &raw, &DecoderOptions::default()).unwrap();
        assert!(parts[1].is_multipart_mixed);

        let nested = parts[1].nested_parts(&DecoderOptions::default()).unwrap();
        assert_eq!(nested.len(), 2);
        assert_eq!(nested[0].content, b"A");
        assert_eq!(nested[1].content_id.as_deref(), Some("cid:b"));
    }

    #[test]
    fn test_rfc2231_filename() {
        let raw = body(&[
            "Content-Type: application/pdf\r\nContent-Disposition: attachment; filename*=UTF-8''r%C3%A9sum%C3%A9.pdf\r\nContent-ID: <r1>\r\n\r\n%PDF",
        ]);
        let parts = decode_multipart(CT, &raw, &DecoderOptions::default()).unwrap();
        assert_eq!(parts[0].filename.as_deref(), Some("résumé.pdf"));
    }

    #[test]
    fn test_text_attachment_bytes_untouched() {
        let mut raw = Vec::new();
        raw.extend_from_slice(
            b"--b1\r\nContent-Type: text/xml; charset=ISO-8859-1\r\nContent-ID: <rootpart>\r\n\r\n<r>caf\xe9</r>\r\n",
        );
        raw.extend_from_slice(
            b"--b1\r\nContent-Type: text/plain; charset=ISO-8859-1\r\nContent-ID: <f>\r\n\
              Content-Disposition: attachment; filename=\"f.txt\"\r\n\r\ncaf\xe9\r\n--b1--\r\n",
        );

        let parts = decode_multipart(CT, &raw, &DecoderOptions::default()).unwrap();
        assert_eq!(parts[0].text(), "<r>caf\u{e9}</r>");
        assert_eq!(parts[1].content, b"caf\xe9");
        assert_eq!(parts[1].charset.as_deref(), Some("iso-8859-1"));
    }

    #[test]
    fn test_split_on() {
        let pieces = split_on(b"a--b--c", b"--");
        assert_eq!(pieces, vec![&b"a"[..], &b"b"[..], &b"c"[..]]);
    }
}
