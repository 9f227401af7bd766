//! Integration tests for multipart decoding, encoding and request handling.

use std::path::Path;
use std::sync::Arc;

use xroad_swa::model::attachment::{Attachment, HashFunction};
use xroad_swa::multipart::decoder::{decode_multipart, DecoderOptions};
use xroad_swa::multipart::encoder::encode_multipart;
use xroad_swa::schema::occurrence::Annotation;
use xroad_swa::swa::PartStorage;
use xroad_swa::{
    encode_response, BodySchema, ElementSpec, FieldValue, SwaError, SwaRequest, Value, ValueKind,
};

const UPLOAD_CONTENT_TYPE: &str =
    "multipart/related; type=\"text/xml\"; start=\"<rootpart>\"; boundary=\"MIME_boundary\"";

const REPORT_PDF: &[u8] = b"%PDF-1.4\n1 0 obj <<>> endobj\ntrailer <<>>\n%%EOF\n";

fn fixture(name: &str) -> Vec<u8> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    std::fs::read(path).unwrap()
}

fn upload_schema() -> Arc<BodySchema> {
    BodySchema::builder("uploadReport")
        .namespace("http://example.org/reports")
        .field("title", Annotation::Absent, ElementSpec::string().max_length(100))
        .field(
            "document",
            Annotation::Absent,
            ElementSpec::file()
                .allowed_filetypes(["application/pdf"])
                .max_filesize(1024),
        )
        .build()
        .unwrap()
}

// ─── Decoding ───────────────────────────────────────────────────────

#[test]
fn test_decode_fixture_parts() {
    let parts = decode_multipart(
        UPLOAD_CONTENT_TYPE,
        &fixture("upload_request.bin"),
        &DecoderOptions::default(),
    )
    .unwrap();
    assert_eq!(parts.len(), 2);

    let root = &parts[0];
    assert_eq!(root.content_type, "text/xml");
    assert_eq!(root.content_id.as_deref(), Some("cid:rootpart"));
    assert!(!root.is_attachment);

    let pdf = &parts[1];
    assert_eq!(pdf.content_id.as_deref(), Some("cid:abc123"));
    assert_eq!(pdf.content_type, "application/pdf");
    assert_eq!(pdf.filename.as_deref(), Some("report.pdf"));
    assert!(pdf.is_attachment);
    assert_eq!(pdf.content, REPORT_PDF);
    assert_eq!(pdf.size, REPORT_PDF.len());
}

#[test]
fn test_decode_without_boundary_parameter() {
    let err = decode_multipart(
        "multipart/related; type=\"text/xml\"",
        &fixture("upload_request.bin"),
        &DecoderOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, SwaError::BoundaryNotFound(_)));
    assert!(err.is_multipart_error());
}

#[test]
fn test_decode_with_wrong_boundary() {
    let err = decode_multipart(
        "multipart/related; boundary=\"other\"",
        &fixture("upload_request.bin"),
        &DecoderOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, SwaError::BoundaryNotFound(_)));
}

// ─── Encoding ───────────────────────────────────────────────────────

#[test]
fn test_encode_two_files_nests_mixed_part() {
    let files = vec![
        Attachment::new("a.txt", "text/plain", b"first".to_vec()).with_content_id("cid:a"),
        Attachment::new("b.bin", "application/octet-stream", vec![0u8, 159, 146, 150])
            .with_content_id("cid:b"),
    ];
    let message = encode_multipart("<Envelope/>", &files).unwrap();
    let content_type = message.content_type().unwrap();
    assert!(content_type.starts_with("multipart/related"));
    assert!(content_type.contains("start=\"<rootpart>\""));
    assert_eq!(
        message.headers.get("Content-Length"),
        Some(&message.body.len().to_string())
    );

    let options = DecoderOptions::default();
    let parts = decode_multipart(content_type, &message.body, &options).unwrap();
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0].text(), "<Envelope/>");
    assert!(parts[1].is_multipart_mixed);

    let nested = parts[1].nested_parts(&options).unwrap();
    assert_eq!(nested.len(), 2);
    assert_eq!(nested[0].content, b"first");
    assert_eq!(nested[1].content, vec![0u8, 159, 146, 150]);
    assert_eq!(nested[1].content_id.as_deref(), Some("cid:b"));
    assert!(nested.iter().all(|p| p.digest_matches()));
}

#[test]
fn test_encode_requires_content_id() {
    let files = vec![Attachment::new("a.txt", "text/plain", b"x".to_vec())];
    let err = encode_multipart("<Envelope/>", &files).unwrap_err();
    assert!(matches!(err, SwaError::MissingContentId(_)));
}

#[test]
fn test_encode_keeps_supplied_digest() {
    let mut file = Attachment::new("a.txt", "text/plain", b"x".to_vec()).with_content_id("a");
    file.digest = Some(HashFunction::Sha512.digest(&file.content));
    let message = encode_multipart("<Envelope/>", &[file]).unwrap();
    let body = String::from_utf8_lossy(&message.body);
    assert!(body.contains("Content-Digest: sha-512=:"));
}

// ─── Requests ───────────────────────────────────────────────────────

#[test]
fn test_fixture_request_resolves_attachment() {
    let storage = Arc::new(PartStorage::new());
    let request = SwaRequest::parse(
        UPLOAD_CONTENT_TYPE,
        &fixture("upload_request.bin"),
        &storage,
        &DecoderOptions::default(),
    )
    .unwrap();

    let header = request.header().unwrap();
    assert_eq!(header.protocol_version.as_deref(), Some("4.0"));
    let client = header.client.as_ref().unwrap();
    assert_eq!(client.member_code, "70000001");
    assert_eq!(client.subsystem_code.as_deref(), Some("archive"));

    let body = request.deserialize(&upload_schema()).unwrap();
    assert_eq!(body.get("title"), Some(FieldValue::single("Quarterly report")));
    match body.get("document") {
        Some(FieldValue::Single(Value::File(file))) => {
            assert_eq!(file.filename, "report.pdf");
            assert_eq!(file.content, REPORT_PDF);
            assert_eq!(file.content_id.as_deref(), Some("cid:abc123"));
        }
        other => panic!("unexpected document {other:?}"),
    }
    assert_eq!(storage.len(), 1);
    drop(request);
    assert!(storage.is_empty());
}

#[test]
fn test_attachment_over_limit_rejected() {
    let schema = BodySchema::builder("uploadReport")
        .field("title", Annotation::Absent, ElementSpec::string())
        .field("document", Annotation::Absent, ElementSpec::file().max_filesize(10))
        .build()
        .unwrap();
    let storage = Arc::new(PartStorage::new());
    let request = SwaRequest::parse(
        UPLOAD_CONTENT_TYPE,
        &fixture("upload_request.bin"),
        &storage,
        &DecoderOptions::default(),
    )
    .unwrap();
    let err = request.deserialize(&schema).unwrap_err();
    match err {
        SwaError::Validation { field, reason } => {
            assert_eq!(field, "document");
            assert!(reason.contains("exceeds the limit of 10 bytes"), "{reason}");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn test_digest_mismatch_rejected() {
    let message = "--b\r\nContent-Type: text/xml\r\nContent-ID: <rootpart>\r\n\r\n\
        <e:Envelope xmlns:e=\"http://schemas.xmlsoap.org/soap/envelope/\"><e:Body>\
        <uploadReport><title>t</title><document>cid:f</document></uploadReport>\
        </e:Body></e:Envelope>\r\n\
        --b\r\nContent-Type: application/pdf\r\nContent-ID: <f>\r\n\
        Content-Disposition: attachment; filename=\"f.pdf\"\r\n\
        Content-Digest: sha-256=:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=:\r\n\r\n\
        %PDF\r\n--b--\r\n";
    let storage = Arc::new(PartStorage::new());
    let request = SwaRequest::parse(
        "multipart/related; boundary=b",
        message.as_bytes(),
        &storage,
        &DecoderOptions::default(),
    )
    .unwrap();
    let err = request.deserialize(&upload_schema()).unwrap_err();
    assert!(
        err.to_string().contains("does not match its Content-Digest(extra)$$cid:f$$"),
        "{err}"
    );
}

#[test]
fn test_response_with_list_of_files() {
    let schema = BodySchema::builder("Bundle")
        .field(
            "files",
            Annotation::list(ValueKind::File),
            ElementSpec::file().min_occurs(1),
        )
        .build()
        .unwrap();
    let files = FieldValue::many([
        Attachment::new("one.txt", "text/plain", b"1".to_vec()),
        Attachment::new("two.txt", "text/plain", b"2".to_vec()),
    ]);
    let body = xroad_swa::MessageBody::new(&schema, [("files", files)]).unwrap();
    assert!(body.attachments().iter().all(|a| a.content_id.is_some()));

    let encoded = encode_response(&body, None).unwrap();
    let storage = Arc::new(PartStorage::new());
    let request = SwaRequest::parse(
        encoded.content_type().unwrap(),
        &encoded.body,
        &storage,
        &DecoderOptions::default(),
    )
    .unwrap();
    assert_eq!(request.attachments().len(), 2);

    let decoded = request.deserialize(&schema).unwrap();
    let values = decoded.values("files").unwrap();
    let contents: Vec<&[u8]> = values
        .iter()
        .filter_map(Value::as_attachment)
        .map(|a| a.content.as_slice())
        .collect();
    assert_eq!(contents, vec![b"1".as_slice(), b"2".as_slice()]);
}

#[test]
fn test_cli_encode_then_decode() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(
        &config,
        format!("[general]\ncache_dir = '{}'\n", dir.path().join("cache").display()),
    )
    .unwrap();
    let xml = dir.path().join("request.xml");
    std::fs::write(&xml, "<Envelope/>").unwrap();
    let pdf = dir.path().join("report.pdf");
    std::fs::write(&pdf, REPORT_PDF).unwrap();
    let out = dir.path().join("message.bin");

    let bin = env!("CARGO_BIN_EXE_xroad-swa");
    let encoded = std::process::Command::new(bin)
        .env("XROAD_SWA_CONFIG", &config)
        .args(["encode", "--xml"])
        .arg(&xml)
        .arg("--attach")
        .arg(&pdf)
        .arg("-o")
        .arg(&out)
        .output()
        .unwrap();
    assert!(encoded.status.success());
    let stdout = String::from_utf8(encoded.stdout).unwrap();
    let content_type = stdout
        .lines()
        .find_map(|l| l.strip_prefix("Content-Type: "))
        .unwrap()
        .to_string();

    let decoded = std::process::Command::new(bin)
        .env("XROAD_SWA_CONFIG", &config)
        .arg("decode")
        .arg(&out)
        .args(["--content-type", content_type.as_str(), "--json"])
        .output()
        .unwrap();
    assert!(decoded.status.success());
    let json: serde_json::Value = serde_json::from_slice(&decoded.stdout).unwrap();
    assert_eq!(json["part_count"], 2);
    assert_eq!(json["parts"][1]["filename"], "report.pdf");
    assert_eq!(json["parts"][1]["content_type"], "application/pdf");
}
