//! `xroad-swa` — SOAP/X-Road message bodies with SOAP-with-Attachments support.
//!
//! Message bodies are declared with [`schema::BodySchema::builder`], one
//! constrained [`schema::ElementSpec`] per field. Bodies are validated when
//! built by application code and again when parsed from a request, and may
//! carry file attachments that travel as `multipart/related` parts referenced
//! by `cid:` URIs.

pub mod config;
pub mod envelope;
pub mod error;
pub mod model;
pub mod multipart;
pub mod schema;
pub mod storage;
pub mod swa;
pub mod xml;

pub use error::{Result, SwaError};
pub use model::attachment::{Attachment, HashFunction};
pub use model::value::{FieldValue, Value, ValueKind};
pub use schema::{BodySchema, ElementSpec, MessageBody};
pub use swa::{encode_response, SwaRequest, SwaService};
