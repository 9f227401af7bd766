//! Core data model: element values, attachments and decoded MIME parts.

pub mod attachment;
pub mod part;
pub mod value;
