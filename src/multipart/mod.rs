//! SOAP-with-Attachments multipart decoding and encoding.

pub mod decoder;
pub mod encoder;
pub mod header;
pub mod transfer;
