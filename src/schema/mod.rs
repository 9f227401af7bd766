//! Message-body schemas: element declarations, occurrence rules and facets.

pub mod body;
pub mod builder;
pub mod element;
pub mod facets;
pub mod occurrence;
pub mod wsdl;

pub use body::{MessageBody, RawBody};
pub use builder::{BodySchema, BodySchemaBuilder, FieldEntry};
pub use element::{ElementSpec, MaxOccurs};
pub use facets::Whitespace;
pub use occurrence::{classify, Annotation, Occurrence};
