pub mod document;
pub mod operation;
pub mod schema;

pub use document::{parse_document, ParsedDocument};
pub use operation::{LintLevel, LintProblem, OperationResult};
pub use schema::SchemaDefinition;
