pub mod descriptor;
pub mod outcome;
pub mod query_envelope;
pub mod scope;

pub use descriptor::{
    ColumnDescriptor, ColumnNote, DescriptionDocument, ObjectDescriptor, ObjectType,
    SchemaDescriptor, description_json_schema, qualified_name,
};
pub use outcome::QueryOutcome;
pub use query_envelope::{
    FailureClass, QUERY_ENVELOPE_SCHEMA_VERSION, QueryEnvelope, QueryEnvelopeCommandFailure,
    QueryTrace, WarningCode,
};
pub use scope::{ScopeMapping, ScopeSource};
