pub mod measure;
pub mod query_envelope;
pub mod result_set;

pub use measure::{MeasureConfig, MeasureConfigFile, json_schema, normalize_alias};
pub use query_envelope::{
    FailureClass, QUERY_ENVELOPE_SCHEMA_VERSION, QueryEnvelope, QueryEnvelopeCommandFailure,
    QueryEnvelopeError, QueryEnvelopeWarning,
};
pub use result_set::ResultSet;
