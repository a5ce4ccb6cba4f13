pub mod app;
pub mod config;
pub mod error;
pub mod fields;
pub mod logic;
pub mod model;
pub mod store;

pub use app::{AppSchema, SchemaSkeleton};
pub use error::{FetchError, FieldError, ValidationError, ValidationKind};

// Export field hierarchy and registry
pub use fields::{
    ArrayField, DynamicField, FetchCapability, FetchableField, Field, FieldsResolver, FormatKey,
    RelatedListField, RelationField, SimpleField,
};

// Export coalescer and orchestrator
pub use logic::{fetch_keys, FetchOptions, FetchReport, QueryCoalescer, RelationFetcher};

// Export all model types
pub use model::*;

// Export store types
pub use store::{MemoryQuerySource, QuerySource, QuerySourceResolver, SourceRegistry};
