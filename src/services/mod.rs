pub mod capability;
pub mod compiler;
pub mod fallback; // In-process aggregation for what a dialect cannot compute
pub mod query_service;
pub mod source_manager;
pub mod sources;

pub use capability::*;
pub use compiler::{compile, CompileOptions, CompiledSql};
pub use fallback::FallbackEngine;
pub use query_service::*;
pub use source_manager::*;
pub use sources::{DataSource, QueryResult};
