pub mod query;
pub mod source;

pub use source::AppState;
