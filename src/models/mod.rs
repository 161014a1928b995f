pub mod dsl;
pub mod result;
pub mod schema;
pub mod source;

pub use dsl::*;
pub use result::*;
pub use schema::*;
pub use source::*;
