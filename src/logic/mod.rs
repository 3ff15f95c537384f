pub mod ingest;
pub mod query;
pub mod registry;
pub mod resolve;

pub use ingest::*;
pub use query::*;
pub use registry::*;
pub use resolve::*;
